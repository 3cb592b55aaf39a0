// ============================================================================
// Market Registry, Resolution & Payout
// ============================================================================
//
// Owns the market records and their positions. The settlement worker is the
// only writer for position changes; resolution is an administrative path that
// bypasses the pipeline but takes the same lock the pipeline's open-market
// check uses, so flipping status to resolved is mutually exclusive with any
// in-flight trade.
//
// Payout rule (applied once, at resolution): each winning share redeems for
// 1.0 currency unit; a fee is taken on net profit only, so a position that
// merely breaks even pays nothing.
//
// ============================================================================

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

use crate::errors::TradeError;
use crate::ledger::Ledger;
use crate::models::{Market, MarketStatus, Position, Side};

/// Outcome of a resolution sweep.
#[derive(Debug, Clone, Serialize)]
pub struct PayoutSummary {
    pub market_id: String,
    pub outcome: Side,
    pub winning_positions: usize,
    pub winners: usize,
    pub total_payout: f64,
    pub total_fees: f64,
}

#[derive(Debug, Default)]
pub struct MarketBook {
    markets: Mutex<HashMap<String, Market>>,
}

impl MarketBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, market: Market) {
        self.markets.lock().unwrap().insert(market.id.clone(), market);
    }

    pub fn get(&self, market_id: &str) -> Option<Market> {
        self.markets.lock().unwrap().get(market_id).cloned()
    }

    pub fn list(&self) -> Vec<Market> {
        let mut all: Vec<Market> = self.markets.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.markets.lock().unwrap().contains_key(market_id)
    }

    /// Fails unless the market exists and is still open.
    pub fn ensure_open(&self, market_id: &str) -> Result<(), TradeError> {
        let markets = self.markets.lock().unwrap();
        let market = markets
            .get(market_id)
            .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;
        if !market.status.is_open() {
            return Err(TradeError::MarketNotOpen(market_id.to_string()));
        }
        Ok(())
    }

    /// Attach a freshly bought position, re-checking the open status under
    /// the lock. The caller must refund the debit if this fails.
    pub fn insert_position(&self, position: Position) -> Result<(), TradeError> {
        let mut markets = self.markets.lock().unwrap();
        let market = markets
            .get_mut(&position.market_id)
            .ok_or_else(|| TradeError::MarketNotFound(position.market_id.clone()))?;
        if !market.status.is_open() {
            return Err(TradeError::MarketNotOpen(position.market_id.clone()));
        }
        market.positions.push(position);
        Ok(())
    }

    /// Look up a position for sell/undo: the market must be open and the
    /// position must belong to `wallet`.
    pub fn open_position(
        &self,
        market_id: &str,
        position_id: &str,
        wallet: &str,
    ) -> Result<Position, TradeError> {
        let markets = self.markets.lock().unwrap();
        let market = markets
            .get(market_id)
            .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;
        if !market.status.is_open() {
            return Err(TradeError::MarketNotOpen(market_id.to_string()));
        }
        market
            .positions
            .iter()
            .find(|p| p.id == position_id && p.wallet == wallet)
            .cloned()
            .ok_or_else(|| TradeError::PositionNotFound(position_id.to_string()))
    }

    /// Shrink a position after a partial sell, prorating the cost basis.
    /// Deletes the position outright when the remainder falls below the dust
    /// threshold. Returns the remaining share count (0.0 when deleted).
    ///
    /// Re-checks the open status under the lock: resolution may have landed
    /// since the caller's last look, and a resolved position has already been
    /// paid out.
    pub fn shrink_position(
        &self,
        market_id: &str,
        position_id: &str,
        shares_sold: f64,
        dust_threshold: f64,
    ) -> Result<f64, TradeError> {
        let mut markets = self.markets.lock().unwrap();
        let market = markets
            .get_mut(market_id)
            .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;
        if !market.status.is_open() {
            return Err(TradeError::MarketNotOpen(market_id.to_string()));
        }
        let idx = market
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or_else(|| TradeError::PositionNotFound(position_id.to_string()))?;

        let current = market.positions[idx].shares;
        let remaining = current - shares_sold;
        if remaining < dust_threshold {
            market.positions.remove(idx);
            return Ok(0.0);
        }
        let pos = &mut market.positions[idx];
        pos.amount = if current > 0.0 { pos.amount * (remaining / current) } else { 0.0 };
        pos.shares = remaining;
        Ok(remaining)
    }

    /// Delete a position entirely (undo path). Returns the removed record.
    /// Fails `MarketNotOpen` once the market has resolved: the position is
    /// frozen and its payout, if any, has already been credited.
    pub fn remove_position(&self, market_id: &str, position_id: &str) -> Result<Position, TradeError> {
        let mut markets = self.markets.lock().unwrap();
        let market = markets
            .get_mut(market_id)
            .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;
        if !market.status.is_open() {
            return Err(TradeError::MarketNotOpen(market_id.to_string()));
        }
        let idx = market
            .positions
            .iter()
            .position(|p| p.id == position_id)
            .ok_or_else(|| TradeError::PositionNotFound(position_id.to_string()))?;
        Ok(market.positions.remove(idx))
    }

    /// Resolve the market and sweep payouts to winners.
    ///
    /// The status flip happens first, under the registry lock, which locks
    /// out any trade still in the queue. The sweep then credits each winning
    /// position through the ledger's atomic credit; losing positions are left
    /// in place for history.
    pub fn resolve_and_pay(
        &self,
        ledger: &Ledger,
        market_id: &str,
        outcome: Side,
        profit_fee_rate: f64,
    ) -> Result<PayoutSummary, TradeError> {
        let winners: Vec<Position> = {
            let mut markets = self.markets.lock().unwrap();
            let market = markets
                .get_mut(market_id)
                .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;
            if market.status == MarketStatus::Resolved {
                return Err(TradeError::AlreadyResolved(market_id.to_string()));
            }
            market.status = MarketStatus::Resolved;
            market.resolution = Some(outcome);
            market
                .positions
                .iter()
                .filter(|p| p.side == outcome)
                .cloned()
                .collect()
        };

        let mut total_payout = 0.0;
        let mut total_fees = 0.0;
        let mut wallets = HashSet::new();

        for position in &winners {
            let gross = position.shares * 1.0;
            let net_profit = (gross - position.amount).max(0.0);
            let fee = net_profit * profit_fee_rate;
            let payout = gross - fee;

            let new_balance = ledger.credit(&position.wallet, payout);
            total_payout += payout;
            total_fees += fee;
            wallets.insert(position.wallet.clone());

            info!(
                market_id,
                wallet = %position.wallet,
                gross,
                fee,
                payout,
                new_balance,
                "payout credited"
            );
        }

        info!(
            market_id,
            outcome = %outcome,
            winners = wallets.len(),
            total_payout,
            total_fees,
            "market resolved"
        );

        Ok(PayoutSummary {
            market_id: market_id.to_string(),
            outcome,
            winning_positions: winners.len(),
            winners: wallets.len(),
            total_payout,
            total_fees,
        })
    }

    pub fn snapshot(&self) -> Vec<Market> {
        self.markets.lock().unwrap().values().cloned().collect()
    }

    pub fn restore(&self, markets: Vec<Market>) {
        let mut map = self.markets.lock().unwrap();
        for market in markets {
            map.insert(market.id.clone(), market);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market_with_position(side: Side, amount: f64, shares: f64) -> (MarketBook, String, String) {
        let book = MarketBook::new();
        let market = Market::new("q".into(), String::new(), String::new());
        let market_id = market.id.clone();
        book.insert(market);
        let pos = Position::new(&market_id, "alice", side, amount, shares, amount / shares);
        let pos_id = pos.id.clone();
        book.insert_position(pos).unwrap();
        (book, market_id, pos_id)
    }

    #[test]
    fn test_resolve_pays_winner_minus_profit_fee() {
        // shares=50, cost basis=25, fee 2% of the 25 profit -> 49.5 credited.
        let (book, market_id, _) = market_with_position(Side::Yes, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        ledger.credit("alice", 0.0);

        let summary = book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();
        assert_eq!(summary.winning_positions, 1);
        assert!((summary.total_payout - 49.5).abs() < 1e-9);
        assert!((summary.total_fees - 0.5).abs() < 1e-9);
        assert!((ledger.balance("alice") - 49.5).abs() < 1e-9);
    }

    #[test]
    fn test_losing_position_gets_nothing_and_stays() {
        let (book, market_id, pos_id) = market_with_position(Side::No, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        ledger.credit("alice", 0.0);

        let summary = book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();
        assert_eq!(summary.winning_positions, 0);
        assert_eq!(ledger.balance("alice"), 0.0);

        // Position kept for history.
        let market = book.get(&market_id).unwrap();
        assert!(market.positions.iter().any(|p| p.id == pos_id));
    }

    #[test]
    fn test_resolve_twice_fails_without_duplicate_payout() {
        let (book, market_id, _) = market_with_position(Side::Yes, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        ledger.credit("alice", 0.0);

        book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();
        let second = book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02);
        assert!(matches!(second, Err(TradeError::AlreadyResolved(_))));
        assert!((ledger.balance("alice") - 49.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_fee_when_no_profit() {
        // gross 20 < cost basis 25: no profit, no fee, full 20 paid out.
        let (book, market_id, _) = market_with_position(Side::Yes, 25.0, 20.0);
        let ledger = Ledger::new(0.0);
        ledger.credit("alice", 0.0);

        let summary = book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();
        assert!((summary.total_payout - 20.0).abs() < 1e-9);
        assert_eq!(summary.total_fees, 0.0);
    }

    #[test]
    fn test_insert_position_rejected_after_resolution() {
        let (book, market_id, _) = market_with_position(Side::Yes, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        book.resolve_and_pay(&ledger, &market_id, Side::No, 0.02).unwrap();

        let late = Position::new(&market_id, "bob", Side::Yes, 10.0, 20.0, 0.5);
        assert!(matches!(
            book.insert_position(late),
            Err(TradeError::MarketNotOpen(_))
        ));
    }

    #[test]
    fn test_shrink_position_prorates_cost_basis() {
        let (book, market_id, pos_id) = market_with_position(Side::Yes, 100.0, 200.0);
        let remaining = book.shrink_position(&market_id, &pos_id, 50.0, 0.01).unwrap();
        assert_eq!(remaining, 150.0);

        let market = book.get(&market_id).unwrap();
        let pos = market.positions.iter().find(|p| p.id == pos_id).unwrap();
        assert!((pos.amount - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_shrink_below_dust_deletes() {
        let (book, market_id, pos_id) = market_with_position(Side::Yes, 100.0, 200.0);
        let remaining = book.shrink_position(&market_id, &pos_id, 199.995, 0.01).unwrap();
        assert_eq!(remaining, 0.0);
        assert!(book.get(&market_id).unwrap().positions.is_empty());
    }

    #[test]
    fn test_remove_position_rejected_after_resolution() {
        // The payout already credited this position; a late undo must not
        // refund the cost basis on top of it.
        let (book, market_id, pos_id) = market_with_position(Side::Yes, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        ledger.credit("alice", 0.0);
        book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();
        assert!((ledger.balance("alice") - 49.5).abs() < 1e-9);

        assert!(matches!(
            book.remove_position(&market_id, &pos_id),
            Err(TradeError::MarketNotOpen(_))
        ));
        // Position untouched, no second credit possible.
        assert!(book.get(&market_id).unwrap().positions.iter().any(|p| p.id == pos_id));
        assert!((ledger.balance("alice") - 49.5).abs() < 1e-9);
    }

    #[test]
    fn test_shrink_position_rejected_after_resolution() {
        let (book, market_id, pos_id) = market_with_position(Side::Yes, 25.0, 50.0);
        let ledger = Ledger::new(0.0);
        book.resolve_and_pay(&ledger, &market_id, Side::Yes, 0.02).unwrap();

        assert!(matches!(
            book.shrink_position(&market_id, &pos_id, 10.0, 0.01),
            Err(TradeError::MarketNotOpen(_))
        ));
        let market = book.get(&market_id).unwrap();
        assert_eq!(market.positions[0].shares, 50.0);
    }

    #[test]
    fn test_open_position_unauthorized_wallet() {
        let (book, market_id, pos_id) = market_with_position(Side::Yes, 100.0, 200.0);
        assert!(matches!(
            book.open_position(&market_id, &pos_id, "mallory"),
            Err(TradeError::PositionNotFound(_))
        ));
    }
}
