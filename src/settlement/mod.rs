// ============================================================================
// Settlement Pipeline
// ============================================================================
//
// Single-consumer queue that serializes every Buy/Sell/Undo against market
// state and the ledger. Producers (request handlers) only enqueue an intent
// and poll the result store by request id; the one worker task drains the
// channel in arrival order, so there is at most one in-flight mutation at a
// time across all markets. That sequencing is what keeps two concurrent buys
// from reading the same q_yes/q_no and racing to write.
//
// Failures inside the worker are recorded as failed results under the
// intent's request id, never surfaced to the submitter: the submitter already
// got its 202 and is polling.
//
// Liveness: a watchdog respawns the worker if it ever exits. The queue is
// in-memory, so intents enqueued but unprocessed at crash time are lost; the
// worker itself never aborts on a bad intent, only on process teardown.
//
// ============================================================================

pub mod results;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::TradeError;
use crate::ledger::Ledger;
use crate::markets::MarketBook;
use crate::market_state::MarketStateStore;
use crate::models::{now, Position, Side};
use crate::pricing::Lmsr;
use results::{ResultStore, TradeResult};

/// How often the watchdog checks that the worker is alive.
const WATCHDOG_INTERVAL_SECS: u64 = 5;

/// A trade intent, carried through the queue with its correlation id.
#[derive(Debug)]
pub enum TradeIntent {
    Buy {
        request_id: String,
        market_id: String,
        wallet: String,
        side: Side,
        amount: f64,
    },
    Sell {
        request_id: String,
        market_id: String,
        wallet: String,
        position_id: String,
        shares: f64,
    },
    Undo {
        request_id: String,
        market_id: String,
        wallet: String,
        position_id: String,
    },
}

impl TradeIntent {
    fn request_id(&self) -> &str {
        match self {
            TradeIntent::Buy { request_id, .. } => request_id,
            TradeIntent::Sell { request_id, .. } => request_id,
            TradeIntent::Undo { request_id, .. } => request_id,
        }
    }

    fn market_id(&self) -> &str {
        match self {
            TradeIntent::Buy { market_id, .. } => market_id,
            TradeIntent::Sell { market_id, .. } => market_id,
            TradeIntent::Undo { market_id, .. } => market_id,
        }
    }
}

/// Everything the worker needs to settle an intent.
#[derive(Clone)]
pub struct SettlementContext {
    pub ledger: Arc<Ledger>,
    pub book: Arc<MarketBook>,
    pub states: Arc<MarketStateStore>,
    pub lmsr: Lmsr,
    pub dust_threshold: f64,
}

pub struct SettlementPipeline {
    tx: mpsc::UnboundedSender<TradeIntent>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TradeIntent>>>,
    results: Arc<ResultStore>,
    ctx: SettlementContext,
    depth: Arc<AtomicUsize>,
}

impl SettlementPipeline {
    pub fn new(ctx: SettlementContext, result_ttl_secs: u64, max_results: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            results: Arc::new(ResultStore::new(result_ttl_secs, max_results)),
            ctx,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Spawn the worker if none is running. The worker holds the receiver
    /// lock for its whole lifetime, so a duplicate spawn exits immediately.
    pub fn ensure_worker_running(&self) {
        let rx = self.rx.clone();
        let results = self.results.clone();
        let ctx = self.ctx.clone();
        let depth = self.depth.clone();

        tokio::spawn(async move {
            let mut rx = match rx.try_lock() {
                Ok(guard) => guard,
                Err(_) => return, // a worker already owns the queue
            };
            info!("settlement worker started");
            while let Some(intent) = rx.recv().await {
                depth.fetch_sub(1, Ordering::Relaxed);
                let request_id = intent.request_id().to_string();
                let market_id = intent.market_id().to_string();
                let result = match process_intent(&ctx, intent) {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(request_id = %request_id, %err, "intent failed");
                        TradeResult::failure(&market_id, err.to_string())
                    }
                };
                results.insert(&request_id, result);
            }
            info!("settlement worker stopped: channel closed");
        });
    }

    /// Periodically restart the worker if it has died. Returns immediately;
    /// the watchdog runs for the life of the process.
    pub fn spawn_watchdog(self: Arc<Self>) {
        let pipeline = self;
        tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(std::time::Duration::from_secs(WATCHDOG_INTERVAL_SECS));
            loop {
                tick.tick().await;
                pipeline.ensure_worker_running();
            }
        });
    }

    /// Enqueue a buy. Returns (request id, queue position at submit time).
    pub fn submit_buy(
        &self,
        market_id: &str,
        wallet: &str,
        side: Side,
        amount: f64,
    ) -> (String, usize) {
        self.submit(|request_id| TradeIntent::Buy {
            request_id,
            market_id: market_id.to_string(),
            wallet: wallet.trim().to_lowercase(),
            side,
            amount,
        })
    }

    pub fn submit_sell(
        &self,
        market_id: &str,
        wallet: &str,
        position_id: &str,
        shares: f64,
    ) -> (String, usize) {
        self.submit(|request_id| TradeIntent::Sell {
            request_id,
            market_id: market_id.to_string(),
            wallet: wallet.trim().to_lowercase(),
            position_id: position_id.to_string(),
            shares,
        })
    }

    pub fn submit_undo(&self, market_id: &str, wallet: &str, position_id: &str) -> (String, usize) {
        self.submit(|request_id| TradeIntent::Undo {
            request_id,
            market_id: market_id.to_string(),
            wallet: wallet.trim().to_lowercase(),
            position_id: position_id.to_string(),
        })
    }

    fn submit<F>(&self, build: F) -> (String, usize)
    where
        F: FnOnce(String) -> TradeIntent,
    {
        let request_id = Uuid::new_v4().to_string();
        let position = self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(build(request_id.clone())).is_err() {
            // Channel can only close at teardown; record it so pollers see a
            // terminal failure instead of waiting forever.
            error!("settlement queue closed, rejecting intent");
            self.depth.fetch_sub(1, Ordering::Relaxed);
            self.results.insert(
                &request_id,
                TradeResult::failure("", "settlement queue unavailable".to_string()),
            );
        }
        (request_id, position)
    }

    /// Single-delivery poll: `Some` exactly once per settled intent.
    pub fn poll(&self, request_id: &str) -> Option<TradeResult> {
        self.results.take(request_id)
    }

    pub fn queue_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

// ============================================================================
// INTENT PROCESSING
// ============================================================================

fn process_intent(ctx: &SettlementContext, intent: TradeIntent) -> Result<TradeResult, TradeError> {
    match intent {
        TradeIntent::Buy { market_id, wallet, side, amount, .. } => {
            process_buy(ctx, &market_id, &wallet, side, amount)
        }
        TradeIntent::Sell { market_id, wallet, position_id, shares, .. } => {
            process_sell(ctx, &market_id, &wallet, &position_id, shares)
        }
        TradeIntent::Undo { market_id, wallet, position_id, .. } => {
            process_undo(ctx, &market_id, &wallet, &position_id)
        }
    }
}

/// Buy: validate, price the trade, then debit → position → market state.
/// The debit is the only fallible step after validation; if attaching the
/// position fails because the market resolved mid-flight, the debit is
/// refunded so no money is taken without a position to show for it.
fn process_buy(
    ctx: &SettlementContext,
    market_id: &str,
    wallet: &str,
    side: Side,
    amount: f64,
) -> Result<TradeResult, TradeError> {
    ctx.book.ensure_open(market_id)?;

    let (q_yes, q_no) = ctx.states.read(market_id)?;
    let (shares, price_per_share) = ctx.lmsr.shares_for_trade(amount, side, q_yes, q_no);
    if shares <= 0.0 {
        return Err(TradeError::InvalidTrade(format!(
            "computed {:.4} shares for amount {:.2}",
            shares, amount
        )));
    }

    ctx.ledger.debit(wallet, amount)?;

    let position = Position::new(market_id, wallet, side, amount, shares, price_per_share);
    let position_id = position.id.clone();
    if let Err(err) = ctx.book.insert_position(position) {
        ctx.ledger.credit(wallet, amount);
        return Err(err);
    }

    match side {
        Side::Yes => ctx.states.write(market_id, q_yes + shares, q_no),
        Side::No => ctx.states.write(market_id, q_yes, q_no + shares),
    }

    info!(
        market_id,
        wallet,
        side = %side,
        amount,
        shares,
        price_per_share,
        "buy settled"
    );

    Ok(TradeResult {
        success: true,
        message: format!("Bought {:.2} {} shares @ {:.4}", shares, side, price_per_share),
        market_id: market_id.to_string(),
        position_id: Some(position_id),
        side: Some(side),
        amount: Some(amount),
        shares: Some(shares),
        price_per_share: Some(price_per_share),
        timestamp: now(),
    })
}

/// Sell: valued at the instantaneous marginal price (not the cost-function
/// integral buys use). Shrinks or deletes the position, credits the wallet,
/// and walks q_side back down, floored at the buffer.
fn process_sell(
    ctx: &SettlementContext,
    market_id: &str,
    wallet: &str,
    position_id: &str,
    shares_to_sell: f64,
) -> Result<TradeResult, TradeError> {
    let position = ctx.book.open_position(market_id, position_id, wallet)?;

    if shares_to_sell <= 0.0 {
        return Err(TradeError::InvalidAmount("shares must be positive".to_string()));
    }
    if shares_to_sell > position.shares {
        return Err(TradeError::InvalidAmount(format!(
            "cannot sell {:.2} of {:.2} held shares",
            shares_to_sell, position.shares
        )));
    }

    let (q_yes, q_no) = ctx.states.read(market_id)?;
    let (sell_value, price) = ctx.lmsr.sell_value(shares_to_sell, position.side, q_yes, q_no);

    let remaining =
        ctx.book
            .shrink_position(market_id, position_id, shares_to_sell, ctx.dust_threshold)?;
    match position.side {
        Side::Yes => ctx.states.write(market_id, q_yes - shares_to_sell, q_no),
        Side::No => ctx.states.write(market_id, q_yes, q_no - shares_to_sell),
    }
    ctx.ledger.credit(wallet, sell_value);

    info!(
        market_id,
        wallet,
        position_id,
        shares_to_sell,
        sell_value,
        remaining,
        "sell settled"
    );

    Ok(TradeResult {
        success: true,
        message: format!("Sold {:.2} shares for {:.2}", shares_to_sell, sell_value),
        market_id: market_id.to_string(),
        position_id: Some(position_id.to_string()),
        side: Some(position.side),
        amount: Some(sell_value),
        shares: Some(shares_to_sell),
        price_per_share: Some(price),
        timestamp: now(),
    })
}

/// Undo: full compensating reversal of a buy. Refunds the cost basis,
/// deletes the position, and walks q_side back by the position's shares.
/// Only valid while the market is still open.
fn process_undo(
    ctx: &SettlementContext,
    market_id: &str,
    wallet: &str,
    position_id: &str,
) -> Result<TradeResult, TradeError> {
    let position = ctx.book.open_position(market_id, position_id, wallet)?;

    let (q_yes, q_no) = ctx.states.read(market_id)?;
    ctx.book.remove_position(market_id, position_id)?;
    match position.side {
        Side::Yes => ctx.states.write(market_id, q_yes - position.shares, q_no),
        Side::No => ctx.states.write(market_id, q_yes, q_no - position.shares),
    }
    ctx.ledger.credit(wallet, position.amount);

    info!(
        market_id,
        wallet,
        position_id,
        refunded = position.amount,
        "undo settled"
    );

    Ok(TradeResult {
        success: true,
        message: format!("Position undone, refunded {:.2}", position.amount),
        market_id: market_id.to_string(),
        position_id: Some(position_id.to_string()),
        side: Some(position.side),
        amount: Some(position.amount),
        shares: Some(position.shares),
        price_per_share: Some(position.price_per_share),
        timestamp: now(),
    })
}

// ============================================================================
// UNIT TESTS
// ============================================================================
