// Data models for the prediction market.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Current unix timestamp in seconds.
pub fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

// ============================================================================
// SIDE & MARKET STATUS
// ============================================================================

/// Which outcome a position backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            _ => Err(()),
        }
    }
}

/// Market lifecycle. Created open, transitions exactly once to resolved,
/// immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Resolved,
}

impl MarketStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, MarketStatus::Open)
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Open => write!(f, "open"),
            MarketStatus::Resolved => write!(f, "resolved"),
        }
    }
}

// ============================================================================
// CORE ENTITIES
// ============================================================================

/// Per-wallet balance record. Created lazily on first touch with a fixed
/// starting credit; balance never goes negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub wallet: String,
    pub balance: f64,
    pub created_at: u64,
    pub last_activity: u64,
}

impl Account {
    pub fn new(wallet: &str, initial_balance: f64) -> Self {
        let ts = now();
        Self {
            wallet: wallet.to_string(),
            balance: initial_balance,
            created_at: ts,
            last_activity: ts,
        }
    }
}

/// A user's outstanding stake on one side of one market.
///
/// Created by Buy, shrunk or deleted by Sell/Undo, frozen once the market
/// resolves. `amount` is the cost basis; each share redeems 1:1 in currency
/// if `side` matches the resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market_id: String,
    pub wallet: String,
    pub side: Side,
    pub amount: f64,
    pub shares: f64,
    pub price_per_share: f64,
    pub created_at: u64,
}

impl Position {
    pub fn new(
        market_id: &str,
        wallet: &str,
        side: Side,
        amount: f64,
        shares: f64,
        price_per_share: f64,
    ) -> Self {
        Self {
            id: format!("pos_{}", Uuid::new_v4().simple()),
            market_id: market_id.to_string(),
            wallet: wallet.to_string(),
            side,
            amount,
            shares,
            price_per_share,
            created_at: now(),
        }
    }
}

/// A binary-outcome market. Positions live on the market record; the q_yes /
/// q_no counters live in the market state store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub status: MarketStatus,
    pub resolution: Option<Side>,
    pub created_at: u64,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl Market {
    pub fn new(question: String, description: String, category: String) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            question,
            description,
            category,
            status: MarketStatus::Open,
            resolution: None,
            created_at: now(),
            positions: Vec::new(),
        }
    }

    pub fn positions_for_wallet(&self, wallet: &str) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| p.wallet == wallet)
            .cloned()
            .collect()
    }

    /// Total amount wagered on each side, plus position count.
    pub fn volume_totals(&self) -> (f64, f64, usize) {
        let mut yes_total = 0.0;
        let mut no_total = 0.0;
        for p in &self.positions {
            match p.side {
                Side::Yes => yes_total += p.amount,
                Side::No => no_total += p.amount,
            }
        }
        (yes_total, no_total, self.positions.len())
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub question: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub wallet: String,
    pub side: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct SellSharesRequest {
    pub wallet: String,
    pub position_id: String,
    pub shares: f64,
}

#[derive(Debug, Deserialize)]
pub struct UndoBetRequest {
    pub wallet: String,
    pub position_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveMarketRequest {
    pub outcome: String,
}

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: f64,
}
