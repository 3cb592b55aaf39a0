//! LMSR binary-outcome prediction market.
//! Exports all modules for use as a library crate.

pub mod app_state;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod market_state;
pub mod markets;
pub mod models;
pub mod pricing;
pub mod settlement;

pub use app_state::{AppState, SharedState};
pub use config::Config;
pub use errors::TradeError;
pub use ledger::Ledger;
pub use market_state::MarketStateStore;
pub use markets::{MarketBook, PayoutSummary};
pub use models::{Account, Market, MarketStatus, Position, Side};
pub use pricing::{Lmsr, MAX_PRICE, MIN_PRICE};
pub use settlement::results::{ResultStore, TradeResult};
pub use settlement::{SettlementContext, SettlementPipeline, TradeIntent};
