// Application state wiring and disk persistence.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::ledger::Ledger;
use crate::market_state::MarketStateStore;
use crate::markets::MarketBook;
use crate::models::{Account, Market};
use crate::pricing::Lmsr;
use crate::settlement::{SettlementContext, SettlementPipeline};

const STATE_FILE: &str = "data/state.json";

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub lmsr: Lmsr,
    pub ledger: Arc<Ledger>,
    pub book: Arc<MarketBook>,
    pub states: Arc<MarketStateStore>,
    pub pipeline: Arc<SettlementPipeline>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let lmsr = Lmsr::new(
            config.lmsr_b,
            config.solver_max_iterations,
            config.solver_tolerance,
        );
        let ledger = Arc::new(Ledger::new(config.initial_balance));
        let book = Arc::new(MarketBook::new());
        let states = Arc::new(MarketStateStore::new(config.lmsr_buffer));

        let pipeline = Arc::new(SettlementPipeline::new(
            SettlementContext {
                ledger: ledger.clone(),
                book: book.clone(),
                states: states.clone(),
                lmsr,
                dust_threshold: config.dust_threshold,
            },
            config.result_ttl_secs,
            config.max_results,
        ));

        Self {
            config,
            lmsr,
            ledger,
            book,
            states,
            pipeline,
        }
    }

    /// Create a market and seed its share counters in one step.
    pub fn create_market(&self, question: String, description: String, category: String) -> Market {
        let market = Market::new(question, description, category);
        self.states.create(&market.id);
        self.book.insert(market.clone());
        info!(market_id = %market.id, question = %market.question, "market created");
        market
    }

    pub fn save_to_disk(&self) -> Result<(), String> {
        #[derive(serde::Serialize)]
        struct PersistedState {
            accounts: Vec<Account>,
            markets: Vec<Market>,
            states: HashMap<String, (f64, f64)>,
        }

        let state = PersistedState {
            accounts: self.ledger.snapshot(),
            markets: self.book.snapshot(),
            states: self.states.snapshot(),
        };

        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| format!("Failed to serialize state: {}", e))?;

        fs::create_dir_all("data").map_err(|e| format!("Failed to create data dir: {}", e))?;
        fs::write(STATE_FILE, json).map_err(|e| format!("Failed to write state file: {}", e))?;

        info!(path = STATE_FILE, "state saved to disk");
        Ok(())
    }

    pub fn load_from_disk(&self) -> Result<(), String> {
        #[derive(serde::Deserialize)]
        struct PersistedState {
            accounts: Vec<Account>,
            markets: Vec<Market>,
            states: HashMap<String, (f64, f64)>,
        }

        let json = fs::read_to_string(STATE_FILE).map_err(|_| "No state file found")?;
        let state: PersistedState =
            serde_json::from_str(&json).map_err(|e| format!("Failed to deserialize state: {}", e))?;

        self.ledger.restore(state.accounts);
        self.states.restore(state.states);
        // Markets persisted without a share-counter entry get re-seeded at
        // the buffer; the floor heal on first read covers the rest.
        for market in &state.markets {
            if self.states.read(&market.id).is_err() {
                warn!(market_id = %market.id, "persisted market missing state, re-seeding");
                self.states.create(&market.id);
            }
        }
        self.book.restore(state.markets);

        info!(path = STATE_FILE, "state loaded from disk");
        Ok(())
    }
}
