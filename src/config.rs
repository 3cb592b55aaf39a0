// Runtime configuration, loaded from the environment with sane defaults.

use std::env;

/// Application configuration.
///
/// Every knob can be overridden via environment variables (a `.env` file is
/// honored at startup). Defaults match the tuning the market was launched
/// with: with a 10,000-unit buffer on each side, a liquidity parameter of
/// ~5,000 keeps a 2,000-unit bet from swinging the price to 99/1.
#[derive(Debug, Clone)]
pub struct Config {
    /// LMSR liquidity parameter `b`. Larger b = more capital to move price.
    pub lmsr_b: f64,
    /// Seed quantity added to both sides at market creation. Also the hard
    /// floor for q_yes/q_no.
    pub lmsr_buffer: f64,
    /// Starting credit for accounts created on first touch.
    pub initial_balance: f64,
    /// Fee rate applied to net profit of winning positions at resolution.
    pub profit_fee_rate: f64,
    /// Seconds a trade result stays pollable before it is swept.
    pub result_ttl_secs: u64,
    /// Hard cap on stored trade results (evict-oldest past this).
    pub max_results: usize,
    /// Iteration cap for the cost-function inverse solver.
    pub solver_max_iterations: u32,
    /// Absolute cost tolerance (currency units) for the solver.
    pub solver_tolerance: f64,
    /// Positions with fewer remaining shares than this are deleted on sell.
    pub dust_threshold: f64,
    /// HTTP listen port.
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            lmsr_b: env_f64("LMSR_B", 5000.0),
            lmsr_buffer: env_f64("LMSR_BUFFER", 10000.0),
            initial_balance: env_f64("INITIAL_BALANCE", 1000.0),
            profit_fee_rate: env_f64("PROFIT_FEE_RATE", 0.02),
            result_ttl_secs: env_u64("RESULT_TTL_SECS", 3600),
            max_results: env_u64("MAX_RESULTS", 1000) as usize,
            solver_max_iterations: env_u64("SOLVER_MAX_ITERATIONS", 64) as u32,
            solver_tolerance: env_f64("SOLVER_TOLERANCE", 0.01),
            dust_threshold: env_f64("DUST_THRESHOLD", 0.01),
            port: env_u64("PORT", 1234) as u16,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lmsr_b: 5000.0,
            lmsr_buffer: 10000.0,
            initial_balance: 1000.0,
            profit_fee_rate: 0.02,
            result_ttl_secs: 3600,
            max_results: 1000,
            solver_max_iterations: 64,
            solver_tolerance: 0.01,
            dust_threshold: 0.01,
            port: 1234,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
