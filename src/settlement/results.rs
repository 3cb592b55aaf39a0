// ============================================================================
// Trade Result Store
// ============================================================================
//
// Bounded, TTL-swept cache of settlement outcomes keyed by request id.
// Producers poll it after submitting an intent; the worker is the only
// writer. Delivery is single-shot: `take` removes the record, so a second
// poll on the same id reads as "not found". Entries expire after a fixed TTL
// and the oldest are evicted past the max-count cap, so memory stays bounded
// no matter how many pollers never come back.
//
// ============================================================================

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{now, Side};

/// Terminal outcome of a settled intent.
#[derive(Debug, Clone, Serialize)]
pub struct TradeResult {
    pub success: bool,
    pub message: String,
    pub market_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_per_share: Option<f64>,
    pub timestamp: u64,
}

impl TradeResult {
    pub fn failure(market_id: &str, message: String) -> Self {
        Self {
            success: false,
            message,
            market_id: market_id.to_string(),
            position_id: None,
            side: None,
            amount: None,
            shares: None,
            price_per_share: None,
            timestamp: now(),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    results: HashMap<String, TradeResult>,
    arrival: VecDeque<String>,
}

#[derive(Debug)]
pub struct ResultStore {
    inner: Mutex<Inner>,
    ttl_secs: u64,
    max_entries: usize,
}

impl ResultStore {
    pub fn new(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl_secs,
            max_entries,
        }
    }

    /// Store the outcome for `request_id`, then sweep expired and excess
    /// entries.
    pub fn insert(&self, request_id: &str, result: TradeResult) {
        let mut inner = self.inner.lock().unwrap();
        inner.results.insert(request_id.to_string(), result);
        inner.arrival.push_back(request_id.to_string());
        self.sweep(&mut inner);
    }

    /// Remove and return the outcome, if settled. Single delivery.
    pub fn take(&self, request_id: &str) -> Option<TradeResult> {
        self.inner.lock().unwrap().results.remove(request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, inner: &mut Inner) {
        let cutoff = now().saturating_sub(self.ttl_secs);
        inner
            .results
            .retain(|_, result| result.timestamp >= cutoff);

        // Evict oldest past the cap. Arrival order may reference ids already
        // taken or expired; those are skipped.
        while inner.results.len() > self.max_entries {
            match inner.arrival.pop_front() {
                Some(oldest) => {
                    inner.results.remove(&oldest);
                }
                None => break,
            }
        }
        while inner.arrival.len() > inner.results.len().max(self.max_entries) * 2 {
            // Keep the arrival queue from growing unboundedly with stale ids.
            if inner.arrival.pop_front().is_none() {
                break;
            }
        }
    }
}
