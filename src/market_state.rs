// ============================================================================
// Market State Store
// ============================================================================
//
// Holds the two outstanding-share counters (q_yes, q_no) per market. Both
// counters are floored at the configured buffer: a fresh market is seeded
// (buffer, buffer) so it prices at 50/50, and no write may push either side
// below the floor. A zero counter would force a mispriced market, so any read
// that finds a sub-buffer value heals it back up to the floor, persists the
// correction, and counts the repair.
//
// The store also owns the price cache. A write invalidates the cached price
// pair for that market inside the same locked operation, so `prices()` can
// never serve a quote computed from superseded state.
//
// ============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

use crate::errors::TradeError;
use crate::pricing::Lmsr;

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, (f64, f64)>,
    price_cache: HashMap<String, (f64, f64)>,
}

#[derive(Debug)]
pub struct MarketStateStore {
    inner: Mutex<Inner>,
    buffer: f64,
    repairs: AtomicU64,
}

impl MarketStateStore {
    pub fn new(buffer: f64) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            buffer,
            repairs: AtomicU64::new(0),
        }
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    /// Seed a new market at (buffer, buffer). Idempotent.
    pub fn create(&self, market_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .states
            .entry(market_id.to_string())
            .or_insert((self.buffer, self.buffer));
    }

    /// Read (q_yes, q_no), healing any counter found below the buffer floor
    /// before returning. Fails with `MarketNotFound` for unknown markets.
    pub fn read(&self, market_id: &str) -> Result<(f64, f64), TradeError> {
        let mut inner = self.inner.lock().unwrap();
        self.read_locked(&mut inner, market_id)
    }

    fn read_locked(&self, inner: &mut Inner, market_id: &str) -> Result<(f64, f64), TradeError> {
        let (q_yes, q_no) = *inner
            .states
            .get(market_id)
            .ok_or_else(|| TradeError::MarketNotFound(market_id.to_string()))?;

        if q_yes < self.buffer || q_no < self.buffer || !q_yes.is_finite() || !q_no.is_finite() {
            let healed = (q_yes.max(self.buffer), q_no.max(self.buffer));
            let healed = (
                if healed.0.is_finite() { healed.0 } else { self.buffer },
                if healed.1.is_finite() { healed.1 } else { self.buffer },
            );
            warn!(
                market_id,
                q_yes, q_no, "market state below buffer floor, healing"
            );
            self.repairs.fetch_add(1, Ordering::Relaxed);
            inner.states.insert(market_id.to_string(), healed);
            inner.price_cache.remove(market_id);
            return Ok(healed);
        }

        Ok((q_yes, q_no))
    }

    /// Write (q_yes, q_no), clamping both values to the buffer floor and
    /// invalidating the cached prices for this market.
    pub fn write(&self, market_id: &str, q_yes: f64, q_no: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.states.insert(
            market_id.to_string(),
            (q_yes.max(self.buffer), q_no.max(self.buffer)),
        );
        inner.price_cache.remove(market_id);
    }

    /// Current (yes_price, no_price), served from the cache when the state
    /// has not changed since the last computation.
    ///
    /// Miss check, state read (with heal), and cache fill all happen under
    /// one lock acquisition: a concurrent write cannot slip between the read
    /// and the fill and leave a quote from superseded state in the cache.
    pub fn prices(&self, market_id: &str, lmsr: &Lmsr) -> Result<(f64, f64), TradeError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(cached) = inner.price_cache.get(market_id) {
            return Ok(*cached);
        }

        let (q_yes, q_no) = self.read_locked(&mut inner, market_id)?;
        let prices = lmsr.price(q_yes, q_no);
        inner.price_cache.insert(market_id.to_string(), prices);
        Ok(prices)
    }

    /// Number of floor repairs performed since startup.
    pub fn repair_count(&self) -> u64 {
        self.repairs.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HashMap<String, (f64, f64)> {
        self.inner.lock().unwrap().states.clone()
    }

    pub fn restore(&self, states: HashMap<String, (f64, f64)>) {
        let mut inner = self.inner.lock().unwrap();
        inner.states = states;
        inner.price_cache.clear();
    }

    #[cfg(test)]
    pub fn force_raw(&self, market_id: &str, q_yes: f64, q_no: f64) {
        // Bypasses the floor clamp to simulate corrupt or legacy-seeded data.
        let mut inner = self.inner.lock().unwrap();
        inner.states.insert(market_id.to_string(), (q_yes, q_no));
        inner.price_cache.remove(market_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lmsr() -> Lmsr {
        Lmsr::new(5000.0, 64, 0.01)
    }

    #[test]
    fn test_create_seeds_buffer_on_both_sides() {
        let store = MarketStateStore::new(10000.0);
        store.create("m1");
        assert_eq!(store.read("m1").unwrap(), (10000.0, 10000.0));
    }

    #[test]
    fn test_read_unknown_market_fails() {
        let store = MarketStateStore::new(10000.0);
        assert!(matches!(
            store.read("nope"),
            Err(TradeError::MarketNotFound(_))
        ));
    }

    #[test]
    fn test_write_clamps_to_floor() {
        let store = MarketStateStore::new(10000.0);
        store.create("m1");
        store.write("m1", 150.0, -20.0);
        assert_eq!(store.read("m1").unwrap(), (10000.0, 10000.0));
    }

    #[test]
    fn test_read_heals_corrupt_state_and_counts() {
        let store = MarketStateStore::new(10000.0);
        store.create("m1");
        store.force_raw("m1", 0.0, 4000.0);

        assert_eq!(store.repair_count(), 0);
        assert_eq!(store.read("m1").unwrap(), (10000.0, 10000.0));
        assert_eq!(store.repair_count(), 1);

        // The correction is persisted, so a second read repairs nothing.
        assert_eq!(store.read("m1").unwrap(), (10000.0, 10000.0));
        assert_eq!(store.repair_count(), 1);
    }

    #[test]
    fn test_write_invalidates_price_cache() {
        let store = MarketStateStore::new(10000.0);
        let engine = lmsr();
        store.create("m1");

        let (yes_before, _) = store.prices("m1", &engine).unwrap();
        assert!((yes_before - 0.5).abs() < 1e-9);

        store.write("m1", 15000.0, 10000.0);
        let (yes_after, _) = store.prices("m1", &engine).unwrap();
        assert!(yes_after > yes_before, "stale price served after write");
    }

    #[test]
    fn test_prices_heal_corrupt_state_before_filling_cache() {
        let store = MarketStateStore::new(10000.0);
        let engine = lmsr();
        store.create("m1");
        store.force_raw("m1", 0.0, 4000.0);

        // The miss path heals first, so the cached quote is never computed
        // from sub-buffer counters.
        let (yes, no) = store.prices("m1", &engine).unwrap();
        assert!((yes - 0.5).abs() < 1e-9);
        assert!((no - 0.5).abs() < 1e-9);
        assert_eq!(store.repair_count(), 1);
        assert_eq!(store.read("m1").unwrap(), (10000.0, 10000.0));
    }

    #[test]
    fn test_prices_track_state_under_concurrent_writes() {
        use std::sync::Arc;
        let store = Arc::new(MarketStateStore::new(10000.0));
        let engine = lmsr();
        store.create("m1");

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..2000u32 {
                    store.write("m1", 10000.0 + i as f64 * 5.0, 10000.0);
                }
            })
        };
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let (yes, no) = store.prices("m1", &lmsr()).unwrap();
                    assert!((yes + no - 1.0).abs() < 1e-9);
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();

        // Once writes stop, the served quote must match the committed state;
        // a quote cached from superseded counters would fail this.
        let (q_yes, q_no) = store.read("m1").unwrap();
        assert_eq!(store.prices("m1", &engine).unwrap(), engine.price(q_yes, q_no));
    }

    #[test]
    fn test_cached_price_reused_until_invalidated() {
        let store = MarketStateStore::new(10000.0);
        let engine = lmsr();
        store.create("m1");
        let first = store.prices("m1", &engine).unwrap();
        let second = store.prices("m1", &engine).unwrap();
        assert_eq!(first, second);
    }
}
