// ============================================================================
// LMSR Pricing Engine
// ============================================================================
//
// Logarithmic Market Scoring Rule for a binary (Yes/No) market.
//
// Price calculation:
//   - Price(YES) = 1 / (1 + exp((q_no - q_yes) / b))
//   - Price(NO)  = 1 - Price(YES)
//   - Prices are clamped to [0.01, 0.99] and renormalized to sum to 1.0
//
// Cost function:
//   - C(q_yes, q_no) = b * ln(exp(q_yes/b) + exp(q_no/b))
//   - The cost of a trade is C(after) - C(before)
//
// Buying `amount` of currency worth of YES means solving
//   C(q_yes + s, q_no) - C(q_yes, q_no) = amount
// for the share quantity s. There is no closed form for this inverse, so it
// is found by bisection, seeded from the linear approximation amount/price.
//
// Pure and stateless given (q_yes, q_no, b): callers own all market state.
//
// ============================================================================

use crate::models::Side;

/// Exponent clamp applied before every call to exp(). e^700 is near the top
/// of the f64 range; anything past it would overflow to infinity.
const MAX_EXPONENT: f64 = 700.0;

/// Floor for a single outcome price.
pub const MIN_PRICE: f64 = 0.01;

/// Ceiling for a single outcome price.
pub const MAX_PRICE: f64 = 0.99;

/// LMSR engine. `b` is the liquidity parameter; `max_iterations` and
/// `tolerance` bound the bisection that inverts the cost function.
#[derive(Debug, Clone, Copy)]
pub struct Lmsr {
    pub b: f64,
    pub max_iterations: u32,
    pub tolerance: f64,
}

impl Lmsr {
    pub fn new(b: f64, max_iterations: u32, tolerance: f64) -> Self {
        Self { b, max_iterations, tolerance }
    }

    /// Current (yes_price, no_price) for the given outstanding quantities.
    ///
    /// Always returns prices in [MIN_PRICE, MAX_PRICE] that sum to exactly
    /// 1.0 after renormalization.
    pub fn price(&self, q_yes: f64, q_no: f64) -> (f64, f64) {
        let exponent = ((q_no - q_yes) / self.b).clamp(-MAX_EXPONENT, MAX_EXPONENT);
        let yes_price = 1.0 / (1.0 + exponent.exp());
        let no_price = 1.0 - yes_price;

        let yes_price = yes_price.clamp(MIN_PRICE, MAX_PRICE);
        let no_price = no_price.clamp(MIN_PRICE, MAX_PRICE);

        // Renormalize so the pair sums to 1.0 even after clamping.
        let total = yes_price + no_price;
        (yes_price / total, no_price / total)
    }

    /// LMSR cost function C(q_yes, q_no) = b * ln(e^{q_yes/b} + e^{q_no/b}).
    ///
    /// Exponents are clamped before exp(); if the sum still overflows the
    /// approximation max(q_yes, q_no) + b is returned instead.
    pub fn cost(&self, q_yes: f64, q_no: f64) -> f64 {
        let ey = (q_yes / self.b).clamp(-MAX_EXPONENT, MAX_EXPONENT).exp();
        let en = (q_no / self.b).clamp(-MAX_EXPONENT, MAX_EXPONENT).exp();
        let sum = ey + en;
        if sum.is_finite() && sum > 0.0 {
            self.b * sum.ln()
        } else {
            q_yes.max(q_no) + self.b
        }
    }

    /// Shares received for spending `amount` on `side`, plus the average
    /// price per share over the trade.
    ///
    /// Solves C(q + s) - C(q) = amount by bisection. The lower bound starts
    /// at zero; the upper bound starts at the linear estimate amount/price
    /// and doubles until it brackets the root. Iteration stops once the cost
    /// error drops below `tolerance` (absolute, in currency units) or after
    /// `max_iterations` halvings.
    pub fn shares_for_trade(&self, amount: f64, side: Side, q_yes: f64, q_no: f64) -> (f64, f64) {
        let (yes_price, no_price) = self.price(q_yes, q_no);
        let entry_price = match side {
            Side::Yes => yes_price,
            Side::No => no_price,
        };

        if amount <= 0.0 {
            return (0.0, entry_price);
        }

        // Degenerate state: no usable price signal, fall back to the linear
        // approximation with the price floored.
        if entry_price <= 0.0 {
            let shares = amount / MIN_PRICE;
            return (shares, MIN_PRICE);
        }

        let base_cost = self.cost(q_yes, q_no);
        let cost_after = |s: f64| match side {
            Side::Yes => self.cost(q_yes + s, q_no),
            Side::No => self.cost(q_yes, q_no + s),
        };

        // Bracket the root.
        let mut lo = 0.0_f64;
        let mut hi = (amount / entry_price).max(1.0);
        let mut expand = 0;
        while cost_after(hi) - base_cost < amount && expand < self.max_iterations {
            hi *= 2.0;
            expand += 1;
        }

        let mut shares = hi;
        for _ in 0..self.max_iterations {
            let mid = (lo + hi) / 2.0;
            let diff = cost_after(mid) - base_cost - amount;
            shares = mid;
            if diff.abs() < self.tolerance {
                break;
            }
            if diff > 0.0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        let shares = shares.max(0.0);
        let avg_price = if shares > 0.0 { amount / shares } else { entry_price };
        (shares, avg_price)
    }

    /// Instantaneous value of selling `shares` on `side` at the current
    /// marginal price. Sells are intentionally valued at the marginal price
    /// rather than through the cost-function integral used for buys.
    pub fn sell_value(&self, shares: f64, side: Side, q_yes: f64, q_no: f64) -> (f64, f64) {
        let (yes_price, no_price) = self.price(q_yes, q_no);
        let price = match side {
            Side::Yes => yes_price,
            Side::No => no_price,
        };
        (shares * price, price)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
