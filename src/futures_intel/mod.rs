// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Funding rate is the one futures-derivatives signal the filter stack
// consumes: a contrarian read on crowd positioning, normalised to
// [-1.0, +1.0]. Other sub-signals can be folded into the composite the same
// way once a data source for them exists.

pub mod funding_rate;

pub use funding_rate::{FundingRateMonitor, FundingState};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Aggregated futures intelligence for a single symbol.
#[derive(Debug, Clone, Serialize)]
pub struct FuturesIntelState {
    /// The symbol this intelligence pertains to.
    pub symbol: String,

    /// Equal-weighted average of available sub-signals in [-1.0, +1.0].
    pub composite_signal: f64,

    /// Human-readable bias label: BULLISH / BEARISH / NEUTRAL.
    pub composite_bias: String,

    /// ISO 8601 timestamp of the last update.
    pub last_update: String,
}

impl FuturesIntelState {
    /// Create a new blank state for `symbol`.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            composite_signal: 0.0,
            composite_bias: "NEUTRAL".to_string(),
            last_update: Utc::now().to_rfc3339(),
        }
    }

    /// Recompute the composite signal and bias from individual signal values.
    pub fn update_composite(&mut self, signals: &[f64]) {
        let count = signals.len();
        if count > 0 {
            self.composite_signal = signals.iter().sum::<f64>() / count as f64;
        } else {
            self.composite_signal = 0.0;
        }

        self.composite_bias = if self.composite_signal > 0.2 {
            "BULLISH".to_string()
        } else if self.composite_signal < -0.2 {
            "BEARISH".to_string()
        } else {
            "NEUTRAL".to_string()
        };

        self.last_update = Utc::now().to_rfc3339();
    }
}
