// =============================================================================
// Typed error taxonomy for admission and execution failures
// =============================================================================
//
// `anyhow` is used everywhere for ad-hoc propagation (IO, parsing, network).
// `EngineError` sits at the boundaries that downstream callers need to branch
// on — the risk gate, entry/exit execution, price lookups — where "what kind
// of failure" matters as much as "that it failed".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data invalid for {symbol}: {reason}")]
    DataInvalid { symbol: String, reason: String },

    #[error("no price available for {symbol} across any fallback source")]
    PriceUnavailable { symbol: String },

    #[error("price for {symbol} outside sanity limits: {price} (last known {last_known})")]
    PriceOutOfLimits {
        symbol: String,
        price: f64,
        last_known: f64,
    },

    #[error("exchange rate-limited: retry after {retry_after_ms}ms")]
    ExchangeRateLimited { retry_after_ms: u64 },

    #[error("exchange transient error on {op}: {detail}")]
    ExchangeTransient { op: String, detail: String },

    #[error("leverage not set for {symbol}")]
    LeverageUnset { symbol: String },

    #[error("insufficient margin for {symbol}: need {required}, have {available}")]
    InsufficientMargin {
        symbol: String,
        required: f64,
        available: f64,
    },

    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    #[error("close failed for position {position_id}: {detail}")]
    CloseFailed { position_id: String, detail: String },

    #[error("sized position for {symbol} ({size}) is below the exchange minimum ({min_size})")]
    SizeBelowMinimum {
        symbol: String,
        size: f64,
        min_size: f64,
    },

    #[error("daily loss limit exceeded: {realized_pct:.2}% against a {limit_pct:.2}% cap")]
    DailyLossExceeded { realized_pct: f64, limit_pct: f64 },

    #[error("circuit breaker open: {reason}")]
    CircuitBreakerOpen { reason: String },

    #[error("max concurrent positions reached: {open}/{max}")]
    MaxConcurrentReached { open: u32, max: u32 },
}

impl EngineError {
    /// Whether retrying the same operation shortly afterwards is reasonable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExchangeRateLimited { .. } | Self::ExchangeTransient { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable() {
        let e = EngineError::ExchangeRateLimited { retry_after_ms: 500 };
        assert!(e.is_retryable());
    }

    #[test]
    fn invariant_violation_not_retryable() {
        let e = EngineError::InvariantViolated("position already closing".into());
        assert!(!e.is_retryable());
    }

    #[test]
    fn display_includes_symbol() {
        let e = EngineError::PriceUnavailable { symbol: "BTC-USDT-SWAP".into() };
        assert!(e.to_string().contains("BTC-USDT-SWAP"));
    }
}
