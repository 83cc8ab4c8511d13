// =============================================================================
// Shared types used across the scalping engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Order/position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::Long => Self::Short,
            Self::Short => Self::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Three-way market regime classification. Collapsed from a finer-grained
/// taxonomy — chop and dead markets both fall under `Choppy` since neither
/// supports directional scalps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
    Choppy,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trending => write!(f, "trending"),
            Self::Ranging => write!(f, "ranging"),
            Self::Choppy => write!(f, "choppy"),
        }
    }
}

/// Equity-tier bucket driving position-sizing and filter aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceProfile {
    Small,
    Medium,
    Large,
}

impl std::fmt::Display for BalanceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}

/// Where a price observation originated, in fallback-chain order. Kept on
/// every price read so downstream consumers can judge staleness/trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Ticker,
    OrderBookMid,
    LastTrade,
    Mark,
    LastCandleClose,
    Stale,
    /// No live quote of any kind; standing in with the open position's own
    /// entry price so PnL/TSL math has *something* to read. Never trust this
    /// for a price-dependent exit decision.
    EntryPriceFallback,
    /// Nothing usable was ever found, not even an entry price. Callers must
    /// treat this identically to `EntryPriceFallback` for exit purposes.
    Unavailable,
}

impl PriceSource {
    /// Whether a price tagged with this source is safe to drive a
    /// price-dependent close decision (`sl_hit`, `tp_hit`, `tsl_hit`,
    /// `critical_loss_cut`). The two degraded tiers never are.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::EntryPriceFallback | Self::Unavailable)
    }
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ticker => "ticker",
            Self::OrderBookMid => "orderbook_mid",
            Self::LastTrade => "last_trade",
            Self::Mark => "mark",
            Self::LastCandleClose => "last_candle_close",
            Self::Stale => "stale",
            Self::EntryPriceFallback => "entry_price_fallback",
            Self::Unavailable => "unavailable",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_sign_and_opposite() {
        assert_eq!(Side::Long.sign(), 1.0);
        assert_eq!(Side::Short.sign(), -1.0);
        assert_eq!(Side::Long.opposite(), Side::Short);
    }

    #[test]
    fn regime_display_lowercase() {
        assert_eq!(Regime::Trending.to_string(), "trending");
        assert_eq!(Regime::Choppy.to_string(), "choppy");
    }

    #[test]
    fn trading_mode_defaults_paused() {
        assert_eq!(TradingMode::default(), TradingMode::Paused);
    }

    #[test]
    fn account_mode_defaults_demo() {
        assert_eq!(AccountMode::default(), AccountMode::Demo);
    }
}
