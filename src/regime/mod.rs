// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Market regime classification collapses onto two quantitative indicators:
// - ADX (trend strength)
// - Bollinger Band Width (volatility expansion/contraction)
//
// into three states — Trending, Ranging, Choppy — confirmed only after a
// run of consecutive bars agrees, via `RegimeDetector`'s hysteresis counter.

pub mod detector;

pub use detector::{MarketRegime, RegimeDetector, RegimeState, RegimeThresholds};
