// =============================================================================
// Pre-category filters — cheap regime-agnostic guards, evaluated first
// =============================================================================

use super::{Filter, FilterCategory, FilterContext, FilterOutcome};

/// Blocks all new entries when trading has been disabled (kill switch,
/// paused state, or anything else upstream folds into `trading_enabled`).
pub struct KillSwitchFilter;

impl Filter for KillSwitchFilter {
    fn name(&self) -> &'static str {
        "kill_switch"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Pre
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        if ctx.trading_enabled {
            FilterOutcome::Pass
        } else {
            FilterOutcome::HardReject("trading disabled".to_string())
        }
    }
}

/// Blocks new entries once the account is at its concurrent-position ceiling.
pub struct MaxPositionsFilter;

impl Filter for MaxPositionsFilter {
    fn name(&self) -> &'static str {
        "max_positions"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Pre
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        if ctx.open_position_count >= ctx.max_concurrent_positions {
            FilterOutcome::HardReject(format!(
                "at max concurrent positions ({}/{})",
                ctx.open_position_count, ctx.max_concurrent_positions
            ))
        } else {
            FilterOutcome::Pass
        }
    }
}

/// Blocks a second entry on a symbol that already has a live position.
pub struct DuplicateSymbolFilter;

impl Filter for DuplicateSymbolFilter {
    fn name(&self) -> &'static str {
        "duplicate_symbol"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Pre
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        if ctx.symbol_has_live_position {
            FilterOutcome::HardReject(format!("{} already has a live position", ctx.symbol))
        } else {
            FilterOutcome::Pass
        }
    }
}

/// Blocks entries when the quoted spread is too wide to trade profitably.
pub struct SpreadFilter {
    pub max_spread_bps: f64,
}

impl Filter for SpreadFilter {
    fn name(&self) -> &'static str {
        "spread"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Pre
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        if ctx.spread_bps > self.max_spread_bps {
            FilterOutcome::HardReject(format!(
                "spread {:.2}bps exceeds max {:.2}bps",
                ctx.spread_bps, self.max_spread_bps
            ))
        } else {
            FilterOutcome::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Regime, Side};

    fn ctx() -> FilterContext<'static> {
        FilterContext {
            symbol: "BTC-USDT-SWAP",
            side: Side::Long,
            regime: Regime::Trending,
            score: 0.5,
            spread_bps: 2.0,
            htf_direction: Some(Side::Long),
            htf_confidence: 0.8,
            buy_volume_ratio: 0.6,
            cusum_bullish_break: false,
            cusum_bearish_break: false,
            absorption_direction: None,
            absorption_strength: 0.0,
            funding_signal: 0.0,
            symbol_has_live_position: false,
            open_position_count: 1,
            max_concurrent_positions: 5,
            trading_enabled: true,
        }
    }

    #[test]
    fn kill_switch_blocks_when_disabled() {
        let mut c = ctx();
        c.trading_enabled = false;
        assert!(!KillSwitchFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn max_positions_blocks_at_ceiling() {
        let mut c = ctx();
        c.open_position_count = 5;
        c.max_concurrent_positions = 5;
        assert!(!MaxPositionsFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn duplicate_symbol_blocks_live_symbol() {
        let mut c = ctx();
        c.symbol_has_live_position = true;
        assert!(!DuplicateSymbolFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn spread_filter_blocks_wide_spread() {
        let mut c = ctx();
        c.spread_bps = 20.0;
        let f = SpreadFilter { max_spread_bps: 15.0 };
        assert!(!f.evaluate(&c).is_pass());
    }

    #[test]
    fn spread_filter_passes_tight_spread() {
        let c = ctx();
        let f = SpreadFilter { max_spread_bps: 15.0 };
        assert!(f.evaluate(&c).is_pass());
    }
}
