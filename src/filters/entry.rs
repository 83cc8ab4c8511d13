// =============================================================================
// Entry-category filters — signal-quality gates
// =============================================================================

use super::{Filter, FilterCategory, FilterContext, FilterOutcome};
use crate::types::Regime;

/// Minimum composite score required to enter, keyed by regime. Trending
/// markets tolerate a lower bar since the HTF gate already confirms
/// direction; choppy markets demand a much stronger signal since most
/// setups there are noise.
pub fn adaptive_threshold(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 0.10,
        Regime::Ranging => 0.18,
        Regime::Choppy => 0.28,
    }
}

/// Hard-rejects candidates whose composite score does not clear the
/// regime-adaptive minimum.
pub struct ScoreMomentumFilter;

impl Filter for ScoreMomentumFilter {
    fn name(&self) -> &'static str {
        "score_momentum"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Entry
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        let threshold = adaptive_threshold(ctx.regime);
        if ctx.score.abs() < threshold {
            FilterOutcome::HardReject(format!(
                "score {:.3} below {} threshold {:.3}",
                ctx.score, ctx.regime, threshold
            ))
        } else {
            FilterOutcome::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    fn ctx_with(score: f64, regime: Regime) -> FilterContext<'static> {
        FilterContext {
            symbol: "BTC-USDT-SWAP",
            side: Side::Long,
            regime,
            score,
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
    fn trending_threshold_is_lowest() {
        assert!(adaptive_threshold(Regime::Trending) < adaptive_threshold(Regime::Ranging));
        assert!(adaptive_threshold(Regime::Ranging) < adaptive_threshold(Regime::Choppy));
    }

    #[test]
    fn rejects_below_threshold() {
        let c = ctx_with(0.05, Regime::Trending);
        assert!(!ScoreMomentumFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn passes_above_threshold() {
        let c = ctx_with(0.15, Regime::Trending);
        assert!(ScoreMomentumFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn negative_score_uses_magnitude() {
        let c = ctx_with(-0.2, Regime::Ranging);
        assert!(ScoreMomentumFilter.evaluate(&c).is_pass());
    }
}
