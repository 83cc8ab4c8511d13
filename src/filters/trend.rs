// =============================================================================
// Trend-category filters — higher-timeframe directional agreement
// =============================================================================

use super::{Filter, FilterCategory, FilterContext, FilterOutcome};
use crate::types::Regime;

/// Checks the candidate's side against the 15M/1H EMA-stack trend direction.
///
/// In a trending regime, counter-trend entries are hard-rejected — there is
/// no edge fading a confirmed trend. In ranging or choppy regimes the trend
/// is noise rather than signal, so disagreement only attenuates confidence
/// instead of blocking outright.
pub struct HtfGateFilter;

impl Filter for HtfGateFilter {
    fn name(&self) -> &'static str {
        "htf_gate"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Trend
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        let Some(htf_dir) = ctx.htf_direction else {
            return FilterOutcome::Attenuate {
                factor: 0.8,
                reason: "HTF direction unavailable".to_string(),
            };
        };

        if htf_dir == ctx.side {
            return FilterOutcome::Pass;
        }

        match ctx.regime {
            Regime::Trending => FilterOutcome::HardReject(format!(
                "{} against {:?} HTF trend while trending",
                ctx.side, htf_dir
            )),
            Regime::Ranging | Regime::Choppy => {
                let factor = (1.0 - ctx.htf_confidence * 0.5).clamp(0.3, 1.0);
                FilterOutcome::Attenuate {
                    factor,
                    reason: format!("counter-trend in {} regime", ctx.regime),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

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
    fn agreeing_direction_passes() {
        assert!(HtfGateFilter.evaluate(&ctx()).is_pass());
    }

    #[test]
    fn trending_regime_hard_rejects_counter_trend() {
        let mut c = ctx();
        c.side = Side::Short;
        let outcome = HtfGateFilter.evaluate(&c);
        assert!(matches!(outcome, FilterOutcome::HardReject(_)));
    }

    #[test]
    fn ranging_regime_attenuates_counter_trend() {
        let mut c = ctx();
        c.side = Side::Short;
        c.regime = Regime::Ranging;
        match HtfGateFilter.evaluate(&c) {
            FilterOutcome::Attenuate { factor, .. } => assert!(factor < 1.0 && factor > 0.0),
            other => panic!("expected attenuation, got {other:?}"),
        }
    }

    #[test]
    fn missing_htf_direction_attenuates_mildly() {
        let mut c = ctx();
        c.htf_direction = None;
        match HtfGateFilter.evaluate(&c) {
            FilterOutcome::Attenuate { factor, .. } => assert!((factor - 0.8).abs() < f64::EPSILON),
            other => panic!("expected attenuation, got {other:?}"),
        }
    }
}
