// =============================================================================
// Market-category filters — microstructure and derivatives context
// =============================================================================

use super::{Filter, FilterCategory, FilterContext, FilterOutcome};
use crate::types::Side;

/// Order Flow Imbalance Proxy — uses the recent taker buy/sell volume ratio
/// from the trade stream to confirm the candidate's direction. A long into
/// heavy sell-side flow (or vice versa) gets attenuated rather than blocked,
/// since the trade tape lags price action.
pub struct OfipFilter;

impl Filter for OfipFilter {
    fn name(&self) -> &'static str {
        "ofip"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Market
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        let ratio = ctx.buy_volume_ratio;
        let agrees = match ctx.side {
            Side::Long => ratio >= 0.5,
            Side::Short => ratio <= 0.5,
        };
        if agrees {
            FilterOutcome::Pass
        } else {
            let imbalance = (ratio - 0.5).abs();
            let factor = (1.0 - imbalance).clamp(0.4, 1.0);
            FilterOutcome::Attenuate {
                factor,
                reason: format!("taker flow disagrees (buy_ratio={:.2})", ratio),
            }
        }
    }
}

/// Soft-blocks when a CUSUM structural break disagrees with the candidate's
/// direction — the break may be the start of a reversal this candidate
/// hasn't priced in yet.
pub struct CusumConflictFilter;

impl Filter for CusumConflictFilter {
    fn name(&self) -> &'static str {
        "cusum_conflict"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Market
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        let conflict = match ctx.side {
            Side::Long => ctx.cusum_bearish_break,
            Side::Short => ctx.cusum_bullish_break,
        };
        if conflict {
            FilterOutcome::Attenuate {
                factor: 0.5,
                reason: "structural break opposes entry direction".to_string(),
            }
        } else {
            FilterOutcome::Pass
        }
    }
}

/// Boosts confidence when an institutional absorption pattern confirms the
/// candidate's direction. Absorption in the opposite direction attenuates.
pub struct AbsorptionFilter;

impl Filter for AbsorptionFilter {
    fn name(&self) -> &'static str {
        "absorption"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Market
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        match ctx.absorption_direction {
            None => FilterOutcome::Pass,
            Some(dir) if dir == ctx.side => FilterOutcome::Pass,
            Some(_) => {
                let factor = (1.0 - ctx.absorption_strength * 0.5).clamp(0.5, 1.0);
                FilterOutcome::Attenuate {
                    factor,
                    reason: "absorption pattern opposes entry direction".to_string(),
                }
            }
        }
    }
}

/// Contrarian funding-rate filter. An extreme positive funding rate signals
/// crowded longs (bearish lean); extreme negative signals crowded shorts
/// (bullish lean). Trading with the crowd at an extreme gets attenuated.
pub struct FundingRateFilter;

impl Filter for FundingRateFilter {
    fn name(&self) -> &'static str {
        "funding_rate"
    }
    fn category(&self) -> FilterCategory {
        FilterCategory::Market
    }
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome {
        let signal = ctx.funding_signal;
        let with_crowd = match ctx.side {
            Side::Long => signal < -0.3,
            Side::Short => signal > 0.3,
        };
        if with_crowd {
            FilterOutcome::Attenuate {
                factor: 0.7,
                reason: format!("entering with crowded funding (signal={:.2})", signal),
            }
        } else {
            FilterOutcome::Pass
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Regime;

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
    fn ofip_passes_on_agreement() {
        assert!(OfipFilter.evaluate(&ctx()).is_pass());
    }

    #[test]
    fn ofip_attenuates_on_disagreement() {
        let mut c = ctx();
        c.buy_volume_ratio = 0.2;
        assert!(!OfipFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn cusum_conflict_attenuates_opposing_break() {
        let mut c = ctx();
        c.cusum_bearish_break = true;
        match CusumConflictFilter.evaluate(&c) {
            FilterOutcome::Attenuate { factor, .. } => assert!((factor - 0.5).abs() < f64::EPSILON),
            other => panic!("expected attenuation, got {other:?}"),
        }
    }

    #[test]
    fn absorption_passes_when_confirming() {
        let mut c = ctx();
        c.absorption_direction = Some(Side::Long);
        assert!(AbsorptionFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn absorption_attenuates_when_opposing() {
        let mut c = ctx();
        c.absorption_direction = Some(Side::Short);
        c.absorption_strength = 0.8;
        assert!(!AbsorptionFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn funding_rate_attenuates_long_into_crowded_shorts() {
        let mut c = ctx();
        c.funding_signal = -0.5;
        assert!(!FundingRateFilter.evaluate(&c).is_pass());
    }

    #[test]
    fn funding_rate_passes_neutral() {
        assert!(FundingRateFilter.evaluate(&ctx()).is_pass());
    }
}
