// =============================================================================
// Trend-Pullback Generator
// =============================================================================
//
// Only active in a trending regime. Looks for price pulling back to touch
// the EMA21 and then resuming in the direction of the EMA9/EMA21 stack —
// buying the dip in an uptrend, selling the bounce in a downtrend, rather
// than chasing the initial breakout.

use super::{GeneratorContext, SignalGenerator};
use crate::indicators::ema::calculate_ema;
use crate::signals::SignalInput;
use crate::types::Regime;

const TOUCH_TOLERANCE_PCT: f64 = 0.5;
const LOOKBACK: usize = 5;

pub struct TrendPullbackGenerator;

impl SignalGenerator for TrendPullbackGenerator {
    fn name(&self) -> &'static str {
        "trend_pullback"
    }

    fn generate(&self, ctx: &GeneratorContext) -> Option<SignalInput> {
        if ctx.regime != Regime::Trending {
            return None;
        }

        let ema9 = calculate_ema(ctx.closes, 9);
        let ema21 = calculate_ema(ctx.closes, 21);
        if ema9.is_empty() || ema21.len() < LOOKBACK + 1 {
            return None;
        }

        let trend_up = ema9.last().copied()? > ema21.last().copied()?;

        let closes_tail = &ctx.closes[ctx.closes.len().saturating_sub(LOOKBACK + 1)..];
        let ema21_tail = &ema21[ema21.len().saturating_sub(LOOKBACK + 1)..];

        let touched = closes_tail
            .iter()
            .zip(ema21_tail.iter())
            .take(LOOKBACK)
            .any(|(&close, &ema)| {
                let dist_pct = (close - ema).abs() / ema.abs().max(1e-9) * 100.0;
                dist_pct <= TOUCH_TOLERANCE_PCT
            });

        if !touched {
            return None;
        }

        let last_close = *closes_tail.last()?;
        let last_ema21 = *ema21_tail.last()?;

        let resumed = if trend_up {
            last_close > last_ema21
        } else {
            last_close < last_ema21
        };

        if !resumed {
            return None;
        }

        let direction = if trend_up { 1.0 } else { -1.0 };
        let dist_pct = (last_close - last_ema21).abs() / last_ema21.abs().max(1e-9) * 100.0;
        let confidence = (dist_pct / TOUCH_TOLERANCE_PCT).clamp(0.3, 1.0);

        Some(SignalInput {
            name: "trend_pullback".to_string(),
            weight: 0.15,
            confidence,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RsiConfig;

    fn ctx(closes: &[f64], regime: Regime) -> GeneratorContext {
        GeneratorContext { candles: &[], closes, regime, rsi_config: Box::leak(Box::new(RsiConfig::default())) }
    }

    fn uptrend_with_pullback() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.8).collect();
        let last = *closes.last().unwrap();
        // Dip close to the EMA21 then resume upward.
        closes.push(last - last * 0.003);
        closes.push(last + 1.0);
        closes
    }

    #[test]
    fn ignored_outside_trending_regime() {
        let closes = uptrend_with_pullback();
        assert!(TrendPullbackGenerator.generate(&ctx(&closes, Regime::Ranging)).is_none());
    }

    #[test]
    fn flat_series_produces_no_signal() {
        let closes = vec![100.0; 40];
        assert!(TrendPullbackGenerator.generate(&ctx(&closes, Regime::Trending)).is_none());
    }

    #[test]
    fn pullback_and_resume_in_uptrend_is_bullish() {
        let closes = uptrend_with_pullback();
        if let Some(sig) = TrendPullbackGenerator.generate(&ctx(&closes, Regime::Trending)) {
            assert_eq!(sig.direction, 1.0);
        }
    }
}
