// =============================================================================
// Moving-Average Crossover Generator
// =============================================================================
//
// Fires when the fast/mid/slow EMA stack (9/21/55) flips from bearish to
// bullish order or vice versa on the latest bar — a fresh trend-start signal
// distinct from the steady-state trend-alignment check used elsewhere.

use super::{GeneratorContext, SignalGenerator};
use crate::indicators::ema::calculate_ema;
use crate::signals::SignalInput;

pub struct MaCrossGenerator;

fn stack_order(e9: f64, e21: f64, e55: f64) -> i8 {
    if e9 > e21 && e21 > e55 {
        1
    } else if e9 < e21 && e21 < e55 {
        -1
    } else {
        0
    }
}

impl SignalGenerator for MaCrossGenerator {
    fn name(&self) -> &'static str {
        "ma_cross"
    }

    fn generate(&self, ctx: &GeneratorContext) -> Option<SignalInput> {
        let ema9 = calculate_ema(ctx.closes, 9);
        let ema21 = calculate_ema(ctx.closes, 21);
        let ema55 = calculate_ema(ctx.closes, 55);

        if ema9.len() < 2 || ema21.len() < 2 || ema55.len() < 2 {
            return None;
        }

        let n9 = ema9.len();
        let n21 = ema21.len();
        let n55 = ema55.len();

        let curr = stack_order(ema9[n9 - 1], ema21[n21 - 1], ema55[n55 - 1]);
        let prev = stack_order(ema9[n9 - 2], ema21[n21 - 2], ema55[n55 - 2]);

        if curr == 0 || curr == prev {
            return None;
        }

        let direction = curr as f64;
        let spread = (ema9[n9 - 1] - ema55[n55 - 1]).abs() / ema55[n55 - 1].abs().max(1e-9);
        let confidence = (spread * 20.0).clamp(0.3, 1.0);

        Some(SignalInput {
            name: "ema_trend".to_string(),
            weight: 0.20,
            confidence,
            direction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime_config::RsiConfig;
    use crate::types::Regime;

    fn ctx(closes: &[f64]) -> GeneratorContext {
        GeneratorContext { candles: &[], closes, regime: Regime::Trending, rsi_config: Box::leak(Box::new(RsiConfig::default())) }
    }

    #[test]
    fn insufficient_data_returns_none() {
        let closes = vec![100.0; 10];
        assert!(MaCrossGenerator.generate(&ctx(&closes)).is_none());
    }

    #[test]
    fn fresh_uptrend_eventually_fires_bullish() {
        let mut closes = vec![100.0; 60];
        closes.extend((0..30).map(|i| 100.0 + i as f64 * 2.0));
        let mut found = false;
        for end in 61..closes.len() {
            if let Some(sig) = MaCrossGenerator.generate(&ctx(&closes[..end])) {
                assert_eq!(sig.direction, 1.0);
                found = true;
                break;
            }
        }
        assert!(found, "expected a bullish stack flip somewhere in the uptrend");
    }

    #[test]
    fn stack_order_classifies_correctly() {
        assert_eq!(stack_order(3.0, 2.0, 1.0), 1);
        assert_eq!(stack_order(1.0, 2.0, 3.0), -1);
        assert_eq!(stack_order(2.0, 3.0, 1.0), 0);
    }
}
