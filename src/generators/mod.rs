// =============================================================================
// Signal Generators — independent candidate-direction producers
// =============================================================================
//
// Each generator inspects one slice of market structure (RSI extremes, MACD
// momentum, moving-average stacking, trend pullbacks) and emits at most one
// `SignalInput` per evaluation. The signal pipeline fans out to every
// registered generator, collects whatever they produce, and hands the set to
// the weighted scorer. A generator that sees nothing actionable returns
// `None` rather than a neutral zero-confidence signal, so the scorer's
// regime-weight lookup isn't diluted by entries nobody actually wants to
// count.

pub mod ma_cross;
pub mod macd_cross;
pub mod rsi_adaptive;
pub mod trend_pullback;

use crate::market_data::Candle;
use crate::runtime_config::RsiConfig;
use crate::signals::SignalInput;
use crate::types::Regime;

/// Everything a generator needs: closed 5M candles plus the detected regime,
/// since several generators change behavior depending on whether the market
/// is trending, ranging, or choppy.
pub struct GeneratorContext<'a> {
    pub candles: &'a [Candle],
    pub closes: &'a [f64],
    pub regime: Regime,
    pub rsi_config: &'a RsiConfig,
}

pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn generate(&self, ctx: &GeneratorContext) -> Option<SignalInput>;
}

/// Runs every registered generator against the same context and collects
/// whatever signals they produce.
pub struct GeneratorSet {
    generators: Vec<Box<dyn SignalGenerator>>,
}

impl GeneratorSet {
    pub fn new(generators: Vec<Box<dyn SignalGenerator>>) -> Self {
        Self { generators }
    }

    pub fn default_set() -> Self {
        Self::new(vec![
            Box::new(rsi_adaptive::RsiAdaptiveGenerator),
            Box::new(macd_cross::MacdCrossGenerator),
            Box::new(ma_cross::MaCrossGenerator),
            Box::new(trend_pullback::TrendPullbackGenerator),
        ])
    }

    pub fn generate_all(&self, ctx: &GeneratorContext) -> Vec<SignalInput> {
        self.generators
            .iter()
            .filter_map(|g| g.generate(ctx))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysNone;
    impl SignalGenerator for AlwaysNone {
        fn name(&self) -> &'static str {
            "always_none"
        }
        fn generate(&self, _ctx: &GeneratorContext) -> Option<SignalInput> {
            None
        }
    }

    struct AlwaysSome;
    impl SignalGenerator for AlwaysSome {
        fn name(&self) -> &'static str {
            "always_some"
        }
        fn generate(&self, _ctx: &GeneratorContext) -> Option<SignalInput> {
            Some(SignalInput {
                name: "always_some".to_string(),
                weight: 0.1,
                confidence: 1.0,
                direction: 1.0,
            })
        }
    }

    #[test]
    fn collects_only_produced_signals() {
        let set = GeneratorSet::new(vec![Box::new(AlwaysNone), Box::new(AlwaysSome)]);
        let candles: Vec<Candle> = Vec::new();
        let closes: Vec<f64> = Vec::new();
        let rsi_config = RsiConfig::default();
        let ctx = GeneratorContext {
            candles: &candles,
            closes: &closes,
            regime: Regime::Trending,
            rsi_config: &rsi_config,
        };
        let signals = set.generate_all(&ctx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "always_some");
    }
}
