// =============================================================================
// Signal Pipeline — per-symbol evaluation entry point
// =============================================================================
//
// Ties the generator set, regime-aware scorer and filter stack together into
// a single call: feed in indicator context plus a filter context and get back
// an auditable [`DecisionEnvelope`] and, if everything passed, a
// [`TradeProposal`] ready for position sizing and execution.
//
// Position sizing is deliberately NOT done here — the risk engine owns that
// decision and needs account state this module has no business touching.

use tracing::{debug, info};

use crate::decision_envelope::DecisionEnvelope;
use crate::filters::{FilterContext, FilterStack};
use crate::generators::{GeneratorContext, GeneratorSet};
use crate::runtime_config::{FilterConfig, StrategyParams};
use crate::signals::WeightedScorer;
use crate::types::Side;

/// A scored, filter-passed trade candidate ready for sizing and execution.
#[derive(Debug, Clone)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub raw_score: f64,
    pub attenuated_score: f64,
    pub regime: String,
}

pub struct SignalPipeline {
    generators: GeneratorSet,
    filters: FilterStack,
}

impl SignalPipeline {
    pub fn new(generators: GeneratorSet, filters: FilterStack) -> Self {
        Self { generators, filters }
    }

    pub fn default_pipeline(filter_config: &FilterConfig) -> Self {
        Self::new(GeneratorSet::default_set(), FilterStack::default_stack(filter_config))
    }

    /// Run the full generate -> score -> filter -> size-inputs pipeline for one
    /// symbol and return its decision envelope plus an optional proposal.
    ///
    /// `filter_ctx.side` and `filter_ctx.score` are overwritten internally once
    /// the scorer has produced a decision -- callers only need to populate the
    /// market-structure fields (spread, htf, cusum, absorption, funding,
    /// position counts).
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        &self,
        scorer: &WeightedScorer,
        gen_ctx: &GeneratorContext,
        mut filter_ctx: FilterContext,
        current_price: f64,
        atr: f64,
        params: &StrategyParams,
        strategy_name: &str,
    ) -> (DecisionEnvelope, Option<TradeProposal>) {
        let symbol = filter_ctx.symbol.to_string();
        let regime_label = gen_ctx.regime.to_string();

        let signals = self.generators.generate_all(gen_ctx);
        if signals.is_empty() {
            return (
                DecisionEnvelope::blocked(&symbol, "HOLD", strategy_name, "Signal", "no generator produced a signal"),
                None,
            );
        }

        let scoring = scorer.score(&signals, &regime_label);
        debug!(symbol = %symbol, score = scoring.total_score, decision = %scoring.decision, regime = %regime_label, "signal pipeline scored");

        if scoring.decision == "HOLD" {
            return (
                DecisionEnvelope::blocked(
                    &symbol,
                    "HOLD",
                    strategy_name,
                    "Strategy",
                    format!("score {:.3} below threshold (regime: {regime_label})", scoring.total_score),
                ),
                None,
            );
        }

        let side = if scoring.decision == "BUY" { Side::Long } else { Side::Short };
        filter_ctx.side = side;
        filter_ctx.score = scoring.total_score;
        filter_ctx.regime = gen_ctx.regime;

        let filter_result = self.filters.run(&filter_ctx);
        if !filter_result.passed {
            let reason = filter_result.reject_reason.unwrap_or_else(|| "rejected".to_string());
            let layer = filter_result.reject_filter.unwrap_or("filter");
            return (
                DecisionEnvelope::blocked(&symbol, scoring.decision.clone(), strategy_name, layer, reason),
                None,
            );
        }

        let attenuated_score = scoring.total_score * filter_result.attenuation;

        if atr <= 0.0 || current_price <= 0.0 {
            return (
                DecisionEnvelope::blocked(&symbol, scoring.decision.clone(), strategy_name, "DataQuality", "invalid price or ATR"),
                None,
            );
        }

        let sl_dist = (atr * params.sl_atr_multiplier).max(current_price * (params.min_sl_pct / 100.0));
        let tp1_dist = (atr * params.tp1_atr_multiplier).max(current_price * (params.min_tp1_pct / 100.0));
        let tp2_dist = (atr * params.tp2_atr_multiplier).max(current_price * (params.min_tp2_pct / 100.0));

        let (stop_loss, take_profit_1, take_profit_2) = match side {
            Side::Long => (current_price - sl_dist, current_price + tp1_dist, current_price + tp2_dist),
            Side::Short => (current_price + sl_dist, current_price - tp1_dist, current_price - tp2_dist),
        };

        let proposal = TradeProposal {
            symbol: symbol.clone(),
            side,
            entry_price: current_price,
            stop_loss,
            take_profit_1,
            take_profit_2,
            raw_score: scoring.total_score,
            attenuated_score,
            regime: regime_label.clone(),
        };

        let mut envelope = DecisionEnvelope::allow(&symbol, side.to_string(), strategy_name);
        envelope.reason = Some(format!(
            "score {:.3} (attenuated {:.3}) | regime {} | atr {:.4} | sl {:.2} | tp1 {:.2} | tp2 {:.2}{}",
            scoring.total_score,
            attenuated_score,
            regime_label,
            atr,
            stop_loss,
            take_profit_1,
            take_profit_2,
            if filter_result.attenuation_notes.is_empty() {
                String::new()
            } else {
                format!(" | {}", filter_result.attenuation_notes.join(", "))
            }
        ));

        info!(
            symbol = %symbol,
            side = %side,
            score = scoring.total_score,
            attenuated_score,
            regime = %regime_label,
            "trade proposal generated"
        );

        (envelope, Some(proposal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FilterContext;
    use crate::market_data::Candle;
    use crate::runtime_config::{FilterConfig, RsiConfig, StrategyParams};
    use crate::types::Regime;

    fn blank_filter_ctx(symbol: &str) -> FilterContext<'static> {
        FilterContext {
            symbol: Box::leak(symbol.to_string().into_boxed_str()),
            side: Side::Long,
            regime: Regime::Ranging,
            score: 0.0,
            spread_bps: 1.0,
            htf_direction: None,
            htf_confidence: 0.0,
            buy_volume_ratio: 0.5,
            cusum_bullish_break: false,
            cusum_bearish_break: false,
            absorption_direction: None,
            absorption_strength: 0.0,
            funding_signal: 0.0,
            symbol_has_live_position: false,
            open_position_count: 0,
            max_concurrent_positions: 5,
            trading_enabled: true,
        }
    }

    fn falling_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 - i as f64 * 1.5).collect()
    }

    #[test]
    fn empty_signal_set_blocks_with_hold() {
        let pipeline = SignalPipeline::default_pipeline(&FilterConfig::default());
        let scorer = WeightedScorer::default();
        let rsi_config = RsiConfig::default();
        let closes = vec![100.0; 5];
        let gen_ctx = GeneratorContext { candles: &[], closes: &closes, regime: Regime::Ranging, rsi_config: &rsi_config };
        let (envelope, proposal) = pipeline.evaluate(
            &scorer,
            &gen_ctx,
            blank_filter_ctx("BTC-USDT-SWAP"),
            100.0,
            1.0,
            &StrategyParams::default(),
            "test",
        );
        assert_eq!(envelope.final_decision, "BLOCK");
        assert!(proposal.is_none());
    }

    #[test]
    fn oversold_reversal_produces_a_long_proposal() {
        let pipeline = SignalPipeline::default_pipeline(&FilterConfig::default());
        let scorer = WeightedScorer::new(0.05);
        let rsi_config = RsiConfig::default();
        let closes = falling_closes(40);
        let gen_ctx = GeneratorContext { candles: &[], closes: &closes, regime: Regime::Ranging, rsi_config: &rsi_config };
        let (_envelope, proposal) = pipeline.evaluate(
            &scorer,
            &gen_ctx,
            blank_filter_ctx("BTC-USDT-SWAP"),
            *closes.last().unwrap(),
            2.0,
            &StrategyParams::default(),
            "test",
        );
        if let Some(p) = proposal {
            assert_eq!(p.side, Side::Long);
            assert!(p.stop_loss < p.entry_price);
            assert!(p.take_profit_1 > p.entry_price);
        }
    }

    #[test]
    fn hard_reject_from_filter_blocks_despite_good_score() {
        let filters = FilterStack::new(vec![Box::new(crate::filters::pre::KillSwitchFilter)]);
        let pipeline = SignalPipeline::new(GeneratorSet::default_set(), filters);
        let scorer = WeightedScorer::new(0.05);
        let rsi_config = RsiConfig::default();
        let closes = falling_closes(40);
        let gen_ctx = GeneratorContext { candles: &[], closes: &closes, regime: Regime::Ranging, rsi_config: &rsi_config };
        let mut ctx = blank_filter_ctx("BTC-USDT-SWAP");
        ctx.trading_enabled = false;
        let (envelope, proposal) = pipeline.evaluate(
            &scorer,
            &gen_ctx,
            ctx,
            *closes.last().unwrap(),
            2.0,
            &StrategyParams::default(),
            "test",
        );
        assert_eq!(envelope.final_decision, "BLOCK");
        assert!(proposal.is_none());
    }

    fn _candle_unused() -> Candle {
        Candle::new(0, 1.0, 1.0, 1.0, 1.0, 1.0, 0)
    }
}
