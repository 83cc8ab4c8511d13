// =============================================================================
// Filter Stack — layered pre-trade gating
// =============================================================================
//
// A candidate entry passes through four filter categories in order:
//
//   1. Pre    — cheap, regime-agnostic guards (kill switch, position caps,
//               duplicate symbol, spread). Any hard reject here stops the
//               pipeline before spending a single indicator cycle.
//   2. Trend  — higher-timeframe directional agreement. Trending regimes
//               hard-reject against the HTF trend; ranging/choppy regimes
//               only attenuate, since counter-trend mean reversion is the
//               point in those regimes.
//   3. Entry  — signal-quality gates (score momentum, adaptive threshold).
//   4. Market — microstructure/derivatives context (order flow imbalance,
//               structural breaks, absorption, funding rate).
//
// A hard reject from any filter stops evaluation immediately. Otherwise the
// attenuation factors from every filter multiply together into a single
// confidence multiplier applied to the candidate's score.

pub mod entry;
pub mod market;
pub mod pre;
pub mod trend;

use crate::types::{Regime, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCategory {
    Pre,
    Trend,
    Entry,
    Market,
}

/// Outcome of a single filter evaluation.
#[derive(Debug, Clone)]
pub enum FilterOutcome {
    Pass,
    HardReject(String),
    Attenuate { factor: f64, reason: String },
}

impl FilterOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterOutcome::Pass)
    }
}

/// Everything a filter needs to make its decision. Built fresh per candidate
/// evaluation by the signal pipeline.
pub struct FilterContext<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub regime: Regime,
    pub score: f64,
    pub spread_bps: f64,
    pub htf_direction: Option<Side>,
    pub htf_confidence: f64,
    pub buy_volume_ratio: f64,
    pub cusum_bullish_break: bool,
    pub cusum_bearish_break: bool,
    pub absorption_direction: Option<Side>,
    pub absorption_strength: f64,
    pub funding_signal: f64,
    pub symbol_has_live_position: bool,
    pub open_position_count: usize,
    pub max_concurrent_positions: usize,
    pub trading_enabled: bool,
}

pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> FilterCategory;
    fn evaluate(&self, ctx: &FilterContext) -> FilterOutcome;
}

/// Result of running a candidate through the whole stack.
#[derive(Debug, Clone)]
pub struct FilterStackResult {
    pub passed: bool,
    pub reject_reason: Option<String>,
    pub reject_filter: Option<&'static str>,
    pub attenuation: f64,
    pub attenuation_notes: Vec<String>,
}

pub struct FilterStack {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterStack {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self { filters }
    }

    /// Default stack wiring pre -> trend -> entry -> market, in that order,
    /// each category's filters evaluated in declaration order.
    pub fn default_stack(config: &crate::runtime_config::FilterConfig) -> Self {
        let mut filters: Vec<Box<dyn Filter>> = Vec::new();

        filters.push(Box::new(pre::KillSwitchFilter));
        filters.push(Box::new(pre::MaxPositionsFilter));
        filters.push(Box::new(pre::DuplicateSymbolFilter));
        filters.push(Box::new(pre::SpreadFilter { max_spread_bps: config.max_spread_bps }));

        if config.enable_htf_gate {
            filters.push(Box::new(trend::HtfGateFilter));
        }

        if config.enable_score_momentum {
            filters.push(Box::new(entry::ScoreMomentumFilter));
        }

        if config.enable_ofip {
            filters.push(Box::new(market::OfipFilter));
        }
        if config.enable_cusum {
            filters.push(Box::new(market::CusumConflictFilter));
        }
        if config.enable_absorption {
            filters.push(Box::new(market::AbsorptionFilter));
        }
        if config.enable_funding_rate_filter {
            filters.push(Box::new(market::FundingRateFilter));
        }

        Self::new(filters)
    }

    pub fn run(&self, ctx: &FilterContext) -> FilterStackResult {
        let mut attenuation = 1.0_f64;
        let mut notes = Vec::new();

        for filter in &self.filters {
            match filter.evaluate(ctx) {
                FilterOutcome::Pass => {}
                FilterOutcome::HardReject(reason) => {
                    return FilterStackResult {
                        passed: false,
                        reject_reason: Some(reason),
                        reject_filter: Some(filter.name()),
                        attenuation,
                        attenuation_notes: notes,
                    };
                }
                FilterOutcome::Attenuate { factor, reason } => {
                    attenuation *= factor;
                    notes.push(format!("{}: {} (x{:.2})", filter.name(), reason, factor));
                }
            }
        }

        FilterStackResult {
            passed: true,
            reject_reason: None,
            reject_filter: None,
            attenuation,
            attenuation_notes: notes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    struct AlwaysPass;
    impl Filter for AlwaysPass {
        fn name(&self) -> &'static str { "always_pass" }
        fn category(&self) -> FilterCategory { FilterCategory::Pre }
        fn evaluate(&self, _ctx: &FilterContext) -> FilterOutcome { FilterOutcome::Pass }
    }

    struct AlwaysAttenuate;
    impl Filter for AlwaysAttenuate {
        fn name(&self) -> &'static str { "always_attenuate" }
        fn category(&self) -> FilterCategory { FilterCategory::Market }
        fn evaluate(&self, _ctx: &FilterContext) -> FilterOutcome {
            FilterOutcome::Attenuate { factor: 0.5, reason: "test".to_string() }
        }
    }

    struct AlwaysReject;
    impl Filter for AlwaysReject {
        fn name(&self) -> &'static str { "always_reject" }
        fn category(&self) -> FilterCategory { FilterCategory::Pre }
        fn evaluate(&self, _ctx: &FilterContext) -> FilterOutcome {
            FilterOutcome::HardReject("nope".to_string())
        }
    }

    #[test]
    fn passes_when_all_filters_pass() {
        let stack = FilterStack::new(vec![Box::new(AlwaysPass)]);
        let result = stack.run(&ctx());
        assert!(result.passed);
        assert!((result.attenuation - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn stops_at_first_hard_reject() {
        let stack = FilterStack::new(vec![Box::new(AlwaysAttenuate), Box::new(AlwaysReject), Box::new(AlwaysAttenuate)]);
        let result = stack.run(&ctx());
        assert!(!result.passed);
        assert_eq!(result.reject_filter, Some("always_reject"));
        // attenuation from the filter that ran before the reject is still recorded
        assert!((result.attenuation - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn attenuations_compound_multiplicatively() {
        let stack = FilterStack::new(vec![Box::new(AlwaysAttenuate), Box::new(AlwaysAttenuate)]);
        let result = stack.run(&ctx());
        assert!(result.passed);
        assert!((result.attenuation - 0.25).abs() < f64::EPSILON);
        assert_eq!(result.attenuation_notes.len(), 2);
    }
}
