// =============================================================================
// Position Lifecycle Manager — priority-ordered exit decision tree
// =============================================================================
//
// One `LifecycleState` tracks one open position from entry to close. Each
// tick, `evaluate` walks a fixed priority order and returns the first exit
// condition that fires:
//
//   1. sl_hit             — price through the (possibly tightened) stop
//   2. critical_loss_cut  — unrealized loss past the emergency floor, once
//                           the position has had a few seconds to settle
//   3. timeout_loss       — time limit reached while underwater
//   4. tp_extended        — TP2 reached in a trending market with no
//                           reversal evidence; does NOT close, instead
//                           advances the trail and pushes the TP target out
//   5. tp_hit             — TP1 reached (or TP2 outside a trending regime)
//   6. ph_extreme/strong/normal — profit harvested in USD terms, gated by
//                           how fast and how far ahead of threshold it ran
//   7. profit_drawdown / loss_deterioration — giving back too much of a
//                           peak, or a position that's never been green and
//                           keeps sliding further from its least-bad mark
//   8. tsl_hit            — the phase-tightened trailing stop breached
//   9. smart_exit         — time limit reached without a loss
//
// Every check past #1 is dead weight unless the price backing it is trusted.
// A price tagged `entry_price_fallback` or `unavailable` means no live quote
// exists for the symbol right now, so `evaluate` refuses to touch any
// price-dependent state and returns `None` outright.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::balance_profile::ProfileParams;
use crate::types::{PriceSource, Regime, Side};

const MIN_SL_PCT: f64 = 0.4;
const MIN_TP1_PCT: f64 = 0.6;
const MIN_TP2_PCT: f64 = 1.0;
const BREAKEVEN_BUFFER_PCT: f64 = 0.05;
const TIGHTEN_START_FRACTION: f64 = 0.50;
const BREAKEVEN_LOCK_FRACTION: f64 = 0.75;
const PROFIT_LOCK_TRIGGER: f64 = 0.50;

/// Unrealized loss (% of entry) beyond which the position is cut regardless
/// of the nominal stop distance — covers gaps and slippage past the SL.
const CRITICAL_LOSS_PCT: f64 = 3.0;

/// Critical-loss-cut is withheld until the position has been open at least
/// this long, so a bad fill/print in the first tick or two doesn't trip the
/// emergency cut before the SL has even had a chance to be honored.
const CRITICAL_LOSS_GRACE_SECS: u64 = 5;

/// ATR multipliers per trailing-stop tightness tier (normal/strong/extreme
/// mirror the profit-harvest tiers, but drive trail distance, not a close).
const PH_NORMAL_ATR_MULT: f64 = 1.5;
const PH_STRONG_ATR_MULT: f64 = 1.0;
const PH_EXTREME_ATR_MULT: f64 = 0.5;
const PH_STRONG_START: f64 = 0.30;
const PH_EXTREME_START: f64 = 0.60;
const MIN_TRAIL_PCT: f64 = 0.20;

/// `tp_extended` pushes the TP2 target out by this fraction of the original
/// entry-to-TP2 distance each time it advances.
const TP_EXTEND_STEP_FRACTION: f64 = 0.5;

/// Per-regime profit-harvest/drawdown defaults. `ph_threshold_usd` is
/// multiplied by the balance profile's `ph_multiplier` before use.
struct RegimeDefaults {
    sl_mult: f64,
    tp1_mult: f64,
    tp2_mult: f64,
    time_limit_secs: u64,
    ph_threshold_usd: f64,
    min_holding_secs: u64,
    ph_time_limit_secs: u64,
    drawdown_pct: f64,
    min_profit_to_protect_usd: f64,
}

fn regime_defaults(regime: Regime) -> RegimeDefaults {
    match regime {
        Regime::Trending => RegimeDefaults {
            sl_mult: 1.5,
            tp1_mult: 2.0,
            tp2_mult: 4.0,
            time_limit_secs: 3600,
            ph_threshold_usd: 4.0,
            min_holding_secs: 90,
            ph_time_limit_secs: 600,
            drawdown_pct: 0.40,
            min_profit_to_protect_usd: 1.0,
        },
        Regime::Ranging => RegimeDefaults {
            sl_mult: 1.0,
            tp1_mult: 1.5,
            tp2_mult: 2.5,
            time_limit_secs: 1800,
            ph_threshold_usd: 2.5,
            min_holding_secs: 60,
            ph_time_limit_secs: 400,
            drawdown_pct: 0.40,
            min_profit_to_protect_usd: 1.0,
        },
        Regime::Choppy => RegimeDefaults {
            sl_mult: 0.8,
            tp1_mult: 1.2,
            tp2_mult: 2.0,
            time_limit_secs: 1200,
            ph_threshold_usd: 1.5,
            min_holding_secs: 45,
            ph_time_limit_secs: 300,
            drawdown_pct: 0.40,
            min_profit_to_protect_usd: 1.0,
        },
    }
}

/// `ph_time_limit` scales with volatility: quiet markets get more time for
/// the threshold to be reached before the window closes.
fn ph_time_limit_atr_scale(atr_pct: f64) -> f64 {
    if atr_pct < 0.3 {
        1.0
    } else if atr_pct < 0.6 {
        1.2
    } else {
        1.5
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    CriticalLossCut,
    TimeoutLoss,
    TakeProfit,
    PhExtreme,
    PhStrong,
    PhNormal,
    ProfitDrawdown,
    LossDeterioration,
    TrailingStop,
    SmartExit,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "sl_hit"),
            Self::CriticalLossCut => write!(f, "critical_loss_cut"),
            Self::TimeoutLoss => write!(f, "timeout_loss"),
            Self::TakeProfit => write!(f, "tp_hit"),
            Self::PhExtreme => write!(f, "ph_extreme"),
            Self::PhStrong => write!(f, "ph_strong"),
            Self::PhNormal => write!(f, "ph_normal"),
            Self::ProfitDrawdown => write!(f, "profit_drawdown"),
            Self::LossDeterioration => write!(f, "loss_deterioration"),
            Self::TrailingStop => write!(f, "tsl_hit"),
            Self::SmartExit => write!(f, "smart_exit"),
        }
    }
}

/// Barrier geometry derived from ATR and regime, with hard minimum floors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub sl_pct: f64,
    pub tp1_pct: f64,
    pub tp2_pct: f64,
    pub time_limit_secs: u64,
    pub regime: Regime,

    pub ph_threshold_usd: f64,
    pub ph_multiplier: f64,
    pub min_holding_secs: u64,
    pub ph_time_limit_secs: u64,
    pub drawdown_pct: f64,
    pub min_profit_to_protect_usd: f64,
}

impl LifecycleConfig {
    /// `atr_pct` is ATR expressed as a percentage of current price.
    /// `ph_multiplier`, `tp_atr_boost`, and `sl_atr_boost` come from the
    /// position's balance profile — a larger account gets wider barriers
    /// (more room to avoid noise-driven stop-outs) via the boost factors.
    pub fn from_atr(atr_pct: f64, regime: Regime, profile: &ProfileParams) -> Self {
        let d = regime_defaults(regime);
        Self {
            sl_pct: (atr_pct * d.sl_mult * profile.sl_atr_boost).max(MIN_SL_PCT),
            tp1_pct: (atr_pct * d.tp1_mult * profile.tp_atr_boost).max(MIN_TP1_PCT),
            tp2_pct: (atr_pct * d.tp2_mult * profile.tp_atr_boost).max(MIN_TP2_PCT),
            time_limit_secs: d.time_limit_secs,
            regime,
            ph_threshold_usd: d.ph_threshold_usd,
            ph_multiplier: profile.ph_multiplier,
            min_holding_secs: d.min_holding_secs,
            ph_time_limit_secs: (d.ph_time_limit_secs as f64 * ph_time_limit_atr_scale(atr_pct)) as u64,
            drawdown_pct: d.drawdown_pct,
            min_profit_to_protect_usd: d.min_profit_to_protect_usd,
        }
    }

    pub fn explicit(sl_pct: f64, tp1_pct: f64, tp2_pct: f64, time_limit_secs: u64, regime: Regime) -> Self {
        let d = regime_defaults(regime);
        Self {
            sl_pct: sl_pct.max(MIN_SL_PCT),
            tp1_pct: tp1_pct.max(MIN_TP1_PCT),
            tp2_pct: tp2_pct.max(MIN_TP2_PCT),
            time_limit_secs,
            regime,
            ph_threshold_usd: d.ph_threshold_usd,
            ph_multiplier: 1.0,
            min_holding_secs: d.min_holding_secs,
            ph_time_limit_secs: d.ph_time_limit_secs,
            drawdown_pct: d.drawdown_pct,
            min_profit_to_protect_usd: d.min_profit_to_protect_usd,
        }
    }
}

/// Live per-position lifecycle tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleState {
    pub config: LifecycleConfig,
    pub entry_price: f64,
    pub side: Side,
    pub quantity: f64,
    pub atr: f64,
    pub opened_at_secs: u64,

    pub current_sl_price: f64,
    pub tp1_price: f64,
    pub tp2_price: f64,
    pub tp1_hit: bool,
    pub tp_extended_active: bool,
    pub profit_lock_active: bool,
    pub breakeven_lock_active: bool,

    pub best_price: f64,
    pub peak_pnl_usd: Option<f64>,
    pub trail_price: f64,
}

impl LifecycleState {
    pub fn new(config: LifecycleConfig, entry_price: f64, side: Side, opened_at_secs: u64, atr: f64, quantity: f64) -> Self {
        let is_long = side == Side::Long;
        let (sl_price, tp1_price, tp2_price) = if is_long {
            (
                entry_price * (1.0 - config.sl_pct / 100.0),
                entry_price * (1.0 + config.tp1_pct / 100.0),
                entry_price * (1.0 + config.tp2_pct / 100.0),
            )
        } else {
            (
                entry_price * (1.0 + config.sl_pct / 100.0),
                entry_price * (1.0 - config.tp1_pct / 100.0),
                entry_price * (1.0 - config.tp2_pct / 100.0),
            )
        };

        let initial_trail_dist = atr * PH_NORMAL_ATR_MULT;
        let trail_price = if is_long { entry_price - initial_trail_dist } else { entry_price + initial_trail_dist };

        info!(
            side = %side,
            entry_price,
            sl_price = format!("{:.2}", sl_price),
            tp1_price = format!("{:.2}", tp1_price),
            tp2_price = format!("{:.2}", tp2_price),
            time_limit_secs = config.time_limit_secs,
            "lifecycle state initialized"
        );

        Self {
            config,
            entry_price,
            side,
            quantity,
            atr,
            opened_at_secs,
            current_sl_price: sl_price,
            tp1_price,
            tp2_price,
            tp1_hit: false,
            tp_extended_active: false,
            profit_lock_active: false,
            breakeven_lock_active: false,
            best_price: entry_price,
            peak_pnl_usd: None,
            trail_price,
        }
    }

    pub fn update_atr(&mut self, new_atr: f64) {
        if new_atr > 0.0 {
            self.atr = new_atr;
        }
    }

    fn pnl_pct(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) / self.entry_price * 100.0,
            Side::Short => (self.entry_price - current_price) / self.entry_price * 100.0,
        }
    }

    fn net_pnl_usd(&self, current_price: f64) -> f64 {
        self.pnl_pct(current_price) / 100.0 * self.entry_price * self.quantity
    }

    fn breakeven_price(&self) -> f64 {
        match self.side {
            Side::Long => self.entry_price * (1.0 + BREAKEVEN_BUFFER_PCT / 100.0),
            Side::Short => self.entry_price * (1.0 - BREAKEVEN_BUFFER_PCT / 100.0),
        }
    }

    fn tighten_sl(&mut self, candidate: f64) -> bool {
        let improves = match self.side {
            Side::Long => candidate > self.current_sl_price,
            Side::Short => candidate < self.current_sl_price,
        };
        if improves {
            self.current_sl_price = candidate;
        }
        improves
    }

    /// Evaluate one tick. Mutates trailing/lock state even when no exit
    /// fires; returns the highest-priority triggered reason, if any.
    ///
    /// `price_source` gates every price-dependent check: if the price isn't
    /// actionable (no live quote, just an entry-price or zero stand-in), no
    /// state is touched and no exit is ever returned.
    pub fn evaluate(&mut self, current_price: f64, price_source: PriceSource, current_time_secs: u64) -> Option<ExitReason> {
        if !price_source.is_actionable() {
            debug!(source = %price_source, "skipping lifecycle evaluation, price not actionable");
            return None;
        }

        let is_long = self.side == Side::Long;
        let elapsed = current_time_secs.saturating_sub(self.opened_at_secs);
        let elapsed_fraction = if self.config.time_limit_secs > 0 {
            elapsed as f64 / self.config.time_limit_secs as f64
        } else {
            0.0
        };

        if is_long && current_price > self.best_price {
            self.best_price = current_price;
        } else if !is_long && (current_price < self.best_price || self.best_price == self.entry_price) {
            self.best_price = current_price;
        }

        let pnl_pct = self.pnl_pct(current_price);
        let net_pnl_usd = self.net_pnl_usd(current_price);
        if self.peak_pnl_usd.map(|p| net_pnl_usd > p).unwrap_or(true) {
            self.peak_pnl_usd = Some(net_pnl_usd);
        }

        // 1. sl_hit
        let sl_breached = if is_long { current_price <= self.current_sl_price } else { current_price >= self.current_sl_price };
        if sl_breached {
            info!(sl = self.current_sl_price, current_price, "sl_hit");
            return Some(ExitReason::StopLoss);
        }

        // 2. critical_loss_cut — grace period avoids cutting on the first print.
        if pnl_pct <= -CRITICAL_LOSS_PCT && elapsed >= CRITICAL_LOSS_GRACE_SECS {
            info!(pnl_pct, elapsed, "critical_loss_cut");
            return Some(ExitReason::CriticalLossCut);
        }

        // 3. timeout_loss
        if elapsed >= self.config.time_limit_secs && pnl_pct < 0.0 {
            info!(elapsed, pnl_pct, "timeout_loss");
            return Some(ExitReason::TimeoutLoss);
        }

        // Profit lock: 50% of TP1 distance reached -> breakeven+buffer.
        if !self.profit_lock_active {
            let tp1_distance = (self.tp1_price - self.entry_price).abs();
            let current_distance = if is_long { current_price - self.entry_price } else { self.entry_price - current_price };
            if tp1_distance > 0.0 && current_distance >= PROFIT_LOCK_TRIGGER * tp1_distance && self.tighten_sl(self.breakeven_price()) {
                self.profit_lock_active = true;
                debug!(sl = self.current_sl_price, "profit lock activated");
            }
        }

        // Breakeven lock at 75% time elapsed.
        if !self.breakeven_lock_active && elapsed_fraction >= BREAKEVEN_LOCK_FRACTION && self.tighten_sl(self.breakeven_price()) {
            self.breakeven_lock_active = true;
            debug!(sl = self.current_sl_price, "breakeven lock activated");
        }

        // Progressive tightening starting at 50% time elapsed.
        if !self.breakeven_lock_active && !self.profit_lock_active && elapsed_fraction >= TIGHTEN_START_FRACTION {
            let progress = ((elapsed_fraction - TIGHTEN_START_FRACTION) / (BREAKEVEN_LOCK_FRACTION - TIGHTEN_START_FRACTION)).clamp(0.0, 1.0);
            let original_sl = if is_long {
                self.entry_price * (1.0 - self.config.sl_pct / 100.0)
            } else {
                self.entry_price * (1.0 + self.config.sl_pct / 100.0)
            };
            let tightened = original_sl + progress * (self.entry_price - original_sl);
            self.tighten_sl(tightened);
        }

        // 4. tp_extended — trending, same direction, no reversal evidence.
        // Never closes: advances the trail hard and pushes TP2 further out,
        // holding the position instead of banking TP1/TP2 like a ranging exit.
        let tp1_breached = if is_long { current_price >= self.tp1_price } else { current_price <= self.tp1_price };
        let tp2_breached = if is_long { current_price >= self.tp2_price } else { current_price <= self.tp2_price };
        let reversal_evidence = if is_long { current_price < self.best_price } else { current_price > self.best_price };
        let trending_continuation = self.config.regime == Regime::Trending && !reversal_evidence;

        if tp2_breached && trending_continuation {
            let step = (self.tp2_price - self.entry_price).abs() * TP_EXTEND_STEP_FRACTION;
            self.tp2_price = if is_long { self.tp2_price + step } else { self.tp2_price - step };
            let candidate_trail = if is_long { self.best_price - self.atr * PH_EXTREME_ATR_MULT } else { self.best_price + self.atr * PH_EXTREME_ATR_MULT };
            self.tighten_sl_trail(candidate_trail);
            if !self.tp_extended_active {
                self.tp_extended_active = true;
                debug!(tp2 = self.tp2_price, "tp_extended: trend continuation, trail advanced and target extended");
            }
        }

        // 5. tp_hit — TP1/TP2 close the position outside a trending
        // continuation; a trending market with no reversal evidence holds
        // instead, deferring to the profit-harvest/trail logic below.
        if !self.tp1_hit && !trending_continuation && (tp1_breached || tp2_breached) {
            self.tp1_hit = true;
            info!(tp1 = self.tp1_price, current_price, "tp_hit");
            return Some(ExitReason::TakeProfit);
        }

        // Trailing-stop tightness tier, keyed on unrealized profit fraction.
        let tp1_distance = (self.tp1_price - self.entry_price).abs();
        let profit_fraction = if tp1_distance > 0.0 { (pnl_pct.max(0.0) / 100.0 * self.entry_price / tp1_distance).clamp(0.0, 3.0) } else { 0.0 };
        let atr_mult = if profit_fraction >= PH_EXTREME_START {
            PH_EXTREME_ATR_MULT
        } else if profit_fraction >= PH_STRONG_START {
            PH_STRONG_ATR_MULT
        } else {
            PH_NORMAL_ATR_MULT
        };
        let min_trail = self.entry_price * MIN_TRAIL_PCT / 100.0;
        let trail_distance = (self.atr * atr_mult).max(min_trail);
        let candidate_trail = if is_long { self.best_price - trail_distance } else { self.best_price + trail_distance };
        self.tighten_sl_trail(candidate_trail);

        // 6. profit-harvesting — an actual close, keyed on absolute USD PnL.
        let ph_threshold = self.config.ph_threshold_usd * self.config.ph_multiplier;
        if net_pnl_usd >= ph_threshold * 2.0 {
            info!(net_pnl_usd, ph_threshold, "ph_extreme");
            return Some(ExitReason::PhExtreme);
        }
        if net_pnl_usd >= ph_threshold * 1.5 && elapsed < self.config.ph_time_limit_secs {
            info!(net_pnl_usd, ph_threshold, elapsed, "ph_strong");
            return Some(ExitReason::PhStrong);
        }
        if net_pnl_usd >= ph_threshold && elapsed >= self.config.min_holding_secs && elapsed < self.config.ph_time_limit_secs {
            info!(net_pnl_usd, ph_threshold, elapsed, "ph_normal");
            return Some(ExitReason::PhNormal);
        }

        // 7. profit_drawdown / loss_deterioration
        let peak = self.peak_pnl_usd.unwrap_or(net_pnl_usd);
        if peak > 0.0 {
            let giveback = peak - net_pnl_usd;
            if giveback >= peak * self.config.drawdown_pct && net_pnl_usd >= self.config.min_profit_to_protect_usd {
                info!(peak, net_pnl_usd, "profit_drawdown");
                return Some(ExitReason::ProfitDrawdown);
            }
        } else if peak < 0.0 && net_pnl_usd < peak {
            info!(peak, net_pnl_usd, "loss_deterioration");
            return Some(ExitReason::LossDeterioration);
        }

        // 8. tsl_hit
        let trail_breached = if is_long { current_price <= self.trail_price } else { current_price >= self.trail_price };
        if trail_breached {
            info!(trail = self.trail_price, current_price, "tsl_hit");
            return Some(ExitReason::TrailingStop);
        }

        // 9. smart_exit — time limit reached without ever going negative.
        if elapsed >= self.config.time_limit_secs {
            info!(elapsed, pnl_pct, "smart_exit");
            return Some(ExitReason::SmartExit);
        }

        None
    }

    /// Trail price only ever advances in the favorable direction, same rule
    /// as `tighten_sl` but applied to the independent TSL level.
    fn tighten_sl_trail(&mut self, candidate: f64) {
        let improves = match self.side {
            Side::Long => candidate > self.trail_price,
            Side::Short => candidate < self.trail_price,
        };
        if improves {
            self.trail_price = candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LifecycleConfig {
        LifecycleConfig::explicit(1.0, 2.0, 4.0, 3600, Regime::Ranging)
    }

    fn new_state(cfg: LifecycleConfig, entry: f64, side: Side, opened_at: u64, atr: f64) -> LifecycleState {
        LifecycleState::new(cfg, entry, side, opened_at, atr, 1.0)
    }

    #[test]
    fn sl_hit_fires_first() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(98.5, PriceSource::Ticker, 1001), Some(ExitReason::StopLoss));
    }

    #[test]
    fn critical_loss_cut_waits_for_grace_period() {
        let cfg = LifecycleConfig::explicit(10.0, 2.0, 4.0, 3600, Regime::Ranging);
        let mut state = new_state(cfg, 100.0, Side::Long, 1000, 2.5);
        // Loss exceeds the 3% critical floor but the grace period hasn't elapsed.
        assert_eq!(state.evaluate(96.5, PriceSource::Ticker, 1002), None);
    }

    #[test]
    fn critical_loss_cut_fires_past_emergency_floor_after_grace() {
        let cfg = LifecycleConfig::explicit(10.0, 2.0, 4.0, 3600, Regime::Ranging);
        let mut state = new_state(cfg, 100.0, Side::Long, 1000, 2.5);
        assert_eq!(state.evaluate(96.5, PriceSource::Ticker, 1006), Some(ExitReason::CriticalLossCut));
    }

    #[test]
    fn timeout_loss_requires_both_time_and_negative_pnl() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(99.8, PriceSource::Ticker, 1000 + 3601), Some(ExitReason::TimeoutLoss));
    }

    #[test]
    fn smart_exit_on_timeout_without_loss() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(100.2, PriceSource::Ticker, 1000 + 3601), Some(ExitReason::SmartExit));
    }

    #[test]
    fn tp_extended_in_trending_advances_trail_without_closing() {
        let mut cfg = LifecycleConfig::explicit(1.0, 2.0, 4.0, 3600, Regime::Trending);
        cfg.ph_threshold_usd = 100.0; // keep profit-harvesting out of the way for this test
        let mut state = new_state(cfg, 100.0, Side::Long, 1000, 0.3);
        let original_tp2 = state.tp2_price;
        let result = state.evaluate(104.5, PriceSource::Ticker, 1001);
        assert_eq!(result, None);
        assert!(state.tp_extended_active);
        assert!(state.tp2_price > original_tp2);
    }

    #[test]
    fn tp2_breach_outside_trending_closes_as_tp_hit() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(104.5, PriceSource::Ticker, 1001), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn tp_hit_fires_once() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(102.1, PriceSource::Ticker, 1001), Some(ExitReason::TakeProfit));
        assert!(state.tp1_hit);
    }

    #[test]
    fn trailing_stop_tightens_and_triggers() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.2);
        state.evaluate(101.5, PriceSource::Ticker, 1001);
        let trail_after_rise = state.trail_price;
        assert!(trail_after_rise > 100.0 - 0.2 * 1.5);
        let result = state.evaluate(trail_after_rise - 0.01, PriceSource::Ticker, 1002);
        assert_eq!(result, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn profit_drawdown_requires_min_profit_to_protect() {
        let mut cfg = LifecycleConfig::explicit(1.0, 2.0, 4.0, 3600, Regime::Ranging);
        cfg.ph_threshold_usd = 100.0; // keep profit-harvesting out of the way for this test
        let mut state = LifecycleState::new(cfg, 150.0, Side::Long, 1000, 0.05, 4.0);
        state.evaluate(151.50, PriceSource::Ticker, 1001);
        assert!((state.peak_pnl_usd.unwrap() - 6.0).abs() < 1e-9);
        // net_pnl_usd at 150.90 is +3.60: a 40% giveback, still above the $1 floor.
        let result = state.evaluate(150.90, PriceSource::Ticker, 1002);
        assert_eq!(result, Some(ExitReason::ProfitDrawdown));
    }

    #[test]
    fn loss_deterioration_fires_when_below_best_ever_mark() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        state.evaluate(99.9, PriceSource::Ticker, 1001);
        let result = state.evaluate(99.7, PriceSource::Ticker, 1002);
        assert_eq!(result, Some(ExitReason::LossDeterioration));
    }

    #[test]
    fn fallback_price_source_skips_all_checks() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        // Would be a clean sl_hit on a trusted price, but the source is degraded.
        assert_eq!(state.evaluate(98.5, PriceSource::EntryPriceFallback, 1001), None);
        assert_eq!(state.evaluate(50.0, PriceSource::Unavailable, 1002), None);
    }

    #[test]
    fn short_side_mirrors_long_logic() {
        let mut state = new_state(config(), 100.0, Side::Short, 1000, 0.3);
        assert_eq!(state.evaluate(101.1, PriceSource::Ticker, 1001), Some(ExitReason::StopLoss));
    }

    #[test]
    fn no_exit_when_flat_and_within_window() {
        let mut state = new_state(config(), 100.0, Side::Long, 1000, 0.3);
        assert_eq!(state.evaluate(100.1, PriceSource::Ticker, 1100), None);
    }

    #[test]
    fn config_from_atr_enforces_floors() {
        let profile = ProfileParams {
            base_position_usd: 500.0,
            min_position_usd: 10.0,
            max_position_usd: 5_000.0,
            max_concurrent: 3,
            tp_atr_boost: 1.0,
            sl_atr_boost: 1.0,
            ph_multiplier: 1.0,
            min_score_boost: 0.0,
        };
        let cfg = LifecycleConfig::from_atr(0.05, Regime::Trending, &profile);
        assert!(cfg.sl_pct >= MIN_SL_PCT);
        assert!(cfg.tp1_pct >= MIN_TP1_PCT);
        assert!(cfg.tp2_pct >= MIN_TP2_PCT);
    }

    #[test]
    fn config_from_atr_applies_profile_boosts() {
        let base_profile = ProfileParams {
            base_position_usd: 500.0,
            min_position_usd: 10.0,
            max_position_usd: 5_000.0,
            max_concurrent: 3,
            tp_atr_boost: 1.0,
            sl_atr_boost: 1.0,
            ph_multiplier: 1.0,
            min_score_boost: 0.0,
        };
        let boosted_profile = ProfileParams { tp_atr_boost: 2.0, sl_atr_boost: 1.5, ..base_profile };
        let base = LifecycleConfig::from_atr(1.0, Regime::Trending, &base_profile);
        let boosted = LifecycleConfig::from_atr(1.0, Regime::Trending, &boosted_profile);
        assert!(boosted.tp1_pct > base.tp1_pct);
        assert!(boosted.sl_pct > base.sl_pct);
    }

    #[test]
    fn ph_extreme_closes_despite_short_holding_time() {
        let cfg = LifecycleConfig::explicit(5.0, 5.0, 8.0, 3600, Regime::Choppy);
        let mut state = new_state(cfg, 100.0, Side::Long, 1000, 0.01);
        // ph_threshold_usd for Choppy is 1.5; 3.5 usd pnl is well past 2x,
        // and min_holding (45s) hasn't been reached after only 10 seconds.
        let result = state.evaluate(103.5, PriceSource::Ticker, 1010);
        assert_eq!(result, Some(ExitReason::PhExtreme));
    }
}
