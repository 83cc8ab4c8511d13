// =============================================================================
// Risk Engine — four circuit breakers protecting capital
// =============================================================================
//
// Circuit breakers:
//   1. Daily Loss       — trips when cumulative daily PnL loss exceeds a
//                         percentage of starting capital.
//   2. Consecutive Losses — trips after N consecutive losing trades.
//   3. Max Drawdown      — trips when intra-day drawdown from peak equity
//                         exceeds the threshold.
//   4. Trade Limit       — trips when daily trade count reaches the cap.
//
// The engine automatically resets daily statistics when the date rolls over.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::balance_profile::ProfileParams;
use crate::errors::EngineError;
use crate::types::{BalanceProfile, Regime};

// ---------------------------------------------------------------------------
// Contract specs
// ---------------------------------------------------------------------------

/// Exchange-side contract parameters needed to turn a USD notional into an
/// order quantity. OKX swaps are sized in contracts, not base asset — `sz`
/// on the order request is a contract count, so a risk budget computed in
/// dollars has to be converted through `ct_val` and rounded down to a whole
/// lot before it can be sent.
#[derive(Debug, Clone, Copy)]
pub struct ContractSpec {
    /// USD value of one contract.
    pub ct_val: f64,
    /// Smallest increment an order size can move in, in contracts.
    pub lot_size: f64,
    /// Minimum order size, in contracts.
    pub min_size: f64,
}

/// Hardcoded lookup since OKX's `/public/instruments` response isn't wired
/// up yet; covers the symbols this engine actually trades and falls back to
/// a conservative one-contract-per-dollar spec for anything else.
pub fn contract_spec(symbol: &str) -> ContractSpec {
    match symbol {
        "BTC-USDT-SWAP" => ContractSpec { ct_val: 100.0, lot_size: 1.0, min_size: 1.0 },
        "ETH-USDT-SWAP" => ContractSpec { ct_val: 10.0, lot_size: 1.0, min_size: 1.0 },
        "SOL-USDT-SWAP" => ContractSpec { ct_val: 1.0, lot_size: 1.0, min_size: 1.0 },
        _ => ContractSpec { ct_val: 1.0, lot_size: 1.0, min_size: 1.0 },
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Snapshot of a single circuit breaker for dashboard display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerInfo {
    pub name: String,
    pub current: f64,
    pub limit: f64,
    pub tripped: bool,
}

/// Full snapshot of the risk engine's internal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub risk_mode: String,
    #[serde(default)]
    pub daily_pnl: f64,
    #[serde(default)]
    pub daily_pnl_pct: f64,
    #[serde(default)]
    pub remaining_daily_loss_pct: f64,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub daily_trades_count: u32,
    #[serde(default)]
    pub daily_wins: u32,
    #[serde(default)]
    pub daily_losses: u32,
    #[serde(default)]
    pub max_drawdown_today: f64,
    #[serde(default)]
    pub peak_equity_today: f64,
    #[serde(default)]
    pub circuit_breakers: Vec<CircuitBreakerInfo>,
    #[serde(default)]
    pub current_date: String,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    risk_mode: String,
    daily_pnl: f64,
    consecutive_losses: u32,
    daily_trades_count: u32,
    daily_wins: u32,
    daily_losses: u32,
    max_drawdown_today: f64,
    peak_equity_today: f64,
    current_date: String,
    killed: bool,
}

// ---------------------------------------------------------------------------
// Risk Engine
// ---------------------------------------------------------------------------

/// Configuration limits supplied at construction time.
pub struct RiskEngine {
    state: RwLock<Inner>,
    /// Starting capital for the current session (used to compute percentages).
    capital: f64,
    /// Maximum daily loss allowed as a fraction (e.g. 0.03 = 3 %).
    max_daily_loss_pct: f64,
    /// Maximum consecutive losing trades before the breaker trips.
    max_consecutive_losses: u32,
    /// Maximum intra-day drawdown as a fraction.
    max_drawdown_pct: f64,
    /// Maximum number of trades per day.
    max_daily_trades: u32,
}

impl RiskEngine {
    /// Create a new risk engine.
    ///
    /// # Arguments
    /// * `capital`              — Starting capital for percentage calculations.
    /// * `max_daily_loss_pct`   — e.g. 0.03 for 3 %.
    /// * `max_consecutive_losses` — e.g. 5.
    /// * `max_drawdown_pct`     — e.g. 0.05 for 5 %.
    /// * `max_daily_trades`     — e.g. 50.
    pub fn new(
        capital: f64,
        max_daily_loss_pct: f64,
        max_consecutive_losses: u32,
        max_drawdown_pct: f64,
        max_daily_trades: u32,
    ) -> Self {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        info!(
            capital,
            max_daily_loss_pct,
            max_consecutive_losses,
            max_drawdown_pct,
            max_daily_trades,
            "RiskEngine initialised"
        );

        Self {
            state: RwLock::new(Inner {
                risk_mode: "Normal".to_string(),
                daily_pnl: 0.0,
                consecutive_losses: 0,
                daily_trades_count: 0,
                daily_wins: 0,
                daily_losses: 0,
                max_drawdown_today: 0.0,
                peak_equity_today: capital,
                current_date: today,
                killed: false,
            }),
            capital,
            max_daily_loss_pct,
            max_consecutive_losses,
            max_drawdown_pct,
            max_daily_trades,
        }
    }

    // -------------------------------------------------------------------------
    // Trade recording
    // -------------------------------------------------------------------------

    /// Record the PnL of a completed trade and update all internal counters.
    pub fn record_trade_result(&self, pnl: f64) {
        self.maybe_reset_daily();
        let mut s = self.state.write();

        s.daily_pnl += pnl;
        s.daily_trades_count += 1;

        if pnl >= 0.0 {
            s.daily_wins += 1;
            s.consecutive_losses = 0;
        } else {
            s.daily_losses += 1;
            s.consecutive_losses += 1;
        }

        // Track peak equity and drawdown.
        let current_equity = self.capital + s.daily_pnl;
        if current_equity > s.peak_equity_today {
            s.peak_equity_today = current_equity;
        }
        let drawdown = if s.peak_equity_today > 0.0 {
            (s.peak_equity_today - current_equity) / s.peak_equity_today
        } else {
            0.0
        };
        if drawdown > s.max_drawdown_today {
            s.max_drawdown_today = drawdown;
        }

        // Update risk mode label.
        s.risk_mode = self.compute_risk_mode(&s);

        debug!(
            pnl,
            daily_pnl = s.daily_pnl,
            consecutive_losses = s.consecutive_losses,
            daily_trades = s.daily_trades_count,
            drawdown = s.max_drawdown_today,
            risk_mode = %s.risk_mode,
            "trade result recorded"
        );
    }

    // -------------------------------------------------------------------------
    // Pre-trade gate
    // -------------------------------------------------------------------------

    /// Check whether trading is currently allowed.
    ///
    /// Returns `(true, None)` if all breakers are clear, or `(false,
    /// Some(reason))` if a breaker has tripped.
    pub fn can_trade(&self) -> (bool, Option<String>) {
        self.maybe_reset_daily();
        let s = self.state.read();

        if s.killed {
            return (false, Some("Kill switch activated".to_string()));
        }

        // 1. Daily loss
        let daily_loss_pct = if self.capital > 0.0 {
            (-s.daily_pnl) / self.capital
        } else {
            0.0
        };
        if daily_loss_pct >= self.max_daily_loss_pct {
            let msg = format!(
                "Daily Loss breaker tripped: {:.2}% lost (limit {:.2}%)",
                daily_loss_pct * 100.0,
                self.max_daily_loss_pct * 100.0
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        // 2. Consecutive losses
        if s.consecutive_losses >= self.max_consecutive_losses {
            let msg = format!(
                "Consecutive Losses breaker tripped: {} consecutive losses (limit {})",
                s.consecutive_losses, self.max_consecutive_losses
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        // 3. Max drawdown
        if s.max_drawdown_today >= self.max_drawdown_pct {
            let msg = format!(
                "Max Drawdown breaker tripped: {:.2}% drawdown (limit {:.2}%)",
                s.max_drawdown_today * 100.0,
                self.max_drawdown_pct * 100.0
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        // 4. Trade limit
        if s.daily_trades_count >= self.max_daily_trades {
            let msg = format!(
                "Trade Limit breaker tripped: {} trades today (limit {})",
                s.daily_trades_count, self.max_daily_trades
            );
            warn!("{}", msg);
            return (false, Some(msg));
        }

        (true, None)
    }

    // -------------------------------------------------------------------------
    // State snapshot
    // -------------------------------------------------------------------------

    /// Build a serialisable snapshot of the current risk state.
    pub fn get_state(&self) -> RiskState {
        self.maybe_reset_daily();
        let s = self.state.read();

        let daily_pnl_pct = if self.capital > 0.0 {
            (s.daily_pnl / self.capital) * 100.0
        } else {
            0.0
        };
        let remaining_daily_loss_pct = (self.max_daily_loss_pct * 100.0) - ((-s.daily_pnl / self.capital.max(1.0)) * 100.0);

        let breakers = self.build_circuit_breaker_info(&s);

        RiskState {
            risk_mode: s.risk_mode.clone(),
            daily_pnl: s.daily_pnl,
            daily_pnl_pct,
            remaining_daily_loss_pct: remaining_daily_loss_pct.max(0.0),
            consecutive_losses: s.consecutive_losses,
            daily_trades_count: s.daily_trades_count,
            daily_wins: s.daily_wins,
            daily_losses: s.daily_losses,
            max_drawdown_today: s.max_drawdown_today,
            peak_equity_today: s.peak_equity_today,
            circuit_breakers: breakers,
            current_date: s.current_date.clone(),
        }
    }

    // -------------------------------------------------------------------------
    // Daily reset
    // -------------------------------------------------------------------------

    /// Forcefully reset daily statistics (e.g. called by an admin endpoint).
    pub fn reset_daily(&self) {
        let mut s = self.state.write();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        Self::do_reset(&mut s, &today, self.capital);
        info!(date = %today, "daily risk counters reset (manual)");
    }

    /// Activate the kill switch — blocks all trading until manually cleared.
    pub fn kill(&self) {
        let mut s = self.state.write();
        s.killed = true;
        s.risk_mode = "KILLED".to_string();
        warn!("kill switch activated — all trading halted");
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// If the calendar date has changed since the last check, reset all daily
    /// counters automatically.
    fn maybe_reset_daily(&self) {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        {
            let s = self.state.read();
            if s.current_date == today {
                return;
            }
        }
        // Date has changed — acquire write lock and reset.
        let mut s = self.state.write();
        // Double-check after acquiring write lock (another thread may have
        // already performed the reset).
        if s.current_date != today {
            info!(
                old_date = %s.current_date,
                new_date = %today,
                "date rolled — resetting daily risk counters"
            );
            Self::do_reset(&mut s, &today, self.capital);
        }
    }

    fn do_reset(s: &mut Inner, date: &str, capital: f64) {
        s.daily_pnl = 0.0;
        s.consecutive_losses = 0;
        s.daily_trades_count = 0;
        s.daily_wins = 0;
        s.daily_losses = 0;
        s.max_drawdown_today = 0.0;
        s.peak_equity_today = capital;
        s.current_date = date.to_string();
        s.risk_mode = if s.killed {
            "KILLED".to_string()
        } else {
            "Normal".to_string()
        };
    }

    fn compute_risk_mode(&self, s: &Inner) -> String {
        if s.killed {
            return "KILLED".to_string();
        }

        let daily_loss_pct = if self.capital > 0.0 {
            (-s.daily_pnl) / self.capital
        } else {
            0.0
        };

        if daily_loss_pct >= self.max_daily_loss_pct
            || s.consecutive_losses >= self.max_consecutive_losses
            || s.max_drawdown_today >= self.max_drawdown_pct
            || s.daily_trades_count >= self.max_daily_trades
        {
            "BREAKER_TRIPPED".to_string()
        } else if daily_loss_pct >= self.max_daily_loss_pct * 0.75
            || s.consecutive_losses as f64 >= self.max_consecutive_losses as f64 * 0.75
        {
            "Cautious".to_string()
        } else {
            "Normal".to_string()
        }
    }

    // -------------------------------------------------------------------------
    // Regime-adaptive position sizing
    // -------------------------------------------------------------------------

    /// Work out how much size to put on, in contracts, following six steps:
    ///
    ///   1. Validate the stop distance is usable.
    ///   2. Read current equity (capital + today's realised PnL).
    ///   3. Scale the balance profile's risk percentage by a regime
    ///      multiplier — trending regimes get more room, choppy regimes get
    ///      cut down hard.
    ///   4. Convert that into a dollar risk budget for this one trade.
    ///   5. Divide by the stop distance to get a raw notional, then clamp it
    ///      to `[profile.min_position_usd, profile.max_position_usd]` so a
    ///      single trade can neither dust itself nor over-concentrate the
    ///      account.
    ///   6. Convert the clamped USD notional into contracts via the
    ///      symbol's contract value, round down to a whole lot, and reject
    ///      with `SizeBelowMinimum` if that lands below the exchange floor.
    pub fn compute_position_size(
        &self,
        symbol: &str,
        regime: Regime,
        balance_profile: BalanceProfile,
        profile: &ProfileParams,
        risk_pct: f64,
        sl_distance: f64,
        price: f64,
    ) -> Result<f64, EngineError> {
        if sl_distance <= 0.0 || !sl_distance.is_finite() {
            return Err(EngineError::DataInvalid {
                symbol: symbol.to_string(),
                reason: "stop distance must be positive".to_string(),
            });
        }
        if price <= 0.0 || !price.is_finite() {
            return Err(EngineError::DataInvalid {
                symbol: symbol.to_string(),
                reason: "price must be positive".to_string(),
            });
        }

        let equity = self.capital + self.state.read().daily_pnl;
        let regime_mult = regime_multiplier(regime);
        let dollar_risk = equity * (risk_pct / 100.0) * regime_mult;
        let raw_notional = dollar_risk / sl_distance * price;

        let clamped_notional = raw_notional.clamp(profile.min_position_usd, profile.max_position_usd);

        let spec = contract_spec(symbol);
        let raw_contracts = clamped_notional / spec.ct_val;
        let contracts = (raw_contracts / spec.lot_size).floor() * spec.lot_size;

        debug!(
            symbol,
            regime = %regime,
            balance_profile = %balance_profile,
            equity,
            risk_pct,
            regime_mult,
            dollar_risk,
            sl_distance,
            raw_notional,
            clamped_notional,
            contracts,
            "position size computed"
        );

        if contracts < spec.min_size {
            return Err(EngineError::SizeBelowMinimum {
                symbol: symbol.to_string(),
                size: contracts,
                min_size: spec.min_size,
            });
        }

        Ok(contracts)
    }

    // -------------------------------------------------------------------------
    // Admission gate
    // -------------------------------------------------------------------------

    /// Four-check gate run immediately before submitting an entry order:
    ///
    ///   1. All circuit breakers clear.
    ///   2. The symbol does not already hold a live position.
    ///   3. The account is below `max_concurrent_positions`.
    ///   4. Margin required does not exceed margin available.
    pub fn check_admission(
        &self,
        symbol_has_live_position: bool,
        open_position_count: usize,
        max_concurrent_positions: usize,
        margin_required: f64,
        margin_available: f64,
    ) -> Result<(), EngineError> {
        let (clear, reason) = self.can_trade();
        if !clear {
            let reason = reason.unwrap_or_else(|| "risk breaker tripped".to_string());
            if reason.starts_with("Daily Loss breaker") {
                let s = self.state.read();
                let realized_pct = if self.capital > 0.0 { (-s.daily_pnl) / self.capital * 100.0 } else { 0.0 };
                return Err(EngineError::DailyLossExceeded {
                    realized_pct,
                    limit_pct: self.max_daily_loss_pct * 100.0,
                });
            }
            return Err(EngineError::CircuitBreakerOpen { reason });
        }

        if symbol_has_live_position {
            return Err(EngineError::InvariantViolated(
                "symbol already has a live position".to_string(),
            ));
        }

        if open_position_count >= max_concurrent_positions {
            return Err(EngineError::MaxConcurrentReached {
                open: open_position_count as u32,
                max: max_concurrent_positions as u32,
            });
        }

        if margin_required > margin_available {
            return Err(EngineError::InsufficientMargin {
                symbol: String::new(),
                required: margin_required,
                available: margin_available,
            });
        }

        Ok(())
    }

    fn build_circuit_breaker_info(&self, s: &Inner) -> Vec<CircuitBreakerInfo> {
        let daily_loss_pct = if self.capital > 0.0 {
            ((-s.daily_pnl) / self.capital) * 100.0
        } else {
            0.0
        };

        vec![
            CircuitBreakerInfo {
                name: "Daily Loss".to_string(),
                current: daily_loss_pct.max(0.0),
                limit: self.max_daily_loss_pct * 100.0,
                tripped: daily_loss_pct >= self.max_daily_loss_pct * 100.0,
            },
            CircuitBreakerInfo {
                name: "Consecutive Losses".to_string(),
                current: s.consecutive_losses as f64,
                limit: self.max_consecutive_losses as f64,
                tripped: s.consecutive_losses >= self.max_consecutive_losses,
            },
            CircuitBreakerInfo {
                name: "Max Drawdown".to_string(),
                current: s.max_drawdown_today * 100.0,
                limit: self.max_drawdown_pct * 100.0,
                tripped: s.max_drawdown_today >= self.max_drawdown_pct,
            },
            CircuitBreakerInfo {
                name: "Trade Limit".to_string(),
                current: s.daily_trades_count as f64,
                limit: self.max_daily_trades as f64,
                tripped: s.daily_trades_count >= self.max_daily_trades,
            },
        ]
    }
}

/// Position-size multiplier applied per regime: trending markets earn more
/// risk budget, choppy markets get cut down hard since stops tend to get
/// chopped on noise rather than an actual thesis failure.
fn regime_multiplier(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 1.2,
        Regime::Ranging => 1.0,
        Regime::Choppy => 0.5,
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("capital", &self.capital)
            .field("max_daily_loss_pct", &self.max_daily_loss_pct)
            .field("max_consecutive_losses", &self.max_consecutive_losses)
            .field("max_drawdown_pct", &self.max_drawdown_pct)
            .field("max_daily_trades", &self.max_daily_trades)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(min: f64, max: f64) -> ProfileParams {
        ProfileParams {
            base_position_usd: (min + max) / 2.0,
            min_position_usd: min,
            max_position_usd: max,
            max_concurrent: 3,
            tp_atr_boost: 1.0,
            sl_atr_boost: 1.0,
            ph_multiplier: 1.0,
            min_score_boost: 0.0,
        }
    }

    #[test]
    fn position_size_scales_with_regime() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let profile = params(10.0, 1_000_000.0);
        let trending = engine
            .compute_position_size("BTC-USDT-SWAP", Regime::Trending, BalanceProfile::Medium, &profile, 1.5, 100.0, 50_000.0)
            .unwrap();
        let choppy = engine
            .compute_position_size("BTC-USDT-SWAP", Regime::Choppy, BalanceProfile::Medium, &profile, 1.5, 100.0, 50_000.0)
            .unwrap();
        assert!(trending > choppy);
    }

    #[test]
    fn position_size_rejects_non_positive_stop_distance() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let profile = params(10.0, 5_000.0);
        let err = engine.compute_position_size("BTC-USDT-SWAP", Regime::Ranging, BalanceProfile::Small, &profile, 1.0, 0.0, 100.0);
        assert!(err.is_err());
    }

    #[test]
    fn position_size_clamps_to_max_position_usd() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let profile = params(10.0, 200.0);
        // Huge risk_pct would normally produce an oversized position; the
        // profile's max_position_usd should bring it back down.
        let contracts = engine
            .compute_position_size("SOL-USDT-SWAP", Regime::Trending, BalanceProfile::Large, &profile, 50.0, 1.0, 100.0)
            .unwrap();
        let notional = contracts * contract_spec("SOL-USDT-SWAP").ct_val;
        assert!(notional <= profile.max_position_usd + 1e-6);
    }

    #[test]
    fn position_size_rejects_below_exchange_minimum() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let profile = params(1.0, 5.0);
        let err = engine.compute_position_size("BTC-USDT-SWAP", Regime::Choppy, BalanceProfile::Small, &profile, 0.01, 500.0, 50_000.0);
        assert!(matches!(err, Err(EngineError::SizeBelowMinimum { .. })));
    }

    #[test]
    fn admission_gate_blocks_duplicate_symbol() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let result = engine.check_admission(true, 0, 3, 100.0, 1000.0);
        assert!(matches!(result, Err(EngineError::InvariantViolated(_))));
    }

    #[test]
    fn admission_gate_blocks_max_concurrent() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let result = engine.check_admission(false, 3, 3, 100.0, 1000.0);
        assert!(matches!(result, Err(EngineError::MaxConcurrentReached { .. })));
    }

    #[test]
    fn admission_gate_blocks_insufficient_margin() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let result = engine.check_admission(false, 0, 3, 5000.0, 1000.0);
        assert!(matches!(result, Err(EngineError::InsufficientMargin { .. })));
    }

    #[test]
    fn admission_gate_passes_when_all_clear() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        let result = engine.check_admission(false, 0, 3, 100.0, 1000.0);
        assert!(result.is_ok());
    }

    #[test]
    fn circuit_breaker_still_blocks_admission() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        engine.kill();
        let result = engine.check_admission(false, 0, 3, 100.0, 1000.0);
        assert!(matches!(result, Err(EngineError::CircuitBreakerOpen { .. })));
    }

    #[test]
    fn admission_gate_reports_daily_loss_exceeded() {
        let engine = RiskEngine::new(10_000.0, 0.03, 5, 0.08, 50);
        engine.record_trade_result(-400.0);
        let result = engine.check_admission(false, 0, 3, 100.0, 1000.0);
        assert!(matches!(result, Err(EngineError::DailyLossExceeded { .. })));
    }
}
