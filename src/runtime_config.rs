// =============================================================================
// Runtime Configuration — hot-reloadable engine parameters
// =============================================================================
//
// Persisted to `runtime_config.json` and reloaded at startup. Unlike most
// config structs in this codebase, every field here rejects unknown keys —
// a typo'd key in the file should fail loudly at startup rather than be
// silently ignored, since a wrong key can mean the operator believes a
// safety knob is set when it is not.
//
// Writes use the same tmp-then-rename pattern as before: write to
// `<path>.tmp`, then `std::fs::rename` onto the real path, so a crash
// mid-write can never leave a half-written config on disk.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Strategy / sizing parameters
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyParams {
    #[serde(default = "default_sl_atr_multiplier")]
    pub sl_atr_multiplier: f64,
    #[serde(default = "default_tp1_atr_multiplier")]
    pub tp1_atr_multiplier: f64,
    #[serde(default = "default_tp2_atr_multiplier")]
    pub tp2_atr_multiplier: f64,
    #[serde(default = "default_min_sl_pct")]
    pub min_sl_pct: f64,
    #[serde(default = "default_min_tp1_pct")]
    pub min_tp1_pct: f64,
    #[serde(default = "default_min_tp2_pct")]
    pub min_tp2_pct: f64,
    #[serde(default = "default_base_position_pct")]
    pub base_position_pct: f64,
}

fn default_sl_atr_multiplier() -> f64 {
    1.5
}
fn default_tp1_atr_multiplier() -> f64 {
    2.5
}
fn default_tp2_atr_multiplier() -> f64 {
    4.0
}
fn default_min_sl_pct() -> f64 {
    0.4
}
fn default_min_tp1_pct() -> f64 {
    0.6
}
fn default_min_tp2_pct() -> f64 {
    1.0
}
fn default_base_position_pct() -> f64 {
    2.0
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            sl_atr_multiplier: default_sl_atr_multiplier(),
            tp1_atr_multiplier: default_tp1_atr_multiplier(),
            tp2_atr_multiplier: default_tp2_atr_multiplier(),
            min_sl_pct: default_min_sl_pct(),
            min_tp1_pct: default_min_tp1_pct(),
            min_tp2_pct: default_min_tp2_pct(),
            base_position_pct: default_base_position_pct(),
        }
    }
}

// =============================================================================
// Balance Profile thresholds (C4)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BalanceProfileConfig {
    /// Equity below this threshold is the `small` profile.
    #[serde(default = "default_small_ceiling")]
    pub small_ceiling_usd: f64,
    /// Equity below this threshold (and above small) is `medium`; above is `large`.
    #[serde(default = "default_medium_ceiling")]
    pub medium_ceiling_usd: f64,

    #[serde(default = "default_small_risk_pct")]
    pub small_risk_pct: f64,
    #[serde(default = "default_medium_risk_pct")]
    pub medium_risk_pct: f64,
    #[serde(default = "default_large_risk_pct")]
    pub large_risk_pct: f64,

    #[serde(default = "default_small_base_position_usd")]
    pub small_base_position_usd: f64,
    #[serde(default = "default_medium_base_position_usd")]
    pub medium_base_position_usd: f64,
    #[serde(default = "default_large_base_position_usd")]
    pub large_base_position_usd: f64,

    #[serde(default = "default_small_min_position_usd")]
    pub small_min_position_usd: f64,
    #[serde(default = "default_medium_min_position_usd")]
    pub medium_min_position_usd: f64,
    #[serde(default = "default_large_min_position_usd")]
    pub large_min_position_usd: f64,

    #[serde(default = "default_small_max_position_usd")]
    pub small_max_position_usd: f64,
    #[serde(default = "default_medium_max_position_usd")]
    pub medium_max_position_usd: f64,
    #[serde(default = "default_large_max_position_usd")]
    pub large_max_position_usd: f64,

    #[serde(default = "default_small_max_concurrent")]
    pub small_max_concurrent: u32,
    #[serde(default = "default_medium_max_concurrent")]
    pub medium_max_concurrent: u32,
    #[serde(default = "default_large_max_concurrent")]
    pub large_max_concurrent: u32,

    #[serde(default = "default_small_tp_atr_boost")]
    pub small_tp_atr_boost: f64,
    #[serde(default = "default_medium_tp_atr_boost")]
    pub medium_tp_atr_boost: f64,
    #[serde(default = "default_large_tp_atr_boost")]
    pub large_tp_atr_boost: f64,

    #[serde(default = "default_small_sl_atr_boost")]
    pub small_sl_atr_boost: f64,
    #[serde(default = "default_medium_sl_atr_boost")]
    pub medium_sl_atr_boost: f64,
    #[serde(default = "default_large_sl_atr_boost")]
    pub large_sl_atr_boost: f64,

    #[serde(default = "default_small_ph_multiplier")]
    pub small_ph_multiplier: f64,
    #[serde(default = "default_medium_ph_multiplier")]
    pub medium_ph_multiplier: f64,
    #[serde(default = "default_large_ph_multiplier")]
    pub large_ph_multiplier: f64,

    #[serde(default = "default_small_min_score_boost")]
    pub small_min_score_boost: f64,
    #[serde(default = "default_medium_min_score_boost")]
    pub medium_min_score_boost: f64,
    #[serde(default = "default_large_min_score_boost")]
    pub large_min_score_boost: f64,
}

fn default_small_ceiling() -> f64 {
    1_000.0
}
fn default_medium_ceiling() -> f64 {
    10_000.0
}
fn default_small_risk_pct() -> f64 {
    1.0
}
fn default_medium_risk_pct() -> f64 {
    1.5
}
fn default_large_risk_pct() -> f64 {
    2.0
}

// Smaller accounts trade smaller, tighter-banded size; larger accounts get
// wider bands, more concurrent slots, and looser per-trade ATR boosts since
// a single trade is a smaller fraction of equity.
fn default_small_base_position_usd() -> f64 {
    50.0
}
fn default_medium_base_position_usd() -> f64 {
    300.0
}
fn default_large_base_position_usd() -> f64 {
    1_500.0
}
fn default_small_min_position_usd() -> f64 {
    10.0
}
fn default_medium_min_position_usd() -> f64 {
    50.0
}
fn default_large_min_position_usd() -> f64 {
    200.0
}
fn default_small_max_position_usd() -> f64 {
    200.0
}
fn default_medium_max_position_usd() -> f64 {
    2_000.0
}
fn default_large_max_position_usd() -> f64 {
    20_000.0
}
fn default_small_max_concurrent() -> u32 {
    2
}
fn default_medium_max_concurrent() -> u32 {
    3
}
fn default_large_max_concurrent() -> u32 {
    5
}
fn default_small_tp_atr_boost() -> f64 {
    1.0
}
fn default_medium_tp_atr_boost() -> f64 {
    1.1
}
fn default_large_tp_atr_boost() -> f64 {
    1.25
}
fn default_small_sl_atr_boost() -> f64 {
    1.0
}
fn default_medium_sl_atr_boost() -> f64 {
    1.0
}
fn default_large_sl_atr_boost() -> f64 {
    1.1
}
fn default_small_ph_multiplier() -> f64 {
    0.8
}
fn default_medium_ph_multiplier() -> f64 {
    1.0
}
fn default_large_ph_multiplier() -> f64 {
    1.3
}
fn default_small_min_score_boost() -> f64 {
    0.0
}
fn default_medium_min_score_boost() -> f64 {
    0.0
}
fn default_large_min_score_boost() -> f64 {
    0.05
}

impl Default for BalanceProfileConfig {
    fn default() -> Self {
        Self {
            small_ceiling_usd: default_small_ceiling(),
            medium_ceiling_usd: default_medium_ceiling(),
            small_risk_pct: default_small_risk_pct(),
            medium_risk_pct: default_medium_risk_pct(),
            large_risk_pct: default_large_risk_pct(),
            small_base_position_usd: default_small_base_position_usd(),
            medium_base_position_usd: default_medium_base_position_usd(),
            large_base_position_usd: default_large_base_position_usd(),
            small_min_position_usd: default_small_min_position_usd(),
            medium_min_position_usd: default_medium_min_position_usd(),
            large_min_position_usd: default_large_min_position_usd(),
            small_max_position_usd: default_small_max_position_usd(),
            medium_max_position_usd: default_medium_max_position_usd(),
            large_max_position_usd: default_large_max_position_usd(),
            small_max_concurrent: default_small_max_concurrent(),
            medium_max_concurrent: default_medium_max_concurrent(),
            large_max_concurrent: default_large_max_concurrent(),
            small_tp_atr_boost: default_small_tp_atr_boost(),
            medium_tp_atr_boost: default_medium_tp_atr_boost(),
            large_tp_atr_boost: default_large_tp_atr_boost(),
            small_sl_atr_boost: default_small_sl_atr_boost(),
            medium_sl_atr_boost: default_medium_sl_atr_boost(),
            large_sl_atr_boost: default_large_sl_atr_boost(),
            small_ph_multiplier: default_small_ph_multiplier(),
            medium_ph_multiplier: default_medium_ph_multiplier(),
            large_ph_multiplier: default_large_ph_multiplier(),
            small_min_score_boost: default_small_min_score_boost(),
            medium_min_score_boost: default_medium_min_score_boost(),
            large_min_score_boost: default_large_min_score_boost(),
        }
    }
}

impl BalanceProfileConfig {
    /// Each profile's min/max position band must be non-empty, or sizing
    /// would have no valid output to clamp into.
    fn validate(&self) -> Result<()> {
        let bands = [
            ("small", self.small_min_position_usd, self.small_max_position_usd),
            ("medium", self.medium_min_position_usd, self.medium_max_position_usd),
            ("large", self.large_min_position_usd, self.large_max_position_usd),
        ];
        for (name, min, max) in bands {
            if min > max {
                anyhow::bail!("balance_profiles.{name}: min_position_usd ({min}) exceeds max_position_usd ({max})");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Adaptive regime detection (C3)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveRegimeConfig {
    #[serde(default = "default_adx_trend_threshold")]
    pub adx_trend_threshold: f64,
    #[serde(default = "default_adx_range_threshold")]
    pub adx_range_threshold: f64,
    #[serde(default = "default_bbw_choppy_threshold")]
    pub bbw_choppy_threshold: f64,
    /// Number of consecutive confirming bars required before a regime
    /// transition is accepted (hysteresis against flip-flopping).
    #[serde(default = "default_hysteresis_bars")]
    pub hysteresis_bars: u32,
}

fn default_adx_trend_threshold() -> f64 {
    25.0
}
fn default_adx_range_threshold() -> f64 {
    20.0
}
fn default_bbw_choppy_threshold() -> f64 {
    1.5
}
fn default_hysteresis_bars() -> u32 {
    3
}

impl Default for AdaptiveRegimeConfig {
    fn default() -> Self {
        Self {
            adx_trend_threshold: default_adx_trend_threshold(),
            adx_range_threshold: default_adx_range_threshold(),
            bbw_choppy_threshold: default_bbw_choppy_threshold(),
            hysteresis_bars: default_hysteresis_bars(),
        }
    }
}

// =============================================================================
// RSI adaptive-threshold generator config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RsiConfig {
    #[serde(default = "default_rsi_period")]
    pub period: usize,
    #[serde(default = "default_rsi_adaptive")]
    pub adaptive: bool,
    #[serde(default = "default_rsi_oversold_base")]
    pub oversold_base: f64,
    #[serde(default = "default_rsi_overbought_base")]
    pub overbought_base: f64,
}

fn default_rsi_period() -> usize {
    14
}
fn default_rsi_adaptive() -> bool {
    true
}
fn default_rsi_oversold_base() -> f64 {
    30.0
}
fn default_rsi_overbought_base() -> f64 {
    70.0
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: default_rsi_period(),
            adaptive: default_rsi_adaptive(),
            oversold_base: default_rsi_oversold_base(),
            overbought_base: default_rsi_overbought_base(),
        }
    }
}

// =============================================================================
// Filter stack toggles
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(default = "default_true")]
    pub enable_htf_gate: bool,
    #[serde(default = "default_true")]
    pub enable_score_momentum: bool,
    #[serde(default = "default_true")]
    pub enable_ofip: bool,
    #[serde(default = "default_true")]
    pub enable_cusum: bool,
    #[serde(default = "default_true")]
    pub enable_absorption: bool,
    #[serde(default = "default_true")]
    pub enable_funding_rate_filter: bool,
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,
}

fn default_true() -> bool {
    true
}
fn default_max_spread_bps() -> f64 {
    15.0
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enable_htf_gate: true,
            enable_score_momentum: true,
            enable_ofip: true,
            enable_cusum: true,
            enable_absorption: true,
            enable_funding_rate_filter: true,
            max_spread_bps: default_max_spread_bps(),
        }
    }
}

// =============================================================================
// Data fallback chain
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Age beyond which a cached price is considered stale and the next
    /// fallback source is tried.
    #[serde(default = "default_staleness_ms")]
    pub staleness_ms: u64,
    /// Max candles retained per symbol/interval ring buffer.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,
}

fn default_staleness_ms() -> u64 {
    3_000
}
fn default_max_candles() -> usize {
    500
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            staleness_ms: default_staleness_ms(),
            max_candles: default_max_candles(),
        }
    }
}

// =============================================================================
// Connection quality monitor (C13)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionQualityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum time a reshaped parameter set must hold before reverting,
    /// preventing thrash on noisy latency samples.
    #[serde(default = "default_hysteresis_secs")]
    pub hysteresis_secs: u64,
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
    #[serde(default = "default_poor_latency_ms")]
    pub poor_latency_ms: u64,
}

fn default_hysteresis_secs() -> u64 {
    300
}
fn default_degraded_latency_ms() -> u64 {
    250
}
fn default_poor_latency_ms() -> u64 {
    750
}

impl Default for ConnectionQualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hysteresis_secs: default_hysteresis_secs(),
            degraded_latency_ms: default_degraded_latency_ms(),
            poor_latency_ms: default_poor_latency_ms(),
        }
    }
}

// =============================================================================
// Fee schedule
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeeConfig {
    #[serde(default = "default_maker_fee_rate")]
    pub maker_fee_rate: f64,
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: f64,
}

fn default_maker_fee_rate() -> f64 {
    0.0002
}
fn default_taker_fee_rate() -> f64 {
    0.0005
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_fee_rate: default_maker_fee_rate(),
            taker_fee_rate: default_taker_fee_rate(),
        }
    }
}

// =============================================================================
// Top-level runtime config
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    #[serde(default)]
    pub strategy_params: StrategyParams,
    #[serde(default)]
    pub balance_profiles: BalanceProfileConfig,
    #[serde(default)]
    pub adaptive_regime: AdaptiveRegimeConfig,
    #[serde(default)]
    pub rsi: RsiConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub connection_quality: ConnectionQualityConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC-USDT-SWAP".to_string(),
        "ETH-USDT-SWAP".to_string(),
        "SOL-USDT-SWAP".to_string(),
    ]
}
fn default_max_concurrent_positions() -> u32 {
    3
}
fn default_max_daily_loss_pct() -> f64 {
    3.0
}
fn default_max_consecutive_losses() -> u32 {
    5
}
fn default_max_trades_per_day() -> u32 {
    50
}
fn default_max_drawdown_pct() -> f64 {
    8.0
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::default(),
            account_mode: AccountMode::default(),
            symbols: default_symbols(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_trades_per_day: default_max_trades_per_day(),
            max_drawdown_pct: default_max_drawdown_pct(),
            strategy_params: StrategyParams::default(),
            balance_profiles: BalanceProfileConfig::default(),
            adaptive_regime: AdaptiveRegimeConfig::default(),
            rsi: RsiConfig::default(),
            filters: FilterConfig::default(),
            data: DataConfig::default(),
            connection_quality: ConnectionQualityConfig::default(),
            fees: FeeConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist. A malformed file (bad JSON, unknown key) is a hard
    /// error — we do not want to silently start with defaults when the
    /// operator thinks their config applied.
    pub fn load(path: &str) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse runtime config at {}", path))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e).with_context(|| format!("failed to read runtime config at {}", path)),
        };
        config.validate()?;
        Ok(config)
    }

    /// Cross-field checks that `#[serde(default)]` alone can't express.
    pub fn validate(&self) -> Result<()> {
        self.balance_profiles.validate()
    }

    /// Persist configuration atomically: write to a temp file, then rename
    /// over the destination so a crash mid-write never corrupts the file
    /// that's read on next startup.
    pub fn save(&self, path: &str) -> Result<()> {
        let tmp_path = format!("{}.tmp", path);
        let json = serde_json::to_string_pretty(self).context("failed to serialize runtime config")?;
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write temp config file {}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} to {}", tmp_path, path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_symbols() {
        let config = RuntimeConfig::default();
        assert!(config.symbols.contains(&"BTC-USDT-SWAP".to_string()));
        assert_eq!(config.trading_mode, TradingMode::Paused);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let config = RuntimeConfig::load("/tmp/nonexistent_scalp_engine_config_xyz.json").unwrap();
        assert_eq!(config.max_concurrent_positions, 3);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let path = "/tmp/scalp_engine_test_config_roundtrip.json";
        let mut config = RuntimeConfig::default();
        config.max_trades_per_day = 77;
        config.save(path).unwrap();
        let loaded = RuntimeConfig::load(path).unwrap();
        assert_eq!(loaded.max_trades_per_day, 77);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let bad_json = r#"{"not_a_real_field": true}"#;
        let result: Result<RuntimeConfig, _> = serde_json::from_str(bad_json);
        assert!(result.is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"max_trades_per_day": 10}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_trades_per_day, 10);
        assert_eq!(config.max_concurrent_positions, 3);
    }

    #[test]
    fn default_config_validates() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }

    #[test]
    fn balance_profile_min_exceeding_max_fails_validation() {
        let mut config = RuntimeConfig::default();
        config.balance_profiles.small_min_position_usd = 500.0;
        config.balance_profiles.small_max_position_usd = 200.0;
        assert!(config.validate().is_err());
    }
}
