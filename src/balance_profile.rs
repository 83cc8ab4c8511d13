// =============================================================================
// Balance Profile Manager
// =============================================================================
//
// Classifies the account's current equity into Small / Medium / Large so the
// risk controller and filter stack can scale their behavior to account
// size — a $200 account and a $50,000 account should not run the same risk
// percentage or tolerate the same spread.

use crate::runtime_config::BalanceProfileConfig;
use crate::types::BalanceProfile;

pub fn classify_balance(equity: f64, config: &BalanceProfileConfig) -> BalanceProfile {
    if equity < config.small_ceiling_usd {
        BalanceProfile::Small
    } else if equity < config.medium_ceiling_usd {
        BalanceProfile::Medium
    } else {
        BalanceProfile::Large
    }
}

/// Risk percentage (per-trade, as a percent of equity) configured for
/// `profile`.
pub fn risk_pct_for(profile: BalanceProfile, config: &BalanceProfileConfig) -> f64 {
    match profile {
        BalanceProfile::Small => config.small_risk_pct,
        BalanceProfile::Medium => config.medium_risk_pct,
        BalanceProfile::Large => config.large_risk_pct,
    }
}

/// The rest of a balance profile's per-trade parameters, pulled out of the
/// flat config into one struct so callers don't scatter `match profile`
/// arms across the risk and lifecycle code.
#[derive(Debug, Clone, Copy)]
pub struct ProfileParams {
    pub base_position_usd: f64,
    pub min_position_usd: f64,
    pub max_position_usd: f64,
    pub max_concurrent: u32,
    pub tp_atr_boost: f64,
    pub sl_atr_boost: f64,
    pub ph_multiplier: f64,
    pub min_score_boost: f64,
}

pub fn profile_params_for(profile: BalanceProfile, config: &BalanceProfileConfig) -> ProfileParams {
    match profile {
        BalanceProfile::Small => ProfileParams {
            base_position_usd: config.small_base_position_usd,
            min_position_usd: config.small_min_position_usd,
            max_position_usd: config.small_max_position_usd,
            max_concurrent: config.small_max_concurrent,
            tp_atr_boost: config.small_tp_atr_boost,
            sl_atr_boost: config.small_sl_atr_boost,
            ph_multiplier: config.small_ph_multiplier,
            min_score_boost: config.small_min_score_boost,
        },
        BalanceProfile::Medium => ProfileParams {
            base_position_usd: config.medium_base_position_usd,
            min_position_usd: config.medium_min_position_usd,
            max_position_usd: config.medium_max_position_usd,
            max_concurrent: config.medium_max_concurrent,
            tp_atr_boost: config.medium_tp_atr_boost,
            sl_atr_boost: config.medium_sl_atr_boost,
            ph_multiplier: config.medium_ph_multiplier,
            min_score_boost: config.medium_min_score_boost,
        },
        BalanceProfile::Large => ProfileParams {
            base_position_usd: config.large_base_position_usd,
            min_position_usd: config.large_min_position_usd,
            max_position_usd: config.large_max_position_usd,
            max_concurrent: config.large_max_concurrent,
            tp_atr_boost: config.large_tp_atr_boost,
            sl_atr_boost: config.large_sl_atr_boost,
            ph_multiplier: config.large_ph_multiplier,
            min_score_boost: config.large_min_score_boost,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BalanceProfileConfig {
        BalanceProfileConfig::default()
    }

    #[test]
    fn classifies_small_below_ceiling() {
        assert_eq!(classify_balance(500.0, &cfg()), BalanceProfile::Small);
    }

    #[test]
    fn classifies_medium_between_ceilings() {
        assert_eq!(classify_balance(5000.0, &cfg()), BalanceProfile::Medium);
    }

    #[test]
    fn classifies_large_above_medium_ceiling() {
        assert_eq!(classify_balance(50_000.0, &cfg()), BalanceProfile::Large);
    }

    #[test]
    fn risk_pct_matches_profile() {
        let config = cfg();
        assert_eq!(risk_pct_for(BalanceProfile::Small, &config), config.small_risk_pct);
        assert_eq!(risk_pct_for(BalanceProfile::Large, &config), config.large_risk_pct);
    }

    #[test]
    fn profile_params_pulls_matching_band() {
        let config = cfg();
        let small = profile_params_for(BalanceProfile::Small, &config);
        assert_eq!(small.min_position_usd, config.small_min_position_usd);
        assert_eq!(small.max_position_usd, config.small_max_position_usd);
        let large = profile_params_for(BalanceProfile::Large, &config);
        assert_eq!(large.ph_multiplier, config.large_ph_multiplier);
        assert!(large.max_position_usd > small.max_position_usd);
    }
}
