// =============================================================================
// Reconciliation Engine — compare internal state against the exchange
// =============================================================================
//
// SAFETY POLICY: this module logs warnings for any drift it discovers but will
// **never** automatically cancel orders or close positions on the exchange.
// A human operator or explicit admin action must resolve discrepancies.
// =============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::exchange::ExchangeClient;
use crate::types::BalanceInfo;

/// Quote currency margin is held in for every perpetual swap this engine
/// trades. OKX reports balances per settlement currency, not per symbol.
const MARGIN_CCY: &str = "USDT";

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Number of internal positions that matched an exchange order.
    pub positions_matched: u32,
    /// Exchange orders that have no corresponding internal position.
    pub orphan_orders: u32,
    /// Whether the balance snapshot drifted from what we expect.
    pub balance_drift: bool,
    /// ISO-8601 timestamp of this reconciliation run.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Run one reconciliation cycle.
///
/// 1. Fetch open orders from the exchange.
/// 2. Compare them against internally tracked positions.
/// 3. Refresh the balance cache from the exchange.
pub async fn reconcile_once(state: &AppState, exchange: &dyn ExchangeClient) -> Result<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    // -----------------------------------------------------------------
    // 1. Fetch exchange open orders
    // -----------------------------------------------------------------
    let exchange_orders = exchange.get_open_orders(None).await.context("reconcile: failed to fetch open orders")?;

    debug!(exchange_order_count = exchange_orders.len(), "exchange orders fetched");

    let exchange_symbols: HashSet<String> = exchange_orders.iter().filter_map(|o| o["instId"].as_str().map(|s| s.to_string())).collect();

    // -----------------------------------------------------------------
    // 2. Compare with internal positions
    // -----------------------------------------------------------------
    let open_positions = state.positions.get_open_positions();
    let mut matched: u32 = 0;

    for pos in &open_positions {
        if exchange_symbols.contains(&pos.symbol) {
            matched += 1;
            debug!(position_id = %pos.id, symbol = %pos.symbol, "position matched with exchange order");
        } else {
            warn!(position_id = %pos.id, symbol = %pos.symbol, "internal position has NO matching exchange order — possible drift");
        }
    }

    let internal_symbols: HashSet<String> = open_positions.iter().map(|p| p.symbol.clone()).collect();

    let mut orphan_count: u32 = 0;
    for order in &exchange_orders {
        if let Some(sym) = order["instId"].as_str() {
            if !internal_symbols.contains(sym) {
                orphan_count += 1;
                warn!(
                    symbol = sym,
                    order_id = %order.get("ordId").and_then(|v| v.as_str()).unwrap_or("?"),
                    "orphan exchange order detected — no matching internal position"
                );
            }
        }
    }

    // -----------------------------------------------------------------
    // 3. Update balances
    // -----------------------------------------------------------------
    let balance_drift = refresh_balances(exchange, state).await?;

    let result =
        ReconcileResult { positions_matched: matched, orphan_orders: orphan_count, balance_drift, timestamp: now.clone() };

    info!(
        positions_matched = matched,
        orphan_orders = orphan_count,
        balance_drift,
        timestamp = %now,
        "reconciliation cycle completed"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Balance refresh
// ---------------------------------------------------------------------------

/// Fetch the margin balance from the exchange and update the shared cache.
///
/// Returns `true` if the balance changed significantly (> 0.01 % relative
/// difference), indicating drift.
async fn refresh_balances(exchange: &dyn ExchangeClient, state: &AppState) -> Result<bool> {
    let free = exchange.get_balance(MARGIN_CCY).await.context("reconcile: failed to fetch margin balance")?;
    let new_balances = vec![BalanceInfo { asset: MARGIN_CCY.to_string(), free, locked: 0.0 }];

    let drift = {
        let old = state.balances.read();
        detect_balance_drift(&old, &new_balances)
    };

    if drift {
        warn!("balance drift detected during reconciliation");
    } else {
        debug!("balances refreshed — no significant drift");
    }

    *state.balances.write() = new_balances;

    Ok(drift)
}

/// Compare two balance snapshots and return `true` if any asset changed by
/// more than a small relative threshold.
fn detect_balance_drift(old: &[BalanceInfo], new: &[BalanceInfo]) -> bool {
    use std::collections::HashMap;

    if old.is_empty() {
        return false;
    }

    let old_map: HashMap<&str, (f64, f64)> = old.iter().map(|b| (b.asset.as_str(), (b.free, b.locked))).collect();

    for nb in new {
        if let Some(&(old_free, old_locked)) = old_map.get(nb.asset.as_str()) {
            let total_old = old_free + old_locked;
            let total_new = nb.free + nb.locked;
            if total_old > 0.0 {
                let pct_change = ((total_new - total_old) / total_old).abs();
                if pct_change > 0.0001 {
                    debug!(asset = %nb.asset, old_total = total_old, new_total = total_new, pct_change = pct_change * 100.0, "balance drift for asset");
                    return true;
                }
            } else if total_new > 0.0 {
                return true;
            }
        } else {
            return true;
        }
    }

    let new_map: HashMap<&str, ()> = new.iter().map(|b| (b.asset.as_str(), ())).collect();
    for ob in old {
        if !new_map.contains_key(ob.asset.as_str()) && (ob.free + ob.locked) > 0.0 {
            debug!(asset = %ob.asset, "asset disappeared from balances");
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_drift_on_first_run_with_empty_history() {
        let new = vec![BalanceInfo { asset: "USDT".into(), free: 1000.0, locked: 0.0 }];
        assert!(!detect_balance_drift(&[], &new));
    }

    #[test]
    fn detects_drift_above_threshold() {
        let old = vec![BalanceInfo { asset: "USDT".into(), free: 1000.0, locked: 0.0 }];
        let new = vec![BalanceInfo { asset: "USDT".into(), free: 900.0, locked: 0.0 }];
        assert!(detect_balance_drift(&old, &new));
    }

    #[test]
    fn ignores_negligible_change() {
        let old = vec![BalanceInfo { asset: "USDT".into(), free: 1000.0, locked: 0.0 }];
        let new = vec![BalanceInfo { asset: "USDT".into(), free: 1000.001, locked: 0.0 }];
        assert!(!detect_balance_drift(&old, &new));
    }
}
