// =============================================================================
// Entry Executor — turns an admitted proposal into a filled, tracked position
// =============================================================================
//
// Order of operations for one entry attempt:
//
//   1. Size the position (risk engine) and run the four-check admission gate.
//   2. Reserve a pending slot in the position registry (per-symbol exclusive).
//   3. Make sure leverage is set for the symbol; OKX rejects the first order
//      on a fresh symbol with 50004/50067 until this has run at least once,
//      so a failed order that classifies as "leverage not set" triggers one
//      retry after calling set_leverage again.
//   4. Place the entry order; a 51006 ("price outside limit") retries with a
//      nudged limit price up to a small retry cap instead of failing outright.
//   5. On fill, snapshot TP/SL into the registry and flip Pending -> Open.
//      On any unrecoverable failure, release the pending slot.

use std::sync::Arc;

use tracing::{info, warn};

use crate::balance_profile::ProfileParams;
use crate::errors::EngineError;
use crate::exchange::client::OkxApiError;
use crate::exchange::{ExchangeClient, OrderRequest, OrderType};
use crate::position_registry::{PositionRegistry, PositionSnapshot};
use crate::risk::RiskEngine;
use crate::signal_pipeline::TradeProposal;
use crate::types::{BalanceProfile, Regime};

const MAX_LEVERAGE_RETRIES: u32 = 1;
const MAX_REPRICE_RETRIES: u32 = 3;
const REPRICE_NUDGE_PCT: f64 = 0.05;

pub struct EntryExecutor {
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<PositionRegistry>,
    risk: Arc<RiskEngine>,
}

impl EntryExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, positions: Arc<PositionRegistry>, risk: Arc<RiskEngine>) -> Self {
        Self { exchange, positions, risk }
    }

    /// Size, admit, and execute one trade proposal. `margin_available` is the
    /// current free balance in quote currency; `leverage` is the leverage to
    /// request for this symbol.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        proposal: &TradeProposal,
        regime: Regime,
        balance_profile: BalanceProfile,
        profile_params: &ProfileParams,
        risk_pct: f64,
        leverage: u32,
        margin_available: f64,
        max_concurrent_positions: usize,
    ) -> Result<PositionSnapshot, EngineError> {
        let sl_distance = (proposal.entry_price - proposal.stop_loss).abs();
        let quantity = self.risk.compute_position_size(
            &proposal.symbol,
            regime,
            balance_profile,
            profile_params,
            risk_pct,
            sl_distance,
            proposal.entry_price,
        )?;

        if quantity <= 0.0 {
            return Err(EngineError::DataInvalid {
                symbol: proposal.symbol.clone(),
                reason: "computed quantity is zero".to_string(),
            });
        }

        let notional = quantity * proposal.entry_price;
        let margin_required = notional / leverage.max(1) as f64;

        self.risk.check_admission(
            self.positions.has_live_position(&proposal.symbol),
            self.positions.open_position_count(),
            max_concurrent_positions,
            margin_required,
            margin_available,
        )?;

        let record = self
            .positions
            .create_pending(&proposal.symbol, proposal.side, quantity, leverage)
            .ok_or_else(|| EngineError::InvariantViolated(format!("{} already has a live position", proposal.symbol)))?;

        match self.place_with_retries(proposal, quantity, leverage).await {
            Ok(fill) => {
                let confirmed = self.positions.confirm_open(
                    &record.id,
                    fill.avg_price,
                    fill.filled_qty,
                    proposal.stop_loss,
                    proposal.take_profit_1,
                    proposal.take_profit_2,
                );
                if !confirmed {
                    return Err(EngineError::InvariantViolated(format!(
                        "confirm_open failed for {} after a successful fill",
                        record.id
                    )));
                }
                info!(id = %record.id, symbol = %proposal.symbol, side = %proposal.side, entry_price = fill.avg_price, quantity = fill.filled_qty, "entry filled");
                Ok(record.snapshot())
            }
            Err(e) => {
                self.positions.cancel_pending(&record.id, &e.to_string());
                warn!(id = %record.id, symbol = %proposal.symbol, error = %e, "entry execution failed, pending slot released");
                Err(EngineError::ExchangeTransient { op: "entry".to_string(), detail: e.to_string() })
            }
        }
    }

    async fn place_with_retries(
        &self,
        proposal: &TradeProposal,
        quantity: f64,
        leverage: u32,
    ) -> anyhow::Result<crate::exchange::OrderResult> {
        self.exchange.set_leverage(&proposal.symbol, leverage).await?;

        let mut price = proposal.entry_price;
        let mut leverage_retries = 0u32;

        for attempt in 0..=MAX_REPRICE_RETRIES {
            let req = OrderRequest {
                symbol: proposal.symbol.clone(),
                side: proposal.side,
                order_type: OrderType::Limit,
                quantity,
                price: Some(price),
                reduce_only: false,
                client_order_id: None,
            };

            match self.exchange.place_order(req).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if let Some(api_err) = e.downcast_ref::<OkxApiError>() {
                        if api_err.is_leverage_not_set() && leverage_retries < MAX_LEVERAGE_RETRIES {
                            leverage_retries += 1;
                            warn!(symbol = %proposal.symbol, "leverage not set on order attempt, retrying after re-setting leverage");
                            self.exchange.set_leverage(&proposal.symbol, leverage).await?;
                            continue;
                        }
                        if api_err.is_reprice_required() && attempt < MAX_REPRICE_RETRIES {
                            price = nudge_price(price, proposal.side);
                            warn!(symbol = %proposal.symbol, attempt, new_price = price, "price outside limit, repricing and retrying");
                            continue;
                        }
                    }
                    return Err(e);
                }
            }
        }

        anyhow::bail!("exhausted reprice retries for {}", proposal.symbol)
    }
}

/// Nudge a limit price further in the direction that's more likely to clear
/// OKX's price-band check: higher for a buy, lower for a sell.
fn nudge_price(price: f64, side: crate::types::Side) -> f64 {
    match side {
        crate::types::Side::Long => price * (1.0 + REPRICE_NUDGE_PCT / 100.0),
        crate::types::Side::Short => price * (1.0 - REPRICE_NUDGE_PCT / 100.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::risk::RiskEngine;
    use crate::types::Side;

    fn profile() -> ProfileParams {
        ProfileParams {
            base_position_usd: 500.0,
            min_position_usd: 10.0,
            max_position_usd: 5_000.0,
            max_concurrent: 3,
            tp_atr_boost: 1.0,
            sl_atr_boost: 1.0,
            ph_multiplier: 1.0,
            min_score_boost: 0.0,
        }
    }

    fn proposal(symbol: &str, side: Side, entry: f64, sl: f64, tp1: f64, tp2: f64) -> TradeProposal {
        TradeProposal {
            symbol: symbol.to_string(),
            side,
            entry_price: entry,
            stop_loss: sl,
            take_profit_1: tp1,
            take_profit_2: tp2,
            raw_score: 0.3,
            attenuated_score: 0.3,
            regime: "ranging".to_string(),
        }
    }

    #[tokio::test]
    async fn successful_entry_opens_a_position() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        exchange.set_mark_price(100.0);
        let positions = Arc::new(PositionRegistry::new());
        let risk = Arc::new(RiskEngine::new(10_000.0, 5.0, 3, 10.0, 20));
        let executor = EntryExecutor::new(exchange.clone(), positions.clone(), risk);

        let p = proposal("BTC-USDT-SWAP", Side::Long, 100.0, 98.0, 103.0, 106.0);
        let result = executor.execute(&p, Regime::Ranging, BalanceProfile::Medium, &profile(), 1.0, 5, 10_000.0, 5).await;

        let snap = result.expect("entry should succeed");
        assert_eq!(snap.symbol, "BTC-USDT-SWAP");
        assert_eq!(positions.open_position_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_symbol_is_rejected_before_touching_the_exchange() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        exchange.set_mark_price(100.0);
        let positions = Arc::new(PositionRegistry::new());
        let risk = Arc::new(RiskEngine::new(10_000.0, 5.0, 3, 10.0, 20));
        positions.create_pending("BTC-USDT-SWAP", Side::Long, 0.1, 5).unwrap();

        let executor = EntryExecutor::new(exchange.clone(), positions.clone(), risk);
        let p = proposal("BTC-USDT-SWAP", Side::Long, 100.0, 98.0, 103.0, 106.0);
        let result = executor.execute(&p, Regime::Ranging, BalanceProfile::Medium, &profile(), 1.0, 5, 10_000.0, 5).await;

        assert!(result.is_err());
        assert_eq!(exchange.orders_placed_count(), 0);
    }

    #[tokio::test]
    async fn zero_stop_distance_is_rejected_by_sizing() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        let positions = Arc::new(PositionRegistry::new());
        let risk = Arc::new(RiskEngine::new(10_000.0, 5.0, 3, 10.0, 20));
        let executor = EntryExecutor::new(exchange, positions, risk);

        let p = proposal("BTC-USDT-SWAP", Side::Long, 100.0, 100.0, 103.0, 106.0);
        let result = executor.execute(&p, Regime::Ranging, BalanceProfile::Medium, &profile(), 1.0, 5, 10_000.0, 5).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn undersized_notional_is_rejected_below_exchange_minimum() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        exchange.set_mark_price(100.0);
        let positions = Arc::new(PositionRegistry::new());
        let risk = Arc::new(RiskEngine::new(10_000.0, 5.0, 3, 10.0, 20));
        let executor = EntryExecutor::new(exchange.clone(), positions.clone(), risk);

        let tiny_profile = ProfileParams {
            base_position_usd: 5.0,
            min_position_usd: 1.0,
            max_position_usd: 5.0,
            max_concurrent: 3,
            tp_atr_boost: 1.0,
            sl_atr_boost: 1.0,
            ph_multiplier: 1.0,
            min_score_boost: 0.0,
        };
        let p = proposal("BTC-USDT-SWAP", Side::Long, 100.0, 98.0, 103.0, 106.0);
        let result = executor.execute(&p, Regime::Ranging, BalanceProfile::Small, &tiny_profile, 0.01, 5, 10_000.0, 5).await;
        assert!(matches!(result, Err(EngineError::SizeBelowMinimum { .. })));
    }
}
