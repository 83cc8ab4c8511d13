// =============================================================================
// Exit Executor — at-most-once position close with fee and PnL accounting
// =============================================================================
//
// `begin_close` on the position registry is the only thing standing between
// "exactly one" and "two orders for the same position" when a stop-loss tick
// and a lifecycle-manager tick race on the same symbol. Everything here
// assumes that race has already been resolved by the time `close` is called
// and focuses on getting the reduce-only order filled and the ledger right.

use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::EngineError;
use crate::exchange::{ExchangeClient, OrderRequest, OrderType};
use crate::position_registry::PositionRegistry;
use crate::runtime_config::FeeConfig;

pub struct ExitExecutor {
    exchange: Arc<dyn ExchangeClient>,
    positions: Arc<PositionRegistry>,
    fees: FeeConfig,
}

/// Outcome of a completed close.
#[derive(Debug, Clone)]
pub struct ExitResult {
    pub position_id: String,
    pub close_price: f64,
    pub fees_paid: f64,
    pub net_pnl: f64,
    pub reason: String,
}

impl ExitExecutor {
    pub fn new(exchange: Arc<dyn ExchangeClient>, positions: Arc<PositionRegistry>, fees: FeeConfig) -> Self {
        Self { exchange, positions, fees }
    }

    /// Close `position_id` at market, using `taker` to pick the fee rate
    /// (reduce-only exits are taker fills unless the caller knows otherwise).
    pub async fn close(&self, position_id: &str, reason: &str, taker: bool) -> Result<ExitResult, EngineError> {
        let record = self
            .positions
            .begin_close(position_id)
            .ok_or_else(|| EngineError::CloseFailed { position_id: position_id.to_string(), detail: "lost the at-most-once close race or position not open".to_string() })?;

        let exit_side = record.side.opposite();
        let quantity = record.quantity();

        let req = OrderRequest::market(record.symbol.clone(), exit_side, quantity).reduce_only();

        let fill = match self.exchange.place_order(req).await {
            Ok(result) => result,
            Err(e) => {
                warn!(position_id, symbol = %record.symbol, error = %e, "exit order failed -- position stuck in Closing, requires manual reconciliation");
                return Err(EngineError::CloseFailed { position_id: position_id.to_string(), detail: e.to_string() });
            }
        };

        let fee_rate = if taker { self.fees.taker_fee_rate } else { self.fees.maker_fee_rate };
        let fees_paid = fill.avg_price * fill.filled_qty * fee_rate;

        let net_pnl = self
            .positions
            .finalize_close(position_id, fill.avg_price, reason, fees_paid)
            .ok_or_else(|| EngineError::CloseFailed { position_id: position_id.to_string(), detail: "finalize_close found the position not in Closing state".to_string() })?;

        info!(position_id, symbol = %record.symbol, close_price = fill.avg_price, fees_paid, net_pnl, reason, "position closed");

        self.positions.evict_closed(position_id);

        Ok(ExitResult {
            position_id: position_id.to_string(),
            close_price: fill.avg_price,
            fees_paid,
            net_pnl,
            reason: reason.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchangeClient;
    use crate::types::Side;

    async fn opened_position(positions: &Arc<PositionRegistry>, symbol: &str, side: Side, entry: f64) -> String {
        let record = positions.create_pending(symbol, side, 1.0, 5).unwrap();
        positions.confirm_open(&record.id, entry, 1.0, entry - 5.0, entry + 5.0, entry + 10.0);
        record.id.clone()
    }

    #[tokio::test]
    async fn close_computes_net_pnl_after_fees() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        exchange.set_mark_price(110.0);
        let positions = Arc::new(PositionRegistry::new());
        let id = opened_position(&positions, "BTC-USDT-SWAP", Side::Long, 100.0).await;

        let executor = ExitExecutor::new(exchange.clone(), positions.clone(), FeeConfig::default());
        let result = executor.close(&id, "take_profit", true).await.unwrap();

        assert!((result.close_price - 110.0).abs() < 1e-9);
        assert!(result.net_pnl > 0.0);
        assert!(result.fees_paid > 0.0);
    }

    #[tokio::test]
    async fn closing_twice_only_succeeds_once() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        exchange.set_mark_price(110.0);
        let positions = Arc::new(PositionRegistry::new());
        let id = opened_position(&positions, "BTC-USDT-SWAP", Side::Long, 100.0).await;

        let executor = ExitExecutor::new(exchange.clone(), positions.clone(), FeeConfig::default());
        let first = executor.close(&id, "take_profit", true).await;
        let second = executor.close(&id, "take_profit", true).await;

        assert!(first.is_ok());
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn nonexistent_position_fails_cleanly() {
        let exchange = Arc::new(MockExchangeClient::new(10_000.0));
        let positions = Arc::new(PositionRegistry::new());
        let executor = ExitExecutor::new(exchange, positions, FeeConfig::default());
        let result = executor.close("does-not-exist", "manual", true).await;
        assert!(result.is_err());
    }
}
