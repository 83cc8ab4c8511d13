// =============================================================================
// In-memory mock exchange client — used by tests and paper-trading mode
// =============================================================================

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ExchangeClient, OrderRequest, OrderResult};
use crate::market_data::Candle;

pub struct MockExchangeClient {
    balance: RwLock<f64>,
    mark_price: RwLock<f64>,
    funding_rate: RwLock<f64>,
    leverage_set: RwLock<std::collections::HashSet<String>>,
    orders_placed: RwLock<Vec<OrderRequest>>,
}

impl MockExchangeClient {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            balance: RwLock::new(starting_balance),
            mark_price: RwLock::new(0.0),
            funding_rate: RwLock::new(0.0),
            leverage_set: RwLock::new(std::collections::HashSet::new()),
            orders_placed: RwLock::new(Vec::new()),
        }
    }

    pub fn set_mark_price(&self, price: f64) {
        *self.mark_price.write() = price;
    }

    pub fn set_funding_rate(&self, rate: f64) {
        *self.funding_rate.write() = rate;
    }

    pub fn orders_placed_count(&self) -> usize {
        self.orders_placed.read().len()
    }

    pub fn has_leverage_set(&self, symbol: &str) -> bool {
        self.leverage_set.read().contains(symbol)
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    async fn get_balance(&self, _ccy: &str) -> Result<f64> {
        Ok(*self.balance.read())
    }

    async fn set_leverage(&self, symbol: &str, _leverage: u32) -> Result<()> {
        self.leverage_set.write().insert(symbol.to_string());
        Ok(())
    }

    async fn place_order(&self, req: OrderRequest) -> Result<OrderResult> {
        let price = req.price.unwrap_or_else(|| *self.mark_price.read());
        let order_id = Uuid::new_v4().to_string();
        self.orders_placed.write().push(req.clone());

        Ok(OrderResult {
            order_id,
            filled_qty: req.quantity,
            avg_price: price,
            status: "filled".to_string(),
        })
    }

    async fn cancel_order(&self, _symbol: &str, _order_id: &str) -> Result<()> {
        Ok(())
    }

    async fn get_open_orders(&self, _symbol: Option<&str>) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }

    async fn get_klines(&self, _symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let price = *self.mark_price.read();
        let candles = (0..limit)
            .map(|i| Candle::new(i as i64 * 60_000, price, price, price, price, 1.0, i as i64 * 60_000 + 59_999))
            .collect();
        Ok(candles)
    }

    async fn get_mark_price(&self, _symbol: &str) -> Result<f64> {
        Ok(*self.mark_price.read())
    }

    async fn get_funding_rate(&self, _symbol: &str) -> Result<f64> {
        Ok(*self.funding_rate.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;

    #[tokio::test]
    async fn mock_places_order_and_records_it() {
        let mock = MockExchangeClient::new(10_000.0);
        mock.set_mark_price(50_000.0);

        let result = mock.place_order(OrderRequest::market("BTC-USDT-SWAP", Side::Long, 0.01)).await.unwrap();
        assert!((result.avg_price - 50_000.0).abs() < 1e-9);
        assert_eq!(mock.orders_placed_count(), 1);
    }

    #[tokio::test]
    async fn mock_tracks_leverage_set() {
        let mock = MockExchangeClient::new(10_000.0);
        assert!(!mock.has_leverage_set("BTC-USDT-SWAP"));
        mock.set_leverage("BTC-USDT-SWAP", 10).await.unwrap();
        assert!(mock.has_leverage_set("BTC-USDT-SWAP"));
    }

    #[tokio::test]
    async fn mock_returns_configured_funding_rate() {
        let mock = MockExchangeClient::new(10_000.0);
        mock.set_funding_rate(0.0001);
        let rate = mock.get_funding_rate("BTC-USDT-SWAP").await.unwrap();
        assert!((rate - 0.0001).abs() < 1e-9);
    }
}
