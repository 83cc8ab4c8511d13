// =============================================================================
// Exchange Client Abstraction
// =============================================================================
//
// `ExchangeClient` is the seam between the engine and whatever venue it
// trades against. The engine code (entry/exit executors, reconciliation)
// only ever depends on this trait; `OkxClient` is the production
// implementation and `MockExchangeClient` backs the test suite.

pub mod client;
pub mod mock;

pub use client::OkxClient;
pub use mock::MockExchangeClient;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::market_data::Candle;
use crate::types::Side;

/// Order type accepted by `place_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

/// A request to open or close size on an instrument.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub reduce_only: bool,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Result of a filled (or accepted) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub filled_qty: f64,
    pub avg_price: f64,
    pub status: String,
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Free balance of `ccy` (e.g. "USDT") in the trading account.
    async fn get_balance(&self, ccy: &str) -> Result<f64>;

    /// Set leverage for `symbol`. Must be called before the first order on a
    /// symbol in a session — OKX rejects orders placed before leverage is
    /// set with error code 50004.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn place_order(&self, req: OrderRequest) -> Result<OrderResult>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    async fn get_open_orders(&self, symbol: Option<&str>) -> Result<Vec<serde_json::Value>>;

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;

    /// Current mark price, used as one rung of the price fallback chain.
    async fn get_mark_price(&self, symbol: &str) -> Result<f64>;

    /// Current funding rate for a perpetual swap instrument.
    async fn get_funding_rate(&self, symbol: &str) -> Result<f64>;
}
