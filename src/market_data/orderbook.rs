// =============================================================================
// Order Book Manager — Real-time orderbook aggregation
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// Manages orderbook state for multiple symbols.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, OrderBookState>>,
}

/// Orderbook state for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookState {
    pub symbol: String,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_depth: f64,
    pub ask_depth: f64,
    pub spread_bps: f64,
    pub imbalance: f64,
    pub last_update_id: u64,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Update the orderbook state for a symbol.
    pub fn update(
        &self,
        symbol: &str,
        best_bid: f64,
        best_ask: f64,
        bid_depth: f64,
        ask_depth: f64,
        update_id: u64,
    ) {
        let mid = (best_bid + best_ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            ((best_ask - best_bid) / mid) * 10_000.0
        } else {
            0.0
        };

        let total_depth = bid_depth + ask_depth;
        let imbalance = if total_depth > 0.0 {
            (bid_depth - ask_depth) / total_depth
        } else {
            0.0
        };

        let state = OrderBookState {
            symbol: symbol.to_string(),
            best_bid,
            best_ask,
            bid_depth,
            ask_depth,
            spread_bps,
            imbalance,
            last_update_id: update_id,
        };

        self.books.write().insert(symbol.to_string(), state);
    }

    /// Get the current orderbook state for a symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBookState> {
        self.books.read().get(symbol).cloned()
    }

    /// Get the spread in basis points for a symbol.
    pub fn spread_bps(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).map(|s| s.spread_bps)
    }

    /// Get the orderbook imbalance for a symbol (-1 to +1).
    pub fn imbalance(&self, symbol: &str) -> Option<f64> {
        self.books.read().get(symbol).map(|s| s.imbalance)
    }

    /// Get all tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Depth WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the OKX public WebSocket and subscribe to the `books5` channel
/// for a single instrument, feeding orderbook updates into `manager`.
///
/// OKX multiplexes all public channels over one endpoint; subscription is an
/// explicit `op: subscribe` message sent after connecting, rather than a
/// per-stream URL path.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_depth_stream(symbol: &str, manager: &Arc<OrderBookManager>) -> Result<()> {
    info!(url = OKX_PUBLIC_WS_URL, symbol = %symbol, "connecting to depth WebSocket");

    let (ws_stream, _response) = connect_async(OKX_PUBLIC_WS_URL)
        .await
        .context("failed to connect to depth WebSocket")?;

    let (mut write, mut read) = ws_stream.split();

    let sub_msg = serde_json::json!({
        "op": "subscribe",
        "args": [{ "channel": "books5", "instId": symbol }],
    });
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(
            sub_msg.to_string(),
        ))
        .await
        .context("failed to send books5 subscribe message")?;

    info!(symbol = %symbol, "depth WebSocket connected and subscribed");

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_books5_message(&text) {
                        Ok(Some((best_bid, best_ask, bid_depth, ask_depth, update_id))) => {
                            manager.update(symbol, best_bid, best_ask, bid_depth, ask_depth, update_id);
                        }
                        Ok(None) => {
                            // Subscription ack or unrelated event — ignore.
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse depth message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "depth WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "depth WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse an OKX `books5` push message.
///
/// Expected shape:
/// ```json
/// {
///   "arg": {"channel": "books5", "instId": "BTC-USDT-SWAP"},
///   "data": [{"asks": [["41000.1","10","0","2"], ...], "bids": [...], "ts": "1597026383085", "seqId": 123}]
/// }
/// ```
/// Returns `None` for non-data frames (subscribe acks, pings).
fn parse_books5_message(text: &str) -> Result<Option<(f64, f64, f64, f64, u64)>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse books5 JSON")?;

    let Some(data) = root["data"].as_array() else {
        return Ok(None);
    };
    let Some(entry) = data.first() else {
        return Ok(None);
    };

    let bids = entry["bids"].as_array().context("missing field bids")?;
    let asks = entry["asks"].as_array().context("missing field asks")?;

    let best_bid: f64 = bids
        .first()
        .and_then(|b| b.get(0))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let best_ask: f64 = asks
        .first()
        .and_then(|a| a.get(0))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0);

    let bid_depth: f64 = bids
        .iter()
        .filter_map(|b| b.get(1).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()))
        .sum();

    let ask_depth: f64 = asks
        .iter()
        .filter_map(|a| a.get(1).and_then(|v| v.as_str()).and_then(|s| s.parse::<f64>().ok()))
        .sum();

    let update_id: u64 = entry["seqId"].as_u64().unwrap_or(0);

    Ok(Some((best_bid, best_ask, bid_depth, ask_depth, update_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_computes_spread_and_imbalance() {
        let mgr = OrderBookManager::new();
        mgr.update("BTC-USDT-SWAP", 100.0, 100.2, 10.0, 5.0, 1);
        let state = mgr.get("BTC-USDT-SWAP").unwrap();
        assert!((state.spread_bps - 19.96).abs() < 0.1);
        assert!((state.imbalance - (5.0 / 15.0)).abs() < 1e-9);
    }

    #[test]
    fn get_missing_symbol_returns_none() {
        let mgr = OrderBookManager::new();
        assert!(mgr.get("ETH-USDT-SWAP").is_none());
    }

    #[test]
    fn parse_books5_ignores_non_data_frames() {
        let ack = r#"{"event":"subscribe","arg":{"channel":"books5"}}"#;
        assert!(parse_books5_message(ack).unwrap().is_none());
    }

    #[test]
    fn parse_books5_extracts_top_of_book() {
        let msg = r#"{"arg":{"channel":"books5","instId":"BTC-USDT-SWAP"},
            "data":[{"asks":[["41000.1","10","0","2"],["41000.5","5","0","1"]],
                     "bids":[["40999.9","8","0","3"],["40999.5","4","0","2"]],
                     "ts":"1","seqId":42}]}"#;
        let (bid, ask, bid_depth, ask_depth, seq) = parse_books5_message(msg).unwrap().unwrap();
        assert!((bid - 40999.9).abs() < 1e-9);
        assert!((ask - 41000.1).abs() < 1e-9);
        assert!((bid_depth - 12.0).abs() < 1e-9);
        assert!((ask_depth - 15.0).abs() < 1e-9);
        assert_eq!(seq, 42);
    }
}
