// =============================================================================
// Trade Stream Processor — Aggregates real-time trade data
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// Processes and aggregates individual trades from the OKX `trades` channel.
pub struct TradeStreamProcessor {
    symbol: String,
    /// Cumulative volume delta (buy volume - sell volume).
    cvd: RwLock<f64>,
    /// Total buy volume in the current window.
    buy_volume: RwLock<f64>,
    /// Total sell volume in the current window.
    sell_volume: RwLock<f64>,
    /// Total number of trades processed.
    trade_count: AtomicU64,
    /// Last trade price.
    last_price: RwLock<f64>,
    /// Buy volume ratio (buy_vol / total_vol).
    buy_volume_ratio: RwLock<f64>,
}

impl TradeStreamProcessor {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            cvd: RwLock::new(0.0),
            buy_volume: RwLock::new(0.0),
            sell_volume: RwLock::new(0.0),
            trade_count: AtomicU64::new(0),
            last_price: RwLock::new(0.0),
            buy_volume_ratio: RwLock::new(0.5),
        }
    }

    /// Process an incoming trade. `is_sell` is true when the taker side was
    /// sell (mirrors OKX's `side` field on the `trades` channel).
    pub fn process_trade(&self, price: f64, quantity: f64, is_sell: bool) {
        let volume = price * quantity;

        if is_sell {
            *self.sell_volume.write() += volume;
            *self.cvd.write() -= volume;
        } else {
            *self.buy_volume.write() += volume;
            *self.cvd.write() += volume;
        }

        *self.last_price.write() = price;
        self.trade_count.fetch_add(1, Ordering::Relaxed);

        let buy = *self.buy_volume.read();
        let sell = *self.sell_volume.read();
        let total = buy + sell;
        if total > 0.0 {
            *self.buy_volume_ratio.write() = buy / total;
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cvd(&self) -> f64 {
        *self.cvd.read()
    }

    pub fn buy_volume_ratio(&self) -> f64 {
        *self.buy_volume_ratio.read()
    }

    pub fn last_price(&self) -> f64 {
        *self.last_price.read()
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    /// Reset windowed accumulators (call periodically).
    pub fn reset_window(&self) {
        *self.buy_volume.write() = 0.0;
        *self.sell_volume.write() = 0.0;
        // CVD is cumulative — do not reset.
    }
}

// ---------------------------------------------------------------------------
// Trade WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the OKX public WebSocket and subscribe to the `trades` channel
/// for a single instrument, feeding trades into `processor`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_trade_stream(symbol: &str, processor: &Arc<TradeStreamProcessor>) -> Result<()> {
    info!(url = OKX_PUBLIC_WS_URL, symbol = %symbol, "connecting to trade WebSocket");

    let (ws_stream, _response) = connect_async(OKX_PUBLIC_WS_URL)
        .await
        .context("failed to connect to trade WebSocket")?;

    let (mut write, mut read) = ws_stream.split();

    let sub_msg = serde_json::json!({
        "op": "subscribe",
        "args": [{ "channel": "trades", "instId": symbol }],
    });
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(
            sub_msg.to_string(),
        ))
        .await
        .context("failed to send trades subscribe message")?;

    info!(symbol = %symbol, "trade WebSocket connected and subscribed");

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    for (price, quantity, is_sell) in parse_trades_message(&text)? {
                        processor.process_trade(price, quantity, is_sell);
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "trade WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "trade WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse an OKX `trades` push message, which may carry multiple fills per
/// frame.
///
/// Expected shape:
/// ```json
/// {
///   "arg": {"channel": "trades", "instId": "BTC-USDT-SWAP"},
///   "data": [{"instId": "BTC-USDT-SWAP", "tradeId": "1", "px": "41000.1", "sz": "0.5", "side": "sell", "ts": "1597026383085"}]
/// }
/// ```
fn parse_trades_message(text: &str) -> Result<Vec<(f64, f64, bool)>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse trades JSON")?;

    let Some(data) = root["data"].as_array() else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(data.len());
    for entry in data {
        let price: f64 = match entry["px"].as_str().and_then(|s| s.parse().ok()) {
            Some(p) => p,
            None => continue,
        };
        let quantity: f64 = match entry["sz"].as_str().and_then(|s| s.parse().ok()) {
            Some(q) => q,
            None => continue,
        };
        let is_sell = entry["side"].as_str() == Some("sell");
        out.push((price, quantity, is_sell));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_trade_updates_cvd() {
        let proc = TradeStreamProcessor::new("BTC-USDT-SWAP");
        proc.process_trade(100.0, 1.0, false); // buy
        proc.process_trade(100.0, 0.5, true); // sell
        assert!((proc.cvd() - 50.0).abs() < 1e-9);
        assert_eq!(proc.trade_count(), 2);
    }

    #[test]
    fn buy_volume_ratio_tracks_flow() {
        let proc = TradeStreamProcessor::new("BTC-USDT-SWAP");
        proc.process_trade(10.0, 3.0, false);
        proc.process_trade(10.0, 1.0, true);
        assert!((proc.buy_volume_ratio() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn parse_trades_message_extracts_multiple_fills() {
        let msg = r#"{"arg":{"channel":"trades","instId":"BTC-USDT-SWAP"},
            "data":[{"px":"100.0","sz":"1.0","side":"buy"},{"px":"101.0","sz":"2.0","side":"sell"}]}"#;
        let fills = parse_trades_message(msg).unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[1].2, true);
    }

    #[test]
    fn reset_window_clears_volume_but_not_cvd() {
        let proc = TradeStreamProcessor::new("BTC-USDT-SWAP");
        proc.process_trade(10.0, 1.0, false);
        proc.reset_window();
        assert!((proc.cvd() - 10.0).abs() < 1e-9);
    }
}
