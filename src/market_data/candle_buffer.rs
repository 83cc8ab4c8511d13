use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle from the OKX candlestick channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades_count: u64,
    pub taker_buy_volume: f64,
    pub taker_buy_quote_volume: f64,
    pub is_closed: bool,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// CandleBuffer -- thread-safe ring buffer per (symbol, interval)
// ---------------------------------------------------------------------------

/// Thread-safe ring-buffer that stores the most recent candles per
/// `(symbol, interval)` pair.  The live (unclosed) candle is continuously
/// updated in-place; when a candle closes it becomes permanent and the ring is
/// trimmed to `max_candles`.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl Candle {
    /// Build a closed candle from the core OHLCV fields, zeroing the trade-count
    /// and taker-buy fields that only the live kline stream populates.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        open_time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: 0.0,
            trades_count: 0,
            taker_buy_volume: 0.0,
            taker_buy_quote_volume: 0.0,
            is_closed: true,
        }
    }
}

impl CandleBuffer {
    /// Create a new buffer that retains at most `max_candles` closed candles per
    /// key, plus one in-progress candle.
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Insert or replace the latest candle for the given key.
    ///
    /// * If the incoming candle is closed (`is_closed == true`) it is appended
    ///   and the ring is trimmed to `max_candles`.
    /// * If the incoming candle is still open it replaces the last element when
    ///   that element is also an open candle with the same `open_time`
    ///   (in-progress update), otherwise it is simply appended.
    pub fn update(&self, key: CandleKey, candle: Candle) {
        let mut map = self.buffers.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if candle.is_closed {
            // If the last entry was the in-progress version of this same
            // candle, replace it with the finalized version.
            if let Some(last) = ring.back() {
                if !last.is_closed && last.open_time == candle.open_time {
                    ring.pop_back();
                }
            }
            ring.push_back(candle);
            // Trim oldest to stay within budget.
            while ring.len() > self.max_candles {
                ring.pop_front();
            }
        } else {
            // In-progress candle -- replace existing in-progress or append.
            if let Some(last) = ring.back() {
                if !last.is_closed && last.open_time == candle.open_time {
                    ring.pop_back();
                }
            }
            ring.push_back(candle);
        }
    }

    /// Return the most recent `count` **closed** candles (oldest-first order).
    pub fn get_closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the most recent `count` close prices from closed candles
    /// (oldest-first order).
    pub fn get_closes(&self, key: &CandleKey, count: usize) -> Vec<f64> {
        self.get_closed(key, count)
            .iter()
            .map(|c| c.close)
            .collect()
    }

    /// Alias for [`get_closed`] — used by signal generators and main.rs.
    pub fn get_closed_candles(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        self.get_closed(key, count)
    }

    /// Return the close price of the most recent closed candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        let map = self.buffers.read();
        map.get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    /// Total number of candles (including any in-progress candle) stored for a
    /// key.
    pub fn count(&self, key: &CandleKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Candlestick WebSocket stream
// ---------------------------------------------------------------------------

/// Supported intervals that the engine subscribes to, in OKX channel-name form.
const SUPPORTED_INTERVALS: &[&str] = &["1m", "5m", "15m", "1H"];

/// Map a human interval string ("1m", "5m", "15m", "1h") to an OKX candle
/// channel name ("candle1m", "candle5m", "candle15m", "candle1H").
fn okx_candle_channel(interval: &str) -> String {
    let okx_interval = if interval.eq_ignore_ascii_case("1h") {
        "1H".to_string()
    } else {
        interval.to_string()
    };
    format!("candle{okx_interval}")
}

/// Connect to the OKX public WebSocket and subscribe to a single candlestick
/// channel for `symbol`/`interval`, feeding candles into `buffer`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_kline_stream(symbol: &str, interval: &str, buffer: &Arc<CandleBuffer>) -> Result<()> {
    if !SUPPORTED_INTERVALS.iter().any(|s| s.eq_ignore_ascii_case(interval)) {
        warn!(
            interval = %interval,
            "unsupported candle interval requested -- it will still be subscribed"
        );
    }

    let channel = okx_candle_channel(interval);
    info!(url = OKX_PUBLIC_WS_URL, symbol = %symbol, interval = %interval, "connecting to candle WebSocket");

    let (ws_stream, _response) = connect_async(OKX_PUBLIC_WS_URL)
        .await
        .context("failed to connect to candle WebSocket")?;

    let (mut write, mut read) = ws_stream.split();

    let sub_msg = serde_json::json!({
        "op": "subscribe",
        "args": [{ "channel": channel, "instId": symbol }],
    });
    write
        .send(tokio_tungstenite::tungstenite::Message::Text(
            sub_msg.to_string(),
        ))
        .await
        .context("failed to send candle subscribe message")?;

    info!(symbol = %symbol, interval = %interval, "candle WebSocket connected and subscribed");

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_candle_message(symbol, interval, &text) {
                        Ok(Some((key, candle))) => {
                            debug!(
                                key = %key,
                                close = candle.close,
                                closed = candle.is_closed,
                                "candle update"
                            );
                            buffer.update(key, candle);
                        }
                        Ok(None) => {
                            // Subscription ack or unrelated event.
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse candle message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "candle WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, interval = %interval, "candle WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse an OKX candlestick push message.
///
/// Expected shape:
/// ```json
/// {
///   "arg": {"channel": "candle1m", "instId": "BTC-USDT-SWAP"},
///   "data": [["1597026383085","41000.1","41001","40995","41000","100","4100000","4100000","1"]]
/// }
/// ```
/// Array fields: [ts, open, high, low, close, vol(contracts), volCcy, volCcyQuote, confirm].
/// `confirm` is "1" when the candle is finalized, "0" while still forming.
/// Returns `None` for non-data frames (subscribe acks).
fn parse_candle_message(
    symbol: &str,
    interval: &str,
    text: &str,
) -> Result<Option<(CandleKey, Candle)>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse candle JSON")?;

    let Some(data) = root["data"].as_array() else {
        return Ok(None);
    };
    let Some(row) = data.first().and_then(|r| r.as_array()) else {
        return Ok(None);
    };

    let get = |i: usize, name: &str| -> Result<&str> {
        row.get(i)
            .and_then(|v| v.as_str())
            .with_context(|| format!("missing candle field {name} at index {i}"))
    };

    let open_time: i64 = get(0, "ts")?.parse().context("failed to parse ts")?;
    let open: f64 = get(1, "open")?.parse().context("failed to parse open")?;
    let high: f64 = get(2, "high")?.parse().context("failed to parse high")?;
    let low: f64 = get(3, "low")?.parse().context("failed to parse low")?;
    let close: f64 = get(4, "close")?.parse().context("failed to parse close")?;
    let volume: f64 = get(5, "vol")?.parse().context("failed to parse vol")?;
    let quote_volume: f64 = get(6, "volCcy")?.parse().context("failed to parse volCcy")?;
    let confirm = get(8, "confirm").unwrap_or("0");
    let is_closed = confirm == "1";

    let key = CandleKey {
        symbol: symbol.to_string(),
        interval: interval.to_string(),
    };
    let candle = Candle {
        open_time,
        close_time: open_time,
        open,
        high,
        low,
        close,
        volume,
        quote_volume,
        trades_count: 0,
        taker_buy_volume: 0.0,
        taker_buy_quote_volume: 0.0,
        is_closed,
    };

    Ok(Some((key, candle)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            quote_volume: 200.0,
            trades_count: 50,
            taker_buy_volume: 60.0,
            taker_buy_quote_volume: 120.0,
            is_closed,
        }
    }

    fn make_key(sym: &str, iv: &str) -> CandleKey {
        CandleKey {
            symbol: sym.into(),
            interval: iv.into(),
        }
    }

    #[test]
    fn ring_buffer_trimming() {
        let buf = CandleBuffer::new(3);
        let key = make_key("BTC-USDT-SWAP", "1m");

        for i in 0..5 {
            buf.update(
                key.clone(),
                sample_candle(i * 60_000, 100.0 + i as f64, true),
            );
        }

        assert_eq!(buf.count(&key), 3);
        let closes = buf.get_closes(&key, 10);
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn in_progress_replacement() {
        let buf = CandleBuffer::new(10);
        let key = make_key("ETH-USDT-SWAP", "5m");

        buf.update(key.clone(), sample_candle(0, 50.0, false));
        assert_eq!(buf.count(&key), 1);

        buf.update(key.clone(), sample_candle(0, 51.0, false));
        assert_eq!(buf.count(&key), 1);

        buf.update(key.clone(), sample_candle(0, 52.0, true));
        assert_eq!(buf.count(&key), 1);
        assert_eq!(buf.last_close(&key), Some(52.0));
    }

    #[test]
    fn get_closed_filters_out_in_progress() {
        let buf = CandleBuffer::new(10);
        let key = make_key("BTC-USDT-SWAP", "1m");

        buf.update(key.clone(), sample_candle(0, 100.0, true));
        buf.update(key.clone(), sample_candle(60_000, 101.0, true));
        buf.update(key.clone(), sample_candle(120_000, 102.0, false));

        let closed = buf.get_closed(&key, 10);
        assert_eq!(closed.len(), 2);
    }

    #[test]
    fn last_close_empty_returns_none() {
        let buf = CandleBuffer::new(10);
        let key = make_key("XYZ-USDT-SWAP", "1H");
        assert_eq!(buf.last_close(&key), None);
    }

    #[test]
    fn okx_candle_channel_uppercases_hour() {
        assert_eq!(okx_candle_channel("1h"), "candle1H");
        assert_eq!(okx_candle_channel("5m"), "candle5m");
    }

    #[test]
    fn parse_candle_message_ok() {
        let json = r#"{
            "arg": {"channel": "candle1m", "instId": "BTC-USDT-SWAP"},
            "data": [["1700000000000","37000.00","37050.00","36990.00","37020.00","123.456","4567890.12","4567890.12","0"]]
        }"#;
        let (key, candle) = parse_candle_message("BTC-USDT-SWAP", "1m", json)
            .unwrap()
            .expect("should parse");
        assert_eq!(key.symbol, "BTC-USDT-SWAP");
        assert_eq!(key.interval, "1m");
        assert!((candle.close - 37020.0).abs() < f64::EPSILON);
        assert!(!candle.is_closed);
    }

    #[test]
    fn parse_candle_message_confirmed_is_closed() {
        let json = r#"{
            "arg": {"channel": "candle1m", "instId": "BTC-USDT-SWAP"},
            "data": [["1700000000000","37000.00","37050.00","36990.00","37020.00","123.456","4567890.12","4567890.12","1"]]
        }"#;
        let (_, candle) = parse_candle_message("BTC-USDT-SWAP", "1m", json)
            .unwrap()
            .unwrap();
        assert!(candle.is_closed);
    }

    #[test]
    fn parse_candle_message_ignores_non_data_frames() {
        let ack = r#"{"event":"subscribe","arg":{"channel":"candle1m"}}"#;
        assert!(parse_candle_message("BTC-USDT-SWAP", "1m", ack).unwrap().is_none());
    }
}
