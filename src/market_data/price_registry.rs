// =============================================================================
// Price Registry — six-tier price fallback chain
// =============================================================================
//
// Every consumer that needs "the current price" for a symbol goes through
// here instead of reaching into any one data source directly. Sources are
// tried in order of freshness/trust and the first one that's both present
// and not stale wins:
//
//   1. Ticker mid            — best bid/ask midpoint from the order book stream
//   2. Order book mid         — same source, kept distinct so callers can see
//                               which exact tier served the read
//   3. Last trade             — most recent fill from the trade stream
//   4. Mark price             — exchange-computed mark (REST poll, higher
//                               latency); stale if past the staleness window
//   5. Last candle close      — most recent closed 1-minute (then 5-minute)
//                               candle
//   6. Entry price fallback   — no live quote exists at all; if the caller
//                               holds an open position, its own entry price
//                               stands in so PnL/TSL math has something to
//                               read. Logged at WARN — this is degraded mode.
//   7. Unavailable            — nothing has ever been reported for the symbol
//                               and there's no position to fall back to.
//
// `get_price` always returns a reading; the source tag tells the caller how
// much to trust it. The last two tiers are never safe to drive a
// price-dependent close decision — callers must check `source.is_actionable()`
// before acting on the price.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::warn;

use super::{CandleBuffer, CandleKey, OrderBookManager, TradeStreamProcessor};
use crate::exchange::ExchangeClient;
use crate::types::PriceSource;

#[derive(Debug, Clone, Copy)]
pub struct PriceReading {
    pub price: f64,
    pub source: PriceSource,
    pub age: Duration,
}

struct MarkCacheEntry {
    price: f64,
    fetched_at: Instant,
}

pub struct PriceRegistry {
    orderbook: Arc<OrderBookManager>,
    candle_buffer: Arc<CandleBuffer>,
    staleness: Duration,
    mark_cache: RwLock<HashMap<String, MarkCacheEntry>>,
}

impl PriceRegistry {
    pub fn new(orderbook: Arc<OrderBookManager>, candle_buffer: Arc<CandleBuffer>, staleness_ms: u64) -> Self {
        Self {
            orderbook,
            candle_buffer,
            staleness: Duration::from_millis(staleness_ms),
            mark_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh the mark-price cache for `symbol` from the exchange. Callers
    /// poll this periodically (mark price has no push feed); `get_price`
    /// itself never hits the network.
    pub async fn refresh_mark_price(&self, exchange: &dyn ExchangeClient, symbol: &str) -> anyhow::Result<()> {
        let price = exchange.get_mark_price(symbol).await?;
        self.mark_cache.write().insert(
            symbol.to_string(),
            MarkCacheEntry { price, fetched_at: Instant::now() },
        );
        Ok(())
    }

    /// Walk the fallback chain and return the best available price.
    ///
    /// `trade_processor` is optional since not every symbol necessarily has
    /// an active trade-stream processor registered. `entry_price_fallback`
    /// should be the open position's entry price when the caller holds one
    /// for `symbol`, and `None` otherwise; it is only consulted once every
    /// live source has failed.
    pub fn get_price(
        &self,
        symbol: &str,
        trade_processor: Option<&Arc<TradeStreamProcessor>>,
        entry_price_fallback: Option<f64>,
    ) -> PriceReading {
        if let Some(book) = self.orderbook.get(symbol) {
            if book.best_bid > 0.0 && book.best_ask > 0.0 {
                let mid = (book.best_bid + book.best_ask) / 2.0;
                return PriceReading { price: mid, source: PriceSource::Ticker, age: Duration::ZERO };
            }
        }

        if let Some(book) = self.orderbook.get(symbol) {
            if book.best_bid > 0.0 || book.best_ask > 0.0 {
                let mid = if book.best_bid > 0.0 && book.best_ask > 0.0 {
                    (book.best_bid + book.best_ask) / 2.0
                } else {
                    book.best_bid.max(book.best_ask)
                };
                return PriceReading { price: mid, source: PriceSource::OrderBookMid, age: Duration::ZERO };
            }
        }

        if let Some(tp) = trade_processor {
            let last = tp.last_price();
            if last > 0.0 {
                return PriceReading { price: last, source: PriceSource::LastTrade, age: Duration::ZERO };
            }
        }

        let mark = self.mark_cache.read().get(symbol).map(|e| (e.price, e.fetched_at.elapsed()));
        if let Some((price, age)) = mark {
            if price > 0.0 {
                let source = if age <= self.staleness { PriceSource::Mark } else { PriceSource::Stale };
                return PriceReading { price, source, age };
            }
        }

        for interval in ["1m", "5m"] {
            let key = CandleKey { symbol: symbol.to_string(), interval: interval.to_string() };
            if let Some(close) = self.candle_buffer.last_close(&key) {
                if close > 0.0 {
                    return PriceReading { price: close, source: PriceSource::LastCandleClose, age: Duration::ZERO };
                }
            }
        }

        if let Some(entry_price) = entry_price_fallback {
            if entry_price > 0.0 {
                warn!(symbol, entry_price, "no live price source, falling back to position entry price");
                return PriceReading { price: entry_price, source: PriceSource::EntryPriceFallback, age: Duration::ZERO };
            }
        }

        PriceReading { price: 0.0, source: PriceSource::Unavailable, age: Duration::ZERO }
    }

    pub fn is_fresh(&self, reading: &PriceReading) -> bool {
        reading.age <= self.staleness && reading.source != PriceSource::Stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;

    fn registry() -> PriceRegistry {
        PriceRegistry::new(Arc::new(OrderBookManager::new()), Arc::new(CandleBuffer::new(100)), 3_000)
    }

    #[test]
    fn no_sources_and_no_position_is_unavailable() {
        let reg = registry();
        let reading = reg.get_price("BTC-USDT-SWAP", None, None);
        assert_eq!(reading.source, PriceSource::Unavailable);
        assert!(!reading.source.is_actionable());
    }

    #[test]
    fn no_live_source_falls_back_to_entry_price() {
        let reg = registry();
        let reading = reg.get_price("BTC-USDT-SWAP", None, Some(123.0));
        assert_eq!(reading.source, PriceSource::EntryPriceFallback);
        assert!((reading.price - 123.0).abs() < 1e-9);
        assert!(!reading.source.is_actionable());
    }

    #[test]
    fn orderbook_ticker_wins_when_present() {
        let reg = registry();
        reg.orderbook.update("BTC-USDT-SWAP", 100.0, 100.2, 5.0, 5.0, 1);
        let reading = reg.get_price("BTC-USDT-SWAP", None, None);
        assert_eq!(reading.source, PriceSource::Ticker);
        assert!((reading.price - 100.1).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_trade_processor_when_no_orderbook() {
        let reg = registry();
        let tp = Arc::new(TradeStreamProcessor::new("BTC-USDT-SWAP"));
        tp.process_trade(99.5, 1.0, false);
        let reading = reg.get_price("BTC-USDT-SWAP", Some(&tp), None);
        assert_eq!(reading.source, PriceSource::LastTrade);
    }

    #[test]
    fn falls_back_to_last_candle_close_when_nothing_else_available() {
        let reg = registry();
        let key = CandleKey { symbol: "BTC-USDT-SWAP".to_string(), interval: "1m".to_string() };
        reg.candle_buffer.update(key, Candle::new(0, 100.0, 101.0, 99.0, 100.5, 10.0, 59_999));
        let reading = reg.get_price("BTC-USDT-SWAP", None, None);
        assert_eq!(reading.source, PriceSource::LastCandleClose);
    }

    #[test]
    fn candle_close_still_wins_over_entry_price_fallback() {
        let reg = registry();
        let key = CandleKey { symbol: "BTC-USDT-SWAP".to_string(), interval: "1m".to_string() };
        reg.candle_buffer.update(key, Candle::new(0, 100.0, 101.0, 99.0, 100.5, 10.0, 59_999));
        let reading = reg.get_price("BTC-USDT-SWAP", None, Some(250.0));
        assert_eq!(reading.source, PriceSource::LastCandleClose);
    }

    #[tokio::test]
    async fn refresh_mark_price_populates_cache() {
        let reg = registry();
        let mock = crate::exchange::MockExchangeClient::new(1000.0);
        mock.set_mark_price(42.0);
        reg.refresh_mark_price(&mock, "BTC-USDT-SWAP").await.unwrap();
        let reading = reg.get_price("BTC-USDT-SWAP", None, None);
        assert_eq!(reading.source, PriceSource::Mark);
        assert!((reading.price - 42.0).abs() < 1e-9);
    }
}
