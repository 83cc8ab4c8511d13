// =============================================================================
// Perpetual Scalping Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Users must explicitly
// switch to Live mode via the dashboard or API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod absorption_detector;
mod api;
mod app_state;
mod balance_profile;
mod connection_quality;
mod cusum_detector;
mod decision_envelope;
mod entry_executor;
mod errors;
mod exchange;
mod exit_executor;
mod filters;
mod futures_intel;
mod generators;
mod indicators;
mod journal;
mod lifecycle_manager;
mod market_data;
mod position_registry;
mod reconcile;
mod regime;
mod risk;
mod runtime_config;
mod signal_pipeline;
mod signals;
mod types;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::exchange::{ExchangeClient, MockExchangeClient, OkxClient};
use crate::filters::{FilterContext, FilterStack};
use crate::generators::GeneratorContext;
use crate::lifecycle_manager::{LifecycleConfig, LifecycleState};
use crate::market_data::CandleKey;
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;

const KLINE_INTERVAL: &str = "5m";
/// Leverage applied to new entries. TODO: promote to a per-symbol config
/// field once margin tiers are modeled.
const DEFAULT_LEVERAGE: u32 = 5;
/// Cap on notional size as a percentage of equity, independent of the
/// balance-profile risk percentage.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Perpetual Scalping Engine — Starting Up           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: Force Demo + Paused on startup.
    config.trading_mode = types::TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("ENGINE_SYMBOLS") {
        config.symbols = syms.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
    }
    if config.symbols.is_empty() {
        config.symbols = vec![
            "BTC-USDT-SWAP".into(),
            "ETH-USDT-SWAP".into(),
            "SOL-USDT-SWAP".into(),
        ];
    }

    info!(symbols = ?config.symbols, "Configured trading pairs");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "Engine starting in SAFE mode (Demo + Paused)"
    );

    // ── 2. Build exchange client ────────────────────────────────────────
    let exchange: Arc<dyn ExchangeClient> = if config.account_mode == AccountMode::Demo {
        Arc::new(MockExchangeClient::new(10_000.0))
    } else {
        let api_key = std::env::var("OKX_API_KEY").unwrap_or_default();
        let api_secret = std::env::var("OKX_API_SECRET").unwrap_or_default();
        let passphrase = std::env::var("OKX_API_PASSPHRASE").unwrap_or_default();
        Arc::new(OkxClient::new(api_key, api_secret, passphrase))
    };

    let starting_capital = exchange.get_balance("USDT").await.unwrap_or(10_000.0);

    // ── 3. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config, exchange.clone(), starting_capital));

    // ── 4. Spawn market data streams ─────────────────────────────────────
    let symbols = state.runtime_config.read().symbols.clone();

    for symbol in &symbols {
        let cb = state.candle_buffer.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::candle_buffer::run_kline_stream(&sym, KLINE_INTERVAL, &cb).await {
                    error!(symbol = %sym, error = %e, "kline stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });

        {
            let procs = state.trade_processors.read();
            if let Some(tp) = procs.get(symbol) {
                let processor = tp.clone();
                let sym = symbol.clone();
                tokio::spawn(async move {
                    loop {
                        if let Err(e) = market_data::trade_stream::run_trade_stream(&sym, &processor).await {
                            error!(symbol = %sym, error = %e, "trade stream error — reconnecting in 5s");
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                });
            }
        }

        let ob = state.orderbook_manager.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&sym, &ob).await {
                    error!(symbol = %sym, error = %e, "depth stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    info!(count = symbols.len(), "Market data streams launched");

    // ── 5. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("ENGINE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone).await.expect("Failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 6. Signal pipeline loop (every 5 seconds) ────────────────────────
    let sig_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        info!("Signal pipeline loop starting");

        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
        loop {
            interval.tick().await;

            let (syms, trading_mode, max_concurrent_positions, strategy_params, rsi_config, balance_profiles) = {
                let cfg = sig_state.runtime_config.read();
                (
                    cfg.symbols.clone(),
                    cfg.trading_mode,
                    cfg.max_concurrent_positions as usize,
                    cfg.strategy_params.clone(),
                    cfg.rsi.clone(),
                    cfg.balance_profiles.clone(),
                )
            };

            if trading_mode != types::TradingMode::Live {
                continue;
            }

            for symbol in &syms {
                let key = CandleKey { symbol: symbol.clone(), interval: KLINE_INTERVAL.to_string() };
                let candles = sig_state.candle_buffer.get_closed_candles(&key, 200);
                if candles.len() < 60 {
                    continue;
                }
                let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

                let Some(regime_state) = sig_state.regime_detector.detect(&candles, &closes) else {
                    continue;
                };

                let trade_processor = sig_state.trade_processors.read().get(symbol).cloned();
                let open_entry_price = sig_state.positions.get_open_positions().iter().find(|p| &p.symbol == symbol).map(|p| p.entry_price);
                let price_reading = sig_state.price_registry.get_price(symbol, trade_processor.as_ref(), open_entry_price);
                if !price_reading.source.is_actionable() {
                    continue;
                }
                let current_price = price_reading.price;

                let atr = indicators::atr::calculate(&candles).unwrap_or(0.0);
                if atr <= 0.0 {
                    continue;
                }

                let spread_bps = sig_state.orderbook_manager.spread_bps(symbol).unwrap_or(0.0);
                let buy_volume_ratio = trade_processor.as_ref().map(|tp| tp.buy_volume_ratio()).unwrap_or(0.5);

                let filter_ctx = FilterContext {
                    symbol: symbol.as_str(),
                    side: types::Side::Long,
                    regime: regime_state.regime,
                    score: 0.0,
                    spread_bps,
                    htf_direction: None,
                    htf_confidence: 0.0,
                    buy_volume_ratio,
                    cusum_bullish_break: false,
                    cusum_bearish_break: false,
                    absorption_direction: None,
                    absorption_strength: 0.0,
                    funding_signal: 0.0,
                    symbol_has_live_position: sig_state.positions.has_live_position(symbol),
                    open_position_count: sig_state.positions.open_position_count(),
                    max_concurrent_positions,
                    trading_enabled: true,
                };

                let gen_ctx = GeneratorContext { candles: &candles, closes: &closes, regime: regime_state.regime, rsi_config: &rsi_config };

                let pipeline = sig_state.signal_pipeline.read().clone();
                let (envelope, proposal) = {
                    let scorer = sig_state.weighted_scorer.read();
                    pipeline.evaluate(&scorer, &gen_ctx, filter_ctx, current_price, atr, &strategy_params, "adaptive_ensemble")
                };

                sig_state.push_decision(envelope);

                let Some(prop) = proposal else { continue };

                let (can_trade, reason) = sig_state.risk_engine.can_trade();
                if !can_trade {
                    sig_state.push_error(format!("risk breaker blocked entry for {}: {}", prop.symbol, reason.unwrap_or_default()));
                    continue;
                }

                let equity = sig_state.balances.read().iter().map(|b| b.free + b.locked).sum::<f64>().max(starting_capital);
                let balance_profile = balance_profile::classify_balance(equity, &balance_profiles);
                let risk_pct = balance_profile::risk_pct_for(balance_profile, &balance_profiles);
                let profile_params = balance_profile::profile_params_for(balance_profile, &balance_profiles);
                let concurrent_cap = max_concurrent_positions.min(profile_params.max_concurrent as usize);

                match sig_state.entry_executor.execute(
                    &prop,
                    regime_state.regime,
                    balance_profile,
                    &profile_params,
                    risk_pct,
                    DEFAULT_LEVERAGE,
                    equity,
                    concurrent_cap,
                ).await
                {
                    Ok(snapshot) => {
                        info!(symbol = %snapshot.symbol, side = %snapshot.side, entry = snapshot.entry_price, "position opened");
                        let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
                        let atr_pct = if snapshot.entry_price > 0.0 { atr / snapshot.entry_price * 100.0 } else { 0.5 };
                        let lifecycle_config = LifecycleConfig::from_atr(atr_pct, regime_state.regime, &profile_params);
                        let lifecycle = LifecycleState::new(lifecycle_config, snapshot.entry_price, snapshot.side, now_secs, atr, snapshot.quantity);
                        sig_state.lifecycle_states.write().insert(snapshot.id.clone(), lifecycle);
                        sig_state.increment_version();
                    }
                    Err(e) => {
                        sig_state.push_error_with_code(format!("entry rejected for {symbol}: {e}"), None);
                    }
                }
            }
        }
    });

    // ── 7. Lifecycle / exit monitor loop ─────────────────────────────────
    let exit_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(3));
        loop {
            interval.tick().await;

            let open_positions = exit_state.positions.get_open_positions();
            let now_secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

            for pos in &open_positions {
                let trade_processor = exit_state.trade_processors.read().get(&pos.symbol).cloned();
                let price_reading = exit_state.price_registry.get_price(&pos.symbol, trade_processor.as_ref(), Some(pos.entry_price));

                let exit_reason = {
                    let mut states = exit_state.lifecycle_states.write();
                    let Some(lifecycle) = states.get_mut(&pos.id) else { continue };
                    lifecycle.evaluate(price_reading.price, price_reading.source, now_secs)
                };

                if let Some(reason) = exit_reason {
                    let taker = true;
                    if let Err(e) = exit_state.close_and_record(&pos.id, &reason.to_string(), taker).await {
                        exit_state.push_error(format!("failed to close {}: {}", pos.id, e));
                    }
                }
            }
        }
    });

    // ── 8. Reconciliation loop ────────────────────────────────────────────
    let recon_state = state.clone();
    let recon_exchange = exchange.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;

            if recon_state.runtime_config.read().account_mode == AccountMode::Demo {
                continue;
            }

            if let Err(e) = reconcile::reconcile_once(&recon_state, recon_exchange.as_ref()).await {
                *recon_state.last_reconcile_error.write() = Some(format!("{e}"));
                warn!(error = %e, "reconciliation failed");
            } else {
                *recon_state.last_reconcile_ok.write() = Some(std::time::Instant::now());
                *recon_state.last_reconcile_error.write() = None;
                recon_state.increment_version();
            }
        }
    });

    // ── 9. Regime detection loop ─────────────────────────────────────────
    let regime_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let syms = regime_state.runtime_config.read().symbols.clone();
            if let Some(symbol) = syms.first() {
                let key = CandleKey { symbol: symbol.clone(), interval: KLINE_INTERVAL.to_string() };
                let candles = regime_state.candle_buffer.get_closed_candles(&key, 100);
                if candles.len() >= 50 {
                    regime_state.regime_detector.update(&candles);
                    regime_state.increment_version();
                }
            }
        }
    });

    // ── 10. Connection quality sampling loop ─────────────────────────────
    let cq_state = state.clone();
    let cq_exchange = exchange.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(15));
        loop {
            interval.tick().await;
            let start = std::time::Instant::now();
            let symbol = cq_state.runtime_config.read().symbols.first().cloned();
            if let Some(symbol) = symbol {
                match cq_exchange.get_mark_price(&symbol).await {
                    Ok(_) => cq_state.connection_quality.record_latency(start.elapsed().as_millis() as u32),
                    Err(_) => cq_state.connection_quality.record_ssl_error(),
                }
            }
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if let Err(e) = state.runtime_config.read().save("runtime_config.json") {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Perpetual scalping engine shut down complete.");
    Ok(())
}
