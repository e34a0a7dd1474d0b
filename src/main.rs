// =============================================================================
// Meridian Indicator Engine — Main Entry Point
// =============================================================================
//
// Wires the event bus, time-series store, algorithm registry, variant
// repository, streaming indicator engine, and strategy manager, then runs
// until Ctrl+C. Market data arrives as `market.price_update` events on the
// bus; transports publishing those events live outside this binary.

// ── Module declarations ──────────────────────────────────────────────────────
mod backtest;
mod config;
mod engine;
mod error;
mod event_bus;
mod indicators;
mod market_data;
mod store;
mod strategy;
mod types;
mod variants;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::backtest::engine::BacktestEngine;
use crate::config::EngineConfig;
use crate::engine::offline::OfflineIndicatorEngine;
use crate::engine::streaming::StreamingIndicatorEngine;
use crate::event_bus::EventBus;
use crate::indicators::registry::AlgorithmRegistry;
use crate::market_data::MarketHistory;
use crate::store::{wal_retry, MemoryStore, TimeSeriesStore};
use crate::strategy::StrategyManager;
use crate::types::CancelToken;
use crate::variants::VariantRepository;

const CONFIG_PATH: &str = "engine_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    info!(symbols = ?config.symbols, "configured symbols");

    // ── 2. Core services ─────────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let store: Arc<dyn TimeSeriesStore> = Arc::new(MemoryStore::new());
    store.initialize().await?;

    let registry = Arc::new(AlgorithmRegistry::with_builtins());
    let stats = registry.statistics();
    info!(
        algorithms = stats.total_algorithms,
        categories = stats.categories_count,
        "algorithm registry ready"
    );

    let repository = Arc::new(VariantRepository::new(store.clone(), registry.clone()));

    // Backtest mode: replay one session instead of starting the live loop.
    if let Ok(session_id) = std::env::var("MERIDIAN_BACKTEST_SESSION") {
        return run_backtest_session(&session_id, &config, store, bus, registry, repository).await;
    }

    // ── 3. Streaming engine ──────────────────────────────────────────────
    let history = Arc::new(MarketHistory::new(config.history_retention_secs));
    for symbol in &config.symbols {
        history.set_retention(symbol, config.history_retention_secs);
    }

    let streaming = Arc::new(StreamingIndicatorEngine::new(
        bus.clone(),
        registry.clone(),
        history,
    ));

    match repository.load_all().await {
        Ok(variants) => streaming.load_variants(variants),
        Err(e) => warn!(error = %e, "could not load variants at startup"),
    }
    streaming.start();

    // ── 4. Strategy manager ──────────────────────────────────────────────
    let strategies = Arc::new(StrategyManager::new(bus.clone(), config.account_balance));
    strategies.start();

    info!("all subsystems running; press Ctrl+C to stop");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received; stopping gracefully");

    strategies.shutdown();
    streaming.shutdown().await;
    bus.shutdown().await;
    store.close().await?;

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save engine config on shutdown");
    }

    info!("meridian engine shut down complete");
    Ok(())
}

/// Replay one backtest session: precompute indicator series for every
/// variant over the session's history, then drive the candle pipeline.
async fn run_backtest_session(
    session_id: &str,
    config: &EngineConfig,
    store: Arc<dyn TimeSeriesStore>,
    bus: Arc<EventBus>,
    registry: Arc<AlgorithmRegistry>,
    repository: Arc<VariantRepository>,
) -> anyhow::Result<()> {
    info!(session_id, "backtest mode");

    // Indicator precompute for the session's symbol, one series per variant.
    if let Some(session) = store.fetch_backtest_session(session_id).await? {
        let offline = OfflineIndicatorEngine::new(registry);
        let cancel = CancelToken::new();

        // Recently ingested session data may lag behind the read path.
        let offline_ref = &offline;
        let store_ref = store.as_ref();
        let symbol = session.symbol.clone();
        let points = wal_retry("load_series", move || {
            let symbol = symbol.clone();
            async move { offline_ref.load_series(store_ref, session_id, &symbol).await }
        })
        .await?;

        if points.is_empty() {
            warn!(symbol = %session.symbol, "no historical points; skipping indicator precompute");
        } else {
            for variant in repository.load_all().await? {
                match offline.calculate_series(
                    &session.symbol,
                    &variant.base_indicator_type,
                    "1m",
                    20,
                    &variant.parameters,
                    &points,
                    &cancel,
                ) {
                    Ok(series) => match offline.persist_series(store.as_ref(), session_id, &series).await {
                        Ok(inserted) => info!(
                            variant = %variant.name,
                            indicator_type = %variant.base_indicator_type,
                            inserted,
                            "indicator series precomputed"
                        ),
                        Err(e) => warn!(variant = %variant.name, error = %e, "series not persisted"),
                    },
                    Err(e) => warn!(variant = %variant.name, error = %e, "series calculation failed"),
                }
            }
        }
    }

    let engine = BacktestEngine::new(session_id, store.clone(), bus.clone(), config.broadcast_interval_secs);
    let result = engine.run().await;

    info!(
        session_id,
        status = %result.status,
        total_trades = result.total_trades,
        win_rate = result.win_rate,
        final_pnl = result.final_pnl,
        max_drawdown_pct = result.max_drawdown_pct,
        candles_processed = result.candles_processed,
        "backtest result"
    );

    bus.shutdown().await;
    store.close().await?;
    Ok(())
}
