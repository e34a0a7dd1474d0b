// =============================================================================
// Time-Series Store — abstract persistence interface + in-memory backend
// =============================================================================
//
// The core binds to `TimeSeriesStore` and never to a concrete database. The
// interface exposes the persisted tables as typed methods: tick prices,
// aggregated OHLCV, indicator rows, indicator variants, backtest sessions /
// trades / equity curves, and strategy configs.
//
// WAL read semantics: writes through the append path may not be visible to
// row-store reads for a few seconds. Read paths that need recency wrap their
// reads in `wal_retry`, which retries transient errors at backoff offsets
// [0, 0.2, 0.4, 0.6, 1.0, 1.5] seconds and logs the retry count. Reads that
// tolerate staleness skip the wrapper.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::types::IndicatorValue;

/// Naive UTC timestamp for persisted rows.
pub fn now_naive_utc() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TickPriceRow {
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Unix epoch seconds of the candle open.
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndicatorRow {
    pub session_id: String,
    pub symbol: String,
    pub indicator_id: String,
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariantRow {
    pub id: String,
    pub name: String,
    pub base_indicator_type: String,
    pub variant_type: String,
    pub description: String,
    /// Validated parameters as JSON with sorted keys.
    pub parameters: String,
    pub is_system: bool,
    pub created_by: String,
    pub user_id: String,
    pub scope: String,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
    pub schema_version: i32,
}

/// Filters for listing variants. With both `user_id` and `include_global`
/// set, the predicate is `user_id = ? OR scope = 'global'`.
#[derive(Debug, Clone, Default)]
pub struct VariantFilter {
    pub variant_type: Option<String>,
    pub base_indicator_type: Option<String>,
    pub scope: Option<String>,
    pub user_id: Option<String>,
    pub include_global: bool,
}

/// Store-level patch for a variant row. Validation happens in the
/// repository before this reaches the store.
#[derive(Debug, Clone, Default)]
pub struct VariantRowPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: Option<String>,
    pub scope: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BacktestSessionRow {
    pub session_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub acceleration_factor: i64,
    pub initial_balance: f64,
    pub status: String,
    pub progress_pct: f64,
    pub current_timestamp: Option<NaiveDateTime>,
    pub final_pnl: Option<f64>,
    pub total_trades: Option<i64>,
    pub win_rate: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

/// Mutable subset of a backtest session row.
#[derive(Debug, Clone, Default)]
pub struct SessionStatusPatch {
    pub status: String,
    pub progress_pct: Option<f64>,
    pub current_timestamp: Option<NaiveDateTime>,
    pub final_pnl: Option<f64>,
    pub total_trades: Option<i64>,
    pub win_rate: Option<f64>,
    pub error_message: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BacktestTradeRow {
    pub trade_id: String,
    pub session_id: String,
    pub symbol: String,
    pub order_type: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: Option<f64>,
    pub pnl: f64,
    /// Unix epoch seconds.
    pub entry_time: Option<f64>,
    pub exit_time: Option<f64>,
    pub strategy_signal: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EquityPointRow {
    /// Unix epoch seconds.
    pub timestamp: f64,
    pub equity: f64,
    pub drawdown_pct: f64,
    pub open_positions: usize,
}

// =============================================================================
// TimeSeriesStore trait
// =============================================================================

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn initialize(&self) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;

    /// Ordered tick prices for a session + symbol.
    async fn tick_prices(&self, session_id: &str, symbol: &str) -> Result<Vec<TickPriceRow>, EngineError>;

    /// Ordered pre-aggregated OHLCV for a session + symbol at "1m"/"5m".
    async fn aggregated_ohlcv(
        &self,
        session_id: &str,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Ordered OHLCV rows resampled to `interval` between `[start, end]`
    /// epoch seconds.
    async fn ohlcv_resample(
        &self,
        symbol: &str,
        interval: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Latest value per indicator id for a symbol, optionally filtered.
    async fn latest_indicators(
        &self,
        symbol: &str,
        indicator_ids: Option<&[String]>,
    ) -> Result<HashMap<String, f64>, EngineError>;

    /// Indicator rows for a symbol with optional id / time / limit filters.
    async fn indicators(
        &self,
        symbol: &str,
        indicator_ids: Option<&[String]>,
        start: Option<f64>,
        end: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<IndicatorRow>, EngineError>;

    /// Insert a batch of indicator rows; returns the inserted count.
    async fn insert_indicators_batch(&self, rows: &[IndicatorRow]) -> Result<usize, EngineError>;

    // -- indicator_variants ------------------------------------------------

    async fn insert_variant(&self, row: VariantRow) -> Result<(), EngineError>;
    async fn fetch_variant(&self, id: &str) -> Result<Option<VariantRow>, EngineError>;
    /// Non-deleted variants matching the filter, newest first.
    async fn fetch_variants(&self, filter: &VariantFilter) -> Result<Vec<VariantRow>, EngineError>;
    /// Returns false when the variant does not exist or is deleted.
    async fn update_variant_row(&self, id: &str, patch: VariantRowPatch) -> Result<bool, EngineError>;
    /// Soft delete. Returns false when already deleted or missing.
    async fn mark_variant_deleted(&self, id: &str, deleted_at: NaiveDateTime) -> Result<bool, EngineError>;

    // -- backtest_sessions / trades / equity -------------------------------

    async fn fetch_backtest_session(&self, session_id: &str) -> Result<Option<BacktestSessionRow>, EngineError>;
    async fn update_backtest_session(
        &self,
        session_id: &str,
        patch: SessionStatusPatch,
    ) -> Result<(), EngineError>;
    async fn insert_backtest_trade(&self, trade: &BacktestTradeRow) -> Result<(), EngineError>;
    async fn insert_equity_points(
        &self,
        session_id: &str,
        points: &[EquityPointRow],
    ) -> Result<(), EngineError>;

    // -- strategies --------------------------------------------------------

    /// Strategy config JSON by id.
    async fn fetch_strategy_config(&self, strategy_id: &str) -> Result<Option<serde_json::Value>, EngineError>;
}

// =============================================================================
// WAL retry
// =============================================================================

/// Backoff offsets (seconds) between read attempts; total ≈ 3.7 s.
const WAL_RETRY_OFFSETS: [f64; 6] = [0.0, 0.2, 0.4, 0.6, 1.0, 1.5];

/// Run a read with bounded retry against WAL-visibility lag. Only
/// `TransientStore` errors are retried; anything else propagates
/// immediately. Retry counts are logged.
pub async fn wal_retry<T, F, Fut>(op_name: &str, mut operation: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut last_error: Option<EngineError> = None;

    for (attempt, offset) in WAL_RETRY_OFFSETS.iter().enumerate() {
        if *offset > 0.0 {
            tokio::time::sleep(std::time::Duration::from_secs_f64(*offset)).await;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(op = op_name, retries = attempt, "read succeeded after WAL retry");
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() => {
                debug!(op = op_name, attempt, error = %error, "transient read failure");
                last_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    warn!(op = op_name, attempts = WAL_RETRY_OFFSETS.len(), "WAL retry exhausted");
    Err(last_error.unwrap_or_else(|| EngineError::TransientStore("retry exhausted".into())))
}

// =============================================================================
// Helper: persistable indicator values
// =============================================================================

/// Convert in-memory indicator values into persistable rows, dropping nil
/// values. Fails with `InsufficientData` when every value is nil.
pub fn rows_from_values(
    session_id: &str,
    values: &[IndicatorValue],
) -> Result<Vec<IndicatorRow>, EngineError> {
    let rows: Vec<IndicatorRow> = values
        .iter()
        .filter_map(|v| {
            v.value.map(|value| IndicatorRow {
                session_id: session_id.to_string(),
                symbol: v.symbol.clone(),
                indicator_id: v.indicator_id.clone(),
                timestamp: v.timestamp,
                value,
            })
        })
        .collect();

    if rows.is_empty() {
        return Err(EngineError::InsufficientData(format!(
            "all {} values in series are nil",
            values.len()
        )));
    }

    Ok(rows)
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store used by tests, backtests, and paper mode. Writes are
/// immediately visible; the WAL contract is still honored by callers going
/// through `wal_retry`.
#[derive(Default)]
pub struct MemoryStore {
    tick_prices: RwLock<HashMap<(String, String), Vec<TickPriceRow>>>,
    ohlcv: RwLock<HashMap<(String, String, String), Vec<Candle>>>,
    resample: RwLock<HashMap<(String, String), Vec<Candle>>>,
    indicators: RwLock<Vec<IndicatorRow>>,
    variants: RwLock<HashMap<String, VariantRow>>,
    sessions: RwLock<HashMap<String, BacktestSessionRow>>,
    trades: RwLock<Vec<BacktestTradeRow>>,
    equity: RwLock<HashMap<String, Vec<EquityPointRow>>>,
    strategies: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding helpers ---------------------------------------------------

    pub fn seed_tick_prices(&self, session_id: &str, symbol: &str, mut rows: Vec<TickPriceRow>) {
        rows.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.tick_prices
            .write()
            .insert((session_id.to_string(), symbol.to_string()), rows);
    }

    pub fn seed_aggregated_ohlcv(&self, session_id: &str, symbol: &str, interval: &str, mut rows: Vec<Candle>) {
        rows.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.ohlcv.write().insert(
            (session_id.to_string(), symbol.to_string(), interval.to_string()),
            rows,
        );
    }

    pub fn seed_resample_ohlcv(&self, symbol: &str, interval: &str, mut rows: Vec<Candle>) {
        rows.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        self.resample
            .write()
            .insert((symbol.to_string(), interval.to_string()), rows);
    }

    pub fn insert_session(&self, row: BacktestSessionRow) {
        self.sessions.write().insert(row.session_id.clone(), row);
    }

    pub fn insert_strategy_config(&self, strategy_id: &str, config: serde_json::Value) {
        self.strategies.write().insert(strategy_id.to_string(), config);
    }

    pub fn trades_for_session(&self, session_id: &str) -> Vec<BacktestTradeRow> {
        self.trades
            .read()
            .iter()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn equity_for_session(&self, session_id: &str) -> Vec<EquityPointRow> {
        self.equity.read().get(session_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn tick_prices(&self, session_id: &str, symbol: &str) -> Result<Vec<TickPriceRow>, EngineError> {
        Ok(self
            .tick_prices
            .read()
            .get(&(session_id.to_string(), symbol.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn aggregated_ohlcv(
        &self,
        session_id: &str,
        symbol: &str,
        interval: &str,
    ) -> Result<Vec<Candle>, EngineError> {
        Ok(self
            .ohlcv
            .read()
            .get(&(session_id.to_string(), symbol.to_string(), interval.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn ohlcv_resample(
        &self,
        symbol: &str,
        interval: &str,
        start: f64,
        end: f64,
    ) -> Result<Vec<Candle>, EngineError> {
        Ok(self
            .resample
            .read()
            .get(&(symbol.to_string(), interval.to_string()))
            .map(|rows| {
                rows.iter()
                    .filter(|c| c.timestamp >= start && c.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest_indicators(
        &self,
        symbol: &str,
        indicator_ids: Option<&[String]>,
    ) -> Result<HashMap<String, f64>, EngineError> {
        let rows = self.indicators.read();
        let mut latest: HashMap<String, (f64, f64)> = HashMap::new();

        for row in rows.iter().filter(|r| r.symbol == symbol) {
            if let Some(ids) = indicator_ids {
                if !ids.contains(&row.indicator_id) {
                    continue;
                }
            }
            let entry = latest.entry(row.indicator_id.clone()).or_insert((f64::MIN, 0.0));
            if row.timestamp >= entry.0 {
                *entry = (row.timestamp, row.value);
            }
        }

        Ok(latest.into_iter().map(|(id, (_, value))| (id, value)).collect())
    }

    async fn indicators(
        &self,
        symbol: &str,
        indicator_ids: Option<&[String]>,
        start: Option<f64>,
        end: Option<f64>,
        limit: Option<usize>,
    ) -> Result<Vec<IndicatorRow>, EngineError> {
        let rows = self.indicators.read();
        let mut result: Vec<IndicatorRow> = rows
            .iter()
            .filter(|r| r.symbol == symbol)
            .filter(|r| indicator_ids.map_or(true, |ids| ids.contains(&r.indicator_id)))
            .filter(|r| start.map_or(true, |s| r.timestamp >= s))
            .filter(|r| end.map_or(true, |e| r.timestamp <= e))
            .cloned()
            .collect();

        result.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let Some(limit) = limit {
            result.truncate(limit);
        }

        Ok(result)
    }

    async fn insert_indicators_batch(&self, rows: &[IndicatorRow]) -> Result<usize, EngineError> {
        self.indicators.write().extend_from_slice(rows);
        Ok(rows.len())
    }

    async fn insert_variant(&self, row: VariantRow) -> Result<(), EngineError> {
        let mut variants = self.variants.write();
        if variants.contains_key(&row.id) {
            return Err(EngineError::FatalStore(format!("duplicate variant id {}", row.id)));
        }
        variants.insert(row.id.clone(), row);
        Ok(())
    }

    async fn fetch_variant(&self, id: &str) -> Result<Option<VariantRow>, EngineError> {
        Ok(self
            .variants
            .read()
            .get(id)
            .filter(|row| !row.is_deleted)
            .cloned())
    }

    async fn fetch_variants(&self, filter: &VariantFilter) -> Result<Vec<VariantRow>, EngineError> {
        let variants = self.variants.read();

        let mut result: Vec<VariantRow> = variants
            .values()
            .filter(|row| !row.is_deleted)
            .filter(|row| {
                filter
                    .variant_type
                    .as_ref()
                    .map_or(true, |vt| &row.variant_type == vt)
            })
            .filter(|row| {
                filter
                    .base_indicator_type
                    .as_ref()
                    .map_or(true, |bt| row.base_indicator_type == bt.to_uppercase())
            })
            .filter(|row| match (&filter.user_id, &filter.scope) {
                (Some(user_id), _) => {
                    if filter.include_global {
                        &row.user_id == user_id || row.scope == "global"
                    } else {
                        &row.user_id == user_id
                    }
                }
                (None, Some(scope)) => &row.scope == scope,
                (None, None) => true,
            })
            .cloned()
            .collect();

        // ORDER BY created_at DESC; id as tiebreaker for determinism.
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(result)
    }

    async fn update_variant_row(&self, id: &str, patch: VariantRowPatch) -> Result<bool, EngineError> {
        let mut variants = self.variants.write();
        let Some(row) = variants.get_mut(id).filter(|row| !row.is_deleted) else {
            return Ok(false);
        };

        if let Some(name) = patch.name {
            row.name = name;
        }
        if let Some(description) = patch.description {
            row.description = description;
        }
        if let Some(parameters) = patch.parameters {
            row.parameters = parameters;
        }
        if let Some(scope) = patch.scope {
            row.scope = scope;
        }
        row.updated_at = patch.updated_at;

        Ok(true)
    }

    async fn mark_variant_deleted(&self, id: &str, deleted_at: NaiveDateTime) -> Result<bool, EngineError> {
        let mut variants = self.variants.write();
        let Some(row) = variants.get_mut(id).filter(|row| !row.is_deleted) else {
            return Ok(false);
        };

        row.is_deleted = true;
        row.deleted_at = Some(deleted_at);
        Ok(true)
    }

    async fn fetch_backtest_session(&self, session_id: &str) -> Result<Option<BacktestSessionRow>, EngineError> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn update_backtest_session(
        &self,
        session_id: &str,
        patch: SessionStatusPatch,
    ) -> Result<(), EngineError> {
        let mut sessions = self.sessions.write();
        let Some(row) = sessions.get_mut(session_id) else {
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        };

        row.status = patch.status;
        if let Some(progress) = patch.progress_pct {
            row.progress_pct = progress;
        }
        if patch.current_timestamp.is_some() {
            row.current_timestamp = patch.current_timestamp;
        }
        if patch.final_pnl.is_some() {
            row.final_pnl = patch.final_pnl;
        }
        if patch.total_trades.is_some() {
            row.total_trades = patch.total_trades;
        }
        if patch.win_rate.is_some() {
            row.win_rate = patch.win_rate;
        }
        if patch.error_message.is_some() {
            row.error_message = patch.error_message;
        }
        if patch.completed_at.is_some() {
            row.completed_at = patch.completed_at;
        }

        Ok(())
    }

    async fn insert_backtest_trade(&self, trade: &BacktestTradeRow) -> Result<(), EngineError> {
        self.trades.write().push(trade.clone());
        Ok(())
    }

    async fn insert_equity_points(
        &self,
        session_id: &str,
        points: &[EquityPointRow],
    ) -> Result<(), EngineError> {
        self.equity
            .write()
            .entry(session_id.to_string())
            .or_default()
            .extend_from_slice(points);
        Ok(())
    }

    async fn fetch_strategy_config(&self, strategy_id: &str) -> Result<Option<serde_json::Value>, EngineError> {
        Ok(self.strategies.read().get(strategy_id).cloned())
    }
}
