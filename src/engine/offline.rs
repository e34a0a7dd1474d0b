// =============================================================================
// Offline Indicator Engine — historical series on a uniform time grid
// =============================================================================
//
// Computes an indicator series over a loaded symbol history. Values are
// emitted on a uniform grid at the variant's refresh interval, NOT at raw
// tick timestamps: offline consumers compare values across variants at
// identical timestamps, so even millisecond drift is unacceptable. Grid
// slots are generated by multiplication (`t_start + i * Δ`), never by
// accumulation, keeping alignment within 1e-6 s over long series.
//
// Warm-up slots whose windows lack sufficient data carry a nil value; nil
// values are preserved in memory and dropped at persistence time.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::windows;
use crate::error::EngineError;
use crate::indicators::registry::AlgorithmRegistry;
use crate::indicators::IndicatorParameters;
use crate::store::{rows_from_values, TimeSeriesStore};
use crate::types::{CancelToken, IndicatorValue, MarketDataPoint};

/// Generate the uniform time axis `{start, start + Δ, …}` up to and
/// including `end` (within 1e-9 slack for float rounding).
fn time_axis(start: f64, end: f64, interval: f64) -> Vec<f64> {
    let mut axis = Vec::new();
    let mut i: u64 = 0;

    loop {
        let t = start + i as f64 * interval;
        if t > end + 1e-9 {
            break;
        }
        axis.push(t);
        i += 1;
    }

    axis
}

pub struct OfflineIndicatorEngine {
    registry: Arc<AlgorithmRegistry>,
}

impl OfflineIndicatorEngine {
    pub fn new(registry: Arc<AlgorithmRegistry>) -> Self {
        Self { registry }
    }

    /// Compute a grid-aligned indicator series from raw market data.
    ///
    /// The grid starts at the first input timestamp and ends at or before
    /// the last. A cancellation observed mid-series aborts at the next grid
    /// slot and returns the partial series.
    pub fn calculate_series(
        &self,
        symbol: &str,
        indicator_type: &str,
        timeframe: &str,
        period: usize,
        params: &IndicatorParameters,
        points: &[MarketDataPoint],
        cancel: &CancelToken,
    ) -> Result<Vec<IndicatorValue>, EngineError> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let algorithm = self
            .registry
            .get(indicator_type)
            .ok_or_else(|| EngineError::UnknownAlgorithm {
                indicator_type: indicator_type.to_string(),
                available: self.registry.indicator_types(),
            })?;

        let window_specs = algorithm.window_specs(params)?;

        let mut sorted: Vec<MarketDataPoint> = points.to_vec();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let prices: Vec<(f64, f64)> = sorted.iter().map(|p| (p.timestamp, p.price)).collect();
        let volumes: Vec<(f64, f64)> = sorted.iter().map(|p| (p.timestamp, p.volume)).collect();

        // Override keys win; otherwise the offline grid defaults to 1 Hz.
        let refresh_interval = params.refresh_override().unwrap_or(1.0);

        let start_ts = sorted[0].timestamp;
        let end_ts = sorted[sorted.len() - 1].timestamp;
        let axis = time_axis(start_ts, end_ts, refresh_interval);

        let indicator_id = format!("{indicator_type}_{period}_{timeframe}");
        let metadata = serde_json::json!({
            "timeframe": timeframe,
            "params": params.as_value(),
            "refresh_interval_seconds": refresh_interval,
        });

        let mut series = Vec::with_capacity(axis.len());

        for target_ts in axis {
            if cancel.is_cancelled() {
                warn!(
                    symbol,
                    indicator_type,
                    computed = series.len(),
                    "series calculation cancelled; returning partial series"
                );
                return Ok(series);
            }

            let assembled = windows::assemble(&prices, &volumes, &[], target_ts, &window_specs);
            let value = algorithm.calculate_from_windows(&assembled, params);

            series.push(IndicatorValue {
                timestamp: target_ts,
                symbol: symbol.to_string(),
                indicator_id: indicator_id.clone(),
                value,
                metadata: metadata.clone(),
            });
        }

        debug!(
            symbol,
            indicator_type,
            total_points = series.len(),
            valid_points = series.iter().filter(|v| v.value.is_some()).count(),
            "indicator series calculated"
        );

        Ok(series)
    }

    /// Load a symbol's historical series from the store: pre-aggregated
    /// OHLCV first (close as price), tick prices as the fallback.
    pub async fn load_series(
        &self,
        store: &dyn TimeSeriesStore,
        session_id: &str,
        symbol: &str,
    ) -> Result<Vec<MarketDataPoint>, EngineError> {
        let mut points: Vec<MarketDataPoint> = store
            .aggregated_ohlcv(session_id, symbol, "1m")
            .await?
            .into_iter()
            .map(|c| MarketDataPoint::new(c.timestamp, symbol, c.close, c.volume))
            .collect();

        if points.is_empty() {
            points = store
                .tick_prices(session_id, symbol)
                .await?
                .into_iter()
                .map(|t| MarketDataPoint::new(t.timestamp, symbol, t.price, t.volume))
                .collect();
        }

        points.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        info!(
            session_id,
            symbol,
            data_points = points.len(),
            "symbol data loaded"
        );

        Ok(points)
    }

    /// Persist a computed series, dropping nil values. A fully-nil series is
    /// reported as `InsufficientData` and nothing is written.
    pub async fn persist_series(
        &self,
        store: &dyn TimeSeriesStore,
        session_id: &str,
        values: &[IndicatorValue],
    ) -> Result<usize, EngineError> {
        let rows = rows_from_values(session_id, values)?;
        let inserted = store.insert_indicators_batch(&rows).await?;

        info!(
            session_id,
            inserted,
            dropped = values.len() - inserted,
            "indicator series persisted"
        );

        Ok(inserted)
    }
}
