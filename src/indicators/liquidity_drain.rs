// =============================================================================
// LIQUIDITY_DRAIN_INDEX — Order-book liquidity depletion percentage
// =============================================================================
//
// Formula: ((baseline_liquidity - current_liquidity) / baseline_liquidity) * 100
//
// Total liquidity per snapshot = bid_qty * best_bid + ask_qty * best_ask,
// averaged over each window. Positive values mean liquidity is draining
// (the book thinned out versus the baseline window).

use crate::error::EngineError;
use crate::indicators::{Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, OrderBookSnapshot, WindowSpec};

pub struct LiquidityDrainIndex;

impl LiquidityDrainIndex {
    /// Mean total liquidity of the snapshots inside `[start_ts, end_ts]`.
    fn average_total_liquidity(snapshots: &[OrderBookSnapshot], start_ts: f64, end_ts: f64) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0usize;

        for snap in snapshots {
            if snap.timestamp >= start_ts && snap.timestamp <= end_ts {
                total += snap.total_liquidity();
                count += 1;
            }
        }

        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }
}

impl Algorithm for LiquidityDrainIndex {
    fn indicator_type(&self) -> &'static str {
        "LIQUIDITY_DRAIN_INDEX"
    }

    fn name(&self) -> &'static str {
        "Liquidity Drain Index"
    }

    fn description(&self) -> &'static str {
        "Percentage of order-book liquidity drained versus a baseline window"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(30.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Start of current liquidity window in seconds ago",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(3600.0),
                true,
                "End of current liquidity window in seconds ago (0 = now)",
            ),
            VariantParameter::float(
                "t3",
                Some(600.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of baseline liquidity window in seconds ago",
            ),
            VariantParameter::float(
                "t4",
                Some(30.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of baseline liquidity window in seconds ago",
            ),
            VariantParameter::float(
                "min_baseline",
                Some(100.0),
                Some(0.0),
                Some(1e9),
                false,
                "Minimum baseline liquidity to avoid division by zero",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 30.0);
        let t2 = params.get_f64("t2", 0.0);
        let t3 = params.get_f64("t3", 600.0);
        let t4 = params.get_f64("t4", 30.0);

        if t1 < t2 {
            return Err(EngineError::InvalidParameter {
                name: "t1".into(),
                reason: format!("invalid current window: t1 ({t1}) must be >= t2 ({t2})"),
            });
        }
        if t3 < t4 {
            return Err(EngineError::InvalidParameter {
                name: "t3".into(),
                reason: format!("invalid baseline window: t3 ({t3}) must be >= t4 ({t4})"),
            });
        }

        Ok(vec![WindowSpec::orderbook(t1, t2), WindowSpec::orderbook(t3, t4)])
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn default_refresh_interval(&self) -> f64 {
        2.0
    }

    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        if let Some(secs) = params.refresh_override() {
            return self.clamp_refresh(secs);
        }

        let t2 = params.get_f64("t2", 0.0);
        if t2 <= 1.0 {
            1.0
        } else if t2 <= 30.0 {
            2.0
        } else if t2 <= 60.0 {
            5.0
        } else {
            10.0
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        if windows.len() != 2 {
            return None;
        }

        let current = Self::average_total_liquidity(
            windows[0].snapshots()?,
            windows[0].start_ts,
            windows[0].end_ts,
        )?;
        let baseline = Self::average_total_liquidity(
            windows[1].snapshots()?,
            windows[1].start_ts,
            windows[1].end_ts,
        )?;

        let min_baseline = params.get_f64("min_baseline", 100.0);
        if baseline < min_baseline {
            return None;
        }

        Some((baseline - current) / baseline * 100.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(timestamp: f64, qty: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            timestamp,
            best_bid: 100.0,
            best_ask: 100.0,
            bid_qty: qty,
            ask_qty: qty,
        }
    }

    fn params() -> IndicatorParameters {
        IndicatorParameters::from_value(json!({"t1": 10.0, "t2": 0.0, "t3": 60.0, "t4": 10.0}))
    }

    #[test]
    fn half_drained_book_reads_fifty_percent() {
        let algo = LiquidityDrainIndex;
        // Baseline: 10 qty both sides (2000 liquidity); current: 5 qty (1000).
        let current = DataWindow::orderbook(vec![snap(55.0, 5.0)], 50.0, 60.0);
        let baseline = DataWindow::orderbook(vec![snap(10.0, 10.0), snap(20.0, 10.0)], 0.0, 50.0);
        let drain = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!((drain - 50.0).abs() < 1e-9, "got {drain}");
    }

    #[test]
    fn refilling_book_reads_negative() {
        let algo = LiquidityDrainIndex;
        let current = DataWindow::orderbook(vec![snap(55.0, 20.0)], 50.0, 60.0);
        let baseline = DataWindow::orderbook(vec![snap(10.0, 10.0)], 0.0, 50.0);
        let drain = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!(drain < 0.0);
    }

    #[test]
    fn thin_baseline_yields_none() {
        let algo = LiquidityDrainIndex;
        let current = DataWindow::orderbook(vec![snap(55.0, 5.0)], 50.0, 60.0);
        let baseline = DataWindow::orderbook(vec![snap(10.0, 0.0001)], 0.0, 50.0);
        assert_eq!(algo.calculate_from_windows(&[current, baseline], &params()), None);
    }

    #[test]
    fn empty_windows_yield_none() {
        let algo = LiquidityDrainIndex;
        let current = DataWindow::orderbook(vec![], 50.0, 60.0);
        let baseline = DataWindow::orderbook(vec![snap(10.0, 10.0)], 0.0, 50.0);
        assert_eq!(algo.calculate_from_windows(&[current, baseline], &params()), None);
    }
}
