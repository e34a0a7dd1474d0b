// =============================================================================
// DUMP_EXHAUSTION_SCORE — Multi-factor dump completion score [0, 100]
// =============================================================================
//
// Weighted composite of four sub-scores, each granted full / half / zero
// points against a tunable threshold:
//
//   1. Velocity stabilization (30) - |velocity| < velocity_threshold
//   2. Volume normalization   (25) - volume ratio < volume_threshold
//   3. Retracement depth      (25) - retracement >= retracement_threshold
//   4. Bid-ask neutralization (20) - avg imbalance > imbalance_threshold
//
// Requires `peak_price` and `current_price` parameters for the retracement
// factor. Scores >= 70 indicate the dump is likely complete.

use crate::error::EngineError;
use crate::indicators::window_calculations::{volume_average, volume_median};
use crate::indicators::{velocity_between_windows, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct DumpExhaustionScore;

impl DumpExhaustionScore {
    /// Velocity stabilization factor: 0-30 points.
    fn velocity_score(current: &DataWindow, baseline: &DataWindow, params: &IndicatorParameters) -> Option<f64> {
        let velocity = velocity_between_windows(current, baseline)?.abs();
        let threshold = params.get_f64("velocity_threshold", 0.1);

        Some(if velocity < threshold {
            30.0
        } else if velocity < threshold * 2.0 {
            15.0
        } else {
            0.0
        })
    }

    /// Volume normalization factor: 0-25 points.
    fn volume_score(current: &DataWindow, baseline: &DataWindow, params: &IndicatorParameters) -> Option<f64> {
        let current_volume = volume_average(current.point_series()?, current.start_ts, current.end_ts)?;
        let baseline_volume = volume_median(baseline.point_series()?, baseline.start_ts, baseline.end_ts)?;

        if baseline_volume == 0.0 {
            return None;
        }

        let ratio = current_volume / baseline_volume;
        let threshold = params.get_f64("volume_threshold", 0.8);

        Some(if ratio < threshold {
            25.0
        } else if ratio < threshold * 1.5 {
            12.5
        } else {
            0.0
        })
    }

    /// Retracement depth factor: 0-25 points. Always contributes.
    fn retracement_score(peak_price: f64, current_price: f64, params: &IndicatorParameters) -> f64 {
        if peak_price == 0.0 {
            return 0.0;
        }

        let retracement_pct = (peak_price - current_price) / peak_price * 100.0;
        let threshold = params.get_f64("retracement_threshold", 40.0);

        if retracement_pct >= threshold {
            25.0
        } else if retracement_pct >= threshold * 0.7 {
            12.5
        } else {
            0.0
        }
    }

    /// Bid-ask neutralization factor: 0-20 points.
    fn imbalance_score(window: &DataWindow, params: &IndicatorParameters) -> Option<f64> {
        let snapshots = window.snapshots()?;

        let mut total = 0.0;
        let mut count = 0usize;
        for snap in snapshots {
            if snap.timestamp < window.start_ts || snap.timestamp > window.end_ts {
                continue;
            }
            if let Some(imb) = snap.imbalance_pct() {
                total += imb;
                count += 1;
            }
        }

        if count == 0 {
            return None;
        }

        let avg_imbalance = total / count as f64;
        let threshold = params.get_f64("imbalance_threshold", -10.0);

        Some(if avg_imbalance > threshold {
            20.0
        } else if avg_imbalance > threshold - 20.0 {
            10.0
        } else {
            0.0
        })
    }
}

impl Algorithm for DumpExhaustionScore {
    fn indicator_type(&self) -> &'static str {
        "DUMP_EXHAUSTION_SCORE"
    }

    fn name(&self) -> &'static str {
        "Dump Exhaustion Score"
    }

    fn description(&self) -> &'static str {
        "Multi-factor score detecting dump completion - combines velocity, volume, retracement, and imbalance"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float("velocity_t1", Some(10.0), Some(1.0), Some(3600.0), true, "Velocity current window length (seconds)"),
            VariantParameter::float("velocity_t3", Some(40.0), Some(1.0), Some(86400.0), true, "Velocity baseline lookback (seconds)"),
            VariantParameter::float("velocity_d", Some(10.0), Some(1.0), Some(3600.0), true, "Velocity baseline window length (seconds)"),
            VariantParameter::float("volume_t1", Some(30.0), Some(1.0), Some(3600.0), true, "Current volume window start (seconds ago)"),
            VariantParameter::float("volume_t2", Some(0.0), Some(0.0), Some(3600.0), true, "Current volume window end (seconds ago)"),
            VariantParameter::float("volume_t3", Some(600.0), Some(1.0), Some(86400.0), true, "Baseline volume window start (seconds ago)"),
            VariantParameter::float("volume_t4", Some(30.0), Some(0.0), Some(86400.0), true, "Baseline volume window end (seconds ago)"),
            VariantParameter::float("imbalance_t1", Some(30.0), Some(1.0), Some(3600.0), true, "Imbalance window length (seconds)"),
            VariantParameter::float("imbalance_t2", Some(0.0), Some(0.0), Some(3600.0), true, "Imbalance window end (seconds ago)"),
            VariantParameter::float("peak_price", None, None, None, true, "Peak price for retracement calculation (required)"),
            VariantParameter::float("current_price", None, None, None, true, "Current price for retracement calculation (required)"),
            VariantParameter::float("velocity_threshold", Some(0.1), Some(0.01), Some(1.0), false, "Velocity stabilization threshold (% per second)"),
            VariantParameter::float("volume_threshold", Some(0.8), Some(0.1), Some(2.0), false, "Volume normalization threshold (ratio to baseline)"),
            VariantParameter::float("retracement_threshold", Some(40.0), Some(10.0), Some(90.0), false, "Minimum retracement percentage for points"),
            VariantParameter::float("imbalance_threshold", Some(-10.0), Some(-50.0), Some(50.0), false, "Bid-ask imbalance threshold (sell pressure dissipated)"),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let v_t1 = params.get_f64("velocity_t1", 10.0);
        let v_t3 = params.get_f64("velocity_t3", 40.0);
        let v_d = params.get_f64("velocity_d", 10.0);

        let vol_t1 = params.get_f64("volume_t1", 30.0);
        let vol_t2 = params.get_f64("volume_t2", 0.0);
        let vol_t3 = params.get_f64("volume_t3", 600.0);
        let vol_t4 = params.get_f64("volume_t4", 30.0);

        let imb_t1 = params.get_f64("imbalance_t1", 30.0);
        let imb_t2 = params.get_f64("imbalance_t2", 0.0);

        if v_t3 < v_d {
            return Err(EngineError::InvalidParameter {
                name: "velocity_t3".into(),
                reason: format!("velocity_t3 ({v_t3}) must be >= velocity_d ({v_d})"),
            });
        }

        Ok(vec![
            WindowSpec::price(v_t1, 0.0),
            WindowSpec::price(v_t3, v_t3 - v_d),
            WindowSpec::volume(vol_t1, vol_t2),
            WindowSpec::volume(vol_t3, vol_t4),
            WindowSpec::orderbook(imb_t1, imb_t2),
        ])
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

        let velocity_t1 = params.get_f64("velocity_t1", 10.0);
        if velocity_t1 <= 10.0 {
            1.0
        } else if velocity_t1 <= 30.0 {
            2.0
        } else {
            5.0
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        if windows.len() < 5 {
            return None;
        }

        let peak_price = params.get("peak_price").and_then(|v| v.as_f64())?;
        let current_price = params.get("current_price").and_then(|v| v.as_f64())?;

        let mut total_score = 0.0;

        if let Some(score) = Self::velocity_score(&windows[0], &windows[1], params) {
            total_score += score;
        }
        if let Some(score) = Self::volume_score(&windows[2], &windows[3], params) {
            total_score += score;
        }
        total_score += Self::retracement_score(peak_price, current_price, params);
        if let Some(score) = Self::imbalance_score(&windows[4], params) {
            total_score += score;
        }

        Some(total_score)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderBookSnapshot;
    use serde_json::json;

    fn snap(timestamp: f64, bid_qty: f64, ask_qty: f64) -> OrderBookSnapshot {
        OrderBookSnapshot {
            timestamp,
            best_bid: 60.0,
            best_ask: 60.1,
            bid_qty,
            ask_qty,
        }
    }

    /// Windows describing a fully exhausted dump: flat price, collapsed
    /// volume, balanced book.
    fn exhausted_windows() -> Vec<DataWindow> {
        // Flat price => |velocity| = 0 < 0.1.
        let velocity_current = DataWindow::points(vec![(50.0, 60.0)], 50.0, 60.0);
        let velocity_baseline = DataWindow::points(vec![(20.0, 60.0)], 20.0, 30.0);
        // Current flow 0.1/s vs baseline median 10 => ratio 0.01 < 0.8.
        let volume_current = DataWindow::points(vec![(55.0, 1.0)], 50.0, 60.0);
        let volume_baseline = DataWindow::points(vec![(10.0, 10.0), (20.0, 10.0), (30.0, 10.0)], 0.0, 50.0);
        // Balanced book => imbalance 0 > -10.
        let imbalance = DataWindow::orderbook(vec![snap(55.0, 5.0, 5.0)], 50.0, 60.0);

        vec![velocity_current, velocity_baseline, volume_current, volume_baseline, imbalance]
    }

    #[test]
    fn exhausted_dump_scores_full_marks() {
        let algo = DumpExhaustionScore;
        // Price retraced 50% from the peak.
        let params = IndicatorParameters::from_value(json!({
            "peak_price": 120.0,
            "current_price": 60.0
        }));
        let score = algo.calculate_from_windows(&exhausted_windows(), &params).unwrap();
        assert!((score - 100.0).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn shallow_retracement_loses_25_points() {
        let algo = DumpExhaustionScore;
        // Only 10% off the peak: retracement factor scores zero.
        let params = IndicatorParameters::from_value(json!({
            "peak_price": 120.0,
            "current_price": 108.0
        }));
        let score = algo.calculate_from_windows(&exhausted_windows(), &params).unwrap();
        assert!((score - 75.0).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn missing_price_context_yields_none() {
        let algo = DumpExhaustionScore;
        let params = IndicatorParameters::from_value(json!({"peak_price": 120.0}));
        assert_eq!(algo.calculate_from_windows(&exhausted_windows(), &params), None);
    }

    #[test]
    fn five_windows_required() {
        let algo = DumpExhaustionScore;
        let params = IndicatorParameters::from_value(json!({
            "peak_price": 120.0,
            "current_price": 60.0
        }));
        assert_eq!(algo.calculate_from_windows(&exhausted_windows()[..3], &params), None);
    }

    #[test]
    fn spec_layout_is_price_price_volume_volume_orderbook() {
        use crate::types::WindowKind;
        let algo = DumpExhaustionScore;
        let specs = algo.window_specs(&IndicatorParameters::default()).unwrap();
        assert_eq!(specs.len(), 5);
        assert_eq!(specs[0].kind, WindowKind::Price);
        assert_eq!(specs[1].kind, WindowKind::Price);
        assert_eq!(specs[2].kind, WindowKind::Volume);
        assert_eq!(specs[3].kind, WindowKind::Volume);
        assert_eq!(specs[4].kind, WindowKind::OrderBook);
    }
}
