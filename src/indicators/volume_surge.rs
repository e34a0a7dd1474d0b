// =============================================================================
// VOLUME_SURGE_RATIO — Current volume flow vs baseline volume median
// =============================================================================
//
// Formula: current_volume_avg / baseline_volume_median
//
// Where:
//   current_volume_avg     = volume per second in window (t1, t2)
//   baseline_volume_median = median tick volume in window (t3, t4)
//
// The median baseline is robust against outliers. Ratios well above 1.0
// indicate the abnormal volume typical of pump activity.

use crate::error::EngineError;
use crate::indicators::window_calculations::{volume_average, volume_median};
use crate::indicators::{Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct VolumeSurgeRatio;

impl Algorithm for VolumeSurgeRatio {
    fn indicator_type(&self) -> &'static str {
        "VOLUME_SURGE_RATIO"
    }

    fn name(&self) -> &'static str {
        "Volume Surge Ratio"
    }

    fn description(&self) -> &'static str {
        "Ratio of current volume flow to baseline volume median - detects volume spikes"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(30.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Start of current volume window in seconds ago",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(3600.0),
                true,
                "End of current volume window in seconds ago (0 = now)",
            ),
            VariantParameter::float(
                "t3",
                Some(600.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of baseline volume window in seconds ago",
            ),
            VariantParameter::float(
                "t4",
                Some(30.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of baseline volume window in seconds ago",
            ),
            VariantParameter::float(
                "min_baseline",
                Some(0.001),
                Some(0.0001),
                Some(1.0),
                false,
                "Minimum baseline volume to avoid division by zero",
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

        Ok(vec![WindowSpec::volume(t1, t2), WindowSpec::volume(t3, t4)])
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

        // The window end (t2) sets how close to real time this instance runs.
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

        let current = &windows[0];
        let baseline = &windows[1];

        let current_avg = volume_average(current.point_series()?, current.start_ts, current.end_ts)?;
        let baseline_median = volume_median(baseline.point_series()?, baseline.start_ts, baseline.end_ts)?;

        let min_baseline = params.get_f64("min_baseline", 0.001);
        if baseline_median < min_baseline {
            return None;
        }

        Some(current_avg / baseline_median)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> IndicatorParameters {
        IndicatorParameters::from_value(json!({"t1": 3.0, "t2": 0.0, "t3": 30.0, "t4": 3.0}))
    }

    #[test]
    fn five_times_surge_exceeds_three() {
        let algo = VolumeSurgeRatio;
        // Current: 10 units/s for 3 seconds.
        let current = DataWindow::points(vec![(27.5, 10.0), (28.5, 10.0), (29.5, 10.0)], 27.0, 30.0);
        // Baseline: ticks of 2 units each second.
        let baseline_points: Vec<(f64, f64)> = (0..27).map(|i| (i as f64, 2.0)).collect();
        let baseline = DataWindow::points(baseline_points, 0.0, 27.0);

        let ratio = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!(ratio > 3.0, "got {ratio}");
    }

    #[test]
    fn equal_flow_is_near_one() {
        let algo = VolumeSurgeRatio;
        // One 2-unit tick per second everywhere.
        let current = DataWindow::points(vec![(27.5, 2.0), (28.5, 2.0), (29.5, 2.0)], 27.0, 30.0);
        let baseline_points: Vec<(f64, f64)> = (0..27).map(|i| (i as f64, 2.0)).collect();
        let baseline = DataWindow::points(baseline_points, 0.0, 27.0);

        let ratio = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!(ratio > 0.8 && ratio < 1.2, "got {ratio}");
    }

    #[test]
    fn tiny_baseline_yields_none() {
        let algo = VolumeSurgeRatio;
        let current = DataWindow::points(vec![(28.0, 10.0)], 27.0, 30.0);
        let baseline = DataWindow::points(vec![(5.0, 0.0000001)], 0.0, 27.0);
        assert_eq!(algo.calculate_from_windows(&[current, baseline], &params()), None);
    }

    #[test]
    fn refresh_follows_window_end_tier() {
        let algo = VolumeSurgeRatio;
        let p = IndicatorParameters::from_value(json!({"t2": 0.0}));
        assert_eq!(algo.refresh_interval(&p), 1.0);
        let p = IndicatorParameters::from_value(json!({"t2": 45.0}));
        assert_eq!(algo.refresh_interval(&p), 5.0);
    }
}
