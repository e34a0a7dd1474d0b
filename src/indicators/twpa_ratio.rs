// =============================================================================
// TWPA_RATIO — Ratio of two time-weighted price averages
// =============================================================================
//
// Formula: TWPA(t1, t2) / TWPA(t3, t4)
//
// A ratio above 1.0 means the recent window trades above the baseline window.
// Constant price series converge to exactly 1.0.

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct TwpaRatio;

impl TwpaRatio {
    fn window_twpa(window: &DataWindow) -> Option<f64> {
        time_weighted_average(window.point_series()?, window.start_ts, window.end_ts)
    }
}

impl Algorithm for TwpaRatio {
    fn indicator_type(&self) -> &'static str {
        "TWPA_RATIO"
    }

    fn name(&self) -> &'static str {
        "TWPA Ratio"
    }

    fn description(&self) -> &'static str {
        "Ratio of current TWPA to baseline TWPA - relative price level of two windows"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(60.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of current window in seconds ago",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of current window in seconds ago (0 = now)",
            ),
            VariantParameter::float(
                "t3",
                Some(300.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of baseline window in seconds ago",
            ),
            VariantParameter::float(
                "t4",
                Some(180.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of baseline window in seconds ago",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 60.0);
        let t2 = params.get_f64("t2", 0.0);
        let t3 = params.get_f64("t3", 300.0);
        let t4 = params.get_f64("t4", 180.0);

        if t1 <= t2 {
            return Err(EngineError::InvalidParameter {
                name: "t1".into(),
                reason: format!("current window is empty: t1 ({t1}) must be > t2 ({t2})"),
            });
        }
        if t3 <= t4 {
            return Err(EngineError::InvalidParameter {
                name: "t3".into(),
                reason: format!("baseline window is empty: t3 ({t3}) must be > t4 ({t4})"),
            });
        }

        Ok(vec![WindowSpec::price(t1, t2), WindowSpec::price(t3, t4)])
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        match params.refresh_override() {
            Some(secs) => self.clamp_refresh(secs),
            None => tiered_refresh_interval(params.get_f64("t1", 60.0)),
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], _params: &IndicatorParameters) -> Option<f64> {
        if windows.len() != 2 {
            return None;
        }

        let current = Self::window_twpa(&windows[0])?;
        let baseline = Self::window_twpa(&windows[1])?;

        if baseline == 0.0 {
            return None;
        }

        Some(current / baseline)
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
        IndicatorParameters::from_value(json!({"t1": 10.0, "t2": 0.0, "t3": 30.0, "t4": 20.0}))
    }

    #[test]
    fn constant_series_gives_unit_ratio() {
        let algo = TwpaRatio;
        let current = DataWindow::points(vec![(0.0, 100.0)], 0.0, 10.0);
        let baseline = DataWindow::points(vec![(0.0, 100.0)], 20.0, 30.0);
        let ratio = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!((ratio - 1.0).abs() < 1e-6);
    }

    #[test]
    fn ratio_above_one_for_rising_price() {
        let algo = TwpaRatio;
        let current = DataWindow::points(vec![(0.0, 110.0)], 0.0, 10.0);
        let baseline = DataWindow::points(vec![(0.0, 100.0)], 20.0, 30.0);
        let ratio = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!((ratio - 1.1).abs() < 1e-9);
    }

    #[test]
    fn zero_baseline_yields_none() {
        let algo = TwpaRatio;
        let current = DataWindow::points(vec![(0.0, 110.0)], 0.0, 10.0);
        let baseline = DataWindow::points(vec![(0.0, 0.0)], 20.0, 30.0);
        assert_eq!(algo.calculate_from_windows(&[current, baseline], &params()), None);
    }

    #[test]
    fn wrong_window_count_yields_none() {
        let algo = TwpaRatio;
        let current = DataWindow::points(vec![(0.0, 110.0)], 0.0, 10.0);
        assert_eq!(algo.calculate_from_windows(&[current], &params()), None);
    }
}
