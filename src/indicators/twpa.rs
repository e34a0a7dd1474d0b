// =============================================================================
// TWPA — Time-Weighted Price Average
// =============================================================================
//
// Integral of price over a sliding window divided by the window length.
// Each observed price is weighted by how long it remained the latest price,
// which makes the average robust against bursts of ticks at one level.
//
// Window: (t1, t2) = from `t1` seconds ago to `t2` seconds ago.

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct Twpa;

impl Algorithm for Twpa {
    fn indicator_type(&self) -> &'static str {
        "TWPA"
    }

    fn name(&self) -> &'static str {
        "Time-Weighted Price Average"
    }

    fn description(&self) -> &'static str {
        "Average price over a sliding window, weighted by how long each price was valid"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(60.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of window in seconds ago",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of window in seconds ago (0 = now)",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 60.0);
        let t2 = params.get_f64("t2", 0.0);

        if t1 <= t2 {
            return Err(EngineError::InvalidParameter {
                name: "t1".into(),
                reason: format!("window is empty: t1 ({t1}) must be > t2 ({t2})"),
            });
        }

        Ok(vec![WindowSpec::price(t1, t2)])
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
        let window = windows.first()?;
        time_weighted_average(window.point_series()?, window.start_ts, window.end_ts)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: serde_json::Value) -> IndicatorParameters {
        IndicatorParameters::from_value(value)
    }

    #[test]
    fn computes_twa_over_single_window() {
        let algo = Twpa;
        let window = DataWindow::points(vec![(0.0, 100.0), (5.0, 200.0)], 0.0, 10.0);
        let value = algo
            .calculate_from_windows(&[window], &params(json!({"t1": 10.0, "t2": 0.0})))
            .unwrap();
        assert!((value - 150.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_yields_none() {
        let algo = Twpa;
        let window = DataWindow::points(vec![], 0.0, 10.0);
        assert_eq!(algo.calculate_from_windows(&[window], &params(json!({}))), None);
    }

    #[test]
    fn rejects_inverted_window() {
        let algo = Twpa;
        assert!(algo.window_specs(&params(json!({"t1": 5.0, "t2": 10.0}))).is_err());
    }

    #[test]
    fn refresh_tier_follows_window_length() {
        let algo = Twpa;
        assert_eq!(algo.refresh_interval(&params(json!({"t1": 5.0}))), 1.0);
        assert_eq!(algo.refresh_interval(&params(json!({"t1": 120.0}))), 10.0);
        assert_eq!(algo.refresh_interval(&params(json!({"t1": 120.0, "r": 0.1}))), 0.5);
    }
}
