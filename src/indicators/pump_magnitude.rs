// =============================================================================
// PUMP_MAGNITUDE_PCT — Percentage price change from baseline to current TWPA
// =============================================================================
//
// Formula: ((current_twpa - baseline_twpa) / baseline_twpa) * 100
//
// Where:
//   current_twpa  = TWPA(t1, 0)      - recent price level
//   baseline_twpa = TWPA(t3, t3 - d) - historical price level
//
// TWPAs are used instead of raw prices to reduce noise and false signals.
// Positive values indicate a pump in progress, negative values a decline.

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct PumpMagnitudePct;

impl Algorithm for PumpMagnitudePct {
    fn indicator_type(&self) -> &'static str {
        "PUMP_MAGNITUDE_PCT"
    }

    fn name(&self) -> &'static str {
        "Pump Magnitude Percentage"
    }

    fn description(&self) -> &'static str {
        "Percentage price change from baseline TWPA to current TWPA - detects pump conditions"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(10.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Length of current price window in seconds",
            ),
            VariantParameter::float(
                "t3",
                Some(60.0),
                Some(1.0),
                Some(86400.0),
                true,
                "How far back to look for baseline start in seconds",
            ),
            VariantParameter::float(
                "d",
                Some(30.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Length of baseline window in seconds",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 10.0);
        let t3 = params.get_f64("t3", 60.0);
        let d = params.get_f64("d", 30.0);

        // The baseline window must not extend into the future.
        if t3 < d {
            return Err(EngineError::InvalidParameter {
                name: "t3".into(),
                reason: format!("t3 ({t3}) must be >= d ({d})"),
            });
        }

        Ok(vec![WindowSpec::price(t1, 0.0), WindowSpec::price(t3, t3 - d)])
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        match params.refresh_override() {
            Some(secs) => self.clamp_refresh(secs),
            None => tiered_refresh_interval(params.get_f64("t1", 10.0)),
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], _params: &IndicatorParameters) -> Option<f64> {
        if windows.len() != 2 {
            return None;
        }

        let current = &windows[0];
        let baseline = &windows[1];

        let current_twpa = time_weighted_average(current.point_series()?, current.start_ts, current.end_ts)?;
        let baseline_twpa = time_weighted_average(baseline.point_series()?, baseline.start_ts, baseline.end_ts)?;

        if baseline_twpa == 0.0 {
            return None;
        }

        Some((current_twpa - baseline_twpa) / baseline_twpa * 100.0)
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
        IndicatorParameters::from_value(json!({"t1": 10.0, "t3": 60.0, "d": 30.0}))
    }

    #[test]
    fn ten_percent_pump_lands_between_8_and_12() {
        let algo = PumpMagnitudePct;
        // Current window [50, 60]: prices 105 then 110.
        let current = DataWindow::points(vec![(50.0, 105.0), (55.0, 110.0)], 50.0, 60.0);
        // Baseline window [0, 30]: flat 100.
        let baseline = DataWindow::points(
            vec![(0.0, 100.0), (10.0, 100.0), (20.0, 100.0)],
            0.0,
            30.0,
        );

        let magnitude = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!(magnitude > 8.0 && magnitude < 12.0, "got {magnitude}");
    }

    #[test]
    fn flat_series_has_zero_magnitude() {
        let algo = PumpMagnitudePct;
        let current = DataWindow::points(vec![(50.0, 100.0)], 50.0, 60.0);
        let baseline = DataWindow::points(vec![(0.0, 100.0)], 0.0, 30.0);
        let magnitude = algo.calculate_from_windows(&[current, baseline], &params()).unwrap();
        assert!(magnitude.abs() < 1e-9);
    }

    #[test]
    fn rejects_baseline_extending_into_future() {
        let algo = PumpMagnitudePct;
        let bad = IndicatorParameters::from_value(json!({"t1": 10.0, "t3": 20.0, "d": 30.0}));
        assert!(algo.window_specs(&bad).is_err());
    }

    #[test]
    fn empty_baseline_yields_none() {
        let algo = PumpMagnitudePct;
        let current = DataWindow::points(vec![(50.0, 105.0)], 50.0, 60.0);
        let baseline = DataWindow::points(vec![], 0.0, 30.0);
        assert_eq!(algo.calculate_from_windows(&[current, baseline], &params()), None);
    }
}
