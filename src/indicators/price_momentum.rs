// =============================================================================
// PRICE_MOMENTUM — Directional strength of price movement
// =============================================================================
//
// Formula: ((current_avg - baseline_avg) / baseline_avg) * 100
//
// Simple-average price in a recent window (t1, t2) compared against a
// historical window (t3, t4). Positive values indicate upward pressure,
// negative values downward pressure.

use crate::error::EngineError;
use crate::indicators::window_calculations::simple_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct PriceMomentum;

impl Algorithm for PriceMomentum {
    fn indicator_type(&self) -> &'static str {
        "PRICE_MOMENTUM"
    }

    fn name(&self) -> &'static str {
        "Price Momentum"
    }

    fn description(&self) -> &'static str {
        "Percentage change of average price between a recent and a historical window"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(30.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Start of current window in seconds ago",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(3600.0),
                true,
                "End of current window in seconds ago (0 = now)",
            ),
            VariantParameter::float(
                "t3",
                Some(120.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Start of baseline window in seconds ago",
            ),
            VariantParameter::float(
                "t4",
                Some(30.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of baseline window in seconds ago",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 30.0);
        let t2 = params.get_f64("t2", 0.0);
        let t3 = params.get_f64("t3", 120.0);
        let t4 = params.get_f64("t4", 30.0);

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
            None => tiered_refresh_interval(params.get_f64("t1", 30.0)),
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], _params: &IndicatorParameters) -> Option<f64> {
        if windows.len() != 2 {
            return None;
        }

        let current = &windows[0];
        let baseline = &windows[1];

        let current_avg = simple_average(current.point_series()?, current.start_ts, current.end_ts)?;
        let baseline_avg = simple_average(baseline.point_series()?, baseline.start_ts, baseline.end_ts)?;

        if baseline_avg == 0.0 {
            return None;
        }

        Some((current_avg - baseline_avg) / baseline_avg * 100.0)
    }
}
