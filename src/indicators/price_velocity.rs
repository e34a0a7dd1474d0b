// =============================================================================
// PRICE_VELOCITY — Rate of price change in percent per second
// =============================================================================
//
// Formula: price_change_pct / time_between_window_centers
//
// Where price_change_pct compares TWPA(t1, 0) against TWPA(t3, t3 - d), and
// the time delta is measured between the centers of the two windows. The
// result reads as "percent per second" and is the building block for the
// cascade and stabilization indicators.

use crate::error::EngineError;
use crate::indicators::{
    tiered_refresh_interval, velocity_between_windows, Algorithm, IndicatorParameters, VariantParameter,
};
use crate::types::{DataWindow, WindowSpec};

pub struct PriceVelocity;

impl Algorithm for PriceVelocity {
    fn indicator_type(&self) -> &'static str {
        "PRICE_VELOCITY"
    }

    fn name(&self) -> &'static str {
        "Price Velocity"
    }

    fn description(&self) -> &'static str {
        "Rate of price change in percent per second between current and baseline TWPA"
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

        if t3 - d < 0.0 {
            return Err(EngineError::InvalidParameter {
                name: "t3".into(),
                reason: format!("baseline extends into future: t3 ({t3}) - d ({d}) < 0"),
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
        velocity_between_windows(&windows[0], &windows[1])
    }
}
