// =============================================================================
// SUPPORT_LEVEL_PROXIMITY — Distance from the pre-pump support level
// =============================================================================
//
// Formula: ((current_price - support_level) / support_level) * 100
//
// Where both prices are TWPAs: current over (t1, 0) and the support level
// over the pre-pump window (t_support_start, t_support_end). Positive means
// price is above support (room to fall); zero means at support (dump
// bottom); negative means the dump overshot it.

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct SupportLevelProximity;

impl Algorithm for SupportLevelProximity {
    fn indicator_type(&self) -> &'static str {
        "SUPPORT_LEVEL_PROXIMITY"
    }

    fn name(&self) -> &'static str {
        "Support Level Proximity"
    }

    fn description(&self) -> &'static str {
        "Percentage distance between current price and the pre-pump support level"
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
                "t_support_start",
                Some(3600.0),
                Some(60.0),
                Some(86400.0),
                true,
                "Start of support window in seconds ago (pre-pump period)",
            ),
            VariantParameter::float(
                "t_support_end",
                Some(600.0),
                Some(0.0),
                Some(86400.0),
                true,
                "End of support window in seconds ago",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 10.0);
        let t_support_start = params.get_f64("t_support_start", 3600.0);
        let t_support_end = params.get_f64("t_support_end", 600.0);

        if t_support_start <= t_support_end {
            return Err(EngineError::InvalidParameter {
                name: "t_support_start".into(),
                reason: format!(
                    "support window is empty: t_support_start ({t_support_start}) must be > t_support_end ({t_support_end})"
                ),
            });
        }

        Ok(vec![
            WindowSpec::price(t1, 0.0),
            WindowSpec::price(t_support_start, t_support_end),
        ])
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
        let support = &windows[1];

        let current_price = time_weighted_average(current.point_series()?, current.start_ts, current.end_ts)?;
        let support_level = time_weighted_average(support.point_series()?, support.start_ts, support.end_ts)?;

        if support_level == 0.0 {
            return None;
        }

        Some((current_price - support_level) / support_level * 100.0)
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
        IndicatorParameters::from_value(json!({
            "t1": 10.0, "t_support_start": 3600.0, "t_support_end": 600.0
        }))
    }

    #[test]
    fn price_above_support_reads_positive() {
        let algo = SupportLevelProximity;
        let current = DataWindow::points(vec![(3595.0, 110.0)], 3590.0, 3600.0);
        let support = DataWindow::points(vec![(0.0, 100.0)], 0.0, 3000.0);
        let proximity = algo.calculate_from_windows(&[current, support], &params()).unwrap();
        assert!((proximity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn price_at_support_reads_zero() {
        let algo = SupportLevelProximity;
        let current = DataWindow::points(vec![(3595.0, 100.0)], 3590.0, 3600.0);
        let support = DataWindow::points(vec![(0.0, 100.0)], 0.0, 3000.0);
        let proximity = algo.calculate_from_windows(&[current, support], &params()).unwrap();
        assert!(proximity.abs() < 1e-12);
    }

    #[test]
    fn overshoot_reads_negative() {
        let algo = SupportLevelProximity;
        let current = DataWindow::points(vec![(3595.0, 95.0)], 3590.0, 3600.0);
        let support = DataWindow::points(vec![(0.0, 100.0)], 0.0, 3000.0);
        let proximity = algo.calculate_from_windows(&[current, support], &params()).unwrap();
        assert!(proximity < 0.0);
    }

    #[test]
    fn rejects_empty_support_window() {
        let algo = SupportLevelProximity;
        let bad = IndicatorParameters::from_value(json!({
            "t_support_start": 600.0, "t_support_end": 600.0
        }));
        assert!(algo.window_specs(&bad).is_err());
    }
}
