// =============================================================================
// MOMENTUM_REVERSAL_INDEX — Pump-to-dump momentum shift detector
// =============================================================================
//
// Formula: ((current_velocity - peak_velocity) / |peak_velocity|) * 100
//
// The peak velocity uses short windows to capture the highest momentum; the
// current velocity uses longer windows for stability. Strongly negative
// values mean the pump is losing momentum — velocity drops BEFORE price
// drops significantly.

use crate::error::EngineError;
use crate::indicators::{
    tiered_refresh_interval, velocity_between_windows, Algorithm, IndicatorParameters, VariantParameter,
};
use crate::types::{DataWindow, WindowSpec};

pub struct MomentumReversalIndex;

impl Algorithm for MomentumReversalIndex {
    fn indicator_type(&self) -> &'static str {
        "MOMENTUM_REVERSAL_INDEX"
    }

    fn name(&self) -> &'static str {
        "Momentum Reversal Index"
    }

    fn description(&self) -> &'static str {
        "Detects pump-to-dump transition via velocity momentum shift analysis"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1_current",
                Some(10.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Current velocity window length (seconds)",
            ),
            VariantParameter::float(
                "t3_current",
                Some(40.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Current velocity baseline lookback (seconds)",
            ),
            VariantParameter::float(
                "d_current",
                Some(10.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Current velocity baseline window length (seconds)",
            ),
            VariantParameter::float(
                "t1_peak",
                Some(5.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Peak velocity window length (seconds)",
            ),
            VariantParameter::float(
                "t3_peak",
                Some(20.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Peak velocity baseline lookback (seconds)",
            ),
            VariantParameter::float(
                "d_peak",
                Some(5.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Peak velocity baseline window length (seconds)",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1_current = params.get_f64("t1_current", 10.0);
        let t3_current = params.get_f64("t3_current", 40.0);
        let d_current = params.get_f64("d_current", 10.0);
        let t1_peak = params.get_f64("t1_peak", 5.0);
        let t3_peak = params.get_f64("t3_peak", 20.0);
        let d_peak = params.get_f64("d_peak", 5.0);

        if t3_current < d_current {
            return Err(EngineError::InvalidParameter {
                name: "t3_current".into(),
                reason: format!("t3_current ({t3_current}) must be >= d_current ({d_current})"),
            });
        }
        if t3_peak < d_peak {
            return Err(EngineError::InvalidParameter {
                name: "t3_peak".into(),
                reason: format!("t3_peak ({t3_peak}) must be >= d_peak ({d_peak})"),
            });
        }

        Ok(vec![
            WindowSpec::price(t1_current, 0.0),
            WindowSpec::price(t3_current, t3_current - d_current),
            WindowSpec::price(t1_peak, 0.0),
            WindowSpec::price(t3_peak, t3_peak - d_peak),
        ])
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        match params.refresh_override() {
            Some(secs) => self.clamp_refresh(secs),
            None => tiered_refresh_interval(params.get_f64("t1_peak", 5.0)),
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], _params: &IndicatorParameters) -> Option<f64> {
        if windows.len() != 4 {
            return None;
        }

        let current_velocity = velocity_between_windows(&windows[0], &windows[1])?;
        let peak_velocity = velocity_between_windows(&windows[2], &windows[3])?;

        if peak_velocity.abs() < 1e-3 {
            return None;
        }

        Some((current_velocity - peak_velocity) / peak_velocity.abs() * 100.0)
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
        IndicatorParameters::from_value(json!({}))
    }

    /// Build current/baseline windows producing a fixed velocity: pct change
    /// `pct` over a 20-second center gap.
    fn pair(current_price: f64) -> (DataWindow, DataWindow) {
        let current = DataWindow::points(vec![(20.0, current_price)], 20.0, 30.0);
        let baseline = DataWindow::points(vec![(0.0, 100.0)], 0.0, 10.0);
        (current, baseline)
    }

    #[test]
    fn slowing_pump_reads_negative() {
        let algo = MomentumReversalIndex;
        // Current velocity (2% / 20s) well below peak velocity (10% / 20s).
        let (cur, cur_base) = pair(102.0);
        let (peak, peak_base) = pair(110.0);
        let reversal = algo
            .calculate_from_windows(&[cur, cur_base, peak, peak_base], &params())
            .unwrap();
        assert!(reversal < -50.0, "got {reversal}");
    }

    #[test]
    fn steady_momentum_reads_near_zero() {
        let algo = MomentumReversalIndex;
        let (cur, cur_base) = pair(110.0);
        let (peak, peak_base) = pair(110.0);
        let reversal = algo
            .calculate_from_windows(&[cur, cur_base, peak, peak_base], &params())
            .unwrap();
        assert!(reversal.abs() < 1e-9);
    }

    #[test]
    fn negligible_peak_velocity_yields_none() {
        let algo = MomentumReversalIndex;
        let (cur, cur_base) = pair(102.0);
        // Peak pair with essentially flat price: |velocity| < 1e-3.
        let (peak, peak_base) = pair(100.0001);
        assert_eq!(
            algo.calculate_from_windows(&[cur, cur_base, peak, peak_base], &params()),
            None
        );
    }

    #[test]
    fn four_windows_required() {
        let algo = MomentumReversalIndex;
        let (cur, cur_base) = pair(102.0);
        assert_eq!(algo.calculate_from_windows(&[cur, cur_base], &params()), None);
    }
}
