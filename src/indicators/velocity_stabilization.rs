// =============================================================================
// VELOCITY_STABILIZATION_INDEX — Coefficient of variation across velocities
// =============================================================================
//
// Measures `num_samples` velocities at `sample_interval` offsets back in
// time, then returns std_dev(velocities) / mean(|velocities|). Low values
// mean the velocity stopped fluctuating (dump exhausting); high values mean
// it is still swinging. When the mean absolute velocity is below 1e-3 the
// market is flat and the index reads 0.0 (maximally stable).

use crate::error::EngineError;
use crate::indicators::{
    tiered_refresh_interval, velocity_between_windows, Algorithm, IndicatorParameters, VariantParameter,
};
use crate::types::{DataWindow, WindowSpec};

pub struct VelocityStabilizationIndex;

impl Algorithm for VelocityStabilizationIndex {
    fn indicator_type(&self) -> &'static str {
        "VELOCITY_STABILIZATION_INDEX"
    }

    fn name(&self) -> &'static str {
        "Velocity Stabilization Index"
    }

    fn description(&self) -> &'static str {
        "Velocity variance detector - identifies dump exhaustion via stabilizing velocity"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::int(
                "num_samples",
                Some(3),
                Some(2.0),
                Some(10.0),
                true,
                "Number of velocity samples to analyze for variance",
            ),
            VariantParameter::float(
                "sample_interval",
                Some(5.0),
                Some(1.0),
                Some(60.0),
                true,
                "Time between velocity samples in seconds",
            ),
            VariantParameter::float(
                "t1",
                Some(10.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Velocity current window length (seconds)",
            ),
            VariantParameter::float(
                "t3",
                Some(40.0),
                Some(1.0),
                Some(86400.0),
                true,
                "Velocity baseline lookback (seconds)",
            ),
            VariantParameter::float(
                "d",
                Some(10.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Velocity baseline window length (seconds)",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let num_samples = params.get_usize("num_samples", 3);
        let sample_interval = params.get_f64("sample_interval", 5.0);
        let t1 = params.get_f64("t1", 10.0);
        let t3 = params.get_f64("t3", 40.0);
        let d = params.get_f64("d", 10.0);

        if num_samples < 2 {
            return Err(EngineError::InvalidParameter {
                name: "num_samples".into(),
                reason: format!("need at least 2 samples, got {num_samples}"),
            });
        }
        if t3 < d {
            return Err(EngineError::InvalidParameter {
                name: "t3".into(),
                reason: format!("t3 ({t3}) must be >= d ({d})"),
            });
        }

        // Two windows per sample, each shifted back by its sample offset.
        let mut windows = Vec::with_capacity(num_samples * 2);
        for i in 0..num_samples {
            let offset = i as f64 * sample_interval;
            windows.push(WindowSpec::price(offset + t1, offset));
            windows.push(WindowSpec::price(offset + t3, offset + t3 - d));
        }

        Ok(windows)
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

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        let num_samples = params.get_usize("num_samples", 3);

        if windows.len() != num_samples * 2 {
            return None;
        }

        let velocities: Vec<f64> = (0..num_samples)
            .filter_map(|i| velocity_between_windows(&windows[i * 2], &windows[i * 2 + 1]))
            .collect();

        if velocities.len() < 2 {
            return None;
        }

        let n = velocities.len() as f64;
        let mean = velocities.iter().sum::<f64>() / n;
        let mean_abs = velocities.iter().map(|v| v.abs()).sum::<f64>() / n;
        let variance = velocities.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        if mean_abs < 1e-3 {
            // Velocities near zero: maximally stable.
            return Some(0.0);
        }

        Some(std_dev / mean_abs)
    }
}
