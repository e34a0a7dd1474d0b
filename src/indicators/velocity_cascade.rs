// =============================================================================
// VELOCITY_CASCADE — Multi-timeframe velocity acceleration index
// =============================================================================
//
// Computes price velocity over N configurable window pairs (shortest first)
// and folds them into a cascade index in [-1, +1]:
//
//   1. Relative differences between consecutive velocities
//   2. Weights 2^i favouring the more recent (shorter) pairs
//   3. A 1.2 consistency bonus when every difference shares one sign
//   4. tanh(weighted_sum / 2.0) normalization
//
// Index > 0 means acceleration (pump gaining momentum); index < 0 means
// deceleration.

use serde_json::{json, Value};

use crate::error::EngineError;
use crate::indicators::{
    velocity_between_windows, Algorithm, IndicatorParameters, VariantParameter,
};
use crate::types::{DataWindow, WindowSpec};

/// One `{t1, t3, d}` velocity configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
struct VelocityWindowConfig {
    t1: f64,
    t3: f64,
    d: f64,
}

fn default_window_configs() -> Value {
    json!([
        {"t1": 5.0, "t3": 15.0, "d": 5.0, "label": "ultra_short"},
        {"t1": 10.0, "t3": 40.0, "d": 10.0, "label": "short"},
        {"t1": 20.0, "t3": 80.0, "d": 20.0, "label": "medium"}
    ])
}

fn parse_window_configs(params: &IndicatorParameters) -> Vec<VelocityWindowConfig> {
    let raw = params.get("windows").cloned().unwrap_or_else(default_window_configs);

    let Value::Array(entries) = raw else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let field = |key: &str, default: f64| {
                obj.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
            };
            Some(VelocityWindowConfig {
                t1: field("t1", 10.0),
                t3: field("t3", 60.0),
                d: field("d", 30.0),
            })
        })
        .collect()
}

pub struct VelocityCascade;

impl VelocityCascade {
    /// Fold a velocity sequence (shortest timeframe first) into the cascade
    /// index.
    fn cascade_index(velocities: &[f64]) -> f64 {
        if velocities.len() < 2 {
            return 0.0;
        }

        let epsilon = 0.01;
        let diffs: Vec<f64> = velocities
            .windows(2)
            .map(|pair| (pair[0] - pair[1]) / pair[1].abs().max(epsilon))
            .collect();

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for (i, diff) in diffs.iter().enumerate() {
            let weight = 2f64.powi(i as i32);
            weighted_sum += diff * weight;
            weight_total += weight;
        }
        let mut weighted_diff = weighted_sum / weight_total;

        let all_positive = diffs.iter().all(|d| *d > 0.0);
        let all_negative = diffs.iter().all(|d| *d < 0.0);
        if all_positive || all_negative {
            weighted_diff *= 1.2;
        }

        let scale_factor = 2.0;
        (weighted_diff / scale_factor).tanh()
    }
}

impl Algorithm for VelocityCascade {
    fn indicator_type(&self) -> &'static str {
        "VELOCITY_CASCADE"
    }

    fn name(&self) -> &'static str {
        "Velocity Cascade"
    }

    fn description(&self) -> &'static str {
        "Multi-timeframe velocity analysis to detect acceleration/deceleration patterns"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::json(
                "windows",
                Some(default_window_configs()),
                true,
                "Array of window configurations. Each must have t1, t3, d, and optional label.",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let configs = parse_window_configs(params);
        if configs.is_empty() {
            return Err(EngineError::InvalidParameter {
                name: "windows".into(),
                reason: "at least one window configuration is required".into(),
            });
        }

        let mut specs = Vec::with_capacity(configs.len() * 2);
        for config in &configs {
            if config.t3 < config.d {
                return Err(EngineError::InvalidParameter {
                    name: "windows".into(),
                    reason: format!("t3 ({}) must be >= d ({})", config.t3, config.d),
                });
            }
            specs.push(WindowSpec::price(config.t1, 0.0));
            specs.push(WindowSpec::price(config.t3, config.t3 - config.d));
        }

        Ok(specs)
    }

    fn is_time_driven(&self) -> bool {
        true
    }

    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        if let Some(secs) = params.refresh_override() {
            return self.clamp_refresh(secs);
        }

        let configs = parse_window_configs(params);
        let min_t1 = configs
            .iter()
            .map(|c| c.t1)
            .fold(f64::INFINITY, f64::min);

        if !min_t1.is_finite() || min_t1 <= 10.0 {
            1.0
        } else if min_t1 <= 30.0 {
            2.0
        } else {
            5.0
        }
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        let configs = parse_window_configs(params);
        if configs.is_empty() {
            return None;
        }

        // Two windows per configured velocity: current + baseline.
        if windows.len() != configs.len() * 2 {
            return None;
        }

        let velocities: Vec<f64> = (0..configs.len())
            .filter_map(|i| velocity_between_windows(&windows[i * 2], &windows[i * 2 + 1]))
            .collect();

        if velocities.len() < 2 {
            return None;
        }

        Some(Self::cascade_index(&velocities))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn two_pair_params() -> IndicatorParameters {
        IndicatorParameters::from_value(json!({
            "windows": [
                {"t1": 5.0, "t3": 15.0, "d": 5.0},
                {"t1": 10.0, "t3": 40.0, "d": 10.0}
            ]
        }))
    }

    /// Current/baseline windows whose TWPAs produce the requested velocity
    /// over a 20-second center gap.
    fn velocity_pair(offset: f64, current_price: f64, baseline_price: f64) -> (DataWindow, DataWindow) {
        let current = DataWindow::points(vec![(offset + 20.0, current_price)], offset + 20.0, offset + 30.0);
        let baseline = DataWindow::points(vec![(offset, baseline_price)], offset, offset + 10.0);
        (current, baseline)
    }

    #[test]
    fn cascade_index_bounded() {
        for velocities in [vec![5.0, 0.1], vec![-5.0, -0.1], vec![0.3, 0.2, 0.1]] {
            let index = VelocityCascade::cascade_index(&velocities);
            assert!((-1.0..=1.0).contains(&index), "index {index} out of range");
        }
    }

    #[test]
    fn acceleration_is_positive_deceleration_negative() {
        // Short-timeframe velocity above long-timeframe velocity.
        let accel = VelocityCascade::cascade_index(&[1.0, 0.2]);
        assert!(accel > 0.0);

        let decel = VelocityCascade::cascade_index(&[0.2, 1.0]);
        assert!(decel < 0.0);
    }

    #[test]
    fn consistency_bonus_amplifies_uniform_sign() {
        let uniform = VelocityCascade::cascade_index(&[0.9, 0.6, 0.3]);
        let mixed = VelocityCascade::cascade_index(&[0.9, 0.3, 0.6]);
        assert!(uniform > mixed, "uniform {uniform} vs mixed {mixed}");
    }

    #[test]
    fn calculate_requires_matching_window_count() {
        let algo = VelocityCascade;
        let (c, b) = velocity_pair(0.0, 110.0, 100.0);
        assert_eq!(algo.calculate_from_windows(&[c, b], &two_pair_params()), None);
    }

    #[test]
    fn calculate_from_two_pairs() {
        let algo = VelocityCascade;
        let (c0, b0) = velocity_pair(0.0, 120.0, 100.0);
        let (c1, b1) = velocity_pair(0.0, 105.0, 100.0);
        let index = algo
            .calculate_from_windows(&[c0, b0, c1, b1], &two_pair_params())
            .unwrap();
        // First pair accelerates faster than second: positive cascade.
        assert!(index > 0.0, "got {index}");
    }

    #[test]
    fn spec_count_is_two_per_config() {
        let algo = VelocityCascade;
        let specs = algo.window_specs(&two_pair_params()).unwrap();
        assert_eq!(specs.len(), 4);
    }

    #[test]
    fn default_config_used_when_absent() {
        let algo = VelocityCascade;
        let specs = algo.window_specs(&IndicatorParameters::default()).unwrap();
        assert_eq!(specs.len(), 6);
    }
}
