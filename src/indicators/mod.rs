// =============================================================================
// Indicator Algorithm Library
// =============================================================================
//
// Every algorithm implements the `Algorithm` trait: metadata, typed parameter
// definitions, window specifications, refresh-interval policy, and a pure
// `calculate_from_windows` over engine-assembled windows. Algorithms never
// touch an engine handle, a clock, or I/O.

pub mod window_calculations;

pub mod registry;

pub mod bid_ask_imbalance;
pub mod dump_exhaustion;
pub mod liquidity_drain;
pub mod momentum_reversal;
pub mod price_momentum;
pub mod price_velocity;
pub mod pump_magnitude;
pub mod rsi;
pub mod sma;
pub mod support_level_proximity;
pub mod twpa;
pub mod twpa_ratio;
pub mod velocity_cascade;
pub mod velocity_stabilization;
pub mod volume_surge;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::types::{DataWindow, WindowSpec};

// =============================================================================
// IndicatorParameters
// =============================================================================

/// Refresh-interval override keys recognized on the read side, checked in
/// order. Variants authored under any of these keys keep working.
const REFRESH_OVERRIDE_KEYS: [&str; 3] = ["refresh_interval_seconds", "refresh_interval_override", "r"];

/// Keyed primitive parameters for one indicator instance, with typed
/// accessors and defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorParameters {
    params: Map<String, Value>,
}

impl IndicatorParameters {
    pub fn new(params: Map<String, Value>) -> Self {
        Self { params }
    }

    /// Wrap a JSON value; non-objects become the empty parameter set.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self { params: map },
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(value_as_f64).unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.params
            .get(key)
            .and_then(value_as_f64)
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(default),
            _ => default,
        }
    }

    /// Refresh-interval override from any recognized key, first match wins.
    /// Zero and negative values are treated as absent.
    pub fn refresh_override(&self) -> Option<f64> {
        for key in REFRESH_OVERRIDE_KEYS {
            if let Some(value) = self.params.get(key).and_then(value_as_f64) {
                if value > 0.0 {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Canonical JSON rendering with sorted keys. Used as a deduplication key
    /// for indicator instances and as the persisted parameter encoding.
    pub fn canonical_json(&self) -> String {
        let sorted: BTreeMap<&String, &Value> = self.params.iter().collect();
        serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.params.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// Numeric view of a JSON value: numbers directly, numeric strings parsed.
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

// =============================================================================
// VariantParameter — algorithm-declared parameter definitions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    Int,
    Float,
    Boolean,
    String,
    Json,
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// One parameter an algorithm accepts: type, default, range, enum, and
/// whether it must be present.
#[derive(Debug, Clone)]
pub struct VariantParameter {
    pub name: &'static str,
    pub parameter_type: ParameterType,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub allowed_values: Option<Vec<Value>>,
    pub required: bool,
    pub description: &'static str,
}

impl VariantParameter {
    pub fn float(
        name: &'static str,
        default: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        required: bool,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            parameter_type: ParameterType::Float,
            default: default.map(|v| Value::from(v)),
            min,
            max,
            allowed_values: None,
            required,
            description,
        }
    }

    pub fn int(
        name: &'static str,
        default: Option<i64>,
        min: Option<f64>,
        max: Option<f64>,
        required: bool,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            parameter_type: ParameterType::Int,
            default: default.map(Value::from),
            min,
            max,
            allowed_values: None,
            required,
            description,
        }
    }

    pub fn boolean(name: &'static str, default: Option<bool>, required: bool, description: &'static str) -> Self {
        Self {
            name,
            parameter_type: ParameterType::Boolean,
            default: default.map(Value::from),
            min: None,
            max: None,
            allowed_values: None,
            required,
            description,
        }
    }

    pub fn json(name: &'static str, default: Option<Value>, required: bool, description: &'static str) -> Self {
        Self {
            name,
            parameter_type: ParameterType::Json,
            default,
            min: None,
            max: None,
            allowed_values: None,
            required,
            description,
        }
    }

    /// The conventional optional refresh-interval override parameter.
    pub fn refresh_override() -> Self {
        Self::float(
            "r",
            None,
            Some(0.5),
            Some(3600.0),
            false,
            "Refresh interval in seconds (optional override)",
        )
    }
}

/// Validate a single parameter value against its definition and coerce it to
/// the declared type.
///
/// Coercion matrix: `int` accepts integer-valued floats and numeric strings;
/// `float` accepts int/float/numeric string; `boolean` accepts bool, 0/1, or
/// the case-insensitive set {true,1,yes,on / false,0,no,off}; `string`
/// stringifies non-strings; `json` accepts a parsed value or a JSON-encoded
/// string. Range checks apply to numeric types, `allowed_values` as
/// membership.
pub fn validate_and_coerce(value: &Value, def: &VariantParameter) -> Result<Value, EngineError> {
    let invalid = |reason: String| EngineError::InvalidParameter {
        name: def.name.to_string(),
        reason,
    };

    let coerced = match def.parameter_type {
        ParameterType::Int => {
            let number = value_as_f64(value)
                .ok_or_else(|| invalid(format!("cannot convert {value} to int")))?;
            if number.fract() != 0.0 {
                return Err(invalid(format!("value {number} is not integer-valued")));
            }
            Value::from(number as i64)
        }
        ParameterType::Float => {
            let number = value_as_f64(value)
                .ok_or_else(|| invalid(format!("cannot convert {value} to float")))?;
            Value::from(number)
        }
        ParameterType::Boolean => match value {
            Value::Bool(b) => Value::from(*b),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Value::from(true),
                "false" | "0" | "no" | "off" => Value::from(false),
                other => return Err(invalid(format!("'{other}' is not a boolean"))),
            },
            Value::Number(n) => match n.as_f64() {
                Some(v) if v == 0.0 => Value::from(false),
                Some(v) if v == 1.0 => Value::from(true),
                _ => return Err(invalid(format!("{n} is not a boolean"))),
            },
            other => return Err(invalid(format!("cannot convert {other} to boolean"))),
        },
        ParameterType::String => match value {
            Value::String(s) => Value::from(s.clone()),
            other => Value::from(other.to_string()),
        },
        ParameterType::Json => match value {
            Value::String(s) => serde_json::from_str(s)
                .map_err(|e| invalid(format!("invalid JSON string: {e}")))?,
            other => other.clone(),
        },
    };

    if matches!(def.parameter_type, ParameterType::Int | ParameterType::Float) {
        let number = value_as_f64(&coerced).unwrap_or_default();
        if let Some(min) = def.min {
            if number < min {
                return Err(invalid(format!("value {number} is below minimum {min}")));
            }
        }
        if let Some(max) = def.max {
            if number > max {
                return Err(invalid(format!("value {number} exceeds maximum {max}")));
            }
        }
    }

    if let Some(allowed) = &def.allowed_values {
        if !allowed.contains(&coerced) {
            return Err(invalid(format!("value {coerced} not in allowed values {allowed:?}")));
        }
    }

    Ok(coerced)
}

// =============================================================================
// Algorithm trait
// =============================================================================

/// Capability set every indicator algorithm publishes.
///
/// `calculate_from_windows` is pure over `(windows, params)`; engines
/// assemble the windows described by `window_specs` and pass them in.
pub trait Algorithm: Send + Sync {
    /// Unique identifier, e.g. `"PUMP_MAGNITUDE_PCT"`.
    fn indicator_type(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Category for grouping.
    fn category(&self) -> &'static str {
        "general"
    }

    /// Parameter definitions, the validation source of truth.
    fn parameters(&self) -> Vec<VariantParameter>;

    /// Windows this algorithm needs, relative to the evaluation timestamp.
    /// Fails on inconsistent window configurations.
    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError>;

    /// Time-driven algorithms recompute on the engine's tick loop; the rest
    /// fire only on new market data.
    fn is_time_driven(&self) -> bool {
        false
    }

    fn default_refresh_interval(&self) -> f64 {
        1.0
    }

    fn min_refresh_interval(&self) -> f64 {
        0.5
    }

    fn max_refresh_interval(&self) -> f64 {
        3600.0
    }

    /// Refresh interval for an instance: a clamped override when provided,
    /// otherwise the algorithm's own policy (typically a function of the
    /// primary window length).
    fn refresh_interval(&self, params: &IndicatorParameters) -> f64 {
        match params.refresh_override() {
            Some(override_secs) => self.clamp_refresh(override_secs),
            None => self.default_refresh_interval(),
        }
    }

    /// Clamp a requested refresh interval into the allowed band.
    fn clamp_refresh(&self, seconds: f64) -> f64 {
        seconds.clamp(self.min_refresh_interval(), self.max_refresh_interval())
    }

    /// Pure calculation from assembled windows. `None` on insufficient or
    /// degenerate data.
    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64>;
}

/// Refresh cadence tier from a window length: short windows refresh every
/// second, longer windows progressively slower.
pub fn tiered_refresh_interval(window_len: f64) -> f64 {
    if window_len <= 10.0 {
        1.0
    } else if window_len <= 30.0 {
        2.0
    } else if window_len <= 60.0 {
        5.0
    } else {
        10.0
    }
}

/// Price velocity between a current and a baseline window: percent change of
/// the time-weighted averages divided by the time between window centers.
/// `None` on missing TWPAs, a zero baseline, or a non-positive center delta.
pub(crate) fn velocity_between_windows(current: &DataWindow, baseline: &DataWindow) -> Option<f64> {
    let current_twpa = time_weighted_average(current.point_series()?, current.start_ts, current.end_ts)?;
    let baseline_twpa = time_weighted_average(baseline.point_series()?, baseline.start_ts, baseline.end_ts)?;

    if baseline_twpa == 0.0 {
        return None;
    }

    let price_change_pct = (current_twpa - baseline_twpa) / baseline_twpa * 100.0;

    let current_center = (current.start_ts + current.end_ts) / 2.0;
    let baseline_center = (baseline.start_ts + baseline.end_ts) / 2.0;
    let time_diff = current_center - baseline_center;

    if time_diff <= 0.0 {
        return None;
    }

    Some(price_change_pct / time_diff)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> IndicatorParameters {
        IndicatorParameters::from_value(value)
    }

    // ---- IndicatorParameters ---------------------------------------------

    #[test]
    fn get_f64_accepts_numbers_and_numeric_strings() {
        let p = params(json!({"a": 2.5, "b": "3.5", "c": true}));
        assert_eq!(p.get_f64("a", 0.0), 2.5);
        assert_eq!(p.get_f64("b", 0.0), 3.5);
        assert_eq!(p.get_f64("c", 9.0), 9.0);
        assert_eq!(p.get_f64("missing", 7.0), 7.0);
    }

    #[test]
    fn refresh_override_key_precedence() {
        let p = params(json!({"refresh_interval_seconds": 4.0, "r": 9.0}));
        assert_eq!(p.refresh_override(), Some(4.0));

        let p = params(json!({"r": 9.0}));
        assert_eq!(p.refresh_override(), Some(9.0));

        let p = params(json!({"refresh_interval_override": "2.5"}));
        assert_eq!(p.refresh_override(), Some(2.5));

        let p = params(json!({"r": 0.0}));
        assert_eq!(p.refresh_override(), None);

        assert_eq!(params(json!({})).refresh_override(), None);
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let p = params(json!({"z": 1, "a": 2}));
        assert_eq!(p.canonical_json(), r#"{"a":2,"z":1}"#);
    }

    // ---- validate_and_coerce ---------------------------------------------

    fn float_def() -> VariantParameter {
        VariantParameter::float("t1", Some(10.0), Some(1.0), Some(3600.0), true, "")
    }

    #[test]
    fn coerce_float_from_string_and_int() {
        let def = float_def();
        assert_eq!(validate_and_coerce(&json!("12.5"), &def).unwrap(), json!(12.5));
        assert_eq!(validate_and_coerce(&json!(12), &def).unwrap(), json!(12.0));
    }

    #[test]
    fn coerce_float_range_violations() {
        let def = float_def();
        assert!(validate_and_coerce(&json!(0.5), &def).is_err());
        assert!(validate_and_coerce(&json!(4000.0), &def).is_err());
    }

    #[test]
    fn coerce_int_accepts_integer_valued_floats() {
        let def = VariantParameter::int("n", Some(3), Some(2.0), Some(10.0), true, "");
        assert_eq!(validate_and_coerce(&json!(5.0), &def).unwrap(), json!(5));
        assert_eq!(validate_and_coerce(&json!("7"), &def).unwrap(), json!(7));
        assert!(validate_and_coerce(&json!(5.5), &def).is_err());
    }

    #[test]
    fn coerce_boolean_word_set() {
        let def = VariantParameter::boolean("smoothing", Some(true), false, "");
        assert_eq!(validate_and_coerce(&json!("Yes"), &def).unwrap(), json!(true));
        assert_eq!(validate_and_coerce(&json!("off"), &def).unwrap(), json!(false));
        assert_eq!(validate_and_coerce(&json!(1), &def).unwrap(), json!(true));
        assert_eq!(validate_and_coerce(&json!(0), &def).unwrap(), json!(false));
        assert!(validate_and_coerce(&json!("maybe"), &def).is_err());
    }

    #[test]
    fn coerce_string_stringifies() {
        let def = VariantParameter {
            name: "label",
            parameter_type: ParameterType::String,
            default: None,
            min: None,
            max: None,
            allowed_values: None,
            required: false,
            description: "",
        };
        assert_eq!(validate_and_coerce(&json!("x"), &def).unwrap(), json!("x"));
        assert_eq!(validate_and_coerce(&json!(10), &def).unwrap(), json!("10"));
    }

    #[test]
    fn coerce_json_parses_encoded_strings() {
        let def = VariantParameter::json("windows", None, true, "");
        let encoded = json!(r#"[{"t1": 5}]"#);
        assert_eq!(validate_and_coerce(&encoded, &def).unwrap(), json!([{"t1": 5}]));
        assert!(validate_and_coerce(&json!("not json"), &def).is_err());

        let parsed = json!([{"t1": 5}]);
        assert_eq!(validate_and_coerce(&parsed, &def).unwrap(), parsed);
    }

    #[test]
    fn allowed_values_membership() {
        let mut def = float_def();
        def.allowed_values = Some(vec![json!(1.0), json!(2.0)]);
        assert!(validate_and_coerce(&json!(2.0), &def).is_ok());
        assert!(validate_and_coerce(&json!(3.0), &def).is_err());
    }

    // ---- refresh tiers ----------------------------------------------------

    #[test]
    fn refresh_tiers() {
        assert_eq!(tiered_refresh_interval(5.0), 1.0);
        assert_eq!(tiered_refresh_interval(10.0), 1.0);
        assert_eq!(tiered_refresh_interval(25.0), 2.0);
        assert_eq!(tiered_refresh_interval(60.0), 5.0);
        assert_eq!(tiered_refresh_interval(600.0), 10.0);
    }

    // ---- velocity helper --------------------------------------------------

    #[test]
    fn velocity_positive_for_rising_price() {
        // Baseline 100 over [0, 10], current 110 over [20, 30].
        let baseline = DataWindow::points(vec![(0.0, 100.0)], 0.0, 10.0);
        let current = DataWindow::points(vec![(20.0, 110.0)], 20.0, 30.0);
        let velocity = velocity_between_windows(&current, &baseline).unwrap();
        // 10% change over 20 seconds between centers = 0.5 %/s.
        assert!((velocity - 0.5).abs() < 1e-9, "got {velocity}");
    }

    #[test]
    fn velocity_none_on_zero_baseline_or_reversed_windows() {
        let baseline = DataWindow::points(vec![(0.0, 0.0)], 0.0, 10.0);
        let current = DataWindow::points(vec![(20.0, 110.0)], 20.0, 30.0);
        assert_eq!(velocity_between_windows(&current, &baseline), None);

        let baseline = DataWindow::points(vec![(20.0, 100.0)], 20.0, 30.0);
        let current = DataWindow::points(vec![(0.0, 110.0)], 0.0, 10.0);
        assert_eq!(velocity_between_windows(&current, &baseline), None);
    }
}
