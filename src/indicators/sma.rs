// =============================================================================
// SMA — Simple Moving Average (event-driven)
// =============================================================================
//
// Arithmetic mean of the last `period` prices inside the lookback window
// (t1, 0). Event-driven: recomputed when new market data arrives, not on the
// wall-clock tick loop.

use crate::error::EngineError;
use crate::indicators::{Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

pub struct Sma;

impl Algorithm for Sma {
    fn indicator_type(&self) -> &'static str {
        "SMA"
    }

    fn name(&self) -> &'static str {
        "Simple Moving Average"
    }

    fn description(&self) -> &'static str {
        "Arithmetic mean of the most recent prices - classic trend baseline"
    }

    fn category(&self) -> &'static str {
        "trend"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::int(
                "period",
                Some(20),
                Some(1.0),
                Some(1000.0),
                true,
                "Number of most recent prices to average",
            ),
            VariantParameter::float(
                "t1",
                Some(300.0),
                Some(1.0),
                Some(86400.0),
                false,
                "Lookback window in seconds the period samples are drawn from",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 300.0);
        Ok(vec![WindowSpec::price(t1, 0.0)])
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        let window = windows.first()?;
        let period = params.get_usize("period", 20);
        if period == 0 {
            return None;
        }

        // The assembled window may carry one pre-window anchor point; only
        // in-window prices count toward the average.
        let values: Vec<f64> = window
            .point_series()?
            .iter()
            .filter(|(t, _)| *t >= window.start_ts)
            .map(|(_, v)| *v)
            .collect();

        if values.len() < period {
            return None;
        }

        let tail = &values[values.len() - period..];
        Some(tail.iter().sum::<f64>() / period as f64)
    }
}
