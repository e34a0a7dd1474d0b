// =============================================================================
// RSI — Relative Strength Index, Wilder's smoothing (event-driven)
// =============================================================================
//
// Step 1 — Compute price deltas from consecutive in-window prices.
// Step 2 — Seed average gain / average loss with the SMA of the first
//          `period` gains / losses.
// Step 3 — Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4 — RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// The window value is the most recent RSI of the series. Flat markets read
// 50.0, gain-only markets 100.0, loss-only markets 0.0.

use crate::error::EngineError;
use crate::indicators::{Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, WindowSpec};

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    if rsi.is_finite() {
        Some(rsi)
    } else {
        None
    }
}

/// Full RSI series over `closes`; one value per close starting at index
/// `period`. Empty when `period == 0` or there are fewer than `period + 1`
/// closes.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    let Some(first) = rsi_from_averages(avg_gain, avg_loss) else {
        return Vec::new();
    };

    let mut result = Vec::with_capacity(deltas.len() - period + 1);
    result.push(first);

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;

        match rsi_from_averages(avg_gain, avg_loss) {
            Some(rsi) => result.push(rsi),
            None => break,
        }
    }

    result
}

pub struct Rsi;

impl Algorithm for Rsi {
    fn indicator_type(&self) -> &'static str {
        "RSI"
    }

    fn name(&self) -> &'static str {
        "Relative Strength Index"
    }

    fn description(&self) -> &'static str {
        "Speed and magnitude of recent price changes on a 0-100 scale (Wilder smoothing)"
    }

    fn category(&self) -> &'static str {
        "oscillator"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::int(
                "period",
                Some(14),
                Some(2.0),
                Some(500.0),
                true,
                "Smoothing period (number of deltas)",
            ),
            VariantParameter::float(
                "t1",
                Some(900.0),
                Some(1.0),
                Some(86400.0),
                false,
                "Lookback window in seconds the period samples are drawn from",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 900.0);
        Ok(vec![WindowSpec::price(t1, 0.0)])
    }

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        let window = windows.first()?;
        let period = params.get_usize("period", 14);

        let closes: Vec<f64> = window
            .point_series()?
            .iter()
            .filter(|(t, _)| *t >= window.start_ts)
            .map(|(_, v)| *v)
            .collect();

        rsi_series(&closes, period).last().copied()
    }
}
