// =============================================================================
// BID_ASK_IMBALANCE — Order-book pressure in [-100, +100]
// =============================================================================
//
// Per snapshot: imbalance = (bid_qty - ask_qty) / (bid_qty + ask_qty) * 100.
// The window aggregate is either the time-weighted mean (smoothing on, the
// default) or the simple mean of in-window snapshots. Snapshots with an
// empty book are skipped, never an error.

use crate::error::EngineError;
use crate::indicators::window_calculations::time_weighted_average;
use crate::indicators::{tiered_refresh_interval, Algorithm, IndicatorParameters, VariantParameter};
use crate::types::{DataWindow, OrderBookSnapshot, WindowSpec};

pub struct BidAskImbalance;

impl BidAskImbalance {
    fn time_weighted_imbalance(snapshots: &[OrderBookSnapshot], start_ts: f64, end_ts: f64) -> Option<f64> {
        let series: Vec<(f64, f64)> = snapshots
            .iter()
            .filter_map(|snap| snap.imbalance_pct().map(|imb| (snap.timestamp, imb)))
            .collect();

        if series.is_empty() {
            return None;
        }

        time_weighted_average(&series, start_ts, end_ts)
    }

    fn simple_imbalance(snapshots: &[OrderBookSnapshot], start_ts: f64, end_ts: f64) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0usize;

        for snap in snapshots {
            if snap.timestamp < start_ts || snap.timestamp > end_ts {
                continue;
            }
            if let Some(imb) = snap.imbalance_pct() {
                total += imb;
                count += 1;
            }
        }

        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }
}

impl Algorithm for BidAskImbalance {
    fn indicator_type(&self) -> &'static str {
        "BID_ASK_IMBALANCE"
    }

    fn name(&self) -> &'static str {
        "Bid-Ask Imbalance"
    }

    fn description(&self) -> &'static str {
        "Order-book buy/sell pressure as a percentage, optionally time-weighted"
    }

    fn parameters(&self) -> Vec<VariantParameter> {
        vec![
            VariantParameter::float(
                "t1",
                Some(30.0),
                Some(1.0),
                Some(3600.0),
                true,
                "Imbalance window length in seconds",
            ),
            VariantParameter::float(
                "t2",
                Some(0.0),
                Some(0.0),
                Some(3600.0),
                true,
                "Imbalance window end in seconds ago (0 = now)",
            ),
            VariantParameter::boolean(
                "smoothing",
                Some(true),
                false,
                "Time-weighted mean when true, simple mean when false",
            ),
            VariantParameter::refresh_override(),
        ]
    }

    fn window_specs(&self, params: &IndicatorParameters) -> Result<Vec<WindowSpec>, EngineError> {
        let t1 = params.get_f64("t1", 30.0);
        let t2 = params.get_f64("t2", 0.0);

        if t1 < t2 {
            return Err(EngineError::InvalidParameter {
                name: "t1".into(),
                reason: format!("invalid window: t1 ({t1}) must be >= t2 ({t2})"),
            });
        }

        Ok(vec![WindowSpec::orderbook(t1, t2)])
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

    fn calculate_from_windows(&self, windows: &[DataWindow], params: &IndicatorParameters) -> Option<f64> {
        let window = windows.first()?;
        let snapshots = window.snapshots()?;

        if params.get_bool("smoothing", true) {
            Self::time_weighted_imbalance(snapshots, window.start_ts, window.end_ts)
        } else {
            Self::simple_imbalance(snapshots, window.start_ts, window.end_ts)
        }
    }
}
