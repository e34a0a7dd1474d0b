// =============================================================================
// Window assembly
// =============================================================================
//
// Turns sorted series + window specs into the `DataWindow`s an algorithm's
// `calculate_from_windows` consumes. For each spec `(t1, t2)` relative to
// `target_ts`, the window covers `[target_ts - t1, target_ts - t2)`.
//
// Every window additionally carries the LAST point before its start when one
// exists. Without that anchor the first in-window value would contribute
// zero duration and time-weighted averages would bias toward later values.

use crate::types::{DataWindow, OrderBookSnapshot, WindowKind, WindowSpec};

/// Extract one point window from a sorted `(timestamp, value)` series.
pub fn extract_point_window(points: &[(f64, f64)], target_ts: f64, t1: f64, t2: f64) -> DataWindow {
    let start_ts = target_ts - t1;
    let end_ts = target_ts - t2;

    let mut pre_window: Option<(f64, f64)> = None;
    let mut data: Vec<(f64, f64)> = Vec::new();

    for &(timestamp, value) in points {
        if timestamp > target_ts {
            break;
        }
        if timestamp < start_ts {
            // Keep overwriting so the LAST pre-window point survives.
            pre_window = Some((timestamp, value));
        } else if timestamp < end_ts {
            data.push((timestamp, value));
        }
    }

    if let Some(anchor) = pre_window {
        data.insert(0, anchor);
    }

    DataWindow::points(data, start_ts, end_ts)
}

/// Extract one order-book window from a sorted snapshot series.
pub fn extract_orderbook_window(
    snapshots: &[OrderBookSnapshot],
    target_ts: f64,
    t1: f64,
    t2: f64,
) -> DataWindow {
    let start_ts = target_ts - t1;
    let end_ts = target_ts - t2;

    let mut pre_window: Option<OrderBookSnapshot> = None;
    let mut data: Vec<OrderBookSnapshot> = Vec::new();

    for snapshot in snapshots {
        if snapshot.timestamp > target_ts {
            break;
        }
        if snapshot.timestamp < start_ts {
            pre_window = Some(*snapshot);
        } else if snapshot.timestamp < end_ts {
            data.push(*snapshot);
        }
    }

    if let Some(anchor) = pre_window {
        data.insert(0, anchor);
    }

    DataWindow::orderbook(data, start_ts, end_ts)
}

/// Assemble every window an algorithm requested, routing each spec to the
/// series its kind names.
pub fn assemble(
    prices: &[(f64, f64)],
    volumes: &[(f64, f64)],
    orderbooks: &[OrderBookSnapshot],
    target_ts: f64,
    specs: &[WindowSpec],
) -> Vec<DataWindow> {
    specs
        .iter()
        .map(|spec| match spec.kind {
            WindowKind::Price => extract_point_window(prices, target_ts, spec.t1, spec.t2),
            WindowKind::Volume => extract_point_window(volumes, target_ts, spec.t1, spec.t2),
            WindowKind::OrderBook => extract_orderbook_window(orderbooks, target_ts, spec.t1, spec.t2),
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WindowData;

    #[test]
    fn window_selects_half_open_range() {
        let points = vec![(0.0, 1.0), (5.0, 2.0), (10.0, 3.0), (15.0, 4.0)];
        // Window [5, 15) at target 15 with t1=10, t2=0.
        let window = extract_point_window(&points, 15.0, 10.0, 0.0);

        // Points at 5 and 10 are inside; 15 is excluded (half-open end);
        // the t=0 point is the pre-window anchor.
        assert_eq!(
            window.data,
            WindowData::Points(vec![(0.0, 1.0), (5.0, 2.0), (10.0, 3.0)])
        );
        assert_eq!(window.start_ts, 5.0);
        assert_eq!(window.end_ts, 15.0);
    }

    #[test]
    fn last_pre_window_point_wins_as_anchor() {
        let points = vec![(0.0, 1.0), (2.0, 2.0), (4.0, 3.0), (8.0, 4.0)];
        let window = extract_point_window(&points, 10.0, 5.0, 0.0);

        // Pre-window points at 0, 2, 4: only t=4 survives as anchor.
        assert_eq!(window.data, WindowData::Points(vec![(4.0, 3.0), (8.0, 4.0)]));
    }

    #[test]
    fn empty_series_gives_empty_window() {
        let window = extract_point_window(&[], 10.0, 5.0, 0.0);
        assert!(window.is_empty());
        assert_eq!(window.start_ts, 5.0);
        assert_eq!(window.end_ts, 10.0);
    }

    #[test]
    fn anchor_alone_fills_otherwise_empty_window() {
        // No point inside [5, 10), but the anchor at t=3 carries its value
        // across the whole window.
        let points = vec![(3.0, 7.0)];
        let window = extract_point_window(&points, 10.0, 5.0, 0.0);
        assert_eq!(window.data, WindowData::Points(vec![(3.0, 7.0)]));
    }

    #[test]
    fn points_after_target_are_ignored() {
        let points = vec![(8.0, 1.0), (12.0, 2.0)];
        let window = extract_point_window(&points, 10.0, 5.0, 0.0);
        assert_eq!(window.data, WindowData::Points(vec![(8.0, 1.0)]));
    }

    #[test]
    fn assemble_routes_by_window_kind() {
        use crate::types::WindowSpec;

        let prices = vec![(1.0, 100.0)];
        let volumes = vec![(1.0, 5.0)];
        let snapshots = vec![OrderBookSnapshot {
            timestamp: 1.0,
            best_bid: 100.0,
            best_ask: 100.1,
            bid_qty: 1.0,
            ask_qty: 2.0,
        }];

        let specs = [
            WindowSpec::price(10.0, 0.0),
            WindowSpec::volume(10.0, 0.0),
            WindowSpec::orderbook(10.0, 0.0),
        ];
        let windows = assemble(&prices, &volumes, &snapshots, 10.0, &specs);

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].point_series().unwrap()[0].1, 100.0);
        assert_eq!(windows[1].point_series().unwrap()[0].1, 5.0);
        assert_eq!(windows[2].snapshots().unwrap()[0].ask_qty, 2.0);
    }
}
