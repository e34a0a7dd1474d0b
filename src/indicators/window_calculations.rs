// =============================================================================
// Pure window-based calculation kernels
// =============================================================================
//
// Reusable math over ordered `(timestamp, value)` series. Every function is
// pure and returns `Option<f64>` so callers are forced to handle
// insufficient-data and numerical-edge-case scenarios.
//
// The time-weighted average REQUIRES the input to include one point at or
// before `start_ts` when one exists, so the first in-window value can be
// attributed its duration.

/// Compute the time-weighted average of `points` over `[start_ts, end_ts]`.
///
/// Each point's value is valid from `max(t_i, start_ts)` until the next
/// point's timestamp (clipped to `end_ts`); the last point is valid until
/// `end_ts`. Returns `None` when no positive duration falls inside the
/// window.
///
/// Example: points `[(50, 100.0), (110, 200.0), (130, 300.0)]` over
/// `[100, 120]` give `(100*10 + 200*10) / 20 = 150.0` — the pre-window point
/// at t=50 carries the first 10 seconds.
pub fn time_weighted_average(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (idx, &(timestamp, value)) in points.iter().enumerate() {
        let ts_from = timestamp.max(start_ts);
        let ts_until = if idx == points.len() - 1 {
            end_ts
        } else {
            points[idx + 1].0.min(end_ts)
        };

        if ts_until <= ts_from {
            continue;
        }

        let duration = ts_until - ts_from;
        total_weight += duration;
        weighted_sum += value * duration;
    }

    if total_weight <= 0.0 || total_weight.abs() < 1e-12 {
        return None;
    }

    Some(weighted_sum / total_weight)
}

/// Average volume per second over the window:
/// `sum(values in [start_ts, end_ts]) / (end_ts - start_ts)`.
pub fn volume_average(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }

    let duration = end_ts - start_ts;
    if duration <= 0.0 {
        return None;
    }

    let mut total = 0.0;
    let mut count = 0usize;
    for &(timestamp, volume) in points {
        if timestamp >= start_ts && timestamp <= end_ts {
            total += volume;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }

    Some(total / duration)
}

/// Median of a value slice, or `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    if n % 2 == 0 {
        Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0)
    } else {
        Some(sorted[n / 2])
    }
}

/// Median of values whose timestamps fall in `[start_ts, end_ts]`.
pub fn volume_median(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    if points.is_empty() {
        return None;
    }

    let values: Vec<f64> = points
        .iter()
        .filter(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
        .collect();

    median(&values)
}

/// Sum of values in `[start_ts, end_ts]`, or `None` when no point falls
/// inside the window.
pub fn sum_in_window(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    for &(timestamp, value) in points {
        if timestamp >= start_ts && timestamp <= end_ts {
            total += value;
            count += 1;
        }
    }

    if count == 0 {
        None
    } else {
        Some(total)
    }
}

/// Arithmetic mean of values in `[start_ts, end_ts]`.
pub fn simple_average(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    let mut total = 0.0;
    let mut count = 0usize;
    for &(timestamp, value) in points {
        if timestamp >= start_ts && timestamp <= end_ts {
            total += value;
            count += 1;
        }
    }

    if count == 0 {
        None
    } else {
        Some(total / count as f64)
    }
}

/// Maximum value in `[start_ts, end_ts]`.
pub fn max_in_window(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    points
        .iter()
        .filter(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
        .fold(None, |acc: Option<f64>, v| {
            Some(match acc {
                Some(current) if current >= v => current,
                _ => v,
            })
        })
}

/// Minimum value in `[start_ts, end_ts]`.
pub fn min_in_window(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    points
        .iter()
        .filter(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
        .fold(None, |acc: Option<f64>, v| {
            Some(match acc {
                Some(current) if current <= v => current,
                _ => v,
            })
        })
}

/// First value in `[start_ts, end_ts]`.
pub fn first_in_window(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    points
        .iter()
        .find(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
}

/// Last value in `[start_ts, end_ts]`.
pub fn last_in_window(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    points
        .iter()
        .rev()
        .find(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
}

/// Population standard deviation of values in `[start_ts, end_ts]`.
/// Requires at least two samples.
pub fn std_dev(points: &[(f64, f64)], start_ts: f64, end_ts: f64) -> Option<f64> {
    let values: Vec<f64> = points
        .iter()
        .filter(|(t, _)| *t >= start_ts && *t <= end_ts)
        .map(|(_, v)| *v)
        .collect();

    if values.len() < 2 {
        return None;
    }

    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    Some(variance.sqrt())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    // ---- time_weighted_average -------------------------------------------

    #[test]
    fn twa_empty_input() {
        assert_eq!(time_weighted_average(&[], 0.0, 10.0), None);
    }

    #[test]
    fn twa_pre_window_point_carries_duration() {
        // Point at t=50 is valid from window start (100) until t=110; point
        // at t=110 runs to the window end (120).
        let points = [(50.0, 100.0), (110.0, 200.0), (130.0, 300.0)];
        let twa = time_weighted_average(&points, 100.0, 120.0).unwrap();
        assert!((twa - 150.0).abs() < 1e-12, "got {twa}");
    }

    #[test]
    fn twa_duration_attribution_closed_form() {
        // One pre-window point (t0, v0) and one in-window point (t1, v1):
        // result = v0*(t1-s)/(e-s) + v1*(e-t1)/(e-s).
        let (s, e) = (10.0, 20.0);
        let (t0, v0) = (7.0, 100.0);
        let (t1, v1) = (14.0, 200.0);
        let expected = v0 * (t1 - s) / (e - s) + v1 * (e - t1) / (e - s);
        let twa = time_weighted_average(&[(t0, v0), (t1, v1)], s, e).unwrap();
        assert!((twa - expected).abs() < 1e-12, "got {twa}, want {expected}");
    }

    #[test]
    fn twa_constant_series_is_the_constant() {
        let points: Vec<(f64, f64)> = (0..60).map(|i| (i as f64, 42.0)).collect();
        let twa = time_weighted_average(&points, 10.0, 50.0).unwrap();
        assert!((twa - 42.0).abs() < 1e-9);
    }

    #[test]
    fn twa_zero_duration_window_is_none() {
        let points = [(0.0, 1.0), (1.0, 2.0)];
        assert_eq!(time_weighted_average(&points, 5.0, 5.0), None);
    }

    #[test]
    fn twa_all_points_after_window_is_none() {
        let points = [(30.0, 1.0), (40.0, 2.0)];
        assert_eq!(time_weighted_average(&points, 0.0, 10.0), None);
    }

    #[test]
    fn twa_matches_piecewise_integral() {
        // Analytical check against a hand-integrated step function.
        let points = [(0.0, 10.0), (4.0, 20.0), (6.0, 5.0)];
        // Window [2, 9]: 10 for [2,4), 20 for [4,6), 5 for [6,9].
        let expected = (10.0 * 2.0 + 20.0 * 2.0 + 5.0 * 3.0) / 7.0;
        let twa = time_weighted_average(&points, 2.0, 9.0).unwrap();
        assert!((twa - expected).abs() < 1e-12);
    }

    // ---- volume_average / volume_median ----------------------------------

    #[test]
    fn volume_average_is_flow_rate() {
        // 30 units over a 10-second window = 3 units/second.
        let points = [(1.0, 10.0), (5.0, 10.0), (9.0, 10.0)];
        let avg = volume_average(&points, 0.0, 10.0).unwrap();
        assert!((avg - 3.0).abs() < 1e-12);
    }

    #[test]
    fn volume_average_rejects_degenerate_window() {
        let points = [(1.0, 10.0)];
        assert_eq!(volume_average(&points, 10.0, 10.0), None);
        assert_eq!(volume_average(&points, 10.0, 5.0), None);
    }

    #[test]
    fn volume_average_no_points_in_window() {
        let points = [(100.0, 10.0)];
        assert_eq!(volume_average(&points, 0.0, 10.0), None);
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn volume_median_filters_window() {
        let points = [(0.0, 100.0), (5.0, 2.0), (6.0, 4.0), (7.0, 6.0), (20.0, 100.0)];
        assert_eq!(volume_median(&points, 5.0, 7.0), Some(4.0));
    }

    // ---- simple reductions -----------------------------------------------

    #[test]
    fn reductions_respect_window_bounds() {
        let points = [(0.0, 5.0), (1.0, 1.0), (2.0, 9.0), (3.0, 3.0), (10.0, 99.0)];
        assert_eq!(sum_in_window(&points, 1.0, 3.0), Some(13.0));
        assert_eq!(simple_average(&points, 1.0, 3.0), Some(13.0 / 3.0));
        assert_eq!(max_in_window(&points, 1.0, 3.0), Some(9.0));
        assert_eq!(min_in_window(&points, 1.0, 3.0), Some(1.0));
        assert_eq!(first_in_window(&points, 1.0, 3.0), Some(1.0));
        assert_eq!(last_in_window(&points, 1.0, 3.0), Some(3.0));
    }

    #[test]
    fn reductions_empty_selection_is_none() {
        let points = [(0.0, 5.0)];
        assert_eq!(sum_in_window(&points, 1.0, 3.0), None);
        assert_eq!(simple_average(&points, 1.0, 3.0), None);
        assert_eq!(max_in_window(&points, 1.0, 3.0), None);
        assert_eq!(min_in_window(&points, 1.0, 3.0), None);
        assert_eq!(first_in_window(&points, 1.0, 3.0), None);
        assert_eq!(last_in_window(&points, 1.0, 3.0), None);
    }

    // ---- std_dev ----------------------------------------------------------

    #[test]
    fn std_dev_requires_two_samples() {
        assert_eq!(std_dev(&[(0.0, 1.0)], 0.0, 10.0), None);
    }

    #[test]
    fn std_dev_population_variance() {
        let points = [(0.0, 2.0), (1.0, 4.0), (2.0, 4.0), (3.0, 4.0), (4.0, 5.0), (5.0, 5.0), (6.0, 7.0), (7.0, 9.0)];
        // Classic example set with population std dev of 2.0.
        let sd = std_dev(&points, 0.0, 7.0).unwrap();
        assert!((sd - 2.0).abs() < 1e-12, "got {sd}");
    }
}
