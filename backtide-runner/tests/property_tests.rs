//! Property tests for result packaging and metrics.

use proptest::prelude::*;

use backtide_runner::result::{pct_returns, resample, resample_onto};
use backtide_runner::ValuePoint;

fn arb_points() -> impl Strategy<Value = Vec<ValuePoint>> {
    prop::collection::vec((1i64..500, 1.0f64..10_000.0), 1..60).prop_map(|steps| {
        let mut time = 1_000;
        steps
            .into_iter()
            .map(|(gap, value)| {
                time += gap;
                ValuePoint { time, value }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn resampled_grid_is_regular_and_takes_last_value(
        points in arb_points(),
        interval in 1i64..900,
    ) {
        let grid = resample(&points, interval);
        prop_assert!(!grid.is_empty());
        prop_assert_eq!(grid[0].time, points[0].time);

        for pair in grid.windows(2) {
            prop_assert_eq!(pair[1].time - pair[0].time, interval);
        }
        for point in &grid {
            let expected = points
                .iter()
                .filter(|p| p.time <= point.time)
                .last()
                .map(|p| p.value);
            prop_assert_eq!(Some(point.value), expected);
        }
    }

    #[test]
    fn grid_points_before_first_sample_are_dropped(
        points in arb_points(),
        lead in 1i64..5_000,
        interval in 1i64..900,
    ) {
        let first = points[0].time;
        let last = points[points.len() - 1].time;
        let grid = resample_onto(&points, first - lead, last, interval);
        prop_assert!(grid.iter().all(|p| p.time >= first));
    }

    #[test]
    fn returns_align_with_points(points in arb_points()) {
        let returns = pct_returns(&points);
        prop_assert_eq!(returns.len(), points.len());
        prop_assert!(returns[0].value.is_none());

        for (i, ret) in returns.iter().enumerate().skip(1) {
            prop_assert_eq!(ret.time, points[i].time);
            let expected = (points[i].value - points[i - 1].value) / points[i - 1].value;
            let actual = ret.value.unwrap_or(f64::NAN);
            prop_assert!((actual - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn compounding_returns_recovers_final_value(points in arb_points()) {
        let returns = pct_returns(&points);
        let compounded = returns
            .iter()
            .filter_map(|r| r.value)
            .fold(points[0].value, |acc, r| acc * (1.0 + r));
        let last = points[points.len() - 1].value;
        prop_assert!((compounded - last).abs() / last < 1e-9);
    }
}
