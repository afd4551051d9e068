pub mod sparse;

pub use sparse::{DerivativeMatrix, RowAccumulator};

use std::cmp::Ordering;

fn kahan_add(sum: &mut f64, correction: &mut f64, value: f64) {
    let corrected = value - *correction;
    let next = *sum + corrected;
    *correction = (next - *sum) - corrected;
    *sum = next;
}

pub fn stable_sum(values: &[f64]) -> f64 {
    stable_sum_iter(values.iter().copied())
}

pub fn stable_sum_iter(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut correction = 0.0;

    for value in values {
        kahan_add(&mut sum, &mut correction, value);
    }

    sum
}

pub fn stable_weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.len() != weights.len() {
        return None;
    }

    let total_weight = stable_sum(weights);
    if total_weight == 0.0 {
        return None;
    }

    let weighted_sum = stable_sum_iter(values.iter().zip(weights).map(|(v, w)| v * w));
    Some(weighted_sum / total_weight)
}

/// Sums `values` over contiguous groups. `group_starts` holds the first row of
/// every group and `values.len()` closes the last one.
pub fn stable_group_sums(values: &[f64], group_starts: &[usize]) -> Vec<f64> {
    group_starts
        .iter()
        .enumerate()
        .map(|(group, &start)| {
            let end = group_starts
                .get(group + 1)
                .copied()
                .unwrap_or(values.len());
            stable_sum(&values[start..end])
        })
        .collect()
}

/// Stable argsort with ties broken by original position.
pub fn deterministic_argsort_by<T, F>(values: &[T], mut compare: F) -> Vec<usize>
where
    F: FnMut(&T, &T) -> Ordering,
{
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_unstable_by(|lhs, rhs| {
        compare(&values[*lhs], &values[*rhs]).then_with(|| lhs.cmp(rhs))
    });
    indices
}

/// Minimum and maximum of the finite entries, `None` if there are none.
pub fn finite_extent(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold(None, |extent, value| match extent {
            None => Some((value, value)),
            Some((min, max)) => Some((min.min(value), max.max(value))),
        })
}

#[cfg(test)]
mod tests {
    use super::{
        deterministic_argsort_by, finite_extent, stable_group_sums, stable_sum,
        stable_weighted_mean,
    };

    #[test]
    fn compensated_sum_keeps_small_terms() {
        let mut values = vec![1.0e16];
        values.extend(std::iter::repeat_n(1.0, 100));
        values.push(-1.0e16);
        assert_eq!(stable_sum(&values), 100.0);
    }

    #[test]
    fn group_sums_follow_group_boundaries() {
        let sums = stable_group_sums(&[1.0, 2.0, 3.0, 4.0, 5.0], &[0, 2, 3]);
        assert_eq!(sums, vec![3.0, 3.0, 9.0]);
    }

    #[test]
    fn weighted_mean_rejects_zero_weight() {
        assert_eq!(stable_weighted_mean(&[1.0, 2.0], &[0.0, 0.0]), None);
        let mean = stable_weighted_mean(&[1.0, 3.0], &[1.0, 3.0]).expect("mean");
        assert!((mean - 2.5).abs() < 1.0e-12);
    }

    #[test]
    fn argsort_breaks_ties_by_position() {
        let keys = [[1, 0, 0], [0, 0, 1], [1, 0, 0]];
        assert_eq!(deterministic_argsort_by(&keys, |a, b| a.cmp(b)), vec![1, 0, 2]);
    }

    #[test]
    fn extent_ignores_non_finite_values() {
        assert_eq!(
            finite_extent(&[f64::NAN, 3.0, -1.0, f64::INFINITY]),
            Some((-1.0, 3.0))
        );
        assert_eq!(finite_extent(&[]), None);
    }
}
