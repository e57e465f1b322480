//! Statistical utility functions shared across modules
//!
//! Quantiles, medians, tie-averaged ranks and linear interpolation used by the
//! expression filter, TMM normalization and the voom mean-variance trend.

use statrs::statistics::{Data, Median};

/// Sample quantile using linear interpolation between order statistics
/// (Hyndman & Fan type 7, the default of most statistics packages).
///
/// Returns NaN for an empty slice. NaN entries are ignored.
pub fn quantile(x: &[f64], prob: f64) -> f64 {
    let mut sorted: Vec<f64> = x.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let h = (n - 1) as f64 * prob.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Median of a slice (mean of the two middle values for even lengths)
pub fn median(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    Data::new(x.to_vec()).median()
}

/// Arithmetic mean; NaN for an empty slice
pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Ranks (1-based) with ties replaced by their average rank
pub fn rank_average_ties(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && x[order[j + 1]] == x[order[i]] {
            j += 1;
        }
        // positions i..=j share ranks i+1..=j+1
        let avg = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg;
        }
        i = j + 1;
    }
    ranks
}

/// Piecewise-linear interpolator with constant extrapolation beyond the data range.
///
/// Duplicate x values are collapsed to the mean of their y values.
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl LinearInterpolator {
    /// Build from (x, y) points in any order. Returns `None` when no finite point exists.
    pub fn new(points: &[(f64, f64)]) -> Option<Self> {
        let mut pts: Vec<(f64, f64)> = points
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .collect();
        if pts.is_empty() {
            return None;
        }
        pts.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xs = Vec::with_capacity(pts.len());
        let mut ys = Vec::with_capacity(pts.len());
        let mut i = 0;
        while i < pts.len() {
            let x = pts[i].0;
            let mut sum = 0.0;
            let mut count = 0usize;
            while i < pts.len() && pts[i].0 == x {
                sum += pts[i].1;
                count += 1;
                i += 1;
            }
            xs.push(x);
            ys.push(sum / count as f64);
        }

        Some(Self { xs, ys })
    }

    /// Evaluate at `x`
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        if x <= self.xs[0] {
            return self.ys[0];
        }
        if x >= self.xs[n - 1] {
            return self.ys[n - 1];
        }
        // first knot strictly greater than x
        let hi = self.xs.partition_point(|&k| k <= x);
        let lo = hi - 1;
        let t = (x - self.xs[lo]) / (self.xs[hi] - self.xs[lo]);
        self.ys[lo] + t * (self.ys[hi] - self.ys[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_type7() {
        let x = vec![1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&x, 0.75) - 3.25).abs() < 1e-12);
        assert!((quantile(&x, 0.5) - 2.5).abs() < 1e-12);
        assert_eq!(quantile(&x, 0.0), 1.0);
        assert_eq!(quantile(&x, 1.0), 4.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_rank_average_ties() {
        let r = rank_average_ties(&[10.0, 20.0, 10.0, 5.0]);
        assert_eq!(r, vec![2.5, 4.0, 2.5, 1.0]);
    }

    #[test]
    fn test_interpolator_ties_and_clamping() {
        let f = LinearInterpolator::new(&[(0.0, 0.0), (2.0, 4.0), (2.0, 2.0), (4.0, 3.0)]).unwrap();
        // tie at x=2 collapses to 3.0
        assert_eq!(f.eval(2.0), 3.0);
        assert!((f.eval(1.0) - 1.5).abs() < 1e-12);
        assert_eq!(f.eval(-10.0), 0.0);
        assert_eq!(f.eval(10.0), 3.0);
        assert!(LinearInterpolator::new(&[(f64::NAN, 1.0)]).is_none());
    }
}
