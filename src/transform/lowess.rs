//! Robust locally weighted scatterplot smoothing (lowess)
//!
//! Cleveland's algorithm: local linear fits with tricube weights over the
//! nearest `span * n` points, followed by bisquare robustness iterations.
//! Points closer than `delta` to the last fitted point are linearly
//! interpolated instead of fitted.

use crate::error::{Result, VoomError};

/// Smoothed curve evaluated at the sorted input x values
#[derive(Debug, Clone)]
pub struct LowessFit {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// Fit lowess with `iterations` robustness passes and `delta = 1%` of the x range.
pub fn lowess(x: &[f64], y: &[f64], span: f64, iterations: usize) -> Result<LowessFit> {
    if x.len() != y.len() {
        return Err(VoomError::DimensionMismatch {
            expected: format!("{} y values", x.len()),
            got: format!("{} y values", y.len()),
        });
    }
    let mut pairs: Vec<(f64, f64)> = x.iter().copied().zip(y.iter().copied()).collect();
    if pairs.iter().any(|(a, b)| !a.is_finite() || !b.is_finite()) {
        return Err(VoomError::InvalidInput {
            reason: "lowess input contains non-finite values".to_string(),
        });
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let xs: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let ys: Vec<f64> = pairs.iter().map(|p| p.1).collect();

    let delta = match (xs.first(), xs.last()) {
        (Some(lo), Some(hi)) => 0.01 * (hi - lo),
        _ => 0.0,
    };
    let fitted = clowess(&xs, &ys, span, iterations, delta);
    Ok(LowessFit { x: xs, y: fitted })
}

fn clowess(x: &[f64], y: &[f64], span: f64, n_iter: usize, delta: f64) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }

    let ns = ((span * n as f64 + 1e-7) as usize).clamp(2, n);
    let mut ys = vec![0.0; n];
    let mut rw = vec![1.0; n];
    let mut res = vec![0.0; n];
    let mut w = vec![0.0; n];

    for iteration in 1..=n_iter + 1 {
        let mut nleft = 0;
        let mut nright = ns - 1;
        let mut last: Option<usize> = None;
        let mut i = 0;

        loop {
            if nright < n - 1 {
                // slide the window while it gets closer to x[i]
                let d1 = x[i] - x[nleft];
                let d2 = x[nright + 1] - x[i];
                if d1 > d2 {
                    nleft += 1;
                    nright += 1;
                    continue;
                }
            }

            ys[i] = local_fit(x, y, x[i], nleft, nright, &mut w, iteration > 1, &rw).unwrap_or(y[i]);

            // interpolate skipped points
            if let Some(l) = last {
                if l + 1 < i {
                    let denom = x[i] - x[l];
                    for j in (l + 1)..i {
                        let alpha = (x[j] - x[l]) / denom;
                        ys[j] = alpha * ys[i] + (1.0 - alpha) * ys[l];
                    }
                }
            }

            let l = i;
            let cut = x[l] + delta;
            let mut last_tied = l;
            i = l + 1;
            while i < n {
                if x[i] > cut {
                    break;
                }
                if x[i] == x[l] {
                    ys[i] = ys[l];
                    last_tied = i;
                }
                i += 1;
            }
            last = Some(last_tied);
            i = (last_tied + 1).max(i - 1);
            if last_tied >= n - 1 {
                break;
            }
        }

        for k in 0..n {
            res[k] = y[k] - ys[k];
        }
        if iteration > n_iter {
            break;
        }

        let scale = res.iter().map(|r| r.abs()).sum::<f64>() / n as f64;
        let mut abs_res: Vec<f64> = res.iter().map(|r| r.abs()).collect();
        abs_res.sort_by(|a, b| a.total_cmp(b));
        let m1 = n / 2;
        let cmad = if n % 2 == 0 {
            3.0 * (abs_res[m1] + abs_res[m1 - 1])
        } else {
            6.0 * abs_res[m1]
        };
        if cmad < 1e-7 * scale {
            break;
        }

        let c9 = 0.999 * cmad;
        let c1 = 0.001 * cmad;
        for k in 0..n {
            let r = res[k].abs();
            rw[k] = if r <= c1 {
                1.0
            } else if r <= c9 {
                (1.0 - (r / cmad).powi(2)).powi(2)
            } else {
                0.0
            };
        }
    }

    ys
}

/// Weighted local linear fit at `xs` over the window `[nleft, nright]`.
/// Returns `None` when every point in reach has zero weight.
#[allow(clippy::too_many_arguments)]
fn local_fit(
    x: &[f64],
    y: &[f64],
    xs: f64,
    nleft: usize,
    nright: usize,
    w: &mut [f64],
    use_robustness: bool,
    rw: &[f64],
) -> Option<f64> {
    let n = x.len();
    let range = x[n - 1] - x[0];
    let h = (xs - x[nleft]).max(x[nright] - xs);
    let h9 = 0.999 * h;
    let h1 = 0.001 * h;

    let mut total = 0.0;
    let mut j = nleft;
    while j < n {
        w[j] = 0.0;
        let r = (x[j] - xs).abs();
        if r <= h9 {
            w[j] = if r <= h1 { 1.0 } else { (1.0 - (r / h).powi(3)).powi(3) };
            if use_robustness {
                w[j] *= rw[j];
            }
            total += w[j];
        } else if x[j] > xs {
            break;
        }
        j += 1;
    }
    let nrt = j - 1;

    if total <= 0.0 {
        return None;
    }

    for wj in w[nleft..=nrt].iter_mut() {
        *wj /= total;
    }

    if h > 0.0 {
        let a: f64 = (nleft..=nrt).map(|k| w[k] * x[k]).sum();
        let c: f64 = (nleft..=nrt).map(|k| w[k] * (x[k] - a).powi(2)).sum();
        if c.sqrt() > 0.001 * range {
            let b = (xs - a) / c;
            for k in nleft..=nrt {
                w[k] *= b * (x[k] - a) + 1.0;
            }
        }
    }

    Some((nleft..=nrt).map(|k| w[k] * y[k]).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproduces_a_line() {
        let x: Vec<f64> = (0..50).map(|i| i as f64 * 0.3).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v - 1.0).collect();
        let fit = lowess(&x, &y, 0.5, 3).unwrap();
        for (xi, yi) in fit.x.iter().zip(fit.y.iter()) {
            assert!((yi - (2.0 * xi - 1.0)).abs() < 1e-8, "at {} got {}", xi, yi);
        }
    }

    #[test]
    fn test_sorts_input_and_resists_outlier() {
        let mut x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        x.reverse();
        let mut y: Vec<f64> = x.iter().map(|_| 1.0).collect();
        y[10] = 50.0;
        let fit = lowess(&x, &y, 0.5, 3).unwrap();
        assert!(fit.x.windows(2).all(|w| w[0] <= w[1]));
        for yi in &fit.y {
            assert!((yi - 1.0).abs() < 1e-6, "robust fit should ignore the outlier, got {}", yi);
        }
    }

    #[test]
    fn test_tied_x_values() {
        let x = vec![1.0, 1.0, 1.0, 2.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![1.0, 2.0, 3.0, 2.0, 2.0, 3.0, 4.0, 5.0];
        let fit = lowess(&x, &y, 0.8, 3).unwrap();
        assert_eq!(fit.y.len(), 8);
        assert!(fit.y.iter().all(|v| v.is_finite()));
        assert_eq!(fit.y[0], fit.y[1]);
        assert_eq!(fit.y[1], fit.y[2]);
    }

    #[test]
    fn test_rejects_nan() {
        assert!(lowess(&[1.0, f64::NAN], &[1.0, 2.0], 0.5, 3).is_err());
    }
}
