//! Robust aggregation and least-squares affine fit
//!
//! Each display axis is an independent linear model in `(raw_x, raw_y, 1)`.
//! With `N >= 3` pairs we solve the normal equations
//!
//! ```text
//! (JᵀJ) p = Jᵀ t      J row = [raw_x, raw_y, 1]
//! ```
//!
//! once for the x targets and once for the y targets. `JᵀJ` is shared and
//! inverted in closed form.

use super::types::{AffineTransform, PointPair};
use crate::error::{Error, Result};
use crate::stream::GazePoint;

/// Determinant below which the raw points are treated as collinear
const SINGULAR_EPSILON: f64 = 1e-12;

/// Trimmed mean: sort, drop `trim` of the values at each end, average the rest
///
/// Always keeps at least one value, so tiny sets degrade to the median.
pub fn trimmed_mean(values: &[f64], trim: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let mut cut = (n as f64 * trim.clamp(0.0, 0.5)).floor() as usize;
    if 2 * cut >= n {
        cut = (n - 1) / 2;
    }
    let kept = &sorted[cut..n - cut];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Per-axis trimmed mean of a set of raw positions
pub fn aggregate(points: &[GazePoint], trim: f64) -> Option<GazePoint> {
    let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    Some(GazePoint::new(trimmed_mean(&xs, trim)?, trimmed_mean(&ys, trim)?))
}

/// Least-squares affine fit over all pairs
pub fn fit_affine(pairs: &[PointPair]) -> Result<AffineTransform> {
    if pairs.len() < 3 {
        return Err(Error::CalibrationFailed(format!(
            "need at least 3 points for an affine fit, got {}",
            pairs.len()
        )));
    }

    let mut jtj = [[0.0f64; 3]; 3];
    let mut jtx = [0.0f64; 3];
    let mut jty = [0.0f64; 3];

    for pair in pairs {
        let row = [pair.raw.x, pair.raw.y, 1.0];
        for i in 0..3 {
            for j in 0..3 {
                jtj[i][j] += row[i] * row[j];
            }
            jtx[i] += row[i] * pair.target.x;
            jty[i] += row[i] * pair.target.y;
        }
    }

    let inv = invert_3x3(&jtj).ok_or_else(|| {
        Error::CalibrationFailed("calibration points are collinear".to_string())
    })?;

    let [ax, bx, cx] = mul_3x3(&inv, &jtx);
    let [ay, by, cy] = mul_3x3(&inv, &jty);
    Ok(AffineTransform {
        ax,
        bx,
        cx,
        ay,
        by,
        cy,
    })
}

/// Mean display-space distance between mapped raw points and their targets
pub fn average_error(transform: &AffineTransform, pairs: &[PointPair]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f64 = pairs
        .iter()
        .map(|p| transform.apply(p.raw).distance(&p.target))
        .sum();
    total / pairs.len() as f64
}

/// Inverse via cofactors
fn invert_3x3(a: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = a[0][0] * (a[1][1] * a[2][2] - a[1][2] * a[2][1])
        - a[0][1] * (a[1][0] * a[2][2] - a[1][2] * a[2][0])
        + a[0][2] * (a[1][0] * a[2][1] - a[1][1] * a[2][0]);

    if det.abs() < SINGULAR_EPSILON || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;

    Some([
        [
            (a[1][1] * a[2][2] - a[1][2] * a[2][1]) * inv_det,
            (a[0][2] * a[2][1] - a[0][1] * a[2][2]) * inv_det,
            (a[0][1] * a[1][2] - a[0][2] * a[1][1]) * inv_det,
        ],
        [
            (a[1][2] * a[2][0] - a[1][0] * a[2][2]) * inv_det,
            (a[0][0] * a[2][2] - a[0][2] * a[2][0]) * inv_det,
            (a[0][2] * a[1][0] - a[0][0] * a[1][2]) * inv_det,
        ],
        [
            (a[1][0] * a[2][1] - a[1][1] * a[2][0]) * inv_det,
            (a[0][1] * a[2][0] - a[0][0] * a[2][1]) * inv_det,
            (a[0][0] * a[1][1] - a[0][1] * a[1][0]) * inv_det,
        ],
    ])
}

#[inline]
fn mul_3x3(m: &[[f64; 3]; 3], v: &[f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const KNOWN: AffineTransform = AffineTransform {
        ax: 1800.0,
        bx: 40.0,
        cx: 35.0,
        ay: -25.0,
        by: 1000.0,
        cy: 60.0,
    };

    fn pairs_from(raws: &[(f64, f64)], t: &AffineTransform) -> Vec<PointPair> {
        raws.iter()
            .map(|&(x, y)| {
                let raw = GazePoint::new(x, y);
                PointPair {
                    raw,
                    target: t.apply(raw),
                }
            })
            .collect()
    }

    #[test]
    fn test_trimmed_mean_rejects_outliers() {
        let values = [0.50, 0.51, 0.49, 0.50, 0.52, 0.48, 0.50, 0.51, 0.49, 9.0];
        let mean = trimmed_mean(&values, 0.2).unwrap();
        assert_relative_eq!(mean, 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_trimmed_mean_small_sets() {
        assert_eq!(trimmed_mean(&[], 0.2), None);
        assert_relative_eq!(trimmed_mean(&[3.0], 0.4).unwrap(), 3.0);
        // One value cut from each end of three leaves the median
        assert_relative_eq!(trimmed_mean(&[1.0, 2.0, 6.0], 0.49).unwrap(), 2.0);
        assert_relative_eq!(trimmed_mean(&[1.0, 2.0, 6.0], 0.2).unwrap(), 3.0);
        assert_relative_eq!(trimmed_mean(&[1.0, 2.0, 100.0, 3.0], 0.0).unwrap(), 26.5);
    }

    #[test]
    fn test_exact_fit_from_four_points() {
        let pairs = pairs_from(&[(0.1, 0.1), (0.9, 0.1), (0.9, 0.9), (0.1, 0.9)], &KNOWN);
        let fit = fit_affine(&pairs).unwrap();
        assert_relative_eq!(fit.ax, KNOWN.ax, epsilon = 1e-6);
        assert_relative_eq!(fit.bx, KNOWN.bx, epsilon = 1e-6);
        assert_relative_eq!(fit.cx, KNOWN.cx, epsilon = 1e-6);
        assert_relative_eq!(fit.ay, KNOWN.ay, epsilon = 1e-6);
        assert_relative_eq!(fit.by, KNOWN.by, epsilon = 1e-6);
        assert_relative_eq!(fit.cy, KNOWN.cy, epsilon = 1e-6);
        assert!(average_error(&fit, &pairs) < 1e-6);
    }

    #[test]
    fn test_overdetermined_fit_uses_least_squares() {
        let mut pairs = pairs_from(
            &[(0.1, 0.1), (0.9, 0.1), (0.9, 0.9), (0.1, 0.9), (0.5, 0.5)],
            &KNOWN,
        );
        // Perturb the centre point; a point-for-point solve would ignore it
        pairs[4].target.x += 50.0;
        let fit = fit_affine(&pairs).unwrap();
        let centre = fit.apply(GazePoint::new(0.5, 0.5));
        let exact = KNOWN.apply(GazePoint::new(0.5, 0.5));
        assert!(centre.x > exact.x && centre.x < exact.x + 50.0);
    }

    #[test]
    fn test_collinear_points_fail() {
        let pairs = pairs_from(&[(0.1, 0.1), (0.5, 0.5), (0.9, 0.9), (0.3, 0.3)], &KNOWN);
        assert!(matches!(fit_affine(&pairs), Err(Error::CalibrationFailed(_))));
    }

    #[test]
    fn test_too_few_points_fail() {
        let pairs = pairs_from(&[(0.1, 0.1), (0.9, 0.1)], &KNOWN);
        assert!(fit_affine(&pairs).is_err());
    }
}
