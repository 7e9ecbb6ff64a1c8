//! Gauss quadrature on the reference interval `[-1, 1]` and the reference quadrilateral `[-1, 1]^2`.
use crate::nalgebra::Point2;
use crate::Real;
use std::f64::consts::PI;

/// Weights and points of a 1D rule.
pub type QuadraturePair1d<T> = (Vec<T>, Vec<T>);

/// Weights and points of a 2D rule.
pub type QuadraturePair2d<T> = (Vec<T>, Vec<Point2<T>>);

/// Evaluates the Legendre polynomial `P_n` and `P_{n-1}` at `x` by the three-term recurrence
///  m P_m(x) = (2m - 1) x P_{m - 1}(x) - (m - 1) P_{m - 2}(x).
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let mut p1 = 1.0;
    let mut p2 = 0.0;
    for m in 1..=n {
        let m = m as f64;
        let p3 = p2;
        p2 = p1;
        p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
    }
    (p1, p2)
}

/// Gauss-Legendre points and weights in `f64`, with points sorted in ascending order.
fn gauss_f64(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "number of points must be positive");
    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];

    // Only find the first half of the roots, the rest follow by symmetry
    for i in 0..(n + 1) / 2 {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp;
        let mut iterations = 0;
        loop {
            let (p, p_prev) = legendre(n, x);
            dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
            let dx = -p / dp;
            x += dx;
            iterations += 1;
            if dx.abs() <= 1e-15 || iterations >= 100 {
                break;
            }
        }
        let (p, p_prev) = legendre(n, x);
        dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        // The initial guesses approach the roots from the right end of the interval
        points[n - 1 - i] = x;
        points[i] = -x;
        weights[n - 1 - i] = w;
        weights[i] = w;
    }

    (weights, points)
}

/// Gauss quadrature for the reference interval `[-1, 1]`.
///
/// Given `n` points, the rule integrates polynomials of degree up to `2n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss<T: Real>(num_points: usize) -> QuadraturePair1d<T> {
    let (weights, points) = gauss_f64(num_points);
    let convert = |x: f64| T::from_f64(x).expect("f64 must fit in T");
    (
        weights.into_iter().map(convert).collect(),
        points.into_iter().map(convert).collect(),
    )
}

/// A tensor-product Gauss rule for the reference quadrilateral `[-1, 1]^2`.
///
/// Points are ordered with the first coordinate running fastest.
pub fn quadrilateral_gauss<T: Real>(num_points_per_dim: usize) -> QuadraturePair2d<T> {
    let (weights1d, points1d) = gauss::<T>(num_points_per_dim);
    let n = num_points_per_dim;
    let mut weights = Vec::with_capacity(n * n);
    let mut points = Vec::with_capacity(n * n);
    for (&wy, &y) in weights1d.iter().zip(&points1d) {
        for (&wx, &x) in weights1d.iter().zip(&points1d) {
            weights.push(wx * wy);
            points.push(Point2::new(x, y));
        }
    }
    (weights, points)
}
