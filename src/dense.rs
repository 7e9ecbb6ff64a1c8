//! Small dense linear algebra kernels used by the per-element computations.
//!
//! The matrices involved are element-local blocks with at most a few hundred rows, so the
//! kernels work in place on `nalgebra` dynamic matrices and report failures instead of
//! panicking.
use crate::nalgebra::{DMatrix, DVector};
use crate::Real;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum DenseError {
    /// No pivot above the singularity tolerance was found in the given column.
    Singular { pivot_index: usize, pivot_magnitude: f64 },
    DimensionMismatch {
        operation: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

impl fmt::Display for DenseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Singular {
                pivot_index,
                pivot_magnitude,
            } => write!(
                f,
                "Matrix is singular: pivot {} has magnitude {:e}",
                pivot_index, pivot_magnitude
            ),
            Self::DimensionMismatch {
                operation,
                expected,
                actual,
            } => write!(
                f,
                "Dimension mismatch in {}: expected {}x{}, got {}x{}",
                operation, expected.0, expected.1, actual.0, actual.1
            ),
        }
    }
}

impl Error for DenseError {}

fn check_shape(operation: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Result<(), DenseError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DenseError::DimensionMismatch {
            operation,
            expected,
            actual,
        })
    }
}

fn to_f64<T: Real>(value: T) -> f64 {
    crate::nalgebra::try_convert(value).unwrap_or(f64::NAN)
}

/// Inverts a square matrix in place by Gauss-Jordan elimination with partial pivoting.
///
/// A pivot whose magnitude does not exceed `n * eps * max_ij |a_ij|` is considered zero, in which
/// case the matrix is reported as singular. On error the contents of `matrix` are unspecified.
pub fn gauss_jordan<T: Real>(matrix: &mut DMatrix<T>) -> Result<(), DenseError> {
    let n = matrix.nrows();
    check_shape("gauss_jordan", (n, n), matrix.shape())?;

    let max_abs = matrix.iter().fold(T::zero(), |max, x| max.max(x.abs()));
    let tolerance = max_abs * T::default_epsilon() * T::from_usize(n.max(1)).expect("usize must fit in T");

    // Row interchanges performed at each step. They are undone as column interchanges at the end.
    let mut interchanges = Vec::with_capacity(n);
    for j in 0..n {
        let (pivot_row, pivot_abs) = (j..n)
            .map(|i| (i, matrix[(i, j)].abs()))
            .fold((j, T::zero()), |best, candidate| if candidate.1 > best.1 { candidate } else { best });

        if max_abs == T::zero() || pivot_abs <= tolerance {
            return Err(DenseError::Singular {
                pivot_index: j,
                pivot_magnitude: to_f64(pivot_abs),
            });
        }

        if pivot_row != j {
            matrix.swap_rows(j, pivot_row);
        }
        interchanges.push(pivot_row);

        let inv_pivot = T::one() / matrix[(j, j)];
        matrix[(j, j)] = T::one();
        matrix.row_mut(j).scale_mut(inv_pivot);

        for i in 0..n {
            if i == j {
                continue;
            }
            let factor = matrix[(i, j)];
            if factor == T::zero() {
                continue;
            }
            matrix[(i, j)] = T::zero();
            for k in 0..n {
                let a_jk = matrix[(j, k)];
                matrix[(i, k)] -= factor * a_jk;
            }
        }
    }

    for (j, &pivot_row) in interchanges.iter().enumerate().rev() {
        if pivot_row != j {
            matrix.swap_columns(j, pivot_row);
        }
    }

    Ok(())
}

/// Computes `c = a * b`, or `c += a * b` if `adding` is true.
pub fn mmult<T: Real>(c: &mut DMatrix<T>, a: &DMatrix<T>, b: &DMatrix<T>, adding: bool) -> Result<(), DenseError> {
    check_shape("mmult", (a.ncols(), b.ncols()), (b.nrows(), b.ncols()))?;
    check_shape("mmult", (a.nrows(), b.ncols()), c.shape())?;
    let beta = if adding { T::one() } else { T::zero() };
    c.gemm(T::one(), a, b, beta);
    Ok(())
}

/// Computes `c = a^T * b`, or `c += a^T * b` if `adding` is true.
pub fn tr_mmult<T: Real>(c: &mut DMatrix<T>, a: &DMatrix<T>, b: &DMatrix<T>, adding: bool) -> Result<(), DenseError> {
    check_shape("tr_mmult", (a.nrows(), b.ncols()), (b.nrows(), b.ncols()))?;
    check_shape("tr_mmult", (a.ncols(), b.ncols()), c.shape())?;
    let beta = if adding { T::one() } else { T::zero() };
    c.gemm_tr(T::one(), a, b, beta);
    Ok(())
}

/// Computes `y = a * x`, or `y += a * x` if `adding` is true.
pub fn vmult<T: Real>(y: &mut DVector<T>, a: &DMatrix<T>, x: &DVector<T>, adding: bool) -> Result<(), DenseError> {
    check_shape("vmult", (a.ncols(), 1), (x.len(), 1))?;
    check_shape("vmult", (a.nrows(), 1), (y.len(), 1))?;
    let beta = if adding { T::one() } else { T::zero() };
    y.gemv(T::one(), a, x, beta);
    Ok(())
}
