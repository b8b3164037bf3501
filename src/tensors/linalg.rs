//! Small dense linear algebra on square [`Tensor2D`]s.
//!
//! Intended for the handful of tiny systems the image side needs (an 8×8
//! perspective-transform solve, 3×3 homographies). Elimination runs in `f64`
//! with partial pivoting; a pivot no larger than [`SINGULAR_EPSILON`] times
//! the largest entry of the matrix marks it singular, so uniformly scaling a
//! matrix never changes the verdict.

use super::{Tensor2D, TensorFloat};
use crate::error::{TensorError, fail};

/// Pivot magnitude, relative to the matrix's largest entry, treated as zero.
pub const SINGULAR_EPSILON: f64 = 1e-10;

#[track_caller]
fn require_square(op: &'static str, m: &Tensor2D) -> usize {
    if m.rows() != m.cols() {
        fail(TensorError::ShapeMismatch {
            op,
            left: m.shape().to_vec(),
            right: vec![m.cols(), m.rows()],
        });
    }
    m.rows()
}

fn widen(m: &Tensor2D) -> Vec<f64> {
    m.data().iter().map(|&x| f64::from(x)).collect()
}

fn narrow(rows: usize, cols: usize, data: &[f64]) -> Tensor2D {
    Tensor2D::new(rows, cols, data.iter().map(|&x| x as TensorFloat).collect())
}

/// Absolute pivot threshold for `a`; zero for the zero matrix.
fn singular_tolerance(a: &[f64]) -> f64 {
    SINGULAR_EPSILON * a.iter().fold(0.0, |max: f64, x| max.max(x.abs()))
}

/// Row with the largest magnitude in `col`, at or below `from`.
fn pivot_row(a: &[f64], n: usize, col: usize, from: usize) -> usize {
    (from..n)
        .max_by(|&i, &j| a[i * n + col].abs().total_cmp(&a[j * n + col].abs()))
        .unwrap_or(from)
}

fn swap_rows(a: &mut [f64], width: usize, i: usize, j: usize) {
    if i != j {
        for c in 0..width {
            a.swap(i * width + c, j * width + c);
        }
    }
}

/// Determinant by Gaussian elimination.
///
/// Returns `0.0` for singular matrices and `1.0` for the empty matrix.
///
/// # Panics
/// Panics if `m` is not square.
#[must_use]
#[track_caller]
pub fn determinant(m: &Tensor2D) -> TensorFloat {
    let n = require_square("determinant", m);
    let mut a = widen(m);
    let tolerance = singular_tolerance(&a);
    let mut det = 1.0f64;

    for col in 0..n {
        let p = pivot_row(&a, n, col, col);
        if a[p * n + col].abs() <= tolerance {
            return 0.0;
        }
        if p != col {
            swap_rows(&mut a, n, p, col);
            det = -det;
        }
        let pivot = a[col * n + col];
        det *= pivot;
        for r in col + 1..n {
            let factor = a[r * n + col] / pivot;
            for c in col..n {
                a[r * n + c] -= factor * a[col * n + c];
            }
        }
    }
    det as TensorFloat
}

/// Solves `a · x = b` for `x` by Gauss-Jordan elimination.
///
/// `b` may carry several right-hand sides as columns.
///
/// # Errors
/// [`TensorError::SingularMatrix`] if `a` is singular.
///
/// # Panics
/// Panics if `a` is not square or `b.rows() != a.rows()`.
#[track_caller]
pub fn solve(a: &Tensor2D, b: &Tensor2D) -> Result<Tensor2D, TensorError> {
    let n = require_square("solve", a);
    if b.rows() != n {
        fail(TensorError::ShapeMismatch {
            op: "solve",
            left: a.shape().to_vec(),
            right: b.shape().to_vec(),
        });
    }
    let k = b.cols();
    let mut lhs = widen(a);
    let mut rhs = widen(b);
    let tolerance = singular_tolerance(&lhs);

    for col in 0..n {
        let p = pivot_row(&lhs, n, col, col);
        if lhs[p * n + col].abs() <= tolerance {
            return Err(TensorError::SingularMatrix { op: "solve" });
        }
        swap_rows(&mut lhs, n, p, col);
        swap_rows(&mut rhs, k, p, col);

        let pivot = lhs[col * n + col];
        for c in 0..n {
            lhs[col * n + c] /= pivot;
        }
        for c in 0..k {
            rhs[col * k + c] /= pivot;
        }

        for r in (0..n).filter(|&r| r != col) {
            let factor = lhs[r * n + col];
            if factor == 0.0 {
                continue;
            }
            for c in 0..n {
                lhs[r * n + c] -= factor * lhs[col * n + c];
            }
            for c in 0..k {
                rhs[r * k + c] -= factor * rhs[col * k + c];
            }
        }
    }
    Ok(narrow(n, k, &rhs))
}

/// Inverse of a square matrix.
///
/// # Errors
/// [`TensorError::SingularMatrix`] if `m` is singular.
///
/// # Panics
/// Panics if `m` is not square.
#[track_caller]
pub fn inverse(m: &Tensor2D) -> Result<Tensor2D, TensorError> {
    let n = require_square("inverse", m);
    solve(m, &Tensor2D::identity(n)).map_err(|_| TensorError::SingularMatrix { op: "inverse" })
}
