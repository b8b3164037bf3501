use core::fmt;

use rayon::prelude::*;

use super::{TensorFloat, checked_volume, linalg, try_zeroed};
use crate::activation::Activation;
use crate::error::{TensorError, check_shape, fail};

/// A dense, row-major `rows × cols` matrix.
///
/// - The buffer always holds exactly `rows * cols` values.
/// - Element `(r, c)` lives at `r * cols + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor2D {
    rows: usize,
    cols: usize,
    data: Vec<TensorFloat>,
}

impl Tensor2D {
    /// Wraps a caller buffer as a `rows × cols` matrix.
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    #[must_use]
    pub fn new(rows: usize, cols: usize, data: Vec<TensorFloat>) -> Self {
        assert_eq!(
            rows * cols,
            data.len(),
            "shape [{rows}, {cols}] is incompatible with {} data elements",
            data.len()
        );
        Self { rows, cols, data }
    }

    /// Builds a matrix from fixed-width rows.
    #[must_use]
    pub fn from_rows<const C: usize>(rows: &[[TensorFloat; C]]) -> Self {
        Self {
            rows: rows.len(),
            cols: C,
            data: rows.iter().flatten().copied().collect(),
        }
    }

    /// A zero-filled matrix.
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// A zero-filled matrix, reporting allocation failure instead of aborting.
    ///
    /// # Errors
    /// [`TensorError::AllocationFailure`] if the element count overflows or
    /// the buffer cannot be reserved.
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self, TensorError> {
        let len = checked_volume(&[rows, cols])?;
        Ok(Self {
            rows,
            cols,
            data: try_zeroed(len)?,
        })
    }

    /// The `n × n` identity matrix.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        let mut out = Self::zeros(n, n);
        for i in 0..n {
            out.data[i * n + i] = 1.0;
        }
        out
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// `[rows, cols]`.
    #[inline]
    #[must_use]
    pub const fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Row-major element buffer.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[TensorFloat] {
        &self.data
    }

    /// Mutable row-major element buffer.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [TensorFloat] {
        &mut self.data
    }

    /// Consumes the matrix, returning its buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<TensorFloat> {
        self.data
    }

    /// Row `r` as a slice.
    ///
    /// # Panics
    /// Panics if `r >= rows`.
    #[must_use]
    pub fn row(&self, r: usize) -> &[TensorFloat] {
        if r >= self.rows {
            fail(TensorError::OutOfBounds {
                op: "row",
                index: vec![r],
                shape: self.shape().to_vec(),
            });
        }
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    fn offset(&self, op: &'static str, r: usize, c: usize) -> Result<usize, TensorError> {
        if r < self.rows && c < self.cols {
            Ok(r * self.cols + c)
        } else {
            Err(TensorError::OutOfBounds {
                op,
                index: vec![r, c],
                shape: self.shape().to_vec(),
            })
        }
    }

    /// Element at `(r, c)`.
    ///
    /// # Panics
    /// Panics with [`TensorError::OutOfBounds`] outside the matrix.
    #[must_use]
    #[track_caller]
    pub fn get(&self, r: usize, c: usize) -> TensorFloat {
        match self.offset("get", r, c) {
            Ok(i) => self.data[i],
            Err(err) => fail(err),
        }
    }

    /// Element at `(r, c)`, or an error outside the matrix.
    ///
    /// # Errors
    /// [`TensorError::OutOfBounds`] if the index is outside the matrix.
    pub fn try_get(&self, r: usize, c: usize) -> Result<TensorFloat, TensorError> {
        self.offset("get", r, c).map(|i| self.data[i])
    }

    /// Overwrites the element at `(r, c)`.
    ///
    /// # Panics
    /// Panics with [`TensorError::OutOfBounds`] outside the matrix.
    #[track_caller]
    pub fn set(&mut self, r: usize, c: usize, value: TensorFloat) {
        match self.offset("set", r, c) {
            Ok(i) => self.data[i] = value,
            Err(err) => fail(err),
        }
    }

    /// Sets every element to zero.
    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Copies `other` into `self`.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[track_caller]
    pub fn copy_from(&mut self, other: &Self) {
        check_shape("copy", &self.shape(), &other.shape());
        self.data.copy_from_slice(&other.data);
    }

    #[track_caller]
    fn zip_into(
        &self,
        op: &'static str,
        other: &Self,
        dst: &mut Self,
        f: impl Fn(TensorFloat, TensorFloat) -> TensorFloat,
    ) {
        check_shape(op, &self.shape(), &other.shape());
        check_shape(op, &self.shape(), &dst.shape());
        for ((d, &a), &b) in dst.data.iter_mut().zip(&self.data).zip(&other.data) {
            *d = f(a, b);
        }
    }

    /// Element-wise sum.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[must_use]
    #[track_caller]
    pub fn add(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.rows, self.cols);
        self.add_into(other, &mut out);
        out
    }

    /// Element-wise sum written into `dst`.
    #[track_caller]
    pub fn add_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("add", other, dst, |a, b| a + b);
    }

    /// Element-wise difference `self - other`.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[must_use]
    #[track_caller]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.rows, self.cols);
        self.subtract_into(other, &mut out);
        out
    }

    /// Element-wise difference written into `dst`.
    #[track_caller]
    pub fn subtract_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("subtract", other, dst, |a, b| a - b);
    }

    /// Element-wise (Hadamard) product.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[must_use]
    #[track_caller]
    pub fn elementwise_multiply(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.rows, self.cols);
        self.elementwise_multiply_into(other, &mut out);
        out
    }

    /// Element-wise product written into `dst`.
    #[track_caller]
    pub fn elementwise_multiply_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("elementwise_multiply", other, dst, |a, b| a * b);
    }

    /// In-place element-wise product: `self ⊙= other`.
    #[track_caller]
    pub fn elementwise_multiply_assign(&mut self, other: &Self) {
        check_shape("elementwise_multiply", &self.shape(), &other.shape());
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a *= b;
        }
    }

    /// Matrix product `self · other`.
    ///
    /// # Panics
    /// Panics unless `self.cols == other.rows`.
    #[must_use]
    #[track_caller]
    pub fn multiply(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.rows, other.cols);
        self.multiply_into(other, &mut out);
        out
    }

    /// Matrix product written into `dst`, which must be `self.rows × other.cols`.
    ///
    /// Output rows are computed in parallel.
    #[track_caller]
    pub fn multiply_into(&self, other: &Self, dst: &mut Self) {
        if self.cols != other.rows {
            fail(TensorError::ShapeMismatch {
                op: "multiply",
                left: self.shape().to_vec(),
                right: other.shape().to_vec(),
            });
        }
        check_shape("multiply", &dst.shape(), &[self.rows, other.cols]);

        let (k, n) = (self.cols, other.cols);
        if n == 0 {
            return;
        }
        let a = &self.data;
        let b = &other.data;
        dst.data.par_chunks_mut(n).enumerate().for_each(|(i, out)| {
            out.fill(0.0);
            for (p, &a_ip) in a[i * k..(i + 1) * k].iter().enumerate() {
                for (o, &b_pj) in out.iter_mut().zip(&b[p * n..(p + 1) * n]) {
                    *o += a_ip * b_pj;
                }
            }
        });
    }

    /// Adds the `1 × cols` row `bias` to every row.
    ///
    /// # Panics
    /// Panics unless `bias` is `1 × self.cols`.
    #[must_use]
    #[track_caller]
    pub fn add_bias(&self, bias: &Self) -> Self {
        let mut out = self.clone();
        out.add_bias_assign(bias);
        out
    }

    /// Row-broadcast bias add written into `dst`.
    #[track_caller]
    pub fn add_bias_into(&self, bias: &Self, dst: &mut Self) {
        dst.copy_from(self);
        dst.add_bias_assign(bias);
    }

    /// In-place row-broadcast bias add.
    #[track_caller]
    pub fn add_bias_assign(&mut self, bias: &Self) {
        check_shape("add_bias", &bias.shape(), &[1, self.cols]);
        if self.cols == 0 {
            return;
        }
        for row in self.data.chunks_exact_mut(self.cols) {
            for (x, &b) in row.iter_mut().zip(&bias.data) {
                *x += b;
            }
        }
    }

    /// Sums over rows, producing a `1 × cols` matrix.
    #[must_use]
    pub fn sum_rows(&self) -> Self {
        let mut out = Self::zeros(1, self.cols);
        self.sum_rows_into(&mut out);
        out
    }

    /// Column sums written into the `1 × cols` matrix `dst`.
    #[track_caller]
    pub fn sum_rows_into(&self, dst: &mut Self) {
        check_shape("sum_rows", &dst.shape(), &[1, self.cols]);
        dst.fill_zero();
        if self.cols == 0 {
            return;
        }
        for row in self.data.chunks_exact(self.cols) {
            for (d, &x) in dst.data.iter_mut().zip(row) {
                *d += x;
            }
        }
    }

    /// Every element multiplied by `scalar`.
    #[must_use]
    pub fn scalar_multiply(&self, scalar: TensorFloat) -> Self {
        self.map(|x| x * scalar)
    }

    /// Scaled copy written into `dst`.
    #[track_caller]
    pub fn scalar_multiply_into(&self, scalar: TensorFloat, dst: &mut Self) {
        self.map_into(|x| x * scalar, dst);
    }

    /// In-place `self += alpha * other`.
    #[track_caller]
    pub fn scaled_add(&mut self, other: &Self, alpha: TensorFloat) {
        check_shape("scaled_add", &self.shape(), &other.shape());
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += alpha * b;
        }
    }

    /// Applies `f` to every element.
    #[must_use]
    pub fn map(&self, f: impl Fn(TensorFloat) -> TensorFloat) -> Self {
        Self {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Mapped copy written into `dst`.
    #[track_caller]
    pub fn map_into(&self, f: impl Fn(TensorFloat) -> TensorFloat, dst: &mut Self) {
        check_shape("map", &self.shape(), &dst.shape());
        for (d, &x) in dst.data.iter_mut().zip(&self.data) {
            *d = f(x);
        }
    }

    /// Applies `f` to every element in place.
    pub fn map_in_place(&mut self, f: impl Fn(TensorFloat) -> TensorFloat) {
        for x in &mut self.data {
            *x = f(*x);
        }
    }

    /// Applies an activation; softmax is taken per row.
    #[must_use]
    pub fn map_activation(&self, activation: Activation) -> Self {
        let mut out = Self::zeros(self.rows, self.cols);
        activation.forward(self, &mut out);
        out
    }

    /// Activation written into `dst`.
    #[track_caller]
    pub fn map_activation_into(&self, activation: Activation, dst: &mut Self) {
        activation.forward(self, dst);
    }

    /// The `cols × rows` transpose.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut out = Self::zeros(self.cols, self.rows);
        self.transpose_into(&mut out);
        out
    }

    /// Transpose written into the `cols × rows` matrix `dst`.
    #[track_caller]
    pub fn transpose_into(&self, dst: &mut Self) {
        check_shape("transpose", &dst.shape(), &[self.cols, self.rows]);
        for r in 0..self.rows {
            for c in 0..self.cols {
                dst.data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
    }

    /// Exact element-wise float equality.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[must_use]
    #[track_caller]
    #[allow(clippy::float_cmp)]
    pub fn element_wise_equal(&self, other: &Self) -> bool {
        check_shape("element_wise_equal", &self.shape(), &other.shape());
        self.data.iter().zip(&other.data).all(|(a, b)| a == b)
    }

    /// Whether every element is within `epsilon` of its counterpart.
    ///
    /// Matrices of different shapes compare unequal.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: TensorFloat) -> bool {
        self.shape() == other.shape() && crate::approx::slices_within(&self.data, &other.data, epsilon)
    }

    /// Sum of all elements.
    #[must_use]
    pub fn sum(&self) -> TensorFloat {
        self.data.iter().sum()
    }

    /// Index of the largest value in row `r`.
    #[must_use]
    #[track_caller]
    pub fn argmax_row(&self, r: usize) -> usize {
        self.row(r)
            .iter()
            .enumerate()
            .fold((0, TensorFloat::NEG_INFINITY), |best, (i, &x)| {
                if x > best.1 { (i, x) } else { best }
            })
            .0
    }

    /// Determinant of a square matrix.
    ///
    /// # Panics
    /// Panics if the matrix is not square.
    #[must_use]
    #[track_caller]
    pub fn determinant(&self) -> TensorFloat {
        linalg::determinant(self)
    }

    /// Inverse of a square matrix.
    ///
    /// # Errors
    /// [`TensorError::SingularMatrix`] if no inverse exists.
    pub fn inverse(&self) -> Result<Self, TensorError> {
        linalg::inverse(self)
    }

    /// Solves `self · x = rhs` for `x`.
    ///
    /// # Errors
    /// [`TensorError::SingularMatrix`] if `self` is singular.
    pub fn solve(&self, rhs: &Self) -> Result<Self, TensorError> {
        linalg::solve(self, rhs)
    }
}

impl fmt::Display for Tensor2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..self.rows {
            let row = &self.data[r * self.cols..(r + 1) * self.cols];
            write!(f, "[")?;
            for (c, x) in row.iter().enumerate() {
                if c > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{x:.4}")?;
            }
            writeln!(f, "]")?;
        }
        Ok(())
    }
}
