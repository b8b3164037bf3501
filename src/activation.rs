//! Activation functions and their derivatives.
//!
//! Scalar activations act element by element and expose their derivative
//! evaluated at the pre-activation `z`. Softmax normalizes each row and is
//! paired with the element-wise `p · (1 − p)` approximation of its
//! derivative (the diagonal of the Jacobian, not the full Jacobian). The
//! network's output gradient bypasses that approximation, see
//! [`crate::loss::cross_entropy_gradient`].

use serde::{Deserialize, Serialize};

use crate::error::check_shape;
use crate::tensors::{Tensor2D, Tensor4D, TensorFloat};

/// Slope of [`Activation::LeakyRelu`] for negative inputs.
pub const LEAKY_RELU_SLOPE: TensorFloat = 0.01;

/// A layer's non-linearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `f(x) = x`.
    #[default]
    Identity,
    /// `f(x) = 1 / (1 + e^-x)`.
    Sigmoid,
    /// `f(x) = max(x, 0)`.
    Relu,
    /// `f(x) = x` for positive `x`, else `0.01 · x`.
    LeakyRelu,
    /// `f(x) = tanh(x)`.
    Tanh,
    /// Row-wise softmax.
    Softmax,
}

#[inline]
fn sigmoid(x: TensorFloat) -> TensorFloat {
    1.0 / (1.0 + (-x).exp())
}

impl Activation {
    /// Whether the activation acts on each element independently.
    #[must_use]
    pub const fn is_elementwise(self) -> bool {
        !matches!(self, Self::Softmax)
    }

    /// `f(x)` for the scalar activations.
    ///
    /// # Panics
    /// Panics for [`Activation::Softmax`], which is only defined per row.
    #[must_use]
    pub fn apply(self, x: TensorFloat) -> TensorFloat {
        match self {
            Self::Identity => x,
            Self::Sigmoid => sigmoid(x),
            Self::Relu => x.max(0.0),
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_RELU_SLOPE * x
                }
            }
            Self::Tanh => x.tanh(),
            Self::Softmax => panic!("softmax is defined per row, not per element"),
        }
    }

    /// `f'(x)` evaluated at the pre-activation `x`.
    ///
    /// # Panics
    /// Panics for [`Activation::Softmax`]; use [`softmax_derivative`].
    #[must_use]
    pub fn derivative(self, x: TensorFloat) -> TensorFloat {
        match self {
            Self::Identity => 1.0,
            Self::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_RELU_SLOPE
                }
            }
            Self::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Self::Softmax => panic!("softmax is defined per row, not per element"),
        }
    }

    /// Writes `f(z)` into `out`; softmax normalizes each row.
    #[track_caller]
    pub fn forward(self, z: &Tensor2D, out: &mut Tensor2D) {
        match self {
            Self::Softmax => softmax_into(z, out),
            scalar => z.map_into(|x| scalar.apply(x), out),
        }
    }

    /// Writes the derivative factor into `out`.
    ///
    /// Scalar kinds use `f'(z)`; softmax uses `p · (1 − p)` on the
    /// already computed `activations`.
    #[track_caller]
    pub fn derivative_into(self, z: &Tensor2D, activations: &Tensor2D, out: &mut Tensor2D) {
        match self {
            Self::Softmax => softmax_derivative_into(activations, out),
            scalar => z.map_into(|x| scalar.derivative(x), out),
        }
    }

    /// Element-wise `f(z)` on a 4-D tensor.
    ///
    /// # Panics
    /// Panics for [`Activation::Softmax`].
    #[track_caller]
    pub fn forward_4d(self, z: &Tensor4D, out: &mut Tensor4D) {
        assert!(self.is_elementwise(), "softmax cannot be applied to a 4-D tensor");
        z.map_into(|x| self.apply(x), out);
    }

    /// Element-wise `f'(z)` on a 4-D tensor.
    ///
    /// # Panics
    /// Panics for [`Activation::Softmax`].
    #[track_caller]
    pub fn derivative_4d_into(self, z: &Tensor4D, out: &mut Tensor4D) {
        assert!(self.is_elementwise(), "softmax cannot be applied to a 4-D tensor");
        z.map_into(|x| self.derivative(x), out);
    }
}

/// Row-wise softmax.
#[must_use]
pub fn softmax(z: &Tensor2D) -> Tensor2D {
    let mut out = Tensor2D::zeros(z.rows(), z.cols());
    softmax_into(z, &mut out);
    out
}

/// Row-wise softmax written into `out`.
///
/// Each row has its maximum subtracted before exponentiation, so the result
/// is unchanged by adding a constant to a row.
#[track_caller]
pub fn softmax_into(z: &Tensor2D, out: &mut Tensor2D) {
    check_shape("softmax", &z.shape(), &out.shape());
    let cols = z.cols();
    if cols == 0 {
        return;
    }
    for (src, dst) in z.data().chunks_exact(cols).zip(out.data_mut().chunks_exact_mut(cols)) {
        let max = src.iter().copied().fold(TensorFloat::NEG_INFINITY, TensorFloat::max);
        let mut total = 0.0;
        for (d, &x) in dst.iter_mut().zip(src) {
            *d = (x - max).exp();
            total += *d;
        }
        for d in dst.iter_mut() {
            *d /= total;
        }
    }
}

/// The `p · (1 − p)` approximation of the softmax derivative.
#[must_use]
pub fn softmax_derivative(p: &Tensor2D) -> Tensor2D {
    p.map(|x| x * (1.0 - x))
}

/// [`softmax_derivative`] written into `out`.
#[track_caller]
pub fn softmax_derivative_into(p: &Tensor2D, out: &mut Tensor2D) {
    p.map_into(|x| x * (1.0 - x), out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::{F32_AVG_ERROR, F32_MAX_ERROR};

    #[test]
    fn scalar_values() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::LeakyRelu.apply(-2.0), -0.02);
        assert_eq!(Activation::LeakyRelu.derivative(-2.0), LEAKY_RELU_SLOPE);
        assert!((Activation::Sigmoid.apply(0.0) - 0.5).abs() < F32_AVG_ERROR);
        assert!((Activation::Sigmoid.derivative(0.0) - 0.25).abs() < F32_AVG_ERROR);
        assert!((Activation::Tanh.derivative(0.0) - 1.0).abs() < F32_AVG_ERROR);
    }

    #[test]
    fn derivatives_match_finite_differences() {
        let h = 1e-3;
        for act in [
            Activation::Identity,
            Activation::Sigmoid,
            Activation::Tanh,
            Activation::Relu,
            Activation::LeakyRelu,
        ] {
            for x in [-1.3, -0.4, 0.7, 2.1] {
                let numeric = (act.apply(x + h) - act.apply(x - h)) / (2.0 * h);
                assert!(
                    (numeric - act.derivative(x)).abs() < 1e-2,
                    "{act:?} at {x}: {numeric} vs {}",
                    act.derivative(x)
                );
            }
        }
    }

    #[test]
    fn softmax_rows_normalize() {
        let z = Tensor2D::from_rows(&[[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        let p = softmax(&z);
        for r in 0..2 {
            assert!((p.row(r).iter().sum::<f32>() - 1.0).abs() < F32_AVG_ERROR);
        }
        assert!((p.get(1, 0) - 1.0 / 3.0).abs() < F32_AVG_ERROR);
        assert!(p.get(0, 2) > p.get(0, 1));
    }

    #[test]
    fn softmax_ignores_row_shift() {
        let z = Tensor2D::from_rows(&[[0.5, -1.0, 2.0]]);
        let shifted = z.map(|x| x + 7.5);
        assert!(softmax(&z).approx_eq(&softmax(&shifted), F32_MAX_ERROR));
    }

    #[test]
    fn softmax_derivative_is_diagonal_approximation() {
        let p = Tensor2D::from_rows(&[[0.25, 0.75]]);
        assert_eq!(softmax_derivative(&p).data(), &[0.1875, 0.1875]);
    }

    #[test]
    #[should_panic(expected = "defined per row")]
    fn softmax_has_no_scalar_form() {
        let _ = Activation::Softmax.apply(1.0);
    }

    #[test]
    fn parses_snake_case_names() {
        #[derive(Deserialize)]
        struct Holder {
            act: Activation,
        }
        let h: Holder = toml::from_str("act = \"leaky_relu\"").unwrap();
        assert_eq!(h.act, Activation::LeakyRelu);
    }
}
