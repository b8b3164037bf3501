//! Cross-entropy loss and the combined softmax/cross-entropy gradient.

use crate::error::check_shape;
use crate::tensors::{Tensor2D, TensorFloat};

/// Lower clamp applied to predictions before taking the logarithm.
pub const LOG_FLOOR: TensorFloat = 1e-7;

/// Mean cross-entropy `-(1/batch) · Σ label · ln(prediction)`.
///
/// Predictions are clamped to [`LOG_FLOOR`] so a zero probability yields a
/// large finite loss instead of infinity.
///
/// # Panics
/// Panics if the shapes differ.
#[must_use]
#[track_caller]
pub fn cross_entropy(predictions: &Tensor2D, labels: &Tensor2D) -> TensorFloat {
    check_shape("cross_entropy", &predictions.shape(), &labels.shape());
    if predictions.rows() == 0 {
        return 0.0;
    }
    let total: TensorFloat = predictions
        .data()
        .iter()
        .zip(labels.data())
        .map(|(&p, &y)| y * p.max(LOG_FLOOR).ln())
        .sum();
    -total / predictions.rows() as TensorFloat
}

/// Gradient of softmax followed by cross-entropy with respect to the logits.
///
/// The product of the softmax Jacobian and the cross-entropy derivative
/// collapses to `prediction − label`. The result is not divided by the
/// batch size.
#[must_use]
#[track_caller]
pub fn cross_entropy_gradient(predictions: &Tensor2D, labels: &Tensor2D) -> Tensor2D {
    predictions.subtract(labels)
}

/// [`cross_entropy_gradient`] written into `dst`.
#[track_caller]
pub fn cross_entropy_gradient_into(predictions: &Tensor2D, labels: &Tensor2D, dst: &mut Tensor2D) {
    predictions.subtract_into(labels, dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_prediction_has_zero_loss() {
        let y = Tensor2D::from_rows(&[[0.0, 1.0], [1.0, 0.0]]);
        assert!(cross_entropy(&y, &y).abs() < 1e-6);
    }

    #[test]
    fn loss_is_averaged_over_batch() {
        let p = Tensor2D::from_rows(&[[0.5, 0.5], [0.5, 0.5]]);
        let y = Tensor2D::from_rows(&[[1.0, 0.0], [0.0, 1.0]]);
        assert!((cross_entropy(&p, &y) - core::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn zero_probability_is_clamped() {
        let p = Tensor2D::from_rows(&[[0.0, 1.0]]);
        let y = Tensor2D::from_rows(&[[1.0, 0.0]]);
        let loss = cross_entropy(&p, &y);
        assert!(loss.is_finite());
        assert!((loss + LOG_FLOOR.ln()).abs() < 1e-3);
    }

    #[test]
    fn gradient_is_prediction_minus_label() {
        let p = Tensor2D::from_rows(&[[0.2, 0.8]]);
        let y = Tensor2D::from_rows(&[[0.0, 1.0]]);
        let g = cross_entropy_gradient(&p, &y);
        assert!(g.approx_eq(&Tensor2D::from_rows(&[[0.2, -0.2]]), 1e-6));
    }

    #[test]
    #[should_panic(expected = "cross_entropy shape mismatch")]
    fn shapes_must_agree() {
        let _ = cross_entropy(&Tensor2D::zeros(1, 2), &Tensor2D::zeros(2, 1));
    }
}
