use crate::activation::Activation;
use crate::error::check_shape;
use crate::tensors::Tensor2D;

/// A parameter-free layer applying an [`Activation`] to a `(batch, width)` input.
///
/// Typically the network's softmax output.
#[derive(Debug, Clone)]
pub struct ActivationLayer {
    activation: Activation,
    width: usize,
    inputs: Tensor2D,
    activations: Tensor2D,
    deltas: Tensor2D,
}

impl ActivationLayer {
    /// A layer over inputs of the given width.
    #[must_use]
    pub fn new(activation: Activation, width: usize) -> Self {
        tracing::debug!(?activation, width, "built activation layer");
        Self {
            activation,
            width,
            inputs: Tensor2D::zeros(0, width),
            activations: Tensor2D::zeros(0, width),
            deltas: Tensor2D::zeros(0, width),
        }
    }

    /// The applied activation.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// Input and output width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Output of the last forward pass.
    #[must_use]
    pub const fn activations(&self) -> &Tensor2D {
        &self.activations
    }

    /// Gradient from the last backward pass.
    #[must_use]
    pub const fn deltas(&self) -> &Tensor2D {
        &self.deltas
    }

    /// Applies the activation, keeping a copy of the input for the backward pass.
    #[track_caller]
    pub fn forward(&mut self, input: &Tensor2D) -> &Tensor2D {
        check_shape("activation forward", &[input.cols()], &[self.width]);
        if self.activations.rows() != input.rows() {
            self.inputs = Tensor2D::zeros(input.rows(), self.width);
            self.activations = Tensor2D::zeros(input.rows(), self.width);
            self.deltas = Tensor2D::zeros(input.rows(), self.width);
        }
        self.inputs.copy_from(input);
        self.activation.forward(input, &mut self.activations);
        &self.activations
    }

    /// Multiplies `incoming` by the activation's derivative.
    ///
    /// For softmax this is the element-wise `p · (1 − p)` approximation.
    #[track_caller]
    pub fn backward(&mut self, incoming: &Tensor2D) -> &Tensor2D {
        check_shape("activation backward", &incoming.shape(), &self.activations.shape());
        self.activation
            .derivative_into(&self.inputs, &self.activations, &mut self.deltas);
        self.deltas.elementwise_multiply_assign(incoming);
        &self.deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_forward_and_approximate_backward() {
        let mut layer = ActivationLayer::new(Activation::Softmax, 2);
        let p = layer.forward(&Tensor2D::from_rows(&[[0.0, 0.0]])).clone();
        assert_eq!(p.data(), &[0.5, 0.5]);

        let grad = layer.backward(&Tensor2D::from_rows(&[[1.0, -2.0]]));
        assert_eq!(grad.data(), &[0.25, -0.5]);
    }

    #[test]
    fn relu_backward_masks_by_input_sign() {
        let mut layer = ActivationLayer::new(Activation::Relu, 3);
        layer.forward(&Tensor2D::from_rows(&[[-1.0, 2.0, 0.5]]));
        let grad = layer.backward(&Tensor2D::from_rows(&[[3.0, 3.0, 3.0]]));
        assert_eq!(grad.data(), &[0.0, 3.0, 3.0]);
    }

    #[test]
    #[should_panic(expected = "activation backward shape mismatch")]
    fn backward_requires_matching_batch() {
        let mut layer = ActivationLayer::new(Activation::Sigmoid, 2);
        layer.forward(&Tensor2D::zeros(3, 2));
        layer.backward(&Tensor2D::zeros(2, 2));
    }
}
