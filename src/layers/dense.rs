use rand::Rng;

use super::{Layer, Param, ParamMut, uniform_weights};
use crate::activation::Activation;
use crate::error::{TensorError, check_shape, fail};
use crate::tensors::{Tensor2D, TensorFloat};

/// A fully connected layer: `activations = f(input · weightsᵗ + biases)`.
///
/// Weights are stored `(outputs, inputs)`, biases `(1, outputs)`.
#[derive(Debug, Clone)]
pub struct FullyConnectedLayer {
    name: String,
    activation: Activation,
    weights: Tensor2D,
    biases: Tensor2D,
    weights_gradient: Tensor2D,
    biases_gradient: Tensor2D,
    pre_activations: Tensor2D,
    activations: Tensor2D,
    deltas: Tensor2D,
}

impl FullyConnectedLayer {
    /// A layer with weights drawn uniformly from `[-1, 1)` and zero biases.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut impl Rng,
    ) -> Self {
        let weights = Tensor2D::new(outputs, inputs, uniform_weights(rng, outputs * inputs));
        Self::from_parts(name, weights, Tensor2D::zeros(1, outputs), activation)
    }

    /// A layer with explicit `(outputs, inputs)` weights and `(1, outputs)` biases.
    ///
    /// # Panics
    /// Panics if the bias shape does not match the weights.
    #[must_use]
    #[track_caller]
    pub fn from_parts(name: impl Into<String>, weights: Tensor2D, biases: Tensor2D, activation: Activation) -> Self {
        let [outputs, inputs] = weights.shape();
        check_shape("fully_connected", &biases.shape(), &[1, outputs]);
        let name = name.into();
        tracing::debug!(layer = %name, inputs, outputs, ?activation, "built fully connected layer");
        Self {
            name,
            activation,
            weights,
            biases,
            weights_gradient: Tensor2D::zeros(inputs, outputs),
            biases_gradient: Tensor2D::zeros(1, outputs),
            pre_activations: Tensor2D::zeros(0, outputs),
            activations: Tensor2D::zeros(0, outputs),
            deltas: Tensor2D::zeros(0, inputs),
        }
    }

    /// Input width.
    #[must_use]
    pub const fn inputs(&self) -> usize {
        self.weights.cols()
    }

    /// Output width.
    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.weights.rows()
    }

    /// The layer's non-linearity.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// `(outputs, inputs)` weights.
    #[must_use]
    pub const fn weights(&self) -> &Tensor2D {
        &self.weights
    }

    /// `(1, outputs)` biases.
    #[must_use]
    pub const fn biases(&self) -> &Tensor2D {
        &self.biases
    }

    /// `(inputs, outputs)` weight gradient from the last backward pass.
    #[must_use]
    pub const fn weights_gradient(&self) -> &Tensor2D {
        &self.weights_gradient
    }

    /// `(1, outputs)` bias gradient from the last backward pass.
    #[must_use]
    pub const fn biases_gradient(&self) -> &Tensor2D {
        &self.biases_gradient
    }

    /// Cached `z` from the last forward pass.
    #[must_use]
    pub const fn pre_activations(&self) -> &Tensor2D {
        &self.pre_activations
    }

    /// `f(z)` from the last forward pass.
    #[must_use]
    pub const fn activations(&self) -> &Tensor2D {
        &self.activations
    }

    /// Gradient with respect to the input from the last backward pass.
    #[must_use]
    pub const fn deltas(&self) -> &Tensor2D {
        &self.deltas
    }

    fn resize(&mut self, batch: usize) {
        if self.activations.rows() != batch {
            self.pre_activations = Tensor2D::zeros(batch, self.outputs());
            self.activations = Tensor2D::zeros(batch, self.outputs());
            self.deltas = Tensor2D::zeros(batch, self.inputs());
        }
    }

    /// Runs a `(batch, inputs)` input through the layer.
    ///
    /// # Panics
    /// Panics if the input width differs from [`inputs`](Self::inputs).
    #[track_caller]
    pub fn forward(&mut self, input: &Tensor2D) -> &Tensor2D {
        if input.cols() != self.inputs() {
            fail(TensorError::ShapeMismatch {
                op: "fully_connected forward",
                left: input.shape().to_vec(),
                right: self.weights.shape().to_vec(),
            });
        }
        self.resize(input.rows());

        let weights_t = self.weights.transpose();
        input.multiply_into(&weights_t, &mut self.pre_activations);
        self.pre_activations.add_bias_assign(&self.biases);
        self.activation.forward(&self.pre_activations, &mut self.activations);
        &self.activations
    }

    /// Backpropagates `incoming` (gradient with respect to this layer's
    /// activations) and applies a descent step of size `learning_rate`.
    ///
    /// `prev_activations` must be the input of the last forward pass. Returns
    /// the gradient with respect to that input, computed before the update.
    ///
    /// # Panics
    /// Panics if either tensor does not match the last forward pass.
    #[track_caller]
    pub fn backward(
        &mut self,
        prev_activations: &Tensor2D,
        incoming: &Tensor2D,
        learning_rate: TensorFloat,
    ) -> &Tensor2D {
        let batch = self.activations.rows();
        check_shape("fully_connected backward", &incoming.shape(), &self.activations.shape());
        check_shape("fully_connected backward", &prev_activations.shape(), &[batch, self.inputs()]);

        let mut dz = Tensor2D::zeros(batch, self.outputs());
        self.activation
            .derivative_into(&self.pre_activations, &self.activations, &mut dz);
        dz.elementwise_multiply_assign(incoming);

        prev_activations
            .transpose()
            .multiply_into(&dz, &mut self.weights_gradient);
        dz.sum_rows_into(&mut self.biases_gradient);
        dz.multiply_into(&self.weights, &mut self.deltas);

        self.weights
            .scaled_add(&self.weights_gradient.transpose(), -learning_rate);
        self.biases.scaled_add(&self.biases_gradient, -learning_rate);
        &self.deltas
    }
}

impl Layer for FullyConnectedLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> [Param<'_>; 2] {
        [
            Param {
                shape: self.weights.shape().to_vec(),
                data: self.weights.data(),
            },
            Param {
                shape: self.biases.shape().to_vec(),
                data: self.biases.data(),
            },
        ]
    }

    fn params_mut(&mut self) -> [ParamMut<'_>; 2] {
        [
            ParamMut {
                shape: self.weights.shape().to_vec(),
                data: self.weights.data_mut(),
            },
            ParamMut {
                shape: self.biases.shape().to_vec(),
                data: self.biases.data_mut(),
            },
        ]
    }

    fn zero_grad(&mut self) {
        self.weights_gradient.fill_zero();
        self.biases_gradient.fill_zero();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn tiny() -> FullyConnectedLayer {
        FullyConnectedLayer::from_parts(
            "fc",
            Tensor2D::from_rows(&[[1.0, 2.0]]),
            Tensor2D::from_rows(&[[0.5]]),
            Activation::Identity,
        )
    }

    #[test]
    fn forward_applies_weights_and_bias() {
        let mut layer = tiny();
        let out = layer.forward(&Tensor2D::from_rows(&[[1.0, 1.0], [2.0, 0.0]]));
        assert_eq!(out.data(), &[3.5, 2.5]);
    }

    #[test]
    fn backward_updates_after_propagating() {
        let mut layer = tiny();
        let input = Tensor2D::from_rows(&[[1.0, 1.0]]);
        layer.forward(&input);
        let deltas = layer.backward(&input, &Tensor2D::from_rows(&[[1.0]]), 0.1).clone();

        assert_eq!(deltas.data(), &[1.0, 2.0]);
        assert_eq!(layer.weights_gradient().shape(), [2, 1]);
        assert!(layer.weights().approx_eq(&Tensor2D::from_rows(&[[0.9, 1.9]]), 1e-6));
        assert!(layer.biases().approx_eq(&Tensor2D::from_rows(&[[0.4]]), 1e-6));
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut layer = FullyConnectedLayer::new("fc", 3, 2, Activation::Sigmoid, &mut rng);
        let input = Tensor2D::new(2, 3, vec![0.3, -0.7, 0.2, 1.1, 0.4, -0.5]);
        let upstream = Tensor2D::new(2, 2, vec![1.0, -2.0, 0.5, 0.25]);

        // L(W) = Σ f(x·Wᵗ + b) ⊙ upstream
        let loss = |layer: &mut FullyConnectedLayer| {
            layer.forward(&input).elementwise_multiply(&upstream).sum()
        };

        let mut perturbed = layer.clone();
        layer.forward(&input);
        layer.backward(&input, &upstream, 0.0);

        let h = 1e-2;
        for o in 0..2 {
            for i in 0..3 {
                let base = perturbed.weights.get(o, i);
                perturbed.weights.set(o, i, base + h);
                let plus = loss(&mut perturbed);
                perturbed.weights.set(o, i, base - h);
                let minus = loss(&mut perturbed);
                perturbed.weights.set(o, i, base);

                let numeric = (plus - minus) / (2.0 * h);
                let analytic = layer.weights_gradient().get(i, o);
                assert!((numeric - analytic).abs() < 1e-2, "w[{o}][{i}]: {numeric} vs {analytic}");
            }
        }
    }

    #[test]
    #[should_panic(expected = "fully_connected forward shape mismatch")]
    fn forward_rejects_wrong_width() {
        tiny().forward(&Tensor2D::zeros(1, 3));
    }

    #[test]
    fn batch_size_can_change() {
        let mut layer = tiny();
        assert_eq!(layer.forward(&Tensor2D::zeros(4, 2)).shape(), [4, 1]);
        assert_eq!(layer.forward(&Tensor2D::zeros(1, 2)).shape(), [1, 1]);
    }
}
