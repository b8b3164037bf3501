use rand::Rng;

use super::{Layer, Param, ParamMut, uniform_weights};
use crate::activation::Activation;
use crate::error::{TensorError, check_shape, fail};
use crate::tensors::{Tensor2D, Tensor4D, TensorFloat, output_extent};

/// Shape parameters of a convolutional layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    /// Input `(C, H, W)`.
    pub input: [usize; 3],
    /// Number of output channels.
    pub filters: usize,
    /// Side of the square kernel.
    pub kernel: usize,
    /// Step between kernel windows.
    pub stride: usize,
    /// Zero padding on every spatial edge.
    pub padding: usize,
}

impl ConvGeometry {
    /// Output `(filters, H', W')`.
    ///
    /// # Panics
    /// Panics if `stride == 0` or the kernel does not fit the padded input.
    #[must_use]
    #[track_caller]
    pub fn output(&self) -> [usize; 3] {
        let [_, h, w] = self.input;
        [
            self.filters,
            output_extent(h, self.kernel, self.stride, self.padding),
            output_extent(w, self.kernel, self.stride, self.padding),
        ]
    }

    /// `(filters, C, kernel, kernel)`.
    #[must_use]
    pub const fn weight_shape(&self) -> [usize; 4] {
        [self.filters, self.input[0], self.kernel, self.kernel]
    }
}

/// A 2-D convolution over `(N, C, H, W)` batches followed by an element-wise activation.
#[derive(Debug, Clone)]
pub struct ConvolutionalLayer {
    name: String,
    geometry: ConvGeometry,
    activation: Activation,
    weights: Tensor4D,
    biases: Tensor2D,
    weights_gradient: Tensor4D,
    biases_gradient: Tensor2D,
    pre_activations: Tensor4D,
    activations: Tensor4D,
    deltas: Tensor4D,
}

impl ConvolutionalLayer {
    /// A layer with weights drawn uniformly from `[-1, 1)` and zero biases.
    ///
    /// # Panics
    /// Panics for [`Activation::Softmax`] or a geometry whose kernel does not fit.
    #[must_use]
    #[track_caller]
    pub fn new(name: impl Into<String>, geometry: ConvGeometry, activation: Activation, rng: &mut impl Rng) -> Self {
        let shape = geometry.weight_shape();
        let weights = Tensor4D::new(shape, uniform_weights(rng, shape.iter().product()));
        Self::from_parts(name, geometry, weights, Tensor2D::zeros(geometry.filters, 1), activation)
    }

    /// A layer with explicit weights and `(filters, 1)` biases.
    ///
    /// # Panics
    /// Panics if the parameter shapes disagree with `geometry`, for
    /// [`Activation::Softmax`], or if the kernel does not fit.
    #[must_use]
    #[track_caller]
    pub fn from_parts(
        name: impl Into<String>,
        geometry: ConvGeometry,
        weights: Tensor4D,
        biases: Tensor2D,
        activation: Activation,
    ) -> Self {
        assert!(
            activation.is_elementwise(),
            "convolutional layers need an element-wise activation"
        );
        check_shape("convolutional", &weights.shape(), &geometry.weight_shape());
        check_shape("convolutional", &biases.shape(), &[geometry.filters, 1]);
        let [f, oh, ow] = geometry.output();
        let [c, h, w] = geometry.input;

        let name = name.into();
        tracing::debug!(
            layer = %name,
            input = ?geometry.input,
            output = ?[f, oh, ow],
            kernel = geometry.kernel,
            stride = geometry.stride,
            padding = geometry.padding,
            "built convolutional layer"
        );
        Self {
            name,
            geometry,
            activation,
            weights_gradient: Tensor4D::zeros(weights.shape()),
            weights,
            biases,
            biases_gradient: Tensor2D::zeros(f, 1),
            pre_activations: Tensor4D::zeros([0, f, oh, ow]),
            activations: Tensor4D::zeros([0, f, oh, ow]),
            deltas: Tensor4D::zeros([0, c, h, w]),
        }
    }

    /// The layer's shape parameters.
    #[must_use]
    pub const fn geometry(&self) -> &ConvGeometry {
        &self.geometry
    }

    /// Output `(filters, H', W')`.
    #[must_use]
    pub fn output_shape(&self) -> [usize; 3] {
        let [_, f, oh, ow] = self.activations.shape();
        [f, oh, ow]
    }

    /// The layer's non-linearity.
    #[must_use]
    pub const fn activation(&self) -> Activation {
        self.activation
    }

    /// `(filters, C, k, k)` kernels.
    #[must_use]
    pub const fn weights(&self) -> &Tensor4D {
        &self.weights
    }

    /// `(filters, 1)` biases.
    #[must_use]
    pub const fn biases(&self) -> &Tensor2D {
        &self.biases
    }

    /// Kernel gradient from the last backward pass.
    #[must_use]
    pub const fn weights_gradient(&self) -> &Tensor4D {
        &self.weights_gradient
    }

    /// Bias gradient from the last backward pass.
    #[must_use]
    pub const fn biases_gradient(&self) -> &Tensor2D {
        &self.biases_gradient
    }

    /// `f(z)` from the last forward pass.
    #[must_use]
    pub const fn activations(&self) -> &Tensor4D {
        &self.activations
    }

    /// Gradient with respect to the input from the last backward pass.
    #[must_use]
    pub const fn deltas(&self) -> &Tensor4D {
        &self.deltas
    }

    fn resize(&mut self, batch: usize) {
        if self.activations.batch() != batch {
            let [f, oh, ow] = self.output_shape();
            let [c, h, w] = self.geometry.input;
            self.pre_activations = Tensor4D::zeros([batch, f, oh, ow]);
            self.activations = Tensor4D::zeros([batch, f, oh, ow]);
            self.deltas = Tensor4D::zeros([batch, c, h, w]);
        }
    }

    /// Runs an `(N, C, H, W)` batch through the layer.
    ///
    /// # Panics
    /// Panics if the input's `(C, H, W)` differs from the configured input.
    #[track_caller]
    pub fn forward(&mut self, input: &Tensor4D) -> &Tensor4D {
        let [n, c, h, w] = input.shape();
        if [c, h, w] != self.geometry.input {
            fail(TensorError::ShapeMismatch {
                op: "convolutional forward",
                left: input.shape().to_vec(),
                right: self.geometry.input.to_vec(),
            });
        }
        self.resize(n);

        let ConvGeometry { stride, padding, .. } = self.geometry;
        Tensor4D::convolve_into(&self.weights, input, stride, padding, &mut self.pre_activations);
        self.pre_activations.add_bias_assign(&self.biases);
        self.activation
            .forward_4d(&self.pre_activations, &mut self.activations);
        &self.activations
    }

    /// Backpropagates `incoming` and applies a descent step of size `learning_rate`.
    ///
    /// `prev_activations` must be the input of the last forward pass. Returns
    /// the gradient with respect to that input, computed before the update.
    ///
    /// # Panics
    /// Panics if either tensor does not match the last forward pass.
    #[track_caller]
    pub fn backward(
        &mut self,
        prev_activations: &Tensor4D,
        incoming: &Tensor4D,
        learning_rate: TensorFloat,
    ) -> &Tensor4D {
        check_shape("convolutional backward", &incoming.shape(), &self.activations.shape());
        check_shape("convolutional backward", &prev_activations.shape(), &self.deltas.shape());

        let mut dz = Tensor4D::zeros(self.activations.shape());
        self.activation
            .derivative_4d_into(&self.pre_activations, &mut dz);
        dz.elementwise_multiply_assign(incoming);

        let ConvGeometry { stride, padding, .. } = self.geometry;
        Tensor4D::grad_weight_convolve_into(prev_activations, &dz, stride, padding, &mut self.weights_gradient);
        dz.sum_channels_into(&mut self.biases_gradient);
        Tensor4D::grad_input_convolve_into(&self.weights, &dz, stride, padding, &mut self.deltas);

        self.weights.scaled_add(&self.weights_gradient, -learning_rate);
        self.biases.scaled_add(&self.biases_gradient, -learning_rate);
        &self.deltas
    }
}

impl Layer for ConvolutionalLayer {
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

    const GEOMETRY: ConvGeometry = ConvGeometry {
        input: [2, 5, 4],
        filters: 3,
        kernel: 3,
        stride: 2,
        padding: 1,
    };

    fn fixture() -> (ConvolutionalLayer, Tensor4D, Tensor4D) {
        let mut rng = StdRng::seed_from_u64(11);
        let layer = ConvolutionalLayer::new("conv", GEOMETRY, Activation::Tanh, &mut rng);
        let input = Tensor4D::new([2, 2, 5, 4], (0..80).map(|i| ((i * 37 % 19) as f32 - 9.0) / 10.0).collect());
        let [f, oh, ow] = GEOMETRY.output();
        let len = 2 * f * oh * ow;
        let upstream = Tensor4D::new([2, f, oh, ow], (0..len).map(|i| ((i * 13 % 7) as f32 - 3.0) / 4.0).collect());
        (layer, input, upstream)
    }

    fn weighted_sum(layer: &mut ConvolutionalLayer, input: &Tensor4D, upstream: &Tensor4D) -> f32 {
        layer.forward(input).elementwise_multiply(upstream).data().iter().sum()
    }

    #[test]
    fn output_geometry_uses_floor() {
        assert_eq!(GEOMETRY.output(), [3, 3, 2]);
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let (mut layer, input, upstream) = fixture();
        let mut perturbed = layer.clone();
        layer.forward(&input);
        layer.backward(&input, &upstream, 0.0);

        let h = 1e-2;
        for i in (0..perturbed.weights.data().len()).step_by(5) {
            let base = perturbed.weights.data()[i];
            perturbed.weights.data_mut()[i] = base + h;
            let plus = weighted_sum(&mut perturbed, &input, &upstream);
            perturbed.weights.data_mut()[i] = base - h;
            let minus = weighted_sum(&mut perturbed, &input, &upstream);
            perturbed.weights.data_mut()[i] = base;

            let numeric = (plus - minus) / (2.0 * h);
            let analytic = layer.weights_gradient().data()[i];
            assert!((numeric - analytic).abs() < 2e-2, "w[{i}]: {numeric} vs {analytic}");
        }
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let (mut layer, input, upstream) = fixture();
        let mut perturbed = layer.clone();
        layer.forward(&input);
        let deltas = layer.backward(&input, &upstream, 0.0).clone();

        let h = 1e-2;
        let mut shifted = input.clone();
        for i in (0..input.data().len()).step_by(3) {
            let base = input.data()[i];
            shifted.data_mut()[i] = base + h;
            let plus = weighted_sum(&mut perturbed, &shifted, &upstream);
            shifted.data_mut()[i] = base - h;
            let minus = weighted_sum(&mut perturbed, &shifted, &upstream);
            shifted.data_mut()[i] = base;

            let numeric = (plus - minus) / (2.0 * h);
            assert!((numeric - deltas.data()[i]).abs() < 2e-2, "x[{i}]: {numeric} vs {}", deltas.data()[i]);
        }
    }

    #[test]
    fn bias_gradient_sums_each_channel() {
        let (mut layer, input, _) = fixture();
        let [f, oh, ow] = GEOMETRY.output();
        let ones = Tensor4D::new([2, f, oh, ow], vec![1.0; 2 * f * oh * ow]);
        let mut linear = ConvolutionalLayer::from_parts(
            "linear",
            GEOMETRY,
            layer.weights().clone(),
            Tensor2D::zeros(f, 1),
            Activation::Identity,
        );
        linear.forward(&input);
        linear.backward(&input, &ones, 0.5);
        assert_eq!(linear.biases_gradient().data(), &[12.0, 12.0, 12.0]);
        assert_eq!(linear.biases().data(), &[-6.0, -6.0, -6.0]);
        layer.zero_grad();
        assert!(layer.weights_gradient().data().iter().all(|&g| g == 0.0));
    }

    #[test]
    #[should_panic(expected = "element-wise activation")]
    fn softmax_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let _ = ConvolutionalLayer::new("conv", GEOMETRY, Activation::Softmax, &mut rng);
    }

    #[test]
    #[should_panic(expected = "convolutional forward shape mismatch")]
    fn forward_checks_input_shape() {
        let (mut layer, _, _) = fixture();
        layer.forward(&Tensor4D::zeros([1, 2, 4, 4]));
    }
}
