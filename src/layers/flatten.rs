use crate::error::{TensorError, check_shape, fail};
use crate::tensors::{Tensor2D, Tensor4D};

/// Bridges convolutional and fully connected layers: `(N, C, H, W)` forward
/// becomes `(N, C*H*W)`, and gradients travel back the other way.
#[derive(Debug, Clone)]
pub struct FlattenLayer {
    input: [usize; 3],
    activations: Tensor2D,
    deltas: Tensor4D,
}

impl FlattenLayer {
    /// A layer over inputs of shape `(C, H, W)`.
    #[must_use]
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            input: [channels, height, width],
            activations: Tensor2D::zeros(0, channels * height * width),
            deltas: Tensor4D::zeros([0, channels, height, width]),
        }
    }

    /// Configured input `(C, H, W)`.
    #[must_use]
    pub const fn input_shape(&self) -> [usize; 3] {
        self.input
    }

    /// Width of the flattened output.
    #[must_use]
    pub const fn output_width(&self) -> usize {
        self.input[0] * self.input[1] * self.input[2]
    }

    /// Flattened copy of the last forward input.
    #[must_use]
    pub const fn activations(&self) -> &Tensor2D {
        &self.activations
    }

    /// Unflattened copy of the last backward gradient.
    #[must_use]
    pub const fn deltas(&self) -> &Tensor4D {
        &self.deltas
    }

    /// Copies `input` into the flat `(N, C*H*W)` buffer.
    #[track_caller]
    pub fn forward(&mut self, input: &Tensor4D) -> &Tensor2D {
        let [n, c, h, w] = input.shape();
        if [c, h, w] != self.input {
            fail(TensorError::ShapeMismatch {
                op: "flatten forward",
                left: input.shape().to_vec(),
                right: self.input.to_vec(),
            });
        }
        if self.activations.rows() != n {
            self.activations = Tensor2D::zeros(n, self.output_width());
            self.deltas = Tensor4D::zeros([n, c, h, w]);
        }
        input.flatten_into(&mut self.activations);
        &self.activations
    }

    /// Copies `incoming` back into `(N, C, H, W)` form.
    #[track_caller]
    pub fn backward(&mut self, incoming: &Tensor2D) -> &Tensor4D {
        check_shape("flatten backward", &incoming.shape(), &self.activations.shape());
        Tensor4D::unflatten_into(incoming, &mut self.deltas);
        &self.deltas
    }
}
