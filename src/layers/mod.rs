//! Network layers.
//!
//! Every layer owns its buffers: the last forward output (`activations`),
//! the last input gradient (`deltas`) and, for parameterized layers, the
//! weights, biases and their gradients. Buffers are resized when the batch
//! size changes and overwritten on every call.
//!
//! Backward passes are fused with the parameter update: the propagated
//! gradient is computed from the pre-update weights, then the layer applies
//! plain gradient descent to itself.

mod activation;
mod conv;
mod dense;
mod flatten;

pub use activation::ActivationLayer;
pub use conv::{ConvGeometry, ConvolutionalLayer};
pub use dense::FullyConnectedLayer;
pub use flatten::FlattenLayer;

use rand::Rng;

use crate::tensors::TensorFloat;

/// A read-only view of one parameter tensor.
#[derive(Debug, Clone)]
pub struct Param<'a> {
    /// Logical shape, outermost axis first.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: &'a [TensorFloat],
}

/// A mutable view of one parameter tensor.
#[derive(Debug)]
pub struct ParamMut<'a> {
    /// Logical shape, outermost axis first.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: &'a mut [TensorFloat],
}

/// A layer with named, persistable weights and biases.
pub trait Layer {
    /// Name used to derive the layer's weight file.
    fn name(&self) -> &str;

    /// `[weights, biases]`.
    fn params(&self) -> [Param<'_>; 2];

    /// `[weights, biases]`, mutably.
    fn params_mut(&mut self) -> [ParamMut<'_>; 2];

    /// Clears the gradient buffers; called whenever new weights are loaded.
    fn zero_grad(&mut self);
}

/// Draws `len` weights uniformly from `[-1, 1)`.
pub(crate) fn uniform_weights(rng: &mut impl Rng, len: usize) -> Vec<TensorFloat> {
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}
