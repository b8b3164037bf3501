//! sudonet: a small CPU tensor engine with hand-written backpropagation.
//!
//! Built for digit-sized vision problems: dense and 4-D tensor arithmetic,
//! convolution with its gradients, fully connected and convolutional layers,
//! and a training loop that updates each layer in place as the gradient
//! flows back through it.
//!
//! # Features
//!
//! - Row-major [`Tensor2D`](tensors::Tensor2D) and `(N, C, H, W)`
//!   [`Tensor4D`](tensors::Tensor4D) with allocating and `_into` forms of
//!   every operation.
//! - Strided, padded convolution plus its input and weight gradients.
//! - Layers that own their buffers and apply gradient descent during the
//!   backward pass.
//! - Checksummed per-layer weight files.
//! - TOML network descriptions.
//!
//! # Modules
//!
//! - [`tensors`]: core tensor types and small linear algebra.
//! - [`activation`]: activation functions and derivatives.
//! - [`layers`]: dense, convolutional, flatten and activation layers.
//! - [`loss`]: cross-entropy and its combined gradient.
//! - [`network`]: layer composition, training and inference.
//! - [`modelio`]: saving/loading of layer weights with integrity checks.
//! - [`config`]: TOML configuration.
//!
//! # Example
//!
//! ```rust
//! use sudonet::activation::Activation;
//! use sudonet::network::Network;
//! use sudonet::tensors::Tensor2D;
//!
//! let inputs = Tensor2D::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
//! let labels = Tensor2D::from_rows(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]);
//!
//! let mut net = Network::fully_connected(&[2, 8, 2], Activation::LeakyRelu, Activation::Softmax, 1);
//! let loss = net.train_batch(&inputs, &labels, 0.01);
//! assert!(loss.is_finite());
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![warn(missing_docs)]
#![deny(unsafe_code)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::many_single_char_names,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod activation;
pub mod approx;
pub mod config;
pub mod error;
pub mod layers;
pub mod loss;
pub mod modelio;
pub mod network;
pub mod tensors;

pub use error::TensorError;
pub use network::Network;
