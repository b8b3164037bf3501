//! Core tensor data structures and operations.
//!
//! Two fixed-rank, owned, row-major containers cover everything the network
//! needs:
//!
//! - [`Tensor2D`]: a `rows × cols` matrix used for dense activations,
//!   fully connected weights and biases.
//! - [`Tensor4D`]: an `(N, C, H, W)` tensor used for image batches and
//!   convolution kernels.
//!
//! ## Design Highlights
//! - Every operation checks shapes before touching memory and panics with a
//!   [`TensorError`](crate::error::TensorError) message on mismatch.
//! - Each operation comes in an allocating form and an `_into` form that
//!   writes into a caller-owned destination of the right shape.
//! - No broadcasting beyond the explicit bias helpers, no implicit resizing.
//!
//! ## Example
//!
//! ```rust
//! use sudonet::tensors::Tensor2D;
//!
//! let a = Tensor2D::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
//! let b = Tensor2D::new(2, 2, vec![4.0, 3.0, 2.0, 1.0]);
//! assert_eq!(a.multiply(&b).data(), &[8.0, 5.0, 20.0, 13.0]);
//! ```

pub mod linalg;
mod tensor2d;
mod tensor4d;

pub use tensor2d::Tensor2D;
pub use tensor4d::{Tensor4D, output_extent};

use crate::error::TensorError;

/// Element type of every tensor in the crate.
pub type TensorFloat = f32;

/// Allocates a zero-filled buffer of `len` elements, reporting failure instead of aborting.
pub(crate) fn try_zeroed(len: usize) -> Result<Vec<TensorFloat>, TensorError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| TensorError::AllocationFailure { requested: len })?;
    data.resize(len, 0.0);
    Ok(data)
}

/// Multiplies dimensions, reporting overflow as an allocation failure.
pub(crate) fn checked_volume(dims: &[usize]) -> Result<usize, TensorError> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or(TensorError::AllocationFailure { requested: usize::MAX })
}
