//! Error kinds reported by tensor operations.
//!
//! Shape and bounds violations are programmer errors: the tensor methods
//! panic with the [`TensorError`] rendered as the panic message. The
//! fallible entry points (`try_*`, [`crate::tensors::linalg`]) hand the
//! same value back as an `Err` instead.

use core::fmt;

/// A failed tensor operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
    /// Operand shapes are incompatible for the named operation.
    ShapeMismatch {
        /// Operation that rejected its operands.
        op: &'static str,
        /// Shape of the left (or only) operand.
        left: Vec<usize>,
        /// Shape of the right operand or of the destination.
        right: Vec<usize>,
    },

    /// An element index lies outside the tensor.
    OutOfBounds {
        /// Operation that rejected the index.
        op: &'static str,
        /// The offending index.
        index: Vec<usize>,
        /// Shape of the indexed tensor.
        shape: Vec<usize>,
    },

    /// Backing storage for the requested element count could not be reserved.
    AllocationFailure {
        /// Number of elements requested.
        requested: usize,
    },

    /// The matrix has no inverse (a pivot vanished during elimination).
    SingularMatrix {
        /// Operation that hit the singular pivot.
        op: &'static str,
    },
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { op, left, right } => {
                write!(f, "{op} shape mismatch: {left:?} vs {right:?}")
            }
            Self::OutOfBounds { op, index, shape } => {
                write!(f, "{op} index {index:?} out of bounds for shape {shape:?}")
            }
            Self::AllocationFailure { requested } => {
                write!(f, "failed to allocate storage for {requested} elements")
            }
            Self::SingularMatrix { op } => write!(f, "{op}: matrix is singular"),
        }
    }
}

impl std::error::Error for TensorError {}

/// Panics with `err` as the message.
#[cold]
#[track_caller]
pub(crate) fn fail(err: TensorError) -> ! {
    panic!("{err}")
}

/// Panics with a shape mismatch unless `left == right`.
#[inline]
#[track_caller]
pub(crate) fn check_shape(op: &'static str, left: &[usize], right: &[usize]) {
    if left != right {
        fail(TensorError::ShapeMismatch {
            op,
            left: left.to_vec(),
            right: right.to_vec(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_operation_and_shapes() {
        let err = TensorError::ShapeMismatch {
            op: "add",
            left: vec![2, 3],
            right: vec![3, 2],
        };
        assert_eq!(err.to_string(), "add shape mismatch: [2, 3] vs [3, 2]");

        let err = TensorError::OutOfBounds {
            op: "get",
            index: vec![4, 0],
            shape: vec![2, 2],
        };
        assert_eq!(err.to_string(), "get index [4, 0] out of bounds for shape [2, 2]");
    }

    #[test]
    #[should_panic(expected = "multiply shape mismatch")]
    fn check_shape_panics_with_op_name() {
        check_shape("multiply", &[1, 2], &[3, 4]);
    }
}
