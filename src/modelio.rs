//! Robust saving/loading of layer weights.
//!
//! # `.swt` Weight File Format
//!
//! Every parameterized layer is stored in its own file named
//! `<basename>.<layer-name>.swt`, holding the layer's weights and biases:
//!
//! ```text
//! ┌──────────────┬─────────────────────────┬────────────────────┐
//! │ Header       │ Tensor 0 (weights), 1 … │ Checksum           │
//! ├──────────────┼─────────────────────────┼────────────────────┤
//! │ `SNWT`       │ u32: rank               │ u32: CRC-32 of all │
//! │ u8: version  │ [u32; rank] shape       │ preceding bytes    │
//! │ u8: count    │ [f32; prod(shape)] data │                    │
//! └──────────────┴─────────────────────────┴────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. Loading checks the magic,
//! version and checksum, that the tensor count and every shape match the
//! receiving layer, and that no bytes trail the checksum. Any failure is a
//! [`WeightIoError`]; the layer is left untouched.
//!
//! # Example
//!
//! ```rust
//! use rand::{SeedableRng, rngs::StdRng};
//! use sudonet::activation::Activation;
//! use sudonet::layers::FullyConnectedLayer;
//! use sudonet::modelio::{load_layer, save_layer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = std::env::temp_dir().join("sudonet-doc-modelio");
//! std::fs::create_dir_all(&dir)?;
//! let base = dir.join("model");
//!
//! let mut rng = StdRng::seed_from_u64(1);
//! let trained = FullyConnectedLayer::new("fc0", 4, 2, Activation::Relu, &mut rng);
//! save_layer(&trained, &base)?;
//!
//! let mut fresh = FullyConnectedLayer::new("fc0", 4, 2, Activation::Relu, &mut rng);
//! load_layer(&mut fresh, &base)?;
//! assert_eq!(fresh.weights(), trained.weights());
//! # Ok(())
//! # }
//! ```

use core::fmt;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use briny::prelude::*;
use crc32fast::Hasher;

use crate::layers::{Layer, Param};
use crate::tensors::TensorFloat;

/// File signature.
pub const SWT_MAGIC: [u8; 4] = *b"SNWT";

/// Current format version.
pub const SWT_VERSION: u8 = 1;

/// File extension appended to `<basename>.<layer-name>`.
pub const SWT_EXTENSION: &str = "swt";

const HEADER_LEN: usize = SWT_MAGIC.len() + 2;
const CHECKSUM_LEN: usize = size_of::<u32>();

/// A failed weight save or load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightIoError {
    /// The type of error.
    pub kind: WeightIoErrorKind,
    /// The attached message.
    pub msg: &'static str,
}

/// The type of error in weight persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightIoErrorKind {
    /// The file could not be created, opened, read or written.
    InvalidPath,

    /// Missing magic, unknown version or a truncated header.
    InvalidHeader,

    /// Malformed body: truncated tensors, bad counts, trailing bytes.
    InvalidData,

    /// The stored checksum does not match the contents.
    IntegrityUnverified,

    /// The stored tensors do not fit the receiving layer.
    ShapeMismatch,
}

impl WeightIoError {
    const fn new(kind: WeightIoErrorKind, msg: &'static str) -> Self {
        Self { kind, msg }
    }
}

impl fmt::Display for WeightIoErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidPath => "invalid path",
            Self::InvalidHeader => "invalid header",
            Self::InvalidData => "invalid data",
            Self::IntegrityUnverified => "integrity unverified",
            Self::ShapeMismatch => "shape mismatch",
        })
    }
}

impl fmt::Display for WeightIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for WeightIoError {}

/// A decoded tensor record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTensor {
    /// Logical shape, outermost axis first.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<TensorFloat>,
}

impl Validate for StoredTensor {
    fn validate(&self) -> Result<(), ValidationError> {
        let expected = self
            .shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(ValidationError)?;
        if self.data.len() != expected {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// `<basename>.<layer>.swt`.
#[must_use]
pub fn weight_path(basename: &Path, layer: &str) -> PathBuf {
    let mut name = OsString::from(basename.as_os_str());
    name.push(".");
    name.push(layer);
    name.push(".");
    name.push(SWT_EXTENSION);
    PathBuf::from(name)
}

fn to_u32(value: usize) -> Result<u32, WeightIoError> {
    u32::try_from(value).map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidData, "dimension exceeds u32"))
}

/// Serializes tensors into the `.swt` byte layout.
///
/// # Errors
/// [`WeightIoErrorKind::InvalidData`] for more than 255 tensors, a rank or
/// dimension beyond `u32`, or a shape that disagrees with its data.
pub fn encode(params: &[Param<'_>]) -> Result<Vec<u8>, WeightIoError> {
    let count = u8::try_from(params.len())
        .map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidData, "more than 255 tensors"))?;

    let body: usize = params
        .iter()
        .map(|p| 4 + 4 * p.shape.len() + size_of::<TensorFloat>() * p.data.len())
        .sum();
    let mut buf = Vec::with_capacity(HEADER_LEN + body + CHECKSUM_LEN);
    buf.extend_from_slice(&SWT_MAGIC);
    buf.push(SWT_VERSION);
    buf.push(count);

    for p in params {
        if p.shape.iter().product::<usize>() != p.data.len() {
            return Err(WeightIoError::new(WeightIoErrorKind::InvalidData, "tensor shape/data mismatch"));
        }
        buf.extend_from_slice(&to_u32(p.shape.len())?.to_le_bytes());
        for &dim in &p.shape {
            buf.extend_from_slice(&to_u32(dim)?.to_le_bytes());
        }
        for &val in p.data {
            buf.extend_from_slice(&val.to_le_bytes());
        }
    }

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    Ok(buf)
}

/// Cursor over the checksummed body.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], WeightIoError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or(WeightIoError::new(WeightIoErrorKind::InvalidData, "unexpected end of data"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, WeightIoError> {
        let mut raw = [0; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Parses and verifies an `.swt` byte buffer.
///
/// # Errors
/// Returns a [`WeightIoError`] describing the first problem found.
pub fn decode(bytes: &[u8]) -> Result<Vec<StoredTensor>, WeightIoError> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(WeightIoError::new(WeightIoErrorKind::InvalidHeader, "file too short"));
    }
    if bytes[..4] != SWT_MAGIC {
        return Err(WeightIoError::new(WeightIoErrorKind::InvalidHeader, "invalid magic header"));
    }
    if bytes[4] != SWT_VERSION {
        return Err(WeightIoError::new(WeightIoErrorKind::InvalidHeader, "unsupported format version"));
    }

    let (content, stored) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let mut hasher = Hasher::new();
    hasher.update(content);
    let mut raw = [0; 4];
    raw.copy_from_slice(stored);
    if hasher.finalize() != u32::from_le_bytes(raw) {
        return Err(WeightIoError::new(WeightIoErrorKind::IntegrityUnverified, "checksum mismatch"));
    }

    let count = usize::from(content[5]);
    let mut reader = Reader {
        buf: &content[HEADER_LEN..],
        pos: 0,
    };
    let mut tensors = Vec::with_capacity(count);

    for _ in 0..count {
        let rank = reader.u32()? as usize;
        if rank > reader.remaining() / 4 {
            return Err(WeightIoError::new(WeightIoErrorKind::InvalidData, "rank exceeds remaining data"));
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(reader.u32()? as usize);
        }

        let volume = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .filter(|&v| v <= reader.remaining() / size_of::<TensorFloat>())
            .ok_or(WeightIoError::new(WeightIoErrorKind::InvalidData, "tensor larger than remaining data"))?;
        let data = reader
            .take(volume * size_of::<TensorFloat>())?
            .chunks_exact(size_of::<TensorFloat>())
            .map(|c| TensorFloat::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let trusted = TrustedData::new(StoredTensor { shape, data })
            .map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidData, "tensor shape/data mismatch"))?;
        tensors.push(trusted.into_inner());
    }

    if reader.remaining() != 0 {
        return Err(WeightIoError::new(WeightIoErrorKind::InvalidData, "trailing bytes after tensors"));
    }
    Ok(tensors)
}

/// Writes `layer`'s weights and biases to `<basename>.<name>.swt`.
///
/// # Errors
/// [`WeightIoErrorKind::InvalidPath`] if the file cannot be written.
pub fn save_layer<L: Layer + ?Sized>(layer: &L, basename: impl AsRef<Path>) -> Result<(), WeightIoError> {
    let path = weight_path(basename.as_ref(), layer.name());
    let buf = encode(&layer.params())?;

    let mut file = BufWriter::new(
        File::create(&path)
            .map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidPath, "could not create weight file"))?,
    );
    file.write_all(&buf)
        .and_then(|()| file.flush())
        .map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidPath, "could not write weight file"))?;

    tracing::info!(layer = layer.name(), path = %path.display(), bytes = buf.len(), "saved layer weights");
    Ok(())
}

/// Reads and verifies `layer`'s weight file without modifying the layer.
///
/// # Errors
/// Any [`WeightIoError`]; [`WeightIoErrorKind::ShapeMismatch`] if the stored
/// tensors do not fit `layer`.
pub fn read_layer<L: Layer + ?Sized>(layer: &L, basename: impl AsRef<Path>) -> Result<Vec<StoredTensor>, WeightIoError> {
    let path = weight_path(basename.as_ref(), layer.name());
    let bytes = std::fs::read(&path)
        .map_err(|_| WeightIoError::new(WeightIoErrorKind::InvalidPath, "no such file exists"))?;
    let tensors = decode(&bytes)?;

    let expected = layer.params();
    if tensors.len() != expected.len() {
        return Err(WeightIoError::new(WeightIoErrorKind::ShapeMismatch, "wrong tensor count for layer"));
    }
    if tensors.iter().zip(&expected).any(|(t, p)| t.shape != p.shape) {
        return Err(WeightIoError::new(WeightIoErrorKind::ShapeMismatch, "stored shape differs from layer"));
    }
    Ok(tensors)
}

/// Copies verified tensors into `layer`.
pub(crate) fn apply<L: Layer + ?Sized>(layer: &mut L, tensors: &[StoredTensor]) {
    for (param, tensor) in layer.params_mut().into_iter().zip(tensors) {
        param.data.copy_from_slice(&tensor.data);
    }
    // gradients of the previous weights no longer describe this layer
    layer.zero_grad();
}

/// Loads `<basename>.<name>.swt` into `layer` and clears its gradients.
///
/// # Errors
/// Any [`WeightIoError`]; the layer is unchanged on failure.
pub fn load_layer<L: Layer + ?Sized>(layer: &mut L, basename: impl AsRef<Path>) -> Result<(), WeightIoError> {
    let tensors = read_layer(&*layer, basename.as_ref())?;
    apply(layer, &tensors);
    tracing::info!(layer = layer.name(), "loaded layer weights");
    Ok(())
}
