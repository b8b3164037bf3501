//! Network architecture and training configuration via TOML files.
//!
//! ```toml
//! seed = 7
//! batch_size = 4
//! learning_rate = 0.001
//! epochs = 10
//! output = "softmax"
//!
//! [input]
//! kind = "image"
//! channels = 1
//! height = 9
//! width = 9
//!
//! [[layers]]
//! kind = "conv"
//! filters = 4
//! kernel = 3
//! stride = 1
//! padding = 1
//! activation = "relu"
//!
//! [[layers]]
//! kind = "flatten"
//!
//! [[layers]]
//! kind = "dense"
//! outputs = 10
//! activation = "leaky_relu"
//! ```
//!
//! Parsing only checks scalar fields; layer ordering and shape chaining are
//! checked when the network is built, see
//! [`Network::from_config`](crate::network::Network::from_config).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::activation::Activation;

/// Shape of one input sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputShape {
    /// A feature vector; the network takes `(batch, features)` matrices.
    Flat {
        /// Feature count.
        features: usize,
    },
    /// An image; the network takes `(batch, channels, height, width)` tensors.
    Image {
        /// Colour channels.
        channels: usize,
        /// Rows of pixels.
        height: usize,
        /// Columns of pixels.
        width: usize,
    },
}

/// One entry of the layer stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerConfig {
    /// A convolutional layer with square kernels.
    Conv {
        /// Weight file name; defaults to `conv<index>`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Output channels.
        filters: usize,
        /// Kernel side.
        kernel: usize,
        /// Window step.
        #[serde(default = "default_stride")]
        stride: usize,
        /// Zero padding per edge.
        #[serde(default)]
        padding: usize,
        /// Element-wise activation.
        #[serde(default)]
        activation: Activation,
    },
    /// Converts `(N, C, H, W)` to `(N, C*H*W)`.
    Flatten,
    /// A fully connected layer.
    Dense {
        /// Weight file name; defaults to `fc<index>`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Output width.
        outputs: usize,
        /// Activation.
        #[serde(default)]
        activation: Activation,
    },
}

const fn default_stride() -> usize {
    1
}

// the 2-32-32-2 XOR model converges from this draw
const fn default_seed() -> u64 {
    7
}

const fn default_batch_size() -> usize {
    4
}

const fn default_learning_rate() -> f32 {
    0.001
}

const fn default_epochs() -> usize {
    1
}

const fn default_output() -> Activation {
    Activation::Softmax
}

/// Architecture plus training hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Seed for weight initialization; defaults to 7.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Samples per training batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Gradient descent step size.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Passes over the training set.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Activation applied after the last layer.
    #[serde(default = "default_output")]
    pub output: Activation,
    /// Per-sample input shape.
    pub input: InputShape,
    /// Layers in forward order.
    #[serde(default)]
    pub layers: Vec<LayerConfig>,
}

impl NetworkConfig {
    /// Reads and parses a TOML file.
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses a TOML document and checks its scalar fields.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks the scalar fields.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid("learning_rate must be a positive number".into()));
        }
        if self.layers.is_empty() {
            return Err(ConfigError::Invalid("at least one layer is required".into()));
        }
        Ok(())
    }
}

/// A configuration that could not be read, parsed or built.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The TOML was malformed or did not match the schema.
    Parse(String),
    /// The values are inconsistent.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Parse(err) => write!(f, "Parse error: {err}"),
            Self::Invalid(err) => write!(f, "Invalid configuration: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}
