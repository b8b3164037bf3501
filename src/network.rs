//! Layer composition, training and inference.
//!
//! A [`Network`] is a fixed pipeline:
//!
//! ```text
//! input ─▶ conv* ─▶ flatten ─▶ dense+ ─▶ output activation ─▶ prediction
//! ```
//!
//! Convolutional networks take `(N, C, H, W)` batches; networks without
//! convolutional layers take `(N, features)` matrices. Training runs the
//! forward pass, measures cross-entropy, then walks the layers in reverse,
//! each one updating its own parameters as it is visited.

use std::collections::HashSet;
use std::path::Path;

use rand::{SeedableRng, rngs::StdRng};

use crate::activation::Activation;
use crate::config::{ConfigError, InputShape, LayerConfig, NetworkConfig};
use crate::error::check_shape;
use crate::layers::{
    ActivationLayer, ConvGeometry, ConvolutionalLayer, FlattenLayer, FullyConnectedLayer, Layer,
};
use crate::loss::{cross_entropy, cross_entropy_gradient_into};
use crate::modelio::{self, WeightIoError};
use crate::tensors::{Tensor2D, Tensor4D, TensorFloat};

/// A batch handed to the network.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// `(batch, features)` for networks without convolutional layers.
    Flat(&'a Tensor2D),
    /// `(batch, C, H, W)` for convolutional networks.
    Spatial(&'a Tensor4D),
}

impl<'a> From<&'a Tensor2D> for Input<'a> {
    fn from(value: &'a Tensor2D) -> Self {
        Self::Flat(value)
    }
}

impl<'a> From<&'a Tensor4D> for Input<'a> {
    fn from(value: &'a Tensor4D) -> Self {
        Self::Spatial(value)
    }
}

/// An ordered stack of layers trained with plain gradient descent.
#[derive(Debug, Clone)]
pub struct Network {
    conv_layers: Vec<ConvolutionalLayer>,
    flatten: Option<FlattenLayer>,
    fc_layers: Vec<FullyConnectedLayer>,
    output: ActivationLayer,
    loss_gradient: Tensor2D,
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::Invalid(msg)
}

impl Network {
    /// Assembles a network, checking that every layer's input matches the
    /// previous layer's output.
    ///
    /// A flatten layer is required exactly when the network is fed images.
    /// Layer names must be unique, since each one names a weight file.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] describing the first mismatch or repeated name.
    pub fn new(
        conv_layers: Vec<ConvolutionalLayer>,
        flatten: Option<FlattenLayer>,
        fc_layers: Vec<FullyConnectedLayer>,
        output: Activation,
    ) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let all_names = conv_layers
            .iter()
            .map(Layer::name)
            .chain(fc_layers.iter().map(Layer::name));
        for name in all_names {
            if !names.insert(name) {
                return Err(invalid(format!("duplicate layer name {name:?}: weight files would collide")));
            }
        }

        for pair in conv_layers.windows(2) {
            if pair[1].geometry().input != pair[0].output_shape() {
                return Err(invalid(format!(
                    "layer {} expects input {:?} but {} produces {:?}",
                    pair[1].name(),
                    pair[1].geometry().input,
                    pair[0].name(),
                    pair[0].output_shape()
                )));
            }
        }
        match (conv_layers.last(), &flatten) {
            (Some(_), None) => return Err(invalid("convolutional layers must be followed by a flatten layer".into())),
            (Some(last), Some(fl)) if fl.input_shape() != last.output_shape() => {
                return Err(invalid(format!(
                    "flatten expects {:?} but {} produces {:?}",
                    fl.input_shape(),
                    last.name(),
                    last.output_shape()
                )));
            }
            _ => {}
        }

        let Some(last_fc) = fc_layers.last() else {
            return Err(invalid("at least one dense layer is required".into()));
        };
        if let Some(fl) = &flatten {
            if fc_layers[0].inputs() != fl.output_width() {
                return Err(invalid(format!(
                    "{} expects {} inputs but flatten produces {}",
                    fc_layers[0].name(),
                    fc_layers[0].inputs(),
                    fl.output_width()
                )));
            }
        }
        for pair in fc_layers.windows(2) {
            if pair[1].inputs() != pair[0].outputs() {
                return Err(invalid(format!(
                    "{} expects {} inputs but {} produces {}",
                    pair[1].name(),
                    pair[1].inputs(),
                    pair[0].name(),
                    pair[0].outputs()
                )));
            }
        }
        if output == Activation::Softmax && last_fc.outputs() < 2 {
            tracing::warn!(outputs = last_fc.outputs(), "softmax over a single output is constant");
        }

        let width = last_fc.outputs();
        Ok(Self {
            conv_layers,
            flatten,
            fc_layers,
            output: ActivationLayer::new(output, width),
            loss_gradient: Tensor2D::zeros(0, width),
        })
    }

    /// A dense-only network over `sizes[0]` features.
    ///
    /// Layer `i` maps `sizes[i]` to `sizes[i + 1]` through `hidden` and is
    /// named `fc<i>`; `output` is applied after the last one.
    ///
    /// Weights are drawn from `seed`, and whether training converges can
    /// depend on it. With `LeakyRelu` hidden layers some draws leave an input
    /// such as the all-zero row with almost no live path, and it stays near
    /// chance. The 2-32-32-2 XOR model learns with seed 7 but stalls with 42
    /// or 2024; pick another seed if a small model will not learn.
    ///
    /// # Panics
    /// Panics if fewer than two sizes are given.
    #[must_use]
    pub fn fully_connected(sizes: &[usize], hidden: Activation, output: Activation, seed: u64) -> Self {
        assert!(sizes.len() >= 2, "a network needs an input and an output size");
        let mut rng = StdRng::seed_from_u64(seed);
        let fc_layers: Vec<_> = sizes
            .windows(2)
            .enumerate()
            .map(|(i, pair)| FullyConnectedLayer::new(format!("fc{i}"), pair[0], pair[1], hidden, &mut rng))
            .collect();
        let width = sizes[sizes.len() - 1];
        Self {
            conv_layers: Vec::new(),
            flatten: None,
            fc_layers,
            output: ActivationLayer::new(output, width),
            loss_gradient: Tensor2D::zeros(0, width),
        }
    }

    /// Builds the layer stack a configuration describes.
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] for misordered layers, kernels that do not
    /// fit, zero-sized layers or broken shape chaining.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let mut spatial = match config.input {
            InputShape::Image { channels, height, width } => Some([channels, height, width]),
            InputShape::Flat { .. } => None,
        };
        let mut features = match config.input {
            InputShape::Flat { features } => Some(features),
            InputShape::Image { .. } => None,
        };

        let mut conv_layers = Vec::new();
        let mut flatten = None;
        let mut fc_layers = Vec::new();

        for (index, layer) in config.layers.iter().enumerate() {
            match layer {
                LayerConfig::Conv {
                    name,
                    filters,
                    kernel,
                    stride,
                    padding,
                    activation,
                } => {
                    let Some(input) = spatial else {
                        return Err(invalid(format!("layer {index}: conv needs image input before any flatten")));
                    };
                    if *filters == 0 || *kernel == 0 || *stride == 0 {
                        return Err(invalid(format!("layer {index}: filters, kernel and stride must be positive")));
                    }
                    if input[1..].iter().any(|&extent| *kernel > extent + 2 * padding) {
                        return Err(invalid(format!(
                            "layer {index}: kernel {kernel} does not fit input {input:?} with padding {padding}"
                        )));
                    }
                    if !activation.is_elementwise() {
                        return Err(invalid(format!("layer {index}: conv needs an element-wise activation")));
                    }
                    let geometry = ConvGeometry {
                        input,
                        filters: *filters,
                        kernel: *kernel,
                        stride: *stride,
                        padding: *padding,
                    };
                    let name = name.clone().unwrap_or_else(|| format!("conv{}", conv_layers.len()));
                    let built = ConvolutionalLayer::new(name, geometry, *activation, &mut rng);
                    spatial = Some(built.output_shape());
                    conv_layers.push(built);
                }
                LayerConfig::Flatten => {
                    let Some([c, h, w]) = spatial.take() else {
                        return Err(invalid(format!("layer {index}: flatten needs image input")));
                    };
                    flatten = Some(FlattenLayer::new(c, h, w));
                    features = Some(c * h * w);
                }
                LayerConfig::Dense {
                    name,
                    outputs,
                    activation,
                } => {
                    let Some(inputs) = features.filter(|_| spatial.is_none()) else {
                        return Err(invalid(format!("layer {index}: dense layers need a flatten layer after image input")));
                    };
                    if *outputs == 0 {
                        return Err(invalid(format!("layer {index}: dense outputs must be positive")));
                    }
                    let name = name.clone().unwrap_or_else(|| format!("fc{}", fc_layers.len()));
                    fc_layers.push(FullyConnectedLayer::new(name, inputs, *outputs, *activation, &mut rng));
                    features = Some(*outputs);
                }
            }
        }

        let network = Self::new(conv_layers, flatten, fc_layers, config.output)?;
        tracing::debug!(
            conv = network.conv_layers.len(),
            dense = network.fc_layers.len(),
            outputs = network.output_width(),
            "built network from config"
        );
        Ok(network)
    }

    /// Convolutional layers in forward order.
    #[must_use]
    pub fn conv_layers(&self) -> &[ConvolutionalLayer] {
        &self.conv_layers
    }

    /// The flatten bridge, present for image networks.
    #[must_use]
    pub const fn flatten(&self) -> Option<&FlattenLayer> {
        self.flatten.as_ref()
    }

    /// Dense layers in forward order.
    #[must_use]
    pub fn fc_layers(&self) -> &[FullyConnectedLayer] {
        &self.fc_layers
    }

    /// The output activation layer.
    #[must_use]
    pub const fn output(&self) -> &ActivationLayer {
        &self.output
    }

    /// Width of each prediction row.
    #[must_use]
    pub const fn output_width(&self) -> usize {
        self.output.width()
    }

    /// Every layer with persistable parameters, convolutional first.
    pub fn parameterized_layers(&self) -> impl Iterator<Item = &dyn Layer> {
        self.conv_layers
            .iter()
            .map(|l| l as &dyn Layer)
            .chain(self.fc_layers.iter().map(|l| l as &dyn Layer))
    }

    fn parameterized_layers_mut(&mut self) -> impl Iterator<Item = &mut dyn Layer> {
        self.conv_layers
            .iter_mut()
            .map(|l| l as &mut dyn Layer)
            .chain(self.fc_layers.iter_mut().map(|l| l as &mut dyn Layer))
    }

    /// Runs the forward pass and returns the prediction.
    ///
    /// # Panics
    /// Panics if the input kind or shape does not match the first layer.
    #[track_caller]
    pub fn forward<'a>(&mut self, input: impl Into<Input<'a>>) -> &Tensor2D {
        let mut current: &Tensor2D = match input.into() {
            Input::Flat(x) => {
                assert!(self.flatten.is_none(), "this network takes 4-D image input");
                x
            }
            Input::Spatial(x) => {
                let Some(flatten) = self.flatten.as_mut() else {
                    panic!("this network takes 2-D input");
                };
                let mut spatial = x;
                for layer in &mut self.conv_layers {
                    spatial = layer.forward(spatial);
                }
                flatten.forward(spatial)
            }
        };
        for layer in &mut self.fc_layers {
            current = layer.forward(current);
        }
        self.output.forward(current)
    }

    /// Forward pass only; the prediction rows are class probabilities when
    /// the output activation is softmax.
    #[track_caller]
    pub fn predict<'a>(&mut self, input: impl Into<Input<'a>>) -> &Tensor2D {
        self.forward(input)
    }

    /// Index of the highest-scoring class for every row of the batch.
    #[track_caller]
    pub fn classify<'a>(&mut self, input: impl Into<Input<'a>>) -> Vec<usize> {
        let prediction = self.forward(input);
        (0..prediction.rows()).map(|r| prediction.argmax_row(r)).collect()
    }

    /// Backpropagates from the last forward pass and updates every layer.
    ///
    /// The output gradient is `prediction − labels`, the combined
    /// softmax/cross-entropy gradient, so the output activation's own
    /// derivative is not applied. `input` must be the batch of the last
    /// forward pass.
    ///
    /// # Panics
    /// Panics if `labels` or `input` do not match the last forward pass.
    #[track_caller]
    pub fn backward<'a>(&mut self, input: impl Into<Input<'a>>, labels: &Tensor2D, learning_rate: TensorFloat) {
        let input = input.into();
        let prediction = self.output.activations();
        check_shape("backward labels", &labels.shape(), &prediction.shape());
        if self.loss_gradient.rows() != prediction.rows() {
            self.loss_gradient = Tensor2D::zeros(prediction.rows(), prediction.cols());
        }
        cross_entropy_gradient_into(prediction, labels, &mut self.loss_gradient);

        for i in (0..self.fc_layers.len()).rev() {
            let (before, rest) = self.fc_layers.split_at_mut(i);
            let (current, after) = rest.split_at_mut(1);
            let prev: &Tensor2D = match (before.last(), &self.flatten, input) {
                (Some(layer), _, _) => layer.activations(),
                (None, Some(flatten), _) => flatten.activations(),
                (None, None, Input::Flat(x)) => x,
                (None, None, Input::Spatial(_)) => panic!("this network takes 2-D input"),
            };
            let incoming = after.first().map_or(&self.loss_gradient, FullyConnectedLayer::deltas);
            current[0].backward(prev, incoming, learning_rate);
        }

        let Some(flatten) = self.flatten.as_mut() else {
            return;
        };
        let incoming = self
            .fc_layers
            .first()
            .map_or(&self.loss_gradient, FullyConnectedLayer::deltas);
        flatten.backward(incoming);

        for i in (0..self.conv_layers.len()).rev() {
            let (before, rest) = self.conv_layers.split_at_mut(i);
            let (current, after) = rest.split_at_mut(1);
            let prev: &Tensor4D = match (before.last(), input) {
                (Some(layer), _) => layer.activations(),
                (None, Input::Spatial(x)) => x,
                (None, Input::Flat(_)) => panic!("this network takes 4-D image input"),
            };
            let incoming = after.first().map_or(flatten.deltas(), ConvolutionalLayer::deltas);
            current[0].backward(prev, incoming, learning_rate);
        }
    }

    /// One training step: forward, loss, backward with updates.
    ///
    /// Returns the batch's mean cross-entropy measured before the update.
    #[track_caller]
    pub fn train_batch<'a>(
        &mut self,
        input: impl Into<Input<'a>>,
        labels: &Tensor2D,
        learning_rate: TensorFloat,
    ) -> TensorFloat {
        let input = input.into();
        let loss = cross_entropy(self.forward(input), labels);
        self.backward(input, labels, learning_rate);
        tracing::trace!(loss, "trained batch");
        loss
    }

    /// Trains over `batches` for `epochs` passes.
    ///
    /// Returns the mean batch loss of the final epoch.
    pub fn fit<X>(&mut self, batches: &[(X, Tensor2D)], epochs: usize, learning_rate: TensorFloat) -> TensorFloat
    where
        for<'b> &'b X: Into<Input<'b>>,
    {
        let mut mean = 0.0;
        for epoch in 0..epochs {
            let total: TensorFloat = batches
                .iter()
                .map(|(input, labels)| self.train_batch(input, labels, learning_rate))
                .sum();
            mean = if batches.is_empty() { 0.0 } else { total / batches.len() as TensorFloat };
            tracing::info!(epoch, loss = mean, "finished epoch");
        }
        mean
    }

    /// Saves every parameterized layer to `<basename>.<layer-name>.swt`.
    ///
    /// # Errors
    /// The first [`WeightIoError`] encountered.
    pub fn save(&self, basename: impl AsRef<Path>) -> Result<(), WeightIoError> {
        let basename = basename.as_ref();
        for layer in self.parameterized_layers() {
            modelio::save_layer(layer, basename)?;
        }
        tracing::info!(basename = %basename.display(), "saved network weights");
        Ok(())
    }

    /// Loads every parameterized layer from `<basename>.<layer-name>.swt`.
    ///
    /// All files are read and verified before any layer is touched, so a
    /// failure leaves the whole network unchanged.
    ///
    /// # Errors
    /// The first [`WeightIoError`] encountered.
    pub fn load(&mut self, basename: impl AsRef<Path>) -> Result<(), WeightIoError> {
        let basename = basename.as_ref();
        let staged = self
            .parameterized_layers()
            .map(|layer| modelio::read_layer(layer, basename))
            .collect::<Result<Vec<_>, _>>()?;
        for (layer, tensors) in self.parameterized_layers_mut().zip(&staged) {
            modelio::apply(layer, tensors);
        }
        tracing::info!(basename = %basename.display(), "loaded network weights");
        Ok(())
    }

    /// Loads saved weights if possible, otherwise keeps the current ones.
    ///
    /// Returns whether the weights were loaded.
    pub fn load_or_init(&mut self, basename: impl AsRef<Path>) -> bool {
        let basename = basename.as_ref();
        match self.load(basename) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(basename = %basename.display(), error = %err, "keeping freshly initialized weights");
                false
            }
        }
    }
}
