use std::fs;

use rand::{SeedableRng, rngs::StdRng};
use sudonet::activation::Activation;
use sudonet::layers::{ConvGeometry, ConvolutionalLayer, FullyConnectedLayer, Layer};
use sudonet::loss::{cross_entropy, cross_entropy_gradient};
use sudonet::modelio::{WeightIoErrorKind, load_layer, save_layer, weight_path};
use sudonet::network::Network;
use sudonet::tensors::{Tensor2D, Tensor4D};

fn geometry() -> ConvGeometry {
    ConvGeometry {
        input: [1, 5, 5],
        filters: 2,
        kernel: 3,
        stride: 1,
        padding: 1,
    }
}

fn xor_batch() -> (Tensor2D, Tensor2D) {
    (
        Tensor2D::from_rows(&[[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]),
        Tensor2D::from_rows(&[[1.0, 0.0], [0.0, 1.0], [0.0, 1.0], [1.0, 0.0]]),
    )
}

#[test]
fn test_swt_save_and_load_conv_layer() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("model");
    let mut rng = StdRng::seed_from_u64(11);

    let saved = ConvolutionalLayer::new("conv0", geometry(), Activation::Relu, &mut rng);
    save_layer(&saved, &base).unwrap();
    assert!(weight_path(&base, "conv0").exists());

    let mut loaded = ConvolutionalLayer::new("conv0", geometry(), Activation::Relu, &mut rng);
    assert_ne!(loaded.weights(), saved.weights());
    load_layer(&mut loaded, &base).unwrap();
    assert_eq!(loaded.weights(), saved.weights());
    assert_eq!(loaded.biases(), saved.biases());
}

#[test]
fn test_swt_load_into_wrong_shape() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("model");
    let mut rng = StdRng::seed_from_u64(12);

    let saved = FullyConnectedLayer::new("fc0", 4, 2, Activation::Relu, &mut rng);
    save_layer(&saved, &base).unwrap();

    let mut other = FullyConnectedLayer::new("fc0", 3, 2, Activation::Relu, &mut rng);
    let before = other.weights().clone();
    let err = load_layer(&mut other, &base).unwrap_err();
    assert_eq!(err.kind, WeightIoErrorKind::ShapeMismatch);
    assert_eq!(other.weights(), &before);
}

#[test]
fn test_swt_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(13);
    let mut layer = FullyConnectedLayer::new("fc0", 2, 2, Activation::Relu, &mut rng);
    let err = load_layer(&mut layer, dir.path().join("absent")).unwrap_err();
    assert_eq!(err.kind, WeightIoErrorKind::InvalidPath);
}

#[test]
fn test_swt_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("model");
    let mut rng = StdRng::seed_from_u64(14);

    let layer = FullyConnectedLayer::new("fc0", 3, 3, Activation::Tanh, &mut rng);
    save_layer(&layer, &base).unwrap();
    let path = weight_path(&base, "fc0");

    let mut bytes = fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x40;
    fs::write(&path, &bytes).unwrap();

    let mut target = layer.clone();
    let err = load_layer(&mut target, &base).unwrap_err();
    assert_eq!(err.kind, WeightIoErrorKind::IntegrityUnverified);

    fs::write(&path, b"not a weight file at all").unwrap();
    let err = load_layer(&mut target, &base).unwrap_err();
    assert_eq!(err.kind, WeightIoErrorKind::InvalidHeader);
}

#[test]
fn test_network_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("xor");
    let (x, y) = xor_batch();

    let mut trained = Network::fully_connected(&[2, 8, 2], Activation::LeakyRelu, Activation::Softmax, 3);
    for _ in 0..50 {
        trained.train_batch(&x, &y, 0.01);
    }
    trained.save(&base).unwrap();
    for layer in trained.parameterized_layers() {
        assert!(weight_path(&base, layer.name()).exists());
    }

    let mut restored = Network::fully_connected(&[2, 8, 2], Activation::LeakyRelu, Activation::Softmax, 99);
    assert!(restored.load_or_init(&base));
    let expected = trained.predict(&x).clone();
    assert_eq!(restored.predict(&x), &expected);
}

#[test]
fn test_load_clears_stale_gradients() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("fresh");
    let (x, y) = xor_batch();

    Network::fully_connected(&[2, 4, 2], Activation::LeakyRelu, Activation::Softmax, 5)
        .save(&base)
        .unwrap();

    let mut net = Network::fully_connected(&[2, 4, 2], Activation::LeakyRelu, Activation::Softmax, 6);
    net.train_batch(&x, &y, 0.01);
    let is_zero = |t: &Tensor2D| t.data().iter().all(|&g| g == 0.0);
    assert!(!is_zero(net.fc_layers()[1].weights_gradient()));

    net.load(&base).unwrap();
    for layer in net.fc_layers() {
        assert!(is_zero(layer.weights_gradient()), "{} kept its gradient", layer.name());
        assert!(is_zero(layer.biases_gradient()), "{} kept its gradient", layer.name());
    }
}

#[test]
fn test_network_load_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("partial");

    let source = Network::fully_connected(&[2, 4, 3, 2], Activation::Relu, Activation::Softmax, 1);
    source.save(&base).unwrap();
    fs::remove_file(weight_path(&base, "fc2")).unwrap();

    let mut target = Network::fully_connected(&[2, 4, 3, 2], Activation::Relu, Activation::Softmax, 2);
    let before = target.fc_layers()[0].weights().clone();
    let err = target.load(&base).unwrap_err();
    assert_eq!(err.kind, WeightIoErrorKind::InvalidPath);
    assert_eq!(target.fc_layers()[0].weights(), &before);
    assert!(!target.load_or_init(&base));
}

#[test]
fn test_cross_entropy_of_uniform_prediction() {
    let p = Tensor2D::new(3, 4, vec![0.25; 12]);
    let mut y = Tensor2D::zeros(3, 4);
    for r in 0..3 {
        y.set(r, r, 1.0);
    }
    assert!((cross_entropy(&p, &y) - 4.0f32.ln()).abs() < 1e-5);

    let g = cross_entropy_gradient(&p, &y);
    assert!((g.get(0, 0) + 0.75).abs() < 1e-6);
    assert!((g.get(0, 1) - 0.25).abs() < 1e-6);
}

#[test]
fn test_conv_layer_forward_shape() {
    let mut rng = StdRng::seed_from_u64(15);
    let mut layer = ConvolutionalLayer::new("conv0", geometry(), Activation::Relu, &mut rng);
    let x = Tensor4D::zeros([3, 1, 5, 5]);
    assert_eq!(layer.forward(&x).shape(), [3, 2, 5, 5]);
    assert!(layer.activations().data().iter().all(|&v| v == 0.0));
}
