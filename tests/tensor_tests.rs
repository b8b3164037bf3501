use sudonet::activation::{Activation, softmax};
use sudonet::approx::F32_MAX_ERROR;
use sudonet::tensors::{Tensor2D, Tensor4D, output_extent};

fn pattern(len: usize, seed: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 7 + seed * 13) % 11) as f32 / 5.0 - 1.0).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[test]
fn test_two_by_two_arithmetic() {
    let a = Tensor2D::from_rows(&[[1.0, 2.0], [3.0, 4.0]]);
    let b = Tensor2D::from_rows(&[[4.0, 3.0], [2.0, 1.0]]);

    assert_eq!(a.add(&b), Tensor2D::from_rows(&[[5.0, 5.0], [5.0, 5.0]]));
    assert_eq!(a.subtract(&b), Tensor2D::from_rows(&[[-3.0, -1.0], [1.0, 3.0]]));
    assert_eq!(a.multiply(&b), Tensor2D::from_rows(&[[8.0, 5.0], [20.0, 13.0]]));
    assert_eq!(a.transpose(), Tensor2D::from_rows(&[[1.0, 3.0], [2.0, 4.0]]));
}

#[test]
fn test_add_commutes() {
    let a = Tensor2D::new(3, 4, pattern(12, 1));
    let b = Tensor2D::new(3, 4, pattern(12, 2));
    assert!(a.add(&b).element_wise_equal(&b.add(&a)));
}

#[test]
fn test_subtract_is_add_of_negation() {
    let a = Tensor2D::new(2, 5, pattern(10, 3));
    let b = Tensor2D::new(2, 5, pattern(10, 4));
    assert!(a.subtract(&b).approx_eq(&a.add(&b.scalar_multiply(-1.0)), F32_MAX_ERROR));
}

#[test]
fn test_double_transpose_is_identity() {
    let a = Tensor2D::new(3, 7, pattern(21, 5));
    assert_eq!(a.transpose().transpose(), a);

    let t = Tensor4D::new([2, 3, 4, 5], pattern(120, 6));
    assert_eq!(t.transpose().shape(), [2, 3, 5, 4]);
    assert_eq!(t.transpose().transpose(), t);
}

#[test]
fn test_multiply_by_identity() {
    let a = Tensor2D::new(4, 3, pattern(12, 7));
    assert!(a.multiply(&Tensor2D::identity(3)).approx_eq(&a, F32_MAX_ERROR));
    assert!(Tensor2D::identity(4).multiply(&a).approx_eq(&a, F32_MAX_ERROR));
}

#[test]
fn test_multiply_transpose_identity() {
    // (AB)ᵀ = BᵀAᵀ
    let a = Tensor2D::new(3, 4, pattern(12, 8));
    let b = Tensor2D::new(4, 2, pattern(8, 9));
    let lhs = a.multiply(&b).transpose();
    let rhs = b.transpose().multiply(&a.transpose());
    assert!(lhs.approx_eq(&rhs, 1e-5));
}

#[test]
fn test_into_forms_match_allocating_forms() {
    let a = Tensor2D::new(3, 3, pattern(9, 10));
    let b = Tensor2D::new(3, 3, pattern(9, 11));

    let mut dst = Tensor2D::zeros(3, 3);
    a.multiply_into(&b, &mut dst);
    assert_eq!(dst, a.multiply(&b));

    a.elementwise_multiply_into(&b, &mut dst);
    assert_eq!(dst, a.elementwise_multiply(&b));

    a.transpose_into(&mut dst);
    assert_eq!(dst, a.transpose());
}

#[test]
fn test_bias_and_row_sums() {
    let x = Tensor2D::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let bias = Tensor2D::from_rows(&[[10.0, 20.0, 30.0]]);
    assert_eq!(
        x.add_bias(&bias),
        Tensor2D::from_rows(&[[11.0, 22.0, 33.0], [14.0, 25.0, 36.0]])
    );
    assert_eq!(x.sum_rows(), Tensor2D::from_rows(&[[5.0, 7.0, 9.0]]));
}

#[test]
fn test_activation_map() {
    let z = Tensor2D::from_rows(&[[-2.0, 0.0, 3.0]]);
    assert_eq!(z.map_activation(Activation::Relu), Tensor2D::from_rows(&[[0.0, 0.0, 3.0]]));
    assert!(
        z.map_activation(Activation::LeakyRelu)
            .approx_eq(&Tensor2D::from_rows(&[[-0.02, 0.0, 3.0]]), 1e-6)
    );
}

#[test]
fn test_softmax_rows_are_distributions() {
    let z = Tensor2D::from_rows(&[[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0], [-5.0, 0.0, 5.0]]);
    let p = softmax(&z);
    for r in 0..p.rows() {
        assert!((p.row(r).iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!(p.row(r).iter().all(|v| (0.0..=1.0).contains(v)));
    }
    // order preserved, large logits stay finite
    assert_eq!(p.argmax_row(0), 2);
    assert!((p.get(1, 0) - 1.0 / 3.0).abs() < 1e-6);

    let shifted = softmax(&z.map(|v| v + 7.5));
    assert!(shifted.approx_eq(&p, 1e-5));
}

#[test]
fn test_convolution_output_shape() {
    for (h, w) in [(5, 5), (6, 9), (28, 28)] {
        for kernel in 1..=3 {
            for stride in 1..=3 {
                for padding in 0..=1 {
                    let x = Tensor4D::zeros([2, 3, h, w]);
                    let k = Tensor4D::zeros([4, 3, kernel, kernel]);
                    let y = Tensor4D::convolve(&k, &x, stride, padding);
                    let oh = (h + 2 * padding - kernel) / stride + 1;
                    let ow = (w + 2 * padding - kernel) / stride + 1;
                    assert_eq!(y.shape(), [2, 4, oh, ow]);
                    assert_eq!(output_extent(h, kernel, stride, padding), oh);
                }
            }
        }
    }
}

#[test]
fn test_convolution_known_values() {
    let x = Tensor4D::new([1, 1, 3, 3], (1..=9).map(|v| v as f32).collect());
    let k = Tensor4D::new([1, 1, 2, 2], vec![1.0, 0.0, 0.0, -1.0]);
    let y = Tensor4D::convolve(&k, &x, 1, 0);
    assert_eq!(y, Tensor4D::new([1, 1, 2, 2], vec![-4.0; 4]));

    // padded positions contribute nothing
    let ones = Tensor4D::new([1, 1, 3, 3], vec![1.0; 9]);
    let y = Tensor4D::convolve(&ones, &x, 1, 1);
    assert_eq!(y.shape(), [1, 1, 3, 3]);
    assert_eq!(y.get([0, 0, 0, 0]), 1.0 + 2.0 + 4.0 + 5.0);
    assert_eq!(y.get([0, 0, 1, 1]), 45.0);
}

#[test]
fn test_convolution_gradients_are_adjoint() {
    // For a linear map y = conv(w, x): <y, g> = <w, dW> = <x, dX>.
    let (stride, padding) = (2, 1);
    let x = Tensor4D::new([2, 2, 5, 6], pattern(120, 12));
    let w = Tensor4D::new([3, 2, 3, 3], pattern(54, 13));
    let y = Tensor4D::convolve(&w, &x, stride, padding);
    let g = Tensor4D::new(y.shape(), pattern(y.data().len(), 14));

    let dw = Tensor4D::grad_weight_convolve(&x, &g, stride, padding, (3, 3));
    let dx = Tensor4D::grad_input_convolve(&w, &g, stride, padding, (5, 6));
    assert_eq!(dw.shape(), w.shape());
    assert_eq!(dx.shape(), x.shape());

    let reference = dot(y.data(), g.data());
    assert!((dot(w.data(), dw.data()) - reference).abs() < 1e-3);
    assert!((dot(x.data(), dx.data()) - reference).abs() < 1e-3);
}

#[test]
fn test_flatten_round_trip_and_channel_sums() {
    let t = Tensor4D::new([2, 3, 2, 2], pattern(24, 15));
    let flat = t.clone().flatten();
    assert_eq!(flat.shape(), [2, 12]);
    assert_eq!(flat.data(), t.data());
    assert_eq!(Tensor4D::unflatten(flat, 3, 2, 2), t);

    let ones = Tensor4D::new([2, 3, 2, 2], vec![1.0; 24]);
    assert_eq!(ones.sum_channels(), Tensor2D::new(3, 1, vec![8.0; 3]));

    let bias = Tensor2D::new(3, 1, vec![1.0, 2.0, 3.0]);
    let shifted = ones.add_bias(&bias);
    assert_eq!(shifted.get([1, 2, 1, 0]), 4.0);
    assert_eq!(shifted.sum_channels(), Tensor2D::new(3, 1, vec![16.0, 24.0, 32.0]));
}

#[test]
fn test_from_image_builds_batch_of_one() {
    let t = Tensor4D::from_image(1, 2, 2, &[0.0, 0.25, 0.5, 1.0]);
    assert_eq!(t.shape(), [1, 1, 2, 2]);
    assert_eq!(t.get([0, 0, 1, 0]), 0.5);

    let result = std::panic::catch_unwind(|| Tensor4D::from_image(1, 1, 2, &[0.5, 255.0]));
    assert!(result.is_err());
}

#[test]
fn test_inverse_and_determinant() {
    let m = Tensor2D::from_rows(&[[2.0, 1.0], [1.0, 3.0]]);
    assert!((m.determinant() - 5.0).abs() < F32_MAX_ERROR);
    let inv = m.inverse().unwrap();
    assert!(m.multiply(&inv).approx_eq(&Tensor2D::identity(2), F32_MAX_ERROR));
    assert!(Tensor2D::from_rows(&[[1.0, 1.0], [1.0, 1.0]]).inverse().is_err());
}

#[test]
fn test_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        let _ = Tensor2D::zeros(2, 3).add(&Tensor2D::zeros(3, 2));
    });
    assert!(result.is_err());

    let result = std::panic::catch_unwind(|| {
        let _ = Tensor2D::zeros(2, 3).multiply(&Tensor2D::zeros(2, 3));
    });
    assert!(result.is_err());

    let result = std::panic::catch_unwind(|| {
        let _ = Tensor2D::new(2, 2, vec![1.0, 2.0, 3.0]);
    });
    assert!(result.is_err());
}

#[test]
fn test_convolution_channel_mismatch_panics() {
    let result = std::panic::catch_unwind(|| {
        let x = Tensor4D::zeros([1, 2, 4, 4]);
        let k = Tensor4D::zeros([1, 3, 2, 2]);
        let _ = Tensor4D::convolve(&k, &x, 1, 0);
    });
    assert!(result.is_err());
}

#[test]
fn test_out_of_bounds_access() {
    let t = Tensor2D::zeros(2, 2);
    assert!(t.try_get(2, 0).is_err());
    assert!(std::panic::catch_unwind(|| t.get(0, 2)).is_err());

    let t4 = Tensor4D::zeros([1, 1, 2, 2]);
    assert!(t4.try_get([0, 1, 0, 0]).is_err());
}
