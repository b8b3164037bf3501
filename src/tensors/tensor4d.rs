use rayon::prelude::*;

use super::{Tensor2D, TensorFloat, checked_volume, try_zeroed};
use crate::error::{TensorError, check_shape, fail};

/// A row-major `(N, C, H, W)` tensor.
///
/// Element `(n, c, h, w)` lives at `((n * C + c) * H + h) * W + w`.
/// Image batches use `N` for the batch and `C` for colour channels;
/// convolution kernels reuse the layout as `(out_c, in_c, kh, kw)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor4D {
    shape: [usize; 4],
    data: Vec<TensorFloat>,
}

/// Spatial extent of a convolution output along one axis.
///
/// Trailing cells that do not fit a full stride are dropped.
///
/// # Panics
/// Panics if `stride == 0` or the kernel is larger than the padded input.
#[must_use]
#[track_caller]
pub fn output_extent(input: usize, kernel: usize, stride: usize, padding: usize) -> usize {
    assert!(stride > 0, "convolve: stride must be non-zero");
    let padded = input + 2 * padding;
    assert!(
        kernel > 0 && kernel <= padded,
        "convolve: kernel extent {kernel} does not fit padded input extent {padded}"
    );
    (padded - kernel) / stride + 1
}

/// Maps an output coordinate plus kernel offset back to an unpadded input
/// coordinate, or `None` when it lands in the zero padding.
#[inline]
const fn source(out: usize, k: usize, stride: usize, padding: usize, extent: usize) -> Option<usize> {
    let padded = out * stride + k;
    if padded < padding || padded - padding >= extent {
        None
    } else {
        Some(padded - padding)
    }
}

impl Tensor4D {
    /// Wraps a caller buffer.
    ///
    /// # Panics
    /// Panics if `data.len()` is not the product of `shape`.
    #[must_use]
    pub fn new(shape: [usize; 4], data: Vec<TensorFloat>) -> Self {
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {shape:?} is incompatible with {} data elements",
            data.len()
        );
        Self { shape, data }
    }

    /// A zero-filled tensor.
    #[must_use]
    pub fn zeros(shape: [usize; 4]) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.iter().product()],
        }
    }

    /// A zero-filled tensor, reporting allocation failure instead of aborting.
    ///
    /// # Errors
    /// [`TensorError::AllocationFailure`] if the element count overflows or
    /// the buffer cannot be reserved.
    pub fn try_zeros(shape: [usize; 4]) -> Result<Self, TensorError> {
        let len = checked_volume(&shape)?;
        Ok(Self {
            shape,
            data: try_zeroed(len)?,
        })
    }

    /// Wraps normalized pixels as a single-image `(1, C, H, W)` batch.
    ///
    /// `pixels` is channel-major: all of channel 0, then channel 1, and so on.
    ///
    /// # Panics
    /// Panics if the pixel count is wrong or any value lies outside `[0, 1]`.
    #[must_use]
    #[track_caller]
    pub fn from_image(channels: usize, height: usize, width: usize, pixels: &[TensorFloat]) -> Self {
        if let Some(bad) = pixels.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            panic!("from_image: pixel value {bad} outside [0, 1]");
        }
        Self::new([1, channels, height, width], pixels.to_vec())
    }

    /// `[N, C, H, W]`.
    #[inline]
    #[must_use]
    pub const fn shape(&self) -> [usize; 4] {
        self.shape
    }

    /// Batch size `N`.
    #[inline]
    #[must_use]
    pub const fn batch(&self) -> usize {
        self.shape[0]
    }

    /// Channel count `C`.
    #[inline]
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.shape[1]
    }

    /// Height `H`.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> usize {
        self.shape[2]
    }

    /// Width `W`.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> usize {
        self.shape[3]
    }

    /// Row-major element buffer.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[TensorFloat] {
        &self.data
    }

    /// Mutable row-major element buffer.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [TensorFloat] {
        &mut self.data
    }

    /// Consumes the tensor, returning its buffer.
    #[must_use]
    pub fn into_vec(self) -> Vec<TensorFloat> {
        self.data
    }

    fn offset(&self, op: &'static str, index: [usize; 4]) -> Result<usize, TensorError> {
        if index.iter().zip(&self.shape).all(|(i, d)| i < d) {
            let [_, c, h, w] = self.shape;
            Ok(((index[0] * c + index[1]) * h + index[2]) * w + index[3])
        } else {
            Err(TensorError::OutOfBounds {
                op,
                index: index.to_vec(),
                shape: self.shape.to_vec(),
            })
        }
    }

    /// Element at `[n, c, h, w]`.
    ///
    /// # Panics
    /// Panics with [`TensorError::OutOfBounds`] outside the tensor.
    #[must_use]
    #[track_caller]
    pub fn get(&self, index: [usize; 4]) -> TensorFloat {
        match self.offset("get", index) {
            Ok(i) => self.data[i],
            Err(err) => fail(err),
        }
    }

    /// Element at `[n, c, h, w]`, or an error outside the tensor.
    ///
    /// # Errors
    /// [`TensorError::OutOfBounds`] if the index is outside the tensor.
    pub fn try_get(&self, index: [usize; 4]) -> Result<TensorFloat, TensorError> {
        self.offset("get", index).map(|i| self.data[i])
    }

    /// Overwrites the element at `[n, c, h, w]`.
    ///
    /// # Panics
    /// Panics with [`TensorError::OutOfBounds`] outside the tensor.
    #[track_caller]
    pub fn set(&mut self, index: [usize; 4], value: TensorFloat) {
        match self.offset("set", index) {
            Ok(i) => self.data[i] = value,
            Err(err) => fail(err),
        }
    }

    /// Sets every element to zero.
    pub fn fill_zero(&mut self) {
        self.data.fill(0.0);
    }

    /// Copies `other` into `self`.
    #[track_caller]
    pub fn copy_from(&mut self, other: &Self) {
        check_shape("copy", &self.shape, &other.shape);
        self.data.copy_from_slice(&other.data);
    }

    #[track_caller]
    fn zip_into(
        &self,
        op: &'static str,
        other: &Self,
        dst: &mut Self,
        f: impl Fn(TensorFloat, TensorFloat) -> TensorFloat,
    ) {
        check_shape(op, &self.shape, &other.shape);
        check_shape(op, &self.shape, &dst.shape);
        for ((d, &a), &b) in dst.data.iter_mut().zip(&self.data).zip(&other.data) {
            *d = f(a, b);
        }
    }

    /// Element-wise sum.
    #[must_use]
    #[track_caller]
    pub fn add(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.shape);
        self.add_into(other, &mut out);
        out
    }

    /// Element-wise sum written into `dst`.
    #[track_caller]
    pub fn add_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("add", other, dst, |a, b| a + b);
    }

    /// Element-wise difference `self - other`.
    #[must_use]
    #[track_caller]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.shape);
        self.subtract_into(other, &mut out);
        out
    }

    /// Element-wise difference written into `dst`.
    #[track_caller]
    pub fn subtract_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("subtract", other, dst, |a, b| a - b);
    }

    /// Element-wise product.
    #[must_use]
    #[track_caller]
    pub fn elementwise_multiply(&self, other: &Self) -> Self {
        let mut out = Self::zeros(self.shape);
        self.elementwise_multiply_into(other, &mut out);
        out
    }

    /// Element-wise product written into `dst`.
    #[track_caller]
    pub fn elementwise_multiply_into(&self, other: &Self, dst: &mut Self) {
        self.zip_into("elementwise_multiply", other, dst, |a, b| a * b);
    }

    /// In-place element-wise product.
    #[track_caller]
    pub fn elementwise_multiply_assign(&mut self, other: &Self) {
        check_shape("elementwise_multiply", &self.shape, &other.shape);
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a *= b;
        }
    }

    /// Every element multiplied by `scalar`.
    #[must_use]
    pub fn scalar_multiply(&self, scalar: TensorFloat) -> Self {
        self.map(|x| x * scalar)
    }

    /// Scaled copy written into `dst`.
    #[track_caller]
    pub fn scalar_multiply_into(&self, scalar: TensorFloat, dst: &mut Self) {
        self.map_into(|x| x * scalar, dst);
    }

    /// In-place `self += alpha * other`.
    #[track_caller]
    pub fn scaled_add(&mut self, other: &Self, alpha: TensorFloat) {
        check_shape("scaled_add", &self.shape, &other.shape);
        for (a, &b) in self.data.iter_mut().zip(&other.data) {
            *a += alpha * b;
        }
    }

    /// Applies `f` to every element.
    #[must_use]
    pub fn map(&self, f: impl Fn(TensorFloat) -> TensorFloat) -> Self {
        Self {
            shape: self.shape,
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Mapped copy written into `dst`.
    #[track_caller]
    pub fn map_into(&self, f: impl Fn(TensorFloat) -> TensorFloat, dst: &mut Self) {
        check_shape("map", &self.shape, &dst.shape);
        for (d, &x) in dst.data.iter_mut().zip(&self.data) {
            *d = f(x);
        }
    }

    /// Exact element-wise float equality.
    ///
    /// # Panics
    /// Panics if shapes differ.
    #[must_use]
    #[track_caller]
    #[allow(clippy::float_cmp)]
    pub fn element_wise_equal(&self, other: &Self) -> bool {
        check_shape("element_wise_equal", &self.shape, &other.shape);
        self.data.iter().zip(&other.data).all(|(a, b)| a == b)
    }

    /// Whether every element is within `epsilon` of its counterpart.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, epsilon: TensorFloat) -> bool {
        self.shape == other.shape && crate::approx::slices_within(&self.data, &other.data, epsilon)
    }

    /// Swaps the H and W axes of every `(n, c)` plane; N and C stay put.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let [n, c, h, w] = self.shape;
        let mut out = Self::zeros([n, c, w, h]);
        self.transpose_into(&mut out);
        out
    }

    /// H/W swap written into the `(N, C, W, H)` tensor `dst`.
    #[track_caller]
    pub fn transpose_into(&self, dst: &mut Self) {
        let [n, c, h, w] = self.shape;
        check_shape("transpose", &dst.shape, &[n, c, w, h]);
        let plane = h * w;
        if plane == 0 {
            return;
        }
        for (src, out) in self.data.chunks_exact(plane).zip(dst.data.chunks_exact_mut(plane)) {
            for y in 0..h {
                for x in 0..w {
                    out[x * h + y] = src[y * w + x];
                }
            }
        }
    }

    /// Adds `bias[c]` to every element of channel `c`.
    ///
    /// # Panics
    /// Panics unless `bias` is `C × 1`.
    #[must_use]
    #[track_caller]
    pub fn add_bias(&self, bias: &Tensor2D) -> Self {
        let mut out = self.clone();
        out.add_bias_assign(bias);
        out
    }

    /// Channel bias add written into `dst`.
    #[track_caller]
    pub fn add_bias_into(&self, bias: &Tensor2D, dst: &mut Self) {
        dst.copy_from(self);
        dst.add_bias_assign(bias);
    }

    /// In-place channel bias add.
    #[track_caller]
    pub fn add_bias_assign(&mut self, bias: &Tensor2D) {
        let [_, c, h, w] = self.shape;
        check_shape("add_bias", &bias.shape(), &[c, 1]);
        let plane = h * w;
        if plane == 0 {
            return;
        }
        for (i, chunk) in self.data.chunks_exact_mut(plane).enumerate() {
            let b = bias.data()[i % c];
            for x in chunk {
                *x += b;
            }
        }
    }

    /// Sums over N, H and W, producing a `C × 1` matrix.
    #[must_use]
    pub fn sum_channels(&self) -> Tensor2D {
        let mut out = Tensor2D::zeros(self.channels(), 1);
        self.sum_channels_into(&mut out);
        out
    }

    /// Per-channel sums written into the `C × 1` matrix `dst`.
    #[track_caller]
    pub fn sum_channels_into(&self, dst: &mut Tensor2D) {
        let [_, c, h, w] = self.shape;
        check_shape("sum_channels", &dst.shape(), &[c, 1]);
        dst.fill_zero();
        let plane = h * w;
        if plane == 0 {
            return;
        }
        let sums = dst.data_mut();
        for (i, chunk) in self.data.chunks_exact(plane).enumerate() {
            sums[i % c] += chunk.iter().sum::<TensorFloat>();
        }
    }

    /// Reinterprets the tensor as an `(N, C*H*W)` matrix without copying.
    #[must_use]
    pub fn flatten(self) -> Tensor2D {
        let [n, c, h, w] = self.shape;
        Tensor2D::new(n, c * h * w, self.data)
    }

    /// Copies the buffer into the `(N, C*H*W)` matrix `dst`.
    #[track_caller]
    pub fn flatten_into(&self, dst: &mut Tensor2D) {
        let [n, c, h, w] = self.shape;
        check_shape("flatten", &dst.shape(), &[n, c * h * w]);
        dst.data_mut().copy_from_slice(&self.data);
    }

    /// Reinterprets an `(N, C*H*W)` matrix as `(N, C, H, W)` without copying.
    ///
    /// # Panics
    /// Panics if `t.cols() != c * h * w`.
    #[must_use]
    #[track_caller]
    pub fn unflatten(t: Tensor2D, c: usize, h: usize, w: usize) -> Self {
        check_shape("unflatten", &t.shape(), &[t.rows(), c * h * w]);
        let n = t.rows();
        Self {
            shape: [n, c, h, w],
            data: t.into_vec(),
        }
    }

    /// Copies the matrix `t` into `dst`, whose volume per batch item must match `t.cols()`.
    #[track_caller]
    pub fn unflatten_into(t: &Tensor2D, dst: &mut Self) {
        let [n, c, h, w] = dst.shape;
        check_shape("unflatten", &t.shape(), &[n, c * h * w]);
        dst.data.copy_from_slice(t.data());
    }

    /// Output shape of convolving `input` with `weights`.
    ///
    /// # Panics
    /// Panics on channel mismatch, zero stride or an oversized kernel.
    #[must_use]
    #[track_caller]
    pub fn convolve_shape(weights: &Self, input: &Self, stride: usize, padding: usize) -> [usize; 4] {
        let [out_c, in_c, kh, kw] = weights.shape;
        let [n, c, h, w] = input.shape;
        if in_c != c {
            fail(TensorError::ShapeMismatch {
                op: "convolve",
                left: weights.shape.to_vec(),
                right: input.shape.to_vec(),
            });
        }
        [
            n,
            out_c,
            output_extent(h, kh, stride, padding),
            output_extent(w, kw, stride, padding),
        ]
    }

    /// Cross-correlates `(out_c, in_c, kh, kw)` weights over an
    /// `(N, in_c, H, W)` input; padding cells read as zero.
    ///
    /// # Panics
    /// Panics on channel mismatch, zero stride or an oversized kernel.
    #[must_use]
    #[track_caller]
    pub fn convolve(weights: &Self, input: &Self, stride: usize, padding: usize) -> Self {
        let mut out = Self::zeros(Self::convolve_shape(weights, input, stride, padding));
        Self::convolve_into(weights, input, stride, padding, &mut out);
        out
    }

    /// Convolution written into `dst`, which is overwritten.
    ///
    /// Batch items are processed in parallel.
    #[track_caller]
    pub fn convolve_into(weights: &Self, input: &Self, stride: usize, padding: usize, dst: &mut Self) {
        let out_shape = Self::convolve_shape(weights, input, stride, padding);
        check_shape("convolve", &dst.shape, &out_shape);

        let [out_c, in_c, kh, kw] = weights.shape;
        let [_, _, h, w] = input.shape;
        let [_, _, oh, ow] = out_shape;
        let item = out_c * oh * ow;
        if item == 0 {
            return;
        }
        let (wt, inp) = (&weights.data, &input.data);

        dst.data.par_chunks_mut(item).enumerate().for_each(|(n, out)| {
            let image = &inp[n * in_c * h * w..(n + 1) * in_c * h * w];
            for f in 0..out_c {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut acc = 0.0;
                        for c in 0..in_c {
                            let kernel = &wt[(f * in_c + c) * kh * kw..(f * in_c + c + 1) * kh * kw];
                            let plane = &image[c * h * w..(c + 1) * h * w];
                            for ky in 0..kh {
                                let Some(y) = source(oy, ky, stride, padding, h) else {
                                    continue;
                                };
                                for kx in 0..kw {
                                    if let Some(x) = source(ox, kx, stride, padding, w) {
                                        acc += kernel[ky * kw + kx] * plane[y * w + x];
                                    }
                                }
                            }
                        }
                        out[(f * oh + oy) * ow + ox] = acc;
                    }
                }
            }
        });
    }

    /// Convolves with the kernel passed through [`transpose`](Self::transpose) twice.
    ///
    /// Each `transpose` swaps H and W, so the pair restores the kernel
    /// layout and the result equals [`convolve`](Self::convolve).
    #[must_use]
    #[track_caller]
    pub fn convolve_transpose(weights: &Self, input: &Self, stride: usize, padding: usize) -> Self {
        Self::convolve(&weights.transpose().transpose(), input, stride, padding)
    }

    /// [`convolve_transpose`](Self::convolve_transpose) written into `dst`.
    #[track_caller]
    pub fn convolve_transpose_into(weights: &Self, input: &Self, stride: usize, padding: usize, dst: &mut Self) {
        Self::convolve_into(&weights.transpose().transpose(), input, stride, padding, dst);
    }

    /// Gradient of a convolution with respect to its input.
    ///
    /// `input_hw` is the `(H, W)` of the forward input; it cannot be
    /// recovered from `grad_output` because of floor division.
    #[must_use]
    #[track_caller]
    pub fn grad_input_convolve(
        weights: &Self,
        grad_output: &Self,
        stride: usize,
        padding: usize,
        input_hw: (usize, usize),
    ) -> Self {
        let mut out = Self::zeros([grad_output.batch(), weights.shape[1], input_hw.0, input_hw.1]);
        Self::grad_input_convolve_into(weights, grad_output, stride, padding, &mut out);
        out
    }

    /// Input gradient scattered into the input-shaped `dst`, which is overwritten.
    ///
    /// Each cell of `grad_output` adds `weight · grad` to every input cell its
    /// kernel window covered; padding positions are skipped.
    #[track_caller]
    pub fn grad_input_convolve_into(weights: &Self, grad_output: &Self, stride: usize, padding: usize, dst: &mut Self) {
        let out_shape = Self::convolve_shape(weights, dst, stride, padding);
        check_shape("grad_input_convolve", &grad_output.shape, &out_shape);

        let [out_c, in_c, kh, kw] = weights.shape;
        let [_, _, h, w] = dst.shape;
        let [_, _, oh, ow] = out_shape;
        let item = in_c * h * w;
        if item == 0 {
            return;
        }
        let (wt, go) = (&weights.data, &grad_output.data);

        dst.data.par_chunks_mut(item).enumerate().for_each(|(n, grad)| {
            grad.fill(0.0);
            let upstream = &go[n * out_c * oh * ow..(n + 1) * out_c * oh * ow];
            for f in 0..out_c {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let g = upstream[(f * oh + oy) * ow + ox];
                        for c in 0..in_c {
                            let kernel = &wt[(f * in_c + c) * kh * kw..(f * in_c + c + 1) * kh * kw];
                            for ky in 0..kh {
                                let Some(y) = source(oy, ky, stride, padding, h) else {
                                    continue;
                                };
                                for kx in 0..kw {
                                    if let Some(x) = source(ox, kx, stride, padding, w) {
                                        grad[(c * h + y) * w + x] += kernel[ky * kw + kx] * g;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });
    }

    /// Gradient of a convolution with respect to its weights.
    #[must_use]
    #[track_caller]
    pub fn grad_weight_convolve(
        input: &Self,
        grad_output: &Self,
        stride: usize,
        padding: usize,
        kernel_hw: (usize, usize),
    ) -> Self {
        let mut out = Self::zeros([grad_output.channels(), input.channels(), kernel_hw.0, kernel_hw.1]);
        Self::grad_weight_convolve_into(input, grad_output, stride, padding, &mut out);
        out
    }

    /// Weight gradient written into the weight-shaped `dst`, which is overwritten.
    ///
    /// Correlates `input` against `grad_output`, summing over the batch.
    /// Filters are processed in parallel.
    #[track_caller]
    pub fn grad_weight_convolve_into(input: &Self, grad_output: &Self, stride: usize, padding: usize, dst: &mut Self) {
        let out_shape = Self::convolve_shape(dst, input, stride, padding);
        check_shape("grad_weight_convolve", &grad_output.shape, &out_shape);

        let [out_c, in_c, kh, kw] = dst.shape;
        let [n_items, _, h, w] = input.shape;
        let [_, _, oh, ow] = out_shape;
        let per_filter = in_c * kh * kw;
        if per_filter == 0 {
            return;
        }
        let (inp, go) = (&input.data, &grad_output.data);

        dst.data.par_chunks_mut(per_filter).enumerate().for_each(|(f, grad)| {
            for c in 0..in_c {
                for ky in 0..kh {
                    for kx in 0..kw {
                        let mut acc = 0.0;
                        for n in 0..n_items {
                            let plane = &inp[((n * in_c + c) * h) * w..((n * in_c + c + 1) * h) * w];
                            let upstream = &go[((n * out_c + f) * oh) * ow..((n * out_c + f + 1) * oh) * ow];
                            for oy in 0..oh {
                                let Some(y) = source(oy, ky, stride, padding, h) else {
                                    continue;
                                };
                                for ox in 0..ow {
                                    if let Some(x) = source(ox, kx, stride, padding, w) {
                                        acc += plane[y * w + x] * upstream[oy * ow + ox];
                                    }
                                }
                            }
                        }
                        grad[(c * kh + ky) * kw + kx] = acc;
                    }
                }
            }
        });
    }
}
