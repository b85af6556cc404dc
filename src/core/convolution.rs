//! Forward and backward passes of a 2D convolution over a multi-channel input.
//!
//! A kernel has shape `(input.channels, window.rows, window.cols)` and produces one output
//! feature map of `window.output_size(input.rows, input.cols)`. Only the interior
//! `[padding, out - padding)` of the output is written, always with `+=`.

use crate::{
    Dims3, Error, Result, Window,
    error::check_len,
};

#[derive(Debug, Clone, Copy)]
struct Geometry {
    input: Dims3,
    window: Window,
    out_rows: usize,
    out_cols: usize,
}

impl Geometry {
    fn new(input: Dims3, window: Window) -> Result<Self> {
        if input.channels == 0 {
            return Err(Error::dimension_mismatch("convolution input has no channels"));
        }
        let (out_rows, out_cols) = window.output_size(input.rows, input.cols)?;
        Ok(Self {
            input,
            window,
            out_rows,
            out_cols,
        })
    }

    fn kernel_len(&self) -> usize {
        self.input.channels * self.window.area()
    }

    fn output_len(&self) -> usize {
        self.out_rows * self.out_cols
    }

    /// Every written output cell, with the top-left input coordinate of its receptive field.
    fn cells(&self) -> impl Iterator<Item = (usize, usize, usize)> + use<> {
        let Self {
            window,
            out_rows,
            out_cols,
            ..
        } = *self;
        let p = window.padding;
        (p..out_rows - p).flat_map(move |oi| {
            (p..out_cols - p).map(move |oj| {
                (
                    oi * out_cols + oj,
                    (oi - p) * window.stride,
                    (oj - p) * window.stride,
                )
            })
        })
    }
}

/// Convolves one kernel over `input` and adds the result (plus `bias`) into `output`.
///
/// Returns the output shape. Zero `output` beforehand for a fresh result.
pub fn feed_forward(
    input: &[f32],
    input_dims: Dims3,
    kernel: &[f32],
    window: Window,
    bias: f32,
    output: &mut [f32],
) -> Result<Dims3> {
    let geometry = Geometry::new(input_dims, window)?;
    check_len("input", input, input_dims.len())?;
    check_len("kernel", kernel, geometry.kernel_len())?;
    check_len("output", output, geometry.output_len())?;
    forward_unchecked(&geometry, input, kernel, bias, output);
    Ok(Dims3::plane(geometry.out_rows, geometry.out_cols))
}

fn forward_unchecked(
    geometry: &Geometry,
    input: &[f32],
    kernel: &[f32],
    bias: f32,
    output: &mut [f32],
) {
    let Geometry { input: dims, window, .. } = *geometry;
    for (o, r0, c0) in geometry.cells() {
        let mut z = 0.0f32;
        for c in 0..dims.channels {
            for i in 0..window.rows {
                let k_row = (c * window.rows + i) * window.cols;
                let x_row = dims.index(c, r0 + i, c0);
                for j in 0..window.cols {
                    z += kernel[k_row + j] * input[x_row + j];
                }
            }
        }
        output[o] += z + bias;
    }
}

/// Back-propagates `output_error` through one kernel.
///
/// `input_error`, `kernel_error` and `bias_error` are accumulated into, never overwritten.
#[allow(clippy::too_many_arguments)]
pub fn back_propagate(
    input: &[f32],
    input_dims: Dims3,
    kernel: &[f32],
    window: Window,
    output_error: &[f32],
    input_error: &mut [f32],
    kernel_error: &mut [f32],
    bias_error: &mut f32,
) -> Result<()> {
    let geometry = Geometry::new(input_dims, window)?;
    check_len("input", input, input_dims.len())?;
    check_len("kernel", kernel, geometry.kernel_len())?;
    check_len("output_error", output_error, geometry.output_len())?;
    check_len("input_error", input_error, input_dims.len())?;
    check_len("kernel_error", kernel_error, geometry.kernel_len())?;
    backward_unchecked(
        &geometry,
        input,
        kernel,
        output_error,
        input_error,
        kernel_error,
        bias_error,
    );
    Ok(())
}

fn backward_unchecked(
    geometry: &Geometry,
    input: &[f32],
    kernel: &[f32],
    output_error: &[f32],
    input_error: &mut [f32],
    kernel_error: &mut [f32],
    bias_error: &mut f32,
) {
    let Geometry { input: dims, window, .. } = *geometry;
    for (o, r0, c0) in geometry.cells() {
        let e = output_error[o];
        for c in 0..dims.channels {
            for i in 0..window.rows {
                let k_row = (c * window.rows + i) * window.cols;
                let x_row = dims.index(c, r0 + i, c0);
                for j in 0..window.cols {
                    kernel_error[k_row + j] += e * input[x_row + j];
                    // Scatter-add: overlapping windows hit the same input cell.
                    input_error[x_row + j] += kernel[k_row + j] * e;
                }
            }
        }
        *bias_error += e;
    }
}

/// A bank of `n_kernels` kernels applied to the same input.
///
/// `kernels` is `(n_kernels, channels, rows, cols)`, `biases` has one entry per kernel and
/// `output` is `(n_kernels, out_rows, out_cols)`.
pub fn bank_feed_forward(
    input: &[f32],
    input_dims: Dims3,
    kernels: &[f32],
    biases: &[f32],
    window: Window,
    output: &mut [f32],
) -> Result<Dims3> {
    let geometry = Geometry::new(input_dims, window)?;
    let n_kernels = biases.len();
    check_len("input", input, input_dims.len())?;
    check_len("kernels", kernels, n_kernels * geometry.kernel_len())?;
    check_len("output", output, n_kernels * geometry.output_len())?;
    if n_kernels == 0 {
        return Err(Error::dimension_mismatch("a kernel bank needs at least one kernel"));
    }
    let kernel_chunks = kernels.chunks_exact(geometry.kernel_len());
    let output_chunks = output.chunks_exact_mut(geometry.output_len());
    for ((kernel, &bias), output) in kernel_chunks.zip(biases).zip(output_chunks) {
        forward_unchecked(&geometry, input, kernel, bias, output);
    }
    Ok(Dims3::new(n_kernels, geometry.out_rows, geometry.out_cols))
}

/// Back-propagation through a whole kernel bank; see [`bank_feed_forward`] for the layouts.
#[allow(clippy::too_many_arguments)]
pub fn bank_back_propagate(
    input: &[f32],
    input_dims: Dims3,
    kernels: &[f32],
    window: Window,
    output_error: &[f32],
    input_error: &mut [f32],
    kernels_error: &mut [f32],
    biases_error: &mut [f32],
) -> Result<()> {
    let geometry = Geometry::new(input_dims, window)?;
    let n_kernels = biases_error.len();
    check_len("input", input, input_dims.len())?;
    check_len("kernels", kernels, n_kernels * geometry.kernel_len())?;
    check_len("output_error", output_error, n_kernels * geometry.output_len())?;
    check_len("input_error", input_error, input_dims.len())?;
    check_len("kernels_error", kernels_error, n_kernels * geometry.kernel_len())?;
    let per_kernel = kernels
        .chunks_exact(geometry.kernel_len())
        .zip(kernels_error.chunks_exact_mut(geometry.kernel_len()))
        .zip(output_error.chunks_exact(geometry.output_len()))
        .zip(biases_error.iter_mut());
    for (((kernel, kernel_error), output_error), bias_error) in per_kernel {
        backward_unchecked(
            &geometry,
            input,
            kernel,
            output_error,
            input_error,
            kernel_error,
            bias_error,
        );
    }
    Ok(())
}
