//! Batch normalization over a mini-batch of vectors, per feature.
//!
//! Batches are flat row-major `(batch_size, vector_dim)` buffers.

use faer::prelude::*;
use rand::{Rng, seq::SliceRandom};

use crate::{
    BatchNormConfig, Error, Result,
    core::aggregation::add_assign,
    error::check_len,
};

/// Non-learned state of a batch-normalized layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormState {
    /// Mean of the last mini-batch fed forward.
    pub mean: Box<[f32]>,
    /// Biased variance of the last mini-batch fed forward.
    pub var: Box<[f32]>,
    /// Population estimates for inference, set by [`final_mean_variance`].
    pub final_mean: Box<[f32]>,
    pub final_var: Box<[f32]>,
}

impl BatchNormState {
    pub fn new(vector_dim: usize) -> Self {
        Self {
            mean: bytemuck::zeroed_slice_box(vector_dim),
            var: bytemuck::zeroed_slice_box(vector_dim),
            final_mean: bytemuck::zeroed_slice_box(vector_dim),
            final_var: bytemuck::zeroed_slice_box(vector_dim),
        }
    }

    pub fn vector_dim(&self) -> usize {
        self.mean.len()
    }

    /// Zero the per-batch statistics.
    pub fn reset(&mut self) {
        bytemuck::fill_zeroes(&mut self.mean);
        bytemuck::fill_zeroes(&mut self.var);
    }
}

fn check_batch(batch_size: usize, vector_dim: usize) -> Result<()> {
    if batch_size == 0 || vector_dim == 0 {
        return Err(Error::dimension_mismatch(format!(
            "batch of {batch_size} vectors of {vector_dim} features is empty"
        )));
    }
    Ok(())
}

/// Normalizes `inputs` with the statistics of this batch, then scales by `gamma` and shifts by
/// `beta`.
///
/// `state.mean`/`state.var` are overwritten with the batch statistics and `normalized` keeps
/// `(x - mean) / sqrt(var + epsilon)` for [`back_propagate`].
#[allow(clippy::too_many_arguments)]
pub fn feed_forward(
    batch_size: usize,
    inputs: &[f32],
    normalized: &mut [f32],
    gamma: &[f32],
    beta: &[f32],
    state: &mut BatchNormState,
    outputs: &mut [f32],
    config: &BatchNormConfig,
) -> Result<()> {
    config.validate()?;
    let dim = state.vector_dim();
    check_batch(batch_size, dim)?;
    check_len("inputs", inputs, batch_size * dim)?;
    check_len("normalized", normalized, batch_size * dim)?;
    check_len("outputs", outputs, batch_size * dim)?;
    check_len("gamma", gamma, dim)?;
    check_len("beta", beta, dim)?;

    let x = MatRef::from_row_major_slice(inputs, batch_size, dim);
    let mut x_hat = MatMut::from_row_major_slice_mut(normalized, batch_size, dim);
    let mut y = MatMut::from_row_major_slice_mut(outputs, batch_size, dim);
    let n = batch_size as f32;
    for f in 0..dim {
        let mean = (0..batch_size).map(|b| x[(b, f)]).sum::<f32>() / n;
        let var = (0..batch_size).map(|b| (x[(b, f)] - mean).powi(2)).sum::<f32>() / n;
        let std = (var + config.epsilon).sqrt();
        for b in 0..batch_size {
            x_hat[(b, f)] = (x[(b, f)] - mean) / std;
            y[(b, f)] = x_hat[(b, f)] * gamma[f] + beta[f];
        }
        state.mean[f] = mean;
        state.var[f] = var;
    }
    Ok(())
}

/// Back-propagates `outputs_error` through the last [`feed_forward`].
///
/// `gamma_error`, `beta_error` and `input_error` are accumulated into. The input gradient is
/// the full Jacobian contracted with `outputs_error`:
///
/// ```text
/// dx_b = gamma / (N * sqrt(var + eps)) * (N * dy_b - sum(dy) - x_hat_b * sum(dy * x_hat))
/// ```
#[allow(clippy::too_many_arguments)]
pub fn back_propagate(
    batch_size: usize,
    normalized: &[f32],
    gamma: &[f32],
    state: &BatchNormState,
    outputs_error: &[f32],
    gamma_error: &mut [f32],
    beta_error: &mut [f32],
    input_error: &mut [f32],
    config: &BatchNormConfig,
) -> Result<()> {
    config.validate()?;
    let dim = state.vector_dim();
    check_batch(batch_size, dim)?;
    check_len("normalized", normalized, batch_size * dim)?;
    check_len("outputs_error", outputs_error, batch_size * dim)?;
    check_len("input_error", input_error, batch_size * dim)?;
    check_len("gamma", gamma, dim)?;
    check_len("gamma_error", gamma_error, dim)?;
    check_len("beta_error", beta_error, dim)?;

    let x_hat = MatRef::from_row_major_slice(normalized, batch_size, dim);
    let dy = MatRef::from_row_major_slice(outputs_error, batch_size, dim);
    let mut dx = MatMut::from_row_major_slice_mut(input_error, batch_size, dim);
    let n = batch_size as f32;
    for f in 0..dim {
        let sum_dy: f32 = (0..batch_size).map(|b| dy[(b, f)]).sum();
        let sum_dy_x_hat: f32 = (0..batch_size).map(|b| dy[(b, f)] * x_hat[(b, f)]).sum();
        gamma_error[f] += sum_dy_x_hat;
        beta_error[f] += sum_dy;
        let scale = gamma[f] / (n * (state.var[f] + config.epsilon).sqrt());
        for b in 0..batch_size {
            dx[(b, f)] += scale * (n * dy[(b, f)] - sum_dy - x_hat[(b, f)] * sum_dy_x_hat);
        }
    }
    Ok(())
}

/// Normalizes with the population estimates in `state.final_mean`/`state.final_var`.
pub fn inference(
    batch_size: usize,
    inputs: &[f32],
    gamma: &[f32],
    beta: &[f32],
    state: &BatchNormState,
    outputs: &mut [f32],
    config: &BatchNormConfig,
) -> Result<()> {
    config.validate()?;
    let dim = state.vector_dim();
    check_batch(batch_size, dim)?;
    check_len("inputs", inputs, batch_size * dim)?;
    check_len("outputs", outputs, batch_size * dim)?;
    check_len("gamma", gamma, dim)?;
    check_len("beta", beta, dim)?;
    let x = MatRef::from_row_major_slice(inputs, batch_size, dim);
    let mut y = MatMut::from_row_major_slice_mut(outputs, batch_size, dim);
    for f in 0..dim {
        let std = (state.final_var[f] + config.epsilon).sqrt();
        for b in 0..batch_size {
            y[(b, f)] = (x[(b, f)] - state.final_mean[f]) / std * gamma[f] + beta[f];
        }
    }
    Ok(())
}

/// Estimates the population mean and variance once training is over.
///
/// `inputs` holds every training vector that reaches this layer, `n_vectors` rows of
/// `state.vector_dim()`. The rows are shuffled into mini-batches of `mini_batch_size`, the batch
/// statistics averaged, and the variance scaled by `m / (m - 1)`.
#[allow(clippy::too_many_arguments)]
pub fn final_mean_variance<R: Rng + ?Sized>(
    inputs: &[f32],
    n_vectors: usize,
    mini_batch_size: usize,
    gamma: &[f32],
    beta: &[f32],
    state: &mut BatchNormState,
    config: &BatchNormConfig,
    rng: &mut R,
) -> Result<()> {
    config.validate()?;
    let dim = state.vector_dim();
    if mini_batch_size < 2 {
        return Err(Error::config(format!(
            "mini-batch size {mini_batch_size} leaves no degrees of freedom for the variance"
        )));
    }
    if n_vectors == 0 || n_vectors % mini_batch_size != 0 {
        return Err(Error::config(format!(
            "mini-batch size {mini_batch_size} doesn't divide {n_vectors} vectors"
        )));
    }
    check_batch(mini_batch_size, dim)?;
    check_len("inputs", inputs, n_vectors * dim)?;
    check_len("gamma", gamma, dim)?;
    check_len("beta", beta, dim)?;

    let mut order: Vec<usize> = (0..n_vectors).collect();
    order.shuffle(rng);

    let batch_len = mini_batch_size * dim;
    let mut batch = vec![0.0f32; batch_len];
    let mut normalized = vec![0.0f32; batch_len];
    let mut outputs = vec![0.0f32; batch_len];
    let mut mean_sum = vec![0.0f32; dim];
    let mut var_sum = vec![0.0f32; dim];
    for rows in order.chunks_exact(mini_batch_size) {
        for (dst, &row) in batch.chunks_exact_mut(dim).zip(rows) {
            dst.copy_from_slice(&inputs[row * dim..(row + 1) * dim]);
        }
        state.reset();
        feed_forward(
            mini_batch_size,
            &batch,
            &mut normalized,
            gamma,
            beta,
            state,
            &mut outputs,
            config,
        )?;
        add_assign(&mut mean_sum, &state.mean)?;
        add_assign(&mut var_sum, &state.var)?;
    }

    let n_batches = (n_vectors / mini_batch_size) as f32;
    let m = mini_batch_size as f32;
    for f in 0..dim {
        state.final_mean[f] = mean_sum[f] / n_batches;
        state.final_var[f] = m / (m - 1.0) * var_sum[f] / n_batches;
    }
    tracing::debug!(
        n_vectors,
        mini_batch_size,
        vector_dim = dim,
        "finalized batch-norm mean and variance"
    );
    Ok(())
}
