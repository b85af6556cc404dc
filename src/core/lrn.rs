//! Local response normalization across channels at a fixed spatial position.
//!
//! For the element at channel `t`, the window covers channels `t - n/2 ..= t + n/2` clamped to
//! the tensor depth, and
//!
//! ```text
//! D = k + alpha * sum_{c in window} x_c^2
//! y_t = x_t / D^beta
//! ```

use std::ops::RangeInclusive;

use crate::{
    Dims3, Error, LrnConfig, Result,
    error::check_len,
};

/// A `(channel, row, col)` coordinate.
pub type Position = (usize, usize, usize);

fn channel_window(t: usize, depth: usize, config: &LrnConfig) -> RangeInclusive<usize> {
    let half = config.half_width();
    t.saturating_sub(half)..=(t + half).min(depth - 1)
}

/// `D` for the element at `(t, i, j)`.
fn denominator_base(tensor: &[f32], dims: Dims3, (t, i, j): Position, config: &LrnConfig) -> f32 {
    let sum_sq: f32 = channel_window(t, dims.channels, config)
        .map(|c| tensor[dims.index(c, i, j)].powi(2))
        .sum();
    config.k + config.alpha * sum_sq
}

fn check_position(dims: Dims3, (c, i, j): Position) -> Result<()> {
    if c < dims.channels && i < dims.rows && j < dims.cols {
        Ok(())
    } else {
        Err(Error::dimension_mismatch(format!(
            "position ({c}, {i}, {j}) is outside a tensor of {dims:?}"
        )))
    }
}

fn forward_unchecked(
    tensor: &[f32],
    output: &mut [f32],
    dims: Dims3,
    position: Position,
    config: &LrnConfig,
) {
    let (t, i, j) = position;
    let x = dims.index(t, i, j);
    let d = denominator_base(tensor, dims, position, config);
    output[x] = tensor[x] / d.powf(config.beta);
}

fn backward_unchecked(
    tensor: &[f32],
    tensor_error: &mut [f32],
    output_error: &[f32],
    dims: Dims3,
    position: Position,
    config: &LrnConfig,
) {
    let (t, i, j) = position;
    let x_t_index = dims.index(t, i, j);
    let x_t = tensor[x_t_index];
    let e = output_error[x_t_index];
    let d = denominator_base(tensor, dims, position, config);
    let d_beta = d.powf(config.beta);
    let d_beta_1 = d.powf(config.beta + 1.0);
    let two_alpha_beta = 2.0 * config.beta * config.alpha;
    for c in channel_window(t, dims.channels, config) {
        let x_c_index = dims.index(c, i, j);
        let x_c = tensor[x_c_index];
        let dy_dx = match c == t {
            true => 1.0 / d_beta - two_alpha_beta * x_t * x_t / d_beta_1,
            false => -two_alpha_beta * x_c * x_t / d_beta_1,
        };
        tensor_error[x_c_index] += e * dy_dx;
    }
}

/// Normalizes the single element at `position`, writing it into `output`.
pub fn feed_forward_at(
    tensor: &[f32],
    output: &mut [f32],
    dims: Dims3,
    position: Position,
    config: &LrnConfig,
) -> Result<()> {
    config.validate()?;
    check_len("tensor", tensor, dims.len())?;
    check_len("output", output, dims.len())?;
    check_position(dims, position)?;
    forward_unchecked(tensor, output, dims, position, config);
    Ok(())
}

/// Distributes `output_error` at `position` over every channel of its window, accumulating into
/// `tensor_error`.
pub fn back_propagate_at(
    tensor: &[f32],
    tensor_error: &mut [f32],
    output_error: &[f32],
    dims: Dims3,
    position: Position,
    config: &LrnConfig,
) -> Result<()> {
    config.validate()?;
    check_len("tensor", tensor, dims.len())?;
    check_len("tensor_error", tensor_error, dims.len())?;
    check_len("output_error", output_error, dims.len())?;
    check_position(dims, position)?;
    backward_unchecked(tensor, tensor_error, output_error, dims, position, config);
    Ok(())
}

fn positions(dims: Dims3) -> impl Iterator<Item = Position> {
    (0..dims.channels)
        .flat_map(move |c| (0..dims.rows).flat_map(move |i| (0..dims.cols).map(move |j| (c, i, j))))
}

/// Normalizes every element of `tensor` into `output`.
pub fn feed_forward(
    tensor: &[f32],
    output: &mut [f32],
    dims: Dims3,
    config: &LrnConfig,
) -> Result<()> {
    config.validate()?;
    check_len("tensor", tensor, dims.len())?;
    check_len("output", output, dims.len())?;
    for position in positions(dims) {
        forward_unchecked(tensor, output, dims, position, config);
    }
    Ok(())
}

/// Back-propagates a full `output_error` tensor, accumulating into `tensor_error`.
pub fn back_propagate(
    tensor: &[f32],
    tensor_error: &mut [f32],
    output_error: &[f32],
    dims: Dims3,
    config: &LrnConfig,
) -> Result<()> {
    config.validate()?;
    check_len("tensor", tensor, dims.len())?;
    check_len("tensor_error", tensor_error, dims.len())?;
    check_len("output_error", output_error, dims.len())?;
    for position in positions(dims) {
        backward_unchecked(tensor, tensor_error, output_error, dims, position, config);
    }
    Ok(())
}
