//! L2 penalty and dropout.

use std::iter;

use rand::Rng;

use crate::{Error, Result, core::aggregation::dot, error::check_len};

/// Adds the gradient of `lambda / (2 * n_weights) * sum(w^2)` to `weights_error`.
///
/// `n_weights` is the number of penalized weights in the whole network, not just in `weights`.
pub fn ridge_regression(
    weights_error: &mut [f32],
    weights: &[f32],
    lambda: f32,
    n_weights: usize,
) -> Result<()> {
    check_len("weights_error", weights_error, weights.len())?;
    if n_weights == 0 {
        return Err(Error::config("L2 penalty over zero weights"));
    }
    let factor = lambda / n_weights as f32;
    for (dw, &w) in iter::zip(weights_error, weights) {
        *dw += factor * w;
    }
    Ok(())
}

/// Fills `mask` with ones, then drops each entry to zero with probability `threshold`.
pub fn set_dropout_mask<R: Rng + ?Sized>(
    mask: &mut [f32],
    threshold: f32,
    rng: &mut R,
) -> Result<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::config(format!(
            "dropout threshold {threshold} is outside [0, 1]"
        )));
    }
    for m in mask {
        *m = match rng.random::<f32>() < threshold {
            true => 0.0,
            false => 1.0,
        };
    }
    Ok(())
}

/// `output = mask * input`. Used both ways: on activations going forward and on errors going back.
pub fn apply_dropout(mask: &[f32], input: &[f32], output: &mut [f32]) -> Result<()> {
    dot(mask, input, output)
}
