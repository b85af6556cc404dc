//! Fully-connected layer, `z = W * a + b`.
//!
//! `W` is row-major `(n_outputs, n_inputs)`.

use faer::{Accum, linalg::matmul::matmul, prelude::*};

use crate::{Error, Result, error::check_len};

fn check_weights(weights: &[f32], n_outputs: usize, n_inputs: usize) -> Result<()> {
    if n_outputs == 0 || n_inputs == 0 {
        return Err(Error::dimension_mismatch(format!(
            "fully-connected layer of {n_inputs} -> {n_outputs} is empty"
        )));
    }
    check_len("weights", weights, n_outputs * n_inputs)
}

/// Overwrites `output` with `W * input + b`.
pub fn feed_forward(
    weights: &[f32],
    biases: &[f32],
    input: &[f32],
    output: &mut [f32],
) -> Result<()> {
    let (n_outputs, n_inputs) = (biases.len(), input.len());
    check_weights(weights, n_outputs, n_inputs)?;
    check_len("output", output, n_outputs)?;
    let w = MatRef::from_row_major_slice(weights, n_outputs, n_inputs);
    let a = ColRef::from_slice(input);
    let mut z = ColMut::from_slice_mut(output);
    // z = W * a
    matmul(z.rb_mut(), Accum::Replace, w, a, 1.0, Par::Seq);
    // z += b
    for k in 0..n_outputs {
        z[k] += biases[k];
    }
    Ok(())
}

/// Accumulates `dL/dW`, `dL/db` and `dL/da` for one sample.
pub fn back_propagate(
    weights: &[f32],
    input: &[f32],
    output_error: &[f32],
    weights_error: &mut [f32],
    biases_error: &mut [f32],
    input_error: &mut [f32],
) -> Result<()> {
    let (n_outputs, n_inputs) = (output_error.len(), input.len());
    check_weights(weights, n_outputs, n_inputs)?;
    check_len("weights_error", weights_error, weights.len())?;
    check_len("biases_error", biases_error, n_outputs)?;
    check_len("input_error", input_error, n_inputs)?;
    let w = MatRef::from_row_major_slice(weights, n_outputs, n_inputs);
    let mut dw = MatMut::from_row_major_slice_mut(weights_error, n_outputs, n_inputs);
    for k in 0..n_outputs {
        let e = output_error[k];
        biases_error[k] += e;
        for g in 0..n_inputs {
            dw[(k, g)] += e * input[g];
        }
    }
    // da += W^T * e
    matmul(
        ColMut::from_slice_mut(input_error),
        Accum::Add,
        w.transpose(),
        ColRef::from_slice(output_error),
        1.0,
        Par::Seq,
    );
    Ok(())
}
