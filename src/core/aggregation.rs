//! Element-wise helpers over flat gradient buffers.

use std::iter;

use crate::{Error, Result};

fn check_same_len(a: &[f32], b: &[f32]) -> Result<()> {
    match a.len() == b.len() {
        true => Ok(()),
        false => Err(Error::dimension_mismatch(format!(
            "buffers of {} and {} elements can't be combined element-wise",
            a.len(),
            b.len()
        ))),
    }
}

/// `c = a + b`.
pub fn sum_into(a: &[f32], b: &[f32], c: &mut [f32]) -> Result<()> {
    check_same_len(a, b)?;
    check_same_len(a, c)?;
    for ((c, &a), &b) in iter::zip(iter::zip(c, a), b) {
        *c = a + b;
    }
    Ok(())
}

/// `acc += other`.
pub fn add_assign(acc: &mut [f32], other: &[f32]) -> Result<()> {
    check_same_len(acc, other)?;
    for (acc, &x) in iter::zip(acc, other) {
        *acc += x;
    }
    Ok(())
}

/// `output = input * value`.
pub fn scale_into(input: &[f32], value: f32, output: &mut [f32]) -> Result<()> {
    check_same_len(input, output)?;
    for (y, &x) in iter::zip(output, input) {
        *y = x * value;
    }
    Ok(())
}

/// Element-wise product, `output = a * b`.
pub fn dot(a: &[f32], b: &[f32], output: &mut [f32]) -> Result<()> {
    check_same_len(a, b)?;
    check_same_len(a, output)?;
    for ((y, &a), &b) in iter::zip(iter::zip(output, a), b) {
        *y = a * b;
    }
    Ok(())
}
