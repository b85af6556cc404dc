//! Flat-buffer addressing shared by all the numeric routines.
//!
//! A rank-3 tensor `(channels, rows, cols)` lives in one contiguous `[f32]`, element `(c, i, j)`
//! at `c * rows * cols + i * cols + j`. A batch of vectors `(batch, features)` is row-major,
//! element `(b, f)` at `b * features + f`.

use crate::{Error, Result};

/// Shape of a rank-3 tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dims3 {
    pub channels: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Dims3 {
    pub const fn new(channels: usize, rows: usize, cols: usize) -> Self {
        Self {
            channels,
            rows,
            cols,
        }
    }

    /// A single feature map.
    pub const fn plane(rows: usize, cols: usize) -> Self {
        Self::new(1, rows, cols)
    }

    /// Number of elements in one channel.
    pub const fn plane_len(&self) -> usize {
        self.rows * self.cols
    }

    pub const fn len(&self) -> usize {
        self.channels * self.rows * self.cols
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub const fn index(&self, c: usize, i: usize, j: usize) -> usize {
        c * self.rows * self.cols + i * self.cols + j
    }
}

/// A sliding window (convolution kernel or pooling region) and how it moves over its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Window {
    pub rows: usize,
    pub cols: usize,
    pub stride: usize,
    /// Border of the output that is left untouched.
    pub padding: usize,
}

impl Window {
    pub const fn new(rows: usize, cols: usize, stride: usize, padding: usize) -> Self {
        Self {
            rows,
            cols,
            stride,
            padding,
        }
    }

    /// Square window with stride equal to its side, no padding.
    pub const fn square(side: usize) -> Self {
        Self::new(side, side, side, 0)
    }

    pub const fn area(&self) -> usize {
        self.rows * self.cols
    }

    /// Output size `(rows, cols)` of sliding this window over an `input_rows x input_cols` map.
    pub fn output_size(&self, input_rows: usize, input_cols: usize) -> Result<(usize, usize)> {
        Ok((
            output_dim(input_rows, self.rows, self.stride, self.padding)?,
            output_dim(input_cols, self.cols, self.stride, self.padding)?,
        ))
    }

    /// Output shape with the padding border included.
    pub fn output_dims(&self, input: Dims3) -> Result<Dims3> {
        let (rows, cols) = self.output_size(input.rows, input.cols)?;
        Ok(Dims3::plane(rows, cols))
    }
}

/// `(input - kernel) / stride + 1 + 2 * padding`, refusing anything that doesn't land on an
/// integer.
pub fn output_dim(input: usize, kernel: usize, stride: usize, padding: usize) -> Result<usize> {
    if stride == 0 {
        return Err(Error::dimension_mismatch("stride must be non-zero"));
    }
    if kernel == 0 {
        return Err(Error::dimension_mismatch("window must be at least 1x1"));
    }
    let span = input.checked_sub(kernel).ok_or_else(|| {
        Error::dimension_mismatch(format!("window of {kernel} exceeds input of {input}"))
    })?;
    if span % stride != 0 {
        return Err(Error::dimension_mismatch(format!(
            "(input {input} - window {kernel}) is not a multiple of stride {stride}"
        )));
    }
    Ok(span / stride + 1 + 2 * padding)
}
