use derive_more::{Display, Error};

/// Errors raised by the numeric routines.
///
/// All of them are raised before any output buffer is written, so a failed call leaves every
/// buffer exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum Error {
    /// Shapes, strides, paddings or buffer lengths that don't fit together.
    #[display("dimension mismatch: {reason}")]
    DimensionMismatch { reason: String },
    /// Hyperparameters that can't be used, e.g. a dataset that the mini-batch size doesn't divide.
    #[display("configuration error: {reason}")]
    Config { reason: String },
    /// A required participant is missing, e.g. aggregating over zero replicas.
    #[display("missing argument: {what}")]
    NullArgument { what: &'static str },
}

impl Error {
    pub(crate) fn dimension_mismatch(reason: impl Into<String>) -> Self {
        Self::DimensionMismatch {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fails with `DimensionMismatch` unless `buffer` has exactly `expected` elements.
#[track_caller]
pub(crate) fn check_len(name: &str, buffer: &[f32], expected: usize) -> Result<()> {
    if buffer.len() == expected {
        Ok(())
    } else {
        Err(Error::dimension_mismatch(format!(
            "`{name}` has {} elements, expected {expected}",
            buffer.len()
        )))
    }
}
