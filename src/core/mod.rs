//! Core parts of the algorithms without abstraction.

pub mod aggregation;
pub mod batch_norm;
pub mod convolution;
pub mod dense;
pub mod lrn;
pub mod param_buffer;
pub mod pooling;

mod optimizer;
mod regularization;

pub use batch_norm::BatchNormState;
pub use param_buffer::{ParamBuffer, ParamKind, Segment};

pub use optimizer::*;
pub use regularization::*;
