pub use faer;

pub mod core;

mod config;
mod error;
mod gym;
mod nn;
mod optimizer;
mod shape;

pub use config::*;
pub use error::{Error, Result};
pub use gym::*;
pub use nn::*;
pub use optimizer::*;
pub use shape::*;
