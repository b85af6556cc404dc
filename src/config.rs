//! Hyperparameters, passed explicitly to every routine that needs them.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<()> {
    match condition {
        true => Ok(()),
        false => Err(Error::config(reason())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NesterovConfig {
    pub learning_rate: f32,
    pub momentum: f32,
}

impl Default for NesterovConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.9,
        }
    }
}

impl NesterovConfig {
    pub fn new(learning_rate: f32, momentum: f32) -> Self {
        Self {
            learning_rate,
            momentum,
        }
    }

    pub fn with_learning_rate(self, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    pub fn with_momentum(self, momentum: f32) -> Self {
        Self { momentum, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.learning_rate.is_finite(), || {
            format!("learning rate {} is not finite", self.learning_rate)
        })?;
        ensure((0.0..1.0).contains(&self.momentum), || {
            format!("momentum {} is outside [0, 1)", self.momentum)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdamConfig {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl AdamConfig {
    pub const DEFAULT_BETA1: f32 = 0.9;
    pub const DEFAULT_BETA2: f32 = 0.999;
    pub const DEFAULT_EPSILON: f32 = 1e-8;

    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..Self::default()
        }
    }

    pub fn with_learning_rate(self, learning_rate: f32) -> Self {
        Self {
            learning_rate,
            ..self
        }
    }

    pub fn with_betas(self, beta1: f32, beta2: f32) -> Self {
        Self {
            beta1,
            beta2,
            ..self
        }
    }

    pub fn with_epsilon(self, epsilon: f32) -> Self {
        Self { epsilon, ..self }
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.learning_rate.is_finite(), || {
            format!("learning rate {} is not finite", self.learning_rate)
        })?;
        ensure((0.0..1.0).contains(&self.beta1), || {
            format!("beta1 {} is outside [0, 1)", self.beta1)
        })?;
        ensure((0.0..1.0).contains(&self.beta2), || {
            format!("beta2 {} is outside [0, 1)", self.beta2)
        })?;
        ensure(self.epsilon > 0.0 && self.epsilon.is_finite(), || {
            format!("epsilon {} must be positive", self.epsilon)
        })
    }
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            beta1: Self::DEFAULT_BETA1,
            beta2: Self::DEFAULT_BETA2,
            epsilon: Self::DEFAULT_EPSILON,
        }
    }
}

/// Local response normalization.
///
/// `y = x / (k + alpha * sum(x_c^2))^beta`, the sum running over `n` neighbouring channels.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LrnConfig {
    /// Width of the channel window.
    pub n: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
}

impl Default for LrnConfig {
    fn default() -> Self {
        Self {
            n: 5,
            alpha: 1e-4,
            beta: 0.75,
            k: 2.0,
        }
    }
}

impl LrnConfig {
    pub fn with_n(self, n: usize) -> Self {
        Self { n, ..self }
    }

    pub fn with_alpha(self, alpha: f32) -> Self {
        Self { alpha, ..self }
    }

    pub fn with_beta(self, beta: f32) -> Self {
        Self { beta, ..self }
    }

    pub fn with_k(self, k: f32) -> Self {
        Self { k, ..self }
    }

    /// Channels on either side of the centre.
    pub fn half_width(&self) -> usize {
        self.n / 2
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.n > 0, || "LRN window must cover at least one channel".into())?;
        ensure(self.k > 0.0 && self.alpha >= 0.0, || {
            format!(
                "LRN needs k > 0 and alpha >= 0, got k = {}, alpha = {}",
                self.k, self.alpha
            )
        })?;
        ensure(self.beta.is_finite(), || {
            format!("LRN beta {} is not finite", self.beta)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatchNormConfig {
    pub epsilon: f32,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self { epsilon: 1e-5 }
    }
}

impl BatchNormConfig {
    pub fn with_epsilon(self, epsilon: f32) -> Self {
        Self { epsilon }
    }

    pub fn validate(&self) -> Result<()> {
        ensure(self.epsilon > 0.0 && self.epsilon.is_finite(), || {
            format!("batch norm epsilon {} must be positive", self.epsilon)
        })
    }
}
