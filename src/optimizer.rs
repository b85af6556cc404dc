//! Optimizer steps over a whole [`Trainable`].

use crate::{
    AdamConfig, Error, NesterovConfig, Result, Trainable, TrainingBuffers,
    core::{ParamKind, Segment, adam_step, nesterov_step, ridge_regression},
};

/// Updates the parameters of a model from its accumulated gradients.
pub trait Optimizer {
    /// `batch_size` is the number of samples the gradients were summed over.
    fn step<T: Trainable + ?Sized>(&mut self, model: &mut T, batch_size: usize) -> Result<()>;
}

fn check_layouts(buffers: &TrainingBuffers) -> Result<()> {
    let params = &*buffers.params;
    let consistent = params.same_layout(&*buffers.derivs)
        && params.same_layout(&*buffers.first_moment)
        && params.same_layout(&*buffers.second_moment);
    match consistent {
        true => Ok(()),
        false => Err(Error::dimension_mismatch(
            "parameters, gradients and optimizer state have different layouts",
        )),
    }
}

fn divisor(kind: ParamKind, batch_size: usize) -> usize {
    match kind.uses_batch_divisor() {
        true => batch_size,
        false => 1,
    }
}

fn warn_if_not_finite(derivs: &[f32]) {
    let n_bad = derivs.iter().filter(|d| !d.is_finite()).count();
    if n_bad != 0 {
        tracing::warn!(n_bad, "non-finite gradients reached the optimizer");
    }
}

/// Everything a built-in optimizer checks before it writes.
pub(crate) fn validate(buffers: &TrainingBuffers, batch_size: usize) -> Result<()> {
    check_layouts(buffers)?;
    if batch_size == 0 {
        return Err(Error::config("batch size must be non-zero"));
    }
    Ok(())
}

fn prepare<'a>(buffers: &TrainingBuffers<'a>, batch_size: usize) -> Result<Vec<Segment>> {
    validate(buffers, batch_size)?;
    warn_if_not_finite(buffers.derivs.as_slice());
    Ok(buffers.params.segments().collect())
}

/// Nesterov momentum, velocity kept in the first-moment buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nesterov {
    config: NesterovConfig,
}

impl Nesterov {
    pub fn new(config: NesterovConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &NesterovConfig {
        &self.config
    }
}

impl Optimizer for Nesterov {
    fn step<T: Trainable + ?Sized>(&mut self, model: &mut T, batch_size: usize) -> Result<()> {
        let buffers = model.buffers_mut();
        let segments = prepare(&buffers, batch_size)?;
        let TrainingBuffers {
            params,
            derivs,
            first_moment,
            ..
        } = buffers;
        for Segment { layer, kind, range } in segments {
            tracing::trace!(layer, ?kind, n = range.len(), "nesterov update");
            nesterov_step(
                &mut params.as_mut_slice()[range.clone()],
                &derivs.as_slice()[range.clone()],
                &mut first_moment.as_mut_slice()[range],
                divisor(kind, batch_size),
                &self.config,
            )?;
        }
        tracing::debug!(batch_size, lr = self.config.learning_rate, "nesterov step");
        Ok(())
    }
}

/// Adam, tracking the step count for bias correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adam {
    config: AdamConfig,
    t: i32,
}

impl Adam {
    pub fn new(config: AdamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, t: 0 })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Steps taken so far.
    pub fn t(&self) -> i32 {
        self.t
    }

    /// `(beta1^t, beta2^t)` for step `t`.
    pub fn bias_corrections(&self, t: i32) -> (f32, f32) {
        (self.config.beta1.powi(t), self.config.beta2.powi(t))
    }
}

impl Optimizer for Adam {
    fn step<T: Trainable + ?Sized>(&mut self, model: &mut T, batch_size: usize) -> Result<()> {
        let buffers = model.buffers_mut();
        let segments = prepare(&buffers, batch_size)?;
        let t = self.t.checked_add(1).ok_or_else(|| Error::config("Adam step count overflowed"))?;
        let corrections = self.bias_corrections(t);
        let TrainingBuffers {
            params,
            derivs,
            first_moment,
            second_moment,
        } = buffers;
        for Segment { layer, kind, range } in segments {
            tracing::trace!(layer, ?kind, n = range.len(), "adam update");
            adam_step(
                &mut params.as_mut_slice()[range.clone()],
                &derivs.as_slice()[range.clone()],
                &mut first_moment.as_mut_slice()[range.clone()],
                &mut second_moment.as_mut_slice()[range],
                divisor(kind, batch_size),
                corrections,
                &self.config,
            )?;
        }
        self.t = t;
        tracing::debug!(t, batch_size, lr = self.config.learning_rate, "adam step");
        Ok(())
    }
}

/// Adds the L2 penalty gradient to every kernel and fully-connected weight.
pub fn add_l2<T: Trainable + ?Sized>(model: &mut T, lambda: f32) -> Result<()> {
    if !lambda.is_finite() || lambda < 0.0 {
        return Err(Error::config(format!("L2 lambda {lambda} must be non-negative")));
    }
    let TrainingBuffers { params, derivs, .. } = model.buffers_mut();
    if !params.same_layout(&*derivs) {
        return Err(Error::dimension_mismatch(
            "parameters and gradients have different layouts",
        ));
    }
    let n_weights = params.count(ParamKind::Weights);
    for segment in params.segments().filter(|segment| segment.kind.is_penalized()) {
        ridge_regression(
            &mut derivs.as_mut_slice()[segment.range.clone()],
            &params.as_slice()[segment.range],
            lambda,
            n_weights,
        )?;
    }
    tracing::debug!(lambda, n_weights, "L2 penalty added");
    Ok(())
}
