//! Per-scalar update rules and their slice-wide forms.

use std::iter;

use crate::{AdamConfig, Error, NesterovConfig, Result};

/// One Nesterov-momentum step for a single scalar.
///
/// The velocity is updated first, then the parameter moves by the new velocity.
#[inline(always)]
pub fn nesterov_momentum(
    param: &mut f32,
    lr: f32,
    momentum: f32,
    batch_size: usize,
    grad: f32,
    velocity: &mut f32,
) {
    *velocity = momentum * *velocity - lr * grad / batch_size as f32;
    *param += *velocity;
}

/// One Adam step for a single scalar.
///
/// `beta1_t` and `beta2_t` are `beta1^t` and `beta2^t` for the current step `t`.
#[inline(always)]
#[allow(clippy::too_many_arguments)]
pub fn adam_algorithm(
    param: &mut f32,
    moment1: &mut f32,
    moment2: &mut f32,
    grad: f32,
    lr: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    epsilon: f32,
    batch_size: usize,
) {
    let g = grad / batch_size as f32;
    *moment1 = beta1 * *moment1 + (1.0 - beta1) * g;
    *moment2 = beta2 * *moment2 + (1.0 - beta2) * g * g;
    let m_hat = *moment1 / (1.0 - beta1_t);
    let v_hat = *moment2 / (1.0 - beta2_t);
    *param -= lr * m_hat / (v_hat.sqrt() + epsilon);
}

fn check_lens(params: &[f32], grads: &[f32], states: &[&[f32]]) -> Result<()> {
    let n = params.len();
    if grads.len() != n || states.iter().any(|s| s.len() != n) {
        return Err(Error::dimension_mismatch(format!(
            "parameter, gradient and optimizer state buffers differ in length (params: {n})"
        )));
    }
    Ok(())
}

fn check_batch_size(batch_size: usize) -> Result<()> {
    match batch_size {
        0 => Err(Error::config("batch size must be non-zero")),
        _ => Ok(()),
    }
}

/// [`nesterov_momentum`] over a whole buffer.
pub fn nesterov_step(
    params: &mut [f32],
    grads: &[f32],
    velocity: &mut [f32],
    batch_size: usize,
    config: &NesterovConfig,
) -> Result<()> {
    check_lens(params, grads, &[&*velocity])?;
    check_batch_size(batch_size)?;
    let NesterovConfig {
        learning_rate,
        momentum,
    } = *config;
    for ((p, &g), v) in iter::zip(iter::zip(params, grads), velocity) {
        nesterov_momentum(p, learning_rate, momentum, batch_size, g, v);
    }
    Ok(())
}

/// [`adam_algorithm`] over a whole buffer.
pub fn adam_step(
    params: &mut [f32],
    grads: &[f32],
    moment1: &mut [f32],
    moment2: &mut [f32],
    batch_size: usize,
    (beta1_t, beta2_t): (f32, f32),
    config: &AdamConfig,
) -> Result<()> {
    check_lens(params, grads, &[&*moment1, &*moment2])?;
    check_batch_size(batch_size)?;
    if beta1_t >= 1.0 || beta2_t >= 1.0 {
        return Err(Error::config(format!(
            "bias corrections beta1^t = {beta1_t}, beta2^t = {beta2_t} must be below 1"
        )));
    }
    let AdamConfig {
        learning_rate,
        beta1,
        beta2,
        epsilon,
    } = *config;
    let zipped = iter::zip(iter::zip(params, grads), iter::zip(moment1, moment2));
    for ((p, &g), (m1, m2)) in zipped {
        adam_algorithm(
            p,
            m1,
            m2,
            g,
            learning_rate,
            beta1,
            beta2,
            beta1_t,
            beta2_t,
            epsilon,
            batch_size,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn momentum_free_nesterov_is_gradient_descent() {
        let mut param = 1.5;
        let mut velocity = 0.0;
        nesterov_momentum(&mut param, 0.1, 0.0, 4, 2.0, &mut velocity);
        assert!((param - (1.5 - 0.1 * 2.0 / 4.0)).abs() < 1e-7);
        assert!((velocity + 0.05).abs() < 1e-7);
    }

    #[test]
    fn nesterov_velocity_carries_over() {
        let mut param = 0.0;
        let mut velocity = 1.0;
        nesterov_momentum(&mut param, 0.5, 0.9, 1, 1.0, &mut velocity);
        assert!((velocity - 0.4).abs() < 1e-6);
        assert!((param - 0.4).abs() < 1e-6);
    }

    #[test]
    fn first_adam_step_is_lr_sized() {
        let mut param = 0.0f32;
        let (mut m1, mut m2) = (0.0, 0.0);
        let (beta1, beta2) = (0.9f32, 0.999f32);
        adam_algorithm(&mut param, &mut m1, &mut m2, 1.0, 0.1, beta1, beta2, beta1, beta2, 1e-8, 1);
        // m_hat = 1 and v_hat = 1, so the step is lr / (1 + eps).
        assert!((m1 - (1.0 - beta1)).abs() < 1e-7);
        assert!((m2 - (1.0 - beta2)).abs() <= 1e-6 * (1.0 - beta2));
        assert!((param + 0.1 / (1.0 + 1e-8)).abs() < 1e-6);
    }

    #[test]
    fn adam_divides_gradient_by_batch() {
        let mut param = 0.0f32;
        let (mut m1, mut m2) = (0.0, 0.0);
        let (beta1, beta2) = (0.9f32, 0.999f32);
        adam_algorithm(&mut param, &mut m1, &mut m2, 8.0, 0.1, beta1, beta2, beta1, beta2, 1e-8, 4);
        assert!((m1 - 2.0 * (1.0 - beta1)).abs() < 1e-6);
        assert!((m2 - 4.0 * (1.0 - beta2)).abs() <= 1e-6 * 4.0 * (1.0 - beta2));
    }

    #[test]
    fn slice_steps_validate_before_writing() {
        let mut params = vec![1.0; 3];
        let mut velocity = vec![0.0; 2];
        let config = NesterovConfig::default();
        let result = nesterov_step(&mut params, &[1.0; 3], &mut velocity, 1, &config);
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        assert_eq!(params, [1.0; 3]);

        let mut m1 = vec![0.0; 3];
        let mut m2 = vec![0.0; 3];
        let config = AdamConfig::default();
        let result = adam_step(&mut params, &[1.0; 3], &mut m1, &mut m2, 0, (0.9, 0.999), &config);
        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(params, [1.0; 3]);
    }

    #[test]
    fn slice_adam_matches_scalar_rule() {
        let config = AdamConfig::new(0.01);
        let grads = [0.5, -1.0, 2.0];
        let mut params = vec![1.0, 2.0, 3.0];
        let mut m1 = vec![0.0; 3];
        let mut m2 = vec![0.0; 3];
        adam_step(&mut params, &grads, &mut m1, &mut m2, 2, (0.9, 0.999), &config).unwrap();
        for (i, &g) in grads.iter().enumerate() {
            let mut p = (i + 1) as f32;
            let (mut a, mut b) = (0.0, 0.0);
            adam_algorithm(&mut p, &mut a, &mut b, g, 0.01, 0.9, 0.999, 0.9, 0.999, 1e-8, 2);
            assert_eq!(params[i], p);
        }
    }
}
