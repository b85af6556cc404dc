use rayon::prelude::*;

use crate::{
    Error, Optimizer, Result, Trainable,
    core::{ParamBuffer, aggregation},
    optimizer,
};

fn check_layout(a: &ParamBuffer, b: &ParamBuffer) -> Result<()> {
    match a.same_layout(b) {
        true => Ok(()),
        false => Err(Error::dimension_mismatch(
            "gradient buffers of different topologies can't be combined",
        )),
    }
}

/// `out = a + b` over whole gradient buffers.
///
/// No averaging: scale by the replica count afterwards if the mean is wanted.
pub fn sum_gradients(a: &ParamBuffer, b: &ParamBuffer, out: &mut ParamBuffer) -> Result<()> {
    check_layout(a, b)?;
    check_layout(a, out)?;
    aggregation::sum_into(a.as_slice(), b.as_slice(), out.as_mut_slice())
}

/// Adds the gradients of `other` into those of `acc`.
pub fn accumulate_gradients<T, U>(acc: &mut T, other: &U) -> Result<()>
where
    T: Trainable + ?Sized,
    U: Trainable + ?Sized,
{
    let derivs = acc.derivs_mut();
    check_layout(derivs, other.derivs())?;
    aggregation::add_assign(derivs.as_mut_slice(), other.derivs().as_slice())
}

/// Overwrites the gradients of `out` with the sum of the gradients of every replica.
pub fn sum_replica_gradients<T, M>(replicas: &[T], out: &mut M) -> Result<()>
where
    T: Trainable,
    M: Trainable + ?Sized,
{
    let Some((first, rest)) = replicas.split_first() else {
        return Err(Error::NullArgument { what: "replicas" });
    };
    for replica in replicas {
        check_layout(out.derivs(), replica.derivs())?;
    }
    let derivs = out.derivs_mut();
    derivs.as_mut_slice().copy_from_slice(first.derivs().as_slice());
    for replica in rest {
        aggregation::add_assign(derivs.as_mut_slice(), replica.derivs().as_slice())?;
    }
    tracing::debug!(n_replicas = replicas.len(), "summed replica gradients");
    Ok(())
}

/// Data-parallel training: one master model and replicas that compute gradients on their own
/// shard of the data.
pub struct Gym<'a, T: Trainable> {
    master: &'a mut T,
    replicas: Vec<T>,
}

impl<'a, T> Gym<'a, T>
where
    T: Trainable + Clone + Send,
{
    pub fn new(master: &'a mut T, n_replicas: usize) -> Result<Self> {
        if n_replicas == 0 {
            return Err(Error::NullArgument { what: "replicas" });
        }
        let replicas = vec![master.clone(); n_replicas];
        Ok(Self { master, replicas })
    }

    pub fn n_replicas(&self) -> usize {
        self.replicas.len()
    }

    pub fn master(&self) -> &T {
        self.master
    }

    pub fn replicas(&self) -> &[T] {
        &self.replicas
    }

    fn sync_replicas(&mut self) {
        let params = self.master.params().as_slice();
        for replica in &mut self.replicas {
            replica.buffers_mut().params.as_mut_slice().copy_from_slice(params);
            replica.clear_derivs();
        }
    }

    /// One training step.
    ///
    /// Every replica gets the master's parameters and zeroed gradients, then `backward(i, replica)`
    /// runs for all replicas in parallel and accumulates gradients into `replica`. Once all of
    /// them are done the gradients are summed into the master and `optimizer` takes a single step
    /// with `batch_size`, the number of samples across all shards.
    ///
    /// Nothing is touched unless `batch_size` is non-zero and the layouts agree. The master is
    /// only written once every replica succeeded.
    ///
    /// Returns the sum of the losses reported by `backward`.
    pub fn step<O, F>(&mut self, optimizer: &mut O, batch_size: usize, backward: F) -> Result<f32>
    where
        O: Optimizer,
        F: Fn(usize, &mut T) -> Result<f32> + Sync,
    {
        optimizer::validate(&self.master.buffers_mut(), batch_size)?;
        for replica in &self.replicas {
            check_layout(self.master.params(), replica.params())?;
        }
        self.sync_replicas();
        let losses = self
            .replicas
            .par_iter_mut()
            .enumerate()
            .map(|(i, replica)| backward(i, replica))
            .collect::<Result<Vec<f32>>>()?;
        sum_replica_gradients(&self.replicas, &mut *self.master)?;
        optimizer.step(&mut *self.master, batch_size)?;
        let loss: f32 = losses.iter().sum();
        tracing::debug!(n_replicas = self.replicas.len(), batch_size, loss, "data-parallel step");
        Ok(loss)
    }
}
