use rand::{Rng, distr::uniform::SampleRange};

use crate::{
    Dims3, Error, Result, Window,
    core::{BatchNormState, ParamBuffer, ParamKind, param_buffer},
};

/// Shape and kind of one trainable layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LayerDescription {
    /// `n_kernels` kernels of shape `(input.channels, window.rows, window.cols)`, one bias each.
    Convolutional {
        input: Dims3,
        n_kernels: usize,
        window: Window,
    },
    FullyConnected {
        n_inputs: usize,
        n_outputs: usize,
    },
    BatchNormalized {
        n_features: usize,
    },
}

impl LayerDescription {
    pub fn convolutional(input: Dims3, n_kernels: usize, window: Window) -> Self {
        Self::Convolutional {
            input,
            n_kernels,
            window,
        }
    }

    pub fn fully_connected(n_inputs: usize, n_outputs: usize) -> Self {
        Self::FullyConnected {
            n_inputs,
            n_outputs,
        }
    }

    pub fn batch_normalized(n_features: usize) -> Self {
        Self::BatchNormalized { n_features }
    }

    /// Kinds of the two parameter runs of this layer, in buffer order.
    pub fn param_kinds(&self) -> [ParamKind; 2] {
        match self {
            Self::Convolutional { .. } | Self::FullyConnected { .. } => {
                [ParamKind::Weights, ParamKind::Biases]
            }
            Self::BatchNormalized { .. } => [ParamKind::Gamma, ParamKind::Beta],
        }
    }

    /// Length of the first parameter run (kernels, weights or gamma).
    pub fn n_weights(&self) -> usize {
        match *self {
            Self::Convolutional {
                input,
                n_kernels,
                window,
            } => n_kernels * input.channels * window.area(),
            Self::FullyConnected {
                n_inputs,
                n_outputs,
            } => n_inputs * n_outputs,
            Self::BatchNormalized { n_features } => n_features,
        }
    }

    /// Length of the second parameter run (biases or beta).
    pub fn n_biases(&self) -> usize {
        match *self {
            Self::Convolutional { n_kernels, .. } => n_kernels,
            Self::FullyConnected { n_outputs, .. } => n_outputs,
            Self::BatchNormalized { n_features } => n_features,
        }
    }

    /// Inputs feeding one output unit.
    pub fn fan_in(&self) -> usize {
        match *self {
            Self::Convolutional { input, window, .. } => input.channels * window.area(),
            Self::FullyConnected { n_inputs, .. } => n_inputs,
            Self::BatchNormalized { .. } => 1,
        }
    }

    pub fn output_dims(&self) -> Result<Dims3> {
        match *self {
            Self::Convolutional {
                input,
                n_kernels,
                window,
            } => {
                let (rows, cols) = window.output_size(input.rows, input.cols)?;
                Ok(Dims3::new(n_kernels, rows, cols))
            }
            Self::FullyConnected { n_outputs, .. } => Ok(Dims3::new(1, 1, n_outputs)),
            Self::BatchNormalized { n_features } => Ok(Dims3::new(1, 1, n_features)),
        }
    }

    fn validate(&self) -> Result<()> {
        let dims = self.output_dims()?;
        if self.n_weights() == 0 || dims.is_empty() {
            return Err(Error::dimension_mismatch(format!("layer {self:?} has no parameters")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    layer_descriptions: Vec<LayerDescription>,
}

impl Topology {
    pub fn new(layer_descriptions: Vec<LayerDescription>) -> Result<Self> {
        if layer_descriptions.is_empty() {
            return Err(Error::config("a topology needs at least one layer"));
        }
        for layer in &layer_descriptions {
            layer.validate()?;
        }
        Ok(Self { layer_descriptions })
    }

    pub fn layer_descriptions(&self) -> &[LayerDescription] {
        &self.layer_descriptions
    }

    pub fn n_layers(&self) -> usize {
        self.layer_descriptions().len()
    }
}

/// Disjoint mutable borrows of everything an optimizer step touches.
///
/// All four buffers share one layout.
#[derive(Debug)]
pub struct TrainingBuffers<'a> {
    pub params: &'a mut ParamBuffer,
    pub derivs: &'a mut ParamBuffer,
    /// Velocity for Nesterov, first moment for Adam.
    pub first_moment: &'a mut ParamBuffer,
    /// Second moment for Adam, unused by Nesterov.
    pub second_moment: &'a mut ParamBuffer,
}

/// A set of trainable parameters with gradients and optimizer state in matching layouts.
///
/// The optimizers and the gradient aggregation are written once against this trait.
pub trait Trainable {
    fn params(&self) -> &ParamBuffer;

    fn derivs(&self) -> &ParamBuffer;

    fn buffers_mut(&mut self) -> TrainingBuffers<'_>;

    fn derivs_mut(&mut self) -> &mut ParamBuffer {
        self.buffers_mut().derivs
    }

    /// Zero the gradients before a fresh backward sweep.
    fn clear_derivs(&mut self) {
        self.derivs_mut().clear();
    }
}

#[derive(Debug, Clone)]
pub struct Network {
    topology: Topology,
    params: ParamBuffer,
    derivs: ParamBuffer,
    first_moment: ParamBuffer,
    second_moment: ParamBuffer,
    batch_norm: Vec<Option<BatchNormState>>,
}

impl Network {
    pub fn new(topology: Topology) -> Self {
        let params = ParamBuffer::create(&topology);
        let batch_norm = topology
            .layer_descriptions()
            .iter()
            .map(|layer| match *layer {
                LayerDescription::BatchNormalized { n_features } => {
                    Some(BatchNormState::new(n_features))
                }
                _ => None,
            })
            .collect();
        let mut network = Self {
            derivs: params.clone(),
            first_moment: params.clone(),
            second_moment: params.clone(),
            params,
            topology,
            batch_norm,
        };
        network.reset_gammas();
        network
    }

    /// A network with the same parameters and fresh gradients and optimizer state, to compute
    /// gradients on a shard of the data.
    pub fn replicate(&self) -> Self {
        let mut replica = Self::new(self.topology.clone());
        replica
            .params
            .as_mut_slice()
            .copy_from_slice(self.params.as_slice());
        replica
    }

    fn reset_gammas(&mut self) {
        for i in 0..self.params.n_layers() {
            if let Some(param_buffer::LayerMut::BatchNormalized { gamma, .. }) =
                self.params.layer_mut(i)
            {
                gamma.fill(1.0);
            }
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn n_layers(&self) -> usize {
        self.topology.n_layers()
    }

    pub fn params_as_slice(&self) -> &[f32] {
        self.params.as_slice()
    }

    pub fn params_as_mut_slice(&mut self) -> &mut [f32] {
        self.params.as_mut_slice()
    }

    /// Uniform randomization of every parameter.
    pub fn randomize_params(&mut self, range: impl SampleRange<f32> + Clone) {
        self.params.randomize(range);
    }

    pub fn init_he<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.params.init_he(rng)
    }

    pub fn init_xavier<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.params.init_xavier(rng)
    }

    pub fn params_layer(&self, index: usize) -> Option<param_buffer::LayerRef<'_>> {
        self.params.layer(index)
    }

    pub fn params_layer_mut(&mut self, index: usize) -> Option<param_buffer::LayerMut<'_>> {
        self.params.layer_mut(index)
    }

    pub fn derivs_layer(&self, index: usize) -> Option<param_buffer::LayerRef<'_>> {
        self.derivs.layer(index)
    }

    pub fn derivs_layer_mut(&mut self, index: usize) -> Option<param_buffer::LayerMut<'_>> {
        self.derivs.layer_mut(index)
    }

    /// Parameters of layer `index` together with its gradient buffers, for a backward pass.
    pub fn layer_with_derivs_mut(
        &mut self,
        index: usize,
    ) -> Option<(param_buffer::LayerRef<'_>, param_buffer::LayerMut<'_>)> {
        Some((self.params.layer(index)?, self.derivs.layer_mut(index)?))
    }

    /// Running statistics of a batch-normalized layer.
    pub fn batch_norm_state(&self, index: usize) -> Option<&BatchNormState> {
        self.batch_norm.get(index)?.as_ref()
    }

    pub fn batch_norm_state_mut(&mut self, index: usize) -> Option<&mut BatchNormState> {
        self.batch_norm.get_mut(index)?.as_mut()
    }

    /// Forget the optimizer state, e.g. after reinitializing the parameters.
    pub fn reset_optimizer_state(&mut self) {
        self.first_moment.clear();
        self.second_moment.clear();
    }
}

impl Trainable for Network {
    fn params(&self) -> &ParamBuffer {
        &self.params
    }

    fn derivs(&self) -> &ParamBuffer {
        &self.derivs
    }

    fn buffers_mut(&mut self) -> TrainingBuffers<'_> {
        TrainingBuffers {
            params: &mut self.params,
            derivs: &mut self.derivs,
            first_moment: &mut self.first_moment,
            second_moment: &mut self.second_moment,
        }
    }
}
