use std::ops::Range;

use rand::{Rng, distr::uniform::SampleRange, rngs::ThreadRng};
use rand_distr::Normal;

use crate::{Dims3, Error, LayerDescription, Result, Topology};

/// What a run of floats in a [`ParamBuffer`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParamKind {
    /// Convolution kernels or fully-connected weights.
    Weights,
    Biases,
    /// Batch-norm scale.
    Gamma,
    /// Batch-norm shift.
    Beta,
}

impl ParamKind {
    /// Whether the L2 penalty applies.
    pub fn is_penalized(self) -> bool {
        matches!(self, Self::Weights)
    }

    /// Whether the optimizer divides the gradient by the mini-batch size.
    ///
    /// Batch-norm `gamma` and `beta` take their summed gradient as is.
    pub fn uses_batch_divisor(self) -> bool {
        matches!(self, Self::Weights | Self::Biases)
    }
}

/// One contiguous run of same-kind parameters of one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub layer: usize,
    pub kind: ParamKind,
    pub range: Range<usize>,
}

#[derive(Debug, Clone, Copy)]
struct LayerLayout {
    description: LayerDescription,
    offset: usize,
    n_first: usize,
    n_second: usize,
}

impl LayerLayout {
    fn first(&self) -> Range<usize> {
        self.offset..self.offset + self.n_first
    }

    fn second(&self) -> Range<usize> {
        let start = self.offset + self.n_first;
        start..start + self.n_second
    }
}

/// Immutable view of a layer.
#[derive(Debug, Clone, Copy)]
pub enum LayerRef<'a> {
    Convolutional {
        /// Shape of one kernel.
        kernel_dims: Dims3,
        /// `n_kernels` kernels back to back.
        kernels: &'a [f32],
        biases: &'a [f32],
    },
    FullyConnected {
        n_inputs: usize,
        n_outputs: usize,
        /// Row-major `(n_outputs, n_inputs)`.
        weights: &'a [f32],
        biases: &'a [f32],
    },
    BatchNormalized {
        gamma: &'a [f32],
        beta: &'a [f32],
    },
}

/// Mutable view of a layer.
#[derive(Debug)]
pub enum LayerMut<'a> {
    Convolutional {
        kernel_dims: Dims3,
        kernels: &'a mut [f32],
        biases: &'a mut [f32],
    },
    FullyConnected {
        n_inputs: usize,
        n_outputs: usize,
        weights: &'a mut [f32],
        biases: &'a mut [f32],
    },
    BatchNormalized {
        gamma: &'a mut [f32],
        beta: &'a mut [f32],
    },
}

/// All parameters of a network in one flat buffer.
///
/// Gradients and optimizer state are kept in buffers created from the same topology, so the
/// update rules can walk the flat slices in lockstep.
#[derive(Debug, Clone)]
pub struct ParamBuffer {
    layers: Box<[LayerLayout]>,
    buffer: Box<[f32]>,
}

impl ParamBuffer {
    /// A zeroed buffer laid out for `topology`.
    pub fn create(topology: &Topology) -> Self {
        let mut offset = 0usize;
        let layers: Box<[LayerLayout]> = topology
            .layer_descriptions()
            .iter()
            .map(|&description| {
                let layout = LayerLayout {
                    description,
                    offset,
                    n_first: description.n_weights(),
                    n_second: description.n_biases(),
                };
                offset += layout.n_first + layout.n_second;
                layout
            })
            .collect();
        let buffer: Box<[f32]> = bytemuck::zeroed_slice_box(offset);
        Self { layers, buffer }
    }

    /// Whether `self` and `other` can be walked in lockstep.
    pub fn same_layout(&self, other: &Self) -> bool {
        self.buffer.len() == other.buffer.len()
            && self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.description == b.description)
    }

    pub fn clear(&mut self) {
        bytemuck::fill_zeroes(&mut self.buffer);
    }

    pub fn randomize(&mut self, range: impl SampleRange<f32> + Clone) {
        let mut rng = ThreadRng::default();
        self.randomize_with(&mut rng, range);
    }

    pub fn randomize_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        range: impl SampleRange<f32> + Clone,
    ) {
        for p in self.as_mut_slice() {
            *p = rng.random_range(range.clone());
        }
    }

    /// He initialization: weights from `N(0, 2 / fan_in)`, biases and `beta` zero, `gamma` one.
    pub fn init_he<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.init_gaussian(rng, 2.0)
    }

    /// Xavier initialization: weights from `N(0, 1 / fan_in)`, otherwise as [`Self::init_he`].
    pub fn init_xavier<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.init_gaussian(rng, 1.0)
    }

    fn init_gaussian<R: Rng + ?Sized>(&mut self, rng: &mut R, gain: f32) -> Result<()> {
        let distributions = self
            .layers
            .iter()
            .map(|layout| {
                let std = (gain / layout.description.fan_in() as f32).sqrt();
                Normal::new(0.0f32, std).map_err(|e| Error::config(format!("{e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let segments: Vec<Segment> = self.segments().collect();
        for segment in segments {
            let values = &mut self.buffer[segment.range];
            match segment.kind {
                ParamKind::Weights => {
                    let normal = &distributions[segment.layer];
                    values.iter_mut().for_each(|w| *w = rng.sample(normal));
                }
                ParamKind::Biases | ParamKind::Beta => values.fill(0.0),
                ParamKind::Gamma => values.fill(1.0),
            }
        }
        Ok(())
    }

    /// Every parameter, in layer order.
    pub fn as_slice(&self) -> &[f32] {
        &self.buffer
    }

    /// Flat mutable view, for the slice-wide update rules in [`crate::core`].
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of layers in the neural network.
    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Every run of parameters, in buffer order.
    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        self.layers.iter().enumerate().flat_map(|(layer, layout)| {
            let [first, second] = layout.description.param_kinds();
            [
                Segment {
                    layer,
                    kind: first,
                    range: layout.first(),
                },
                Segment {
                    layer,
                    kind: second,
                    range: layout.second(),
                },
            ]
        })
    }

    /// Number of parameters of `kind` across all layers.
    pub fn count(&self, kind: ParamKind) -> usize {
        self.segments()
            .filter(|segment| segment.kind == kind)
            .map(|segment| segment.range.len())
            .sum()
    }

    /// Get a immutable view of a layer.
    /// Returns `None` if `index` is out of range.
    pub fn layer(&self, index: usize) -> Option<LayerRef<'_>> {
        let layout = self.layers.get(index)?;
        let first = &self.buffer[layout.first()];
        let second = &self.buffer[layout.second()];
        Some(match layout.description {
            LayerDescription::Convolutional { input, window, .. } => LayerRef::Convolutional {
                kernel_dims: Dims3::new(input.channels, window.rows, window.cols),
                kernels: first,
                biases: second,
            },
            LayerDescription::FullyConnected {
                n_inputs,
                n_outputs,
            } => LayerRef::FullyConnected {
                n_inputs,
                n_outputs,
                weights: first,
                biases: second,
            },
            LayerDescription::BatchNormalized { .. } => LayerRef::BatchNormalized {
                gamma: first,
                beta: second,
            },
        })
    }

    /// Get a mutable view of a layer.
    /// Returns `None` if `index` is out of range.
    pub fn layer_mut(&mut self, index: usize) -> Option<LayerMut<'_>> {
        let layout = *self.layers.get(index)?;
        let end = layout.offset + layout.n_first + layout.n_second;
        let layer = &mut self.buffer[layout.offset..end];
        let (first, second) = layer.split_at_mut(layout.n_first);
        Some(match layout.description {
            LayerDescription::Convolutional { input, window, .. } => LayerMut::Convolutional {
                kernel_dims: Dims3::new(input.channels, window.rows, window.cols),
                kernels: first,
                biases: second,
            },
            LayerDescription::FullyConnected {
                n_inputs,
                n_outputs,
            } => LayerMut::FullyConnected {
                n_inputs,
                n_outputs,
                weights: first,
                biases: second,
            },
            LayerDescription::BatchNormalized { .. } => LayerMut::BatchNormalized {
                gamma: first,
                beta: second,
            },
        })
    }
}
