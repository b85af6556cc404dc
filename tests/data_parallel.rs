use llab::{
    Adam, AdamConfig, Dims3, Error, Gym, LayerDescription, Nesterov, NesterovConfig, Network,
    Optimizer, Topology, Trainable, TrainingBuffers, Window,
    core::{
        ParamBuffer, aggregation, dense,
        param_buffer::{LayerMut, LayerRef},
    },
    output_dim, sum_replica_gradients,
};
use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

type Sample = (Vec<f32>, Vec<f32>);

const N_INPUTS: usize = 3;
const N_OUTPUTS: usize = 2;

fn network() -> Network {
    let topology =
        Topology::new(vec![LayerDescription::fully_connected(N_INPUTS, N_OUTPUTS)]).unwrap();
    let mut nn = Network::new(topology);
    nn.init_xavier(&mut StdRng::seed_from_u64(11)).unwrap();
    nn
}

fn samples(n: usize) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(12);
    (0..n)
        .map(|_| {
            let x = (0..N_INPUTS).map(|_| rng.random_range(-1.0f32..1.0)).collect();
            let y = (0..N_OUTPUTS).map(|_| rng.random_range(-1.0f32..1.0)).collect();
            (x, y)
        })
        .collect()
}

/// Accumulates the squared-error gradients of `samples` into `nn`, returns the loss.
fn backward(nn: &mut Network, samples: &[Sample]) -> llab::Result<f32> {
    let Some((
        LayerRef::FullyConnected {
            weights, biases, ..
        },
        LayerMut::FullyConnected {
            weights: weights_error,
            biases: biases_error,
            ..
        },
    )) = nn.layer_with_derivs_mut(0)
    else {
        panic!("expected a fully-connected layer");
    };
    let mut output = vec![0.0; N_OUTPUTS];
    let mut input_error = vec![0.0; N_INPUTS];
    let mut loss = 0.0;
    for (x, y) in samples {
        dense::feed_forward(weights, biases, x, &mut output)?;
        let error: Vec<f32> = output.iter().zip(y).map(|(o, y)| o - y).collect();
        loss += error.iter().map(|e| 0.5 * e * e).sum::<f32>();
        dense::back_propagate(weights, x, &error, weights_error, biases_error, &mut input_error)?;
    }
    Ok(loss)
}

fn assert_close(a: &[f32], b: &[f32]) {
    assert_eq!(a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        assert!((x - y).abs() < 1e-5, "[{i}]: {x} vs {y}");
    }
}

#[test]
fn data_parallel_step_matches_serial_step() {
    let samples = samples(12);
    let config = NesterovConfig::new(0.1, 0.9);

    let mut serial = network();
    let mut serial_optimizer = Nesterov::new(config).unwrap();
    let mut parallel = network();
    let mut parallel_optimizer = Nesterov::new(config).unwrap();

    for _ in 0..3 {
        serial.clear_derivs();
        let serial_loss = backward(&mut serial, &samples).unwrap();
        serial_optimizer.step(&mut serial, samples.len()).unwrap();

        let mut gym = Gym::new(&mut parallel, 4).unwrap();
        let shards: Vec<&[Sample]> = samples.chunks(3).collect();
        let parallel_loss = gym
            .step(&mut parallel_optimizer, samples.len(), |i, replica| {
                backward(replica, shards[i])
            })
            .unwrap();
        assert!((serial_loss - parallel_loss).abs() < 1e-4);
        assert_close(serial.derivs().as_slice(), parallel.derivs().as_slice());
        assert_close(serial.params_as_slice(), parallel.params_as_slice());
    }
}

#[test]
fn failing_replica_leaves_master_untouched() {
    let mut master = network();
    let before = master.params_as_slice().to_vec();
    let mut optimizer = Adam::new(AdamConfig::new(0.01)).unwrap();
    let mut gym = Gym::new(&mut master, 2).unwrap();
    let result = gym.step(&mut optimizer, 2, |i, replica| match i {
        0 => backward(replica, &samples(1)),
        _ => Err(Error::Config {
            reason: "shard unavailable".into(),
        }),
    });
    assert!(matches!(result, Err(Error::Config { .. })));
    assert_eq!(optimizer.t(), 0);
    assert_eq!(master.params_as_slice(), &before[..]);
}

/// A bare parameter set, to check that the training algorithms only need [`Trainable`].
#[derive(Clone)]
struct Flat {
    params: ParamBuffer,
    derivs: ParamBuffer,
    first_moment: ParamBuffer,
    second_moment: ParamBuffer,
}

impl Flat {
    fn new(topology: &Topology) -> Self {
        let params = ParamBuffer::create(topology);
        Self {
            derivs: params.clone(),
            first_moment: params.clone(),
            second_moment: params.clone(),
            params,
        }
    }
}

impl Trainable for Flat {
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

#[test]
fn algorithms_are_generic_over_trainable() {
    let topology = Topology::new(vec![
        LayerDescription::convolutional(Dims3::new(1, 4, 4), 2, Window::square(2)),
        LayerDescription::batch_normalized(8),
    ])
    .unwrap();
    let replicas: Vec<Flat> = (1..=3)
        .map(|k| {
            let mut replica = Flat::new(&topology);
            replica.derivs_mut().as_mut_slice().fill(k as f32);
            replica
        })
        .collect();
    let mut master = Network::new(topology.clone());
    sum_replica_gradients(&replicas, &mut master).unwrap();
    assert!(master.derivs().as_slice().iter().all(|&d| d == 6.0));

    let mut flat = Flat::new(&topology);
    sum_replica_gradients(&replicas, &mut flat).unwrap();
    let mut optimizer = Adam::new(AdamConfig::new(0.1)).unwrap();
    optimizer.step(&mut flat, 3).unwrap();
    assert!(flat.params().as_slice().iter().all(|&p| (p + 0.1).abs() < 1e-5));
}

#[test]
fn zero_gradient_replicas_sum_to_zero() {
    let replicas: Vec<Network> = (0..5).map(|_| network()).collect();
    let mut master = network();
    master.derivs_mut().as_mut_slice().fill(7.0);
    sum_replica_gradients(&replicas, &mut master).unwrap();
    assert!(master.derivs().as_slice().iter().all(|&d| d == 0.0));
}

fn integral_vec(len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec((-1000i32..1000).prop_map(|x| x as f32), len)
}

proptest! {
    #[test]
    fn gradient_sum_is_commutative(
        (a, b) in (1usize..64).prop_flat_map(|n| (integral_vec(n), integral_vec(n)))
    ) {
        let mut ab = vec![0.0; a.len()];
        let mut ba = vec![0.0; a.len()];
        aggregation::sum_into(&a, &b, &mut ab).unwrap();
        aggregation::sum_into(&b, &a, &mut ba).unwrap();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn gradient_sum_is_associative(
        (a, b, c) in (1usize..64)
            .prop_flat_map(|n| (integral_vec(n), integral_vec(n), integral_vec(n)))
    ) {
        let n = a.len();
        let (mut ab, mut ab_c) = (vec![0.0; n], vec![0.0; n]);
        aggregation::sum_into(&a, &b, &mut ab).unwrap();
        aggregation::sum_into(&ab, &c, &mut ab_c).unwrap();
        let (mut bc, mut a_bc) = (vec![0.0; n], vec![0.0; n]);
        aggregation::sum_into(&b, &c, &mut bc).unwrap();
        aggregation::sum_into(&a, &bc, &mut a_bc).unwrap();
        prop_assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn output_size_law(
        input in 1usize..48,
        kernel in 1usize..48,
        stride in 0usize..6,
        padding in 0usize..4,
    ) {
        let result = output_dim(input, kernel, stride, padding);
        if stride != 0 && kernel <= input && (input - kernel) % stride == 0 {
            prop_assert_eq!(result, Ok((input - kernel) / stride + 1 + 2 * padding));
        } else {
            prop_assert!(
                matches!(result, Err(Error::DimensionMismatch { .. })),
                "expected a dimension mismatch, got {:?}",
                result
            );
        }
    }
}
