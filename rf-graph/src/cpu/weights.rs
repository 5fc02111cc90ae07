use ndarray::{Array1, Array2, Array4};
use rand::distributions::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::graph::Graph;
use crate::operator::{BatchNormParams, ConvParams, FullyConnectedParams, OperatorKind};
use crate::plan::ExecutionPlan;

/// How parameters are generated when weights are bound to a graph.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum WeightInit {
    /// Normally distributed filters scaled by `1/sqrt(fan_in)` and randomized batch norm statistics,
    /// drawn from a [StdRng] seeded with `seed`. The same seed always yields the same weights.
    Random { seed: u64 },
    /// Every filter and weight element is set to the given value, biases are zero and batch norms are the identity.
    Constant(f32),
}

impl Default for WeightInit {
    fn default() -> Self {
        WeightInit::Random { seed: 0 }
    }
}

impl WeightInit {
    fn rng(self) -> StdRng {
        match self {
            WeightInit::Random { seed } => StdRng::seed_from_u64(seed),
            WeightInit::Constant(_) => StdRng::seed_from_u64(0),
        }
    }
}

/// Generate the weights of every operator in `graph`, indexed by [OperatorId](crate::operator::OperatorId).
///
/// Operators are visited in plan order, so the result only depends on the graph, the plan and `init`.
pub fn bind_weights(graph: &Graph, plan: &ExecutionPlan, init: WeightInit) -> Vec<OperatorWeights> {
    let mut rng = init.rng();
    let mut weights = vec![OperatorWeights::None; graph.operator_count()];

    for op in plan.iter() {
        weights[op.index()] = OperatorWeights::generate(&graph[op].kind, init, &mut rng);
    }

    weights
}

/// The parameters of a single operator, bound once before execution and read-only afterwards.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorWeights {
    /// Operators without parameters (max pool, add).
    None,
    /// Filter `[Co, Ci, Kh, Kw]` and bias `[Co]`.
    Conv { filter: Array4<f32>, bias: Array1<f32> },
    /// Batch norm folded into a per-channel `x * scale + shift`.
    BatchNorm { scale: Array1<f32>, shift: Array1<f32> },
    /// Weight `[Fo, Fi]` and bias `[Fo]`.
    FullyConnected { weight: Array2<f32>, bias: Array1<f32> },
}

impl OperatorWeights {
    /// Generate weights for an operator of the given kind.
    ///
    /// `rng` is shared across all operators of a graph so generation order matters,
    /// callers should bind weights in plan order.
    pub fn generate(kind: &OperatorKind, init: WeightInit, rng: &mut StdRng) -> Self {
        match *kind {
            OperatorKind::Conv(params) => conv_weights(params, init, rng),
            OperatorKind::BatchNorm(params) => batch_norm_weights(params, init, rng),
            OperatorKind::FullyConnected(params) => fully_connected_weights(params, init, rng),
            OperatorKind::MaxPool(_) | OperatorKind::Add => OperatorWeights::None,
        }
    }

    /// The number of scalar parameters.
    pub fn len(&self) -> usize {
        match self {
            OperatorWeights::None => 0,
            OperatorWeights::Conv { filter, bias } => filter.len() + bias.len(),
            OperatorWeights::BatchNorm { scale, shift } => scale.len() + shift.len(),
            OperatorWeights::FullyConnected { weight, bias } => weight.len() + bias.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn conv_weights(params: ConvParams, init: WeightInit, rng: &mut StdRng) -> OperatorWeights {
    let ConvParams {
        input_channels,
        output_channels,
        kernel_h,
        kernel_w,
        ..
    } = params;
    let filter_shape = (output_channels, input_channels, kernel_h, kernel_w);

    match init {
        WeightInit::Random { .. } => {
            let fan_in = input_channels * kernel_h * kernel_w;
            let dist = scaled_normal(fan_in);
            OperatorWeights::Conv {
                filter: Array4::from_shape_simple_fn(filter_shape, || rng.sample(dist)),
                bias: Array1::from_shape_simple_fn(output_channels, || rng.sample(dist)),
            }
        }
        WeightInit::Constant(value) => OperatorWeights::Conv {
            filter: Array4::from_elem(filter_shape, value),
            bias: Array1::zeros(output_channels),
        },
    }
}

fn batch_norm_weights(params: BatchNormParams, init: WeightInit, rng: &mut StdRng) -> OperatorWeights {
    let channels = params.channels;

    match init {
        WeightInit::Random { .. } => {
            let around_one = Uniform::new(0.5f32, 1.5);
            let around_zero = Uniform::new(-0.1f32, 0.1);

            let gamma = Array1::from_shape_simple_fn(channels, || rng.sample(around_one));
            let beta = Array1::from_shape_simple_fn(channels, || rng.sample(around_zero));
            let mean = Array1::from_shape_simple_fn(channels, || rng.sample(around_zero));
            let var = Array1::from_shape_simple_fn(channels, || rng.sample(around_one));

            let (scale, shift) = fold_batch_norm(&gamma, &beta, &mean, &var, params.eps.into_inner());
            OperatorWeights::BatchNorm { scale, shift }
        }
        WeightInit::Constant(_) => OperatorWeights::BatchNorm {
            scale: Array1::ones(channels),
            shift: Array1::zeros(channels),
        },
    }
}

fn fully_connected_weights(params: FullyConnectedParams, init: WeightInit, rng: &mut StdRng) -> OperatorWeights {
    let FullyConnectedParams {
        input_features,
        output_features,
    } = params;
    let weight_shape = (output_features, input_features);

    match init {
        WeightInit::Random { .. } => {
            let dist = scaled_normal(input_features);
            OperatorWeights::FullyConnected {
                weight: Array2::from_shape_simple_fn(weight_shape, || rng.sample(dist)),
                bias: Array1::from_shape_simple_fn(output_features, || rng.sample(dist)),
            }
        }
        WeightInit::Constant(value) => OperatorWeights::FullyConnected {
            weight: Array2::from_elem(weight_shape, value),
            bias: Array1::zeros(output_features),
        },
    }
}

/// `N(0, 1/fan_in)`, which keeps the activation variance roughly constant through linear layers.
fn scaled_normal(fan_in: usize) -> Normal<f32> {
    let std = 1.0 / (fan_in.max(1) as f32).sqrt();
    // std is finite and positive for any fan_in >= 1
    Normal::new(0.0, std).expect("Normal std must be finite")
}

/// Fold frozen batch norm statistics into a per-channel affine transform:
/// `gamma * (x - mean) / sqrt(var + eps) + beta == x * scale + shift`.
pub fn fold_batch_norm(
    gamma: &Array1<f32>,
    beta: &Array1<f32>,
    mean: &Array1<f32>,
    var: &Array1<f32>,
    eps: f32,
) -> (Array1<f32>, Array1<f32>) {
    let scale = gamma / &var.mapv(|v| (v + eps).sqrt());
    let shift = beta - &(mean * &scale);
    (scale, shift)
}
