use ndarray::{ArrayD, Ix1, Ix3};

use crate::operator::OperatorKind;

pub use weights::{bind_weights, fold_batch_norm, OperatorWeights, WeightInit};

pub mod kernels;
mod weights;

/// Storage for a single tensor. The shape always matches the tensor declaration in the graph.
pub type Tensor = ArrayD<f32>;

/// Run a single operator on already populated inputs, fully overwriting `output`.
///
/// This is the hot path and is infallible: input and output shapes were checked when the operator was configured,
/// and the weights were generated for this exact operator. Any mismatch here is a bug in the caller.
pub fn run_operator(kind: &OperatorKind, weights: &OperatorWeights, inputs: &[&Tensor], output: &mut Tensor) {
    let output = output.view_mut();

    match (*kind, weights) {
        (OperatorKind::Conv(params), OperatorWeights::Conv { filter, bias }) => {
            kernels::conv(
                params,
                view_3(inputs[0]),
                filter.view(),
                bias.view(),
                output.into_dimensionality::<Ix3>().expect("conv output must have rank 3"),
            );
        }
        (OperatorKind::BatchNorm(_), OperatorWeights::BatchNorm { scale, shift }) => {
            kernels::batch_norm(inputs[0].view(), scale.view(), shift.view(), output);
        }
        (OperatorKind::MaxPool(params), OperatorWeights::None) => {
            kernels::max_pool(
                params,
                view_3(inputs[0]),
                output.into_dimensionality::<Ix3>().expect("max pool output must have rank 3"),
            );
        }
        (OperatorKind::Add, OperatorWeights::None) => {
            kernels::add(inputs[0].view(), inputs[1].view(), output);
        }
        (OperatorKind::FullyConnected(params), OperatorWeights::FullyConnected { weight, bias }) => {
            let input = inputs[0]
                .view()
                .into_shape(params.input_features)
                .expect("fully connected input must be contiguous with the configured feature count");
            kernels::fully_connected(
                input,
                weight.view(),
                bias.view(),
                output.into_dimensionality::<Ix1>().expect("fully connected output must have rank 1"),
            );
        }
        (kind, weights) => {
            panic!("weights with {} parameters were not generated for operator {}", weights.len(), kind)
        }
    }
}

fn view_3(tensor: &Tensor) -> ndarray::ArrayView3<f32> {
    tensor
        .view()
        .into_dimensionality::<Ix3>()
        .expect("feature map input must have rank 3")
}
