use std::fmt::{Display, Formatter};

use decorum::Total;

use crate::error::{GraphError, GraphResult};
use crate::shape;
use crate::shape::Shape;
use crate::tensor::TensorId;

/// A configured operator in a [Graph](crate::graph::Graph).
///
/// Operators never own their operands, they refer to tensors owned by the graph through [TensorId] handles.
/// Every operator has exactly one output.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Operator {
    pub kind: OperatorKind,
    pub inputs: Vec<TensorId>,
    pub output: TensorId,
    pub debug_id: String,
}

/// A handle to an [Operator] in a [Graph](crate::graph::Graph), in construction order.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OperatorId(pub(crate) usize);

/// The operator variants together with their scalar parameters.
///
/// Every variant fully overwrites its output tensor each time it runs and never accumulates into it,
/// so output buffers can be reused across iterations without being cleared.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperatorKind {
    /// 2D convolution with bias. Input `[Ci, H, W]`, output `[Co, Ho, Wo]`.
    Conv(ConvParams),
    /// Per-channel affine normalization using frozen statistics. Output shape equals the input shape.
    BatchNorm(BatchNormParams),
    /// Spatial max pooling. Input `[C, H, W]`, output `[C, Ho, Wo]`.
    MaxPool(PoolParams),
    /// Elementwise sum of two tensors with identical shapes.
    Add,
    /// Matrix-vector product with bias. Any input shape with the right element count, output `[Fo]`.
    FullyConnected(FullyConnectedParams),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ConvParams {
    pub input_channels: usize,
    pub output_channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
    pub padding: usize,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BatchNormParams {
    pub channels: usize,
    pub eps: Total<f32>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PoolParams {
    pub size: usize,
    pub stride: usize,
    pub padding: usize,
    pub rounding: Rounding,
}

/// How the output extent of a pooling window is rounded when the stride does not divide the input evenly.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Rounding {
    Floor,
    Ceil,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FullyConnectedParams {
    pub input_features: usize,
    pub output_features: usize,
}

impl ConvParams {
    /// A square `kernel x kernel` convolution.
    pub fn new(input_channels: usize, output_channels: usize, kernel: usize, stride: usize, padding: usize) -> Self {
        ConvParams {
            input_channels,
            output_channels,
            kernel_h: kernel,
            kernel_w: kernel,
            stride,
            padding,
        }
    }

    /// A `1x1` convolution without padding, used for channel reduction, expansion and shortcut projections.
    pub fn pointwise(input_channels: usize, output_channels: usize, stride: usize) -> Self {
        ConvParams::new(input_channels, output_channels, 1, stride, 0)
    }

    pub fn filter_shape(&self) -> Shape {
        shape![self.output_channels, self.input_channels, self.kernel_h, self.kernel_w]
    }
}

impl BatchNormParams {
    pub const DEFAULT_EPS: f32 = 1e-5;

    pub fn new(channels: usize) -> Self {
        BatchNormParams {
            channels,
            eps: Total::from(Self::DEFAULT_EPS),
        }
    }
}

impl PoolParams {
    pub fn new(size: usize, stride: usize) -> Self {
        PoolParams {
            size,
            stride,
            padding: 0,
            rounding: Rounding::Floor,
        }
    }

    pub fn with_rounding(self, rounding: Rounding) -> Self {
        PoolParams { rounding, ..self }
    }
}

impl FullyConnectedParams {
    pub fn new(input_features: usize, output_features: usize) -> Self {
        FullyConnectedParams {
            input_features,
            output_features,
        }
    }

    pub fn weight_shape(&self) -> Shape {
        shape![self.output_features, self.input_features]
    }
}

/// Output extent along one spatial axis of a sliding window operation.
///
/// Returns `None` if the window does not fit inside the padded input even once.
pub fn output_extent(input: usize, kernel: usize, stride: usize, padding: usize, rounding: Rounding) -> Option<usize> {
    let padded = input + 2 * padding;
    if kernel == 0 || stride == 0 || padded < kernel {
        return None;
    }

    // operations are ordered to avoid underflow
    let span = padded - kernel;
    let output = match rounding {
        Rounding::Floor => span / stride + 1,
        Rounding::Ceil => {
            let output = (span + stride - 1) / stride + 1;
            // the last window must start inside the input or the left padding
            if (output - 1) * stride >= input + padding {
                output - 1
            } else {
                output
            }
        }
    };

    Some(output)
}

impl OperatorKind {
    /// The number of input tensors this operator expects.
    pub fn arity(&self) -> usize {
        match self {
            OperatorKind::Add => 2,
            OperatorKind::Conv(_)
            | OperatorKind::BatchNorm(_)
            | OperatorKind::MaxPool(_)
            | OperatorKind::FullyConnected(_) => 1,
        }
    }

    /// Short name of the variant, used for logging and profile aggregation.
    pub fn name(&self) -> &'static str {
        match self {
            OperatorKind::Conv(_) => "conv",
            OperatorKind::BatchNorm(_) => "batch_norm",
            OperatorKind::MaxPool(_) => "max_pool",
            OperatorKind::Add => "add",
            OperatorKind::FullyConnected(_) => "fully_connected",
        }
    }

    /// Validate the input shapes against the parameters of this operator and infer its output shape.
    ///
    /// This is a pure function of `self` and `inputs`, it never touches tensor data.
    /// `debug_id` is only used to make error messages easier to trace back to the network.
    pub fn configure(&self, debug_id: &str, inputs: &[&Shape]) -> GraphResult<Shape> {
        let mismatch = |detail: String| GraphError::shape_mismatch(debug_id, detail);

        if inputs.len() != self.arity() {
            return Err(mismatch(format!(
                "{} expects {} input(s), got {}",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }

        match *self {
            OperatorKind::Conv(params) => {
                let input = inputs[0];
                let [c, h, w] = input
                    .as_3()
                    .ok_or_else(|| mismatch(format!("conv input must have rank 3, got {}", input)))?;

                if params.input_channels == 0 || params.output_channels == 0 {
                    return Err(mismatch(format!("conv channel counts must be positive, got {:?}", params)));
                }
                if c != params.input_channels {
                    return Err(mismatch(format!(
                        "conv expects {} input channels, input {} has {}",
                        params.input_channels, input, c
                    )));
                }

                let extent = |input: usize, kernel: usize| {
                    output_extent(input, kernel, params.stride, params.padding, Rounding::Floor).ok_or_else(|| {
                        mismatch(format!(
                            "kernel {}x{} with stride {} and padding {} does not fit input {}",
                            params.kernel_h, params.kernel_w, params.stride, params.padding, input
                        ))
                    })
                };
                let output_h = extent(h, params.kernel_h)?;
                let output_w = extent(w, params.kernel_w)?;

                Ok(Shape::chw(params.output_channels, output_h, output_w))
            }
            OperatorKind::BatchNorm(params) => {
                let input = inputs[0];
                match input.dims.first() {
                    Some(&c) if c == params.channels && params.channels > 0 => Ok(input.clone()),
                    _ => Err(mismatch(format!(
                        "batch norm over {} channels does not match input {}",
                        params.channels, input
                    ))),
                }
            }
            OperatorKind::MaxPool(params) => {
                let input = inputs[0];
                let [c, h, w] = input
                    .as_3()
                    .ok_or_else(|| mismatch(format!("max pool input must have rank 3, got {}", input)))?;

                // every window must overlap the input, otherwise it has no value to take the max of
                if params.size == 0 || params.stride == 0 || params.padding >= params.size {
                    return Err(mismatch(format!(
                        "pool window {} with stride {} and padding {} is invalid, need size > padding and stride > 0",
                        params.size, params.stride, params.padding
                    )));
                }

                let extent = |input: usize| {
                    output_extent(input, params.size, params.stride, params.padding, params.rounding).ok_or_else(|| {
                        mismatch(format!(
                            "pool window {} with stride {} and padding {} does not fit input {}",
                            params.size, params.stride, params.padding, input
                        ))
                    })
                };
                let output_h = extent(h)?;
                let output_w = extent(w)?;

                Ok(Shape::chw(c, output_h, output_w))
            }
            OperatorKind::Add => {
                let (left, right) = (inputs[0], inputs[1]);
                if left != right {
                    return Err(mismatch(format!("add operands must have the same shape, got {} and {}", left, right)));
                }
                Ok(left.clone())
            }
            OperatorKind::FullyConnected(params) => {
                let input = inputs[0];
                if params.output_features == 0 {
                    return Err(mismatch("fully connected layer must have at least one output feature".to_owned()));
                }
                if input.size() != params.input_features {
                    return Err(mismatch(format!(
                        "fully connected layer expects {} input features, input {} has {}",
                        params.input_features,
                        input,
                        input.size()
                    )));
                }
                Ok(shape![params.output_features])
            }
        }
    }
}

impl Display for OperatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorKind::Conv(p) => write!(
                f,
                "Conv({}->{}, k={}x{}, s={}, p={})",
                p.input_channels, p.output_channels, p.kernel_h, p.kernel_w, p.stride, p.padding
            ),
            OperatorKind::BatchNorm(p) => write!(f, "BatchNorm({}, eps={})", p.channels, p.eps.into_inner()),
            OperatorKind::MaxPool(p) => write!(
                f,
                "MaxPool(k={}, s={}, p={}, {:?})",
                p.size, p.stride, p.padding, p.rounding
            ),
            OperatorKind::Add => write!(f, "Add"),
            OperatorKind::FullyConnected(p) => write!(f, "FullyConnected({}->{})", p.input_features, p.output_features),
        }
    }
}

impl OperatorId {
    pub fn index(self) -> usize {
        self.0
    }
}
