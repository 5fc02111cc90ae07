use std::fmt::{Debug, Display, Formatter};
use std::ops::Index;

use itertools::Itertools;
use rand::random;

use crate::dtype::DType;
use crate::error::{GraphError, GraphResult};
use crate::operator::{
    BatchNormParams, ConvParams, FullyConnectedParams, Operator, OperatorId, OperatorKind, PoolParams,
};
use crate::shape::Shape;
use crate::tensor::{TensorId, TensorInfo};

/// The core graph datastructure.
///
/// This is a Directed Acyclic Graph with operators as nodes and tensors as edges: each tensor has at most one
/// producing operator and any number of consuming operators. The graph owns all tensor declarations and
/// operators in two arenas, handles into those arenas are [TensorId] and [OperatorId].
///
/// The graph is append-only. Every operator is configured (shape checked) at the moment it is added,
/// and can only consume tensors that already exist at that point, so construction order is always a valid
/// execution order. No memory is allocated for tensor data here.
///
/// ```
/// # use rf_graph::graph::Graph;
/// # use rf_graph::operator::ConvParams;
/// # use rf_graph::shape;
/// # fn main() -> Result<(), rf_graph::error::GraphError> {
/// let mut graph = Graph::new();
///
/// let x = graph.input(shape![3, 4, 4], "input")?;
/// let y = graph.conv(x, ConvParams::pointwise(3, 2, 2), "conv1")?;
/// let y = graph.batch_norm(y, 2, "bn1")?;
/// graph.set_output(y)?;
///
/// assert_eq!(graph.shape(y)?, &shape![2, 2, 2]);
/// println!("{}", graph);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Graph {
    check: u32,
    tensors: Vec<TensorInfo>,
    operators: Vec<Operator>,
    input: Option<TensorId>,
    output: Option<TensorId>,
}

impl Index<TensorId> for Graph {
    type Output = TensorInfo;

    fn index(&self, tensor: TensorId) -> &Self::Output {
        assert_eq!(
            tensor.check, self.check,
            "{:?} does not belong to this graph",
            tensor
        );
        &self.tensors[tensor.index]
    }
}

impl Index<OperatorId> for Graph {
    type Output = Operator;

    fn index(&self, operator: OperatorId) -> &Self::Output {
        &self.operators[operator.0]
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            check: random(),
            tensors: vec![],
            operators: vec![],
            input: None,
            output: None,
        }
    }

    fn check_contains(&self, tensor: TensorId) -> GraphResult<()> {
        if tensor.check != self.check || tensor.index >= self.tensors.len() {
            return Err(GraphError::TopologyError(format!(
                "{:#?} does not belong to this graph",
                tensor
            )));
        }
        Ok(())
    }

    /// Iterate over all tensors in declaration order.
    pub fn tensors(&self) -> impl Iterator<Item = TensorId> {
        let check = self.check;
        (0..self.tensors.len()).map(move |index| TensorId { index, check })
    }

    /// Iterate over all operators in construction order.
    pub fn operators(&self) -> impl Iterator<Item = OperatorId> {
        (0..self.operators.len()).map(OperatorId)
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    pub fn operator_count(&self) -> usize {
        self.operators.len()
    }

    /// The single tensor that must be filled externally before execution.
    pub fn input_tensor(&self) -> Option<TensorId> {
        self.input
    }

    /// The single tensor that holds the final result of the graph.
    pub fn output_tensor(&self) -> Option<TensorId> {
        self.output
    }

    pub fn contains(&self, tensor: TensorId) -> bool {
        self.check_contains(tensor).is_ok()
    }

    /// The shape of `tensor`, failing if it is not fixed yet.
    pub fn shape(&self, tensor: TensorId) -> GraphResult<&Shape> {
        self.check_contains(tensor)?;
        let info = &self.tensors[tensor.index];
        info.shape.as_ref().ok_or_else(|| {
            GraphError::TopologyError(format!("shape of {:?} '{}' is not fixed yet", tensor, info.debug_id))
        })
    }

    /// Whether `tensor` holds data once its producers have run: it is either the graph input
    /// or it has a producing operator.
    pub fn is_produced(&self, tensor: TensorId) -> bool {
        self.contains(tensor) && (self.input == Some(tensor) || self[tensor].producer.is_some())
    }

    /// Declare a new tensor without binding it to a producer.
    ///
    /// Passing a shape fixes it up front, the operator that later produces this tensor must then infer exactly that shape.
    #[must_use]
    pub fn declare(&mut self, shape: Option<Shape>, dtype: DType, debug_id: impl Into<String>) -> TensorId {
        let index = self.tensors.len();
        self.tensors.push(TensorInfo {
            shape,
            dtype,
            debug_id: debug_id.into(),
            producer: None,
            consumers: 0,
        });
        TensorId {
            index,
            check: self.check,
        }
    }

    /// Declare the graph input. A graph has exactly one input, it is filled externally before execution.
    pub fn input(&mut self, shape: Shape, debug_id: impl Into<String>) -> GraphResult<TensorId> {
        if let Some(existing) = self.input {
            return Err(GraphError::TopologyError(format!(
                "graph already has input {:?} '{}'",
                existing, self[existing].debug_id
            )));
        }

        let tensor = self.declare(Some(shape), DType::F32, debug_id);
        self.input = Some(tensor);
        Ok(tensor)
    }

    /// Register `tensor` as the single output of the graph.
    pub fn set_output(&mut self, tensor: TensorId) -> GraphResult<()> {
        self.check_contains(tensor)?;
        if let Some(existing) = self.output {
            return Err(GraphError::TopologyError(format!(
                "graph already has output {:?} '{}'",
                existing, self[existing].debug_id
            )));
        }
        if !self.is_produced(tensor) {
            return Err(GraphError::TopologyError(format!(
                "output {:?} '{}' is never produced",
                tensor, self[tensor].debug_id
            )));
        }

        self.output = Some(tensor);
        Ok(())
    }

    /// Add an operator that reads `inputs` and writes the previously declared tensor `output`.
    ///
    /// The operator is configured immediately: its output shape is inferred from the input shapes and
    /// checked against the declared output shape if there is one.
    pub fn push_operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[TensorId],
        output: TensorId,
        debug_id: impl Into<String>,
    ) -> GraphResult<OperatorId> {
        let debug_id = debug_id.into();

        for &input in inputs {
            self.check_contains(input)?;
            if !self.is_produced(input) {
                return Err(GraphError::TopologyError(format!(
                    "'{}' reads {:?} '{}', which is not produced by any earlier operator",
                    debug_id, input, self[input].debug_id
                )));
            }
        }

        self.check_contains(output)?;
        if self.input == Some(output) || self[output].producer.is_some() {
            return Err(GraphError::TopologyError(format!(
                "'{}' writes {:?} '{}', which already has a producer",
                debug_id, output, self[output].debug_id
            )));
        }

        let input_shapes = inputs.iter().map(|&input| self.shape(input)).collect::<GraphResult<Vec<_>>>()?;
        let inferred = kind.configure(&debug_id, &input_shapes)?;

        match &self[output].shape {
            Some(declared) if declared != &inferred => {
                return Err(GraphError::ShapeMismatch {
                    operator: debug_id,
                    detail: format!("inferred output shape {} but {} was declared", inferred, declared),
                });
            }
            _ => {}
        }

        let id = OperatorId(self.operators.len());
        tracing::trace!("{:?} '{}' = {} -> {}", id, debug_id, kind, inferred);

        for &input in inputs {
            self.tensors[input.index].consumers += 1;
        }
        let output_info = &mut self.tensors[output.index];
        output_info.shape = Some(inferred);
        output_info.producer = Some(id);

        self.operators.push(Operator {
            kind,
            inputs: inputs.to_vec(),
            output,
            debug_id,
        });

        Ok(id)
    }

    /// Add an operator and declare its output tensor, named `{debug_id}_out`.
    pub fn operator(
        &mut self,
        kind: OperatorKind,
        inputs: &[TensorId],
        debug_id: impl Into<String>,
    ) -> GraphResult<TensorId> {
        let debug_id = debug_id.into();
        let output = self.declare(None, DType::F32, format!("{}_out", debug_id));

        match self.push_operator(kind, inputs, output, debug_id) {
            Ok(_) => Ok(output),
            Err(e) => {
                // drop the dangling declaration again, nothing can refer to it yet
                self.tensors.pop();
                Err(e)
            }
        }
    }

    pub fn conv(&mut self, input: TensorId, params: ConvParams, debug_id: impl Into<String>) -> GraphResult<TensorId> {
        self.operator(OperatorKind::Conv(params), &[input], debug_id)
    }

    pub fn batch_norm(&mut self, input: TensorId, channels: usize, debug_id: impl Into<String>) -> GraphResult<TensorId> {
        self.operator(OperatorKind::BatchNorm(BatchNormParams::new(channels)), &[input], debug_id)
    }

    pub fn max_pool(&mut self, input: TensorId, params: PoolParams, debug_id: impl Into<String>) -> GraphResult<TensorId> {
        self.operator(OperatorKind::MaxPool(params), &[input], debug_id)
    }

    pub fn add(&mut self, left: TensorId, right: TensorId, debug_id: impl Into<String>) -> GraphResult<TensorId> {
        self.operator(OperatorKind::Add, &[left, right], debug_id)
    }

    pub fn fully_connected(
        &mut self,
        input: TensorId,
        params: FullyConnectedParams,
        debug_id: impl Into<String>,
    ) -> GraphResult<TensorId> {
        self.operator(OperatorKind::FullyConnected(params), &[input], debug_id)
    }

    /// Total number of bytes needed to back every tensor whose shape is fixed.
    pub fn activation_bytes(&self) -> usize {
        self.tensors.iter().filter_map(|info| info.size_bytes()).sum()
    }
}

impl Debug for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("input", &self.input.map(|t| &self[t].shape))
            .field("output", &self.output.map(|t| &self[t].shape))
            .field("tensors", &self.tensors.len())
            .field("operators", &self.operators.len())
            .finish_non_exhaustive()
    }
}

impl Display for Graph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fmt_shape = |t: TensorId| match &self[t].shape {
            Some(shape) => shape.to_string(),
            None => "?".to_owned(),
        };

        writeln!(f, "Graph {{")?;
        writeln!(f, "  check: {},", self.check)?;
        writeln!(f, "  input: {:?},", self.input)?;
        writeln!(f, "  output: {:?},", self.output)?;

        writeln!(f, "  tensors: [")?;
        for tensor in self.tensors() {
            let info = &self[tensor];
            writeln!(
                f,
                "    {:?} = {} {} '{}', producer: {:?}, consumers: {},",
                tensor,
                info.dtype,
                fmt_shape(tensor),
                info.debug_id,
                info.producer,
                info.consumers
            )?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "  operators: [")?;
        for (i, op) in self.operators.iter().enumerate() {
            writeln!(
                f,
                "    {:?} '{}' = {}({}) -> {:?} {},",
                OperatorId(i),
                op.debug_id,
                op.kind,
                op.inputs.iter().map(|t| format!("{:?}", t)).join(", "),
                op.output,
                fmt_shape(op.output),
            )?;
        }
        writeln!(f, "  ],")?;

        writeln!(f, "}}")
    }
}
