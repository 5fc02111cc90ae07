use std::cmp::Reverse;
use std::collections::BinaryHeap;

use itertools::Itertools;

use crate::error::{GraphError, GraphResult};
use crate::graph::Graph;
use crate::operator::OperatorId;

/// A graph flattened into the order its operators are invoked in.
///
/// Every operator of the graph appears exactly once, and every operator appears after the producers of all of its inputs.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExecutionPlan {
    steps: Vec<OperatorId>,
}

impl ExecutionPlan {
    /// Compute a topological order of the operators in `graph` with Kahn's algorithm.
    ///
    /// Ties between ready operators are broken by construction order,
    /// so a graph that was built front to back is executed in exactly that order.
    pub fn new(graph: &Graph) -> GraphResult<Self> {
        check_output(graph)?;

        let operator_count = graph.operator_count();

        // in-degree counts every input that is produced by another operator, the graph input is always available
        let mut pending = vec![0usize; operator_count];
        let mut dependents: Vec<Vec<OperatorId>> = vec![vec![]; operator_count];

        for op in graph.operators() {
            for &input in &graph[op].inputs {
                if let Some(producer) = graph[input].producer {
                    pending[op.index()] += 1;
                    dependents[producer.index()].push(op);
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<OperatorId>> = graph
            .operators()
            .filter(|op| pending[op.index()] == 0)
            .map(Reverse)
            .collect();

        let mut steps = Vec::with_capacity(operator_count);
        while let Some(Reverse(op)) = ready.pop() {
            steps.push(op);
            for &next in &dependents[op.index()] {
                pending[next.index()] -= 1;
                if pending[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if steps.len() != operator_count {
            let stuck = graph
                .operators()
                .filter(|op| pending[op.index()] != 0)
                .map(|op| format!("'{}'", graph[op].debug_id))
                .join(", ");
            return Err(GraphError::TopologyError(format!(
                "graph contains a cycle, operators never became ready: {}",
                stuck
            )));
        }

        tracing::debug!("planned {} operators", steps.len());
        Ok(ExecutionPlan { steps })
    }

    /// Build a plan from an explicit operator order, rejecting it if it is not a valid execution order for `graph`.
    pub fn from_order(graph: &Graph, order: Vec<OperatorId>) -> GraphResult<Self> {
        let plan = ExecutionPlan { steps: order };
        plan.verify(graph)?;
        Ok(plan)
    }

    /// Check that this plan is a valid execution order for `graph`:
    /// every operator appears exactly once and only reads tensors that are
    /// either the graph input or produced by an earlier step.
    pub fn verify(&self, graph: &Graph) -> GraphResult<()> {
        check_output(graph)?;

        let mut available = vec![false; graph.tensor_count()];
        if let Some(input) = graph.input_tensor() {
            available[input.index()] = true;
        }

        let mut seen = vec![false; graph.operator_count()];
        for &op in &self.steps {
            if op.index() >= graph.operator_count() {
                return Err(GraphError::TopologyError(format!("{:?} does not belong to this graph", op)));
            }
            if std::mem::replace(&mut seen[op.index()], true) {
                return Err(GraphError::TopologyError(format!(
                    "{:?} '{}' appears more than once in the plan",
                    op,
                    graph[op].debug_id
                )));
            }

            let operator = &graph[op];
            for &input in &operator.inputs {
                if !available[input.index()] {
                    return Err(GraphError::TopologyError(format!(
                        "{:?} '{}' reads {:?} '{}' before it is produced",
                        op,
                        operator.debug_id,
                        input,
                        graph[input].debug_id
                    )));
                }
            }
            available[operator.output.index()] = true;
        }

        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(GraphError::TopologyError(format!(
                "plan never runs operator '{}'",
                graph[OperatorId(missing)].debug_id
            )));
        }

        Ok(())
    }

    pub fn steps(&self) -> &[OperatorId] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.steps.iter().copied()
    }
}

fn check_output(graph: &Graph) -> GraphResult<()> {
    match graph.output_tensor() {
        Some(output) if graph.is_produced(output) => Ok(()),
        Some(output) => Err(GraphError::TopologyError(format!(
            "output {:?} '{}' is never produced",
            output, graph[output].debug_id
        ))),
        None => Err(GraphError::TopologyError("graph has no output".to_owned())),
    }
}
