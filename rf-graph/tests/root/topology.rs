use rf_graph::dtype::DType;
use rf_graph::error::GraphError;
use rf_graph::graph::Graph;
use rf_graph::network::{append_block, append_stage, StageConfig};
use rf_graph::operator::{ConvParams, OperatorKind, PoolParams, Rounding};
use rf_graph::shape;

fn assert_topology_error<T: std::fmt::Debug>(result: Result<T, GraphError>) {
    match result {
        Err(GraphError::TopologyError(_)) => {}
        other => panic!("Expected topology error, got {:?}", other),
    }
}

fn assert_shape_mismatch<T: std::fmt::Debug>(result: Result<T, GraphError>) {
    match result {
        Err(GraphError::ShapeMismatch { .. }) => {}
        other => panic!("Expected shape mismatch, got {:?}", other),
    }
}

#[test]
fn foreign_tensor() {
    let mut a = Graph::new();
    let x = a.input(shape![3, 4, 4], "input").unwrap();
    let y = a.conv(x, ConvParams::pointwise(3, 3, 1), "conv").unwrap();

    let mut b = Graph::new();
    b.input(shape![3, 4, 4], "input").unwrap();

    assert!(!b.contains(y));
    assert_topology_error(b.conv(y, ConvParams::pointwise(3, 3, 1), "conv"));
    assert_topology_error(b.set_output(y));
    assert_eq!(b.operator_count(), 0);
}

#[test]
fn unproduced_tensor() {
    let mut graph = Graph::new();
    graph.input(shape![3, 4, 4], "input").unwrap();
    let pending = graph.declare(Some(shape![3, 4, 4]), DType::F32, "pending");

    assert!(!graph.is_produced(pending));
    assert_topology_error(graph.conv(pending, ConvParams::pointwise(3, 3, 1), "conv"));
    assert_topology_error(graph.set_output(pending));
}

#[test]
fn produced_twice() {
    let mut graph = Graph::new();
    let x = graph.input(shape![3, 4, 4], "input").unwrap();
    let y = graph.declare(None, DType::F32, "y");

    let kind = OperatorKind::Conv(ConvParams::pointwise(3, 3, 1));
    graph.push_operator(kind, &[x], y, "first").unwrap();
    assert_topology_error(graph.push_operator(kind, &[x], y, "second"));

    // the graph input is filled externally and can never be an operator output
    assert_topology_error(graph.push_operator(kind, &[y], x, "third"));
}

#[test]
fn single_input_and_output() {
    let mut graph = Graph::new();
    let x = graph.input(shape![3, 4, 4], "input").unwrap();
    assert_topology_error(graph.input(shape![3, 4, 4], "other"));

    let y = graph.conv(x, ConvParams::pointwise(3, 3, 1), "conv").unwrap();
    graph.set_output(y).unwrap();
    assert_topology_error(graph.set_output(y));
}

#[test]
fn declared_pool_shape() {
    let mut graph = Graph::new();
    let x = graph.input(shape![64, 7, 7], "input").unwrap();

    let wrong = graph.declare(Some(shape![64, 2, 2]), DType::F32, "pool_out");
    assert_shape_mismatch(graph.push_operator(OperatorKind::MaxPool(PoolParams::new(7, 1)), &[x], wrong, "pool"));

    let right = graph.declare(Some(shape![64, 1, 1]), DType::F32, "pool_out");
    graph
        .push_operator(OperatorKind::MaxPool(PoolParams::new(7, 1)), &[x], right, "pool")
        .unwrap();
}

#[test]
fn channel_mismatch() {
    let mut graph = Graph::new();
    let x = graph.input(shape![3, 8, 8], "input").unwrap();
    let tensors_before = graph.tensor_count();

    assert_shape_mismatch(graph.conv(x, ConvParams::pointwise(4, 8, 1), "conv"));
    assert_shape_mismatch(graph.batch_norm(x, 4, "bn"));
    assert_shape_mismatch(graph.conv(x, ConvParams::new(3, 8, 9, 1, 0), "too_large"));
    assert_shape_mismatch(graph.conv(x, ConvParams::pointwise(3, 8, 0), "zero_stride"));

    let y = graph.conv(x, ConvParams::pointwise(3, 3, 2), "strided").unwrap();
    assert_shape_mismatch(graph.add(x, y, "add"));

    // failed operators leave no dangling declarations behind
    assert_eq!(graph.tensor_count(), tensors_before + 1);
    assert_eq!(graph.operator_count(), 1);
}

#[test]
fn pool_window_in_padding() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 2, 2], "input").unwrap();

    let padded = |size, stride, padding| PoolParams {
        size,
        stride,
        padding,
        rounding: Rounding::Floor,
    };
    assert_shape_mismatch(graph.max_pool(x, padded(1, 1, 1), "pool"));
    assert_shape_mismatch(graph.max_pool(x, padded(2, 1, 2), "pool"));
    assert_shape_mismatch(graph.max_pool(x, padded(0, 1, 0), "pool"));
    assert_shape_mismatch(graph.max_pool(x, padded(2, 0, 0), "pool"));
    assert_eq!(graph.operator_count(), 0);

    let y = graph.max_pool(x, padded(2, 1, 1), "pool").unwrap();
    assert_eq!(graph.shape(y).unwrap(), &shape![1, 3, 3]);
}

#[test]
fn stage_from_unproduced_tensor() {
    let stage = StageConfig::new(3, 64, 256, 1);

    let mut graph = Graph::new();
    graph.input(shape![3, 224, 224], "input").unwrap();
    let pending = graph.declare(Some(shape![64, 56, 56]), DType::F32, "pending");
    assert_topology_error(append_stage(&mut graph, pending, &stage, 0));
    assert_eq!(graph.operator_count(), 0);

    let mut other = Graph::new();
    let foreign = other.input(shape![64, 56, 56], "input").unwrap();
    assert_topology_error(append_stage(&mut graph, foreign, &stage, 0));

    let block = stage.block_configs(64)[0];
    assert_topology_error(append_block(&mut graph, pending, block, "layer0_block0"));
    assert_topology_error(append_block(&mut graph, foreign, block, "layer0_block0"));
    assert_eq!(graph.operator_count(), 0);
}
