use std::time::Duration;

use rf_graph::cpu::WeightInit;
use rf_graph::dtype::DType;
use rf_graph::graph::Graph;
use rf_graph::operator::{ConvParams, FullyConnectedParams};
use rf_graph::shape;
use rf_graph::tensor::TensorState;
use rf_runtime::config::EngineSettings;
use rf_runtime::engine::{Engine, EngineState};
use rf_runtime::image_input::ImageBuffer;
use rf_runtime::{EngineError, FillError};

use crate::root::util::{prepared, settings, tiny_input, tiny_network};

#[test]
fn double_allocation() {
    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    assert_eq!(engine.state(), EngineState::Built);

    engine.allocate_all().unwrap();
    assert_eq!(engine.state(), EngineState::Allocated);
    let input = engine.graph().input_tensor().unwrap();
    assert_eq!(engine.arena().state(input), TensorState::Allocated);

    let result = engine.allocate_all();
    assert!(matches!(result, Err(EngineError::DoubleAllocation { .. })), "{:?}", result);
}

#[test]
fn shape_not_fixed() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 2, 2], "input").unwrap();
    let y = graph.conv(x, ConvParams::pointwise(1, 1, 1), "conv").unwrap();
    graph.set_output(y).unwrap();
    let _ = graph.declare(None, DType::F32, "unused");

    let mut engine = Engine::new(graph, settings(1)).unwrap();
    let result = engine.allocate_all();
    assert!(matches!(result, Err(EngineError::ShapeNotFixed { .. })), "{:?}", result);

    // nothing was allocated, so retrying reports the same cause
    assert_eq!(engine.state(), EngineState::Built);
    assert_eq!(engine.arena().allocated_bytes(), 0);
    assert_eq!(engine.arena().state(x), TensorState::ShapeFixed);
    let result = engine.allocate_all();
    assert!(matches!(result, Err(EngineError::ShapeNotFixed { .. })), "{:?}", result);
}

#[test]
fn fill_before_allocate() {
    let engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    let result = engine.fill_input(&tiny_input());
    assert!(
        matches!(
            result,
            Err(FillError {
                error: EngineError::InvalidState {
                    state: EngineState::Built,
                    ..
                },
                ..
            })
        ),
        "{:?}",
        result
    );

    // the engine comes back and can still be allocated and filled
    let mut engine = result.unwrap_err().into_engine();
    engine.allocate_all().unwrap();
    engine.fill_input(&tiny_input()).unwrap();
}

#[test]
fn wrong_input_length() {
    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    engine.allocate_all().unwrap();

    let result = engine.fill_input(&[0.0; 10]);
    assert!(
        matches!(
            result,
            Err(FillError {
                error: EngineError::ShapeMismatch(_),
                ..
            })
        ),
        "{:?}",
        result
    );

    let engine = result.unwrap_err().into_engine();
    assert_eq!(engine.state(), EngineState::Allocated);
    let input = engine.graph().input_tensor().unwrap();
    assert_eq!(engine.arena().state(input), TensorState::Allocated);

    let mut engine = engine.fill_input(&tiny_input()).unwrap();
    engine.run_once();

    let mut expected = prepared(1);
    expected.run_once();
    assert_eq!(engine.output().unwrap(), expected.output().unwrap());
}

#[test]
fn wrong_byte_count() {
    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    engine.allocate_all().unwrap();

    let error = engine.fill_input_bytes(&[0u8; 7]).unwrap_err();
    assert!(matches!(error.error, EngineError::ShapeMismatch(_)), "{:?}", error);

    // a rejected fill converts into a plain engine error for callers using `?`
    let error = EngineError::from(error.into_engine().fill_input(&[]).unwrap_err());
    assert!(matches!(error, EngineError::ShapeMismatch(_)), "{:?}", error);
}

#[test]
fn wrong_image_shape() {
    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    engine.allocate_all().unwrap();

    let image = ImageBuffer::new(vec![0.0; 8 * 8 * 3], 8, 8, 3).unwrap();
    let result = engine.fill_input_image(&image);
    assert!(
        matches!(
            result,
            Err(FillError {
                error: EngineError::ShapeMismatch(_),
                ..
            })
        ),
        "{:?}",
        result
    );
}

#[test]
fn zero_threads() {
    let result = Engine::from_network(tiny_network(), settings(0));
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))), "{:?}", result);

    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    let result = engine.configure_parallelism(0);
    assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))), "{:?}", result);

    engine.configure_parallelism(3).unwrap();
    assert_eq!(engine.settings().threads, 3);
}

#[test]
fn benchmark_counts_runs() {
    let mut engine = prepared(2);
    assert_eq!(engine.state(), EngineState::Filled);
    assert!(engine.output().is_none());

    let report = engine.benchmark(5);
    assert_eq!(report.iterations, 5);
    assert_eq!(engine.runs(), 5);
    assert_eq!(engine.state(), EngineState::Running);

    let report = engine.benchmark(0);
    assert_eq!(report.iterations, 0);
    assert_eq!(report.per_iteration(), Duration::ZERO);
    assert_eq!(report.throughput(), 0.0);
    assert_eq!(engine.runs(), 5);

    engine.warmup(2);
    let output = engine.finish();
    assert_eq!(output.runs, 7);
    assert_eq!(output.logits.unwrap().shape(), &[10]);
}

#[test]
fn repeated_runs_match() {
    let mut engine = prepared(2);

    engine.run_once();
    let first = engine.output().unwrap().to_owned();
    engine.benchmark(3);
    let later = engine.output().unwrap().to_owned();

    assert!(first.iter().all(|x| x.is_finite()));
    assert_eq!(first, later);
}

#[test]
fn thread_count_independent() {
    let outputs = [1, 2, 4]
        .into_iter()
        .map(|threads| {
            let mut engine = prepared(threads);
            engine.run_once();
            engine.finish().logits.unwrap()
        })
        .collect::<Vec<_>>();

    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[0], outputs[2]);
}

#[test]
fn seed_changes_weights() {
    let run = |seed: u64| {
        let settings = EngineSettings {
            threads: 1,
            weights: WeightInit::Random { seed },
        };
        let mut engine = Engine::from_network(tiny_network(), settings).unwrap();
        engine.allocate_all().unwrap();
        let mut engine = engine.fill_input(&tiny_input()).unwrap();
        engine.run_once();
        engine.finish().logits.unwrap()
    };

    assert_eq!(run(3), run(3));
    assert_ne!(run(3), run(4));
}

#[test]
fn bytes_match_values() {
    let data = tiny_input();

    let mut by_value = prepared(1);
    by_value.run_once();

    let mut engine = Engine::from_network(tiny_network(), settings(1)).unwrap();
    engine.allocate_all().unwrap();
    let mut by_bytes = engine.fill_input_bytes(bytemuck::cast_slice(&data[..])).unwrap();
    by_bytes.run_once();

    assert_eq!(by_value.output().unwrap(), by_bytes.output().unwrap());
}

#[test]
fn constant_weights_by_hand() {
    let mut graph = Graph::new();
    let x = graph.input(shape![1, 2, 2], "input").unwrap();
    let y = graph.conv(x, ConvParams::pointwise(1, 1, 1), "conv").unwrap();
    let y = graph.batch_norm(y, 1, "bn").unwrap();
    let y = graph.add(y, x, "add").unwrap();
    let y = graph.fully_connected(y, FullyConnectedParams::new(4, 2), "fc").unwrap();
    graph.set_output(y).unwrap();

    let settings = EngineSettings {
        threads: 2,
        weights: WeightInit::Constant(2.0),
    };
    let mut engine = Engine::new(graph, settings).unwrap();
    engine.allocate_all().unwrap();
    let mut engine = engine.fill_input(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    engine.run_once();

    // conv doubles, batch norm is the identity, add gives 3x the input, fc sums with weight 2
    let logits = engine.output().unwrap().to_owned();
    assert_eq!(logits.into_raw_vec(), vec![60.0, 60.0]);
}

#[test]
fn profile_per_kind() {
    let mut engine = prepared(1);
    let profile = engine.profile_once();

    assert_eq!(engine.runs(), 1);
    assert_eq!(profile.steps.len(), engine.plan().len());
    assert_eq!(
        profile.per_kind.keys().copied().collect::<Vec<_>>(),
        vec!["conv", "batch_norm", "max_pool", "add", "fully_connected"]
    );
    println!("{}", profile);
}
