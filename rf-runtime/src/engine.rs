//! The execution engine, split in two types so running before the input is filled does not compile.
//!
//! ```text
//! Engine (Built)
//!     │  .allocate_all()
//!     ▼
//! Engine (Allocated)
//!     │  .fill_input(data)
//!     ▼
//! PreparedEngine (Filled)
//!     │  .run_once() / .benchmark(n), repeatable
//!     ▼
//! PreparedEngine (Running)
//!     │  .finish()
//!     ▼
//! EngineOutput (Done)
//! ```

use std::fmt::{Debug, Display, Formatter};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use itertools::Itertools;
use rayon::{ThreadPool, ThreadPoolBuilder};

use rf_graph::cpu::{bind_weights, run_operator, OperatorWeights, Tensor};
use rf_graph::error::GraphError;
use rf_graph::graph::Graph;
use rf_graph::ndarray::ArrayViewD;
use rf_graph::network::Network;
use rf_graph::operator::OperatorId;
use rf_graph::plan::ExecutionPlan;
use rf_graph::tensor::{TensorId, TensorState};

use crate::arena::TensorArena;
use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult, FillError};
use crate::image_input::ImageBuffer;

/// The lifecycle of an engine. Transitions only ever move forward, `Running` is re-entered by every further run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EngineState {
    Built,
    Allocated,
    Filled,
    Running,
    Done,
}

/// An engine that has not been filled yet: tensors can be allocated and the thread pool reconfigured,
/// but nothing can run. Call [Engine::fill_input] to get a [PreparedEngine].
pub struct Engine {
    graph: Graph,
    plan: ExecutionPlan,
    settings: EngineSettings,
    pool: ThreadPool,
    arena: TensorArena,
    weights: Vec<OperatorWeights>,
    input: TensorId,
    output: TensorId,
    state: EngineState,
}

/// An engine with every tensor allocated and the input filled, ready to be run any number of times.
pub struct PreparedEngine {
    graph: Graph,
    plan: ExecutionPlan,
    settings: EngineSettings,
    pool: ThreadPool,
    arena: TensorArena,
    weights: Vec<OperatorWeights>,
    output: TensorId,
    state: EngineState,
    runs: u64,
}

/// The result of [PreparedEngine::finish].
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// The graph output after the last run, `None` if the engine never ran.
    pub logits: Option<Tensor>,
    pub runs: u64,
}

/// Aggregate timing of [PreparedEngine::benchmark].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BenchmarkReport {
    pub iterations: usize,
    pub elapsed: Duration,
}

/// Per-operator timings of a single run, see [PreparedEngine::profile_once].
#[derive(Default, Debug, Clone)]
pub struct Profile {
    pub steps: Vec<String>,
    /// Total seconds spent per operator kind, in order of first appearance in the plan.
    pub per_kind: IndexMap<&'static str, f32>,
    pub total: f32,
}

impl Engine {
    /// Plan `graph` and set up the thread pool. No memory is allocated yet.
    pub fn new(graph: Graph, settings: EngineSettings) -> EngineResult<Self> {
        let plan = ExecutionPlan::new(&graph)?;

        let input = graph
            .input_tensor()
            .ok_or_else(|| GraphError::TopologyError("graph has no input".to_owned()))?;
        let output = graph
            .output_tensor()
            .ok_or_else(|| GraphError::TopologyError("graph has no output".to_owned()))?;

        let pool = build_pool(settings.threads)?;
        let arena = TensorArena::new(&graph);

        tracing::info!(
            "built engine for {} operators and {} tensors on {} thread(s)",
            plan.len(),
            graph.tensor_count(),
            settings.threads
        );

        Ok(Engine {
            graph,
            plan,
            settings,
            pool,
            arena,
            weights: vec![],
            input,
            output,
            state: EngineState::Built,
        })
    }

    pub fn from_network(network: Network, settings: EngineSettings) -> EngineResult<Self> {
        Engine::new(network.graph, settings)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    /// Replace the thread pool used inside operators. This has no effect on the graph or any shapes.
    pub fn configure_parallelism(&mut self, threads: usize) -> EngineResult<()> {
        self.pool = build_pool(threads)?;
        self.settings.threads = threads;
        tracing::debug!("using {} thread(s)", threads);
        Ok(())
    }

    /// Allocate every tensor in the graph and bind the operator weights.
    ///
    /// Each tensor can only be allocated once, so calling this a second time fails with [EngineError::DoubleAllocation].
    /// Shapes are checked up front, if any tensor fails with [EngineError::ShapeNotFixed] nothing is allocated.
    pub fn allocate_all(&mut self) -> EngineResult<()> {
        if let Some(tensor) = self.graph.tensors().find(|&t| self.arena.state(t) == TensorState::Declared) {
            return Err(EngineError::ShapeNotFixed {
                tensor,
                debug_id: self.graph[tensor].debug_id.clone(),
            });
        }

        for tensor in self.graph.tensors() {
            self.arena.allocate(&self.graph, tensor)?;
        }

        self.weights = bind_weights(&self.graph, &self.plan, self.settings.weights);
        self.state = EngineState::Allocated;

        let parameters: usize = self.weights.iter().map(|w| w.len()).sum();
        tracing::info!(
            "allocated {} tensors ({:.2} MiB) and {} parameters",
            self.graph.tensor_count(),
            self.arena.allocated_bytes() as f64 / (1024.0 * 1024.0),
            parameters
        );

        Ok(())
    }

    /// Copy `data` into the input tensor, consuming this engine and returning one that can run.
    ///
    /// On failure the engine is returned inside the [FillError], still in its previous state.
    pub fn fill_input(mut self, data: &[f32]) -> Result<PreparedEngine, FillError> {
        if self.state != EngineState::Allocated {
            let error = EngineError::InvalidState {
                operation: "fill the input",
                state: self.state,
            };
            return Err(self.reject(error));
        }

        if let Err(error) = self.arena.fill(self.input, data) {
            return Err(self.reject(error));
        }
        tracing::debug!("filled input with {} values", data.len());

        Ok(PreparedEngine {
            graph: self.graph,
            plan: self.plan,
            settings: self.settings,
            pool: self.pool,
            arena: self.arena,
            weights: self.weights,
            output: self.output,
            state: EngineState::Filled,
            runs: 0,
        })
    }

    /// Like [Self::fill_input], with the values given as native-endian `f32` bytes.
    pub fn fill_input_bytes(self, bytes: &[u8]) -> Result<PreparedEngine, FillError> {
        let size = std::mem::size_of::<f32>();
        if bytes.len() % size != 0 {
            let error = EngineError::ShapeMismatch(format!(
                "input of {} bytes is not a whole number of f32 values",
                bytes.len()
            ));
            return Err(self.reject(error));
        }

        let data = bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned::<f32>).collect_vec();
        self.fill_input(&data)
    }

    /// Fill the input from an HWC image, which must match the `[C, H, W]` input shape.
    pub fn fill_input_image(self, image: &ImageBuffer) -> Result<PreparedEngine, FillError> {
        let expected = [image.channels, image.height, image.width];
        let error = match self.graph.shape(self.input) {
            Ok(shape) if shape.as_3() == Some(expected) => None,
            Ok(shape) => Some(EngineError::ShapeMismatch(format!(
                "image of {}x{}x{} (HxWxC) does not match input shape {}",
                image.height, image.width, image.channels, shape
            ))),
            Err(error) => Some(error.into()),
        };

        match error {
            Some(error) => Err(self.reject(error)),
            None => self.fill_input(&image.to_chw()),
        }
    }

    fn reject(self, error: EngineError) -> FillError {
        tracing::debug!("rejected input fill: {}", error);
        FillError {
            engine: Box::new(self),
            error,
        }
    }
}

impl PreparedEngine {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The number of completed calls to [Self::run_once], including those made by the other run methods.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Run every operator once, in plan order.
    pub fn run_once(&mut self) {
        let (graph, plan, weights, arena) = (&self.graph, &self.plan, &self.weights, &mut self.arena);

        self.pool.install(|| {
            for op in plan.iter() {
                run_step(graph, arena, weights, op);
            }
        });

        self.state = EngineState::Running;
        self.runs += 1;
    }

    /// Run a couple of untimed iterations, to get caches and the thread pool warmed up.
    pub fn warmup(&mut self, iterations: usize) {
        for _ in 0..iterations {
            self.run_once();
        }
        tracing::debug!("warmed up with {} run(s)", iterations);
    }

    /// Call [Self::run_once] exactly `iterations` times and report the total wall-clock time.
    pub fn benchmark(&mut self, iterations: usize) -> BenchmarkReport {
        let start = Instant::now();
        for _ in 0..iterations {
            self.run_once();
        }
        let report = BenchmarkReport {
            iterations,
            elapsed: start.elapsed(),
        };

        tracing::info!("{}", report);
        report
    }

    /// Run once while timing every operator separately.
    ///
    /// The timing itself adds overhead, use [Self::benchmark] for throughput numbers.
    pub fn profile_once(&mut self) -> Profile {
        let (graph, plan, weights, arena) = (&self.graph, &self.plan, &self.weights, &mut self.arena);

        let profile = self.pool.install(|| {
            let mut profile = Profile::default();
            let start_all = Instant::now();

            for (i, op) in plan.iter().enumerate() {
                let start = Instant::now();
                run_step(graph, arena, weights, op);
                let time = start.elapsed().as_secs_f32();

                let operator = &graph[op];
                *profile.per_kind.entry(operator.kind.name()).or_insert(0.0) += time;
                profile.steps.push(format!(
                    "{: >4} time {:>10.4} ms, {} '{}'",
                    i,
                    time * 1e3,
                    operator.kind,
                    operator.debug_id
                ));
            }

            profile.total = start_all.elapsed().as_secs_f32();
            profile
        });

        self.state = EngineState::Running;
        self.runs += 1;
        profile
    }

    /// The graph output after the last run, `None` if the engine has not run yet.
    pub fn output(&self) -> Option<ArrayViewD<f32>> {
        if self.runs == 0 {
            return None;
        }
        Some(self.arena.get(self.output).view())
    }

    /// Stop running and hand out the final output, releasing all other buffers.
    pub fn finish(self) -> EngineOutput {
        tracing::debug!("{} -> {} after {} run(s)", self.state, EngineState::Done, self.runs);

        let logits = self.output().map(|view| view.to_owned());
        EngineOutput { logits, runs: self.runs }
    }
}

/// Run a single operator, taking its output buffer out of the arena while the inputs are borrowed.
fn run_step(graph: &Graph, arena: &mut TensorArena, weights: &[OperatorWeights], op: OperatorId) {
    let operator = &graph[op];

    let mut output = arena.take(operator.output);
    let inputs = operator.inputs.iter().map(|&t| arena.get(t)).collect_vec();
    run_operator(&operator.kind, &weights[op.index()], &inputs, &mut output);
    arena.put(operator.output, output);
}

fn build_pool(threads: usize) -> EngineResult<ThreadPool> {
    if threads == 0 {
        return Err(EngineError::InvalidConfiguration(
            "thread count must be positive, got 0".to_owned(),
        ));
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("rf-worker-{}", i))
        .build()?;
    Ok(pool)
}

impl BenchmarkReport {
    /// Average time per iteration, zero if no iterations ran.
    pub fn per_iteration(&self) -> Duration {
        if self.iterations == 0 {
            Duration::ZERO
        } else {
            self.elapsed.div_f64(self.iterations as f64)
        }
    }

    /// Iterations per second, zero if nothing was measured.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if self.iterations == 0 || secs == 0.0 {
            0.0
        } else {
            self.iterations as f64 / secs
        }
    }
}

impl Display for EngineState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

impl Display for BenchmarkReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} iteration(s) in {:.3} ms, {:.3} ms/it, throughput {:.2} it/s",
            self.iterations,
            self.elapsed.as_secs_f64() * 1e3,
            self.per_iteration().as_secs_f64() * 1e3,
            self.throughput()
        )
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Profile {{\n  steps: [\n")?;
        for step in &self.steps {
            writeln!(f, "    {}", step)?;
        }
        write!(f, "  ]\n\n")?;

        let total_ops: f32 = self.per_kind.values().sum();
        for (name, &time) in &self.per_kind {
            writeln!(
                f,
                "  {:<16} {:>10.4} ms  {:>4.2}",
                name,
                time * 1e3,
                time / total_ops
            )?;
        }

        writeln!(f, "  ==============================")?;
        writeln!(f, "  Total:           {:>10.4} ms", self.total * 1e3)?;
        writeln!(f, "}}")?;

        Ok(())
    }
}

impl Debug for Engine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("operators", &self.plan.len())
            .field("tensors", &self.graph.tensor_count())
            .field("allocated_bytes", &self.arena.allocated_bytes())
            .finish_non_exhaustive()
    }
}

impl Debug for PreparedEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedEngine")
            .field("state", &self.state)
            .field("settings", &self.settings)
            .field("operators", &self.plan.len())
            .field("runs", &self.runs)
            .finish_non_exhaustive()
    }
}
