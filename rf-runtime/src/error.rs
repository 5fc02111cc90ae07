use rf_graph::error::GraphError;
use rf_graph::tensor::TensorId;

use crate::engine::{Engine, EngineState};

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while configuring, allocating or filling an engine.
///
/// Running a prepared engine never fails, every check happens before the first run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("tensor {tensor:?} '{debug_id}' is already allocated")]
    DoubleAllocation { tensor: TensorId, debug_id: String },

    #[error("tensor {tensor:?} '{debug_id}' cannot be allocated, its shape is not fixed")]
    ShapeNotFixed { tensor: TensorId, debug_id: String },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cannot {operation} while the engine is {state}")]
    InvalidState { operation: &'static str, state: EngineState },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A rejected fill. The engine is handed back untouched, so it can be filled again with corrected data.
#[derive(Debug, thiserror::Error)]
#[error("failed to fill the input: {error}")]
pub struct FillError {
    pub engine: Box<Engine>,
    pub error: EngineError,
}

impl FillError {
    pub fn into_engine(self) -> Engine {
        *self.engine
    }
}

impl From<FillError> for EngineError {
    fn from(value: FillError) -> Self {
        value.error
    }
}
