use rf_graph::cpu::WeightInit;

use crate::error::{EngineError, EngineResult};

/// Settings for the engine.
///
/// Use `Default::default()` to get reasonable defaults.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct EngineSettings {
    /// Number of worker threads used inside a single operator. Must be positive.
    pub threads: usize,
    /// How weights are generated when the engine is allocated.
    pub weights: WeightInit,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            weights: WeightInit::default(),
        }
    }
}

/// The two launch parameters of a benchmark run.
///
/// Both are validated up front instead of being clamped, a non-positive value is always a mistake.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LaunchConfig {
    pub threads: usize,
    pub iterations: usize,
}

impl LaunchConfig {
    pub fn new(threads: i64, iterations: i64) -> EngineResult<Self> {
        Ok(LaunchConfig {
            threads: positive("thread count", threads)?,
            iterations: positive("iteration count", iterations)?,
        })
    }

    /// Engine settings for this launch, with the given weight initialization.
    pub fn settings(&self, weights: WeightInit) -> EngineSettings {
        EngineSettings {
            threads: self.threads,
            weights,
        }
    }
}

fn positive(name: &str, value: i64) -> EngineResult<usize> {
    if value <= 0 {
        return Err(EngineError::InvalidConfiguration(format!(
            "{} must be positive, got {}",
            name, value
        )));
    }
    usize::try_from(value).map_err(|_| EngineError::InvalidConfiguration(format!("{} {} is too large", name, value)))
}
