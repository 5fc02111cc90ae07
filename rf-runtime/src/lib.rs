#![warn(missing_debug_implementations)]

//! Executes an [rf_graph] network on the CPU: allocate every tensor once, fill the input,
//! then replay the execution plan as often as needed.
//!
//! ```no_run
//! # use rf_graph::network::{build_network, NetworkConfig};
//! # use rf_runtime::config::EngineSettings;
//! # use rf_runtime::engine::Engine;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = build_network(&NetworkConfig::resnet50())?;
//!
//! let mut engine = Engine::from_network(network, EngineSettings::default())?;
//! engine.allocate_all()?;
//!
//! let mut engine = engine.fill_input(&vec![0.5; 3 * 224 * 224])?;
//! let report = engine.benchmark(10);
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```

pub use rf_graph;

pub use error::{EngineError, EngineResult, FillError};

/// Per-tensor buffer storage.
pub mod arena;
/// Engine and launch settings.
pub mod config;
/// The execution engine and its reports.
pub mod engine;
mod error;
/// Decoded image input.
pub mod image_input;
