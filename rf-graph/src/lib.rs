#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! A static dataflow graph for convolutional network inference, with surrounding utilities.
//!
//! The core type of this crate is [Graph](graph::Graph), an append-only arena of tensor declarations and operators.
//! Shapes are inferred and checked as operators are added, so a finished graph is always consistent.
//!
//! ```
//! # use rf_graph::network::{build_network, NetworkConfig};
//! # use rf_graph::plan::ExecutionPlan;
//! # use rf_graph::shape;
//! # fn main() -> Result<(), rf_graph::error::GraphError> {
//! // build resnet-50 from its stage descriptors
//! let network = build_network(&NetworkConfig::resnet50())?;
//! assert_eq!(network.graph.shape(network.logits)?, &shape![1000]);
//!
//! // flatten it into an execution order
//! let plan = ExecutionPlan::new(&network.graph)?;
//! assert_eq!(plan.len(), 125);
//! # Ok(())
//! # }
//! ```
//!
//! Executing a graph is handled by the `rf-runtime` crate, which uses the kernels in [cpu].

/// The [ndarray] crate is used for weight storage and CPU execution, and re-exported for convenience.
pub use ndarray;

/// The [DType](dtype::DType) enum.
pub mod dtype;
/// Graph construction and planning errors.
pub mod error;
/// The core graph datastructure.
pub mod graph;
/// Operator variants and shape inference.
pub mod operator;
/// The [Shape](shape::Shape) type and utilities.
pub mod shape;
pub mod tensor;

/// Stage descriptors and the network builder.
pub mod network;
/// Execution order computation.
pub mod plan;

/// Reference CPU kernels and weight binding.
pub mod cpu;
