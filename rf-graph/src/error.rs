pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised while building a graph or planning its execution.
///
/// Both variants signal a bug in the network topology and abort construction,
/// they are never raised while a finished graph is being executed.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GraphError {
    /// Operator parameters are incompatible with the shapes of its operands.
    #[error("shape mismatch in '{operator}': {detail}")]
    ShapeMismatch { operator: String, detail: String },

    /// A tensor was referenced that is not available at that point in the graph.
    #[error("topology error: {0}")]
    TopologyError(String),
}

impl GraphError {
    pub(crate) fn shape_mismatch(operator: &str, detail: impl Into<String>) -> Self {
        GraphError::ShapeMismatch {
            operator: operator.to_owned(),
            detail: detail.into(),
        }
    }
}
