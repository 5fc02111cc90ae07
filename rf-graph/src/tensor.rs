use std::fmt::{Debug, Display, Formatter};

use crate::dtype::DType;
use crate::operator::OperatorId;
use crate::shape::Shape;

/// A tensor in a [Graph](crate::graph::Graph).
///
/// This is a cheap handle, the declaration itself is owned by the graph and the backing memory
/// by whatever executes the graph. The `check` field ties the handle to the graph that created it.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TensorId {
    pub(crate) index: usize,
    pub(crate) check: u32,
}

/// Declaration of a tensor: everything about it except its data.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TensorInfo {
    /// `None` until the shape is either declared explicitly or inferred by the producing operator.
    pub shape: Option<Shape>,
    pub dtype: DType,
    pub debug_id: String,
    /// The operator that writes this tensor, `None` for the graph input and for declared tensors
    /// that have not been bound to an operator yet.
    pub producer: Option<OperatorId>,
    /// Number of operators that read this tensor.
    pub consumers: usize,
}

/// The lifecycle of a single tensor buffer.
///
/// Transitions are one-directional: `Declared -> ShapeFixed -> Allocated -> Filled`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TensorState {
    Declared,
    ShapeFixed,
    Allocated,
    Filled,
}

impl TensorInfo {
    pub fn state(&self) -> TensorState {
        match self.shape {
            None => TensorState::Declared,
            Some(_) => TensorState::ShapeFixed,
        }
    }

    pub fn size_bytes(&self) -> Option<usize> {
        self.shape.as_ref().map(|s| s.size() * self.dtype.size_bytes())
    }
}

impl TensorId {
    pub fn index(self) -> usize {
        self.index
    }
}

impl Debug for TensorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let TensorId { index, check } = self;
        if f.alternate() {
            write!(f, "TensorId {{ index: {}, check: {} }}", index, check)
        } else {
            write!(f, "TensorId({})", index)
        }
    }
}

impl Display for TensorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}
