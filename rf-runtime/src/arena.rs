use rf_graph::cpu::Tensor;
use rf_graph::graph::Graph;
use rf_graph::ndarray::IxDyn;
use rf_graph::tensor::{TensorId, TensorState};

use crate::error::{EngineError, EngineResult};

/// Backing storage for every tensor of a graph, indexed by [TensorId].
///
/// Each buffer is allocated exactly once and then reused for every run.
/// While an operator writes its output the buffer is temporarily taken out of the arena,
/// so the single writer never aliases any of the readers.
#[derive(Debug)]
pub struct TensorArena {
    buffers: Vec<Option<Tensor>>,
    states: Vec<TensorState>,
}

impl TensorArena {
    pub fn new(graph: &Graph) -> Self {
        let states = graph.tensors().map(|t| graph[t].state()).collect();
        TensorArena {
            buffers: vec![None; graph.tensor_count()],
            states,
        }
    }

    pub fn state(&self, tensor: TensorId) -> TensorState {
        self.states[tensor.index()]
    }

    /// Allocate zeroed storage for `tensor`, using the shape fixed in `graph`.
    pub fn allocate(&mut self, graph: &Graph, tensor: TensorId) -> EngineResult<()> {
        let info = &graph[tensor];
        let state = &mut self.states[tensor.index()];

        match *state {
            TensorState::Declared => Err(EngineError::ShapeNotFixed {
                tensor,
                debug_id: info.debug_id.clone(),
            }),
            TensorState::Allocated | TensorState::Filled => Err(EngineError::DoubleAllocation {
                tensor,
                debug_id: info.debug_id.clone(),
            }),
            TensorState::ShapeFixed => {
                // the state says the shape is fixed, so this is always Some
                let shape = info.shape.as_ref().ok_or_else(|| EngineError::ShapeNotFixed {
                    tensor,
                    debug_id: info.debug_id.clone(),
                })?;

                self.buffers[tensor.index()] = Some(Tensor::zeros(IxDyn(&shape.dims)));
                *state = TensorState::Allocated;
                Ok(())
            }
        }
    }

    /// Overwrite the contents of an allocated tensor with `data`, which must match its element count.
    pub fn fill(&mut self, tensor: TensorId, data: &[f32]) -> EngineResult<()> {
        let buffer = match &mut self.buffers[tensor.index()] {
            Some(buffer) => buffer,
            None => {
                return Err(EngineError::ShapeMismatch(format!(
                    "{:?} is not allocated, it cannot be filled",
                    tensor
                )))
            }
        };

        if buffer.len() != data.len() {
            return Err(EngineError::ShapeMismatch(format!(
                "{:?} with shape {:?} holds {} elements, got {}",
                tensor,
                buffer.shape(),
                buffer.len(),
                data.len()
            )));
        }

        buffer.iter_mut().zip(data).for_each(|(b, &d)| *b = d);
        self.states[tensor.index()] = TensorState::Filled;
        Ok(())
    }

    /// Borrow a tensor that has been written at least once.
    pub fn get(&self, tensor: TensorId) -> &Tensor {
        debug_assert_eq!(self.state(tensor), TensorState::Filled, "{:?} read before it was written", tensor);
        self.buffers[tensor.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("{:?} is not allocated or currently being written", tensor))
    }

    /// Take the buffer of `tensor` out of the arena so it can be written while other tensors are borrowed.
    pub fn take(&mut self, tensor: TensorId) -> Tensor {
        self.buffers[tensor.index()]
            .take()
            .unwrap_or_else(|| panic!("{:?} is not allocated or already taken", tensor))
    }

    /// Return a buffer previously obtained with [Self::take], marking it as written.
    pub fn put(&mut self, tensor: TensorId, buffer: Tensor) {
        let slot = &mut self.buffers[tensor.index()];
        debug_assert!(slot.is_none(), "{:?} was returned twice", tensor);
        *slot = Some(buffer);
        self.states[tensor.index()] = TensorState::Filled;
    }

    /// Total number of bytes held by allocated buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers
            .iter()
            .flatten()
            .map(|b| b.len() * std::mem::size_of::<f32>())
            .sum()
    }
}
