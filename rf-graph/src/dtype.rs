use std::fmt::{Display, Formatter};

/// The element format of a tensor.
///
/// Only single precision floats are used by the networks in this crate,
/// the enum exists so tensor declarations state their format explicitly.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum DType {
    #[default]
    F32,
}

impl DType {
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
        }
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
        }
    }
}
