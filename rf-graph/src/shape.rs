use std::convert::TryInto;
use std::fmt::{Debug, Display, Formatter};

use itertools::Itertools;

#[macro_export]
macro_rules! shape {
    [$($value:expr),* $(,)?] => {
        $crate::shape::Shape::new(vec![$($value as usize),*])
    };
}

/// A fully concrete tensor shape.
///
/// Feature maps use `[channels, height, width]`, fully connected values are a flat `[features]` vector.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Shape {
    pub dims: Vec<usize>,
}

impl Shape {
    pub const SCALAR: Shape = Shape { dims: vec![] };

    pub fn new(dims: Vec<usize>) -> Shape {
        Shape { dims }
    }

    pub fn chw(channels: usize, height: usize, width: usize) -> Shape {
        Shape::new(vec![channels, height, width])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The number of elements in a tensor with this shape.
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn as_1(&self) -> Option<usize> {
        match self.dims.as_slice() {
            &[d] => Some(d),
            _ => None,
        }
    }

    pub fn as_3(&self) -> Option<[usize; 3]> {
        self.dims.as_slice().try_into().ok()
    }

    #[track_caller]
    pub fn unwrap_3(&self) -> [usize; 3] {
        self.as_3()
            .unwrap_or_else(|| panic!("Expected rank 3 shape, got {:?}", self))
    }

    /// Build a new shape with the extent at `axis` replaced by `size`.
    pub fn replace(&self, axis: usize, size: usize) -> Shape {
        assert!(axis < self.rank(), "Axis {} out of bounds for {:?}", axis, self);
        let mut dims = self.dims.clone();
        dims[axis] = size;
        Shape::new(dims)
    }
}

impl Debug for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Shape{}", self)
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})", self.dims.iter().join(" x "))
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims.to_vec())
    }
}
