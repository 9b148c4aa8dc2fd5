use std::fmt;

use itertools::Itertools;

/// The element kind of a memory location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    /// Floating point data
    Float,
    /// Integer indices, e.g. the coordinates produced by a max pool
    Index,
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemKind::Float => f.write_str("float"),
            ElemKind::Index => f.write_str("index"),
        }
    }
}

/// The type of a memory location: an element kind plus a shape
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub elem: ElemKind,
    pub dims: Vec<usize>,
}

impl Type {
    pub fn new(elem: ElemKind, dims: impl Into<Vec<usize>>) -> Self {
        Type {
            elem,
            dims: dims.into(),
        }
    }

    pub fn float(dims: impl Into<Vec<usize>>) -> Self {
        Type::new(ElemKind::Float, dims)
    }

    pub fn index(dims: impl Into<Vec<usize>>) -> Self {
        Type::new(ElemKind::Index, dims)
    }

    /// The number of elements this type holds
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims = self.dims.iter().map(ToString::to_string).join(" x ");
        write!(f, "{}<{}>", self.elem, dims)
    }
}
