//! Contains every instruction that can appear in a lir module.
//!
//! Note that changing an operand signature can lead to miscompilations if it
//! isn't also updated at the optimizers!

use crate::value::ValueId;

/// How an instruction accesses one of its operands.
///
/// The ordering of the variants matters: liveness analysis sorts operand
/// groups so that reads are observed before writes at the same instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperandKind {
    In,
    InOut,
    Out,
}

impl OperandKind {
    pub fn is_read(self) -> bool {
        matches!(self, OperandKind::In | OperandKind::InOut)
    }

    pub fn is_write(self) -> bool {
        matches!(self, OperandKind::Out | OperandKind::InOut)
    }
}

/// Any instruction.
///
/// The result values of [`Inst::Alloc`] and [`Inst::TensorView`] are
/// definitions, not operands; they do not appear in use lists.
#[derive(Debug, Clone, PartialEq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Inst {
    /// Creates an activation buffer
    Alloc { result: ValueId },
    /// Retires an activation buffer
    Dealloc { target: ValueId },
    /// Creates a value aliasing a reinterpretation of another value
    TensorView { result: ValueId, src: ValueId },
    Copy {
        dest: ValueId,
        src: ValueId,
    },
    /// Fills the destination with a single constant
    Splat {
        dest: ValueId,
        value: f32,
    },
    Relu {
        dest: ValueId,
        src: ValueId,
    },
    ElementAdd {
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    /// Accumulates into the destination: `dest += src`
    ElementAddAcc {
        dest: ValueId,
        src: ValueId,
    },
    ElementMax {
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Matmul {
        dest: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    },
    Reshape {
        dest: ValueId,
        src: ValueId,
    },
    Transpose {
        dest: ValueId,
        src: ValueId,
        shuffle: Vec<usize>,
    },
    PoolMax {
        dest: ValueId,
        src: ValueId,
        kernel: usize,
        stride: usize,
        pad: usize,
    },
    /// Max pool that additionally records the coordinates of each maximum
    PoolMaxWithXy {
        dest: ValueId,
        src: ValueId,
        src_xy: ValueId,
        kernel: usize,
        stride: usize,
        pad: usize,
    },
    Softmax {
        dest: ValueId,
        src: ValueId,
        selected: ValueId,
    },
    /// Softmax that additionally stores the intermediate exponentials
    SoftmaxWithE {
        dest: ValueId,
        src: ValueId,
        e: ValueId,
        selected: ValueId,
    },
    /// Dumps the contents of a value at runtime
    DebugPrint {
        src: ValueId,
        label: String,
    },
}

impl Inst {
    /// The operands of this instruction in signature order
    pub fn operands(&self) -> Vec<(ValueId, OperandKind)> {
        use OperandKind::{In, InOut, Out};
        match *self {
            Inst::Alloc { .. } => vec![],
            Inst::Dealloc { target } => vec![(target, Out)],
            Inst::TensorView { src, .. } => vec![(src, In)],
            Inst::Copy { dest, src }
            | Inst::Relu { dest, src }
            | Inst::Reshape { dest, src }
            | Inst::Transpose { dest, src, .. }
            | Inst::PoolMax { dest, src, .. } => vec![(dest, Out), (src, In)],
            Inst::Splat { dest, .. } => vec![(dest, Out)],
            Inst::ElementAdd { dest, lhs, rhs }
            | Inst::ElementMax { dest, lhs, rhs }
            | Inst::Matmul { dest, lhs, rhs } => vec![(dest, Out), (lhs, In), (rhs, In)],
            Inst::ElementAddAcc { dest, src } => vec![(dest, InOut), (src, In)],
            Inst::PoolMaxWithXy {
                dest, src, src_xy, ..
            } => vec![(dest, Out), (src, In), (src_xy, Out)],
            Inst::Softmax {
                dest,
                src,
                selected,
            } => vec![(dest, Out), (src, In), (selected, In)],
            Inst::SoftmaxWithE {
                dest,
                src,
                e,
                selected,
            } => vec![(dest, Out), (src, In), (e, Out), (selected, In)],
            Inst::DebugPrint { src, .. } => vec![(src, In)],
        }
    }

    /// Mutable slots for the operands, in the same order as [`Inst::operands`]
    pub(crate) fn operands_mut(&mut self) -> Vec<&mut ValueId> {
        match self {
            Inst::Alloc { .. } => vec![],
            Inst::Dealloc { target } => vec![target],
            Inst::TensorView { src, .. } => vec![src],
            Inst::Copy { dest, src }
            | Inst::Relu { dest, src }
            | Inst::Reshape { dest, src }
            | Inst::Transpose { dest, src, .. }
            | Inst::PoolMax { dest, src, .. }
            | Inst::ElementAddAcc { dest, src } => vec![dest, src],
            Inst::Splat { dest, .. } => vec![dest],
            Inst::ElementAdd { dest, lhs, rhs }
            | Inst::ElementMax { dest, lhs, rhs }
            | Inst::Matmul { dest, lhs, rhs } => vec![dest, lhs, rhs],
            Inst::PoolMaxWithXy {
                dest, src, src_xy, ..
            } => vec![dest, src, src_xy],
            Inst::Softmax {
                dest,
                src,
                selected,
            } => vec![dest, src, selected],
            Inst::SoftmaxWithE {
                dest,
                src,
                e,
                selected,
            } => vec![dest, src, e, selected],
            Inst::DebugPrint { src, .. } => vec![src],
        }
    }

    /// The value this instruction defines, if any
    pub fn result(&self) -> Option<ValueId> {
        match *self {
            Inst::Alloc { result } | Inst::TensorView { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Whether the operand slots `first` and `second` may legally share
    /// backing storage. This predicate is the only thing that guarantees
    /// semantic equivalence after storage fusion.
    pub fn is_inplace_op(&self, first: usize, second: usize) -> bool {
        match self {
            Inst::Copy { .. } | Inst::Relu { .. } => (first, second) == (0, 1),
            Inst::ElementAdd { .. } | Inst::ElementMax { .. } => {
                first == 0 && (second == 1 || second == 2)
            }
            _ => false,
        }
    }
}
