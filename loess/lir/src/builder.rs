//! Construction interface for lir modules, used by the graph lowering and by
//! tests

use crate::{
    lir_nodes::Inst,
    module::{InstId, Module},
    types::Type,
    value::{Mutability, ValueId, ValueKind},
};

/// Builds a module by appending instructions one after another.
///
/// Activations that are still open when the builder is finished get their
/// dealloc appended automatically, in reverse allocation order.
pub struct ModuleBuilder {
    module: Module,
    active: Vec<ValueId>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder {
            module: Module::new(name),
            active: Vec::new(),
        }
    }

    pub fn weight(&mut self, name: &str, ty: Type, mutability: Mutability) -> ValueId {
        self.module.new_weight(name, ty, mutability)
    }

    pub fn alloc(&mut self, name: &str, ty: Type) -> ValueId {
        let result = self.module.new_value(name, ty, ValueKind::Activation);
        self.module.push(Inst::Alloc { result });
        self.active.push(result);
        result
    }

    pub fn dealloc(&mut self, target: ValueId) {
        self.active.retain(|&value| value != target);
        self.module.push(Inst::Dealloc { target });
    }

    pub fn tensor_view(&mut self, name: &str, src: ValueId, ty: Type) -> ValueId {
        let result = self.module.new_value(name, ty, ValueKind::View { src });
        self.module.push(Inst::TensorView { result, src });
        result
    }

    pub fn copy(&mut self, dest: ValueId, src: ValueId) -> InstId {
        self.module.push(Inst::Copy { dest, src })
    }

    pub fn splat(&mut self, dest: ValueId, value: f32) -> InstId {
        self.module.push(Inst::Splat { dest, value })
    }

    pub fn relu(&mut self, dest: ValueId, src: ValueId) -> InstId {
        self.module.push(Inst::Relu { dest, src })
    }

    pub fn element_add(&mut self, dest: ValueId, lhs: ValueId, rhs: ValueId) -> InstId {
        self.module.push(Inst::ElementAdd { dest, lhs, rhs })
    }

    pub fn element_add_acc(&mut self, dest: ValueId, src: ValueId) -> InstId {
        self.module.push(Inst::ElementAddAcc { dest, src })
    }

    pub fn element_max(&mut self, dest: ValueId, lhs: ValueId, rhs: ValueId) -> InstId {
        self.module.push(Inst::ElementMax { dest, lhs, rhs })
    }

    pub fn matmul(&mut self, dest: ValueId, lhs: ValueId, rhs: ValueId) -> InstId {
        self.module.push(Inst::Matmul { dest, lhs, rhs })
    }

    pub fn reshape(&mut self, dest: ValueId, src: ValueId) -> InstId {
        self.module.push(Inst::Reshape { dest, src })
    }

    pub fn transpose(&mut self, dest: ValueId, src: ValueId, shuffle: Vec<usize>) -> InstId {
        self.module.push(Inst::Transpose { dest, src, shuffle })
    }

    pub fn pool_max(
        &mut self,
        dest: ValueId,
        src: ValueId,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> InstId {
        self.module.push(Inst::PoolMax {
            dest,
            src,
            kernel,
            stride,
            pad,
        })
    }

    pub fn pool_max_with_xy(
        &mut self,
        dest: ValueId,
        src: ValueId,
        src_xy: ValueId,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> InstId {
        self.module.push(Inst::PoolMaxWithXy {
            dest,
            src,
            src_xy,
            kernel,
            stride,
            pad,
        })
    }

    pub fn softmax(&mut self, dest: ValueId, src: ValueId, selected: ValueId) -> InstId {
        self.module.push(Inst::Softmax {
            dest,
            src,
            selected,
        })
    }

    pub fn softmax_with_e(
        &mut self,
        dest: ValueId,
        src: ValueId,
        e: ValueId,
        selected: ValueId,
    ) -> InstId {
        self.module.push(Inst::SoftmaxWithE {
            dest,
            src,
            e,
            selected,
        })
    }

    pub fn debug_print(&mut self, src: ValueId, label: impl Into<String>) -> InstId {
        self.module.push(Inst::DebugPrint {
            src,
            label: label.into(),
        })
    }

    /// Closes all still-open activations and returns the finished module
    pub fn finish(mut self) -> Module {
        for target in std::mem::take(&mut self.active).into_iter().rev() {
            self.module.push(Inst::Dealloc { target });
        }
        self.module
    }
}
