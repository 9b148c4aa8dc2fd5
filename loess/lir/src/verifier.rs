//! Structural well-formedness checks for lir modules.
//!
//! The verifier runs on entry and exit of the optimization pipeline. A
//! failure here means the module handed to the optimizer was malformed, or
//! that an optimization introduced a miscompilation.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{
    lir_nodes::Inst,
    module::Module,
    types::ElemKind,
    value::{Mutability, Use, ValueId, ValueKind},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("activation %{name} has {count} allocs, expected exactly one")]
    BadAllocCount { name: String, count: usize },
    #[error("activation %{name} has {count} deallocs, expected exactly one")]
    BadDeallocCount { name: String, count: usize },
    #[error("dealloc of %{name} does not come after its alloc")]
    DeallocBeforeAlloc { name: String },
    #[error("instruction {position} uses %{name} outside of its lifetime")]
    UseOutsideLifetime { name: String, position: usize },
    #[error("instruction {position} mutates constant weight %{name}")]
    MutatedConstant { name: String, position: usize },
    #[error("type mismatch at instruction {position}: {message}")]
    TypeMismatch { position: usize, message: String },
    #[error("the use list of %{name} does not match the instruction operands")]
    BrokenUseList { name: String },
}

struct Lifetime {
    alloc: Option<usize>,
    deallocs: Vec<usize>,
}

impl Module {
    /// Checks the structural invariants of this module
    pub fn verify(&self) -> Result<(), VerifyError> {
        self.verify_use_lists()?;
        let lifetimes = self.verify_alloc_pairing()?;
        self.verify_operands(&lifetimes)?;
        Ok(())
    }

    /// Every operand has a matching use entry and every use entry has a
    /// matching operand
    fn verify_use_lists(&self) -> Result<(), VerifyError> {
        for (id, inst) in self.iter() {
            for (operand, (value, _)) in inst.operands().into_iter().enumerate() {
                let matching = self
                    .value(value)
                    .uses()
                    .iter()
                    .filter(|u| **u == Use { inst: id, operand })
                    .count();
                if matching != 1 {
                    return Err(VerifyError::BrokenUseList {
                        name: self.value(value).name.clone(),
                    });
                }
            }
        }
        for (_, value) in self.values() {
            for u in value.uses() {
                let valid = self.contains(u.inst)
                    && u.operand < self.inst(u.inst).operands().len();
                if !valid {
                    return Err(VerifyError::BrokenUseList {
                        name: value.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Every referenced activation is created exactly once and retired
    /// exactly once, in that order
    fn verify_alloc_pairing(&self) -> Result<FxHashMap<ValueId, Lifetime>, VerifyError> {
        let mut lifetimes: FxHashMap<ValueId, Lifetime> = FxHashMap::default();
        for (position, (_, inst)) in self.iter().enumerate() {
            match inst {
                Inst::Alloc { result } => {
                    let lifetime = lifetimes.entry(*result).or_insert(Lifetime {
                        alloc: None,
                        deallocs: Vec::new(),
                    });
                    if lifetime.alloc.is_some() {
                        return Err(VerifyError::BadAllocCount {
                            name: self.value(*result).name.clone(),
                            count: 2,
                        });
                    }
                    lifetime.alloc = Some(position);
                }
                Inst::Dealloc { target } => {
                    let origin = self.origin(*target);
                    lifetimes
                        .entry(origin)
                        .or_insert(Lifetime {
                            alloc: None,
                            deallocs: Vec::new(),
                        })
                        .deallocs
                        .push(position);
                }
                _ => {}
            }
        }

        for (value_id, value) in self.values() {
            if !value.is_activation() {
                continue;
            }
            // Retired activations keep their value entry around but must not
            // be referenced anymore.
            let Some(lifetime) = lifetimes.get(&value_id) else {
                if !value.uses().is_empty() {
                    return Err(VerifyError::BadAllocCount {
                        name: value.name.clone(),
                        count: 0,
                    });
                }
                continue;
            };
            let Some(alloc) = lifetime.alloc else {
                return Err(VerifyError::BadAllocCount {
                    name: value.name.clone(),
                    count: 0,
                });
            };
            if lifetime.deallocs.len() != 1 {
                return Err(VerifyError::BadDeallocCount {
                    name: value.name.clone(),
                    count: lifetime.deallocs.len(),
                });
            }
            if lifetime.deallocs[0] <= alloc {
                return Err(VerifyError::DeallocBeforeAlloc {
                    name: value.name.clone(),
                });
            }
        }
        Ok(lifetimes)
    }

    /// Operand uses lie inside the lifetime of their allocation origin,
    /// constants are never mutated and per-instruction type rules hold
    fn verify_operands(&self, lifetimes: &FxHashMap<ValueId, Lifetime>) -> Result<(), VerifyError> {
        for (position, (_, inst)) in self.iter().enumerate() {
            for (value, kind) in inst.operands() {
                let origin = self.origin(value);
                match self.value(origin).kind {
                    ValueKind::Activation => {
                        let lifetime = &lifetimes[&origin];
                        let alloc = lifetime.alloc.unwrap_or_else(|| {
                            unreachable!("checked by verify_alloc_pairing")
                        });
                        let dealloc = lifetime.deallocs[0];
                        if position <= alloc || position > dealloc {
                            return Err(VerifyError::UseOutsideLifetime {
                                name: self.value(value).name.clone(),
                                position,
                            });
                        }
                    }
                    ValueKind::Weight { mutability } => {
                        if mutability == Mutability::Constant && kind.is_write() {
                            return Err(VerifyError::MutatedConstant {
                                name: self.value(origin).name.clone(),
                                position,
                            });
                        }
                    }
                    ValueKind::View { .. } => {
                        unreachable!("origin never resolves to a view")
                    }
                }
            }
            self.verify_types(position, inst)?;
        }
        Ok(())
    }

    fn verify_types(&self, position: usize, inst: &Inst) -> Result<(), VerifyError> {
        let mismatch = |message: String| VerifyError::TypeMismatch { position, message };
        let ty = |value: ValueId| &self.value(value).ty;

        match *inst {
            Inst::Copy { dest, src }
            | Inst::Relu { dest, src }
            | Inst::ElementAddAcc { dest, src } => {
                if ty(dest) != ty(src) {
                    return Err(mismatch(format!("{} vs {}", ty(dest), ty(src))));
                }
            }
            Inst::ElementAdd { dest, lhs, rhs } | Inst::ElementMax { dest, lhs, rhs } => {
                if ty(dest) != ty(lhs) || ty(dest) != ty(rhs) {
                    return Err(mismatch(format!(
                        "{} vs {} vs {}",
                        ty(dest),
                        ty(lhs),
                        ty(rhs)
                    )));
                }
            }
            Inst::Matmul { dest, lhs, rhs } => {
                let (d, l, r) = (ty(dest), ty(lhs), ty(rhs));
                let shapes_ok = l.dims.len() == 2
                    && r.dims.len() == 2
                    && d.dims.len() == 2
                    && l.dims[1] == r.dims[0]
                    && d.dims == vec![l.dims[0], r.dims[1]];
                if !shapes_ok {
                    return Err(mismatch(format!("matmul {d} = {l} x {r}")));
                }
            }
            Inst::Reshape { dest, src } => {
                if ty(dest).elem != ty(src).elem || ty(dest).size() != ty(src).size() {
                    return Err(mismatch(format!("reshape {} from {}", ty(dest), ty(src))));
                }
            }
            Inst::Transpose {
                dest,
                src,
                ref shuffle,
            } => {
                let (d, s) = (ty(dest), ty(src));
                let mut seen = vec![false; s.dims.len()];
                let valid = d.elem == s.elem
                    && shuffle.len() == s.dims.len()
                    && d.dims.len() == s.dims.len()
                    && shuffle.iter().enumerate().all(|(index, &axis)| {
                        axis < s.dims.len()
                            && !std::mem::replace(&mut seen[axis], true)
                            && d.dims[index] == s.dims[axis]
                    });
                if !valid {
                    return Err(mismatch(format!(
                        "transpose {d} from {s} with shuffle {shuffle:?}"
                    )));
                }
            }
            Inst::TensorView { result, src } => {
                if ty(result).elem != ty(src).elem || ty(result).size() > ty(src).size() {
                    return Err(mismatch(format!("view {} of {}", ty(result), ty(src))));
                }
            }
            Inst::PoolMaxWithXy { src_xy, .. } => {
                if ty(src_xy).elem != ElemKind::Index {
                    return Err(mismatch(format!("pool coordinates are {}", ty(src_xy))));
                }
            }
            Inst::Softmax { selected, .. } | Inst::SoftmaxWithE { selected, .. } => {
                if ty(selected).elem != ElemKind::Index {
                    return Err(mismatch(format!("softmax selector is {}", ty(selected))));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
