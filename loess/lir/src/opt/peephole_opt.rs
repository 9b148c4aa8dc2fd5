//! Local instruction rewrites that canonicalize expensive shapes into
//! cheaper ones and expose opportunities for the other passes.

use crate::{
    lir_nodes::{Inst, OperandKind},
    log,
    module::Module,
    value::{ValueId, ValueKind},
};

pub fn peephole_optimize(module: &mut Module) {
    let mut position = 0;
    while position < module.len() {
        let id = module.id_at(position);
        match module.inst(id).clone() {
            // A pool that tracks the coordinates of each maximum is only
            // needed when somebody reads the coordinates.
            Inst::PoolMaxWithXy {
                dest,
                src,
                src_xy,
                kernel,
                stride,
                pad,
            } => {
                // The coordinate buffer must be an allocation with exactly
                // two users: this instruction and its dealloc.
                let xy_unused = module.value(src_xy).is_activation()
                    && module.value(src_xy).uses().len() == 2;
                if xy_unused {
                    log!("dropping unused pool coordinates %{}", module.value(src_xy).name);
                    module.insert(
                        position,
                        Inst::PoolMax {
                            dest,
                            src,
                            kernel,
                            stride,
                            pad,
                        },
                    );
                    module.erase(id);
                    continue;
                }
            }
            // Same for the intermediate exponentials of a softmax.
            Inst::SoftmaxWithE {
                dest,
                src,
                e,
                selected,
            } => {
                let origin = module.origin(e);
                let e_used = module
                    .value(origin)
                    .uses()
                    .iter()
                    .any(|u| {
                        let (_, kind) = module.inst(u.inst).operands()[u.operand];
                        kind != OperandKind::Out && u.inst != id
                    });
                // Dropping the write into a weight would be observable.
                if !e_used && module.value(origin).is_activation() {
                    module.insert(
                        position,
                        Inst::Softmax {
                            dest,
                            src,
                            selected,
                        },
                    );
                    module.erase(id);
                    continue;
                }
            }
            // A reshape is a type reinterpretation plus a copy.
            Inst::Reshape { dest, src } => {
                let view_ty = module.value(dest).ty.clone();
                let name = format!("{}.view", module.value(src).name);
                let view = module.new_value(&name, view_ty, ValueKind::View { src });
                module.insert(position, Inst::TensorView { result: view, src });
                module.insert(position + 1, Inst::Copy { dest, src: view });
                module.erase(id);
                continue;
            }
            // Transposing a splat does not change any element, only the
            // type. A view plus a copy does the same without the shuffle.
            Inst::Transpose { dest, src, .. } => {
                let splat_writer = module
                    .single_writer(src)
                    .is_some_and(|writer| matches!(module.inst(writer), Inst::Splat { .. }));
                if splat_writer {
                    let mut copy_src = src;
                    if module.value(src).ty != module.value(dest).ty {
                        let view_ty = module.value(dest).ty.clone();
                        let name = format!("{}.view", module.value(src).name);
                        copy_src = module.new_value(&name, view_ty, ValueKind::View { src });
                        module.insert(position, Inst::TensorView { result: copy_src, src });
                    }
                    let copy_at = module.position(id);
                    module.insert(copy_at, Inst::Copy { dest, src: copy_src });
                    module.erase(id);
                    continue;
                }
            }
            // Canonicalize so that the splat argument is on the right.
            Inst::ElementMax { dest, lhs, rhs } => {
                let is_splat = |module: &Module, value: ValueId| {
                    module
                        .single_writer(value)
                        .is_some_and(|writer| matches!(module.inst(writer), Inst::Splat { .. }))
                };
                if is_splat(module, lhs) && !is_splat(module, rhs) {
                    log!("canonicalizing element_max splat operand");
                    module.insert(
                        position,
                        Inst::ElementMax {
                            dest,
                            lhs: rhs,
                            rhs: lhs,
                        },
                    );
                    module.erase(id);
                    continue;
                }
            }
            // A view that does not change the type is its source.
            Inst::TensorView { result, src } => {
                if module.value(result).ty == module.value(src).ty
                    && !module.value(result).uses().is_empty()
                {
                    module.replace_all_uses_skip_dealloc(result, src);
                }
            }
            // Copies within the same buffer do nothing.
            Inst::Copy { dest, src } => {
                if module.origin(src) == module.origin(dest) {
                    log!("erasing self-copy into %{}", module.value(dest).name);
                    module.erase(id);
                    continue;
                }
            }
            _ => {}
        }
        position += 1;
    }
}
