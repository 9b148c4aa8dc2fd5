//! Storage fusion: redirects operand uses so that buffers with
//! non-overlapping live ranges share their backing memory.

use rustc_hash::FxHashSet;

use crate::{
    lir_nodes::{Inst, OperandKind},
    log,
    module::{InstId, Module},
    value::ValueId,
};

/// Walks the module in reverse, maintaining the set of buffers that still
/// hold information some later reader needs. Weights are always in that set.
pub fn share_buffers(module: &mut Module) {
    let mut live: FxHashSet<ValueId> = module.weights().iter().copied().collect();
    let mut out_buffers: FxHashSet<ValueId> = FxHashSet::default();

    let mut position = module.len();
    while position > 0 {
        position -= 1;
        let id = module.id_at(position);

        out_buffers.clear();
        for (value, kind) in module.inst(id).operands() {
            let Some(origin) = module.alloc_origin(value) else {
                continue;
            };
            match kind {
                // An out dependency kills the buffer: its previous contents
                // are unused before this write point.
                OperandKind::Out => {
                    if live.remove(&origin) {
                        out_buffers.insert(origin);
                    }
                }
                // An inout dependency consumes the buffer contents.
                OperandKind::InOut => {
                    live.insert(origin);
                }
                // An in use of a buffer this instruction also writes means
                // the value is consumed at this point as well.
                OperandKind::In => {
                    if out_buffers.contains(&origin) {
                        live.insert(origin);
                    }
                }
            }
        }

        try_to_share_buffers_for_inst(module, &live, id);

        // The inputs of this instruction must stay alive above it. The
        // operands are re-read because sharing may have rewritten them.
        for (value, kind) in module.inst(id).operands() {
            if let Some(origin) = module.alloc_origin(value) {
                if kind != OperandKind::Out {
                    live.insert(origin);
                }
            }
        }
    }
}

/// Tries to fuse one pair of operand buffers of a single instruction.
/// At this point the out buffers of the instruction are marked dead and its
/// in buffers have not been marked alive yet.
fn try_to_share_buffers_for_inst(module: &mut Module, live: &FxHashSet<ValueId>, id: InstId) {
    let operands = module.inst(id).operands();
    for first in 0..operands.len() {
        for second in first + 1..operands.len() {
            let dest = module.origin(operands[first].0);
            let src = module.origin(operands[second].0);
            // Buffers must be different, but of the same type.
            if dest == src || module.value(dest).ty != module.value(src).ty {
                continue;
            }
            if !module.inst(id).is_inplace_op(first, second) {
                continue;
            }
            // If both buffers are dead at this point, they can share storage.
            if live.contains(&dest) || live.contains(&src) {
                continue;
            }
            // The inherited uses must fall inside src's allocated range.
            let Some(src_alloc) = alloc_position(module, src) else {
                continue;
            };
            if let Some((dest_first, _)) = use_range(module, dest) {
                if dest_first <= src_alloc {
                    continue;
                }
            }
            log!(
                "sharing buffers %{} and %{}",
                module.value(dest).name,
                module.value(src).name
            );
            module.replace_all_uses_skip_dealloc(dest, src);
            // Uses taken over from dest may reach below src's dealloc;
            // extend src's lifetime downward to cover them.
            if let (Some((_, last_use)), Some(dealloc)) =
                (use_range(module, src), dealloc_id(module, src))
            {
                if module.position(dealloc) <= last_use {
                    module.move_to(dealloc, last_use + 1);
                }
            }
            return;
        }
    }
}

/// First and last position referencing a buffer rooted at `value`, ignoring
/// its dealloc
fn use_range(module: &Module, value: ValueId) -> Option<(usize, usize)> {
    let mut range = None;
    for (position, (_, inst)) in module.iter().enumerate() {
        if matches!(inst, Inst::Dealloc { .. }) {
            continue;
        }
        let references = inst
            .operands()
            .iter()
            .any(|&(operand, _)| module.origin(operand) == value);
        if references {
            range = Some(match range {
                None => (position, position),
                Some((first, _)) => (first, position),
            });
        }
    }
    range
}

fn alloc_position(module: &Module, value: ValueId) -> Option<usize> {
    module
        .iter()
        .position(|(_, inst)| matches!(*inst, Inst::Alloc { result } if result == value))
}

fn dealloc_id(module: &Module, value: ValueId) -> Option<InstId> {
    module
        .iter()
        .find(|(_, inst)| matches!(**inst, Inst::Dealloc { target } if module.origin(target) == value))
        .map(|(id, _)| id)
}
