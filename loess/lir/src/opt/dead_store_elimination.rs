//! Dead store elimination.
//!
//! A single backward pass is enough because the module is one straight-line
//! block: for each location remember the last seen read; a write without a
//! later read is dead. Writes into weights stay observable past the end of
//! the module, so every weight is seeded with a synthetic read at the last
//! instruction.

use rustc_hash::FxHashMap;

use crate::{
    lir_nodes::{Inst, OperandKind},
    log,
    module::{InstId, Module},
    value::ValueId,
};

pub fn eliminate_dead_stores(module: &mut Module) {
    if module.is_empty() {
        return;
    }

    // Maps each memory location to the instruction containing the last seen
    // read. A missing entry means the location is not read below the cursor.
    let mut last_read: FxHashMap<ValueId, InstId> = FxHashMap::default();
    let last = module.id_at(module.len() - 1);
    for &weight in module.weights() {
        last_read.insert(weight, last);
    }

    let mut erased: Vec<InstId> = Vec::new();
    for position in (0..module.len()).rev() {
        let id = module.id_at(position);
        let inst = module.inst(id);
        if matches!(
            inst,
            Inst::Alloc { .. } | Inst::Dealloc { .. } | Inst::TensorView { .. }
        ) {
            continue;
        }

        let operands = inst.operands();
        let mut mutated = 0usize;
        let mut dead_mutated = 0usize;
        for &(value, kind) in &operands {
            let origin = module.origin(value);
            if kind != OperandKind::In {
                mutated += 1;
                if !last_read.contains_key(&origin) {
                    dead_mutated += 1;
                }
                last_read.remove(&origin);
            }
        }

        // The instruction can go if everything it mutates is never read
        // afterwards. Its reads never occur in that case, so the read pass
        // below is skipped.
        if mutated > 0 && mutated == dead_mutated {
            log!("dead store at instruction {position}");
            erased.push(id);
            continue;
        }

        for &(value, kind) in &operands {
            let origin = module.origin(value);
            if kind != OperandKind::Out {
                last_read.insert(origin, id);
            }
        }
    }

    for id in erased {
        module.erase(id);
    }
}
