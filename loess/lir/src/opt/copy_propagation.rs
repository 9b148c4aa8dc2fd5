//! Copy elimination: rewrites uses across live intervals so that the copied
//! buffer takes over from its source, then deletes the copy.

use crate::{
    lir_nodes::{Inst, OperandKind},
    log,
    module::{InstId, Module},
    opt::liveness::{calculate_live_intervals, dump_live_intervals, enclosing_interval},
    value::{Mutability, ValueId},
};

pub fn copy_propagation(module: &mut Module) {
    let liveness = calculate_live_intervals(module);
    log!("live intervals:\n{}", dump_live_intervals(module, &liveness));
    let order: Vec<InstId> = module.iter().map(|(id, _)| id).collect();
    // Deletions are deferred to a final sweep so that the recorded positions
    // stay valid while rewriting.
    let mut erased: Vec<InstId> = Vec::new();

    for (index, &id) in order.iter().enumerate() {
        let Inst::Copy { dest, src } = *module.inst(id) else {
            continue;
        };
        if src == dest {
            continue;
        }

        // A weight source can only be propagated forward: the assignment to
        // dest moves backwards out of existence, which must not change the
        // observable effect of any write.
        if module.value(src).is_weight() {
            let forwardable = module.value(src).mutability() == Some(Mutability::Constant)
                && module.single_writer(dest) == Some(id)
                && !module.value(dest).is_weight();
            if !forwardable {
                continue;
            }
            log!(
                "forwarding constant weight %{} into %{}",
                module.value(src).name,
                module.value(dest).name
            );
            module.replace_all_uses_skip_dealloc(dest, src);
            erased.push(id);
            continue;
        }

        // Reads through a view would not be seen by the interval analysis;
        // bail out when either side has view users.
        if has_view_user(module, src) || has_view_user(module, dest) {
            continue;
        }

        let Some(src_intervals) = liveness.get(&src) else {
            continue;
        };
        let Some(dest_intervals) = liveness.get(&dest) else {
            continue;
        };
        let Some(s_index) = enclosing_interval(src_intervals, index) else {
            continue;
        };
        let Some(d_index) = enclosing_interval(dest_intervals, index) else {
            continue;
        };
        let s = src_intervals[s_index];
        let d = dest_intervals[d_index];

        // Either the copy is the last use of this definition of src and dest
        // takes over from here, or dest's definition lies inside src's live
        // definition and every later read of src can be served by dest.
        let takes_over = s.end <= d.begin;
        let enclosed = s.encloses(d);
        if !takes_over && !enclosed {
            continue;
        }
        // No earlier definition of dest may still be readable once src's
        // definition is moved over to dest.
        if d_index > 0 && dest_intervals[d_index - 1].end >= s.begin {
            continue;
        }
        // In the enclosed case dest must additionally not be redefined
        // inside the remainder of the src interval.
        if enclosed && has_writer_in_range(module, &order, dest, d.begin + 1, s.end) {
            continue;
        }
        // The rewritten definition and reads must stay inside dest's
        // lifetime: its alloc has to come before the src interval and its
        // dealloc after it.
        if module.value(dest).is_activation() {
            let alloc_ok = alloc_position(module, &order, dest).is_some_and(|p| p < s.begin);
            let dealloc_ok = dealloc_position(module, &order, dest).is_some_and(|p| p > s.end);
            if !alloc_ok || !dealloc_ok {
                continue;
            }
        }

        log!(
            "propagating copy at {index}: %{} takes over %{}",
            module.value(dest).name,
            module.value(src).name
        );
        // Rewrite every reference to src inside the src interval. At the
        // defining instruction only the write is redirected; reads at that
        // index still belong to the previous definition.
        let mut changed = 0usize;
        for position in s.begin..=s.end {
            let target = order[position];
            for (operand, (value, kind)) in module.inst(target).operands().into_iter().enumerate() {
                if value != src {
                    continue;
                }
                if position == s.begin && kind != OperandKind::Out {
                    continue;
                }
                module.set_operand(target, operand, dest);
                changed += 1;
            }
        }
        assert!(changed > 0, "copy propagation did not rewrite anything");
        erased.push(id);
    }

    for id in erased {
        let Inst::Copy { dest, src } = *module.inst(id) else {
            unreachable!()
        };
        // A later propagation may have redirected the write of an already
        // collapsed copy; it is then no longer a self-copy and must stay.
        if dest != src {
            continue;
        }
        module.erase(id);
    }
}

fn alloc_position(module: &Module, order: &[InstId], value: ValueId) -> Option<usize> {
    order
        .iter()
        .position(|&id| matches!(*module.inst(id), Inst::Alloc { result } if result == value))
}

fn dealloc_position(module: &Module, order: &[InstId], value: ValueId) -> Option<usize> {
    order.iter().position(
        |&id| matches!(*module.inst(id), Inst::Dealloc { target } if module.origin(target) == value),
    )
}

fn has_view_user(module: &Module, value: ValueId) -> bool {
    module
        .value(value)
        .uses()
        .iter()
        .any(|u| matches!(module.inst(u.inst), Inst::TensorView { .. }))
}

fn has_writer_in_range(
    module: &Module,
    order: &[InstId],
    value: ValueId,
    from: usize,
    to: usize,
) -> bool {
    for position in from..=to {
        for (other, kind) in module.inst(order[position]).operands() {
            if other == value && kind.is_write() {
                return true;
            }
        }
    }
    false
}
