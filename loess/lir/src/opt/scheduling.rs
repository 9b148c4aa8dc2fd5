//! Passes that shorten buffer lifetimes by rescheduling allocs and deallocs,
//! and that remove allocations nobody uses.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    lir_nodes::Inst,
    log,
    module::{InstId, Module},
    value::ValueId,
};

/// Moves every dealloc right after the last use of its allocation
pub fn hoist_dealloc(module: &mut Module) {
    // Maps each activation to its last non-dealloc user. A use of a view
    // counts as a use of its source tensor, so that the lifetime of a view
    // stays enclosed inside the lifetime of its source.
    let mut last_user: FxHashMap<ValueId, InstId> = FxHashMap::default();
    for (id, inst) in module.iter() {
        match inst {
            Inst::Dealloc { .. } => continue,
            Inst::Alloc { result } => {
                last_user.insert(*result, id);
            }
            _ => {
                for (value, _) in inst.operands() {
                    if let Some(origin) = module.alloc_origin(value) {
                        last_user.insert(origin, id);
                    }
                }
            }
        }
    }

    let deallocs: Vec<InstId> = module
        .iter()
        .filter(|(_, inst)| matches!(inst, Inst::Dealloc { .. }))
        .map(|(id, _)| id)
        .collect();
    for id in deallocs {
        let Inst::Dealloc { target } = *module.inst(id) else {
            unreachable!()
        };
        let origin = module.origin(target);
        let Some(&last) = last_user.get(&origin) else {
            continue;
        };
        let destination = module.position(last) + 1;
        if module.position(id) == destination {
            // The last use is already right before the deallocation.
            continue;
        }
        log!("hoisting dealloc of %{}", module.value(origin).name);
        module.move_to(id, destination);
    }
}

/// Moves every alloc right before the first use of its allocation
pub fn sink_allocs(module: &mut Module) {
    // Remove all of the allocs, memorizing the buffers that wait for
    // a placement.
    let mut pending: FxHashSet<ValueId> = FxHashSet::default();
    let allocs: Vec<InstId> = module
        .iter()
        .filter(|(_, inst)| matches!(inst, Inst::Alloc { .. }))
        .map(|(id, _)| id)
        .collect();
    for id in allocs {
        let Inst::Alloc { result } = *module.inst(id) else {
            unreachable!()
        };
        pending.insert(result);
        module.erase(id);
    }

    // Reinsert each alloc right before the first instruction referencing it.
    // Views reference their source buffer directly, so no origin resolution
    // is needed here.
    let mut position = 0;
    while position < module.len() {
        let id = module.id_at(position);
        for (value, _) in module.inst(id).operands() {
            if pending.remove(&value) {
                module.insert(position, Inst::Alloc { result: value });
                position += 1;
            }
        }
        position += 1;
    }

    assert!(pending.is_empty(), "not all allocs were placed");
}

/// Removes unused views, then deallocs that close unused allocations, then
/// the unused allocs themselves. The threshold of two users accounts for the
/// alloc/dealloc self-pairing.
pub fn delete_dead_allocs(module: &mut Module) {
    let dead_views: Vec<InstId> = module
        .iter()
        .filter_map(|(id, inst)| match inst {
            Inst::TensorView { result, .. } if module.value(*result).uses().is_empty() => Some(id),
            _ => None,
        })
        .collect();
    for id in dead_views {
        module.erase(id);
    }

    let dead_deallocs: Vec<InstId> = module
        .iter()
        .filter_map(|(id, inst)| match inst {
            Inst::Dealloc { target } if module.value(module.origin(*target)).uses().len() < 2 => {
                Some(id)
            }
            _ => None,
        })
        .collect();
    for id in dead_deallocs {
        module.erase(id);
    }

    let dead_allocs: Vec<InstId> = module
        .iter()
        .filter_map(|(id, inst)| match inst {
            Inst::Alloc { result } if module.value(*result).uses().len() < 2 => Some(id),
            _ => None,
        })
        .collect();
    for id in dead_allocs {
        let Inst::Alloc { result } = *module.inst(id) else {
            unreachable!()
        };
        log!("deleting dead alloc of %{}", module.value(result).name);
        module.erase(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::ModuleBuilder, types::Type, value::Mutability};

    #[test]
    fn hoist_moves_deallocs_next_to_the_last_use() {
        let mut b = ModuleBuilder::new("hoist");
        let out = b.weight("out", Type::float([4]), Mutability::Mutable);
        let a = b.alloc("a", Type::float([4]));
        let c = b.alloc("c", Type::float([4]));
        b.splat(a, 1.0); // 2
        b.relu(c, a); // 3: last use of a
        b.copy(out, c); // 4: last use of c
        let mut module = b.finish(); // 5: dealloc c, 6: dealloc a

        hoist_dealloc(&mut module);
        module.verify().unwrap();

        let rendered = module.to_string();
        let relu_line = rendered.lines().position(|l| l.contains("relu")).unwrap();
        let dealloc_a = rendered
            .lines()
            .position(|l| l.contains("dealloc @out %a"))
            .unwrap();
        assert_eq!(dealloc_a, relu_line + 1);
    }

    #[test]
    fn sink_places_allocs_before_their_first_use() {
        let mut b = ModuleBuilder::new("sink");
        let out = b.weight("out", Type::float([4]), Mutability::Mutable);
        let a = b.alloc("a", Type::float([4]));
        let c = b.alloc("c", Type::float([4]));
        b.splat(c, 2.0);
        b.relu(a, c);
        b.copy(out, a);
        let mut module = b.finish();

        sink_allocs(&mut module);
        module.verify().unwrap();

        let rendered = module.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        let alloc_a = lines.iter().position(|l| l.contains("%a = alloc")).unwrap();
        assert!(lines[alloc_a + 1].contains("relu"));
        let alloc_c = lines.iter().position(|l| l.contains("%c = alloc")).unwrap();
        assert!(lines[alloc_c + 1].contains("splat"));
    }

    #[test]
    fn dead_allocation_pairs_are_removed() {
        let mut b = ModuleBuilder::new("dead");
        let out = b.weight("out", Type::float([4]), Mutability::Mutable);
        let a = b.alloc("a", Type::float([4]));
        let unused = b.alloc("unused", Type::float([4]));
        let _view = b.tensor_view("view", unused, Type::float([2, 2]));
        b.splat(a, 1.0);
        b.copy(out, a);
        let mut module = b.finish();

        delete_dead_allocs(&mut module);
        module.verify().unwrap();

        assert!(!module.to_string().contains("unused"));
        assert_eq!(module.len(), 4);
    }
}
