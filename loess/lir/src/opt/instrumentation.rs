//! Debug instrumentation: brackets every real instruction with debug_print
//! instructions so that all inputs and outputs can be inspected at runtime.

use crate::{
    lir_nodes::{Inst, OperandKind},
    module::{InstId, Module},
};

pub fn instrument_debug(module: &mut Module) {
    let real: Vec<InstId> = module
        .iter()
        .filter(|(_, inst)| {
            !matches!(
                inst,
                Inst::DebugPrint { .. } | Inst::Alloc { .. } | Inst::Dealloc { .. }
            )
        })
        .map(|(id, _)| id)
        .collect();

    for (ordinal, id) in real.into_iter().enumerate() {
        let inst = module.inst(id).clone();
        let mnemonic = inst.to_string();

        // Dump inputs of the instruction before the instruction.
        for (value, kind) in inst.operands() {
            if kind != OperandKind::Out {
                let label = format!(
                    "debug_print.before.{}.{mnemonic}{ordinal}",
                    module.value(value).name
                );
                let position = module.position(id);
                module.insert(position, Inst::DebugPrint { src: value, label });
            }
        }

        // Dump outputs of the instruction after the instruction.
        let mut after = module.position(id) + 1;
        for (value, kind) in inst.operands() {
            if kind != OperandKind::In {
                let label = format!(
                    "debug_print.after.{}.{mnemonic}{ordinal}",
                    module.value(value).name
                );
                module.insert(after, Inst::DebugPrint { src: value, label });
                after += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{builder::ModuleBuilder, types::Type, value::Mutability};

    #[test]
    fn every_real_instruction_is_bracketed() {
        let mut b = ModuleBuilder::new("instrument");
        let out = b.weight("out", Type::float([4]), Mutability::Mutable);
        let a = b.alloc("a", Type::float([4]));
        b.splat(a, 1.0);
        b.copy(out, a);
        let mut module = b.finish();

        instrument_debug(&mut module);
        module.verify().unwrap();

        let rendered = module.to_string();
        // splat: one after-print. copy: one before-print and one after-print.
        assert!(rendered.contains("\"debug_print.after.a.splat0\""));
        assert!(rendered.contains("\"debug_print.before.a.copy1\""));
        assert!(rendered.contains("\"debug_print.after.out.copy1\""));
        let prints = module
            .iter()
            .filter(|(_, inst)| matches!(inst, Inst::DebugPrint { .. }))
            .count();
        assert_eq!(prints, 3);
    }
}
