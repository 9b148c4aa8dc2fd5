//! The optimization pipeline of the lir.
//!
//! Every pass mutates the module in place and preserves well-formedness; the
//! verifier runs on entry and exit. The pipeline itself is a data-defined
//! list of pass handles; disabling the optimizer skips the whole list.

pub mod buffer_sharing;
pub mod copy_propagation;
pub mod dead_store_elimination;
pub mod instrumentation;
pub mod liveness;
mod logger;
pub mod peephole_opt;
pub mod scheduling;

use loess_common::Config;

use crate::{
    lir_nodes::OperandKind,
    log,
    module::Module,
    value::Mutability,
    verifier::VerifyError,
};

type PassFn = fn(&mut Module);

/// The passes of the pipeline in execution order
const PIPELINE: &[(&str, PassFn)] = &[
    ("peephole", peephole_opt::peephole_optimize),
    ("share-buffers", buffer_sharing::share_buffers),
    ("delete-dead-allocs", scheduling::delete_dead_allocs),
    ("hoist-dealloc", scheduling::hoist_dealloc),
    ("sink-allocs", scheduling::sink_allocs),
    ("make-weights-const", make_weights_const),
    ("copy-propagation", copy_propagation::copy_propagation),
    ("peephole", peephole_opt::peephole_optimize),
    ("delete-dead-allocs", scheduling::delete_dead_allocs),
    ("eliminate-dead-stores", dead_store_elimination::eliminate_dead_stores),
    ("delete-dead-allocs", scheduling::delete_dead_allocs),
];

/// Upper bound for the fixpoint iteration; each round only shrinks or
/// canonicalizes the module, so this is never reached in practice
const MAX_ITERATIONS: usize = 8;

/// Runs the optimization pipeline over a module.
///
/// The pass list runs repeatedly until the module stops changing, so a
/// second `optimize` call is a no-op. The compilation mode in the config is
/// carried along for mode-dependent scheduling; the current pipeline is the
/// same for training and inference.
pub fn optimize(module: &mut Module, config: &Config) -> Result<(), VerifyError> {
    module.verify()?;
    if !config.optimize_lir {
        return Ok(());
    }

    let mut previous = module.to_string();
    for _ in 0..MAX_ITERATIONS {
        for (name, pass) in PIPELINE {
            log!("running pass {name}");
            pass(module);
        }
        let current = module.to_string();
        if current == previous {
            break;
        }
        previous = current;
    }

    if config.instrument_debug {
        log!("running pass instrument-debug");
        instrumentation::instrument_debug(module);
    }

    module.verify()
}

/// Weights that only ever get read become constant
fn make_weights_const(module: &mut Module) {
    for weight in module.weights().to_vec() {
        let read_only = module.value(weight).uses().iter().all(|u| {
            let (_, kind) = module.inst(u.inst).operands()[u.operand];
            kind == OperandKind::In
        });
        let mutability = if read_only {
            Mutability::Constant
        } else {
            Mutability::Mutable
        };
        module.set_mutability(weight, mutability);
    }
}
