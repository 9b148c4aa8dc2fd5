//! End-to-end tests of the lir optimization pipeline.

use expect_test::expect;

use loess::demo;
use loess::{optimize, CompilationMode, Config};
use loess_lir::{Inst, Module, ModuleBuilder, Mutability, Type};

fn run(module: &mut Module) {
    optimize(module, &Config::default()).unwrap();
}

#[test]
fn trivial_copy_is_eliminated() {
    let mut b = ModuleBuilder::new("trivial_copy");
    let out = b.weight("out", Type::float([4]), Mutability::Mutable);
    let a = b.alloc("a", Type::float([4]));
    let c = b.alloc("c", Type::float([4]));
    b.splat(a, 3.0);
    b.copy(c, a);
    b.copy(out, c);
    let mut module = b.finish();

    run(&mut module);

    expect![[r#"
        module trivial_copy {
          weights:
            %out: float<4> mutable
          body:
            splat @out %out, value 3
        }"#]]
    .assert_eq(&module.to_string());
}

#[test]
fn read_only_weights_become_constant() {
    let mut b = ModuleBuilder::new("constancy");
    let w = b.weight("w", Type::float([4]), Mutability::Mutable);
    let out = b.weight("out", Type::float([4]), Mutability::Mutable);
    let a = b.alloc("a", Type::float([4]));
    b.relu(a, w);
    b.copy(out, a);
    let mut module = b.finish();

    run(&mut module);

    assert_eq!(module.value(w).mutability(), Some(Mutability::Constant));
    assert_eq!(module.value(out).mutability(), Some(Mutability::Mutable));
}

#[test]
fn dead_store_is_eliminated() {
    let mut b = ModuleBuilder::new("dead_store");
    let out = b.weight("out", Type::float([4]), Mutability::Mutable);
    let a = b.alloc("a", Type::float([4]));
    b.splat(a, 1.0);
    b.splat(a, 2.0);
    b.copy(out, a);
    let mut module = b.finish();

    run(&mut module);

    let rendered = module.to_string();
    assert!(!rendered.contains("value 1"));
    assert!(rendered.contains("value 2"));
}

#[test]
fn reshape_is_lowered_to_a_view() {
    let mut b = ModuleBuilder::new("reshape_demo");
    let input = b.weight("in", Type::float([4]), Mutability::Mutable);
    let out = b.weight("out", Type::float([2, 2]), Mutability::Mutable);
    let x = b.alloc("x", Type::float([4]));
    let d = b.alloc("d", Type::float([2, 2]));
    b.relu(x, input);
    b.reshape(d, x);
    b.copy(out, d);
    let mut module = b.finish();

    run(&mut module);

    expect![[r#"
        module reshape_demo {
          weights:
            %in: float<4> constant
            %out: float<2 x 2> mutable
          body:
            %x = alloc float<4>
            relu @out %x, @in %in
            %x.view = tensor_view @in %x : float<2 x 2>
            copy @out %out, @in %x.view
            dealloc @out %x
        }"#]]
    .assert_eq(&module.to_string());
}

#[test]
fn overlapping_buffers_are_not_fused() {
    let mut b = ModuleBuilder::new("share_conflict");
    let out1 = b.weight("out1", Type::float([4]), Mutability::Mutable);
    let out2 = b.weight("out2", Type::float([4]), Mutability::Mutable);
    let a = b.alloc("a", Type::float([4]));
    let c = b.alloc("c", Type::float([4]));
    b.splat(a, 1.0);
    b.relu(c, a);
    b.copy(out1, c);
    b.copy(out2, a); // a is still live across the relu
    let mut module = b.finish();

    run(&mut module);

    // Both outputs still receive their own result.
    let rendered = module.to_string();
    assert!(rendered.contains("@out %out1"));
    assert!(rendered.contains("@out %out2"));
}

#[test]
fn transpose_of_a_splat_is_rewritten() {
    let mut b = ModuleBuilder::new("transpose_splat");
    let out = b.weight("out", Type::float([3, 2]), Mutability::Mutable);
    let s = b.alloc("s", Type::float([2, 3]));
    let d = b.alloc("d", Type::float([3, 2]));
    b.splat(s, 7.0);
    b.transpose(d, s, vec![1, 0]);
    b.copy(out, d);
    let mut module = b.finish();

    run(&mut module);

    let rendered = module.to_string();
    assert!(!rendered.contains("transpose"));
    assert!(rendered.contains("tensor_view"));
}

#[test]
fn pipeline_is_idempotent() {
    let mut module = demo::mlp();
    run(&mut module);
    let once = module.to_string();
    run(&mut module);
    assert_eq!(once, module.to_string());
}

#[test]
fn disabled_optimizer_only_verifies() {
    let mut module = demo::mlp();
    let before = module.to_string();
    let config = Config {
        optimize_lir: false,
        ..Config::default()
    };
    optimize(&mut module, &config).unwrap();
    assert_eq!(before, module.to_string());
}

#[test]
fn optimizing_the_demo_network_shrinks_it() {
    let mut module = demo::mlp();
    let instructions = module.len();
    let allocations = count_allocs(&module);

    run(&mut module);

    assert!(module.len() < instructions);
    assert!(count_allocs(&module) < allocations);
    // All weights that are only read ended up constant.
    for &weight in module.weights() {
        let read_only = module.value(weight).uses().iter().all(|u| {
            let (_, kind) = module.inst(u.inst).operands()[u.operand];
            kind == loess_lir::OperandKind::In
        });
        let expected = if read_only {
            Mutability::Constant
        } else {
            Mutability::Mutable
        };
        assert_eq!(module.value(weight).mutability(), Some(expected));
    }
}

#[test]
fn allocs_and_deallocs_are_tight_after_optimization() {
    let mut module = demo::mlp();
    run(&mut module);

    let order: Vec<_> = module.iter().map(|(id, _)| id).collect();
    for (position, &id) in order.iter().enumerate() {
        match *module.inst(id) {
            // Every alloc sits immediately before the instruction that first
            // uses it, apart from further allocs placed at the same point.
            Inst::Alloc { result } => {
                let mut next = position + 1;
                while matches!(module.inst(order[next]), Inst::Alloc { .. }) {
                    next += 1;
                }
                let uses_result = module
                    .inst(order[next])
                    .operands()
                    .iter()
                    .any(|&(value, _)| value == result);
                assert!(uses_result, "alloc of %{} is not sunk", module.value(result).name);
            }
            // Every dealloc sits immediately after the last use, apart from
            // other deallocs hoisted to the same point.
            Inst::Dealloc { target } => {
                let origin = module.origin(target);
                let mut previous = position - 1;
                while matches!(module.inst(order[previous]), Inst::Dealloc { .. }) {
                    previous -= 1;
                }
                let last_user = module.inst(order[previous]);
                let uses_origin = last_user
                    .operands()
                    .iter()
                    .any(|&(value, _)| module.origin(value) == origin)
                    || last_user.result().map(|result| module.origin(result)) == Some(origin);
                assert!(
                    uses_origin,
                    "dealloc of %{} is not hoisted",
                    module.value(origin).name
                );
            }
            _ => {}
        }
    }
}

#[test]
fn live_intervals_of_the_demo_network_are_disjoint() {
    let module = demo::mlp();
    let liveness = loess_lir::opt::liveness::calculate_live_intervals(&module);
    for intervals in liveness.values() {
        for interval in intervals {
            assert!(interval.begin <= interval.end);
        }
        for pair in intervals.windows(2) {
            assert!(pair[0].begin < pair[1].begin);
            assert!(pair[0].end <= pair[1].begin);
        }
    }
}

#[test]
fn instrumentation_brackets_the_code() {
    let mut b = ModuleBuilder::new("instrumented");
    let out = b.weight("out", Type::float([4]), Mutability::Mutable);
    let a = b.alloc("a", Type::float([4]));
    b.splat(a, 1.0);
    b.copy(out, a);
    let mut module = b.finish();

    let config = Config {
        instrument_debug: true,
        mode: CompilationMode::Infer,
        ..Config::default()
    };
    optimize(&mut module, &config).unwrap();

    let rendered = module.to_string();
    assert!(rendered.contains("debug_print.after"));
    // The pipeline collapsed the module into a single splat of the output,
    // which the instrumentation then brackets.
    assert!(rendered.contains("debug_print.after.out.splat0"));
}

/// Small deterministic generator so the random modules are reproducible.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

#[test]
fn random_modules_survive_the_pipeline() {
    for seed in 1..=24u64 {
        let mut rng = XorShift(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let mut b = ModuleBuilder::new(format!("random_{seed}"));
        let out = b.weight("out", Type::float([4]), Mutability::Mutable);
        let input = b.weight("in", Type::float([4]), Mutability::Mutable);

        let buffers: Vec<_> = (0..4)
            .map(|index| b.alloc(&format!("t{index}"), Type::float([4])))
            .collect();
        // Buffers that hold a defined value and may be read.
        let mut initialized = vec![];
        b.splat(buffers[0], 1.0);
        initialized.push(buffers[0]);

        for _ in 0..16 {
            let dest = buffers[rng.below(buffers.len())];
            let read = |rng: &mut XorShift, initialized: &[_]| {
                initialized[rng.below(initialized.len())]
            };
            match rng.below(6) {
                0 => {
                    b.splat(dest, rng.below(10) as f32);
                }
                1 => {
                    let src = read(&mut rng, &initialized);
                    if src != dest {
                        b.copy(dest, src);
                    } else {
                        b.splat(dest, 0.5);
                    }
                }
                2 => {
                    let src = read(&mut rng, &initialized);
                    b.relu(dest, src);
                }
                3 => {
                    let lhs = read(&mut rng, &initialized);
                    let rhs = read(&mut rng, &initialized);
                    b.element_add(dest, lhs, rhs);
                }
                4 => {
                    let rhs = read(&mut rng, &initialized);
                    b.element_max(dest, input, rhs);
                }
                _ => {
                    if initialized.contains(&dest) {
                        let src = read(&mut rng, &initialized);
                        b.element_add_acc(dest, src);
                    } else {
                        b.splat(dest, 0.0);
                    }
                }
            }
            if !initialized.contains(&dest) {
                initialized.push(dest);
            }
        }
        let result = initialized[initialized.len() - 1];
        b.copy(out, result);
        let mut module = b.finish();

        optimize(&mut module, &Config::default()).unwrap();

        // Liveness stays disjoint on the optimized module.
        let liveness = loess_lir::opt::liveness::calculate_live_intervals(&module);
        for intervals in liveness.values() {
            for pair in intervals.windows(2) {
                assert!(pair[0].begin < pair[1].begin);
                assert!(pair[0].end <= pair[1].begin);
            }
        }
    }
}

fn count_allocs(module: &Module) -> usize {
    module
        .iter()
        .filter(|(_, inst)| matches!(inst, Inst::Alloc { .. }))
        .count()
}
