//! A hand-lowered demo network, used by the driver and the end-to-end tests.

use loess_lir::{Module, ModuleBuilder, Mutability, Type};

/// A two layer perceptron with a relu written as `max(x, 0)`, a reshape of
/// the hidden activations and a softmax readout. The lowering is deliberately
/// naive; making this compact is the optimizer's job.
pub fn mlp() -> Module {
    let mut b = ModuleBuilder::new("mlp");

    let input = b.weight("input", Type::float([1, 8]), Mutability::Mutable);
    let w1 = b.weight("w1", Type::float([8, 16]), Mutability::Mutable);
    let b1 = b.weight("b1", Type::float([1, 16]), Mutability::Mutable);
    let w2 = b.weight("w2", Type::float([16, 4]), Mutability::Mutable);
    let b2 = b.weight("b2", Type::float([1, 4]), Mutability::Mutable);
    let selected = b.weight("selected", Type::index([1, 1]), Mutability::Mutable);
    let output = b.weight("output", Type::float([1, 4]), Mutability::Mutable);

    // First layer: fc1 = input * w1 + b1
    let fc1 = b.alloc("fc1", Type::float([1, 16]));
    b.matmul(fc1, input, w1);
    let fc1_bias = b.alloc("fc1_bias", Type::float([1, 16]));
    b.element_add(fc1_bias, fc1, b1);

    // relu lowered as an element-wise max against a splat of zero
    let zero = b.alloc("zero", Type::float([1, 16]));
    b.splat(zero, 0.0);
    let act1 = b.alloc("act1", Type::float([1, 16]));
    b.element_max(act1, zero, fc1_bias);

    // The graph lowering goes through an explicit reshape here even though
    // the shape is already flat.
    let flat = b.alloc("flat", Type::float([1, 16]));
    b.reshape(flat, act1);

    // Second layer: fc2 = flat * w2 + b2
    let fc2 = b.alloc("fc2", Type::float([1, 4]));
    b.matmul(fc2, flat, w2);
    let fc2_bias = b.alloc("fc2_bias", Type::float([1, 4]));
    b.element_add(fc2_bias, fc2, b2);

    let probs = b.alloc("probs", Type::float([1, 4]));
    b.softmax(probs, fc2_bias, selected);
    b.copy(output, probs);

    b.finish()
}
