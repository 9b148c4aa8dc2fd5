//! The container for a linear lir program: an ordered instruction list plus
//! the set of memory locations it operates on.
//!
//! Instructions live in an arena and are identified by a stable [`InstId`];
//! the execution order is a separate list of ids. Use lists are maintained
//! exclusively by [`Module::set_operand`] and the insert/erase primitives, so
//! both sides of the use/def relation always agree.

use std::fmt;

use generational_arena::Arena;
use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::{
    lir_nodes::{Inst, OperandKind},
    types::Type,
    value::{Mutability, Use, Value, ValueId, ValueKind},
};

/// The stable identity of an instruction, valid until the instruction is erased
pub type InstId = generational_arena::Index;

pub struct Module {
    name: String,
    /// All values ever created. This vector never shrinks; values retired by
    /// the optimizer simply end up with an empty use list.
    values: Vec<Value>,
    weights: Vec<ValueId>,
    insts: Arena<Inst>,
    order: Vec<InstId>,
    /// Tracks how often a value name was handed out, for uniquing
    name_counts: FxHashMap<String, u32>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Module {
            name: name.into(),
            values: Vec::new(),
            weights: Vec::new(),
            insts: Arena::new(),
            order: Vec::new(),
            name_counts: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn new_value(&mut self, name: &str, ty: Type, kind: ValueKind) -> ValueId {
        let count = self.name_counts.entry(name.to_string()).or_insert(0);
        let unique_name = match *count {
            0 => name.to_string(),
            n => format!("{name}.{n}"),
        };
        *count += 1;

        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            name: unique_name,
            ty,
            kind,
            uses: Vec::new(),
        });
        id
    }

    /// Registers an externally visible memory location
    pub fn new_weight(&mut self, name: &str, ty: Type, mutability: Mutability) -> ValueId {
        let id = self.new_value(name, ty, ValueKind::Weight { mutability });
        self.weights.push(id);
        id
    }

    pub fn weights(&self) -> &[ValueId] {
        &self.weights
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn set_mutability(&mut self, id: ValueId, mutability: Mutability) {
        match &mut self.values[id.index()].kind {
            ValueKind::Weight {
                mutability: attribute,
            } => *attribute = mutability,
            other => unreachable!("not a weight: {other:?}"),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = (ValueId, &Value)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(index, value)| (ValueId(index as u32), value))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.insts[id]
    }

    pub fn contains(&self, id: InstId) -> bool {
        self.insts.contains(id)
    }

    pub fn id_at(&self, position: usize) -> InstId {
        self.order[position]
    }

    /// The current position of an instruction in the execution order
    pub fn position(&self, id: InstId) -> usize {
        self.order
            .iter()
            .position(|&other| other == id)
            .unwrap_or_else(|| unreachable!("instruction is not scheduled"))
    }

    /// Iterates the instructions in execution order
    pub fn iter(&self) -> impl Iterator<Item = (InstId, &Inst)> + '_ {
        self.order.iter().map(move |&id| (id, &self.insts[id]))
    }

    /// Appends an instruction at the end of the module
    pub fn push(&mut self, inst: Inst) -> InstId {
        let position = self.order.len();
        self.insert(position, inst)
    }

    /// Inserts an instruction so that it executes at `position`
    pub fn insert(&mut self, position: usize, inst: Inst) -> InstId {
        let id = self.insts.insert(inst);
        self.order.insert(position, id);
        self.register_uses(id);
        id
    }

    /// Removes an instruction from the module and drops its operand uses
    pub fn erase(&mut self, id: InstId) {
        self.unregister_uses(id);
        let position = self.position(id);
        self.order.remove(position);
        self.insts.remove(id);
    }

    /// Reschedules an instruction to execute at `position`, where `position`
    /// is an index into the order before the instruction is taken out
    pub fn move_to(&mut self, id: InstId, position: usize) {
        let current = self.position(id);
        self.order.remove(current);
        let position = if position > current {
            position - 1
        } else {
            position
        };
        self.order.insert(position, id);
    }

    /// Redirects one operand slot, updating the use lists of both values
    pub fn set_operand(&mut self, id: InstId, operand: usize, new_value: ValueId) {
        let old_value = self.insts[id].operands()[operand].0;
        if old_value == new_value {
            return;
        }
        let uses = &mut self.values[old_value.index()].uses;
        let entry = uses
            .iter()
            .position(|u| u.inst == id && u.operand == operand)
            .unwrap_or_else(|| unreachable!("use list out of sync"));
        uses.remove(entry);

        *self.insts[id].operands_mut()[operand] = new_value;
        self.values[new_value.index()]
            .uses
            .push(Use { inst: id, operand });
    }

    /// Replaces every use of `old` with `new`, except for dealloc
    /// instructions, which must keep closing their own allocation
    pub fn replace_all_uses_skip_dealloc(&mut self, old: ValueId, new: ValueId) {
        assert_ne!(old, new, "replacing value with itself");
        let uses = self.values[old.index()].uses.clone();
        for u in uses {
            if matches!(self.insts[u.inst], Inst::Dealloc { .. }) {
                continue;
            }
            self.set_operand(u.inst, u.operand, new);
        }
    }

    /// Resolves a value through view chains to its root alloc or weight
    pub fn origin(&self, value: ValueId) -> ValueId {
        match self.value(value).kind {
            ValueKind::View { src } => self.origin(src),
            _ => value,
        }
    }

    /// As [`Module::origin`], but only for activations
    pub fn alloc_origin(&self, value: ValueId) -> Option<ValueId> {
        let origin = self.origin(value);
        self.value(origin).is_activation().then_some(origin)
    }

    /// The only instruction that writes into this value, ignoring deallocs.
    /// Returns `None` if the number of writers is not exactly one.
    pub fn single_writer(&self, value: ValueId) -> Option<InstId> {
        let mut writer = None;
        for u in self.value(value).uses() {
            if matches!(self.insts[u.inst], Inst::Dealloc { .. }) {
                continue;
            }
            let (_, kind) = self.insts[u.inst].operands()[u.operand];
            if kind == OperandKind::In {
                continue;
            }
            if writer.is_some() {
                return None;
            }
            writer = Some(u.inst);
        }
        writer
    }

    fn register_uses(&mut self, id: InstId) {
        let operands = self.insts[id].operands();
        for (operand, (value, _)) in operands.into_iter().enumerate() {
            self.values[value.index()].uses.push(Use { inst: id, operand });
        }
    }

    fn unregister_uses(&mut self, id: InstId) {
        let operands = self.insts[id].operands();
        for (operand, (value, _)) in operands.into_iter().enumerate() {
            let uses = &mut self.values[value.index()].uses;
            let entry = uses
                .iter()
                .position(|u| u.inst == id && u.operand == operand)
                .unwrap_or_else(|| unreachable!("use list out of sync"));
            uses.remove(entry);
        }
    }

    fn fmt_inst(&self, f: &mut fmt::Formatter<'_>, inst: &Inst) -> fmt::Result {
        match inst {
            Inst::Alloc { result } => {
                let value = self.value(*result);
                return write!(f, "%{} = alloc {}", value.name, value.ty);
            }
            Inst::TensorView { result, src } => {
                let value = self.value(*result);
                return write!(
                    f,
                    "%{} = tensor_view @in %{} : {}",
                    value.name,
                    self.value(*src).name,
                    value.ty
                );
            }
            _ => {}
        }

        let operands = inst
            .operands()
            .into_iter()
            .map(|(value, kind)| format!("@{kind} %{}", self.value(value).name))
            .join(", ");
        write!(f, "{inst} {operands}")?;

        match inst {
            Inst::Splat { value, .. } => write!(f, ", value {value}"),
            Inst::Transpose { shuffle, .. } => write!(f, ", shuffle {shuffle:?}"),
            Inst::PoolMax {
                kernel,
                stride,
                pad,
                ..
            }
            | Inst::PoolMaxWithXy {
                kernel,
                stride,
                pad,
                ..
            } => write!(f, ", kernel {kernel}, stride {stride}, pad {pad}"),
            Inst::DebugPrint { label, .. } => write!(f, ", \"{label}\""),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {} {{", self.name)?;
        writeln!(f, "  weights:")?;
        for &id in &self.weights {
            let value = self.value(id);
            let mutability = match value.mutability() {
                Some(Mutability::Constant) => "constant",
                _ => "mutable",
            };
            writeln!(f, "    %{}: {} {}", value.name, value.ty, mutability)?;
        }
        writeln!(f, "  body:")?;
        for (_, inst) in self.iter() {
            f.write_str("    ")?;
            self.fmt_inst(f, inst)?;
            f.write_str("\n")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}
