//! Live interval computation for the mutable memory locations of a module.
//!
//! A memory location can be defined multiple times; every definition opens
//! its own interval. Deallocs are ignored, and views are not tracked: a use
//! of a view shows up at its tensor_view instruction, which reads the source.

use std::collections::hash_map::Entry;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::{
    lir_nodes::{Inst, OperandKind},
    module::Module,
    value::{Mutability, ValueId, ValueKind},
};

/// An inclusive range of instruction indices during which one definition of
/// a value is observable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub begin: usize,
    pub end: usize,
}

impl Interval {
    pub fn contains(self, index: usize) -> bool {
        self.begin <= index && index <= self.end
    }

    /// Whether `other` lies strictly inside of this interval
    pub fn encloses(self, other: Interval) -> bool {
        self.begin < other.begin && other.end <= self.end
    }
}

pub type LiveIntervals = FxHashMap<ValueId, Vec<Interval>>;

/// Returns the index of the interval covering the given instruction index
pub fn enclosing_interval(intervals: &[Interval], index: usize) -> Option<usize> {
    intervals.iter().position(|interval| interval.contains(index))
}

/// Computes the live intervals of every activation and every mutable weight.
///
/// Each interval starts at the instruction that defines the value and ends
/// at the last read of that definition; the last interval of a weight is
/// extended to the end of the module because weights are observable outside.
pub fn calculate_live_intervals(module: &Module) -> LiveIntervals {
    let mut liveness = LiveIntervals::default();

    for (index, (_, inst)) in module.iter().enumerate() {
        if matches!(inst, Inst::Dealloc { .. }) {
            continue;
        }
        let starts_lifetime = matches!(inst, Inst::TensorView { .. });

        // Group operands that share a value and order reads before writes
        // at the same instruction index.
        let operands = inst
            .operands()
            .into_iter()
            .sorted_by_key(|&(value, kind)| (value, kind));

        for (value, kind) in operands {
            let tracked = match module.value(value).kind {
                ValueKind::Weight { mutability } => mutability != Mutability::Constant,
                ValueKind::Activation => true,
                ValueKind::View { .. } => false,
            };
            if !tracked {
                continue;
            }

            let intervals = match liveness.entry(value) {
                Entry::Vacant(entry) => {
                    debug_assert!(
                        starts_lifetime || module.value(value).is_weight() || kind.is_write(),
                        "first reference to %{} must be a write, a view or a weight use",
                        module.value(value).name
                    );
                    entry.insert(vec![Interval { begin: index, end: index }]);
                    continue;
                }
                Entry::Occupied(entry) => entry.into_mut(),
            };

            let last = intervals.last_mut().unwrap_or_else(|| unreachable!());
            // Extend the interval, except when this is a write immediately
            // following another write with no read in between.
            if kind != OperandKind::Out || last.begin != last.end {
                last.end = index;
            }
            // A write ends the current definition and opens the next one.
            if kind == OperandKind::Out {
                intervals.push(Interval { begin: index, end: index });
            }
        }
    }

    let last_index = module.len().saturating_sub(1);
    for (&value, intervals) in liveness.iter_mut() {
        if module.value(value).is_weight() {
            let last = intervals.last_mut().unwrap_or_else(|| unreachable!());
            last.end = last_index;
        }
    }

    liveness
}

/// Renders the intervals map for the optimizer log
pub fn dump_live_intervals(module: &Module, liveness: &LiveIntervals) -> String {
    let mut out = String::new();
    for (value, intervals) in liveness
        .iter()
        .sorted_by_key(|&(value, _)| *value)
    {
        let ranges = intervals
            .iter()
            .map(|interval| format!("[{}, {}]", interval.begin, interval.end))
            .join(" ");
        out.push_str(&format!("%{}: {}\n", module.value(*value).name, ranges));
    }
    out
}
