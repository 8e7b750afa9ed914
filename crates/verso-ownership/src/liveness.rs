//! Backward liveness of bindings at statement granularity.
//!
//! A binding is live at a point if some path from that point reaches a use
//! of it before a redefinition. Borrow checking uses this to decide how
//! long a loan held in a binding stays active, and region placement uses
//! it to find the last use of an individually managed allocation.

use rustc_hash::FxHashMap;
use verso_ir::{BindingId, BlockId, Function};

use crate::usage::{Location, UsageInfo};

/// Dense set of bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSet(Vec<bool>);

impl BindingSet {
    pub fn empty(width: usize) -> Self {
        Self(vec![false; width])
    }

    pub fn contains(&self, binding: BindingId) -> bool {
        self.0.get(binding.0 as usize).copied().unwrap_or(false)
    }

    pub fn insert(&mut self, binding: BindingId) {
        if let Some(slot) = self.0.get_mut(binding.0 as usize) {
            *slot = true;
        }
    }

    pub fn remove(&mut self, binding: BindingId) {
        if let Some(slot) = self.0.get_mut(binding.0 as usize) {
            *slot = false;
        }
    }

    pub fn union_with(&mut self, other: &BindingSet) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    pub fn contains_any(&self, bindings: &[BindingId]) -> bool {
        bindings.iter().any(|b| self.contains(*b))
    }

    pub fn iter(&self) -> impl Iterator<Item = BindingId> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, live)| **live)
            .map(|(i, _)| BindingId(i as u32))
    }
}

/// Live-in and live-out sets for every program point.
#[derive(Debug, Clone)]
pub struct Liveness {
    live_in: FxHashMap<Location, BindingSet>,
    live_out: FxHashMap<Location, BindingSet>,
    width: usize,
}

impl Liveness {
    /// Compute liveness for every block, reachable or not.
    pub fn compute(func: &Function, usage: &UsageInfo) -> Self {
        let width = func.bindings.len();
        let mut block_in: Vec<BindingSet> = vec![BindingSet::empty(width); func.blocks.len()];

        let mut changed = true;
        while changed {
            changed = false;
            for block in func.blocks.iter().rev() {
                let mut state = Self::block_out(func, &block_in, block.id, width);
                for index in (0..=block.statements.len()).rev() {
                    Self::step(usage, Location::new(block.id, index), &mut state);
                }
                if block_in[block.id.0 as usize] != state {
                    block_in[block.id.0 as usize] = state;
                    changed = true;
                }
            }
        }

        let mut live_in = FxHashMap::default();
        let mut live_out = FxHashMap::default();
        for block in &func.blocks {
            let mut state = Self::block_out(func, &block_in, block.id, width);
            for index in (0..=block.statements.len()).rev() {
                let location = Location::new(block.id, index);
                live_out.insert(location, state.clone());
                Self::step(usage, location, &mut state);
                live_in.insert(location, state.clone());
            }
        }

        Self {
            live_in,
            live_out,
            width,
        }
    }

    fn block_out(func: &Function, block_in: &[BindingSet], block: BlockId, width: usize) -> BindingSet {
        let mut out = BindingSet::empty(width);
        for succ in func.successors(block) {
            if let Some(set) = block_in.get(succ.0 as usize) {
                out.union_with(set);
            }
        }
        out
    }

    /// live_in = (live_out - def) + uses
    fn step(usage: &UsageInfo, location: Location, state: &mut BindingSet) {
        if let Some(dest) = usage.definition_at(location) {
            state.remove(dest);
        }
        for id in usage.uses_at(location) {
            state.insert(usage.get(*id).binding);
        }
    }

    pub fn live_in(&self, location: Location) -> BindingSet {
        self.live_in
            .get(&location)
            .cloned()
            .unwrap_or_else(|| BindingSet::empty(self.width))
    }

    pub fn live_out(&self, location: Location) -> BindingSet {
        self.live_out
            .get(&location)
            .cloned()
            .unwrap_or_else(|| BindingSet::empty(self.width))
    }

    pub fn is_live_in(&self, location: Location, binding: BindingId) -> bool {
        self.live_in
            .get(&location)
            .is_some_and(|set| set.contains(binding))
    }

    pub fn is_live_out(&self, location: Location, binding: BindingId) -> bool {
        self.live_out
            .get(&location)
            .is_some_and(|set| set.contains(binding))
    }

    /// Whether any of `bindings` is live on entry to `block`.
    pub fn any_live_at_entry(&self, block: BlockId, bindings: &[BindingId]) -> bool {
        self.live_in
            .get(&Location::new(block, 0))
            .is_some_and(|set| set.contains_any(bindings))
    }
}
