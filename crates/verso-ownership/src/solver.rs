//! Ownership Lattice Solver.
//!
//! Assigns every use the mode its operation requires, honors explicit
//! override keywords as fixed points, and computes for every binding the
//! least upper bound over its reachable uses. A forward data-flow pass
//! over the CFG additionally records the running mode at each use: the
//! join of everything that happened to the binding on any path reaching
//! that use, merged with `lub` at control-flow joins.
//!
//! The solver only does lattice arithmetic. Whether the resulting
//! assignment is safe is decided by the validator.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;
use verso_ir::{BindingKind, BlockId, Callee, Function, FunctionId, Program};

use crate::config::{EngineConfig, SuspensionPolicy};
use crate::error::OwnershipError;
use crate::mode::{lub_all, OwnershipMode};
use crate::signature::{Signature, SignatureTable};
use crate::usage::{Location, ParamSlot, Use, UseKind, UsageInfo};

// ============================================================================
// Signature Lookup
// ============================================================================

/// Where callee signatures come from while solving a function.
pub trait SignatureSource {
    /// The callee's signature, or `None` if it is unknown.
    fn signature(&self, function: FunctionId) -> Option<Signature>;
}

impl SignatureSource for SignatureTable {
    fn signature(&self, function: FunctionId) -> Option<Signature> {
        self.wait(function)
    }
}

/// Provisional signatures for the members of a recursive cycle, falling
/// back to the finalized table for everything else.
pub struct Provisional<'a> {
    pub current: &'a FxHashMap<FunctionId, Signature>,
    pub table: &'a SignatureTable,
}

impl SignatureSource for Provisional<'_> {
    fn signature(&self, function: FunctionId) -> Option<Signature> {
        match self.current.get(&function) {
            Some(sig) => Some(sig.clone()),
            None => self.table.wait(function),
        }
    }
}

impl SignatureSource for FxHashMap<FunctionId, Signature> {
    fn signature(&self, function: FunctionId) -> Option<Signature> {
        self.get(&function).cloned()
    }
}

/// Inputs shared by every function solved in a run.
pub struct SolveContext<'a> {
    pub program: &'a Program,
    pub config: &'a EngineConfig,
    pub signatures: &'a dyn SignatureSource,
}

// ============================================================================
// Solution
// ============================================================================

/// Mode assignment for one use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseResolution {
    /// What the operation needs, before any explicit keyword
    pub required: OwnershipMode,
    /// Mode after applying a use-level keyword
    pub resolved: OwnershipMode,
    /// Path-merged mode of the binding immediately after this use
    pub running: OwnershipMode,
}

/// Solver output for one function.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Indexed by `UseId`
    pub uses: Vec<UseResolution>,
    /// Binding-wide mode, indexed by `BindingId`
    pub bindings: Vec<OwnershipMode>,
    pub signature: Signature,
    pub reachable: FxHashSet<BlockId>,
    /// Override conflicts found while resolving
    pub errors: Vec<OwnershipError>,
}

impl Solution {
    /// Placeholder for a function that was never solved.
    pub fn unsolved(signature: Signature) -> Self {
        Self {
            uses: Vec::new(),
            bindings: Vec::new(),
            signature,
            reachable: FxHashSet::default(),
            errors: Vec::new(),
        }
    }

    pub fn resolution(&self, id: crate::usage::UseId) -> UseResolution {
        self.uses[id.0 as usize]
    }

    pub fn binding_mode(&self, binding: verso_ir::BindingId) -> OwnershipMode {
        self.bindings
            .get(binding.0 as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn is_reachable(&self, location: Location) -> bool {
        self.reachable.contains(&location.block)
    }
}

// ============================================================================
// Solver
// ============================================================================

/// Solve one function against the signatures visible through `ctx`.
pub fn solve(func: &Function, usage: &UsageInfo, ctx: &SolveContext<'_>) -> Solution {
    let reachable = func.reachable_blocks();
    let mut errors = Vec::new();

    let mut uses: Vec<UseResolution> = usage
        .uses
        .iter()
        .map(|u| {
            let live = reachable.contains(&u.location.block);
            let (resolution, conflict) = resolve_use(func, u, ctx);
            if live {
                errors.extend(conflict);
            }
            resolution
        })
        .collect();

    let bindings: Vec<OwnershipMode> = func
        .binding_ids()
        .map(|b| {
            let decl = func.binding(b);
            match OwnershipMode::from_override(decl.override_mode) {
                Some(fixed) => fixed,
                None => lub_all(
                    usage
                        .uses_of(b)
                        .filter(|u| reachable.contains(&u.location.block))
                        .map(|u| uses[u.id.0 as usize].resolved),
                ),
            }
        })
        .collect();

    annotate_running_modes(func, usage, &mut uses);

    let signature = Signature::new(
        func.params
            .iter()
            .map(|p| bindings[p.0 as usize])
            .collect(),
    );
    trace!(function = %func.name, %signature, "solved");

    Solution {
        uses,
        bindings,
        signature,
        reachable,
        errors,
    }
}

/// Mode an operation needs from its binding, before overrides.
pub fn required_mode(func: &Function, u: &Use, ctx: &SolveContext<'_>) -> OwnershipMode {
    let decl = func.binding(u.binding);
    let base = match u.kind {
        UseKind::Read => OwnershipMode::ImmutableBorrow,
        UseKind::FieldWrite => OwnershipMode::MutableBorrow,
        UseKind::MethodReceiver | UseKind::ArgumentPass | UseKind::ClosureCapture => {
            param_mode(u.param.as_ref(), ctx)
        }
        UseKind::ReturnValue => OwnershipMode::Moved,
        UseKind::Reference { mutable: true } => OwnershipMode::MutableBorrow,
        UseKind::Reference { mutable: false } => OwnershipMode::ImmutableBorrow,
        UseKind::CaptureAcrossSuspension => match ctx.config.suspension_policy {
            SuspensionPolicy::AlwaysMove => OwnershipMode::Moved,
            SuspensionPolicy::MutableBorrow => OwnershipMode::MutableBorrow,
            SuspensionPolicy::MoveCallerOwned => {
                if decl.kind == BindingKind::Param {
                    OwnershipMode::Moved
                } else {
                    OwnershipMode::MutableBorrow
                }
            }
        },
    };
    // Projections never consume their base
    let base = if u.field.is_some() {
        base.min(OwnershipMode::MutableBorrow)
    } else {
        base
    };
    if decl.ty.is_copy() && base == OwnershipMode::Moved {
        OwnershipMode::ImmutableBorrow
    } else {
        base
    }
}

/// Mode a callee parameter demands from its argument.
fn param_mode(slot: Option<&ParamSlot>, ctx: &SolveContext<'_>) -> OwnershipMode {
    let Some(slot) = slot else {
        // Plain value transfer
        return OwnershipMode::Moved;
    };
    let mode = match &slot.callee {
        Callee::Function(f) => ctx
            .signatures
            .signature(*f)
            .and_then(|sig| sig.param(slot.index))
            .unwrap_or(OwnershipMode::Moved),
        Callee::Extern(name) => ctx
            .program
            .externs
            .get(name)
            .and_then(|decl| decl.params.get(slot.index))
            .and_then(|kw| OwnershipMode::from_override(*kw))
            .unwrap_or(ctx.config.default_extern_mode),
        Callee::Constructor(_) => OwnershipMode::Moved,
    };
    // Arguments are evaluated even when the callee ignores them
    mode.lub(OwnershipMode::ImmutableBorrow)
}

fn resolve_use(
    func: &Function,
    u: &Use,
    ctx: &SolveContext<'_>,
) -> (UseResolution, Option<OwnershipError>) {
    let decl = func.binding(u.binding);
    let required = required_mode(func, u, ctx);
    let mut conflict = None;

    let resolved = match OwnershipMode::from_override(u.explicit) {
        Some(pinned) => {
            // At a suspension point the keyword is the sanctioned escape hatch
            if !required.within(pinned) && u.kind != UseKind::CaptureAcrossSuspension {
                conflict = Some(OwnershipError::OverrideConflict {
                    binding: decl.name.clone(),
                    keyword: u.explicit,
                    on_declaration: false,
                    required,
                    use_span: u.span,
                    override_span: u.span,
                });
            }
            pinned
        }
        None => required,
    };

    if conflict.is_none() {
        if let Some(fixed) = OwnershipMode::from_override(decl.override_mode) {
            if !resolved.within(fixed) {
                conflict = Some(OwnershipError::OverrideConflict {
                    binding: decl.name.clone(),
                    keyword: decl.override_mode,
                    on_declaration: true,
                    required: resolved,
                    use_span: u.span,
                    override_span: decl.span,
                });
            }
        }
    }

    (
        UseResolution {
            required,
            resolved,
            running: resolved,
        },
        conflict,
    )
}

/// Forward pass recording the path-merged mode after every use.
fn annotate_running_modes(func: &Function, usage: &UsageInfo, uses: &mut [UseResolution]) {
    let order = func.reverse_postorder();
    let preds = func.predecessors();
    let width = func.bindings.len();
    let mut exits: FxHashMap<BlockId, Vec<OwnershipMode>> = FxHashMap::default();

    let entry_state = |block: BlockId, exits: &FxHashMap<BlockId, Vec<OwnershipMode>>| {
        // Back edges into bb0 merge like any other
        let mut state = vec![OwnershipMode::Unused; width];
        for pred in &preds[block.0 as usize] {
            if let Some(out) = exits.get(pred) {
                for (slot, mode) in state.iter_mut().zip(out) {
                    *slot = slot.lub(*mode);
                }
            }
        }
        state
    };

    // Transfer is monotone and the lattice is finite, so this terminates
    let mut changed = true;
    while changed {
        changed = false;
        for &block in &order {
            let mut state = entry_state(block, &exits);
            transfer_block(func, usage, uses, block, &mut state, false);
            if exits.get(&block) != Some(&state) {
                exits.insert(block, state);
                changed = true;
            }
        }
    }

    for &block in &order {
        let mut state = entry_state(block, &exits);
        transfer_block(func, usage, uses, block, &mut state, true);
    }
}

fn transfer_block(
    func: &Function,
    usage: &UsageInfo,
    uses: &mut [UseResolution],
    block: BlockId,
    state: &mut [OwnershipMode],
    record: bool,
) {
    let len = func.block(block).statements.len();
    for index in 0..=len {
        let location = Location::new(block, index);
        for &id in usage.uses_at(location) {
            let binding = usage.get(id).binding.0 as usize;
            let resolution = &mut uses[id.0 as usize];
            state[binding] = state[binding].lub(resolution.resolved);
            if record {
                resolution.running = state[binding];
            }
        }
        if let Some(dest) = usage.definition_at(location) {
            // A fresh value starts unused
            state[dest.0 as usize] = OwnershipMode::Unused;
        }
    }
}
