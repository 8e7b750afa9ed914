//! Move/Borrow Validator.
//!
//! Checks the solved mode assignment for two properties:
//!
//! - **Linearity**: no use is reachable, along any CFG path, from a move
//!   of the same binding without an intervening redefinition.
//! - **Exclusivity**: no exclusive access (mutable borrow or move) of a
//!   binding overlaps with any other access to it, either within one call
//!   or while a loan held in another binding is still live.
//!
//! Every violation is reported exactly once, at the offending use.

use rustc_hash::{FxHashMap, FxHashSet};
use verso_ir::{BindingId, BlockId, Function, OverrideMode};

use crate::error::OwnershipError;
use crate::liveness::Liveness;
use crate::mode::OwnershipMode;
use crate::solver::Solution;
use crate::usage::{CallGroup, FlowKind, LoanOrigin, Location, Use, UseId, UsageInfo};

/// Check linearity and exclusivity for one function.
pub fn validate(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    liveness: &Liveness,
) -> Vec<OwnershipError> {
    let mut errors = check_linearity(func, usage, solution);
    errors.extend(check_exclusivity(func, usage, solution, liveness));
    errors
}

/// Blocks reachable from the entry, in id order.
fn reachable_in_order(func: &Function, solution: &Solution) -> Vec<BlockId> {
    func.block_ids()
        .filter(|b| solution.reachable.contains(b))
        .collect()
}

// ============================================================================
// Linearity
// ============================================================================

/// Per binding, the move that may have consumed it on some path.
type MoveState = Vec<Option<UseId>>;

/// Whether `u` ends its binding's lifetime on this path.
pub(crate) fn consumes(func: &Function, u: &Use, solution: &Solution) -> bool {
    // Projections never consume their base. Copies leave the source intact
    // unless the programmer wrote `move`.
    solution.resolution(u.id).resolved == OwnershipMode::Moved
        && u.field.is_none()
        && (u.explicit == OverrideMode::Move || !func.binding(u.binding).ty.is_copy())
}

fn linear_transfer(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    location: Location,
    state: &mut MoveState,
) {
    for id in usage.uses_at(location) {
        let u = usage.get(*id);
        if consumes(func, u, solution) {
            state[u.binding.0 as usize].get_or_insert(u.id);
        }
    }
    if let Some(dest) = usage.definition_at(location) {
        state[dest.0 as usize] = None;
    }
}

/// Report every use that may follow a move of its binding.
pub fn check_linearity(func: &Function, usage: &UsageInfo, solution: &Solution) -> Vec<OwnershipError> {
    let width = func.bindings.len();
    let preds = func.predecessors();
    let order = func.reverse_postorder();
    let mut exits: FxHashMap<BlockId, MoveState> = FxHashMap::default();

    let entry_state = |block: BlockId, exits: &FxHashMap<BlockId, MoveState>| {
        // Nothing is moved on function entry; a loop may still re-enter bb0
        let mut state: MoveState = vec![None; width];
        for pred in &preds[block.0 as usize] {
            let Some(out) = exits.get(pred) else { continue };
            for (slot, moved) in state.iter_mut().zip(out) {
                *slot = match (*slot, *moved) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
        }
        state
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &block in &order {
            let mut state = entry_state(block, &exits);
            for index in 0..=func.block(block).statements.len() {
                linear_transfer(func, usage, solution, Location::new(block, index), &mut state);
            }
            if exits.get(&block) != Some(&state) {
                exits.insert(block, state);
                changed = true;
            }
        }
    }

    let mut errors = Vec::new();
    for block in reachable_in_order(func, solution) {
        let mut state = entry_state(block, &exits);
        for index in 0..=func.block(block).statements.len() {
            let location = Location::new(block, index);
            // Operands of one statement are checked against the state before it
            for id in usage.uses_at(location) {
                let u = usage.get(*id);
                if let Some(move_id) = state[u.binding.0 as usize] {
                    let moved = usage.get(move_id);
                    errors.push(OwnershipError::UseAfterMove {
                        binding: func.binding(u.binding).name.clone(),
                        use_id: u.id,
                        use_span: u.span,
                        move_id,
                        move_span: moved.span,
                        move_required: solution.resolution(move_id).required,
                    });
                }
            }
            linear_transfer(func, usage, solution, location, &mut state);
        }
    }
    errors
}

// ============================================================================
// Exclusivity
// ============================================================================

/// A borrow kept alive through one or more holder bindings.
struct ActiveLoan {
    use_id: UseId,
    borrowed: BindingId,
    mutable: bool,
    holder: BindingId,
    /// The holder plus every binding the held value was moved into
    aliases: Vec<BindingId>,
    location: Location,
}

fn overlaps(existing: OwnershipMode, requested: OwnershipMode) -> bool {
    existing != OwnershipMode::Unused
        && requested != OwnershipMode::Unused
        && (existing.is_exclusive() || requested.is_exclusive())
}

fn disjoint_fields(a: &Use, b: &Use) -> bool {
    matches!((&a.field, &b.field), (Some(x), Some(y)) if x != y)
}

/// Report overlapping accesses where one side is exclusive.
pub fn check_exclusivity(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    liveness: &Liveness,
) -> Vec<OwnershipError> {
    let mut errors = Vec::new();
    let mut reported: FxHashSet<UseId> = FxHashSet::default();

    // Operands evaluated together by one call or capture list
    let mut groups: FxHashMap<CallGroup, Vec<&Use>> = FxHashMap::default();
    for u in &usage.uses {
        if let Some(group) = u.call_group {
            if solution.is_reachable(u.location) {
                groups.entry(group).or_default().push(u);
            }
        }
    }
    let mut group_ids: Vec<CallGroup> = groups.keys().copied().collect();
    group_ids.sort();
    for group in group_ids {
        let members = &groups[&group];
        for (i, later) in members.iter().enumerate() {
            let conflict = members[..i].iter().find(|earlier| {
                earlier.binding == later.binding
                    && !disjoint_fields(earlier, later)
                    && overlaps(
                        solution.resolution(earlier.id).resolved,
                        solution.resolution(later.id).resolved,
                    )
            });
            if let Some(earlier) = conflict {
                if reported.insert(later.id) {
                    errors.push(conflict_error(func, solution, later, earlier));
                }
            }
        }
    }

    // Loans held across statements
    let loans = active_loans(usage, solution);
    if loans.is_empty() {
        return errors;
    }
    let reaching = reaching_loans(func, usage, &loans);
    for block in reachable_in_order(func, solution) {
        let mut state = reaching.get(&block).cloned().unwrap_or_else(|| vec![false; loans.len()]);
        for index in 0..=func.block(block).statements.len() {
            let location = Location::new(block, index);
            let live = liveness.live_in(location);
            for (loan, _) in loans
                .iter()
                .zip(&state)
                .filter(|(loan, reaches)| **reaches && live.contains_any(&loan.aliases))
            {
                for id in usage.uses_at(location) {
                    let u = usage.get(*id);
                    if u.binding != loan.borrowed || u.id == loan.use_id {
                        continue;
                    }
                    let existing = if loan.mutable {
                        OwnershipMode::MutableBorrow
                    } else {
                        OwnershipMode::ImmutableBorrow
                    };
                    let requested = solution.resolution(u.id).resolved;
                    if overlaps(existing, requested) && reported.insert(u.id) {
                        let origin = usage.get(loan.use_id);
                        errors.push(OwnershipError::ConflictingBorrow {
                            binding: func.binding(u.binding).name.clone(),
                            use_id: u.id,
                            span: u.span,
                            requested,
                            existing_span: origin.span,
                            existing,
                        });
                    }
                }
            }
            loan_transfer(usage, &loans, location, &mut state);
        }
    }
    errors
}

fn conflict_error(func: &Function, solution: &Solution, later: &Use, earlier: &Use) -> OwnershipError {
    OwnershipError::ConflictingBorrow {
        binding: func.binding(later.binding).name.clone(),
        use_id: later.id,
        span: later.span,
        requested: solution.resolution(later.id).resolved,
        existing_span: earlier.span,
        existing: solution.resolution(earlier.id).resolved,
    }
}

/// Loans that borrow rather than consume, with their alias closure.
fn active_loans(usage: &UsageInfo, solution: &Solution) -> Vec<ActiveLoan> {
    usage
        .loans
        .iter()
        .filter_map(|site| {
            let holder = site.holder?;
            let resolved = solution.resolution(site.use_id).resolved;
            let mutable = match site.origin {
                LoanOrigin::Reference { mutable } => mutable,
                LoanOrigin::ClosureCapture if resolved.is_borrow() => {
                    resolved == OwnershipMode::MutableBorrow
                }
                LoanOrigin::ClosureCapture => return None,
            };
            Some(ActiveLoan {
                use_id: site.use_id,
                borrowed: site.borrowed,
                mutable,
                holder,
                aliases: own_aliases(usage, holder),
                location: site.location,
            })
        })
        .collect()
}

/// `holder` and every binding its value is moved into, transitively.
fn own_aliases(usage: &UsageInfo, holder: BindingId) -> Vec<BindingId> {
    let mut aliases = vec![holder];
    let mut cursor = 0;
    while cursor < aliases.len() {
        let from = aliases[cursor];
        for flow in &usage.flows {
            if flow.kind == FlowKind::Own && flow.from == from && !aliases.contains(&flow.to) {
                aliases.push(flow.to);
            }
        }
        cursor += 1;
    }
    aliases
}

fn loan_transfer(usage: &UsageInfo, loans: &[ActiveLoan], location: Location, state: &mut [bool]) {
    if let Some(dest) = usage.definition_at(location) {
        for (loan, reaches) in loans.iter().zip(state.iter_mut()) {
            if loan.holder == dest {
                *reaches = false;
            }
        }
    }
    for (loan, reaches) in loans.iter().zip(state.iter_mut()) {
        if loan.location == location {
            *reaches = true;
        }
    }
}

/// Loans reaching the entry of each block.
fn reaching_loans(
    func: &Function,
    usage: &UsageInfo,
    loans: &[ActiveLoan],
) -> FxHashMap<BlockId, Vec<bool>> {
    let preds = func.predecessors();
    let order = func.reverse_postorder();
    let mut entries: FxHashMap<BlockId, Vec<bool>> = FxHashMap::default();
    let mut exits: FxHashMap<BlockId, Vec<bool>> = FxHashMap::default();

    let mut changed = true;
    while changed {
        changed = false;
        for &block in &order {
            let mut state = vec![false; loans.len()];
            for pred in &preds[block.0 as usize] {
                if let Some(out) = exits.get(pred) {
                    for (slot, reaches) in state.iter_mut().zip(out) {
                        *slot |= *reaches;
                    }
                }
            }
            entries.insert(block, state.clone());
            for index in 0..=func.block(block).statements.len() {
                loan_transfer(usage, loans, Location::new(block, index), &mut state);
            }
            if exits.get(&block) != Some(&state) {
                exits.insert(block, state);
                changed = true;
            }
        }
    }
    entries
}
