//! Region & Arena Allocator.
//!
//! Every reachable allocation expression receives exactly one placement:
//!
//! - [`Placement::Region`]: the innermost region whose lifetime covers
//!   every binding that can hold the value. No individual free is emitted;
//!   the region frees its members in bulk on every exit edge.
//! - [`Placement::Individual`]: no region fits (the site sits in a loop
//!   outside any arena, or the function region is disabled), so the value
//!   is freed right after its last use on each path.
//! - [`Placement::Transferred`]: ownership always leaves the function
//!   (returned, consumed by a callee, captured across a suspension, or
//!   stored into a caller-owned structure), so nothing is freed here.
//!
//! Escape analysis runs alongside placement. A *reference* to an
//! allocation or to a local that is returned, sent, captured across a
//! suspension or stored into a caller structure is a region escape.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use tracing::debug;
use verso_ir::{
    AllocId, BindingId, BlockId, Callee, Function, RegionId, RegionKind, TerminatorKind,
};

use crate::config::EngineConfig;
use crate::error::{EscapeRoute, EscapeSubject, OwnershipError};
use crate::liveness::{BindingSet, Liveness};
use crate::mode::OwnershipMode;
use crate::solver::Solution;
use crate::usage::{
    AllocSite, FlowKind, LoanOrigin, Location, ParamSlot, Use, UseId, UseKind, UsageInfo,
    ValueFlow,
};
use crate::validator::consumes;

// ============================================================================
// Plan Types
// ============================================================================

/// Where an individually managed value is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FreePoint {
    /// After the statement at this location, or after the terminator's
    /// operands are evaluated
    After(Location),
    /// On the control-flow edge between two blocks
    Edge { from: BlockId, to: BlockId },
}

impl fmt::Display for FreePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreePoint::After(location) => write!(f, "after {}", location),
            FreePoint::Edge { from, to } => write!(f, "on edge {} -> {}", from, to),
        }
    }
}

/// How an allocation's lifetime is managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    Region(RegionId),
    Individual { free_points: Vec<FreePoint> },
    /// Ownership leaves the function at these uses on every path
    Transferred { uses: Vec<UseId> },
}

/// Kind of control-flow exit from a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    /// Normal completion into the region's continuation
    FallThrough,
    /// A `return` from inside an explicit region
    EarlyReturn,
    /// A jump out of the region anywhere else
    Break,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ExitKind::FallThrough => "fall-through",
            ExitKind::EarlyReturn => "early return",
            ExitKind::Break => "break",
        };
        f.write_str(text)
    }
}

/// One exit edge of a region. `to` is `None` for returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionExit {
    pub kind: ExitKind,
    pub from: BlockId,
    pub to: Option<BlockId>,
}

/// Bulk deallocation inserted on one region exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDealloc {
    pub region: RegionId,
    pub exit: RegionExit,
    /// Members freed by this instruction
    pub allocs: Vec<AllocId>,
}

/// Placement and deallocation plan for one function.
#[derive(Debug, Clone, Default)]
pub struct RegionPlan {
    /// Reachable allocation sites in program order
    pub placements: IndexMap<AllocId, Placement>,
    pub deallocs: Vec<RegionDealloc>,
    pub errors: Vec<OwnershipError>,
}

impl RegionPlan {
    pub fn placement(&self, alloc: AllocId) -> Option<&Placement> {
        self.placements.get(&alloc)
    }

    /// Allocations assigned to `region`.
    pub fn members(&self, region: RegionId) -> Vec<AllocId> {
        self.placements
            .iter()
            .filter(|(_, p)| **p == Placement::Region(region))
            .map(|(a, _)| *a)
            .collect()
    }

    pub fn deallocs_for(&self, region: RegionId) -> impl Iterator<Item = &RegionDealloc> + '_ {
        self.deallocs.iter().filter(move |d| d.region == region)
    }

    /// Every individual free point, paired with its allocation.
    pub fn individual_frees(&self) -> impl Iterator<Item = (AllocId, FreePoint)> + '_ {
        self.placements.iter().flat_map(|(alloc, p)| {
            let points: &[FreePoint] = match p {
                Placement::Individual { free_points } => free_points,
                _ => &[],
            };
            points.iter().map(move |fp| (*alloc, *fp))
        })
    }
}

// ============================================================================
// Planning
// ============================================================================

/// How a binding relates to an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// Owns the value
    Owner,
    /// Refers into it
    Ref,
}

/// Place every reachable allocation and compute region exit deallocations.
pub fn plan_regions(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    liveness: &Liveness,
    config: &EngineConfig,
) -> RegionPlan {
    let planner = Planner::new(func, usage, solution, liveness, config);
    let mut plan = RegionPlan::default();
    let mut escaped: FxHashSet<UseId> = FxHashSet::default();

    for site in &usage.allocations {
        if !solution.is_reachable(site.location) {
            continue;
        }
        let holders = planner.holders(site);
        for (binding, hold) in &holders {
            if *hold != Hold::Ref {
                continue;
            }
            for u in planner.live_uses(*binding) {
                if let Some(route) = planner.escape_route(u) {
                    if escaped.insert(u.id) {
                        plan.errors.push(OwnershipError::RegionEscape {
                            subject: EscapeSubject::Allocation(site.alloc),
                            route,
                            escape_span: u.span,
                            origin_span: site.span,
                        });
                    }
                }
            }
        }
        let placement = planner.place(site, &holders);
        plan.placements.insert(site.alloc, placement);
    }

    planner.check_local_loans(&mut plan.errors, &mut escaped);
    plan.deallocs = planner.region_deallocs(&plan);
    plan.errors.sort_by_key(|e| e.primary_span().start);

    debug!(
        function = %func.name,
        placements = plan.placements.len(),
        deallocs = plan.deallocs.len(),
        "regions planned"
    );
    plan
}

struct Planner<'a> {
    func: &'a Function,
    usage: &'a UsageInfo,
    solution: &'a Solution,
    liveness: &'a Liveness,
    config: &'a EngineConfig,
    flows_at: FxHashMap<Location, Vec<&'a ValueFlow>>,
}

impl<'a> Planner<'a> {
    fn new(
        func: &'a Function,
        usage: &'a UsageInfo,
        solution: &'a Solution,
        liveness: &'a Liveness,
        config: &'a EngineConfig,
    ) -> Self {
        let mut flows_at: FxHashMap<Location, Vec<&ValueFlow>> = FxHashMap::default();
        for flow in &usage.flows {
            flows_at.entry(flow.location).or_default().push(flow);
        }
        Self {
            func,
            usage,
            solution,
            liveness,
            config,
            flows_at,
        }
    }

    fn live_uses(&self, binding: BindingId) -> impl Iterator<Item = &'a Use> + '_ {
        self.usage
            .uses_of(binding)
            .filter(|u| self.solution.is_reachable(u.location))
    }

    fn resolved(&self, u: &Use) -> OwnershipMode {
        self.solution.resolution(u.id).resolved
    }

    /// Bindings that may hold the allocation, and how.
    fn holders(&self, site: &AllocSite) -> FxHashMap<BindingId, Hold> {
        let mut holders = FxHashMap::default();
        let Some(dest) = site.dest else {
            return holders;
        };
        holders.insert(dest, Hold::Owner);
        self.propagate(&mut holders);
        holders
    }

    fn propagate(&self, holders: &mut FxHashMap<BindingId, Hold>) {
        let mut changed = true;
        while changed {
            changed = false;
            for flow in &self.usage.flows {
                if !self.solution.is_reachable(flow.location) {
                    continue;
                }
                let Some(&from) = holders.get(&flow.from) else {
                    continue;
                };
                // Storage behind a parameter belongs to the caller
                if self.func.binding(flow.to).is_param() {
                    continue;
                }
                let hold = match (from, flow.kind) {
                    (Hold::Ref, _) | (_, FlowKind::Borrow) => Hold::Ref,
                    (Hold::Owner, FlowKind::Own) => Hold::Owner,
                    (Hold::Owner, FlowKind::ByMode(id)) => {
                        if self.solution.resolution(id).resolved == OwnershipMode::Moved {
                            Hold::Owner
                        } else {
                            Hold::Ref
                        }
                    }
                };
                match holders.get(&flow.to) {
                    Some(Hold::Owner) => {}
                    Some(Hold::Ref) if hold == Hold::Ref => {}
                    _ => {
                        holders.insert(flow.to, hold);
                        changed = true;
                    }
                }
            }
        }
    }

    /// Whether a use lets its value outlive the function's frame.
    fn escape_route(&self, u: &Use) -> Option<EscapeRoute> {
        match u.kind {
            UseKind::ReturnValue => Some(EscapeRoute::Return),
            UseKind::CaptureAcrossSuspension => Some(EscapeRoute::Suspension),
            _ if self.stores_into_caller(u) => Some(EscapeRoute::CallerStore),
            _ => None,
        }
    }

    fn stores_into_caller(&self, u: &Use) -> bool {
        self.usage
            .stores
            .iter()
            .any(|s| s.use_id == u.id && self.func.binding(s.target).is_param())
    }

    /// Whether an owning use hands the value to someone outside the function.
    fn is_transfer(&self, u: &Use) -> bool {
        let resolved = self.resolved(u);
        match u.kind {
            UseKind::ReturnValue => true,
            UseKind::CaptureAcrossSuspension => resolved == OwnershipMode::Moved,
            // Closures stay local; their holder carries ownership on
            UseKind::ClosureCapture => false,
            _ if resolved != OwnershipMode::Moved || u.field.is_some() => false,
            _ => {
                matches!(
                    &u.param,
                    Some(ParamSlot {
                        callee: Callee::Function(_) | Callee::Extern(_),
                        ..
                    })
                ) || self.stores_into_caller(u)
            }
        }
    }

    fn place(&self, site: &AllocSite, holders: &FxHashMap<BindingId, Hold>) -> Placement {
        let transfers: Vec<UseId> = holders
            .iter()
            .filter(|(_, hold)| **hold == Hold::Owner)
            .flat_map(|(binding, _)| self.live_uses(*binding))
            .filter(|u| self.is_transfer(u))
            .map(|u| u.id)
            .collect();

        if !transfers.is_empty() {
            let free_points = self.free_points(site, holders);
            if free_points.is_empty() {
                let mut uses = transfers;
                uses.sort();
                return Placement::Transferred { uses };
            }
            return Placement::Individual { free_points };
        }

        match self.bounding_region(site, holders) {
            Some(region) => Placement::Region(region),
            None => Placement::Individual {
                free_points: self.free_points(site, holders),
            },
        }
    }

    /// Innermost region that may free the allocation in bulk.
    fn bounding_region(
        &self,
        site: &AllocSite,
        holders: &FxHashMap<BindingId, Hold>,
    ) -> Option<RegionId> {
        let site_region = self.func.block(site.location.block).region;
        let declared: Vec<RegionId> = holders
            .keys()
            .map(|b| self.func.binding(*b).region)
            .collect();
        let candidate = self
            .func
            .region_ancestors(site_region)
            .into_iter()
            .find(|r| declared.iter().all(|d| self.func.region_within(*d, *r)))
            .unwrap_or(RegionId::BODY);

        let scope: FxHashSet<BlockId> = self
            .func
            .blocks_in_region(candidate)
            .into_iter()
            .filter(|b| self.solution.reachable.contains(b))
            .collect();
        let region = if self.on_cycle(site.location.block, &scope) {
            // Only an arena frees per-iteration allocations together
            self.func
                .region_ancestors(candidate)
                .into_iter()
                .find(|r| self.func.region(*r).kind == RegionKind::Arena)?
        } else {
            candidate
        };

        let allowed = self.func.region(region).kind != RegionKind::FunctionBody
            || self.config.implicit_function_region;
        allowed.then_some(region)
    }

    fn on_cycle(&self, start: BlockId, scope: &FxHashSet<BlockId>) -> bool {
        let mut stack: Vec<BlockId> = self.func.successors(start);
        let mut seen = FxHashSet::default();
        while let Some(block) = stack.pop() {
            if !scope.contains(&block) {
                continue;
            }
            if block == start {
                return true;
            }
            if seen.insert(block) {
                stack.extend(self.func.successors(block));
            }
        }
        false
    }

    // ========================================================================
    // Individual Frees
    // ========================================================================

    fn free_points(&self, site: &AllocSite, holders: &FxHashMap<BindingId, Hold>) -> Vec<FreePoint> {
        let width = self.func.bindings.len();
        let order = self.func.reverse_postorder();
        let preds = self.func.predecessors();
        let mut exits: FxHashMap<BlockId, BindingSet> = FxHashMap::default();

        let entry_state = |block: BlockId, exits: &FxHashMap<BlockId, BindingSet>| {
            let mut held = BindingSet::empty(width);
            for pred in &preds[block.0 as usize] {
                if let Some(out) = exits.get(pred) {
                    held.union_with(out);
                }
            }
            held
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &order {
                let mut held = entry_state(block, &exits);
                for index in 0..=self.func.block(block).statements.len() {
                    self.step(site, holders, Location::new(block, index), &mut held);
                }
                if exits.get(&block) != Some(&held) {
                    exits.insert(block, held);
                    changed = true;
                }
            }
        }

        let mut points = Vec::new();
        for &block in &order {
            let mut held = entry_state(block, &exits);
            let len = self.func.block(block).statements.len();
            for index in 0..=len {
                let location = Location::new(block, index);
                if self.step(site, holders, location, &mut held) {
                    points.push(FreePoint::After(location));
                }
            }
            if !self.owns(holders, &held) {
                continue;
            }
            for succ in self.func.successors(block) {
                if !self.liveness.any_live_at_entry(succ, &held.iter().collect::<Vec<_>>()) {
                    points.push(FreePoint::Edge { from: block, to: succ });
                }
            }
        }
        points.sort();
        points
    }

    fn owns(&self, holders: &FxHashMap<BindingId, Hold>, held: &BindingSet) -> bool {
        held.iter().any(|b| holders.get(&b) == Some(&Hold::Owner))
    }

    /// Advance the held-by set over one program point. Returns true if the
    /// value dies here while still owned by the function.
    fn step(
        &self,
        site: &AllocSite,
        holders: &FxHashMap<BindingId, Hold>,
        location: Location,
        held: &mut BindingSet,
    ) -> bool {
        let mut gens = Vec::new();
        if site.location == location {
            gens.extend(site.dest);
        }
        for flow in self.flows_at.get(&location).into_iter().flatten() {
            if held.contains(flow.from) && holders.contains_key(&flow.to) {
                gens.push(flow.to);
            }
        }
        let touched =
            !gens.is_empty() || held.iter().any(|b| self.liveness.is_live_in(location, b));

        for id in self.usage.uses_at(location) {
            let u = self.usage.get(*id);
            let owner = holders.get(&u.binding) == Some(&Hold::Owner);
            if owner && consumes(self.func, u, self.solution) {
                held.remove(u.binding);
            }
        }
        if let Some(dest) = self.usage.definition_at(location) {
            if !gens.contains(&dest) {
                held.remove(dest);
            }
        }
        for binding in gens {
            held.insert(binding);
        }

        let alive = held.iter().any(|b| self.liveness.is_live_out(location, b));
        if touched && !alive && self.owns(holders, held) {
            *held = BindingSet::empty(self.func.bindings.len());
            return true;
        }
        false
    }

    // ========================================================================
    // Local Loans
    // ========================================================================

    /// References to locals must not outlive the frame either.
    fn check_local_loans(&self, errors: &mut Vec<OwnershipError>, escaped: &mut FxHashSet<UseId>) {
        for loan in &self.usage.loans {
            if !self.solution.is_reachable(loan.location) {
                continue;
            }
            let borrowed = self.func.binding(loan.borrowed);
            if borrowed.is_param() {
                continue;
            }
            let borrows = match loan.origin {
                LoanOrigin::Reference { .. } => true,
                LoanOrigin::ClosureCapture => {
                    self.solution.resolution(loan.use_id).resolved.is_borrow()
                }
            };
            let Some(holder) = loan.holder else { continue };
            if !borrows {
                continue;
            }
            let mut refs = FxHashMap::default();
            refs.insert(holder, Hold::Ref);
            self.propagate(&mut refs);
            let origin_span = self.usage.get(loan.use_id).span;
            for binding in refs.keys() {
                for u in self.live_uses(*binding) {
                    let Some(route) = self.escape_route(u) else { continue };
                    if escaped.insert(u.id) {
                        errors.push(OwnershipError::RegionEscape {
                            subject: EscapeSubject::Local(borrowed.name.clone()),
                            route,
                            escape_span: u.span,
                            origin_span,
                        });
                    }
                }
            }
        }
    }

    // ========================================================================
    // Region Exits
    // ========================================================================

    fn region_deallocs(&self, plan: &RegionPlan) -> Vec<RegionDealloc> {
        let mut deallocs = Vec::new();
        // Nested regions are declared after their parents; free them first
        for region in self.func.regions.iter().rev() {
            let allocs = plan.members(region.id);
            if allocs.is_empty() {
                continue;
            }
            for exit in self.region_exits(region.id) {
                deallocs.push(RegionDealloc {
                    region: region.id,
                    exit,
                    allocs: allocs.clone(),
                });
            }
        }
        deallocs
    }

    fn region_exits(&self, region: RegionId) -> Vec<RegionExit> {
        region_exits(self.func, &self.solution.reachable, region)
    }
}

/// Every reachable control-flow exit out of `region`, in block order.
pub fn region_exits(
    func: &Function,
    reachable: &FxHashSet<BlockId>,
    region: RegionId,
) -> Vec<RegionExit> {
    let decl = func.region(region);
    let inside = func.blocks_in_region(region);
    let mut blocks: Vec<BlockId> = inside
        .iter()
        .copied()
        .filter(|b| reachable.contains(b))
        .collect();
    blocks.sort();

    let mut exits = Vec::new();
    for from in blocks {
        let block = func.block(from);
        match block.terminator.as_ref().map(|t| &t.kind) {
            Some(TerminatorKind::Return(_)) => exits.push(RegionExit {
                kind: if decl.kind.is_explicit() {
                    ExitKind::EarlyReturn
                } else {
                    ExitKind::FallThrough
                },
                from,
                to: None,
            }),
            Some(_) => {
                for to in block.successors() {
                    if inside.contains(&to) {
                        continue;
                    }
                    let kind = if decl.exit == Some(to) {
                        ExitKind::FallThrough
                    } else {
                        ExitKind::Break
                    };
                    exits.push(RegionExit {
                        kind,
                        from,
                        to: Some(to),
                    });
                }
            }
            None => {}
        }
    }
    exits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use crate::solver::{solve, SolveContext};
    use crate::usage::analyze_usage;
    use pretty_assertions::assert_eq;
    use verso_ir::{
        FunctionBuilder, FunctionId, Operand, OverrideMode, Program, Rvalue, Span, Ty,
    };

    fn plan(func: &Function, config: &EngineConfig) -> RegionPlan {
        let mut program = Program::new("test.vs");
        program.declare_extern("process", vec![OverrideMode::Borrow]);
        program.declare_extern("consume", vec![OverrideMode::Move]);
        let usage = analyze_usage(func);
        let sigs: FxHashMap<FunctionId, Signature> = FxHashMap::default();
        let ctx = SolveContext {
            program: &program,
            config,
            signatures: &sigs,
        };
        let solution = solve(func, &usage, &ctx);
        let liveness = Liveness::compute(func, &usage);
        plan_regions(func, &usage, &solution, &liveness, config)
    }

    fn call(name: &str, arg: Operand) -> Rvalue {
        Rvalue::Call {
            callee: Callee::Extern(name.into()),
            args: vec![arg],
        }
    }

    fn sp(n: usize) -> Span {
        Span::new(n, n + 1)
    }

    /// fn f() { let buf = alloc; process(buf) }
    fn straight(body_use: &str) -> (Function, AllocId) {
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let buf = b.let_binding("buf", Ty::named("Buffer"), sp(0));
        let site = b.alloc_site(sp(1));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(1));
        b.eval(call(body_use, Operand::binding(buf, sp(2))), sp(2));
        b.ret(None, sp(3));
        (b.finish(), site)
    }

    #[test]
    fn test_function_region_placement() {
        let (func, site) = straight("process");
        let plan = plan(&func, &EngineConfig::sequential());
        assert_eq!(plan.placement(site), Some(&Placement::Region(RegionId::BODY)));
        assert_eq!(plan.deallocs.len(), 1);
        assert_eq!(plan.deallocs[0].exit.kind, ExitKind::FallThrough);
    }

    #[test]
    fn test_individual_when_function_region_disabled() {
        let (func, site) = straight("process");
        let config = EngineConfig::sequential().with_implicit_function_region(false);
        let plan = plan(&func, &config);
        assert_eq!(
            plan.placement(site),
            Some(&Placement::Individual {
                free_points: vec![FreePoint::After(Location::new(BlockId::ENTRY, 1))]
            })
        );
        assert!(plan.deallocs.is_empty());
    }

    #[test]
    fn test_consumed_allocation_is_transferred() {
        let (func, site) = straight("consume");
        let plan = plan(&func, &EngineConfig::sequential());
        assert_eq!(
            plan.placement(site),
            Some(&Placement::Transferred {
                uses: vec![UseId(0)]
            })
        );
        assert!(plan.errors.is_empty());
    }

    #[test]
    fn test_loop_allocation_outside_arena() {
        // bb0 -> bb1 { buf = alloc; process(buf); branch c bb1 bb2 }; bb2 return
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let c = b.param("c", Ty::Bool, sp(0));
        let buf = b.let_binding("buf", Ty::named("Buffer"), sp(1));
        let body = b.new_block();
        let exit = b.new_block();
        b.goto(body, sp(2));
        b.switch_to(body);
        let site = b.alloc_site(sp(3));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(3));
        b.eval(call("process", Operand::binding(buf, sp(4))), sp(4));
        b.branch(Operand::binding(c, sp(5)), body, exit, sp(5));
        b.switch_to(exit);
        b.ret(None, sp(6));
        let plan = plan(&b.finish(), &EngineConfig::sequential());
        assert_eq!(
            plan.placement(site),
            Some(&Placement::Individual {
                free_points: vec![FreePoint::After(Location::new(body, 1))]
            })
        );
    }

    #[test]
    fn test_loop_allocation_inside_arena() {
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let c = b.param("c", Ty::Bool, sp(0));
        let (arena, body) = b.open_region(RegionKind::Arena, sp(1));
        b.goto(body, sp(1));
        b.switch_to(body);
        let buf = b.let_binding("buf", Ty::named("Buffer"), sp(2));
        let site = b.alloc_site(sp(3));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(3));
        b.eval(call("process", Operand::binding(buf, sp(4))), sp(4));
        let exit = b.close_region();
        b.branch(Operand::binding(c, sp(5)), body, exit, sp(5));
        b.switch_to(exit);
        b.ret(None, sp(6));
        let plan = plan(&b.finish(), &EngineConfig::sequential());
        assert_eq!(plan.placement(site), Some(&Placement::Region(arena)));
        let exits: Vec<ExitKind> = plan.deallocs.iter().map(|d| d.exit.kind).collect();
        assert_eq!(exits, vec![ExitKind::FallThrough]);
    }

    #[test]
    fn test_returned_reference_escapes() {
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let buf = b.let_binding("buf", Ty::named("Buffer"), sp(0));
        let r = b.let_binding("r", Ty::Ref(Box::new(Ty::named("Buffer"))), sp(1));
        let site = b.alloc_site(sp(2));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(2));
        b.assign(
            r,
            Rvalue::Ref {
                operand: Operand::binding(buf, sp(4)),
                mutable: false,
            },
            sp(3),
        );
        b.ret(Some(Operand::binding(r, sp(9))), sp(8));
        let plan = plan(&b.finish(), &EngineConfig::sequential());
        assert!(matches!(
            &plan.errors[..],
            [OwnershipError::RegionEscape {
                subject: EscapeSubject::Allocation(_),
                route: EscapeRoute::Return,
                escape_span,
                ..
            }] if *escape_span == sp(9)
        ));
    }

    #[test]
    fn test_reference_to_local_escapes() {
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let local = b.let_binding("local", Ty::named("Data"), sp(0));
        let r = b.let_binding("r", Ty::Ref(Box::new(Ty::named("Data"))), sp(1));
        b.assign(local, Rvalue::Use(Operand::int(0)), sp(0));
        b.assign(
            r,
            Rvalue::Ref {
                operand: Operand::binding(local, sp(4)),
                mutable: true,
            },
            sp(3),
        );
        b.ret(Some(Operand::binding(r, sp(9))), sp(8));
        let plan = plan(&b.finish(), &EngineConfig::sequential());
        assert_eq!(plan.errors.len(), 1);
        assert_eq!(
            plan.errors[0].to_string(),
            "reference to local `local` escapes: returned"
        );
    }

    #[test]
    fn test_branch_exit_frees_on_edge() {
        // buf = alloc; branch c -> use, skip
        let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::dummy());
        let c = b.param("c", Ty::Bool, sp(0));
        let buf = b.let_binding("buf", Ty::named("Buffer"), sp(1));
        let used = b.new_block();
        let skipped = b.new_block();
        let site = b.alloc_site(sp(2));
        b.assign(buf, Rvalue::Alloc { alloc: site, args: vec![] }, sp(2));
        b.branch(Operand::binding(c, sp(3)), used, skipped, sp(3));
        b.switch_to(used);
        b.eval(call("process", Operand::binding(buf, sp(4))), sp(4));
        b.ret(None, sp(5));
        b.switch_to(skipped);
        b.ret(None, sp(6));
        let config = EngineConfig::sequential().with_implicit_function_region(false);
        let plan = plan(&b.finish(), &config);
        assert_eq!(
            plan.placement(site),
            Some(&Placement::Individual {
                free_points: vec![
                    FreePoint::After(Location::new(used, 0)),
                    FreePoint::Edge {
                        from: BlockId::ENTRY,
                        to: skipped
                    },
                ]
            })
        );
    }
}
