//! Usage Analyzer.
//!
//! A single pass over one function's CFG that records every occurrence of
//! every binding as a [`Use`], classified by what the occurrence does to
//! the value. The pass also records the facts later stages need:
//! definitions, loans created by borrow expressions and closure captures,
//! value flows between bindings, field stores, and allocation sites.
//!
//! The analyzer never fails. Unreachable blocks and uses that follow a
//! move are recorded like any other, so the validator can report every
//! violation instead of stopping at the first.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::fmt;
use verso_ir::{
    BindingId, BindingRef, BlockId, Callee, Function, Operand, OverrideMode, Rvalue, Span,
    StatementKind, TerminatorKind,
};

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a recorded use, dense per function and in program order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UseId(pub u32);

impl fmt::Display for UseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// A program point: statement `index` of `block`, where
/// `index == statements.len()` is the terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub block: BlockId,
    pub index: usize,
}

impl Location {
    pub fn new(block: BlockId, index: usize) -> Self {
        Self { block, index }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.block, self.index)
    }
}

/// What a use does with the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKind {
    /// Value or field read
    Read,
    /// Assignment to one of the binding's fields
    FieldWrite,
    /// Receiver of a method call (parameter 0 of the callee)
    MethodReceiver,
    /// Passed to a callee parameter, or transferred by value
    ArgumentPass,
    /// Returned to the caller
    ReturnValue,
    /// Captured by a closure
    ClosureCapture,
    /// Kept alive across an await, a yield or an actor message send
    CaptureAcrossSuspension,
    /// Explicit borrow expression
    Reference { mutable: bool },
}

impl fmt::Display for UseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            UseKind::Read => "read",
            UseKind::FieldWrite => "field write",
            UseKind::MethodReceiver => "method receiver",
            UseKind::ArgumentPass => "argument",
            UseKind::ReturnValue => "return value",
            UseKind::ClosureCapture => "closure capture",
            UseKind::CaptureAcrossSuspension => "capture across suspension",
            UseKind::Reference { mutable: true } => "mutable borrow expression",
            UseKind::Reference { mutable: false } => "borrow expression",
        };
        f.write_str(text)
    }
}

/// The callee parameter an argument feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSlot {
    pub callee: Callee,
    pub index: usize,
}

/// Uses evaluated together as operands of one call or capture list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallGroup(pub u32);

/// One syntactic occurrence of a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Use {
    pub id: UseId,
    pub binding: BindingId,
    pub kind: UseKind,
    pub span: Span,
    pub location: Location,
    /// Use-level override keyword
    pub explicit: OverrideMode,
    /// Parameter fed by this use, if it is an argument
    pub param: Option<ParamSlot>,
    /// Field projection; projections never consume their base
    pub field: Option<SmolStr>,
    pub call_group: Option<CallGroup>,
    /// Control-flow successors of the use's block
    pub successors: Vec<BlockId>,
}

/// Where a loan comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanOrigin {
    /// `&x` / `&mut x`
    Reference { mutable: bool },
    /// Closure capture; borrowing only if the closure parameter borrows
    ClosureCapture,
}

/// A borrow that outlives its creating statement through a holder binding.
#[derive(Debug, Clone, PartialEq)]
pub struct LoanSite {
    pub use_id: UseId,
    pub borrowed: BindingId,
    /// Binding that keeps the loan alive
    pub holder: Option<BindingId>,
    pub origin: LoanOrigin,
    pub location: Location,
}

/// An assignment that (re)initializes a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub binding: BindingId,
    pub location: Location,
    pub span: Span,
}

/// How a value reaches another binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Ownership transfer: `let b = a`
    Own,
    /// `let r = &a`
    Borrow,
    /// Constructor argument or closure capture; ownership iff the use moves
    ByMode(UseId),
}

/// Value flowing from one binding into another.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueFlow {
    pub from: BindingId,
    pub to: BindingId,
    pub kind: FlowKind,
    pub location: Location,
}

/// `target.field = value`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStore {
    pub target: BindingId,
    pub value: BindingId,
    pub use_id: UseId,
    pub location: Location,
}

/// An evaluated allocation expression.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocSite {
    pub alloc: verso_ir::AllocId,
    /// Binding initialized with the allocation
    pub dest: Option<BindingId>,
    pub location: Location,
    pub span: Span,
}

/// Everything the Usage Analyzer records for one function.
#[derive(Debug, Clone, Default)]
pub struct UsageInfo {
    pub uses: Vec<Use>,
    /// Uses of each binding in program order, indexed by binding
    pub by_binding: Vec<Vec<UseId>>,
    pub loans: Vec<LoanSite>,
    pub definitions: Vec<Definition>,
    pub flows: Vec<ValueFlow>,
    pub stores: Vec<FieldStore>,
    pub allocations: Vec<AllocSite>,
    by_location: FxHashMap<Location, Vec<UseId>>,
    defs_by_location: FxHashMap<Location, BindingId>,
}

impl UsageInfo {
    pub fn get(&self, id: UseId) -> &Use {
        &self.uses[id.0 as usize]
    }

    /// Uses of a binding in program order.
    pub fn uses_of(&self, binding: BindingId) -> impl Iterator<Item = &Use> + '_ {
        self.by_binding
            .get(binding.0 as usize)
            .into_iter()
            .flatten()
            .map(move |id| self.get(*id))
    }

    /// Uses evaluated at a program point, in evaluation order.
    pub fn uses_at(&self, location: Location) -> &[UseId] {
        self.by_location
            .get(&location)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Binding (re)initialized at a program point.
    pub fn definition_at(&self, location: Location) -> Option<BindingId> {
        self.defs_by_location.get(&location).copied()
    }

    pub fn allocation_site(&self, alloc: verso_ir::AllocId) -> Option<&AllocSite> {
        self.allocations.iter().find(|a| a.alloc == alloc)
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// Record every use in `func`.
pub fn analyze_usage(func: &Function) -> UsageInfo {
    let mut analyzer = UsageAnalyzer {
        info: UsageInfo {
            by_binding: vec![Vec::new(); func.bindings.len()],
            ..UsageInfo::default()
        },
        next_group: 0,
        location: Location::new(verso_ir::BlockId::ENTRY, 0),
        successors: Vec::new(),
    };
    for block in &func.blocks {
        analyzer.successors = block.successors();
        for (index, stmt) in block.statements.iter().enumerate() {
            analyzer.location = Location::new(block.id, index);
            analyzer.statement(&stmt.kind, stmt.span);
        }
        analyzer.location = Location::new(block.id, block.statements.len());
        if let Some(term) = &block.terminator {
            analyzer.terminator(&term.kind);
        }
    }
    analyzer.info
}

struct UsageAnalyzer {
    info: UsageInfo,
    next_group: u32,
    location: Location,
    successors: Vec<BlockId>,
}

impl UsageAnalyzer {
    fn fresh_group(&mut self) -> CallGroup {
        let group = CallGroup(self.next_group);
        self.next_group += 1;
        group
    }

    fn record(
        &mut self,
        binding: &BindingRef,
        kind: UseKind,
        param: Option<ParamSlot>,
        field: Option<SmolStr>,
        call_group: Option<CallGroup>,
    ) -> UseId {
        let id = UseId(self.info.uses.len() as u32);
        self.info.uses.push(Use {
            id,
            binding: binding.binding,
            kind,
            span: binding.span,
            location: self.location,
            explicit: binding.explicit,
            param,
            field,
            call_group,
            successors: self.successors.clone(),
        });
        if let Some(list) = self.info.by_binding.get_mut(binding.binding.0 as usize) {
            list.push(id);
        }
        self.info.by_location.entry(self.location).or_default().push(id);
        id
    }

    /// A plain read of any binding inside `op`.
    fn read(&mut self, op: &Operand) {
        match op {
            Operand::Binding(r) => {
                self.record(r, UseKind::Read, None, None, None);
            }
            Operand::Field(r, field) => {
                self.record(r, UseKind::Read, None, Some(field.clone()), None);
            }
            Operand::Constant(_) => {}
        }
    }

    /// An operand in argument position.
    fn argument(
        &mut self,
        op: &Operand,
        kind: UseKind,
        param: Option<ParamSlot>,
        group: CallGroup,
    ) -> Option<UseId> {
        match op {
            Operand::Binding(r) => Some(self.record(r, kind, param, None, Some(group))),
            Operand::Field(r, field) => {
                Some(self.record(r, kind, param, Some(field.clone()), Some(group)))
            }
            Operand::Constant(_) => None,
        }
    }

    fn define(&mut self, binding: BindingId, span: Span) {
        self.info.definitions.push(Definition {
            binding,
            location: self.location,
            span,
        });
        self.info.defs_by_location.insert(self.location, binding);
    }

    fn flow(&mut self, from: BindingId, to: BindingId, kind: FlowKind) {
        self.info.flows.push(ValueFlow {
            from,
            to,
            kind,
            location: self.location,
        });
    }

    fn statement(&mut self, kind: &StatementKind, span: Span) {
        match kind {
            StatementKind::Assign { dest, value } => {
                self.rvalue(value, Some(*dest), span);
                self.define(*dest, span);
            }
            StatementKind::FieldWrite {
                target,
                field,
                value,
            } => {
                // The right-hand side is evaluated before the write
                if let Rvalue::Use(Operand::Binding(src)) = value {
                    let use_id = self.record(src, UseKind::ArgumentPass, None, None, None);
                    self.info.stores.push(FieldStore {
                        target: target.binding,
                        value: src.binding,
                        use_id,
                        location: self.location,
                    });
                    self.flow(src.binding, target.binding, FlowKind::ByMode(use_id));
                } else {
                    self.rvalue(value, None, span);
                }
                self.record(target, UseKind::FieldWrite, None, Some(field.clone()), None);
            }
            StatementKind::Eval(value) => self.rvalue(value, None, span),
            StatementKind::Suspend { captures, .. } => {
                let group = self.fresh_group();
                for op in captures {
                    self.argument(op, UseKind::CaptureAcrossSuspension, None, group);
                }
            }
            StatementKind::Send { channel, value } => {
                self.read(channel);
                let group = self.fresh_group();
                match value {
                    Operand::Binding(_) => {
                        self.argument(value, UseKind::CaptureAcrossSuspension, None, group);
                    }
                    other => self.read(other),
                }
            }
        }
    }

    fn rvalue(&mut self, value: &Rvalue, dest: Option<BindingId>, span: Span) {
        match value {
            Rvalue::Use(op) => match (op, dest) {
                (Operand::Binding(src), Some(dest)) => {
                    self.record(src, UseKind::ArgumentPass, None, None, None);
                    self.flow(src.binding, dest, FlowKind::Own);
                }
                _ => self.read(op),
            },
            Rvalue::Call { callee, args } => {
                let group = self.fresh_group();
                for (index, arg) in args.iter().enumerate() {
                    let slot = ParamSlot {
                        callee: callee.clone(),
                        index,
                    };
                    let use_id = self.argument(arg, UseKind::ArgumentPass, Some(slot), group);
                    if let (Callee::Constructor(_), Some(dest), Some(use_id)) = (callee, dest, use_id) {
                        if let Some(r) = arg.binding_ref() {
                            self.flow(r.binding, dest, FlowKind::ByMode(use_id));
                        }
                    }
                }
            }
            Rvalue::MethodCall {
                callee,
                receiver,
                args,
            } => {
                let group = self.fresh_group();
                let slot = ParamSlot {
                    callee: callee.clone(),
                    index: 0,
                };
                self.argument(receiver, UseKind::MethodReceiver, Some(slot), group);
                for (index, arg) in args.iter().enumerate() {
                    let slot = ParamSlot {
                        callee: callee.clone(),
                        index: index + 1,
                    };
                    self.argument(arg, UseKind::ArgumentPass, Some(slot), group);
                }
            }
            Rvalue::Alloc { alloc, args } => {
                let group = self.fresh_group();
                for arg in args {
                    self.argument(arg, UseKind::ArgumentPass, None, group);
                }
                self.info.allocations.push(AllocSite {
                    alloc: *alloc,
                    dest,
                    location: self.location,
                    span,
                });
            }
            Rvalue::Ref { operand, mutable } => {
                let kind = UseKind::Reference { mutable: *mutable };
                let (r, field) = match operand {
                    Operand::Binding(r) => (r, None),
                    Operand::Field(r, field) => (r, Some(field.clone())),
                    Operand::Constant(_) => return,
                };
                let use_id = self.record(r, kind, None, field, None);
                self.info.loans.push(LoanSite {
                    use_id,
                    borrowed: r.binding,
                    holder: dest,
                    origin: LoanOrigin::Reference { mutable: *mutable },
                    location: self.location,
                });
                if let Some(dest) = dest {
                    self.flow(r.binding, dest, FlowKind::Borrow);
                }
            }
            Rvalue::Closure { function, captures } => {
                let group = self.fresh_group();
                for (index, capture) in captures.iter().enumerate() {
                    let slot = function.map(|f| ParamSlot {
                        callee: Callee::Function(f),
                        index,
                    });
                    let Some(use_id) =
                        self.argument(capture, UseKind::ClosureCapture, slot, group)
                    else {
                        continue;
                    };
                    if let Some(r) = capture.binding_ref() {
                        self.info.loans.push(LoanSite {
                            use_id,
                            borrowed: r.binding,
                            holder: dest,
                            origin: LoanOrigin::ClosureCapture,
                            location: self.location,
                        });
                        if let Some(dest) = dest {
                            self.flow(r.binding, dest, FlowKind::ByMode(use_id));
                        }
                    }
                }
            }
            Rvalue::BinaryOp(_, lhs, rhs) => {
                self.read(lhs);
                self.read(rhs);
            }
        }
    }

    fn terminator(&mut self, kind: &TerminatorKind) {
        match kind {
            TerminatorKind::Branch { cond, .. } => self.read(cond),
            TerminatorKind::Return(Some(Operand::Binding(r))) => {
                self.record(r, UseKind::ReturnValue, None, None, None);
            }
            TerminatorKind::Return(Some(op)) => self.read(op),
            TerminatorKind::Return(None)
            | TerminatorKind::Goto { .. }
            | TerminatorKind::Unreachable => {}
        }
    }
}
