//! Typed control-flow-graph data structures.
//!
//! Every function arrives from the front end as a graph of basic blocks
//! over named bindings and resolved calls. Explicit override keywords and
//! `region { }` / `arena { }` boundaries are preserved as metadata so the
//! ownership engine never has to look at surface syntax.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

// ============================================================================
// Source Locations
// ============================================================================

/// A byte range in the compilation unit's source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn dummy() -> Self {
        Self { start: 0, end: 0 }
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(range.start, range.end)
    }
}

impl From<Span> for Range<usize> {
    fn from(span: Span) -> Self {
        span.start..span.end
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a function in the compilation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

/// Index of a binding (let/var/parameter) within its function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub u32);

/// Basic block identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The entry block (block 0)
    pub const ENTRY: BlockId = BlockId(0);
}

/// Lexical allocation region identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub u32);

impl RegionId {
    /// The implicit function-body region (region 0)
    pub const BODY: RegionId = RegionId(0);
}

/// Allocation site identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "_{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for AllocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc{}", self.0)
    }
}

// ============================================================================
// Types and Override Keywords
// ============================================================================

/// Resolved type of a binding, as handed over by the type checker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Unit,
    Bool,
    Int,
    Float,
    Char,
    Str,
    /// A user-defined struct, class or enum
    Named(SmolStr),
    Array(Box<Ty>),
    /// A reference produced by an explicit borrow expression
    Ref(Box<Ty>),
    Closure,
}

impl Ty {
    pub fn named(name: impl Into<SmolStr>) -> Self {
        Ty::Named(name.into())
    }

    /// Copy types are duplicated on transfer and can never be consumed.
    pub fn is_copy(&self) -> bool {
        matches!(self, Ty::Unit | Ty::Bool | Ty::Int | Ty::Float | Ty::Char)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Unit => write!(f, "()"),
            Ty::Bool => write!(f, "Bool"),
            Ty::Int => write!(f, "Int"),
            Ty::Float => write!(f, "Float"),
            Ty::Char => write!(f, "Char"),
            Ty::Str => write!(f, "String"),
            Ty::Named(name) => write!(f, "{}", name),
            Ty::Array(elem) => write!(f, "[{}]", elem),
            Ty::Ref(inner) => write!(f, "ref {}", inner),
            Ty::Closure => write!(f, "closure"),
        }
    }
}

/// Explicit ownership keyword written by the programmer.
///
/// Attached either to a declaration (`fun push(inout list: List)`) or to a
/// single use (`Wrapper(move a)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OverrideMode {
    #[default]
    None,
    Move,
    Borrow,
    MutableBorrow,
    Inout,
}

impl OverrideMode {
    pub fn is_explicit(&self) -> bool {
        !matches!(self, OverrideMode::None)
    }

    /// The surface keyword, if any.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            OverrideMode::None => None,
            OverrideMode::Move => Some("move"),
            OverrideMode::Borrow => Some("borrow"),
            OverrideMode::MutableBorrow => Some("mut"),
            OverrideMode::Inout => Some("inout"),
        }
    }
}

impl fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.keyword().unwrap_or("none"))
    }
}

// ============================================================================
// Bindings, Regions and Allocation Sites
// ============================================================================

/// How a binding was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Param,
    Let,
    Var,
}

/// A named value tracked by the analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingDecl {
    pub name: SmolStr,
    pub ty: Ty,
    pub kind: BindingKind,
    /// Declaring scope
    pub region: RegionId,
    /// Declaration-level override keyword
    pub override_mode: OverrideMode,
    pub span: Span,
}

impl BindingDecl {
    pub fn is_param(&self) -> bool {
        self.kind == BindingKind::Param
    }
}

/// Kind of lexical allocation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// The implicit region spanning the whole function body
    FunctionBody,
    /// An explicit `region { }` block
    Region,
    /// An explicit `arena { }` block; members are freed together regardless
    /// of individual reachability
    Arena,
}

impl RegionKind {
    pub fn is_explicit(&self) -> bool {
        !matches!(self, RegionKind::FunctionBody)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            RegionKind::FunctionBody => "function body",
            RegionKind::Region => "region",
            RegionKind::Arena => "arena",
        }
    }
}

/// A lexical allocation scope.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionDecl {
    pub id: RegionId,
    pub kind: RegionKind,
    pub parent: Option<RegionId>,
    /// Block control reaches when the region's body falls through
    pub exit: Option<BlockId>,
    pub span: Span,
}

/// An allocation expression site.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocDecl {
    pub id: AllocId,
    pub span: Span,
}

// ============================================================================
// Operands and Rvalues
// ============================================================================

/// One syntactic occurrence of a binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BindingRef {
    pub binding: BindingId,
    /// Use-level override keyword (e.g. `move a`)
    pub explicit: OverrideMode,
    pub span: Span,
}

impl BindingRef {
    pub fn new(binding: BindingId, span: Span) -> Self {
        Self {
            binding,
            explicit: OverrideMode::None,
            span,
        }
    }

    pub fn with_override(mut self, mode: OverrideMode) -> Self {
        self.explicit = mode;
        self
    }
}

/// Constant values
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Unit => write!(f, "()"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(i) => write!(f, "{}", i),
            Constant::Float(x) => write!(f, "{}", x),
            Constant::Str(s) => write!(f, "{:?}", s.as_str()),
        }
    }
}

/// An operand (value that can be used)
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// The whole binding
    Binding(BindingRef),
    /// A field projection read out of a binding: `x.name`
    Field(BindingRef, SmolStr),
    Constant(Constant),
}

impl Operand {
    pub fn binding(binding: BindingId, span: Span) -> Self {
        Operand::Binding(BindingRef::new(binding, span))
    }

    /// `move binding`
    pub fn moved(binding: BindingId, span: Span) -> Self {
        Operand::Binding(BindingRef::new(binding, span).with_override(OverrideMode::Move))
    }

    pub fn explicit(binding: BindingId, mode: OverrideMode, span: Span) -> Self {
        Operand::Binding(BindingRef::new(binding, span).with_override(mode))
    }

    pub fn field(binding: BindingId, field: impl Into<SmolStr>, span: Span) -> Self {
        Operand::Field(BindingRef::new(binding, span), field.into())
    }

    pub fn int(value: i64) -> Self {
        Operand::Constant(Constant::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Operand::Constant(Constant::Bool(value))
    }

    pub fn unit() -> Self {
        Operand::Constant(Constant::Unit)
    }

    /// The binding occurrence inside this operand, if any.
    pub fn binding_ref(&self) -> Option<&BindingRef> {
        match self {
            Operand::Binding(r) | Operand::Field(r, _) => Some(r),
            Operand::Constant(_) => None,
        }
    }
}

/// A resolved call target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A function defined in this compilation unit
    Function(FunctionId),
    /// A foreign or library function with a declared signature
    Extern(SmolStr),
    /// Aggregate construction; by-value arguments are consumed
    Constructor(SmolStr),
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

/// An rvalue (computed value)
#[derive(Debug, Clone, PartialEq)]
pub enum Rvalue {
    /// Transfer an operand's value
    Use(Operand),
    Call {
        callee: Callee,
        args: Vec<Operand>,
    },
    /// Method call; the receiver is parameter 0 of the callee
    MethodCall {
        callee: Callee,
        receiver: Operand,
        args: Vec<Operand>,
    },
    /// Heap allocation expression
    Alloc {
        alloc: AllocId,
        args: Vec<Operand>,
    },
    /// Explicit borrow expression
    Ref {
        operand: Operand,
        mutable: bool,
    },
    /// Closure creation; captures feed the closure function's leading parameters
    Closure {
        function: Option<FunctionId>,
        captures: Vec<Operand>,
    },
    BinaryOp(BinOp, Operand, Operand),
}

impl Rvalue {
    /// All operands in evaluation order.
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Rvalue::Use(op) => vec![op],
            Rvalue::Call { args, .. } | Rvalue::Alloc { args, .. } => args.iter().collect(),
            Rvalue::MethodCall { receiver, args, .. } => {
                std::iter::once(receiver).chain(args.iter()).collect()
            }
            Rvalue::Ref { operand, .. } => vec![operand],
            Rvalue::Closure { captures, .. } => captures.iter().collect(),
            Rvalue::BinaryOp(_, lhs, rhs) => vec![lhs, rhs],
        }
    }

    pub fn callee(&self) -> Option<&Callee> {
        match self {
            Rvalue::Call { callee, .. } | Rvalue::MethodCall { callee, .. } => Some(callee),
            _ => None,
        }
    }
}

// ============================================================================
// Statements and Terminators
// ============================================================================

/// Suspension point kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuspendKind {
    Await,
    Yield,
}

/// A statement (no control flow transfer)
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub span: Span,
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Initialize or re-initialize a binding: `dest = rvalue`
    Assign { dest: BindingId, value: Rvalue },
    /// `target.field = rvalue`
    FieldWrite {
        target: BindingRef,
        field: SmolStr,
        value: Rvalue,
    },
    /// Evaluate for side effects
    Eval(Rvalue),
    /// Await/yield; `captures` are the bindings live across the suspension
    Suspend {
        kind: SuspendKind,
        captures: Vec<Operand>,
    },
    /// Message send across a channel or actor boundary
    Send { channel: Operand, value: Operand },
}

/// A terminator (control flow transfer)
#[derive(Debug, Clone, PartialEq)]
pub struct Terminator {
    pub kind: TerminatorKind,
    pub span: Span,
}

/// Terminator kinds
#[derive(Debug, Clone, PartialEq)]
pub enum TerminatorKind {
    Goto {
        target: BlockId,
    },
    Branch {
        cond: Operand,
        then: BlockId,
        otherwise: BlockId,
    },
    Return(Option<Operand>),
    Unreachable,
}

impl TerminatorKind {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            TerminatorKind::Goto { target } => vec![*target],
            TerminatorKind::Branch {
                then, otherwise, ..
            } => {
                if then == otherwise {
                    vec![*then]
                } else {
                    vec![*then, *otherwise]
                }
            }
            TerminatorKind::Return(_) | TerminatorKind::Unreachable => Vec::new(),
        }
    }
}

/// A basic block in the CFG
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Innermost lexical region containing this block
    pub region: RegionId,
    pub statements: Vec<Statement>,
    pub terminator: Option<Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId, region: RegionId) -> Self {
        Self {
            id,
            region,
            statements: Vec::new(),
            terminator: None,
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator
            .as_ref()
            .map(|t| t.kind.successors())
            .unwrap_or_default()
    }

    pub fn is_return(&self) -> bool {
        matches!(
            self.terminator.as_ref().map(|t| &t.kind),
            Some(TerminatorKind::Return(_))
        )
    }
}

// ============================================================================
// Functions and Programs
// ============================================================================

/// One function's typed body
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub id: FunctionId,
    pub name: SmolStr,
    pub span: Span,
    pub params: Vec<BindingId>,
    pub bindings: Vec<BindingDecl>,
    pub blocks: Vec<BasicBlock>,
    pub regions: Vec<RegionDecl>,
    pub allocations: Vec<AllocDecl>,
    pub is_async: bool,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn binding(&self, id: BindingId) -> &BindingDecl {
        &self.bindings[id.0 as usize]
    }

    pub fn region(&self, id: RegionId) -> &RegionDecl {
        &self.regions[id.0 as usize]
    }

    pub fn allocation(&self, id: AllocId) -> &AllocDecl {
        &self.allocations[id.0 as usize]
    }

    pub fn binding_ids(&self) -> impl Iterator<Item = BindingId> + '_ {
        (0..self.bindings.len() as u32).map(BindingId)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block).successors()
    }

    /// Predecessor lists indexed by block.
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut preds = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            for succ in block.successors() {
                if let Some(list) = preds.get_mut(succ.0 as usize) {
                    list.push(block.id);
                }
            }
        }
        preds
    }

    /// Blocks reachable from the entry block.
    pub fn reachable_blocks(&self) -> FxHashSet<BlockId> {
        let mut seen = FxHashSet::default();
        if self.blocks.is_empty() {
            return seen;
        }
        let mut stack = vec![BlockId::ENTRY];
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            stack.extend(self.successors(block));
        }
        seen
    }

    /// Blocks in reverse post-order from the entry; unreachable blocks are omitted.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = FxHashSet::default();
        let mut order = Vec::with_capacity(self.blocks.len());
        if self.blocks.is_empty() {
            return order;
        }
        // Iterative DFS: (block, next successor index)
        let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
        visited.insert(BlockId::ENTRY);
        while let Some((block, idx)) = stack.pop() {
            let succs = self.successors(block);
            if idx < succs.len() {
                stack.push((block, idx + 1));
                let next = succs[idx];
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                order.push(block);
            }
        }
        order.reverse();
        order
    }

    /// Whether `inner` is `outer` or nested somewhere inside it.
    pub fn region_within(&self, inner: RegionId, outer: RegionId) -> bool {
        let mut current = Some(inner);
        let mut steps = 0;
        while let Some(region) = current {
            if region == outer {
                return true;
            }
            steps += 1;
            if steps > self.regions.len() {
                return false;
            }
            current = self.regions.get(region.0 as usize).and_then(|r| r.parent);
        }
        false
    }

    /// Nesting depth of a region; the body region has depth 0.
    pub fn region_depth(&self, region: RegionId) -> usize {
        let mut depth = 0;
        let mut current = self.regions.get(region.0 as usize).and_then(|r| r.parent);
        while let Some(parent) = current {
            depth += 1;
            if depth > self.regions.len() {
                break;
            }
            current = self.regions.get(parent.0 as usize).and_then(|r| r.parent);
        }
        depth
    }

    /// Chain of regions from `region` outwards to the body region.
    pub fn region_ancestors(&self, region: RegionId) -> Vec<RegionId> {
        let mut chain = Vec::new();
        let mut current = Some(region);
        while let Some(r) = current {
            if chain.contains(&r) {
                break;
            }
            chain.push(r);
            current = self.regions.get(r.0 as usize).and_then(|d| d.parent);
        }
        chain
    }

    /// Blocks lexically inside `region` or any region nested in it.
    pub fn blocks_in_region(&self, region: RegionId) -> FxHashSet<BlockId> {
        self.blocks
            .iter()
            .filter(|b| self.region_within(b.region, region))
            .map(|b| b.id)
            .collect()
    }
}

/// Declared passing conventions of a foreign function.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternDecl {
    pub name: SmolStr,
    /// One keyword per parameter; `None` falls back to the engine default
    pub params: Vec<OverrideMode>,
}

/// A compilation unit handed over after type checking
#[derive(Debug, Clone)]
pub struct Program {
    /// Source file of this unit
    pub file: PathBuf,
    /// All functions, in declaration order
    pub functions: IndexMap<FunctionId, Function>,
    /// Extern signatures by name
    pub externs: FxHashMap<SmolStr, ExternDecl>,
    /// Declared function names (including not-yet-defined ones)
    names: IndexMap<FunctionId, SmolStr>,
    next_fn_id: u32,
}

impl Program {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            functions: IndexMap::new(),
            externs: FxHashMap::default(),
            names: IndexMap::new(),
            next_fn_id: 0,
        }
    }

    /// Reserve an id for a function so that calls to it can be built before
    /// its body is defined.
    pub fn declare_function(&mut self, name: impl Into<SmolStr>) -> FunctionId {
        let id = FunctionId(self.next_fn_id);
        self.next_fn_id += 1;
        self.names.insert(id, name.into());
        id
    }

    /// Install a finished function body.
    pub fn define(&mut self, function: Function) {
        self.names.insert(function.id, function.name.clone());
        if function.id.0 >= self.next_fn_id {
            self.next_fn_id = function.id.0 + 1;
        }
        self.functions.insert(function.id, function);
    }

    pub fn declare_extern(&mut self, name: impl Into<SmolStr>, params: Vec<OverrideMode>) {
        let name = name.into();
        self.externs.insert(
            name.clone(),
            ExternDecl { name, params },
        );
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(&id)
    }

    /// Look up a function by name
    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.values().find(|f| f.name == name)
    }

    /// Name of a declared function, defined or not.
    pub fn function_name(&self, id: FunctionId) -> Option<&SmolStr> {
        self.names.get(&id)
    }
}
