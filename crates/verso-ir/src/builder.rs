//! Incremental construction of [`Function`] bodies.
//!
//! The builder mirrors what a lowering pass does: it keeps a current block
//! and a stack of open lexical regions, so every block and binding created
//! while a `region { }` is open is attributed to that region.

use smol_str::SmolStr;

use crate::ir::*;

/// Builder for a single function's CFG
pub struct FunctionBuilder {
    func: Function,
    current: BlockId,
    region_stack: Vec<RegionId>,
}

impl FunctionBuilder {
    /// Start a function with its implicit body region and entry block.
    pub fn new(id: FunctionId, name: impl Into<SmolStr>, span: Span) -> Self {
        let body = RegionDecl {
            id: RegionId::BODY,
            kind: RegionKind::FunctionBody,
            parent: None,
            exit: None,
            span,
        };
        let entry = BasicBlock::new(BlockId::ENTRY, RegionId::BODY);
        Self {
            func: Function {
                id,
                name: name.into(),
                span,
                params: Vec::new(),
                bindings: Vec::new(),
                blocks: vec![entry],
                regions: vec![body],
                allocations: Vec::new(),
                is_async: false,
            },
            current: BlockId::ENTRY,
            region_stack: vec![RegionId::BODY],
        }
    }

    pub fn set_async(&mut self, is_async: bool) -> &mut Self {
        self.func.is_async = is_async;
        self
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Declare a binding in the innermost open region.
    pub fn declare(
        &mut self,
        name: impl Into<SmolStr>,
        ty: Ty,
        kind: BindingKind,
        override_mode: OverrideMode,
        span: Span,
    ) -> BindingId {
        let id = BindingId(self.func.bindings.len() as u32);
        self.func.bindings.push(BindingDecl {
            name: name.into(),
            ty,
            kind,
            region: self.current_region(),
            override_mode,
            span,
        });
        if kind == BindingKind::Param {
            self.func.params.push(id);
        }
        id
    }

    pub fn param(&mut self, name: impl Into<SmolStr>, ty: Ty, span: Span) -> BindingId {
        self.declare(name, ty, BindingKind::Param, OverrideMode::None, span)
    }

    /// A parameter carrying a declaration-level keyword (`inout list: List`).
    pub fn param_with_override(
        &mut self,
        name: impl Into<SmolStr>,
        ty: Ty,
        mode: OverrideMode,
        span: Span,
    ) -> BindingId {
        self.declare(name, ty, BindingKind::Param, mode, span)
    }

    pub fn let_binding(&mut self, name: impl Into<SmolStr>, ty: Ty, span: Span) -> BindingId {
        self.declare(name, ty, BindingKind::Let, OverrideMode::None, span)
    }

    pub fn var_binding(&mut self, name: impl Into<SmolStr>, ty: Ty, span: Span) -> BindingId {
        self.declare(name, ty, BindingKind::Var, OverrideMode::None, span)
    }

    // ========================================================================
    // Blocks and Regions
    // ========================================================================

    /// Create a new block in the innermost open region. Does not switch to it.
    pub fn new_block(&mut self) -> BlockId {
        let region = self.current_region();
        self.new_block_in(region)
    }

    pub fn new_block_in(&mut self, region: RegionId) -> BlockId {
        let id = BlockId(self.func.blocks.len() as u32);
        self.func.blocks.push(BasicBlock::new(id, region));
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn current_region(&self) -> RegionId {
        self.region_stack.last().copied().unwrap_or(RegionId::BODY)
    }

    /// Open a `region { }` or `arena { }` nested in the current region.
    ///
    /// Returns the region and its first block; the caller jumps into it.
    pub fn open_region(&mut self, kind: RegionKind, span: Span) -> (RegionId, BlockId) {
        let id = RegionId(self.func.regions.len() as u32);
        self.func.regions.push(RegionDecl {
            id,
            kind,
            parent: Some(self.current_region()),
            exit: None,
            span,
        });
        self.region_stack.push(id);
        let first = self.new_block();
        (id, first)
    }

    /// Close the innermost explicit region, creating its fall-through
    /// continuation block in the parent region.
    pub fn close_region(&mut self) -> BlockId {
        if self.region_stack.len() <= 1 {
            // The body region stays open for the whole function
            return self.new_block();
        }
        let region = self.region_stack.pop().unwrap_or(RegionId::BODY);
        let exit = self.new_block();
        self.func.regions[region.0 as usize].exit = Some(exit);
        exit
    }

    pub fn alloc_site(&mut self, span: Span) -> AllocId {
        let id = AllocId(self.func.allocations.len() as u32);
        self.func.allocations.push(AllocDecl { id, span });
        id
    }

    // ========================================================================
    // Statements and Terminators
    // ========================================================================

    /// Append a statement to the current block.
    pub fn push(&mut self, kind: StatementKind, span: Span) {
        let block = self.current;
        if let Some(b) = self.func.blocks.get_mut(block.0 as usize) {
            b.statements.push(Statement { kind, span });
        }
    }

    pub fn assign(&mut self, dest: BindingId, value: Rvalue, span: Span) {
        self.push(StatementKind::Assign { dest, value }, span);
    }

    pub fn eval(&mut self, value: Rvalue, span: Span) {
        self.push(StatementKind::Eval(value), span);
    }

    /// Terminate the current block.
    pub fn terminate(&mut self, kind: TerminatorKind, span: Span) {
        let block = self.current;
        if let Some(b) = self.func.blocks.get_mut(block.0 as usize) {
            b.terminator = Some(Terminator { kind, span });
        }
    }

    pub fn goto(&mut self, target: BlockId, span: Span) {
        self.terminate(TerminatorKind::Goto { target }, span);
    }

    pub fn branch(&mut self, cond: Operand, then: BlockId, otherwise: BlockId, span: Span) {
        self.terminate(
            TerminatorKind::Branch {
                cond,
                then,
                otherwise,
            },
            span,
        );
    }

    pub fn ret(&mut self, value: Option<Operand>, span: Span) {
        self.terminate(TerminatorKind::Return(value), span);
    }

    /// Finish building. Structural problems are left for [`Function::validate`].
    pub fn finish(self) -> Function {
        self.func
    }
}
