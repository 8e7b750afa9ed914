//! Structural validation of function bodies.
//!
//! The ownership engine only analyzes functions that pass these checks;
//! anything else is reported as malformed and skipped.

use rustc_hash::FxHashSet;
use smol_str::SmolStr;
use thiserror::Error;

use crate::ir::*;

/// Structural problems in a function body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("function `{function}` has no basic blocks")]
    EmptyFunction { function: SmolStr },

    #[error("block {block} in `{function}` has no terminator")]
    MissingTerminator { function: SmolStr, block: BlockId },

    #[error("`{function}` refers to unknown block {block}")]
    UnknownBlock { function: SmolStr, block: BlockId },

    #[error("`{function}` refers to unknown binding {binding}")]
    UnknownBinding { function: SmolStr, binding: BindingId },

    #[error("`{function}` refers to unknown region {region}")]
    UnknownRegion { function: SmolStr, region: RegionId },

    #[error("`{function}` refers to unknown allocation site {alloc}")]
    UnknownAlloc { function: SmolStr, alloc: AllocId },

    #[error("`{function}` calls undefined function {callee}")]
    UnknownFunction { function: SmolStr, callee: FunctionId },

    #[error("`{function}` does not have exactly one function-body region at r0")]
    MissingBodyRegion { function: SmolStr },

    #[error("region {region} in `{function}` has no parent")]
    OrphanedRegion { function: SmolStr, region: RegionId },

    #[error("region {region} in `{function}` is its own ancestor")]
    CircularRegion { function: SmolStr, region: RegionId },

    #[error("allocation site {alloc} in `{function}` is evaluated by more than one expression")]
    DuplicateAllocation { function: SmolStr, alloc: AllocId },

    #[error("parameter list of `{function}` names non-parameter binding {binding}")]
    InvalidParameter { function: SmolStr, binding: BindingId },
}

impl Function {
    /// Check that every id is in range, every block is terminated, and the
    /// region tree has a single function-body root.
    pub fn validate(&self) -> Result<(), IrError> {
        let name = || self.name.clone();

        if self.blocks.is_empty() {
            return Err(IrError::EmptyFunction { function: name() });
        }

        self.validate_regions()?;

        for (index, binding) in self.bindings.iter().enumerate() {
            self.check_region(binding.region)?;
            let id = BindingId(index as u32);
            if binding.is_param() && !self.params.contains(&id) {
                return Err(IrError::InvalidParameter {
                    function: name(),
                    binding: id,
                });
            }
        }
        for &param in &self.params {
            self.check_binding(param)?;
            if !self.binding(param).is_param() {
                return Err(IrError::InvalidParameter {
                    function: name(),
                    binding: param,
                });
            }
        }

        let mut seen_allocs = FxHashSet::default();
        for (index, block) in self.blocks.iter().enumerate() {
            if block.id.0 as usize != index {
                return Err(IrError::UnknownBlock {
                    function: name(),
                    block: block.id,
                });
            }
            self.check_region(block.region)?;

            for stmt in &block.statements {
                self.validate_statement(&stmt.kind, &mut seen_allocs)?;
            }

            let term = block.terminator.as_ref().ok_or_else(|| IrError::MissingTerminator {
                function: name(),
                block: block.id,
            })?;
            match &term.kind {
                TerminatorKind::Branch { cond, .. } => self.check_operand(cond)?,
                TerminatorKind::Return(Some(value)) => self.check_operand(value)?,
                _ => {}
            }
            for succ in term.kind.successors() {
                self.check_block(succ)?;
            }
        }
        Ok(())
    }

    fn validate_regions(&self) -> Result<(), IrError> {
        let name = || self.name.clone();
        let body_ok = self
            .regions
            .first()
            .map(|r| r.kind == RegionKind::FunctionBody && r.parent.is_none())
            .unwrap_or(false);
        let body_count = self
            .regions
            .iter()
            .filter(|r| r.kind == RegionKind::FunctionBody)
            .count();
        if !body_ok || body_count != 1 {
            return Err(IrError::MissingBodyRegion { function: name() });
        }

        for (index, region) in self.regions.iter().enumerate().skip(1) {
            let id = RegionId(index as u32);
            if region.id != id {
                return Err(IrError::UnknownRegion {
                    function: name(),
                    region: region.id,
                });
            }
            let parent = region.parent.ok_or_else(|| IrError::OrphanedRegion {
                function: name(),
                region: id,
            })?;
            if parent.0 as usize >= self.regions.len() {
                return Err(IrError::OrphanedRegion {
                    function: name(),
                    region: id,
                });
            }
            if let Some(exit) = region.exit {
                self.check_block(exit)?;
            }

            // Walk to the root; a chain longer than the region count loops
            let mut current = Some(parent);
            let mut steps = 0;
            while let Some(r) = current {
                if r == id || steps > self.regions.len() {
                    return Err(IrError::CircularRegion {
                        function: name(),
                        region: id,
                    });
                }
                steps += 1;
                current = self.regions[r.0 as usize].parent;
            }
        }
        Ok(())
    }

    fn validate_statement(
        &self,
        kind: &StatementKind,
        seen_allocs: &mut FxHashSet<AllocId>,
    ) -> Result<(), IrError> {
        match kind {
            StatementKind::Assign { dest, value } => {
                self.check_binding(*dest)?;
                self.validate_rvalue(value, seen_allocs)
            }
            StatementKind::FieldWrite { target, value, .. } => {
                self.check_binding(target.binding)?;
                self.validate_rvalue(value, seen_allocs)
            }
            StatementKind::Eval(value) => self.validate_rvalue(value, seen_allocs),
            StatementKind::Suspend { captures, .. } => {
                captures.iter().try_for_each(|op| self.check_operand(op))
            }
            StatementKind::Send { channel, value } => {
                self.check_operand(channel)?;
                self.check_operand(value)
            }
        }
    }

    fn validate_rvalue(
        &self,
        value: &Rvalue,
        seen_allocs: &mut FxHashSet<AllocId>,
    ) -> Result<(), IrError> {
        if let Rvalue::Alloc { alloc, .. } = value {
            if alloc.0 as usize >= self.allocations.len() {
                return Err(IrError::UnknownAlloc {
                    function: self.name.clone(),
                    alloc: *alloc,
                });
            }
            if !seen_allocs.insert(*alloc) {
                return Err(IrError::DuplicateAllocation {
                    function: self.name.clone(),
                    alloc: *alloc,
                });
            }
        }
        value
            .operands()
            .into_iter()
            .try_for_each(|op| self.check_operand(op))
    }

    fn check_operand(&self, op: &Operand) -> Result<(), IrError> {
        match op.binding_ref() {
            Some(r) => self.check_binding(r.binding),
            None => Ok(()),
        }
    }

    fn check_binding(&self, binding: BindingId) -> Result<(), IrError> {
        if (binding.0 as usize) < self.bindings.len() {
            Ok(())
        } else {
            Err(IrError::UnknownBinding {
                function: self.name.clone(),
                binding,
            })
        }
    }

    fn check_block(&self, block: BlockId) -> Result<(), IrError> {
        if (block.0 as usize) < self.blocks.len() {
            Ok(())
        } else {
            Err(IrError::UnknownBlock {
                function: self.name.clone(),
                block,
            })
        }
    }

    fn check_region(&self, region: RegionId) -> Result<(), IrError> {
        if (region.0 as usize) < self.regions.len() {
            Ok(())
        } else {
            Err(IrError::UnknownRegion {
                function: self.name.clone(),
                region,
            })
        }
    }
}

impl Program {
    /// Validate a function's structure and that every local callee is defined.
    pub fn validate_function(&self, func: &Function) -> Result<(), IrError> {
        func.validate()?;
        for block in &func.blocks {
            for stmt in &block.statements {
                let rvalue = match &stmt.kind {
                    StatementKind::Assign { value, .. }
                    | StatementKind::FieldWrite { value, .. }
                    | StatementKind::Eval(value) => value,
                    _ => continue,
                };
                let target = match rvalue {
                    Rvalue::Call {
                        callee: Callee::Function(id),
                        ..
                    }
                    | Rvalue::MethodCall {
                        callee: Callee::Function(id),
                        ..
                    } => Some(*id),
                    Rvalue::Closure { function, .. } => *function,
                    _ => None,
                };
                if let Some(id) = target {
                    if !self.functions.contains_key(&id) {
                        return Err(IrError::UnknownFunction {
                            function: func.name.clone(),
                            callee: id,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;

    fn trivial() -> FunctionBuilder {
        FunctionBuilder::new(FunctionId(0), "f", Span::dummy())
    }

    #[test]
    fn test_valid_function() {
        let mut b = trivial();
        b.ret(None, Span::dummy());
        assert_eq!(b.finish().validate(), Ok(()));
    }

    #[test]
    fn test_missing_terminator() {
        let func = trivial().finish();
        assert!(matches!(
            func.validate(),
            Err(IrError::MissingTerminator { block: BlockId(0), .. })
        ));
    }

    #[test]
    fn test_unknown_goto_target() {
        let mut b = trivial();
        b.goto(BlockId(7), Span::dummy());
        assert!(matches!(
            b.finish().validate(),
            Err(IrError::UnknownBlock { block: BlockId(7), .. })
        ));
    }

    #[test]
    fn test_unknown_binding() {
        let mut b = trivial();
        b.eval(Rvalue::Use(Operand::binding(BindingId(4), Span::dummy())), Span::dummy());
        b.ret(None, Span::dummy());
        assert!(matches!(
            b.finish().validate(),
            Err(IrError::UnknownBinding { .. })
        ));
    }

    #[test]
    fn test_circular_region() {
        let mut b = trivial();
        let (r1, _) = b.open_region(RegionKind::Region, Span::dummy());
        let (r2, _) = b.open_region(RegionKind::Region, Span::dummy());
        for block in 0..3 {
            b.switch_to(BlockId(block));
            b.ret(None, Span::dummy());
        }
        let mut func = b.finish();
        func.regions[r1.0 as usize].parent = Some(r2);
        assert!(matches!(
            func.validate(),
            Err(IrError::CircularRegion { .. })
        ));
    }

    #[test]
    fn test_orphaned_region() {
        let mut b = trivial();
        let (r1, _) = b.open_region(RegionKind::Arena, Span::dummy());
        b.switch_to(BlockId(0));
        b.ret(None, Span::dummy());
        b.switch_to(BlockId(1));
        b.ret(None, Span::dummy());
        let mut func = b.finish();
        func.regions[r1.0 as usize].parent = Some(RegionId(9));
        assert!(matches!(
            func.validate(),
            Err(IrError::OrphanedRegion { .. })
        ));
    }

    #[test]
    fn test_duplicate_allocation() {
        let mut b = trivial();
        let site = b.alloc_site(Span::dummy());
        let x = b.let_binding("x", Ty::named("Buffer"), Span::dummy());
        let y = b.let_binding("y", Ty::named("Buffer"), Span::dummy());
        b.assign(x, Rvalue::Alloc { alloc: site, args: vec![] }, Span::dummy());
        b.assign(y, Rvalue::Alloc { alloc: site, args: vec![] }, Span::dummy());
        b.ret(None, Span::dummy());
        assert!(matches!(
            b.finish().validate(),
            Err(IrError::DuplicateAllocation { .. })
        ));
    }

    #[test]
    fn test_unknown_callee() {
        let mut program = Program::new("unit.vs");
        let id = program.declare_function("main");
        let mut b = FunctionBuilder::new(id, "main", Span::dummy());
        b.eval(
            Rvalue::Call {
                callee: Callee::Function(FunctionId(42)),
                args: vec![],
            },
            Span::dummy(),
        );
        b.ret(None, Span::dummy());
        let func = b.finish();
        program.define(func.clone());
        assert!(matches!(
            program.validate_function(&func),
            Err(IrError::UnknownFunction { .. })
        ));
    }
}
