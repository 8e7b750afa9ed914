//! Annotated CFG handed to the code generator.
//!
//! The code generator needs three things from the engine: the resolved
//! mode of every use, the deallocation instructions to insert, and where
//! to insert them. [`Annotations`] collects the instructions;
//! [`render_annotated`] dumps everything as text for debugging.

use std::fmt::{self, Write};
use verso_ir::pretty::{format_statement, format_terminator};
use verso_ir::{AllocId, BlockId, Function, RegionId};

use crate::region::{FreePoint, RegionPlan};
use crate::solver::Solution;
use crate::usage::{Location, UsageInfo};

/// Where an instruction is inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InsertPoint {
    /// After a statement, or after a terminator's operands are evaluated
    After(Location),
    /// Before the return terminating this block
    BeforeReturn(BlockId),
    /// On a split control-flow edge
    Edge { from: BlockId, to: BlockId },
}

/// A deallocation instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Free(AllocId),
    RegionDealloc {
        region: RegionId,
        allocs: Vec<AllocId>,
    },
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Free(alloc) => write!(f, "free {}", alloc),
            Instruction::RegionDealloc { region, allocs } => {
                let members: Vec<String> = allocs.iter().map(|a| a.to_string()).collect();
                write!(f, "region_dealloc {} [{}]", region, members.join(", "))
            }
        }
    }
}

/// Deallocation instructions for one function, ordered by insert point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    pub insertions: Vec<(InsertPoint, Instruction)>,
}

impl Annotations {
    pub fn from_plan(plan: &RegionPlan) -> Self {
        let mut insertions: Vec<(InsertPoint, Instruction)> = plan
            .individual_frees()
            .map(|(alloc, point)| {
                let at = match point {
                    FreePoint::After(location) => InsertPoint::After(location),
                    FreePoint::Edge { from, to } => InsertPoint::Edge { from, to },
                };
                (at, Instruction::Free(alloc))
            })
            .collect();

        for dealloc in &plan.deallocs {
            let at = match dealloc.exit.to {
                Some(to) => InsertPoint::Edge {
                    from: dealloc.exit.from,
                    to,
                },
                None => InsertPoint::BeforeReturn(dealloc.exit.from),
            };
            insertions.push((
                at,
                Instruction::RegionDealloc {
                    region: dealloc.region,
                    allocs: dealloc.allocs.clone(),
                },
            ));
        }
        // Stable: inner regions keep their place ahead of outer ones
        insertions.sort_by_key(|(at, _)| *at);
        Self { insertions }
    }

    pub fn at(&self, point: InsertPoint) -> impl Iterator<Item = &Instruction> + '_ {
        self.insertions
            .iter()
            .filter(move |(at, _)| *at == point)
            .map(|(_, instr)| instr)
    }

    /// Edges that need splitting to host instructions.
    pub fn edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges: Vec<(BlockId, BlockId)> = self
            .insertions
            .iter()
            .filter_map(|(at, _)| match at {
                InsertPoint::Edge { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        edges.dedup();
        edges
    }
}

/// Render the CFG with per-use modes and inserted instructions.
pub fn render_annotated(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    plan: &RegionPlan,
) -> String {
    let annotations = Annotations::from_plan(plan);
    let mut out = String::new();
    let _ = writeln!(out, "fn {}{} {{", func.name, solution.signature);
    for binding in func.binding_ids() {
        let decl = func.binding(binding);
        let _ = writeln!(
            out,
            "    {} {}: {}",
            binding,
            decl.name,
            solution.binding_mode(binding)
        );
    }

    for block in &func.blocks {
        let _ = writeln!(out);
        let marker = if solution.reachable.contains(&block.id) {
            ""
        } else {
            " unreachable"
        };
        let _ = writeln!(out, "    {} ({}){}:", block.id, block.region, marker);
        for (index, stmt) in block.statements.iter().enumerate() {
            let location = Location::new(block.id, index);
            let _ = writeln!(out, "        {}", format_statement(&stmt.kind));
            write_uses(&mut out, func, usage, solution, location);
            for instr in annotations.at(InsertPoint::After(location)) {
                let _ = writeln!(out, "        {}", instr);
            }
        }

        let location = Location::new(block.id, block.statements.len());
        for instr in annotations.at(InsertPoint::BeforeReturn(block.id)) {
            let _ = writeln!(out, "        {}", instr);
        }
        match &block.terminator {
            Some(term) => {
                let _ = writeln!(out, "        {}", format_terminator(&term.kind));
            }
            None => {
                let _ = writeln!(out, "        <unterminated>");
            }
        }
        write_uses(&mut out, func, usage, solution, location);
        for instr in annotations.at(InsertPoint::After(location)) {
            let _ = writeln!(out, "        {}", instr);
        }
        for to in block.successors() {
            for instr in annotations.at(InsertPoint::Edge { from: block.id, to }) {
                let _ = writeln!(out, "        on {} -> {}: {}", block.id, to, instr);
            }
        }
    }
    let _ = writeln!(out, "}}");
    out
}

fn write_uses(
    out: &mut String,
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    location: Location,
) {
    for id in usage.uses_at(location) {
        let u = usage.get(*id);
        let resolution = solution.resolution(u.id);
        let _ = writeln!(
            out,
            "            // {} {} ({}): {}, running {}",
            u.id,
            func.binding(u.binding).name,
            u.kind,
            resolution.resolved,
            resolution.running
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{ExitKind, Placement, RegionDealloc, RegionExit};

    #[test]
    fn test_region_dealloc_insert_points() {
        let mut plan = RegionPlan::default();
        plan.placements.insert(AllocId(0), Placement::Region(RegionId(1)));
        plan.deallocs = vec![
            RegionDealloc {
                region: RegionId(1),
                exit: RegionExit {
                    kind: ExitKind::EarlyReturn,
                    from: BlockId(2),
                    to: None,
                },
                allocs: vec![AllocId(0)],
            },
            RegionDealloc {
                region: RegionId(1),
                exit: RegionExit {
                    kind: ExitKind::FallThrough,
                    from: BlockId(3),
                    to: Some(BlockId(4)),
                },
                allocs: vec![AllocId(0)],
            },
        ];
        let annotations = Annotations::from_plan(&plan);
        assert_eq!(annotations.insertions.len(), 2);
        assert_eq!(
            annotations.at(InsertPoint::BeforeReturn(BlockId(2))).count(),
            1
        );
        assert_eq!(annotations.edges(), vec![(BlockId(3), BlockId(4))]);
        assert_eq!(
            annotations.insertions[1].1.to_string(),
            "region_dealloc r1 [alloc0]"
        );
    }

    #[test]
    fn test_individual_free_insertions() {
        let mut plan = RegionPlan::default();
        plan.placements.insert(
            AllocId(0),
            Placement::Individual {
                free_points: vec![
                    FreePoint::After(Location::new(BlockId(1), 0)),
                    FreePoint::Edge {
                        from: BlockId(0),
                        to: BlockId(2),
                    },
                ],
            },
        );
        let annotations = Annotations::from_plan(&plan);
        let points: Vec<InsertPoint> = annotations.insertions.iter().map(|(p, _)| *p).collect();
        assert_eq!(
            points,
            vec![
                InsertPoint::After(Location::new(BlockId(1), 0)),
                InsertPoint::Edge {
                    from: BlockId(0),
                    to: BlockId(2)
                },
            ]
        );
        assert_eq!(annotations.insertions[0].1, Instruction::Free(AllocId(0)));
    }
}
