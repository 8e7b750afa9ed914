//! Optimization hints.
//!
//! Hints never affect soundness. They point at keywords and regions the
//! programmer can simplify, and are reported as warnings when
//! [`EngineConfig::suggest_optimizations`] is set.

use smol_str::SmolStr;
use verso_ir::{Function, OverrideMode, RegionKind, Span};

use crate::config::EngineConfig;
use crate::mode::{lub_all, OwnershipMode};
use crate::region::RegionPlan;
use crate::solver::Solution;
use crate::usage::UsageInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationHint {
    /// A parameter declared `move` whose uses only need a borrow
    UnneededMoveOverride {
        binding: SmolStr,
        needed: OwnershipMode,
        span: Span,
    },
    /// An explicit region or arena that holds no allocations
    EmptyRegion { kind: RegionKind, span: Span },
    /// Region nesting beyond the configured limit
    RegionTooDeep {
        depth: usize,
        limit: usize,
        span: Span,
    },
}

impl OptimizationHint {
    pub fn code(&self) -> &'static str {
        match self {
            OptimizationHint::UnneededMoveOverride { .. } => "W2101",
            OptimizationHint::EmptyRegion { .. } => "W2102",
            OptimizationHint::RegionTooDeep { .. } => "W2103",
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            OptimizationHint::UnneededMoveOverride { .. } => "prefer-borrow",
            OptimizationHint::EmptyRegion { .. } => "empty-region",
            OptimizationHint::RegionTooDeep { .. } => "region-too-deep",
        }
    }

    pub fn message(&self) -> String {
        match self {
            OptimizationHint::UnneededMoveOverride {
                binding, needed, ..
            } => format!("`{}` is declared `move` but only needs {}", binding, needed),
            OptimizationHint::EmptyRegion { kind, .. } => {
                format!("this {} holds no allocations", kind.keyword())
            }
            OptimizationHint::RegionTooDeep { depth, limit, .. } => {
                format!("region nested {} deep exceeds the limit of {}", depth, limit)
            }
        }
    }

    pub fn span(&self) -> Span {
        match self {
            OptimizationHint::UnneededMoveOverride { span, .. }
            | OptimizationHint::EmptyRegion { span, .. }
            | OptimizationHint::RegionTooDeep { span, .. } => *span,
        }
    }
}

/// Collect hints for one analyzed function.
pub fn collect_hints(
    func: &Function,
    usage: &UsageInfo,
    solution: &Solution,
    plan: &RegionPlan,
    config: &EngineConfig,
) -> Vec<OptimizationHint> {
    if !config.suggest_optimizations {
        return Vec::new();
    }
    let mut hints = Vec::new();

    for &param in &func.params {
        let decl = func.binding(param);
        if decl.override_mode != OverrideMode::Move {
            continue;
        }
        let needed = lub_all(
            usage
                .uses_of(param)
                .filter(|u| solution.is_reachable(u.location))
                .map(|u| solution.resolution(u.id).required),
        );
        if needed < OwnershipMode::Moved {
            hints.push(OptimizationHint::UnneededMoveOverride {
                binding: decl.name.clone(),
                needed,
                span: decl.span,
            });
        }
    }

    for region in &func.regions {
        if region.kind.is_explicit() && plan.members(region.id).is_empty() {
            hints.push(OptimizationHint::EmptyRegion {
                kind: region.kind,
                span: region.span,
            });
        }
        // Only the first region past the limit on each chain
        let depth = func.region_depth(region.id);
        if depth == config.max_region_depth + 1 {
            hints.push(OptimizationHint::RegionTooDeep {
                depth,
                limit: config.max_region_depth,
                span: region.span,
            });
        }
    }

    hints
}
