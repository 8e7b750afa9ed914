//! The ownership engine: scheduling and per-function pipelines.
//!
//! Functions are analyzed in call-graph order. Each analysis unit (a
//! function or a recursive cycle) runs the full pipeline:
//!
//! ```text
//! Usage Analyzer -> Lattice Solver -> finalize signature
//!                -> Move/Borrow Validator -> Region Allocator -> hints
//! ```
//!
//! Units of one dependency level are independent and may run on a rayon
//! pool. The signature table is the only shared state: each unit writes
//! its signatures exactly once, as soon as they are solved, and callers
//! block on the table until their callees' entries are final.

use indexmap::IndexMap;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, trace, warn};
use verso_diagnostics::Diagnostic;
use verso_ir::{AllocId, Function, FunctionId, Program};

use crate::annotations::{render_annotated, Annotations};
use crate::callgraph::{AnalysisUnit, CallGraph};
use crate::config::EngineConfig;
use crate::error::{EngineResult, OwnershipError};
use crate::hints::{collect_hints, OptimizationHint};
use crate::liveness::Liveness;
use crate::mode::OwnershipMode;
use crate::region::{plan_regions, FreePoint, Placement, RegionDealloc, RegionPlan};
use crate::report::{hint_to_diagnostic, to_diagnostic};
use crate::signature::{Signature, SignatureTable};
use crate::solver::{solve, Provisional, Solution, SolveContext};
use crate::usage::{analyze_usage, UsageInfo};
use crate::validator::validate;

// ============================================================================
// Results
// ============================================================================

/// Everything the engine computed for one function.
#[derive(Debug, Clone)]
pub struct FunctionAnalysis {
    pub function: FunctionId,
    pub name: SmolStr,
    pub usage: UsageInfo,
    pub solution: Solution,
    pub plan: RegionPlan,
    /// Ownership errors ordered by source position
    pub errors: Vec<OwnershipError>,
    pub hints: Vec<OptimizationHint>,
}

impl FunctionAnalysis {
    pub fn signature(&self) -> &Signature {
        &self.solution.signature
    }

    /// Binding-wide mode of the first binding called `name`.
    pub fn binding_mode(&self, func: &Function, name: &str) -> Option<OwnershipMode> {
        func.binding_ids()
            .find(|b| func.binding(*b).name == name)
            .map(|b| self.solution.binding_mode(b))
    }

    pub fn placement(&self, alloc: AllocId) -> Option<&Placement> {
        self.plan.placement(alloc)
    }

    pub fn deallocs(&self) -> &[RegionDealloc] {
        &self.plan.deallocs
    }

    pub fn individual_frees(&self) -> Vec<(AllocId, FreePoint)> {
        self.plan.individual_frees().collect()
    }

    pub fn annotations(&self) -> Annotations {
        Annotations::from_plan(&self.plan)
    }

    /// Textual dump of the annotated CFG.
    pub fn render(&self, func: &Function) -> String {
        render_annotated(func, &self.usage, &self.solution, &self.plan)
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Output of one engine run over a compilation unit.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub file: PathBuf,
    /// Analyzed functions in program order
    pub functions: IndexMap<FunctionId, FunctionAnalysis>,
    /// Every signature finalized during the run
    pub signatures: FxHashMap<FunctionId, Signature>,
    /// Functions never analyzed because the run was cancelled
    pub skipped: Vec<FunctionId>,
}

impl AnalysisResult {
    pub fn function(&self, name: &str) -> Option<&FunctionAnalysis> {
        self.functions.values().find(|f| f.name == name)
    }

    pub fn signature(&self, function: FunctionId) -> Option<&Signature> {
        self.signatures.get(&function)
    }

    pub fn has_errors(&self) -> bool {
        self.functions.values().any(FunctionAnalysis::has_errors)
    }

    pub fn error_count(&self) -> usize {
        self.functions.values().map(|f| f.errors.len()).sum()
    }

    /// All errors then hints of each function, in program order.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        for analysis in self.functions.values() {
            diagnostics.extend(analysis.errors.iter().map(|e| to_diagnostic(e, &self.file)));
            diagnostics.extend(analysis.hints.iter().map(|h| hint_to_diagnostic(h, &self.file)));
        }
        diagnostics
    }
}

// ============================================================================
// Engine
// ============================================================================

enum UnitOutcome {
    Done(Vec<FunctionAnalysis>),
    Skipped(Vec<FunctionId>),
}

/// Whole-program ownership and region inference.
pub struct OwnershipEngine {
    config: EngineConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl OwnershipEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cancel: None,
        }
    }

    /// Stop scheduling new units once `token` is set. Units already
    /// running finish and publish their signatures.
    pub fn with_cancellation(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::SeqCst))
    }

    /// Analyze every function of `program`.
    #[instrument(skip_all, fields(file = %program.file.display()))]
    pub fn analyze(&self, program: &Program) -> EngineResult<AnalysisResult> {
        let table = SignatureTable::new(
            program
                .functions
                .iter()
                .map(|(id, func)| (*id, func.name.clone())),
        );

        // Malformed bodies are reported and get a conservative signature
        let mut done: FxHashMap<FunctionId, FunctionAnalysis> = FxHashMap::default();
        for (id, func) in &program.functions {
            if let Err(error) = program.validate_function(func) {
                warn!(function = %func.name, %error, "skipping malformed function");
                let signature = Signature::all_moved(func.params.len());
                table.finalize(*id, signature.clone())?;
                done.insert(
                    *id,
                    FunctionAnalysis {
                        function: *id,
                        name: func.name.clone(),
                        usage: UsageInfo::default(),
                        solution: Solution::unsolved(signature),
                        plan: RegionPlan::default(),
                        errors: vec![OwnershipError::MalformedFunction {
                            function: func.name.clone(),
                            error,
                            span: func.span,
                        }],
                        hints: Vec::new(),
                    },
                );
            }
        }

        let levels = CallGraph::build(program).levels();
        debug!(
            functions = program.functions.len(),
            levels = levels.len(),
            "scheduling analysis units"
        );

        let pool = if self.config.parallel {
            let mut builder = rayon::ThreadPoolBuilder::new();
            if self.config.worker_threads > 0 {
                builder = builder.num_threads(self.config.worker_threads);
            }
            Some(builder.build()?)
        } else {
            None
        };

        let mut skipped = Vec::new();
        for level in &levels {
            let outcomes: Vec<EngineResult<UnitOutcome>> = match &pool {
                Some(pool) => pool.install(|| {
                    level
                        .par_iter()
                        .map(|unit| self.run_unit(program, unit, &table, &done))
                        .collect()
                }),
                None => level
                    .iter()
                    .map(|unit| self.run_unit(program, unit, &table, &done))
                    .collect(),
            };
            for outcome in outcomes {
                match outcome? {
                    UnitOutcome::Done(analyses) => {
                        for analysis in analyses {
                            done.insert(analysis.function, analysis);
                        }
                    }
                    UnitOutcome::Skipped(functions) => skipped.extend(functions),
                }
            }
        }

        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "analysis cancelled");
        }
        skipped.sort_by_key(|f| program.functions.get_index_of(f));

        let mut functions = IndexMap::new();
        for id in program.functions.keys() {
            if let Some(analysis) = done.remove(id) {
                functions.insert(*id, analysis);
            }
        }

        Ok(AnalysisResult {
            file: program.file.clone(),
            functions,
            signatures: table.snapshot(),
            skipped,
        })
    }

    #[instrument(level = "debug", skip_all, fields(functions = ?unit.functions))]
    fn run_unit(
        &self,
        program: &Program,
        unit: &AnalysisUnit,
        table: &SignatureTable,
        done: &FxHashMap<FunctionId, FunctionAnalysis>,
    ) -> EngineResult<UnitOutcome> {
        let members: Vec<&Function> = unit
            .functions
            .iter()
            .filter(|f| !done.contains_key(f))
            .filter_map(|f| program.function(*f))
            .collect();

        if self.cancelled() {
            for func in &members {
                table.abandon(func.id);
            }
            return Ok(UnitOutcome::Skipped(members.iter().map(|f| f.id).collect()));
        }

        if unit.recursive {
            self.run_cycle(program, &members, table)
        } else {
            let mut analyses = Vec::with_capacity(members.len());
            for func in members {
                let usage = analyze_usage(func);
                let ctx = SolveContext {
                    program,
                    config: &self.config,
                    signatures: table,
                };
                let solution = solve(func, &usage, &ctx);
                table.finalize(func.id, solution.signature.clone())?;
                analyses.push(self.finish(func, usage, solution, Vec::new()));
            }
            Ok(UnitOutcome::Done(analyses))
        }
    }

    /// Solve a recursive cycle by iterating its signatures to a fixed point.
    fn run_cycle(
        &self,
        program: &Program,
        members: &[&Function],
        table: &SignatureTable,
    ) -> EngineResult<UnitOutcome> {
        let usages: Vec<UsageInfo> = members.iter().map(|f| analyze_usage(f)).collect();
        let mut current: FxHashMap<FunctionId, Signature> = members
            .iter()
            .map(|f| (f.id, initial_signature(f)))
            .collect();

        let bound = self.config.max_signature_iterations.max(1);
        let mut iterations = 0;
        let mut converged = false;
        let mut solutions: Vec<Solution>;
        loop {
            iterations += 1;
            let provisional = Provisional {
                current: &current,
                table,
            };
            let ctx = SolveContext {
                program,
                config: &self.config,
                signatures: &provisional,
            };
            solutions = members
                .iter()
                .zip(&usages)
                .map(|(func, usage)| solve(func, usage, &ctx))
                .collect();

            let next: FxHashMap<FunctionId, Signature> = members
                .iter()
                .zip(&solutions)
                .map(|(func, solution)| {
                    let params = current[&func.id]
                        .params
                        .iter()
                        .zip(&solution.signature.params)
                        .map(|(old, new)| old.lub(*new))
                        .collect();
                    (func.id, Signature::new(params))
                })
                .collect();
            trace!(iteration = iterations, "recursive signatures: {:?}", next);

            if next == current {
                converged = true;
                break;
            }
            current = next;
            if iterations >= bound {
                break;
            }
        }

        let cycle: Vec<SmolStr> = members.iter().map(|f| f.name.clone()).collect();
        if !converged {
            warn!(?cycle, iterations, "recursive signatures did not converge");
        }

        let mut analyses = Vec::with_capacity(members.len());
        for ((func, usage), mut solution) in members.iter().zip(usages).zip(solutions) {
            let mut signature = current[&func.id].clone();
            signature.resolved = converged;
            table.finalize(func.id, signature.clone())?;
            solution.signature = signature;

            let mut extra = Vec::new();
            if !converged {
                extra.push(OwnershipError::UnresolvableRecursiveSignature {
                    function: func.name.clone(),
                    cycle: cycle.clone(),
                    iterations,
                    span: func.span,
                });
            }
            analyses.push(self.finish(func, usage, solution, extra));
        }
        Ok(UnitOutcome::Done(analyses))
    }

    /// Validation, region planning and hints for a solved function.
    fn finish(
        &self,
        func: &Function,
        usage: UsageInfo,
        mut solution: Solution,
        mut errors: Vec<OwnershipError>,
    ) -> FunctionAnalysis {
        let liveness = Liveness::compute(func, &usage);
        errors.append(&mut solution.errors);
        errors.extend(validate(func, &usage, &solution, &liveness));
        let plan = plan_regions(func, &usage, &solution, &liveness, &self.config);
        errors.extend(plan.errors.iter().cloned());
        errors.sort_by_key(|e| e.primary_span().start);
        let hints = collect_hints(func, &usage, &solution, &plan, &self.config);

        debug!(
            function = %func.name,
            signature = %solution.signature,
            errors = errors.len(),
            "function analyzed"
        );
        FunctionAnalysis {
            function: func.id,
            name: func.name.clone(),
            usage,
            solution,
            plan,
            errors,
            hints,
        }
    }
}

/// Starting point of the recursive fixed point.
fn initial_signature(func: &Function) -> Signature {
    Signature::new(
        func.params
            .iter()
            .map(|p| {
                OwnershipMode::from_override(func.binding(*p).override_mode)
                    .unwrap_or(OwnershipMode::ImmutableBorrow)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use verso_ir::{Callee, FunctionBuilder, Operand, Rvalue, Span, Ty};

    fn reader(program: &mut Program, id: FunctionId) {
        let mut b = FunctionBuilder::new(id, "read", Span::dummy());
        let x = b.param("x", Ty::named("Data"), Span::dummy());
        b.eval(Rvalue::Use(Operand::binding(x, Span::dummy())), Span::dummy());
        b.ret(None, Span::dummy());
        program.define(b.finish());
    }

    #[test]
    fn test_signatures_finalized_for_every_function() {
        let mut program = Program::new("main.vs");
        let read = program.declare_function("read");
        let main = program.declare_function("main");
        reader(&mut program, read);

        let mut b = FunctionBuilder::new(main, "main", Span::dummy());
        let d = b.param("d", Ty::named("Data"), Span::dummy());
        b.eval(
            Rvalue::Call {
                callee: Callee::Function(read),
                args: vec![Operand::binding(d, Span::dummy())],
            },
            Span::dummy(),
        );
        b.ret(None, Span::dummy());
        program.define(b.finish());

        for config in [EngineConfig::sequential(), EngineConfig::default().with_worker_threads(2)] {
            let result = OwnershipEngine::new(config).analyze(&program).unwrap();
            assert!(!result.has_errors());
            assert_eq!(
                result.signature(main).map(|s| s.params.clone()),
                Some(vec![OwnershipMode::ImmutableBorrow])
            );
            let names: Vec<&str> = result.functions.values().map(|f| f.name.as_str()).collect();
            assert_eq!(names, vec!["read", "main"]);
        }
    }

    #[test]
    fn test_cancelled_run_skips_everything() {
        let mut program = Program::new("main.vs");
        let read = program.declare_function("read");
        reader(&mut program, read);

        let token = Arc::new(AtomicBool::new(true));
        let result = OwnershipEngine::new(EngineConfig::sequential())
            .with_cancellation(token)
            .analyze(&program)
            .unwrap();
        assert!(result.functions.is_empty());
        assert_eq!(result.skipped, vec![read]);
        assert!(result.signatures.is_empty());
    }

    #[test]
    fn test_malformed_function_reported() {
        let mut program = Program::new("main.vs");
        let broken = program.declare_function("broken");
        let b = FunctionBuilder::new(broken, "broken", Span::new(0, 9));
        // Entry block never terminated
        program.define(b.finish());

        let result = OwnershipEngine::new(EngineConfig::sequential())
            .analyze(&program)
            .unwrap();
        let analysis = result.function("broken").unwrap();
        assert!(matches!(
            &analysis.errors[..],
            [OwnershipError::MalformedFunction { .. }]
        ));
        assert!(!result.signature(broken).unwrap().resolved);
        assert_eq!(result.diagnostics()[0].code.as_deref(), Some("E9001"));
    }
}
