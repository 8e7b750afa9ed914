//! # Verso Ownership
//!
//! Ownership and region inference for the Verso compiler middle end.
//!
//! Programmers write ordinary code without lifetime annotations. This
//! crate infers, for every use of every binding, whether the use is an
//! immutable borrow, a mutable borrow or a move; rejects programs that
//! use moved values or overlap exclusive accesses; and decides where each
//! heap allocation is freed.
//!
//! ## Pipeline
//!
//! ```text
//! Function ─► usage ─► solver ─► validator ─► region ─► report
//!                         ▲
//!                 signature table (callees first, cycles by fixed point)
//! ```
//!
//! - [`usage`] collects uses, loans and value flows from the CFG
//! - [`solver`] resolves each use to an [`OwnershipMode`] on the lattice
//! - [`validator`] checks linearity and exclusivity
//! - [`region`] places allocations into regions or individual frees
//! - [`report`] turns errors and hints into diagnostics
//!
//! [`OwnershipEngine`] drives all of it over a [`verso_ir::Program`].
//!
//! ## Example
//!
//! ```
//! use verso_ir::{Callee, FunctionBuilder, Operand, Program, Rvalue, Span, Ty};
//! use verso_ownership::{EngineConfig, OwnershipEngine, OwnershipMode};
//!
//! let mut program = Program::new("main.vs");
//! let id = program.declare_function("show");
//! let mut b = FunctionBuilder::new(id, "show", Span::new(0, 30));
//! let x = b.param("x", Ty::named("Data"), Span::new(8, 9));
//! b.eval(
//!     Rvalue::Call {
//!         callee: Callee::Extern("print".into()),
//!         args: vec![Operand::binding(x, Span::new(20, 21))],
//!     },
//!     Span::new(14, 22),
//! );
//! b.ret(None, Span::new(28, 29));
//! program.define(b.finish());
//! program.declare_extern("print", vec![verso_ir::OverrideMode::Borrow]);
//!
//! let result = OwnershipEngine::new(EngineConfig::sequential())
//!     .analyze(&program)
//!     .unwrap();
//! assert!(!result.has_errors());
//! assert_eq!(
//!     result.signature(id).unwrap().params,
//!     vec![OwnershipMode::ImmutableBorrow]
//! );
//! ```

pub mod annotations;
pub mod callgraph;
pub mod config;
pub mod engine;
pub mod error;
pub mod hints;
pub mod liveness;
pub mod mode;
pub mod region;
pub mod report;
pub mod signature;
pub mod solver;
pub mod usage;
pub mod validator;

pub use annotations::{render_annotated, Annotations, InsertPoint, Instruction};
pub use callgraph::{AnalysisUnit, CallGraph};
pub use config::{EngineConfig, SuspensionPolicy};
pub use engine::{AnalysisResult, FunctionAnalysis, OwnershipEngine};
pub use error::{
    EngineError, EngineResult, EscapeRoute, EscapeSubject, OwnershipError, SignatureTableError,
};
pub use hints::OptimizationHint;
pub use liveness::Liveness;
pub use mode::OwnershipMode;
pub use region::{
    plan_regions, ExitKind, FreePoint, Placement, RegionDealloc, RegionExit, RegionPlan,
};
pub use report::{hint_to_diagnostic, to_diagnostic};
pub use signature::{Signature, SignatureTable};
pub use solver::{solve, Solution, SolveContext, UseResolution};
pub use usage::{analyze_usage, Location, Use, UseId, UseKind, UsageInfo};
pub use validator::validate;
