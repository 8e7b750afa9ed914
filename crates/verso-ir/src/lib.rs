//! Typed control-flow-graph IR for the Verso compiler middle end.
//!
//! The front end (parser and type checker) lowers every function into a
//! graph of basic blocks over named bindings. This crate is the contract
//! between that lowering and the ownership engine:
//!
//! - **Resolved calls**: every call site names a local function, an extern
//!   with declared conventions, or a constructor
//! - **Override keywords**: `move`, `borrow`, `mut` and `inout` survive as
//!   [`OverrideMode`] metadata on declarations and individual uses
//! - **Lexical regions**: `region { }` and `arena { }` blocks form a region
//!   tree rooted at the implicit function-body region
//!
//! # Example
//!
//! ```
//! use verso_ir::{FunctionBuilder, FunctionId, Operand, Rvalue, Callee, Span, Ty};
//!
//! let mut b = FunctionBuilder::new(FunctionId(0), "f", Span::new(0, 40));
//! let x = b.param("x", Ty::named("Data"), Span::new(5, 12));
//! b.eval(
//!     Rvalue::Call {
//!         callee: Callee::Extern("print".into()),
//!         args: vec![Operand::field(x, "name", Span::new(24, 30))],
//!     },
//!     Span::new(18, 31),
//! );
//! b.ret(None, Span::new(33, 34));
//! let func = b.finish();
//! assert!(func.validate().is_ok());
//! ```

pub mod builder;
pub mod ir;
pub mod pretty;
mod validate;

pub use builder::FunctionBuilder;
pub use ir::{
    // Identifiers and locations
    AllocId,
    BindingId,
    BlockId,
    FunctionId,
    RegionId,
    Span,

    // Declarations
    AllocDecl,
    BindingDecl,
    BindingKind,
    ExternDecl,
    Function,
    OverrideMode,
    Program,
    RegionDecl,
    RegionKind,
    Ty,

    // Body
    BasicBlock,
    BinOp,
    BindingRef,
    Callee,
    Constant,
    Operand,
    Rvalue,
    Statement,
    StatementKind,
    SuspendKind,
    Terminator,
    TerminatorKind,
};
pub use pretty::{pretty_print, pretty_print_function};
pub use validate::IrError;
