//! Error types for ownership analysis.
//!
//! [`OwnershipError`] values are collected per function and never abort
//! the run: each one is attached to the offending function and analysis
//! continues. [`EngineError`] and [`SignatureTableError`] are the only
//! failures returned through `Result`.

use smol_str::SmolStr;
use std::fmt;
use thiserror::Error;
use verso_ir::{AllocId, IrError, OverrideMode, Span};

use crate::mode::OwnershipMode;
use crate::usage::UseId;

/// How a value leaves the scope that bounds its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapeRoute {
    /// Returned to the caller
    Return,
    /// Captured across an await/yield or sent across a channel
    Suspension,
    /// Stored into a structure owned by the caller
    CallerStore,
}

impl fmt::Display for EscapeRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EscapeRoute::Return => "returned",
            EscapeRoute::Suspension => "captured across a suspension point",
            EscapeRoute::CallerStore => "stored into a caller-owned structure",
        };
        f.write_str(text)
    }
}

/// What a region escape is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscapeSubject {
    /// A reference into an allocation
    Allocation(AllocId),
    /// A reference to a local binding
    Local(SmolStr),
}

/// Ownership violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OwnershipError {
    /// A use reachable from a move of the same binding.
    #[error("use of moved value `{binding}`")]
    UseAfterMove {
        binding: SmolStr,
        use_id: UseId,
        use_span: Span,
        move_id: UseId,
        move_span: Span,
        /// What the consuming operation needed before any `move` keyword.
        move_required: OwnershipMode,
    },

    /// Overlapping uses where one excludes the other.
    #[error("cannot use `{binding}` as {requested} because it is also used as {existing}")]
    ConflictingBorrow {
        binding: SmolStr,
        use_id: UseId,
        span: Span,
        requested: OwnershipMode,
        existing_span: Span,
        existing: OwnershipMode,
    },

    /// A reference outlives every region that could hold its target.
    #[error("reference to {} escapes: {route}", subject_text(.subject))]
    RegionEscape {
        subject: EscapeSubject,
        route: EscapeRoute,
        escape_span: Span,
        origin_span: Span,
    },

    /// Recursive signatures did not stabilize within the iteration bound.
    #[error("ownership signature of `{function}` did not converge after {iterations} iterations")]
    UnresolvableRecursiveSignature {
        function: SmolStr,
        cycle: Vec<SmolStr>,
        iterations: usize,
        span: Span,
    },

    /// An explicit keyword is weaker than what a use provably needs.
    #[error("`{keyword}` on `{binding}` conflicts with a use that requires {required}")]
    OverrideConflict {
        binding: SmolStr,
        keyword: OverrideMode,
        /// Whether the keyword sits on the declaration rather than the use
        on_declaration: bool,
        required: OwnershipMode,
        use_span: Span,
        override_span: Span,
    },

    /// The function body failed structural validation and was skipped.
    #[error("malformed function `{function}`: {error}")]
    MalformedFunction {
        function: SmolStr,
        error: IrError,
        span: Span,
    },
}

fn subject_text(subject: &EscapeSubject) -> String {
    match subject {
        EscapeSubject::Allocation(alloc) => format!("allocation {}", alloc),
        EscapeSubject::Local(name) => format!("local `{}`", name),
    }
}

impl OwnershipError {
    /// Location the diagnostic points at.
    pub fn primary_span(&self) -> Span {
        match self {
            OwnershipError::UseAfterMove { use_span, .. } => *use_span,
            OwnershipError::ConflictingBorrow { span, .. } => *span,
            OwnershipError::RegionEscape { escape_span, .. } => *escape_span,
            OwnershipError::UnresolvableRecursiveSignature { span, .. } => *span,
            OwnershipError::OverrideConflict { use_span, .. } => *use_span,
            OwnershipError::MalformedFunction { span, .. } => *span,
        }
    }

    /// Short machine-readable category name.
    pub fn category(&self) -> &'static str {
        match self {
            OwnershipError::UseAfterMove { .. } => "use-after-move",
            OwnershipError::ConflictingBorrow { .. } => "conflicting-borrow",
            OwnershipError::RegionEscape { .. } => "region-escape",
            OwnershipError::UnresolvableRecursiveSignature { .. } => {
                "unresolvable-recursive-signature"
            }
            OwnershipError::OverrideConflict { .. } => "override-conflict",
            OwnershipError::MalformedFunction { .. } => "malformed-function",
        }
    }
}

/// Violations of the write-once signature table discipline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureTableError {
    #[error("signature of `{function}` finalized twice")]
    AlreadyFinalized { function: SmolStr },

    #[error("no signature slot for `{function}`")]
    UnknownFunction { function: SmolStr },
}

/// Engine-level failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to build analysis thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    SignatureTable(#[from] SignatureTableError),
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OwnershipError::UseAfterMove {
            binding: "a".into(),
            use_id: UseId(2),
            use_span: Span::new(40, 41),
            move_id: UseId(1),
            move_span: Span::new(25, 31),
            move_required: OwnershipMode::Moved,
        };
        assert_eq!(err.to_string(), "use of moved value `a`");
        assert_eq!(err.primary_span(), Span::new(40, 41));
        assert_eq!(err.category(), "use-after-move");

        let escape = OwnershipError::RegionEscape {
            subject: EscapeSubject::Local("buf".into()),
            route: EscapeRoute::Return,
            escape_span: Span::new(1, 2),
            origin_span: Span::new(0, 1),
        };
        assert_eq!(escape.to_string(), "reference to local `buf` escapes: returned");
    }

    #[test]
    fn test_table_error_message() {
        let err = SignatureTableError::AlreadyFinalized { function: "f".into() };
        assert_eq!(err.to_string(), "signature of `f` finalized twice");
        let engine: EngineError = err.into();
        assert_eq!(engine.to_string(), "signature of `f` finalized twice");
    }
}
