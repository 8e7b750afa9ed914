//! Structured diagnostics for the Verso compiler middle end.
//!
//! Analysis passes never print. They produce [`Diagnostic`] values that the
//! compiler's reporting layer batches and renders:
//!
//! - `Diagnostic` - category, code, severity, message, labelled spans,
//!   explanation and fix suggestions
//! - `ErrorCodeRegistry` - the stable `E2xxx`/`W2xxx` ownership codes
//! - `render` - a `termcolor` renderer that prints source snippets
//!
//! # Example
//!
//! ```rust
//! use verso_diagnostics::{Diagnostic, Severity};
//! use verso_diagnostics::span::SourceSpan;
//! use verso_diagnostics::suggestion::{Suggestion, SuggestionEdit};
//!
//! let use_site = SourceSpan::new("main.vs", 40, 41);
//! let move_site = SourceSpan::new("main.vs", 25, 31);
//! let diagnostic = Diagnostic::error("E2001", "use-after-move", "use of moved value `a`")
//!     .with_primary(use_site.clone(), "value used here after move")
//!     .with_secondary(move_site, "value moved here")
//!     .with_suggestion(
//!         Suggestion::maybe_incorrect("insert `borrow` before this use")
//!             .with_edit(SuggestionEdit::insert_before(&use_site, "borrow ")),
//!     );
//!
//! assert_eq!(diagnostic.severity, Severity::Error);
//! assert_eq!(diagnostic.code.as_deref(), Some("E2001"));
//! ```

pub mod render;
pub mod span;
pub mod suggestion;

use std::collections::BTreeMap;
use std::fmt;

use span::{MultiSpan, SourceSpan};
use suggestion::Suggestion;
use thiserror::Error;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Severity {
    /// Blocks code generation for the unit
    #[default]
    Error,
    Warning,
    Note,
    Help,
}

impl Severity {
    pub fn prefix(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
            Severity::Help => "help",
        }
    }

    pub fn blocks_compilation(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A compiler diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable code such as `E2001`
    pub code: Option<String>,
    /// Machine-readable category, e.g. `use-after-move`
    pub category: String,
    pub severity: Severity,
    /// One-line headline
    pub message: String,
    pub spans: MultiSpan,
    /// Longer human-readable explanation
    pub explanation: Option<String>,
    pub suggestions: Vec<Suggestion>,
    /// Attached notes and help messages
    pub children: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        code: Option<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            category: category.into(),
            severity,
            message: message.into(),
            spans: MultiSpan::new(),
            explanation: None,
            suggestions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn error(
        code: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Error, Some(code.into()), category, message)
    }

    pub fn warning(
        code: impl Into<String>,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Warning, Some(code.into()), category, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(Severity::Note, None, "note", message)
    }

    pub fn with_primary(mut self, span: SourceSpan, label: impl Into<String>) -> Self {
        self.spans.push_primary(span, label);
        self
    }

    pub fn with_secondary(mut self, span: SourceSpan, label: impl Into<String>) -> Self {
        self.spans.push_secondary(span, label);
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    pub fn with_child(mut self, child: Diagnostic) -> Self {
        self.children.push(child);
        self
    }

    pub fn primary_span(&self) -> Option<&SourceSpan> {
        self.spans.primary_span()
    }

    pub fn is_error(&self) -> bool {
        self.severity.blocks_compilation()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}[{}]: {}", self.severity, code, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

// ============================================================================
// Error Code Registry
// ============================================================================

/// Information about a registered code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCodeInfo {
    pub code: String,
    pub severity: Severity,
    pub description: String,
}

/// Registry of stable diagnostic codes.
///
/// Codes are `E` (error) or `W` (warning) followed by four digits; the
/// first digit is the subsystem (`2` ownership and regions, `9` internal).
#[derive(Debug, Default)]
pub struct ErrorCodeRegistry {
    codes: BTreeMap<String, ErrorCodeInfo>,
}

impl ErrorCodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every code the ownership engine can emit.
    pub fn with_ownership_codes() -> Self {
        let mut registry = Self::new();

        registry.insert_known("E2001", "use after move");
        registry.insert_known("E2002", "conflicting borrow");
        registry.insert_known("E2003", "region escape");
        registry.insert_known("E2004", "unresolvable recursive signature");
        registry.insert_known("E2005", "override conflict");

        registry.insert_known("W2101", "move override is stronger than needed");
        registry.insert_known("W2102", "region holds no allocations");
        registry.insert_known("W2103", "region nesting too deep");

        registry.insert_known("E9001", "malformed function body");

        registry
    }

    fn insert_known(&mut self, code: &str, description: &str) {
        if let Err(err) = self.register(code, description) {
            debug_assert!(false, "built-in code rejected: {}", err);
        }
    }

    /// Register a code, validating its shape.
    pub fn register(
        &mut self,
        code: impl Into<String>,
        description: impl Into<String>,
    ) -> DiagnosticResult<()> {
        let code = code.into();
        let severity = match code.chars().next() {
            Some('E') => Severity::Error,
            Some('W') => Severity::Warning,
            _ => return Err(DiagnosticError::InvalidErrorCode(code)),
        };
        let digits = &code[1..];
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DiagnosticError::InvalidErrorCode(code));
        }
        self.codes.insert(
            code.clone(),
            ErrorCodeInfo {
                code,
                severity,
                description: description.into(),
            },
        );
        Ok(())
    }

    pub fn get(&self, code: &str) -> Option<&ErrorCodeInfo> {
        self.codes.get(code)
    }

    /// All codes in ascending order.
    pub fn all_codes(&self) -> impl Iterator<Item = &ErrorCodeInfo> {
        self.codes.values()
    }
}

pub type DiagnosticResult<T> = Result<T, DiagnosticError>;

/// Errors raised by the diagnostic infrastructure itself.
#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source file not found: {0}")]
    SourceNotFound(String),

    #[error("invalid error code: {0}")]
    InvalidErrorCode(String),
}
