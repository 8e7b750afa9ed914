//! Source locations attached to diagnostics.
//!
//! A [`SourceSpan`] is a byte range in a named file. Diagnostics point at
//! one primary span (the offending use) and any number of secondary spans
//! (the use that established the conflicting state).

use std::fmt;
use std::path::PathBuf;

/// A contiguous byte range in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSpan {
    pub file: PathBuf,
    /// Inclusive start offset
    pub start: usize,
    /// Exclusive end offset
    pub end: usize,
}

impl SourceSpan {
    pub fn new(file: impl Into<PathBuf>, start: usize, end: usize) -> Self {
        Self {
            file: file.into(),
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// A zero-width span at this span's start, used for insertions.
    pub fn shrink_to_start(&self) -> SourceSpan {
        SourceSpan::new(self.file.clone(), self.start, self.start)
    }

    pub fn overlaps(&self, other: &SourceSpan) -> bool {
        self.file == other.file && self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.file.display(), self.start, self.end)
    }
}

/// Whether a label marks the offending location or a related one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelStyle {
    #[default]
    Primary,
    Secondary,
}

/// A span with an explanatory message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
    pub style: LabelStyle,
}

impl Label {
    pub fn primary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Primary,
        }
    }

    pub fn secondary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            style: LabelStyle::Secondary,
        }
    }
}

/// All labelled locations of one diagnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiSpan {
    labels: Vec<Label>,
}

impl MultiSpan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_primary(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.labels.push(Label::primary(span, message));
    }

    pub fn push_secondary(&mut self, span: SourceSpan, message: impl Into<String>) {
        self.labels.push(Label::secondary(span, message));
    }

    /// The first primary label's span.
    pub fn primary_span(&self) -> Option<&SourceSpan> {
        self.primary_label().map(|l| &l.span)
    }

    pub fn primary_label(&self) -> Option<&Label> {
        self.labels.iter().find(|l| l.style == LabelStyle::Primary)
    }

    pub fn secondary_labels(&self) -> impl Iterator<Item = &Label> {
        self.labels
            .iter()
            .filter(|l| l.style == LabelStyle::Secondary)
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// 1-indexed line and display column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

impl LineColumn {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}
