//! Suggested fixes attached to diagnostics.
//!
//! Ownership errors are never auto-repaired by relaxing a safety rule, so
//! most fixes here insert an override keyword the programmer must accept.

use crate::span::SourceSpan;
use std::path::PathBuf;

/// Confidence that a suggestion is correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Applicability {
    /// Definitely correct; a tool may apply it without asking
    MachineApplicable,
    /// Probably what the programmer wants, phrased as "consider ..."
    #[default]
    MaybeIncorrect,
    /// No concrete edit, only guidance
    Educational,
}

impl Applicability {
    pub fn help_prefix(&self) -> &'static str {
        match self {
            Applicability::MachineApplicable => "",
            Applicability::MaybeIncorrect => "consider: ",
            Applicability::Educational => "note: ",
        }
    }
}

/// One text replacement. An empty range inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestionEdit {
    pub file: PathBuf,
    pub start: usize,
    pub end: usize,
    pub new_text: String,
}

impl SuggestionEdit {
    pub fn replace(span: &SourceSpan, new_text: impl Into<String>) -> Self {
        Self {
            file: span.file.clone(),
            start: span.start,
            end: span.end,
            new_text: new_text.into(),
        }
    }

    /// Insert `text` immediately before `span`.
    pub fn insert_before(span: &SourceSpan, text: impl Into<String>) -> Self {
        Self {
            file: span.file.clone(),
            start: span.start,
            end: span.start,
            new_text: text.into(),
        }
    }

    pub fn is_insertion(&self) -> bool {
        self.start == self.end && !self.new_text.is_empty()
    }

    /// Apply this edit to `source`, returning the edited text.
    ///
    /// Out-of-range or non-boundary offsets leave the source unchanged.
    pub fn apply(&self, source: &str) -> String {
        let valid = self.start <= self.end
            && self.end <= source.len()
            && source.is_char_boundary(self.start)
            && source.is_char_boundary(self.end);
        if !valid {
            return source.to_string();
        }
        let mut out = String::with_capacity(source.len() + self.new_text.len());
        out.push_str(&source[..self.start]);
        out.push_str(&self.new_text);
        out.push_str(&source[self.end..]);
        out
    }
}

/// A fix for a diagnostic: a message plus zero or more edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub message: String,
    pub applicability: Applicability,
    pub edits: Vec<SuggestionEdit>,
}

impl Suggestion {
    pub fn new(message: impl Into<String>, applicability: Applicability) -> Self {
        Self {
            message: message.into(),
            applicability,
            edits: Vec::new(),
        }
    }

    pub fn machine_applicable(message: impl Into<String>) -> Self {
        Self::new(message, Applicability::MachineApplicable)
    }

    pub fn maybe_incorrect(message: impl Into<String>) -> Self {
        Self::new(message, Applicability::MaybeIncorrect)
    }

    pub fn educational(message: impl Into<String>) -> Self {
        Self::new(message, Applicability::Educational)
    }

    pub fn with_edit(mut self, edit: SuggestionEdit) -> Self {
        self.edits.push(edit);
        self
    }

    pub fn can_auto_apply(&self) -> bool {
        self.applicability == Applicability::MachineApplicable && !self.edits.is_empty()
    }

    /// Message with its applicability prefix, as shown after `help:`.
    pub fn full_message(&self) -> String {
        format!("{}{}", self.applicability.help_prefix(), self.message)
    }
}
