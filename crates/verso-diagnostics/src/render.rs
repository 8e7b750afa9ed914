//! Terminal rendering of diagnostics with source snippets.
//!
//! The renderer writes to any [`WriteColor`] sink, so the same code drives
//! colored stderr output and plain-text buffers in tests.

use crate::span::{Label, LabelStyle, LineColumn, SourceSpan};
use crate::{Diagnostic, Severity};
use std::collections::HashMap;
use std::io::{self, Write};
use termcolor::{Buffer, Color, ColorSpec, WriteColor};
use unicode_width::UnicodeWidthStr;

/// Renderer settings.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Show the `= explanation` trailer
    pub show_explanation: bool,
    /// Emit a summary line after `render_all`
    pub show_summary: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            show_explanation: true,
            show_summary: true,
        }
    }
}

/// Source text by file path, with precomputed line starts.
#[derive(Debug, Default)]
pub struct SourceCache {
    files: HashMap<String, SourceFile>,
}

#[derive(Debug)]
struct SourceFile {
    text: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(text: String) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    /// 0-indexed line containing `offset`.
    fn line_index(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    fn line_text(&self, line: usize) -> &str {
        let start = self.line_starts.get(line).copied().unwrap_or(self.text.len());
        let end = self
            .line_starts
            .get(line + 1)
            .map(|e| e.saturating_sub(1))
            .unwrap_or(self.text.len());
        self.text.get(start..end.max(start)).unwrap_or("")
    }

    /// Line and display column of a byte offset.
    fn location(&self, offset: usize) -> LineColumn {
        let offset = offset.min(self.text.len());
        let line = self.line_index(offset);
        let start = self.line_starts[line];
        let prefix = self.text.get(start..offset).unwrap_or("");
        LineColumn::new(line + 1, prefix.width() + 1)
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.files.insert(path.into(), SourceFile::new(source.into()));
    }

    pub fn get_source(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(|f| f.text.as_str())
    }

    fn file(&self, span: &SourceSpan) -> Option<&SourceFile> {
        self.files.get(span.file.to_string_lossy().as_ref())
    }

    /// Start and end positions of a span, if its file is cached.
    pub fn locate(&self, span: &SourceSpan) -> Option<(LineColumn, LineColumn)> {
        let file = self.file(span)?;
        Some((file.location(span.start), file.location(span.end)))
    }
}

/// Renders diagnostics in the familiar `error[CODE]: message` layout.
pub struct TerminalRenderer<W: WriteColor> {
    out: W,
    config: RenderConfig,
}

impl<W: WriteColor> TerminalRenderer<W> {
    pub fn new(out: W, config: RenderConfig) -> Self {
        Self { out, config }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn severity_color(severity: Severity) -> Color {
        match severity {
            Severity::Error => Color::Red,
            Severity::Warning => Color::Yellow,
            Severity::Note => Color::Cyan,
            Severity::Help => Color::Green,
        }
    }

    fn write_colored(&mut self, text: &str, color: Color, bold: bool) -> io::Result<()> {
        let mut spec = ColorSpec::new();
        spec.set_fg(Some(color)).set_bold(bold);
        self.out.set_color(&spec)?;
        write!(self.out, "{}", text)?;
        self.out.reset()
    }

    pub fn render(&mut self, diagnostic: &Diagnostic, sources: &SourceCache) -> io::Result<()> {
        let color = Self::severity_color(diagnostic.severity);
        let header = match &diagnostic.code {
            Some(code) => format!("{}[{}]", diagnostic.severity, code),
            None => diagnostic.severity.to_string(),
        };
        self.write_colored(&header, color, true)?;
        self.write_colored(&format!(": {}", diagnostic.message), Color::White, true)?;
        writeln!(self.out)?;

        if let Some(primary) = diagnostic.primary_span() {
            match sources.locate(primary) {
                Some((start, _)) => {
                    writeln!(
                        self.out,
                        "  --> {}:{}:{}",
                        primary.file.display(),
                        start.line,
                        start.column
                    )?;
                }
                None => writeln!(self.out, "  --> {}", primary)?,
            }
        }

        // Primary label first, then secondaries in insertion order
        let mut labels: Vec<&Label> = diagnostic.spans.primary_label().into_iter().collect();
        labels.extend(diagnostic.spans.secondary_labels());
        for label in labels {
            self.render_label(label, diagnostic.severity, sources)?;
        }

        if self.config.show_explanation {
            if let Some(explanation) = &diagnostic.explanation {
                writeln!(self.out, "   = {}", explanation)?;
            }
        }

        for suggestion in &diagnostic.suggestions {
            self.write_colored("   = help", Self::severity_color(Severity::Help), true)?;
            writeln!(self.out, ": {}", suggestion.full_message())?;
            for edit in &suggestion.edits {
                let path = edit.file.to_string_lossy();
                if let Some(text) = sources.get_source(&path) {
                    let fixed = edit.apply(text);
                    let file = SourceFile::new(fixed);
                    let line = file.line_index(edit.start.min(file.text.len()));
                    writeln!(self.out, "     | {}", file.line_text(line))?;
                }
            }
        }

        for child in &diagnostic.children {
            writeln!(self.out, "   = {}: {}", child.severity, child.message)?;
        }
        writeln!(self.out)
    }

    fn render_label(
        &mut self,
        label: &Label,
        severity: Severity,
        sources: &SourceCache,
    ) -> io::Result<()> {
        let Some(file) = sources.file(&label.span) else {
            writeln!(self.out, "   | {} ({})", label.message, label.span)?;
            return Ok(());
        };
        let start = file.location(label.span.start);
        let end = file.location(label.span.end);
        let line_no = start.line.to_string();
        let gutter = " ".repeat(line_no.len());

        writeln!(self.out, "{} |", gutter)?;
        writeln!(self.out, "{} | {}", line_no, file.line_text(start.line - 1))?;

        let width = if end.line == start.line {
            end.column.saturating_sub(start.column).max(1)
        } else {
            1
        };
        let (marker, color) = match label.style {
            LabelStyle::Primary => ('^', Self::severity_color(severity)),
            LabelStyle::Secondary => ('-', Color::Blue),
        };
        write!(self.out, "{} | {}", gutter, " ".repeat(start.column - 1))?;
        let underline: String = std::iter::repeat(marker).take(width).collect();
        self.write_colored(&underline, color, true)?;
        if !label.message.is_empty() {
            write!(self.out, " ")?;
            self.write_colored(&label.message, color, false)?;
        }
        writeln!(self.out)
    }

    /// Render a batch followed by an error/warning summary.
    pub fn render_all(&mut self, diagnostics: &[Diagnostic], sources: &SourceCache) -> io::Result<()> {
        for diagnostic in diagnostics {
            self.render(diagnostic, sources)?;
        }
        if !self.config.show_summary {
            return Ok(());
        }
        let errors = diagnostics.iter().filter(|d| d.is_error()).count();
        let warnings = diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count();
        if errors > 0 {
            let plural = if errors == 1 { "" } else { "s" };
            writeln!(self.out, "error: ownership analysis failed with {} error{}", errors, plural)?;
        } else if warnings > 0 {
            let plural = if warnings == 1 { "" } else { "s" };
            writeln!(self.out, "warning: {} warning{} emitted", warnings, plural)?;
        }
        Ok(())
    }
}

/// Render diagnostics to an uncolored string.
pub fn render_to_string(diagnostics: &[Diagnostic], sources: &SourceCache) -> String {
    let mut renderer = TerminalRenderer::new(Buffer::no_color(), RenderConfig::default());
    if renderer.render_all(diagnostics, sources).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(renderer.into_inner().as_slice()).into_owned()
}
