//! Structured diagnostics for the lifetime analysis engine
//!
//! The analysis core reports findings as plain `(location, message,
//! severity)` tuples through a callback; this library provides the richer
//! diagnostic values a host builds out of those tuples:
//! - severity levels (Error, Warning, Note)
//! - primary and secondary labels pointing at source spans
//! - a builder API for assembling multi-label diagnostics
//!
//! Terminal rendering is intentionally not part of this crate; hosts own
//! presentation.

use std::fmt;

use serde::{Deserialize, Serialize};
pub use source_map::{FileId, SourceFile, SourceMap, SourcePosition, SourceSpan};

pub mod lifetime;

/// Severity of a reported finding
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// The analyzed code violates a lifetime invariant
    Error,
    /// Suspicious but not definitely wrong
    Warning,
    /// Supplementary information attached to another finding
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Whether a label is the main anchor of a diagnostic or context for it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Primary,
    Secondary,
}

/// A message anchored to a span of source
#[derive(Debug, Clone)]
pub struct Label {
    pub span: SourceSpan,
    pub message: String,
    pub kind: LabelKind,
}

impl Label {
    pub fn primary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            kind: LabelKind::Primary,
        }
    }

    pub fn secondary(span: SourceSpan, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
            kind: LabelKind::Secondary,
        }
    }
}

/// One finding produced by the engine
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Option<String>,
    pub message: String,
    pub span: SourceSpan,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(
                f,
                "{}[{}]: {} ({})",
                self.severity, code, self.message, self.span
            ),
            None => write!(f, "{}: {} ({})", self.severity, self.message, self.span),
        }
    }
}

/// Fluent assembly of a [`Diagnostic`]
pub struct DiagnosticBuilder {
    inner: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(severity: Severity, message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            inner: Diagnostic {
                severity,
                code: None,
                message: message.into(),
                span,
                labels: Vec::new(),
                notes: Vec::new(),
            },
        }
    }

    pub fn error(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.inner.code = Some(code.into());
        self
    }

    pub fn label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.inner.labels.push(Label::primary(span, message));
        self
    }

    pub fn secondary_label(mut self, span: SourceSpan, message: impl Into<String>) -> Self {
        self.inner.labels.push(Label::secondary(span, message));
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.inner.notes.push(note.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.inner
    }
}

/// Accumulated findings for a translation unit
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSet {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

impl IntoIterator for DiagnosticSet {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.diagnostics.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use source_map::SourcePosition;

    fn span() -> SourceSpan {
        SourceSpan::point(FileId::new(0), SourcePosition::new(3, 7, 42))
    }

    #[test]
    fn builder_assembles_all_parts() {
        let diag = DiagnosticBuilder::error("function returns reference to a local", span())
            .code("L0001")
            .label(span(), "returned here")
            .secondary_label(span(), "local declared here")
            .note("the local's storage ends when the function returns")
            .build();

        assert!(diag.is_error());
        assert_eq!(diag.code.as_deref(), Some("L0001"));
        assert_eq!(diag.labels.len(), 2);
        assert_eq!(diag.labels[0].kind, LabelKind::Primary);
        assert_eq!(diag.labels[1].kind, LabelKind::Secondary);
        assert_eq!(diag.notes.len(), 1);
    }

    #[test]
    fn set_tracks_errors() {
        let mut set = DiagnosticSet::new();
        assert!(!set.has_errors());

        set.push(DiagnosticBuilder::warning("suspicious pointer cast", span()).build());
        assert!(!set.has_errors());

        set.push(DiagnosticBuilder::error("static points to local", span()).build());
        assert!(set.has_errors());
        assert_eq!(set.errors().count(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn severity_ordering_and_display() {
        assert!(Severity::Error < Severity::Warning);
        assert_eq!(Severity::Note.to_string(), "note");
    }
}
