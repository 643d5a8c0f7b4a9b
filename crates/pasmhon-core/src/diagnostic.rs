//! Front-end failures and their rendering
//!
//! Every front-end stage reports a list of span-carrying errors.
//! [`CompileFailure`] keeps the stage that stopped the pipeline and
//! renders each error as
//!
//! ```text
//! path:line:column: kind: message
//!     source line
//!     ^
//! ```

use std::fmt::{self, Write as _};

use crate::bytecode::CompileError;
use crate::lexer::{LineIndex, SpannedError, Span};
use crate::parser::ParseError;
use crate::resolver::ResolveError;

/// Why a source file could not be turned into a code object
#[derive(Debug, Clone, PartialEq)]
pub enum CompileFailure {
    Lex(Vec<SpannedError>),
    Parse(Vec<ParseError>),
    Resolve(Vec<ResolveError>),
    Compile(Vec<CompileError>),
}

/// One located error, independent of the stage that raised it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: &'static str,
    pub message: String,
    pub span: Span,
    pub hint: Option<String>,
}

impl CompileFailure {
    /// The error class shown in front of each message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lex(_) => "LexError",
            Self::Parse(_) => "SyntaxError",
            Self::Resolve(_) => "NameError",
            Self::Compile(_) => "CompileError",
        }
    }

    /// The errors in source order
    #[must_use]
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let kind = self.kind();
        let mut diagnostics: Vec<Diagnostic> = match self {
            Self::Lex(errors) => errors
                .iter()
                .map(|e| Diagnostic::new(kind, e.error.to_string(), e.span, None))
                .collect(),
            Self::Parse(errors) => errors
                .iter()
                .map(|e| Diagnostic::new(kind, e.kind.to_string(), e.span, e.hint.clone()))
                .collect(),
            Self::Resolve(errors) => errors
                .iter()
                .map(|e| Diagnostic::new(kind, e.kind.to_string(), e.span, None))
                .collect(),
            Self::Compile(errors) => errors
                .iter()
                .map(|e| Diagnostic::new(kind, e.kind.to_string(), e.span, e.hint.clone()))
                .collect(),
        };
        diagnostics.sort_by_key(|d| d.span.start);
        diagnostics
    }

    /// Number of reported errors
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Lex(errors) => errors.len(),
            Self::Parse(errors) => errors.len(),
            Self::Resolve(errors) => errors.len(),
            Self::Compile(errors) => errors.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render every error with its source line and a caret
    #[must_use]
    pub fn render(&self, path: &str, source: &str) -> String {
        let lines = LineIndex::new(source);
        let mut out = String::new();
        for diagnostic in self.diagnostics() {
            diagnostic.render_into(&mut out, path, source, &lines);
        }
        out
    }
}

impl Diagnostic {
    fn new(kind: &'static str, message: String, span: Span, hint: Option<String>) -> Self {
        Self {
            kind,
            message,
            span,
            hint,
        }
    }

    fn render_into(&self, out: &mut String, path: &str, source: &str, lines: &LineIndex) {
        let location = lines.location(source, self.span.start);
        let _ = writeln!(
            out,
            "{path}:{}:{}: {}: {}",
            location.line, location.column, self.kind, self.message
        );
        let text = lines.line_text(source, location.line);
        // tabs stay tabs so the caret lines up in a terminal
        let pad: String = text
            .chars()
            .take(location.column.saturating_sub(1) as usize)
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        let _ = writeln!(out, "    {text}");
        let _ = writeln!(out, "    {pad}^");
        if let Some(hint) = &self.hint {
            let _ = writeln!(out, "  hint: {hint}");
        }
    }
}

impl fmt::Display for CompileFailure {
    /// The first error only; `render` gives the full report
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.diagnostics().first() {
            Some(first) => write!(f, "{}: {}", first.kind, first.message)?,
            None => write!(f, "{}", self.kind())?,
        }
        match self.len() {
            0 | 1 => Ok(()),
            n => write!(f, " (and {} more)", n - 1),
        }
    }
}

impl std::error::Error for CompileFailure {}

#[cfg(test)]
mod tests {
    use crate::compile_source;

    #[test]
    fn syntax_errors_point_at_the_token() {
        let source = "x = 1\nif x\n    y = 2\n";
        let failure = compile_source(source, "bad.pa").unwrap_err();
        assert_eq!(failure.kind(), "SyntaxError");
        let rendered = failure.render("bad.pa", source);
        let mut lines = rendered.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("bad.pa:2:5: SyntaxError: "), "{header}");
        assert_eq!(lines.next(), Some("    if x"));
        assert_eq!(lines.next(), Some("        ^"));
    }

    #[test]
    fn lex_errors_have_their_own_kind() {
        let source = "s = 'open\n";
        let failure = compile_source(source, "s.pa").unwrap_err();
        assert!(matches!(failure, super::CompileFailure::Lex(_)));
        assert_eq!(failure.kind(), "LexError");
        assert!(failure.render("s.pa", source).starts_with("s.pa:1:5: LexError: unterminated string"));
    }

    #[test]
    fn resolve_errors_are_reported() {
        let source = "def f():\n    nonlocal q\n";
        let failure = compile_source(source, "n.pa").unwrap_err();
        assert_eq!(failure.kind(), "NameError");
        assert!(failure.to_string().contains("nonlocal 'q'"));
    }

    #[test]
    fn assignment_to_literal_is_a_compile_error() {
        let failure = compile_source("1 = x\n", "c.pa").unwrap_err();
        assert!(matches!(failure, super::CompileFailure::Compile(_)));
        assert_eq!(failure.to_string(), "CompileError: cannot assign to literal");
    }
}
