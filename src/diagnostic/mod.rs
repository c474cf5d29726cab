pub mod ansi;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Error,
}

#[derive(Debug, Clone)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub suggestion: Option<String>,
    /// Active functions, innermost first, for fatal engine conditions.
    pub trace: Vec<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            label: None,
            notes: Vec::new(),
            suggestion: None,
            trace: Vec::new(),
            source: None,
        }
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_trace(mut self, trace: &[String]) -> Self {
        self.trace = trace.to_vec();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

// ---- From impls for the crate's error types ----

impl From<&crate::lexer::LexError> for Diagnostic {
    fn from(e: &crate::lexer::LexError) -> Self {
        let span = Span {
            start: e.position,
            end: e.position + e.snippet.len().max(1),
        };
        let mut d = Diagnostic::error(format!("unexpected token '{}'", e.snippet))
            .with_span(span, "here");
        if !e.suggestion.is_empty() {
            d = d.with_suggestion(e.suggestion.clone());
        }
        d
    }
}

impl From<&crate::parser::ParseError> for Diagnostic {
    fn from(e: &crate::parser::ParseError) -> Self {
        Diagnostic::error(&e.message).with_span(e.span, "here")
    }
}

impl From<&crate::vm::CompileError> for Diagnostic {
    fn from(e: &crate::vm::CompileError) -> Self {
        Diagnostic::error(e.to_string()).with_span(e.span(), "in this function")
    }
}

impl From<&crate::runtime::Failure> for Diagnostic {
    fn from(e: &crate::runtime::Failure) -> Self {
        Diagnostic::error(&e.message)
    }
}

impl From<&crate::vm::VmError> for Diagnostic {
    fn from(e: &crate::vm::VmError) -> Self {
        match e {
            crate::vm::VmError::Failure(f) => Diagnostic::from(f),
            crate::vm::VmError::Fatal(fatal) => {
                Diagnostic::error(format!("fatal: {}", fatal.kind)).with_trace(&fatal.trace.0)
            }
        }
    }
}

impl From<&crate::Error> for Diagnostic {
    fn from(e: &crate::Error) -> Self {
        match e {
            crate::Error::Lex(e) => e.into(),
            crate::Error::Parse(e) => e.into(),
            crate::Error::Compile(e) => e.into(),
            crate::Error::Failure(e) => e.into(),
            crate::Error::Vm(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Fatal, FatalKind, StackTrace, VmError};

    #[test]
    fn diagnostic_error_builder() {
        let d = Diagnostic::error("something went wrong");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "something went wrong");
        assert!(d.label.is_none());
        assert!(d.notes.is_empty());
        assert!(d.suggestion.is_none());
        assert!(d.trace.is_empty());
    }

    #[test]
    fn diagnostic_with_span() {
        let d = Diagnostic::error("bad token").with_span(Span { start: 5, end: 8 }, "here");
        let label = d.label.unwrap();
        assert_eq!(label.span, Span { start: 5, end: 8 });
        assert_eq!(label.message, "here");
    }

    #[test]
    fn from_lex_error() {
        let e = crate::lexer::LexError {
            position: 3,
            snippet: "#!".to_string(),
            suggestion: String::new(),
        };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("#!"));
        assert_eq!(d.label.unwrap().span, Span { start: 3, end: 5 });
        assert!(d.suggestion.is_none());
    }

    #[test]
    fn from_parse_error() {
        let e = crate::parser::ParseError {
            position: 2,
            span: Span { start: 10, end: 15 },
            message: "expected identifier".to_string(),
        };
        let d = Diagnostic::from(&e);
        assert!(d.message.contains("expected identifier"));
        assert_eq!(d.label.unwrap().span, Span { start: 10, end: 15 });
    }

    #[test]
    fn from_compile_error_points_at_the_function() {
        let e = crate::vm::CompileError::DuplicateParameter {
            function: "f".to_string(),
            name: "a".to_string(),
            span: Span { start: 0, end: 20 },
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.message, "duplicate parameter a in f");
        assert_eq!(d.label.unwrap().span, Span { start: 0, end: 20 });
    }

    #[test]
    fn failures_have_no_location() {
        let e = VmError::Failure(crate::runtime::Failure::new("division by zero"));
        let d = Diagnostic::from(&e);
        assert_eq!(d.message, "division by zero");
        assert!(d.label.is_none());
        assert!(d.trace.is_empty());
    }

    #[test]
    fn fatal_carries_its_trace() {
        let e = VmError::Fatal(Fatal {
            kind: FatalKind::StackOverflow { capacity: 64 },
            trace: StackTrace(vec!["f".to_string(), "main".to_string()]),
        });
        let d = Diagnostic::from(&crate::Error::from(e));
        assert!(d.message.starts_with("fatal: stack overflow"));
        assert_eq!(d.trace, vec!["f", "main"]);
    }
}
