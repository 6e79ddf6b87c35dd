//! Error types for every stage of the pipeline, plus rich reporting.
//!
//! Lexical errors are diagnostics: the lexer records them and keeps going.
//! Syntax and code-generation errors abort the compilation and travel up
//! the call chain as `Result` values.
//!
//! [`CompileError`] wraps any of them together with the source text so that
//! miette can render the offending line with an underline.

use crate::token::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// A recoverable problem found while scanning. The offending text is
/// skipped and no token is produced for it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("Illegal character '{ch}' at line {line}")]
    IllegalCharacter { ch: char, line: usize, span: Span },

    #[error("Unterminated string literal at line {line}")]
    UnterminatedString { line: usize, span: Span },

    #[error("Unterminated comment at line {line}")]
    UnterminatedComment { line: usize, span: Span },

    #[error("Invalid number literal '{text}' at line {line}")]
    InvalidNumber { text: String, line: usize, span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::IllegalCharacter { span, .. }
            | LexError::UnterminatedString { span, .. }
            | LexError::UnterminatedComment { span, .. }
            | LexError::InvalidNumber { span, .. } => *span,
        }
    }
}

/// The token stream does not derive a program. Fatal for the compilation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyntaxError {
    #[error("Syntax error at '{found}', line {line}: expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        line: usize,
        span: Span,
    },

    #[error("Syntax error at end of input: expected {expected}")]
    UnexpectedEof { expected: String },
}

impl SyntaxError {
    pub fn span(&self) -> Option<Span> {
        match self {
            SyntaxError::UnexpectedToken { span, .. } => Some(*span),
            SyntaxError::UnexpectedEof { .. } => None,
        }
    }
}

/// Lowering failed. Fatal for the compilation; no partial program is kept.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("Undefined function or procedure: {name}")]
    UndefinedCallee { name: String },

    #[error("Argument of '{callee}' must be a variable")]
    InvalidReadTarget { callee: String },

    #[error("Unsupported construct: {construct}")]
    Unsupported { construct: String },

    #[error("Array '{name}' does not fit in the address space")]
    ArrayTooLarge { name: String },
}

/// Any fatal error of the parse → lower pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// A compiler error with source location information.
#[derive(Error, Debug, Diagnostic)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,

    #[source_code]
    pub src: String,

    #[label("{label}")]
    pub span: SourceSpan,

    pub label: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>, src: &str, span: Span, label: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            src: src.to_string(),
            span: (span.start, span.len()).into(),
            label: label.into(),
        }
    }

    pub fn from_lex(err: &LexError, src: &str) -> Self {
        Self::new(err.to_string(), src, err.span(), "skipped")
    }

    /// Errors without a position (end of input, code generation) point at
    /// the end of the source.
    pub fn from_error(err: &Error, src: &str) -> Self {
        let eof = Span::new(src.len(), src.len());
        match err {
            Error::Syntax(syntax) => {
                let label = match syntax {
                    SyntaxError::UnexpectedToken { .. } => "unexpected token",
                    SyntaxError::UnexpectedEof { .. } => "input ends here",
                };
                Self::new(err.to_string(), src, syntax.span().unwrap_or(eof), label)
            }
            Error::Codegen(_) => Self::new(err.to_string(), src, eof, "while lowering this program"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_messages() {
        let err = SyntaxError::UnexpectedToken {
            found: "begin".into(),
            expected: "';'".into(),
            line: 3,
            span: Span::new(10, 15),
        };
        assert_eq!(err.to_string(), "Syntax error at 'begin', line 3: expected ';'");

        let err = SyntaxError::UnexpectedEof { expected: "'.'".into() };
        assert_eq!(err.to_string(), "Syntax error at end of input: expected '.'");
    }

    #[test]
    fn test_pipeline_error_is_transparent() {
        let err: Error = CodegenError::UndefinedCallee { name: "foo".into() }.into();
        assert_eq!(err.to_string(), "Undefined function or procedure: foo");
    }

    #[test]
    fn test_report_points_at_token() {
        let src = "program p; begin x := end.";
        let err: Error = SyntaxError::UnexpectedToken {
            found: "end".into(),
            expected: "expression".into(),
            line: 1,
            span: Span::new(22, 25),
        }
        .into();
        let report = CompileError::from_error(&err, src);
        assert_eq!(report.span, SourceSpan::from((22, 3)));
    }
}
