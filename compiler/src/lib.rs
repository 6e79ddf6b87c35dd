//! Pascal-subset compiler targeting a textual stack-VM instruction set.
//!
//! # Compiler Pipeline
//!
//! ```text
//! Source Code (.pas)
//!     │
//!     ▼
//! ┌──────────┐
//! │  Lexer    │  Tokens with spans; bad characters are reported and skipped
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │  Parser   │  Recursive descent, registers callable signatures
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │ Validate  │  Structural walk over every node
//! └────┬─────┘
//!      │
//!      ▼
//! ┌──────────┐
//! │ Compiler  │  AST → VM instructions (context: slots, labels, scopes)
//! └────┬─────┘
//!      │
//!      ▼
//! VM program text (.vm)
//! ```

pub mod ast;
pub mod compiler;
pub mod context;
pub mod errors;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod token;
pub mod tree;
pub mod validate;
pub mod vm;

use log::{info, warn};

use crate::ast::Program;
use crate::errors::{Error, LexError};
use crate::lexer::Lexer;
use crate::parser::Parser;
use crate::vm::Instr;

/// Lex and parse `source`. Lexical errors do not stop the pipeline; they are
/// returned next to the result.
pub fn parse(source: &str) -> (Result<Program, Error>, Vec<LexError>) {
    let mut lexer = Lexer::new(source);
    let tokens = lexer.scan_tokens();
    let lex_errors = lexer.errors().to_vec();
    info!("lexed {} tokens ({} errors)", tokens.len(), lex_errors.len());

    let program = Parser::new(tokens).parse().map_err(Error::from);
    if let Ok(program) = &program {
        info!("parsed program {}", program.heading.name);
    }
    (program, lex_errors)
}

/// Run the whole pipeline and return the instruction list.
pub fn compile_to_instructions(source: &str) -> Result<Vec<Instr>, Error> {
    let (program, lex_errors) = parse(source);
    for err in &lex_errors {
        warn!("{}", err);
    }
    let program = program?;
    if let Err(problems) = validate::validate(&program) {
        for problem in &problems {
            warn!("{}", problem);
        }
    }
    let code = compiler::compile_program(&program)?;
    info!("generated {} instructions", code.len());
    Ok(code)
}

/// Compile `source` to VM program text, one instruction per line.
pub fn compile(source: &str) -> Result<String, Error> {
    compile_to_instructions(source).map(|code| vm::render(&code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyntaxError;

    #[test]
    fn test_compile_simple_program() {
        let output = compile("program Soma; var x: integer; begin x := 1 + 2 end.").unwrap();
        assert_eq!(output, "START\nPUSHI 1\nPUSHI 2\nADD\nSTOREG 0\nSTOP");
    }

    #[test]
    fn test_lex_errors_do_not_stop_compilation() {
        let (program, errors) = parse("program p; begin x := 1 # end.");
        assert_eq!(errors.len(), 1);
        assert!(program.is_ok());
        assert!(compile("program p; begin x := 1 # end.").is_ok());
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let err = compile("program p begin end.").unwrap_err();
        assert!(matches!(err, Error::Syntax(SyntaxError::UnexpectedToken { .. })));
    }
}
