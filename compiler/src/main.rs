//! pasvmc: command-line driver.
//!
//! Usage:
//!   pasvmc lex <input.pas>                   (dump tokens)
//!   pasvmc parse <input.pas>                 (dump AST)
//!   pasvmc visualize <input.pas>             (same as parse)
//!   pasvmc print <input.pas>                 (pretty-print source)
//!   pasvmc dot <input.pas>                   (AST as Graphviz DOT)
//!   pasvmc compile <input.pas> [-o <out.vm>] (VM program)
//!
//! Logging goes to stderr; set `RUST_LOG=info` (or `debug`) for more.

use log::{info, warn};
use miette::Report;
use pasvm_compiler::{
    ast::Program,
    compiler,
    errors::{CompileError, Error},
    lexer::Lexer,
    printer, tree, validate, vm,
};
use std::{env, fs, process};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: pasvmc <command> <file.pas> [-o <out.vm>]");
        eprintln!("Commands: lex, parse, visualize, print, dot, compile");
        process::exit(64);
    }

    let command = &args[1];
    let filename = &args[2];

    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading '{}': {}", filename, e);
            process::exit(74);
        }
    };

    match command.as_str() {
        "lex" => {
            let mut lexer = Lexer::new(&source);
            let tokens = lexer.scan_tokens();
            for token in &tokens {
                println!("{:>4}  {}", token.line, token.kind);
            }
            if !lexer.errors().is_empty() {
                for err in lexer.errors() {
                    eprintln!("{:?}", Report::new(CompileError::from_lex(err, &source)));
                }
                process::exit(65);
            }
        }
        "parse" | "visualize" => {
            let program = lex_and_parse(&source);
            print!("{}", tree::build(&program).dump());
        }
        "print" => {
            let program = lex_and_parse(&source);
            print!("{}", printer::print(&program));
        }
        "dot" => {
            let program = lex_and_parse(&source);
            print!("{}", tree::build(&program).to_dot());
        }
        "compile" => {
            let program = lex_and_parse(&source);
            if let Err(problems) = validate::validate(&program) {
                for problem in &problems {
                    warn!("{}", problem);
                }
            }
            let code = match compiler::compile_program(&program) {
                Ok(code) => code,
                Err(e) => fail(&Error::from(e), &source),
            };
            if args.len() > 4 && args[3] == "-o" {
                let output = &args[4];
                match vm::write_program(output, &code) {
                    Ok(()) => info!("compiled {} to {}", filename, output),
                    Err(e) => {
                        eprintln!("Error writing output: {}", e);
                        process::exit(74);
                    }
                }
            } else {
                println!("{}", vm::render(&code));
            }
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            process::exit(64);
        }
    }
}

/// Lex and parse source code, exiting on syntax errors. Lexical errors are
/// reported and skipped.
fn lex_and_parse(source: &str) -> Program {
    let (program, lex_errors) = pasvm_compiler::parse(source);
    for err in &lex_errors {
        eprintln!("{:?}", Report::new(CompileError::from_lex(err, source)));
    }
    match program {
        Ok(program) => program,
        Err(e) => fail(&e, source),
    }
}

fn fail(err: &Error, source: &str) -> ! {
    eprintln!("{:?}", Report::new(CompileError::from_error(err, source)));
    process::exit(65);
}
