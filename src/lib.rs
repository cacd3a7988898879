//! MiniLang: a small expression-and-statement language with lexically scoped
//! closures, evaluated by walking its syntax tree.
//!
//! ```
//! let outcome = minilang::run("var x = 20; print(x + 1); x * 2;").unwrap();
//! assert_eq!(outcome.output, vec![Some(minilang::Value::Int(21))]);
//! assert_eq!(outcome.value, Some(minilang::Value::Int(40)));
//! ```

pub mod env;
pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::{describe, Evaluator, RuntimeError, Value};
pub use lexer::*;
pub use parser::{Node, ParseError, Parser};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Diagnostic, Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Runtime(#[from] RuntimeError),
}

/// What a program produced: the entries `print` logged, in order, and its final value.
/// `None` stands for an expression that produced no value.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub output: Vec<Option<Value>>,
    pub value: Option<Value>,
}

/// Parses and evaluates `source` with a fresh evaluator.
pub fn run(source: &str) -> Result<Outcome, Error> {
    let program = Parser::new(source).parse()?;
    let mut evaluator = Evaluator::new();
    let value = evaluator.eval(&program)?;
    Ok(Outcome {
        output: evaluator.take_output(),
        value,
    })
}
