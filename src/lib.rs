//! Brackish - a small bracket-syntax interpreter with selectable evaluation strategy
//!
//! Programs are bracket-delimited prefix lists. Every callable chooses how its
//! arguments are evaluated:
//!
//! ```text
//! [define double [procedure [x] [int-add x x]]]     ; eager: x is forced before the body runs
//! [define first [function [a b] a]]                 ; lazy: b is never evaluated
//! [first 1 [int-add 1 'oops']]                      ; => 1
//! [match [some 2] [none 'empty'] [_ 'full']]        ; => 'full'
//! ```
//!
//! ## Evaluation model
//!
//! - `function` closures bind list-shaped arguments as unevaluated thunks and
//!   return their body as a thunk; nothing runs until a consumer forces it.
//! - `procedure` closures force every argument before running the body.
//! - Absence is modelled with options (`none`, `[some x]`) rather than null.
//! - Forcing does not memoize: a thunk is recomputed each time it is forced.
//!
//! ## Modules
//!
//! - `ast`: the value model, printing and structural equality
//! - `evaluator`: environments, the evaluator core and the special forms
//! - `builtinops`: the registry of builtin forms
//! - `parser`: tokenizer and parser with import splicing
//! - `json`: conversion of data values to and from JSON

use std::fmt;

use crate::builtinops::Arity;

/// Maximum list nesting accepted by the parser
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum evaluation depth before a call is aborted.
/// Low enough to trip before the host thread runs out of stack.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Maximum number of deferred results forced in a row for one expression.
/// Deferred calls do not grow the depth, so this bounds a `function` that never returns.
pub const MAX_FORCE_STEPS: usize = 65_536;

/// A position in a source file, used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub row: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, row: usize, column: usize) -> Self {
        Location {
            file: file.into(),
            row,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.column)
    }
}

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, stray closing brackets)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed list)
    Incomplete,
    /// List nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra tokens found after a complete top-level expression
    TrailingContent,
    /// An import could not be resolved, or the imported file failed to parse
    Import,
}

/// A structured error describing a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Where the error occurred, if known
    pub location: Option<Location>,
    /// The problematic token, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        location: Option<Location>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            location,
            found,
        }
    }

    /// Create a ParseError anchored at a source location
    pub fn at(kind: ParseErrorKind, message: impl Into<String>, location: Location) -> Self {
        Self::new(kind, message, Some(location), None)
    }

    /// Attach the offending token text
    pub fn with_found(mut self, found: impl Into<String>) -> Self {
        self.found = Some(found.into());
        self
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location} {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    EvalError(String),
    TypeError(String),
    UnboundVariable(String),
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>, // Name of the form or closure kind being called
    },
    NotCallable(String),
    DepthLimitExceeded(usize),
}

impl Error {
    /// Create an ArityError for an exact argument count without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected: Arity::Exact(expected),
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the called form
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: impl Into<String>) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }

    /// The location of a parse error, if this is one
    pub fn location(&self) -> Option<&Location> {
        match self {
            Error::ParseError(e) => e.location.as_ref(),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::ParseError(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => write!(f, "{e}"),
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::TypeError(msg) => write!(f, "Type error: {msg}"),
            Error::UnboundVariable(name) => write!(f, "undefined symbol: {name}"),
            Error::ArityError {
                expected,
                got,
                expression,
            } => match expression {
                Some(expr) => write!(
                    f,
                    "ArityError: {expr}: expected {expected} arguments, got {got}"
                ),
                None => write!(
                    f,
                    "ArityError: expected {expected} arguments but got {got}"
                ),
            },
            Error::NotCallable(value) => {
                write!(f, "first element in list is not a function or procedure: {value}")
            }
            Error::DepthLimitExceeded(max) => {
                write!(f, "maximum evaluation depth exceeded (max: {max})")
            }
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;

#[cfg(feature = "json")]
pub mod json;

#[cfg(feature = "parser")]
pub mod parser;
