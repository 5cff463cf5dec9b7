//! Front-end for the C subset the passes in this crate operate on.
//!
//! Supported: `char`/`short`/`int`/`long`/`float`/`double` scalars, pointers,
//! fixed-size arrays, `struct`s and `enum`s, global variables (without
//! initializers), function prototypes and definitions, every C statement kind,
//! and the full C expression grammar (except string/character literals).
//!
//! `#include` lines (and `#pragma`s other than `#pragma scout`) are ignored,
//! any other preprocessor directive is an error, as are `unsigned` types.
//!
//! `#pragma scout <domain> <action> <args...>` lines are attached (as
//! [`Pragma`](crate::pragma::Pragma)s) to the statement or function following
//! them, with any argument expressions parsed like any other expression.

mod lexer;
mod parser;

pub use lexer::{Lexer, Span, Token, TokenKind};

use crate::{Context, Module};
use std::rc::Rc;

/// Error produced while lexing or parsing, pointing at the offending source.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{}:{}: {message}", span.line, span.column)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

/// Parse a whole translation unit into a new [`Module`] (using `cx` for interning).
pub fn parse(cx: Rc<Context>, source: &str) -> Result<Module, ParseError> {
    parser::Parser::new(cx, source)?.parse_module()
}

#[cfg(test)]
mod tests;
