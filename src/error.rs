//! Error taxonomy for the parsing engine.
//!
//! Plain enums with hand-written `Display`/`Error` impls rather than a
//! derive-macro crate.

use std::fmt;

/// Errors raised while a grammar is being registered, before any parsing
/// can begin.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstructionError {
    /// A `Deferred` placeholder was never resolved to a real symbol.
    UndefinedSymbol(String),
    /// A token's regex compiled, but is capable of matching the empty
    /// string at some position it was actually asked to match.
    ZeroLengthToken(String),
    /// A symbol already carries a reducer; `symbol(fun)` was applied twice.
    DuplicateReducer(String),
    /// A token's regex pattern failed to compile.
    InvalidPattern { token: String, pattern: String, reason: String },
    /// `build()` was called with a start symbol name that was never
    /// registered.
    UnknownStartSymbol(String),
    /// `build()` was called with a start lexer mode name that was never
    /// registered.
    UnknownStartMode(String),
    /// A terminal reachable from the start symbol is never accepted or
    /// omitted by any declared lexer mode.
    UndeclaredToken(String),
}

impl fmt::Display for ConstructionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstructionError::UndefinedSymbol(name) => {
                write!(f, "Symbol '{name}' is not defined.")
            }
            ConstructionError::ZeroLengthToken(name) => {
                write!(f, "Token '{name}' matched a string of zero length.")
            }
            ConstructionError::DuplicateReducer(name) => {
                write!(f, "Symbol '{name}' already has a reducer.")
            }
            ConstructionError::InvalidPattern { token, pattern, reason } => {
                write!(f, "Can't compile regex for token '{token}': '{pattern}', {reason}")
            }
            ConstructionError::UnknownStartSymbol(name) => {
                write!(f, "No such start symbol: '{name}'.")
            }
            ConstructionError::UnknownStartMode(name) => {
                write!(f, "No such start lexer mode: '{name}'.")
            }
            ConstructionError::UndeclaredToken(name) => {
                write!(f, "Token '{name}' is reachable from the start symbol but no lexer mode accepts or omits it.")
            }
        }
    }
}

impl std::error::Error for ConstructionError {}

/// Everything reported while lexing a string.
#[derive(Debug, Clone, PartialEq)]
pub struct LexerErrorInfo {
    pub pos: usize,
    pub line: usize,
    pub column: usize,
    /// Up to a 10-character window of the remaining text, newlines shown escaped.
    pub window: String,
    /// Names of tokens that were tried and failed at `pos`, accept tokens first.
    pub expected: Vec<String>,
    pub mode: String,
}

impl fmt::Display for LexerErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let toks = match self.expected.split_last() {
            Some((last, rest)) if !rest.is_empty() => {
                format!("{} or {}", rest.join(", "), last)
            }
            Some((last, _)) => last.clone(),
            None => "nothing".to_string(),
        };
        write!(
            f,
            "At line {}, position {} ('{}'): Expected {}.",
            self.line, self.column, self.window, toks
        )
    }
}

/// The outcome of driving a grammar against a token stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    Construction(ConstructionError),
    Lexer(LexerErrorInfo),
    /// A token arrived and no live alternative would accept it.
    StatesExhausted { expected: Vec<String> },
    /// Input was consumed but no branch reached a completed state.
    NotCompleted,
    /// More than one distinct completion survived to the end of input.
    Ambiguous,
    /// State-tree construction exceeded the recursion bound without
    /// consuming a token.
    InfiniteStateExpansion { symbol: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Construction(e) => write!(f, "{e}"),
            EngineError::Lexer(e) => write!(f, "{e}"),
            EngineError::StatesExhausted { expected } => {
                write!(f, "States exhausted, expected one of: {}", expected.join(", "))
            }
            EngineError::NotCompleted => write!(f, "Symbol not completed."),
            EngineError::Ambiguous => write!(f, "Ambiguous results."),
            EngineError::InfiniteStateExpansion { symbol } => {
                write!(f, "States expand to infinity at symbol '{symbol}'.")
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConstructionError> for EngineError {
    fn from(e: ConstructionError) -> Self {
        EngineError::Construction(e)
    }
}
