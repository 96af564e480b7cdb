mod lexer;

pub use lexer::{Lexer, LexerMode};
