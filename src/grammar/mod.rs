mod grammar;

pub use grammar::{Grammar, GrammarBuilder};
