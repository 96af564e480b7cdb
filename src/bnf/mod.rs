mod bnf;

pub use bnf::parse;
