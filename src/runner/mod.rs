mod runner;

pub use runner::{build_sexpr_grammar, run_file, run_prompt};
