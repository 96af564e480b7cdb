//! Command-line demo driving the parsing engine: reads a script or a
//! REPL line, parses it with a small S-expression calculator grammar,
//! and prints the reduced value.

use std::io::{self, Read, Write};
use std::rc::Rc;

use encoding_rs_io::DecodeReaderBytesBuilder;

use crate::error::EngineError;
use crate::grammar::{Grammar, GrammarBuilder};
use crate::lexer::LexerMode;
use crate::symbol::Symbol;
use crate::token::{MatchPayload, Transform};
use crate::value::{Context, Value};

/// Builds the S-expression calculator grammar:
/// `op_expr := lp op expr expr rp`, `expr := op_expr | number`. Built
/// directly with `GrammarBuilder` rather than the `bnf` desugarer, so the
/// demo also documents the combinator API.
pub fn build_sexpr_grammar() -> Result<Grammar, EngineError> {
    let mut b = GrammarBuilder::new();

    let lparen = b.token("lparen", r"\(")?;
    let rparen = b.token("rparen", r"\)")?;
    let space = b.token("space", r" +")?;

    let number_transform: Transform = Rc::new(|payload: &MatchPayload, _ctx: &Context| match payload {
        MatchPayload::Raw(s) => Value::Number(s.parse().expect("\\d+ always parses as f64")),
        MatchPayload::Groups(_) => unreachable!("\\d+ has no named groups"),
    });
    let number = b.token_with_transform("number", r"\d+", number_transform)?;

    let op_transform: Transform = Rc::new(|payload: &MatchPayload, _ctx: &Context| match payload {
        MatchPayload::Raw(s) => Value::String(s.clone()),
        MatchPayload::Groups(_) => unreachable!("[+\\-*/%] has no named groups"),
    });
    let op = b.token_with_transform("op", r"[+\-*/%]", op_transform)?;

    b.mode(LexerMode {
        name: "default".to_string(),
        accept: vec![lparen.clone(), rparen.clone(), op.clone(), number.clone()],
        omit: vec![space],
        push_on: vec![],
        pop_on: None,
    });

    let expr = b.deferred("expr");

    let op_expr = Symbol::sequence(
        vec![
            Symbol::terminal(lparen),
            Symbol::terminal(op),
            expr.clone(),
            expr.clone(),
            Symbol::terminal(rparen),
        ],
        Some("op_expr".to_string()),
    )
    .with_reducer(Rc::new(|v, _ctx| {
        let items = v.as_list().expect("op_expr is a sequence");
        let operator = items[1].as_str().expect("op yields a string");
        let a = items[2].as_number().expect("expr yields a number");
        let b = items[3].as_number().expect("expr yields a number");
        let result = match operator {
            "+" => a + b,
            "-" => a - b,
            "*" => a * b,
            "/" => a / b,
            "%" => a % b,
            other => unreachable!("lexer only ever emits one of [+-*/%], got '{other}'"),
        };
        Value::Number(result)
    }))?;

    let expr_def = Symbol::alternation(vec![Symbol::terminal(number), op_expr], Some("expr".to_string()));
    b.define("expr", expr_def.clone())?;

    b.build(expr_def, "default")
}

/// Reads `path`, decoding it as UTF-8 (sniffing a BOM if present, falling
/// back to lossy UTF-8 otherwise), then parses it with the demo grammar.
pub fn run_file(path: &str) -> Result<(), EngineError> {
    let file = std::fs::File::open(path).unwrap_or_else(|e| panic!("failed to open '{path}': {e}"));
    let mut decoder = DecodeReaderBytesBuilder::new().build(file);
    let mut source = String::new();
    decoder.read_to_string(&mut source).unwrap_or_else(|e| panic!("failed to decode '{path}': {e}"));

    match run(&source) {
        Ok(value) => {
            println!("{value}");
            Ok(())
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(65);
        }
    }
}

pub fn run_prompt() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF / Ctrl-D
        }

        match run(&line) {
            Ok(value) => println!("{value}"),
            Err(err) => eprintln!("{err}"),
        }
    }

    Ok(())
}

fn run(source: &str) -> Result<Value, EngineError> {
    let grammar = build_sexpr_grammar()?;
    grammar.parse(source, &Context::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_grammar_evaluates_nested_sexprs() {
        assert_eq!(run("(+ 10 2)").unwrap(), Value::Number(12.0));
        assert_eq!(run("(* 5 (+ (- 7 3) 2))").unwrap(), Value::Number(30.0));
        assert_eq!(run("(% (+ 2 5) 2)").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn demo_grammar_rejects_unbalanced_input() {
        assert!(run("(+ 1 2").is_err());
    }
}
