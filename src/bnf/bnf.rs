//! The self-hosted BNF shorthand grammar: parses a textual grammar
//! expression into the same `Symbol` graph a caller could have built
//! with `GrammarBuilder` by hand. Built with the engine's own public
//! builder API, so there is no separate hand-rolled recursive-descent
//! parser behind this.
//!
//! Grammar:
//! ```text
//! S        := (sym)+
//! sym      := repeat | optional | group | alt | name
//! repeat   := ({n?,m?})? '*' simple
//! optional := '?' simple
//! group    := '(' sym+ ')'
//! alt      := (simple '|')+ simple
//! simple   := group | name
//! ```
//! `name` matches `\w+`; numbers `\d+`; whitespace is omitted. Production
//! names below follow what each rule parses.

use std::rc::Rc;

use crate::error::EngineError;
use crate::grammar::{Grammar, GrammarBuilder};
use crate::lexer::LexerMode;
use crate::symbol::Symbol;
use crate::token::MatchPayload;
use crate::value::{Context, Value};

fn as_syms(v: &Value) -> Vec<Symbol> {
    v.as_list()
        .expect("repetition/sequence result must be a list")
        .iter()
        .map(|item| item.as_symbol().expect("bnf reducer chain only ever carries Value::Symbol").clone())
        .collect()
}

fn build_bnf_grammar() -> Result<Grammar, EngineError> {
    let mut b = GrammarBuilder::new();

    let number = b.token("number", r"\d+")?;
    let name = b.token_with_transform(
        "name",
        r"\w+",
        Rc::new(|payload: &MatchPayload, _ctx: &Context| match payload {
            MatchPayload::Raw(s) => Value::Symbol(Symbol::deferred(s)),
            MatchPayload::Groups(_) => unreachable!("\\w+ has no named groups"),
        }),
    )?;
    let lparen = b.token("lparen", r"\(")?;
    let rparen = b.token("rparen", r"\)")?;
    let lbrace = b.token("lbrace", r"\{")?;
    let rbrace = b.token("rbrace", r"\}")?;
    let comma = b.token("comma", r",")?;
    let qmark = b.token("qmark", r"\?")?;
    let star = b.token("star", r"\*")?;
    let bar = b.token("bar", r"\|")?;
    let ws = b.token("ws", r"[ \t\r\n]+")?;

    b.mode(LexerMode {
        name: "default".to_string(),
        // Order matters: `number` before `name` so a bare run of digits
        // is read as a count, not a symbol reference.
        accept: vec![
            number.clone(),
            name.clone(),
            lparen.clone(),
            rparen.clone(),
            lbrace.clone(),
            rbrace.clone(),
            comma.clone(),
            qmark.clone(),
            star.clone(),
            bar.clone(),
        ],
        omit: vec![ws],
        push_on: vec![],
        pop_on: None,
    });

    let sym_fwd = b.deferred("sym");

    // group := '(' sym+ ')'
    let group = Symbol::sequence(
        vec![Symbol::terminal(lparen), Symbol::one_or_more(sym_fwd.clone(), None), Symbol::terminal(rparen)],
        Some("group".to_string()),
    )
    .with_reducer(Rc::new(|v, _ctx| {
        let items = v.as_list().expect("group is a sequence");
        let inner = as_syms(&items[1]);
        Value::Symbol(Symbol::sequence(inner, None))
    }))?;

    // simple := group | name
    let simple = Symbol::alternation(vec![group.clone(), Symbol::terminal(name.clone())], Some("simple".to_string()));

    // from_to_part := '{' number? ',' number? '}' -> (from, to)
    let from_to_part = Symbol::sequence(
        vec![
            Symbol::terminal(lbrace),
            Symbol::optional(Symbol::terminal(number.clone()), None),
            Symbol::terminal(comma),
            Symbol::optional(Symbol::terminal(number.clone()), None),
            Symbol::terminal(rbrace),
        ],
        Some("from_to_part".to_string()),
    )
    .with_reducer(Rc::new(|v, _ctx| {
        let items = v.as_list().expect("from_to_part is a sequence");
        let lo = items[1].as_list().expect("optional is a list");
        let hi = items[3].as_list().expect("optional is a list");
        let from = lo.first().and_then(Value::as_number).unwrap_or(0.0) as usize;
        let to = hi.first().and_then(Value::as_number).map(|n| n as usize);
        Value::List(vec![Value::Number(from as f64), to.map(|t| Value::Number(t as f64)).unwrap_or(Value::Nil)])
    }))?;

    // repeat := ('{' n? ',' m? '}')? '*' simple
    let repeat = Symbol::sequence(
        vec![Symbol::optional(from_to_part, None), Symbol::terminal(star), simple.clone()],
        Some("repeat".to_string()),
    )
    .with_reducer(Rc::new(|v, _ctx| {
        let items = v.as_list().expect("repeat is a sequence");
        let prefix = items[0].as_list().expect("optional is a list");
        let (from, to) = match prefix.first() {
            Some(pair) => {
                let pair = pair.as_list().expect("from_to_part yields a 2-list");
                let from = pair[0].as_number().expect("from is a number") as usize;
                let to = match &pair[1] {
                    Value::Nil => None,
                    n => Some(n.as_number().expect("to is a number") as usize),
                };
                (from, to)
            }
            None => (0, None),
        };
        let inner = items[2].as_symbol().expect("simple yields a Symbol").clone();
        Value::Symbol(Symbol::repetition(inner, from, to, None))
    }))?;

    // optional := '?' simple
    let optional_rule = Symbol::sequence(vec![Symbol::terminal(qmark), simple.clone()], Some("optional".to_string()))
        .with_reducer(Rc::new(|v, _ctx| {
            let items = v.as_list().expect("optional is a sequence");
            let inner = items[1].as_symbol().expect("simple yields a Symbol").clone();
            Value::Symbol(Symbol::optional(inner, None))
        }))?;

    // alt := (simple '|')+ simple
    let simple_then_bar = Symbol::sequence(vec![simple.clone(), Symbol::terminal(bar)], None).with_reducer(Rc::new(
        |v, _ctx| {
            let items = v.as_list().expect("simple_then_bar is a sequence");
            items[0].clone()
        },
    ))?;
    let alt = Symbol::sequence(
        vec![Symbol::one_or_more(simple_then_bar, None), simple.clone()],
        Some("alt".to_string()),
    )
    .with_reducer(Rc::new(|v, _ctx| {
        let items = v.as_list().expect("alt is a sequence");
        let mut branches = as_syms(&items[0]);
        branches.push(items[1].as_symbol().expect("final simple yields a Symbol").clone());
        Value::Symbol(Symbol::alternation(branches, None))
    }))?;

    // sym := repeat | optional | group | alt | name
    let sym_def = Symbol::alternation(
        vec![repeat, optional_rule, group, alt, Symbol::terminal(name)],
        Some("sym".to_string()),
    );
    b.define("sym", sym_def)?;

    // S := sym+
    let start = Symbol::one_or_more(sym_fwd, Some("S".to_string())).with_reducer(Rc::new(|v, _ctx| {
        let mut syms = as_syms(&v);
        if syms.len() == 1 {
            Value::Symbol(syms.remove(0))
        } else {
            Value::Symbol(Symbol::sequence(syms, None))
        }
    }))?;

    b.build(start, "default")
}

thread_local! {
    // `Grammar` holds `Rc`-based state, so it cannot be `Sync`. A
    // thread-local cache lets each thread lex and parse its own BNF text
    // against its own copy, never sharing `Rc`s across threads.
    static BNF_GRAMMAR: Grammar = build_bnf_grammar().expect("the bnf shorthand grammar is internally well-formed");
}

/// Desugars a BNF shorthand string into a `Symbol` graph. Bare names
/// become `Deferred` placeholders; resolving them against the caller's
/// own grammar is the caller's job, exactly as for any other forward
/// reference.
pub fn parse(text: &str) -> Result<Symbol, EngineError> {
    BNF_GRAMMAR.with(|g| {
        let value = g.parse(text, &Context::new())?;
        Ok(value.as_symbol().expect("bnf grammar always yields Value::Symbol").clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;
    use std::collections::HashSet;

    #[test]
    fn single_name_is_a_deferred_reference() {
        let sym = parse("expr").unwrap();
        assert_eq!(sym.name(), "expr");
    }

    #[test]
    fn star_prefix_is_zero_or_more() {
        let sym = parse("*digit").unwrap();
        match &sym.0.kind {
            SymbolKind::Repetition { from, to, .. } => {
                assert_eq!(*from, 0);
                assert_eq!(*to, None);
            }
            _ => panic!("expected a repetition"),
        }
    }

    #[test]
    fn bounded_repeat_prefix() {
        let sym = parse("{2,4}*digit").unwrap();
        match &sym.0.kind {
            SymbolKind::Repetition { from, to, .. } => {
                assert_eq!(*from, 2);
                assert_eq!(*to, Some(4));
            }
            _ => panic!("expected a repetition"),
        }
    }

    #[test]
    fn upper_bound_only_repeat_prefix() {
        let sym = parse("{,4}*digit").unwrap();
        match &sym.0.kind {
            SymbolKind::Repetition { from, to, .. } => {
                assert_eq!(*from, 0);
                assert_eq!(*to, Some(4));
            }
            _ => panic!("expected a repetition"),
        }
    }

    #[test]
    fn question_mark_is_optional() {
        let sym = parse("?digit").unwrap();
        match &sym.0.kind {
            SymbolKind::Repetition { from, to, .. } => {
                assert_eq!(*from, 0);
                assert_eq!(*to, Some(1));
            }
            _ => panic!("expected an optional repetition"),
        }
    }

    #[test]
    fn group_is_a_sequence() {
        let sym = parse("(a b c)").unwrap();
        match &sym.0.kind {
            SymbolKind::Sequence(children) => {
                let names: Vec<_> = children.iter().map(|c| c.name()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            _ => panic!("expected a sequence"),
        }
    }

    #[test]
    fn bar_separated_names_are_an_alternation() {
        let sym = parse("a | b | c").unwrap();
        match &sym.0.kind {
            SymbolKind::Alternation(children) => {
                let names: Vec<_> = children.iter().map(|c| c.name()).collect();
                assert_eq!(names, vec!["a", "b", "c"]);
            }
            _ => panic!("expected an alternation"),
        }
    }

    #[test]
    fn consecutive_symbols_become_an_anonymous_sequence() {
        let sym = parse("a b").unwrap();
        match &sym.0.kind {
            SymbolKind::Sequence(children) => assert_eq!(children.len(), 2),
            _ => panic!("expected a sequence"),
        }
    }

    #[test]
    fn combinators_nest_inside_groups() {
        let sym = parse("(lp *expr rp)").unwrap();
        match &sym.0.kind {
            SymbolKind::Sequence(children) => {
                assert_eq!(children.len(), 3);
                assert!(matches!(children[1].0.kind, SymbolKind::Repetition { .. }));
            }
            _ => panic!("expected a sequence"),
        }
    }

    #[test]
    fn parsing_the_bnf_grammar_source_is_deterministic() {
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let sym = parse("( a | b )*expr").unwrap();
            seen.insert(sym.name());
        }
        assert_eq!(seen.len(), 1);
    }
}
