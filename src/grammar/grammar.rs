//! Ties tokens, the grammar graph and the lexer together into something
//! that can actually parse text, and exposes the builder surface a
//! caller declares a grammar through.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::error::{ConstructionError, EngineError};
use crate::evaluator::evaluate;
use crate::lexer::{Lexer, LexerMode};
use crate::state::{new_root_state, root_push_token};
use crate::symbol::Symbol;
use crate::token::{Token, Transform};
use crate::value::{Context, Value};

/// Accumulates tokens, symbols and lexer modes before they are frozen
/// into a [`Grammar`], as an explicit builder rather than reflective
/// attribute introspection.
#[derive(Default)]
pub struct GrammarBuilder {
    placeholders: HashMap<String, Symbol>,
    modes: Vec<Rc<LexerMode>>,
    mode_by_name: HashMap<String, Rc<LexerMode>>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder::default()
    }

    pub fn token(&self, name: &str, pattern: &str) -> Result<Rc<Token>, EngineError> {
        Token::new(name, pattern)
    }

    pub fn token_with_transform(
        &self,
        name: &str,
        pattern: &str,
        transform: Transform,
    ) -> Result<Rc<Token>, EngineError> {
        Token::with_transform(name, pattern, transform)
    }

    /// Registers a forward reference, to be filled in later by
    /// [`GrammarBuilder::define`]. Lets grammars with cycles (a rule that
    /// refers to itself, directly or through others) be declared before
    /// every symbol they depend on exists yet.
    pub fn deferred(&mut self, name: &str) -> Symbol {
        let sym = Symbol::deferred(name);
        self.placeholders.insert(name.to_string(), sym.clone());
        sym
    }

    pub fn define(&mut self, name: &str, target: Symbol) -> Result<(), EngineError> {
        let placeholder = self
            .placeholders
            .get(name)
            .cloned()
            .ok_or_else(|| ConstructionError::UndefinedSymbol(name.to_string()))?;
        let mut visited = HashSet::new();
        placeholder.define(name, &target, &mut visited);
        Ok(())
    }

    /// Desugars a BNF shorthand string into a combinator tree without
    /// binding it to a name, useful for inline rule bodies such as an
    /// alternation branch written as text.
    pub fn bnf(&self, text: &str) -> Result<Symbol, EngineError> {
        crate::bnf::parse(text)
    }

    /// Defines a named symbol whose body is a BNF shorthand string rather
    /// than a hand-built combinator tree.
    pub fn define_bnf(&mut self, name: &str, text: &str) -> Result<(), EngineError> {
        let target = self.bnf(text)?;
        target.set_name(name);
        self.define(name, target)
    }

    pub fn mode(&mut self, mode: LexerMode) -> Rc<LexerMode> {
        let mode = Rc::new(mode);
        self.mode_by_name.insert(mode.name.clone(), mode.clone());
        self.modes.push(mode.clone());
        mode
    }

    /// Freezes the declaration into a [`Grammar`]. Fails if any
    /// `deferred` placeholder reachable from `start` was never `define`d,
    /// if `start_mode` names no registered lexer mode, or if a terminal
    /// reachable from `start` is never accepted or omitted by any
    /// declared mode.
    pub fn build(self, start: Symbol, start_mode: &str) -> Result<Grammar, EngineError> {
        let mut missing = Vec::new();
        let mut visited = HashSet::new();
        start.check_defined(&mut visited, &mut missing);
        if let Some(name) = missing.into_iter().next() {
            return Err(ConstructionError::UndefinedSymbol(name).into());
        }

        let start_mode = self
            .mode_by_name
            .get(start_mode)
            .cloned()
            .ok_or_else(|| ConstructionError::UnknownStartMode(start_mode.to_string()))?;

        let mut reachable = Vec::new();
        let mut visited = HashSet::new();
        start.tokens(&mut visited, &mut reachable);
        let declared: HashSet<u64> = self
            .modes
            .iter()
            .flat_map(|m| m.accept.iter().chain(m.omit.iter()))
            .map(|t| t.id())
            .collect();
        if let Some(tok) = reachable.iter().find(|t| !declared.contains(&t.id())) {
            return Err(ConstructionError::UndeclaredToken(tok.name.clone()).into());
        }

        let lexer = Lexer::new(self.modes, start_mode);
        Ok(Grammar { start, lexer })
    }
}

/// A fully declared grammar: a lexer plus a start symbol, ready to drive
/// a parse-state tree over arbitrary text.
pub struct Grammar {
    start: Symbol,
    lexer: Lexer,
}

impl Grammar {
    pub fn lexer(&self) -> &Lexer {
        &self.lexer
    }

    /// Lexes `text`, then drives a fresh parse-state tree one token at a
    /// time, returning the single unambiguous reduced result.
    pub fn parse(&self, text: &str, context: &Context) -> Result<Value, EngineError> {
        let tokens = self.lexer.lex(text, context)?;
        log::debug!("grammar: lexed {} tokens", tokens.len());

        let root = new_root_state(&self.start)?;
        for tok in &tokens {
            log::trace!("grammar: pushing token {} ('{}')", tok.token.name, tok.raw_text);
            root_push_token(&root, tok)?;
        }
        evaluate(&root, context)
    }
}
