//! The grammar graph: terminals, sequences, alternations, repetitions,
//! and forward references, wired together into a possibly cyclic graph
//! of [`Symbol`] nodes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ConstructionError;
use crate::token::Token;
use crate::value::{Context, Value};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// `(children_results, context) -> value`, run post-order once a symbol's
/// state has completed.
pub type Reducer = Rc<dyn Fn(Value, &Context) -> Value>;

pub enum SymbolKind {
    Terminal(Rc<Token>),
    Sequence(Vec<Symbol>),
    Alternation(Vec<Symbol>),
    Repetition { inner: Box<Symbol>, from: usize, to: Option<usize> },
    /// A forward reference created by `GrammarBuilder::deferred`, filled in
    /// later by `GrammarBuilder::define`. Resolving through one of these
    /// must never recurse without a visited-set (the referenced graph may
    /// cycle back through this very placeholder).
    Deferred(RefCell<Option<Symbol>>),
}

pub struct SymbolData {
    id: u64,
    pub name: RefCell<String>,
    pub kind: SymbolKind,
    pub reducer: RefCell<Option<Reducer>>,
}

/// A node of the grammar graph. Cheap to clone (an `Rc` bump); equality
/// and hashing are by identity.
#[derive(Clone)]
pub struct Symbol(pub Rc<SymbolData>);

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl Symbol {
    fn new(kind: SymbolKind, name: Option<String>) -> Self {
        let id = NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed);
        let data = SymbolData {
            id,
            name: RefCell::new(name.unwrap_or_else(|| default_name(&kind, id))),
            kind,
            reducer: RefCell::new(None),
        };
        Symbol(Rc::new(data))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn name(&self) -> String {
        self.0.name.borrow().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.0.name.borrow_mut() = name.to_string();
    }

    pub fn terminal(token: Rc<Token>) -> Self {
        let name = token.name.clone();
        Symbol::new(SymbolKind::Terminal(token), Some(name))
    }

    pub fn sequence(symbols: Vec<Symbol>, name: Option<String>) -> Self {
        Symbol::new(SymbolKind::Sequence(symbols), name)
    }

    pub fn alternation(symbols: Vec<Symbol>, name: Option<String>) -> Self {
        Symbol::new(SymbolKind::Alternation(symbols), name)
    }

    pub fn repetition(inner: Symbol, from: usize, to: Option<usize>, name: Option<String>) -> Self {
        Symbol::new(SymbolKind::Repetition { inner: Box::new(inner), from, to }, name)
    }

    pub fn optional(inner: Symbol, name: Option<String>) -> Self {
        Symbol::repetition(inner, 0, Some(1), name)
    }

    pub fn zero_or_more(inner: Symbol, name: Option<String>) -> Self {
        Symbol::repetition(inner, 0, None, name)
    }

    pub fn one_or_more(inner: Symbol, name: Option<String>) -> Self {
        Symbol::repetition(inner, 1, None, name)
    }

    pub fn deferred(name: &str) -> Self {
        Symbol::new(SymbolKind::Deferred(RefCell::new(None)), Some(name.to_string()))
    }

    /// Attach a reducer. Errors if one is already set.
    pub fn with_reducer(self, reducer: Reducer) -> Result<Self, ConstructionError> {
        let mut slot = self.0.reducer.borrow_mut();
        if slot.is_some() {
            return Err(ConstructionError::DuplicateReducer(self.name()));
        }
        *slot = Some(reducer);
        drop(slot);
        Ok(self)
    }

    /// Follows a chain of `Deferred` placeholders to the real symbol they
    /// stand for. Only ever called at state-construction time, after
    /// `GrammarBuilder::build` has verified every placeholder is resolved.
    pub fn resolved(&self) -> Symbol {
        match &self.0.kind {
            SymbolKind::Deferred(slot) => {
                slot.borrow().as_ref().expect("resolved() called before build()").resolved()
            }
            _ => self.clone(),
        }
    }

    /// Fills in a `Deferred` placeholder named `name`, reachable anywhere
    /// in this symbol's subgraph, with `target`. Guards against infinite
    /// recursion on cyclic graphs with a visited-set.
    pub fn define(&self, name: &str, target: &Symbol, visited: &mut HashSet<u64>) {
        if !visited.insert(self.0.id) {
            return;
        }
        match &self.0.kind {
            SymbolKind::Deferred(slot) => {
                let mut slot = slot.borrow_mut();
                let matches = slot.as_ref().map(|s| s.name() == name).unwrap_or(*self.0.name.borrow() == name);
                if slot.is_none() && matches {
                    *slot = Some(target.clone());
                } else if let Some(inner) = slot.as_ref() {
                    let inner = inner.clone();
                    drop(slot);
                    inner.define(name, target, visited);
                }
            }
            SymbolKind::Sequence(children) | SymbolKind::Alternation(children) => {
                for child in children {
                    child.define(name, target, visited);
                }
            }
            SymbolKind::Repetition { inner, .. } => inner.define(name, target, visited),
            SymbolKind::Terminal(_) => {}
        }
    }

    /// Collects every reachable `Token`, deduplicated, walking through
    /// `Deferred` placeholders. Used by `GrammarBuilder::build` to check
    /// that every token a grammar actually needs is covered by a
    /// declared lexer mode.
    pub fn tokens(&self, visited: &mut HashSet<u64>, out: &mut Vec<Rc<Token>>) {
        if !visited.insert(self.0.id) {
            return;
        }
        match &self.0.kind {
            SymbolKind::Terminal(tok) => out.push(tok.clone()),
            SymbolKind::Sequence(children) | SymbolKind::Alternation(children) => {
                for child in children {
                    child.tokens(visited, out);
                }
            }
            SymbolKind::Repetition { inner, .. } => inner.tokens(visited, out),
            SymbolKind::Deferred(slot) => {
                if let Some(target) = slot.borrow().as_ref() {
                    target.tokens(visited, out);
                }
            }
        }
    }

    /// Checks every `Deferred` placeholder reachable from `self` has been
    /// resolved, collecting the names of any that have not.
    pub fn check_defined(&self, visited: &mut HashSet<u64>, missing: &mut Vec<String>) {
        if !visited.insert(self.0.id) {
            return;
        }
        match &self.0.kind {
            SymbolKind::Deferred(slot) => match slot.borrow().as_ref() {
                Some(target) => target.check_defined(visited, missing),
                None => missing.push(self.name()),
            },
            SymbolKind::Sequence(children) | SymbolKind::Alternation(children) => {
                for child in children {
                    child.check_defined(visited, missing);
                }
            }
            SymbolKind::Repetition { inner, .. } => inner.check_defined(visited, missing),
            SymbolKind::Terminal(_) => {}
        }
    }
}

fn default_name(kind: &SymbolKind, id: u64) -> String {
    let kind_name = match kind {
        SymbolKind::Terminal(_) => "terminal",
        SymbolKind::Sequence(_) => "sequence",
        SymbolKind::Alternation(_) => "alternation",
        SymbolKind::Repetition { .. } => "repetition",
        SymbolKind::Deferred(_) => "deferred",
    };
    format!("{kind_name}#{id}")
}
