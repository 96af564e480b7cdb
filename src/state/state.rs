//! The parse-state tree: a mutating view over the grammar graph that
//! explores every viable parse breadth-first, one token at a time.
//!
//! Every node is an `Rc<RefCell<StateNode>>`; children point back to
//! their parent through a `Weak` reference so the tree can be dropped
//! without reference cycles. Mutation that happens while a node is mid
//! iteration over its own possibilities is queued (`added` / `removed`)
//! and only applied once the iteration finishes.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::EngineError;
use crate::symbol::{Symbol, SymbolKind};
use crate::token::{MatchRecord, Token};
use crate::value::{Context, Value};

static NEXT_STATE_ID: AtomicU64 = AtomicU64::new(1);

/// Construction recurses without consuming a token whenever a symbol
/// completes eagerly (an empty repetition, an empty-admitting chain)
/// and hands a freshly valid twin straight to its parent. A grammar that
/// can do this forever without ever needing input is declared infinite
/// rather than left to blow the native stack.
pub const MAX_CONSTRUCTION_DEPTH: usize = 512;

pub type StateRef = Rc<RefCell<StateNode>>;

/// Identifies one entry in a combinator's `results`/`positions` tables.
/// `Empty` is used exactly once per repetition: for the eagerly forked
/// "matched zero times" branch, which has no associated live child state.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Key {
    Child(u64),
    Empty,
}

fn key_of(state: &StateRef) -> Key {
    Key::Child(state.borrow().id)
}

/// Per-kind state carried by a [`StateNode`]: terminals track a single
/// expected token, the three combinators share a results table, and the
/// root tracks completed parses across the whole input.
pub enum Local {
    Terminal { expected: Rc<Token>, result: Option<MatchRecord> },
    /// Shared by Sequence, Alternation and Repetition: each grows a set of
    /// candidate branches, keyed by which child state started them.
    Combinator {
        results: Vec<(Key, Vec<StateRef>)>,
        positions: Vec<(Key, usize)>,
        currently_works_on: Option<StateRef>,
    },
    Root { valid: Vec<StateRef>, last_tokens: Vec<String> },
}

impl Local {
    fn combinator() -> Self {
        Local::Combinator { results: Vec::new(), positions: Vec::new(), currently_works_on: None }
    }
}

pub struct StateNode {
    id: u64,
    pub symbol: Symbol,
    parent: Option<Weak<RefCell<StateNode>>>,
    possibilities: Vec<StateRef>,
    added: Vec<StateRef>,
    removed: Vec<u64>,
    iterating: bool,
    pub local: Local,
}

impl StateNode {
    pub fn id(&self) -> u64 {
        self.id
    }
}

fn alloc(symbol: Symbol, parent: Option<&StateRef>, local: Local) -> StateRef {
    Rc::new(RefCell::new(StateNode {
        id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
        symbol,
        parent: parent.map(Rc::downgrade),
        possibilities: Vec::new(),
        added: Vec::new(),
        removed: Vec::new(),
        iterating: false,
        local,
    }))
}

/// Builds the state tree for `symbol`, parented under `parent`. `parent`
/// must already be attached to the tree (it is used both to resolve the
/// eager-empty-fork target and to detect runaway recursion).
pub fn new_state(symbol: &Symbol, parent: &StateRef, depth: usize) -> Result<StateRef, EngineError> {
    if depth > MAX_CONSTRUCTION_DEPTH {
        return Err(EngineError::InfiniteStateExpansion { symbol: symbol.name() });
    }
    let resolved = symbol.resolved();
    match &resolved.0.kind {
        SymbolKind::Terminal(token) => {
            let local = Local::Terminal { expected: token.clone(), result: None };
            Ok(alloc(symbol.clone(), Some(parent), local))
        }
        SymbolKind::Sequence(_) | SymbolKind::Alternation(_) | SymbolKind::Repetition { .. } => {
            new_combinator_state(symbol.clone(), parent, true, depth)
        }
        SymbolKind::Deferred(_) => unreachable!("resolved() never returns a Deferred"),
    }
}

fn new_combinator_state(
    symbol: Symbol,
    parent: &StateRef,
    with_initial: bool,
    depth: usize,
) -> Result<StateRef, EngineError> {
    let state_ref = alloc(symbol.clone(), Some(parent), Local::combinator());

    if with_initial {
        match &symbol.resolved().0.kind {
            SymbolKind::Sequence(children) => {
                let first = new_state(&children[0], &state_ref, depth + 1)?;
                combinator_attach(&state_ref, first, false);
            }
            SymbolKind::Alternation(children) => {
                for child_symbol in children {
                    let child = new_state(child_symbol, &state_ref, depth + 1)?;
                    combinator_attach(&state_ref, child, false);
                }
            }
            SymbolKind::Repetition { inner, from, .. } => {
                let first = new_state(inner, &state_ref, depth + 1)?;
                combinator_attach(&state_ref, first, false);
                maybe_bootstrap_empty_repetition(&state_ref, parent, *from, depth)?;
            }
            SymbolKind::Terminal(_) | SymbolKind::Deferred(_) => unreachable!(),
        }
    }

    Ok(state_ref)
}

/// Spec.md §4.4's "eager empty-repetition fork": a repetition with
/// `from == 0` is a valid zero-length match the instant it is built, with
/// no token required. We hand a minimal twin straight to our own parent,
/// exactly as if it had matched zero times already.
fn maybe_bootstrap_empty_repetition(
    state_ref: &StateRef,
    parent: &StateRef,
    from: usize,
    depth: usize,
) -> Result<(), EngineError> {
    let is_eligible = {
        let s = state_ref.borrow();
        match &s.local {
            Local::Combinator { results, .. } => {
                from == 0 && results.len() == 1 && results[0].1.is_empty()
            }
            _ => false,
        }
    };
    if !is_eligible {
        return Ok(());
    }
    let symbol = state_ref.borrow().symbol.clone();
    let empty_copy = new_combinator_state(symbol, parent, false, depth)?;
    {
        let mut c = empty_copy.borrow_mut();
        if let Local::Combinator { results, positions, .. } = &mut c.local {
            results.push((Key::Empty, Vec::new()));
            positions.push((Key::Empty, 0));
        }
    }
    add_possibility(parent, empty_copy.clone());
    make_valid(&empty_copy, depth + 1)
}

/// Attaches `child` as a possibility of a combinator state, queuing the
/// attachment if `now` is false and an iteration is in progress, and
/// seeding `child`'s results/position entry from whichever branch the
/// parent is currently iterating.
fn combinator_attach(state_ref: &StateRef, child: StateRef, now: bool) {
    let key = key_of(&child);
    {
        let mut s = state_ref.borrow_mut();
        if now || !s.iterating {
            s.possibilities.push(child.clone());
        } else {
            s.added.push(child.clone());
        }
    }
    copy_entry_for(state_ref, key);
}

fn copy_entry_for(state_ref: &StateRef, key: Key) {
    let mut s = state_ref.borrow_mut();
    let Local::Combinator { results, positions, currently_works_on } = &mut s.local else {
        return;
    };
    match currently_works_on {
        None => {
            results.push((key, Vec::new()));
            positions.push((key, 0));
        }
        Some(cur) => {
            let cur_key = key_of(cur);
            let cur_results = results.iter().find(|(k, _)| *k == cur_key).map(|(_, v)| v.clone()).unwrap_or_default();
            let cur_pos = positions.iter().find(|(k, _)| *k == cur_key).map(|(_, v)| *v).unwrap_or(0);
            results.push((key, cur_results));
            positions.push((key, cur_pos));
        }
    }
}

fn add_possibility(state_ref: &StateRef, child: StateRef) {
    let is_combinator = matches!(state_ref.borrow().local, Local::Combinator { .. });
    if is_combinator {
        return combinator_attach(state_ref, child, false);
    }
    let mut s = state_ref.borrow_mut();
    if s.iterating {
        s.added.push(child);
    } else {
        s.possibilities.push(child);
    }
}

fn add_possibility_now(state_ref: &StateRef, child: StateRef) {
    let is_combinator = matches!(state_ref.borrow().local, Local::Combinator { .. });
    if is_combinator {
        return combinator_attach(state_ref, child, true);
    }
    state_ref.borrow_mut().possibilities.push(child);
}

fn remove_possibility(state_ref: &StateRef, child: &StateRef) {
    let id = child.borrow().id;
    {
        let mut s = state_ref.borrow_mut();
        if s.iterating {
            s.removed.push(id);
        } else {
            s.possibilities.retain(|c| c.borrow().id != id);
        }
    }
    let key = Key::Child(id);
    let mut s = state_ref.borrow_mut();
    if let Local::Combinator { results, positions, .. } = &mut s.local {
        results.retain(|(k, _)| *k != key);
        positions.retain(|(k, _)| *k != key);
    }
}

fn get_entry<'a>(results: &'a [(Key, Vec<StateRef>)], key: Key) -> &'a Vec<StateRef> {
    &results.iter().find(|(k, _)| *k == key).expect("entry must exist for a tracked key").1
}

fn get_position(positions: &[(Key, usize)], key: Key) -> usize {
    positions.iter().find(|(k, _)| *k == key).map(|(_, v)| *v).unwrap_or(0)
}

/// Pushes `token` through the parse-state tree rooted at `state_ref`.
pub fn push_token(state_ref: &StateRef, token: &MatchRecord) -> Result<(), EngineError> {
    let is_terminal = matches!(state_ref.borrow().local, Local::Terminal { .. });
    if is_terminal {
        push_token_terminal(state_ref, token)
    } else {
        push_token_possibilities(state_ref, token)
    }
}

fn push_token_terminal(state_ref: &StateRef, token: &MatchRecord) -> Result<(), EngineError> {
    let expected = match &state_ref.borrow().local {
        Local::Terminal { expected, .. } => expected.clone(),
        _ => unreachable!(),
    };
    if token.token_matches(&expected) {
        if let Local::Terminal { result, .. } = &mut state_ref.borrow_mut().local {
            *result = Some(token.clone());
        }
        make_valid(state_ref, 0)
    } else {
        make_invalid(state_ref)
    }
}

/// The generic "iterate live possibilities with an index cursor" loop
/// shared by Sequence, Alternation, Repetition and the root state. The
/// cursor walks `possibilities` directly (not a snapshot), so an
/// `add_possibility_now` performed by a child mid-pass is visible before
/// this loop ends, while a plain `add_possibility` only lands for the
/// next token.
fn push_token_possibilities(state_ref: &StateRef, token: &MatchRecord) -> Result<(), EngineError> {
    let is_root = matches!(state_ref.borrow().local, Local::Root { .. });
    if is_root {
        if let Local::Root { valid, .. } = &mut state_ref.borrow_mut().local {
            valid.clear();
        }
        let is_empty = state_ref.borrow().possibilities.is_empty();
        if is_empty {
            let expected = match &state_ref.borrow().local {
                Local::Root { last_tokens, .. } => last_tokens.clone(),
                _ => unreachable!(),
            };
            return Err(EngineError::StatesExhausted { expected });
        }
        let mut leaves = Vec::new();
        collect_leaf_names(state_ref, &mut leaves);
        if let Local::Root { last_tokens, .. } = &mut state_ref.borrow_mut().local {
            *last_tokens = leaves;
        }
    }

    state_ref.borrow_mut().iterating = true;

    let mut idx = 0;
    loop {
        let child = {
            let s = state_ref.borrow();
            s.possibilities.get(idx).cloned()
        };
        let Some(child) = child else { break };
        let skip = state_ref.borrow().removed.contains(&child.borrow().id);
        if !skip {
            push_token(&child, token)?;
        }
        idx += 1;
    }

    {
        let mut s = state_ref.borrow_mut();
        s.iterating = false;
        let added = std::mem::take(&mut s.added);
        s.possibilities.extend(added);
        let removed = std::mem::take(&mut s.removed);
        if !removed.is_empty() {
            s.possibilities.retain(|c| !removed.contains(&c.borrow().id));
        }
    }

    let is_invalid = {
        let s = state_ref.borrow();
        match &s.local {
            Local::Root { valid, .. } => s.possibilities.is_empty() && valid.is_empty(),
            Local::Combinator { .. } => s.possibilities.is_empty(),
            Local::Terminal { .. } => unreachable!(),
        }
    };
    if is_invalid {
        make_invalid(state_ref)?;
    }
    Ok(())
}

fn collect_leaf_names(state_ref: &StateRef, out: &mut Vec<String>) {
    let possibilities = state_ref.borrow().possibilities.clone();
    for p in possibilities {
        match &p.borrow().local {
            Local::Terminal { expected, .. } => out.push(expected.name.clone()),
            _ => collect_leaf_names(&p, out),
        }
    }
}

fn make_valid(state_ref: &StateRef, depth: usize) -> Result<(), EngineError> {
    let parent = state_ref.borrow().parent.clone().and_then(|w| w.upgrade());
    match parent {
        Some(parent) => set_valid_possibility(&parent, state_ref, depth),
        None => Ok(()),
    }
}

fn make_invalid(state_ref: &StateRef) -> Result<(), EngineError> {
    let parent = state_ref.borrow().parent.clone().and_then(|w| w.upgrade());
    match parent {
        Some(parent) => set_invalid_possibility(&parent, state_ref),
        None => {
            let expected = match &state_ref.borrow().local {
                Local::Root { last_tokens, .. } => last_tokens.clone(),
                _ => Vec::new(),
            };
            Err(EngineError::StatesExhausted { expected })
        }
    }
}

fn set_invalid_possibility(parent_ref: &StateRef, child_ref: &StateRef) -> Result<(), EngineError> {
    remove_possibility(parent_ref, child_ref);
    let now_empty = parent_ref.borrow().possibilities.is_empty();
    if now_empty {
        make_invalid(parent_ref)?;
    }
    Ok(())
}

fn set_valid_possibility(parent_ref: &StateRef, child_ref: &StateRef, depth: usize) -> Result<(), EngineError> {
    let is_root = matches!(parent_ref.borrow().local, Local::Root { .. });
    if is_root {
        if let Local::Root { valid, .. } = &mut parent_ref.borrow_mut().local {
            valid.push(child_ref.clone());
        }
        remove_possibility(parent_ref, child_ref);
        return Ok(());
    }

    let kind_is_repetition = matches!(parent_ref.borrow().symbol.resolved().0.kind, SymbolKind::Repetition { .. });
    let kind_is_sequence = matches!(parent_ref.borrow().symbol.resolved().0.kind, SymbolKind::Sequence(_));

    let key = key_of(child_ref);
    {
        let mut p = parent_ref.borrow_mut();
        if let Local::Combinator { results, positions, .. } = &mut p.local {
            let entry = results.iter_mut().find(|(k, _)| *k == key).expect("entry must exist");
            entry.1.push(child_ref.clone());
            if kind_is_sequence {
                let pos = positions.iter_mut().find(|(k, _)| *k == key).expect("position must exist");
                pos.1 += 1;
            }
        }
    }

    if kind_is_sequence {
        let (count, total) = {
            let p = parent_ref.borrow();
            let total = match &p.symbol.resolved().0.kind {
                SymbolKind::Sequence(children) => children.len(),
                _ => unreachable!(),
            };
            let count = match &p.local {
                Local::Combinator { positions, .. } => get_position(positions, key),
                _ => unreachable!(),
            };
            (count, total)
        };
        if count == total {
            let copy = fork(parent_ref, child_ref, depth)?;
            make_valid(&copy, depth + 1)
        } else {
            create_next_sequence_state(parent_ref, child_ref, depth)?;
            remove_possibility(parent_ref, child_ref);
            Ok(())
        }
    } else if kind_is_repetition {
        let (len, from, to) = {
            let p = parent_ref.borrow();
            let (from, to) = match &p.symbol.resolved().0.kind {
                SymbolKind::Repetition { from, to, .. } => (*from, *to),
                _ => unreachable!(),
            };
            let len = match &p.local {
                Local::Combinator { results, .. } => get_entry(results, key).len(),
                _ => unreachable!(),
            };
            (len, from, to)
        };
        if to.map(|t| len < t).unwrap_or(true) {
            create_next_repetition_state(parent_ref, child_ref, depth)?;
        }
        if len >= from {
            let copy = fork(parent_ref, child_ref, depth)?;
            make_valid(&copy, depth + 1)
        } else {
            remove_possibility(parent_ref, child_ref);
            Ok(())
        }
    } else {
        // Alternation: any completing child immediately forks a result.
        let copy = fork(parent_ref, child_ref, depth)?;
        make_valid(&copy, depth + 1)?;
        remove_possibility(parent_ref, child_ref);
        Ok(())
    }
}

/// Decides whether the next chain position should be evaluated against
/// the *current* token (`add_possibility_now`) or deferred to the next
/// one (`add_possibility`): a state constructed "ahead of" the branch
/// currently being processed gets the deferred treatment, one
/// constructed "behind or at" it gets evaluated immediately.
fn decide_and_attach(parent_ref: &StateRef, validated_child: &StateRef, next_state: StateRef) {
    let cur_works_on = match &parent_ref.borrow().local {
        Local::Combinator { currently_works_on, .. } => currently_works_on.clone(),
        _ => None,
    };
    let possibilities = parent_ref.borrow().possibilities.clone();
    let child_idx = possibilities.iter().position(|c| Rc::ptr_eq(c, validated_child));
    let defer = match (&child_idx, &cur_works_on) {
        (None, _) => true,
        (_, None) => true,
        (Some(ci), Some(cur)) => {
            let cur_idx = possibilities.iter().position(|c| Rc::ptr_eq(c, cur));
            match cur_idx {
                Some(cur_idx) => *ci <= cur_idx,
                None => true,
            }
        }
    };
    if defer {
        add_possibility(parent_ref, next_state);
    } else {
        add_possibility_now(parent_ref, next_state);
    }
}

fn with_currently_works_on<T>(parent_ref: &StateRef, child: &StateRef, f: impl FnOnce() -> T) -> T {
    let previous = match &parent_ref.borrow().local {
        Local::Combinator { currently_works_on, .. } => currently_works_on.clone(),
        _ => None,
    };
    if let Local::Combinator { currently_works_on, .. } = &mut parent_ref.borrow_mut().local {
        *currently_works_on = Some(child.clone());
    }
    let result = f();
    if let Local::Combinator { currently_works_on, .. } = &mut parent_ref.borrow_mut().local {
        *currently_works_on = previous;
    }
    result
}

fn create_next_sequence_state(parent_ref: &StateRef, child_ref: &StateRef, depth: usize) -> Result<(), EngineError> {
    let key = key_of(child_ref);
    let next_symbol = {
        let p = parent_ref.borrow();
        let pos = match &p.local {
            Local::Combinator { positions, .. } => get_position(positions, key),
            _ => unreachable!(),
        };
        match &p.symbol.resolved().0.kind {
            SymbolKind::Sequence(children) => children[pos].clone(),
            _ => unreachable!(),
        }
    };
    with_currently_works_on(parent_ref, child_ref, || -> Result<(), EngineError> {
        let next_state = new_state(&next_symbol, parent_ref, depth + 1)?;
        decide_and_attach(parent_ref, child_ref, next_state);
        Ok(())
    })
}

fn create_next_repetition_state(parent_ref: &StateRef, child_ref: &StateRef, depth: usize) -> Result<(), EngineError> {
    let inner_symbol = match &parent_ref.borrow().symbol.resolved().0.kind {
        SymbolKind::Repetition { inner, .. } => (**inner).clone(),
        _ => unreachable!(),
    };
    with_currently_works_on(parent_ref, child_ref, || -> Result<(), EngineError> {
        let next_state = new_state(&inner_symbol, parent_ref, depth + 1)?;
        decide_and_attach(parent_ref, child_ref, next_state);
        Ok(())
    })
}

/// Spawns a minimal twin of `parent_ref` carrying only `valid_child`'s
/// accumulated results, and hands it to `parent_ref`'s own parent as a
/// newly completed alternative, while `parent_ref` keeps exploring any
/// other still-live possibilities.
fn fork(parent_ref: &StateRef, valid_child: &StateRef, depth: usize) -> Result<StateRef, EngineError> {
    let key = key_of(valid_child);
    let symbol = parent_ref.borrow().symbol.clone();
    let grandparent = parent_ref
        .borrow()
        .parent
        .clone()
        .and_then(|w| w.upgrade())
        .expect("a combinator state always has a parent");

    let copy = new_combinator_state(symbol, &grandparent, false, depth)?;

    let (results_entry, position_entry) = {
        let p = parent_ref.borrow();
        match &p.local {
            Local::Combinator { results, positions, .. } => {
                let r = results.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone()).unwrap_or_default();
                let pos = get_position(positions, key);
                (r, pos)
            }
            _ => unreachable!(),
        }
    };
    {
        let mut c = copy.borrow_mut();
        if let Local::Combinator { results, positions, .. } = &mut c.local {
            results.push((key, results_entry));
            positions.push((key, position_entry));
        }
    }

    remove_possibility(parent_ref, valid_child);
    add_possibility(&grandparent, copy.clone());

    Ok(copy)
}

/// Evaluates the post-order reducer chain for a completed state.
pub fn state_result(state_ref: &StateRef, context: &Context) -> Result<Value, EngineError> {
    let is_terminal = matches!(state_ref.borrow().local, Local::Terminal { .. });
    if is_terminal {
        terminal_result(state_ref, context)
    } else {
        combinator_result(state_ref, context)
    }
}

fn terminal_result(state_ref: &StateRef, context: &Context) -> Result<Value, EngineError> {
    let (symbol, record) = {
        let s = state_ref.borrow();
        let record = match &s.local {
            Local::Terminal { result, .. } => result.clone(),
            _ => unreachable!(),
        };
        (s.symbol.clone(), record)
    };
    let record = record.expect("terminal state completed without a recorded match");
    apply_reducer(&symbol, record.value.clone(), context)
}

fn combinator_result(state_ref: &StateRef, context: &Context) -> Result<Value, EngineError> {
    let (symbol, results) = {
        let s = state_ref.borrow();
        let results = match &s.local {
            Local::Combinator { results, .. } => results.clone(),
            _ => unreachable!(),
        };
        (s.symbol.clone(), results)
    };

    match &symbol.resolved().0.kind {
        SymbolKind::Sequence(children) => {
            let matches: Vec<_> = results.iter().filter(|(_, v)| v.len() == children.len()).collect();
            if matches.is_empty() {
                return Err(EngineError::NotCompleted);
            }
            if matches.len() > 1 {
                return Err(EngineError::Ambiguous);
            }
            let mut items = Vec::with_capacity(matches[0].1.len());
            for child in &matches[0].1 {
                items.push(state_result(child, context)?);
            }
            apply_reducer(&symbol, Value::List(items), context)
        }
        SymbolKind::Repetition { from, to, .. } => {
            let matches: Vec<_> = results
                .iter()
                .filter(|(_, v)| v.len() >= *from && to.map(|t| v.len() <= t).unwrap_or(true))
                .collect();
            if matches.is_empty() {
                return Err(EngineError::NotCompleted);
            }
            let mut best = matches[0];
            for m in &matches[1..] {
                if m.1.len() > best.1.len() {
                    best = m;
                }
            }
            let mut items = Vec::with_capacity(best.1.len());
            for child in &best.1 {
                items.push(state_result(child, context)?);
            }
            apply_reducer(&symbol, Value::List(items), context)
        }
        SymbolKind::Alternation(_) => {
            let matches: Vec<_> = results.iter().filter(|(_, v)| v.len() == 1).collect();
            if matches.is_empty() {
                return Err(EngineError::NotCompleted);
            }
            if matches.len() > 1 {
                return Err(EngineError::Ambiguous);
            }
            let value = state_result(&matches[0].1[0], context)?;
            apply_reducer(&symbol, value, context)
        }
        SymbolKind::Terminal(_) | SymbolKind::Deferred(_) => unreachable!(),
    }
}

fn apply_reducer(symbol: &Symbol, value: Value, context: &Context) -> Result<Value, EngineError> {
    let reducer = symbol.0.reducer.borrow().clone();
    Ok(match reducer {
        Some(r) => r(value, context),
        None => value,
    })
}

/// Constructs the root of a parse-state tree for `start`, including any
/// eager zero-token completions that immediately cascade up from it.
pub fn new_root_state(start: &Symbol) -> Result<StateRef, EngineError> {
    let root = Rc::new(RefCell::new(StateNode {
        id: NEXT_STATE_ID.fetch_add(1, Ordering::Relaxed),
        symbol: start.clone(),
        parent: None,
        possibilities: Vec::new(),
        added: Vec::new(),
        removed: Vec::new(),
        iterating: false,
        local: Local::Root { valid: Vec::new(), last_tokens: Vec::new() },
    }));
    let first = new_state(start, &root, 0)?;
    root.borrow_mut().possibilities.push(first);
    Ok(root)
}

/// Feeds one token to a parse-state tree built by [`new_root_state`].
pub fn root_push_token(root: &StateRef, token: &MatchRecord) -> Result<(), EngineError> {
    push_token_possibilities(root, token)
}

/// Returns the single unambiguous completed result, or the matching
/// error if none or more than one completion survived.
pub fn root_result(root: &StateRef, context: &Context) -> Result<Value, EngineError> {
    let valid = match &root.borrow().local {
        Local::Root { valid, .. } => valid.clone(),
        _ => unreachable!(),
    };
    if valid.is_empty() {
        return Err(EngineError::NotCompleted);
    }
    if valid.len() > 1 {
        return Err(EngineError::Ambiguous);
    }
    state_result(&valid[0], context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn ctx() -> Context {
        Context::new()
    }

    #[test]
    fn terminal_matches_and_completes() {
        let number = Token::new("number", r"\d+").unwrap();
        let sym = Symbol::terminal(number.clone());
        let root = new_root_state(&sym).unwrap();

        let record = MatchRecord { token: number, raw_text: "42".into(), value: Value::String("42".into()), start: 0, end: 2 };
        root_push_token(&root, &record).unwrap();

        let result = root_result(&root, &ctx()).unwrap();
        assert_eq!(result, Value::String("42".into()));
    }

    #[test]
    fn sequence_requires_every_child() {
        let a = Token::new("a", "a").unwrap();
        let b = Token::new("b", "b").unwrap();
        let seq = Symbol::sequence(vec![Symbol::terminal(a.clone()), Symbol::terminal(b.clone())], None);
        let root = new_root_state(&seq).unwrap();

        let rec_a = MatchRecord { token: a, raw_text: "a".into(), value: Value::String("a".into()), start: 0, end: 1 };
        let rec_b = MatchRecord { token: b, raw_text: "b".into(), value: Value::String("b".into()), start: 1, end: 2 };

        root_push_token(&root, &rec_a).unwrap();
        root_push_token(&root, &rec_b).unwrap();

        let result = root_result(&root, &ctx()).unwrap();
        assert_eq!(result, Value::List(vec![Value::String("a".into()), Value::String("b".into())]));
    }

    #[test]
    fn exhausted_states_report_expected_tokens() {
        let a = Token::new("a", "a").unwrap();
        let sym = Symbol::terminal(a.clone());
        let root = new_root_state(&sym).unwrap();
        let b = Token::new("b", "b").unwrap();
        let rec_b = MatchRecord { token: b, raw_text: "b".into(), value: Value::Nil, start: 0, end: 1 };

        let err = root_push_token(&root, &rec_b).unwrap_err();
        match err {
            EngineError::StatesExhausted { expected } => assert_eq!(expected, vec!["a".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn zero_repetition_completes_without_any_token() {
        let a = Token::new("a", "a").unwrap();
        let rep = Symbol::zero_or_more(Symbol::terminal(a), None);
        let root = new_root_state(&rep).unwrap();
        let result = root_result(&root, &ctx()).unwrap();
        assert_eq!(result, Value::List(vec![]));
    }

    #[test]
    fn alternation_picks_the_matching_branch() {
        let a = Token::new("a", "a").unwrap();
        let b = Token::new("b", "b").unwrap();
        let alt = Symbol::alternation(vec![Symbol::terminal(a), Symbol::terminal(b.clone())], None);
        let root = new_root_state(&alt).unwrap();

        let rec_b = MatchRecord { token: b, raw_text: "b".into(), value: Value::String("b".into()), start: 0, end: 1 };
        root_push_token(&root, &rec_b).unwrap();

        let result = root_result(&root, &ctx()).unwrap();
        assert_eq!(result, Value::String("b".into()));
    }

    #[test]
    fn mutually_recursive_empty_repetitions_are_caught() {
        let placeholder = Symbol::deferred("loop");
        let rep = Symbol::zero_or_more(placeholder.clone(), Some("loop".to_string()));
        let mut visited = std::collections::HashSet::new();
        placeholder.define("loop", &rep, &mut visited);

        let fake_parent = new_root_state(&Symbol::terminal(Token::new("x", "x").unwrap())).unwrap();
        let err = new_state(&rep, &fake_parent, 0).unwrap_err();
        assert!(matches!(err, EngineError::InfiniteStateExpansion { .. }));
    }
}
