//! Thin facade over the parse-state tree's own post-order evaluation.
//! The actual walk lives with each state kind in `state::state_result`,
//! since a sequence's reducer needs its children's results and a
//! repetition's needs to pick the longest branch, logic that belongs
//! next to the bookkeeping it reads. This module is the public entry
//! point a driver calls once parsing has produced a unique root
//! completion.

use crate::error::EngineError;
use crate::state::{root_result, StateRef};
use crate::value::{Context, Value};

/// Evaluates the unique valid root completion, threading `context`
/// unchanged into every reducer and transform along the way.
pub fn evaluate(root: &StateRef, context: &Context) -> Result<Value, EngineError> {
    root_result(root, context)
}
