mod state;

pub use state::{new_root_state, root_push_token, root_result, Local, StateNode, StateRef, MAX_CONSTRUCTION_DEPTH};
