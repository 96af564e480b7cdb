mod token;

pub use token::{MatchPayload, MatchRecord, Token, Transform};
