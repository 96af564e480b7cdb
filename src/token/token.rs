//! Terminal grammar elements: a compiled regex plus an optional value
//! transform.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

use crate::error::{ConstructionError, EngineError};
use crate::value::{Context, Value};

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// A token's value before any `transform` has run: either the whole
/// matched substring, or, when the pattern has named capture groups, a
/// mapping of group name to captured substring.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchPayload {
    Raw(String),
    Groups(HashMap<String, String>),
}

impl MatchPayload {
    fn into_value(self) -> Value {
        match self {
            MatchPayload::Raw(s) => Value::String(s),
            MatchPayload::Groups(groups) => {
                Value::Map(groups.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
            }
        }
    }
}

/// `(matched_value, context) -> value`, applied after a token matches.
pub type Transform = Rc<dyn Fn(&MatchPayload, &Context) -> Value>;

/// A terminal grammar element. Equal by identity.
pub struct Token {
    id: u64,
    pub name: String,
    pattern: String,
    regex: Regex,
    transform: Option<Transform>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("name", &self.name).field("pattern", &self.pattern).finish()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Token {
    pub fn new(name: &str, pattern: &str) -> Result<Rc<Token>, EngineError> {
        Self::build(name, pattern, None)
    }

    pub fn with_transform(
        name: &str,
        pattern: &str,
        transform: Transform,
    ) -> Result<Rc<Token>, EngineError> {
        Self::build(name, pattern, Some(transform))
    }

    fn build(name: &str, pattern: &str, transform: Option<Transform>) -> Result<Rc<Token>, EngineError> {
        // Anchor every match at the start of whatever slice we hand the
        // regex, so a match attempt at `pos` never reads past it or
        // back before it.
        let anchored = format!(r"\A(?:{pattern})");
        let regex = Regex::new(&anchored).map_err(|e| ConstructionError::InvalidPattern {
            token: name.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Rc::new(Token {
            id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            pattern: pattern.to_string(),
            regex,
            transform,
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Attempts a raw, untransformed match anchored at `pos`. Used by the
    /// lexer for both `omit` and `accept` tables; `accept` matches are
    /// turned into a full `MatchRecord` afterwards via `to_match_record`.
    pub fn try_match(&self, text: &str, pos: usize) -> Result<Option<(usize, usize, MatchPayload)>, EngineError> {
        let Some(m) = self.regex.captures(&text[pos..]) else {
            return Ok(None);
        };
        let whole = m.get(0).expect("group 0 always matches if captures succeeded");
        if whole.end() == 0 {
            return Err(ConstructionError::ZeroLengthToken(self.name.clone()).into());
        }
        let start = pos;
        let end = pos + whole.end();

        let named: HashMap<String, String> = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|n| m.name(n).map(|v| (n.to_string(), v.as_str().to_string())))
            .collect();

        let payload = if named.is_empty() {
            MatchPayload::Raw(whole.as_str().to_string())
        } else {
            MatchPayload::Groups(named)
        };

        Ok(Some((start, end, payload)))
    }

    pub fn to_match_record(
        self: &Rc<Self>,
        raw_text: String,
        start: usize,
        end: usize,
        payload: MatchPayload,
        context: &Context,
    ) -> MatchRecord {
        let value = match &self.transform {
            Some(t) => t(&payload, context),
            None => payload.into_value(),
        };
        MatchRecord { token: self.clone(), raw_text, value, start, end }
    }
}

/// A single emitted token, ready for the parse-state engine.
#[derive(Debug, Clone)]
pub struct MatchRecord {
    pub token: Rc<Token>,
    pub raw_text: String,
    pub value: Value,
    pub start: usize,
    pub end: usize,
}

impl MatchRecord {
    pub fn token_matches(&self, token: &Rc<Token>) -> bool {
        Rc::ptr_eq(&self.token, token) || self.token.id == token.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_match_without_groups() {
        let tok = Token::new("number", r"\d+").unwrap();
        let (start, end, payload) = tok.try_match("123abc", 0).unwrap().unwrap();
        assert_eq!((start, end), (0, 3));
        assert_eq!(payload, MatchPayload::Raw("123".to_string()));
    }

    #[test]
    fn anchored_match_fails_mid_string() {
        let tok = Token::new("digit", r"\d").unwrap();
        assert!(tok.try_match("a1", 0).unwrap().is_none());
        assert!(tok.try_match("a1", 1).unwrap().is_some());
    }

    #[test]
    fn named_groups_become_a_map() {
        let tok = Token::new("kv", r"(?P<key>\w+)=(?P<val>\w+)").unwrap();
        let (_, _, payload) = tok.try_match("x=1", 0).unwrap().unwrap();
        match payload {
            MatchPayload::Groups(g) => {
                assert_eq!(g.get("key").unwrap(), "x");
                assert_eq!(g.get("val").unwrap(), "1");
            }
            _ => panic!("expected named groups"),
        }
    }

    #[test]
    fn zero_length_token_is_a_construction_error() {
        let tok = Token::new("maybe", r"a*").unwrap();
        let err = tok.try_match("bbb", 0).unwrap_err();
        match err {
            EngineError::Construction(ConstructionError::ZeroLengthToken(name)) => {
                assert_eq!(name, "maybe")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn transform_runs_on_the_untransformed_payload() {
        let ctx = Context::new();
        let tok = Token::with_transform(
            "number",
            r"\d+",
            Rc::new(|payload: &MatchPayload, _ctx: &Context| match payload {
                MatchPayload::Raw(s) => Value::Number(s.parse().unwrap()),
                MatchPayload::Groups(_) => unreachable!(),
            }),
        )
        .unwrap();
        let (start, end, payload) = tok.try_match("42", 0).unwrap().unwrap();
        let record = tok.to_match_record("42".to_string(), start, end, payload, &ctx);
        assert_eq!(record.value, Value::Number(42.0));
    }
}
