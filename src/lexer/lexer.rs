//! Mode-stack tokenizer: greedy left-to-right matching within the current
//! mode, with push/pop of modes triggered by designated tokens.

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{EngineError, LexerErrorInfo};
use crate::token::{MatchRecord, Token};
use crate::value::Context;

/// One entry in the lexer's mode stack. `omit` tokens are always tried
/// before `accept` tokens; both lists are tried in declared order.
#[derive(Debug)]
pub struct LexerMode {
    pub name: String,
    pub accept: Vec<Rc<Token>>,
    pub omit: Vec<Rc<Token>>,
    pub push_on: Vec<Rc<Token>>,
    pub pop_on: Option<Rc<Token>>,
}

impl LexerMode {
    pub fn new(name: &str) -> Self {
        LexerMode { name: name.to_string(), accept: vec![], omit: vec![], push_on: vec![], pop_on: None }
    }
}

pub struct Lexer {
    modes: Vec<Rc<LexerMode>>,
    start: Rc<LexerMode>,
    /// token id -> mode to push when that token matches, built once from
    /// every mode's `push_on` list.
    push_index: HashMap<u64, Rc<LexerMode>>,
}

impl Lexer {
    pub fn new(modes: Vec<Rc<LexerMode>>, start: Rc<LexerMode>) -> Self {
        let mut push_index = HashMap::new();
        for mode in &modes {
            for tok in &mode.push_on {
                push_index.insert(tok.id(), mode.clone());
            }
        }
        Lexer { modes, start, push_index }
    }

    pub fn modes(&self) -> &[Rc<LexerMode>] {
        &self.modes
    }

    pub fn lex(&self, text: &str, context: &Context) -> Result<Vec<MatchRecord>, EngineError> {
        let mut stack: Vec<Rc<LexerMode>> = vec![self.start.clone()];
        let mut pos = 0usize;
        let mut out = Vec::new();

        while pos < text.len() {
            let top = stack.last().expect("stack is never empty").clone();

            if let Some(new_pos) = self.try_omit(&top, text, pos, &mut stack)? {
                pos = new_pos;
                continue;
            }

            if let Some((new_pos, record)) = self.try_accept(&top, text, pos, context, &mut stack)? {
                pos = new_pos;
                out.push(record);
                continue;
            }

            return Err(EngineError::Lexer(self.build_error(text, pos, &top)));
        }

        Ok(out)
    }

    fn try_omit(
        &self,
        mode: &Rc<LexerMode>,
        text: &str,
        pos: usize,
        stack: &mut Vec<Rc<LexerMode>>,
    ) -> Result<Option<usize>, EngineError> {
        for tok in &mode.omit {
            if let Some((_, end, _)) = tok.try_match(text, pos)? {
                log::trace!("lexer: omit {} at {pos}", tok.name);
                self.apply_transitions(mode, tok, stack);
                return Ok(Some(end));
            }
        }
        Ok(None)
    }

    fn try_accept(
        &self,
        mode: &Rc<LexerMode>,
        text: &str,
        pos: usize,
        context: &Context,
        stack: &mut Vec<Rc<LexerMode>>,
    ) -> Result<Option<(usize, MatchRecord)>, EngineError> {
        for tok in &mode.accept {
            if let Some((start, end, payload)) = tok.try_match(text, pos)? {
                log::trace!("lexer: accept {} '{}' at {pos}", tok.name, &text[start..end]);
                self.apply_transitions(mode, tok, stack);
                let record = tok.to_match_record(text[start..end].to_string(), start, end, payload, context);
                return Ok(Some((end, record)));
            }
        }
        Ok(None)
    }

    /// Pop happens before push, so a token that is both a mode's `pop_on`
    /// and another mode's `push_on` still leaves the stack one mode deep.
    fn apply_transitions(&self, mode: &Rc<LexerMode>, tok: &Rc<Token>, stack: &mut Vec<Rc<LexerMode>>) {
        if let Some(pop_tok) = &mode.pop_on {
            if pop_tok.id() == tok.id() && stack.len() > 1 {
                stack.pop();
                log::trace!("lexer: popped mode, now {}", stack.last().unwrap().name);
            }
        }
        if let Some(pushed) = self.push_index.get(&tok.id()) {
            stack.push(pushed.clone());
            log::trace!("lexer: pushed mode {}", pushed.name);
        }
    }

    fn build_error(&self, text: &str, pos: usize, mode: &Rc<LexerMode>) -> LexerErrorInfo {
        let remaining = &text[pos..];
        let window_len = remaining.char_indices().nth(10).map(|(i, _)| i).unwrap_or(remaining.len());
        let window = remaining[..window_len].replace('\n', "\\n");

        let line = text[..pos].matches('\n').count();
        let column = pos - text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);

        let mut expected: Vec<String> = mode.accept.iter().map(|t| t.name.clone()).collect();
        expected.extend(mode.omit.iter().map(|t| t.name.clone()));

        LexerErrorInfo { pos, line, column, window, expected, mode: mode.name.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(name: &str, accept: Vec<Rc<Token>>, omit: Vec<Rc<Token>>) -> Rc<LexerMode> {
        Rc::new(LexerMode { name: name.to_string(), accept, omit, push_on: vec![], pop_on: None })
    }

    #[test]
    fn omit_tokens_never_appear_in_the_stream() {
        let space = Token::new("space", r"[ ]+").unwrap();
        let number = Token::new("number", r"\d+").unwrap();
        let start = mode("start", vec![number.clone()], vec![space.clone()]);
        let lexer = Lexer::new(vec![start.clone()], start);
        let ctx = Context::new();
        let toks = lexer.lex("1 2   3", &ctx).unwrap();
        assert_eq!(toks.len(), 3);
        assert!(toks.iter().all(|t| t.token_matches(&number)));
    }

    #[test]
    fn lexer_error_reports_position_and_expected() {
        let number = Token::new("number", r"\d+").unwrap();
        let start = mode("start", vec![number], vec![]);
        let lexer = Lexer::new(vec![start.clone()], start);
        let ctx = Context::new();
        let err = lexer.lex("12a", &ctx).unwrap_err();
        match err {
            EngineError::Lexer(info) => {
                assert_eq!(info.pos, 2);
                assert_eq!(info.expected, vec!["number".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mode_push_and_pop_discipline() {
        // a, b, c, /b; default mode pushes `inner` on `b`, `inner` omits
        // spaces and pops back to `default` on `/b`.
        let a = Token::new("a", "a").unwrap();
        let b = Token::new("b", "b").unwrap();
        let c = Token::new("c", "c").unwrap();
        let close_b = Token::new("/b", r"/b").unwrap();
        let space = Token::new("space", r"[ ]+").unwrap();

        let mut inner = LexerMode::new("inner");
        inner.accept = vec![a.clone(), b.clone(), c.clone(), close_b.clone()];
        inner.omit = vec![space.clone()];
        inner.pop_on = Some(close_b.clone());
        let inner = Rc::new(inner);

        let mut default_mode = LexerMode::new("default");
        default_mode.accept = vec![a.clone(), b.clone(), c.clone(), close_b.clone()];
        default_mode.push_on = vec![b.clone()];
        let default_mode = Rc::new(default_mode);

        let lexer = Lexer::new(vec![default_mode.clone(), inner], default_mode.clone());
        let ctx = Context::new();

        let toks = lexer.lex("ab   c /ba", &ctx).unwrap();
        let names: Vec<_> = toks.iter().map(|t| t.token.name.clone()).collect();
        assert_eq!(names, vec!["a", "b", "c", "/b", "a"]);

        let err = lexer.lex("a b c /ba", &ctx).unwrap_err();
        assert!(matches!(err, EngineError::Lexer(_)));
    }
}
