//! Shell-like argument tokenizer
//!
//! Splits a rendered command line into argv tokens. Quoting with `'` or `"`
//! groups whitespace into a single token and a backslash escapes whitespace
//! and quote characters. Unlike a POSIX shell, a closing quote always ends the
//! token, and an escaped quote outside a quoted region is an ordinary
//! character that never opens one.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizeError {
    #[error("missing closing quote")]
    UnterminatedQuote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Escape,
    Quoted,
}

struct Scanner {
    tokens: Vec<String>,
    token: String,
    state: State,
    quote: Option<char>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            tokens: Vec::new(),
            token: String::new(),
            state: State::Normal,
            quote: None,
        }
    }

    /// Push the pending token if it holds anything.
    fn flush(&mut self) {
        if !self.token.is_empty() {
            self.tokens.push(std::mem::take(&mut self.token));
        }
    }

    fn step(&mut self, c: char) {
        self.state = match self.state {
            State::Normal => match c {
                c if c.is_whitespace() => {
                    self.flush();
                    State::Normal
                }
                '\\' => State::Escape,
                '\'' | '"' => {
                    self.quote = Some(c);
                    State::Quoted
                }
                c => {
                    self.token.push(c);
                    State::Normal
                }
            },
            State::Escape => {
                if !(c.is_whitespace() || c == '\'' || c == '"') {
                    self.token.push('\\');
                }
                self.token.push(c);
                if self.quote.is_some() {
                    State::Quoted
                } else {
                    State::Normal
                }
            }
            State::Quoted => match c {
                '\\' => State::Escape,
                c if Some(c) == self.quote => {
                    self.flush();
                    self.quote = None;
                    State::Normal
                }
                c => {
                    self.token.push(c);
                    State::Quoted
                }
            },
        };
    }

    fn finish(mut self) -> Result<Vec<String>, TokenizeError> {
        match self.state {
            State::Escape => self.token.push('\\'),
            State::Quoted => return Err(TokenizeError::UnterminatedQuote),
            State::Normal => {}
        }
        self.flush();
        Ok(self.tokens)
    }
}

/// Split `input` around runs of whitespace, honoring quotes and escapes.
///
/// Returns [`TokenizeError::UnterminatedQuote`] when a quote is never closed;
/// no partial token list is produced in that case.
pub fn tokenize(input: &str) -> Result<Vec<String>, TokenizeError> {
    let mut scanner = Scanner::new();
    for c in input.chars() {
        scanner.step(c);
    }
    scanner.finish()
}
