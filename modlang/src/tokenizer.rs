//! Lexical analysis: turns source bytes into a stream of [`Token`]s.

use crate::error::{LexError, Location};
use tracing::trace;

/// A keyword or compound-operator id, or a single printable byte's own code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenId {
    /// End of input.
    Eof,
    /// `func`.
    Func,
    /// `proc`.
    Proc,
    /// `var`.
    Var,
    /// `ref`. Tokenized and parsed, rejected at compile time.
    Ref,
    /// `not`.
    Not,
    /// `or`.
    Or,
    /// `and`.
    And,
    /// `return`.
    Return,
    /// `->`.
    Arrow,
    /// `:=`.
    Define,
    /// `==`.
    EqEq,
    /// `/=`.
    NotEq,
    /// `<=`.
    LtEq,
    /// `>=`.
    GtEq,
    /// `<<`.
    Shl,
    /// `>>`.
    Shr,
    /// An identifier or keyword-shaped lexeme that isn't one of the reserved words.
    Ident,
    /// A numeric literal.
    Number,
    /// Any other single printable byte; `code` is its ASCII value, e.g. `b'+'`.
    Symbol(u8),
}

const KEYWORDS: &[(&str, TokenId)] = &[
    ("func", TokenId::Func),
    ("proc", TokenId::Proc),
    ("var", TokenId::Var),
    ("ref", TokenId::Ref),
    ("not", TokenId::Not),
    ("or", TokenId::Or),
    ("and", TokenId::And),
    ("return", TokenId::Return),
];

const COMPOUND_OPERATORS: &[(&str, TokenId)] = &[
    ("->", TokenId::Arrow),
    (":=", TokenId::Define),
    ("==", TokenId::EqEq),
    ("/=", TokenId::NotEq),
    ("<=", TokenId::LtEq),
    (">=", TokenId::GtEq),
    ("<<", TokenId::Shl),
    (">>", TokenId::Shr),
];

/// One lexical token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What kind of token this is.
    pub id: TokenId,
    /// The exact source text matched.
    pub lexeme: String,
    /// Where it started.
    pub at: Location,
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_alphanum(b: u8) -> bool {
    is_alpha(b) || b.is_ascii_digit()
}

fn is_num_start(b: u8) -> bool {
    b.is_ascii_digit()
}

fn is_num_body(b: u8) -> bool {
    b.is_ascii_digit() || b == b'.' || is_alpha(b)
}

/// Opaque saved tokenizer position, see [`Tokenizer::mark`]/[`Tokenizer::reset`].
#[derive(Debug, Clone, Copy)]
pub struct TokenizerMark {
    pos: usize,
    row: u32,
    column: u32,
}

/// Converts a byte slice into a token stream, tracking `(row, column)` and
/// supporting one token of pushback.
pub struct Tokenizer<'a> {
    source: &'a [u8],
    pos: usize,
    row: u32,
    column: u32,
    pushed_back: Option<Token>,
}

impl<'a> Tokenizer<'a> {
    /// Begin tokenizing `source`.
    pub fn new(source: &'a [u8]) -> Tokenizer<'a> {
        Tokenizer { source, pos: 0, row: 0, column: 0, pushed_back: None }
    }

    /// The `(row, column)` of the next byte to be read.
    pub fn loc(&self) -> Location {
        Location { row: self.row, column: self.column }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn advance_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.row += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_byte() {
            match b {
                b' ' | b'\t' | b'\r' => {
                    self.advance_byte();
                }
                _ => break,
            }
        }
    }

    /// Capture the current read position so the statement layer can attempt
    /// a tentative parse (e.g. "is this an assignment target list?") and
    /// roll back on mismatch, without needing arbitrary-length pushback.
    pub fn mark(&self) -> TokenizerMark {
        TokenizerMark { pos: self.pos, row: self.row, column: self.column }
    }

    /// Roll back to a previously captured [`TokenizerMark`], discarding any
    /// pending pushback.
    pub fn reset(&mut self, mark: TokenizerMark) {
        self.pos = mark.pos;
        self.row = mark.row;
        self.column = mark.column;
        self.pushed_back = None;
    }

    /// True if the next non-space/tab character (if any) is a newline or EOF,
    /// without consuming anything.
    pub fn peek_eol(&self) -> bool {
        let mut pos = self.pos;
        while let Some(&b) = self.source.get(pos) {
            match b {
                b' ' | b'\t' | b'\r' => pos += 1,
                _ => break,
            }
        }
        !matches!(self.source.get(pos), Some(b) if *b != b'\n')
    }

    /// If positioned at (or before, across blank space) a newline, consumes
    /// through it and returns `true`; otherwise consumes nothing and returns
    /// `false`.
    pub fn try_read_eol(&mut self) -> bool {
        if self.pushed_back.is_some() {
            return false;
        }
        let save = (self.pos, self.row, self.column);
        self.skip_whitespace();
        if self.peek_byte() == Some(b'\n') {
            self.advance_byte();
            true
        } else {
            (self.pos, self.row, self.column) = save;
            false
        }
    }

    /// Push `tk` back so the next [`Tokenizer::get_token`] returns it again.
    /// At most one token may be pending; calling this twice without an
    /// intervening read is a logic error.
    pub fn put_token_back(&mut self, tk: Token) {
        debug_assert!(self.pushed_back.is_none(), "at most one token of pushback is supported");
        self.pushed_back = Some(tk);
    }

    /// Read the next token, consuming it.
    pub fn get_token(&mut self) -> Result<Token, LexError> {
        if let Some(tk) = self.pushed_back.take() {
            trace!(lexeme = %tk.lexeme, "token from pushback");
            return Ok(tk);
        }
        self.skip_whitespace();
        while matches!(self.peek_byte(), Some(b'\n')) {
            // Newlines are significant to callers (peek_eol/try_read_eol) but
            // get_token itself treats them as ordinary whitespace once a
            // caller has decided not to stop on one.
            self.advance_byte();
            self.skip_whitespace();
        }

        let at = self.loc();
        let Some(b) = self.peek_byte() else {
            return Ok(Token { id: TokenId::Eof, lexeme: String::new(), at });
        };

        if is_alpha(b) {
            let start = self.pos;
            while matches!(self.peek_byte(), Some(b) if is_alphanum(b)) {
                self.advance_byte();
            }
            let lexeme = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
            let id = KEYWORDS.iter().find(|(kw, _)| *kw == lexeme).map(|(_, id)| *id).unwrap_or(TokenId::Ident);
            return Ok(Token { id, lexeme, at });
        }

        if is_num_start(b) {
            let start = self.pos;
            while matches!(self.peek_byte(), Some(b) if is_num_body(b)) {
                self.advance_byte();
            }
            let lexeme = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
            return Ok(Token { id: TokenId::Number, lexeme, at });
        }

        if !b.is_ascii_graphic() {
            self.advance_byte();
            return Err(LexError::UnexpectedByte { at, byte: b });
        }

        for (op, id) in COMPOUND_OPERATORS {
            let op_bytes = op.as_bytes();
            if self.source[self.pos..].starts_with(op_bytes) {
                for _ in 0..op_bytes.len() {
                    self.advance_byte();
                }
                return Ok(Token { id: *id, lexeme: (*op).to_string(), at });
            }
        }

        self.advance_byte();
        Ok(Token { id: TokenId::Symbol(b), lexeme: (b as char).to_string(), at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(src: &str) -> Vec<TokenId> {
        let mut tz = Tokenizer::new(src.as_bytes());
        let mut out = Vec::new();
        loop {
            let tk = tz.get_token().unwrap();
            let done = matches!(tk.id, TokenId::Eof);
            out.push(tk.id);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(ids("func x"), vec![TokenId::Func, TokenId::Ident, TokenId::Eof]);
    }

    #[test]
    fn compound_operators_prefer_longest_match() {
        assert_eq!(ids(":= == /= <= >= -> << >>"), vec![
            TokenId::Define,
            TokenId::EqEq,
            TokenId::NotEq,
            TokenId::LtEq,
            TokenId::GtEq,
            TokenId::Arrow,
            TokenId::Shl,
            TokenId::Shr,
            TokenId::Eof,
        ]);
    }

    #[test]
    fn single_colon_is_not_swallowed_by_define() {
        assert_eq!(ids(": :="), vec![TokenId::Symbol(b':'), TokenId::Define, TokenId::Eof]);
    }

    #[test]
    fn row_column_tracks_newlines() {
        let mut tz = Tokenizer::new(b"a\nb");
        let a = tz.get_token().unwrap();
        assert_eq!(a.at, Location { row: 0, column: 0 });
        let b = tz.get_token().unwrap();
        assert_eq!(b.at, Location { row: 1, column: 0 });
    }

    #[test]
    fn pushback_returns_same_token_once() {
        let mut tz = Tokenizer::new(b"a b");
        let a = tz.get_token().unwrap();
        tz.put_token_back(a.clone());
        let a2 = tz.get_token().unwrap();
        assert_eq!(a, a2);
        let b = tz.get_token().unwrap();
        assert_eq!(b.lexeme, "b");
    }

    #[test]
    fn non_ascii_byte_is_a_lex_error() {
        let mut tz = Tokenizer::new(&[0xFF]);
        assert!(tz.get_token().is_err());
    }

    #[test]
    fn peek_and_try_read_eol() {
        let mut tz = Tokenizer::new(b"  \nnext");
        assert!(tz.peek_eol());
        assert!(tz.try_read_eol());
        let tk = tz.get_token().unwrap();
        assert_eq!(tk.lexeme, "next");
    }
}
