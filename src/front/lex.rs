//! The lexer.
//!
//! Longest-match tokenizer with keyword preference, grounded directly in
//! `smplLex.py`/`config.py` from the original implementation: an ordered
//! table of matchers (literal punctuation/keyword strings, plus two regex
//! classes for `NUMBER` and `IDENT`) is tried at every position, the
//! longest match wins, and a tie is broken in favor of whichever matcher
//! came first in the table — which in practice means a keyword wins over
//! an identically-long `IDENT` match, since every keyword's table entry
//! precedes `IDENT`.

use derive_more::Display;
use regex::Regex;

use crate::common::Pos;

/// Token classes, one per row of `spec.md`'s token table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum TokenKind {
    #[display(",")]
    Comma,
    #[display(".")]
    Period,
    #[display(";")]
    Semicolon,
    #[display("main")]
    Main,
    #[display("function")]
    Function,
    #[display("void")]
    Void,
    #[display("var")]
    Var,
    #[display("array")]
    Array,
    #[display("return")]
    Return,
    #[display("call")]
    Call,
    #[display("if")]
    If,
    #[display("then")]
    Then,
    #[display("else")]
    Else,
    #[display("fi")]
    Fi,
    #[display("while")]
    While,
    #[display("do")]
    Do,
    #[display("od")]
    Od,
    #[display("let")]
    Let,
    #[display("<-")]
    Assign,
    #[display("+")]
    Plus,
    #[display("-")]
    Minus,
    #[display("*")]
    Asterisk,
    #[display("/")]
    Slash,
    #[display("(")]
    LParen,
    #[display(")")]
    RParen,
    #[display("[")]
    LBracket,
    #[display("]")]
    RBracket,
    #[display("{")]
    LBrace,
    #[display("}")]
    RBrace,
    #[display(">=")]
    OpGe,
    #[display("<=")]
    OpLe,
    #[display("!=")]
    OpNeq,
    #[display("==")]
    OpEq,
    #[display("<")]
    OpLt,
    #[display(">")]
    OpGt,
    #[display("number")]
    Number,
    #[display("identifier")]
    Ident,
}

/// Tokens in the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("kind: '{kind}', part of input: '{text}'")]
pub struct Token<'src> {
    /// What token class this token belongs to.
    pub kind: TokenKind,
    /// What part of the input this token carries.
    pub text: &'src str,
    /// Byte offset of the start of this token in the original source.
    pub pos: Pos,
}

pub struct LexError {
    pub pos: Pos,
}

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[ERROR] Lex error: no token matches at position {}", self.pos)
    }
}

impl std::fmt::Debug for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

enum Matcher {
    Literal(&'static str),
    Regex(Regex),
}

/// Reserved words: on a length tie, a candidate whose upper-cased text is
/// one of these wins over a plain `IDENT` match.
const RESERVED: &[&str] = &[
    "MAIN", "FUNCTION", "VOID", "VAR", "ARRAY", "RETURN", "CALL", "IF", "ELSE", "THEN", "FI",
    "WHILE", "DO", "OD", "LET",
];

fn is_reserved(text: &str) -> bool {
    RESERVED.contains(&text.to_uppercase().as_str())
}

/// Whitespace class skipped between tokens: space, tab, CR, LF, and BEL.
fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | 0x07)
}

pub struct Lexer<'input> {
    input: &'input str,
    pos: Pos,
    matchers: Vec<(TokenKind, Matcher)>,
}

impl<'input> Lexer<'input> {
    pub fn new(input: &'input str) -> Self {
        use TokenKind::*;
        let matchers = vec![
            (Comma, Matcher::Literal(",")),
            (Period, Matcher::Literal(".")),
            (Semicolon, Matcher::Literal(";")),
            (Main, Matcher::Literal("main")),
            (Function, Matcher::Literal("function")),
            (Void, Matcher::Literal("void")),
            (Var, Matcher::Literal("var")),
            (Array, Matcher::Literal("array")),
            (Return, Matcher::Literal("return")),
            (Call, Matcher::Literal("call")),
            (If, Matcher::Literal("if")),
            (Then, Matcher::Literal("then")),
            (Else, Matcher::Literal("else")),
            (Fi, Matcher::Literal("fi")),
            (While, Matcher::Literal("while")),
            (Do, Matcher::Literal("do")),
            (Od, Matcher::Literal("od")),
            (Let, Matcher::Literal("let")),
            (Assign, Matcher::Literal("<-")),
            (Plus, Matcher::Literal("+")),
            (Minus, Matcher::Literal("-")),
            (Asterisk, Matcher::Literal("*")),
            (Slash, Matcher::Literal("/")),
            (LParen, Matcher::Literal("(")),
            (RParen, Matcher::Literal(")")),
            (LBracket, Matcher::Literal("[")),
            (RBracket, Matcher::Literal("]")),
            (LBrace, Matcher::Literal("{")),
            (RBrace, Matcher::Literal("}")),
            (OpGe, Matcher::Literal(">=")),
            (OpLe, Matcher::Literal("<=")),
            (OpNeq, Matcher::Literal("!=")),
            (OpEq, Matcher::Literal("==")),
            (OpLt, Matcher::Literal("<")),
            (OpGt, Matcher::Literal(">")),
            (Number, Matcher::Regex(Regex::new(r"\A[0-9]+").unwrap())),
            (Ident, Matcher::Regex(Regex::new(r"\A[a-zA-Z][a-zA-Z0-9]*").unwrap())),
        ];
        let mut lexer = Lexer { input, pos: 0, matchers };
        lexer.skip_whitespace();
        lexer
    }

    /// Has the lexer reached the end of input?
    pub fn end_of_input(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Current byte offset into the source.
    pub fn pos(&self) -> Pos {
        self.pos
    }

    fn scan(&self) -> Result<Option<(TokenKind, &'input str)>, LexError> {
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let remain = &self.input[self.pos..];
        let mut best: Option<(TokenKind, &'input str)> = None;
        for (kind, matcher) in &self.matchers {
            let candidate: Option<&'input str> = match matcher {
                Matcher::Literal(lit) => {
                    if remain.starts_with(lit) {
                        Some(&remain[..lit.len()])
                    } else {
                        None
                    }
                }
                Matcher::Regex(re) => re.find(remain).map(|m| m.as_str()),
            };
            if let Some(text) = candidate {
                match best {
                    Some((_, best_text)) if text.len() > best_text.len() => {
                        if !is_reserved(text) {
                            best = Some((*kind, text));
                        }
                    }
                    None => best = Some((*kind, text)),
                    _ => {}
                }
            }
        }
        match best {
            Some((kind, text)) => Ok(Some((kind, text))),
            None => Err(LexError { pos: self.pos }),
        }
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() && is_whitespace(bytes[self.pos]) {
            self.pos += 1;
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&self) -> Result<Option<Token<'input>>, LexError> {
        Ok(self
            .scan()?
            .map(|(kind, text)| Token { kind, text, pos: self.pos }))
    }

    /// Consume and return the next token, skipping trailing whitespace.
    ///
    /// The return type distinguishes between end-of-input and lexer error.
    pub fn next(&mut self) -> Result<Option<Token<'input>>, LexError> {
        match self.scan()? {
            None => Ok(None),
            Some((kind, text)) => {
                let tok = Token { kind, text, pos: self.pos };
                self.pos += text.len();
                self.skip_whitespace();
                Ok(Some(tok))
            }
        }
    }

    /// Tokenize the whole input eagerly (used by `--lex`).
    pub fn tokenize(mut self) -> Result<Vec<Token<'input>>, LexError> {
        let mut tokens = Vec::new();
        while let Some(tok) = self.next()? {
            tokens.push(tok);
        }
        Ok(tokens)
    }
}
