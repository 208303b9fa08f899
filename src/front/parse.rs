//! The parser.
//!
//! Recursive-descent parser implementing the grammar below verbatim,
//! grounded directly in `smplParser.py` (one method per production,
//! `peek`/`consume` primitives):
//!
//! ```text
//! computation  = "main" {varDecl} {funcDecl} "{" statSequence "}" "."
//! varDecl      = typeDecl ident {"," ident} ";"
//! typeDecl     = "var" | "array" "[" number "]" {"[" number "]"}
//! funcDecl     = ["void"] "function" ident formalParam ";" funcBody ";"
//! formalParam  = "(" [ident {"," ident}] ")"
//! funcBody     = {varDecl} "{" [statSequence] "}"
//! statSequence = statement {";" statement} [";"]
//! statement    = assignment | funcCall | ifStatement | whileStatement | returnStatement
//! assignment   = "let" designator "<-" expression
//! funcCall     = "call" ident ["(" [expression {"," expression}] ")"]
//! ifStatement  = "if" relation "then" statSequence ["else" statSequence] "fi"
//! whileStatement = "while" relation "do" statSequence "od"
//! returnStatement= "return" [expression]
//! relation     = expression relOp expression
//! expression   = term {("+"|"-") term}
//! term         = factor {("*"|"/") factor}
//! factor       = designator | number | "(" expression ")" | funcCall
//! designator   = ident {"[" expression "]"}
//! ident        = letter {letter|digit}
//! number       = digit {digit}
//! relOp        = "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```

use std::fmt::Debug;

use derive_more::derive::Display;

use super::ast::*;
use super::lex::{Lexer, TokenKind};
use crate::common::{Error, Id, Pos};

#[derive(Display)]
#[display("[ERROR] Parse error at position {pos}: {message}")]
pub struct ParseError {
    pub pos: Pos,
    pub message: String,
}

impl Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

const STMT_START: &[TokenKind] = &[
    TokenKind::Let,
    TokenKind::Call,
    TokenKind::If,
    TokenKind::While,
    TokenKind::Return,
];

const EXPR_START: &[TokenKind] = &[
    TokenKind::Ident,
    TokenKind::Number,
    TokenKind::LParen,
    TokenKind::Call,
];

struct Parser<'input> {
    lex: Lexer<'input>,
}

impl<'input> Parser<'input> {
    fn peek_kind(&self) -> Result<Option<TokenKind>, Error> {
        Ok(self.lex.peek()?.map(|t| t.kind))
    }

    fn at(&self, kind: TokenKind) -> Result<bool, Error> {
        Ok(self.peek_kind()? == Some(kind))
    }

    fn at_any(&self, kinds: &[TokenKind]) -> Result<bool, Error> {
        match self.peek_kind()? {
            Some(k) => Ok(kinds.contains(&k)),
            None => Ok(false),
        }
    }

    fn consume(&mut self, expected: TokenKind) -> Result<&'input str, Error> {
        match self.lex.next()? {
            Some(tok) if tok.kind == expected => Ok(tok.text),
            Some(tok) => Err(Error::Parse(ParseError {
                pos: tok.pos,
                message: format!("expected '{expected}', found '{}' ({})", tok.text, tok.kind),
            })),
            None => Err(Error::Parse(ParseError {
                pos: self.lex.pos(),
                message: format!("expected '{expected}', found end of input"),
            })),
        }
    }

    fn ident(&mut self) -> Result<Id, Error> {
        let text = self.consume(TokenKind::Ident)?;
        Ok(internment::Intern::new(text.to_string()))
    }

    fn number(&mut self) -> Result<i64, Error> {
        let text = self.consume(TokenKind::Number)?;
        text.parse::<i64>().map_err(|e| {
            Error::Parse(ParseError {
                pos: self.lex.pos(),
                message: format!("invalid number literal '{text}': {e}"),
            })
        })
    }

    /// `designator = ident {"[" expression "]"}`
    fn designator(&mut self) -> Result<(Id, Vec<Expr>), Error> {
        let name = self.ident()?;
        let mut indices = Vec::new();
        while self.at(TokenKind::LBracket)? {
            self.consume(TokenKind::LBracket)?;
            indices.push(self.expression()?);
            self.consume(TokenKind::RBracket)?;
        }
        Ok((name, indices))
    }

    /// `factor = designator | number | "(" expression ")" | funcCall`
    fn factor(&mut self) -> Result<Expr, Error> {
        match self.peek_kind()? {
            Some(TokenKind::Ident) => {
                let (name, indices) = self.designator()?;
                if indices.is_empty() {
                    Ok(Expr::Var(name))
                } else {
                    Ok(Expr::ArrayRead { name, indices })
                }
            }
            Some(TokenKind::Number) => Ok(Expr::Const(self.number()?)),
            Some(TokenKind::Call) => Ok(Expr::Call(self.func_call()?)),
            Some(TokenKind::LParen) => {
                self.consume(TokenKind::LParen)?;
                let e = self.expression()?;
                self.consume(TokenKind::RParen)?;
                Ok(e)
            }
            _ => Err(self.unexpected("a designator, number, '(', or 'call'")),
        }
    }

    /// `term = factor {("*" | "/") factor}`
    fn term(&mut self) -> Result<Expr, Error> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind()? {
                Some(TokenKind::Asterisk) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                _ => break,
            };
            self.lex.next()?;
            let right = self.factor()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    /// `expression = term {("+" | "-") term}`
    fn expression(&mut self) -> Result<Expr, Error> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind()? {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => break,
            };
            self.lex.next()?;
            let right = self.term()?;
            left = Expr::BinOp { op, lhs: Box::new(left), rhs: Box::new(right) };
        }
        Ok(left)
    }

    fn rel_op(&mut self) -> Result<RelOp, Error> {
        let kind = self.peek_kind()?;
        let op = match kind {
            Some(TokenKind::OpLt) => RelOp::Lt,
            Some(TokenKind::OpGt) => RelOp::Gt,
            Some(TokenKind::OpEq) => RelOp::Eq,
            Some(TokenKind::OpNeq) => RelOp::Ne,
            Some(TokenKind::OpGe) => RelOp::Ge,
            Some(TokenKind::OpLe) => RelOp::Le,
            _ => return Err(self.unexpected("a relational operator")),
        };
        self.lex.next()?;
        Ok(op)
    }

    /// `relation = expression relOp expression`
    fn relation(&mut self) -> Result<Relation, Error> {
        let lhs = self.expression()?;
        let op = self.rel_op()?;
        let rhs = self.expression()?;
        Ok(Relation { op, lhs, rhs })
    }

    /// `assignment = "let" designator "<-" expression`
    fn assignment(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenKind::Let)?;
        let (name, indices) = self.designator()?;
        self.consume(TokenKind::Assign)?;
        let value = self.expression()?;
        if indices.is_empty() {
            Ok(Stmt::Assign { name, value })
        } else {
            Ok(Stmt::ArrayAssign { name, indices, value })
        }
    }

    /// `funcCall = "call" ident ["(" [expression {"," expression}] ")"]`
    fn func_call(&mut self) -> Result<FuncCall, Error> {
        self.consume(TokenKind::Call)?;
        let name = self.ident()?;
        let mut args = Vec::new();
        if self.at(TokenKind::LParen)? {
            self.consume(TokenKind::LParen)?;
            if self.at_any(EXPR_START)? {
                args.push(self.expression()?);
                while self.at(TokenKind::Comma)? {
                    self.consume(TokenKind::Comma)?;
                    args.push(self.expression()?);
                }
            }
            self.consume(TokenKind::RParen)?;
        }
        Ok(FuncCall { name, args })
    }

    /// `ifStatement = "if" relation "then" statSequence ["else" statSequence] "fi"`
    fn if_stat(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenKind::If)?;
        let relation = self.relation()?;
        self.consume(TokenKind::Then)?;
        let then_branch = self.stat_sequence()?;
        let else_branch = if self.at(TokenKind::Else)? {
            self.consume(TokenKind::Else)?;
            self.stat_sequence()?
        } else {
            Vec::new()
        };
        self.consume(TokenKind::Fi)?;
        Ok(Stmt::If { relation, then_branch, else_branch })
    }

    /// `whileStatement = "while" relation "do" statSequence "od"`
    fn while_stat(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenKind::While)?;
        let relation = self.relation()?;
        self.consume(TokenKind::Do)?;
        let body = self.stat_sequence()?;
        self.consume(TokenKind::Od)?;
        Ok(Stmt::While { relation, body })
    }

    /// `returnStatement = "return" [expression]`
    fn return_stat(&mut self) -> Result<Stmt, Error> {
        self.consume(TokenKind::Return)?;
        let value = if self.at_any(EXPR_START)? { Some(self.expression()?) } else { None };
        Ok(Stmt::Return(value))
    }

    /// `statement = assignment | funcCall | ifStatement | whileStatement | returnStatement`
    fn statement(&mut self) -> Result<Stmt, Error> {
        match self.peek_kind()? {
            Some(TokenKind::Let) => self.assignment(),
            Some(TokenKind::Call) => Ok(Stmt::Call(self.func_call()?)),
            Some(TokenKind::If) => self.if_stat(),
            Some(TokenKind::While) => self.while_stat(),
            Some(TokenKind::Return) => self.return_stat(),
            _ => Err(self.unexpected("a statement")),
        }
    }

    /// `statSequence = statement {";" statement} [";"]`
    fn stat_sequence(&mut self) -> Result<Vec<Stmt>, Error> {
        let mut stmts = vec![self.statement()?];
        while self.at(TokenKind::Semicolon)? {
            self.consume(TokenKind::Semicolon)?;
            if self.at_any(STMT_START)? {
                stmts.push(self.statement()?);
            }
        }
        Ok(stmts)
    }

    /// `typeDecl = "var" | "array" "[" number "]" {"[" number "]"}`
    fn type_decl(&mut self) -> Result<Vec<i64>, Error> {
        if self.at(TokenKind::Var)? {
            self.consume(TokenKind::Var)?;
            Ok(Vec::new())
        } else {
            self.consume(TokenKind::Array)?;
            self.consume(TokenKind::LBracket)?;
            let mut dims = vec![self.number()?];
            self.consume(TokenKind::RBracket)?;
            while self.at(TokenKind::LBracket)? {
                self.consume(TokenKind::LBracket)?;
                dims.push(self.number()?);
                self.consume(TokenKind::RBracket)?;
            }
            Ok(dims)
        }
    }

    /// `varDecl = typeDecl ident {"," ident} ";"`
    fn var_decl(&mut self) -> Result<Vec<VarDecl>, Error> {
        let dims = self.type_decl()?;
        let mut names = vec![self.ident()?];
        while self.at(TokenKind::Comma)? {
            self.consume(TokenKind::Comma)?;
            names.push(self.ident()?);
        }
        self.consume(TokenKind::Semicolon)?;
        Ok(names.into_iter().map(|name| VarDecl { name, dims: dims.clone() }).collect())
    }

    /// `formalParam = "(" [ident {"," ident}] ")"`
    fn formal_param(&mut self) -> Result<Vec<Id>, Error> {
        self.consume(TokenKind::LParen)?;
        let mut idents = Vec::new();
        if self.at(TokenKind::Ident)? {
            idents.push(self.ident()?);
            while self.at(TokenKind::Comma)? {
                self.consume(TokenKind::Comma)?;
                idents.push(self.ident()?);
            }
        }
        self.consume(TokenKind::RParen)?;
        Ok(idents)
    }

    /// `funcBody = {varDecl} "{" [statSequence] "}"`
    fn func_body(&mut self) -> Result<(Vec<VarDecl>, Vec<Stmt>), Error> {
        let mut var_decls = Vec::new();
        while self.at_any(&[TokenKind::Var, TokenKind::Array])? {
            var_decls.extend(self.var_decl()?);
        }
        self.consume(TokenKind::LBrace)?;
        let stats = if self.at_any(STMT_START)? { self.stat_sequence()? } else { Vec::new() };
        self.consume(TokenKind::RBrace)?;
        Ok((var_decls, stats))
    }

    /// `funcDecl = ["void"] "function" ident formalParam ";" funcBody ";"`
    fn func_decl(&mut self) -> Result<FuncDecl, Error> {
        let is_void = if self.at(TokenKind::Void)? {
            self.consume(TokenKind::Void)?;
            true
        } else {
            false
        };
        self.consume(TokenKind::Function)?;
        let name = self.ident()?;
        let params = self.formal_param()?;
        self.consume(TokenKind::Semicolon)?;
        let (var_decls, stats) = self.func_body()?;
        self.consume(TokenKind::Semicolon)?;
        Ok(FuncDecl { name, params, var_decls, stats, is_void })
    }

    /// `computation = "main" {varDecl} {funcDecl} "{" statSequence "}" "."`
    fn computation(&mut self) -> Result<Program, Error> {
        self.consume(TokenKind::Main)?;
        let mut var_decls = Vec::new();
        while self.at_any(&[TokenKind::Var, TokenKind::Array])? {
            var_decls.extend(self.var_decl()?);
        }
        let mut func_decls = Vec::new();
        while self.at_any(&[TokenKind::Void, TokenKind::Function])? {
            func_decls.push(self.func_decl()?);
        }
        self.consume(TokenKind::LBrace)?;
        let stats = self.stat_sequence()?;
        self.consume(TokenKind::RBrace)?;
        self.consume(TokenKind::Period)?;
        Ok(Program { var_decls, func_decls, stats })
    }

    fn unexpected(&self, expected: &str) -> Error {
        match self.peek_kind() {
            Ok(Some(k)) => Error::Parse(ParseError {
                pos: self.lex.pos(),
                message: format!("expected {expected}, found '{k}'"),
            }),
            Ok(None) => Error::Parse(ParseError {
                pos: self.lex.pos(),
                message: format!("expected {expected}, found end of input"),
            }),
            Err(e) => e,
        }
    }
}

pub fn parse(input: &str) -> Result<Program, Error> {
    let mut parser = Parser { lex: Lexer::new(input) };
    parser.computation()
}
