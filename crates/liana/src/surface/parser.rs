//! Recursive-descent parser for the surface language.
//!
//! Produces a small statement/expression tree that the lowering pass maps
//! onto opcodes. Type annotations parse and are discarded; `declare`
//! statements and namespaces parse and produce nothing.

use std::sync::Arc;

use super::{
    SurfaceError,
    lexer::{Lexer, Tok, Token, TplPart},
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Null,
    Undefined,
    Bool(bool),
    Num(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Ident(Arc<str>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        optional: bool,
    },
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Arrow {
        params: Vec<String>,
        body: ArrowBody,
    },
    Delete(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplatePart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ArrowBody {
    Expr(Box<Expr>),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    Nullish,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Expr(Expr),
    Let {
        name: String,
        value: Option<Expr>,
    },
    Func {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    ForOf {
        name: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    ForClassic {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        err: String,
        catch: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
}

pub(crate) fn parse_program(source: &str) -> Result<Vec<Stmt>, SurfaceError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        if let Some(stmt) = parser.statement()? {
            stmts.push(stmt);
        }
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at_eof(&self) -> bool {
        matches!(self.current().tok, Tok::Eof)
    }

    fn error(&self, message: impl Into<String>) -> SurfaceError {
        let token = self.current();
        SurfaceError::parse(message, token.line, token.column)
    }

    fn unsupported(&self, construct: impl Into<String>) -> SurfaceError {
        let token = self.current();
        SurfaceError::unsupported(construct, token.line, token.column)
    }

    fn bump(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at_punct(&self, p: &str) -> bool {
        matches!(&self.current().tok, Tok::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.at_punct(p) {
            self.bump();
            return true;
        }
        false
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), SurfaceError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.current().tok, Tok::Ident(name) if name.as_ref() == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.bump();
            return true;
        }
        false
    }

    fn expect_ident(&mut self) -> Result<String, SurfaceError> {
        match &self.current().tok {
            Tok::Ident(name) => {
                let name = name.to_string();
                self.bump();
                Ok(name)
            }
            _ => Err(self.error("expected an identifier")),
        }
    }

    fn eat_semicolons(&mut self) {
        while self.eat_punct(";") {}
    }

    // --- statements ---

    /// Parses one statement; `None` for constructs that produce nothing
    /// (semicolons, `declare`, namespaces).
    fn statement(&mut self) -> Result<Option<Stmt>, SurfaceError> {
        if self.eat_punct(";") {
            return Ok(None);
        }
        if self.at_keyword("declare") {
            self.skip_declare()?;
            return Ok(None);
        }
        if self.at_keyword("namespace") {
            self.skip_namespace()?;
            return Ok(None);
        }
        if self.at_keyword("let") || self.at_keyword("const") || self.at_keyword("var") {
            self.bump();
            let stmt = self.let_declarators()?;
            self.eat_semicolons();
            return Ok(Some(stmt));
        }
        if self.eat_keyword("function") {
            let name = self.expect_ident()?;
            let params = self.param_list()?;
            let body = self.block()?;
            return Ok(Some(Stmt::Func { name, params, body }));
        }
        if self.eat_keyword("if") {
            return Ok(Some(self.if_statement()?));
        }
        if self.eat_keyword("while") {
            self.expect_punct("(")?;
            let cond = self.expression()?;
            self.expect_punct(")")?;
            let body = self.block_or_single()?;
            return Ok(Some(Stmt::While { cond, body }));
        }
        if self.eat_keyword("for") {
            return Ok(Some(self.for_statement()?));
        }
        if self.eat_keyword("break") {
            self.eat_semicolons();
            return Ok(Some(Stmt::Break));
        }
        if self.eat_keyword("continue") {
            self.eat_semicolons();
            return Ok(Some(Stmt::Continue));
        }
        if self.eat_keyword("return") {
            let value = if self.at_punct(";") || self.at_punct("}") || self.at_eof() {
                None
            } else {
                Some(self.expression()?)
            };
            self.eat_semicolons();
            return Ok(Some(Stmt::Return(value)));
        }
        if self.eat_keyword("throw") {
            let value = self.expression()?;
            self.eat_semicolons();
            return Ok(Some(Stmt::Throw(value)));
        }
        if self.eat_keyword("try") {
            let body = self.block()?;
            if !self.eat_keyword("catch") {
                return Err(self.error("expected 'catch'"));
            }
            self.expect_punct("(")?;
            let err = self.expect_ident()?;
            self.skip_type_annotation()?;
            self.expect_punct(")")?;
            let catch = self.block()?;
            return Ok(Some(Stmt::Try { body, err, catch }));
        }
        for rejected in ["class", "switch", "do", "import", "export", "async", "yield"] {
            if self.at_keyword(rejected) {
                return Err(self.unsupported(format!("'{rejected}' statement")));
            }
        }
        if self.at_punct("{") {
            return Ok(Some(Stmt::Block(self.block()?)));
        }
        let expr = self.expression()?;
        self.eat_semicolons();
        Ok(Some(Stmt::Expr(expr)))
    }

    /// `let a = 1, b = 2` → a block of declarations (single stays bare).
    fn let_declarators(&mut self) -> Result<Stmt, SurfaceError> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            self.skip_type_annotation()?;
            let value = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push(Stmt::Let { name, value });
            if !self.eat_punct(",") {
                break;
            }
        }
        if decls.len() == 1 {
            Ok(decls.pop().expect("one declarator"))
        } else {
            Ok(Stmt::Block(decls))
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, SurfaceError> {
        self.expect_punct("(")?;
        let cond = self.expression()?;
        self.expect_punct(")")?;
        let then = self.block_or_single()?;
        let otherwise = if self.eat_keyword("else") {
            if self.eat_keyword("if") {
                Some(vec![self.if_statement()?])
            } else {
                Some(self.block_or_single()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then, otherwise })
    }

    fn for_statement(&mut self) -> Result<Stmt, SurfaceError> {
        self.expect_punct("(")?;
        // for (const x of xs)
        let mark = self.pos;
        if self.at_keyword("const") || self.at_keyword("let") || self.at_keyword("var") {
            self.bump();
            if let Tok::Ident(name) = &self.current().tok {
                let name = name.to_string();
                self.bump();
                if self.eat_keyword("of") {
                    let iter = self.expression()?;
                    self.expect_punct(")")?;
                    let body = self.block_or_single()?;
                    return Ok(Stmt::ForOf { name, iter, body });
                }
            }
            self.pos = mark;
        }
        // for (init; cond; step)
        let init = if self.at_punct(";") {
            None
        } else if self.at_keyword("let") || self.at_keyword("const") || self.at_keyword("var") {
            self.bump();
            Some(Box::new(self.let_declarators()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let cond = if self.at_punct(";") { None } else { Some(self.expression()?) };
        self.expect_punct(";")?;
        let step = if self.at_punct(")") { None } else { Some(self.expression()?) };
        self.expect_punct(")")?;
        let body = self.block_or_single()?;
        Ok(Stmt::ForClassic { init, cond, step, body })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, SurfaceError> {
        self.expect_punct("{")?;
        let mut stmts = Vec::new();
        while !self.at_punct("}") {
            if self.at_eof() {
                return Err(self.error("unterminated block"));
            }
            if let Some(stmt) = self.statement()? {
                stmts.push(stmt);
            }
        }
        self.expect_punct("}")?;
        Ok(stmts)
    }

    fn block_or_single(&mut self) -> Result<Vec<Stmt>, SurfaceError> {
        if self.at_punct("{") {
            self.block()
        } else {
            Ok(self.statement()?.into_iter().collect())
        }
    }

    /// Skips a `declare ...` ambient statement entirely.
    fn skip_declare(&mut self) -> Result<(), SurfaceError> {
        self.bump();
        while !self.at_eof() {
            if self.at_punct("{") {
                self.skip_balanced("{", "}")?;
                // A block ends the declaration unless a namespace body
                // follows-on; either way the statement is over.
                self.eat_semicolons();
                return Ok(());
            }
            if self.eat_punct(";") {
                return Ok(());
            }
            self.bump();
        }
        Ok(())
    }

    /// Skips `namespace X { ... }`.
    fn skip_namespace(&mut self) -> Result<(), SurfaceError> {
        self.bump();
        while !self.at_punct("{") {
            if self.at_eof() {
                return Err(self.error("expected namespace body"));
            }
            self.bump();
        }
        self.skip_balanced("{", "}")?;
        self.eat_semicolons();
        Ok(())
    }

    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<(), SurfaceError> {
        self.expect_punct(open)?;
        let mut depth = 1usize;
        while depth > 0 {
            if self.at_eof() {
                return Err(self.error(format!("expected '{close}'")));
            }
            if self.at_punct(open) {
                depth += 1;
            } else if self.at_punct(close) {
                depth -= 1;
            }
            self.bump();
        }
        Ok(())
    }

    /// Skips `: Type` after a binding or parameter. Balances nesting and
    /// stops at a top-level `,` `)` `=` `;` `=>` or `}`.
    fn skip_type_annotation(&mut self) -> Result<(), SurfaceError> {
        if !self.eat_punct(":") {
            return Ok(());
        }
        let mut depth = 0usize;
        loop {
            if self.at_eof() {
                return Ok(());
            }
            if depth == 0
                && (self.at_punct(",")
                    || self.at_punct(")")
                    || self.at_punct("=")
                    || self.at_punct(";")
                    || self.at_punct("=>")
                    || self.at_punct("}"))
            {
                return Ok(());
            }
            if self.at_punct("(") || self.at_punct("[") || self.at_punct("{") || self.at_punct("<") {
                depth += 1;
            } else if self.at_punct(")") || self.at_punct("]") || self.at_punct("}") || self.at_punct(">") {
                depth = depth.saturating_sub(1);
            }
            self.bump();
        }
    }

    fn param_list(&mut self) -> Result<Vec<String>, SurfaceError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.at_punct(")") {
            let name = self.expect_ident()?;
            self.eat_punct("?");
            self.skip_type_annotation()?;
            params.push(name);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    // --- expressions ---

    pub(super) fn expression(&mut self) -> Result<Expr, SurfaceError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, SurfaceError> {
        if let Some(arrow) = self.try_arrow()? {
            return Ok(arrow);
        }
        let target = self.ternary()?;
        let op = match &self.current().tok {
            Tok::Punct("=") => Some(AssignOp::Assign),
            Tok::Punct("+=") => Some(AssignOp::Add),
            Tok::Punct("-=") => Some(AssignOp::Sub),
            Tok::Punct("*=") => Some(AssignOp::Mul),
            Tok::Punct("/=") => Some(AssignOp::Div),
            Tok::Punct("%=") => Some(AssignOp::Mod),
            Tok::Punct("**=") => Some(AssignOp::Pow),
            Tok::Punct("&&=") => Some(AssignOp::And),
            Tok::Punct("||=") => Some(AssignOp::Or),
            Tok::Punct("??=") => Some(AssignOp::Nullish),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };
        self.bump();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    /// Attempts to parse an arrow function, rolling back on failure.
    fn try_arrow(&mut self) -> Result<Option<Expr>, SurfaceError> {
        let mark = self.pos;
        // ident => body
        if let Tok::Ident(name) = &self.current().tok {
            let name = name.to_string();
            if super::is_reserved_word(&name) {
                return Ok(None);
            }
            let next = self.tokens.get(self.pos + 1).map(|t| &t.tok);
            if matches!(next, Some(Tok::Punct("=>"))) {
                self.bump();
                self.bump();
                let body = self.arrow_body()?;
                return Ok(Some(Expr::Arrow {
                    params: vec![name],
                    body,
                }));
            }
            return Ok(None);
        }
        // (params) => body
        if self.at_punct("(") {
            let params = match self.param_list() {
                Ok(params) => params,
                Err(_) => {
                    self.pos = mark;
                    return Ok(None);
                }
            };
            if self.at_punct(":") {
                if self.skip_type_annotation().is_err() {
                    self.pos = mark;
                    return Ok(None);
                }
            }
            if self.eat_punct("=>") {
                let body = self.arrow_body()?;
                return Ok(Some(Expr::Arrow { params, body }));
            }
            self.pos = mark;
        }
        Ok(None)
    }

    fn arrow_body(&mut self) -> Result<ArrowBody, SurfaceError> {
        if self.at_punct("{") {
            Ok(ArrowBody::Block(self.block()?))
        } else {
            Ok(ArrowBody::Expr(Box::new(self.assignment()?)))
        }
    }

    fn ternary(&mut self) -> Result<Expr, SurfaceError> {
        let cond = self.nullish()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, SurfaceError>,
        table: &[(&str, BinOp)],
    ) -> Result<Expr, SurfaceError> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (punct, op) in table {
                if self.at_punct(punct) {
                    self.bump();
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn nullish(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(Self::logic_or, &[("??", BinOp::Nullish)])
    }

    fn logic_or(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(Self::logic_and, &[("||", BinOp::Or)])
    }

    fn logic_and(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(Self::equality, &[("&&", BinOp::And)])
    }

    fn equality(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(
            Self::relational,
            &[("===", BinOp::Eq), ("==", BinOp::Eq), ("!==", BinOp::Ne), ("!=", BinOp::Ne)],
        )
    }

    fn relational(&mut self) -> Result<Expr, SurfaceError> {
        let mut lhs = self.additive()?;
        loop {
            let op = if self.at_punct("<") {
                BinOp::Lt
            } else if self.at_punct(">") {
                BinOp::Gt
            } else if self.at_punct("<=") {
                BinOp::Le
            } else if self.at_punct(">=") {
                BinOp::Ge
            } else if self.at_keyword("in") {
                BinOp::In
            } else {
                return Ok(lhs);
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn additive(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(Self::multiplicative, &[("+", BinOp::Add), ("-", BinOp::Sub)])
    }

    fn multiplicative(&mut self) -> Result<Expr, SurfaceError> {
        self.binary_level(
            Self::exponent,
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
        )
    }

    fn exponent(&mut self) -> Result<Expr, SurfaceError> {
        let base = self.unary()?;
        if self.eat_punct("**") {
            // Right associative.
            let exp = self.exponent()?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exp),
            });
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expr, SurfaceError> {
        if self.eat_punct("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat_punct("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat_punct("+") {
            return self.unary();
        }
        if self.eat_keyword("delete") {
            return Ok(Expr::Delete(Box::new(self.unary()?)));
        }
        if self.at_keyword("new") || self.at_keyword("typeof") || self.at_keyword("void") {
            let word = self.expect_ident()?;
            return Err(self.unsupported(format!("'{word}' operator")));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, SurfaceError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let property = self.expect_ident()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.at_punct("?.") {
                self.bump();
                if self.at_punct("(") {
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        optional: true,
                    };
                } else if self.eat_punct("[") {
                    let index = self.expression()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: true,
                    };
                } else {
                    let property = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: true,
                    };
                }
            } else if self.at_punct("(") {
                let args = self.call_args()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    optional: false,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                    optional: false,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, SurfaceError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.at_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, SurfaceError> {
        match self.current().tok.clone() {
            Tok::Num(n) => {
                self.bump();
                Ok(Expr::Num(n))
            }
            Tok::Str(s) => {
                self.bump();
                Ok(Expr::Str(s))
            }
            Tok::Template(parts) => {
                let line = self.current().line;
                let column = self.current().column;
                self.bump();
                let mut out = Vec::new();
                for part in parts {
                    match part {
                        TplPart::Lit(text) => out.push(TemplatePart::Lit(text)),
                        TplPart::Src(source) => {
                            let expr = parse_embedded(&source, line, column)?;
                            out.push(TemplatePart::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template(out))
            }
            Tok::Ident(name) => match name.as_ref() {
                "null" => {
                    self.bump();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.bump();
                    Ok(Expr::Undefined)
                }
                "true" => {
                    self.bump();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.bump();
                    Ok(Expr::Bool(false))
                }
                "function" => {
                    self.bump();
                    let params = self.param_list()?;
                    self.skip_type_annotation()?;
                    let body = self.block()?;
                    Ok(Expr::Arrow {
                        params,
                        body: ArrowBody::Block(body),
                    })
                }
                other if super::is_reserved_word(other) => Err(self.unsupported(format!("'{other}' in expression"))),
                _ => {
                    self.bump();
                    Ok(Expr::Ident(name))
                }
            },
            Tok::Punct("(") => {
                self.bump();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.bump();
                let mut items = Vec::new();
                while !self.at_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => {
                self.bump();
                let mut props = Vec::new();
                while !self.at_punct("}") {
                    let key = match &self.current().tok {
                        Tok::Str(s) => {
                            let key = s.clone();
                            self.bump();
                            key
                        }
                        Tok::Ident(name) => {
                            let key = name.to_string();
                            self.bump();
                            key
                        }
                        _ => return Err(self.error("expected an object key")),
                    };
                    let value = if self.eat_punct(":") {
                        self.assignment()?
                    } else {
                        // Shorthand `{ x }`.
                        Expr::Ident(Arc::from(key.as_str()))
                    };
                    props.push((key, value));
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("}")?;
                Ok(Expr::Object(props))
            }
            _ => Err(self.error("expected an expression")),
        }
    }
}

/// Parses the source of a `${...}` template segment.
fn parse_embedded(source: &str, line: u32, column: u32) -> Result<Expr, SurfaceError> {
    let tokens = Lexer::new(source).tokenize().map_err(|err| relocate(err, line, column))?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression().map_err(|err| relocate(err, line, column))?;
    if !parser.at_eof() {
        return Err(SurfaceError::parse("trailing tokens in template expression", line, column));
    }
    Ok(expr)
}

/// Re-anchors an embedded-segment error at the template's position.
fn relocate(err: SurfaceError, line: u32, column: u32) -> SurfaceError {
    match err {
        SurfaceError::Parse { message, .. } => SurfaceError::Parse { message, line, column },
        SurfaceError::Unsupported { construct, .. } => SurfaceError::Unsupported { construct, line, column },
        SurfaceError::InvalidAssignment { .. } => SurfaceError::InvalidAssignment { line, column },
    }
}
