use std::rc::Rc;

use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use tracing::debug;

use crate::lexer::{Lexer, Token, TokenKind};

/// Syntax errors, labelled with the byte span of the offending token.
#[derive(Diagnostic, Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected `{expected}`, found `{found}`")]
    #[diagnostic(code(minilang::parse::unexpected_token))]
    UnexpectedToken {
        expected: String,
        found: String,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("expected expression, found `{found}`")]
    #[diagnostic(
        code(minilang::parse::expected_expression),
        help("an expression starts with an integer, an identifier, `func` or `(`")
    )]
    ExpectedExpression {
        found: String,
        #[label("not an expression")]
        span: SourceSpan,
    },

    #[error("integer literal `{literal}` is out of range")]
    #[diagnostic(code(minilang::parse::integer_out_of_range))]
    IntegerOutOfRange {
        literal: String,
        #[label("does not fit in 64 bits")]
        span: SourceSpan,
    },
}

/// Binary operators. Each one names a built-in function in the global frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Plus,
    Minus,
    Star,
    Slash,
    Equal,
    NotEqual,
}

impl Op {
    pub const ALL: [Op; 6] = [
        Op::Plus,
        Op::Minus,
        Op::Star,
        Op::Slash,
        Op::Equal,
        Op::NotEqual,
    ];

    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::Slash => "/",
            Op::Equal => "=",
            Op::NotEqual => "#",
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Parameters and body of a function literal, shared by every closure made from it.
#[derive(Debug, PartialEq)]
pub struct FuncDecl {
    pub params: Vec<String>,
    pub body: Node,
}

/// Syntax tree node. A program is a single top-level `Block`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Int(i64),
    Ident(String),
    Block(Vec<Node>),
    If {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Option<Box<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Box<Node>,
    },
    VarDecl {
        name: String,
        init: Box<Node>,
    },
    Assign {
        name: String,
        value: Box<Node>,
    },
    Func(Rc<FuncDecl>),
    Return(Option<Box<Node>>),
    Call {
        callee: Box<Node>,
        args: Vec<Node>,
    },
    Binary {
        op: Op,
        left: Box<Node>,
        right: Box<Node>,
    },
}

fn write_list<T: std::fmt::Display>(
    f: &mut std::fmt::Formatter<'_>,
    items: &[T],
) -> std::fmt::Result {
    for item in items {
        write!(f, " {}", item)?;
    }
    Ok(())
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Int(n) => write!(f, "{}", n),
            Node::Ident(name) => write!(f, "{}", name),
            Node::Block(statements) => {
                write!(f, "(block")?;
                write_list(f, statements)?;
                write!(f, ")")
            }
            Node::If {
                cond,
                then,
                otherwise: Some(otherwise),
            } => write!(f, "(if {} {} {})", cond, then, otherwise),
            Node::If {
                cond,
                then,
                otherwise: None,
            } => write!(f, "(if {} {})", cond, then),
            Node::While { cond, body } => write!(f, "(while {} {})", cond, body),
            Node::VarDecl { name, init } => write!(f, "(var {} {})", name, init),
            Node::Assign { name, value } => write!(f, "(set {} {})", name, value),
            Node::Func(decl) => {
                write!(f, "(func (")?;
                write!(f, "{}", decl.params.join(" "))?;
                write!(f, ") {})", decl.body)
            }
            Node::Return(Some(value)) => write!(f, "(return {})", value),
            Node::Return(None) => write!(f, "(return)"),
            Node::Call { callee, args } => {
                write!(f, "(call {}", callee)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Node::Binary { op, left, right } => write!(f, "({} {} {})", op, left, right),
        }
    }
}

/// Recursive-descent parser with one token of lookahead.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Self { lexer, current }
    }

    /// Parses the whole input into a top-level block.
    pub fn parse(&mut self) -> Result<Node, ParseError> {
        let mut statements = Vec::new();
        while self.current.kind != TokenKind::Eof {
            statements.push(self.statement()?);
        }
        debug!(statements = statements.len(), "parsed program");
        Ok(Node::Block(statements))
    }

    fn advance(&mut self) -> Token<'a> {
        std::mem::replace(&mut self.current, self.lexer.next_token())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind) -> Result<Token<'a>, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.lexeme()))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current.to_string(),
            span: self.current.span().into(),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        Ok(self.consume(TokenKind::Ident)?.slice.to_string())
    }

    fn statement(&mut self) -> Result<Node, ParseError> {
        match self.current.kind {
            TokenKind::LeftBrace => self.block(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Var | TokenKind::Set => {
                let keyword = self.advance();
                let name = self.ident()?;
                self.consume(TokenKind::Equal)?;
                let value = Box::new(self.expression()?);
                self.consume(TokenKind::Semicolon)?;
                Ok(match keyword.kind {
                    TokenKind::Var => Node::VarDecl { name, init: value },
                    _ => Node::Assign { name, value },
                })
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.check(TokenKind::Semicolon) {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                self.consume(TokenKind::Semicolon)?;
                Ok(Node::Return(value))
            }
            _ => {
                let expr = self.expression()?;
                self.consume(TokenKind::Semicolon)?;
                Ok(expr)
            }
        }
    }

    fn block(&mut self) -> Result<Node, ParseError> {
        self.consume(TokenKind::LeftBrace)?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.unexpected("}"));
            }
            statements.push(self.statement()?);
        }
        self.advance();
        Ok(Node::Block(statements))
    }

    fn condition(&mut self) -> Result<Box<Node>, ParseError> {
        self.consume(TokenKind::LeftParen)?;
        let cond = self.expression()?;
        self.consume(TokenKind::RightParen)?;
        Ok(Box::new(cond))
    }

    fn if_statement(&mut self) -> Result<Node, ParseError> {
        self.consume(TokenKind::If)?;
        let cond = self.condition()?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.eat(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn while_statement(&mut self) -> Result<Node, ParseError> {
        self.consume(TokenKind::While)?;
        let cond = self.condition()?;
        let body = Box::new(self.statement()?);
        Ok(Node::While { cond, body })
    }

    fn expression(&mut self) -> Result<Node, ParseError> {
        self.equality()
    }

    fn equality(&mut self) -> Result<Node, ParseError> {
        let mut left = self.ternary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Equal => Op::Equal,
                TokenKind::Hash => Op::NotEqual,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.ternary()?;
            left = binary(op, left, right);
        }
    }

    // Both branches recurse into `ternary`, which makes chains right-associative.
    fn ternary(&mut self) -> Result<Node, ParseError> {
        let cond = self.term()?;
        if !self.eat(TokenKind::Question) {
            return Ok(cond);
        }
        let then = self.ternary()?;
        self.consume(TokenKind::Colon)?;
        let otherwise = self.ternary()?;
        Ok(Node::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        })
    }

    fn term(&mut self) -> Result<Node, ParseError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => Op::Plus,
                TokenKind::Minus => Op::Minus,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
    }

    // The right operand is a bare primary: `2 * f(3)` does not parse.
    fn factor(&mut self) -> Result<Node, ParseError> {
        let mut left = self.call()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => Op::Star,
                TokenKind::Slash => Op::Slash,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.primary()?;
            left = binary(op, left, right);
        }
    }

    fn call(&mut self) -> Result<Node, ParseError> {
        let mut callee = self.primary()?;
        while self.eat(TokenKind::LeftParen) {
            let args = self.arguments()?;
            callee = Node::Call {
                callee: Box::new(callee),
                args,
            };
        }
        Ok(callee)
    }

    fn arguments(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut args = Vec::new();
        if !self.eat(TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RightParen)?;
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Node, ParseError> {
        match self.current.kind {
            TokenKind::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(TokenKind::RightParen)?;
                Ok(expr)
            }
            TokenKind::Func => self.func_literal(),
            TokenKind::Integer => {
                let token = self.advance();
                token
                    .slice
                    .parse()
                    .map(Node::Int)
                    .map_err(|_| ParseError::IntegerOutOfRange {
                        literal: token.slice.to_string(),
                        span: token.span().into(),
                    })
            }
            TokenKind::Ident => Ok(Node::Ident(self.advance().slice.to_string())),
            _ => Err(ParseError::ExpectedExpression {
                found: self.current.to_string(),
                span: self.current.span().into(),
            }),
        }
    }

    fn func_literal(&mut self) -> Result<Node, ParseError> {
        self.consume(TokenKind::Func)?;
        self.consume(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.eat(TokenKind::RightParen) {
            loop {
                params.push(self.ident()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RightParen)?;
        }
        let body = self.block()?;
        Ok(Node::Func(Rc::new(FuncDecl { params, body })))
    }
}

fn binary(op: Op, left: Node, right: Node) -> Node {
    Node::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
