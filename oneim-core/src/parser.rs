//! Recursive-descent parser for 1im.
//!
//! Blocks carry no INDENT/DEDENT tokens; after a block header the parser
//! anchors on the column of the first inner statement and keeps consuming
//! statements while their start column is at least the anchor. A smaller
//! column, end of file, or a token from the caller's stop set ends the
//! block. `set` statements are disambiguated into their four forms by one
//! token of lookahead.

use bumpalo::Bump;

use crate::ast::{BinaryOp, ElseIf, Expr, Param, Program, Stmt, UnaryOp};
use crate::error::CoreError;
use crate::lexer::{Token, TokenKind};
use crate::types::Type;

pub fn parse<'a>(arena: &'a Bump, tokens: &[Token<'a>]) -> Result<Program<'a>, CoreError> {
    let mut parser = Parser {
        arena,
        tokens: tokens.to_vec(),
        pos: 0,
    };
    parser.parse_program()
}

struct Parser<'a> {
    arena: &'a Bump,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_program(&mut self) -> Result<Program<'a>, CoreError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !self.at(TokenKind::Eof) {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(Program {
            stmts: self.arena.alloc_slice_fill_iter(stmts),
        })
    }

    // ------------------------------------------------------------------
    // Token navigation
    // ------------------------------------------------------------------

    fn peek(&self) -> Token<'a> {
        self.tokens[self.pos]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> Token<'a> {
        let tok = self.tokens[self.pos];
        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token<'a>, CoreError> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.expected(what))
        }
    }

    fn skip_newlines(&mut self) {
        while self.at(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Simple statements must end the line themselves; anything trailing is
    /// a parse error rather than silently starting a new statement.
    fn end_of_line(&mut self) -> Result<(), CoreError> {
        if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
            Ok(())
        } else {
            Err(self.expected("end of line"))
        }
    }

    fn expected(&self, what: &str) -> CoreError {
        let tok = self.peek();
        let message = match tok.kind {
            TokenKind::Eof => format!("unexpected end of file, expected {what}"),
            TokenKind::Newline => format!("expected {what}, found end of line"),
            _ => format!("expected {what}, found '{}'", tok.lexeme),
        };
        CoreError::Parse {
            line: tok.line,
            col: tok.col,
            message,
        }
    }

    fn error_here(&self, message: &str) -> CoreError {
        let tok = self.peek();
        CoreError::Parse {
            line: tok.line,
            col: tok.col,
            message: message.to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt<'a>, CoreError> {
        match self.peek().kind {
            TokenKind::Set => self.parse_set(),
            TokenKind::Return => {
                self.advance();
                let value = if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_of_line()?;
                Ok(Stmt::Return { value })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Loop => self.parse_loop(),
            TokenKind::Parallel => self.parse_parallel(),
            TokenKind::Break => {
                self.advance();
                let value = if matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.end_of_line()?;
                Ok(Stmt::Break { value })
            }
            TokenKind::Continue => {
                self.advance();
                self.end_of_line()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Try => self.parse_try(),
            TokenKind::Else => Err(self.error_here("'else' without a matching 'if'")),
            TokenKind::Catch => Err(self.error_here("'catch' without a matching 'try'")),
            _ => {
                let expr = self.parse_expression()?;
                self.end_of_line()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// `set` begins four constructs: `set N to E`, `set N as T to E`,
    /// `set N with … returns …` / `set N as fn …`, and `set N[i] to E`.
    fn parse_set(&mut self) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::Set, "'set'")?;
        let name = self.expect(TokenKind::Name, "a name after 'set'")?.lexeme;
        match self.peek().kind {
            TokenKind::To => {
                self.advance();
                let value = self.parse_expression()?;
                self.end_of_line()?;
                Ok(Stmt::SetAssign { name, value })
            }
            TokenKind::With => {
                self.advance();
                let params = self.parse_params()?;
                self.parse_function_tail(name, params)
            }
            TokenKind::As => {
                self.advance();
                if self.at(TokenKind::Fn) {
                    self.advance();
                    let params = if self.at(TokenKind::With) {
                        self.advance();
                        self.parse_params()?
                    } else {
                        Vec::new()
                    };
                    self.parse_function_tail(name, params)
                } else {
                    let ty = self.parse_type()?;
                    self.expect(TokenKind::To, "'to' after the type")?;
                    let value = self.parse_expression()?;
                    self.end_of_line()?;
                    Ok(Stmt::TypedAssign { name, ty, value })
                }
            }
            TokenKind::LBracket => {
                let mut target = Expr::Variable(name);
                while self.at(TokenKind::LBracket) {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']' after the index")?;
                    target = Expr::Index {
                        target: self.arena.alloc(target),
                        index: self.arena.alloc(index),
                    };
                }
                self.expect(TokenKind::To, "'to' in the index assignment")?;
                let value = self.parse_expression()?;
                self.end_of_line()?;
                Ok(Stmt::IndexAssign { target, value })
            }
            _ => Err(self.expected("'to', 'as', 'with', or '[' after the name")),
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param<'a>>, CoreError> {
        let mut params = Vec::new();
        loop {
            let name = self.expect(TokenKind::Name, "a parameter name")?.lexeme;
            self.expect(TokenKind::As, "'as' after the parameter name")?;
            let ty = self.parse_type()?;
            params.push(Param { name, ty });
            if self.at(TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn parse_function_tail(
        &mut self,
        name: &'a str,
        params: Vec<Param<'a>>,
    ) -> Result<Stmt<'a>, CoreError> {
        let return_type = if self.at(TokenKind::Returns) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block(&[])?;
        Ok(Stmt::FunctionDef {
            name,
            params: self.arena.alloc_slice_fill_iter(params),
            return_type,
            body,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt<'a>, CoreError> {
        let if_tok = self.expect(TokenKind::If, "'if'")?;
        let condition = self.parse_expression()?;
        self.expect(TokenKind::Then, "'then' after the condition")?;
        let then_body = self.parse_block(&[TokenKind::Else])?;

        let mut else_ifs = Vec::new();
        let mut else_body = None;
        // An `else` dedented past this `if` belongs to an enclosing one.
        while self.at(TokenKind::Else) && self.peek().col >= if_tok.col {
            self.advance();
            if self.at(TokenKind::If) {
                self.advance();
                let condition = self.parse_expression()?;
                self.expect(TokenKind::Then, "'then' after the condition")?;
                let body = self.parse_block(&[TokenKind::Else])?;
                else_ifs.push(ElseIf { condition, body });
            } else {
                else_body = Some(self.parse_block(&[])?);
                break;
            }
        }
        Ok(Stmt::If {
            condition,
            then_body,
            else_ifs: self.arena.alloc_slice_fill_iter(else_ifs),
            else_body,
        })
    }

    fn parse_loop(&mut self) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::Loop, "'loop'")?;
        match self.peek().kind {
            TokenKind::While => self.parse_while(false),
            TokenKind::For => self.parse_for(false),
            _ => Err(self.expected("'while' or 'for' after 'loop'")),
        }
    }

    /// `parallel for`/`parallel while` are parallel loops; a bare
    /// `parallel` followed by a newline opens a parallel block of calls.
    fn parse_parallel(&mut self) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::Parallel, "'parallel'")?;
        match self.peek().kind {
            TokenKind::For => self.parse_for(true),
            TokenKind::While => self.parse_while(true),
            TokenKind::Newline => {
                let body = self.parse_block(&[])?;
                Ok(Stmt::ParallelBlock { body })
            }
            _ => Err(self.expected("'for', 'while', or a new line after 'parallel'")),
        }
    }

    fn parse_while(&mut self, parallel: bool) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::While, "'while'")?;
        let condition = self.parse_expression()?;
        let body = self.parse_block(&[])?;
        Ok(Stmt::While {
            condition,
            body,
            parallel,
        })
    }

    fn parse_for(&mut self, parallel: bool) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::For, "'for'")?;
        let variable = self.expect(TokenKind::Name, "a loop variable")?.lexeme;
        self.expect(TokenKind::In, "'in' after the loop variable")?;
        let iterable = self.parse_for_iterable()?;
        let body = self.parse_block(&[])?;
        Ok(Stmt::For {
            variable,
            iterable,
            body,
            parallel,
        })
    }

    /// Ranges are legal only here, as the iterable of a `for`.
    fn parse_for_iterable(&mut self) -> Result<Expr<'a>, CoreError> {
        let start = self.parse_expression()?;
        if matches!(self.peek().kind, TokenKind::DotDot | TokenKind::DotDotEq) {
            let inclusive = self.advance().kind == TokenKind::DotDotEq;
            let end = self.parse_expression()?;
            return Ok(Expr::Range {
                start: self.arena.alloc(start),
                end: self.arena.alloc(end),
                inclusive,
            });
        }
        Ok(start)
    }

    fn parse_try(&mut self) -> Result<Stmt<'a>, CoreError> {
        self.expect(TokenKind::Try, "'try'")?;
        let inner = self.parse_expression()?;
        if self.at(TokenKind::Catch) {
            self.advance();
            let catch_var = if self.at(TokenKind::Name) {
                Some(self.advance().lexeme)
            } else {
                None
            };
            let catch_body = self.parse_block(&[])?;
            Ok(Stmt::TryCatch {
                try_expr: inner,
                catch_var,
                catch_body,
            })
        } else {
            self.end_of_line()?;
            Ok(Stmt::Expr(Expr::Try(self.arena.alloc(inner))))
        }
    }

    /// Column-dedent block: anchor on the first statement's column, stop on
    /// a smaller column, end of file, or a stop-set token at any column.
    fn parse_block(&mut self, stop: &[TokenKind]) -> Result<&'a [Stmt<'a>], CoreError> {
        self.skip_newlines();
        let first = self.peek();
        if first.kind == TokenKind::Eof || stop.contains(&first.kind) {
            return Err(self.expected("an indented block"));
        }
        let anchor = first.col;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            let tok = self.peek();
            if tok.kind == TokenKind::Eof || tok.col < anchor || stop.contains(&tok.kind) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(self.arena.alloc_slice_fill_iter(stmts))
    }

    // ------------------------------------------------------------------
    // Expressions, precedence climbing
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr<'a>, CoreError> {
        self.parse_or()
    }

    fn binary(&mut self, op: BinaryOp, left: Expr<'a>, right: Expr<'a>) -> Expr<'a> {
        Expr::Binary {
            op,
            left: self.arena.alloc(left),
            right: self.arena.alloc(right),
        }
    }

    fn parse_or(&mut self) -> Result<Expr<'a>, CoreError> {
        let mut left = self.parse_and()?;
        while self.at(TokenKind::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = self.binary(BinaryOp::BoolOr, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr<'a>, CoreError> {
        let mut left = self.parse_comparison()?;
        while self.at(TokenKind::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = self.binary(BinaryOp::BoolAnd, left, right);
        }
        Ok(left)
    }

    /// A single comparison; `a < b < c` is rejected here, not in the
    /// analyzer.
    fn parse_comparison(&mut self) -> Result<Expr<'a>, CoreError> {
        let left = self.parse_additive()?;
        if let Some(op) = comparison_op(self.peek().kind) {
            self.advance();
            let right = self.parse_additive()?;
            if comparison_op(self.peek().kind).is_some() {
                return Err(self.error_here("comparison operators cannot be chained"));
            }
            return Ok(self.binary(op, left, right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr<'a>, CoreError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = self.binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr<'a>, CoreError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr<'a>, CoreError> {
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::Negate,
                    operand: self.arena.alloc(operand),
                })
            }
            TokenKind::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Unary {
                    op: UnaryOp::BoolNot,
                    operand: self.arena.alloc(operand),
                })
            }
            TokenKind::Try => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Try(self.arena.alloc(operand)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr<'a>, CoreError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LParen => {
                    let Expr::Variable(callee) = expr else {
                        return Err(self.error_here("call target must be a function name"));
                    };
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.at(TokenKind::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')' after the arguments")?;
                    expr = Expr::Call {
                        callee,
                        args: self.arena.alloc_slice_fill_iter(args),
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(TokenKind::RBracket, "']' after the index")?;
                    expr = Expr::Index {
                        target: self.arena.alloc(expr),
                        index: self.arena.alloc(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr<'a>, CoreError> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::IntLit => {
                self.advance();
                Ok(Expr::IntLiteral(tok.lexeme))
            }
            TokenKind::FloatLit => {
                self.advance();
                Ok(Expr::FloatLiteral(tok.lexeme))
            }
            TokenKind::StrLit => {
                self.advance();
                Ok(Expr::StringLiteral(tok.lexeme))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::BoolLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::BoolLiteral(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::NullLiteral)
            }
            TokenKind::Name => {
                self.advance();
                Ok(Expr::Variable(tok.lexeme))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.at(TokenKind::RBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if self.at(TokenKind::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "']' after the array elements")?;
                Ok(Expr::ArrayLiteral(self.arena.alloc_slice_fill_iter(elements)))
            }
            _ => Err(self.expected("an expression")),
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<Type<'a>, CoreError> {
        let base = self.parse_type_base()?;
        if self.at(TokenKind::Bang) {
            self.advance();
            let err = self.parse_type_base()?;
            return Ok(Type::ErrorUnion {
                ok: self.arena.alloc(base),
                err: self.arena.alloc(err),
            });
        }
        Ok(base)
    }

    fn parse_type_base(&mut self) -> Result<Type<'a>, CoreError> {
        let tok = self.peek();
        let ty = match tok.kind {
            TokenKind::LBracket => {
                self.advance();
                if self.at(TokenKind::RBracket) {
                    self.advance();
                    let elem = self.parse_type_base()?;
                    return Ok(Type::Slice {
                        elem: self.arena.alloc(elem),
                    });
                }
                let len_tok = self.expect(TokenKind::IntLit, "an array length")?;
                let len = len_tok.lexeme.parse::<usize>().map_err(|_| CoreError::Parse {
                    line: len_tok.line,
                    col: len_tok.col,
                    message: format!("array length '{}' is out of range", len_tok.lexeme),
                })?;
                self.expect(TokenKind::RBracket, "']' after the array length")?;
                let elem = self.parse_type_base()?;
                return Ok(Type::Array {
                    len,
                    elem: self.arena.alloc(elem),
                });
            }
            TokenKind::I8 => Type::I8,
            TokenKind::I16 => Type::I16,
            TokenKind::I32 => Type::I32,
            TokenKind::I64 => Type::I64,
            TokenKind::U8 => Type::U8,
            TokenKind::U16 => Type::U16,
            TokenKind::U32 => Type::U32,
            TokenKind::U64 => Type::U64,
            TokenKind::F32 => Type::F32,
            TokenKind::F64 => Type::F64,
            TokenKind::Bool => Type::Bool,
            TokenKind::Str => Type::Str,
            TokenKind::Void => Type::Void,
            _ => return Err(self.expected("a type")),
        };
        self.advance();
        Ok(ty)
    }
}

fn comparison_op(kind: TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Neq,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Lte,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Gte,
        _ => return None,
    };
    Some(op)
}
