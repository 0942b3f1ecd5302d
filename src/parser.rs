/// Recursive-descent parser — tokens to the expression/statement tree.
///
/// Expressions use precedence climbing over the operator table in
/// `binary_power`; compound assignment reuses the base operator's entry.
/// Automatic semicolon insertion follows the three standard rules: offending
/// token on a new line, closing brace, end of input. The restricted
/// productions (return/throw/break/continue, postfix ++/--) refuse a line
/// terminator before their operand.
///
/// No recovery: the first error aborts with a SyntaxError.
use crate::ast::{
    BinaryOp, CatchClause, Expr, ExprKind, ForInTarget, ForInit, FunctionLiteral, IncDecOp,
    Literal, LogicalOp, NodeId, ObjectEntry, ObjectEntryKind, Stmt, StmtKind, SwitchCase, UnaryOp,
};
use crate::errors::Span;
use crate::lexer::{Lexer, Token, TokenInfo};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        ParseError {
            message: message.into(),
            span,
        }
    }
}

pub struct Parser {
    tokens: Vec<TokenInfo>,
    pos: usize,
    next_id: NodeId,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source)
            .tokenize()
            .map_err(|e| ParseError::new(e.message, e.span))?;
        Ok(Parser {
            tokens,
            pos: 0,
            next_id: 0,
        })
    }

    /// Parse a whole program.
    pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
        let mut parser = Parser::new(source)?;
        let mut stmts = Vec::new();
        while parser.peek() != &Token::Eof {
            stmts.push(parser.parse_statement()?);
        }
        Ok(stmts)
    }

    // -----------------------------------------------------------------------
    // Token helpers
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].token
    }

    fn peek_nth(&self, n: usize) -> &Token {
        match self.tokens.get(self.pos + n) {
            Some(info) => &info.token,
            None => &Token::Eof,
        }
    }

    fn newline_before(&self) -> bool {
        self.tokens[self.pos].newline_before
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].token.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ParseError> {
        if self.peek() == &token {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::new(
                format!("Expected {} but found {:?}", what, self.peek()),
                self.current_span(),
            ))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(ParseError::new(
                format!("Expected {} but found {:?}", what, other),
                self.current_span(),
            )),
        }
    }

    /// Semicolon, or one of the three insertion rules.
    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        if self.eat(&Token::Semicolon) {
            return Ok(());
        }
        if self.newline_before() || self.peek() == &Token::RBrace || self.peek() == &Token::Eof {
            return Ok(());
        }
        Err(ParseError::new(
            format!("Expected ';' but found {:?}", self.peek()),
            self.current_span(),
        ))
    }

    fn id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn expr(&mut self, kind: ExprKind, span: Span) -> Expr {
        Expr {
            id: self.id(),
            span,
            kind,
        }
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    pub fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.current_span();
        match self.peek() {
            Token::LBrace => {
                let body = self.parse_block()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Block(body),
                })
            }
            Token::Var => {
                self.advance();
                let decls = self.parse_var_declarators(true)?;
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::VarDecl(decls),
                })
            }
            Token::Function => {
                let func = self.parse_function_literal(true)?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::FunctionDecl(func),
                })
            }
            Token::If => self.parse_if(start),
            Token::While => self.parse_while(start),
            Token::Do => self.parse_do_while(start),
            Token::For => self.parse_for(start),
            Token::Return => {
                self.advance();
                let value = if self.peek() == &Token::Semicolon
                    || self.peek() == &Token::RBrace
                    || self.peek() == &Token::Eof
                    || self.newline_before()
                {
                    None
                } else {
                    Some(self.parse_expression(true)?)
                };
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Return(value),
                })
            }
            Token::Throw => {
                self.advance();
                if self.newline_before() {
                    return Err(ParseError::new(
                        "Illegal newline after 'throw'",
                        self.current_span(),
                    ));
                }
                let value = self.parse_expression(true)?;
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Throw(value),
                })
            }
            Token::Break | Token::Continue => {
                let is_break = self.peek() == &Token::Break;
                self.advance();
                let label = match self.peek().clone() {
                    Token::Ident(name) if !self.newline_before() => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: if is_break {
                        StmtKind::Break(label)
                    } else {
                        StmtKind::Continue(label)
                    },
                })
            }
            Token::Try => self.parse_try(start),
            Token::With => {
                self.advance();
                self.expect(Token::LParen, "'('")?;
                let object = self.parse_expression(true)?;
                self.expect(Token::RParen, "')'")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::With { object, body },
                })
            }
            Token::Switch => self.parse_switch(start),
            Token::Debugger => {
                self.advance();
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Debugger,
                })
            }
            Token::Semicolon => {
                self.advance();
                Ok(Stmt {
                    span: start,
                    kind: StmtKind::Empty,
                })
            }
            Token::Ident(_) if self.peek_nth(1) == &Token::Colon => {
                let label = self.expect_ident("label")?;
                self.advance(); // ':'
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Labeled { label, body },
                })
            }
            _ => {
                let expr = self.parse_expression(true)?;
                self.expect_semicolon()?;
                Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::Expr(expr),
                })
            }
        }
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut body = Vec::new();
        while self.peek() != &Token::RBrace && self.peek() != &Token::Eof {
            body.push(self.parse_statement()?);
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(body)
    }

    fn parse_var_declarators(
        &mut self,
        allow_in: bool,
    ) -> Result<Vec<(String, Option<Expr>)>, ParseError> {
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident("variable name")?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment(allow_in)?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_if(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression(true)?;
        self.expect(Token::RParen, "')'")?;
        let then = Box::new(self.parse_statement()?);
        let other = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::If { cond, then, other },
        })
    }

    fn parse_while(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression(true)?;
        self.expect(Token::RParen, "')'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::While { cond, body },
        })
    }

    fn parse_do_while(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        let body = Box::new(self.parse_statement()?);
        self.expect(Token::While, "'while'")?;
        self.expect(Token::LParen, "'('")?;
        let cond = self.parse_expression(true)?;
        self.expect(Token::RParen, "')'")?;
        // do-while tolerates a missing semicolon even mid-line.
        self.eat(&Token::Semicolon);
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::DoWhile { body, cond },
        })
    }

    fn parse_for(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(Token::LParen, "'('")?;

        let init = if self.peek() == &Token::Semicolon {
            None
        } else if self.peek() == &Token::Var {
            self.advance();
            let decls = self.parse_var_declarators(false)?;
            if self.peek() == &Token::In {
                // for (var x in obj)
                if decls.len() != 1 || decls[0].1.is_some() {
                    return Err(ParseError::new(
                        "Invalid left-hand side in for-in",
                        self.current_span(),
                    ));
                }
                self.advance();
                let object = self.parse_expression(true)?;
                self.expect(Token::RParen, "')'")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::ForIn {
                        target: ForInTarget::Var(decls.into_iter().next().unwrap().0),
                        object,
                        body,
                    },
                });
            }
            Some(ForInit::Var(decls))
        } else {
            let expr = self.parse_expression(false)?;
            if self.peek() == &Token::In {
                if !expr.is_reference() {
                    return Err(ParseError::new(
                        "Invalid left-hand side in for-in",
                        self.current_span(),
                    ));
                }
                self.advance();
                let object = self.parse_expression(true)?;
                self.expect(Token::RParen, "')'")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt {
                    span: start.merge(self.prev_span()),
                    kind: StmtKind::ForIn {
                        target: ForInTarget::Expr(expr),
                        object,
                        body,
                    },
                });
            }
            Some(ForInit::Expr(expr))
        };

        self.expect(Token::Semicolon, "';'")?;
        let cond = if self.peek() == &Token::Semicolon {
            None
        } else {
            Some(self.parse_expression(true)?)
        };
        self.expect(Token::Semicolon, "';'")?;
        let update = if self.peek() == &Token::RParen {
            None
        } else {
            Some(self.parse_expression(true)?)
        };
        self.expect(Token::RParen, "')'")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::For {
                init,
                cond,
                update,
                body,
            },
        })
    }

    fn parse_try(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        let block = self.parse_block()?;
        let catch = if self.eat(&Token::Catch) {
            self.expect(Token::LParen, "'('")?;
            let param = self.expect_ident("catch parameter")?;
            self.expect(Token::RParen, "')'")?;
            let body = self.parse_block()?;
            Some(CatchClause { param, body })
        } else {
            None
        };
        let finally = if self.eat(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(ParseError::new(
                "Missing catch or finally after try",
                self.current_span(),
            ));
        }
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::Try {
                block,
                catch,
                finally,
            },
        })
    }

    fn parse_switch(&mut self, start: Span) -> Result<Stmt, ParseError> {
        self.advance();
        self.expect(Token::LParen, "'('")?;
        let discriminant = self.parse_expression(true)?;
        self.expect(Token::RParen, "')'")?;
        self.expect(Token::LBrace, "'{'")?;
        let mut cases = Vec::new();
        let mut saw_default = false;
        while self.peek() != &Token::RBrace && self.peek() != &Token::Eof {
            let test = if self.eat(&Token::Case) {
                let test = self.parse_expression(true)?;
                Some(test)
            } else if self.eat(&Token::Default) {
                if saw_default {
                    return Err(ParseError::new(
                        "More than one default clause in switch statement",
                        self.current_span(),
                    ));
                }
                saw_default = true;
                None
            } else {
                return Err(ParseError::new(
                    format!("Expected 'case' or 'default' but found {:?}", self.peek()),
                    self.current_span(),
                ));
            };
            self.expect(Token::Colon, "':'")?;
            let mut body = Vec::new();
            while !matches!(
                self.peek(),
                Token::Case | Token::Default | Token::RBrace | Token::Eof
            ) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Stmt {
            span: start.merge(self.prev_span()),
            kind: StmtKind::Switch {
                discriminant,
                cases,
            },
        })
    }

    fn parse_function_literal(&mut self, require_name: bool) -> Result<FunctionLiteral, ParseError> {
        let start = self.current_span();
        self.expect(Token::Function, "'function'")?;
        let name = match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Some(name)
            }
            _ if require_name => {
                return Err(ParseError::new(
                    "Function statements require a name",
                    self.current_span(),
                ))
            }
            _ => None,
        };
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                params.push(self.expect_ident("parameter name")?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_block()?;
        Ok(FunctionLiteral {
            id: self.id(),
            name,
            params,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Full expression including the `,` list form.
    pub fn parse_expression(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let first = self.parse_assignment(allow_in)?;
        if self.peek() != &Token::Comma {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.parse_assignment(allow_in)?);
        }
        let span = start.merge(self.prev_span());
        Ok(self.expr(ExprKind::Comma(items), span))
    }

    fn assignment_base_op(token: &Token) -> Option<Option<BinaryOp>> {
        match token {
            Token::Assign => Some(None),
            Token::PlusAssign => Some(Some(BinaryOp::Add)),
            Token::MinusAssign => Some(Some(BinaryOp::Sub)),
            Token::StarAssign => Some(Some(BinaryOp::Mul)),
            Token::SlashAssign => Some(Some(BinaryOp::Div)),
            Token::PercentAssign => Some(Some(BinaryOp::Mod)),
            Token::ShlAssign => Some(Some(BinaryOp::Shl)),
            Token::ShrAssign => Some(Some(BinaryOp::Shr)),
            Token::UshrAssign => Some(Some(BinaryOp::Ushr)),
            Token::AndAssign => Some(Some(BinaryOp::BitAnd)),
            Token::XorAssign => Some(Some(BinaryOp::BitXor)),
            Token::OrAssign => Some(Some(BinaryOp::BitOr)),
            _ => None,
        }
    }

    fn parse_assignment(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let target = self.parse_ternary(allow_in)?;
        if let Some(op) = Self::assignment_base_op(self.peek()) {
            // Invalid targets parse fine; the resolver rejects them with a
            // ReferenceError later.
            self.advance();
            let value = self.parse_assignment(allow_in)?;
            let span = start.merge(self.prev_span());
            return Ok(self.expr(
                ExprKind::Assign {
                    op,
                    target: Box::new(target),
                    value: Box::new(value),
                },
                span,
            ));
        }
        Ok(target)
    }

    fn parse_ternary(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let cond = self.parse_binary(0, allow_in)?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.parse_assignment(true)?;
        self.expect(Token::Colon, "':'")?;
        let other = self.parse_assignment(allow_in)?;
        let span = start.merge(self.prev_span());
        Ok(self.expr(
            ExprKind::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                other: Box::new(other),
            },
            span,
        ))
    }

    /// Binding power for a binary (or logical) operator token.
    fn binary_power(token: &Token, allow_in: bool) -> Option<u8> {
        Some(match token {
            Token::OrOr => 1,
            Token::AndAnd => 2,
            Token::BitOr => 3,
            Token::BitXor => 4,
            Token::BitAnd => 5,
            Token::Eq | Token::Ne | Token::StrictEq | Token::StrictNe => 6,
            Token::Lt | Token::Gt | Token::Le | Token::Ge | Token::InstanceOf => 7,
            Token::In if allow_in => 7,
            Token::Shl | Token::Shr | Token::Ushr => 8,
            Token::Plus | Token::Minus => 9,
            Token::Star | Token::Slash | Token::Percent => 10,
            _ => return None,
        })
    }

    fn binary_op(token: &Token) -> Option<BinaryOp> {
        Some(match token {
            Token::BitOr => BinaryOp::BitOr,
            Token::BitXor => BinaryOp::BitXor,
            Token::BitAnd => BinaryOp::BitAnd,
            Token::Eq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::StrictEq => BinaryOp::StrictEq,
            Token::StrictNe => BinaryOp::StrictNe,
            Token::Lt => BinaryOp::Lt,
            Token::Gt => BinaryOp::Gt,
            Token::Le => BinaryOp::Le,
            Token::Ge => BinaryOp::Ge,
            Token::In => BinaryOp::In,
            Token::InstanceOf => BinaryOp::InstanceOf,
            Token::Shl => BinaryOp::Shl,
            Token::Shr => BinaryOp::Shr,
            Token::Ushr => BinaryOp::Ushr,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Mod,
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_power: u8, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let mut left = self.parse_unary(allow_in)?;
        while let Some(power) = Self::binary_power(self.peek(), allow_in) {
            if power < min_power {
                break;
            }
            let token = self.advance();
            // Left-associative: the right side binds one level tighter.
            let right = self.parse_binary(power + 1, allow_in)?;
            let span = start.merge(self.prev_span());
            left = match token {
                Token::AndAnd => self.expr(
                    ExprKind::Logical {
                        op: LogicalOp::And,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                ),
                Token::OrOr => self.expr(
                    ExprKind::Logical {
                        op: LogicalOp::Or,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                ),
                other => {
                    let op = Self::binary_op(&other).expect("operator table mismatch");
                    self.expr(
                        ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    )
                }
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let op = match self.peek() {
            Token::Plus => Some(UnaryOp::Plus),
            Token::Minus => Some(UnaryOp::Minus),
            Token::Not => Some(UnaryOp::Not),
            Token::BitNot => Some(UnaryOp::BitNot),
            Token::TypeOf => Some(UnaryOp::TypeOf),
            Token::Void => Some(UnaryOp::Void),
            Token::Delete => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary(allow_in)?;
            let span = start.merge(self.prev_span());
            return Ok(self.expr(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) {
            let op = if self.advance() == Token::PlusPlus {
                IncDecOp::Inc
            } else {
                IncDecOp::Dec
            };
            let target = self.parse_unary(allow_in)?;
            let span = start.merge(self.prev_span());
            return Ok(self.expr(
                ExprKind::Prefix {
                    op,
                    target: Box::new(target),
                },
                span,
            ));
        }
        self.parse_postfix(allow_in)
    }

    fn parse_postfix(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let target = self.parse_left_hand_side(allow_in, true)?;
        if matches!(self.peek(), Token::PlusPlus | Token::MinusMinus) && !self.newline_before() {
            let op = if self.advance() == Token::PlusPlus {
                IncDecOp::Inc
            } else {
                IncDecOp::Dec
            };
            let span = start.merge(self.prev_span());
            return Ok(self.expr(
                ExprKind::Postfix {
                    op,
                    target: Box::new(target),
                },
                span,
            ));
        }
        Ok(target)
    }

    fn parse_left_hand_side(&mut self, allow_in: bool, allow_call: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        let mut expr = if self.peek() == &Token::New {
            self.parse_new(allow_in)?
        } else {
            self.parse_primary(allow_in)?
        };
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = self.expect_ident("property name")?;
                    let span = start.merge(self.prev_span());
                    expr = self.expr(
                        ExprKind::Member {
                            object: Box::new(expr),
                            name,
                        },
                        span,
                    );
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression(true)?;
                    self.expect(Token::RBracket, "']'")?;
                    let span = start.merge(self.prev_span());
                    expr = self.expr(
                        ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                Token::LParen if allow_call => {
                    let args = self.parse_arguments()?;
                    let span = start.merge(self.prev_span());
                    expr = self.expr(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_new(&mut self, allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        self.expect(Token::New, "'new'")?;
        let callee = self.parse_left_hand_side(allow_in, false)?;
        let args = if self.peek() == &Token::LParen {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        let span = start.merge(self.prev_span());
        Ok(self.expr(
            ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            span,
        ))
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_assignment(true)?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self, _allow_in: bool) -> Result<Expr, ParseError> {
        let start = self.current_span();
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Number(n)), start))
            }
            Token::Str(s) => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Str(s)), start))
            }
            Token::Regex { pattern, flags } => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Regex { pattern, flags }), start))
            }
            Token::True => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Bool(true)), start))
            }
            Token::False => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Bool(false)), start))
            }
            Token::Null => {
                self.advance();
                Ok(self.expr(ExprKind::Literal(Literal::Null), start))
            }
            Token::This => {
                self.advance();
                Ok(self.expr(ExprKind::This, start))
            }
            Token::Ident(name) => {
                self.advance();
                Ok(self.expr(ExprKind::Name(name), start))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression(true)?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.parse_array_literal(start),
            Token::LBrace => self.parse_object_literal(start),
            Token::Function => {
                let func = self.parse_function_literal(false)?;
                let span = start.merge(self.prev_span());
                Ok(self.expr(ExprKind::Function(func), span))
            }
            other => Err(ParseError::new(
                format!("Unexpected token {:?}", other),
                start,
            )),
        }
    }

    fn parse_array_literal(&mut self, start: Span) -> Result<Expr, ParseError> {
        self.advance(); // '['
        let mut elements = Vec::new();
        loop {
            match self.peek() {
                Token::RBracket => {
                    self.advance();
                    break;
                }
                Token::Comma => {
                    // Elision.
                    self.advance();
                    elements.push(None);
                }
                _ => {
                    elements.push(Some(self.parse_assignment(true)?));
                    if !self.eat(&Token::Comma) {
                        self.expect(Token::RBracket, "']'")?;
                        break;
                    }
                }
            }
        }
        let span = start.merge(self.prev_span());
        Ok(self.expr(ExprKind::ArrayLit(elements), span))
    }

    fn parse_property_key(&mut self) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            Token::Str(s) => {
                self.advance();
                Ok(s)
            }
            Token::Number(n) => {
                self.advance();
                Ok(crate::value::number_to_string(n))
            }
            other => Err(ParseError::new(
                format!("Expected property name but found {:?}", other),
                self.current_span(),
            )),
        }
    }

    fn parse_object_literal(&mut self, start: Span) -> Result<Expr, ParseError> {
        self.advance(); // '{'
        let mut entries = Vec::new();
        while self.peek() != &Token::RBrace {
            // get/set accessor entries: `get name() { ... }`.
            let accessor = match self.peek() {
                Token::Ident(word) if word == "get" || word == "set" => {
                    match self.peek_nth(1) {
                        Token::Colon | Token::Comma | Token::RBrace | Token::LParen => None,
                        _ => Some(word == "get"),
                    }
                }
                _ => None,
            };
            if let Some(is_getter) = accessor {
                self.advance(); // get / set
                let key = self.parse_property_key()?;
                let fn_start = self.current_span();
                self.expect(Token::LParen, "'('")?;
                let mut params = Vec::new();
                if self.peek() != &Token::RParen {
                    loop {
                        params.push(self.expect_ident("parameter name")?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_block()?;
                let func = FunctionLiteral {
                    id: self.id(),
                    name: Some(key.clone()),
                    params,
                    body,
                    span: fn_start.merge(self.prev_span()),
                };
                entries.push(ObjectEntry {
                    key,
                    kind: if is_getter {
                        ObjectEntryKind::Getter(func)
                    } else {
                        ObjectEntryKind::Setter(func)
                    },
                });
            } else {
                let key = self.parse_property_key()?;
                self.expect(Token::Colon, "':'")?;
                let value = self.parse_assignment(true)?;
                entries.push(ObjectEntry {
                    key,
                    kind: ObjectEntryKind::Data(value),
                });
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        let span = start.merge(self.prev_span());
        Ok(self.expr(ExprKind::ObjectLit(entries), span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExprKind, StmtKind};

    fn parse(src: &str) -> Vec<Stmt> {
        Parser::parse_program(src).expect("parse should succeed")
    }

    #[test]
    fn precedence() {
        let stmts = parse("x = 1 + 2 * 3;");
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("expected expression statement")
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment")
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!("expected binary")
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn asi_inserts_at_newline() {
        let stmts = parse("var a = 1\nvar b = 2");
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn asi_restricted_return() {
        // `return` followed by a newline returns undefined.
        let stmts = parse("function f() { return\n1; }");
        let StmtKind::FunctionDecl(func) = &stmts[0].kind else {
            panic!("expected function")
        };
        assert!(matches!(func.body[0].kind, StmtKind::Return(None)));
    }

    #[test]
    fn missing_semicolon_same_line_is_an_error() {
        assert!(Parser::parse_program("var a = 1 var b = 2").is_err());
    }

    #[test]
    fn for_in_forms() {
        let stmts = parse("for (var k in obj) {}\nfor (k in obj) {}");
        assert!(matches!(
            stmts[0].kind,
            StmtKind::ForIn {
                target: ForInTarget::Var(_),
                ..
            }
        ));
        assert!(matches!(
            stmts[1].kind,
            StmtKind::ForIn {
                target: ForInTarget::Expr(_),
                ..
            }
        ));
    }

    #[test]
    fn compound_assignment_reuses_base_op() {
        let stmts = parse("x += 2;");
        let StmtKind::Expr(expr) = &stmts[0].kind else {
            panic!("expected expression")
        };
        assert!(matches!(
            expr.kind,
            ExprKind::Assign {
                op: Some(BinaryOp::Add),
                ..
            }
        ));
    }

    #[test]
    fn object_literal_accessors() {
        let stmts = parse("var o = { get x() { return 1; }, set x(v) {}, y: 2 };");
        let StmtKind::VarDecl(decls) = &stmts[0].kind else {
            panic!("expected var")
        };
        let ExprKind::ObjectLit(entries) = &decls[0].1.as_ref().unwrap().kind else {
            panic!("expected object literal")
        };
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0].kind, ObjectEntryKind::Getter(_)));
        assert!(matches!(entries[1].kind, ObjectEntryKind::Setter(_)));
        assert!(matches!(entries[2].kind, ObjectEntryKind::Data(_)));
    }

    #[test]
    fn new_without_arguments() {
        let stmts = parse("var d = new Thing;");
        let StmtKind::VarDecl(decls) = &stmts[0].kind else {
            panic!("expected var")
        };
        assert!(matches!(
            decls[0].1.as_ref().unwrap().kind,
            ExprKind::New { ref args, .. } if args.is_empty()
        ));
    }

    #[test]
    fn labeled_break_targets() {
        let stmts = parse("outer: for (;;) { break outer; }");
        assert!(matches!(stmts[0].kind, StmtKind::Labeled { .. }));
    }

    #[test]
    fn try_requires_catch_or_finally() {
        assert!(Parser::parse_program("try { }").is_err());
        assert!(Parser::parse_program("try { } finally { }").is_ok());
    }
}
