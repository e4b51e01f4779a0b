use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::token::Token;
use crate::lang::node::{Block, Expression, Program, Statement};

#[derive(Debug)]
pub struct ParserError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for ParserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for ParserError {}

/// Binding power of operators, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    /// `==` `!=`
    Equals,
    /// `<` `>`
    LessGreater,
    /// `+` `-`
    Sum,
    /// `*` `/`
    Product,
    /// `-x` `!x`
    Prefix,
    /// `f(x)`
    Call,
    /// `a[0]`
    Index,
}

fn token_precedence(token: &Token) -> Precedence {
    match token {
        Token::Equal | Token::NotEqual => Precedence::Equals,
        Token::Lt | Token::Gt => Precedence::LessGreater,
        Token::Plus | Token::Minus => Precedence::Sum,
        Token::Slash | Token::Star => Precedence::Product,
        Token::LParen => Precedence::Call,
        Token::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Pratt parser over the lexed token stream.
///
/// Parse methods follow one cursor convention: each leaves the cursor on
/// the *last* token of whatever it parsed, and the caller advances.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    /// The token stream must end with `Eof`, as the lexer guarantees.
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].token
    }

    fn cur_span(&self) -> &Span {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn peek_span(&self) -> &Span {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].span
    }

    fn next(&mut self) {
        self.pos += 1;
    }

    fn cur_is(&self, token: &Token) -> bool {
        self.cur() == token
    }

    fn peek_is(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn peek_precedence(&self) -> Precedence {
        token_precedence(self.peek())
    }

    fn cur_precedence(&self) -> Precedence {
        token_precedence(self.cur())
    }

    fn error_at(&self, span: &Span, message: impl Into<String>) -> ParserError {
        ParserError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    /// Advance iff the next token is `expected`; error otherwise.
    fn expect_peek(&mut self, expected: Token) -> Result<(), ParserError> {
        if self.peek_is(&expected) {
            self.next();
            Ok(())
        } else {
            Err(self.error_at(
                &self.peek_span().clone(),
                format!("expected next token to be {}, got {}", expected, self.peek()),
            ))
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParserError> {
        let mut statements = Vec::new();

        while !self.cur_is(&Token::Eof) {
            statements.push(self.parse_statement()?);
            self.next();
        }

        Ok(Program { statements })
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn parse_statement(&mut self) -> Result<Statement, ParserError> {
        match self.cur() {
            Token::Let => self.parse_let_statement(),
            Token::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement, ParserError> {
        let name = match self.peek() {
            Token::Ident(name) => name.clone(),
            other => {
                return Err(self.error_at(
                    &self.peek_span().clone(),
                    format!("expected identifier after let, got {}", other),
                ))
            }
        };
        self.next();

        self.expect_peek(Token::Assign)?;
        self.next();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(&Token::Semicolon) {
            self.next();
        }

        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> Result<Statement, ParserError> {
        self.next();

        let value = self.parse_expression(Precedence::Lowest)?;

        if self.peek_is(&Token::Semicolon) {
            self.next();
        }

        Ok(Statement::Return(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, ParserError> {
        let expression = self.parse_expression(Precedence::Lowest)?;

        // Semicolons after expressions are optional.
        if self.peek_is(&Token::Semicolon) {
            self.next();
        }

        Ok(Statement::Expression(expression))
    }

    fn parse_block(&mut self) -> Result<Block, ParserError> {
        let open_span = self.cur_span().clone();
        self.next();

        let mut statements = Vec::new();
        while !self.cur_is(&Token::RBrace) {
            if self.cur_is(&Token::Eof) {
                return Err(self.error_at(&open_span, "unclosed block, expected }"));
            }
            statements.push(self.parse_statement()?);
            self.next();
        }

        Ok(Block { statements })
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression, ParserError> {
        let mut left = self.parse_prefix()?;

        while !self.peek_is(&Token::Semicolon) && precedence < self.peek_precedence() {
            left = match self.peek() {
                Token::Plus
                | Token::Minus
                | Token::Slash
                | Token::Star
                | Token::Equal
                | Token::NotEqual
                | Token::Lt
                | Token::Gt => {
                    self.next();
                    self.parse_infix_expression(left)?
                }
                Token::LParen => {
                    self.next();
                    self.parse_call_expression(left)?
                }
                Token::LBracket => {
                    self.next();
                    self.parse_index_expression(left)?
                }
                _ => return Ok(left),
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParserError> {
        match self.cur() {
            Token::Ident(name) => Ok(Expression::Identifier(name.clone())),
            Token::Integer(n) => Ok(Expression::Integer(*n)),
            Token::String(s) => Ok(Expression::String(s.clone())),
            Token::True => Ok(Expression::Boolean(true)),
            Token::False => Ok(Expression::Boolean(false)),
            Token::Bang | Token::Minus => self.parse_prefix_expression(),
            Token::LParen => self.parse_grouped_expression(),
            Token::If => self.parse_if_expression(),
            Token::Function => self.parse_function_literal(),
            Token::LBracket => {
                let elements = self.parse_expression_list(Token::RBracket)?;
                Ok(Expression::Array(elements))
            }
            Token::LBrace => self.parse_hash_literal(),
            other => Err(self.error_at(
                &self.cur_span().clone(),
                format!("no prefix parse rule for {}", other),
            )),
        }
    }

    fn parse_prefix_expression(&mut self) -> Result<Expression, ParserError> {
        let operator = self.cur().to_string();
        self.next();

        let right = self.parse_expression(Precedence::Prefix)?;

        Ok(Expression::Prefix {
            operator,
            right: Box::new(right),
        })
    }

    fn parse_infix_expression(&mut self, left: Expression) -> Result<Expression, ParserError> {
        let operator = self.cur().to_string();
        let precedence = self.cur_precedence();
        self.next();

        let right = self.parse_expression(precedence)?;

        Ok(Expression::Infix {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_grouped_expression(&mut self) -> Result<Expression, ParserError> {
        self.next();

        let expression = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::RParen)?;

        Ok(expression)
    }

    fn parse_if_expression(&mut self) -> Result<Expression, ParserError> {
        self.expect_peek(Token::LParen)?;
        self.next();

        let condition = self.parse_expression(Precedence::Lowest)?;

        self.expect_peek(Token::RParen)?;
        self.expect_peek(Token::LBrace)?;

        let consequence = self.parse_block()?;

        let alternative = if self.peek_is(&Token::Else) {
            self.next();
            self.expect_peek(Token::LBrace)?;
            Some(self.parse_block()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function_literal(&mut self) -> Result<Expression, ParserError> {
        self.expect_peek(Token::LParen)?;

        let parameters = self.parse_function_parameters()?;

        self.expect_peek(Token::LBrace)?;
        let body = self.parse_block()?;

        Ok(Expression::Function { parameters, body })
    }

    fn parse_function_parameters(&mut self) -> Result<Vec<String>, ParserError> {
        let mut parameters = Vec::new();

        if self.peek_is(&Token::RParen) {
            self.next();
            return Ok(parameters);
        }

        self.next();
        parameters.push(self.cur_ident()?);

        while self.peek_is(&Token::Comma) {
            self.next();
            self.next();
            parameters.push(self.cur_ident()?);
        }

        self.expect_peek(Token::RParen)?;

        Ok(parameters)
    }

    fn cur_ident(&self) -> Result<String, ParserError> {
        match self.cur() {
            Token::Ident(name) => Ok(name.clone()),
            other => Err(self.error_at(
                &self.cur_span().clone(),
                format!("expected identifier, got {}", other),
            )),
        }
    }

    fn parse_call_expression(&mut self, function: Expression) -> Result<Expression, ParserError> {
        let arguments = self.parse_expression_list(Token::RParen)?;

        Ok(Expression::Call {
            function: Box::new(function),
            arguments,
        })
    }

    fn parse_index_expression(&mut self, left: Expression) -> Result<Expression, ParserError> {
        self.next();

        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(Token::RBracket)?;

        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
        })
    }

    /// Comma-separated expressions up to (and consuming) `end`.
    fn parse_expression_list(&mut self, end: Token) -> Result<Vec<Expression>, ParserError> {
        let mut list = Vec::new();

        if self.peek_is(&end) {
            self.next();
            return Ok(list);
        }

        self.next();
        list.push(self.parse_expression(Precedence::Lowest)?);

        while self.peek_is(&Token::Comma) {
            self.next();
            self.next();
            list.push(self.parse_expression(Precedence::Lowest)?);
        }

        self.expect_peek(end)?;

        Ok(list)
    }

    fn parse_hash_literal(&mut self) -> Result<Expression, ParserError> {
        let mut pairs = Vec::new();

        while !self.peek_is(&Token::RBrace) {
            self.next();
            let key = self.parse_expression(Precedence::Lowest)?;

            self.expect_peek(Token::Colon)?;
            self.next();
            let value = self.parse_expression(Precedence::Lowest)?;

            pairs.push((key, value));

            if !self.peek_is(&Token::RBrace) {
                self.expect_peek(Token::Comma)?;
            }
        }

        self.expect_peek(Token::RBrace)?;

        Ok(Expression::Hash(pairs))
    }
}
