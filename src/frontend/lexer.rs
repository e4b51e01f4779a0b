use serde::{Deserialize, Serialize};

use crate::frontend::token::Token;

/// Source position of a token, 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

/// A token together with where it starts in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, span: &Span, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    // Newlines carry no meaning in Cinder; they separate tokens like any
    // other whitespace.
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' || ch == '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Tokenize the whole source. The returned stream always ends with
    /// an `Eof` token.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();

            let Some(ch) = self.current() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    span,
                });
                break;
            };

            let token = match ch {
                '=' if self.peek() == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::Equal
                }
                '=' => {
                    self.advance();
                    Token::Assign
                }
                '!' if self.peek() == Some('=') => {
                    self.advance();
                    self.advance();
                    Token::NotEqual
                }
                '!' => {
                    self.advance();
                    Token::Bang
                }
                '+' => {
                    self.advance();
                    Token::Plus
                }
                '-' => {
                    self.advance();
                    Token::Minus
                }
                '*' => {
                    self.advance();
                    Token::Star
                }
                '/' => {
                    self.advance();
                    Token::Slash
                }
                '<' => {
                    self.advance();
                    Token::Lt
                }
                '>' => {
                    self.advance();
                    Token::Gt
                }
                ',' => {
                    self.advance();
                    Token::Comma
                }
                ';' => {
                    self.advance();
                    Token::Semicolon
                }
                ':' => {
                    self.advance();
                    Token::Colon
                }
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                '{' => {
                    self.advance();
                    Token::LBrace
                }
                '}' => {
                    self.advance();
                    Token::RBrace
                }
                '[' => {
                    self.advance();
                    Token::LBracket
                }
                ']' => {
                    self.advance();
                    Token::RBracket
                }
                '"' => self.read_string(&span)?,
                c if c.is_ascii_digit() => self.read_number(&span)?,
                c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(),
                c => {
                    self.advance();
                    Token::Illegal(c)
                }
            };

            // An illegal token is surfaced as the lex error; nothing
            // downstream ever consumes one.
            if let Token::Illegal(c) = token {
                return Err(self.error(&span, format!("illegal character '{}'", c)));
            }

            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }

    /// Read a double-quoted string. There are no escape sequences; the
    /// string runs to the next `"`.
    fn read_string(&mut self, span: &Span) -> Result<Token, LexerError> {
        self.advance();

        let mut value = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(value));
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
                None => {
                    return Err(self.error(span, "unterminated string"));
                }
            }
        }
    }

    fn read_number(&mut self, span: &Span) -> Result<Token, LexerError> {
        let mut digits = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        digits
            .parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| self.error(span, format!("integer literal '{}' is out of range", digits)))
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        Token::lookup_ident(&ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .expect("lexer error")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_next_token() {
        let input = r#"
        let five = 5;
        let ten = 10;

        let add = function(x, y) {
            x + y;
        };

        let result = add(five, ten);
        !-/*5;
        5 < 10 > 5;

        if (5 < 10) {
            return true;
        } else {
            return false;
        }

        10 == 10;
        10 != 9;
        "foobar"
        "foo bar"
        [1, 2];
        {"foo": "bar"}
        "#;

        let expected = vec![
            Token::Let,
            Token::Ident("five".to_string()),
            Token::Assign,
            Token::Integer(5),
            Token::Semicolon,
            Token::Let,
            Token::Ident("ten".to_string()),
            Token::Assign,
            Token::Integer(10),
            Token::Semicolon,
            Token::Let,
            Token::Ident("add".to_string()),
            Token::Assign,
            Token::Function,
            Token::LParen,
            Token::Ident("x".to_string()),
            Token::Comma,
            Token::Ident("y".to_string()),
            Token::RParen,
            Token::LBrace,
            Token::Ident("x".to_string()),
            Token::Plus,
            Token::Ident("y".to_string()),
            Token::Semicolon,
            Token::RBrace,
            Token::Semicolon,
            Token::Let,
            Token::Ident("result".to_string()),
            Token::Assign,
            Token::Ident("add".to_string()),
            Token::LParen,
            Token::Ident("five".to_string()),
            Token::Comma,
            Token::Ident("ten".to_string()),
            Token::RParen,
            Token::Semicolon,
            Token::Bang,
            Token::Minus,
            Token::Slash,
            Token::Star,
            Token::Integer(5),
            Token::Semicolon,
            Token::Integer(5),
            Token::Lt,
            Token::Integer(10),
            Token::Gt,
            Token::Integer(5),
            Token::Semicolon,
            Token::If,
            Token::LParen,
            Token::Integer(5),
            Token::Lt,
            Token::Integer(10),
            Token::RParen,
            Token::LBrace,
            Token::Return,
            Token::True,
            Token::Semicolon,
            Token::RBrace,
            Token::Else,
            Token::LBrace,
            Token::Return,
            Token::False,
            Token::Semicolon,
            Token::RBrace,
            Token::Integer(10),
            Token::Equal,
            Token::Integer(10),
            Token::Semicolon,
            Token::Integer(10),
            Token::NotEqual,
            Token::Integer(9),
            Token::Semicolon,
            Token::String("foobar".to_string()),
            Token::String("foo bar".to_string()),
            Token::LBracket,
            Token::Integer(1),
            Token::Comma,
            Token::Integer(2),
            Token::RBracket,
            Token::Semicolon,
            Token::LBrace,
            Token::String("foo".to_string()),
            Token::Colon,
            Token::String("bar".to_string()),
            Token::RBrace,
            Token::Eof,
        ];

        assert_eq!(tokenize(input), expected);
    }

    #[test]
    fn test_spans() {
        let spanned = Lexer::new("let x = 5;\nx").tokenize().expect("lexer error");

        assert_eq!(spanned[0].span, Span { line: 1, col: 1 });
        assert_eq!(spanned[1].span, Span { line: 1, col: 5 });
        assert_eq!(spanned[5].span, Span { line: 2, col: 1 });
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("\"abc").tokenize().expect_err("expected error");
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_illegal_character() {
        let err = Lexer::new("1 @ 2").tokenize().expect_err("expected error");
        assert!(err.message.contains("illegal character '@'"));
        assert_eq!(err.col, 3);
    }

    #[test]
    fn test_integer_out_of_range() {
        let err = Lexer::new("99999999999999999999")
            .tokenize()
            .expect_err("expected error");
        assert!(err.message.contains("out of range"));
    }
}
