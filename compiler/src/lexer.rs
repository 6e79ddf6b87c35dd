//! Lexer: tokenizes Pascal source code with error recovery.
//!
//! The lexer scans the source character by character and hands out tokens
//! lazily through [`Iterator`]. Key design decisions:
//!
//! - **Error recovery**: On an illegal character we record a [`LexError`],
//!   skip that one character and carry on. Lexing never fails.
//!
//! - **Line tracking**: Newlines bump the line counter, including the ones
//!   hidden inside comments and string literals. Spaces, tabs and carriage
//!   returns do not.
//!
//! - **Keyword recognition**: A whole identifier lexeme is scanned first and
//!   then looked up in the keyword table, so `done` stays an identifier
//!   instead of splitting into `do` + `ne`. Only lowercase spellings are
//!   reserved.

use log::{debug, trace};

use crate::errors::LexError;
use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    chars: Vec<char>,
    start: usize,      // Start of current token (byte offset)
    start_line: usize, // Line the current token started on
    current: usize,    // Current position (char index)
    byte_pos: usize,   // Current byte position
    line: usize,
    errors: Vec<LexError>,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            start: 0,
            start_line: 1,
            current: 0,
            byte_pos: 0,
            line: 1,
            errors: Vec::new(),
        }
    }

    /// Scan the rest of the source and terminate the stream with `Eof`.
    pub fn scan_tokens(&mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = self.by_ref().collect();
        tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.byte_pos, self.byte_pos),
            self.line,
        ));
        tokens
    }

    pub fn errors(&self) -> &[LexError] {
        &self.errors
    }

    fn scan_token(&mut self) -> Option<TokenKind> {
        let c = self.advance();
        match c {
            ' ' | '\t' | '\r' => None,
            '\n' => {
                self.line += 1;
                None
            }

            '{' => {
                self.skip_comment(|lexer| lexer.peek() == '}', 1);
                None
            }
            '(' if self.peek() == '*' => {
                self.advance();
                self.skip_comment(|lexer| lexer.peek() == '*' && lexer.peek_next() == ')', 2);
                None
            }

            '(' => {
                if self.match_char('.') {
                    Some(TokenKind::LBrack)
                } else {
                    Some(TokenKind::LParen)
                }
            }
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBrack),
            ']' => Some(TokenKind::RBrack),
            ',' => Some(TokenKind::Comma),
            ';' => Some(TokenKind::Semi),
            '+' => Some(TokenKind::Plus),
            '-' => Some(TokenKind::Minus),
            '*' => Some(TokenKind::Star),
            '/' => Some(TokenKind::Slash),
            '=' => Some(TokenKind::Equal),
            '^' => Some(TokenKind::Pointer),
            '@' => Some(TokenKind::At),

            ':' => {
                if self.match_char('=') {
                    Some(TokenKind::Assign)
                } else {
                    Some(TokenKind::Colon)
                }
            }

            '<' => {
                if self.match_char('=') {
                    Some(TokenKind::Le)
                } else if self.match_char('>') {
                    Some(TokenKind::NotEqual)
                } else {
                    Some(TokenKind::Lt)
                }
            }

            '>' => {
                if self.match_char('=') {
                    Some(TokenKind::Ge)
                } else {
                    Some(TokenKind::Gt)
                }
            }

            '.' => {
                if self.match_char('.') {
                    Some(TokenKind::DotDot)
                } else if self.match_char(')') {
                    Some(TokenKind::RBrack)
                } else {
                    Some(TokenKind::Dot)
                }
            }

            '\'' => self.string(),

            c if c.is_ascii_digit() => self.number(),

            c if c.is_ascii_alphabetic() => Some(self.identifier(c)),

            _ => {
                self.report(LexError::IllegalCharacter {
                    ch: c,
                    line: self.line,
                    span: Span::new(self.start, self.byte_pos),
                });
                None
            }
        }
    }

    // ── Comments ─────────────────────────────────────────────────────

    /// Skip a comment body up to and including its terminator, which is
    /// `close_len` characters long and detected by `at_close`.
    fn skip_comment(&mut self, at_close: impl Fn(&Self) -> bool, close_len: usize) {
        while !self.is_at_end() && !at_close(self) {
            if self.advance() == '\n' {
                self.line += 1;
            }
        }
        if self.is_at_end() {
            self.report(LexError::UnterminatedComment {
                line: self.start_line,
                span: Span::new(self.start, self.byte_pos),
            });
            return;
        }
        for _ in 0..close_len {
            self.advance();
        }
    }

    // ── Literal scanners ─────────────────────────────────────────────

    /// `'...'` with `''` standing for one quote character.
    fn string(&mut self) -> Option<TokenKind> {
        let mut value = String::new();
        loop {
            if self.is_at_end() {
                self.report(LexError::UnterminatedString {
                    line: self.start_line,
                    span: Span::new(self.start, self.byte_pos),
                });
                return None;
            }
            let c = self.advance();
            if c == '\'' {
                if self.match_char('\'') {
                    value.push('\'');
                    continue;
                }
                break;
            }
            if c == '\n' {
                self.line += 1;
            }
            value.push(c);
        }
        Some(TokenKind::Str(value))
    }

    /// `digits`, `digits.digits[e[sign]digits]` or `digits e [sign] digits`.
    /// Integers must fit an `i64` and reals must be finite.
    fn number(&mut self) -> Option<TokenKind> {
        let mut is_real = false;
        self.digits();

        // A dot only starts a fraction when a digit follows, so `1..5`
        // stays integer, range, integer.
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_real = true;
            self.advance();
            self.digits();
        }

        if self.peek() == 'e' || self.peek() == 'E' {
            let signed = self.peek_next() == '+' || self.peek_next() == '-';
            let digit_at = if signed { self.current + 2 } else { self.current + 1 };
            if self.chars.get(digit_at).map_or(false, |c| c.is_ascii_digit()) {
                is_real = true;
                self.advance();
                if signed {
                    self.advance();
                }
                self.digits();
            }
        }

        let text = &self.source[self.start..self.byte_pos];
        let parsed = if is_real {
            text.parse::<f64>()
                .ok()
                .filter(|x| x.is_finite())
                .map(TokenKind::Real)
        } else {
            text.parse::<i64>().ok().map(TokenKind::Integer)
        };
        if parsed.is_none() {
            self.report(LexError::InvalidNumber {
                text: text.to_string(),
                line: self.line,
                span: Span::new(self.start, self.byte_pos),
            });
        }
        parsed
    }

    fn digits(&mut self) {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
    }

    /// `letter (letter | digit | '_')*`, then checked against the keywords.
    fn identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::new();
        name.push(first);
        while self.peek().is_ascii_alphanumeric() || self.peek() == '_' {
            name.push(self.advance());
        }
        TokenKind::keyword(&name).unwrap_or(TokenKind::Identifier(name))
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.byte_pos += c.len_utf8();
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.chars[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.byte_pos += expected.len_utf8();
        true
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn report(&mut self, err: LexError) {
        debug!("{}", err);
        self.errors.push(err);
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        while !self.is_at_end() {
            self.start = self.byte_pos;
            self.start_line = self.line;
            if let Some(kind) = self.scan_token() {
                let token = Token::new(kind, Span::new(self.start, self.byte_pos), self.start_line);
                trace!("{:?} at line {}", token.kind, token.line);
                return Some(token);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty(), "Lexer errors: {:?}", lexer.errors());
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex("42"), vec![TokenKind::Integer(42), TokenKind::Eof]);
        assert_eq!(lex("3.14"), vec![TokenKind::Real(3.14), TokenKind::Eof]);
        assert_eq!(lex("1e10"), vec![TokenKind::Real(1e10), TokenKind::Eof]);
        assert_eq!(lex("2.5e-3"), vec![TokenKind::Real(2.5e-3), TokenKind::Eof]);
    }

    #[test]
    fn test_range_is_not_real() {
        assert_eq!(
            lex("1..10"),
            vec![
                TokenKind::Integer(1),
                TokenKind::DotDot,
                TokenKind::Integer(10),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(lex("'hello'"), vec![TokenKind::Str("hello".into()), TokenKind::Eof]);
        assert_eq!(lex("'it''s'"), vec![TokenKind::Str("it's".into()), TokenKind::Eof]);
        assert_eq!(lex("''"), vec![TokenKind::Str(String::new()), TokenKind::Eof]);
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            lex(":= : = <> < <= > >= .. . (. .) ^ @"),
            vec![
                TokenKind::Assign,
                TokenKind::Colon,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::LBrack,
                TokenKind::RBrack,
                TokenKind::Pointer,
                TokenKind::At,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_take_whole_words() {
        assert_eq!(
            lex("do done downto integer"),
            vec![
                TokenKind::Do,
                TokenKind::Identifier("done".into()),
                TokenKind::Downto,
                TokenKind::IntegerType,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_are_lowercase_only() {
        assert_eq!(
            lex("Begin begin"),
            vec![TokenKind::Identifier("Begin".into()), TokenKind::Begin, TokenKind::Eof]
        );
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(
            lex("foo bar_baz x1"),
            vec![
                TokenKind::Identifier("foo".into()),
                TokenKind::Identifier("bar_baz".into()),
                TokenKind::Identifier("x1".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_advance_lines() {
        let mut lexer = Lexer::new("{ one\ntwo } (* three\nfour *) x");
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Identifier("x".into()));
        assert_eq!(tokens[0].line, 3);
    }

    #[test]
    fn test_whitespace_does_not_advance_lines() {
        let tokens = Lexer::new("a \t\r b\nc").scan_tokens();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 1);
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn test_error_recovery() {
        let mut lexer = Lexer::new("42 ? 7");
        let tokens = lexer.scan_tokens();
        assert_eq!(tokens.len(), 3); // 42, 7, EOF
        assert_eq!(lexer.errors().len(), 1);
        assert!(matches!(
            lexer.errors()[0],
            LexError::IllegalCharacter { ch: '?', line: 1, .. }
        ));
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("x := 'abc");
        let tokens = lexer.scan_tokens();
        assert_eq!(tokens.len(), 3); // x, :=, EOF
        assert!(matches!(lexer.errors()[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_integer_overflow_is_reported() {
        let mut lexer = Lexer::new("x 99999999999999999999 y");
        let tokens = lexer.scan_tokens();
        let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Identifier("y".into()),
                TokenKind::Eof
            ]
        );
        assert_eq!(
            lexer.errors(),
            &[LexError::InvalidNumber {
                text: "99999999999999999999".into(),
                line: 1,
                span: Span::new(2, 22),
            }]
        );
    }

    #[test]
    fn test_infinite_real_is_reported() {
        let mut lexer = Lexer::new("r := 1e400; 2.5");
        let tokens = lexer.scan_tokens();
        assert_eq!(tokens.len(), 5); // r, :=, ;, 2.5, EOF
        assert_eq!(tokens[3].kind, TokenKind::Real(2.5));
        assert!(matches!(
            &lexer.errors()[0],
            LexError::InvalidNumber { text, .. } if text == "1e400"
        ));
    }

    #[test]
    fn test_unterminated_comments() {
        for source in ["x {\n never closed", "x (* never\n closed *"] {
            let mut lexer = Lexer::new(source);
            let tokens = lexer.scan_tokens();
            assert_eq!(tokens.len(), 2, "{}", source); // x, EOF
            assert_eq!(tokens[1].kind, TokenKind::Eof);
            assert_eq!(tokens[1].line, 2);
            assert!(matches!(
                lexer.errors(),
                [LexError::UnterminatedComment { line: 1, .. }]
            ));
        }
    }

    #[test]
    fn test_lazy_and_restartable() {
        let source = "program p; begin end.";
        let first: Vec<Token> = Lexer::new(source).collect();
        let second: Vec<Token> = Lexer::new(source).collect();
        assert_eq!(first, second);
        assert_eq!(Lexer::new(source).take(2).count(), 2);
    }

    #[test]
    fn test_full_program() {
        let source = r#"
            program Test;
            procedure Greet;
            begin
                writeln('Hello from a procedure!');
            end;
            begin
                Greet;
            end.
        "#;
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty());
        assert_eq!(tokens.len(), 20);
        assert_eq!(tokens[7].kind, TokenKind::Identifier("writeln".into()));
        assert_eq!(tokens[7].line, 5);
    }
}
