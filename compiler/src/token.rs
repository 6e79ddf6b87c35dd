//! Token types for the Pascal subset.
//!
//! Each token carries its kind (with the literal value for identifiers and
//! literals), a byte span into the source, and the 1-based line it started
//! on. The parser only needs the kind; spans and lines exist for diagnostics.

use std::fmt;

/// Byte offset range in the source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Merge two spans into one that covers both.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// All token kinds of the language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(i64),
    Real(f64),
    Str(String),

    // Identifiers
    Identifier(String),

    // Keywords
    And,
    Array,
    Begin,
    Boolean,
    Case,
    Char,
    Chr,
    Const,
    Div,
    Do,
    Downto,
    Else,
    End,
    External,
    File,
    For,
    Function,
    Goto,
    If,
    In,
    IntegerType,
    Label,
    Mod,
    Nil,
    Not,
    Of,
    Or,
    Packed,
    Procedure,
    Program,
    RealType,
    Record,
    Repeat,
    Set,
    Then,
    To,
    Type,
    Until,
    Var,
    While,
    With,
    Unit,
    Interface,
    StringType,
    Implementation,
    True,
    False,

    // Operators and punctuation
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Assign,   // :=
    Comma,    // ,
    Semi,     // ;
    Colon,    // :
    Equal,    // =
    NotEqual, // <>
    Lt,       // <
    Le,       // <=
    Gt,       // >
    Ge,       // >=
    LParen,   // (
    RParen,   // )
    LBrack,   // [ or (.
    RBrack,   // ] or .)
    Pointer,  // ^
    At,       // @
    Dot,      // .
    DotDot,   // ..

    // Special
    Eof,
}

impl TokenKind {
    /// Map a lexeme to its reserved word, if it is one. Only the lowercase
    /// spelling is reserved.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word {
            "and" => TokenKind::And,
            "array" => TokenKind::Array,
            "begin" => TokenKind::Begin,
            "boolean" => TokenKind::Boolean,
            "case" => TokenKind::Case,
            "char" => TokenKind::Char,
            "chr" => TokenKind::Chr,
            "const" => TokenKind::Const,
            "div" => TokenKind::Div,
            "do" => TokenKind::Do,
            "downto" => TokenKind::Downto,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "external" => TokenKind::External,
            "file" => TokenKind::File,
            "for" => TokenKind::For,
            "function" => TokenKind::Function,
            "goto" => TokenKind::Goto,
            "if" => TokenKind::If,
            "in" => TokenKind::In,
            "integer" => TokenKind::IntegerType,
            "label" => TokenKind::Label,
            "mod" => TokenKind::Mod,
            "nil" => TokenKind::Nil,
            "not" => TokenKind::Not,
            "of" => TokenKind::Of,
            "or" => TokenKind::Or,
            "packed" => TokenKind::Packed,
            "procedure" => TokenKind::Procedure,
            "program" => TokenKind::Program,
            "real" => TokenKind::RealType,
            "record" => TokenKind::Record,
            "repeat" => TokenKind::Repeat,
            "set" => TokenKind::Set,
            "then" => TokenKind::Then,
            "to" => TokenKind::To,
            "type" => TokenKind::Type,
            "until" => TokenKind::Until,
            "var" => TokenKind::Var,
            "while" => TokenKind::While,
            "with" => TokenKind::With,
            "unit" => TokenKind::Unit,
            "interface" => TokenKind::Interface,
            "string" => TokenKind::StringType,
            "implementation" => TokenKind::Implementation,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            _ => return None,
        };
        Some(kind)
    }

    /// Primitive type names are reserved words but can stand wherever a
    /// type identifier is expected.
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            TokenKind::IntegerType => Some("integer"),
            TokenKind::RealType => Some("real"),
            TokenKind::Boolean => Some("boolean"),
            TokenKind::Char => Some("char"),
            TokenKind::StringType => Some("string"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, line: usize) -> Self {
        Self { kind, span, line }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Real(n) => write!(f, "{:?}", n),
            TokenKind::Str(s) => write!(f, "'{}'", s.replace('\'', "''")),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::And => write!(f, "and"),
            TokenKind::Array => write!(f, "array"),
            TokenKind::Begin => write!(f, "begin"),
            TokenKind::Boolean => write!(f, "boolean"),
            TokenKind::Case => write!(f, "case"),
            TokenKind::Char => write!(f, "char"),
            TokenKind::Chr => write!(f, "chr"),
            TokenKind::Const => write!(f, "const"),
            TokenKind::Div => write!(f, "div"),
            TokenKind::Do => write!(f, "do"),
            TokenKind::Downto => write!(f, "downto"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::End => write!(f, "end"),
            TokenKind::External => write!(f, "external"),
            TokenKind::File => write!(f, "file"),
            TokenKind::For => write!(f, "for"),
            TokenKind::Function => write!(f, "function"),
            TokenKind::Goto => write!(f, "goto"),
            TokenKind::If => write!(f, "if"),
            TokenKind::In => write!(f, "in"),
            TokenKind::IntegerType => write!(f, "integer"),
            TokenKind::Label => write!(f, "label"),
            TokenKind::Mod => write!(f, "mod"),
            TokenKind::Nil => write!(f, "nil"),
            TokenKind::Not => write!(f, "not"),
            TokenKind::Of => write!(f, "of"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Packed => write!(f, "packed"),
            TokenKind::Procedure => write!(f, "procedure"),
            TokenKind::Program => write!(f, "program"),
            TokenKind::RealType => write!(f, "real"),
            TokenKind::Record => write!(f, "record"),
            TokenKind::Repeat => write!(f, "repeat"),
            TokenKind::Set => write!(f, "set"),
            TokenKind::Then => write!(f, "then"),
            TokenKind::To => write!(f, "to"),
            TokenKind::Type => write!(f, "type"),
            TokenKind::Until => write!(f, "until"),
            TokenKind::Var => write!(f, "var"),
            TokenKind::While => write!(f, "while"),
            TokenKind::With => write!(f, "with"),
            TokenKind::Unit => write!(f, "unit"),
            TokenKind::Interface => write!(f, "interface"),
            TokenKind::StringType => write!(f, "string"),
            TokenKind::Implementation => write!(f, "implementation"),
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Assign => write!(f, ":="),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Semi => write!(f, ";"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Equal => write!(f, "="),
            TokenKind::NotEqual => write!(f, "<>"),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBrack => write!(f, "["),
            TokenKind::RBrack => write!(f, "]"),
            TokenKind::Pointer => write!(f, "^"),
            TokenKind::At => write!(f, "@"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::DotDot => write!(f, ".."),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}
