//! Parser: recursive descent over the Pascal grammar.
//!
//! Each grammar rule maps to one method that consumes tokens and returns an
//! AST node. Operator precedence is encoded in the expression chain, from
//! loosest to tightest:
//!
//! ```text
//! expression   = simple [relop simple]          relop: = <> < <= > >= in
//! simple       = [sign] term {addop term}       addop: + - or
//! term         = factor {mulop factor}          mulop: * / div mod and
//! factor       = variable | call | constant | ( expression ) | not factor
//! ```
//!
//! There is no error recovery: the first token that does not fit aborts the
//! parse with a [`SyntaxError`] naming the token and its line.
//!
//! While parsing, every procedure and function heading is registered in the
//! parser's own [`Context`]. Code generation does not reuse it; it is there
//! for tools that want the signatures without lowering the program.

use log::debug;

use crate::ast::*;
use crate::context::Context;
use crate::errors::SyntaxError;
use crate::token::{Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    context: Context,
}

impl Parser {
    /// An `Eof` token is appended when the stream does not end with one.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last(), Some(Token { kind: TokenKind::Eof, .. })) {
            let (end, line) = tokens
                .last()
                .map_or((0, 1), |token| (token.span.end, token.line));
            tokens.push(Token::new(TokenKind::Eof, Span::new(end, end), line));
        }
        Self {
            tokens,
            current: 0,
            context: Context::new(),
        }
    }

    /// Parse a complete program. The input must end right after the final `.`.
    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let heading = self.program_heading()?;
        let block = self.block()?;
        self.expect(TokenKind::Dot)?;
        if !self.is_at_end() {
            return Err(self.error("end of input"));
        }
        debug!("parsed program {}", heading.name);
        Ok(Program { heading, block })
    }

    /// Signatures of every procedure and function seen so far.
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn program_heading(&mut self) -> Result<ProgramHeading, SyntaxError> {
        self.expect(TokenKind::Program)?;
        let name = self.expect_identifier()?;
        self.expect(TokenKind::Semi)?;
        Ok(ProgramHeading { name })
    }

    fn block(&mut self) -> Result<Block, SyntaxError> {
        let mut declarations = ListBuilder::new();
        loop {
            let declaration = match self.peek_kind() {
                TokenKind::Const => Declaration::Constants(self.constant_block()?),
                TokenKind::Type => Declaration::Types(self.type_block()?),
                TokenKind::Var => Declaration::Variables(self.variable_block()?),
                TokenKind::Procedure => {
                    let procedure = self.procedure_declaration()?;
                    self.expect(TokenKind::Semi)?;
                    Declaration::Procedure(procedure)
                }
                TokenKind::Function => {
                    let function = self.function_declaration()?;
                    self.expect(TokenKind::Semi)?;
                    Declaration::Function(function)
                }
                _ => break,
            };
            declarations.push(declaration);
        }
        let body = self.compound_statement()?;
        Ok(Block {
            declarations: declarations.freeze(),
            body,
        })
    }

    // ── Declarations ─────────────────────────────────────────────────

    fn constant_block(&mut self) -> Result<ConstantDefinitionBlock, SyntaxError> {
        self.expect(TokenKind::Const)?;
        let mut definitions = ListBuilder::new();
        loop {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Equal)?;
            let value = self.constant()?;
            self.expect(TokenKind::Semi)?;
            debug!("constant {}", name);
            definitions.push(ConstantDefinition { name, value });
            if !self.check_identifier() {
                break;
            }
        }
        Ok(ConstantDefinitionBlock {
            definitions: definitions.freeze(),
        })
    }

    fn constant(&mut self) -> Result<Constant, SyntaxError> {
        match self.peek_kind() {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance_token();
                Ok(Constant::Str(s))
            }
            TokenKind::Chr => {
                self.advance_token();
                self.expect(TokenKind::LParen)?;
                let code = self.expect_integer()?;
                self.expect(TokenKind::RParen)?;
                Ok(Constant::Chr(code))
            }
            _ => {
                let sign = self.sign();
                match self.peek_kind() {
                    TokenKind::Identifier(_) => {
                        let name = self.expect_identifier()?;
                        Ok(Constant::Identifier { sign, name })
                    }
                    TokenKind::Integer(n) => {
                        let value = UnsignedNumber::Integer(*n);
                        self.advance_token();
                        Ok(Constant::Number { sign, value })
                    }
                    TokenKind::Real(x) => {
                        let value = UnsignedNumber::Real(*x);
                        self.advance_token();
                        Ok(Constant::Number { sign, value })
                    }
                    _ => Err(self.error("constant")),
                }
            }
        }
    }

    fn sign(&mut self) -> Option<Sign> {
        if self.match_token(TokenKind::Plus) {
            Some(Sign::Plus)
        } else if self.match_token(TokenKind::Minus) {
            Some(Sign::Minus)
        } else {
            None
        }
    }

    fn type_block(&mut self) -> Result<TypeDeclarationBlock, SyntaxError> {
        self.expect(TokenKind::Type)?;
        let mut definitions = ListBuilder::new();
        loop {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Equal)?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::Semi)?;
            debug!("type {}", name);
            definitions.push(TypeDefinition { name, ty });
            if !self.check_identifier() {
                break;
            }
        }
        Ok(TypeDeclarationBlock {
            definitions: definitions.freeze(),
        })
    }

    fn variable_block(&mut self) -> Result<VariableDeclarationBlock, SyntaxError> {
        self.expect(TokenKind::Var)?;
        let mut declarations = ListBuilder::new();
        loop {
            let names = self.identifier_list()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            self.expect(TokenKind::Semi)?;
            debug!("variables {}", names.join(", "));
            declarations.push(VariableDeclaration { names, ty });
            if !self.check_identifier() {
                break;
            }
        }
        Ok(VariableDeclarationBlock {
            declarations: declarations.freeze(),
        })
    }

    fn procedure_declaration(&mut self) -> Result<ProcedureDeclaration, SyntaxError> {
        self.expect(TokenKind::Procedure)?;
        let name = self.expect_identifier()?;
        let params = self.formal_parameters()?;
        self.expect(TokenKind::Semi)?;
        self.context.register_procedure(&name, &params);
        debug!("procedure {} ({} parameter sections)", name, params.len());
        let block = self.block()?;
        Ok(ProcedureDeclaration { name, params, block })
    }

    fn function_declaration(&mut self) -> Result<FunctionDeclaration, SyntaxError> {
        self.expect(TokenKind::Function)?;
        let name = self.expect_identifier()?;
        let params = self.formal_parameters()?;
        self.expect(TokenKind::Colon)?;
        let return_type = self.type_identifier()?;
        self.expect(TokenKind::Semi)?;
        self.context
            .register_function(&name, return_type.clone(), &params);
        debug!("function {}: {}", name, return_type.name);
        let block = self.block()?;
        Ok(FunctionDeclaration {
            name,
            params,
            return_type,
            block,
        })
    }

    /// `( section ; section ... )`, or nothing.
    fn formal_parameters(&mut self) -> Result<Vec<FormalParameterSection>, SyntaxError> {
        if !self.match_token(TokenKind::LParen) {
            return Ok(Vec::new());
        }
        let mut sections = ListBuilder::with_first(self.formal_parameter_section()?);
        while self.match_token(TokenKind::Semi) {
            sections.push(self.formal_parameter_section()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(sections.freeze())
    }

    fn formal_parameter_section(&mut self) -> Result<FormalParameterSection, SyntaxError> {
        let mode = if self.match_token(TokenKind::Var) {
            ParameterMode::Var
        } else if self.match_token(TokenKind::Function) {
            ParameterMode::Function
        } else if self.match_token(TokenKind::Procedure) {
            ParameterMode::Procedure
        } else {
            ParameterMode::Value
        };
        let names = self.identifier_list()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.type_identifier()?;
        Ok(FormalParameterSection {
            mode,
            group: ParameterGroup { names, ty },
        })
    }

    fn identifier_list(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut names = ListBuilder::with_first(self.expect_identifier()?);
        while self.match_token(TokenKind::Comma) {
            names.push(self.expect_identifier()?);
        }
        Ok(names.freeze())
    }

    // ── Types ────────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Result<Type, SyntaxError> {
        match self.peek_kind() {
            TokenKind::LParen => {
                self.advance_token();
                let names = self.identifier_list()?;
                self.expect(TokenKind::RParen)?;
                Ok(Type::Scalar(names))
            }
            TokenKind::Integer(_) | TokenKind::Minus => Ok(Type::Subrange(self.subrange()?)),
            TokenKind::StringType if self.peek_next_kind() == &TokenKind::LBrack => {
                self.advance_token();
                self.advance_token();
                let length = self.expect_integer()?;
                self.expect(TokenKind::RBrack)?;
                Ok(Type::String(StringType { length }))
            }
            TokenKind::Array => {
                self.advance_token();
                self.expect(TokenKind::LBrack)?;
                let index = self.subrange()?;
                self.expect(TokenKind::RBrack)?;
                self.expect(TokenKind::Of)?;
                let element = self.type_identifier()?;
                Ok(Type::Array(ArrayType { index, element }))
            }
            TokenKind::Record => {
                self.advance_token();
                let fields = self.field_list()?;
                self.expect(TokenKind::End)?;
                Ok(Type::Record(RecordType { fields }))
            }
            TokenKind::Set => {
                self.advance_token();
                self.expect(TokenKind::Of)?;
                let base = self.type_identifier()?;
                Ok(Type::Set(SetType { base }))
            }
            _ => Ok(Type::Identifier(self.type_identifier()?)),
        }
    }

    /// A user type name or one of the primitive type keywords.
    fn type_identifier(&mut self) -> Result<TypeIdentifier, SyntaxError> {
        if let Some(name) = self.peek_kind().type_name() {
            self.advance_token();
            return Ok(TypeIdentifier::new(name));
        }
        if self.check_identifier() {
            return Ok(TypeIdentifier::new(self.expect_identifier()?));
        }
        Err(self.error("type identifier"))
    }

    fn subrange(&mut self) -> Result<Subrange, SyntaxError> {
        let lower = self.signed_integer()?;
        self.expect(TokenKind::DotDot)?;
        let upper = self.signed_integer()?;
        Ok(Subrange { lower, upper })
    }

    fn signed_integer(&mut self) -> Result<i64, SyntaxError> {
        let negative = self.match_token(TokenKind::Minus);
        let value = self.expect_integer()?;
        Ok(if negative { -value } else { value })
    }

    /// Record fields: a `;`-separated fixed part, then an optional variant
    /// part. A trailing `;` is allowed.
    fn field_list(&mut self) -> Result<FieldList, SyntaxError> {
        let mut fixed = ListBuilder::new();
        while self.check_identifier() {
            let names = self.identifier_list()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type()?;
            fixed.push(RecordSection { names, ty });
            if !self.match_token(TokenKind::Semi) {
                break;
            }
        }
        let variant = if self.check(TokenKind::Case) {
            Some(self.variant_part()?)
        } else {
            None
        };
        Ok(FieldList {
            fixed: fixed.freeze(),
            variant,
        })
    }

    fn variant_part(&mut self) -> Result<VariantPart, SyntaxError> {
        self.expect(TokenKind::Case)?;
        let tag = if self.check_identifier() && self.peek_next_kind() == &TokenKind::Colon {
            let name = self.expect_identifier()?;
            self.advance_token();
            Tag {
                name: Some(name),
                ty: self.type_identifier()?,
            }
        } else {
            Tag {
                name: None,
                ty: self.type_identifier()?,
            }
        };
        self.expect(TokenKind::Of)?;

        let mut variants = ListBuilder::with_first(self.variant()?);
        while self.match_token(TokenKind::Semi) {
            if self.check(TokenKind::End) || self.check(TokenKind::RParen) {
                break;
            }
            variants.push(self.variant()?);
        }
        Ok(VariantPart {
            tag,
            variants: variants.freeze(),
        })
    }

    fn variant(&mut self) -> Result<Variant, SyntaxError> {
        let mut labels = ListBuilder::with_first(self.constant()?);
        while self.match_token(TokenKind::Comma) {
            labels.push(self.constant()?);
        }
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::LParen)?;
        let fields = self.field_list()?;
        self.expect(TokenKind::RParen)?;
        Ok(Variant {
            labels: labels.freeze(),
            fields,
        })
    }

    // ── Statements ───────────────────────────────────────────────────

    fn compound_statement(&mut self) -> Result<CompoundStatement, SyntaxError> {
        self.expect(TokenKind::Begin)?;
        let statements = self.statement_list()?;
        self.expect(TokenKind::End)?;
        Ok(CompoundStatement { statements })
    }

    /// `statement {; statement}`. Empty statements stay in the list.
    fn statement_list(&mut self) -> Result<Vec<Statement>, SyntaxError> {
        let mut statements = ListBuilder::with_first(self.statement()?);
        while self.match_token(TokenKind::Semi) {
            statements.push(self.statement()?);
        }
        Ok(statements.freeze())
    }

    fn statement(&mut self) -> Result<Statement, SyntaxError> {
        match self.peek_kind() {
            TokenKind::Begin => Ok(Statement::Compound(self.compound_statement()?)),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Repeat => self.repeat_statement(),
            TokenKind::Identifier(_) => {
                if matches!(self.peek_next_kind(), TokenKind::Assign | TokenKind::LBrack) {
                    let target = self.variable()?;
                    self.expect(TokenKind::Assign)?;
                    let value = self.expression()?;
                    Ok(Statement::Assignment { target, value })
                } else {
                    Ok(Statement::Call(self.call()?))
                }
            }
            _ => Ok(Statement::Empty),
        }
    }

    fn if_statement(&mut self) -> Result<Statement, SyntaxError> {
        self.expect(TokenKind::If)?;
        let condition = self.expression()?;
        self.expect(TokenKind::Then)?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_token(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn while_statement(&mut self) -> Result<Statement, SyntaxError> {
        self.expect(TokenKind::While)?;
        let condition = self.expression()?;
        self.expect(TokenKind::Do)?;
        let body = Box::new(self.statement()?);
        Ok(Statement::While { condition, body })
    }

    fn for_statement(&mut self) -> Result<Statement, SyntaxError> {
        self.expect(TokenKind::For)?;
        let variable = self.expect_identifier()?;
        self.expect(TokenKind::Assign)?;
        let initial = self.expression()?;
        let direction = if self.match_token(TokenKind::To) {
            ForDirection::To
        } else if self.match_token(TokenKind::Downto) {
            ForDirection::Downto
        } else {
            return Err(self.error("'to' or 'downto'"));
        };
        let limit = self.expression()?;
        self.expect(TokenKind::Do)?;
        let body = Box::new(self.statement()?);
        Ok(Statement::For {
            variable,
            initial,
            direction,
            limit,
            body,
        })
    }

    fn repeat_statement(&mut self) -> Result<Statement, SyntaxError> {
        self.expect(TokenKind::Repeat)?;
        let body = self.statement_list()?;
        self.expect(TokenKind::Until)?;
        let condition = self.expression()?;
        Ok(Statement::Repeat { body, condition })
    }

    /// `name` or `name(arg, ...)`. `chr` is a reserved word but still
    /// callable.
    fn call(&mut self) -> Result<Call, SyntaxError> {
        let name = if self.match_token(TokenKind::Chr) {
            "chr".to_string()
        } else {
            self.expect_identifier()?
        };
        let args = if self.match_token(TokenKind::LParen) {
            let args = self.comma_separated(|p| p.argument())?;
            self.expect(TokenKind::RParen)?;
            args
        } else {
            Vec::new()
        };
        Ok(Call { name, args })
    }

    /// `expr` or `expr:width[:precision]`
    fn argument(&mut self) -> Result<Argument, SyntaxError> {
        let value = self.expression()?;
        if !self.match_token(TokenKind::Colon) {
            return Ok(Argument::Expr(value));
        }
        let width = self.expression()?;
        let precision = if self.match_token(TokenKind::Colon) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Argument::Formatted(FormattedExpression {
            value,
            width,
            precision,
        }))
    }

    fn variable(&mut self) -> Result<Variable, SyntaxError> {
        let name = self.expect_identifier()?;
        if self.match_token(TokenKind::LBrack) {
            let index = Box::new(self.expression()?);
            self.expect(TokenKind::RBrack)?;
            Ok(Variable::Indexed { name, index })
        } else {
            Ok(Variable::Simple(name))
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.simple_expression()?;
        let op = match self.peek_kind() {
            TokenKind::Equal => RelOp::Eq,
            TokenKind::NotEqual => RelOp::NotEq,
            TokenKind::Lt => RelOp::Lt,
            TokenKind::Le => RelOp::Le,
            TokenKind::Gt => RelOp::Gt,
            TokenKind::Ge => RelOp::Ge,
            TokenKind::In => RelOp::In,
            _ => return Ok(left),
        };
        self.advance_token();
        let right = self.simple_expression()?;
        Ok(Expr::Relational {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn simple_expression(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = match self.sign() {
            Some(sign) => Expr::Signed {
                sign,
                operand: Box::new(self.term()?),
            },
            None => self.term()?,
        };
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => AddOp::Add,
                TokenKind::Minus => AddOp::Sub,
                TokenKind::Or => AddOp::Or,
                _ => return Ok(left),
            };
            self.advance_token();
            let right = self.term()?;
            left = Expr::Additive {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => MulOp::Mul,
                TokenKind::Slash => MulOp::Slash,
                TokenKind::Div => MulOp::Div,
                TokenKind::Mod => MulOp::Mod,
                TokenKind::And => MulOp::And,
                _ => return Ok(left),
            };
            self.advance_token();
            let right = self.factor()?;
            left = Expr::Multiplicative {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let constant = match self.peek_kind() {
            TokenKind::Identifier(_) => {
                return if self.peek_next_kind() == &TokenKind::LParen {
                    Ok(Expr::Call(self.call()?))
                } else {
                    Ok(Expr::Variable(self.variable()?))
                };
            }
            TokenKind::Chr => return Ok(Expr::Call(self.call()?)),
            TokenKind::LParen => {
                self.advance_token();
                let inner = self.expression()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Expr::Parenthesized(Box::new(inner)));
            }
            TokenKind::Not => {
                self.advance_token();
                return Ok(Expr::Not(Box::new(self.factor()?)));
            }
            TokenKind::Integer(n) => UnsignedConstant::Integer(*n),
            TokenKind::Real(x) => UnsignedConstant::Real(*x),
            TokenKind::Str(s) => UnsignedConstant::Str(s.clone()),
            TokenKind::True => UnsignedConstant::Bool(true),
            TokenKind::False => UnsignedConstant::Bool(false),
            TokenKind::Nil => UnsignedConstant::Nil,
            _ => return Err(self.error("expression")),
        };
        self.advance_token();
        Ok(Expr::Constant(constant))
    }

    fn comma_separated<T>(
        &mut self,
        mut parse_fn: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut items = ListBuilder::with_first(parse_fn(self)?);
        while self.match_token(TokenKind::Comma) {
            items.push(parse_fn(self)?);
        }
        Ok(items.freeze())
    }

    // ── Token manipulation ───────────────────────────────────────────

    fn advance_token(&mut self) -> Token {
        let token = self.tokens[self.current].clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_next_kind(&self) -> &TokenKind {
        let next = (self.current + 1).min(self.tokens.len() - 1);
        &self.tokens[next].kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        std::mem::discriminant(&self.tokens[self.current].kind) == std::mem::discriminant(&kind)
    }

    fn check_identifier(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Identifier(_))
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), SyntaxError> {
        if self.check(kind.clone()) {
            self.current += 1;
            Ok(())
        } else {
            Err(self.error(format!("'{}'", kind)))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, SyntaxError> {
        if let TokenKind::Identifier(name) = self.peek_kind() {
            let name = name.clone();
            self.current += 1;
            return Ok(name);
        }
        Err(self.error("identifier"))
    }

    fn expect_integer(&mut self) -> Result<i64, SyntaxError> {
        if let TokenKind::Integer(n) = self.peek_kind() {
            let n = *n;
            self.current += 1;
            return Ok(n);
        }
        Err(self.error("integer"))
    }

    fn is_at_end(&self) -> bool {
        matches!(self.tokens[self.current].kind, TokenKind::Eof)
    }

    fn error(&self, expected: impl Into<String>) -> SyntaxError {
        let token = &self.tokens[self.current];
        match token.kind {
            TokenKind::Eof => SyntaxError::UnexpectedEof {
                expected: expected.into(),
            },
            _ => SyntaxError::UnexpectedToken {
                found: token.kind.to_string(),
                expected: expected.into(),
                line: token.line,
                span: token.span,
            },
        }
    }
}
