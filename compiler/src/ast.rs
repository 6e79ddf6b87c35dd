//! Abstract Syntax Tree: typed nodes for the Pascal subset.
//!
//! The tree is a closed set of Rust types: every grammar rule that carries
//! meaning gets its own struct or enum variant, and every pass (lowering,
//! printing, validation, visualisation) is one exhaustive `match` over it.
//!
//! Nodes own their children and hold no spans or parent links, so two parses
//! of the same program compare equal with `==`. The parser is the only
//! producer; once it returns, the tree is read-only.
//!
//! List-shaped rules (declarations, parameter sections, statements) are
//! accumulated in a [`ListBuilder`] while parsing and frozen into a `Vec`
//! when the rule is complete.

/// `program Name; block.`
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub heading: ProgramHeading,
    pub block: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramHeading {
    pub name: String,
}

/// Declarations in source order followed by the body.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub declarations: Vec<Declaration>,
    pub body: CompoundStatement,
}

// ── Declarations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Constants(ConstantDefinitionBlock),
    Types(TypeDeclarationBlock),
    Variables(VariableDeclarationBlock),
    Procedure(ProcedureDeclaration),
    Function(FunctionDeclaration),
}

/// `const a = 1; b = 'x';`
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDefinitionBlock {
    pub definitions: Vec<ConstantDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDefinition {
    pub name: String,
    pub value: Constant,
}

/// Right-hand side of a constant definition, or a variant label.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `[sign] 42` or `[sign] 2.5`
    Number {
        sign: Option<Sign>,
        value: UnsignedNumber,
    },
    /// `[sign] other_constant`
    Identifier { sign: Option<Sign>, name: String },
    /// `'text'`
    Str(String),
    /// `chr(65)`
    Chr(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnsignedNumber {
    Integer(i64),
    Real(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// `type T = ...;`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDeclarationBlock {
    pub definitions: Vec<TypeDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub ty: Type,
}

/// `var a, b: integer; c: array[1..10] of real;`
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclarationBlock {
    pub declarations: Vec<VariableDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDeclaration {
    pub names: Vec<String>,
    pub ty: Type,
}

/// `procedure Name(params); block;`
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureDeclaration {
    pub name: String,
    pub params: Vec<FormalParameterSection>,
    pub block: Block,
}

/// `function Name(params): Type; block;`
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    pub params: Vec<FormalParameterSection>,
    pub return_type: TypeIdentifier,
    pub block: Block,
}

/// One `;`-separated section of a formal parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct FormalParameterSection {
    pub mode: ParameterMode,
    pub group: ParameterGroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterMode {
    Value,
    Var,
    Function,
    Procedure,
}

/// `a, b: integer`
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterGroup {
    pub names: Vec<String>,
    pub ty: TypeIdentifier,
}

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    /// `(red, green, blue)`
    Scalar(Vec<String>),
    /// `1..10`
    Subrange(Subrange),
    /// `integer`, `MyType`
    Identifier(TypeIdentifier),
    /// `string[80]`
    String(StringType),
    Array(ArrayType),
    Record(RecordType),
    Set(SetType),
}

/// Inclusive integer bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subrange {
    pub lower: i64,
    pub upper: i64,
}

impl Subrange {
    /// `upper - lower`, the `ALLOC` operand of an array over this range.
    /// `None` when the bounds are too far apart for an `i64`.
    pub fn size(&self) -> Option<i64> {
        self.upper.checked_sub(self.lower)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeIdentifier {
    pub name: String,
}

impl TypeIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringType {
    pub length: i64,
}

/// `array[lower..upper] of element`
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub index: Subrange,
    pub element: TypeIdentifier,
}

/// `record fields end`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub fields: FieldList,
}

/// A fixed part, a variant part, or both (fixed first).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldList {
    pub fixed: Vec<RecordSection>,
    pub variant: Option<VariantPart>,
}

/// `x, y: real`
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSection {
    pub names: Vec<String>,
    pub ty: Type,
}

/// `case [tag:] TagType of variants`
#[derive(Debug, Clone, PartialEq)]
pub struct VariantPart {
    pub tag: Tag,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub name: Option<String>,
    pub ty: TypeIdentifier,
}

/// `1, 2: (fields)`
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub labels: Vec<Constant>,
    pub fields: FieldList,
}

/// `set of base`
#[derive(Debug, Clone, PartialEq)]
pub struct SetType {
    pub base: TypeIdentifier,
}

// ── Statements ───────────────────────────────────────────────────────

/// `begin s1; s2; ... end`. Empty statements are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundStatement {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Compound(CompoundStatement),

    /// `target := value`
    Assignment { target: Variable, value: Expr },

    /// `name` or `name(args)`
    Call(Call),

    /// `if cond then s [else s]`
    If {
        condition: Expr,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },

    /// `while cond do s`
    While { condition: Expr, body: Box<Statement> },

    /// `for v := init to|downto limit do s`
    For {
        variable: String,
        initial: Expr,
        direction: ForDirection,
        limit: Expr,
        body: Box<Statement>,
    },

    /// `repeat s1; s2 until cond`
    Repeat {
        body: Vec<Statement>,
        condition: Expr,
    },

    /// No tokens at all.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForDirection {
    To,
    Downto,
}

/// A procedure or function invocation, in statement or expression position.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Argument>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Expr(Expr),
    /// `value:width[:precision]`, only meaningful for `write`/`writeln`.
    Formatted(FormattedExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormattedExpression {
    pub value: Expr,
    pub width: Expr,
    pub precision: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// `x`
    Simple(String),
    /// `a[i]`
    Indexed { name: String, index: Box<Expr> },
}

impl Variable {
    pub fn name(&self) -> &str {
        match self {
            Variable::Simple(name) | Variable::Indexed { name, .. } => name,
        }
    }
}

// ── Expressions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `left relop right` (non-associative)
    Relational {
        left: Box<Expr>,
        op: RelOp,
        right: Box<Expr>,
    },

    /// `left addop right` (left-associative)
    Additive {
        left: Box<Expr>,
        op: AddOp,
        right: Box<Expr>,
    },

    /// Leading sign of a simple expression: `-term`
    Signed { sign: Sign, operand: Box<Expr> },

    /// `left mulop right` (left-associative)
    Multiplicative {
        left: Box<Expr>,
        op: MulOp,
        right: Box<Expr>,
    },

    /// `not factor`
    Not(Box<Expr>),

    Variable(Variable),

    /// `f(a, b)`; a bare `f` parses as a variable.
    Call(Call),

    Constant(UnsignedConstant),

    /// `( expr )`
    Parenthesized(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnsignedConstant {
    Integer(i64),
    Real(f64),
    Str(String),
    Bool(bool),
    Nil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOp {
    Add,
    Sub,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
    Mul,
    Slash,
    Div,
    Mod,
    And,
}

impl RelOp {
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::NotEq => "<>",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::In => "in",
        }
    }
}

impl AddOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AddOp::Add => "+",
            AddOp::Sub => "-",
            AddOp::Or => "or",
        }
    }
}

impl MulOp {
    pub fn symbol(self) -> &'static str {
        match self {
            MulOp::Mul => "*",
            MulOp::Slash => "/",
            MulOp::Div => "div",
            MulOp::Mod => "mod",
            MulOp::And => "and",
        }
    }
}

impl Sign {
    pub fn symbol(self) -> &'static str {
        match self {
            Sign::Plus => "+",
            Sign::Minus => "-",
        }
    }
}

// ── List accumulation ────────────────────────────────────────────────

/// Append-only accumulator for left-recursive list rules.
///
/// The parser pushes items in source order and calls [`ListBuilder::freeze`]
/// once the rule is complete; only the frozen `Vec` ends up in the tree.
#[derive(Debug)]
pub struct ListBuilder<T> {
    items: Vec<T>,
}

impl<T> ListBuilder<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Start a list with its first item.
    pub fn with_first(item: T) -> Self {
        Self { items: vec![item] }
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn freeze(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for ListBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}
