//! Code generator: AST to stack-VM instructions.
//!
//! Every node kind implements [`Lower`]: it appends its instructions to a
//! fresh `Vec<Instr>` and reads or updates the [`Context`] for slots, labels
//! and callable signatures. Nodes with no run-time effect (types, headings,
//! parameter sections) lower to nothing.
//!
//! Storage is flat: every variable, parameter and function result lives in a
//! global slot handed out by the context. A call stores each argument into
//! the callee's parameter slot, pushes the entry label and calls it; a
//! function leaves its value in its result slot.
//!
//! Structured control flow becomes jumps to numbered labels. Each construct
//! draws its number before lowering its children, so numbers increase in
//! source order and nested constructs never share one.
//!
//! Program layout:
//!
//! ```text
//! ALLOC ...          array declarations
//! START
//! ...                main body
//! STOP
//! procX:             one section per procedure/function, declaration order
//! ...
//! RETURN
//! ```

use log::{debug, warn};

use crate::ast::*;
use crate::context::{ConstValue, Context, Lookup, Signature, Symbol, SymbolKind};
use crate::errors::CodegenError;
use crate::vm::{Instr, Label};

/// Lowering rule of one node kind.
pub trait Lower {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError>;
}

/// Lower any node.
pub fn lower<N: Lower + ?Sized>(node: &N, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    node.lower(ctx)
}

// ── Public API ──────────────────────────────────────────────────────

/// Lower a whole program with a fresh context.
pub fn compile_program(program: &Program) -> Result<Vec<Instr>, CodegenError> {
    let mut ctx = Context::named(&program.heading.name);
    program.lower(&mut ctx)
}

// ── Static value estimates ──────────────────────────────────────────

/// Coarse class of a value, enough to pick a write opcode and decide on
/// `ATOI` after a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Integer,
    Real,
    Str,
    Other,
}

fn kind_of_type(ty: &Type, ctx: &Context) -> ValueKind {
    match ctx.resolve_type(ty) {
        Type::Identifier(ident) => kind_of_type_name(&ident.name),
        Type::Subrange(_) => ValueKind::Integer,
        Type::String(_) => ValueKind::Str,
        _ => ValueKind::Other,
    }
}

fn kind_of_type_name(name: &str) -> ValueKind {
    match name {
        "integer" => ValueKind::Integer,
        "real" => ValueKind::Real,
        "string" | "char" => ValueKind::Str,
        _ => ValueKind::Other,
    }
}

fn kind_of_const(value: &ConstValue) -> ValueKind {
    match value {
        ConstValue::Integer(_) => ValueKind::Integer,
        ConstValue::Real(_) => ValueKind::Real,
        ConstValue::Str(_) => ValueKind::Str,
    }
}

fn kind_of_signature(sig: &Signature, ctx: &Context) -> ValueKind {
    match &sig.return_type {
        Some(ty) => kind_of_type(&Type::Identifier(ty.clone()), ctx),
        None => ValueKind::Other,
    }
}

/// Declared element type of an array variable.
fn element_kind(name: &str, ctx: &Context) -> ValueKind {
    match ctx.variable_type(name).map(|ty| ctx.resolve_type(ty)) {
        Some(Type::Array(array)) => kind_of_type(&Type::Identifier(array.element.clone()), ctx),
        Some(Type::String(_)) => ValueKind::Str,
        _ => ValueKind::Other,
    }
}

fn estimate(expr: &Expr, ctx: &Context) -> ValueKind {
    match expr {
        Expr::Constant(UnsignedConstant::Str(_)) => ValueKind::Str,
        Expr::Constant(UnsignedConstant::Real(_)) => ValueKind::Real,
        Expr::Constant(_) => ValueKind::Integer,
        Expr::Variable(Variable::Simple(name)) => match ctx.lookup(name) {
            Some(Lookup::Declared(Symbol { kind, .. })) => match kind {
                SymbolKind::Variable(ty) => kind_of_type(ty, ctx),
                SymbolKind::Constant(value) => kind_of_const(value),
                SymbolKind::Function(sig) => kind_of_signature(sig, ctx),
                _ => ValueKind::Other,
            },
            _ => ctx
                .function(name)
                .map_or(ValueKind::Other, |sig| kind_of_signature(sig, ctx)),
        },
        Expr::Variable(Variable::Indexed { name, .. }) => element_kind(name, ctx),
        Expr::Call(call) => match call.name.to_lowercase().as_str() {
            "length" | "chr" => ValueKind::Integer,
            _ => ctx
                .function(&call.name)
                .map_or(ValueKind::Other, |sig| kind_of_signature(sig, ctx)),
        },
        Expr::Parenthesized(inner) | Expr::Signed { operand: inner, .. } => estimate(inner, ctx),
        Expr::Additive { left, right, .. } | Expr::Multiplicative { left, right, .. } => {
            match (estimate(left, ctx), estimate(right, ctx)) {
                (ValueKind::Real, _) | (_, ValueKind::Real) => ValueKind::Real,
                (ValueKind::Str, ValueKind::Str) => ValueKind::Str,
                _ => ValueKind::Integer,
            }
        }
        Expr::Relational { .. } | Expr::Not(_) => ValueKind::Integer,
    }
}

fn write_op(kind: ValueKind) -> Instr {
    match kind {
        ValueKind::Str => Instr::WriteS,
        ValueKind::Real => Instr::WriteF,
        ValueKind::Integer | ValueKind::Other => Instr::WriteI,
    }
}

fn push_const(value: &ConstValue) -> Instr {
    match value {
        ConstValue::Integer(n) => Instr::PushI(*n),
        ConstValue::Real(x) => Instr::PushF(*x),
        ConstValue::Str(s) => Instr::PushS(s.clone()),
    }
}

// ── Program structure ───────────────────────────────────────────────

impl Lower for Program {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        debug!("lowering program {}", self.heading.name);
        let block = lower_block(&self.block, ctx)?;
        let mut code = block.prologue;
        code.push(Instr::Start);
        code.extend(block.statements);
        code.push(Instr::Stop);
        code.extend(block.bodies);
        Ok(code)
    }
}

impl Lower for ProgramHeading {
    fn lower(&self, _ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        Ok(Vec::new())
    }
}

/// The three parts of a lowered block, assembled differently for the
/// program and for procedure bodies.
struct BlockCode {
    /// Array allocations.
    prologue: Vec<Instr>,
    statements: Vec<Instr>,
    /// Sections of the procedures and functions declared in the block.
    bodies: Vec<Instr>,
}

/// Declarations first (callables are only registered), then the body, then
/// the callable sections. Registering every callable before the first
/// statement lets calls precede declarations.
fn lower_block(block: &Block, ctx: &mut Context) -> Result<BlockCode, CodegenError> {
    let mut prologue = Vec::new();
    for declaration in &block.declarations {
        match declaration {
            Declaration::Procedure(procedure) => {
                ctx.register_procedure(&procedure.name, &procedure.params);
            }
            Declaration::Function(function) => {
                ctx.register_function(&function.name, function.return_type.clone(), &function.params);
            }
            other => prologue.extend(other.lower(ctx)?),
        }
    }

    let statements = block.body.lower(ctx)?;

    let mut bodies = Vec::new();
    for declaration in &block.declarations {
        if let Declaration::Procedure(_) | Declaration::Function(_) = declaration {
            bodies.extend(declaration.lower(ctx)?);
        }
    }

    Ok(BlockCode {
        prologue,
        statements,
        bodies,
    })
}

/// A nested block on its own: allocations, statements and callable
/// sections, without `START`/`STOP`.
impl Lower for Block {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        let block = lower_block(self, ctx)?;
        let mut code = block.prologue;
        code.extend(block.statements);
        code.extend(block.bodies);
        Ok(code)
    }
}

// ── Declarations ────────────────────────────────────────────────────

impl Lower for Declaration {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        match self {
            Declaration::Constants(block) => block.lower(ctx),
            Declaration::Types(block) => block.lower(ctx),
            Declaration::Variables(block) => block.lower(ctx),
            Declaration::Procedure(procedure) => procedure.lower(ctx),
            Declaration::Function(function) => function.lower(ctx),
        }
    }
}

impl Lower for ConstantDefinitionBlock {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        for definition in &self.definitions {
            definition.lower(ctx)?;
        }
        Ok(Vec::new())
    }
}

/// Constants are inlined at every use and never take a slot.
impl Lower for ConstantDefinition {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        match constant_value(&self.value, ctx) {
            Some(value) => {
                debug!("constant {} = {:?}", self.name, value);
                ctx.declare_constant(&self.name, value);
            }
            None => warn!("constant {} has no compile-time value", self.name),
        }
        Ok(Vec::new())
    }
}

fn constant_value(constant: &Constant, ctx: &Context) -> Option<ConstValue> {
    let (sign, value) = match constant {
        Constant::Str(s) => return Some(ConstValue::Str(s.clone())),
        Constant::Chr(code) => return Some(ConstValue::Integer(*code)),
        Constant::Number { sign, value } => (
            *sign,
            match value {
                UnsignedNumber::Integer(n) => ConstValue::Integer(*n),
                UnsignedNumber::Real(x) => ConstValue::Real(*x),
            },
        ),
        Constant::Identifier { sign, name } => (*sign, ctx.lookup_constant(name)?.clone()),
    };
    match (sign, value) {
        (Some(Sign::Minus), ConstValue::Integer(n)) => Some(ConstValue::Integer(-n)),
        (Some(Sign::Minus), ConstValue::Real(x)) => Some(ConstValue::Real(-x)),
        (Some(_), ConstValue::Str(_)) => None,
        (_, value) => Some(value),
    }
}

impl Lower for TypeDeclarationBlock {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        for definition in &self.definitions {
            definition.lower(ctx)?;
        }
        Ok(Vec::new())
    }
}

impl Lower for TypeDefinition {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        ctx.declare_type(&self.name, self.ty.clone());
        Ok(Vec::new())
    }
}

impl Lower for VariableDeclarationBlock {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        let mut code = Vec::new();
        for declaration in &self.declarations {
            code.extend(declaration.lower(ctx)?);
        }
        Ok(code)
    }
}

/// Scalars are only declared; their slot is taken on first use. Arrays
/// reserve their slots now and emit `ALLOC upper-lower`.
impl Lower for VariableDeclaration {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        let index = match ctx.resolve_type(&self.ty) {
            Type::Array(array) => Some(array.index),
            _ => None,
        };
        let mut code = Vec::new();
        for name in &self.names {
            ctx.declare_variable(name, self.ty.clone());
            if let Some(index) = index {
                let too_large = || CodegenError::ArrayTooLarge { name: name.clone() };
                let size = index.size().ok_or_else(too_large)?;
                // Indexed reads add the raw index to the base, so every
                // index up to `upper` needs a slot of its own.
                let slots = if index.upper < 0 {
                    Some(1)
                } else {
                    usize::try_from(index.upper).ok().and_then(|upper| upper.checked_add(1))
                };
                let slots = slots.ok_or_else(too_large)?;
                let base = ctx.allocate_array(name, slots)?;
                debug!("array {} at {} ({} slots)", name, base, slots);
                code.push(Instr::Alloc(size));
            }
        }
        Ok(code)
    }
}

/// Enter the callable's scope with its parameters (and, for functions, its
/// own name as the result) bound to the slots reserved at registration.
fn enter_callable(ctx: &mut Context, sig: &Signature) {
    ctx.enter_scope(&sig.name);
    for param in &sig.params {
        ctx.declare_variable(&param.name, Type::Identifier(param.ty.clone()));
        ctx.bind_address(&param.name, param.address);
    }
    if let (Some(ty), Some(result)) = (&sig.return_type, sig.result_address) {
        ctx.declare_variable(&sig.name, Type::Identifier(ty.clone()));
        ctx.bind_address(&sig.name, result);
    }
}

/// `entry:`, allocations, body, `RETURN`, then nested callable sections.
fn lower_callable(sig: &Signature, block: &Block, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    debug!("lowering {} at {}", sig.entry, ctx.scope_path());
    enter_callable(ctx, sig);
    let lowered = lower_block(block, ctx);
    ctx.exit_scope();
    let block = lowered?;

    let mut code = vec![Instr::Label(sig.entry.clone())];
    code.extend(block.prologue);
    code.extend(block.statements);
    code.push(Instr::Return);
    code.extend(block.bodies);
    Ok(code)
}

impl Lower for ProcedureDeclaration {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        let sig = match ctx.procedure(&self.name) {
            Some(sig) => sig.clone(),
            None => ctx.register_procedure(&self.name, &self.params),
        };
        lower_callable(&sig, &self.block, ctx)
    }
}

impl Lower for FunctionDeclaration {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        let sig = match ctx.function(&self.name) {
            Some(sig) => sig.clone(),
            None => ctx.register_function(&self.name, self.return_type.clone(), &self.params),
        };
        lower_callable(&sig, &self.block, ctx)
    }
}

impl Lower for FormalParameterSection {
    fn lower(&self, _ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        Ok(Vec::new())
    }
}

impl Lower for Type {
    fn lower(&self, _ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        Ok(Vec::new())
    }
}

// ── Statements ──────────────────────────────────────────────────────

impl Lower for CompoundStatement {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        lower_statements(&self.statements, ctx)
    }
}

fn lower_statements(statements: &[Statement], ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let mut code = Vec::new();
    for statement in statements {
        code.extend(statement.lower(ctx)?);
    }
    Ok(code)
}

impl Lower for Statement {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        match self {
            Statement::Compound(compound) => compound.lower(ctx),
            Statement::Assignment { target, value } => lower_assignment(target, value, ctx),
            Statement::Call(call) => lower_call(call, ctx, false),
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => lower_if(condition, then_branch, else_branch.as_deref(), ctx),
            Statement::While { condition, body } => lower_while(condition, body, ctx),
            Statement::For {
                variable,
                initial,
                direction,
                limit,
                body,
            } => lower_for(variable, initial, *direction, limit, body, ctx),
            Statement::Repeat { body, condition } => lower_repeat(body, condition, ctx),
            Statement::Empty => Ok(Vec::new()),
        }
    }
}

fn lower_assignment(target: &Variable, value: &Expr, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    match target {
        Variable::Simple(name) => {
            let mut code = value.lower(ctx)?;
            code.push(Instr::StoreG(ctx.variable_address(name)));
            Ok(code)
        }
        Variable::Indexed { name, .. } => Err(CodegenError::Unsupported {
            construct: format!("assignment to array element {}[...]", name),
        }),
    }
}

/// ```text
/// cond; JZ else_N; then; JUMP endif_N; else_N:; else; endif_N:
/// ```
fn lower_if(
    condition: &Expr,
    then_branch: &Statement,
    else_branch: Option<&Statement>,
    ctx: &mut Context,
) -> Result<Vec<Instr>, CodegenError> {
    let n = ctx.next_label();
    debug!("if #{}", n);
    let mut code = condition.lower(ctx)?;
    code.push(Instr::Jz(Label::Else(n)));
    code.extend(then_branch.lower(ctx)?);
    code.push(Instr::Jump(Label::EndIf(n)));
    code.push(Instr::Label(Label::Else(n)));
    if let Some(else_branch) = else_branch {
        code.extend(else_branch.lower(ctx)?);
    }
    code.push(Instr::Label(Label::EndIf(n)));
    Ok(code)
}

fn lower_while(condition: &Expr, body: &Statement, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let n = ctx.next_label();
    debug!("while #{}", n);
    let mut code = vec![Instr::Label(Label::While(n))];
    code.extend(condition.lower(ctx)?);
    code.push(Instr::Jz(Label::EndWhile(n)));
    code.extend(body.lower(ctx)?);
    code.push(Instr::Jump(Label::While(n)));
    code.push(Instr::Label(Label::EndWhile(n)));
    Ok(code)
}

fn lower_for(
    variable: &str,
    initial: &Expr,
    direction: ForDirection,
    limit: &Expr,
    body: &Statement,
    ctx: &mut Context,
) -> Result<Vec<Instr>, CodegenError> {
    let n = ctx.next_label();
    let addr = ctx.variable_address(variable);
    debug!("for #{} over slot {}", n, addr);
    let (test, step) = match direction {
        ForDirection::To => (Instr::InfEq, Instr::Add),
        ForDirection::Downto => (Instr::SupEq, Instr::Sub),
    };

    let mut code = initial.lower(ctx)?;
    code.push(Instr::StoreG(addr));
    code.push(Instr::Label(Label::Loop(n)));
    code.push(Instr::PushG(addr));
    code.extend(limit.lower(ctx)?);
    code.push(test);
    code.push(Instr::Jz(Label::EndLoop(n)));
    code.extend(body.lower(ctx)?);
    code.push(Instr::PushG(addr));
    code.push(Instr::PushI(1));
    code.push(step);
    code.push(Instr::StoreG(addr));
    code.push(Instr::Jump(Label::Loop(n)));
    code.push(Instr::Label(Label::EndLoop(n)));
    Ok(code)
}

/// ```text
/// repeat_N:; body; cond; JZ repeat_N
/// ```
fn lower_repeat(body: &[Statement], condition: &Expr, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let n = ctx.next_label();
    debug!("repeat #{}", n);
    let mut code = vec![Instr::Label(Label::Repeat(n))];
    code.extend(lower_statements(body, ctx)?);
    code.extend(condition.lower(ctx)?);
    code.push(Instr::Jz(Label::Repeat(n)));
    Ok(code)
}

// ── Calls ───────────────────────────────────────────────────────────

/// A call in statement position.
impl Lower for Call {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        lower_call(self, ctx, false)
    }
}

/// Intrinsics first, then user callables. `as_value` asks for the
/// function result on the stack afterwards.
fn lower_call(call: &Call, ctx: &mut Context, as_value: bool) -> Result<Vec<Instr>, CodegenError> {
    match call.name.to_lowercase().as_str() {
        "write" => lower_write(&call.args, false, ctx),
        "writeln" => lower_write(&call.args, true, ctx),
        "read" | "readln" => lower_read(call, ctx),
        "length" => {
            let mut code = lower_arguments(&call.args, ctx)?;
            code.push(Instr::StrLen);
            Ok(code)
        }
        "chr" => lower_arguments(&call.args, ctx),
        _ => {
            let sig = if as_value {
                ctx.callable(&call.name)
            } else {
                ctx.procedure(&call.name).or_else(|| ctx.function(&call.name))
            };
            let sig = sig.cloned().ok_or_else(|| CodegenError::UndefinedCallee {
                name: call.name.clone(),
            })?;
            lower_user_call(&sig, &call.args, ctx, as_value)
        }
    }
}

fn lower_arguments(args: &[Argument], ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let mut code = Vec::new();
    for arg in args {
        code.extend(arg.lower(ctx)?);
    }
    Ok(code)
}

/// Store arguments into parameter slots, `PUSHA entry`, `CALL`.
fn lower_user_call(
    sig: &Signature,
    args: &[Argument],
    ctx: &mut Context,
    as_value: bool,
) -> Result<Vec<Instr>, CodegenError> {
    if args.len() != sig.params.len() {
        warn!(
            "{} expects {} arguments, got {}",
            sig.name,
            sig.params.len(),
            args.len()
        );
    }
    let mut code = Vec::new();
    for (arg, param) in args.iter().zip(&sig.params) {
        code.extend(arg.lower(ctx)?);
        code.push(Instr::StoreG(param.address));
    }
    code.push(Instr::PushA(sig.entry.clone()));
    code.push(Instr::Call);
    if as_value {
        match sig.result_address {
            Some(result) if sig.is_function() => code.push(Instr::PushG(result)),
            _ => warn!("procedure {} used as a value", sig.name),
        }
    }
    Ok(code)
}

/// One value push and write opcode per argument, `WRITELN` for `writeln`.
fn lower_write(args: &[Argument], newline: bool, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let mut code = Vec::new();
    for arg in args {
        let kind = estimate(argument_value(arg), ctx);
        code.extend(arg.lower(ctx)?);
        code.push(write_op(kind));
    }
    if newline {
        code.push(Instr::WriteLn);
    }
    Ok(code)
}

/// `READ`, `ATOI` for integer targets, then the store. Element targets go
/// through the fixed `STORE 2`.
fn lower_read(call: &Call, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
    let mut code = Vec::new();
    for arg in &call.args {
        let Argument::Expr(Expr::Variable(target)) = arg else {
            return Err(CodegenError::InvalidReadTarget {
                callee: call.name.clone(),
            });
        };
        code.push(Instr::Read);
        match target {
            Variable::Simple(name) => {
                let is_integer = ctx
                    .variable_type(name)
                    .map_or(false, |ty| kind_of_type(ty, ctx) == ValueKind::Integer);
                if is_integer {
                    code.push(Instr::Atoi);
                }
                code.push(Instr::StoreG(ctx.variable_address(name)));
            }
            Variable::Indexed { name, .. } => {
                if element_kind(name, ctx) == ValueKind::Integer {
                    code.push(Instr::Atoi);
                }
                code.push(Instr::Store(2));
            }
        }
    }
    Ok(code)
}

fn argument_value(arg: &Argument) -> &Expr {
    match arg {
        Argument::Expr(expr) => expr,
        Argument::Formatted(formatted) => &formatted.value,
    }
}

/// Width and precision have no VM counterpart; only the value is lowered.
impl Lower for Argument {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        argument_value(self).lower(ctx)
    }
}

// ── Expressions ─────────────────────────────────────────────────────

impl Lower for Expr {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        match self {
            Expr::Relational { left, op, right } => {
                let ops = match op {
                    RelOp::Eq => vec![Instr::Equal],
                    RelOp::NotEq => vec![Instr::Equal, Instr::Not],
                    RelOp::Lt => vec![Instr::Inf],
                    RelOp::Le => vec![Instr::InfEq],
                    RelOp::Gt => vec![Instr::Sup],
                    RelOp::Ge => vec![Instr::SupEq],
                    RelOp::In => {
                        return Err(CodegenError::Unsupported {
                            construct: "set membership (in)".to_string(),
                        })
                    }
                };
                let mut code = left.lower(ctx)?;
                code.extend(right.lower(ctx)?);
                code.extend(ops);
                Ok(code)
            }
            Expr::Additive { left, op, right } => {
                let mut code = left.lower(ctx)?;
                code.extend(right.lower(ctx)?);
                code.push(match op {
                    AddOp::Add => Instr::Add,
                    AddOp::Sub => Instr::Sub,
                    AddOp::Or => Instr::Or,
                });
                Ok(code)
            }
            Expr::Multiplicative { left, op, right } => {
                let mut code = left.lower(ctx)?;
                code.extend(right.lower(ctx)?);
                code.push(match op {
                    MulOp::Mul => Instr::Mul,
                    MulOp::Slash | MulOp::Div => Instr::Div,
                    MulOp::Mod => Instr::Mod,
                    MulOp::And => Instr::And,
                });
                Ok(code)
            }
            Expr::Signed { sign, operand } => {
                let mut code = operand.lower(ctx)?;
                if *sign == Sign::Minus {
                    code.push(Instr::Neg);
                }
                Ok(code)
            }
            Expr::Not(operand) => {
                let mut code = operand.lower(ctx)?;
                code.push(Instr::Not);
                Ok(code)
            }
            Expr::Variable(variable) => variable.lower(ctx),
            Expr::Call(call) => lower_call(call, ctx, true),
            Expr::Constant(constant) => constant.lower(ctx),
            Expr::Parenthesized(inner) => inner.lower(ctx),
        }
    }
}

/// A variable read. A bare name can also be a constant (inlined) or a
/// zero-argument function (called).
impl Lower for Variable {
    fn lower(&self, ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        match self {
            Variable::Simple(name) => {
                let callee = match ctx.lookup(name) {
                    Some(Lookup::Declared(Symbol { kind, .. })) => match kind {
                        SymbolKind::Constant(value) => return Ok(vec![push_const(value)]),
                        SymbolKind::Function(sig) => Some(sig.clone()),
                        _ => None,
                    },
                    _ => ctx.function(name).cloned(),
                };
                match callee {
                    Some(sig) => lower_user_call(&sig, &[], ctx, true),
                    None => Ok(vec![Instr::PushG(ctx.variable_address(name))]),
                }
            }
            Variable::Indexed { name, index } => {
                let mut code = index.lower(ctx)?;
                let base = ctx.variable_address(name);
                code.push(Instr::PushI(base as i64));
                code.push(Instr::Add);
                code.push(Instr::LoadN);
                Ok(code)
            }
        }
    }
}

impl Lower for UnsignedConstant {
    fn lower(&self, _ctx: &mut Context) -> Result<Vec<Instr>, CodegenError> {
        Ok(vec![match self {
            UnsignedConstant::Integer(n) => Instr::PushI(*n),
            UnsignedConstant::Real(x) => Instr::PushF(*x),
            UnsignedConstant::Str(s) => Instr::PushS(s.clone()),
            UnsignedConstant::Bool(b) => Instr::PushI(i64::from(*b)),
            UnsignedConstant::Nil => Instr::PushI(0),
        }])
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use crate::vm::render;

    fn parse(src: &str) -> Program {
        let mut lexer = Lexer::new(src);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty(), "Lex errors: {:?}", lexer.errors());
        Parser::new(tokens).parse().expect("Parse failed")
    }

    fn compile_source(src: &str) -> Vec<Instr> {
        compile_program(&parse(src)).expect("Compile failed")
    }

    /// Compile a main body with the given declarations and return its text.
    fn compile_body(decls: &str, body: &str) -> String {
        render(&compile_source(&format!("program t; {} begin {} end.", decls, body)))
    }

    fn find_op(code: &[Instr], op: &Instr) -> bool {
        code.iter().any(|instr| instr == op)
    }

    #[test]
    fn test_assignment_end_to_end() {
        let code = compile_source("program T; var x: integer; begin x := 1 + 2; end.");
        assert_eq!(render(&code), "START\nPUSHI 1\nPUSHI 2\nADD\nSTOREG 0\nSTOP");
    }

    #[test]
    fn test_writeln_string() {
        assert_eq!(
            compile_body("", "writeln('Hello')"),
            "START\nPUSHS \"Hello\"\nWRITES\nWRITELN\nSTOP"
        );
    }

    #[test]
    fn test_write_opcode_follows_static_type() {
        let text = compile_body(
            "var i: integer; r: real; s: string;",
            "write(i, r, s, 1.5, i + r, 'x')",
        );
        assert_eq!(
            text,
            "START\nPUSHG 0\nWRITEI\nPUSHG 1\nWRITEF\nPUSHG 2\nWRITES\n\
             PUSHF 1.5\nWRITEF\nPUSHG 0\nPUSHG 1\nADD\nWRITEF\nPUSHS \"x\"\nWRITES\nSTOP"
        );
    }

    #[test]
    fn test_formatted_write_lowers_value_only() {
        assert_eq!(
            compile_body("var r: real;", "writeln(r:8:2)"),
            "START\nPUSHG 0\nWRITEF\nWRITELN\nSTOP"
        );
    }

    #[test]
    fn test_operator_mapping() {
        let text = compile_body(
            "var a, b: integer;",
            "a := a - b * b div b mod b; b := a / b; a := (a and b) or not b",
        );
        for op in ["SUB", "MUL", "DIV", "MOD", "AND", "OR", "NOT"] {
            assert!(text.lines().any(|line| line == op), "missing {}", op);
        }
    }

    #[test]
    fn test_relational_mapping() {
        let cases = [
            ("=", "EQUAL"),
            ("<", "INF"),
            ("<=", "INFEQ"),
            (">", "SUP"),
            (">=", "SUPEQ"),
        ];
        for (op, instr) in cases {
            let text = compile_body("var a, b: boolean;", &format!("a := 1 {} 2", op));
            assert_eq!(text, format!("START\nPUSHI 1\nPUSHI 2\n{}\nSTOREG 0\nSTOP", instr));
        }
        assert_eq!(
            compile_body("var a: boolean;", "a := 1 <> 2"),
            "START\nPUSHI 1\nPUSHI 2\nEQUAL\nNOT\nSTOREG 0\nSTOP"
        );
    }

    #[test]
    fn test_unary_sign() {
        assert_eq!(
            compile_body("var x: integer;", "x := -x; x := +x"),
            "START\nPUSHG 0\nNEG\nSTOREG 0\nPUSHG 0\nSTOREG 0\nSTOP"
        );
    }

    #[test]
    fn test_literals() {
        assert_eq!(
            compile_body("var b: boolean; p: integer;", "b := true; b := false; p := nil"),
            "START\nPUSHI 1\nSTOREG 0\nPUSHI 0\nSTOREG 0\nPUSHI 0\nSTOREG 1\nSTOP"
        );
    }

    #[test]
    fn test_if_else_labels() {
        let text = compile_body("var x, y: integer;", "if x > 0 then y := 1 else y := 2");
        assert_eq!(
            text,
            "START\nPUSHG 0\nPUSHI 0\nSUP\nJZ else_1\nPUSHI 1\nSTOREG 1\nJUMP endif_1\n\
             else_1:\nPUSHI 2\nSTOREG 1\nendif_1:\nSTOP"
        );
    }

    #[test]
    fn test_if_without_else_keeps_both_labels() {
        let text = compile_body("var x: integer;", "if x = 0 then x := 1");
        assert!(text.contains("JZ else_1\nPUSHI 1\nSTOREG 0\nJUMP endif_1\nelse_1:\nendif_1:"));
    }

    #[test]
    fn test_while_loop() {
        let text = compile_body("var i: integer;", "while i < 3 do i := i + 1");
        assert_eq!(
            text,
            "START\nwhile_1:\nPUSHG 0\nPUSHI 3\nINF\nJZ endwhile_1\n\
             PUSHG 0\nPUSHI 1\nADD\nSTOREG 0\nJUMP while_1\nendwhile_1:\nSTOP"
        );
    }

    #[test]
    fn test_for_loop_ascending() {
        let text = compile_body("var i, s: integer;", "for i := 1 to 10 do s := s + i");
        assert_eq!(
            text,
            "START\nPUSHI 1\nSTOREG 0\nloop_1:\nPUSHG 0\nPUSHI 10\nINFEQ\nJZ endloop_1\n\
             PUSHG 1\nPUSHG 0\nADD\nSTOREG 1\n\
             PUSHG 0\nPUSHI 1\nADD\nSTOREG 0\nJUMP loop_1\nendloop_1:\nSTOP"
        );
    }

    #[test]
    fn test_for_loop_descending() {
        let code = compile_source("program t; var i: integer; begin for i := 10 downto 1 do end.");
        assert!(find_op(&code, &Instr::SupEq));
        assert!(find_op(&code, &Instr::Sub));
        assert!(!find_op(&code, &Instr::InfEq));
    }

    #[test]
    fn test_repeat_until() {
        let text = compile_body("var i: integer;", "repeat i := i - 1 until i = 0");
        assert_eq!(
            text,
            "START\nrepeat_1:\nPUSHG 0\nPUSHI 1\nSUB\nSTOREG 0\nPUSHG 0\nPUSHI 0\nEQUAL\nJZ repeat_1\nSTOP"
        );
    }

    #[test]
    fn test_nested_constructs_draw_fresh_labels() {
        let code = compile_source(
            "program t; var i, j: integer; begin \
             for i := 1 to 3 do if i > 1 then while j < i do j := j + 1; \
             if i = 3 then i := 0 end.",
        );
        assert!(find_op(&code, &Instr::Label(Label::Loop(1))));
        assert!(find_op(&code, &Instr::Label(Label::Else(2))));
        assert!(find_op(&code, &Instr::Label(Label::While(3))));
        assert!(find_op(&code, &Instr::Label(Label::Else(4))));
    }

    #[test]
    fn test_read_variants() {
        assert_eq!(
            compile_body("var n: integer; s: string;", "readln(n, s)"),
            "START\nREAD\nATOI\nSTOREG 0\nREAD\nSTOREG 1\nSTOP"
        );
        assert_eq!(
            compile_body("var a: array[1..5] of integer;", "readln(a[1])"),
            "ALLOC 4\nSTART\nREAD\nATOI\nSTORE 2\nSTOP"
        );
        assert_eq!(compile_body("", "readln"), "START\nSTOP");
    }

    #[test]
    fn test_read_requires_variable() {
        let program = parse("program t; begin readln(1 + 2) end.");
        assert_eq!(
            compile_program(&program),
            Err(CodegenError::InvalidReadTarget {
                callee: "readln".into()
            })
        );
    }

    #[test]
    fn test_length_intrinsic() {
        assert_eq!(
            compile_body("var s: string; n: integer;", "n := length(s)"),
            "START\nPUSHG 0\nSTRLEN\nSTOREG 1\nSTOP"
        );
    }

    #[test]
    fn test_intrinsics_are_case_insensitive() {
        assert_eq!(compile_body("", "WriteLn('a')"), "START\nPUSHS \"a\"\nWRITES\nWRITELN\nSTOP");
    }

    #[test]
    fn test_array_declaration_and_indexed_read() {
        let text = compile_body(
            "var i: integer; a: array[1..10] of integer; j: integer;",
            "j := a[i]",
        );
        // The array reserves slots 0..=10 at declaration; i and j are
        // allocated on first use.
        assert_eq!(
            text,
            "ALLOC 9\nSTART\nPUSHG 11\nPUSHI 0\nADD\nLOADN\nSTOREG 12\nSTOP"
        );
    }

    #[test]
    fn test_oversized_arrays_are_rejected() {
        let wide = parse(
            "program p; var a: array[-9223372036854775807..9223372036854775807] of integer; begin end.",
        );
        assert_eq!(
            compile_program(&wide),
            Err(CodegenError::ArrayTooLarge { name: "a".into() })
        );

        let long = parse("program p; var a, b: array[0..9223372036854775807] of integer; begin end.");
        assert_eq!(
            compile_program(&long),
            Err(CodegenError::ArrayTooLarge { name: "a".into() })
        );
    }

    #[test]
    fn test_array_element_assignment_unsupported() {
        let program = parse("program t; var a: array[0..3] of integer; begin a[1] := 2 end.");
        assert!(matches!(
            compile_program(&program),
            Err(CodegenError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_constants_are_inlined() {
        assert_eq!(
            compile_body(
                "const max = 10; low = -max; pi = 3.5; hi = 'hi'; bell = chr(7); var x: integer;",
                "x := max + low; writeln(pi, hi, bell)"
            ),
            "START\nPUSHI 10\nPUSHI -10\nADD\nSTOREG 0\n\
             PUSHF 3.5\nWRITEF\nPUSHS \"hi\"\nWRITES\nPUSHI 7\nWRITEI\nWRITELN\nSTOP"
        );
    }

    #[test]
    fn test_procedure_call_and_body() {
        let text = render(&compile_source(
            "program Test;
             procedure Greet;
             begin
                 writeln('Hello from a procedure!');
             end;
             begin
                 Greet;
             end.",
        ));
        assert_eq!(
            text,
            "START\nPUSHA procGreet\nCALL\nSTOP\n\
             procGreet:\nPUSHS \"Hello from a procedure!\"\nWRITES\nWRITELN\nRETURN"
        );
    }

    #[test]
    fn test_function_call_passes_arguments_in_slots() {
        let text = render(&compile_source(
            "program m;
             var r: integer;
             function Max(a, b: integer): integer;
             begin
                 if a > b then Max := a else Max := b
             end;
             begin
                 r := Max(3, 7);
                 writeln(r)
             end.",
        ));
        // a, b -> 0, 1; result -> 2; r -> 3
        assert_eq!(
            text,
            "START\nPUSHI 3\nSTOREG 0\nPUSHI 7\nSTOREG 1\nPUSHA funcMax\nCALL\nPUSHG 2\nSTOREG 3\n\
             PUSHG 3\nWRITEI\nWRITELN\nSTOP\n\
             funcMax:\nPUSHG 0\nPUSHG 1\nSUP\nJZ else_1\nPUSHG 0\nSTOREG 2\nJUMP endif_1\n\
             else_1:\nPUSHG 1\nSTOREG 2\nendif_1:\nRETURN"
        );
    }

    #[test]
    fn test_zero_argument_function_read_is_a_call() {
        let text = render(&compile_source(
            "program z;
             var x: integer;
             function Seven: integer;
             begin Seven := 7 end;
             begin x := Seven end.",
        ));
        assert!(text.starts_with("START\nPUSHA funcSeven\nCALL\nPUSHG 0\nSTOREG 1\nSTOP"));
    }

    #[test]
    fn test_call_before_declaration_and_nested_bodies() {
        let text = render(&compile_source(
            "program n;
             procedure Outer;
                 procedure Inner;
                 begin writeln('in') end;
             begin Inner end;
             begin Outer end.",
        ));
        assert_eq!(
            text,
            "START\nPUSHA procOuter\nCALL\nSTOP\n\
             procOuter:\nPUSHA procInner\nCALL\nRETURN\n\
             procInner:\nPUSHS \"in\"\nWRITES\nWRITELN\nRETURN"
        );
    }

    #[test]
    fn test_callables_resolve_case_insensitively() {
        let text = render(&compile_source(
            "program c; procedure Beep; begin end; begin BEEP; beep end.",
        ));
        assert!(text.starts_with("START\nPUSHA procBeep\nCALL\nPUSHA procBeep\nCALL\nSTOP"));
    }

    #[test]
    fn test_undefined_callee_is_fatal() {
        let program = parse("program u; begin missing(1) end.");
        assert_eq!(
            compile_program(&program),
            Err(CodegenError::UndefinedCallee {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn test_set_membership_unsupported() {
        let program = parse("program s; var b: boolean; begin b := 1 in 2 end.");
        assert!(matches!(
            compile_program(&program),
            Err(CodegenError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_type_nodes_lower_to_nothing() {
        let mut ctx = Context::new();
        let ty = Type::Subrange(Subrange { lower: 1, upper: 3 });
        assert!(lower(&ty, &mut ctx).unwrap().is_empty());
        assert!(lower(&ProgramHeading { name: "p".into() }, &mut ctx).unwrap().is_empty());
    }

    #[test]
    fn test_undeclared_variable_gets_fresh_slot() {
        assert_eq!(
            compile_body("", "x := y"),
            "START\nPUSHG 0\nSTOREG 1\nSTOP"
        );
    }
}
