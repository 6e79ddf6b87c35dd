//! Compilation context: scope chain, slot allocation and label numbers.
//!
//! A [`Context`] is a stack of scopes. The bottom scope is the program, and
//! every procedure or function body being lowered pushes one more. Each scope
//! keeps its own symbol table, its own name → slot table, and its own
//! callable registry.
//!
//! The two counters live on the context itself rather than on a scope: slot
//! addresses and label numbers are never handed out twice during one
//! context's lifetime, no matter which scope asked for them.
//!
//! Lookups walk the scopes from innermost to outermost and fall back to the
//! fixed table of built-in names.

use std::collections::HashMap;

use log::trace;

use crate::ast::{FormalParameterSection, ParameterMode, Type, TypeIdentifier};
use crate::errors::CodegenError;
use crate::vm::Label;

/// Size of the slot space. Arrays that would reach past it are rejected.
pub const MAX_SLOTS: usize = i32::MAX as usize;

/// Operators, standard routines, primitive types and standard constants.
/// Read-only process-wide data.
const BUILTINS: &[(&str, &str)] = &[
    // Arithmetic operators
    ("+", "plus"),
    ("-", "minus"),
    ("*", "mult"),
    ("/", "div"),
    ("div", "integer_div"),
    ("mod", "mod"),
    // Comparison operators
    ("=", "eq"),
    ("<>", "neq"),
    ("<", "lt"),
    ("<=", "le"),
    (">", "gt"),
    (">=", "ge"),
    // Logical operators
    ("and", "and_op"),
    ("or", "or_op"),
    ("not", "not_op"),
    (":=", "assign"),
    ("^", "pointer"),
    ("@", "address"),
    (".", "dot"),
    ("..", "range"),
    // Standard functions
    ("abs", "abs"),
    ("sqr", "sqr"),
    ("sin", "sin"),
    ("cos", "cos"),
    ("exp", "exp"),
    ("ln", "ln"),
    ("sqrt", "sqrt"),
    ("chr", "chr"),
    ("ord", "ord"),
    ("pred", "pred"),
    ("succ", "succ"),
    ("round", "round"),
    ("trunc", "trunc"),
    ("length", "length"),
    // Standard procedures
    ("write", "write"),
    ("writeln", "writeln"),
    ("read", "read"),
    ("readln", "readln"),
    // Standard types
    ("integer", "type_integer"),
    ("real", "type_real"),
    ("boolean", "type_boolean"),
    ("char", "type_char"),
    ("string", "type_string"),
    ("array", "type_array"),
    ("record", "type_record"),
    ("file", "type_file"),
    // Standard constants
    ("true", "const_true"),
    ("false", "const_false"),
    ("nil", "const_nil"),
];

/// Look a name up in the built-in table.
pub fn builtin(name: &str) -> Option<&'static str> {
    BUILTINS
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
}

/// A compile-time constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Integer(i64),
    Real(f64),
    Str(String),
}

/// A formal parameter bound to the global slot its argument is stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub mode: ParameterMode,
    pub ty: TypeIdentifier,
    pub address: usize,
}

/// What a call site needs to know about a procedure or function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub entry: Label,
    pub params: Vec<Param>,
    /// `None` for procedures.
    pub return_type: Option<TypeIdentifier>,
    /// Slot the function leaves its result in. `None` for procedures.
    pub result_address: Option<usize>,
}

impl Signature {
    pub fn is_function(&self) -> bool {
        self.return_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Variable(Type),
    Constant(ConstValue),
    Type(Type),
    Procedure(Signature),
    Function(Signature),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub kind: SymbolKind,
    /// Depth of the declaring scope; the program scope is 0.
    pub level: usize,
}

/// Result of [`Context::lookup`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    Declared(&'a Symbol),
    Builtin(&'static str),
}

#[derive(Debug, Default)]
struct Scope {
    name: String,
    symbols: HashMap<String, Symbol>,
    addresses: HashMap<String, usize>,
    /// `proc<name>` / `func<name>` keys, name lowercased.
    callables: HashMap<String, Signature>,
}

impl Scope {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct Context {
    scopes: Vec<Scope>,
    next_address: usize,
    label_counter: u32,
}

fn procedure_key(name: &str) -> String {
    format!("proc{}", name.to_lowercase())
}

fn function_key(name: &str) -> String {
    format!("func{}", name.to_lowercase())
}

impl Context {
    pub fn new() -> Self {
        Self::named("")
    }

    /// A fresh context whose program scope carries `name`.
    pub fn named(name: &str) -> Self {
        Self {
            scopes: vec![Scope::named(name)],
            next_address: 0,
            label_counter: 0,
        }
    }

    // ── Scopes ───────────────────────────────────────────────────────

    pub fn enter_scope(&mut self, name: &str) {
        self.scopes.push(Scope::named(name));
        trace!("enter scope {}", self.scope_path());
    }

    /// Leave the innermost scope. The program scope is never popped.
    pub fn exit_scope(&mut self) {
        if self.scopes.len() > 1 {
            trace!("exit scope {}", self.scope_path());
            self.scopes.pop();
        }
    }

    pub fn level(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Dotted scope names, outermost first, e.g. `Main.Outer.Inner`.
    pub fn scope_path(&self) -> String {
        self.scopes
            .iter()
            .map(|scope| scope.name.as_str())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn current(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    // ── Symbols ──────────────────────────────────────────────────────

    /// Declare in the innermost scope. Shadows outer declarations.
    pub fn declare(&mut self, name: &str, kind: SymbolKind) {
        let level = self.level();
        self.current()
            .symbols
            .insert(name.to_string(), Symbol { kind, level });
    }

    pub fn declare_variable(&mut self, name: &str, ty: Type) {
        self.declare(name, SymbolKind::Variable(ty));
    }

    pub fn declare_constant(&mut self, name: &str, value: ConstValue) {
        self.declare(name, SymbolKind::Constant(value));
    }

    pub fn declare_type(&mut self, name: &str, ty: Type) {
        self.declare(name, SymbolKind::Type(ty));
    }

    /// Nearest declaration of `name`, else its built-in meaning.
    pub fn lookup(&self, name: &str) -> Option<Lookup<'_>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.symbols.get(name))
            .map(Lookup::Declared)
            .or_else(|| builtin(name).map(Lookup::Builtin))
    }

    pub fn lookup_constant(&self, name: &str) -> Option<&ConstValue> {
        match self.lookup(name)? {
            Lookup::Declared(Symbol {
                kind: SymbolKind::Constant(value),
                ..
            }) => Some(value),
            _ => None,
        }
    }

    /// Declared type of a variable visible from the current scope.
    pub fn variable_type(&self, name: &str) -> Option<&Type> {
        match self.lookup(name)? {
            Lookup::Declared(Symbol {
                kind: SymbolKind::Variable(ty),
                ..
            }) => Some(ty),
            _ => None,
        }
    }

    /// Follow type identifiers through user type definitions until a
    /// structural type or a primitive name is reached.
    pub fn resolve_type<'a>(&'a self, ty: &'a Type) -> &'a Type {
        let mut current = ty;
        // Bounded so that `type a = b; b = a;` terminates.
        for _ in 0..self.symbol_count() + 1 {
            let Type::Identifier(ident) = current else {
                return current;
            };
            match self.lookup(&ident.name) {
                Some(Lookup::Declared(Symbol {
                    kind: SymbolKind::Type(next),
                    ..
                })) => current = next,
                _ => return current,
            }
        }
        current
    }

    fn symbol_count(&self) -> usize {
        self.scopes.iter().map(|scope| scope.symbols.len()).sum()
    }

    // ── Slots ────────────────────────────────────────────────────────

    /// Slot of `name`, allocated on first use.
    ///
    /// Resolution picks the nearest scope that already holds a slot for the
    /// name or declares it; otherwise the innermost scope gets a new slot.
    pub fn variable_address(&mut self, name: &str) -> usize {
        let owner = self
            .scopes
            .iter()
            .rposition(|scope| scope.addresses.contains_key(name) || scope.symbols.contains_key(name))
            .unwrap_or(self.scopes.len() - 1);

        if let Some(&address) = self.scopes[owner].addresses.get(name) {
            return address;
        }
        let address = self.take_slots(1);
        self.scopes[owner].addresses.insert(name.to_string(), address);
        trace!("slot {} -> {}", name, address);
        address
    }

    /// Reserve `size` consecutive slots for `name` and return the first one.
    pub fn allocate_array(&mut self, name: &str, size: usize) -> Result<usize, CodegenError> {
        let base = self.next_address;
        let end = base
            .checked_add(size.max(1))
            .filter(|&end| end <= MAX_SLOTS)
            .ok_or_else(|| CodegenError::ArrayTooLarge {
                name: name.to_string(),
            })?;
        self.next_address = end;
        self.current().addresses.insert(name.to_string(), base);
        trace!("array {} -> {}..{}", name, base, end);
        Ok(base)
    }

    /// Bind `name` in the innermost scope to a slot that was reserved
    /// elsewhere (parameter and result slots).
    pub fn bind_address(&mut self, name: &str, address: usize) {
        self.current().addresses.insert(name.to_string(), address);
    }

    /// Single slots only. Arrays never end past `MAX_SLOTS`, so this count
    /// stays far from `usize::MAX`.
    fn take_slots(&mut self, count: usize) -> usize {
        let base = self.next_address;
        self.next_address += count;
        base
    }

    // ── Labels ───────────────────────────────────────────────────────

    /// A fresh label number; the first one is 1.
    pub fn next_label(&mut self) -> u32 {
        self.label_counter += 1;
        self.label_counter
    }

    // ── Callables ────────────────────────────────────────────────────

    /// Register a procedure in the innermost scope, reserving one slot per
    /// formal parameter.
    pub fn register_procedure(&mut self, name: &str, params: &[FormalParameterSection]) -> Signature {
        let signature = Signature {
            name: name.to_string(),
            entry: Label::Procedure(name.to_string()),
            params: self.bind_params(params),
            return_type: None,
            result_address: None,
        };
        self.current()
            .callables
            .insert(procedure_key(name), signature.clone());
        self.declare(name, SymbolKind::Procedure(signature.clone()));
        signature
    }

    /// Register a function in the innermost scope, reserving one slot per
    /// formal parameter plus one for the result.
    pub fn register_function(
        &mut self,
        name: &str,
        return_type: TypeIdentifier,
        params: &[FormalParameterSection],
    ) -> Signature {
        let params = self.bind_params(params);
        let result_address = self.take_slots(1);
        let signature = Signature {
            name: name.to_string(),
            entry: Label::Function(name.to_string()),
            params,
            return_type: Some(return_type),
            result_address: Some(result_address),
        };
        self.current()
            .callables
            .insert(function_key(name), signature.clone());
        self.declare(name, SymbolKind::Function(signature.clone()));
        signature
    }

    fn bind_params(&mut self, sections: &[FormalParameterSection]) -> Vec<Param> {
        let mut params = Vec::new();
        for section in sections {
            for name in &section.group.names {
                params.push(Param {
                    name: name.clone(),
                    mode: section.mode,
                    ty: section.group.ty.clone(),
                    address: self.take_slots(1),
                });
            }
        }
        params
    }

    fn find_callable(&self, key: &str) -> Option<&Signature> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.callables.get(key))
    }

    /// Case-insensitive procedure lookup.
    pub fn procedure(&self, name: &str) -> Option<&Signature> {
        self.find_callable(&procedure_key(name))
    }

    /// Case-insensitive function lookup.
    pub fn function(&self, name: &str) -> Option<&Signature> {
        self.find_callable(&function_key(name))
    }

    /// A function or, failing that, a procedure named `name`.
    pub fn callable(&self, name: &str) -> Option<&Signature> {
        self.function(name).or_else(|| self.procedure(name))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParameterGroup;

    fn integer() -> Type {
        Type::Identifier(TypeIdentifier::new("integer"))
    }

    fn section(names: &[&str]) -> FormalParameterSection {
        FormalParameterSection {
            mode: ParameterMode::Value,
            group: ParameterGroup {
                names: names.iter().map(|n| n.to_string()).collect(),
                ty: TypeIdentifier::new("integer"),
            },
        }
    }

    #[test]
    fn test_addresses_are_lazy_and_stable() {
        let mut ctx = Context::new();
        assert_eq!(ctx.variable_address("x"), 0);
        assert_eq!(ctx.variable_address("y"), 1);
        assert_eq!(ctx.variable_address("x"), 0);
        assert_eq!(ctx.variable_address("z"), 2);
    }

    #[test]
    fn test_labels_strictly_increase() {
        let mut ctx = Context::new();
        let a = ctx.next_label();
        ctx.enter_scope("P");
        let b = ctx.next_label();
        ctx.exit_scope();
        let c = ctx.next_label();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[test]
    fn test_lookup_walks_outward_then_builtins() {
        let mut ctx = Context::named("Main");
        ctx.declare_variable("x", integer());
        ctx.enter_scope("P");
        assert!(matches!(ctx.lookup("x"), Some(Lookup::Declared(s)) if s.level == 0));
        assert_eq!(ctx.lookup("writeln"), Some(Lookup::Builtin("writeln")));
        assert_eq!(ctx.lookup("undefined"), None);
    }

    #[test]
    fn test_declare_shadows_outer_scope() {
        let mut ctx = Context::new();
        ctx.declare_constant("n", ConstValue::Integer(1));
        ctx.enter_scope("P");
        ctx.declare_constant("n", ConstValue::Integer(2));
        assert_eq!(ctx.lookup_constant("n"), Some(&ConstValue::Integer(2)));
        ctx.exit_scope();
        assert_eq!(ctx.lookup_constant("n"), Some(&ConstValue::Integer(1)));
    }

    #[test]
    fn test_user_declaration_beats_builtin() {
        let mut ctx = Context::new();
        ctx.declare_variable("abs", integer());
        assert!(matches!(ctx.lookup("abs"), Some(Lookup::Declared(_))));
    }

    #[test]
    fn test_outer_variable_keeps_outer_slot() {
        let mut ctx = Context::new();
        ctx.declare_variable("x", integer());
        ctx.enter_scope("P");
        ctx.declare_variable("y", integer());
        let y = ctx.variable_address("y");
        let x = ctx.variable_address("x");
        ctx.exit_scope();
        assert_eq!(ctx.variable_address("x"), x);
        assert_ne!(x, y);
    }

    #[test]
    fn test_inner_slots_never_reused() {
        let mut ctx = Context::new();
        ctx.enter_scope("P");
        let inner = ctx.variable_address("t");
        ctx.exit_scope();
        let outer = ctx.variable_address("t");
        assert_ne!(inner, outer);
    }

    #[test]
    fn test_allocate_array_reserves_block() {
        let mut ctx = Context::new();
        ctx.variable_address("i");
        let base = ctx.allocate_array("a", 5).unwrap();
        assert_eq!(base, 1);
        assert_eq!(ctx.variable_address("a"), 1);
        assert_eq!(ctx.variable_address("j"), 6);
    }

    #[test]
    fn test_allocate_array_respects_slot_space() {
        let mut ctx = Context::new();
        assert_eq!(ctx.allocate_array("a", MAX_SLOTS - 1), Ok(0));
        assert_eq!(
            ctx.allocate_array("b", 2),
            Err(CodegenError::ArrayTooLarge { name: "b".into() })
        );
        assert_eq!(
            ctx.allocate_array("c", usize::MAX),
            Err(CodegenError::ArrayTooLarge { name: "c".into() })
        );
        assert_eq!(ctx.variable_address("x"), MAX_SLOTS - 1);
    }

    #[test]
    fn test_register_function_reserves_param_and_result_slots() {
        let mut ctx = Context::new();
        let sig = ctx.register_function("Max", TypeIdentifier::new("integer"), &[section(&["a", "b"])]);
        assert_eq!(sig.entry, Label::Function("Max".into()));
        assert_eq!(sig.params.iter().map(|p| p.address).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(sig.result_address, Some(2));
        assert!(ctx.function("max").is_some());
        assert!(ctx.procedure("Max").is_none());
    }

    #[test]
    fn test_callables_are_case_insensitive() {
        let mut ctx = Context::new();
        ctx.register_procedure("Greet", &[]);
        assert!(ctx.procedure("GREET").is_some());
        assert_eq!(
            ctx.callable("greet").map(|sig| sig.entry.clone()),
            Some(Label::Procedure("Greet".into()))
        );
        assert!(ctx.callable("other").is_none());
    }

    #[test]
    fn test_resolve_type_follows_aliases() {
        let mut ctx = Context::new();
        ctx.declare_type("Score", Type::Identifier(TypeIdentifier::new("real")));
        let declared = Type::Identifier(TypeIdentifier::new("Score"));
        assert_eq!(
            ctx.resolve_type(&declared),
            &Type::Identifier(TypeIdentifier::new("real"))
        );
    }

    #[test]
    fn test_resolve_type_terminates_on_cycles() {
        let mut ctx = Context::new();
        ctx.declare_type("a", Type::Identifier(TypeIdentifier::new("b")));
        ctx.declare_type("b", Type::Identifier(TypeIdentifier::new("a")));
        let start = Type::Identifier(TypeIdentifier::new("a"));
        assert!(matches!(ctx.resolve_type(&start), Type::Identifier(_)));
    }

    #[test]
    fn test_scope_path() {
        let mut ctx = Context::named("Main");
        ctx.enter_scope("Outer");
        ctx.enter_scope("Inner");
        assert_eq!(ctx.scope_path(), "Main.Outer.Inner");
        assert_eq!(ctx.level(), 2);
        ctx.exit_scope();
        ctx.exit_scope();
        ctx.exit_scope();
        assert_eq!(ctx.level(), 0);
        assert_eq!(ctx.scope_path(), "Main");
    }
}
