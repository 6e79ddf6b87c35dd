//! Structural validation pass.
//!
//! Walks every node of a parsed program. The parser already rejects
//! malformed input, so every node kind currently validates; the walk is the
//! place to hang semantic checks without touching code generation.

use log::debug;

use crate::ast::*;

pub struct Validator {
    errors: Vec<String>,
    visited: usize,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            visited: 0,
        }
    }

    /// Number of nodes seen so far.
    pub fn visited(&self) -> usize {
        self.visited
    }

    pub fn validate_program(&mut self, program: &Program) -> Vec<String> {
        self.visit();
        self.block(&program.block);
        debug!("validated '{}': {} nodes", program.heading.name, self.visited);
        std::mem::take(&mut self.errors)
    }

    fn visit(&mut self) {
        self.visited += 1;
    }

    fn block(&mut self, block: &Block) {
        self.visit();
        for declaration in &block.declarations {
            self.declaration(declaration);
        }
        self.compound(&block.body);
    }

    // ── Declarations ────────────────────────────────────────────────

    fn declaration(&mut self, declaration: &Declaration) {
        self.visit();
        match declaration {
            Declaration::Constants(block) => {
                for def in &block.definitions {
                    self.visit();
                    self.constant(&def.value);
                }
            }
            Declaration::Types(block) => {
                for def in &block.definitions {
                    self.visit();
                    self.type_(&def.ty);
                }
            }
            Declaration::Variables(block) => {
                for decl in &block.declarations {
                    self.visit();
                    self.type_(&decl.ty);
                }
            }
            Declaration::Procedure(procedure) => {
                self.parameters(&procedure.params);
                self.block(&procedure.block);
            }
            Declaration::Function(function) => {
                self.parameters(&function.params);
                self.visit();
                self.block(&function.block);
            }
        }
    }

    fn parameters(&mut self, sections: &[FormalParameterSection]) {
        self.visited += sections.len();
    }

    fn constant(&mut self, _constant: &Constant) {
        self.visit();
    }

    fn type_(&mut self, ty: &Type) {
        self.visit();
        match ty {
            Type::Scalar(_) | Type::Subrange(_) | Type::Identifier(_) | Type::String(_) => {}
            Type::Array(_) | Type::Set(_) => self.visit(),
            Type::Record(record) => self.field_list(&record.fields),
        }
    }

    fn field_list(&mut self, fields: &FieldList) {
        self.visit();
        for section in &fields.fixed {
            self.visit();
            self.type_(&section.ty);
        }
        if let Some(variant) = &fields.variant {
            self.visit();
            for v in &variant.variants {
                self.visit();
                for label in &v.labels {
                    self.constant(label);
                }
                self.field_list(&v.fields);
            }
        }
    }

    // ── Statements ──────────────────────────────────────────────────

    fn compound(&mut self, compound: &CompoundStatement) {
        self.visit();
        for statement in &compound.statements {
            self.statement(statement);
        }
    }

    fn statement(&mut self, statement: &Statement) {
        self.visit();
        match statement {
            Statement::Compound(c) => self.compound(c),
            Statement::Assignment { target, value } => {
                self.variable(target);
                self.expr(value);
            }
            Statement::Call(call) => self.call(call),
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expr(condition);
                self.statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.statement(else_branch);
                }
            }
            Statement::While { condition, body } => {
                self.expr(condition);
                self.statement(body);
            }
            Statement::For {
                initial, limit, body, ..
            } => {
                self.expr(initial);
                self.expr(limit);
                self.statement(body);
            }
            Statement::Repeat { body, condition } => {
                for statement in body {
                    self.statement(statement);
                }
                self.expr(condition);
            }
            Statement::Empty => {}
        }
    }

    fn call(&mut self, call: &Call) {
        self.visit();
        for arg in &call.args {
            self.visit();
            match arg {
                Argument::Expr(e) => self.expr(e),
                Argument::Formatted(f) => {
                    self.expr(&f.value);
                    self.expr(&f.width);
                    if let Some(precision) = &f.precision {
                        self.expr(precision);
                    }
                }
            }
        }
    }

    fn variable(&mut self, variable: &Variable) {
        self.visit();
        if let Variable::Indexed { index, .. } = variable {
            self.expr(index);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        self.visit();
        match expr {
            Expr::Relational { left, right, .. }
            | Expr::Additive { left, right, .. }
            | Expr::Multiplicative { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Signed { operand, .. } | Expr::Not(operand) | Expr::Parenthesized(operand) => {
                self.expr(operand)
            }
            Expr::Variable(v) => self.variable(v),
            Expr::Call(c) => self.call(c),
            Expr::Constant(_) => {}
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a whole program.
pub fn validate(program: &Program) -> Result<(), Vec<String>> {
    let errors = Validator::new().validate_program(program);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
