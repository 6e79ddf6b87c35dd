//! Generic labelled view of the AST for visualisation.
//!
//! [`build`] flattens the typed tree into [`TreeNode`]s with a text label
//! each. [`TreeNode::dump`] prints the indented dump used by the `parse` and
//! `visualize` commands; [`TreeNode::to_dot`] emits a Graphviz graph.

use petgraph::dot::{Config, Dot};
use petgraph::graph::{Graph, NodeIndex};

use crate::ast::*;
use crate::printer::print_expr;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub label: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn leaf(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn node(label: impl Into<String>, children: Vec<TreeNode>) -> Self {
        Self {
            label: label.into(),
            children,
        }
    }

    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    /// One node per line, two spaces of indentation per level.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&self.label);
        out.push('\n');
        for child in &self.children {
            child.dump_into(out, depth + 1);
        }
    }

    /// Copy this subtree into a `petgraph` graph, parents before children.
    pub fn to_graph(&self) -> Graph<String, &'static str> {
        let mut graph = Graph::new();
        self.add_to(&mut graph);
        graph
    }

    fn add_to(&self, graph: &mut Graph<String, &'static str>) -> NodeIndex {
        let id = graph.add_node(self.label.clone());
        for child in &self.children {
            let child_id = child.add_to(graph);
            graph.add_edge(id, child_id, "");
        }
        id
    }

    /// Graphviz DOT, nodes numbered in pre-order.
    pub fn to_dot(&self) -> String {
        let graph = self.to_graph();
        format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn build(program: &Program) -> TreeNode {
    TreeNode::node(
        format!("program: {}", program.heading.name),
        vec![block(&program.block)],
    )
}

fn block(block: &Block) -> TreeNode {
    let mut children: Vec<TreeNode> = block.declarations.iter().map(declaration).collect();
    children.push(compound(&block.body));
    TreeNode::node("block", children)
}

fn declaration(declaration: &Declaration) -> TreeNode {
    match declaration {
        Declaration::Constants(block) => TreeNode::node(
            "constants",
            block
                .definitions
                .iter()
                .map(|def| TreeNode::node(format!("constant: {}", def.name), vec![constant(&def.value)]))
                .collect(),
        ),
        Declaration::Types(block) => TreeNode::node(
            "types",
            block
                .definitions
                .iter()
                .map(|def| TreeNode::node(format!("type: {}", def.name), vec![type_(&def.ty)]))
                .collect(),
        ),
        Declaration::Variables(block) => TreeNode::node(
            "variables",
            block
                .declarations
                .iter()
                .map(|decl| TreeNode::node(format!("variable: {}", decl.names.join(", ")), vec![type_(&decl.ty)]))
                .collect(),
        ),
        Declaration::Procedure(procedure) => {
            let mut children = parameters(&procedure.params);
            children.push(self::block(&procedure.block));
            TreeNode::node(format!("procedure: {}", procedure.name), children)
        }
        Declaration::Function(function) => {
            let mut children = parameters(&function.params);
            children.push(TreeNode::leaf(format!("returns: {}", function.return_type.name)));
            children.push(self::block(&function.block));
            TreeNode::node(format!("function: {}", function.name), children)
        }
    }
}

fn parameters(sections: &[FormalParameterSection]) -> Vec<TreeNode> {
    sections
        .iter()
        .map(|section| {
            let mode = match section.mode {
                ParameterMode::Value => "value",
                ParameterMode::Var => "var",
                ParameterMode::Function => "function",
                ParameterMode::Procedure => "procedure",
            };
            TreeNode::leaf(format!(
                "parameter ({}): {}: {}",
                mode,
                section.group.names.join(", "),
                section.group.ty.name
            ))
        })
        .collect()
}

fn constant(constant: &Constant) -> TreeNode {
    let sign = |sign: &Option<Sign>| sign.map_or("", Sign::symbol);
    match constant {
        Constant::Number { sign: s, value } => match value {
            UnsignedNumber::Integer(n) => TreeNode::leaf(format!("integer: {}{}", sign(s), n)),
            UnsignedNumber::Real(x) => TreeNode::leaf(format!("real: {}{:?}", sign(s), x)),
        },
        Constant::Identifier { sign: s, name } => TreeNode::leaf(format!("identifier: {}{}", sign(s), name)),
        Constant::Str(s) => TreeNode::leaf(format!("string: {}", s)),
        Constant::Chr(code) => TreeNode::leaf(format!("chr: {}", code)),
    }
}

fn type_(ty: &Type) -> TreeNode {
    match ty {
        Type::Scalar(names) => TreeNode::leaf(format!("scalar: {}", names.join(", "))),
        Type::Subrange(range) => TreeNode::leaf(format!("subrange: {}..{}", range.lower, range.upper)),
        Type::Identifier(ident) => TreeNode::leaf(format!("type identifier: {}", ident.name)),
        Type::String(string) => TreeNode::leaf(format!("string type: {}", string.length)),
        Type::Array(array) => TreeNode::node(
            "array",
            vec![
                TreeNode::leaf(format!("subrange: {}..{}", array.index.lower, array.index.upper)),
                TreeNode::leaf(format!("type identifier: {}", array.element.name)),
            ],
        ),
        Type::Record(record) => TreeNode::node("record", field_list(&record.fields)),
        Type::Set(set) => TreeNode::node(
            "set",
            vec![TreeNode::leaf(format!("type identifier: {}", set.base.name))],
        ),
    }
}

fn field_list(fields: &FieldList) -> Vec<TreeNode> {
    let mut children: Vec<TreeNode> = fields
        .fixed
        .iter()
        .map(|section| TreeNode::node(format!("field: {}", section.names.join(", ")), vec![type_(&section.ty)]))
        .collect();
    if let Some(variant) = &fields.variant {
        let tag = match &variant.tag.name {
            Some(name) => format!("tag: {}: {}", name, variant.tag.ty.name),
            None => format!("tag: {}", variant.tag.ty.name),
        };
        let mut parts = vec![TreeNode::leaf(tag)];
        parts.extend(variant.variants.iter().map(|v| {
            let mut children: Vec<TreeNode> = v.labels.iter().map(constant).collect();
            children.extend(field_list(&v.fields));
            TreeNode::node("variant", children)
        }));
        children.push(TreeNode::node("variant part", parts));
    }
    children
}

// ── Statements ──────────────────────────────────────────────────────

fn compound(compound: &CompoundStatement) -> TreeNode {
    TreeNode::node("compound", compound.statements.iter().map(statement).collect())
}

fn statement(statement: &Statement) -> TreeNode {
    match statement {
        Statement::Compound(c) => compound(c),
        Statement::Assignment { target, value } => {
            TreeNode::node("assignment", vec![variable(target), expr(value)])
        }
        Statement::Call(c) => call(c),
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut children = vec![expr(condition), self::statement(then_branch)];
            if let Some(else_branch) = else_branch {
                children.push(self::statement(else_branch));
            }
            TreeNode::node("if", children)
        }
        Statement::While { condition, body } => {
            TreeNode::node("while", vec![expr(condition), self::statement(body)])
        }
        Statement::For {
            variable,
            initial,
            direction,
            limit,
            body,
        } => {
            let direction = match direction {
                ForDirection::To => "to",
                ForDirection::Downto => "downto",
            };
            TreeNode::node(
                format!("for ({}): {}", direction, variable),
                vec![expr(initial), expr(limit), self::statement(body)],
            )
        }
        Statement::Repeat { body, condition } => {
            let mut children: Vec<TreeNode> = body.iter().map(self::statement).collect();
            children.push(expr(condition));
            TreeNode::node("repeat", children)
        }
        Statement::Empty => TreeNode::leaf("empty"),
    }
}

fn call(call: &Call) -> TreeNode {
    let args = call
        .args
        .iter()
        .map(|arg| match arg {
            Argument::Expr(e) => expr(e),
            Argument::Formatted(f) => {
                let mut children = vec![expr(&f.value), expr(&f.width)];
                if let Some(precision) = &f.precision {
                    children.push(expr(precision));
                }
                TreeNode::node("formatted", children)
            }
        })
        .collect();
    TreeNode::node(format!("call: {}", call.name), args)
}

fn variable(variable: &Variable) -> TreeNode {
    match variable {
        Variable::Simple(name) => TreeNode::leaf(format!("variable: {}", name)),
        Variable::Indexed { name, index } => {
            TreeNode::node(format!("indexed: {}", name), vec![expr(index)])
        }
    }
}

fn expr(e: &Expr) -> TreeNode {
    match e {
        Expr::Relational { left, op, right } => {
            TreeNode::node(format!("relational: {}", op.symbol()), vec![expr(left), expr(right)])
        }
        Expr::Additive { left, op, right } => {
            TreeNode::node(format!("additive: {}", op.symbol()), vec![expr(left), expr(right)])
        }
        Expr::Multiplicative { left, op, right } => TreeNode::node(
            format!("multiplicative: {}", op.symbol()),
            vec![expr(left), expr(right)],
        ),
        Expr::Signed { sign, operand } => {
            TreeNode::node(format!("sign: {}", sign.symbol()), vec![expr(operand)])
        }
        Expr::Not(operand) => TreeNode::node("not", vec![expr(operand)]),
        Expr::Variable(v) => variable(v),
        Expr::Call(c) => call(c),
        Expr::Constant(constant) => TreeNode::leaf(match constant {
            UnsignedConstant::Integer(n) => format!("integer: {}", n),
            UnsignedConstant::Real(x) => format!("real: {:?}", x),
            UnsignedConstant::Str(s) => format!("string: {}", s),
            UnsignedConstant::Bool(b) => format!("boolean: {}", b),
            UnsignedConstant::Nil => "nil".to_string(),
        }),
        Expr::Parenthesized(inner) => {
            TreeNode::node(format!("parenthesized: {}", print_expr(inner)), vec![expr(inner)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn parse(source: &str) -> Program {
        let mut lexer = Lexer::new(source);
        let tokens = lexer.scan_tokens();
        assert!(lexer.errors().is_empty(), "Lexer errors: {:?}", lexer.errors());
        Parser::new(tokens).parse().expect("Parse errors")
    }

    #[test]
    fn test_dump_layout() {
        let tree = build(&parse("program T; var x: integer; begin x := 1 + 2 end."));
        assert_eq!(
            tree.dump(),
            "program: T\n\
             \x20 block\n\
             \x20   variables\n\
             \x20     variable: x\n\
             \x20       type identifier: integer\n\
             \x20   compound\n\
             \x20     assignment\n\
             \x20       variable: x\n\
             \x20       additive: +\n\
             \x20         integer: 1\n\
             \x20         integer: 2\n"
        );
    }

    #[test]
    fn test_dot_edges_match_tree() {
        let tree = build(&parse("program T; begin writeln('a \"b\"') end."));
        let graph = tree.to_graph();
        assert_eq!(graph.node_count(), tree.size());
        assert_eq!(graph.edge_count(), tree.size() - 1);
        assert_eq!(graph[NodeIndex::new(0)], "program: T");

        let dot = tree.to_dot();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("program: T"));
        assert!(dot.contains("string: a \\\"b\\\""));
        assert_eq!(dot.matches("->").count(), tree.size() - 1);
    }

    #[test]
    fn test_every_statement_kind_has_a_node() {
        let tree = build(&parse(
            "program s; begin if a then b := 1 else ; while c do ; \
             for i := 1 downto 0 do p(x:2); repeat until d end.",
        ));
        let dump = tree.dump();
        for label in ["if", "while", "for (downto): i", "call: p", "formatted", "repeat", "empty"] {
            assert!(dump.lines().any(|l| l.trim() == label), "missing {}", label);
        }
    }
}
