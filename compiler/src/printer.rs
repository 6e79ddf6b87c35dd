//! Pretty-printer: renders an AST back to Pascal source.
//!
//! The output re-parses to an equal tree: parentheses, signs and empty
//! statements are all explicit nodes, so printing never has to invent or
//! drop any of them. Layout is two spaces per nesting level.

use crate::ast::*;

/// Render a whole program.
pub fn print(program: &Program) -> String {
    let mut out = format!("program {};\n", program.heading.name);
    out.push_str(&block(&program.block, 0));
    out.push_str(".\n");
    out
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

fn block(block: &Block, depth: usize) -> String {
    let mut out = String::new();
    for declaration in &block.declarations {
        out.push_str(&self::declaration(declaration, depth));
    }
    out.push_str(&indent(depth));
    out.push_str(&compound(&block.body, depth));
    out
}

// ── Declarations ────────────────────────────────────────────────────

fn declaration(declaration: &Declaration, depth: usize) -> String {
    let pad = indent(depth);
    let inner = indent(depth + 1);
    let mut out = String::new();
    match declaration {
        Declaration::Constants(block) => {
            out.push_str(&format!("{}const\n", pad));
            for def in &block.definitions {
                out.push_str(&format!("{}{} = {};\n", inner, def.name, constant(&def.value)));
            }
        }
        Declaration::Types(block) => {
            out.push_str(&format!("{}type\n", pad));
            for def in &block.definitions {
                out.push_str(&format!("{}{} = {};\n", inner, def.name, type_(&def.ty)));
            }
        }
        Declaration::Variables(block) => {
            out.push_str(&format!("{}var\n", pad));
            for decl in &block.declarations {
                out.push_str(&format!("{}{}: {};\n", inner, decl.names.join(", "), type_(&decl.ty)));
            }
        }
        Declaration::Procedure(procedure) => {
            out.push_str(&format!(
                "{}procedure {}{};\n",
                pad,
                procedure.name,
                parameters(&procedure.params)
            ));
            out.push_str(&self::block(&procedure.block, depth + 1));
            out.push_str(";\n");
        }
        Declaration::Function(function) => {
            out.push_str(&format!(
                "{}function {}{}: {};\n",
                pad,
                function.name,
                parameters(&function.params),
                function.return_type.name
            ));
            out.push_str(&self::block(&function.block, depth + 1));
            out.push_str(";\n");
        }
    }
    out
}

fn parameters(sections: &[FormalParameterSection]) -> String {
    if sections.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = sections
        .iter()
        .map(|section| {
            let mode = match section.mode {
                ParameterMode::Value => "",
                ParameterMode::Var => "var ",
                ParameterMode::Function => "function ",
                ParameterMode::Procedure => "procedure ",
            };
            format!("{}{}: {}", mode, section.group.names.join(", "), section.group.ty.name)
        })
        .collect();
    format!("({})", rendered.join("; "))
}

fn constant(constant: &Constant) -> String {
    let sign = |sign: &Option<Sign>| sign.map_or("", Sign::symbol);
    match constant {
        Constant::Number { sign: s, value } => format!("{}{}", sign(s), number(value)),
        Constant::Identifier { sign: s, name } => format!("{}{}", sign(s), name),
        Constant::Str(s) => quote(s),
        Constant::Chr(code) => format!("chr({})", code),
    }
}

fn number(value: &UnsignedNumber) -> String {
    match value {
        UnsignedNumber::Integer(n) => n.to_string(),
        UnsignedNumber::Real(x) => format!("{:?}", x),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// ── Types ───────────────────────────────────────────────────────────

fn type_(ty: &Type) -> String {
    match ty {
        Type::Scalar(names) => format!("({})", names.join(", ")),
        Type::Subrange(range) => subrange(range),
        Type::Identifier(ident) => ident.name.clone(),
        Type::String(string) => format!("string[{}]", string.length),
        Type::Array(array) => format!("array[{}] of {}", subrange(&array.index), array.element.name),
        Type::Record(record) => {
            let fields = field_list(&record.fields);
            if fields.is_empty() {
                "record end".to_string()
            } else {
                format!("record {} end", fields)
            }
        }
        Type::Set(set) => format!("set of {}", set.base.name),
    }
}

fn subrange(range: &Subrange) -> String {
    format!("{}..{}", range.lower, range.upper)
}

fn field_list(fields: &FieldList) -> String {
    let mut parts: Vec<String> = fields
        .fixed
        .iter()
        .map(|section| format!("{}: {}", section.names.join(", "), type_(&section.ty)))
        .collect();
    if let Some(variant) = &fields.variant {
        let tag = match &variant.tag.name {
            Some(name) => format!("{}: {}", name, variant.tag.ty.name),
            None => variant.tag.ty.name.clone(),
        };
        let variants: Vec<String> = variant
            .variants
            .iter()
            .map(|v| {
                let labels: Vec<String> = v.labels.iter().map(constant).collect();
                format!("{}: ({})", labels.join(", "), field_list(&v.fields))
            })
            .collect();
        parts.push(format!("case {} of {}", tag, variants.join("; ")));
    }
    parts.join("; ")
}

// ── Statements ──────────────────────────────────────────────────────

fn compound(compound: &CompoundStatement, depth: usize) -> String {
    statement_list("begin", &compound.statements, "end", depth)
}

/// `open`, one statement per line separated by `;`, then `close` back at
/// `depth`.
fn statement_list(open: &str, statements: &[Statement], close: &str, depth: usize) -> String {
    let inner = indent(depth + 1);
    let lines: Vec<String> = statements
        .iter()
        .map(|s| format!("{}{}", inner, statement(s, depth + 1)))
        .collect();
    format!("{}\n{}\n{}{}", open, lines.join(";\n"), indent(depth), close)
}

fn statement(statement: &Statement, depth: usize) -> String {
    match statement {
        Statement::Compound(c) => compound(c, depth),
        Statement::Assignment { target, value } => {
            format!("{} := {}", variable(target), print_expr(value))
        }
        Statement::Call(call) => self::call(call),
        Statement::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut out = format!(
                "if {} then {}",
                print_expr(condition),
                self::statement(then_branch, depth)
            );
            if let Some(else_branch) = else_branch {
                out.push_str(&format!(" else {}", self::statement(else_branch, depth)));
            }
            out
        }
        Statement::While { condition, body } => {
            format!("while {} do {}", print_expr(condition), self::statement(body, depth))
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
            format!(
                "for {} := {} {} {} do {}",
                variable,
                print_expr(initial),
                direction,
                print_expr(limit),
                self::statement(body, depth)
            )
        }
        Statement::Repeat { body, condition } => {
            let until = format!("until {}", print_expr(condition));
            statement_list("repeat", body, &until, depth)
        }
        Statement::Empty => String::new(),
    }
}

fn call(call: &Call) -> String {
    if call.args.is_empty() {
        return call.name.clone();
    }
    let args: Vec<String> = call.args.iter().map(argument).collect();
    format!("{}({})", call.name, args.join(", "))
}

fn argument(arg: &Argument) -> String {
    match arg {
        Argument::Expr(expr) => print_expr(expr),
        Argument::Formatted(f) => {
            let mut out = format!("{}:{}", print_expr(&f.value), print_expr(&f.width));
            if let Some(precision) = &f.precision {
                out.push_str(&format!(":{}", print_expr(precision)));
            }
            out
        }
    }
}

fn variable(variable: &Variable) -> String {
    match variable {
        Variable::Simple(name) => name.clone(),
        Variable::Indexed { name, index } => format!("{}[{}]", name, print_expr(index)),
    }
}

// ── Expressions ─────────────────────────────────────────────────────

/// Render one expression.
pub fn print_expr(expr: &Expr) -> String {
    match expr {
        Expr::Relational { left, op, right } => {
            format!("{} {} {}", print_expr(left), op.symbol(), print_expr(right))
        }
        Expr::Additive { left, op, right } => {
            format!("{} {} {}", print_expr(left), op.symbol(), print_expr(right))
        }
        Expr::Multiplicative { left, op, right } => {
            format!("{} {} {}", print_expr(left), op.symbol(), print_expr(right))
        }
        Expr::Signed { sign, operand } => format!("{}{}", sign.symbol(), print_expr(operand)),
        Expr::Not(operand) => format!("not {}", print_expr(operand)),
        Expr::Variable(v) => variable(v),
        Expr::Call(c) => call(c),
        Expr::Constant(constant) => match constant {
            UnsignedConstant::Integer(n) => n.to_string(),
            UnsignedConstant::Real(x) => format!("{:?}", x),
            UnsignedConstant::Str(s) => quote(s),
            UnsignedConstant::Bool(b) => b.to_string(),
            UnsignedConstant::Nil => "nil".to_string(),
        },
        Expr::Parenthesized(inner) => format!("({})", print_expr(inner)),
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

    fn assert_round_trip(source: &str) {
        let original = parse(source);
        let printed = print(&original);
        assert_eq!(parse(&printed), original, "printed:\n{}", printed);
    }

    #[test]
    fn test_print_layout() {
        let program = parse("program T; var x: integer; begin x := 1 + 2; writeln(x) end.");
        assert_eq!(
            print(&program),
            "program T;\nvar\n  x: integer;\nbegin\n  x := 1 + 2;\n  writeln(x)\nend.\n"
        );
    }

    #[test]
    fn test_print_expressions() {
        let program = parse("program e; begin x := -(a + b) * c div 2 <> 'it''s' end.");
        let Statement::Assignment { value, .. } = &program.block.body.statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(print_expr(value), "-(a + b) * c div 2 <> 'it''s'");
    }

    #[test]
    fn test_round_trip_statements() {
        assert_round_trip(
            "program s;
             var i, n: integer; done: boolean;
             begin
               readln(n);
               for i := n downto 1 do
                 if i mod 2 = 0 then writeln(i:4) else ;
               while not done do begin done := true; end;
               repeat n := n - 1; until n <= 0;
               writeln('total: ', n / 2.5e-3:8:2)
             end.",
        );
    }

    #[test]
    fn test_round_trip_declarations() {
        assert_round_trip(
            "program d;
             const max = 10; neg = -max; s = 'x'; bell = chr(7); r = 1.5;
             type color = (red, green); small = -2..5; name = string[20];
                  grid = array[0..9] of real; flags = set of char;
                  shape = record x, y: real; case kind: integer of 1: (r: real); 2, 3: () end;
                  empty = record end;
             var a: grid;
             procedure P(var x: integer; y: real);
               var t: integer;
             begin t := x end;
             function F: integer;
               function G(n: integer): integer;
               begin G := n end;
             begin F := G(1) end;
             begin P(a[1], F) end.",
        );
    }
}
