//! Stack-VM instruction definitions and text serialization.
//!
//! The target machine reads one instruction per line: a mnemonic with an
//! optional operand, or a label declaration `name:`. Labels are resolved by
//! the machine itself with a forward scan, so the compiler only has to make
//! sure every label is declared exactly once.
//!
//! Text format (.vm):
//!   - one instruction or label per line
//!   - no blank lines

use std::fmt;
use std::fs;
use std::io;

/// A jump target. Numbered labels come from the context's label counter;
/// callable entries are named after the procedure or function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Else(u32),
    EndIf(u32),
    While(u32),
    EndWhile(u32),
    Loop(u32),
    EndLoop(u32),
    Repeat(u32),
    Function(String),
    Procedure(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Else(n) => write!(f, "else_{}", n),
            Label::EndIf(n) => write!(f, "endif_{}", n),
            Label::While(n) => write!(f, "while_{}", n),
            Label::EndWhile(n) => write!(f, "endwhile_{}", n),
            Label::Loop(n) => write!(f, "loop_{}", n),
            Label::EndLoop(n) => write!(f, "endloop_{}", n),
            Label::Repeat(n) => write!(f, "repeat_{}", n),
            Label::Function(name) => write!(f, "func{}", name),
            Label::Procedure(name) => write!(f, "proc{}", name),
        }
    }
}

/// One line of VM code.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // Stack and storage
    PushI(i64),
    PushF(f64),
    PushS(String),
    PushG(usize),
    PushA(Label),
    StoreG(usize),
    Store(usize),
    LoadN,
    Alloc(i64),

    // Arithmetic and logic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Not,
    Neg,

    // Comparison
    Sup,
    SupEq,
    Inf,
    InfEq,
    Equal,

    // Control flow
    Jump(Label),
    Jz(Label),
    Label(Label),
    Call,
    Return,
    Start,
    Stop,

    // I/O and strings
    Read,
    Atoi,
    StrLen,
    WriteS,
    WriteI,
    WriteF,
    WriteLn,
}

impl Instr {
    /// The label this instruction jumps to or pushes, if any.
    pub fn target(&self) -> Option<&Label> {
        match self {
            Instr::Jump(label) | Instr::Jz(label) | Instr::PushA(label) => Some(label),
            _ => None,
        }
    }

    /// The label this line declares, if it is a label line.
    pub fn declared_label(&self) -> Option<&Label> {
        match self {
            Instr::Label(label) => Some(label),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::PushI(n) => write!(f, "PUSHI {}", n),
            Instr::PushF(x) => write!(f, "PUSHF {:?}", x),
            Instr::PushS(s) => write!(f, "PUSHS \"{}\"", s),
            Instr::PushG(addr) => write!(f, "PUSHG {}", addr),
            Instr::PushA(label) => write!(f, "PUSHA {}", label),
            Instr::StoreG(addr) => write!(f, "STOREG {}", addr),
            Instr::Store(n) => write!(f, "STORE {}", n),
            Instr::LoadN => write!(f, "LOADN"),
            Instr::Alloc(n) => write!(f, "ALLOC {}", n),
            Instr::Add => write!(f, "ADD"),
            Instr::Sub => write!(f, "SUB"),
            Instr::Mul => write!(f, "MUL"),
            Instr::Div => write!(f, "DIV"),
            Instr::Mod => write!(f, "MOD"),
            Instr::And => write!(f, "AND"),
            Instr::Or => write!(f, "OR"),
            Instr::Not => write!(f, "NOT"),
            Instr::Neg => write!(f, "NEG"),
            Instr::Sup => write!(f, "SUP"),
            Instr::SupEq => write!(f, "SUPEQ"),
            Instr::Inf => write!(f, "INF"),
            Instr::InfEq => write!(f, "INFEQ"),
            Instr::Equal => write!(f, "EQUAL"),
            Instr::Jump(label) => write!(f, "JUMP {}", label),
            Instr::Jz(label) => write!(f, "JZ {}", label),
            Instr::Label(label) => write!(f, "{}:", label),
            Instr::Call => write!(f, "CALL"),
            Instr::Return => write!(f, "RETURN"),
            Instr::Start => write!(f, "START"),
            Instr::Stop => write!(f, "STOP"),
            Instr::Read => write!(f, "READ"),
            Instr::Atoi => write!(f, "ATOI"),
            Instr::StrLen => write!(f, "STRLEN"),
            Instr::WriteS => write!(f, "WRITES"),
            Instr::WriteI => write!(f, "WRITEI"),
            Instr::WriteF => write!(f, "WRITEF"),
            Instr::WriteLn => write!(f, "WRITELN"),
        }
    }
}

/// Render a program as newline-joined text, one instruction per line.
pub fn render(code: &[Instr]) -> String {
    code.iter()
        .map(|instr| instr.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write a rendered program to a `.vm` file, with a trailing newline.
pub fn write_program(path: &str, code: &[Instr]) -> io::Result<()> {
    let mut text = render(code);
    text.push('\n');
    fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_names() {
        assert_eq!(Label::Else(3).to_string(), "else_3");
        assert_eq!(Label::EndWhile(0).to_string(), "endwhile_0");
        assert_eq!(Label::Function("Max".into()).to_string(), "funcMax");
        assert_eq!(Label::Procedure("Greet".into()).to_string(), "procGreet");
    }

    #[test]
    fn test_instruction_text() {
        assert_eq!(Instr::PushI(-4).to_string(), "PUSHI -4");
        assert_eq!(Instr::PushF(2.5).to_string(), "PUSHF 2.5");
        assert_eq!(Instr::PushF(1.0).to_string(), "PUSHF 1.0");
        assert_eq!(Instr::PushS("Hello".into()).to_string(), "PUSHS \"Hello\"");
        assert_eq!(Instr::Jz(Label::Else(1)).to_string(), "JZ else_1");
        assert_eq!(Instr::Label(Label::EndIf(1)).to_string(), "endif_1:");
        assert_eq!(Instr::Store(2).to_string(), "STORE 2");
    }

    #[test]
    fn test_render_has_no_blank_lines() {
        let code = vec![Instr::Start, Instr::PushI(1), Instr::StoreG(0), Instr::Stop];
        assert_eq!(render(&code), "START\nPUSHI 1\nSTOREG 0\nSTOP");
        assert_eq!(render(&[]), "");
    }

    #[test]
    fn test_targets() {
        assert_eq!(Instr::Jump(Label::Loop(2)).target(), Some(&Label::Loop(2)));
        assert_eq!(Instr::Add.target(), None);
        assert_eq!(
            Instr::Label(Label::Repeat(0)).declared_label(),
            Some(&Label::Repeat(0))
        );
    }
}
