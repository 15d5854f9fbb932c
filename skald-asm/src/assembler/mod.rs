//! Textual assembler.
//!
//! Turns a line-oriented instruction listing into a linked [`Program`]:
//! commands are resolved against the overloaded definition table, strings
//! are interned into a dense index space, label references are emitted as
//! negated ids and patched to absolute instruction indices after the
//! optimization pass.

mod defs;
mod lexer;
mod optimizer;

use hashbrown::HashMap;

use crate::error::AsmError;
use crate::instruction::{Instruction, Param};
use crate::opcode::Opcode;
use crate::program::{FileMeta, LineMeta, Program};

pub use defs::{command_table, CommandTable, InstructionDef, OperandKind};
pub use lexer::{Lexer, Token};

/// Assembly options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Runs the peephole pass after emission.
    pub optimize: bool,
    /// Sets the program's debug flag.
    pub debug: bool,
    /// Heap size hint stored in the binary, `0` for the runtime default.
    pub heap_size_hint: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimize: true,
            debug: false,
            heap_size_hint: 0,
        }
    }
}

/// A label's id and its resolution state.
#[derive(Debug, Clone)]
pub struct LabelEntry {
    /// Identifier used (negated) in unlinked instruction parameters.
    pub id: i32,
    /// Resolved instruction index, `-1` while undefined.
    pub instruction: i32,
    /// Resolution index before optimization, kept for fusion adjustment.
    pub original_instruction: i32,
}

/// Assembles a listing with default options.
pub fn assemble(source: &str) -> Result<Program, AsmError> {
    assemble_with(source, &Options::default())
}

/// Assembles a listing.
pub fn assemble_with(source: &str, options: &Options) -> Result<Program, AsmError> {
    let mut asm = Assembler::new(source);
    asm.parse()?;

    // A trailing END is always appended, so a program that forgets its own
    // terminator still halts cleanly.
    asm.instructions.push(Instruction::new(Opcode::END));

    if options.optimize {
        optimizer::optimize(optimizer::OptimizeInput {
            instructions: &mut asm.instructions,
            labels: asm.labels.values_mut().collect(),
            line_meta: &mut asm.line_meta,
            file_meta: &mut asm.file_meta,
        });
    }

    asm.link()?;

    Ok(Program {
        debug: options.debug,
        heap_size_hint: options.heap_size_hint,
        line_meta: asm.line_meta,
        file_meta: asm.file_meta,
        strings: asm.strings,
        instructions: asm.instructions,
    })
}

struct Assembler<'a> {
    lexer: Lexer<'a>,
    commands: CommandTable,
    instructions: Vec<Instruction>,
    strings: Vec<String>,
    string_indices: HashMap<String, i32>,
    labels: HashMap<String, LabelEntry>,
    next_label_id: i32,
    line_meta: Vec<LineMeta>,
    file_meta: Vec<FileMeta>,
}

/// A parsed operand before binding against a definition slot.
enum Operand {
    Reg(usize),
    Num(f64),
    Str(i32),
    Lbl(i32),
}

impl Operand {
    fn matches(&self, kind: OperandKind) -> bool {
        match self {
            Operand::Reg(_) => kind == OperandKind::Reg,
            Operand::Num(_) => kind == OperandKind::Num || kind == OperandKind::Int,
            Operand::Str(_) => kind == OperandKind::Str,
            Operand::Lbl(_) => kind == OperandKind::Lbl,
        }
    }

    fn bind(&self, kind: OperandKind) -> Param {
        match (self, kind) {
            (Operand::Reg(r), _) => Param::int(*r as i32),
            (Operand::Num(n), OperandKind::Int) => Param::int(*n as i32),
            (Operand::Num(n), _) => Param::num(*n),
            (Operand::Str(s), _) => Param::int(*s),
            // References carry the negated id until linking.
            (Operand::Lbl(id), _) => Param::int(-id),
        }
    }
}

fn slot_matches(operand: Option<&Operand>, kind: OperandKind) -> bool {
    match operand {
        Some(op) => op.matches(kind),
        None => kind == OperandKind::None,
    }
}

impl<'a> Assembler<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            lexer: Lexer::new(source),
            commands: command_table(),
            instructions: Vec::new(),
            strings: Vec::new(),
            string_indices: HashMap::new(),
            labels: HashMap::new(),
            next_label_id: 1,
            line_meta: Vec::new(),
            file_meta: Vec::new(),
        }
    }

    fn parse(&mut self) -> Result<(), AsmError> {
        loop {
            match self.lexer.next(false)? {
                Token::Eof => return Ok(()),
                Token::Eol => {}
                Token::LineDirective(line) => self.add_line_meta(line),
                Token::FileDirective(filename) => self.file_meta.push(FileMeta {
                    instruction_index: self.instructions.len() as i32,
                    filename,
                }),
                Token::LabelDef(name) => {
                    let index = self.instructions.len() as i32;
                    let label = self.label_entry(&name);
                    label.instruction = index;
                    label.original_instruction = index;
                }
                Token::Ident(name) => self.statement(name)?,
                _ => {
                    return Err(AsmError::ExpectedCommand {
                        line: self.lexer.line(),
                    })
                }
            }
        }
    }

    fn statement(&mut self, name: String) -> Result<(), AsmError> {
        let line = self.lexer.line();
        let Some(defs) = self.commands.get(name.as_str()).cloned() else {
            return Err(AsmError::UnknownCommand { line, name });
        };

        let mut operands: Vec<Operand> = Vec::with_capacity(2);
        loop {
            if operands.len() == 2 {
                match self.lexer.next(true)? {
                    Token::Eol | Token::Eof => break,
                    _ => {
                        return Err(AsmError::InvalidParameters {
                            line,
                            name: name.clone(),
                        })
                    }
                }
            }
            match self.lexer.next(true)? {
                Token::Eol | Token::Eof => break,
                Token::Register(r) => operands.push(Operand::Reg(r)),
                Token::Number(n) => operands.push(Operand::Num(n)),
                Token::Str(s) => {
                    let index = self.intern(s);
                    operands.push(Operand::Str(index));
                }
                Token::Ident(l) | Token::LabelDef(l) => {
                    let id = self.label_entry(&l).id;
                    operands.push(Operand::Lbl(id));
                }
                _ => {
                    return Err(AsmError::InvalidParameters {
                        line,
                        name: name.clone(),
                    })
                }
            }
        }

        let def = defs
            .iter()
            .find(|def| {
                slot_matches(operands.first(), def.lparam)
                    && slot_matches(operands.get(1), def.rparam)
            })
            .ok_or(AsmError::InvalidParameters { line, name })?;

        let lparam = operands
            .first()
            .map(|op| op.bind(def.lparam))
            .unwrap_or(Param::NONE);
        let mut rparam = operands
            .get(1)
            .map(|op| op.bind(def.rparam))
            .unwrap_or(Param::NONE);

        // A call site's right cell seeds the locals capacity inline cache;
        // RET writes the observed capacity back into it.
        if def.opcode == Opcode::CALL_R {
            rparam = Param::int(1);
        }

        self.instructions
            .push(Instruction::binary(def.opcode, lparam, rparam));
        Ok(())
    }

    fn intern(&mut self, text: String) -> i32 {
        if let Some(&index) = self.string_indices.get(&text) {
            return index;
        }
        let index = self.strings.len() as i32;
        self.strings.push(text.clone());
        self.string_indices.insert(text, index);
        index
    }

    fn label_entry(&mut self, name: &str) -> &mut LabelEntry {
        let next_id = &mut self.next_label_id;
        self.labels.entry_ref(name).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            LabelEntry {
                id,
                instruction: -1,
                original_instruction: -1,
            }
        })
    }

    fn add_line_meta(&mut self, line: i32) {
        let index = self.instructions.len() as i32;
        match self.line_meta.last_mut() {
            Some(last) if last.instruction_index == index => last.line = line,
            _ => self.line_meta.push(LineMeta {
                instruction_index: index,
                line,
            }),
        }
    }

    /// Replaces negated label ids with resolved instruction indices.
    fn link(&mut self) -> Result<(), AsmError> {
        let mut resolved: HashMap<i32, i32> = HashMap::new();
        for (name, label) in &self.labels {
            if label.instruction < 0 {
                return Err(AsmError::MissingLabel(name.clone()));
            }
            resolved.insert(label.id, label.instruction);
        }

        for instruction in &mut self.instructions {
            match instruction.opcode {
                Opcode::JMP_L
                | Opcode::JMPT_L
                | Opcode::JMPF_L
                | Opcode::MSET_L
                | Opcode::PUSH_L => {
                    let id = instruction.lparam.as_int();
                    if id < 0 {
                        if let Some(&target) = resolved.get(&-id) {
                            instruction.lparam = Param::int(target);
                        }
                    }
                }
                Opcode::MOVE_R_L | Opcode::JMPET_R_L | Opcode::JMPEF_R_L => {
                    let id = instruction.rparam.as_int();
                    if id < 0 {
                        if let Some(&target) = resolved.get(&-id) {
                            instruction.rparam = Param::int(target);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
