use std::collections::{BTreeSet, HashMap};
use std::fmt::{self, Write as _};
use std::rc::Rc;

use super::dictionary::Dictionary;
use super::tagged::{Tagged, Word};
use crate::runtime::Value;

// ── Opcodes ──────────────────────────────────────────────────────────
//
// One u64 per opcode, followed inline by its operand (at most one).
// Zero is left unassigned so a zeroed stream never decodes.

pub const OP_CONST: u64 = 1; // word: push it
pub const OP_LOOKUP: u64 = 2; // interned name: push global
pub const OP_REGISTER: u64 = 3; // interned name: pop, bind global
pub const OP_LOAD: u64 = 4; // slot: push bp[slot]
pub const OP_STORE: u64 = 5; // slot: pop into bp[slot]
pub const OP_DUP: u64 = 6;
pub const OP_POP: u64 = 7;
pub const OP_SWAP: u64 = 8;
pub const OP_FUNCALL: u64 = 9; // argc
pub const OP_RET: u64 = 10;
pub const OP_GOTO: u64 = 11; // absolute target
pub const OP_JUMP_IF_FALSE: u64 = 12; // absolute target
pub const OP_NEW: u64 = 13; // interned class
pub const OP_GET: u64 = 14; // interned field name
pub const OP_PUT: u64 = 15; // interned field name
pub const OP_PRINT: u64 = 16;

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Const(Word),
    Lookup(Word),
    Register(Word),
    Load(usize),
    Store(usize),
    Dup,
    Pop,
    Swap,
    Funcall(usize),
    Ret,
    Goto(usize),
    JumpIfFalse(usize),
    New(Word),
    Get(Word),
    Put(Word),
    Print,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown opcode {opcode} at {pc}")]
    UnknownOpcode { opcode: u64, pc: usize },
    #[error("{op} at {pc} is missing its operand")]
    MissingOperand { op: &'static str, pc: usize },
    #[error("{op} at {pc} has operand {operand:#x} out of range")]
    BadOperand { op: &'static str, pc: usize, operand: u64 },
    #[error("pc {0} is past the end of the instruction stream")]
    OutOfBounds(usize),
}

impl Instr {
    pub fn opcode(&self) -> u64 {
        match self {
            Instr::Const(_) => OP_CONST,
            Instr::Lookup(_) => OP_LOOKUP,
            Instr::Register(_) => OP_REGISTER,
            Instr::Load(_) => OP_LOAD,
            Instr::Store(_) => OP_STORE,
            Instr::Dup => OP_DUP,
            Instr::Pop => OP_POP,
            Instr::Swap => OP_SWAP,
            Instr::Funcall(_) => OP_FUNCALL,
            Instr::Ret => OP_RET,
            Instr::Goto(_) => OP_GOTO,
            Instr::JumpIfFalse(_) => OP_JUMP_IF_FALSE,
            Instr::New(_) => OP_NEW,
            Instr::Get(_) => OP_GET,
            Instr::Put(_) => OP_PUT,
            Instr::Print => OP_PRINT,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        mnemonic(self.opcode()).unwrap_or("?")
    }

    fn operand(&self) -> Option<u64> {
        match *self {
            Instr::Const(w)
            | Instr::Lookup(w)
            | Instr::Register(w)
            | Instr::New(w)
            | Instr::Get(w)
            | Instr::Put(w) => Some(w.raw()),
            Instr::Load(n)
            | Instr::Store(n)
            | Instr::Funcall(n)
            | Instr::Goto(n)
            | Instr::JumpIfFalse(n) => Some(n as u64),
            Instr::Dup | Instr::Pop | Instr::Swap | Instr::Ret | Instr::Print => None,
        }
    }

    /// Opcode plus inline operands.
    pub fn width(&self) -> usize {
        1 + self.operand().map_or(0, |_| 1)
    }

    pub fn jump_target(&self) -> Option<usize> {
        match *self {
            Instr::Goto(t) | Instr::JumpIfFalse(t) => Some(t),
            _ => None,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u64>) {
        out.push(self.opcode());
        if let Some(operand) = self.operand() {
            out.push(operand);
        }
    }

    pub fn decode(instrs: &[u64], pc: usize) -> Result<Instr, DecodeError> {
        let opcode = *instrs.get(pc).ok_or(DecodeError::OutOfBounds(pc))?;
        let op = mnemonic(opcode).ok_or(DecodeError::UnknownOpcode { opcode, pc })?;
        let operand = || instrs.get(pc + 1).copied().ok_or(DecodeError::MissingOperand { op, pc });
        let word = || operand().map(Word::from_raw);
        let index = || {
            let raw = operand()?;
            usize::try_from(raw).map_err(|_| DecodeError::BadOperand { op, pc, operand: raw })
        };
        Ok(match opcode {
            OP_CONST => Instr::Const(word()?),
            OP_LOOKUP => Instr::Lookup(word()?),
            OP_REGISTER => Instr::Register(word()?),
            OP_LOAD => Instr::Load(index()?),
            OP_STORE => Instr::Store(index()?),
            OP_DUP => Instr::Dup,
            OP_POP => Instr::Pop,
            OP_SWAP => Instr::Swap,
            OP_FUNCALL => Instr::Funcall(index()?),
            OP_RET => Instr::Ret,
            OP_GOTO => Instr::Goto(index()?),
            OP_JUMP_IF_FALSE => Instr::JumpIfFalse(index()?),
            OP_NEW => Instr::New(word()?),
            OP_GET => Instr::Get(word()?),
            OP_PUT => Instr::Put(word()?),
            OP_PRINT => Instr::Print,
            _ => return Err(DecodeError::UnknownOpcode { opcode, pc }),
        })
    }
}

fn mnemonic(opcode: u64) -> Option<&'static str> {
    Some(match opcode {
        OP_CONST => "CONST",
        OP_LOOKUP => "LOOKUP",
        OP_REGISTER => "REGISTER",
        OP_LOAD => "LOAD",
        OP_STORE => "STORE",
        OP_DUP => "DUP",
        OP_POP => "POP",
        OP_SWAP => "SWAP",
        OP_FUNCALL => "FUNCALL",
        OP_RET => "RET",
        OP_GOTO => "GOTO",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_NEW => "NEW",
        OP_GET => "GET",
        OP_PUT => "PUT",
        OP_PRINT => "PRINT",
        _ => return None,
    })
}

// ── Code ─────────────────────────────────────────────────────────────

/// A compiled function body. `parameter_count` includes the implicit
/// receiver in slot 0; `slot_count` covers parameters plus locals.
#[derive(Clone, PartialEq, Eq)]
pub struct Code {
    parameter_count: usize,
    slot_count: usize,
    instrs: Box<[u64]>,
}

impl Code {
    pub fn new(parameter_count: usize, slot_count: usize, instrs: Vec<u64>) -> Self {
        Code {
            parameter_count,
            slot_count: slot_count.max(parameter_count),
            instrs: instrs.into_boxed_slice(),
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn instrs(&self) -> &[u64] {
        &self.instrs
    }

    pub fn fetch(&self, pc: usize) -> Result<Instr, DecodeError> {
        Instr::decode(&self.instrs, pc)
    }

    /// Decode the whole stream front to back.
    pub fn decode_all(&self) -> Result<Vec<(usize, Instr)>, DecodeError> {
        let mut out = Vec::new();
        let mut pc = 0;
        while pc < self.instrs.len() {
            let instr = self.fetch(pc)?;
            out.push((pc, instr));
            pc += instr.width();
        }
        Ok(out)
    }

    /// Listing with jump labels and operands resolved through `dict`.
    /// Nested functions referenced by CONST are listed after their parent.
    pub fn disassemble(&self, name: &str, dict: &Dictionary) -> String {
        let mut out = String::new();
        let mut nested = Vec::new();
        self.write_listing(&mut out, name, dict, &mut nested);
        let mut next = 0;
        while let Some((name, code)) = nested.get(next).cloned() {
            next += 1;
            out.push('\n');
            code.write_listing(&mut out, &name, dict, &mut nested);
        }
        out
    }

    fn write_listing(
        &self,
        out: &mut String,
        name: &str,
        dict: &Dictionary,
        nested: &mut Vec<(String, Rc<Code>)>,
    ) {
        let _ = writeln!(
            out,
            "{} (params: {}, slots: {})",
            name, self.parameter_count, self.slot_count
        );
        let listing = match self.decode_all() {
            Ok(listing) => listing,
            Err(e) => {
                let _ = writeln!(out, "  <{}>", e);
                return;
            }
        };

        let targets: BTreeSet<usize> = listing.iter().filter_map(|(_, i)| i.jump_target()).collect();
        let labels: HashMap<usize, usize> =
            targets.into_iter().enumerate().map(|(n, addr)| (addr, n)).collect();

        for (pc, instr) in &listing {
            let label = labels.get(pc).map(|n| format!("L{}:", n)).unwrap_or_default();
            let operand = match *instr {
                Instr::Const(w)
                | Instr::Lookup(w)
                | Instr::Register(w)
                | Instr::New(w)
                | Instr::Get(w)
                | Instr::Put(w) => describe(w, dict),
                Instr::Load(n) | Instr::Store(n) | Instr::Funcall(n) => n.to_string(),
                Instr::Goto(t) | Instr::JumpIfFalse(t) => labels
                    .get(&t)
                    .map(|n| format!("L{}", n))
                    .unwrap_or_else(|| format!("@{}", t)),
                _ => String::new(),
            };
            let line = format!("  {:4} {:>4}  {:<14}{}", pc, label, instr.mnemonic(), operand);
            out.push_str(line.trim_end());
            out.push('\n');

            if let Instr::Const(w) = instr {
                if let Some((name, code)) = compiled_function(*w, dict) {
                    if !nested.iter().any(|(_, c)| Rc::ptr_eq(c, &code)) {
                        nested.push((name, code));
                    }
                }
            }
        }
    }
}

/// A CONST operand naming a compiled function.
fn compiled_function(word: Word, dict: &Dictionary) -> Option<(String, Rc<Code>)> {
    let Ok(Tagged::Interned(index)) = word.tag() else {
        return None;
    };
    let f = dict.get(index)?.as_object()?;
    Some((f.name().to_string(), Rc::clone(f.code()?)))
}

fn describe(word: Word, dict: &Dictionary) -> String {
    match word.tag() {
        Ok(Tagged::Int(n)) => n.to_string(),
        Ok(Tagged::Bool(b)) => b.to_string(),
        Ok(Tagged::Undefined) => "undefined".to_string(),
        Ok(Tagged::Heap(r)) => format!("@{}", r.offset()),
        Ok(Tagged::Interned(index)) => match dict.get(index) {
            Some(Value::Str(s)) => format!("{:?}", s),
            Some(Value::Shape(shape)) => {
                format!("{} {{{}}}", shape.name(), shape.field_names().join(", "))
            }
            Some(other) => other.to_string(),
            None => format!("{:?}", word),
        },
        Err(_) => format!("{:?}", word),
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Code {{")?;
        writeln!(f, "  parameter_count: {}", self.parameter_count)?;
        writeln!(f, "  slot_count: {}", self.slot_count)?;
        writeln!(f, "  instructions:")?;
        let mut pc = 0;
        while pc < self.instrs.len() {
            match self.fetch(pc) {
                Ok(instr) => {
                    writeln!(f, "    {:4}  {:?}", pc, instr)?;
                    pc += instr.width();
                }
                Err(e) => {
                    writeln!(f, "    {:4}  <{}>", pc, e)?;
                    break;
                }
            }
        }
        write!(f, "}}")
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Append-only instruction emitter with forward-jump patching.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    parameter_count: usize,
    slot_count: usize,
    instrs: Vec<u64>,
}

impl CodeBuilder {
    pub fn new(parameter_count: usize, slot_count: usize) -> Self {
        CodeBuilder { parameter_count, slot_count, instrs: Vec::new() }
    }

    /// Emit one instruction, returning the position of its opcode.
    pub fn emit(&mut self, instr: Instr) -> usize {
        let at = self.instrs.len();
        instr.encode_into(&mut self.instrs);
        at
    }

    /// Position the next instruction will land at.
    pub fn position(&self) -> usize {
        self.instrs.len()
    }

    /// Point the jump emitted at `at` to `target`.
    pub fn patch_jump(&mut self, at: usize, target: usize) {
        debug_assert!(matches!(self.instrs[at], OP_GOTO | OP_JUMP_IF_FALSE));
        self.instrs[at + 1] = target as u64;
    }

    /// Point the jump emitted at `at` to the next instruction.
    pub fn patch_jump_here(&mut self, at: usize) {
        let here = self.position();
        self.patch_jump(at, here);
    }

    pub fn finish(self) -> Code {
        Code::new(self.parameter_count, self.slot_count, self.instrs)
    }
}
