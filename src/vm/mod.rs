//! Tagged-word stack machine.
//!
//! Values are packed into single `u64` words (see [`tagged`]); a function
//! body is a flat stream of opcodes with inline operands (see [`code`]);
//! one fixed array holds every frame's slots, linkage and operands (see
//! [`stack`]); objects created by `NEW` live in a bump-allocated [`heap`].

pub mod code;
pub mod compiler;
pub mod dictionary;
pub mod engine;
pub mod heap;
pub mod stack;
pub mod tagged;

use std::fmt;

pub use code::{Code, CodeBuilder, Instr};
pub use compiler::{CompileError, compile_function, compile_script};
pub use dictionary::{DictIndex, Dictionary};
pub use engine::{Engine, EngineConfig, Step};
pub use heap::{Heap, ObjRef};
pub use tagged::{InvalidWord, Tagged, Word};

use crate::ast::Script;
use crate::runtime::{Env, Failure, Value};

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Language-level failure; aborts the run.
    #[error(transparent)]
    Failure(#[from] Failure),
    #[error(transparent)]
    Fatal(#[from] Fatal),
}

/// An unrecoverable engine condition, with the functions that were active
/// when it happened.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}")]
pub struct Fatal {
    pub kind: FatalKind,
    pub trace: StackTrace,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FatalKind {
    #[error("heap exhausted: {requested} words requested, {available} available")]
    HeapExhausted { requested: usize, available: usize },
    #[error("stack overflow: capacity of {capacity} words exceeded")]
    StackOverflow { capacity: usize },
    #[error(transparent)]
    InvalidWord(InvalidWord),
    #[error("unknown opcode {opcode} at {pc}")]
    UnknownOpcode { opcode: u64, pc: usize },
    #[error("corrupt instruction stream: {0}")]
    CorruptOperand(String),
}

/// Function names, innermost frame first, ending with the top-level one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackTrace(pub Vec<String>);

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "\tat {}", name)?;
        }
        Ok(())
    }
}

/// Compile `script` and run it on a fresh engine against `globals`.
pub fn run_script(script: &Script, globals: &Env, config: EngineConfig) -> Result<Value, crate::Error> {
    let mut dict = Dictionary::new();
    let main = compile_script(script, &mut dict)?;
    let mut engine = Engine::new(config, &mut dict, globals);
    Ok(engine.run(&main)?)
}
