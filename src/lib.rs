pub mod ast;
pub mod diagnostic;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod vm;

/// Anything that can stop a script between reading its source and
/// finishing its run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lexer::LexError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Compile(#[from] vm::CompileError),
    #[error(transparent)]
    Failure(#[from] runtime::Failure),
    #[error(transparent)]
    Vm(#[from] vm::VmError),
}
