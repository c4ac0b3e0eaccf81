//! A bytecode interpreter for the Lox scripting language: source text is
//! scanned into tokens, compiled in a single Pratt-parsed pass into bytecode
//! chunks, and executed on a stack-based virtual machine.

mod chunk;
mod compiler;
mod debug;
mod error;
mod object;
mod scanner;
mod value;
mod vm;

pub use error::{CompileError, RuntimeError};
pub use vm::{InterpretResult, Vm};

use std::io::Write;

/// Compiles and runs `source` in a fresh VM, writing program output to `out`.
/// Diagnostics go to standard error.
pub fn interpret<W: Write>(source: &str, out: &mut W) -> InterpretResult {
    Vm::new().interpret(source, out)
}
