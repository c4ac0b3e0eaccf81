use std::error;
use std::fmt;

/// Compilation failed. The individual diagnostics were streamed to standard
/// error as they were reported, and are carried here in rendered form
/// (`[line L] Error[ at 'TOKEN' | at end]: MESSAGE`).
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("aborted after {} compile error(s)", .messages.len())]
pub struct CompileError {
    messages: Vec<String>,
}

impl CompileError {
    pub(crate) fn new(messages: Vec<String>) -> Self {
        CompileError { messages }
    }

    pub fn error_count(&self) -> usize {
        self.messages.len()
    }

    /// Rendered diagnostics, in the order they were reported.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

/// A runtime failure plus the call stack at the point of failure, newest
/// frame first. `Display` renders the wire format written to standard error:
///
/// ```text
/// MESSAGE
/// [line L] in NAME
/// ...
/// ```
#[derive(Debug)]
pub struct RuntimeError {
    message: String,
    trace: Vec<TraceFrame>,
}

#[derive(Debug)]
pub(crate) struct TraceFrame {
    line: u32,
    name: String,
}

impl TraceFrame {
    pub(crate) fn new(line: u32, name: String) -> Self {
        TraceFrame { line, name }
    }
}

impl RuntimeError {
    pub(crate) fn new(message: String, trace: Vec<TraceFrame>) -> Self {
        RuntimeError { message, trace }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for frame in &self.trace {
            write!(f, "\n[line {}] in {}", frame.line, frame.name)?;
        }
        Ok(())
    }
}

impl error::Error for RuntimeError {}
