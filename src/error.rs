use crate::util::Position;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone)]
/// An error raised while completing datatypes or lowering the AST to
/// bytecode, tagged with the source position of the offending node when one
/// is known.
pub struct CompilationError {
    pub position: Option<Position>,
    pub message: String,
}

impl CompilationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            position: None,
            message: message.into(),
        }
    }
    pub fn at(position: Position, message: impl Into<String>) -> Self {
        Self {
            position: Some(position),
            message: message.into(),
        }
    }
}

impl Display for CompilationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.position {
            Some(position) => write!(f, "CompilationError: ({}) {}", position, self.message),
            None => write!(f, "CompilationError: {}", self.message),
        }
    }
}

#[derive(Debug, Clone)]
/// An error raised by the virtual machine while executing a program.
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuntimeError: {}", self.message)
    }
}

#[derive(Debug)]
/// An error raised when source text does not parse; carries the rendered
/// hierarchical error tree.
pub struct ParseFailure {
    pub eof: bool,
    pub rendered: String,
}

impl Display for ParseFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SyntaxError:")?;
        write!(f, "{}", self.rendered)
    }
}
