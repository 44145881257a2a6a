// Runtime error model.
//
// `ErrorKind` classifies what went wrong; `RuntimeError` pairs a rendered
// message with the call-stack trace captured at the point of failure, in the
// "[line N] in name()" shape the interpreter reports on stderr.

use std::fmt;

#[derive(Debug, Clone)]
pub enum ErrorKind {
    TypeError(String),
    UndefinedVariable(String),
    InvalidCall(String),
    ArithmeticError(String),
    StackOverflow,
    InternalError(String),
}

impl ErrorKind {
    pub fn message(&self) -> String {
        match self {
            ErrorKind::TypeError(m)
            | ErrorKind::InvalidCall(m)
            | ErrorKind::ArithmeticError(m)
            | ErrorKind::InternalError(m) => m.clone(),
            ErrorKind::UndefinedVariable(name) => format!("Undefined variable '{name}'."),
            ErrorKind::StackOverflow => "Stack overflow.".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    /// (frame display name, line) pairs, innermost frame first.
    pub trace: Vec<(String, u32)>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for (i, (name, line)) in self.trace.iter().enumerate() {
            if i + 1 == self.trace.len() {
                write!(f, "[line {line}] in {name}")?;
            } else {
                writeln!(f, "[line {line}] in {name}")?;
            }
        }
        Ok(())
    }
}
