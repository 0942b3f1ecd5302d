/// Error model — spans, compile-time failures, script-visible runtime errors.
///
/// Two regimes:
///   • `CompileError` aborts compilation and carries (path, line, column).
///   • `ScriptError` flows through script `try/catch/finally` and escapes to
///     the host as a single exception type wrapping the thrown value.
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Byte range into a single script source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Maps byte offsets to 1-based (line, column) pairs.
#[derive(Debug, Clone)]
pub struct LineMap {
    line_starts: Vec<usize>,
}

impl LineMap {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        LineMap { line_starts }
    }

    pub fn locate(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - self.line_starts[line];
        (line as u32 + 1, column as u32 + 1)
    }
}

/// The seven script-visible error names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Error,
    RangeError,
    TypeError,
    SyntaxError,
    UriError,
    EvalError,
    ReferenceError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::UriError => "URIError",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::ReferenceError => "ReferenceError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Compile-time errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("SyntaxError: {message} ({path}:{line}:{column})")]
    Syntax {
        message: String,
        path: String,
        line: u32,
        column: u32,
    },

    #[error("TypeError: {message} ({path}:{line}:{column})")]
    TypeAmbiguity {
        message: String,
        path: String,
        line: u32,
        column: u32,
    },

    #[error("ReferenceError: {message} ({path}:{line}:{column})")]
    Reference {
        message: String,
        path: String,
        line: u32,
        column: u32,
    },

    #[error("internal compiler error: {0}")]
    Internal(String),

    #[error("failed to read script source: {0}")]
    Io(String),
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, path: &str, line: u32, column: u32) -> Self {
        CompileError::Syntax {
            message: message.into(),
            path: path.to_string(),
            line,
            column,
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

/// One host-stack frame captured while an exception unwinds.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub function: String,
    pub path: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}:{}",
            self.function, self.path, self.line, self.column
        )
    }
}

/// What was thrown. A script `throw` carries an arbitrary value; errors the
/// runtime raises itself start as (kind, message) and are materialized into a
/// script error object when they first become script-visible.
#[derive(Debug, Clone)]
pub enum ThrownPayload {
    Abstract { kind: ErrorKind, message: String },
    Value(Value),
}

/// The single host exception type for everything thrown out of script code.
#[derive(Debug, Clone)]
pub struct ScriptError {
    pub payload: ThrownPayload,
    /// Frames from the throw point upward, ending at the `__.main` gateway.
    pub trace: Vec<StackFrame>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ScriptError {
            payload: ThrownPayload::Abstract {
                kind,
                message: message.into(),
            },
            trace: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::new(ErrorKind::TypeError, message)
    }

    pub fn range_error(message: impl Into<String>) -> Self {
        ScriptError::new(ErrorKind::RangeError, message)
    }

    pub fn reference_error(message: impl Into<String>) -> Self {
        ScriptError::new(ErrorKind::ReferenceError, message)
    }

    pub fn thrown(value: Value) -> Self {
        ScriptError {
            payload: ThrownPayload::Value(value),
            trace: Vec::new(),
        }
    }

    /// Called by each unwinding frame, innermost first.
    pub fn push_frame(&mut self, function: &str, path: &str, line: u32, column: u32) {
        self.trace.push(StackFrame {
            function: function.to_string(),
            path: path.to_string(),
            line,
            column,
        });
    }

    /// The trace formatted one frame per line, `function@path:line:column`.
    pub fn stack_string(&self) -> String {
        let mut out = String::new();
        for frame in &self.trace {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&frame.to_string());
            if frame.function == crate::engine::GATEWAY_NAME {
                break;
            }
        }
        out
    }

    /// Error name + message without engine access; thrown non-error values
    /// render through their debug form only at the host boundary.
    pub fn describe(&self) -> String {
        match &self.payload {
            ThrownPayload::Abstract { kind, message } => format!("{}: {}", kind, message),
            ThrownPayload::Value(v) => crate::coerce::describe_thrown(v),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())?;
        for frame in &self.trace {
            write!(f, "\n    {}", frame)?;
        }
        Ok(())
    }
}

impl std::error::Error for ScriptError {}

// ---------------------------------------------------------------------------
// Non-fatal diagnostics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    Warning,
    Info,
}

/// A non-fatal message the engine collects during analysis, e.g. the global
/// type-collapse warning.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub span: Span,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };
        write!(f, "[{}] {}", prefix, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_map_locates() {
        let map = LineMap::new("ab\ncd\nef");
        assert_eq!(map.locate(0), (1, 1));
        assert_eq!(map.locate(1), (1, 2));
        assert_eq!(map.locate(3), (2, 1));
        assert_eq!(map.locate(7), (3, 2));
    }

    #[test]
    fn frame_formatting() {
        let frame = StackFrame {
            function: "outer".into(),
            path: "a.js".into(),
            line: 3,
            column: 9,
        };
        assert_eq!(frame.to_string(), "outer@a.js:3:9");
    }
}
