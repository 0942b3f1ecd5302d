/// Terminal-grade diagnostics — compile errors rendered through miette with
/// source context, and helpers for the script-visible stack trace format.
///
/// OUTPUT EXAMPLE
/// ──────────────
///   × SyntaxError: Expected ';' but found Ident("b")
///    ╭─[demo.js:1:11]
///  1 │ var a = 1 var b = 2
///    ·           ──
///    ╰─
use crate::errors::{CompileError, LineMap, ScriptError, StackFrame};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// A compile error paired with its source text, ready for graphical
/// rendering.
#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
pub struct CompileReport {
    pub message: String,
    #[source_code]
    src: NamedSource,
    #[label("here")]
    span: SourceSpan,
}

impl CompileReport {
    /// Attach source context to a compile error. The error's (line, column)
    /// pair is mapped back to a byte offset through the line map.
    pub fn new(error: &CompileError, path: &str, text: &str) -> CompileReport {
        let (message, line, column) = match error {
            CompileError::Syntax {
                message,
                line,
                column,
                ..
            } => (format!("SyntaxError: {}", message), *line, *column),
            CompileError::TypeAmbiguity {
                message,
                line,
                column,
                ..
            } => (format!("TypeError: {}", message), *line, *column),
            CompileError::Reference {
                message,
                line,
                column,
                ..
            } => (format!("ReferenceError: {}", message), *line, *column),
            other => (other.to_string(), 1, 1),
        };
        let offset = offset_of(text, line, column);
        CompileReport {
            message,
            src: NamedSource::new(path, text.to_string()),
            span: SourceSpan::new(offset.into(), 1usize.into()),
        }
    }

    /// Render with the graphical handler into a plain string.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let handler = miette::GraphicalReportHandler::new();
        let _ = handler.render_report(&mut out, self);
        out
    }
}

fn offset_of(text: &str, line: u32, column: u32) -> usize {
    let map = LineMap::new(text);
    // Walk forward until the located position matches; spans are small so a
    // linear scan over line starts is fine.
    let mut offset = 0;
    for i in 0..text.len() {
        let (l, c) = map.locate(i);
        if l == line && c == column {
            return i;
        }
        if l > line {
            break;
        }
        offset = i;
    }
    offset
}

/// The script-visible stack string: one `function@path:line:column` frame
/// per line, from the throw point up to the `__.main` gateway.
pub fn format_stack(frames: &[StackFrame]) -> String {
    let mut out = String::new();
    for frame in frames {
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

/// One-line summary for a runtime error escaping to the host.
pub fn describe_script_error(error: &ScriptError) -> String {
    let mut out = error.describe();
    let stack = error.stack_string();
    if !stack.is_empty() {
        out.push('\n');
        out.push_str(&stack);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_carries_source_context() {
        let text = "var a = 1 var b = 2";
        let err = CompileError::syntax("Expected ';'", "demo.js", 1, 11);
        let report = CompileReport::new(&err, "demo.js", text);
        let rendered = report.render();
        assert!(rendered.contains("SyntaxError"));
        assert!(rendered.contains("demo.js"));
    }

    #[test]
    fn stack_formatting_stops_at_the_gateway() {
        let frames = vec![
            StackFrame {
                function: "inner".into(),
                path: "a.js".into(),
                line: 4,
                column: 2,
            },
            StackFrame {
                function: crate::engine::GATEWAY_NAME.into(),
                path: "a.js".into(),
                line: 1,
                column: 1,
            },
            StackFrame {
                function: "should-not-appear".into(),
                path: "b.js".into(),
                line: 9,
                column: 9,
            },
        ];
        let stack = format_stack(&frames);
        assert!(stack.contains("inner@a.js:4:2"));
        assert!(stack.contains("__.main@a.js:1:1"));
        assert!(!stack.contains("should-not-appear"));
    }
}
