/// Nitrassic — a just-ahead-of-time compiler and runtime for an
/// ECMAScript-flavored language.
///
/// Module layout:
///   - source       — script text providers (string / file)
///   - errors       — spans, compile errors, script errors, diagnostics
///   - diagnostics  — miette reports + stack-trace formatting
///   - lexer        — tokens, regex literals, ASI-sensitive newlines
///   - ast          — expression/statement tree
///   - parser       — precedence-climbing front-end
///   - types        — static type lattice
///   - value        — runtime values, ropes, objects, closure records
///   - coerce       — ECMAScript coercions and comparisons
///   - property     — property slots, attributes, value-location strategies
///   - prototype    — prototype chain, baking, process-wide registry
///   - native       — native class reflection
///   - binder       — overload selection + argument coercion
///   - scope        — two-phase resolver, hoisting, closure capture
///   - infer        — per-expression static types + constant folding
///   - instructions — stack-machine opcode set, procedures
///   - emitter      — tree → procedures (reference protocol, elision)
///   - vm           — interpreter + exception unwinding
///   - engine       — compile → bake → execute lifecycle
///   - intrinsics   — built-in library surfaced through reflection

// ── Front-end ────────────────────────────────────────────────────────────────
pub mod ast;
pub mod lexer;
pub mod parser;

// ── Analysis ─────────────────────────────────────────────────────────────────
pub mod infer;
pub mod scope;
pub mod types;

// ── Runtime model ────────────────────────────────────────────────────────────
pub mod binder;
pub mod coerce;
pub mod native;
pub mod property;
pub mod prototype;
pub mod value;

// ── Back-end ─────────────────────────────────────────────────────────────────
pub mod emitter;
pub mod instructions;
pub mod vm;

// ── Engine & support ─────────────────────────────────────────────────────────
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod intrinsics;
pub mod source;

// ── Re-exports for convenience ───────────────────────────────────────────────
pub use engine::{CompiledScript, Engine, EngineError, EngineOptions};
pub use errors::{CompileError, ErrorKind, ScriptError, Span};
pub use source::{FileScriptSource, ScriptSource, StringScriptSource};
pub use types::StaticType;
pub use value::Value;
