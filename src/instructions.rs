/// Instruction stream — the abstract target the emitter lowers to.
///
/// A stack machine: operands push onto an evaluation stack, locals live in
/// numbered frame slots, captured variables in closure records addressed by
/// (depth, slot). Arithmetic and comparison ops carry a mode so statically
/// typed expressions skip runtime dispatch; the `Dyn` mode is the slow path
/// every operation keeps for untyped operands.
///
/// A compiled body is a `Procedure` with the canonical callable signature
/// `(this, args) -> value`; every call site goes through that gateway.
use crate::native::NativeMethodId;
use once_cell::sync::OnceCell;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId(pub u32);

/// Numeric specialization of an arithmetic instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumMode {
    I32,
    F64,
    Dyn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Operand specialization of a relational comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpMode {
    I32,
    F64,
    Str,
    Dyn,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    // ── Loads & stack shuffling ─────────────────────────────────────────────
    LoadUndefined,
    LoadNull,
    LoadTrue,
    LoadFalse,
    LoadInt(i32),
    /// Index into the procedure's number pool.
    LoadNum(u16),
    /// Index into the procedure's string pool.
    LoadStr(u16),
    Dup,
    Pop,
    /// Swap the top two stack values.
    Swap,

    // ── Variables ───────────────────────────────────────────────────────────
    LoadLocal(u16),
    StoreLocal(u16),
    LoadArg(u16),
    StoreArg(u16),
    LoadThis,
    LoadRecord { depth: u16, slot: u16 },
    StoreRecord { depth: u16, slot: u16 },
    /// Baked slot on the global object.
    LoadGlobal(u16),
    StoreGlobal(u16),
    /// Dynamic by-name lookup: with-chain, then globals; ReferenceError on a
    /// missing name.
    LoadName(u16),
    /// Same lookup but a missing name yields undefined (`typeof`).
    LoadNameOrUndefined(u16),
    StoreName(u16),

    // ── with scopes ─────────────────────────────────────────────────────────
    WithEnter,
    WithExit,
    /// If some with-object has the property: push its value, jump.
    WithLoadOrJump { name: u16, target: u32 },
    /// If some with-object has the property: pop the value, store it, jump.
    WithStoreOrJump { name: u16, target: u32 },

    // ── Arithmetic ──────────────────────────────────────────────────────────
    Add(NumMode),
    Sub(NumMode),
    Mul(NumMode),
    Div(NumMode),
    Mod(NumMode),
    Neg(NumMode),
    /// Rope concatenation of the top two values.
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Ushr,
    BitNot,

    // ── Comparison & logic ──────────────────────────────────────────────────
    Cmp { op: CmpOp, mode: CmpMode },
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Not,
    TypeOf,
    In,
    InstanceOf,

    // ── Coercions ───────────────────────────────────────────────────────────
    ToBoolean,
    ToNumber,
    ToString,
    ToInt32,
    ToUint32,
    ToInt8,
    ToUint8,
    ToInt16,
    ToUint16,
    ToInteger,
    /// Single-character string; longer inputs raise TypeError.
    ToChar,

    // ── Control flow ────────────────────────────────────────────────────────
    Jump(u32),
    /// Pops a value, coerces to boolean, branches.
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    /// Install an exception handler for the region until the matching pop.
    TryPush { catch: u32 },
    TryPop,
    /// Pops the thrown value.
    Throw,
    /// Pops a previously-caught value and rethrows it.
    Rethrow,
    /// Raise a TypeError with a pooled message (unbindable call sites).
    ThrowTypeError(u16),
    Return,

    // ── Calls ───────────────────────────────────────────────────────────────
    /// Stack: this, args… — arguments were already coerced by the emitted
    /// trampoline, the native is invoked directly.
    CallNative { method: NativeMethodId, argc: u8 },
    /// Stack: this, args… — runtime overload dispatch over a pooled group.
    CallGroup { group: u16, argc: u8 },
    /// Stack: callee, this, args…
    CallFunction { argc: u8 },
    /// Stack: obj, args… — property load then call with the object as this.
    CallProp { name: u16, argc: u8 },
    /// Stack: callee, args…
    Construct { argc: u8 },
    /// Materialize a function value for a compiled body, capturing the
    /// current record chain.
    MakeFunction { method: MethodId },
    /// Build the `arguments` object from the current frame.
    MakeArguments,

    // ── Objects & properties ────────────────────────────────────────────────
    NewObject,
    /// Array with the given length, elements null.
    NewArray(u16),
    /// Dynamic property read: [obj] → value.
    GetProp(u16),
    /// Dynamic property write: [obj, value] → ().
    SetProp(u16),
    /// Dynamic property write keeping the value: [obj, value] → value.
    SetPropPush(u16),
    /// [obj, key] → value.
    GetIndex,
    /// [obj, key, value] → ().
    SetIndex,
    /// [obj, key, value] → value.
    SetIndexPush,
    /// Define a data property on an object literal: pops value, keeps obj.
    DefineData(u16),
    /// Define one side of an accessor pair: pops the function, keeps obj.
    DefineAccessor { name: u16, getter: bool },
    /// Store into an array literal: pops value, keeps the array.
    StoreElem(u16),
    /// Shared regex instance for this literal's source position.
    LoadRegex(u16),
    /// [obj] → bool.
    DeleteProp(u16),
    /// [obj, key] → bool.
    DeleteIndex,

    // ── Enumeration ─────────────────────────────────────────────────────────
    /// Pops the object, pushes an enumeration cursor on the frame.
    ForInInit,
    /// Push the next key, or jump past the loop when exhausted.
    ForInNext(u32),
    /// Drop the innermost enumeration cursor.
    ForInEnd,

    Nop,
}

/// A regex literal slot; the compiled instance is created the first time the
/// expression executes and shared across executions.
#[derive(Debug)]
pub struct RegexSlot {
    pub pattern: String,
    pub flags: String,
    pub cell: OnceCell<crate::value::Value>,
}

/// One compiled function body.
#[derive(Debug)]
pub struct Procedure {
    pub method: MethodId,
    pub name: String,
    pub path: String,
    pub strict: bool,
    pub param_count: u16,
    pub local_count: u16,
    /// Non-zero means this activation owns a closure record.
    pub record_slots: u16,
    /// (argument index, record slot) copies run in the prologue.
    pub param_records: Vec<(u16, u16)>,
    pub code: Vec<Instr>,
    pub numbers: Vec<f64>,
    pub strings: Vec<String>,
    /// Overload groups for runtime dispatch: (property name, candidates).
    pub groups: Vec<(String, Vec<NativeMethodId>)>,
    pub regexes: Vec<RegexSlot>,
    /// Sparse (instruction index, line, column) table, ascending.
    pub lines: Vec<(u32, u32, u32)>,
}

impl Procedure {
    /// Source position of the instruction at `ip`.
    pub fn position_at(&self, ip: usize) -> (u32, u32) {
        let mut result = (0, 0);
        for &(start, line, column) in &self.lines {
            if start as usize > ip {
                break;
            }
            result = (line, column);
        }
        result
    }

    /// Human-readable listing, captured when IL analysis is enabled.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} ({} params, {} locals):", self.name, self.param_count, self.local_count);
        for (i, instr) in self.code.iter().enumerate() {
            let _ = writeln!(out, "  {:04}  {:?}", i, instr);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_procedure() -> Procedure {
        Procedure {
            method: MethodId(0),
            name: "probe".into(),
            path: "<string>".into(),
            strict: false,
            param_count: 0,
            local_count: 0,
            record_slots: 0,
            param_records: Vec::new(),
            code: vec![Instr::LoadInt(1), Instr::LoadInt(2), Instr::Add(NumMode::I32), Instr::Return],
            numbers: Vec::new(),
            strings: Vec::new(),
            groups: Vec::new(),
            regexes: Vec::new(),
            lines: vec![(0, 1, 1), (2, 2, 1)],
        }
    }

    #[test]
    fn position_lookup_is_sparse() {
        let proc = probe_procedure();
        assert_eq!(proc.position_at(0), (1, 1));
        assert_eq!(proc.position_at(1), (1, 1));
        assert_eq!(proc.position_at(3), (2, 1));
    }

    #[test]
    fn disassembly_lists_every_instruction() {
        let listing = probe_procedure().disassemble();
        assert!(listing.contains("0000"));
        assert!(listing.contains("Add(I32)"));
        assert!(listing.contains("Return"));
    }
}
