/// Emitter — lowers the analyzed tree to stack-machine procedures.
///
/// Reference expressions (names, member accesses) go through one protocol:
/// `emit_get` pushes the value, `emit_set` runs a thunk that pushes the
/// right-hand side (duplicating it only when the result is in use and the
/// storage dups rather than re-pushes), `emit_delete` pushes the delete
/// result. Inference results feed back through the analysis tables.
///
/// `OptimizationInfo.root_expression` marks the outermost expression of the
/// current statement — the one whose value nobody consumes. Operator
/// emission compares itself against it and skips dead pushes; the list
/// expression re-roots each non-tail element, ternary and the logical
/// operators propagate the root into their branches.
///
/// `finally` blocks are duplicated on every exit path (fallthrough, return,
/// break/continue) and guarded by a rethrow handler for the exception path,
/// so the VM only ever deals with plain catch targets.
use crate::ast::{
    BinaryOp, Expr, ExprKind, ForInTarget, ForInit, FuncId, FunctionLiteral, IncDecOp, Literal,
    LogicalOp, NodeId, ObjectEntryKind, Stmt, StmtKind, UnaryOp,
};
use crate::binder::{self, StaticBinding};
use crate::coerce;
use crate::engine::GATEWAY_NAME;
use crate::engine::Engine;
use crate::errors::{CompileError, LineMap, Span};
use crate::instructions::{CmpMode, CmpOp, Instr, MethodId, NumMode, Procedure, RegexSlot};
use crate::native::{self, NativeMethodId, ParamKind};
use crate::property::PropertyStore;
use crate::prototype::PROTOTYPES;
use crate::scope::{Analysis, Binding, VarStorage};
use crate::types::StaticType;
use crate::value::Value;
use once_cell::sync::OnceCell;
use std::collections::HashMap;

/// Per-compilation context threaded through emission.
pub struct OptimizationInfo {
    pub path: String,
    pub strict: bool,
    pub function_name: String,
    /// The expression whose value the enclosing statement discards.
    pub root_expression: Option<NodeId>,
}

struct EmitCtx<'a> {
    engine: &'a Engine,
    analysis: &'a Analysis,
    line_map: &'a LineMap,
    path: String,
    /// MethodId base: function N compiles to method base + N.
    base: u32,
    procedures: Vec<Option<Procedure>>,
}

/// Compile every function body of an analyzed program. Function `N` lands at
/// `MethodId(base + N)`; index 0 is the `__.main` gateway.
pub fn emit_program(
    engine: &Engine,
    analysis: &Analysis,
    program: &[Stmt],
    path: &str,
    line_map: &LineMap,
    base: u32,
) -> Result<Vec<Procedure>, CompileError> {
    let mut ctx = EmitCtx {
        engine,
        analysis,
        line_map,
        path: path.to_string(),
        base,
        procedures: (0..analysis.functions.len()).map(|_| None).collect(),
    };
    emit_function(&mut ctx, 0, program)?;
    let mut out = Vec::with_capacity(ctx.procedures.len());
    for (fid, slot) in ctx.procedures.into_iter().enumerate() {
        match slot {
            Some(proc) => out.push(proc),
            None => {
                // A literal inside a statically-elided branch was resolved
                // but never materializes; an inert body keeps ids aligned.
                let info = &analysis.functions[fid];
                out.push(Procedure {
                    method: MethodId(base + fid as u32),
                    name: info.name.clone(),
                    path: path.to_string(),
                    strict: info.strict,
                    param_count: info.params.len() as u16,
                    local_count: info.local_count,
                    record_slots: 0,
                    param_records: Vec::new(),
                    code: vec![Instr::LoadUndefined, Instr::Return],
                    numbers: Vec::new(),
                    strings: Vec::new(),
                    groups: Vec::new(),
                    regexes: Vec::new(),
                    lines: Vec::new(),
                });
            }
        }
    }
    Ok(out)
}

struct LoopCtx {
    label: Option<String>,
    is_loop: bool,
    break_jumps: Vec<usize>,
    continue_jumps: Vec<usize>,
    finally_depth: usize,
    try_depth: u16,
    iter_depth: u16,
    with_depth: u16,
}

struct FnEmitter<'c, 'a> {
    ctx: &'c mut EmitCtx<'a>,
    fid: FuncId,
    info: OptimizationInfo,
    code: Vec<Instr>,
    numbers: Vec<f64>,
    strings: Vec<String>,
    string_idx: HashMap<String, u16>,
    groups: Vec<(String, Vec<NativeMethodId>)>,
    regexes: Vec<RegexSlot>,
    /// Pooled temporaries above the named locals, LIFO.
    temp_top: u16,
    temp_max: u16,
    loop_stack: Vec<LoopCtx>,
    /// Active finally bodies, outermost first; duplicated on early exits.
    finally_stack: Vec<Vec<Stmt>>,
    /// Exception handlers currently installed, popped on early exits.
    try_depth: u16,
    iter_depth: u16,
    with_depth: u16,
    pending_label: Option<String>,
    lines: Vec<(u32, u32, u32)>,
}

fn emit_function(ctx: &mut EmitCtx, fid: FuncId, body: &[Stmt]) -> Result<(), CompileError> {
    let (name, strict, local_count) = {
        let info = &ctx.analysis.functions[fid as usize];
        let name = if fid == 0 {
            GATEWAY_NAME.to_string()
        } else {
            info.name.clone()
        };
        (name, info.strict, info.local_count)
    };
    let path = ctx.path.clone();
    let mut emitter = FnEmitter {
        fid,
        info: OptimizationInfo {
            path,
            strict,
            function_name: name.clone(),
            root_expression: None,
        },
        code: Vec::new(),
        numbers: Vec::new(),
        strings: Vec::new(),
        string_idx: HashMap::new(),
        groups: Vec::new(),
        regexes: Vec::new(),
        temp_top: local_count,
        temp_max: local_count,
        loop_stack: Vec::new(),
        finally_stack: Vec::new(),
        try_depth: 0,
        iter_depth: 0,
        with_depth: 0,
        pending_label: None,
        lines: Vec::new(),
        ctx,
    };
    emitter.emit_prologue(body)?;
    for stmt in body {
        emitter.emit_stmt(stmt)?;
    }
    emitter.emit(Instr::LoadUndefined);
    emitter.emit(Instr::Return);

    let fn_info = &emitter.ctx.analysis.functions[fid as usize];
    let proc = Procedure {
        method: MethodId(emitter.ctx.base + fid),
        name,
        path: emitter.ctx.path.clone(),
        strict: fn_info.strict,
        param_count: fn_info.params.len() as u16,
        local_count: emitter.temp_max,
        record_slots: fn_info.record_slots,
        param_records: fn_info.param_records.clone(),
        code: emitter.code,
        numbers: emitter.numbers,
        strings: emitter.strings,
        groups: emitter.groups,
        regexes: emitter.regexes,
        lines: emitter.lines,
    };
    emitter.ctx.procedures[fid as usize] = Some(proc);
    Ok(())
}

impl<'c, 'a> FnEmitter<'c, 'a> {
    // -----------------------------------------------------------------------
    // Infrastructure
    // -----------------------------------------------------------------------

    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    /// Emit a jump with a placeholder target, returning its index.
    fn emit_jump(&mut self, make: fn(u32) -> Instr) -> usize {
        self.emit(make(u32::MAX))
    }

    fn patch(&mut self, index: usize, target: u32) {
        let instr = &mut self.code[index];
        match instr {
            Instr::Jump(t)
            | Instr::JumpIfFalse(t)
            | Instr::JumpIfTrue(t)
            | Instr::TryPush { catch: t }
            | Instr::ForInNext(t)
            | Instr::WithLoadOrJump { target: t, .. }
            | Instr::WithStoreOrJump { target: t, .. } => *t = target,
            other => panic!("patched a non-jump instruction {:?}", other),
        }
    }

    fn patch_here(&mut self, index: usize) {
        let target = self.here();
        self.patch(index, target);
    }

    fn intern(&mut self, s: &str) -> u16 {
        if let Some(&i) = self.string_idx.get(s) {
            return i;
        }
        let i = self.strings.len() as u16;
        self.strings.push(s.to_string());
        self.string_idx.insert(s.to_string(), i);
        i
    }

    fn number_const(&mut self, n: f64) -> u16 {
        if let Some(i) = self.numbers.iter().position(|&x| x.to_bits() == n.to_bits()) {
            return i as u16;
        }
        self.numbers.push(n);
        (self.numbers.len() - 1) as u16
    }

    fn alloc_temp(&mut self) -> u16 {
        let slot = self.temp_top;
        self.temp_top += 1;
        if self.temp_top > self.temp_max {
            self.temp_max = self.temp_top;
        }
        slot
    }

    fn free_temp(&mut self, slot: u16) {
        if slot + 1 == self.temp_top {
            self.temp_top = slot;
        }
    }

    fn mark_line(&mut self, span: Span) {
        let (line, column) = self.ctx.line_map.locate(span.start);
        let ip = self.here();
        if let Some(&(_, last_line, last_col)) = self.lines.last() {
            if last_line == line && last_col == column {
                return;
            }
        }
        self.lines.push((ip, line, column));
    }

    fn expr_type(&self, expr: &Expr) -> StaticType {
        self.ctx
            .analysis
            .types
            .get(&expr.id)
            .copied()
            .unwrap_or(StaticType::Any)
    }

    fn folded(&self, expr: &Expr) -> Option<Value> {
        self.ctx.analysis.constants.get(&expr.id).cloned()
    }

    fn value_in_use(&self, expr: &Expr) -> bool {
        self.info.root_expression != Some(expr.id)
    }

    fn syntax_error(&self, message: impl Into<String>, span: Span) -> CompileError {
        let (line, column) = self.ctx.line_map.locate(span.start);
        CompileError::syntax(message, &self.info.path, line, column)
    }

    // -----------------------------------------------------------------------
    // Prologue
    // -----------------------------------------------------------------------

    /// Runs before any statement: captured parameters migrate into the
    /// record, `arguments` materializes if reachable, and hoisted function
    /// declarations bind.
    fn emit_prologue(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        let (param_records, uses_arguments, arguments_storage) = {
            let info = &self.ctx.analysis.functions[self.fid as usize];
            (
                info.param_records.clone(),
                info.uses_arguments,
                info.var(crate::scope::ARGUMENTS_NAME)
                    .map(|i| info.vars[i].storage.clone()),
            )
        };
        for &(arg, slot) in param_records.iter() {
            self.emit(Instr::LoadArg(arg));
            self.emit(Instr::StoreRecord { depth: 0, slot });
        }
        if uses_arguments && self.fid != 0 {
            if let Some(storage) = arguments_storage {
                self.emit(Instr::MakeArguments);
                match storage {
                    VarStorage::Local(slot) => {
                        self.emit(Instr::StoreLocal(slot));
                    }
                    VarStorage::Record(slot) => {
                        self.emit(Instr::StoreRecord { depth: 0, slot });
                    }
                    _ => {
                        self.emit(Instr::Pop);
                    }
                }
            }
        }
        let mut decls = Vec::new();
        collect_function_decls(body, &mut decls);
        for func in decls {
            let name = func.name.clone().unwrap_or_default();
            let method = self.compile_nested(func)?;
            self.emit(Instr::MakeFunction { method });
            self.store_named_from_stack(&name)?;
        }
        Ok(())
    }

    fn compile_nested(&mut self, func: &FunctionLiteral) -> Result<MethodId, CompileError> {
        let fid = *self
            .ctx
            .analysis
            .fn_of_literal
            .get(&func.id)
            .ok_or_else(|| CompileError::Internal("unresolved function literal".into()))?;
        if self.ctx.procedures[fid as usize].is_none() {
            emit_function(self.ctx, fid, &func.body)?;
        }
        Ok(MethodId(self.ctx.base + fid))
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.mark_line(stmt.span);
        match &stmt.kind {
            StmtKind::Expr(e) => {
                let saved = self.info.root_expression.take();
                self.info.root_expression = Some(e.id);
                self.emit_expr(e)?;
                self.info.root_expression = saved;
                Ok(())
            }
            StmtKind::VarDecl(decls) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        self.emit_expr(init)?;
                        self.store_named_from_stack(name)?;
                    }
                }
                Ok(())
            }
            // Bound in the prologue.
            StmtKind::FunctionDecl(_) => Ok(()),
            StmtKind::Block(body) => {
                for s in body {
                    self.emit_stmt(s)?;
                }
                Ok(())
            }
            StmtKind::If { cond, then, other } => self.emit_if(cond, then, other.as_deref()),
            StmtKind::While { cond, body } => self.emit_while(cond, body),
            StmtKind::DoWhile { body, cond } => self.emit_do_while(body, cond),
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.emit_for(init.as_ref(), cond.as_ref(), update.as_ref(), body),
            StmtKind::ForIn {
                target,
                object,
                body,
            } => self.emit_for_in(target, object, body),
            StmtKind::Break(label) => self.emit_break(label.as_deref(), stmt.span),
            StmtKind::Continue(label) => self.emit_continue(label.as_deref(), stmt.span),
            StmtKind::Return(value) => {
                match value {
                    Some(value) => self.emit_expr(value)?,
                    None => {
                        self.emit(Instr::LoadUndefined);
                    }
                }
                for body in self.finally_stack.clone().iter().rev() {
                    for s in body {
                        self.emit_stmt(s)?;
                    }
                }
                self.emit(Instr::Return);
                Ok(())
            }
            StmtKind::Throw(value) => {
                self.emit_expr(value)?;
                self.emit(Instr::Throw);
                Ok(())
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => self.emit_try(block, catch.as_ref(), finally.as_deref()),
            StmtKind::With { object, body } => {
                self.emit_expr(object)?;
                self.emit(Instr::WithEnter);
                self.with_depth += 1;
                self.emit_stmt(body)?;
                self.with_depth -= 1;
                self.emit(Instr::WithExit);
                Ok(())
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.emit_switch(discriminant, cases),
            StmtKind::Labeled { label, body } => {
                if matches!(
                    body.kind,
                    StmtKind::While { .. }
                        | StmtKind::DoWhile { .. }
                        | StmtKind::For { .. }
                        | StmtKind::ForIn { .. }
                ) {
                    self.pending_label = Some(label.clone());
                    self.emit_stmt(body)
                } else {
                    self.loop_stack.push(LoopCtx {
                        label: Some(label.clone()),
                        is_loop: false,
                        break_jumps: Vec::new(),
                        continue_jumps: Vec::new(),
                        finally_depth: self.finally_stack.len(),
                        try_depth: self.try_depth,
                        iter_depth: self.iter_depth,
                        with_depth: self.with_depth,
                    });
                    self.emit_stmt(body)?;
                    let ctx = self.loop_stack.pop().unwrap();
                    for j in ctx.break_jumps {
                        self.patch_here(j);
                    }
                    Ok(())
                }
            }
            StmtKind::Debugger => {
                self.emit(Instr::Nop);
                Ok(())
            }
            StmtKind::Empty => Ok(()),
        }
    }

    fn push_loop(&mut self) {
        let label = self.pending_label.take();
        self.loop_stack.push(LoopCtx {
            label,
            is_loop: true,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            finally_depth: self.finally_stack.len(),
            try_depth: self.try_depth,
            iter_depth: self.iter_depth,
            with_depth: self.with_depth,
        });
    }

    fn pop_loop(&mut self, continue_target: u32) {
        let ctx = self.loop_stack.pop().expect("loop stack underflow");
        for j in ctx.continue_jumps {
            self.patch(j, continue_target);
        }
        for j in ctx.break_jumps {
            self.patch_here(j);
        }
    }

    fn emit_if(
        &mut self,
        cond: &Expr,
        then: &Stmt,
        other: Option<&Stmt>,
    ) -> Result<(), CompileError> {
        if let Some(c) = self.folded(cond) {
            // Statically decided: only the taken branch exists.
            return if coerce::to_boolean(&c) {
                self.emit_stmt(then)
            } else if let Some(other) = other {
                self.emit_stmt(other)
            } else {
                Ok(())
            };
        }
        self.emit_expr(cond)?;
        let to_else = self.emit_jump(Instr::JumpIfFalse);
        self.emit_stmt(then)?;
        match other {
            Some(other) => {
                let to_end = self.emit_jump(Instr::Jump);
                self.patch_here(to_else);
                self.emit_stmt(other)?;
                self.patch_here(to_end);
            }
            None => self.patch_here(to_else),
        }
        Ok(())
    }

    fn emit_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CompileError> {
        self.push_loop();
        let start = self.here();
        let exit = match self.folded(cond) {
            Some(c) if coerce::to_boolean(&c) => None,
            _ => {
                self.emit_expr(cond)?;
                Some(self.emit_jump(Instr::JumpIfFalse))
            }
        };
        self.emit_stmt(body)?;
        self.emit(Instr::Jump(start));
        if let Some(exit) = exit {
            self.patch_here(exit);
        }
        self.pop_loop(start);
        Ok(())
    }

    fn emit_do_while(&mut self, body: &Stmt, cond: &Expr) -> Result<(), CompileError> {
        self.push_loop();
        let start = self.here();
        self.emit_stmt(body)?;
        let cond_ip = self.here();
        self.emit_expr(cond)?;
        self.emit(Instr::JumpIfTrue(start));
        self.pop_loop(cond_ip);
        Ok(())
    }

    fn emit_for(
        &mut self,
        init: Option<&ForInit>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        match init {
            Some(ForInit::Var(decls)) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        self.emit_expr(init)?;
                        self.store_named_from_stack(name)?;
                    }
                }
            }
            Some(ForInit::Expr(e)) => self.emit_discarded(e)?,
            None => {}
        }
        self.push_loop();
        let start = self.here();
        let exit = match cond {
            Some(cond) => {
                self.emit_expr(cond)?;
                Some(self.emit_jump(Instr::JumpIfFalse))
            }
            None => None,
        };
        self.emit_stmt(body)?;
        let continue_target = self.here();
        if let Some(update) = update {
            self.emit_discarded(update)?;
        }
        self.emit(Instr::Jump(start));
        if let Some(exit) = exit {
            self.patch_here(exit);
        }
        self.pop_loop(continue_target);
        Ok(())
    }

    fn emit_for_in(
        &mut self,
        target: &ForInTarget,
        object: &Expr,
        body: &Stmt,
    ) -> Result<(), CompileError> {
        self.emit_expr(object)?;
        self.emit(Instr::ForInInit);
        self.iter_depth += 1;
        self.push_loop();
        let next_ip = self.here();
        let exhausted = self.emit_jump(Instr::ForInNext);
        match target {
            ForInTarget::Var(name) => self.store_named_from_stack(name)?,
            ForInTarget::Expr(e) => self.store_reference_from_stack(e)?,
        }
        self.emit_stmt(body)?;
        self.emit(Instr::Jump(next_ip));
        self.patch_here(exhausted);
        self.pop_loop(next_ip);
        self.iter_depth -= 1;
        self.emit(Instr::ForInEnd);
        Ok(())
    }

    /// Find the loop/label context a break or continue targets.
    fn find_exit_ctx(
        &self,
        label: Option<&str>,
        for_continue: bool,
    ) -> Option<usize> {
        for (i, ctx) in self.loop_stack.iter().enumerate().rev() {
            match label {
                Some(label) => {
                    if ctx.label.as_deref() == Some(label) && (!for_continue || ctx.is_loop) {
                        return Some(i);
                    }
                }
                None => {
                    if ctx.is_loop {
                        return Some(i);
                    }
                }
            }
        }
        None
    }

    /// Unwind bookkeeping (finallies, iterators, with scopes) down to the
    /// target context before an early exit jump.
    fn emit_unwind_to(&mut self, target: usize) -> Result<(), CompileError> {
        let (finally_depth, try_depth, iter_depth, with_depth) = {
            let ctx = &self.loop_stack[target];
            (ctx.finally_depth, ctx.try_depth, ctx.iter_depth, ctx.with_depth)
        };
        for _ in try_depth..self.try_depth {
            self.emit(Instr::TryPop);
        }
        let finallies: Vec<Vec<Stmt>> = self.finally_stack[finally_depth..].to_vec();
        for body in finallies.iter().rev() {
            for s in body {
                self.emit_stmt(s)?;
            }
        }
        for _ in iter_depth..self.iter_depth {
            self.emit(Instr::ForInEnd);
        }
        for _ in with_depth..self.with_depth {
            self.emit(Instr::WithExit);
        }
        Ok(())
    }

    fn emit_break(&mut self, label: Option<&str>, span: Span) -> Result<(), CompileError> {
        let target = self
            .find_exit_ctx(label, false)
            .ok_or_else(|| self.syntax_error("Illegal break statement", span))?;
        self.emit_unwind_to(target)?;
        let j = self.emit_jump(Instr::Jump);
        self.loop_stack[target].break_jumps.push(j);
        Ok(())
    }

    fn emit_continue(&mut self, label: Option<&str>, span: Span) -> Result<(), CompileError> {
        let target = self
            .find_exit_ctx(label, true)
            .ok_or_else(|| self.syntax_error("Illegal continue statement", span))?;
        self.emit_unwind_to(target)?;
        let j = self.emit_jump(Instr::Jump);
        self.loop_stack[target].continue_jumps.push(j);
        Ok(())
    }

    fn emit_try(
        &mut self,
        block: &[Stmt],
        catch: Option<&crate::ast::CatchClause>,
        finally: Option<&[Stmt]>,
    ) -> Result<(), CompileError> {
        let outer = match finally {
            Some(body) => {
                let guard = self.emit_jump(|t| Instr::TryPush { catch: t });
                self.try_depth += 1;
                self.finally_stack.push(body.to_vec());
                Some(guard)
            }
            None => None,
        };

        match catch {
            Some(clause) => {
                let guard = self.emit_jump(|t| Instr::TryPush { catch: t });
                self.try_depth += 1;
                for s in block {
                    self.emit_stmt(s)?;
                }
                self.emit(Instr::TryPop);
                self.try_depth -= 1;
                let done = self.emit_jump(Instr::Jump);
                self.patch_here(guard);
                // The VM pushed the thrown value.
                self.store_named_from_stack(&clause.param)?;
                for s in &clause.body {
                    self.emit_stmt(s)?;
                }
                self.patch_here(done);
            }
            None => {
                for s in block {
                    self.emit_stmt(s)?;
                }
            }
        }

        if let (Some(guard), Some(body)) = (outer, finally) {
            self.finally_stack.pop();
            self.emit(Instr::TryPop);
            self.try_depth -= 1;
            // Fallthrough copy.
            for s in body {
                self.emit_stmt(s)?;
            }
            let done = self.emit_jump(Instr::Jump);
            // Exception copy: run the finalizer, then rethrow.
            self.patch_here(guard);
            for s in body {
                self.emit_stmt(s)?;
            }
            self.emit(Instr::Rethrow);
            self.patch_here(done);
        }
        Ok(())
    }

    fn emit_switch(
        &mut self,
        discriminant: &Expr,
        cases: &[crate::ast::SwitchCase],
    ) -> Result<(), CompileError> {
        self.emit_expr(discriminant)?;
        let temp = self.alloc_temp();
        self.emit(Instr::StoreLocal(temp));

        self.loop_stack.push(LoopCtx {
            label: self.pending_label.take(),
            is_loop: false,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            finally_depth: self.finally_stack.len(),
            try_depth: self.try_depth,
            iter_depth: self.iter_depth,
            with_depth: self.with_depth,
        });

        let mut case_jumps: Vec<(usize, usize)> = Vec::new(); // (case index, jump index)
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                self.emit(Instr::LoadLocal(temp));
                self.emit_expr(test)?;
                self.emit(Instr::StrictEq);
                let j = self.emit_jump(Instr::JumpIfTrue);
                case_jumps.push((i, j));
            }
        }
        let default_index = cases.iter().position(|c| c.test.is_none());
        let tail_jump = self.emit_jump(Instr::Jump);

        let mut body_starts = vec![0u32; cases.len()];
        for (i, case) in cases.iter().enumerate() {
            body_starts[i] = self.here();
            for s in &case.body {
                self.emit_stmt(s)?;
            }
        }
        for (case, jump) in case_jumps {
            let target = body_starts[case];
            self.patch(jump, target);
        }
        match default_index {
            Some(i) => {
                let target = body_starts[i];
                self.patch(tail_jump, target);
            }
            None => self.patch_here(tail_jump),
        }

        let ctx = self.loop_stack.pop().unwrap();
        for j in ctx.break_jumps {
            self.patch_here(j);
        }
        self.free_temp(temp);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Emit in statement position, discarding the value.
    fn emit_discarded(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let saved = self.info.root_expression.take();
        self.info.root_expression = Some(expr.id);
        self.emit_expr(expr)?;
        self.info.root_expression = saved;
        Ok(())
    }

    fn emit_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        let in_use = self.value_in_use(expr);

        // A folded constant replaces the whole computation for the pure
        // kinds; branching forms keep their own elision paths so untaken
        // sides never execute. Reference-valued constants (intrinsic
        // objects) still load through the runtime probe.
        if in_use {
            if matches!(
                expr.kind,
                ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::Unary { .. } | ExprKind::Binary { .. }
            ) {
                if let Some(constant) = self.folded(expr) {
                    if is_foldable_primitive(&constant) {
                        self.emit_constant(&constant);
                        return Ok(());
                    }
                }
            }
        }

        match &expr.kind {
            ExprKind::Literal(lit) => {
                if !in_use {
                    return Ok(());
                }
                self.emit_literal(lit)
            }
            ExprKind::This => {
                if in_use {
                    self.emit(Instr::LoadThis);
                }
                Ok(())
            }
            ExprKind::Name(_) => {
                let dynamic = matches!(
                    self.ctx.analysis.bindings.get(&expr.id),
                    Some(Binding::Dynamic(_)) | Some(Binding::WithFallback(_, _))
                );
                if !in_use && !dynamic {
                    return Ok(());
                }
                self.emit_get_reference(expr, true)?;
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::ArrayLit(items) => {
                self.emit(Instr::NewArray(items.len() as u16));
                for (i, item) in items.iter().enumerate() {
                    if let Some(item) = item {
                        self.emit_expr(item)?;
                        self.emit(Instr::StoreElem(i as u16));
                    }
                }
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::ObjectLit(entries) => {
                self.emit(Instr::NewObject);
                for entry in entries {
                    let key = self.intern(&entry.key);
                    match &entry.kind {
                        ObjectEntryKind::Data(value) => {
                            self.emit_expr(value)?;
                            self.emit(Instr::DefineData(key));
                        }
                        ObjectEntryKind::Getter(func) => {
                            let method = self.compile_nested(func)?;
                            self.emit(Instr::MakeFunction { method });
                            self.emit(Instr::DefineAccessor {
                                name: key,
                                getter: true,
                            });
                        }
                        ObjectEntryKind::Setter(func) => {
                            let method = self.compile_nested(func)?;
                            self.emit(Instr::MakeFunction { method });
                            self.emit(Instr::DefineAccessor {
                                name: key,
                                getter: false,
                            });
                        }
                    }
                }
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::Member { .. } | ExprKind::Index { .. } => {
                self.emit_get_reference(expr, true)?;
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::Call { callee, args } => {
                self.emit_call(callee, args)?;
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::New { callee, args } => {
                self.emit_expr(callee)?;
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit(Instr::Construct {
                    argc: args.len() as u8,
                });
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::Unary { op, operand } => self.emit_unary(expr, *op, operand, in_use),
            ExprKind::Prefix { op, target } => self.emit_incdec(*op, target, true, in_use),
            ExprKind::Postfix { op, target } => self.emit_incdec(*op, target, false, in_use),
            ExprKind::Binary { op, left, right } => {
                self.emit_binary(*op, left, right)?;
                if !in_use {
                    self.emit(Instr::Pop);
                }
                Ok(())
            }
            ExprKind::Logical { op, left, right } => self.emit_logical(expr, *op, left, right),
            ExprKind::Ternary { cond, then, other } => self.emit_ternary(expr, cond, then, other),
            ExprKind::Assign { op, target, value } => {
                match op {
                    None => self.emit_assignment(target, value, in_use),
                    Some(base) => self.emit_compound_assignment(*base, target, value, in_use),
                }
            }
            ExprKind::Comma(items) => {
                let saved = self.info.root_expression;
                let (tail, init) = items.split_last().expect("empty list expression");
                for item in init {
                    // Non-tail elements are their own dead roots.
                    self.info.root_expression = Some(item.id);
                    self.emit_expr(item)?;
                }
                self.info.root_expression = if in_use { None } else { Some(tail.id) };
                self.emit_expr(tail)?;
                self.info.root_expression = saved;
                Ok(())
            }
            ExprKind::Function(func) => {
                if !in_use {
                    return Ok(());
                }
                let method = self.compile_nested(func)?;
                self.emit(Instr::MakeFunction { method });
                Ok(())
            }
        }
    }

    fn emit_constant(&mut self, value: &Value) {
        match value {
            Value::Undefined => {
                self.emit(Instr::LoadUndefined);
            }
            Value::Null => {
                self.emit(Instr::LoadNull);
            }
            Value::Bool(true) => {
                self.emit(Instr::LoadTrue);
            }
            Value::Bool(false) => {
                self.emit(Instr::LoadFalse);
            }
            Value::Int(i) => {
                if *i >= i32::MIN as i64 && *i <= i32::MAX as i64 {
                    self.emit(Instr::LoadInt(*i as i32));
                } else {
                    let idx = self.number_const(*i as f64);
                    self.emit(Instr::LoadNum(idx));
                }
            }
            Value::Number(n) => {
                let idx = self.number_const(*n);
                self.emit(Instr::LoadNum(idx));
            }
            Value::Str(s) => {
                let idx = self.intern(s);
                self.emit(Instr::LoadStr(idx));
            }
            Value::Rope(r) => {
                let flat = r.flatten();
                let idx = self.intern(&flat);
                self.emit(Instr::LoadStr(idx));
            }
            // Reference values never fold.
            _ => {
                self.emit(Instr::LoadUndefined);
            }
        }
    }

    fn emit_literal(&mut self, lit: &Literal) -> Result<(), CompileError> {
        match lit {
            Literal::Null => {
                self.emit(Instr::LoadNull);
            }
            Literal::Bool(true) => {
                self.emit(Instr::LoadTrue);
            }
            Literal::Bool(false) => {
                self.emit(Instr::LoadFalse);
            }
            Literal::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    self.emit(Instr::LoadInt(*n as i32));
                } else {
                    let idx = self.number_const(*n);
                    self.emit(Instr::LoadNum(idx));
                }
            }
            Literal::Str(s) => {
                let idx = self.intern(s);
                self.emit(Instr::LoadStr(idx));
            }
            Literal::Regex { pattern, flags } => {
                let slot = self.regexes.len() as u16;
                self.regexes.push(RegexSlot {
                    pattern: pattern.clone(),
                    flags: flags.clone(),
                    cell: OnceCell::new(),
                });
                self.emit(Instr::LoadRegex(slot));
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reference protocol
    // -----------------------------------------------------------------------

    /// Push the value of a reference expression.
    fn emit_get_reference(
        &mut self,
        expr: &Expr,
        throw_if_unresolved: bool,
    ) -> Result<(), CompileError> {
        match &expr.kind {
            ExprKind::Name(name) => {
                let binding = self
                    .ctx
                    .analysis
                    .bindings
                    .get(&expr.id)
                    .cloned()
                    .unwrap_or(Binding::Dynamic(name.clone()));
                self.emit_binding_get(&binding, throw_if_unresolved)
            }
            ExprKind::Member { object, name } => {
                // Monomorphic fast path: a virtual accessor on a known,
                // sealed prototype inlines its getter.
                let object_ty = self.expr_type(object);
                if let Some(proto) = self.ctx.engine.proto_for_static(object_ty) {
                    if !PROTOTYPES.get(proto).extensible_instances {
                        if let Some((_, prop)) = PROTOTYPES.find_property(proto, name) {
                            if let PropertyStore::Virtual(pair) = &prop.store {
                                if let Some(getter) = pair.getter {
                                    self.emit_expr(object)?;
                                    self.emit(Instr::CallNative {
                                        method: getter,
                                        argc: 0,
                                    });
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
                self.emit_expr(object)?;
                let idx = self.intern(name);
                self.emit(Instr::GetProp(idx));
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Instr::GetIndex);
                Ok(())
            }
            _ => Err(CompileError::Internal(
                "emit_get_reference on a non-reference expression".into(),
            )),
        }
    }

    fn emit_binding_get(
        &mut self,
        binding: &Binding,
        throw_if_unresolved: bool,
    ) -> Result<(), CompileError> {
        match binding {
            Binding::Var(id) => {
                let var = self.ctx.analysis.var(*id);
                match var.storage.clone() {
                    VarStorage::Arg(i) => {
                        self.emit(Instr::LoadArg(i));
                    }
                    VarStorage::Local(i) => {
                        self.emit(Instr::LoadLocal(i));
                    }
                    VarStorage::Record(slot) => {
                        let depth = self.ctx.analysis.record_depth(self.fid, id.func);
                        self.emit(Instr::LoadRecord { depth, slot });
                    }
                    VarStorage::Pending => {
                        return Err(CompileError::Internal(format!(
                            "variable '{}' has no storage",
                            var.name
                        )))
                    }
                }
                Ok(())
            }
            Binding::Global(name) => {
                match self.ctx.engine.ensure_global_slot(name) {
                    Some(slot) => {
                        self.emit(Instr::LoadGlobal(slot));
                    }
                    None => {
                        let idx = self.intern(name);
                        self.emit(Instr::LoadName(idx));
                    }
                }
                Ok(())
            }
            Binding::Dynamic(name) => {
                let idx = self.intern(name);
                self.emit(if throw_if_unresolved {
                    Instr::LoadName(idx)
                } else {
                    Instr::LoadNameOrUndefined(idx)
                });
                Ok(())
            }
            Binding::WithFallback(name, inner) => {
                let idx = self.intern(name);
                let j = self.emit(Instr::WithLoadOrJump {
                    name: idx,
                    target: u32::MAX,
                });
                self.emit_binding_get(inner, throw_if_unresolved)?;
                self.patch_here(j);
                Ok(())
            }
        }
    }

    /// Store through a reference. `thunk` pushes the right-hand side;
    /// `produce_two` tells it whether duplication yields the statement
    /// result (plain slots) or whether the store instruction re-pushes it
    /// (property writes).
    fn emit_set_reference(
        &mut self,
        target: &Expr,
        result_in_use: bool,
        thunk: &mut dyn FnMut(&mut Self, bool) -> Result<(), CompileError>,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Name(name) => {
                let binding = self
                    .ctx
                    .analysis
                    .bindings
                    .get(&target.id)
                    .cloned()
                    .unwrap_or(Binding::Dynamic(name.clone()));
                thunk(self, true)?;
                if result_in_use {
                    self.emit(Instr::Dup);
                }
                self.emit_binding_store(&binding)
            }
            ExprKind::Member { object, name } => {
                self.emit_expr(object)?;
                thunk(self, false)?;
                let idx = self.intern(name);
                self.emit(if result_in_use {
                    Instr::SetPropPush(idx)
                } else {
                    Instr::SetProp(idx)
                });
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                thunk(self, false)?;
                self.emit(if result_in_use {
                    Instr::SetIndexPush
                } else {
                    Instr::SetIndex
                });
                Ok(())
            }
            _ => Err(CompileError::Internal(
                "emit_set_reference on a non-reference expression".into(),
            )),
        }
    }

    /// Store the value currently on the stack into a binding.
    fn emit_binding_store(&mut self, binding: &Binding) -> Result<(), CompileError> {
        match binding {
            Binding::Var(id) => {
                let var = self.ctx.analysis.var(*id);
                match var.storage.clone() {
                    VarStorage::Arg(i) => {
                        self.emit(Instr::StoreArg(i));
                    }
                    VarStorage::Local(i) => {
                        self.emit(Instr::StoreLocal(i));
                    }
                    VarStorage::Record(slot) => {
                        let depth = self.ctx.analysis.record_depth(self.fid, id.func);
                        self.emit(Instr::StoreRecord { depth, slot });
                    }
                    VarStorage::Pending => {
                        return Err(CompileError::Internal(format!(
                            "variable '{}' has no storage",
                            var.name
                        )))
                    }
                }
                Ok(())
            }
            Binding::Global(name) => {
                match self.ctx.engine.ensure_global_slot(name) {
                    Some(slot) => {
                        self.emit(Instr::StoreGlobal(slot));
                    }
                    None => {
                        let idx = self.intern(name);
                        self.emit(Instr::StoreName(idx));
                    }
                }
                Ok(())
            }
            Binding::Dynamic(name) => {
                let idx = self.intern(name);
                self.emit(Instr::StoreName(idx));
                Ok(())
            }
            Binding::WithFallback(name, inner) => {
                let idx = self.intern(name);
                let j = self.emit(Instr::WithStoreOrJump {
                    name: idx,
                    target: u32::MAX,
                });
                self.emit_binding_store(inner)?;
                self.patch_here(j);
                Ok(())
            }
        }
    }

    /// Push the delete result for a reference.
    fn emit_delete_reference(&mut self, operand: &Expr) -> Result<(), CompileError> {
        match &operand.kind {
            // Variable references never delete.
            ExprKind::Name(_) => {
                self.emit(Instr::LoadFalse);
                Ok(())
            }
            ExprKind::Member { object, name } => {
                self.emit_expr(object)?;
                let idx = self.intern(name);
                self.emit(Instr::DeleteProp(idx));
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Instr::DeleteIndex);
                Ok(())
            }
            _ => {
                self.emit_discarded(operand)?;
                self.emit(Instr::LoadTrue);
                Ok(())
            }
        }
    }

    /// Store the value already on the stack into a declared name (variable
    /// declarations, catch parameters, function declarations, for-in vars).
    fn store_named_from_stack(&mut self, name: &str) -> Result<(), CompileError> {
        let binding = self.lookup_decl_binding(name);
        self.emit_binding_store(&binding)
    }

    /// Store the value on the stack through an arbitrary reference (for-in
    /// over a member expression target).
    fn store_reference_from_stack(&mut self, target: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Name(name) => {
                let binding = self
                    .ctx
                    .analysis
                    .bindings
                    .get(&target.id)
                    .cloned()
                    .unwrap_or(Binding::Dynamic(name.clone()));
                self.emit_binding_store(&binding)
            }
            ExprKind::Member { object, name } => {
                // Value is on the stack; bring the object under it into
                // [obj, value] order.
                self.emit_expr(object)?;
                self.emit(Instr::Swap);
                let idx = self.intern(name);
                self.emit(Instr::SetProp(idx));
                Ok(())
            }
            ExprKind::Index { object, index } => {
                let temp = self.alloc_temp();
                self.emit(Instr::StoreLocal(temp));
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Instr::LoadLocal(temp));
                self.emit(Instr::SetIndex);
                self.free_temp(temp);
                Ok(())
            }
            _ => Err(CompileError::Internal(
                "for-in target is not a reference".into(),
            )),
        }
    }

    /// Binding for a declared name, mirroring the resolver's chain walk.
    fn lookup_decl_binding(&self, name: &str) -> Binding {
        let mut current = Some(self.fid);
        while let Some(fid) = current {
            if fid == 0 {
                break;
            }
            if let Some(index) = self.ctx.analysis.functions[fid as usize].var(name) {
                return Binding::Var(crate::scope::VarId { func: fid, index });
            }
            current = self.ctx.analysis.functions[fid as usize].parent;
        }
        Binding::Global(name.to_string())
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    fn emit_unary(
        &mut self,
        _expr: &Expr,
        op: UnaryOp,
        operand: &Expr,
        in_use: bool,
    ) -> Result<(), CompileError> {
        match op {
            UnaryOp::TypeOf => {
                if let ExprKind::Name(_) = operand.kind {
                    self.emit_get_reference(operand, false)?;
                } else {
                    self.emit_expr(operand)?;
                }
                self.emit(Instr::TypeOf);
            }
            UnaryOp::Delete => {
                self.emit_delete_reference(operand)?;
            }
            UnaryOp::Void => {
                self.emit_discarded(operand)?;
                self.emit(Instr::LoadUndefined);
            }
            UnaryOp::Plus => {
                self.emit_expr(operand)?;
                if !self.expr_type(operand).is_numeric() {
                    self.emit(Instr::ToNumber);
                }
            }
            UnaryOp::Minus => {
                self.emit_expr(operand)?;
                let mode = if self.expr_type(operand).is_integer() {
                    NumMode::I32
                } else if self.expr_type(operand) == StaticType::F64 {
                    NumMode::F64
                } else {
                    NumMode::Dyn
                };
                self.emit(Instr::Neg(mode));
            }
            UnaryOp::Not => {
                self.emit_expr(operand)?;
                self.emit(Instr::Not);
            }
            UnaryOp::BitNot => {
                self.emit_expr(operand)?;
                self.emit(Instr::BitNot);
            }
        }
        if !in_use {
            self.emit(Instr::Pop);
        }
        Ok(())
    }

    fn emit_incdec(
        &mut self,
        op: IncDecOp,
        target: &Expr,
        prefix: bool,
        in_use: bool,
    ) -> Result<(), CompileError> {
        let int_target = self.expr_type(target).is_integer();
        let one = Instr::LoadInt(1);
        let arith = if int_target {
            match op {
                IncDecOp::Inc => Instr::Add(NumMode::I32),
                IncDecOp::Dec => Instr::Sub(NumMode::I32),
            }
        } else {
            match op {
                IncDecOp::Inc => Instr::Add(NumMode::F64),
                IncDecOp::Dec => Instr::Sub(NumMode::F64),
            }
        };

        match &target.kind {
            ExprKind::Name(_) => {
                self.emit_get_reference(target, true)?;
                if !int_target {
                    self.emit(Instr::ToNumber);
                }
                let old = if !prefix && in_use {
                    let t = self.alloc_temp();
                    self.emit(Instr::Dup);
                    self.emit(Instr::StoreLocal(t));
                    Some(t)
                } else {
                    None
                };
                self.emit(one);
                self.emit(arith);
                let result_in_use = prefix && in_use;
                self.emit_set_reference(target, result_in_use, &mut |_, _| Ok(()))?;
                if let Some(t) = old {
                    self.emit(Instr::LoadLocal(t));
                    self.free_temp(t);
                }
            }
            ExprKind::Member { object, name } => {
                let obj_temp = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instr::StoreLocal(obj_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                let name_idx = self.intern(name);
                self.emit(Instr::GetProp(name_idx));
                self.emit(Instr::ToNumber);
                let old = if !prefix && in_use {
                    let t = self.alloc_temp();
                    self.emit(Instr::Dup);
                    self.emit(Instr::StoreLocal(t));
                    Some(t)
                } else {
                    None
                };
                self.emit(one);
                self.emit(arith);
                // [new]; rebuild [obj, new] for the store.
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::Swap);
                self.emit(if prefix && in_use {
                    Instr::SetPropPush(name_idx)
                } else {
                    Instr::SetProp(name_idx)
                });
                if let Some(t) = old {
                    self.emit(Instr::LoadLocal(t));
                    self.free_temp(t);
                }
                self.free_temp(obj_temp);
            }
            ExprKind::Index { object, index } => {
                let obj_temp = self.alloc_temp();
                let idx_temp = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instr::StoreLocal(obj_temp));
                self.emit_expr(index)?;
                self.emit(Instr::StoreLocal(idx_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::LoadLocal(idx_temp));
                self.emit(Instr::GetIndex);
                self.emit(Instr::ToNumber);
                let old = if !prefix && in_use {
                    let t = self.alloc_temp();
                    self.emit(Instr::Dup);
                    self.emit(Instr::StoreLocal(t));
                    Some(t)
                } else {
                    None
                };
                self.emit(one);
                self.emit(arith);
                let val_temp = self.alloc_temp();
                self.emit(Instr::StoreLocal(val_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::LoadLocal(idx_temp));
                self.emit(Instr::LoadLocal(val_temp));
                self.emit(if prefix && in_use {
                    Instr::SetIndexPush
                } else {
                    Instr::SetIndex
                });
                if let Some(t) = old {
                    self.emit(Instr::LoadLocal(t));
                    self.free_temp(t);
                }
                self.free_temp(val_temp);
                self.free_temp(idx_temp);
                self.free_temp(obj_temp);
            }
            _ => {
                return Err(CompileError::Internal(
                    "increment target is not a reference".into(),
                ))
            }
        }
        Ok(())
    }

    fn emit_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        let lt = self.expr_type(left);
        let rt = self.expr_type(right);
        match op {
            BinaryOp::Add => {
                if lt.is_string_like() || rt.is_string_like() {
                    self.emit_expr(left)?;
                    self.emit_expr(right)?;
                    self.emit(Instr::Concat);
                } else if crate::types::most_accurate_integer(lt, rt).is_some() {
                    self.emit_expr(left)?;
                    self.emit_expr(right)?;
                    self.emit(Instr::Add(NumMode::I32));
                } else if lt.is_numeric() && rt.is_numeric() {
                    self.emit_expr(left)?;
                    self.emit_expr(right)?;
                    self.emit(Instr::Add(NumMode::F64));
                } else {
                    // The slow path re-runs the typing rules at runtime.
                    self.emit_expr(left)?;
                    self.emit_expr(right)?;
                    self.emit(Instr::Add(NumMode::Dyn));
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                let mode = if lt.is_numeric() && rt.is_numeric() {
                    NumMode::F64
                } else {
                    NumMode::Dyn
                };
                self.emit(match op {
                    BinaryOp::Sub => Instr::Sub(mode),
                    BinaryOp::Mul => Instr::Mul(mode),
                    BinaryOp::Div => Instr::Div(mode),
                    _ => Instr::Mod(mode),
                });
            }
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr
            | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(match op {
                    BinaryOp::Shl => Instr::Shl,
                    BinaryOp::Shr => Instr::Shr,
                    BinaryOp::Ushr => Instr::Ushr,
                    BinaryOp::BitAnd => Instr::BitAnd,
                    BinaryOp::BitOr => Instr::BitOr,
                    _ => Instr::BitXor,
                });
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                let mode = if lt.is_string_like() && rt.is_string_like() {
                    CmpMode::Str
                } else if crate::types::most_accurate_integer(lt, rt).is_some() {
                    CmpMode::I32
                } else if lt.is_numeric() && rt.is_numeric() {
                    CmpMode::F64
                } else {
                    CmpMode::Dyn
                };
                let cmp = match op {
                    BinaryOp::Lt => CmpOp::Lt,
                    BinaryOp::Le => CmpOp::Le,
                    BinaryOp::Gt => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                self.emit(Instr::Cmp { op: cmp, mode });
            }
            BinaryOp::Eq => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::LooseEq);
            }
            BinaryOp::Ne => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::LooseNe);
            }
            BinaryOp::StrictEq => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::StrictEq);
            }
            BinaryOp::StrictNe => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::StrictNe);
            }
            BinaryOp::In => {
                // A receiver with a statically-known, sealed prototype and a
                // constant key reduces to a compile-time lookup.
                if let (Some(Value::Str(key)), StaticType::Object(Some(proto))) =
                    (self.folded(left), rt)
                {
                    if !PROTOTYPES.get(proto).extensible_instances {
                        let found = PROTOTYPES.find_property(proto, &key).is_some();
                        self.emit_discarded(right)?;
                        self.emit(if found { Instr::LoadTrue } else { Instr::LoadFalse });
                        return Ok(());
                    }
                }
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::In);
            }
            BinaryOp::InstanceOf => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(Instr::InstanceOf);
            }
        }
        Ok(())
    }

    fn emit_logical(
        &mut self,
        expr: &Expr,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CompileError> {
        let in_use = self.value_in_use(expr);
        if let Some(lv) = self.folded(left) {
            // Statically decided: emit only the required branch.
            let truthy = coerce::to_boolean(&lv);
            let take_right = match op {
                LogicalOp::And => truthy,
                LogicalOp::Or => !truthy,
            };
            if take_right {
                let saved = self.info.root_expression;
                self.info.root_expression = if in_use { None } else { Some(right.id) };
                self.emit_expr(right)?;
                self.info.root_expression = saved;
            } else if in_use {
                self.emit_constant(&lv);
            }
            return Ok(());
        }

        if in_use {
            self.emit_expr(left)?;
            self.emit(Instr::Dup);
            self.emit(Instr::ToBoolean);
            let short = match op {
                LogicalOp::And => self.emit_jump(Instr::JumpIfFalse),
                LogicalOp::Or => self.emit_jump(Instr::JumpIfTrue),
            };
            self.emit(Instr::Pop);
            self.emit_expr(right)?;
            self.patch_here(short);
        } else {
            self.emit_expr(left)?;
            let short = match op {
                LogicalOp::And => self.emit_jump(Instr::JumpIfFalse),
                LogicalOp::Or => self.emit_jump(Instr::JumpIfTrue),
            };
            let saved = self.info.root_expression;
            self.info.root_expression = Some(right.id);
            self.emit_expr(right)?;
            self.info.root_expression = saved;
            self.patch_here(short);
        }
        Ok(())
    }

    fn emit_ternary(
        &mut self,
        expr: &Expr,
        cond: &Expr,
        then: &Expr,
        other: &Expr,
    ) -> Result<(), CompileError> {
        let in_use = self.value_in_use(expr);
        if let Some(cv) = self.folded(cond) {
            // Only the taken branch is emitted (and was analyzed).
            let taken = if coerce::to_boolean(&cv) { then } else { other };
            let saved = self.info.root_expression;
            self.info.root_expression = if in_use { None } else { Some(taken.id) };
            self.emit_expr(taken)?;
            self.info.root_expression = saved;
            return Ok(());
        }
        self.emit_expr(cond)?;
        let to_else = self.emit_jump(Instr::JumpIfFalse);
        let saved = self.info.root_expression;
        self.info.root_expression = if in_use { None } else { Some(then.id) };
        self.emit_expr(then)?;
        let to_end = self.emit_jump(Instr::Jump);
        self.patch_here(to_else);
        self.info.root_expression = if in_use { None } else { Some(other.id) };
        self.emit_expr(other)?;
        self.info.root_expression = saved;
        self.patch_here(to_end);
        Ok(())
    }

    fn emit_assignment(
        &mut self,
        target: &Expr,
        value: &Expr,
        in_use: bool,
    ) -> Result<(), CompileError> {
        self.emit_set_reference(target, in_use, &mut |em, _produce_two| em.emit_expr(value))
    }

    /// Compound assignment rewrites to the base operator plus a store; the
    /// reference's get and set are separated so the left side is only
    /// evaluated once.
    fn emit_compound_assignment(
        &mut self,
        base: BinaryOp,
        target: &Expr,
        value: &Expr,
        in_use: bool,
    ) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Name(_) => {
                self.emit_set_reference(target, in_use, &mut |em, _| {
                    em.emit_get_reference(target, true)?;
                    em.emit_expr(value)?;
                    em.emit_binary_op_dynamic(base, target, value);
                    Ok(())
                })
            }
            ExprKind::Member { object, name } => {
                let obj_temp = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instr::StoreLocal(obj_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                let name_idx = self.intern(name);
                self.emit(Instr::GetProp(name_idx));
                self.emit_expr(value)?;
                self.emit_binary_op_dynamic(base, target, value);
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::Swap);
                self.emit(if in_use {
                    Instr::SetPropPush(name_idx)
                } else {
                    Instr::SetProp(name_idx)
                });
                self.free_temp(obj_temp);
                Ok(())
            }
            ExprKind::Index { object, index } => {
                let obj_temp = self.alloc_temp();
                let idx_temp = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instr::StoreLocal(obj_temp));
                self.emit_expr(index)?;
                self.emit(Instr::StoreLocal(idx_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::LoadLocal(idx_temp));
                self.emit(Instr::GetIndex);
                self.emit_expr(value)?;
                self.emit_binary_op_dynamic(base, target, value);
                let val_temp = self.alloc_temp();
                self.emit(Instr::StoreLocal(val_temp));
                self.emit(Instr::LoadLocal(obj_temp));
                self.emit(Instr::LoadLocal(idx_temp));
                self.emit(Instr::LoadLocal(val_temp));
                self.emit(if in_use {
                    Instr::SetIndexPush
                } else {
                    Instr::SetIndex
                });
                self.free_temp(val_temp);
                self.free_temp(idx_temp);
                self.free_temp(obj_temp);
                Ok(())
            }
            _ => Err(CompileError::Internal(
                "compound assignment target is not a reference".into(),
            )),
        }
    }

    /// Emit the base operator of a compound form over the two values already
    /// on the stack, using static types where they help.
    fn emit_binary_op_dynamic(&mut self, op: BinaryOp, left: &Expr, right: &Expr) {
        let lt = self.expr_type(left);
        let rt = self.expr_type(right);
        let instr = match op {
            BinaryOp::Add => {
                if lt.is_string_like() || rt.is_string_like() {
                    Instr::Concat
                } else if crate::types::most_accurate_integer(lt, rt).is_some() {
                    Instr::Add(NumMode::I32)
                } else if lt.is_numeric() && rt.is_numeric() {
                    Instr::Add(NumMode::F64)
                } else {
                    Instr::Add(NumMode::Dyn)
                }
            }
            BinaryOp::Sub => Instr::Sub(NumMode::Dyn),
            BinaryOp::Mul => Instr::Mul(NumMode::Dyn),
            BinaryOp::Div => Instr::Div(NumMode::Dyn),
            BinaryOp::Mod => Instr::Mod(NumMode::Dyn),
            BinaryOp::Shl => Instr::Shl,
            BinaryOp::Shr => Instr::Shr,
            BinaryOp::Ushr => Instr::Ushr,
            BinaryOp::BitAnd => Instr::BitAnd,
            BinaryOp::BitOr => Instr::BitOr,
            BinaryOp::BitXor => Instr::BitXor,
            // The parser only builds compound forms for the above.
            _ => Instr::Nop,
        };
        self.emit(instr);
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Native method candidates for a callee, when its receiver's prototype
    /// is statically known.
    fn static_candidates(&self, callee: &Expr) -> Option<(Vec<NativeMethodId>, String, CalleeShape)> {
        match &callee.kind {
            ExprKind::Member { object, name } => {
                let proto = self.ctx.engine.proto_for_static(self.expr_type(object))?;
                // Extensible receivers may shadow prototype methods with own
                // properties at runtime; only sealed reflected types bind
                // statically.
                if PROTOTYPES.get(proto).extensible_instances {
                    return None;
                }
                let (_, prop) = PROTOTYPES.find_property(proto, name)?;
                match &prop.store {
                    PropertyStore::NativeMethod(id) => {
                        Some((vec![*id], name.clone(), CalleeShape::Member))
                    }
                    PropertyStore::MethodGroup(ids) => {
                        Some((ids.clone(), name.clone(), CalleeShape::Member))
                    }
                    _ => None,
                }
            }
            ExprKind::Name(name) => {
                if !matches!(
                    self.ctx.analysis.bindings.get(&callee.id),
                    Some(Binding::Global(_))
                ) {
                    return None;
                }
                let global = self.ctx.engine.global_proto();
                let (_, prop) = PROTOTYPES.find_property(global, name)?;
                match &prop.store {
                    PropertyStore::NativeMethod(id) => {
                        Some((vec![*id], name.clone(), CalleeShape::GlobalFunction))
                    }
                    PropertyStore::MethodGroup(ids) => {
                        Some((ids.clone(), name.clone(), CalleeShape::GlobalFunction))
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn emit_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<(), CompileError> {
        // Statically-bound native call: the binder decides the trampoline.
        if let Some((candidates, name, shape)) = self.static_candidates(callee) {
            match binder::bind_static(&candidates, args.len()) {
                StaticBinding::NoOverload => {
                    let msg = self.intern(&format!(
                        "No overload for method {} takes {} arguments",
                        name,
                        args.len()
                    ));
                    self.emit(Instr::ThrowTypeError(msg));
                    // Unreachable; keeps the stack shape uniform.
                    self.emit(Instr::LoadUndefined);
                    return Ok(());
                }
                StaticBinding::Single(id) => {
                    self.emit_call_receiver(callee, shape)?;
                    let method = native::method(id);
                    let formal_count = method.params.len();
                    // Every actual is evaluated; extras beyond a fixed
                    // formal list are discarded, missing formals fill with
                    // undefined before their coercion.
                    let total = formal_count.max(args.len());
                    for i in 0..total {
                        let kind = method.params.get(i).copied();
                        match (args.get(i), kind) {
                            (Some(arg), Some(kind)) => {
                                self.emit_expr(arg)?;
                                self.emit_param_coercion(kind);
                            }
                            (Some(arg), None) => {
                                if method.variadic {
                                    self.emit_expr(arg)?;
                                } else {
                                    // Extra argument: evaluated, discarded.
                                    self.emit_discarded_arg(arg)?;
                                }
                            }
                            (None, Some(kind)) => {
                                self.emit(Instr::LoadUndefined);
                                self.emit_param_coercion(kind);
                            }
                            (None, None) => {}
                        }
                    }
                    let argc = if method.variadic {
                        formal_count.max(args.len())
                    } else {
                        formal_count
                    } as u8;
                    self.emit(Instr::CallNative { method: id, argc });
                    return Ok(());
                }
                StaticBinding::Ambiguous(ids) => {
                    self.emit_call_receiver(callee, shape)?;
                    for arg in args {
                        self.emit_expr(arg)?;
                    }
                    let group = self.groups.len() as u16;
                    self.groups.push((name, ids));
                    self.emit(Instr::CallGroup {
                        group,
                        argc: args.len() as u8,
                    });
                    return Ok(());
                }
            }
        }

        match &callee.kind {
            ExprKind::Member { object, name } => {
                self.emit_expr(object)?;
                for arg in args {
                    self.emit_expr(arg)?;
                }
                let idx = self.intern(name);
                self.emit(Instr::CallProp {
                    name: idx,
                    argc: args.len() as u8,
                });
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit(Instr::Dup);
                self.emit_expr(index)?;
                self.emit(Instr::GetIndex);
                self.emit(Instr::Swap);
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit(Instr::CallFunction {
                    argc: args.len() as u8,
                });
                Ok(())
            }
            _ => {
                self.emit_expr(callee)?;
                self.emit(Instr::LoadUndefined);
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit(Instr::CallFunction {
                    argc: args.len() as u8,
                });
                Ok(())
            }
        }
    }

    fn emit_call_receiver(&mut self, callee: &Expr, shape: CalleeShape) -> Result<(), CompileError> {
        match shape {
            CalleeShape::Member => {
                if let ExprKind::Member { object, .. } = &callee.kind {
                    self.emit_expr(object)
                } else {
                    Err(CompileError::Internal("member callee lost its object".into()))
                }
            }
            CalleeShape::GlobalFunction => {
                self.emit(Instr::LoadUndefined);
                Ok(())
            }
        }
    }

    fn emit_discarded_arg(&mut self, arg: &Expr) -> Result<(), CompileError> {
        let saved = self.info.root_expression;
        self.info.root_expression = Some(arg.id);
        self.emit_expr(arg)?;
        self.info.root_expression = saved;
        Ok(())
    }

    /// The coercion table: formal type → conversion of the stack top.
    fn emit_param_coercion(&mut self, kind: ParamKind) {
        let instr = match kind {
            ParamKind::Bool => Instr::ToBoolean,
            ParamKind::I8 => Instr::ToInt8,
            ParamKind::U8 => Instr::ToUint8,
            ParamKind::I16 => Instr::ToInt16,
            ParamKind::U16 => Instr::ToUint16,
            ParamKind::I32 => Instr::ToInt32,
            ParamKind::U32 => Instr::ToUint32,
            ParamKind::I64 | ParamKind::U64 => Instr::ToInteger,
            ParamKind::F64 => Instr::ToNumber,
            ParamKind::Str => Instr::ToString,
            ParamKind::Char => Instr::ToChar,
            ParamKind::Any => return,
        };
        self.emit(instr);
    }
}

#[derive(Clone, Copy)]
enum CalleeShape {
    Member,
    GlobalFunction,
}

fn is_foldable_primitive(value: &Value) -> bool {
    !matches!(value, Value::Object(_) | Value::Function(_))
}

/// Function declarations directly hoisted by a body (not crossing into
/// nested functions).
fn collect_function_decls<'s>(stmts: &'s [Stmt], out: &mut Vec<&'s FunctionLiteral>) {
    for stmt in stmts {
        collect_function_decls_stmt(stmt, out);
    }
}

fn collect_function_decls_stmt<'s>(stmt: &'s Stmt, out: &mut Vec<&'s FunctionLiteral>) {
    match &stmt.kind {
        StmtKind::FunctionDecl(func) => out.push(func),
        StmtKind::Block(body) => collect_function_decls(body, out),
        StmtKind::If { then, other, .. } => {
            collect_function_decls_stmt(then, out);
            if let Some(other) = other {
                collect_function_decls_stmt(other, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            collect_function_decls_stmt(body, out)
        }
        StmtKind::For { body, .. } | StmtKind::ForIn { body, .. } => {
            collect_function_decls_stmt(body, out)
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            collect_function_decls(block, out);
            if let Some(clause) = catch {
                collect_function_decls(&clause.body, out);
            }
            if let Some(finally) = finally {
                collect_function_decls(finally, out);
            }
        }
        StmtKind::With { body, .. } | StmtKind::Labeled { body, .. } => {
            collect_function_decls_stmt(body, out)
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_function_decls(&case.body, out);
            }
        }
        _ => {}
    }
}

