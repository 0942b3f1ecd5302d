/// Scope and variable resolution — the first half of the two-pass analyzer.
///
/// Phase A walks each function scope (not block scope) and declares `var`s,
/// inner function declarations, parameters and the synthetic `arguments`
/// variable, all hoisted ahead of any statement. Phase B resolves every name
/// reference against the scope chain; a name found on an outer function's
/// scope flags that variable as hoisted, and its storage migrates from a
/// stack local into the owning activation's closure record. Names inside a
/// `with` body resolve dynamically with the lexical binding as fallback.
///
/// Strict-mode violations (assigning `eval`/`arguments`, deleting a
/// variable) and invalid assignment targets are rejected here, before any
/// emission happens.
use crate::ast::{
    Expr, ExprKind, ForInTarget, ForInit, FuncId, FunctionLiteral, Literal, NodeId, ObjectEntryKind,
    Stmt, StmtKind, UnaryOp,
};
use crate::errors::Span;
use crate::types::StaticType;
use crate::value::Value;
use std::collections::HashMap;

pub const ARGUMENTS_NAME: &str = "arguments";

// ---------------------------------------------------------------------------
// Analysis output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId {
    pub func: FuncId,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub enum VarStorage {
    /// Not yet assigned; fixed after resolution.
    Pending,
    /// Frame argument slot.
    Arg(u16),
    /// Frame local slot.
    Local(u16),
    /// Slot in the owning activation's closure record.
    Record(u16),
}

#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub storage: VarStorage,
    /// Parameter index when the variable is a formal.
    pub param: Option<u16>,
    /// Set when an enclosing function closes over this variable.
    pub hoisted: bool,
    pub is_function_decl: bool,
    /// Observed static type; `None` until the first assignment is seen.
    pub ty: Option<StaticType>,
    /// Known value when the variable is assigned exactly once with a
    /// constant right-hand side.
    pub constant: Option<Value>,
    pub assignments: u32,
}

impl VarInfo {
    fn new(name: &str) -> Self {
        VarInfo {
            name: name.to_string(),
            storage: VarStorage::Pending,
            param: None,
            hoisted: false,
            is_function_decl: false,
            ty: None,
            constant: None,
            assignments: 0,
        }
    }

    pub fn static_type(&self) -> StaticType {
        self.ty.unwrap_or(StaticType::Undefined)
    }
}

#[derive(Debug, Clone)]
pub enum Binding {
    /// A declarative variable; storage and owner are in the var table.
    Var(VarId),
    /// A property of the global scope's prototype.
    Global(String),
    /// Runtime by-name lookup (undeclared name).
    Dynamic(String),
    /// Inside a `with` body: probe the with-objects first, fall back to the
    /// lexical binding.
    WithFallback(String, Box<Binding>),
}

#[derive(Debug)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<String>,
    pub parent: Option<FuncId>,
    pub strict: bool,
    pub uses_arguments: bool,
    pub vars: Vec<VarInfo>,
    /// Count of record slots; non-zero means this function owns a closure
    /// record at runtime.
    pub record_slots: u16,
    /// Hoisted parameters copied into the record in the prologue:
    /// (argument index, record slot).
    pub param_records: Vec<(u16, u16)>,
    pub local_count: u16,
}

impl FunctionInfo {
    pub fn has_record(&self) -> bool {
        self.record_slots > 0
    }

    pub fn var(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == name)
    }
}

/// Everything resolution and inference learned about one program.
#[derive(Debug)]
pub struct Analysis {
    pub functions: Vec<FunctionInfo>,
    pub bindings: HashMap<NodeId, Binding>,
    /// FunctionLiteral node id → FuncId.
    pub fn_of_literal: HashMap<NodeId, FuncId>,
    /// Inferred result type per expression node.
    pub types: HashMap<NodeId, StaticType>,
    /// Folded constant per expression node.
    pub constants: HashMap<NodeId, Value>,
}

impl Analysis {
    pub fn var(&self, id: VarId) -> &VarInfo {
        &self.functions[id.func as usize].vars[id.index]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut VarInfo {
        &mut self.functions[id.func as usize].vars[id.index]
    }

    /// Number of record-owning functions between `use_site` (inclusive) and
    /// the owner (exclusive) — the depth operand for record instructions.
    pub fn record_depth(&self, use_site: FuncId, owner: FuncId) -> u16 {
        let mut depth = 0u16;
        let mut current = use_site;
        while current != owner {
            if self.functions[current as usize].has_record() {
                depth += 1;
            }
            current = self.functions[current as usize]
                .parent
                .expect("record owner not on the parent chain");
        }
        depth
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeErrorKind {
    Syntax,
    Reference,
}

#[derive(Debug, Clone)]
pub struct AnalyzeError {
    pub kind: AnalyzeErrorKind,
    pub message: String,
    pub span: Span,
}

impl AnalyzeError {
    fn syntax(message: impl Into<String>, span: Span) -> Self {
        AnalyzeError {
            kind: AnalyzeErrorKind::Syntax,
            message: message.into(),
            span,
        }
    }

    fn reference(message: impl Into<String>, span: Span) -> Self {
        AnalyzeError {
            kind: AnalyzeErrorKind::Reference,
            message: message.into(),
            span,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<'a> {
    analysis: Analysis,
    /// Names the global prototype already exposes (intrinsics and embedder
    /// globals); consulted before falling back to dynamic lookup.
    known_globals: &'a dyn Fn(&str) -> bool,
    /// Names declared `var` at the top level, to be added to the global
    /// prototype by the caller.
    pub global_vars: Vec<String>,
    /// Stack of function ids from the root to the current function.
    fn_stack: Vec<FuncId>,
    /// Nesting depth of `with` bodies.
    with_depth: u32,
    force_strict: bool,
}

impl<'a> Resolver<'a> {
    /// Run both resolution phases over a parsed program. `known_globals`
    /// answers whether the global prototype already has a property with the
    /// given name.
    pub fn resolve(
        program: &[Stmt],
        force_strict: bool,
        known_globals: &'a dyn Fn(&str) -> bool,
    ) -> Result<(Analysis, Vec<String>), AnalyzeError> {
        let mut resolver = Resolver {
            analysis: Analysis {
                functions: Vec::new(),
                bindings: HashMap::new(),
                fn_of_literal: HashMap::new(),
                types: HashMap::new(),
                constants: HashMap::new(),
            },
            known_globals,
            global_vars: Vec::new(),
            fn_stack: Vec::new(),
            with_depth: 0,
            force_strict,
        };

        // The gateway body is function 0. Its `var`s are global properties,
        // so it declares no locals of its own in phase A.
        let strict = force_strict || has_strict_directive(program);
        resolver.analysis.functions.push(FunctionInfo {
            name: crate::engine::GATEWAY_NAME.to_string(),
            params: Vec::new(),
            parent: None,
            strict,
            uses_arguments: false,
            vars: Vec::new(),
            record_slots: 0,
            param_records: Vec::new(),
            local_count: 0,
        });
        resolver.collect_global_decls(program);

        resolver.fn_stack.push(0);
        for stmt in program {
            resolver.resolve_stmt(stmt)?;
        }
        resolver.fn_stack.pop();

        resolver.assign_storage();
        Ok((resolver.analysis, resolver.global_vars))
    }

    fn current_fn(&self) -> FuncId {
        *self.fn_stack.last().expect("resolver outside any function")
    }

    fn strict(&self) -> bool {
        self.analysis.functions[self.current_fn() as usize].strict
    }

    // -- Phase A ------------------------------------------------------------

    /// Top-level `var` and function declarations become global properties.
    fn collect_global_decls(&mut self, stmts: &[Stmt]) {
        let mut names = Vec::new();
        collect_var_decls(stmts, &mut names);
        for (name, _) in names {
            if !self.global_vars.contains(&name) {
                self.global_vars.push(name);
            }
        }
    }

    /// Declare everything a function body hoists: parameters, `var`s, inner
    /// function declarations, `arguments`.
    fn declare_function(&mut self, func: &FunctionLiteral, parent: FuncId) -> FuncId {
        let id = self.analysis.functions.len() as FuncId;
        let strict = self.force_strict
            || self.analysis.functions[parent as usize].strict
            || has_strict_directive(&func.body);
        let mut info = FunctionInfo {
            name: func
                .name
                .clone()
                .unwrap_or_else(|| "<anonymous>".to_string()),
            params: func.params.clone(),
            parent: Some(parent),
            strict,
            uses_arguments: false,
            vars: Vec::new(),
            record_slots: 0,
            param_records: Vec::new(),
            local_count: 0,
        };
        for (i, p) in func.params.iter().enumerate() {
            let mut var = VarInfo::new(p);
            var.param = Some(i as u16);
            var.ty = Some(StaticType::Any);
            info.vars.push(var);
        }
        let mut decls = Vec::new();
        collect_var_decls(&func.body, &mut decls);
        for (name, is_fn) in decls {
            match info.var(&name) {
                Some(existing) => {
                    if is_fn {
                        info.vars[existing].is_function_decl = true;
                    }
                }
                None => {
                    let mut var = VarInfo::new(&name);
                    var.is_function_decl = is_fn;
                    if is_fn {
                        var.ty = Some(StaticType::Function);
                    }
                    info.vars.push(var);
                }
            }
        }
        // `arguments` is synthesized in every function unless shadowed.
        if info.var(ARGUMENTS_NAME).is_none() {
            let mut var = VarInfo::new(ARGUMENTS_NAME);
            var.ty = Some(StaticType::Object(None));
            info.vars.push(var);
        }
        self.analysis.functions.push(info);
        self.analysis.fn_of_literal.insert(func.id, id);
        id
    }

    // -- Phase B ------------------------------------------------------------

    fn resolve_function_body(&mut self, func: &FunctionLiteral) -> Result<(), AnalyzeError> {
        let parent = self.current_fn();
        let id = self.declare_function(func, parent);
        self.fn_stack.push(id);
        let saved_with = std::mem::take(&mut self.with_depth);
        for stmt in &func.body {
            self.resolve_stmt(stmt)?;
        }
        self.with_depth = saved_with;
        self.fn_stack.pop();
        Ok(())
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) -> Result<(), AnalyzeError> {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Throw(e) => self.resolve_expr(e),
            StmtKind::VarDecl(decls) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        self.resolve_expr(init)?;
                        // A bare `var x;` declares but does not assign.
                        self.note_var_write(name, stmt.span)?;
                    }
                }
                Ok(())
            }
            StmtKind::FunctionDecl(func) => {
                self.note_var_write(func.name.as_deref().unwrap_or(""), stmt.span)?;
                self.resolve_function_body(func)
            }
            StmtKind::Block(body) => {
                for s in body {
                    self.resolve_stmt(s)?;
                }
                Ok(())
            }
            StmtKind::If { cond, then, other } => {
                self.resolve_expr(cond)?;
                self.resolve_stmt(then)?;
                if let Some(other) = other {
                    self.resolve_stmt(other)?;
                }
                Ok(())
            }
            StmtKind::While { cond, body } => {
                self.resolve_expr(cond)?;
                self.resolve_stmt(body)
            }
            StmtKind::DoWhile { body, cond } => {
                self.resolve_stmt(body)?;
                self.resolve_expr(cond)
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decls)) => {
                        for (name, init) in decls {
                            if let Some(init) = init {
                                self.resolve_expr(init)?;
                                self.note_var_write(name, stmt.span)?;
                            }
                        }
                    }
                    Some(ForInit::Expr(e)) => self.resolve_expr(e)?,
                    None => {}
                }
                if let Some(cond) = cond {
                    self.resolve_expr(cond)?;
                }
                if let Some(update) = update {
                    self.resolve_expr(update)?;
                }
                self.resolve_stmt(body)
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => {
                self.resolve_expr(object)?;
                match target {
                    ForInTarget::Var(name) => self.note_var_write(name, stmt.span)?,
                    ForInTarget::Expr(e) => {
                        if !e.is_reference() {
                            return Err(AnalyzeError::reference(
                                "Invalid left-hand side in for-in",
                                e.span,
                            ));
                        }
                        self.resolve_expr(e)?;
                    }
                }
                self.resolve_stmt(body)
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.resolve_expr(value)?;
                }
                Ok(())
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => {
                for s in block {
                    self.resolve_stmt(s)?;
                }
                if let Some(clause) = catch {
                    // The catch parameter lives as a function-scope local.
                    self.ensure_local(&clause.param);
                    for s in &clause.body {
                        self.resolve_stmt(s)?;
                    }
                }
                if let Some(finally) = finally {
                    for s in finally {
                        self.resolve_stmt(s)?;
                    }
                }
                Ok(())
            }
            StmtKind::With { object, body } => {
                if self.strict() {
                    return Err(AnalyzeError::syntax(
                        "Strict mode code may not include a with statement",
                        stmt.span,
                    ));
                }
                self.resolve_expr(object)?;
                self.with_depth += 1;
                let result = self.resolve_stmt(body);
                self.with_depth -= 1;
                result
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.resolve_expr(discriminant)?;
                for case in cases {
                    if let Some(test) = &case.test {
                        self.resolve_expr(test)?;
                    }
                    for s in &case.body {
                        self.resolve_stmt(s)?;
                    }
                }
                Ok(())
            }
            StmtKind::Labeled { body, .. } => self.resolve_stmt(body),
            StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Debugger | StmtKind::Empty => {
                Ok(())
            }
        }
    }

    fn resolve_expr(&mut self, expr: &Expr) -> Result<(), AnalyzeError> {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::This => Ok(()),
            ExprKind::Name(name) => {
                let binding = self.bind_name(name);
                self.analysis.bindings.insert(expr.id, binding);
                Ok(())
            }
            ExprKind::ArrayLit(items) => {
                for item in items.iter().flatten() {
                    self.resolve_expr(item)?;
                }
                Ok(())
            }
            ExprKind::ObjectLit(entries) => {
                for entry in entries {
                    match &entry.kind {
                        ObjectEntryKind::Data(v) => self.resolve_expr(v)?,
                        ObjectEntryKind::Getter(f) | ObjectEntryKind::Setter(f) => {
                            self.resolve_function_body(f)?
                        }
                    }
                }
                Ok(())
            }
            ExprKind::Member { object, .. } => self.resolve_expr(object),
            ExprKind::Index { object, index } => {
                self.resolve_expr(object)?;
                self.resolve_expr(index)
            }
            ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                self.resolve_expr(callee)?;
                for arg in args {
                    self.resolve_expr(arg)?;
                }
                Ok(())
            }
            ExprKind::Unary { op, operand } => {
                if *op == UnaryOp::Delete && self.strict() {
                    if let ExprKind::Name(name) = &operand.kind {
                        return Err(AnalyzeError::syntax(
                            format!("Delete of an unqualified identifier '{}' in strict mode", name),
                            expr.span,
                        ));
                    }
                }
                self.resolve_expr(operand)
            }
            ExprKind::Prefix { target, .. } | ExprKind::Postfix { target, .. } => {
                if !target.is_reference() {
                    return Err(AnalyzeError::reference(
                        "Invalid left-hand side in increment/decrement",
                        target.span,
                    ));
                }
                self.check_strict_write(target)?;
                self.resolve_expr(target)?;
                self.note_target_write(target);
                Ok(())
            }
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)
            }
            ExprKind::Ternary { cond, then, other } => {
                self.resolve_expr(cond)?;
                self.resolve_expr(then)?;
                self.resolve_expr(other)
            }
            ExprKind::Assign { target, value, .. } => {
                if !target.is_reference() {
                    return Err(AnalyzeError::reference(
                        "Invalid left-hand side in assignment",
                        target.span,
                    ));
                }
                self.check_strict_write(target)?;
                self.resolve_expr(value)?;
                self.resolve_expr(target)?;
                self.note_target_write(target);
                Ok(())
            }
            ExprKind::Comma(items) => {
                for item in items {
                    self.resolve_expr(item)?;
                }
                Ok(())
            }
            ExprKind::Function(func) => self.resolve_function_body(func),
        }
    }

    /// In strict mode, `eval` and `arguments` may not be assignment targets.
    fn check_strict_write(&self, target: &Expr) -> Result<(), AnalyzeError> {
        if self.strict() {
            if let ExprKind::Name(name) = &target.kind {
                if name == "eval" || name == ARGUMENTS_NAME {
                    return Err(AnalyzeError::syntax(
                        format!("Assignment to '{}' in strict mode", name),
                        target.span,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolve one name against the scope chain.
    fn bind_name(&mut self, name: &str) -> Binding {
        let lexical = self.bind_name_lexical(name);
        if self.with_depth > 0 {
            return Binding::WithFallback(name.to_string(), Box::new(lexical));
        }
        lexical
    }

    fn bind_name_lexical(&mut self, name: &str) -> Binding {
        let current = self.current_fn();
        // Inner-to-outer over declarative scopes.
        for &fid in self.fn_stack.iter().rev() {
            if fid == 0 {
                break; // the root scope is object-backed, handled below
            }
            if let Some(index) = self.analysis.functions[fid as usize].var(name) {
                if name == ARGUMENTS_NAME && fid == current {
                    self.analysis.functions[fid as usize].uses_arguments = true;
                }
                let var = VarId { func: fid, index };
                if fid != current {
                    // Crossing a function boundary hoists the variable into
                    // the owner's closure record.
                    self.analysis.var_mut(var).hoisted = true;
                    if name == ARGUMENTS_NAME {
                        self.analysis.functions[fid as usize].uses_arguments = true;
                    }
                }
                return Binding::Var(var);
            }
        }
        if self.global_vars.iter().any(|g| g == name) || (self.known_globals)(name) {
            return Binding::Global(name.to_string());
        }
        Binding::Dynamic(name.to_string())
    }

    /// Record an assignment to a named variable (declaration initializers,
    /// for-in targets, function declarations).
    fn note_var_write(&mut self, name: &str, _span: Span) -> Result<(), AnalyzeError> {
        let binding = self.bind_name(name);
        if let Binding::Var(id) = deref_with(&binding) {
            self.analysis.var_mut(id).assignments += 1;
        }
        Ok(())
    }

    fn note_target_write(&mut self, target: &Expr) {
        if let ExprKind::Name(_) = &target.kind {
            if let Some(binding) = self.analysis.bindings.get(&target.id).cloned() {
                if let Binding::Var(id) = deref_with(&binding) {
                    self.analysis.var_mut(id).assignments += 1;
                }
            }
        }
    }

    /// Declare a function-scope local on demand (catch parameters).
    fn ensure_local(&mut self, name: &str) {
        let fid = self.current_fn();
        if fid == 0 {
            if !self.global_vars.iter().any(|g| g == name) {
                self.global_vars.push(name.to_string());
            }
            return;
        }
        let info = &mut self.analysis.functions[fid as usize];
        if info.var(name).is_none() {
            let mut var = VarInfo::new(name);
            var.ty = Some(StaticType::Any);
            info.vars.push(var);
        }
    }

    // -- Storage assignment -------------------------------------------------

    /// With hoisting flags final, give every variable its home: a record
    /// slot when captured, an argument slot for plain parameters, a stack
    /// local otherwise.
    fn assign_storage(&mut self) {
        for info in &mut self.analysis.functions {
            let mut record_slots = 0u16;
            let mut locals = 0u16;
            for var in &mut info.vars {
                if var.hoisted {
                    var.storage = VarStorage::Record(record_slots);
                    if let Some(param) = var.param {
                        info.param_records.push((param, record_slots));
                    }
                    record_slots += 1;
                } else if let Some(param) = var.param {
                    var.storage = VarStorage::Arg(param);
                } else {
                    var.storage = VarStorage::Local(locals);
                    locals += 1;
                }
            }
            info.record_slots = record_slots;
            info.local_count = locals;
        }
    }
}

/// Unwrap a with-fallback to the lexical binding beneath it.
fn deref_with(binding: &Binding) -> Binding {
    match binding {
        Binding::WithFallback(_, inner) => (**inner).clone(),
        other => other.clone(),
    }
}

/// Does a directive prologue start with "use strict"?
pub fn has_strict_directive(body: &[Stmt]) -> bool {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::Literal(Literal::Str(s)),
                ..
            }) => {
                if s == "use strict" {
                    return true;
                }
            }
            _ => break,
        }
    }
    false
}

/// Collect `var` names and function declarations from a statement list,
/// descending into nested statements but not into nested functions.
fn collect_var_decls(stmts: &[Stmt], out: &mut Vec<(String, bool)>) {
    for stmt in stmts {
        collect_var_decls_stmt(stmt, out);
    }
}

fn collect_var_decls_stmt(stmt: &Stmt, out: &mut Vec<(String, bool)>) {
    match &stmt.kind {
        StmtKind::VarDecl(decls) => {
            for (name, _) in decls {
                out.push((name.clone(), false));
            }
        }
        StmtKind::FunctionDecl(func) => {
            if let Some(name) = &func.name {
                out.push((name.clone(), true));
            }
        }
        StmtKind::Block(body) => collect_var_decls(body, out),
        StmtKind::If { then, other, .. } => {
            collect_var_decls_stmt(then, out);
            if let Some(other) = other {
                collect_var_decls_stmt(other, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            collect_var_decls_stmt(body, out)
        }
        StmtKind::For { init, body, .. } => {
            if let Some(ForInit::Var(decls)) = init {
                for (name, _) in decls {
                    out.push((name.clone(), false));
                }
            }
            collect_var_decls_stmt(body, out);
        }
        StmtKind::ForIn { target, body, .. } => {
            if let ForInTarget::Var(name) = target {
                out.push((name.clone(), false));
            }
            collect_var_decls_stmt(body, out);
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            collect_var_decls(block, out);
            if let Some(clause) = catch {
                collect_var_decls(&clause.body, out);
            }
            if let Some(finally) = finally {
                collect_var_decls(finally, out);
            }
        }
        StmtKind::With { body, .. } | StmtKind::Labeled { body, .. } => {
            collect_var_decls_stmt(body, out)
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_var_decls(&case.body, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn resolve(src: &str) -> (Analysis, Vec<String>) {
        let program = Parser::parse_program(src).expect("parse");
        Resolver::resolve(&program, false, &|_| false).expect("resolve")
    }

    #[test]
    fn top_level_vars_are_globals() {
        let (_, globals) = resolve("var a = 1; function f() {} var b;");
        assert!(globals.contains(&"a".to_string()));
        assert!(globals.contains(&"b".to_string()));
        assert!(globals.contains(&"f".to_string()));
    }

    #[test]
    fn var_hoists_within_function() {
        let (analysis, _) = resolve("function f() { g(); var x = 1; function g() { return 2; } }");
        let f = &analysis.functions[1];
        assert!(f.var("x").is_some());
        assert!(f.var("g").is_some());
    }

    #[test]
    fn captured_variable_is_hoisted_into_a_record() {
        let (analysis, _) = resolve(
            "function outer() { var n = 0; function inner() { return n; } return inner; }",
        );
        let outer = analysis
            .functions
            .iter()
            .find(|f| f.name == "outer")
            .unwrap();
        let n = outer.var("n").unwrap();
        assert!(outer.vars[n].hoisted);
        assert!(matches!(outer.vars[n].storage, VarStorage::Record(0)));
        assert!(outer.has_record());
    }

    #[test]
    fn uncaptured_locals_stay_on_the_stack() {
        let (analysis, _) = resolve("function f(a) { var x = a + 1; return x; }");
        let f = &analysis.functions[1];
        let x = f.var("x").unwrap();
        assert!(matches!(f.vars[x].storage, VarStorage::Local(0)));
        let a = f.var("a").unwrap();
        assert!(matches!(f.vars[a].storage, VarStorage::Arg(0)));
        assert!(!f.has_record());
    }

    #[test]
    fn captured_parameter_gets_a_prologue_copy() {
        let (analysis, _) = resolve(
            "function make(x) { return function() { return x; }; }",
        );
        let make = analysis
            .functions
            .iter()
            .find(|f| f.name == "make")
            .unwrap();
        assert_eq!(make.param_records, vec![(0, 0)]);
    }

    #[test]
    fn strict_assignment_to_eval_is_rejected() {
        let program = Parser::parse_program("\"use strict\"; eval = 1;").unwrap();
        let err = Resolver::resolve(&program, false, &|_| false).unwrap_err();
        assert_eq!(err.kind, AnalyzeErrorKind::Syntax);
    }

    #[test]
    fn strict_delete_of_variable_is_rejected() {
        let program = Parser::parse_program("\"use strict\"; var x; delete x;").unwrap();
        let err = Resolver::resolve(&program, false, &|_| false).unwrap_err();
        assert_eq!(err.kind, AnalyzeErrorKind::Syntax);
    }

    #[test]
    fn invalid_assignment_target_is_a_reference_error() {
        let program = Parser::parse_program("1 = 2;").unwrap();
        let err = Resolver::resolve(&program, false, &|_| false).unwrap_err();
        assert_eq!(err.kind, AnalyzeErrorKind::Reference);
    }

    #[test]
    fn record_depth_skips_recordless_functions() {
        let (analysis, _) = resolve(
            "function a() { var v = 1; function b() { function c() { return v; } return c; } return b; }",
        );
        let a_id = analysis
            .functions
            .iter()
            .position(|f| f.name == "a")
            .unwrap() as FuncId;
        let c_id = analysis
            .functions
            .iter()
            .position(|f| f.name == "c")
            .unwrap() as FuncId;
        // b owns no record, so from c the owner's record is one hop of zero
        // record-owning intermediates away.
        assert_eq!(analysis.record_depth(c_id, a_id), 0);
    }
}
