/// Type inference — the second half of the two-pass analyzer.
///
/// `result_type` is defined by structural induction over the expression
/// tree. Statements are processed in source order so variable types are
/// observed assignment by assignment: the first write fixes a variable's
/// type, a conflicting later write widens it (for globals that also raises
/// the collapse warning, since the property must be re-typed as "any" and
/// widening costs performance at every use site).
///
/// Constant folding rides along: literals, pure operators over folded
/// operands, and references to single-assignment variables produce entries
/// in the constants table, which the emitter uses both to elide dead
/// branches and to resolve reads at compile time.
use crate::ast::{
    BinaryOp, Expr, ExprKind, ForInTarget, ForInit, FuncId, FunctionLiteral, Literal, LogicalOp,
    Stmt, StmtKind, UnaryOp,
};
use crate::coerce;
use crate::engine::Engine;
use crate::errors::{Diagnostic, DiagnosticLevel, Span};
use crate::native;
use crate::property::PropertyStore;
use crate::prototype::PROTOTYPES;
use crate::scope::{Analysis, Binding, VarId};
use crate::types::{most_accurate_integer, StaticType};
use crate::value::{number_to_string, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub struct InferOutcome {
    pub warnings: Vec<Diagnostic>,
    /// Final observed type per global script variable; applied to the global
    /// prototype's properties before emission.
    pub global_types: HashMap<String, StaticType>,
}

pub fn infer_program(engine: &Engine, analysis: &mut Analysis, program: &[Stmt]) -> InferOutcome {
    let mut inferencer = Inferencer {
        engine,
        analysis,
        warnings: Vec::new(),
        global_types: HashMap::new(),
        fn_stack: vec![0],
    };
    for stmt in program {
        inferencer.infer_stmt(stmt);
    }
    InferOutcome {
        warnings: inferencer.warnings,
        global_types: inferencer.global_types,
    }
}

/// Two types merged at a join point.
pub fn unify(a: StaticType, b: StaticType) -> StaticType {
    if a == b {
        return a;
    }
    if let Some(int) = most_accurate_integer(a, b) {
        return int;
    }
    if a.is_numeric() && b.is_numeric() {
        return StaticType::F64;
    }
    if a.is_string_like() && b.is_string_like() {
        return StaticType::Rope;
    }
    StaticType::Any
}

struct Inferencer<'a> {
    engine: &'a Engine,
    analysis: &'a mut Analysis,
    warnings: Vec<Diagnostic>,
    global_types: HashMap<String, StaticType>,
    fn_stack: Vec<FuncId>,
}

impl<'a> Inferencer<'a> {
    fn current_fn(&self) -> FuncId {
        *self.fn_stack.last().unwrap()
    }

    // -- Statements ---------------------------------------------------------

    fn infer_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expr(e) | StmtKind::Throw(e) => {
                self.infer_expr(e);
            }
            StmtKind::VarDecl(decls) => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        let ty = self.infer_expr(init);
                        let constant = self.analysis.constants.get(&init.id).cloned();
                        self.observe_name_write(name, ty, constant, stmt.span);
                    }
                }
            }
            StmtKind::FunctionDecl(func) => {
                self.observe_name_write(
                    func.name.as_deref().unwrap_or(""),
                    StaticType::Function,
                    None,
                    stmt.span,
                );
                self.infer_function(func);
            }
            StmtKind::Block(body) => {
                for s in body {
                    self.infer_stmt(s);
                }
            }
            StmtKind::If { cond, then, other } => {
                self.infer_expr(cond);
                self.infer_stmt(then);
                if let Some(other) = other {
                    self.infer_stmt(other);
                }
            }
            StmtKind::While { cond, body } => {
                self.infer_expr(cond);
                self.infer_stmt(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.infer_stmt(body);
                self.infer_expr(cond);
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
                                let ty = self.infer_expr(init);
                                let constant = self.analysis.constants.get(&init.id).cloned();
                                self.observe_name_write(name, ty, constant, stmt.span);
                            }
                        }
                    }
                    Some(ForInit::Expr(e)) => {
                        self.infer_expr(e);
                    }
                    None => {}
                }
                if let Some(cond) = cond {
                    self.infer_expr(cond);
                }
                if let Some(update) = update {
                    self.infer_expr(update);
                }
                self.infer_stmt(body);
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => {
                self.infer_expr(object);
                match target {
                    ForInTarget::Var(name) => {
                        self.observe_name_write(name, StaticType::Str, None, stmt.span)
                    }
                    ForInTarget::Expr(e) => {
                        self.infer_expr(e);
                        self.observe_target_write(e, StaticType::Str);
                    }
                }
                self.infer_stmt(body);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.infer_expr(value);
                }
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => {
                for s in block {
                    self.infer_stmt(s);
                }
                if let Some(clause) = catch {
                    for s in &clause.body {
                        self.infer_stmt(s);
                    }
                }
                if let Some(finally) = finally {
                    for s in finally {
                        self.infer_stmt(s);
                    }
                }
            }
            StmtKind::With { object, body } => {
                self.infer_expr(object);
                self.infer_stmt(body);
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => {
                self.infer_expr(discriminant);
                for case in cases {
                    if let Some(test) = &case.test {
                        self.infer_expr(test);
                    }
                    for s in &case.body {
                        self.infer_stmt(s);
                    }
                }
            }
            StmtKind::Labeled { body, .. } => self.infer_stmt(body),
            StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Debugger | StmtKind::Empty => {}
        }
    }

    fn infer_function(&mut self, func: &FunctionLiteral) {
        let id = self.analysis.fn_of_literal[&func.id];
        self.fn_stack.push(id);
        for stmt in &func.body {
            self.infer_stmt(stmt);
        }
        self.fn_stack.pop();
    }

    // -- Variable observation -----------------------------------------------

    fn observe_name_write(
        &mut self,
        name: &str,
        observed: StaticType,
        constant: Option<Value>,
        span: Span,
    ) {
        // Walk the same chain the resolver bound through.
        let fid = self.current_fn();
        if fid != 0 {
            let mut current = Some(fid);
            while let Some(f) = current {
                if f == 0 {
                    break;
                }
                if let Some(index) = self.analysis.functions[f as usize].var(name) {
                    self.observe_var_write(VarId { func: f, index }, observed, constant);
                    return;
                }
                current = self.analysis.functions[f as usize].parent;
            }
        }
        self.observe_global_write(name, observed, span);
    }

    fn observe_var_write(&mut self, id: VarId, observed: StaticType, constant: Option<Value>) {
        let var = self.analysis.var_mut(id);
        match var.ty {
            None => {
                var.ty = Some(observed);
                if var.assignments == 1 && !var.hoisted {
                    var.constant = constant;
                }
            }
            Some(existing) if existing == observed => {
                if var.assignments > 1 {
                    var.constant = None;
                }
            }
            Some(existing) => {
                var.ty = Some(unify(existing, observed));
                var.constant = None;
            }
        }
    }

    fn observe_global_write(&mut self, name: &str, observed: StaticType, span: Span) {
        match self.global_types.get(name).copied() {
            None => {
                self.global_types.insert(name.to_string(), observed);
            }
            Some(existing) if existing == observed || existing == StaticType::Any => {}
            Some(existing) => {
                // Widening inside one category (int widths, string/rope) is
                // silent; crossing categories collapses the property to
                // "any" and that is worth telling the user about.
                let unified = unify(existing, observed);
                if unified == StaticType::Any && self.engine.options().collapse_warnings {
                    self.warnings.push(Diagnostic {
                        level: DiagnosticLevel::Warning,
                        message: format!(
                            "global '{}' changed type from {:?} to {:?}; re-typed as any, which costs performance",
                            name, existing, observed
                        ),
                        span,
                    });
                }
                self.global_types.insert(name.to_string(), unified);
            }
        }
    }

    fn observe_target_write(&mut self, target: &Expr, observed: StaticType) {
        if let ExprKind::Name(_) = &target.kind {
            match self.analysis.bindings.get(&target.id).cloned() {
                Some(Binding::Var(id)) => self.observe_var_write(id, observed, None),
                Some(Binding::Global(name)) => {
                    self.observe_global_write(&name, observed, target.span)
                }
                Some(Binding::WithFallback(_, inner)) => {
                    if let Binding::Var(id) = *inner {
                        self.observe_var_write(id, observed, None);
                    }
                }
                _ => {}
            }
        }
    }

    // -- Expressions --------------------------------------------------------

    fn record(&mut self, expr: &Expr, ty: StaticType) -> StaticType {
        self.analysis.types.insert(expr.id, ty);
        ty
    }

    fn fold(&mut self, expr: &Expr, value: Value) {
        self.analysis.constants.insert(expr.id, value);
    }

    fn folded(&self, expr: &Expr) -> Option<Value> {
        self.analysis.constants.get(&expr.id).cloned()
    }

    fn infer_expr(&mut self, expr: &Expr) -> StaticType {
        let ty = match &expr.kind {
            ExprKind::Literal(lit) => self.infer_literal(expr, lit),
            ExprKind::This => {
                if self.current_fn() == 0 {
                    StaticType::Object(Some(self.engine.global_proto()))
                } else {
                    StaticType::Any
                }
            }
            ExprKind::Name(_) => self.infer_name(expr),
            ExprKind::ArrayLit(items) => {
                for item in items.iter().flatten() {
                    self.infer_expr(item);
                }
                StaticType::Object(Some(self.engine.array_proto()))
            }
            ExprKind::ObjectLit(entries) => {
                for entry in entries {
                    match &entry.kind {
                        crate::ast::ObjectEntryKind::Data(v) => {
                            self.infer_expr(v);
                        }
                        crate::ast::ObjectEntryKind::Getter(f)
                        | crate::ast::ObjectEntryKind::Setter(f) => self.infer_function(f),
                    }
                }
                StaticType::Object(Some(self.engine.object_proto()))
            }
            ExprKind::Member { object, name } => {
                let obj_ty = self.infer_expr(object);
                self.member_type(obj_ty, name)
            }
            ExprKind::Index { object, index } => {
                self.infer_expr(object);
                self.infer_expr(index);
                StaticType::Any
            }
            ExprKind::Call { callee, args } => {
                let _ = self.infer_expr(callee);
                for arg in args {
                    self.infer_expr(arg);
                }
                self.call_return_type(callee)
            }
            ExprKind::New { callee, args } => {
                self.infer_expr(callee);
                for arg in args {
                    self.infer_expr(arg);
                }
                StaticType::Object(None)
            }
            ExprKind::Unary { op, operand } => self.infer_unary(expr, *op, operand),
            ExprKind::Prefix { target, .. } | ExprKind::Postfix { target, .. } => {
                let target_ty = self.infer_expr(target);
                let result = if target_ty.is_integer() {
                    target_ty
                } else {
                    StaticType::F64
                };
                self.observe_target_write(target, result);
                result
            }
            ExprKind::Binary { op, left, right } => self.infer_binary(expr, *op, left, right),
            ExprKind::Logical { op, left, right } => self.infer_logical(expr, *op, left, right),
            ExprKind::Ternary { cond, then, other } => {
                let _ = self.infer_expr(cond);
                // A statically-known condition analyzes only the taken
                // branch: looking at the dead branch would pessimize the
                // types of every variable it mentions.
                match self.folded(cond).map(|c| coerce::to_boolean(&c)) {
                    Some(true) => {
                        let ty = self.infer_expr(then);
                        if let Some(v) = self.folded(then) {
                            self.fold(expr, v);
                        }
                        ty
                    }
                    Some(false) => {
                        let ty = self.infer_expr(other);
                        if let Some(v) = self.folded(other) {
                            self.fold(expr, v);
                        }
                        ty
                    }
                    None => {
                        let t = self.infer_expr(then);
                        let o = self.infer_expr(other);
                        self.join_branches(t, o, expr.span)
                    }
                }
            }
            ExprKind::Assign { op, target, value } => {
                let rhs = self.infer_expr(value);
                let result = match op {
                    None => rhs,
                    Some(base) => {
                        let lhs = self.infer_expr(target);
                        self.binary_result(*base, lhs, rhs)
                    }
                };
                let _ = self.infer_expr(target);
                let constant = if op.is_none() {
                    self.folded(value)
                } else {
                    None
                };
                if let ExprKind::Name(_) = target.kind {
                    match self.analysis.bindings.get(&target.id).cloned() {
                        Some(Binding::Var(id)) => self.observe_var_write(id, result, constant),
                        Some(Binding::Global(name)) => {
                            self.observe_global_write(&name, result, target.span)
                        }
                        Some(Binding::WithFallback(_, inner)) => {
                            if let Binding::Var(id) = *inner {
                                self.observe_var_write(id, result, None);
                            }
                        }
                        _ => {}
                    }
                }
                result
            }
            ExprKind::Comma(items) => {
                let mut last = StaticType::Undefined;
                for item in items {
                    last = self.infer_expr(item);
                }
                if let Some(tail) = items.last() {
                    if let Some(v) = self.folded(tail) {
                        self.fold(expr, v);
                    }
                }
                last
            }
            ExprKind::Function(func) => {
                self.infer_function(func);
                StaticType::Function
            }
        };
        self.record(expr, ty)
    }

    fn infer_literal(&mut self, expr: &Expr, lit: &Literal) -> StaticType {
        match lit {
            Literal::Null => {
                self.fold(expr, Value::Null);
                StaticType::Null
            }
            Literal::Bool(b) => {
                self.fold(expr, Value::Bool(*b));
                StaticType::Bool
            }
            Literal::Number(n) => {
                // An integral literal participates in integer inference.
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    self.fold(expr, Value::Int(*n as i64));
                    StaticType::I32
                } else {
                    self.fold(expr, Value::Number(*n));
                    StaticType::F64
                }
            }
            Literal::Str(s) => {
                self.fold(expr, Value::str(s));
                StaticType::Str
            }
            Literal::Regex { .. } => StaticType::Object(Some(self.engine.regexp_proto())),
        }
    }

    fn infer_name(&mut self, expr: &Expr) -> StaticType {
        match self.analysis.bindings.get(&expr.id).cloned() {
            Some(Binding::Var(id)) => {
                let var = self.analysis.var(id);
                let ty = var.static_type();
                if let Some(constant) = var.constant.clone() {
                    self.fold(expr, constant);
                }
                ty
            }
            Some(Binding::Global(name)) => {
                if let Some(ty) = self.global_types.get(&name) {
                    return *ty;
                }
                match PROTOTYPES.find_property(self.engine.global_proto(), &name) {
                    Some((_, prop)) => {
                        if let Some(constant) = prop.constant.clone() {
                            self.fold(expr, constant);
                        }
                        prop.static_type
                    }
                    None => StaticType::Undefined,
                }
            }
            Some(Binding::Dynamic(_)) | Some(Binding::WithFallback(_, _)) => StaticType::Any,
            None => StaticType::Undefined,
        }
    }

    fn infer_unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> StaticType {
        let operand_ty = self.infer_expr(operand);
        let folded = self.folded(operand);
        match op {
            UnaryOp::Plus => {
                if let Some(Value::Int(i)) = folded {
                    self.fold(expr, Value::Int(i));
                } else if let Some(v) = folded {
                    if let Some(n) = v.as_number() {
                        self.fold(expr, Value::Number(n));
                    }
                }
                if operand_ty.is_integer() {
                    operand_ty
                } else {
                    StaticType::F64
                }
            }
            UnaryOp::Minus => {
                match folded {
                    // -0 must stay a double to keep its sign bit.
                    Some(Value::Int(0)) => self.fold(expr, Value::Number(-0.0)),
                    Some(Value::Int(i)) => self.fold(expr, Value::Int(-i)),
                    Some(Value::Number(n)) => self.fold(expr, Value::Number(-n)),
                    _ => {}
                }
                if operand_ty.is_integer() {
                    StaticType::I32
                } else {
                    StaticType::F64
                }
            }
            UnaryOp::Not => {
                if let Some(v) = folded {
                    self.fold(expr, Value::Bool(!coerce::to_boolean(&v)));
                }
                StaticType::Bool
            }
            UnaryOp::BitNot => {
                if let Some(n) = folded.and_then(|v| v.as_number()) {
                    self.fold(expr, Value::Int(!coerce::double_to_int32(n) as i64));
                }
                StaticType::I32
            }
            UnaryOp::TypeOf => StaticType::Str,
            UnaryOp::Void => {
                self.fold(expr, Value::Undefined);
                StaticType::Undefined
            }
            UnaryOp::Delete => StaticType::Bool,
        }
    }

    fn binary_result(&self, op: BinaryOp, lhs: StaticType, rhs: StaticType) -> StaticType {
        match op {
            BinaryOp::Add => {
                if lhs.is_string_like() || rhs.is_string_like() {
                    StaticType::Rope
                } else if let Some(int) = most_accurate_integer(lhs, rhs) {
                    int
                } else if lhs.is_numeric() && rhs.is_numeric() {
                    StaticType::F64
                } else if lhs.is_object_like()
                    || rhs.is_object_like()
                    || lhs == StaticType::Any
                    || rhs == StaticType::Any
                {
                    StaticType::Any
                } else {
                    StaticType::F64
                }
            }
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => StaticType::F64,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                StaticType::I32
            }
            BinaryOp::Ushr => StaticType::F64,
            _ => StaticType::Bool,
        }
    }

    fn infer_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> StaticType {
        let lhs = self.infer_expr(left);
        let rhs = self.infer_expr(right);
        let result = self.binary_result(op, lhs, rhs);
        if let (Some(a), Some(b)) = (self.folded(left), self.folded(right)) {
            if let Some(v) = fold_binary(op, &a, &b) {
                self.fold(expr, v);
            }
        }
        result
    }

    fn infer_logical(
        &mut self,
        expr: &Expr,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
    ) -> StaticType {
        let lhs = self.infer_expr(left);
        if let Some(lv) = self.folded(left) {
            let truthy = coerce::to_boolean(&lv);
            let take_right = match op {
                LogicalOp::And => truthy,
                LogicalOp::Or => !truthy,
            };
            return if take_right {
                let ty = self.infer_expr(right);
                if let Some(v) = self.folded(right) {
                    self.fold(expr, v);
                }
                ty
            } else {
                self.fold(expr, lv);
                lhs
            };
        }
        let rhs = self.infer_expr(right);
        self.join_branches(lhs, rhs, expr.span)
    }

    /// Join rule shared by `&&`/`||` and the ternary: same type wins, two
    /// numerics make a double, anything else becomes "any" with a
    /// disambiguation hint.
    fn join_branches(&mut self, a: StaticType, b: StaticType, span: Span) -> StaticType {
        if a == b {
            return a;
        }
        if let Some(int) = most_accurate_integer(a, b) {
            return int;
        }
        if a.is_numeric() && b.is_numeric() {
            return StaticType::F64;
        }
        self.warnings.push(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!(
                "branch types {:?} and {:?} differ; the result is treated as any",
                a, b
            ),
            span,
        });
        StaticType::Any
    }

    fn member_type(&mut self, object: StaticType, name: &str) -> StaticType {
        let proto = match self.engine.proto_for_static(object) {
            Some(p) => p,
            None => return StaticType::Any,
        };
        match PROTOTYPES.find_property(proto, name) {
            Some((_, prop)) => prop.static_type,
            None => StaticType::Any,
        }
    }

    /// Return type of a call: a member access on a statically-known
    /// prototype resolves to the native method's declared return (the union
    /// over a group, "any" when the union is non-trivial); anything else is
    /// "any".
    fn call_return_type(&mut self, callee: &Expr) -> StaticType {
        if let ExprKind::Member { object, name } = &callee.kind {
            let object_ty = self
                .analysis
                .types
                .get(&object.id)
                .copied()
                .unwrap_or(StaticType::Any);
            if let Some(proto) = self.engine.proto_for_static(object_ty) {
                if let Some((_, prop)) = PROTOTYPES.find_property(proto, name) {
                    match &prop.store {
                        PropertyStore::NativeMethod(id) => return native::method(*id).returns,
                        PropertyStore::MethodGroup(ids) => {
                            let mut ret = None;
                            for id in ids {
                                let r = native::method(*id).returns;
                                ret = Some(match ret {
                                    None => r,
                                    Some(prev) if prev == r => r,
                                    Some(_) => return StaticType::Any,
                                });
                            }
                            return ret.unwrap_or(StaticType::Any);
                        }
                        _ => {}
                    }
                }
            }
        }
        StaticType::Any
    }
}

// ---------------------------------------------------------------------------
// Constant folding
// ---------------------------------------------------------------------------

/// Engine-free folding of a binary operator over two constants. Anything
/// that would need the runtime (object operands) stays unfolded.
pub fn fold_binary(op: BinaryOp, a: &Value, b: &Value) -> Option<Value> {
    match op {
        BinaryOp::Add => {
            if a.is_string_like() || b.is_string_like() {
                let left = fold_to_string(a)?;
                let right = fold_to_string(b)?;
                return Some(Value::Str(Arc::from(format!("{}{}", left, right).as_str())));
            }
            if let (Value::Int(x), Value::Int(y)) = (a, b) {
                if let Some(sum) = x.checked_add(*y) {
                    return Some(Value::Int(sum));
                }
            }
            Some(Value::Number(fold_to_number(a)? + fold_to_number(b)?))
        }
        BinaryOp::Sub => Some(Value::Number(fold_to_number(a)? - fold_to_number(b)?)),
        BinaryOp::Mul => Some(Value::Number(fold_to_number(a)? * fold_to_number(b)?)),
        BinaryOp::Div => Some(Value::Number(fold_to_number(a)? / fold_to_number(b)?)),
        BinaryOp::Mod => {
            let (x, y) = (fold_to_number(a)?, fold_to_number(b)?);
            Some(Value::Number(x % y))
        }
        BinaryOp::Shl => {
            let x = coerce::double_to_int32(fold_to_number(a)?);
            let shift = coerce::double_to_int32(fold_to_number(b)?) as u32 & 31;
            Some(Value::Int((x << shift) as i64))
        }
        BinaryOp::Shr => {
            let x = coerce::double_to_int32(fold_to_number(a)?);
            let shift = coerce::double_to_int32(fold_to_number(b)?) as u32 & 31;
            Some(Value::Int((x >> shift) as i64))
        }
        BinaryOp::Ushr => {
            let x = coerce::double_to_int32(fold_to_number(a)?) as u32;
            let shift = coerce::double_to_int32(fold_to_number(b)?) as u32 & 31;
            Some(Value::Number((x >> shift) as f64))
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            let x = coerce::double_to_int32(fold_to_number(a)?);
            let y = coerce::double_to_int32(fold_to_number(b)?);
            let r = match op {
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                _ => x ^ y,
            };
            Some(Value::Int(r as i64))
        }
        BinaryOp::StrictEq => Some(Value::Bool(coerce::strict_equals(a, b))),
        BinaryOp::StrictNe => Some(Value::Bool(!coerce::strict_equals(a, b))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            // Fold only primitive comparisons both sides agree on.
            if a.is_numeric() && b.is_numeric() {
                let (x, y) = (a.as_number().unwrap(), b.as_number().unwrap());
                if x.is_nan() || y.is_nan() {
                    return Some(Value::Bool(false));
                }
                let r = match op {
                    BinaryOp::Lt => x < y,
                    BinaryOp::Le => x <= y,
                    BinaryOp::Gt => x > y,
                    _ => x >= y,
                };
                return Some(Value::Bool(r));
            }
            None
        }
        _ => None,
    }
}

fn fold_to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::Undefined => Some(f64::NAN),
        Value::Str(s) => Some(coerce::string_to_number(s)),
        _ => None,
    }
}

fn fold_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Str(s) => Some(s.to_string()),
        Value::Rope(r) => Some(r.flatten().to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Number(n) => Some(number_to_string(*n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some("null".to_string()),
        Value::Undefined => Some("undefined".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unify_prefers_width_then_double_then_any() {
        assert_eq!(unify(StaticType::I32, StaticType::I32), StaticType::I32);
        assert_eq!(unify(StaticType::I8, StaticType::I32), StaticType::I32);
        assert_eq!(unify(StaticType::I32, StaticType::F64), StaticType::F64);
        assert_eq!(unify(StaticType::Str, StaticType::Rope), StaticType::Rope);
        assert_eq!(unify(StaticType::I32, StaticType::Str), StaticType::Any);
    }

    #[test]
    fn fold_add_concatenates_strings() {
        let v = fold_binary(BinaryOp::Add, &Value::str("5"), &Value::Int(3)).unwrap();
        assert_eq!(&*v.as_string().unwrap(), "53");
    }

    #[test]
    fn fold_add_keeps_integers() {
        let v = fold_binary(BinaryOp::Add, &Value::Int(5), &Value::Int(3)).unwrap();
        assert!(matches!(v, Value::Int(8)));
    }

    #[test]
    fn fold_comparison_handles_nan() {
        let v = fold_binary(
            BinaryOp::Lt,
            &Value::Number(f64::NAN),
            &Value::Number(1.0),
        )
        .unwrap();
        assert!(matches!(v, Value::Bool(false)));
    }
}
