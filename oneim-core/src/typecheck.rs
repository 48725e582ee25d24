//! Semantic analysis for 1im.
//!
//! The analyzer is a checker, not a transformer: it walks the AST, enforces
//! the typing, scoping and control-flow rules, and leaves the tree alone.
//! Its one product is the function signature table, with every omitted
//! return type resolved by a single inference pass so the code generator
//! never infers anything itself.
//!
//! Untyped numeric literals are tracked as placeholder kinds and resolved
//! against the concrete type each context expects, falling back to `i32` /
//! `f64` when no expectation exists.

use std::collections::HashMap;

use bumpalo::Bump;

use crate::ast::{BinaryOp, Expr, Param, Program, Stmt, UnaryOp};
use crate::error::CoreError;
use crate::types::Type;

/// A resolved function signature: parameters plus the concrete return type
/// (`Type::Void` when the function returns nothing).
#[derive(Debug, Clone, Copy)]
pub struct Signature<'a> {
    pub params: &'a [Param<'a>],
    pub ret: Type<'a>,
}

/// The signature table handed to the code generator.
#[derive(Debug, Default)]
pub struct Signatures<'a> {
    map: HashMap<&'a str, Signature<'a>>,
}

impl<'a> Signatures<'a> {
    pub fn get(&self, name: &str) -> Option<&Signature<'a>> {
        self.map.get(name)
    }
}

pub fn analyze<'a>(arena: &'a Bump, program: &Program<'a>) -> Result<Signatures<'a>, CoreError> {
    let mut analyzer = Analyzer {
        arena,
        sigs: HashMap::new(),
        scopes: vec![HashMap::new()],
        loop_depth: 0,
        current_ret: None,
        infer: None,
    };
    analyzer.collect_signatures(program)?;
    analyzer.infer_missing_returns(program)?;
    analyzer.check_program(program)?;

    let map = analyzer
        .sigs
        .into_iter()
        .map(|(name, sig)| {
            let ret = sig.ret.unwrap_or(Type::Void);
            (name, Signature { params: sig.params, ret })
        })
        .collect();
    Ok(Signatures { map })
}

/// Expression pseudo-type: a concrete type, or one of the untyped literal
/// placeholders pending unification. `null` carries no type of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueTy<'a> {
    Concrete(Type<'a>),
    IntLit,
    FloatLit,
    Null,
}

struct PendingSig<'a> {
    params: &'a [Param<'a>],
    ret: Option<Type<'a>>,
}

struct InferState<'a> {
    name: &'a str,
    found: Option<Type<'a>>,
    saw_bare: bool,
}

struct Analyzer<'a> {
    arena: &'a Bump,
    sigs: HashMap<&'a str, PendingSig<'a>>,
    scopes: Vec<HashMap<&'a str, Type<'a>>>,
    loop_depth: u32,
    /// Return type of the function being checked; `None` at top level.
    current_ret: Option<Type<'a>>,
    /// Present while inferring an omitted return type.
    infer: Option<InferState<'a>>,
}

fn sem(message: impl Into<String>) -> CoreError {
    CoreError::Semantic(message.into())
}

impl<'a> Analyzer<'a> {
    // ------------------------------------------------------------------
    // Signature collection and return-type inference
    // ------------------------------------------------------------------

    fn collect_signatures(&mut self, program: &Program<'a>) -> Result<(), CoreError> {
        for stmt in program.stmts {
            let Stmt::FunctionDef {
                name,
                params,
                return_type,
                body: _,
            } = *stmt
            else {
                continue;
            };
            if matches!(name, "print" | "len") {
                return Err(sem(format!("'{name}' is a built-in function")));
            }
            if self.sigs.contains_key(name) {
                return Err(sem(format!("duplicate function '{name}'")));
            }
            let mut seen = Vec::new();
            for param in params {
                if seen.contains(&param.name) {
                    return Err(sem(format!(
                        "duplicate parameter '{}' in function '{name}'",
                        param.name
                    )));
                }
                seen.push(param.name);
                if matches!(param.ty, Type::Void) {
                    return Err(sem(format!(
                        "parameter '{}' of '{name}' cannot be void",
                        param.name
                    )));
                }
                param.ty.validate().map_err(sem)?;
            }
            if let Some(ret) = return_type {
                ret.validate().map_err(sem)?;
            }
            if name == "main" && !params.is_empty() {
                return Err(sem("main does not take parameters"));
            }
            self.sigs.insert(
                name,
                PendingSig {
                    params,
                    ret: return_type,
                },
            );
        }
        Ok(())
    }

    /// Infer omitted return types in source order by unifying all
    /// `return <expr>` sites of each body. A call into a later unannotated
    /// function is an error: its type is not known yet.
    fn infer_missing_returns(&mut self, program: &Program<'a>) -> Result<(), CoreError> {
        for stmt in program.stmts {
            let Stmt::FunctionDef {
                name,
                params,
                return_type: None,
                body,
            } = *stmt
            else {
                continue;
            };
            let saved_scopes = std::mem::replace(&mut self.scopes, vec![param_scope(params)]);
            self.infer = Some(InferState {
                name,
                found: None,
                saw_bare: false,
            });
            let walk = self.check_body(body);
            let state = self.infer.take().expect("inference state present");
            self.scopes = saved_scopes;
            walk?;

            if state.saw_bare && state.found.is_some() {
                return Err(sem(format!(
                    "function '{name}' mixes bare returns with value returns"
                )));
            }
            let ret = state.found.unwrap_or(Type::Void);
            self.sigs
                .get_mut(name)
                .expect("signature registered")
                .ret = Some(ret);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Program and statement checking
    // ------------------------------------------------------------------

    fn check_program(&mut self, program: &Program<'a>) -> Result<(), CoreError> {
        if let Some(main) = self.sigs.get("main") {
            let ret = main.ret.unwrap_or(Type::Void);
            if !matches!(ret, Type::Void) && !ret.is_integer() {
                return Err(sem(format!(
                    "main must return void or an integer type, not {ret}"
                )));
            }
            // With an explicit main there is nowhere for loose top-level
            // statements to run.
            if program
                .stmts
                .iter()
                .any(|stmt| !matches!(stmt, Stmt::FunctionDef { .. }))
            {
                return Err(sem(
                    "top-level statements are not allowed when main is defined",
                ));
            }
        }
        for stmt in program.stmts {
            match *stmt {
                Stmt::FunctionDef { name, params, body, .. } => {
                    self.check_function(name, params, body)?;
                }
                _ => self.check_stmt(stmt)?,
            }
        }
        Ok(())
    }

    fn check_function(
        &mut self,
        name: &'a str,
        params: &'a [Param<'a>],
        body: &'a [Stmt<'a>],
    ) -> Result<(), CoreError> {
        let ret = self
            .sigs
            .get(name)
            .and_then(|sig| sig.ret)
            .unwrap_or(Type::Void);
        // Top-level statements become locals of the synthesized main, so a
        // function body must not see them: swap in a fresh scope chain.
        let saved_scopes = std::mem::replace(&mut self.scopes, vec![param_scope(params)]);
        let saved_ret = self.current_ret.replace(ret);
        let saved_depth = std::mem::replace(&mut self.loop_depth, 0);
        let result = self.check_body(body);
        self.scopes = saved_scopes;
        self.current_ret = saved_ret;
        self.loop_depth = saved_depth;
        result?;

        if !matches!(ret, Type::Void) && !covers_return(body) {
            return Err(sem(format!(
                "function '{name}' may finish without returning a value"
            )));
        }
        Ok(())
    }

    fn check_body(&mut self, body: &'a [Stmt<'a>]) -> Result<(), CoreError> {
        for stmt in body {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn check_scoped_body(&mut self, body: &'a [Stmt<'a>]) -> Result<(), CoreError> {
        self.scopes.push(HashMap::new());
        let result = self.check_body(body);
        self.scopes.pop();
        result
    }

    fn check_stmt(&mut self, stmt: &'a Stmt<'a>) -> Result<(), CoreError> {
        match *stmt {
            Stmt::SetAssign { name, value } => self.check_set_assign(name, &value),
            Stmt::TypedAssign { name, ty, value } => self.check_typed_assign(name, ty, &value),
            Stmt::IndexAssign { target, value } => {
                let elem = self.type_expr(&target, false)?;
                let ValueTy::Concrete(elem) = elem else {
                    return Err(sem("index assignment target must be an element"));
                };
                self.check_expected(&value, elem, false)
            }
            Stmt::FunctionDef { name, .. } => Err(sem(format!(
                "function '{name}' may only be defined at the top level"
            ))),
            Stmt::Return { value } => self.check_return(value),
            Stmt::If {
                condition,
                then_body,
                else_ifs,
                else_body,
            } => {
                self.check_bool(&condition, "if condition")?;
                self.check_scoped_body(then_body)?;
                for else_if in else_ifs {
                    self.check_bool(&else_if.condition, "if condition")?;
                    self.check_scoped_body(else_if.body)?;
                }
                if let Some(else_body) = else_body {
                    self.check_scoped_body(else_body)?;
                }
                Ok(())
            }
            Stmt::While {
                condition,
                body,
                parallel,
            } => {
                if parallel {
                    return Err(sem("'parallel' cannot apply to a while loop"));
                }
                self.check_bool(&condition, "while condition")?;
                self.loop_depth += 1;
                let result = self.check_scoped_body(body);
                self.loop_depth -= 1;
                result
            }
            Stmt::For {
                variable,
                iterable,
                body,
                ..
            } => self.check_for(variable, &iterable, body),
            Stmt::ParallelBlock { body } => self.check_parallel_block(body),
            Stmt::Break { value } => {
                if self.loop_depth == 0 {
                    return Err(sem("'break' outside of a loop"));
                }
                if value.is_some() {
                    return Err(sem("break with a value is not allowed"));
                }
                Ok(())
            }
            Stmt::Continue => {
                if self.loop_depth == 0 {
                    return Err(sem("'continue' outside of a loop"));
                }
                Ok(())
            }
            Stmt::TryCatch {
                try_expr,
                catch_var,
                catch_body,
            } => {
                let vt = self.type_expr(&try_expr, false)?;
                let ValueTy::Concrete(Type::ErrorUnion { err, .. }) = vt else {
                    return Err(sem(format!(
                        "try requires an error-union value, found {}",
                        describe(vt)
                    )));
                };
                if let Some(var) = catch_var {
                    if self.lookup(var).is_some() {
                        return Err(sem(format!("'{var}' is already declared")));
                    }
                }
                self.scopes.push(HashMap::new());
                if let Some(var) = catch_var {
                    self.declare(var, *err);
                }
                let result = self.check_body(catch_body);
                self.scopes.pop();
                result
            }
            Stmt::Expr(expr) => {
                self.type_expr(&expr, true)?;
                Ok(())
            }
        }
    }

    /// `set N to E` declares when `N` is not visible anywhere, reassigns
    /// when it is. Arrays are element-assignable only; an error-union
    /// variable accepts values of either side and is rewrapped in codegen.
    fn check_set_assign(&mut self, name: &'a str, value: &Expr<'a>) -> Result<(), CoreError> {
        if let Some(declared) = self.lookup(name) {
            if matches!(declared, Type::Array { .. }) {
                return Err(sem(format!(
                    "array variable '{name}' cannot be reassigned; assign its elements instead"
                )));
            }
            let vt = self.type_expr(value, true)?;
            let ok = if matches!(declared, Type::ErrorUnion { .. }) {
                fits_union_or_side(vt, declared)
            } else {
                fits(vt, declared)
            };
            if !ok {
                return Err(sem(format!(
                    "cannot assign {} to '{name}' of type {declared}",
                    describe(vt)
                )));
            }
            Ok(())
        } else {
            let vt = self.type_expr(value, true)?;
            let ty = self.default_ty(vt)?;
            if matches!(ty, Type::Void) {
                return Err(sem(format!("cannot declare '{name}' with a void value")));
            }
            self.declare(name, ty);
            Ok(())
        }
    }

    /// `set N as T to E` always declares.
    fn check_typed_assign(
        &mut self,
        name: &'a str,
        ty: Type<'a>,
        value: &Expr<'a>,
    ) -> Result<(), CoreError> {
        ty.validate().map_err(sem)?;
        if matches!(ty, Type::Void) {
            return Err(sem(format!("cannot declare '{name}' as void")));
        }
        if self.lookup(name).is_some() {
            return Err(sem(format!("'{name}' is already declared")));
        }
        match ty {
            // A slice accepts a slice value, an array value, or an array
            // literal; codegen materialises the backing storage.
            Type::Slice { elem } if !matches!(value, Expr::ArrayLiteral(_)) => {
                let vt = self.type_expr(value, true)?;
                let ok = match vt {
                    ValueTy::Concrete(t) => {
                        t == ty || matches!(t, Type::Array { elem: ae, .. } if ae == elem)
                    }
                    _ => false,
                };
                if !ok {
                    return Err(sem(format!(
                        "cannot assign {} to '{name}' of type {ty}",
                        describe(vt)
                    )));
                }
            }
            Type::ErrorUnion { .. } => {
                let vt = self.type_expr(value, true)?;
                if !fits_union_or_side(vt, ty) {
                    return Err(sem(format!(
                        "cannot assign {} to '{name}' of type {ty}",
                        describe(vt)
                    )));
                }
            }
            _ => self.check_expected(value, ty, true)?,
        }
        self.declare(name, ty);
        Ok(())
    }

    fn check_return(&mut self, value: Option<Expr<'a>>) -> Result<(), CoreError> {
        if self.infer.is_some() {
            match value {
                None => {
                    if let Some(state) = self.infer.as_mut() {
                        state.saw_bare = true;
                    }
                }
                Some(expr) => {
                    let vt = self.type_expr(&expr, true)?;
                    let ty = self.default_ty(vt)?;
                    let state = self.infer.as_mut().expect("inference state present");
                    match state.found {
                        None => state.found = Some(ty),
                        Some(prev) if prev == ty => {}
                        Some(prev) => {
                            let name = state.name;
                            return Err(sem(format!(
                                "conflicting return types in function '{name}': {prev} and {ty}"
                            )));
                        }
                    }
                }
            }
            return Ok(());
        }

        let Some(ret) = self.current_ret else {
            return Err(sem("'return' outside of a function"));
        };
        match value {
            None => {
                if !matches!(ret, Type::Void) {
                    return Err(sem(format!(
                        "function returns {ret} but this return has no value"
                    )));
                }
                Ok(())
            }
            Some(expr) => {
                if matches!(ret, Type::Void) {
                    return Err(sem("void function cannot return a value"));
                }
                if matches!(ret, Type::ErrorUnion { .. }) {
                    // Returning the error side is how a function fails;
                    // codegen picks the `_ok` / `_err` constructor from the
                    // value's type.
                    let vt = self.type_expr(&expr, true)?;
                    if !fits_union_or_side(vt, ret) {
                        return Err(sem(format!(
                            "cannot return {} from a function returning {ret}",
                            describe(vt)
                        )));
                    }
                    Ok(())
                } else {
                    self.check_expected(&expr, ret, true)
                }
            }
        }
    }

    fn check_for(
        &mut self,
        variable: &'a str,
        iterable: &Expr<'a>,
        body: &'a [Stmt<'a>],
    ) -> Result<(), CoreError> {
        if self.lookup(variable).is_some() {
            return Err(sem(format!("'{variable}' is already declared")));
        }
        let var_ty = match *iterable {
            Expr::Range { start, end, .. } => {
                let s = self.type_expr(start, false)?;
                let e = self.type_expr(end, false)?;
                self.range_endpoint_type(s, e)?
            }
            _ => {
                let vt = self.type_expr(iterable, false)?;
                match vt {
                    ValueTy::Concrete(Type::Array { elem, .. })
                    | ValueTy::Concrete(Type::Slice { elem }) => *elem,
                    other => {
                        return Err(sem(format!(
                            "for can only iterate a range, array, or slice, found {}",
                            describe(other)
                        )));
                    }
                }
            }
        };
        self.scopes.push(HashMap::new());
        self.declare(variable, var_ty);
        self.loop_depth += 1;
        let result = self.check_body(body);
        self.loop_depth -= 1;
        self.scopes.pop();
        result
    }

    /// Range endpoints must be integers of one concrete type; untyped
    /// literals default to `i32`.
    fn range_endpoint_type(
        &self,
        start: ValueTy<'a>,
        end: ValueTy<'a>,
    ) -> Result<Type<'a>, CoreError> {
        let ty = match (start, end) {
            (ValueTy::IntLit, ValueTy::IntLit) => Type::I32,
            (ValueTy::IntLit, ValueTy::Concrete(t)) | (ValueTy::Concrete(t), ValueTy::IntLit)
                if t.is_integer() =>
            {
                t
            }
            (ValueTy::Concrete(a), ValueTy::Concrete(b)) if a == b && a.is_integer() => a,
            _ => {
                return Err(sem(format!(
                    "range endpoints must be integers of the same type, found {} and {}",
                    describe(start),
                    describe(end)
                )));
            }
        };
        Ok(ty)
    }

    /// Parallel blocks admit only zero-argument calls to defined functions.
    fn check_parallel_block(&mut self, body: &'a [Stmt<'a>]) -> Result<(), CoreError> {
        for stmt in body {
            let Stmt::Expr(Expr::Call { callee, args }) = *stmt else {
                return Err(sem(
                    "parallel blocks may only contain function calls",
                ));
            };
            if !args.is_empty() {
                return Err(sem(
                    "parallel blocks may only contain calls to zero-argument functions",
                ));
            }
            let Some(sig) = self.sigs.get(callee) else {
                return Err(sem(format!(
                    "parallel blocks may only call defined functions, '{callee}' is not one"
                )));
            };
            if !sig.params.is_empty() {
                return Err(sem(
                    "parallel blocks may only contain calls to zero-argument functions",
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expression typing
    // ------------------------------------------------------------------

    /// Type an expression. `try_allowed` is set only at the positions that
    /// may carry a `try`: assignment values, return values, and expression
    /// statements; it never propagates into subexpressions.
    fn type_expr(&mut self, expr: &Expr<'a>, try_allowed: bool) -> Result<ValueTy<'a>, CoreError> {
        match *expr {
            Expr::IntLiteral(_) => Ok(ValueTy::IntLit),
            Expr::FloatLiteral(_) => Ok(ValueTy::FloatLit),
            Expr::StringLiteral(_) => Ok(ValueTy::Concrete(Type::Str)),
            Expr::BoolLiteral(_) => Ok(ValueTy::Concrete(Type::Bool)),
            Expr::NullLiteral => Ok(ValueTy::Null),
            Expr::Variable(name) => self
                .lookup(name)
                .map(ValueTy::Concrete)
                .ok_or_else(|| sem(format!("unknown variable '{name}'"))),
            Expr::Binary { op, left, right } => {
                let lt = self.type_expr(left, false)?;
                let rt = self.type_expr(right, false)?;
                if op.is_arithmetic() {
                    self.combine_numeric(lt, rt, op)
                } else if op.is_comparison() {
                    self.combine_comparable(lt, rt, op)?;
                    Ok(ValueTy::Concrete(Type::Bool))
                } else {
                    for side in [lt, rt] {
                        if side != ValueTy::Concrete(Type::Bool) {
                            return Err(sem(format!(
                                "operands of '{}' must be bool, found {}",
                                op_symbol(op),
                                describe(side)
                            )));
                        }
                    }
                    Ok(ValueTy::Concrete(Type::Bool))
                }
            }
            Expr::Unary { op, operand } => {
                let vt = self.type_expr(operand, false)?;
                match op {
                    UnaryOp::Negate => {
                        let numeric = matches!(vt, ValueTy::IntLit | ValueTy::FloatLit)
                            || matches!(vt, ValueTy::Concrete(t) if t.is_numeric());
                        if !numeric {
                            return Err(sem(format!(
                                "unary '-' requires a numeric operand, found {}",
                                describe(vt)
                            )));
                        }
                        Ok(vt)
                    }
                    UnaryOp::BoolNot => {
                        if vt != ValueTy::Concrete(Type::Bool) {
                            return Err(sem(format!(
                                "'not' requires a bool operand, found {}",
                                describe(vt)
                            )));
                        }
                        Ok(vt)
                    }
                }
            }
            Expr::Call { callee, args } => self.type_call(callee, args),
            Expr::ArrayLiteral(elements) => {
                if elements.is_empty() {
                    return Err(sem("array literals must have at least one element"));
                }
                let first = self.type_expr(&elements[0], false)?;
                let elem = self.default_ty(first)?;
                if matches!(elem, Type::Void) {
                    return Err(sem("array elements cannot be void"));
                }
                for element in &elements[1..] {
                    self.check_expected(element, elem, false)?;
                }
                Ok(ValueTy::Concrete(Type::Array {
                    len: elements.len(),
                    elem: self.arena.alloc(elem),
                }))
            }
            Expr::Index { target, index } => {
                let tv = self.type_expr(target, false)?;
                let elem = match tv {
                    ValueTy::Concrete(Type::Array { elem, .. })
                    | ValueTy::Concrete(Type::Slice { elem }) => *elem,
                    other => {
                        return Err(sem(format!(
                            "indexing requires an array or slice, found {}",
                            describe(other)
                        )));
                    }
                };
                let iv = self.type_expr(index, false)?;
                let integral = matches!(iv, ValueTy::IntLit)
                    || matches!(iv, ValueTy::Concrete(t) if t.is_integer());
                if !integral {
                    return Err(sem(format!(
                        "index must be an integer, found {}",
                        describe(iv)
                    )));
                }
                Ok(ValueTy::Concrete(elem))
            }
            Expr::Range { .. } => Err(sem("ranges are only allowed as the iterable of a for loop")),
            Expr::Try(inner) => {
                if !try_allowed {
                    return Err(sem(
                        "try is only allowed as an assignment value, a return value, \
                         or an expression statement",
                    ));
                }
                // Inference unifies return sites only; it cannot name the ok
                // side a try would force on the function, so the annotation
                // is required up front.
                if let Some(state) = &self.infer {
                    return Err(sem(format!(
                        "function '{}' uses try but omits its return type; \
                         annotate the error union it returns",
                        state.name
                    )));
                }
                let Some(Type::ErrorUnion { err: expected_err, .. }) = self.current_ret else {
                    return Err(sem(
                        "try requires the enclosing function to return an error union",
                    ));
                };
                let vt = self.type_expr(inner, false)?;
                let ValueTy::Concrete(Type::ErrorUnion { ok, err }) = vt else {
                    return Err(sem(format!(
                        "try requires an error-union value, found {}",
                        describe(vt)
                    )));
                };
                if err != expected_err {
                    return Err(sem(format!(
                        "try propagates {err} but the function's error type is {expected_err}"
                    )));
                }
                Ok(ValueTy::Concrete(*ok))
            }
        }
    }

    fn type_call(&mut self, callee: &'a str, args: &'a [Expr<'a>]) -> Result<ValueTy<'a>, CoreError> {
        match callee {
            "print" => {
                if args.len() != 1 {
                    return Err(sem("print takes exactly one argument"));
                }
                let vt = self.type_expr(&args[0], false)?;
                let ty = self.default_ty(vt)?;
                if matches!(
                    ty,
                    Type::Void | Type::Array { .. } | Type::Slice { .. } | Type::ErrorUnion { .. }
                ) {
                    return Err(sem(format!("print does not support values of type {ty}")));
                }
                Ok(ValueTy::Concrete(Type::Void))
            }
            "len" => {
                if args.len() != 1 {
                    return Err(sem("len takes exactly one argument"));
                }
                let vt = self.type_expr(&args[0], false)?;
                if !matches!(
                    vt,
                    ValueTy::Concrete(Type::Array { .. }) | ValueTy::Concrete(Type::Slice { .. })
                ) {
                    return Err(sem(format!(
                        "len requires an array or slice, found {}",
                        describe(vt)
                    )));
                }
                Ok(ValueTy::Concrete(Type::I32))
            }
            _ => {
                let Some(sig) = self.sigs.get(callee) else {
                    return Err(sem(format!("unknown function '{callee}'")));
                };
                let param_tys: Vec<Type<'a>> = sig.params.iter().map(|p| p.ty).collect();
                let ret = sig.ret;
                if args.len() != param_tys.len() {
                    return Err(sem(format!(
                        "function '{callee}' takes {} arguments but {} were given",
                        param_tys.len(),
                        args.len()
                    )));
                }
                for (arg, param_ty) in args.iter().zip(param_tys) {
                    self.check_expected(arg, param_ty, false)?;
                }
                let Some(ret) = ret else {
                    return Err(sem(format!(
                        "the return type of '{callee}' is not known yet; \
                         annotate it or define '{callee}' earlier"
                    )));
                };
                Ok(ValueTy::Concrete(ret))
            }
        }
    }

    /// Check an expression against an expected type, descending into array
    /// literals so their elements resolve against the element type.
    fn check_expected(
        &mut self,
        expr: &Expr<'a>,
        expected: Type<'a>,
        try_allowed: bool,
    ) -> Result<(), CoreError> {
        if let Expr::ArrayLiteral(elements) = *expr {
            match expected {
                Type::Array { len, elem } => {
                    if elements.is_empty() {
                        return Err(sem("array literals must have at least one element"));
                    }
                    if elements.len() != len {
                        return Err(sem(format!(
                            "expected {len} elements for {expected}, found {}",
                            elements.len()
                        )));
                    }
                    for element in elements {
                        self.check_expected(element, *elem, false)?;
                    }
                    return Ok(());
                }
                Type::Slice { elem } => {
                    if elements.is_empty() {
                        return Err(sem("array literals must have at least one element"));
                    }
                    for element in elements {
                        self.check_expected(element, *elem, false)?;
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        let vt = self.type_expr(expr, try_allowed)?;
        if !fits(vt, expected) {
            return Err(sem(format!(
                "expected {expected}, found {}",
                describe(vt)
            )));
        }
        Ok(())
    }

    fn check_bool(&mut self, expr: &Expr<'a>, what: &str) -> Result<(), CoreError> {
        let vt = self.type_expr(expr, false)?;
        if vt != ValueTy::Concrete(Type::Bool) {
            return Err(sem(format!("{what} must be bool, found {}", describe(vt))));
        }
        Ok(())
    }

    fn combine_numeric(
        &self,
        lt: ValueTy<'a>,
        rt: ValueTy<'a>,
        op: BinaryOp,
    ) -> Result<ValueTy<'a>, CoreError> {
        let combined = match (lt, rt) {
            (ValueTy::IntLit, ValueTy::IntLit) => ValueTy::IntLit,
            (ValueTy::FloatLit, ValueTy::FloatLit) => ValueTy::FloatLit,
            (ValueTy::IntLit, ValueTy::Concrete(t)) | (ValueTy::Concrete(t), ValueTy::IntLit)
                if t.is_integer() =>
            {
                ValueTy::Concrete(t)
            }
            (ValueTy::FloatLit, ValueTy::Concrete(t)) | (ValueTy::Concrete(t), ValueTy::FloatLit)
                if t.is_float() =>
            {
                ValueTy::Concrete(t)
            }
            (ValueTy::Concrete(a), ValueTy::Concrete(b)) if a == b && a.is_numeric() => {
                ValueTy::Concrete(a)
            }
            _ => {
                return Err(sem(format!(
                    "operands of '{}' must be numbers of the same type, found {} and {}",
                    op_symbol(op),
                    describe(lt),
                    describe(rt)
                )));
            }
        };
        Ok(combined)
    }

    fn combine_comparable(
        &self,
        lt: ValueTy<'a>,
        rt: ValueTy<'a>,
        op: BinaryOp,
    ) -> Result<(), CoreError> {
        let ok = match (lt, rt) {
            (ValueTy::IntLit, ValueTy::IntLit) | (ValueTy::FloatLit, ValueTy::FloatLit) => true,
            (ValueTy::IntLit, ValueTy::Concrete(t)) | (ValueTy::Concrete(t), ValueTy::IntLit) => {
                t.is_integer()
            }
            (ValueTy::FloatLit, ValueTy::Concrete(t))
            | (ValueTy::Concrete(t), ValueTy::FloatLit) => t.is_float(),
            (ValueTy::Concrete(a), ValueTy::Concrete(b)) => {
                a == b
                    && !matches!(
                        a,
                        Type::Void | Type::Array { .. } | Type::Slice { .. } | Type::ErrorUnion { .. }
                    )
            }
            _ => false,
        };
        if !ok {
            return Err(sem(format!(
                "operands of '{}' must have the same comparable type, found {} and {}",
                op_symbol(op),
                describe(lt),
                describe(rt)
            )));
        }
        Ok(())
    }

    fn default_ty(&self, vt: ValueTy<'a>) -> Result<Type<'a>, CoreError> {
        match vt {
            ValueTy::Concrete(t) => Ok(t),
            ValueTy::IntLit => Ok(Type::I32),
            ValueTy::FloatLit => Ok(Type::F64),
            ValueTy::Null => Err(sem("cannot infer a type for null; use a typed declaration")),
        }
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    fn lookup(&self, name: &str) -> Option<Type<'a>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare(&mut self, name: &'a str, ty: Type<'a>) {
        self.scopes
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name, ty);
    }
}

fn param_scope<'a>(params: &'a [Param<'a>]) -> HashMap<&'a str, Type<'a>> {
    params.iter().map(|p| (p.name, p.ty)).collect()
}

/// Placeholder-aware assignability: a concrete type must match exactly,
/// literal placeholders unify with the matching numeric class, and `null`
/// binds only to `str`.
fn fits<'a>(vt: ValueTy<'a>, expected: Type<'a>) -> bool {
    match vt {
        ValueTy::Concrete(t) => t == expected,
        ValueTy::IntLit => expected.is_integer(),
        ValueTy::FloatLit => expected.is_float(),
        ValueTy::Null => expected == Type::Str,
    }
}

fn fits_union_or_side<'a>(vt: ValueTy<'a>, union: Type<'a>) -> bool {
    let Type::ErrorUnion { ok, err } = union else {
        return false;
    };
    fits(vt, union) || fits(vt, *ok) || fits(vt, *err)
}

fn describe(vt: ValueTy<'_>) -> String {
    match vt {
        ValueTy::Concrete(t) => t.to_string(),
        ValueTy::IntLit => "an integer literal".to_string(),
        ValueTy::FloatLit => "a float literal".to_string(),
        ValueTy::Null => "null".to_string(),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Eq => "==",
        BinaryOp::Neq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Lte => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Gte => ">=",
        BinaryOp::BoolAnd => "and",
        BinaryOp::BoolOr => "or",
    }
}

/// Syntactic return coverage: the last statement is a `return`, or an
/// if/else-if/else cascade whose every branch covers. Loops never count.
fn covers_return(stmts: &[Stmt<'_>]) -> bool {
    match stmts.last() {
        Some(Stmt::Return { .. }) => true,
        Some(Stmt::If {
            then_body,
            else_ifs,
            else_body: Some(else_body),
            ..
        }) => {
            covers_return(then_body)
                && else_ifs.iter().all(|ei| covers_return(ei.body))
                && covers_return(else_body)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;

    fn analyze_source(source: &str) -> Result<(), CoreError> {
        let arena = Bump::new();
        let tokens = lex(source)?;
        let program = parse(&arena, &tokens)?;
        analyze(&arena, &program).map(|_| ())
    }

    fn expect_semantic_error(source: &str, needle: &str) {
        let err = analyze_source(source).expect_err("analysis should fail");
        let message = err.to_string();
        assert!(
            message.starts_with("semantic error") && message.contains(needle),
            "unexpected message: {message}"
        );
    }

    #[test]
    fn accepts_simple_program() {
        analyze_source("set age to 41\nprint(age)").expect("should pass");
    }

    #[test]
    fn accepts_function_with_explicit_types() {
        analyze_source(
            "set add with a as i32, b as i32 returns i32\n    return a + b\nprint(add(2, 3))",
        )
        .expect("should pass");
    }

    #[test]
    fn infers_omitted_return_types() {
        analyze_source("set five as fn\n    return 5\nset x to five() + 1").expect("should pass");
    }

    #[test]
    fn inferred_return_defaults_literals_to_i32() {
        // five() infers i32, so adding it to an i64 must fail.
        expect_semantic_error(
            "set five as fn\n    return 5\nset big as i64 to 7\nset x to five() + big",
            "must be numbers of the same type",
        );
    }

    #[test]
    fn rejects_mixed_bare_and_value_returns() {
        expect_semantic_error(
            "set f as fn\n    if true then\n        return\n    return 1",
            "mixes bare returns",
        );
    }

    #[test]
    fn rejects_conflicting_inferred_returns() {
        expect_semantic_error(
            "set f as fn\n    if true then\n        return 1\n    return \"no\"",
            "conflicting return types",
        );
    }

    #[test]
    fn rejects_call_into_later_unannotated_function() {
        expect_semantic_error(
            "set f as fn\n    return g()\nset g as fn\n    return 1",
            "not known yet",
        );
    }

    #[test]
    fn rejects_duplicate_function() {
        expect_semantic_error(
            "set f as fn\n    return 1\nset f as fn\n    return 2",
            "duplicate function",
        );
    }

    #[test]
    fn rejects_shadowing() {
        expect_semantic_error(
            "set x to 1\nif true then\n    set x as i32 to 2",
            "already declared",
        );
        expect_semantic_error("set x to 1\nloop for x in 0..3\n    print(x)", "already declared");
    }

    #[test]
    fn reassignment_keeps_the_declared_type() {
        analyze_source("set x to 1\nset x to 2").expect("should pass");
        expect_semantic_error("set x to 1\nset x to \"two\"", "cannot assign str");
    }

    #[test]
    fn rejects_array_reassignment() {
        expect_semantic_error(
            "set nums to [1, 2]\nset nums to [3, 4]",
            "cannot be reassigned",
        );
    }

    #[test]
    fn accepts_index_assignment() {
        analyze_source("set nums to [1, 2]\nset nums[0] to 9").expect("should pass");
        expect_semantic_error("set nums to [1, 2]\nset nums[0] to \"x\"", "expected i32");
    }

    #[test]
    fn literal_unifies_with_declared_type() {
        analyze_source("set big as i64 to 42\nset big to big + 1").expect("should pass");
        expect_semantic_error("set x as i32 to 1.5", "expected i32");
    }

    #[test]
    fn rejects_mixed_concrete_arithmetic() {
        expect_semantic_error(
            "set a as i32 to 1\nset b as i64 to 2\nset c to a + b",
            "must be numbers of the same type",
        );
    }

    #[test]
    fn null_binds_only_to_str() {
        analyze_source("set s as str to null").expect("should pass");
        expect_semantic_error("set n as i32 to null", "expected i32, found null");
        expect_semantic_error("set x to null", "cannot infer a type for null");
    }

    #[test]
    fn rejects_empty_array_literal() {
        expect_semantic_error("set xs to []", "at least one element");
    }

    #[test]
    fn single_element_array_is_fine() {
        analyze_source("set xs to [7]\nprint(xs[0])").expect("should pass");
    }

    #[test]
    fn array_elements_must_agree() {
        expect_semantic_error("set xs to [1, \"two\"]", "expected i32");
    }

    #[test]
    fn slice_accepts_array_and_slice_values() {
        analyze_source("set s as []i32 to [1, 2, 3]").expect("should pass");
        analyze_source("set a as [2]i32 to [1, 2]\nset s as []i32 to a").expect("should pass");
        expect_semantic_error("set s as []i32 to 5", "cannot assign");
    }

    #[test]
    fn rejects_slice_of_array_type() {
        expect_semantic_error("set s as [][2]i32 to [1]", "slice of array");
    }

    #[test]
    fn rejects_ill_formed_error_unions() {
        expect_semantic_error(
            "set f as fn returns i32!i32\n    return 1",
            "distinct value and error types",
        );
    }

    #[test]
    fn conditions_must_be_bool() {
        expect_semantic_error("if 1 then\n    print(1)", "must be bool");
        expect_semantic_error("loop while 1\n    print(1)", "must be bool");
    }

    #[test]
    fn range_endpoints_must_match() {
        analyze_source("loop for i in 0..10\n    print(i)").expect("should pass");
        analyze_source("set n as i64 to 10\nloop for i in 0..n\n    print(i)")
            .expect("should pass");
        expect_semantic_error(
            "set a as i32 to 0\nset b as i64 to 9\nloop for i in a..b\n    print(i)",
            "range endpoints",
        );
    }

    #[test]
    fn break_and_continue_need_a_loop() {
        expect_semantic_error("break", "outside of a loop");
        expect_semantic_error("continue", "outside of a loop");
        analyze_source("loop while true\n    break").expect("should pass");
    }

    #[test]
    fn rejects_break_with_value() {
        expect_semantic_error("loop while true\n    break 1", "break with a value");
    }

    #[test]
    fn try_needs_matching_enclosing_error_type() {
        analyze_source(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn returns i32!str\n    set x to try fail()\n    return x",
        )
        .expect("should pass");
        expect_semantic_error(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set f as fn returns i32\n    set x to try fail()\n    return x",
            "enclosing function to return an error union",
        );
    }

    #[test]
    fn try_requires_an_annotated_return_type() {
        expect_semantic_error(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn\n    set x to try fail()\n    return x",
            "omits its return type",
        );
        expect_semantic_error(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn\n    return try fail()",
            "omits its return type",
        );
        expect_semantic_error(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn\n    try fail()\n    return 1",
            "omits its return type",
        );
    }

    #[test]
    fn try_is_rejected_in_arithmetic_subexpressions() {
        expect_semantic_error(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn returns i32!str\n    return 1 + try fail()",
            "try is only allowed",
        );
    }

    #[test]
    fn try_catch_binds_the_error() {
        analyze_source(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             try fail() catch err\n    print(err)",
        )
        .expect("should pass");
        expect_semantic_error("try 5 catch err\n    print(err)", "error-union value");
    }

    #[test]
    fn error_union_reassignment_accepts_both_sides() {
        analyze_source(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set r as i32!str to 1\nset r to \"oops\"\nset r to 2\nset r to fail()",
        )
        .expect("should pass");
        expect_semantic_error(
            "set r as i32!str to 1\nset r to true",
            "cannot assign bool",
        );
    }

    #[test]
    fn parallel_blocks_take_only_zero_arg_calls() {
        analyze_source(
            "set a as fn\n    print(1)\nset b as fn\n    print(2)\nparallel\n    a()\n    b()",
        )
        .expect("should pass");
        expect_semantic_error(
            "set a with x as i32\n    print(x)\nparallel\n    a(1)",
            "zero-argument",
        );
        expect_semantic_error("parallel\n    print(1)", "defined functions");
        expect_semantic_error("set x to 1\nparallel\n    set x to 2", "function calls");
    }

    #[test]
    fn parallel_while_is_refused() {
        expect_semantic_error("parallel while true\n    print(1)", "cannot apply to a while");
    }

    #[test]
    fn parallel_for_is_accepted() {
        analyze_source("set nums to [1, 2, 3]\nparallel for n in nums\n    print(n)")
            .expect("should pass");
    }

    #[test]
    fn non_void_functions_need_return_coverage() {
        expect_semantic_error(
            "set f with x as i32 returns i32\n    if x > 0 then\n        return 1",
            "may finish without returning",
        );
        analyze_source(
            "set f with x as i32 returns i32\n    if x > 0 then\n        return 1\n    else\n        return 2",
        )
        .expect("should pass");
        // A loop containing a return does not count as coverage.
        expect_semantic_error(
            "set f with x as i32 returns i32\n    loop while true\n        return x",
            "may finish without returning",
        );
    }

    #[test]
    fn functions_do_not_see_top_level_variables() {
        expect_semantic_error(
            "set g to 1\nset f as fn returns i32\n    return g",
            "unknown variable 'g'",
        );
    }

    #[test]
    fn comparisons_yield_bool_and_need_equal_types() {
        analyze_source("set x to 1 < 2\nif x then\n    print(1)").expect("should pass");
        expect_semantic_error(
            "set s as str to \"a\"\nset t to s < 1",
            "same comparable type",
        );
    }

    #[test]
    fn main_signature_is_constrained() {
        analyze_source("set main as fn returns u8\n    return 3").expect("should pass");
        expect_semantic_error(
            "set main with x as i32\n    print(x)",
            "main does not take parameters",
        );
        expect_semantic_error(
            "set main as fn returns str\n    return \"x\"",
            "must return void or an integer",
        );
        expect_semantic_error(
            "set main as fn\n    print(1)\nset x to 2",
            "top-level statements are not allowed",
        );
    }

    #[test]
    fn signatures_expose_inferred_returns() {
        let arena = Bump::new();
        let tokens = lex("set five as fn\n    return 5").expect("lex");
        let program = parse(&arena, &tokens).expect("parse");
        let sigs = analyze(&arena, &program).expect("analyze");
        assert_eq!(sigs.get("five").expect("signature").ret, Type::I32);
    }
}
