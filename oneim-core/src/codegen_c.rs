//! C code generation for 1im.
//!
//! The generator walks the analyzed AST once and emits a single C11
//! translation unit: a fixed include preamble, the pthread runner shim when
//! a parallel block exists, helper typedefs materialised on demand and
//! deduplicated by structural key, function prototypes, definitions in
//! source order, and `main` (the user's, or one synthesized around the
//! top-level statements). Output is deterministic: helpers keep their
//! first-materialisation order and a single program-wide counter names
//! every compiler temporary.

use std::collections::{HashMap, HashSet};

use bumpalo::Bump;

use crate::ast::{BinaryOp, Expr, Param, Program, Stmt, UnaryOp};
use crate::error::CoreError;
use crate::typecheck::Signatures;
use crate::types::Type;

const PREAMBLE: &[&str] = &[
    "#include <stdio.h>",
    "#include <stdint.h>",
    "#include <inttypes.h>",
    "#include <stdbool.h>",
    "#include <string.h>",
    "#include <stddef.h>",
    "#include <pthread.h>",
];

const PAR_RUNNER: &str = "static void* __1im_par_runner(void* arg) { \
void (*fn)(void) = *(void (**)(void))arg; fn(); return NULL; }";

const INDENT: &str = "    ";

pub fn generate<'a>(
    arena: &'a Bump,
    program: &Program<'a>,
    sigs: &Signatures<'a>,
) -> Result<String, CoreError> {
    let mut gen = CGen {
        arena,
        sigs,
        helpers: String::new(),
        helper_keys: HashSet::new(),
        needs_runner: false,
        tmp: 0,
        locals: vec![HashMap::new()],
        current_ret: Type::Void,
        in_main: false,
    };

    let mut funcs = Vec::new();
    let mut user_main = None;
    for stmt in program.stmts {
        if let Stmt::FunctionDef { name, params, body, .. } = *stmt {
            let ret = gen.signature_ret(name)?;
            if name == "main" {
                user_main = Some((ret, body));
            } else {
                funcs.push((name, params, ret, body));
            }
        }
    }

    // Prototypes first; this also materialises every signature-level helper
    // typedef before any code that mentions it.
    let mut decls = String::new();
    for &(name, params, ret, _) in &funcs {
        let ret_c = gen.c_ret_type(ret)?;
        let params_c = gen.params_decl(params)?;
        decls.push_str(&format!("{ret_c} {name}({params_c});\n"));
    }

    let mut defs = String::new();
    for &(name, params, ret, body) in &funcs {
        gen.emit_function(&mut defs, name, params, ret, body)?;
        defs.push('\n');
    }

    let mut main_buf = String::new();
    main_buf.push_str("int main(void) {\n");
    match user_main {
        Some((ret, body)) => {
            gen.locals = vec![HashMap::new()];
            gen.current_ret = ret;
            gen.in_main = true;
            for stmt in body {
                gen.emit_stmt(stmt, &mut main_buf, 1)?;
            }
            if !matches!(body.last(), Some(Stmt::Return { .. })) {
                main_buf.push_str("    return 0;\n");
            }
        }
        None => {
            gen.locals = vec![HashMap::new()];
            gen.current_ret = Type::Void;
            gen.in_main = true;
            for stmt in program.stmts {
                if matches!(stmt, Stmt::FunctionDef { .. }) {
                    continue;
                }
                gen.emit_stmt(stmt, &mut main_buf, 1)?;
            }
            main_buf.push_str("    return 0;\n");
        }
    }
    main_buf.push_str("}\n");

    let mut out = String::new();
    for include in PREAMBLE {
        out.push_str(include);
        out.push('\n');
    }
    out.push('\n');
    if gen.needs_runner {
        out.push_str(PAR_RUNNER);
        out.push_str("\n\n");
    }
    if !gen.helpers.is_empty() {
        out.push_str(&gen.helpers);
        out.push('\n');
    }
    out.push_str(&decls);
    out.push('\n');
    out.push_str(&defs);
    out.push_str(&main_buf);
    Ok(out)
}

fn cg_err(message: impl Into<String>) -> CoreError {
    CoreError::Codegen(message.into())
}

fn push_line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

/// Textual structural key of a type, shared by typedef naming and lookup.
fn key(ty: Type<'_>) -> String {
    match ty {
        Type::I8 => "i8".to_string(),
        Type::I16 => "i16".to_string(),
        Type::I32 => "i32".to_string(),
        Type::I64 => "i64".to_string(),
        Type::U8 => "u8".to_string(),
        Type::U16 => "u16".to_string(),
        Type::U32 => "u32".to_string(),
        Type::U64 => "u64".to_string(),
        Type::F32 => "f32".to_string(),
        Type::F64 => "f64".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Str => "str".to_string(),
        Type::Void => "void".to_string(),
        Type::Array { len, elem } => format!("arr{len}_{}", key(*elem)),
        Type::Slice { elem } => format!("slice_{}", key(*elem)),
        Type::ErrorUnion { ok, err } => format!("err_{}_{}", key(*ok), key(*err)),
    }
}

fn c_primitive(ty: Type<'_>) -> Option<&'static str> {
    let name = match ty {
        Type::I8 => "int8_t",
        Type::I16 => "int16_t",
        Type::I32 => "int32_t",
        Type::I64 => "int64_t",
        Type::U8 => "uint8_t",
        Type::U16 => "uint16_t",
        Type::U32 => "uint32_t",
        Type::U64 => "uint64_t",
        Type::F32 => "float",
        Type::F64 => "double",
        Type::Bool => "bool",
        Type::Str => "const char*",
        Type::Void => "void",
        _ => return None,
    };
    Some(name)
}

fn c_op(op: BinaryOp) -> &'static str {
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
        BinaryOp::BoolAnd => "&&",
        BinaryOp::BoolOr => "||",
    }
}

struct CGen<'a, 's> {
    arena: &'a Bump,
    sigs: &'s Signatures<'a>,
    /// Helper typedefs and constructors in first-materialisation order.
    helpers: String,
    helper_keys: HashSet<String>,
    needs_runner: bool,
    /// Program-wide counter for `__try`, `__i`, `__iter`, `__ret`, `__par_*`
    /// names.
    tmp: usize,
    locals: Vec<HashMap<&'a str, Type<'a>>>,
    current_ret: Type<'a>,
    in_main: bool,
}

impl<'a, 's> CGen<'a, 's> {
    fn signature_ret(&self, name: &str) -> Result<Type<'a>, CoreError> {
        self.sigs
            .get(name)
            .map(|sig| sig.ret)
            .ok_or_else(|| cg_err(format!("missing signature for function '{name}'")))
    }

    fn next_tmp(&mut self) -> usize {
        let t = self.tmp;
        self.tmp += 1;
        t
    }

    fn lookup_local(&self, name: &str) -> Option<Type<'a>> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn declare_local(&mut self, name: &'a str, ty: Type<'a>) {
        self.locals
            .last_mut()
            .expect("local scope stack is never empty")
            .insert(name, ty);
    }

    // ------------------------------------------------------------------
    // Types and helper typedefs
    // ------------------------------------------------------------------

    fn c_type(&mut self, ty: Type<'a>) -> Result<String, CoreError> {
        if let Some(name) = c_primitive(ty) {
            return Ok(name.to_string());
        }
        match ty {
            Type::Slice { elem } => {
                let name = key(ty);
                if !self.helper_keys.contains(&name) {
                    self.helper_keys.insert(name.clone());
                    let elem_c = self.c_type(*elem)?;
                    self.helpers.push_str(&format!(
                        "typedef struct {{ {elem_c}* data; size_t len; }} {name};\n"
                    ));
                }
                Ok(name)
            }
            Type::ErrorUnion { ok, err } => {
                let name = key(ty);
                if !self.helper_keys.contains(&name) {
                    self.helper_keys.insert(name.clone());
                    let ok_c = self.c_type(*ok)?;
                    let err_c = self.c_type(*err)?;
                    let ok_zero = zero_value(*ok, &ok_c);
                    let err_zero = zero_value(*err, &err_c);
                    self.helpers.push_str(&format!(
                        "typedef struct {{ bool ok; {ok_c} value; {err_c} err; }} {name};\n"
                    ));
                    self.helpers.push_str(&format!(
                        "static inline {name} {name}_ok({ok_c} value) {{ return ({name}){{ .ok = true, .value = value, .err = {err_zero} }}; }}\n"
                    ));
                    self.helpers.push_str(&format!(
                        "static inline {name} {name}_err({err_c} err) {{ return ({name}){{ .ok = false, .value = {ok_zero}, .err = err }}; }}\n"
                    ));
                }
                Ok(name)
            }
            Type::Array { .. } => Err(cg_err(
                "array types are emitted through declarations and return wrappers",
            )),
            _ => unreachable!("primitive handled above"),
        }
    }

    /// Return type spelling; functions returning arrays return a by-value
    /// wrapper struct.
    fn c_ret_type(&mut self, ty: Type<'a>) -> Result<String, CoreError> {
        match ty {
            Type::Array { len, elem } => {
                let name = format!("arrret_{}", key(ty));
                if !self.helper_keys.contains(&name) {
                    self.helper_keys.insert(name.clone());
                    let elem_c = self.c_type(*elem)?;
                    self.helpers.push_str(&format!(
                        "typedef struct {{ {elem_c} value[{len}]; }} {name};\n"
                    ));
                }
                Ok(name)
            }
            _ => self.c_type(ty),
        }
    }

    fn params_decl(&mut self, params: &[Param<'a>]) -> Result<String, CoreError> {
        let mut parts = Vec::new();
        for param in params {
            match param.ty {
                Type::Array { len, elem } => {
                    let elem_c = self.c_type(*elem)?;
                    parts.push(format!("{elem_c} {}[{len}]", param.name));
                }
                ty => {
                    let c = self.c_type(ty)?;
                    parts.push(format!("{c} {}", param.name));
                }
            }
        }
        Ok(parts.join(", "))
    }

    // ------------------------------------------------------------------
    // Expression typing (post-analysis; literals default to i32/f64)
    // ------------------------------------------------------------------

    fn expr_type(&mut self, expr: &Expr<'a>) -> Result<Type<'a>, CoreError> {
        match *expr {
            Expr::IntLiteral(_) => Ok(Type::I32),
            Expr::FloatLiteral(_) => Ok(Type::F64),
            Expr::StringLiteral(_) | Expr::NullLiteral => Ok(Type::Str),
            Expr::BoolLiteral(_) => Ok(Type::Bool),
            Expr::Variable(name) => self
                .lookup_local(name)
                .ok_or_else(|| cg_err(format!("unknown variable '{name}'"))),
            Expr::Binary { op, left, right } => {
                if op.is_arithmetic() {
                    // Prefer the side anchored by a variable or call; the
                    // analyzer has already unified the operand types.
                    if left.is_literal_arithmetic() && !right.is_literal_arithmetic() {
                        self.expr_type(right)
                    } else {
                        self.expr_type(left)
                    }
                } else {
                    Ok(Type::Bool)
                }
            }
            Expr::Unary { op, operand } => match op {
                UnaryOp::Negate => self.expr_type(operand),
                UnaryOp::BoolNot => Ok(Type::Bool),
            },
            Expr::Call { callee, .. } => match callee {
                "print" => Ok(Type::Void),
                "len" => Ok(Type::I32),
                _ => self.signature_ret(callee),
            },
            Expr::ArrayLiteral(elements) => {
                let elem = self.expr_type(&elements[0])?;
                Ok(Type::Array {
                    len: elements.len(),
                    elem: self.arena.alloc(elem),
                })
            }
            Expr::Index { target, .. } => match self.expr_type(target)? {
                Type::Array { elem, .. } | Type::Slice { elem } => Ok(*elem),
                other => Err(cg_err(format!("cannot index a value of type {other}"))),
            },
            Expr::Range { .. } => Err(cg_err("range outside the iterable of a for loop")),
            Expr::Try(inner) => match self.expr_type(inner)? {
                Type::ErrorUnion { ok, .. } => Ok(*ok),
                other => Err(cg_err(format!("try applied to a value of type {other}"))),
            },
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn emit_expr(&mut self, expr: &Expr<'a>) -> Result<String, CoreError> {
        match *expr {
            Expr::IntLiteral(text) | Expr::FloatLiteral(text) => Ok(text.to_string()),
            Expr::StringLiteral(body) => Ok(format!("\"{body}\"")),
            Expr::BoolLiteral(true) => Ok("true".to_string()),
            Expr::BoolLiteral(false) => Ok("false".to_string()),
            Expr::NullLiteral => Ok("NULL".to_string()),
            Expr::Variable(name) => Ok(name.to_string()),
            Expr::Binary { op, left, right } => {
                let l = self.emit_expr(left)?;
                let r = self.emit_expr(right)?;
                Ok(format!("({l} {} {r})", c_op(op)))
            }
            Expr::Unary { op, operand } => {
                let inner = self.emit_expr(operand)?;
                let symbol = match op {
                    UnaryOp::Negate => "-",
                    UnaryOp::BoolNot => "!",
                };
                Ok(format!("({symbol}{inner})"))
            }
            Expr::Call { callee, args } => self.emit_call(callee, args),
            Expr::ArrayLiteral(elements) => {
                let elem = self.expr_type(&elements[0])?;
                let elem_c = self.c_type(elem)?;
                let items = self.emit_list(elements)?;
                Ok(format!("({elem_c}[]){{{items}}}"))
            }
            Expr::Index { target, index } => {
                let target_ty = self.expr_type(target)?;
                let base = self.emit_expr(target)?;
                let idx = self.emit_expr(index)?;
                match target_ty {
                    Type::Array { .. } => Ok(format!("{base}[{idx}]")),
                    Type::Slice { .. } => Ok(format!("{base}.data[{idx}]")),
                    other => Err(cg_err(format!("cannot index a value of type {other}"))),
                }
            }
            Expr::Range { .. } => Err(cg_err("range outside the iterable of a for loop")),
            Expr::Try(_) => Err(cg_err(
                "try expression outside an assignment, return, or statement position",
            )),
        }
    }

    fn emit_call(&mut self, callee: &'a str, args: &'a [Expr<'a>]) -> Result<String, CoreError> {
        match callee {
            "print" => Err(cg_err("print cannot be used as a value")),
            "len" => {
                let arg = &args[0];
                if let Expr::ArrayLiteral(elements) = *arg {
                    return Ok(elements.len().to_string());
                }
                match self.expr_type(arg)? {
                    Type::Array { len, .. } => Ok(len.to_string()),
                    Type::Slice { .. } => {
                        let base = self.emit_expr(arg)?;
                        Ok(format!("{base}.len"))
                    }
                    other => Err(cg_err(format!("len applied to a value of type {other}"))),
                }
            }
            _ => {
                let items = self.emit_list(args)?;
                let call = format!("{callee}({items})");
                if matches!(self.signature_ret(callee)?, Type::Array { .. }) {
                    // The wrapper struct decays back to an array expression.
                    Ok(format!("({call}).value"))
                } else {
                    Ok(call)
                }
            }
        }
    }

    fn emit_list(&mut self, exprs: &'a [Expr<'a>]) -> Result<String, CoreError> {
        let mut parts = Vec::new();
        for expr in exprs {
            parts.push(self.emit_expr(expr)?);
        }
        Ok(parts.join(", "))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn emit_function(
        &mut self,
        out: &mut String,
        name: &str,
        params: &'a [Param<'a>],
        ret: Type<'a>,
        body: &'a [Stmt<'a>],
    ) -> Result<(), CoreError> {
        let ret_c = self.c_ret_type(ret)?;
        let params_c = self.params_decl(params)?;
        out.push_str(&format!("{ret_c} {name}({params_c}) {{\n"));
        self.locals = vec![params.iter().map(|p| (p.name, p.ty)).collect()];
        self.current_ret = ret;
        self.in_main = false;
        for stmt in body {
            self.emit_stmt(stmt, out, 2)?;
        }
        out.push_str("}\n");
        Ok(())
    }

    fn emit_body(
        &mut self,
        body: &'a [Stmt<'a>],
        out: &mut String,
        depth: usize,
    ) -> Result<(), CoreError> {
        self.locals.push(HashMap::new());
        let mut result = Ok(());
        for stmt in body {
            result = self.emit_stmt(stmt, out, depth);
            if result.is_err() {
                break;
            }
        }
        self.locals.pop();
        result
    }

    fn emit_stmt(
        &mut self,
        stmt: &'a Stmt<'a>,
        out: &mut String,
        depth: usize,
    ) -> Result<(), CoreError> {
        match *stmt {
            Stmt::SetAssign { name, value } => {
                if let Some(declared) = self.lookup_local(name) {
                    self.emit_reassignment(out, depth, name, declared, &value)
                } else {
                    self.emit_declaration(out, depth, name, None, &value)
                }
            }
            Stmt::TypedAssign { name, ty, value } => {
                self.emit_declaration(out, depth, name, Some(ty), &value)
            }
            Stmt::IndexAssign { target, value } => {
                let lvalue = self.emit_expr(&target)?;
                let rhs = self.emit_expr(&value)?;
                push_line(out, depth, &format!("{lvalue} = {rhs};"));
                Ok(())
            }
            Stmt::FunctionDef { name, .. } => Err(cg_err(format!(
                "nested function '{name}' reached code generation"
            ))),
            Stmt::Return { value } => self.emit_return(out, depth, value),
            Stmt::If {
                condition,
                then_body,
                else_ifs,
                else_body,
            } => {
                let cond = self.emit_expr(&condition)?;
                push_line(out, depth, &format!("if ({cond}) {{"));
                self.emit_body(then_body, out, depth + 1)?;
                for else_if in else_ifs {
                    let cond = self.emit_expr(&else_if.condition)?;
                    push_line(out, depth, &format!("}} else if ({cond}) {{"));
                    self.emit_body(else_if.body, out, depth + 1)?;
                }
                if let Some(else_body) = else_body {
                    push_line(out, depth, "} else {");
                    self.emit_body(else_body, out, depth + 1)?;
                }
                push_line(out, depth, "}");
                Ok(())
            }
            Stmt::While { condition, body, .. } => {
                let cond = self.emit_expr(&condition)?;
                push_line(out, depth, &format!("while ({cond}) {{"));
                self.emit_body(body, out, depth + 1)?;
                push_line(out, depth, "}");
                Ok(())
            }
            Stmt::For {
                variable,
                iterable,
                body,
                parallel,
            } => self.emit_for(out, depth, variable, &iterable, body, parallel),
            Stmt::ParallelBlock { body } => self.emit_parallel_block(out, depth, body),
            Stmt::Break { .. } => {
                push_line(out, depth, "break;");
                Ok(())
            }
            Stmt::Continue => {
                push_line(out, depth, "continue;");
                Ok(())
            }
            Stmt::TryCatch {
                try_expr,
                catch_var,
                catch_body,
            } => self.emit_try_catch(out, depth, &try_expr, catch_var, catch_body),
            Stmt::Expr(expr) => {
                if let Expr::Call { callee: "print", args } = expr {
                    return self.emit_print(out, depth, &args[0]);
                }
                if let Expr::Try(inner) = expr {
                    // Statement-level try: evaluate, propagate, drop the value.
                    self.emit_try_tmp(out, depth, inner)?;
                    return Ok(());
                }
                let text = self.emit_expr(&expr)?;
                push_line(out, depth, &format!("{text};"));
                Ok(())
            }
        }
    }

    fn emit_reassignment(
        &mut self,
        out: &mut String,
        depth: usize,
        name: &'a str,
        declared: Type<'a>,
        value: &Expr<'a>,
    ) -> Result<(), CoreError> {
        if let Expr::Try(inner) = *value {
            let (tmp, inner_union) = self.emit_try_tmp(out, depth, inner)?;
            if matches!(declared, Type::ErrorUnion { .. }) {
                let union_c = self.c_type(declared)?;
                let ctor = union_ctor(declared, unwrapped_ok(inner_union)?);
                push_line(
                    out,
                    depth,
                    &format!("{name} = {union_c}{ctor}({tmp}.value);"),
                );
            } else {
                push_line(out, depth, &format!("{name} = {tmp}.value;"));
            }
            return Ok(());
        }
        let rhs = self.emit_expr(value)?;
        if matches!(declared, Type::ErrorUnion { .. }) {
            // The RHS's concrete type picks the constructor to rewrap with.
            match self.union_wrap(declared, value)? {
                None => push_line(out, depth, &format!("{name} = {rhs};")),
                Some(ctor) => {
                    let union_c = self.c_type(declared)?;
                    push_line(out, depth, &format!("{name} = {union_c}{ctor}({rhs});"));
                }
            }
        } else {
            push_line(out, depth, &format!("{name} = {rhs};"));
        }
        Ok(())
    }

    fn emit_declaration(
        &mut self,
        out: &mut String,
        depth: usize,
        name: &'a str,
        declared: Option<Type<'a>>,
        value: &Expr<'a>,
    ) -> Result<(), CoreError> {
        if let Expr::Try(inner) = *value {
            let (tmp, inner_union) = self.emit_try_tmp(out, depth, inner)?;
            let Type::ErrorUnion { ok, .. } = inner_union else {
                return Err(cg_err("try applied to a non-union value"));
            };
            let ty = declared.unwrap_or(*ok);
            if matches!(ty, Type::ErrorUnion { .. }) {
                let union_c = self.c_type(ty)?;
                let ctor = union_ctor(ty, *ok);
                push_line(
                    out,
                    depth,
                    &format!("{union_c} {name} = {union_c}{ctor}({tmp}.value);"),
                );
            } else {
                let ty_c = self.c_type(ty)?;
                push_line(out, depth, &format!("{ty_c} {name} = {tmp}.value;"));
            }
            self.declare_local(name, ty);
            return Ok(());
        }

        let ty = match declared {
            Some(ty) => ty,
            None => self.expr_type(value)?,
        };
        match ty {
            Type::Array { len, elem } => {
                let elem_c = self.c_type(*elem)?;
                if let Expr::ArrayLiteral(elements) = *value {
                    let items = self.emit_list(elements)?;
                    push_line(out, depth, &format!("{elem_c} {name}[{len}] = {{{items}}};"));
                } else {
                    // Calls come back as a wrapper struct and variables are
                    // arrays; both copy in with memcpy.
                    let rhs = self.emit_expr(value)?;
                    push_line(out, depth, &format!("{elem_c} {name}[{len}];"));
                    push_line(out, depth, &format!("memcpy({name}, {rhs}, sizeof({name}));"));
                }
            }
            Type::Slice { elem } => {
                let slice_c = self.c_type(ty)?;
                if let Expr::ArrayLiteral(elements) = *value {
                    let elem_c = self.c_type(*elem)?;
                    let count = elements.len();
                    let items = self.emit_list(elements)?;
                    push_line(
                        out,
                        depth,
                        &format!("{elem_c} {name}_data[{count}] = {{{items}}};"),
                    );
                    push_line(
                        out,
                        depth,
                        &format!("{slice_c} {name} = {{ {name}_data, {count} }};"),
                    );
                } else if let Type::Array { len, .. } = self.expr_type(value)? {
                    let rhs = self.emit_expr(value)?;
                    push_line(out, depth, &format!("{slice_c} {name} = {{ {rhs}, {len} }};"));
                } else {
                    let rhs = self.emit_expr(value)?;
                    push_line(out, depth, &format!("{slice_c} {name} = {rhs};"));
                }
            }
            Type::ErrorUnion { .. } => {
                let union_c = self.c_type(ty)?;
                let wrap = self.union_wrap(ty, value)?;
                let rhs = self.emit_expr(value)?;
                match wrap {
                    None => push_line(out, depth, &format!("{union_c} {name} = {rhs};")),
                    Some(ctor) => push_line(
                        out,
                        depth,
                        &format!("{union_c} {name} = {union_c}{ctor}({rhs});"),
                    ),
                }
            }
            _ => {
                let ty_c = self.c_type(ty)?;
                let rhs = self.emit_expr(value)?;
                push_line(out, depth, &format!("{ty_c} {name} = {rhs};"));
            }
        }
        self.declare_local(name, ty);
        Ok(())
    }

    /// Which constructor wraps `value` into `union`; `None` when the value
    /// already has the union type. Untyped literals resolve the way the
    /// analyzer does: the ok side is tried first, then the err side.
    fn union_wrap(
        &mut self,
        union: Type<'a>,
        value: &Expr<'a>,
    ) -> Result<Option<&'static str>, CoreError> {
        let Type::ErrorUnion { ok, err } = union else {
            return Err(cg_err(format!("expected an error union, found {union}")));
        };
        let vt = self.expr_type(value)?;
        if vt == union {
            return Ok(None);
        }
        if value.is_literal_arithmetic() {
            let fits_ok = if vt.is_float() {
                ok.is_float()
            } else {
                ok.is_integer()
            };
            return Ok(Some(if fits_ok { "_ok" } else { "_err" }));
        }
        if vt == *err {
            return Ok(Some("_err"));
        }
        Ok(Some("_ok"))
    }

    /// Evaluate an error-union expression into a fresh `__try` temporary and
    /// propagate the error side out of the enclosing function.
    fn emit_try_tmp(
        &mut self,
        out: &mut String,
        depth: usize,
        inner: &Expr<'a>,
    ) -> Result<(String, Type<'a>), CoreError> {
        let inner_union = self.expr_type(inner)?;
        let inner_c = self.c_type(inner_union)?;
        let outer_c = self.c_type(self.current_ret)?;
        let t = self.next_tmp();
        let tmp = format!("__try{t}");
        let rhs = self.emit_expr(inner)?;
        push_line(out, depth, &format!("{inner_c} {tmp} = {rhs};"));
        push_line(
            out,
            depth,
            &format!("if (!{tmp}.ok) return {outer_c}_err({tmp}.err);"),
        );
        Ok((tmp, inner_union))
    }

    fn emit_return(
        &mut self,
        out: &mut String,
        depth: usize,
        value: Option<Expr<'a>>,
    ) -> Result<(), CoreError> {
        let Some(value) = value else {
            // A bare return in main still has to produce the exit status.
            if self.in_main {
                push_line(out, depth, "return 0;");
            } else {
                push_line(out, depth, "return;");
            }
            return Ok(());
        };

        match self.current_ret {
            Type::Array { .. } if !self.in_main => {
                let wrapper = self.c_ret_type(self.current_ret)?;
                match value {
                    // Same wrapper typedef on both sides; return it as is.
                    Expr::Call { callee, args } => {
                        let items = self.emit_list(args)?;
                        push_line(out, depth, &format!("return {callee}({items});"));
                    }
                    Expr::ArrayLiteral(elements) => {
                        let items = self.emit_list(elements)?;
                        push_line(
                            out,
                            depth,
                            &format!("return ({wrapper}){{ .value = {{{items}}} }};"),
                        );
                    }
                    _ => {
                        let rhs = self.emit_expr(&value)?;
                        let t = self.next_tmp();
                        push_line(out, depth, &format!("{wrapper} __ret{t};"));
                        push_line(
                            out,
                            depth,
                            &format!("memcpy(__ret{t}.value, {rhs}, sizeof(__ret{t}.value));"),
                        );
                        push_line(out, depth, &format!("return __ret{t};"));
                    }
                }
                Ok(())
            }
            Type::ErrorUnion { .. } if !self.in_main => {
                let union_c = self.c_type(self.current_ret)?;
                if let Expr::Try(inner) = value {
                    let (tmp, inner_union) = self.emit_try_tmp(out, depth, inner)?;
                    let ctor = union_ctor(self.current_ret, unwrapped_ok(inner_union)?);
                    push_line(out, depth, &format!("return {union_c}{ctor}({tmp}.value);"));
                    return Ok(());
                }
                let wrap = self.union_wrap(self.current_ret, &value)?;
                let rhs = self.emit_expr(&value)?;
                match wrap {
                    None => push_line(out, depth, &format!("return {rhs};")),
                    Some(ctor) => {
                        push_line(out, depth, &format!("return {union_c}{ctor}({rhs});"))
                    }
                }
                Ok(())
            }
            _ => {
                let rhs = self.emit_expr(&value)?;
                push_line(out, depth, &format!("return {rhs};"));
                Ok(())
            }
        }
    }

    fn emit_for(
        &mut self,
        out: &mut String,
        depth: usize,
        variable: &'a str,
        iterable: &Expr<'a>,
        body: &'a [Stmt<'a>],
        parallel: bool,
    ) -> Result<(), CoreError> {
        if let Expr::Range {
            start,
            end,
            inclusive,
        } = *iterable
        {
            let start_ty = self.expr_type(start)?;
            let end_ty = self.expr_type(end)?;
            let induction = if start_ty.is_64_bit() || end_ty.is_64_bit() {
                "int64_t"
            } else {
                "int32_t"
            };
            let var_ty = if !start.is_literal_arithmetic() {
                start_ty
            } else if !end.is_literal_arithmetic() {
                end_ty
            } else {
                Type::I32
            };
            let from = self.emit_expr(start)?;
            let until = self.emit_expr(end)?;
            let cmp = if inclusive { "<=" } else { "<" };
            if parallel {
                push_line(out, depth, "#pragma omp parallel for");
            }
            push_line(
                out,
                depth,
                &format!(
                    "for ({induction} {variable} = {from}; {variable} {cmp} {until}; {variable}++) {{"
                ),
            );
            self.locals.push(HashMap::new());
            self.declare_local(variable, var_ty);
            let result = body
                .iter()
                .try_for_each(|stmt| self.emit_stmt(stmt, out, depth + 1));
            self.locals.pop();
            result?;
            push_line(out, depth, "}");
            return Ok(());
        }

        // Arrays and slices iterate inside a nested block; both temp ids are
        // always allocated, the iter id is used only for slices.
        let iter_ty = self.expr_type(iterable)?;
        let idx = self.next_tmp();
        let iter_id = self.next_tmp();
        push_line(out, depth, "{");
        let (elem, bound, element_init) = match iter_ty {
            Type::Array { len, elem } => {
                let target = self.emit_expr(iterable)?;
                let elem_c = self.c_type(*elem)?;
                (
                    *elem,
                    len.to_string(),
                    format!("{elem_c} {variable} = {target}[__i{idx}];"),
                )
            }
            Type::Slice { elem } => {
                let slice_c = self.c_type(iter_ty)?;
                let rhs = self.emit_expr(iterable)?;
                push_line(out, depth + 1, &format!("{slice_c} __iter{iter_id} = {rhs};"));
                let elem_c = self.c_type(*elem)?;
                (
                    *elem,
                    format!("__iter{iter_id}.len"),
                    format!("{elem_c} {variable} = __iter{iter_id}.data[__i{idx}];"),
                )
            }
            other => return Err(cg_err(format!("cannot iterate a value of type {other}"))),
        };
        if parallel {
            push_line(out, depth + 1, "#pragma omp parallel for");
        }
        push_line(
            out,
            depth + 1,
            &format!("for (size_t __i{idx} = 0; __i{idx} < {bound}; __i{idx}++) {{"),
        );
        push_line(out, depth + 2, &element_init);
        self.locals.push(HashMap::new());
        self.declare_local(variable, elem);
        let result = body
            .iter()
            .try_for_each(|stmt| self.emit_stmt(stmt, out, depth + 2));
        self.locals.pop();
        result?;
        push_line(out, depth + 1, "}");
        push_line(out, depth, "}");
        Ok(())
    }

    fn emit_parallel_block(
        &mut self,
        out: &mut String,
        depth: usize,
        body: &'a [Stmt<'a>],
    ) -> Result<(), CoreError> {
        self.needs_runner = true;
        let mut targets = Vec::new();
        for stmt in body {
            let Stmt::Expr(Expr::Call { callee, .. }) = *stmt else {
                return Err(cg_err("parallel block contains a non-call statement"));
            };
            targets.push(callee);
        }
        let count = targets.len();
        let threads = self.next_tmp();
        let fns = self.next_tmp();
        push_line(out, depth, &format!("pthread_t __par_threads{threads}[{count}];"));
        let list = targets
            .iter()
            .map(|name| format!("(void (*)(void)){name}"))
            .collect::<Vec<_>>()
            .join(", ");
        push_line(
            out,
            depth,
            &format!("void (*__par_fns{fns}[{count}])(void) = {{ {list} }};"),
        );
        for i in 0..count {
            push_line(
                out,
                depth,
                &format!(
                    "pthread_create(&__par_threads{threads}[{i}], NULL, __1im_par_runner, (void*)&__par_fns{fns}[{i}]);"
                ),
            );
        }
        for i in 0..count {
            push_line(
                out,
                depth,
                &format!("pthread_join(__par_threads{threads}[{i}], NULL);"),
            );
        }
        Ok(())
    }

    fn emit_try_catch(
        &mut self,
        out: &mut String,
        depth: usize,
        try_expr: &Expr<'a>,
        catch_var: Option<&'a str>,
        catch_body: &'a [Stmt<'a>],
    ) -> Result<(), CoreError> {
        let union_ty = self.expr_type(try_expr)?;
        let Type::ErrorUnion { err, .. } = union_ty else {
            return Err(cg_err("try/catch on a non-union value"));
        };
        let union_c = self.c_type(union_ty)?;
        let t = self.next_tmp();
        let rhs = self.emit_expr(try_expr)?;
        push_line(out, depth, "{");
        push_line(out, depth + 1, &format!("{union_c} __try{t} = {rhs};"));
        push_line(out, depth + 1, &format!("if (!__try{t}.ok) {{"));
        self.locals.push(HashMap::new());
        if let Some(var) = catch_var {
            let err_c = self.c_type(*err)?;
            push_line(out, depth + 2, &format!("{err_c} {var} = __try{t}.err;"));
            self.declare_local(var, *err);
        }
        let result = catch_body
            .iter()
            .try_for_each(|stmt| self.emit_stmt(stmt, out, depth + 2));
        self.locals.pop();
        result?;
        push_line(out, depth + 1, "}");
        push_line(out, depth, "}");
        Ok(())
    }

    /// `print` lowers to printf with a format chosen by the argument type.
    fn emit_print(&mut self, out: &mut String, depth: usize, arg: &Expr<'a>) -> Result<(), CoreError> {
        let ty = self.expr_type(arg)?;
        let text = self.emit_expr(arg)?;
        let line = match ty {
            Type::I8 | Type::I16 | Type::I32 => format!("printf(\"%d\\n\", (int){text});"),
            Type::I64 => format!("printf(\"%\" PRId64 \"\\n\", (int64_t){text});"),
            Type::U8 | Type::U16 | Type::U32 => {
                format!("printf(\"%u\\n\", (unsigned int){text});")
            }
            Type::U64 => format!("printf(\"%\" PRIu64 \"\\n\", (uint64_t){text});"),
            Type::F32 => format!("printf(\"%f\\n\", (float){text});"),
            Type::F64 => format!("printf(\"%f\\n\", (double){text});"),
            Type::Bool => format!("printf(\"%s\\n\", {text} ? \"true\" : \"false\");"),
            Type::Str => format!("printf(\"%s\\n\", {text});"),
            other => return Err(cg_err(format!("print does not support values of type {other}"))),
        };
        push_line(out, depth, &line);
        Ok(())
    }
}

/// Pick the `_ok` or `_err` constructor suffix for wrapping a value of
/// `value_ty` into `union`. The sides of a union are distinct, so the
/// choice is unambiguous.
fn union_ctor<'a>(union: Type<'a>, value_ty: Type<'a>) -> &'static str {
    match union {
        Type::ErrorUnion { ok, err } if value_ty == *err && value_ty != *ok => "_err",
        _ => "_ok",
    }
}

fn unwrapped_ok(union: Type<'_>) -> Result<Type<'_>, CoreError> {
    match union {
        Type::ErrorUnion { ok, .. } => Ok(*ok),
        other => Err(cg_err(format!("expected an error union, found {other}"))),
    }
}

/// Zero for the inactive field of an error union: `NULL` for strings,
/// a zero-initialised compound literal otherwise.
fn zero_value(ty: Type<'_>, c_name: &str) -> String {
    if matches!(ty, Type::Str) {
        "NULL".to_string()
    } else {
        format!("({c_name}){{0}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typecheck::analyze;

    fn gen(source: &str) -> String {
        let arena = Bump::new();
        let tokens = lex(source).expect("lex");
        let program = parse(&arena, &tokens).expect("parse");
        let sigs = analyze(&arena, &program).expect("analyze");
        generate(&arena, &program, &sigs).expect("generate")
    }

    const EXPECTED_PREAMBLE: &str = "#include <stdio.h>\n\
#include <stdint.h>\n\
#include <inttypes.h>\n\
#include <stdbool.h>\n\
#include <string.h>\n\
#include <stddef.h>\n\
#include <pthread.h>\n";

    #[test]
    fn emits_simple_assignment_and_print() {
        let out = gen("set age to 41\nprint(age)");
        let expected = format!(
            "{EXPECTED_PREAMBLE}\n\n\
int main(void) {{\n    \
int32_t age = 41;\n    \
printf(\"%d\\n\", (int)age);\n    \
return 0;\n\
}}\n"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn output_is_deterministic() {
        let source = "set fail as fn returns i32!str\n    return \"boom\"\n\
                      set s as []i32 to [1, 2]\ntry fail() catch err\n    print(err)";
        assert_eq!(gen(source), gen(source));
    }

    #[test]
    fn function_bodies_indent_from_depth_two() {
        let out = gen("set add with a as i32, b as i32 returns i32\n    return a + b\nprint(add(2, 3))");
        assert!(out.contains("int32_t add(int32_t a, int32_t b);\n"));
        assert!(out.contains("int32_t add(int32_t a, int32_t b) {\n        return (a + b);\n}\n"));
        assert!(out.contains("    printf(\"%d\\n\", (int)add(2, 3));\n"));
    }

    #[test]
    fn while_loop_matches_reference_shape() {
        let out = gen("set i to 0\nloop while i < 3\n    print(i)\n    set i to i + 1");
        assert!(out.contains("    while ((i < 3)) {\n"));
        assert!(out.contains("        i = (i + 1);\n"));
    }

    #[test]
    fn if_condition_gets_an_extra_paren_pair() {
        let out = gen("set n to 5\nif n < 2 then\n    print(1)\nelse\n    print(2)");
        assert!(out.contains("    if ((n < 2)) {\n"));
        assert!(out.contains("    } else {\n"));
    }

    #[test]
    fn array_for_loop_uses_nested_block_and_size_t_index() {
        let out = gen("set nums to [1, 2, 3]\nloop for n in nums\n    print(n)");
        assert!(out.contains("    int32_t nums[3] = {1, 2, 3};\n"));
        assert!(out.contains(
            "    {\n        for (size_t __i0 = 0; __i0 < 3; __i0++) {\n            int32_t n = nums[__i0];\n"
        ));
    }

    #[test]
    fn slice_for_loop_captures_the_iterable() {
        let out = gen("set s as []i32 to [4, 5, 6]\nloop for x in s\n    print(x)");
        assert!(out.contains("typedef struct { int32_t* data; size_t len; } slice_i32;\n"));
        assert!(out.contains("    int32_t s_data[3] = {4, 5, 6};\n"));
        assert!(out.contains("    slice_i32 s = { s_data, 3 };\n"));
        assert!(out.contains("        slice_i32 __iter1 = s;\n"));
        assert!(out.contains(
            "        for (size_t __i0 = 0; __i0 < __iter1.len; __i0++) {\n            int32_t x = __iter1.data[__i0];\n"
        ));
    }

    #[test]
    fn range_for_loop_types_the_induction_variable() {
        let out = gen("loop for i in 0..3\n    print(i)");
        assert!(out.contains("    for (int32_t i = 0; i < 3; i++) {\n"));
        let out = gen("set n as i64 to 9\nloop for i in 0..=n\n    print(i)");
        assert!(out.contains("    for (int64_t i = 0; i <= n; i++) {\n"));
    }

    #[test]
    fn parallel_for_gets_an_omp_pragma() {
        let out = gen("set nums to [1, 2]\nparallel for n in nums\n    print(n)");
        assert!(out.contains("        #pragma omp parallel for\n        for (size_t __i0"));
    }

    #[test]
    fn parallel_block_spawns_and_joins_in_order() {
        let out = gen(
            "set show_a as fn\n    print(100)\nset show_b as fn\n    print(200)\n\
             parallel\n    show_a()\n    show_b()",
        );
        assert!(out.contains(PAR_RUNNER));
        assert!(out.contains("    pthread_t __par_threads0[2];\n"));
        assert!(out.contains(
            "    void (*__par_fns1[2])(void) = { (void (*)(void))show_a, (void (*)(void))show_b };\n"
        ));
        assert!(out.contains(
            "    pthread_create(&__par_threads0[0], NULL, __1im_par_runner, (void*)&__par_fns1[0]);\n"
        ));
        let create_a = out.find("pthread_create(&__par_threads0[0]").unwrap();
        let create_b = out.find("pthread_create(&__par_threads0[1]").unwrap();
        let join_a = out.find("pthread_join(__par_threads0[0]").unwrap();
        let join_b = out.find("pthread_join(__par_threads0[1]").unwrap();
        assert!(create_a < create_b && create_b < join_a && join_a < join_b);
    }

    #[test]
    fn runner_shim_is_emitted_once() {
        let out = gen(
            "set a as fn\n    print(1)\nset b as fn\n    print(2)\n\
             parallel\n    a()\n    b()\nparallel\n    a()\n    b()",
        );
        assert_eq!(out.matches("__1im_par_runner(void* arg)").count(), 1);
    }

    #[test]
    fn error_union_helpers_match_reference_shape() {
        let out = gen("set fail as fn returns i32!str\n    return \"boom\"\ntry fail() catch e\n    print(e)");
        assert!(out.contains(
            "typedef struct { bool ok; int32_t value; const char* err; } err_i32_str;\n"
        ));
        assert!(out.contains(
            "static inline err_i32_str err_i32_str_ok(int32_t value) { return (err_i32_str){ .ok = true, .value = value, .err = NULL }; }\n"
        ));
        assert!(out.contains(
            "static inline err_i32_str err_i32_str_err(const char* err) { return (err_i32_str){ .ok = false, .value = (int32_t){0}, .err = err }; }\n"
        ));
        assert!(out.contains("        return err_i32_str_err(\"boom\");\n"));
    }

    #[test]
    fn helper_typedefs_are_deduplicated() {
        let out = gen(
            "set f as fn returns i32!str\n    return 1\nset g as fn returns i32!str\n    return 2\n\
             set x to f()\nset y to g()",
        );
        assert_eq!(out.matches("} err_i32_str;").count(), 1);
    }

    #[test]
    fn try_propagation_matches_reference_shape() {
        let out = gen(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             set wrap as fn returns i32!str\n    set x to try fail()\n    return x",
        );
        assert!(out.contains(
            "err_i32_str wrap() {\n        \
err_i32_str __try0 = fail();\n        \
if (!__try0.ok) return err_i32_str_err(__try0.err);\n        \
int32_t x = __try0.value;\n        \
return err_i32_str_ok(x);\n}\n"
        ));
    }

    #[test]
    fn try_catch_matches_reference_shape() {
        let out = gen(
            "set fail as fn returns i32!str\n    return \"boom\"\n\
             try fail() catch err\n    print(err)",
        );
        assert!(out.contains(
            "    {\n        \
err_i32_str __try0 = fail();\n        \
if (!__try0.ok) {\n            \
const char* err = __try0.err;\n            \
printf(\"%s\\n\", err);\n        \
}\n    }\n"
        ));
    }

    #[test]
    fn array_return_uses_a_wrapper_struct() {
        let out = gen(
            "set make3 as fn returns [3]i32\n    return [7, 8, 9]\n\
             set arr as [3]i32 to make3()\nprint(arr[0])",
        );
        assert!(out.contains("typedef struct { int32_t value[3]; } arrret_arr3_i32;\n"));
        assert!(out.contains("arrret_arr3_i32 make3();\n"));
        assert!(out.contains("        return (arrret_arr3_i32){ .value = {7, 8, 9} };\n"));
        assert!(out.contains("    int32_t arr[3];\n"));
        assert!(out.contains("    memcpy(arr, (make3()).value, sizeof(arr));\n"));
    }

    #[test]
    fn array_parameters_keep_their_dimensions() {
        let out = gen(
            "set first with nums as [3]i32 returns i32\n    return nums[0]\n\
             set xs to [1, 2, 3]\nprint(first(xs))",
        );
        assert!(out.contains("int32_t first(int32_t nums[3]);\n"));
        assert!(out.contains("        return nums[0];\n"));
    }

    #[test]
    fn error_union_reassignment_rewraps_both_sides() {
        let out = gen(
            "set r as i32!str to 1\nset r to \"oops\"\nset r to 2\nprint(1)",
        );
        assert!(out.contains("    err_i32_str r = err_i32_str_ok(1);\n"));
        assert!(out.contains("    r = err_i32_str_err(\"oops\");\n"));
        assert!(out.contains("    r = err_i32_str_ok(2);\n"));
    }

    #[test]
    fn union_literals_resolve_against_the_ok_side_first() {
        let out = gen(
            "set f as fn returns u8!str\n    return 3\nset r as u8!str to 1\nprint(1)",
        );
        assert!(out.contains("        return err_u8_str_ok(3);\n"));
        assert!(out.contains("    err_u8_str r = err_u8_str_ok(1);\n"));
    }

    #[test]
    fn print_formats_follow_the_argument_type() {
        let out = gen(
            "set small as i8 to 42\nset large as i64 to 99\nset byte as u8 to 7\n\
             set wide as u64 to 8\nset ratio as f32 to 1.5\nset precise as f64 to 2.5\n\
             set flag to true\nset s as str to \"hi\"\n\
             print(small)\nprint(large)\nprint(byte)\nprint(wide)\nprint(ratio)\n\
             print(precise)\nprint(flag)\nprint(s)",
        );
        assert!(out.contains("printf(\"%d\\n\", (int)small);"));
        assert!(out.contains("printf(\"%\" PRId64 \"\\n\", (int64_t)large);"));
        assert!(out.contains("printf(\"%u\\n\", (unsigned int)byte);"));
        assert!(out.contains("printf(\"%\" PRIu64 \"\\n\", (uint64_t)wide);"));
        assert!(out.contains("printf(\"%f\\n\", (float)ratio);"));
        assert!(out.contains("printf(\"%f\\n\", (double)precise);"));
        assert!(out.contains("printf(\"%s\\n\", flag ? \"true\" : \"false\");"));
        assert!(out.contains("printf(\"%s\\n\", s);"));
    }

    #[test]
    fn len_is_constant_for_arrays_and_field_for_slices() {
        let out = gen(
            "set xs to [1, 2, 3]\nset s as []i32 to xs\nprint(len(xs))\nprint(len(s))",
        );
        assert!(out.contains("printf(\"%d\\n\", (int)3);"));
        assert!(out.contains("printf(\"%d\\n\", (int)s.len);"));
    }

    #[test]
    fn user_main_returns_its_own_exit_code() {
        let out = gen("set main as fn returns u8\n    return 3");
        assert!(out.contains("int main(void) {\n    return 3;\n}\n"));
        assert_eq!(out.matches("int main").count(), 1);
    }

    #[test]
    fn index_assignment_targets_arrays_and_slices() {
        let out = gen(
            "set xs to [1, 2]\nset xs[0] to 9\nset s as []i32 to xs\nset s[1] to 8",
        );
        assert!(out.contains("    xs[0] = 9;\n"));
        assert!(out.contains("    s.data[1] = 8;\n"));
    }

    #[test]
    fn breaks_and_continues_map_directly() {
        let out = gen(
            "set i to 0\nloop while true\n    set i to i + 1\n    if i > 3 then\n        break\n    continue",
        );
        assert!(out.contains("            break;\n"));
        assert!(out.contains("        continue;\n"));
    }
}
