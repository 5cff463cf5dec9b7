//! Printing anything in the AST back out as C source, from whole [`Module`]s
//! to single expressions (e.g. for diagnostics).
//!
//! # Usage
//!
//! * [`print_module`]: the whole translation unit (the usual pass output)
//! * [`expr_to_string`]/[`stmt_to_string`]: fragments, with the function they
//!   belong to providing the entity definitions
//! * [`structural_key`]: like [`expr_to_string`], but with every variable
//!   disambiguated by its identity (so that it can be used for equality)
//! * [`diag_to_string`]: human-readable rendering of a [`Diag`]nostic
//!
//! Intrinsic calls ([`ExprKind::Intrinsic`]) are printed by expanding their
//! template, replacing each `%N%` placeholder with the `N`th (1-based) argument.

// FIXME stop using `itertools` for methods like `intersperse` when they
// get stabilized on `Iterator` instead.
#![allow(unstable_name_collisions)]
use itertools::Itertools as _;

use crate::pragma::Pragma;
use crate::{
    Context, Diag, DiagLevel, DiagMsgPart, Entity, Expr, ExprKind, Func, FuncDefBody, Item,
    LocalDecl, Module, ModuleCx, Node, Stmt, StmtKind, Type, TypeKind, UnOp,
};
use std::fmt::Write as _;

/// Print a whole [`Module`], in the order of its [`items`](Module::items).
pub fn print_module(module: &Module) -> String {
    let mcx = module.module_cx();
    let mut printer = Printer::new(mcx, None);
    for (i, item) in module.items.iter().enumerate() {
        if i > 0 {
            printer.out.push('\n');
        }
        // Only the last declaration of a function carries its definition.
        let is_redeclared = match item {
            Item::Func(func) => module.items[i + 1..].contains(&Item::Func(*func)),
            _ => false,
        };
        printer.print_item(item, is_redeclared);
    }
    printer.out
}

/// Print `expr` (part of `func_def_body`) as a C expression.
pub fn expr_to_string(mcx: ModuleCx<'_>, func_def_body: &FuncDefBody, expr: Expr) -> String {
    let mut printer = Printer::new(mcx, Some(func_def_body));
    printer.print_expr(expr, Prec::Comma);
    printer.out
}

/// Print `stmt` (part of `func_def_body`), one C statement per line.
pub fn stmt_to_string(mcx: ModuleCx<'_>, func_def_body: &FuncDefBody, stmt: Stmt) -> String {
    let mut printer = Printer::new(mcx, Some(func_def_body));
    printer.print_stmt(stmt);
    printer.out
}

/// Textual key for `expr` which is equal for two expressions exactly when they
/// have the same shape, and refer to the same variables (not merely the same
/// names, as shadowing could make those refer to different storage).
pub fn structural_key(mcx: ModuleCx<'_>, func_def_body: &FuncDefBody, expr: Expr) -> String {
    let mut printer = Printer::new(mcx, Some(func_def_body));
    printer.with_var_identities = true;
    printer.print_expr(expr, Prec::Comma);
    printer.out
}

/// Print `ty` as an abstract declarator (e.g. `float *`), as used by casts.
pub fn type_to_string(cx: &Context, ty: Type) -> String {
    declarator(cx, ty, String::new())
}

/// Render one diagnostic attached to `node`, e.g.:
/// `note: not vectorized: unsupported loop control flow (at: `break;`)`.
pub fn diag_to_string(
    mcx: ModuleCx<'_>,
    func_def_body: &FuncDefBody,
    node: Node,
    diag: &Diag,
) -> String {
    let Diag { level, message } = diag;
    let mut out = match level {
        DiagLevel::Bug(location) => format!("BUG {location}: "),
        DiagLevel::Error => "error: ".to_string(),
        DiagLevel::Warning => "warning: ".to_string(),
        DiagLevel::Note => "note: ".to_string(),
    };
    for part in message {
        match part {
            DiagMsgPart::Plain(text) => out += text,
            &DiagMsgPart::Expr(expr) => out += &expr_to_string(mcx, func_def_body, expr),
            &DiagMsgPart::Type(ty) => out += &type_to_string(mcx.cx, ty),
        }
    }
    let at = match node {
        Node::Expr(expr) => expr_to_string(mcx, func_def_body, expr),
        Node::Stmt(stmt) => {
            let printed = stmt_to_string(mcx, func_def_body, stmt);
            // Only the first (non-comment) line, which is enough to identify it.
            printed
                .lines()
                .map(str::trim)
                .find(|line| !line.starts_with("//") && !line.starts_with("#pragma"))
                .unwrap_or_default()
                .to_string()
        }
    };
    let _ = write!(out, " (at: `{at}`)");
    out
}

/// C operator precedence levels, lowest first.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Comma,
    Assign,
    Cond,
    LogOr,
    LogAnd,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Relational,
    Shift,
    Additive,
    Multiplicative,
    Unary,
    Postfix,
    Primary,
}

impl Prec {
    fn next(self) -> Self {
        match self {
            Prec::Comma => Prec::Assign,
            Prec::Assign => Prec::Cond,
            Prec::Cond => Prec::LogOr,
            Prec::LogOr => Prec::LogAnd,
            Prec::LogAnd => Prec::BitOr,
            Prec::BitOr => Prec::BitXor,
            Prec::BitXor => Prec::BitAnd,
            Prec::BitAnd => Prec::Equality,
            Prec::Equality => Prec::Relational,
            Prec::Relational => Prec::Shift,
            Prec::Shift => Prec::Additive,
            Prec::Additive => Prec::Multiplicative,
            Prec::Multiplicative => Prec::Unary,
            Prec::Unary => Prec::Postfix,
            Prec::Postfix | Prec::Primary => Prec::Primary,
        }
    }

    fn of_bin_op(op: crate::BinOp) -> Self {
        use crate::BinOp as B;
        match op {
            B::Mul | B::Div | B::Rem => Prec::Multiplicative,
            B::Add | B::Sub => Prec::Additive,
            B::Shl | B::Shr => Prec::Shift,
            B::Lt | B::Gt | B::Le | B::Ge => Prec::Relational,
            B::Eq | B::Ne => Prec::Equality,
            B::BitAnd => Prec::BitAnd,
            B::BitXor => Prec::BitXor,
            B::BitOr => Prec::BitOr,
            B::LogAnd => Prec::LogAnd,
            B::LogOr => Prec::LogOr,
        }
    }
}

const INDENT: &str = "    ";

struct Printer<'a> {
    mcx: ModuleCx<'a>,
    func_def_body: Option<&'a FuncDefBody>,
    out: String,
    indent: usize,

    /// Append `#N` (the variable's entity index) to every local variable name.
    with_var_identities: bool,
}

impl<'a> Printer<'a> {
    fn new(mcx: ModuleCx<'a>, func_def_body: Option<&'a FuncDefBody>) -> Self {
        Self { mcx, func_def_body, out: String::new(), indent: 0, with_var_identities: false }
    }

    fn cx(&self) -> &'a Context {
        self.mcx.cx
    }

    // HACK only called while printing function bodies, which always set it.
    fn func(&self) -> &'a FuncDefBody {
        match self.func_def_body {
            Some(func_def_body) => func_def_body,
            None => unreachable!("printing function contents without a function body"),
        }
    }

    fn line_start(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
    }

    fn print_item(&mut self, item: &Item, as_prototype: bool) {
        let cx = self.cx();
        match item {
            &Item::Struct(ty) => {
                if let TypeKind::Struct { name, fields } = &cx[ty].kind {
                    let _ = writeln!(self.out, "struct {}\n{{", &cx[*name]);
                    for &(field_name, field_ty) in fields {
                        let _ = writeln!(
                            self.out,
                            "{INDENT}{};",
                            declarator(cx, field_ty, cx[field_name].to_string())
                        );
                    }
                    self.out.push_str("};\n");
                }
            }
            Item::Enum { name, constants } => {
                self.out.push_str("enum ");
                if let Some(name) = name {
                    let _ = write!(self.out, "{} ", &cx[*name]);
                }
                let constants = constants
                    .iter()
                    .map(|&(name, value)| format!("{} = {value}", &cx[name]))
                    .join(", ");
                let _ = writeln!(self.out, "{{ {constants} }};");
            }
            &Item::GlobalVar(gv) => {
                let decl = &self.mcx.global_vars[gv];
                let volatile = if decl.is_volatile { "volatile " } else { "" };
                let _ = writeln!(
                    self.out,
                    "{volatile}{};",
                    declarator(cx, decl.ty, cx[decl.name].to_string())
                );
            }
            &Item::Func(func) => self.print_func(func, as_prototype),
        }
    }

    fn print_func(&mut self, func: Func, as_prototype: bool) {
        let cx = self.cx();
        let mcx = self.mcx;
        let decl = &mcx.funcs[func];
        let inner = decl.def.as_ref().or(self.func_def_body);
        let outer = std::mem::replace(&mut self.func_def_body, inner);
        if !as_prototype {
            for pragma in &decl.pragmas {
                self.print_pragma(pragma);
            }
        }
        let name = &cx[decl.name];
        match decl.def.as_ref().filter(|_| !as_prototype) {
            None => {
                let mut params =
                    decl.param_types.iter().map(|&ty| type_to_string(cx, ty)).join(", ");
                if params.is_empty() {
                    params = "void".to_string();
                }
                let _ = writeln!(
                    self.out,
                    "{};",
                    declarator(cx, decl.ret_type, format!("{name}({params})"))
                );
            }
            Some(func_def_body) => {
                let mut params = func_def_body
                    .params
                    .iter()
                    .map(|&param| {
                        let param_decl = &func_def_body.vars[param];
                        declarator(cx, param_decl.ty, cx[param_decl.name].to_string())
                    })
                    .join(", ");
                if params.is_empty() {
                    params = "void".to_string();
                }
                let _ = writeln!(
                    self.out,
                    "{}",
                    declarator(cx, decl.ret_type, format!("{name}({params})"))
                );
                self.print_stmt(func_def_body.body);
            }
        }
        self.func_def_body = outer;
    }

    fn print_pragma(&mut self, pragma: &Pragma) {
        let cx = self.cx();
        self.line_start();
        let _ = write!(self.out, "#pragma scout {} {}", pragma.domain.name(), &cx[pragma.action]);
        for arg in &pragma.args {
            let _ = write!(self.out, " {}", &cx[arg.name]);
            if !arg.exprs.is_empty() {
                self.out.push('(');
                for (i, &expr) in arg.exprs.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.print_expr(expr, Prec::Assign);
                }
                self.out.push(')');
            }
        }
        self.out.push('\n');
    }

    fn print_stmt(&mut self, stmt: Stmt) {
        let func = self.func();
        let def = &func.stmts[stmt];
        for comment in &def.comments {
            self.line_start();
            let _ = writeln!(self.out, "// {comment}");
        }
        for pragma in &def.pragmas {
            self.print_pragma(pragma);
        }

        self.line_start();
        match &def.kind {
            StmtKind::Null => self.out.push_str(";\n"),
            &StmtKind::Expr(expr) => {
                self.print_expr(expr, Prec::Comma);
                self.out.push_str(";\n");
            }
            StmtKind::Decl(decls) => {
                self.print_decl(decls);
                self.out.push_str(";\n");
            }
            StmtKind::Compound(children) => {
                self.out.push_str("{\n");
                self.indent += 1;
                for &child in children {
                    self.print_stmt(child);
                }
                self.indent -= 1;
                self.line_start();
                self.out.push_str("}\n");
            }
            &StmtKind::If { cond, then_stmt, else_stmt } => {
                self.out.push_str("if (");
                self.print_expr(cond, Prec::Comma);
                self.out.push_str(")\n");
                self.print_sub_stmt(then_stmt);
                if let Some(else_stmt) = else_stmt {
                    self.line_start();
                    self.out.push_str("else\n");
                    self.print_sub_stmt(else_stmt);
                }
            }
            &StmtKind::For { init, cond, step, body } => {
                self.out.push_str("for (");
                if let Some(init) = init {
                    match &func.stmts[init].kind {
                        &StmtKind::Expr(expr) => self.print_expr(expr, Prec::Comma),
                        StmtKind::Decl(decls) => self.print_decl(decls),
                        _ => {}
                    }
                }
                self.out.push(';');
                if let Some(cond) = cond {
                    self.out.push(' ');
                    self.print_expr(cond, Prec::Comma);
                }
                self.out.push(';');
                if let Some(step) = step {
                    self.out.push(' ');
                    self.print_expr(step, Prec::Comma);
                }
                self.out.push_str(")\n");
                self.print_sub_stmt(body);
            }
            &StmtKind::While { cond, body } => {
                self.out.push_str("while (");
                self.print_expr(cond, Prec::Comma);
                self.out.push_str(")\n");
                self.print_sub_stmt(body);
            }
            &StmtKind::DoWhile { body, cond } => {
                self.out.push_str("do\n");
                self.print_sub_stmt(body);
                self.line_start();
                self.out.push_str("while (");
                self.print_expr(cond, Prec::Comma);
                self.out.push_str(");\n");
            }
            &StmtKind::Switch { cond, body } => {
                self.out.push_str("switch (");
                self.print_expr(cond, Prec::Comma);
                self.out.push_str(")\n");
                self.print_sub_stmt(body);
            }
            &StmtKind::Case { value, stmt } => {
                self.out.push_str("case ");
                self.print_expr(value, Prec::Cond);
                self.out.push_str(":\n");
                self.print_sub_stmt(stmt);
            }
            &StmtKind::Default(stmt) => {
                self.out.push_str("default:\n");
                self.print_sub_stmt(stmt);
            }
            StmtKind::Break => self.out.push_str("break;\n"),
            StmtKind::Continue => self.out.push_str("continue;\n"),
            &StmtKind::Return(value) => {
                self.out.push_str("return");
                if let Some(value) = value {
                    self.out.push(' ');
                    self.print_expr(value, Prec::Comma);
                }
                self.out.push_str(";\n");
            }
            &StmtKind::Goto(label) => {
                let _ = writeln!(self.out, "goto {};", &self.cx()[label]);
            }
            &StmtKind::Label { name, stmt } => {
                let _ = writeln!(self.out, "{}:", &self.cx()[name]);
                self.print_stmt(stmt);
            }
        }
    }

    /// Print the body of a control-flow statement: compound statements line up
    /// with their parent, anything else gets indented one level deeper.
    fn print_sub_stmt(&mut self, stmt: Stmt) {
        if let StmtKind::Compound(_) = self.func().stmts[stmt].kind {
            self.print_stmt(stmt);
        } else {
            self.indent += 1;
            self.print_stmt(stmt);
            self.indent -= 1;
        }
    }

    /// Print a declaration (without the `;`), sharing the base type between
    /// all the declared variables (e.g. `float x = 0, *p, t[4]`).
    fn print_decl(&mut self, decls: &[LocalDecl]) {
        let cx = self.cx();
        let func = self.func();
        let mut base = None;
        for (i, &LocalDecl { var, init }) in decls.iter().enumerate() {
            let var_decl = &func.vars[var];
            let full = declarator(cx, var_decl.ty, self.var_name(var));
            let var_base = base_type_name(cx, var_decl.ty);
            let shared = base.as_ref().filter(|&base: &&(String, bool)| {
                base.0 == var_base && base.1 == var_decl.is_volatile
            });
            match shared.and_then(|(base, _)| full.strip_prefix(base.as_str())) {
                Some(rest) => {
                    self.out.push(',');
                    self.out.push_str(rest);
                }
                None => {
                    if i > 0 {
                        self.out.push_str("; ");
                    }
                    if var_decl.is_volatile {
                        self.out.push_str("volatile ");
                    }
                    self.out.push_str(&full);
                    base = Some((var_base, var_decl.is_volatile));
                }
            }
            if let Some(init) = init {
                self.out.push_str(" = ");
                self.print_expr(init, Prec::Assign);
            }
        }
    }

    fn var_name(&self, var: crate::Var) -> String {
        let name = &self.cx()[self.func().vars[var].name];
        if self.with_var_identities { format!("{name}#{}", var.idx()) } else { name.to_string() }
    }

    fn print_expr(&mut self, expr: Expr, min_prec: Prec) {
        let cx = self.cx();
        let func = self.func();
        let def = &func.exprs[expr];

        // Implicit casts are invisible, and don't affect precedence either.
        if let ExprKind::Cast { operand, implicit: true } = def.kind {
            return self.print_expr(operand, min_prec);
        }

        let prec = match &def.kind {
            &ExprKind::IntLit(v) if v < 0 => Prec::Unary,
            &ExprKind::FloatLit(v) if v.is_sign_negative() => Prec::Unary,
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::EnumConst { .. }
            | ExprKind::Var(_)
            | ExprKind::GlobalVar(_)
            | ExprKind::Func(_)
            | ExprKind::Paren(_) => Prec::Primary,
            ExprKind::Intrinsic { template, .. } => {
                if is_call_shaped(&cx[*template]) {
                    Prec::Primary
                } else {
                    Prec::Comma
                }
            }
            ExprKind::Call { .. } | ExprKind::Index { .. } | ExprKind::Member { .. } => {
                Prec::Postfix
            }
            ExprKind::Unary(UnOp::PostInc | UnOp::PostDec, _) => Prec::Postfix,
            ExprKind::Unary(..) | ExprKind::SizeOf(_) | ExprKind::Cast { .. } => Prec::Unary,
            &ExprKind::Binary(op, ..) => Prec::of_bin_op(op),
            ExprKind::Cond { .. } => Prec::Cond,
            ExprKind::Assign { .. } => Prec::Assign,
            ExprKind::Comma(..) => Prec::Comma,
        };
        let needs_parens = prec < min_prec;
        if needs_parens {
            self.out.push('(');
        }

        match &def.kind {
            &ExprKind::IntLit(v) => {
                let _ = write!(self.out, "{v}");
            }
            &ExprKind::FloatLit(v) => {
                let _ = write!(self.out, "{v:?}");
                if cx[def.ty].kind.scalar() == Some(crate::ScalarType::Float) {
                    self.out.push('f');
                }
            }
            &ExprKind::EnumConst { name, value: _ } => self.out.push_str(&cx[name]),
            &ExprKind::Var(var) => {
                let name = self.var_name(var);
                self.out.push_str(&name);
            }
            &ExprKind::GlobalVar(gv) => self.out.push_str(&cx[self.mcx.global_vars[gv].name]),
            &ExprKind::Func(f) => self.out.push_str(&cx[self.mcx.funcs[f].name]),
            &ExprKind::SizeOf(ty) => {
                let _ = write!(self.out, "sizeof({})", type_to_string(cx, ty));
            }
            &ExprKind::Unary(op, operand) => match op {
                UnOp::PostInc | UnOp::PostDec => {
                    self.print_expr(operand, Prec::Postfix);
                    self.out.push_str(if op == UnOp::PostInc { "++" } else { "--" });
                }
                _ => {
                    let symbol = match op {
                        UnOp::Plus => "+",
                        UnOp::Neg => "-",
                        UnOp::Not => "!",
                        UnOp::BitNot => "~",
                        UnOp::Deref => "*",
                        UnOp::AddrOf => "&",
                        UnOp::PreInc => "++",
                        UnOp::PreDec => "--",
                        UnOp::PostInc | UnOp::PostDec => unreachable!(),
                    };
                    self.out.push_str(symbol);
                    // Avoid accidentally printing `- -x` as `--x`.
                    if let ExprKind::Unary(inner_op, _) = func.exprs[operand].kind
                        && matches!(
                            (op, inner_op),
                            (UnOp::Neg | UnOp::PreDec, UnOp::Neg | UnOp::PreDec)
                                | (UnOp::Plus | UnOp::PreInc, UnOp::Plus | UnOp::PreInc)
                        )
                    {
                        self.out.push(' ');
                    }
                    self.print_expr(operand, Prec::Unary);
                }
            },
            &ExprKind::Binary(op, a, b) => {
                self.print_expr(a, prec);
                let _ = write!(self.out, " {} ", op.c_symbol());
                self.print_expr(b, prec.next());
            }
            &ExprKind::Assign { op, lhs, rhs } => {
                self.print_expr(lhs, Prec::Unary);
                match op {
                    Some(op) => {
                        let _ = write!(self.out, " {}= ", op.c_symbol());
                    }
                    None => self.out.push_str(" = "),
                }
                self.print_expr(rhs, Prec::Assign);
            }
            &ExprKind::Cond { cond, then_expr, else_expr } => {
                self.print_expr(cond, Prec::LogOr);
                self.out.push_str(" ? ");
                self.print_expr(then_expr, Prec::Comma);
                self.out.push_str(" : ");
                self.print_expr(else_expr, Prec::Cond);
            }
            ExprKind::Call { callee, args } => {
                self.print_expr(*callee, Prec::Postfix);
                self.out.push('(');
                for (i, &arg) in args.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.print_expr(arg, Prec::Assign);
                }
                self.out.push(')');
            }
            &ExprKind::Index { base, index } => {
                self.print_expr(base, Prec::Postfix);
                self.out.push('[');
                self.print_expr(index, Prec::Comma);
                self.out.push(']');
            }
            &ExprKind::Member { base, field, arrow } => {
                self.print_expr(base, Prec::Postfix);
                self.out.push_str(if arrow { "->" } else { "." });
                self.out.push_str(&cx[field]);
            }
            &ExprKind::Cast { operand, implicit: _ } => {
                let _ = write!(self.out, "({})", type_to_string(cx, def.ty));
                self.print_expr(operand, Prec::Unary);
            }
            &ExprKind::Paren(inner) => {
                self.out.push('(');
                self.print_expr(inner, Prec::Comma);
                self.out.push(')');
            }
            &ExprKind::Comma(a, b) => {
                self.print_expr(a, Prec::Comma);
                self.out.push_str(", ");
                self.print_expr(b, Prec::Assign);
            }
            ExprKind::Intrinsic { template, args } => {
                let template = &cx[*template];
                let args = args
                    .iter()
                    .enumerate()
                    .map(|(i, &arg)| {
                        // Arguments spliced into arbitrary C (e.g. `%1%*3`) need
                        // parenthesizing, unlike those used like call arguments.
                        let min_prec = if placeholder_is_delimited(template, i + 1) {
                            Prec::Assign
                        } else {
                            Prec::Postfix
                        };
                        let mut arg_printer = Printer::new(self.mcx, Some(func));
                        arg_printer.with_var_identities = self.with_var_identities;
                        arg_printer.print_expr(arg, min_prec);
                        arg_printer.out
                    })
                    .collect::<Vec<_>>();
                self.out.push_str(&expand_template(template, &args));
            }
        }

        if needs_parens {
            self.out.push(')');
        }
    }
}

/// Replace every `%N%` in `template` with `args[N - 1]`, leaving any other
/// `%` (and placeholders without a matching argument) untouched.
pub fn expand_template(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('%') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let digits_len = after.bytes().take_while(u8::is_ascii_digit).count();
        let placeholder = after[..digits_len].parse::<usize>().ok().filter(|_| {
            after[digits_len..].starts_with('%')
        });
        match placeholder.and_then(|n| args.get(n.checked_sub(1)?)) {
            Some(arg) => {
                out.push_str(arg);
                rest = &after[digits_len + 1..];
            }
            None => {
                out.push('%');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Whether every use of placeholder `%n%` in `template` is a whole argument
/// of some call (i.e. between `(` or `,`, and `,` or `)`).
fn placeholder_is_delimited(template: &str, n: usize) -> bool {
    let placeholder = format!("%{n}%");
    template.match_indices(&placeholder).all(|(start, _)| {
        let before = template[..start].trim_end().chars().next_back();
        let after = template[start + placeholder.len()..].trim_start().chars().next();
        matches!(before, Some('(' | ',')) && matches!(after, Some(',' | ')'))
    })
}

/// Whether `template` looks like `name(...)`, with the parentheses matching up
/// at the very end, i.e. whether its expansion can be used like a call.
fn is_call_shaped(template: &str) -> bool {
    let template = template.trim();
    let Some(open) = template.find('(') else {
        return false;
    };
    let name = &template[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let mut depth = 0u32;
    for (i, c) in template[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return open + i + 1 == template.len();
                }
            }
            _ => {}
        }
    }
    false
}

/// Build the C declarator for `name` of type `ty` (with `name` empty for an
/// abstract declarator, as used by casts and `sizeof`).
fn declarator(cx: &Context, ty: Type, name: String) -> String {
    match &cx[ty].kind {
        TypeKind::Void => join_base("void", name),
        TypeKind::Scalar(scalar) => join_base(scalar.c_name(), name),
        TypeKind::Struct { name: struct_name, .. } => {
            join_base(&format!("struct {}", &cx[*struct_name]), name)
        }
        TypeKind::Simd { name: simd_name, .. } => join_base(&cx[*simd_name], name),
        &TypeKind::Ptr(pointee) => {
            let inner = format!("*{name}");
            let inner = match cx[pointee].kind {
                TypeKind::Array { .. } => format!("({inner})"),
                _ => inner,
            };
            declarator(cx, pointee, inner)
        }
        &TypeKind::Array { elem, len } => declarator(cx, elem, format!("{name}[{len}]")),
    }
}

/// The type a declarator is built around (e.g. `float` for `float *p[4]`).
fn base_type_name(cx: &Context, ty: Type) -> String {
    match cx[ty].kind {
        TypeKind::Ptr(inner) | TypeKind::Array { elem: inner, .. } => base_type_name(cx, inner),
        _ => declarator(cx, ty, String::new()),
    }
}

fn join_base(base: &str, name: String) -> String {
    if name.is_empty() { base.to_string() } else { format!("{base} {name}") }
}
