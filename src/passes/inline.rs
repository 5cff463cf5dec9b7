//! Inlining of trivial functions (`#pragma scout function expand`).
//!
//! Only functions whose whole body is `return expr;` are inlined, by replacing
//! each call with a copy of `expr` (in which every parameter is replaced with
//! a copy of the corresponding argument), e.g. given:
//! ```c
//! #pragma scout function expand
//! float sqr(float x) { return x * x; }
//! ```
//! `a[i] += sqr(b[i]);` becomes `a[i] += b[i] * b[i];`.
//!
//! Arguments may be evaluated any number of times (including zero) after
//! inlining, so calls with side effects in their arguments are left alone.

use crate::func_at::FuncAt;
use crate::pragma::{self, PragmaDomain};
use crate::transform::NoTransform;
use crate::visit::Visitor;
use crate::{Diag, Expr, ExprDef, ExprKind, Func, FuncDefBody, ModuleCx, StmtKind, Var};
use rustc_hash::FxHashMap;

/// The expression returned by `callee`, if it can be inlined at all.
fn inlinable_body(mcx: ModuleCx<'_>, callee: Func) -> Option<(&FuncDefBody, Expr)> {
    let cx = mcx.cx;
    let decl = &mcx.funcs[callee];
    let marked = |action| pragma::find(cx, &decl.pragmas, PragmaDomain::Function, action).is_some();
    if !marked("expand") || marked("dummy") {
        return None;
    }
    // NOTE this is also `None` for the function being transformed, which
    // prevents (direct) recursion from ever being expanded.
    let callee_body = decl.def.as_ref()?;
    match &callee_body.stmts[callee_body.body].kind {
        StmtKind::Compound(children) => match children[..] {
            [only] => match callee_body.stmts[only].kind {
                StmtKind::Return(Some(returned)) => Some((callee_body, returned)),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

/// Copy `expr` from `callee_body` into `func`, replacing parameters with
/// copies of the expressions `args` maps them to.
///
/// Returns `None` if `expr` uses any local variable other than a parameter.
fn import_expr(
    callee_body: &FuncDefBody,
    expr: Expr,
    func: &mut FuncDefBody,
    args: &FxHashMap<Var, Expr>,
) -> Option<Expr> {
    let ExprDef { ty, mut kind } = callee_body.exprs[expr].clone();
    if let ExprKind::Var(param) = kind {
        let &arg = args.get(&param)?;
        return Some(func.deep_clone_expr(arg, &mut NoTransform));
    }

    let mut all_imported = true;
    kind.for_each_operand_mut(|operand| {
        match import_expr(callee_body, *operand, func, args) {
            Some(imported) => *operand = imported,
            None => all_imported = false,
        }
    });
    all_imported.then(|| func.new_expr(ty, kind))
}

/// Inline every call (in `func`) to a function marked `function expand`.
///
/// Returns the number of calls inlined.
pub fn inline_calls(mcx: ModuleCx<'_>, func: &mut FuncDefBody) -> usize {
    struct CallCollector {
        calls: Vec<Expr>,
    }
    impl<'a> Visitor<'a> for CallCollector {
        fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
            if let ExprKind::Call { .. } = func_at_expr.def().kind {
                self.calls.push(func_at_expr.position);
            }
            func_at_expr.inner_visit_with(self);
        }
    }
    let mut collector = CallCollector { calls: vec![] };
    collector.visit_stmt_use(func.at_body());

    let cx = mcx.cx;
    let mut inlined = 0;
    // Calls nested in arguments come later, and are inlined first, so that
    // the outer call's arguments become side-effect free in the process.
    for call in collector.calls.into_iter().rev() {
        let ExprKind::Call { callee, ref args } = func.exprs[call].kind else {
            continue;
        };
        let ExprKind::Func(callee) = func.at(callee).strip_parens_and_implicit_casts().def().kind
        else {
            continue;
        };
        let Some((callee_body, returned)) = inlinable_body(mcx, callee) else {
            continue;
        };
        let args = args.clone();
        if args.len() != callee_body.params.len()
            || args.iter().any(|&arg| func.at(arg).has_side_effects())
        {
            log::debug!(
                target: "inline",
                "not inlining call to `{}`: arguments must be side-effect free",
                &cx[mcx.funcs[callee].name]
            );
            continue;
        }

        let arg_for_param = callee_body.params.iter().copied().zip(args).collect();
        let Some(imported) = import_expr(callee_body, returned, func, &arg_for_param) else {
            continue;
        };
        func.exprs[call] = func.exprs[imported].clone();

        let name = &cx[mcx.funcs[callee].name];
        log::debug!(target: "inline", "inlined call to `{name}`");
        func.attach_diag(call, Diag::note([format!("function call to {name} inlined").into()]));
        inlined += 1;
    }
    inlined
}

#[cfg(test)]
mod tests;
