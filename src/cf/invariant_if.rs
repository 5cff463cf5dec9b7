//! Moving loop-invariant `if`s out of loops ("loop unswitching").
//!
//! A loop containing `if (c) ...`, where `c` doesn't change between iterations,
//! is either specialized in place (when `c` is a compile-time constant), or
//! duplicated into one copy per outcome of `c`, selected by a single `if (c)`
//! placed where the loop was.
//!
//! Conditions are matched by [`structural_key`], so every `if` (and `?:`)
//! in the loop testing the same condition (on the same variables) is resolved
//! at once, not only the one that triggered the split.

use crate::cf::{collect_loops, flatten_blocks, vars_changed_in};
use crate::func_at::FuncAt;
use crate::pragma::{self, PragmaDomain};
use crate::print::structural_key;
use crate::transform::{NoTransform, Transformed, Transformer};
use crate::visit::{VarUseCollector, Visitor};
use crate::{Diag, Expr, ExprKind, FuncDefBody, ModuleCx, Stmt, StmtDef, StmtKind, UnOp, VarKind};
use rustc_hash::FxHashSet;
use smallvec::smallvec;
use std::borrow::Cow;

pub const REASON_PRAGMA: &str = "if-condition moved outside the loop due to annotated pragma";
pub const REASON_NO_LOCAL_WRITES: &str =
    "if-condition moved outside the loop due to no references to local loop vars";

/// Replace every `if`/`?:` testing a condition with the given structural key
/// by the branch `value` selects (removing `if`s without an `else` entirely).
struct ResolveCondition<'a> {
    mcx: ModuleCx<'a>,
    key: String,
    value: bool,
}

impl ResolveCondition<'_> {
    fn matches(&self, func: &FuncDefBody, cond: Expr) -> bool {
        structural_key(self.mcx, func, cond) == self.key
    }
}

impl Transformer for ResolveCondition<'_> {
    fn transform_expr_use(&mut self, func: &mut FuncDefBody, expr: Expr) -> Transformed<Expr> {
        let ExprKind::Cond { cond, then_expr, else_expr } = func.exprs[expr].kind else {
            return Transformed::Unchanged;
        };
        if !self.matches(func, cond) {
            return Transformed::Unchanged;
        }
        let taken = if self.value { then_expr } else { else_expr };
        Transformed::Changed(match self.transform_expr_use(func, taken) {
            Transformed::Changed(new) => new,
            Transformed::Unchanged => {
                func.transform_expr_in_place(taken, self);
                taken
            }
        })
    }

    fn transform_stmt_use(&mut self, func: &mut FuncDefBody, stmt: Stmt) -> Transformed<Stmt> {
        let StmtKind::If { cond, then_stmt, else_stmt } = func.stmts[stmt].kind else {
            return Transformed::Unchanged;
        };
        if !self.matches(func, cond) {
            return Transformed::Unchanged;
        }
        let Some(taken) = (if self.value { Some(then_stmt) } else { else_stmt }) else {
            return Transformed::Changed(func.new_stmt(StmtKind::Null));
        };
        Transformed::Changed(match self.transform_stmt_use(func, taken) {
            Transformed::Changed(new) => new,
            Transformed::Unchanged => {
                func.transform_stmt_in_place(taken, self);
                taken
            }
        })
    }
}

/// Move the `if` (or `?:`) testing `cond` (which must be loop-invariant) out of
/// `loop_stmt`, resolving every matching condition in the loop along the way.
///
/// With `static_result` known, the loop is specialized in place, otherwise
/// `loop_stmt` becomes `if (cond) loop_then else loop_else` (keeping its handle).
pub fn split_loop_at_if(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    loop_stmt: Stmt,
    cond: Expr,
    static_result: Option<bool>,
    reason: &'static str,
) {
    let key = structural_key(mcx, func, cond);
    match static_result {
        Some(value) => {
            log::debug!(target: "invariant-if", "`{key}` statically {value}, specializing loop");
            func.transform_stmt_in_place(loop_stmt, &mut ResolveCondition { mcx, key, value });
            func.stmts[loop_stmt].comments.push(Cow::Borrowed(reason));
            flatten_blocks(func, loop_stmt);
        }
        None => {
            log::debug!(target: "invariant-if", "duplicating loop for both outcomes of `{key}`");
            let hoisted_cond = func.deep_clone_expr(cond, &mut NoTransform);
            let [then_loop, else_loop] = [true, false].map(|value| {
                let specialized = func.deep_clone_stmt(loop_stmt, &mut NoTransform);
                let key = key.clone();
                let mut resolve = ResolveCondition { mcx, key, value };
                func.transform_stmt_in_place(specialized, &mut resolve);
                func.stmts[specialized].comments.push(Cow::Borrowed(if value {
                    "if-splitted loop, then condition"
                } else {
                    "if-splitted loop, else condition"
                }));
                flatten_blocks(func, specialized);
                specialized
            });
            let mut new_def = StmtDef::from(StmtKind::If {
                cond: hoisted_cond,
                then_stmt: then_loop,
                else_stmt: Some(else_loop),
            });
            new_def.comments = smallvec![Cow::Borrowed(reason)];
            func.replace_stmt_def(loop_stmt, new_def);
        }
    }
}

/// Every `if` directly in `loop_stmt` (i.e. not inside a nested loop), in order.
fn ifs_in_loop(func: &FuncDefBody, loop_stmt: Stmt) -> Vec<Stmt> {
    struct IfCollector {
        ifs: Vec<Stmt>,
    }
    impl<'a> Visitor<'a> for IfCollector {
        fn visit_stmt_use(&mut self, func_at_stmt: FuncAt<'a, Stmt>) {
            match func_at_stmt.def().kind {
                StmtKind::For { .. } | StmtKind::While { .. } | StmtKind::DoWhile { .. } => {}
                StmtKind::If { .. } => {
                    self.ifs.push(func_at_stmt.position);
                    func_at_stmt.inner_visit_with(self);
                }
                _ => func_at_stmt.inner_visit_with(self),
            }
        }
    }
    let StmtKind::For { body, .. } = func.stmts[loop_stmt].kind else {
        return vec![];
    };
    let mut collector = IfCollector { ifs: vec![] };
    collector.visit_stmt_use(func.at(body));
    collector.ifs
}

/// Whether `cond` reads nothing but (non-`volatile`) local variables and
/// parameters, i.e. no memory through pointers, and no globals.
fn reads_only_locals(func: &FuncDefBody, cond: Expr) -> bool {
    struct MemoryReadFinder {
        found: bool,
    }
    impl<'a> Visitor<'a> for MemoryReadFinder {
        fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
            match func_at_expr.def().kind {
                ExprKind::Unary(UnOp::Deref, _)
                | ExprKind::Index { .. }
                | ExprKind::Member { arrow: true, .. } => self.found = true,
                _ => func_at_expr.inner_visit_with(self),
            }
        }
    }
    let mut finder = MemoryReadFinder { found: false };
    finder.visit_expr_use(func.at(cond));

    let mut uses = VarUseCollector::default();
    uses.visit_expr_use(func.at(cond));

    !finder.found
        && uses.global_vars.is_empty()
        && uses.vars.iter().all(|&var| {
            let decl = &func.vars[var];
            !decl.is_volatile && matches!(decl.kind, VarKind::Param | VarKind::Local)
        })
}

/// Split every loop-invariant `if` out of its loop, either when annotated with
/// `#pragma scout condition invariant`, or (with `auto_detect`) when its
/// condition provably can't change while the loop runs.
///
/// Returns the number of splits performed.
pub fn split_invariant_ifs(mcx: ModuleCx<'_>, func: &mut FuncDefBody, auto_detect: bool) -> usize {
    let cx = mcx.cx;
    let mut splits = 0;
    let mut rejected = FxHashSet::default();

    // Every split invalidates the loops found so far, so start over each time.
    'restart: loop {
        for loop_stmt in collect_loops(func, func.body) {
            let mut changed_vars = None;
            for if_stmt in ifs_in_loop(func, loop_stmt) {
                if rejected.contains(&if_stmt) {
                    continue;
                }
                let StmtKind::If { cond, .. } = func.stmts[if_stmt].kind else {
                    continue;
                };

                let annotated = pragma::find(
                    cx,
                    &func.stmts[if_stmt].pragmas,
                    PragmaDomain::Condition,
                    "invariant",
                )
                .is_some();
                let reason = if annotated {
                    REASON_PRAGMA
                } else if !auto_detect {
                    continue;
                } else if func.at(cond).has_side_effects() {
                    rejected.insert(if_stmt);
                    func.attach_diag(
                        if_stmt,
                        Diag::note(["condition may have side effects, unable to detect invariance"
                            .into()]),
                    );
                    continue;
                } else {
                    let changed_vars =
                        changed_vars.get_or_insert_with(|| vars_changed_in(func, loop_stmt));
                    let mut uses = VarUseCollector::default();
                    uses.visit_expr_use(func.at(cond));
                    let invariant = reads_only_locals(func, cond)
                        && !uses.vars.iter().any(|var| changed_vars.contains(var));
                    if !invariant {
                        rejected.insert(if_stmt);
                        continue;
                    }
                    REASON_NO_LOCAL_WRITES
                };

                let static_result = crate::fold::eval_bool(cx, func, cond);
                split_loop_at_if(mcx, func, loop_stmt, cond, static_result, reason);
                splits += 1;
                continue 'restart;
            }
        }
        break;
    }

    if splits > 0 {
        log::info!(target: "invariant-if", "moved {splits} invariant condition(s) out of loops");
    }
    splits
}
