use super::*;
use crate::frontend::parse;
use crate::print::print_module;
use crate::{Context, Func, Module};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn parse_str(source: &str) -> Module {
    parse(Rc::new(Context::new()), source).unwrap()
}

fn defined_func(module: &Module) -> Func {
    module.funcs.iter().find(|(_, decl)| decl.def.is_some()).map(|(func, _)| func).unwrap()
}

/// The expression returned by the first statement of the (only) defined function.
fn returned_expr(module: &Module) -> (&FuncDefBody, Expr) {
    let func = module.funcs[defined_func(module)].def.as_ref().unwrap();
    let StmtKind::Compound(children) = &func.stmts[func.body].kind else { panic!() };
    let StmtKind::Return(Some(expr)) = func.stmts[children[0]].kind else { panic!() };
    (func, expr)
}

#[test]
fn integer_arithmetic() {
    let module = parse_str("int f(void) { return (3 + 4) * 2 - 10 / 3 % 2 + (1 << 4); }");
    let (func, expr) = returned_expr(&module);
    assert_eq!(eval_int(&module.cx(), func, expr), Some(14 - 1 + 16));
}

#[test]
fn casts_wrap_to_the_target_width() {
    let module = parse_str("int f(void) { return (char)300 + (short)65537 + (int)2.9; }");
    let (func, expr) = returned_expr(&module);
    assert_eq!(eval_int(&module.cx(), func, expr), Some(44 + 1 + 2));
}

#[test]
fn float_arithmetic_follows_the_expression_type() {
    let module = parse_str("float f(void) { return 1.5f * 2 + 0.25f; }");
    let (func, expr) = returned_expr(&module);
    assert_eq!(eval(&module.cx(), func, expr), Some(Const::Float(3.25)));
}

#[test]
fn sizeof_uses_c_struct_layout() {
    let module = parse_str(
        "struct S { char c; double d; int i; };
         long f(void) { return sizeof(struct S) + sizeof(float[3]); }",
    );
    let (func, expr) = returned_expr(&module);
    assert_eq!(eval_int(&module.cx(), func, expr), Some(24 + 12));
}

#[test]
fn unknown_and_undefined_values() {
    let module = parse_str("int g(void); int f(int x) { return x + 1, 1 / 0, g(); }");
    let cx = module.cx();
    let (func, expr) = returned_expr(&module);
    let ExprKind::Comma(lhs, call) = func.exprs[expr].kind else { panic!() };
    let ExprKind::Comma(var_plus_one, div_by_zero) = func.exprs[lhs].kind else { panic!() };
    assert_eq!(eval(&cx, func, var_plus_one), None);
    assert_eq!(eval(&cx, func, div_by_zero), None);
    assert_eq!(eval(&cx, func, call), None);
}

#[test]
fn conditions_short_circuit() {
    let module = parse_str(
        "int g(void);
         int f(int x) { return (0 && g()) + (g() && 0) + (1 || x) + !(x || 0); }",
    );
    let cx = module.cx();
    let (func, expr) = returned_expr(&module);

    // Walk `((a + b) + c) + d` back down to its four operands.
    let mut operands = vec![];
    let mut cur = expr;
    while let ExprKind::Binary(BinOp::Add, lhs, rhs) = func.exprs[cur].kind {
        operands.push(rhs);
        cur = lhs;
    }
    operands.push(cur);
    operands.reverse();
    let results = operands.iter().map(|&e| eval_bool(&cx, func, e)).collect::<Vec<_>>();
    assert_eq!(results, [Some(false), None, Some(true), None]);
}

#[test]
fn fold_statements_in_place() {
    let mut module = parse_str(
        "void f(int *a, int x)
         {
             if (2 > 1)
                 a[x + 0] = x * 1 + (4 - 3) * 8;
             else
                 a[0] = 1;
             if (0)
                 x = 2;
             a[1 ? 2 : x] = sizeof(int) == 4 ? x : -x;
         }",
    );
    let func = defined_func(&module);
    module.with_func_def_body_mut(func, |mcx, func_def_body| {
        let body = func_def_body.body;
        fold_stmt_in_place(mcx.cx, func_def_body, body);
    });
    assert_eq!(
        print_module(&module),
        "\
void f(int *a, int x)
{
    a[x] = x + 8;
    a[2] = x;
}
"
    );
}
