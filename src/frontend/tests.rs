use super::*;
use crate::pragma::PragmaDomain;
use crate::print::print_module;
use crate::{ExprKind, Item, ScalarType, StmtKind, TypeKind};
use pretty_assertions::assert_eq;

fn parse_str(source: &str) -> Result<Module, ParseError> {
    parse(Rc::new(Context::new()), source)
}

fn only_func_body(module: &Module) -> &crate::FuncDefBody {
    let (_, decl) = module.funcs.iter().find(|(_, decl)| decl.def.is_some()).unwrap();
    decl.def.as_ref().unwrap()
}

#[test]
fn roundtrip_simple_loop() {
    let source = "\
float a[100];

void f(float b)
{
    int i;
    #pragma scout loop vectorize aligned(a)
    for (i = 0; i < 100; ++i)
    {
        a[i] = b * 2.0f + a[i];
    }
}
";
    let module = parse_str(source).unwrap();
    assert_eq!(print_module(&module), source);
}

#[test]
fn roundtrip_declarators() {
    let source = "\
struct P
{
    float x;
    float y[4];
};

enum { N = 16, M = 17 };

double (*rows)[16];

struct P *pts;

long g(int *, char);

void h(void)
{
    int i = N, j;
    float t[4][16];
    j = (int)sizeof(struct P);
    pts->y[0] = t[1][2];
    i = g(&j, 'x' == 0 ? 1 : 2);
}
";
    // Character literals aren't supported, swap in something that is.
    let source = source.replace("'x'", "3");
    let module = parse_str(&source).unwrap();
    assert_eq!(print_module(&module), source);
}

#[test]
fn precedence_and_parens() {
    let source = "\
int f(int a, int b, int c)
{
    return a + b * c - (a - b) - -c + (a << 1 | b & c) + (a ? b : c);
}
";
    let module = parse_str(source).unwrap();
    assert_eq!(print_module(&module), source);
}

#[test]
fn pragma_attaches_to_next_statement() {
    let module = parse_str(
        "void f(float *x, float *y)
         {
             int i;
             #pragma scout loop vectorize aligned(x, y) nontemporal(x)
             for (i = 0; i < 8; i++) x[i] = y[i];
         }",
    )
    .unwrap();
    let cx = module.cx();
    let func = only_func_body(&module);
    let StmtKind::Compound(children) = &func.stmts[func.body].kind else { panic!() };
    let for_stmt = children[1];
    assert!(matches!(func.stmts[for_stmt].kind, StmtKind::For { .. }));
    let pragmas = &func.stmts[for_stmt].pragmas;
    assert_eq!(pragmas.len(), 1);
    assert!(pragmas[0].is(&cx, PragmaDomain::Loop, "vectorize"));
    assert_eq!(pragmas[0].argument(&cx, "aligned").unwrap().exprs.len(), 2);
    assert_eq!(pragmas[0].named_storage(&cx, func, "nontemporal").len(), 1);
    assert!(func.stmts[children[0]].pragmas.is_empty());
}

#[test]
fn function_pragmas() {
    let module = parse_str(
        "#pragma scout function expand
         float sqr(float x) { return x * x; }
         #pragma scout function dummy
         float keep(float x);",
    )
    .unwrap();
    let cx = module.cx();
    let pragma_actions = module
        .funcs
        .iter()
        .map(|(_, decl)| decl.pragmas.iter().map(|p| cx[p.action].to_string()).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    assert_eq!(pragma_actions, [vec!["expand".to_string()], vec!["dummy".to_string()]]);
}

#[test]
fn usual_arithmetic_conversions() {
    let module = parse_str("double f(float a, int b) { return a + b; }").unwrap();
    let cx = module.cx();
    let func = only_func_body(&module);
    let StmtKind::Compound(children) = &func.stmts[func.body].kind else { panic!() };
    let StmtKind::Return(Some(ret)) = func.stmts[children[0]].kind else { panic!() };

    // `(double)(a + (float)b)`, with both casts implicit.
    let ExprKind::Cast { operand: sum, implicit: true } = func.exprs[ret].kind else { panic!() };
    assert_eq!(cx[func.exprs[ret].ty].kind, TypeKind::Scalar(ScalarType::Double));
    let ExprKind::Binary(_, _, b) = func.exprs[sum].kind else { panic!() };
    assert_eq!(cx[func.exprs[sum].ty].kind, TypeKind::Scalar(ScalarType::Float));
    assert!(matches!(func.exprs[b].kind, ExprKind::Cast { implicit: true, .. }));
}

#[test]
fn prototype_then_definition() {
    let source = "\
float sqr(float);

float sqr(float x)
{
    return x * x;
}
";
    let module = parse_str(source).unwrap();
    assert_eq!(module.items.len(), 2);
    assert!(module.items.iter().all(|item| matches!(item, Item::Func(_))));
    assert_eq!(print_module(&module), source);
}

#[test]
fn ignores_includes_and_foreign_pragmas() {
    let module = parse_str(
        "#include <math.h>
         #pragma once
         int x;",
    )
    .unwrap();
    assert_eq!(module.items.len(), 1);
}

#[test]
fn errors() {
    let cases = [
        ("unsigned int x;", "1:1: unsigned types are not supported"),
        ("#define N 4\n", "1:1: unsupported preprocessor directive `#define`"),
        ("void f(void) { y = 1; }", "1:16: use of undeclared identifier `y`"),
        ("int x = 1;", "1:7: global initializers are not supported"),
        ("void f(void) { int a[0]; }", "1:22: array length must be positive"),
        ("void f(void)\n{\n    return\n}", "4:1: expected expression, found `}`"),
        (
            "void f(void) {\n#pragma scout bogus thing\n;\n}",
            "2:15: unknown pragma domain `bogus`",
        ),
        ("void f(void) {\n#pragma scout loop unroll\n}", "3:1: pragma not followed by a statement"),
    ];
    for (source, expected) in cases {
        let err = parse_str(source).map(|_| ()).unwrap_err();
        assert_eq!(err.to_string(), expected, "for {source:?}");
    }
}
