use super::*;
use crate::frontend::parse;
use crate::print::print_module;
use crate::{Context, Module};
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn inline_last_func(source: &str) -> (Module, usize) {
    let mut module = parse(Rc::new(Context::new()), source).unwrap();
    let (func, _) = module.funcs.iter().filter(|(_, decl)| decl.def.is_some()).last().unwrap();
    let inlined = module.with_func_def_body_mut(func, inline_calls).unwrap();
    (module, inlined)
}

#[test]
fn nested_calls_are_inlined_inside_out() {
    let source = "\
#pragma scout function expand
float sqr(float x)
{
    return x * x;
}

void f(float *a, float *b, float x, int i)
{
    a[i] = sqr(b[i]) + sqr(sqr(x));
}
";
    let (module, inlined) = inline_last_func(source);
    assert_eq!(inlined, 3);
    assert_eq!(
        print_module(&module),
        source.replace("sqr(b[i]) + sqr(sqr(x))", "b[i] * b[i] + x * x * (x * x)")
    );
}

#[test]
fn calls_left_alone() {
    let source = "\
#pragma scout function expand
float sqr(float x)
{
    return x * x;
}

#pragma scout function expand
#pragma scout function dummy
float same(float x)
{
    return x;
}

#pragma scout function expand
float twice(float x)
{
    float y = x;
    return y + y;
}

float plain(float x)
{
    return x;
}

void f(float *a, int i)
{
    a[i] = sqr(a[i++]) + same(a[i]) + twice(a[i]) + plain(a[i]);
}
";
    let (module, inlined) = inline_last_func(source);
    assert_eq!(inlined, 0);
    assert_eq!(print_module(&module), source);
}
