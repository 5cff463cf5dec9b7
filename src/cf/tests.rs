use super::*;
use crate::frontend::parse;
use crate::print::{diag_to_string, print_module};
use crate::{Func, Module, ModuleCx};
use pretty_assertions::assert_eq;
use std::rc::Rc;

/// Run `pass` on the only defined function in `source`, returning the printed
/// module, and every diagnostic attached along the way.
fn transform<R>(
    source: &str,
    pass: impl FnOnce(ModuleCx<'_>, &mut FuncDefBody) -> R,
) -> (String, Vec<String>, R) {
    let mut module = parse(Rc::new(Context::new()), source).unwrap();
    let func = defined_func(&module);
    let r = module.with_func_def_body_mut(func, pass).unwrap();

    let mcx = module.module_cx();
    let func_def_body = module.funcs[func].def.as_ref().unwrap();
    let diags = func_def_body
        .diags
        .iter()
        .map(|(node, diag)| diag_to_string(mcx, func_def_body, *node, diag))
        .collect();
    (print_module(&module), diags, r)
}

fn defined_func(module: &Module) -> Func {
    module.funcs.iter().filter(|(_, decl)| decl.def.is_some()).map(|(func, _)| func).last().unwrap()
}

#[test]
fn counted_loop_shapes() {
    let source = "
        void f(int n, float x)
        {
            int i;
            long k;
            for (i = 0; i < n; ++i) ;
            for (int j = 2; j <= 10; j += 1) ;
            for (k = n; k != 0; k = k + 1) ;
            for (i = 0; i < n; i += 2) ;
            for (i = 0; i > n; ++i) ;
            for (x = 0; x < n; ++x) ;
        }";
    let (_, _, results) = transform(source, |mcx, func| {
        collect_loops(func, func.body)
            .into_iter()
            .map(|loop_stmt| {
                CountedLoop::match_for(mcx.cx, func, loop_stmt)
                    .map(|counted| (counted.declares_var, counted.trip_count(mcx.cx, func)))
            })
            .collect::<Vec<_>>()
    });
    assert_eq!(
        results,
        [
            Ok((false, None)),
            Ok((true, Some(9))),
            Ok((false, None)),
            Err("for-increment must increment the loop variable by 1"),
            Err("for-cond must compare the loop variable using <, <= or !="),
            Err("loop variable must have integer type"),
        ]
    );
}

#[test]
fn unroll_short_loop() {
    let source = "
        void f(int *a)
        {
            int i;
            #pragma scout loop unroll
            for (i = 0; i < 3; ++i)
                a[i] += i * 2;
        }";
    let (printed, diags, unrolled) =
        transform(source, |mcx, func| unroll::unroll_loops(mcx, func, unroll::DEFAULT_THRESHOLD));
    assert_eq!(unrolled, 1);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(
        printed,
        "\
void f(int *a)
{
    int i;
    a[0] += 0;
    a[1] += 2;
    a[2] += 4;
    i = 3;
}
"
    );
}

#[test]
fn unroll_keeps_calls_per_iteration() {
    let source = "
        int sqr(int);

        void f(int *a)
        {
            int i;
            #pragma scout loop unroll
            for (i = 0; i < 5; ++i)
                a[i] += sqr(i);
        }";
    let (printed, diags, unrolled) =
        transform(source, |mcx, func| unroll::unroll_loops(mcx, func, unroll::DEFAULT_THRESHOLD));
    assert_eq!(unrolled, 1);
    assert_eq!(diags, Vec::<String>::new());
    assert!(!printed.contains("for ("));
    assert!(printed.contains(
        "\
    a[0] += sqr(0);
    a[1] += sqr(1);
    a[2] += sqr(2);
    a[3] += sqr(3);
    a[4] += sqr(4);
    i = 5;
}
"
    ));
}

#[test]
fn unroll_collapses_per_iteration_conditions() {
    let source = "
        void f(float *a)
        {
            #pragma scout loop unroll
            for (int i = 0; i < 4; ++i)
            {
                if (i % 2 == 0)
                    a[i] = 1;
                else
                    a[i] = 2;
            }
        }";
    let (printed, _, _) =
        transform(source, |mcx, func| unroll::unroll_loops(mcx, func, unroll::DEFAULT_THRESHOLD));
    assert_eq!(
        printed,
        "\
void f(float *a)
{
    a[0] = 1.0f;
    a[1] = 2.0f;
    a[2] = 1.0f;
    a[3] = 2.0f;
}
"
    );
}

#[test]
fn unroll_refusals() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            #pragma scout loop unroll
            for (i = 0; i < 20; ++i)
                a[i] = 0;
            #pragma scout loop unroll
            for (i = 0; i < n; ++i)
                a[i] = 0;
            #pragma scout loop unroll
            for (i = 0; i < 4; ++i)
            {
                if (a[i] > 0)
                    break;
            }
        }";
    let (_, diags, unrolled) = transform(source, |mcx, func| unroll::unroll_loops(mcx, func, 10));
    assert_eq!(unrolled, 0);
    assert_eq!(
        diags,
        [
            "warning: loop unroll: loop body contains `break`, `continue` or labels \
             (at: `for (i = 0; i < 4; ++i)`)",
            "warning: loop unroll: loop bounds must be compile-time constants \
             (at: `for (i = 0; i < n; ++i)`)",
            "warning: loop unroll: 20 iterations exceed the unroll threshold (10) \
             (at: `for (i = 0; i < 20; ++i)`)",
        ]
    );
}

#[test]
fn static_invariant_if_keeps_taken_branch() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            for (i = 0; i < n; ++i)
            {
                #pragma scout condition invariant
                if (1 > 2)
                    a[i] = 0;
                else
                    a[i] = 1;
                a[i] += 1 > 2 ? 3 : 4;
            }
        }";
    let (printed, _, splits) =
        transform(source, |mcx, func| invariant_if::split_invariant_ifs(mcx, func, false));
    assert_eq!(splits, 1);
    assert_eq!(
        printed,
        "\
void f(float *a, int n)
{
    int i;
    // if-condition moved outside the loop due to annotated pragma
    for (i = 0; i < n; ++i)
    {
        a[i] = 1;
        a[i] += 4;
    }
}
"
    );
}

#[test]
fn unknown_invariant_if_duplicates_loop() {
    let source = "
        void f(float *a, int n, int flag)
        {
            int i;
            for (i = 0; i < n; ++i)
            {
                if (flag)
                    a[i] = 0;
                a[i] += flag ? 1 : 2;
            }
        }";
    let (printed, _, splits) =
        transform(source, |mcx, func| invariant_if::split_invariant_ifs(mcx, func, true));
    assert_eq!(splits, 1);
    assert_eq!(
        printed,
        "\
void f(float *a, int n, int flag)
{
    int i;
    // if-condition moved outside the loop due to no references to local loop vars
    if (flag)
        // if-splitted loop, then condition
        for (i = 0; i < n; ++i)
        {
            a[i] = 0;
            a[i] += 1;
        }
    else
        // if-splitted loop, else condition
        for (i = 0; i < n; ++i)
        {
            a[i] += 2;
        }
}
"
    );
}

#[test]
fn auto_detection_rejects_variant_conditions() {
    let source = "
        int g(void);
        int k;
        void f(float *a, int n, int m)
        {
            int i;
            for (i = 0; i < n; ++i)
            {
                if (m > 0)
                    a[i] = 0;
                if (a[0] > 0)
                    a[i] = 1;
                if (k)
                    a[i] = 2;
                if (g())
                    a[i] = 3;
                if (i)
                    a[i] = 4;
                m = m - 1;
            }
        }";
    let (_, diags, splits) =
        transform(source, |mcx, func| invariant_if::split_invariant_ifs(mcx, func, true));
    assert_eq!(splits, 0);
    assert_eq!(
        diags,
        ["note: condition may have side effects, unable to detect invariance (at: `if (g())`)"]
    );
}

#[test]
fn split_at_annotated_statement() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            for (i = 0; i < n; ++i)
            {
                a[i] = b[i];
                #pragma scout loop split
                b[i] = a[i + 1];
            }
        }";
    let (printed, diags, splits) = transform(source, split::split_loops);
    assert_eq!(splits, 1);
    assert_eq!(diags, ["note: loop splitted due to pragma (at: `for (i = 0; i < n; ++i)`)"]);
    assert_eq!(
        printed,
        "\
void f(float *a, float *b, int n)
{
    int i;
    for (i = 0; i < n; ++i)
    {
        a[i] = b[i];
    }
    // start of splitted loop
    for (i = 0; i < n; ++i)
    {
        b[i] = a[i + 1];
    }
}
"
    );
}

#[test]
fn split_at_start_warns() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            for (i = 0; i < n; ++i)
            {
                #pragma scout loop split
                a[i] = 0;
            }
        }";
    let (_, diags, splits) = transform(source, split::split_loops);
    assert_eq!(splits, 0);
    assert_eq!(
        diags,
        ["warning: split pragma at start of compound, nothing to split (at: `a[i] = 0;`)"]
    );
}

#[test]
fn block_inclusive_loop() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            #pragma scout loop block size(16)
            for (i = 0; i <= n; ++i)
                a[i] = 0;
        }";
    let (printed, diags, blocked) = transform(source, blocking::block_loops);
    assert_eq!(blocked, 1);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(
        printed,
        "\
void f(float *a, int n)
{
    int i;
    {
        int __i_bound0 = n + 1;
        int __tile1, __tile_bound2;
        for (i = 0; i < __i_bound0; i += 16)
        {
            __tile_bound2 = __i_bound0 - i;
            __tile_bound2 = __tile_bound2 < 16 ? __tile_bound2 : 16;
            for (__tile1 = 0; __tile1 < __tile_bound2; ++__tile1)
                a[i + __tile1] = 0;
        }
    }
}
"
    );
}

#[test]
fn block_moves_other_pragmas_inward() {
    let source = "
        void f(float *a, int n)
        {
            #pragma scout loop block size(8)
            #pragma scout loop vectorize
            for (int i = 0; i < n; ++i)
                a[i] = 0;
        }";
    let (printed, _, _) = transform(source, blocking::block_loops);
    assert!(printed.contains(
        "            #pragma scout loop vectorize
            for (__tile1 = 0; __tile1 < __tile_bound2; ++__tile1)"
    ));
    assert!(printed.contains("for (int i = 0; i < __i_bound0; i += 8)"));
}

#[test]
fn block_refusals() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            #pragma scout loop block size(0)
            for (i = 0; i < n; ++i)
                a[i] = 0;
            #pragma scout loop block size(4)
            for (i = n; i > 0; --i)
                a[i] = 0;
        }";
    let (_, diags, blocked) = transform(source, blocking::block_loops);
    assert_eq!(blocked, 0);
    assert_eq!(
        diags,
        [
            "warning: block pragma doesn't specify tile size or tile size is 0 \
             (at: `for (i = 0; i < n; ++i)`)",
            "warning: loop blocking: for-cond must compare the loop variable using <, <= or != \
             (at: `for (i = n; i > 0; --i)`)",
        ]
    );
}
