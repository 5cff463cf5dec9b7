use super::*;
use crate::frontend::parse;
use crate::intrinsics::TargetConfig;
use crate::print::{diag_to_string, expr_to_string, print_module};
use crate::{Context, Func, Module};
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
    let mut diags: Vec<_> = func_def_body
        .diags
        .iter()
        .map(|(node, diag)| diag_to_string(mcx, func_def_body, *node, diag))
        .collect();
    diags.sort();
    (print_module(&module), diags, r)
}

fn defined_func(module: &Module) -> Func {
    module.funcs.iter().filter(|(_, decl)| decl.def.is_some()).map(|(func, _)| func).last().unwrap()
}

fn vectorize_sse2(source: &str) -> (String, Vec<String>, VectorizeSummary) {
    transform(source, |mcx, func| vectorize_func(mcx, func, &TargetConfig::sse2()))
}

#[test]
fn stride_classification() {
    let source = "
        void f(float *a, float *b, float c, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < 100; ++i)
                a[i] = b[3 * i + 1] * c + b[i * n];
        }";
    let (_, _, (result, values, addresses)) = transform(source, |mcx, func| {
        let loop_stmt = collect_loops(func, func.body)[0];
        let oracle = TargetConfig::sse2();
        let (result, info) =
            analyze_loop(mcx, func, &oracle, loop_stmt, VectorizeMode::Normal).unwrap();
        let describe = |r: &StridedExprResult| {
            let stride = r.stride.as_ref();
            (
                r.kind,
                stride.and_then(Stride::as_constant),
                stride.map_or(0, |stride| stride.terms.len()),
            )
        };
        let values: std::collections::BTreeMap<_, _> = info
            .results
            .iter()
            .map(|(&expr, r)| (expr_to_string(mcx, func, expr), describe(r)))
            .collect();
        let addresses: std::collections::BTreeMap<_, _> = info
            .live
            .regions()
            .map(|(_, def)| (expr_to_string(mcx, func, def.lvalue), describe(&def.identity)))
            .collect();
        (result, values, addresses)
    });

    assert_eq!(result, AnalyzeResult::Vectorize);
    assert_eq!(values["i"], (StrideKind::Stride1, None, 0));
    assert_eq!(values["c"], (StrideKind::Constant, None, 0));
    assert_eq!(values["3 * i + 1"], (StrideKind::Stride1, Some(3), 0));
    assert_eq!(values["i * n"], (StrideKind::Stride1, None, 1));
    assert_eq!(values["b[3 * i + 1]"], (StrideKind::Stride1Dependent, None, 0));
    assert_eq!(values["b[3 * i + 1] * c"], (StrideKind::Stride1Dependent, None, 0));

    assert_eq!(addresses["a[i]"], (StrideKind::Stride1, None, 0));
    assert_eq!(addresses["b[3 * i + 1]"], (StrideKind::Stride1, Some(3), 0));
    assert_eq!(addresses["c"], (StrideKind::Constant, None, 0));
}

#[test]
fn unit_stride_loop() {
    let source = "
        void f(float *a, float *b, float c)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < 100; ++i)
                a[i] = b[i] * c;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert_eq!(summary.stats, Statistics { loads: 1, stores: 1, packed_ops: 1 });
    assert_eq!(
        printed,
        "\
void f(float *a, float *b, float c)
{
    int i;
    {
        __m128 __v0 = _mm_set1_ps(c);
        for (i = 0; i + 3 < 100; i += 4)
        {
            _mm_storeu_ps(&a[i], _mm_mul_ps(_mm_loadu_ps(&b[i]), __v0));
        }
        for (; i < 100; ++i)
            a[i] = b[i] * c;
    }
}
"
    );
}

#[test]
fn vectorizing_twice_changes_nothing() {
    let source = "
        void f(float *a, float *b, float c, int n)
        {
            #pragma scout loop vectorize
            for (int i = 0; i < n; ++i)
                a[i] = b[i] + c;
        }";
    let mut module = parse(Rc::new(Context::new()), source).unwrap();
    let func = defined_func(&module);
    let oracle = TargetConfig::sse2();
    let first = module
        .with_func_def_body_mut(func, |mcx, func| vectorize_func(mcx, func, &oracle))
        .unwrap();
    let once = print_module(&module);
    let second = module
        .with_func_def_body_mut(func, |mcx, func| vectorize_func(mcx, func, &oracle))
        .unwrap();

    assert_eq!(first.vectorized, 1);
    assert_eq!(second, VectorizeSummary::default());
    assert_eq!(print_module(&module), once);
    assert!(once.contains("int i = 0;"));
    assert!(once.contains("for (; i + 3 < n; i += 4)"));
}

#[test]
fn broadcast_call_argument() {
    let source = "
        float sqrtf(float);

        void f(float *a, float b)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < 100; ++i)
                a[i] = sqrtf(b);
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("__m128 __v0 = _mm_set1_ps(b);"));
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_sqrt_ps(__v0));"));
    assert!(printed.contains("for (; i < 100; ++i)\n            a[i] = sqrtf(b);"));
}

#[test]
fn unsupported_control_flow() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                a[i] = 1;
                break;
            }
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                a[i] = 1;
                continue;
            }
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                a[i] = 1;
                return;
            }
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                while (a[i] > 0)
                    a[i] = 0;
            }
        }";
    let (_, diags, summary) = vectorize_sse2(source);
    assert_eq!(summary.rejected, 4);
    assert_eq!(summary.vectorized, 0);
    assert_eq!(
        diags,
        [
            "note: not vectorizable: `break` in loop body (at: `break;`)",
            "note: not vectorizable: `continue` in loop body (at: `continue;`)",
            "note: not vectorizable: `return` in loop body (at: `return;`)",
            "note: not vectorizable: `while` in loop body (at: `while (a[i] > 0)`)",
        ]
    );
}

#[test]
fn loop_carried_dependency() {
    let source = "
        void f(float *a, float s, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] = a[i + 1] * 2.0f;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                a[i] = s;
                s = a[i] + 1.0f;
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(summary.rejected, 2);
    assert_eq!(
        diags,
        [
            "note: not vectorizable: local variable carries dependency between iterations \
             (at: `s`)",
            "note: not vectorizable: possible loop-carried dependency through `a` \
             (use `loop vectorize force` to vectorize anyway) (at: `a[i]`)",
        ]
    );
    assert!(!printed.contains("_mm_"));
}

#[test]
fn forced_despite_possible_dependency() {
    let source = "
        void f(float *a, int n)
        {
            int i;
            #pragma scout loop vectorize force
            for (i = 0; i < n; ++i)
                a[i] = a[i + 1] * 2.0f;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("__m128 __v0 = _mm_set1_ps(2.0f);"));
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_mul_ps(_mm_loadu_ps(&a[i + 1]), __v0));"));
}

#[test]
fn sum_reduction() {
    let source = "
        float sum(float *a, int n)
        {
            float s = 0;
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                s += a[i];
            return s;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert_eq!(summary.stats, Statistics { loads: 1, stores: 0, packed_ops: 1 });
    assert!(printed.contains("__m128 __v0 = _mm_set1_ps(0.0f);"));
    assert!(printed.contains("__v0 = _mm_add_ps(__v0, _mm_loadu_ps(&a[i]));"));
    assert!(printed.contains(
        "s = s + _mm_cvtss_f32(__v0) + _mm_extract_ps(__v0, 1) + _mm_extract_ps(__v0, 2) \
         + _mm_extract_ps(__v0, 3);"
    ));
    // The scalar tail keeps the original statement.
    assert!(printed.contains("for (; i < n; ++i)\n            s += a[i];"));
}

#[test]
fn max_reduction() {
    let source = "
        float max(float *a, int n)
        {
            float m = a[0];
            int i;
            #pragma scout loop vectorize
            for (i = 1; i < n; ++i)
                m = m < a[i] ? a[i] : m;
            return m;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("__m128 __v0 = _mm_set1_ps(m);"));
    assert!(printed.contains("__v0 = _mm_max_ps(__v0, _mm_loadu_ps(&a[i]));"));
    assert!(printed.contains("m = _mm_cvtss_f32(__v0) > m ? _mm_cvtss_f32(__v0) : m;"));
    assert!(printed.contains("m = _mm_extract_ps(__v0, 3) > m ? _mm_extract_ps(__v0, 3) : m;"));
}

#[test]
fn guarding_if_blends() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                if (a[i] < b[i])
                    a[i] = b[i];
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert_eq!(
        printed,
        "\
void f(float *a, float *b, int n)
{
    int i;
    {
        __m128 __v0;
        __m128 __v1;
        for (i = 0; i + 3 < n; i += 4)
        {
            __v0 = _mm_loadu_ps(&a[i]);
            __v1 = _mm_loadu_ps(&b[i]);
            _mm_storeu_ps(&a[i], _mm_blendv_ps(_mm_loadu_ps(&a[i]), _mm_loadu_ps(&b[i]), _mm_cmplt_ps(__v0, __v1)));
        }
        for (; i < n; ++i)
        {
            if (a[i] < b[i])
                a[i] = b[i];
        }
    }
}
"
    );
}

#[test]
fn invariant_condition_splits_first() {
    let source = "
        void f(float *a, float *b, int flag, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] = flag ? b[i] : a[i];
        }";
    let (printed, _, summary) = vectorize_sse2(source);
    assert_eq!(summary.splits, 1);
    assert_eq!(summary.vectorized, 2);
    assert!(printed.contains("if (flag)"));
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_loadu_ps(&b[i]));"));
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_loadu_ps(&a[i]));"));
}

#[test]
fn scalar_mode_only_analyzes() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize scalar
            for (i = 0; i < n; ++i)
                a[i] = b[i];
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(summary.left_scalar, 1);
    assert_eq!(
        diags,
        ["note: loop left scalar (`loop vectorize scalar`) (at: `for (i = 0; i < n; ++i)`)"]
    );
    assert!(!printed.contains("_mm_"));
}

#[test]
fn unroll_mode_emits_lanes() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize unroll
            for (i = 0; i < n; ++i)
                a[i] = b[i] + 1.0f;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert_eq!(summary.stats, Statistics::default());
    assert!(printed.contains(
        "\
        for (i = 0; i + 3 < n; i += 4)
        {
            a[i] = b[i] + 1.0f;
            a[i + 1] = b[i + 1] + 1.0f;
            a[i + 2] = b[i + 2] + 1.0f;
            a[i + 3] = b[i + 3] + 1.0f;
        }
"
    ));
}

#[test]
fn aligned_arrays() {
    let source = "
        float a[128];
        float b[128];

        void f(void)
        {
            int i;
            #pragma scout loop vectorize aligned(a)
            for (i = 0; i < 128; ++i)
                a[i] = b[i] + 1.0f;
        }";
    let (printed, _, summary) = vectorize_sse2(source);
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("_mm_store_ps(&a[i], _mm_add_ps(_mm_loadu_ps(&b[i]), __v0));"));
}

#[test]
fn nested_uniform_loop() {
    let source = "
        void f(float *y, float *m, float *x, int n)
        {
            int i, j;
            #pragma scout loop vectorize
            for (i = 0; i < 64; ++i)
            {
                for (j = 0; j < n; ++j)
                    y[i] = y[i] + m[j * 64 + i] * x[j];
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("for (j = 0; j < n; ++j)"));
    assert!(printed.contains(
        "_mm_storeu_ps(&y[i], _mm_add_ps(_mm_loadu_ps(&y[i]), \
         _mm_mul_ps(_mm_loadu_ps(&m[j * 64 + i]), _mm_set1_ps(x[j]))));"
    ));
}

#[test]
fn nontemporal_store() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize nontemporal(a)
            for (i = 0; i < n; ++i)
                a[i] = b[i];
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("_mm_stream_ps(&a[i], _mm_loadu_ps(&b[i]));"));
    assert!(!printed.contains("_mm_storeu_ps"));
}

#[test]
fn variable_kept_in_vector_is_written_back() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            float t;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                t = b[i] * 2.0f;
                a[i] = t + 1.0f;
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("__v0 = _mm_mul_ps(_mm_loadu_ps(&b[i]), "));
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_add_ps(__v0, "));

    // Only the last lane survives the vector iteration.
    let write_back = printed.find("            t = _mm_extract_ps(__v0, 3);\n").unwrap();
    assert!(printed.find("_mm_storeu_ps(&a[i]").unwrap() < write_back);
    assert!(write_back < printed.find("for (; i < n; ++i)").unwrap());
}

#[test]
fn lane_dependent_if_emitted_per_lane() {
    let source = "
        void f(float *a, float *b, float *c, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                a[i] = b[i] * 2.0f;
                if (b[i] > 0.0f)
                    c[i] = 1.0f;
                else
                    c[i] = 2.0f;
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains("_mm_storeu_ps(&a[i], _mm_mul_ps(_mm_loadu_ps(&b[i]), "));
    assert!(!printed.contains("_mm_blendv_ps"));
    assert!(printed.contains(
        "\
            if (b[i] > 0.0f)
                c[i] = 1.0f;
            else
                c[i] = 2.0f;
            if (b[i + 1] > 0.0f)
                c[i + 1] = 1.0f;
            else
                c[i + 1] = 2.0f;
            if (b[i + 2] > 0.0f)
                c[i + 2] = 1.0f;
            else
                c[i + 2] = 2.0f;
            if (b[i + 3] > 0.0f)
                c[i + 3] = 1.0f;
            else
                c[i + 3] = 2.0f;
"
    ));
}

#[test]
fn guarded_division_is_not_speculated() {
    let source = "
        void f(int *a, int *b, int *c, int *d, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                if (b[i] > 0)
                    a[i] = c[i] / b[i];
                d[i] = c[i] + 1;
            }
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(!printed.contains("_mm_blendv_epi8"));
    assert!(printed.contains("_mm_storeu_si128((__m128i *)(&d[i]), "));

    // Every lane only divides when its own condition holds.
    assert!(printed.contains(
        "\
            if (b[i] > 0)
                a[i] = c[i] / b[i];
            if (b[i + 1] > 0)
                a[i + 1] = c[i + 1] / b[i + 1];
            if (b[i + 2] > 0)
                a[i + 2] = c[i + 2] / b[i + 2];
            if (b[i + 3] > 0)
                a[i + 3] = c[i + 3] / b[i + 3];
"
    ));
}

#[test]
fn guarded_call_is_not_speculated() {
    let source = "
        float g(float);

        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
            {
                if (a[i] < b[i])
                    a[i] = g(b[i]);
                b[i] = b[i] + 1.0f;
            }
        }";
    let (printed, _, summary) = vectorize_sse2(source);
    assert_eq!(summary.vectorized, 1);
    assert!(!printed.contains("_mm_blendv_ps"));
    assert!(printed.contains("if (a[i + 3] < b[i + 3])\n                a[i + 3] = g(b[i + 3]);"));
}

#[test]
fn compound_assignment_computes_in_common_type() {
    let source = "
        void f(int *a, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] *= 0.5f;
        }";
    let (printed, diags, summary) = vectorize_sse2(source);
    assert_eq!(diags, Vec::<String>::new());
    assert_eq!(summary.vectorized, 1);
    assert!(printed.contains(
        "_mm_storeu_si128((__m128i *)(&a[i]), \
         _mm_set_epi32(a[i + 3] * 0.5f, a[i + 2] * 0.5f, a[i + 1] * 0.5f, a[i] * 0.5f));"
    ));
    assert!(!printed.contains("_mm_mullo_epi32"));
    assert!(!printed.contains("_mm_set1_epi32"));
    assert!(printed.contains("for (; i < n; ++i)\n            a[i] *= 0.5f;"));
}

#[test]
fn compound_assignment_of_wider_value() {
    let source = "
        void f(float *a, double d, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] += d;
        }";
    let (printed, _, summary) = vectorize_sse2(source);
    assert_eq!(summary.vectorized, 1);

    // Each lane adds in `double`, rounding once to `float`.
    assert!(printed.contains(
        "_mm_storeu_ps(&a[i], _mm_set_ps(a[i + 3] + d, a[i + 2] + d, a[i + 1] + d, a[i] + d));"
    ));
    assert!(!printed.contains("_mm_set1_ps(d)"));
}
