use autovec::Context;
use autovec::frontend::parse;
use autovec::intrinsics::TargetConfig;
use autovec::passes::{PassError, PassOptions, PassReport, run};
use autovec::print::print_module;
use pretty_assertions::assert_eq;
use std::rc::Rc;

fn run_with(source: &str, oracle: &TargetConfig, options: &PassOptions) -> (String, PassReport) {
    let mut module = parse(Rc::new(Context::new()), source).unwrap();
    let report = run(&mut module, oracle, options).unwrap();
    (print_module(&module), report)
}

#[test]
fn inlined_call_gets_vectorized() {
    let source = "
        #pragma scout function expand
        float sqr(float x) { return x * x; }

        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] = sqr(b[i]);
        }";
    let (printed, report) = run_with(source, &TargetConfig::sse2(), &PassOptions::default());
    assert_eq!(report.inlined, 1);
    assert_eq!(report.vectorize.vectorized, 1);
    assert_eq!(report.vectorize.stats.loads, 2);
    assert_eq!(report.vectorize.stats.stores, 1);
    assert_eq!(
        report.diagnostics,
        ["f: note: function call to sqr inlined (at: `b[i] * b[i]`)"]
    );
    assert!(printed.contains(
        "_mm_storeu_ps(&a[i], _mm_mul_ps(_mm_loadu_ps(&b[i]), _mm_loadu_ps(&b[i])));"
    ));
    assert!(printed.contains("for (; i < n; ++i)\n            a[i] = b[i] * b[i];"));
}

#[test]
fn unroll_runs_before_vectorize() {
    let source = "
        void f(float *a)
        {
            int i;
            #pragma scout loop unroll
            for (i = 0; i < 3; ++i)
                a[i] = 0;
        }";
    let (printed, report) = run_with(source, &TargetConfig::sse2(), &PassOptions::default());
    assert_eq!(report.unrolled, 1);
    assert_eq!(report.vectorize.vectorized, 0);
    assert!(printed.contains("    a[0] = 0.0f;\n    a[1] = 0.0f;\n    a[2] = 0.0f;\n    i = 3;\n"));
}

#[test]
fn disabled_passes_leave_module_alone() {
    let source = "\
void f(float *a, float *b, int n)
{
    int i;
    #pragma scout loop vectorize
    for (i = 0; i < n; ++i)
        a[i] = b[i];
}
";
    let options = PassOptions::from_json_str(r#"{ "vectorize": false }"#).unwrap();
    assert!(options.inline && options.unroll);
    let (printed, report) = run_with(source, &TargetConfig::sse2(), &options);
    assert_eq!(printed, source);
    assert_eq!(report.vectorize.vectorized, 0);
    assert_eq!(report.diagnostics, Vec::<String>::new());
}

#[test]
fn options_parsing() {
    let options = PassOptions::from_json_str(r#"{ "unroll_threshold": 4 }"#).unwrap();
    assert_eq!(options, PassOptions { unroll_threshold: 4, ..PassOptions::default() });
    assert!(matches!(
        PassOptions::from_json_str(r#"{ "vectorise": true }"#),
        Err(PassError::Options(_))
    ));
}

#[test]
fn avx_gather_with_constant_stride() {
    let source = "
        void f(float *a, float *b, int n)
        {
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                a[i] = b[2 * i];
        }";
    let (printed, report) = run_with(source, &TargetConfig::avx(), &PassOptions::default());
    assert_eq!(report.vectorize.vectorized, 1);
    assert!(
        printed.contains("__m256i __gs0 = _mm256_set_epi32(2*7, 2*6, 2*5, 2*4, 2*3, 2*2, 2, 0);")
    );
    assert!(printed.contains("for (i = 0; i + 7 < n; i += 8)"));
    assert!(printed.contains("_mm256_storeu_ps(&a[i], _mm256_i32gather_ps(&b[2 * i], __gs0, 4));"));
}

#[test]
fn report_serializes() {
    let source = "
        float dot(float *a, float *b, int n)
        {
            float s = 0;
            int i;
            #pragma scout loop vectorize
            for (i = 0; i < n; ++i)
                s += a[i] * b[i];
            return s;
        }";
    let (_, report) = run_with(source, &TargetConfig::sse2(), &PassOptions::default());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["vectorize"]["vectorized"], 1);
    assert_eq!(json["vectorize"]["stats"]["loads"], 2);
    assert_eq!(json["vectorize"]["stats"]["packed_ops"], 2);
}
