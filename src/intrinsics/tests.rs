use super::*;
use crate::TypeKind;
use crate::print::type_to_string;
use pretty_assertions::assert_eq;

const FLOAT4: SimdType = SimdType { elem: ScalarType::Float, width: 4 };

fn single_type_config(ops: &str) -> String {
    format!(
        r#"{{
            "name": "test",
            "types": [{{
                "base_type": "float", "width": 4, "type": "v4f", "align": 16,
                "ops": {{ {ops} }}
            }}]
        }}"#
    )
}

#[test]
fn bundled_targets_load() {
    let cx = Context::new();
    let sse2 = TargetConfig::sse2();
    let avx = TargetConfig::avx();
    assert_eq!(sse2.preferred_width(ScalarType::Float), Some(4));
    assert_eq!(sse2.preferred_width(ScalarType::Double), Some(2));
    assert_eq!(avx.preferred_width(ScalarType::Float), Some(8));
    assert_eq!(avx.preferred_width(ScalarType::Int), None);

    let simd_ty = avx.element_storage_type(&cx, SimdType { elem: ScalarType::Double, width: 4 });
    assert_eq!(simd_ty.map(|ty| type_to_string(&cx, ty)).as_deref(), Some("__m256d"));
    assert_eq!(avx.byte_alignment(SimdType { elem: ScalarType::Float, width: 8 }), Some(32));
}

#[test]
fn targets_load_from_disk() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("targets");
    let avx = TargetConfig::from_path(dir.join("avx.json")).unwrap();
    assert_eq!(avx.name, "avx");
    assert_eq!(avx.preferred_width(ScalarType::Float), Some(8));
    assert!(matches!(
        TargetConfig::from_path(dir.join("missing.json")),
        Err(ConfigError::Io { .. })
    ));
    assert!(matches!(TargetConfig::bundled("neon"), Err(ConfigError::UnknownTarget(_))));
}

#[test]
fn lane_specific_entries_win() {
    let cx = Context::new();
    let sse2 = TargetConfig::sse2();
    let template = |lane| {
        let intrinsic = sse2.resolve(&cx, ops::EXTRACT, FLOAT4, lane).unwrap();
        cx[intrinsic.template].to_string()
    };
    assert_eq!(template(Some(0)), "_mm_cvtss_f32(%1%)");
    assert_eq!(template(Some(2)), "_mm_extract_ps(%1%, %2%)");
    assert_eq!(template(None), "_mm_extract_ps(%1%, %2%)");
}

#[test]
fn functions_resolve_like_operations() {
    let cx = Context::new();
    let sse2 = TargetConfig::sse2();
    let sqrt = sse2.resolve(&cx, "sqrtf", FLOAT4, None).unwrap();
    assert_eq!(&cx[sqrt.symbol], "_mm_sqrt_ps");
    assert!(sse2.has_operation("sqrt", ScalarType::Float));
    assert!(!sse2.has_operation("exp", ScalarType::Float));
    assert!(!sse2.has_operation(ops::DIV, ScalarType::Int));

    let neg = sse2.resolve(&cx, ops::NEG, FLOAT4, None).unwrap();
    assert_eq!(&cx[neg.symbol], "_mm_sub_ps");
}

#[test]
fn gs_index_type_is_an_int_vector() {
    let cx = Context::new();
    let sse2 = TargetConfig::sse2();
    let ty = sse2.gs_index_type(&cx, FLOAT4).unwrap();
    assert!(matches!(
        cx[ty].kind,
        TypeKind::Simd { elem: ScalarType::Int, width: 4, .. }
    ));
    assert_eq!(sse2.gs_index_type(&cx, SimdType { elem: ScalarType::Double, width: 2 }), None);
}

#[test]
fn invalid_configs() {
    let cases = [
        (
            single_type_config(r#""expression_frob": "frob(%1%)""#),
            "floatx4: unknown operation `expression_frob`",
        ),
        (
            single_type_config(r#""extract@4": "x(%1%)""#),
            "floatx4: `extract@4` has invalid lane index (vectors only have 4 lanes)",
        ),
        (
            single_type_config(r#""expression_add": "add(%1%, %3%)""#),
            "floatx4: template `add(%1%, %3%)` for `expression_add` uses placeholder %3%, \
             but `expression_add` only takes 2 argument(s)",
        ),
        (
            single_type_config(r#""set": "set(%1%, %2%, %3%, %4%, %5%)""#),
            "floatx4: template `set(%1%, %2%, %3%, %4%, %5%)` for `set` uses placeholder %5%, \
             but `set` only takes 4 argument(s)",
        ),
    ];
    for (json, expected) in cases {
        let err = TargetConfig::from_json_str(&json).unwrap_err();
        assert_eq!(err.to_string(), expected);
    }

    let duplicated = r#"{"name": "dup", "types": [
        {"base_type": "int", "width": 4, "type": "a", "align": 16},
        {"base_type": "int", "width": 4, "type": "b", "align": 16}
    ]}"#;
    assert!(matches!(
        TargetConfig::from_json_str(duplicated),
        Err(ConfigError::DuplicateType(SimdType { elem: ScalarType::Int, width: 4 }))
    ));
    assert!(matches!(TargetConfig::from_json_str("{"), Err(ConfigError::Json(_))));
    assert!(matches!(TargetConfig::bundled("neon"), Err(ConfigError::UnknownTarget(_))));
}

#[test]
fn callee_names_and_placeholders() {
    assert_eq!(callee_name("_mm_add_ps(%1%, %2%)"), Some("_mm_add_ps"));
    assert_eq!(callee_name("(*((float*)(&%1%)+%3%))"), None);
    assert_eq!(placeholders("f(%1%*3, %1%, %12%) % 2").collect::<Vec<_>>(), [1, 1, 12]);
}
