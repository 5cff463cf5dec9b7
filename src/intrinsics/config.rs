//! JSON-backed [`IntrinsicOracle`] implementation.
//!
//! A target configuration looks like this (abridged):
//! ```json
//! {
//!     "name": "sse2",
//!     "types": [
//!         {
//!             "base_type": "float",
//!             "width": 4,
//!             "type": "__m128",
//!             "align": 16,
//!             "gs_index_type": "__m128i",
//!             "ops": {
//!                 "load_aligned": "_mm_load_ps(%1%)",
//!                 "extract": "_mm_extract_ps(%1%, %2%)",
//!                 "extract@0": "_mm_cvtss_f32(%1%)",
//!                 "expression_add": "_mm_add_ps(%1%, %2%)"
//!             },
//!             "functions": {
//!                 "sqrtf": "_mm_sqrt_ps(%1%)"
//!             }
//!         }
//!     ]
//! }
//! ```
//! Every template is checked on load against the arity of its operation
//! (see [`ops::ALL`]), so that printing can never hit a dangling placeholder.

use super::{Intrinsic, IntrinsicOracle, SimdType, callee_name, ops, placeholders};
use crate::{Context, FxIndexMap, ScalarType, Type, TypeKind};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Most arguments a mapped C function (e.g. `fmaf`) can take.
const MAX_FUNCTION_ARITY: u32 = 4;

static BUNDLED_TARGETS: &[(&str, &str)] = &[
    ("sse2", include_str!("../../targets/sse2.json")),
    ("avx", include_str!("../../targets/avx.json")),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed target configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read target configuration `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown target `{0}` (bundled targets: sse2, avx)")]
    UnknownTarget(String),

    #[error("{simd}: unknown operation `{op}`")]
    UnknownOperation { simd: SimdType, op: String },

    #[error("{simd}: `{op}` has invalid lane index (vectors only have {} lanes)", .simd.width)]
    InvalidLane { simd: SimdType, op: String },

    #[error(
        "{simd}: template `{template}` for `{op}` uses placeholder %{placeholder}%, \
         but `{op}` only takes {arity} argument(s)"
    )]
    InvalidTemplate { simd: SimdType, op: String, template: String, placeholder: u32, arity: u32 },

    #[error("{0} is configured more than once")]
    DuplicateType(SimdType),

    #[error("vector width must be at least 2 (found {0})")]
    InvalidWidth(SimdType),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    name: String,
    types: Vec<RawTypeConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTypeConfig {
    base_type: ScalarType,
    width: u32,
    #[serde(rename = "type")]
    type_name: String,
    align: u32,
    #[serde(default)]
    gs_index_type: Option<String>,
    #[serde(default)]
    ops: BTreeMap<String, String>,
    #[serde(default)]
    functions: BTreeMap<String, String>,
}

/// Everything configured for one [`SimdType`].
#[derive(Clone, Debug)]
pub struct TypeConfig {
    pub type_name: String,
    pub align: u32,
    pub gs_index_type: Option<String>,
    ops: FxHashMap<String, String>,
    lane_ops: FxHashMap<(String, u32), String>,
    functions: FxHashMap<String, String>,
}

impl TypeConfig {
    fn template(&self, op: &str, lane: Option<u32>) -> Option<&str> {
        let lane_specific = lane.and_then(|lane| self.lane_ops.get(&(op.to_string(), lane)));
        lane_specific
            .or_else(|| self.ops.get(op))
            .or_else(|| self.functions.get(op))
            .map(|s| &s[..])
    }

    fn has(&self, op: &str) -> bool {
        self.ops.contains_key(op)
            || self.functions.contains_key(op)
            || self.lane_ops.keys().any(|(lane_op, _)| lane_op == op)
    }
}

/// A whole target: every SIMD type it supports, with its operations.
#[derive(Clone, Debug)]
pub struct TargetConfig {
    pub name: String,
    types: FxIndexMap<SimdType, TypeConfig>,
}

impl TargetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let mut types = FxIndexMap::default();
        for raw_type in raw.types {
            let simd = SimdType { elem: raw_type.base_type, width: raw_type.width };
            if simd.width < 2 {
                return Err(ConfigError::InvalidWidth(simd));
            }
            let type_config = validate_type(simd, raw_type)?;
            if types.insert(simd, type_config).is_some() {
                return Err(ConfigError::DuplicateType(simd));
            }
        }
        log::debug!(
            target: "intrinsics",
            "loaded target `{}` ({} SIMD types)",
            raw.name,
            types.len()
        );
        Ok(Self { name: raw.name, types })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&json)
    }

    /// One of the targets shipped with this crate (`sse2` or `avx`).
    pub fn bundled(name: &str) -> Result<Self, ConfigError> {
        let &(_, json) = BUNDLED_TARGETS
            .iter()
            .find(|&&(bundled_name, _)| bundled_name == name)
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;
        Self::from_json_str(json)
    }

    pub fn sse2() -> Self {
        Self::bundled("sse2").unwrap_or_else(|e| unreachable!("bundled `sse2` target: {e}"))
    }

    pub fn avx() -> Self {
        Self::bundled("avx").unwrap_or_else(|e| unreachable!("bundled `avx` target: {e}"))
    }

    pub fn type_config(&self, simd: SimdType) -> Option<&TypeConfig> {
        self.types.get(&simd)
    }
}

fn validate_type(simd: SimdType, raw: RawTypeConfig) -> Result<TypeConfig, ConfigError> {
    let check_placeholders = |op: &str, template: &str, arity: u32| {
        match placeholders(template).find(|&n| n == 0 || n > arity) {
            Some(placeholder) => Err(ConfigError::InvalidTemplate {
                simd,
                op: op.to_string(),
                template: template.to_string(),
                placeholder,
                arity,
            }),
            None => Ok(()),
        }
    };

    let mut ops = FxHashMap::default();
    let mut lane_ops = FxHashMap::default();
    for (key, template) in raw.ops {
        let (op, lane) = match key.split_once('@') {
            Some((op, lane)) => {
                let lane = lane
                    .parse::<u32>()
                    .ok()
                    .filter(|&lane| lane < simd.width)
                    .ok_or_else(|| ConfigError::InvalidLane { simd, op: key.clone() })?;
                (op, Some(lane))
            }
            None => (&key[..], None),
        };
        let arity = match ops::arity(op) {
            Some(ops::Arity::Fixed(n)) => n,
            Some(ops::Arity::Width) => simd.width,
            None => return Err(ConfigError::UnknownOperation { simd, op: op.to_string() }),
        };
        check_placeholders(&key, &template, arity)?;
        match lane {
            Some(lane) => lane_ops.insert((op.to_string(), lane), template),
            None => ops.insert(op.to_string(), template),
        };
    }

    let mut functions = FxHashMap::default();
    for (name, template) in raw.functions {
        check_placeholders(&name, &template, MAX_FUNCTION_ARITY)?;
        functions.insert(name, template);
    }

    Ok(TypeConfig {
        type_name: raw.type_name,
        align: raw.align,
        gs_index_type: raw.gs_index_type,
        ops,
        lane_ops,
        functions,
    })
}

impl IntrinsicOracle for TargetConfig {
    fn resolve(
        &self,
        cx: &Context,
        op: &str,
        simd: SimdType,
        lane: Option<u32>,
    ) -> Option<Intrinsic> {
        let template = self.types.get(&simd)?.template(op, lane)?;
        let symbol = callee_name(template).unwrap_or(op);
        Some(Intrinsic { symbol: cx.intern(symbol), template: cx.intern(template) })
    }

    fn element_storage_type(&self, cx: &Context, simd: SimdType) -> Option<Type> {
        let type_config = self.types.get(&simd)?;
        let name = cx.intern(&type_config.type_name[..]);
        Some(cx.intern(TypeKind::Simd { name, elem: simd.elem, width: simd.width }))
    }

    fn has_operation(&self, op: &str, elem: ScalarType) -> bool {
        self.types.iter().any(|(simd, type_config)| simd.elem == elem && type_config.has(op))
    }

    fn byte_alignment(&self, simd: SimdType) -> Option<u32> {
        self.types.get(&simd).map(|type_config| type_config.align)
    }

    fn preferred_width(&self, elem: ScalarType) -> Option<u32> {
        self.types.keys().filter(|simd| simd.elem == elem).map(|simd| simd.width).max()
    }

    fn gs_index_type(&self, cx: &Context, simd: SimdType) -> Option<Type> {
        let name = self.types.get(&simd)?.gs_index_type.as_deref()?;
        let name = cx.intern(name);
        Some(cx.intern(TypeKind::Simd { name, elem: ScalarType::Int, width: simd.width }))
    }
}
