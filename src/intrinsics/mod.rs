//! SIMD intrinsics, as described by a target configuration.
//!
//! Nothing in this crate knows about any specific instruction set: every
//! vector type and every vector operation is looked up through the
//! [`IntrinsicOracle`] trait, by an abstract operation name (see [`ops`]),
//! an element type and a vector width.
//!
//! Operations resolve to an [`Intrinsic`], whose `template` is a C expression
//! with `%1%`, `%2%`, etc. placeholders for its arguments, e.g.:
//! ```text
//! expression_add      => _mm_add_ps(%1%, %2%)
//! expression_neg      => _mm_sub_ps(_mm_setzero_ps(), %1%)
//! extract@0           => _mm_cvtss_f32(%1%)
//! ```
//! (`op@lane` entries override `op` for that one lane index.)
//!
//! The only [`IntrinsicOracle`] implementation provided is [`TargetConfig`],
//! which is loaded from JSON (see [`config`] for the format).

pub mod config;

pub use config::{ConfigError, TargetConfig};

use crate::{Context, InternedStr, ScalarType, Type};
use std::fmt;

/// A vector of `width` elements of type `elem`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SimdType {
    pub elem: ScalarType,
    pub width: u32,
}

impl fmt::Display for SimdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.elem.c_name(), self.width)
    }
}

/// A resolved operation: the name of the function (or macro) called, if the
/// template is just a call, and the template used for printing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Intrinsic {
    pub symbol: InternedStr,
    pub template: InternedStr,
}

/// Abstract operation names, and how many arguments each one takes.
pub mod ops {
    /// `load_aligned(address)`
    pub const LOAD_ALIGNED: &str = "load_aligned";
    /// `load_unaligned(address)`
    pub const LOAD_UNALIGNED: &str = "load_unaligned";
    /// `store_aligned(address, vector)`
    pub const STORE_ALIGNED: &str = "store_aligned";
    /// `store_unaligned(address, vector)`
    pub const STORE_UNALIGNED: &str = "store_unaligned";
    /// `store_nt(address, vector)` (non-temporal, i.e. bypassing caches)
    pub const STORE_NT: &str = "store_nt";
    /// `splat(scalar)`: every lane set to the same value.
    pub const SPLAT: &str = "splat";
    /// `broadcast(address)`: like `splat`, but loading the scalar from memory.
    pub const BROADCAST: &str = "broadcast";
    /// `set(lane0, lane1, ...)`, taking exactly `width` arguments.
    pub const SET: &str = "set";
    /// `extract(vector, lane)`
    pub const EXTRACT: &str = "extract";
    /// `insert(vector, scalar, lane)`
    pub const INSERT: &str = "insert";
    /// `gather(base_address, index_vector)`, indices counted in elements.
    pub const GATHER: &str = "gather";
    /// `scatter(base_address, index_vector, vector)`
    pub const SCATTER: &str = "scatter";
    /// `get_uniform_gs_index(distance)`: the index vector `0, d, 2*d, ...`.
    pub const GET_UNIFORM_GS_INDEX: &str = "get_uniform_gs_index";

    pub const ADD: &str = "expression_add";
    pub const SUB: &str = "expression_sub";
    pub const MUL: &str = "expression_mul";
    pub const DIV: &str = "expression_div";
    pub const NEG: &str = "expression_neg";
    pub const MIN: &str = "expression_min";
    pub const MAX: &str = "expression_max";

    /// `condition_lt(a, b, if_true, if_false)`, i.e. `a < b ? if_true : if_false`.
    pub const CONDITION_LT: &str = "expression_condition_lt";
    pub const CONDITION_LE: &str = "expression_condition_le";
    pub const CONDITION_GT: &str = "expression_condition_gt";
    pub const CONDITION_GE: &str = "expression_condition_ge";

    /// Number of arguments taken by an operation.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum Arity {
        Fixed(u32),

        /// As many arguments as the vector has lanes.
        Width,
    }

    /// Every known operation (functions, e.g. `sqrt`, are configured separately).
    pub const ALL: &[(&str, Arity)] = &[
        (LOAD_ALIGNED, Arity::Fixed(1)),
        (LOAD_UNALIGNED, Arity::Fixed(1)),
        (STORE_ALIGNED, Arity::Fixed(2)),
        (STORE_UNALIGNED, Arity::Fixed(2)),
        (STORE_NT, Arity::Fixed(2)),
        (SPLAT, Arity::Fixed(1)),
        (BROADCAST, Arity::Fixed(1)),
        (SET, Arity::Width),
        (EXTRACT, Arity::Fixed(2)),
        (INSERT, Arity::Fixed(3)),
        (GATHER, Arity::Fixed(2)),
        (SCATTER, Arity::Fixed(3)),
        (GET_UNIFORM_GS_INDEX, Arity::Fixed(1)),
        (ADD, Arity::Fixed(2)),
        (SUB, Arity::Fixed(2)),
        (MUL, Arity::Fixed(2)),
        (DIV, Arity::Fixed(2)),
        (NEG, Arity::Fixed(1)),
        (MIN, Arity::Fixed(2)),
        (MAX, Arity::Fixed(2)),
        (CONDITION_LT, Arity::Fixed(4)),
        (CONDITION_LE, Arity::Fixed(4)),
        (CONDITION_GT, Arity::Fixed(4)),
        (CONDITION_GE, Arity::Fixed(4)),
    ];

    pub fn arity(op: &str) -> Option<Arity> {
        ALL.iter().find(|&&(name, _)| name == op).map(|&(_, arity)| arity)
    }
}

/// Source of everything target-specific the vectorizer needs.
///
/// `op` is either one of the [`ops`] names, or the name of a C function
/// (e.g. `sqrt`) that has a vector counterpart.
pub trait IntrinsicOracle {
    /// Resolve `op` for vectors of `simd` type, preferring an entry specific
    /// to `lane` (an `op@lane` entry), if `lane` is given and one exists.
    fn resolve(
        &self,
        cx: &Context,
        op: &str,
        simd: SimdType,
        lane: Option<u32>,
    ) -> Option<Intrinsic>;

    /// The C type holding a whole vector (always a [`TypeKind::Simd`](crate::TypeKind::Simd)).
    fn element_storage_type(&self, cx: &Context, simd: SimdType) -> Option<Type>;

    /// Whether `op` is available for `elem`, at any vector width.
    fn has_operation(&self, op: &str, elem: ScalarType) -> bool;

    /// Required alignment (in bytes) for aligned loads/stores of `simd` vectors.
    fn byte_alignment(&self, simd: SimdType) -> Option<u32>;

    /// The widest vector width configured for `elem`, if any.
    fn preferred_width(&self, elem: ScalarType) -> Option<u32>;

    /// The C type of index vectors used by `gather`/`scatter` on `simd` vectors.
    fn gs_index_type(&self, cx: &Context, simd: SimdType) -> Option<Type>;
}

/// The function name at the start of a call-shaped template, e.g. `_mm_add_ps`
/// for `_mm_add_ps(%1%, %2%)`.
pub(crate) fn callee_name(template: &str) -> Option<&str> {
    let template = template.trim_start();
    let end = template.find('(')?;
    let name = template[..end].trim_end();
    let is_ident = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_ident.then_some(name)
}

/// All the placeholder numbers (`N` in `%N%`) used by `template`, in order.
pub(crate) fn placeholders(template: &str) -> impl Iterator<Item = u32> + '_ {
    template.split('%').skip(1).step_by(2).filter_map(|s| s.parse().ok())
}

#[cfg(test)]
mod tests;
