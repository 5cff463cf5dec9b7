//! Per-loop analysis results, and the context ([`VectorizeInfo`]) owning them.

use crate::cf::CountedLoop;
use crate::intrinsics::SimdType;
use crate::pragma::StorageRoot;
use crate::vectorize::live::{LiveTracker, MemRegion};
use crate::{Diag, Expr, FxIndexMap, Node, Stmt, Var};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::ops::AddAssign;

/// How a value (or the address of a memory region) varies between iterations
/// of the loop being vectorized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StrideKind {
    /// Same value in every iteration.
    Constant,

    /// Analysis failed (a diagnostic explains why).
    NotAnalyzed,

    /// Affine in the loop variable, i.e. `base + stride * i`.
    Stride1,

    /// Varies in any other way (e.g. loaded from a strided region).
    Stride1Dependent,
}

/// Symbolic stride `constant + factor_1 * expr_1 + ...`, where every `expr_k`
/// is a loop-invariant scalar (e.g. `n` in `a[i * n]`).
#[derive(Clone, PartialEq, Eq)]
pub struct Stride {
    pub constant: i64,
    pub terms: SmallVec<[(Expr, i64); 1]>,
}

impl Stride {
    pub fn constant(constant: i64) -> Self {
        Self { constant, terms: smallvec![] }
    }

    pub fn one() -> Self {
        Self::constant(1)
    }

    /// The stride as a compile-time constant, if it has no symbolic terms.
    pub fn as_constant(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    fn is_zero(&self) -> bool {
        self.as_constant() == Some(0)
    }

    fn is_one(&self) -> bool {
        self.as_constant() == Some(1)
    }

    pub fn add(mut self, other: Self) -> Self {
        self.constant = self.constant.wrapping_add(other.constant);
        self.terms.extend(other.terms);
        self
    }

    pub fn scale(mut self, factor: i64) -> Self {
        self.constant = self.constant.wrapping_mul(factor);
        for (_, term_factor) in &mut self.terms {
            *term_factor = term_factor.wrapping_mul(factor);
        }
        self
    }

    pub fn neg(self) -> Self {
        self.scale(-1)
    }

    /// Multiply by the loop-invariant (but not compile-time constant) `factor`,
    /// which is only representable while `self` has no symbolic terms yet.
    pub fn scale_by(self, factor: Expr) -> Option<Self> {
        let constant = self.as_constant()?;
        Some(Self { constant: 0, terms: smallvec![(factor, constant)] })
    }
}

impl fmt::Debug for Stride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.constant)?;
        for (expr, factor) in &self.terms {
            write!(f, " + {factor}*{expr:?}")?;
        }
        Ok(())
    }
}

/// Classification of one expression (its value, or for lvalues, possibly the
/// identity of the memory region it designates).
///
/// Equality only compares the [`kind`](Self::kind).
#[derive(Clone, Debug)]
pub struct StridedExprResult {
    pub kind: StrideKind,

    /// Only for `Stride1`, `None` meaning exactly `1`.
    pub stride: Option<Stride>,

    /// Set for values depending on the variable of a nested loop, which are
    /// the same in every lane, but can't be hoisted out of the nested loop.
    pub inner_loop_variant: bool,
}

impl PartialEq for StridedExprResult {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl StridedExprResult {
    fn new(kind: StrideKind) -> Self {
        Self { kind, stride: None, inner_loop_variant: false }
    }

    pub fn constant() -> Self {
        Self::new(StrideKind::Constant)
    }

    pub fn not_analyzed() -> Self {
        Self::new(StrideKind::NotAnalyzed)
    }

    pub fn dependent() -> Self {
        Self::new(StrideKind::Stride1Dependent)
    }

    /// `Stride1` with `stride`, normalizing a zero stride to `Constant`.
    pub fn stride1(stride: Stride) -> Self {
        if stride.is_zero() {
            return Self::constant();
        }
        Self {
            kind: StrideKind::Stride1,
            stride: (!stride.is_one()).then_some(stride),
            inner_loop_variant: false,
        }
    }

    pub fn with_inner_loop_variant(mut self, inner_loop_variant: bool) -> Self {
        self.inner_loop_variant |= inner_loop_variant;
        self
    }

    /// The stride of a `Stride1` result (`1` when not explicitly known).
    pub fn stride_or_one(&self) -> Stride {
        self.stride.clone().unwrap_or_else(Stride::one)
    }

    pub fn is_constant(&self) -> bool {
        self.kind == StrideKind::Constant
    }

    /// Constant, and not merely for the duration of a nested loop iteration.
    pub fn is_absolute_constant(&self) -> bool {
        self.is_constant() && !self.inner_loop_variant
    }

    pub fn is_not_analyzed(&self) -> bool {
        self.kind == StrideKind::NotAnalyzed
    }

    /// Stride-1 values lose their stride identity (e.g. when compared).
    pub fn degrade(self) -> Self {
        match self.kind {
            StrideKind::Stride1 => {
                Self::dependent().with_inner_loop_variant(self.inner_loop_variant)
            }
            _ => self,
        }
    }

    /// The most precise result describing a value that may come from either
    /// `self` or `other` (e.g. written on different branches).
    pub fn merge(&self, other: &Self) -> Self {
        let inner_loop_variant = self.inner_loop_variant || other.inner_loop_variant;
        let merged = match (self.kind, other.kind) {
            (StrideKind::NotAnalyzed, _) | (_, StrideKind::NotAnalyzed) => Self::not_analyzed(),
            (StrideKind::Constant, StrideKind::Constant) => Self::constant(),
            (StrideKind::Stride1, StrideKind::Stride1) if self.stride == other.stride => {
                self.clone()
            }
            _ => Self::dependent(),
        };
        merged.with_inner_loop_variant(inner_loop_variant)
    }
}

/// Associative operators recognized in `acc = acc op x` reductions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReductionOp {
    Add,

    /// `acc = acc - x`, accumulated as negated partial sums.
    Sub,

    Mul,
    Min,
    Max,
}

#[derive(Copy, Clone, Debug)]
pub struct Reduction {
    pub op: ReductionOp,

    /// The statement `acc = acc op x`.
    pub stmt: Stmt,

    /// The `x` operand (everything but the accumulator).
    pub operand: Expr,

    pub simd: SimdType,
}

/// One entry in the vectorized loop body, in source order.
#[derive(Clone, Debug)]
pub enum TopLevelStmt {
    /// Assignment emitted as vector operations on `simd` vectors.
    Vectorize { stmt: Stmt, simd: SimdType },

    /// Assignment that could be vectorized, but is emitted once per lane
    /// (for `loop vectorize unroll`, or lack of a vector type for it).
    ForceUnroll { stmt: Stmt },

    /// Any other statement (i.e. an `if` with a lane-dependent condition),
    /// emitted once per lane.
    Unroll { stmt: Stmt },

    /// Nested `for` loop (uniform across lanes), kept as a loop around its
    /// own vectorized body.
    Loop { stmt: Stmt, body: Vec<TopLevelStmt> },

    /// `if` (without `else`) guarding the start of the loop body, emitted by
    /// blending the results of its body under the condition.
    Guarded { stmt: Stmt, body: Vec<TopLevelStmt> },
}

/// Outcome of analyzing a loop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnalyzeResult {
    DontVectorize,
    Vectorize,

    /// The `if`/`?:` testing `target` must first be moved out of the loop.
    SplitIf { target: Expr, static_result: Option<bool> },

    /// Vectorizable, with the `if` statement `target` turned into a mask.
    GuardingIf { target: Stmt },
}

/// `loop vectorize` pragma modifiers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum VectorizeMode {
    #[default]
    Normal,

    /// Ignore possible dependencies between accesses of the same array.
    Force,

    /// Analyze (and restructure) the loop, but leave it scalar.
    Scalar,

    /// Emit every assignment once per lane instead of as vector operations.
    Unroll,
}

/// Counts of the vector operations emitted.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Statistics {
    pub loads: u32,
    pub stores: u32,
    pub packed_ops: u32,
}

impl AddAssign for Statistics {
    fn add_assign(&mut self, other: Self) {
        self.loads += other.loads;
        self.stores += other.stores;
        self.packed_ops += other.packed_ops;
    }
}

/// Everything known about one loop being vectorized, from analysis through
/// code generation (and dropped wholesale afterwards).
pub struct VectorizeInfo {
    pub loop_stmt: Stmt,
    pub counted: CountedLoop,
    pub mode: VectorizeMode,

    /// Lane count, fixed by the first statement needing a vector type.
    pub width: Option<u32>,

    /// Classification of every analyzed expression's value.
    pub results: FxHashMap<Expr, StridedExprResult>,

    /// The memory region designated by every analyzed lvalue.
    pub lvalue_regions: FxHashMap<Expr, MemRegion>,

    pub live: LiveTracker,

    /// Induction variables of the nested loops being analyzed.
    pub inner_loop_vars: FxHashSet<Var>,

    /// Set by a `?:` with a loop-invariant condition, for the statement
    /// containing it to request splitting the loop on that condition.
    pub pending_constant_cond: Option<Expr>,

    pub top_level: Vec<TopLevelStmt>,

    /// Indices (see [`LiveTracker::current_stmt`]) of `Vectorize` entries.
    pub vectorized_stmts: FxHashSet<usize>,

    pub reductions: FxHashMap<MemRegion, Reduction>,

    pub aligned: SmallVec<[StorageRoot; 2]>,
    pub nontemporal: SmallVec<[StorageRoot; 2]>,

    /// Notes explaining why analysis failed, to attach once it's over.
    pub notes: Vec<(Node, Diag)>,

    // Code generation state.
    /// Vector temporary holding each region kept in registers.
    pub temps: FxHashMap<MemRegion, Var>,

    /// Hoisted loop-invariant splats, by vector type and structural key.
    pub invariants: FxIndexMap<(SimdType, String), Var>,

    /// Hoisted gather/scatter index vectors, by vector type and distance.
    pub gs_indices: FxIndexMap<(SimdType, String), Var>,

    pub stats: Statistics,
}

impl VectorizeInfo {
    pub fn new(
        loop_stmt: Stmt,
        counted: CountedLoop,
        mode: VectorizeMode,
        live: LiveTracker,
    ) -> Self {
        Self {
            loop_stmt,
            counted,
            mode,
            width: None,
            results: FxHashMap::default(),
            lvalue_regions: FxHashMap::default(),
            live,
            inner_loop_vars: FxHashSet::default(),
            pending_constant_cond: None,
            top_level: vec![],
            vectorized_stmts: FxHashSet::default(),
            reductions: FxHashMap::default(),
            aligned: SmallVec::new(),
            nontemporal: SmallVec::new(),
            notes: vec![],
            temps: FxHashMap::default(),
            invariants: FxIndexMap::default(),
            gs_indices: FxIndexMap::default(),
            stats: Statistics::default(),
        }
    }

    /// Record why analysis of `node` failed.
    pub fn note(&mut self, node: impl Into<Node>, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!(target: "vectorize", "not vectorizable: {reason}");
        self.notes.push((node.into(), Diag::note(["not vectorizable: ".into(), reason.into()])));
    }
}
