//! Loop vectorization, for loops annotated with `#pragma scout loop vectorize`.
//!
//! Every annotated loop is handled in two phases:
//! - analysis ([`analyze_loop`]), classifying every expression of the body by
//!   how it varies between iterations (see [`StridedExprResult`]), tracking
//!   the values stored in memory regions within one iteration (see
//!   [`live::LiveTracker`]), and deciding per statement how it's emitted
//!   (see [`TopLevelStmt`])
//! - code generation, replacing the loop with a vector loop (whose iterations
//!   each cover as many scalar iterations as vectors have lanes) followed by
//!   the original loop (for the remaining iterations)
//!
//! Analysis may instead request splitting the loop on a loop-invariant
//! condition (see [`crate::cf::invariant_if`]), after which the loop(s) are
//! analyzed again.
//!
//! The pragma accepts these arguments:
//! - `force`: ignore possible dependencies through arrays/pointers
//! - `scalar`: only analyze (and split) the loop, leaving it scalar
//! - `unroll`: emit every lane as scalar code (no vector operations)
//! - `aligned(a, ...)`: accesses through `a` can use aligned loads/stores
//! - `nontemporal(a, ...)`: stores through `a` bypass the caches

mod codegen;
mod collect;
pub mod info;
pub mod live;
mod stride;

pub use codegen::CodegenError;
pub use info::{
    AnalyzeResult, Reduction, ReductionOp, Statistics, Stride, StrideKind, StridedExprResult,
    TopLevelStmt, VectorizeInfo, VectorizeMode,
};

use crate::cf::invariant_if::{REASON_NO_LOCAL_WRITES, split_loop_at_if};
use crate::cf::{CountedLoop, collect_loops};
use crate::intrinsics::IntrinsicOracle;
use crate::pragma::{self, Pragma, PragmaDomain};
use crate::{Diag, FuncDefBody, ModuleCx, Stmt};
use collect::Analyzer;
use live::{LiveTracker, LvalueRefs};
use rustc_hash::FxHashSet;

/// What happened to the annotated loops of one function.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct VectorizeSummary {
    pub vectorized: u32,
    pub rejected: u32,
    pub left_scalar: u32,

    /// Loops split on a loop-invariant condition (and analyzed again).
    pub splits: u32,

    pub stats: Statistics,
}

impl std::ops::AddAssign for VectorizeSummary {
    fn add_assign(&mut self, other: Self) {
        self.vectorized += other.vectorized;
        self.rejected += other.rejected;
        self.left_scalar += other.left_scalar;
        self.splits += other.splits;
        self.stats += other.stats;
    }
}

enum LoopOutcome {
    Vectorized(Statistics),
    Split,
    LeftScalar,
    Rejected,
}

/// The `loop vectorize` pragma of `stmt`, if any.
fn vectorize_pragma<'a>(
    mcx: ModuleCx<'_>,
    func: &'a FuncDefBody,
    stmt: Stmt,
) -> Option<&'a Pragma> {
    pragma::find(mcx.cx, &func.stmts[stmt].pragmas, PragmaDomain::Loop, "vectorize")
}

fn mode_from_pragma(mcx: ModuleCx<'_>, pragma: &Pragma) -> VectorizeMode {
    let cx = mcx.cx;
    if pragma.has_argument(cx, "scalar") {
        VectorizeMode::Scalar
    } else if pragma.has_argument(cx, "unroll") {
        VectorizeMode::Unroll
    } else if pragma.has_argument(cx, "force") {
        VectorizeMode::Force
    } else {
        VectorizeMode::Normal
    }
}

/// Vectorize every annotated loop in `func`.
pub fn vectorize_func(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    oracle: &dyn IntrinsicOracle,
) -> VectorizeSummary {
    let mut summary = VectorizeSummary::default();
    let mut done = FxHashSet::default();

    // Any rewrite invalidates the list of loops, which then gets recomputed.
    'restart: loop {
        for loop_stmt in collect_loops(func, func.body) {
            if done.contains(&loop_stmt) || vectorize_pragma(mcx, func, loop_stmt).is_none() {
                continue;
            }
            done.insert(loop_stmt);
            match vectorize_loop(mcx, func, oracle, loop_stmt) {
                LoopOutcome::Vectorized(stats) => {
                    summary.vectorized += 1;
                    summary.stats += stats;
                    continue 'restart;
                }
                LoopOutcome::Split => {
                    summary.splits += 1;
                    done.remove(&loop_stmt);
                    continue 'restart;
                }
                LoopOutcome::LeftScalar => summary.left_scalar += 1,
                LoopOutcome::Rejected => summary.rejected += 1,
            }
        }
        break;
    }
    summary
}

fn vectorize_loop(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    oracle: &dyn IntrinsicOracle,
    loop_stmt: Stmt,
) -> LoopOutcome {
    let Some(pragma) = vectorize_pragma(mcx, func, loop_stmt) else {
        return LoopOutcome::Rejected;
    };
    let mode = mode_from_pragma(mcx, pragma);
    log::info!(target: "vectorize", "analyzing loop ({mode:?})");

    let counted = match CountedLoop::match_for(mcx.cx, func, loop_stmt) {
        Ok(counted) => counted,
        Err(reason) => {
            log::info!(target: "vectorize", "loop not vectorized: {reason}");
            func.attach_diag(loop_stmt, Diag::note(["not vectorizable: ".into(), reason.into()]));
            return LoopOutcome::Rejected;
        }
    };
    let expanded = collect::expand_compound_assignments(mcx.cx, func, counted.body);
    let (result, mut info) = analyze_counted_loop(mcx, func, oracle, loop_stmt, counted, mode);
    func.diags.append(&mut info.notes);

    let outcome = match result {
        AnalyzeResult::DontVectorize => {
            log::info!(target: "vectorize", "loop not vectorized");
            LoopOutcome::Rejected
        }
        AnalyzeResult::SplitIf { target, static_result } => {
            collect::undo_expansion(func, expanded);
            log::info!(target: "vectorize", "splitting loop on an invariant condition first");
            split_loop_at_if(mcx, func, loop_stmt, target, static_result, REASON_NO_LOCAL_WRITES);
            return LoopOutcome::Split;
        }
        AnalyzeResult::Vectorize | AnalyzeResult::GuardingIf { .. }
            if mode == VectorizeMode::Scalar =>
        {
            func.attach_diag(
                loop_stmt,
                Diag::note(["loop left scalar (`loop vectorize scalar`)".into()]),
            );
            LoopOutcome::LeftScalar
        }
        AnalyzeResult::Vectorize | AnalyzeResult::GuardingIf { .. } => {
            match codegen::generate(mcx, func, oracle, &mut info) {
                Ok(()) => {
                    log::info!(
                        target: "vectorize",
                        "loop vectorized ({} lanes, {} loads, {} stores, {} packed ops)",
                        info.width.unwrap_or(1),
                        info.stats.loads,
                        info.stats.stores,
                        info.stats.packed_ops,
                    );
                    LoopOutcome::Vectorized(info.stats)
                }
                Err(err @ CodegenError::Internal(_)) => {
                    log::error!(target: "vectorize", "loop vectorization failed: {err}");
                    func.attach_diag(
                        loop_stmt,
                        Diag::bug(["vectorize: ".into(), err.to_string().into()]),
                    );
                    LoopOutcome::Rejected
                }
                Err(err) => {
                    log::info!(target: "vectorize", "loop not vectorized: {err}");
                    func.attach_diag(
                        loop_stmt,
                        Diag::note(["not vectorized: ".into(), err.to_string().into()]),
                    );
                    LoopOutcome::Rejected
                }
            }
        }
    };
    collect::undo_expansion(func, expanded);
    outcome
}

fn analyze_counted_loop(
    mcx: ModuleCx<'_>,
    func: &FuncDefBody,
    oracle: &dyn IntrinsicOracle,
    loop_stmt: Stmt,
    counted: CountedLoop,
    mode: VectorizeMode,
) -> (AnalyzeResult, VectorizeInfo) {
    let refs = LvalueRefs::collect(mcx, func, counted.body);
    let mut info = VectorizeInfo::new(loop_stmt, counted, mode, LiveTracker::new(refs));
    if let Some(pragma) = vectorize_pragma(mcx, func, loop_stmt) {
        info.aligned = pragma.named_storage(mcx.cx, func, "aligned");
        info.nontemporal = pragma.named_storage(mcx.cx, func, "nontemporal");
    }
    Analyzer::new(mcx, func, oracle, info).analyze()
}

/// Analyze the (counted) loop `loop_stmt`, without changing it (beyond
/// expanding compound assignments in its body, e.g. `a += b` to `a = a + b`).
pub fn analyze_loop(
    mcx: ModuleCx<'_>,
    func: &mut FuncDefBody,
    oracle: &dyn IntrinsicOracle,
    loop_stmt: Stmt,
    mode: VectorizeMode,
) -> Result<(AnalyzeResult, VectorizeInfo), &'static str> {
    let counted = CountedLoop::match_for(mcx.cx, func, loop_stmt)?;
    collect::expand_compound_assignments(mcx.cx, func, counted.body);
    Ok(analyze_counted_loop(mcx, func, oracle, loop_stmt, counted, mode))
}

#[cfg(test)]
mod tests;
