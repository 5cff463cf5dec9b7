//! Whole-module driver, running every pass over every function definition.

use crate::cf::{blocking, invariant_if, split, unroll};
use crate::intrinsics::IntrinsicOracle;
use crate::passes::inline;
use crate::print::diag_to_string;
use crate::vectorize::{self, VectorizeSummary};
use crate::{DiagLevel, Func, Module};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("invalid pass options: {0}")]
    Options(#[from] serde_json::Error),

    #[error("internal error while transforming `{func}`: {message}")]
    Bug { func: String, message: String },
}

/// Which passes [`run`] applies (all of them by default).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassOptions {
    /// Inline `function expand` calls.
    pub inline: bool,

    /// Apply `loop split` pragmas.
    pub split: bool,

    /// Apply `loop block size(N)` pragmas.
    pub block: bool,

    /// Apply `loop unroll` pragmas (see [`unroll::unroll_loops`]).
    pub unroll: bool,
    pub unroll_threshold: u32,

    /// Move `condition invariant` annotated `if`s out of their loops.
    pub invariant_if: bool,

    /// Also move out `if`s whose condition is provably loop-invariant,
    /// without any annotation.
    pub auto_invariant_if: bool,

    /// Vectorize `loop vectorize` annotated loops.
    pub vectorize: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            inline: true,
            split: true,
            block: true,
            unroll: true,
            unroll_threshold: unroll::DEFAULT_THRESHOLD,
            invariant_if: true,
            auto_invariant_if: false,
            vectorize: true,
        }
    }
}

impl PassOptions {
    /// Parse options from JSON, with every missing field taking its default.
    pub fn from_json_str(json: &str) -> Result<Self, PassError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What [`run`] did, summed over all functions.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PassReport {
    pub inlined: usize,
    pub splits: usize,
    pub blocked: usize,
    pub unrolled: usize,
    pub invariant_ifs: usize,
    pub vectorize: VectorizeSummary,

    /// Every diagnostic attached while transforming, rendered (prefixed by
    /// the name of the function it's in).
    pub diagnostics: Vec<String>,
}

/// Run the passes enabled in `options` over every function defined in `module`,
/// in order: inlining, loop splitting, blocking, unrolling, invariant `if`
/// splitting, and finally vectorization.
pub fn run(
    module: &mut Module,
    oracle: &dyn IntrinsicOracle,
    options: &PassOptions,
) -> Result<PassReport, PassError> {
    let mut report = PassReport::default();
    let defined: Vec<Func> = module
        .funcs
        .iter()
        .filter(|(_, decl)| decl.def.is_some())
        .map(|(func, _)| func)
        .collect();

    for func in defined {
        let func_name = module.cx()[module.funcs[func].name].to_string();
        log::info!(target: "passes", "transforming `{func_name}`");

        module.with_func_def_body_mut(func, |mcx, func_def_body| {
            if options.inline {
                report.inlined += inline::inline_calls(mcx, func_def_body);
            }
            if options.split {
                report.splits += split::split_loops(mcx, func_def_body);
            }
            if options.block {
                report.blocked += blocking::block_loops(mcx, func_def_body);
            }
            if options.unroll {
                report.unrolled +=
                    unroll::unroll_loops(mcx, func_def_body, options.unroll_threshold);
            }
            if options.invariant_if {
                report.invariant_ifs += invariant_if::split_invariant_ifs(
                    mcx,
                    func_def_body,
                    options.auto_invariant_if,
                );
            }
            if options.vectorize {
                let summary = vectorize::vectorize_func(mcx, func_def_body, oracle);
                log::info!(
                    target: "passes",
                    "`{func_name}`: {} loop(s) vectorized, {} rejected, {} left scalar",
                    summary.vectorized,
                    summary.rejected,
                    summary.left_scalar,
                );
                report.vectorize += summary;
            }
        });

        let mcx = module.module_cx();
        let Some(func_def_body) = module.funcs[func].def.as_ref() else {
            continue;
        };
        for (node, diag) in &func_def_body.diags {
            let rendered = diag_to_string(mcx, func_def_body, *node, diag);
            if let DiagLevel::Bug(_) = diag.level {
                return Err(PassError::Bug { func: func_name, message: rendered });
            }
            report.diagnostics.push(format!("{func_name}: {rendered}"));
        }
    }

    let stats = report.vectorize.stats;
    log::info!(
        target: "passes",
        "done: {} loads, {} stores, {} packed operations emitted",
        stats.loads,
        stats.stores,
        stats.packed_ops,
    );
    Ok(report)
}
