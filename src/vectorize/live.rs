//! Live memory region tracking, i.e. which classification the value stored in
//! each memory region has, at every point of one iteration of the loop body.
//!
//! Regions are minted per distinct lvalue (by [`structural_key`]), and every
//! read/write of them is recorded in order, tagged with the (innermost) branch
//! of an `if` it happened under. Writes "bind" the written value to the region,
//! so later reads in the same iteration see it, e.g.:
//! ```c
//! t = a[i];     // `t` bound to the (dependent) contents of `a[i]`
//! b[i] = t * 2; // reads the binding, not the value from the last iteration
//! ```
//! Reading a region the loop writes, before (or without definitely) writing
//! it in the current iteration, observes the previous iteration's value, i.e.
//! a dependency carried between iterations, which vectorization can't express.

use crate::func_at::FuncAt;
use crate::pragma::StorageRoot;
use crate::print::structural_key;
use crate::vectorize::info::StridedExprResult;
use crate::visit::Visitor;
use crate::{Expr, ExprKind, FuncDefBody, ModuleCx, Stmt, Type, UnOp};
use rustc_hash::{FxHashMap, FxHashSet};

/// Handle for one abstract storage location, minted during one loop's analysis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemRegion(u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One arm of an `if` statement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BranchTag {
    pub stmt: Stmt,
    pub then: bool,
}

#[derive(Copy, Clone, Debug)]
pub struct RegionUse {
    pub access: Access,
    pub expr: Expr,
    pub branch: Option<BranchTag>,
    pub stmt_index: usize,
}

/// How code generation has to treat a region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RegionUsage {
    /// Accessed through memory (loads/stores, or splats of invariant values).
    #[default]
    InMemory,

    /// Written and read by a single lane-unrolled statement, where each lane
    /// can keep using the scalar storage itself.
    Scalar,

    /// Kept in a vector temporary, written back (from the last lane) after
    /// every vector iteration.
    VectorTemp,

    /// Accumulator of a recognized reduction.
    Reduction,
}

pub struct RegionDef {
    pub key: String,

    /// The first lvalue seen designating this region.
    pub lvalue: Expr,

    /// How the address of the region varies between iterations.
    pub identity: StridedExprResult,

    pub root: Option<StorageRoot>,
    pub ty: Type,
    pub uses: Vec<RegionUse>,
    pub usage: RegionUsage,
}

/// What reads of a region observe, after some write in the current iteration.
#[derive(Clone, Debug)]
pub enum Binding {
    Bound(StridedExprResult),

    /// Written on some paths only (e.g. one arm of an `if`).
    Partial,
}

pub type Bindings = FxHashMap<MemRegion, Binding>;

pub struct LiveTracker {
    regions: Vec<RegionDef>,
    by_key: FxHashMap<String, MemRegion>,
    bindings: Bindings,
    branch: Option<BranchTag>,

    /// Index of the statement being analyzed (for [`RegionUse::stmt_index`]).
    pub current_stmt: usize,

    refs: LvalueRefs,
}

/// Every lvalue written in a statement, and how many times each is referenced
/// (both keyed by [`structural_key`]).
#[derive(Default)]
pub struct LvalueRefs {
    pub written: FxHashSet<String>,
    pub counts: FxHashMap<String, u32>,
}

impl LvalueRefs {
    pub fn collect(mcx: ModuleCx<'_>, func: &FuncDefBody, stmt: Stmt) -> Self {
        struct LvalueCollector<'a> {
            mcx: ModuleCx<'a>,
            func: &'a FuncDefBody,
            refs: LvalueRefs,
        }
        impl LvalueCollector<'_> {
            fn key(&self, expr: Expr) -> String {
                let expr = self.func.at(expr).strip_parens_and_implicit_casts().position;
                structural_key(self.mcx, self.func, expr)
            }
        }
        impl<'a> Visitor<'a> for LvalueCollector<'_> {
            fn visit_expr_use(&mut self, func_at_expr: FuncAt<'a, Expr>) {
                match func_at_expr.def().kind {
                    ExprKind::Var(_)
                    | ExprKind::GlobalVar(_)
                    | ExprKind::Index { .. }
                    | ExprKind::Member { .. }
                    | ExprKind::Unary(UnOp::Deref, _) => {
                        let key = self.key(func_at_expr.position);
                        *self.refs.counts.entry(key).or_default() += 1;
                    }
                    ExprKind::Assign { lhs: written, .. } => {
                        self.refs.written.insert(self.key(written));
                    }
                    ExprKind::Unary(op, written) if op.is_inc_dec() => {
                        self.refs.written.insert(self.key(written));
                    }
                    _ => {}
                }
                func_at_expr.inner_visit_with(self);
            }
        }

        let mut collector = LvalueCollector { mcx, func, refs: LvalueRefs::default() };
        collector.visit_stmt_use(func.at(stmt));
        collector.refs
    }

    pub fn count(&self, key: &str) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }
}

impl LiveTracker {
    /// Prepare for analyzing `loop_body`, whose lvalue references are `refs`.
    pub fn new(refs: LvalueRefs) -> Self {
        Self {
            regions: vec![],
            by_key: FxHashMap::default(),
            bindings: Bindings::default(),
            branch: None,
            current_stmt: 0,
            refs,
        }
    }

    pub fn is_written(&self, key: &str) -> bool {
        self.refs.written.contains(key)
    }

    /// How many times the lvalue with `key` appears anywhere in the loop body.
    pub fn ref_count(&self, key: &str) -> u32 {
        self.refs.count(key)
    }

    pub fn lookup(&self, key: &str) -> Option<MemRegion> {
        self.by_key.get(key).copied()
    }

    /// Get the region for `key`, minting it (from the remaining arguments) if
    /// it wasn't seen before.
    pub fn region(
        &mut self,
        key: String,
        lvalue: Expr,
        identity: StridedExprResult,
        root: Option<StorageRoot>,
        ty: Type,
    ) -> MemRegion {
        if let Some(region) = self.lookup(&key) {
            return region;
        }
        let region = MemRegion(self.regions.len() as u32);
        self.by_key.insert(key.clone(), region);
        self.regions.push(RegionDef {
            key,
            lvalue,
            identity,
            root,
            ty,
            uses: vec![],
            usage: RegionUsage::default(),
        });
        region
    }

    pub fn def(&self, region: MemRegion) -> &RegionDef {
        &self.regions[region.0 as usize]
    }

    pub fn regions(&self) -> impl Iterator<Item = (MemRegion, &RegionDef)> + '_ {
        (0..).map(MemRegion).zip(&self.regions)
    }

    fn record(&mut self, region: MemRegion, access: Access, expr: Expr) {
        let (branch, stmt_index) = (self.branch, self.current_stmt);
        self.regions[region.0 as usize].uses.push(RegionUse { access, expr, branch, stmt_index });
    }

    /// Record a read, returning what it observes (`None` if nothing was
    /// written to the region yet, in the current iteration).
    pub fn read(&mut self, region: MemRegion, expr: Expr) -> Option<Binding> {
        self.record(region, Access::Read, expr);
        self.bindings.get(&region).cloned()
    }

    pub fn write(&mut self, region: MemRegion, expr: Expr, content: StridedExprResult) {
        self.record(region, Access::Write, expr);
        self.bindings.insert(region, Binding::Bound(content));
    }

    pub fn snapshot(&self) -> Bindings {
        self.bindings.clone()
    }

    pub fn restore(&mut self, bindings: Bindings) {
        self.bindings = bindings;
    }

    /// Start tagging uses with `branch`, returning the previous tag.
    pub fn enter_branch(&mut self, branch: BranchTag) -> Option<BranchTag> {
        self.branch.replace(branch)
    }

    pub fn leave_branch(&mut self, previous: Option<BranchTag>) {
        self.branch = previous;
    }

    /// Join the bindings at the end of both arms of an `if` (each arm having
    /// started from the bindings before the `if`, so anything bound before it
    /// is present in both).
    pub fn merge_branches(&mut self, then_bindings: Bindings, else_bindings: Bindings) {
        let mut merged = Bindings::default();
        for (&region, then_binding) in &then_bindings {
            let binding = match (then_binding, else_bindings.get(&region)) {
                (Binding::Bound(a), Some(Binding::Bound(b))) => Binding::Bound(a.merge(b)),
                _ => Binding::Partial,
            };
            merged.insert(region, binding);
        }
        for &region in else_bindings.keys() {
            merged.entry(region).or_insert(Binding::Partial);
        }
        self.bindings = merged;
    }

    /// Join the bindings after a nested loop with those before it (the nested
    /// loop may run any number of times, including none).
    pub fn merge_loop_exit(&mut self, before: &Bindings) {
        for (region, binding) in &mut self.bindings {
            *binding = match (before.get(region), &*binding) {
                (Some(Binding::Bound(before)), Binding::Bound(after)) => {
                    Binding::Bound(before.merge(after))
                }
                _ => Binding::Partial,
            };
        }
    }

    /// Decide the [`RegionUsage`] of every region, once analysis is complete.
    pub fn finalize(
        &mut self,
        is_reduction: impl Fn(MemRegion) -> bool,
        is_vectorized_stmt: impl Fn(usize) -> bool,
    ) {
        for (idx, def) in self.regions.iter_mut().enumerate() {
            let region = MemRegion(idx as u32);
            let written = def.uses.iter().any(|u| u.access == Access::Write);
            def.usage = if !def.identity.is_constant() || !written {
                RegionUsage::InMemory
            } else if is_reduction(region) {
                RegionUsage::Reduction
            } else {
                let mut stmts = def.uses.iter().map(|u| u.stmt_index);
                let first = stmts.next();
                let single_stmt = first.is_some_and(|first| stmts.all(|s| s == first));
                if single_stmt && !first.is_some_and(&is_vectorized_stmt) {
                    RegionUsage::Scalar
                } else {
                    RegionUsage::VectorTemp
                }
            };
            log::trace!(target: "vectorize", "region `{}`: {:?}", def.key, def.usage);
        }
    }
}
