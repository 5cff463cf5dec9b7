//! `#pragma scout <domain> <action> <args...>` annotations.
//!
//! Pragmas are attached by the [`frontend`](crate::frontend) to the statement
//! (or function) that immediately follows them, e.g.:
//! ```c
//! #pragma scout loop vectorize aligned(a, b) nontemporal(c)
//! for (i = 0; i < n; ++i) { ... }
//! ```
//! Arguments are a name optionally followed by a parenthesized list of
//! expressions, which are parsed by the same grammar as any other expression
//! (and owned by the [`FuncDefBody`](crate::FuncDefBody) of the annotated code).

use crate::fold;
use crate::{Context, Expr, ExprKind, FuncDefBody, GlobalVar, InternedStr, Var};
use smallvec::SmallVec;

#[derive(Clone)]
pub struct Pragma {
    pub domain: PragmaDomain,
    pub action: InternedStr,
    pub args: SmallVec<[PragmaArg; 2]>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PragmaDomain {
    Loop,
    Condition,
    Function,
}

impl PragmaDomain {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "loop" => Some(Self::Loop),
            "condition" => Some(Self::Condition),
            "function" => Some(Self::Function),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Loop => "loop",
            Self::Condition => "condition",
            Self::Function => "function",
        }
    }
}

#[derive(Clone)]
pub struct PragmaArg {
    pub name: InternedStr,

    /// Empty both for `name` and `name()`, only the former is ever printed.
    pub exprs: SmallVec<[Expr; 2]>,
}

impl Pragma {
    pub fn is(&self, cx: &Context, domain: PragmaDomain, action: &str) -> bool {
        self.domain == domain && &cx[self.action] == action
    }

    pub fn argument(&self, cx: &Context, name: &str) -> Option<&PragmaArg> {
        self.args.iter().find(|arg| &cx[arg.name] == name)
    }

    pub fn has_argument(&self, cx: &Context, name: &str) -> bool {
        self.argument(cx, name).is_some()
    }

    /// Evaluate the first expression of argument `name` as an integer constant
    /// (e.g. the `16` in `loop block size(16)`).
    pub fn value_for_argument(
        &self,
        cx: &Context,
        func_def_body: &FuncDefBody,
        name: &str,
    ) -> Option<i64> {
        let &expr = self.argument(cx, name)?.exprs.first()?;
        fold::eval_int(cx, func_def_body, expr)
    }

    /// Storage named by argument `name`'s expressions (e.g. `aligned(a, b)`),
    /// for matching against the root variable of memory accesses.
    pub fn named_storage(
        &self,
        cx: &Context,
        func_def_body: &FuncDefBody,
        name: &str,
    ) -> SmallVec<[StorageRoot; 2]> {
        let Some(arg) = self.argument(cx, name) else {
            return SmallVec::new();
        };
        arg.exprs
            .iter()
            .filter_map(|&expr| match func_def_body.exprs[expr].kind {
                ExprKind::Var(var) => Some(StorageRoot::Var(var)),
                ExprKind::GlobalVar(gv) => Some(StorageRoot::GlobalVar(gv)),
                _ => None,
            })
            .collect()
    }
}

/// The variable at the root of an lvalue, e.g. `a` in `a[i].x` or `*(a + 1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StorageRoot {
    Var(Var),
    GlobalVar(GlobalVar),
}

/// Find the first pragma matching `domain` and `action`, among `pragmas`.
pub fn find<'a>(
    cx: &Context,
    pragmas: &'a [Pragma],
    domain: PragmaDomain,
    action: &str,
) -> Option<&'a Pragma> {
    pragmas.iter().find(|pragma| pragma.is(cx, domain, action))
}
