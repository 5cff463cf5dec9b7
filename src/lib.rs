//! Source-to-source loop auto-vectorization, over the AST of a small C-like language.
//!
//! Loops annotated with `#pragma scout loop vectorize` are analyzed (per-expression
//! stride classification, live memory region tracking, conditional handling) and,
//! when that analysis succeeds, rewritten into calls to SIMD intrinsics, which are
//! described entirely by a target configuration (see [`intrinsics`]), instead of
//! being hard-coded for any specific instruction set.
//!
//! #### Notable types/modules
//!
//! ##### AST data types
// HACK using `(struct.Context.html)` to link `Context`, not `context::Context`.
//! * [`Context`](struct.Context.html): handles interning ([`Type`]s, [`InternedStr`]s)
//! * [`Module`]: owns [`Var`]s and [`Func`]s (in source order, through [`items`](Module::items))
//! * [`FuncDefBody`]: owns [`Stmt`]s and [`Expr`]s (rooted by [`body`](FuncDefBody::body))
//!
//! ##### Utilities and passes
//! * [`frontend`]: parser for the C subset the passes operate on
//! * [`print`](mod@print): C source printer (also used for diagnostics)
//! * [`cf`]: loop restructuring (invariant `if` splitting, unrolling, splitting, blocking)
//! * [`vectorize`]: the vectorizer proper
//! * [`passes::run`]: whole-[`Module`] driver, combining all of the above
//!

// BEGIN - Embark standard lints v6 for Rust 1.55+
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::flat_map_option,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::from_iter_instead_of_collect,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_digit_groups,
    clippy::large_stack_arrays,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_same_arms,
    clippy::match_wild_err_arm,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::missing_enforced_import_renames,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::needless_for_each,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::rc_mutex,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::single_match_else,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v6 for Rust 1.55+
// crate-specific exceptions:
#![allow(
    // NOTE ignored for readability (`match` used when `if let` is too long).
    clippy::single_match_else,

    // NOTE ignored because it's misguided to suggest `let mut s = ...;`
    // and `s.push_str(...);` when `+` is equivalent and does not require `let`.
    clippy::string_add,

    // NOTE the analyses are naturally expressed as large `match`es, and
    // splitting them up only to appease this lint hurts readability.
    clippy::too_many_lines,
)]
// NOTE this is stronger than the "Embark standard lints" above, because
// we never need `unsafe` code and this is a further "speed bump" to it.
#![forbid(unsafe_code)]

// NOTE all the modules are declared here, but they're documented "inside"
// (i.e. using inner doc comments).
pub mod cf;
mod context;
pub mod fold;
pub mod frontend;
pub mod func_at;
pub mod intrinsics;
pub mod pragma;
pub mod print;
pub mod transform;
pub mod vectorize;
pub mod visit;
pub mod passes {
    //! Whole-[`Module`](crate::Module) transformations, and their driver.
    //
    // NOTE inline `mod` to avoid adding APIs here, it's just namespacing.

    pub mod inline;
    mod run;

    pub use run::{PassError, PassOptions, PassReport, run};
}

use smallvec::SmallVec;
use std::borrow::Cow;

// HACK work around the lack of `FxIndex{Map,Set}` type aliases elsewhere.
#[doc(hidden)]
type FxIndexMap<K, V> =
    indexmap::IndexMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;
#[doc(hidden)]
type FxIndexSet<V> = indexmap::IndexSet<V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

// NOTE these reexports are all documented inside `context`.
pub use context::{Context, Entity, EntityDefs, InternInCx};

/// Interned handle for a [`str`].
pub use context::InternedStr;

/// Interned handle for a [`TypeDef`](crate::TypeDef).
pub use context::Type;

// HACK this only serves to disallow modifying the `cx` field of `Module`.
#[doc(hidden)]
mod sealed {
    use super::*;
    use std::rc::Rc;

    #[derive(Clone)]
    pub struct Module {
        /// Context used for everything interned, in this module.
        ///
        /// Notable choices made for this field:
        /// * private to disallow switching the context of a module
        /// * [`Rc`] sharing to allow multiple modules to use the same context
        ///   (`Context: !Sync` because of the interners so it can't be `Arc`)
        cx: Rc<Context>,

        pub global_vars: EntityDefs<GlobalVar>,
        pub funcs: EntityDefs<Func>,

        /// Top-level declarations, in source order.
        pub items: Vec<Item>,
    }

    impl Module {
        pub fn new(cx: Rc<Context>) -> Self {
            Self {
                cx,

                global_vars: Default::default(),
                funcs: Default::default(),

                items: vec![],
            }
        }

        pub fn cx(&self) -> Rc<Context> {
            self.cx.clone()
        }

        /// Split borrow: the read-only declarations of the module, next to
        /// mutable access to one function definition (taken out of `funcs`
        /// for the duration of `f`, so that `funcs` itself stays readable).
        pub fn with_func_def_body_mut<R>(
            &mut self,
            func: Func,
            f: impl FnOnce(ModuleCx<'_>, &mut FuncDefBody) -> R,
        ) -> Option<R> {
            let mut func_def_body = self.funcs[func].def.take()?;
            let mcx = ModuleCx { cx: &self.cx, global_vars: &self.global_vars, funcs: &self.funcs };
            let r = f(mcx, &mut func_def_body);
            self.funcs[func].def = Some(func_def_body);
            Some(r)
        }

        pub fn module_cx(&self) -> ModuleCx<'_> {
            ModuleCx { cx: &self.cx, global_vars: &self.global_vars, funcs: &self.funcs }
        }
    }
}
pub use sealed::Module;

/// Read-only view of the module-level declarations, needed by anything that
/// has to resolve names/types outside of a single function body.
///
/// While a function is being transformed (see [`Module::with_func_def_body_mut`]),
/// its own [`FuncDecl::def`] is `None`.
#[derive(Copy, Clone)]
pub struct ModuleCx<'a> {
    pub cx: &'a Context,
    pub global_vars: &'a EntityDefs<GlobalVar>,
    pub funcs: &'a EntityDefs<Func>,
}

/// Top-level declaration in a [`Module`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// `struct` definition, always of a [`TypeKind::Struct`] type.
    Struct(Type),

    /// `enum` definition (its uses, i.e. [`ExprKind::EnumConst`], carry their
    /// own values, this is only kept for printing).
    Enum { name: Option<InternedStr>, constants: Vec<(InternedStr, i64)> },

    GlobalVar(GlobalVar),
    Func(Func),
}

/// Definition for a [`Type`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TypeDef {
    pub kind: TypeKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    Scalar(ScalarType),
    Ptr(Type),
    Array { elem: Type, len: u32 },
    Struct { name: InternedStr, fields: SmallVec<[(InternedStr, Type); 4]> },

    /// Opaque SIMD register type, only ever created from a target configuration
    /// (see [`intrinsics::IntrinsicOracle::element_storage_type`]).
    Simd { name: InternedStr, elem: ScalarType, width: u32 },
}

/// Arithmetic types, in increasing conversion rank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl ScalarType {
    pub fn c_name(self) -> &'static str {
        match self {
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    /// The type both operands of an arithmetic operator are converted to
    /// (the usual arithmetic conversions, with `char`/`short` promoted).
    pub fn common(self, other: Self) -> Self {
        self.max(other).max(Self::Int)
    }

    pub fn byte_size(self) -> u32 {
        match self {
            Self::Char => 1,
            Self::Short => 2,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
        }
    }
}

impl TypeKind {
    pub fn scalar(&self) -> Option<ScalarType> {
        match *self {
            Self::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }
}

/// Entity handle for a [`GlobalVarDecl`](crate::GlobalVarDecl) (a global variable).
pub use context::GlobalVar;

/// Declaration for a [`GlobalVar`]: a global variable.
///
/// Initializers are not supported (only `enum` constants can be used as
/// compile-time constants outside of functions).
#[derive(Clone)]
pub struct GlobalVarDecl {
    pub name: InternedStr,
    pub ty: Type,
    pub is_volatile: bool,
}

/// Entity handle for a [`VarDecl`](crate::VarDecl) (a function-local variable).
pub use context::Var;

/// Definition for a [`Var`]: a function parameter or local variable.
#[derive(Clone)]
pub struct VarDecl {
    pub name: InternedStr,
    pub ty: Type,
    pub kind: VarKind,
    pub is_volatile: bool,

    /// Set for variables introduced by transformations (vector temporaries,
    /// hoisted loop invariants, etc.), which never alias user storage.
    pub is_artificial: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VarKind {
    Param,
    Local,
}

/// Entity handle for a [`FuncDecl`](crate::FuncDecl) (a function).
pub use context::Func;

/// Declaration/definition for a [`Func`]: a function.
#[derive(Clone)]
pub struct FuncDecl {
    pub name: InternedStr,
    pub ret_type: Type,
    pub param_types: SmallVec<[Type; 4]>,

    /// `#pragma scout function ...` annotations preceding the function.
    pub pragmas: SmallVec<[pragma::Pragma; 1]>,

    /// `None` for prototypes (i.e. functions defined elsewhere).
    pub def: Option<FuncDefBody>,
}

/// The body of a [`Func`] definition.
#[derive(Clone)]
pub struct FuncDefBody {
    pub vars: EntityDefs<Var>,
    pub exprs: EntityDefs<Expr>,
    pub stmts: EntityDefs<Stmt>,

    pub params: SmallVec<[Var; 4]>,

    /// The [`Stmt`] (always a [`StmtKind::Compound`]) for the whole function body.
    pub body: Stmt,

    /// Diagnostics produced by passes, attached to the node they concern.
    pub diags: Vec<(Node, Diag)>,

    /// Counter used to generate unique names for artificial variables.
    pub next_artificial_idx: u32,
}

/// Entity handle for a [`StmtDef`](crate::StmtDef) (a statement).
pub use context::Stmt;

/// Definition for a [`Stmt`]: a statement.
#[derive(Clone)]
pub struct StmtDef {
    pub kind: StmtKind,

    /// `#pragma scout ...` annotations attached to this statement.
    pub pragmas: SmallVec<[pragma::Pragma; 1]>,

    /// Comments emitted (as `// ...` lines) before the statement when printing.
    pub comments: SmallVec<[Cow<'static, str>; 1]>,
}

impl From<StmtKind> for StmtDef {
    fn from(kind: StmtKind) -> Self {
        Self { kind, pragmas: SmallVec::new(), comments: SmallVec::new() }
    }
}

#[derive(Clone)]
pub enum StmtKind {
    Null,
    Expr(Expr),
    Decl(SmallVec<[LocalDecl; 2]>),
    Compound(Vec<Stmt>),
    If { cond: Expr, then_stmt: Stmt, else_stmt: Option<Stmt> },

    /// `for (init; cond; step) body`, where `init` is either a
    /// [`StmtKind::Expr`] or a [`StmtKind::Decl`].
    For { init: Option<Stmt>, cond: Option<Expr>, step: Option<Expr>, body: Stmt },

    While { cond: Expr, body: Stmt },
    DoWhile { body: Stmt, cond: Expr },
    Switch { cond: Expr, body: Stmt },
    Case { value: Expr, stmt: Stmt },
    Default(Stmt),
    Break,
    Continue,
    Return(Option<Expr>),
    Goto(InternedStr),
    Label { name: InternedStr, stmt: Stmt },
}

#[derive(Copy, Clone)]
pub struct LocalDecl {
    pub var: Var,
    pub init: Option<Expr>,
}

/// Entity handle for a [`ExprDef`](crate::ExprDef) (an expression).
pub use context::Expr;

/// Definition for an [`Expr`]: an expression, and its (already checked) type.
#[derive(Clone)]
pub struct ExprDef {
    pub ty: Type,
    pub kind: ExprKind,
}

#[derive(Clone)]
pub enum ExprKind {
    IntLit(i64),

    /// Floating-point literal, printed with an `f` suffix when `ty` is `float`.
    FloatLit(f64),

    EnumConst { name: InternedStr, value: i64 },
    Var(Var),
    GlobalVar(GlobalVar),
    Func(Func),

    /// `sizeof(T)`, with `T` being the operand type (the expression's own type
    /// is always `long`).
    SizeOf(Type),

    Unary(UnOp, Expr),
    Binary(BinOp, Expr, Expr),

    /// `lhs = rhs` (when `op` is `None`) or `lhs op= rhs`.
    Assign { op: Option<BinOp>, lhs: Expr, rhs: Expr },

    Cond { cond: Expr, then_expr: Expr, else_expr: Expr },
    Call { callee: Expr, args: SmallVec<[Expr; 4]> },
    Index { base: Expr, index: Expr },
    Member { base: Expr, field: InternedStr, arrow: bool },

    /// Conversion to the expression's own type, either written in the source
    /// (`implicit: false`), or inserted by the usual arithmetic conversions.
    Cast { operand: Expr, implicit: bool },

    Paren(Expr),
    Comma(Expr, Expr),

    /// Call to a target intrinsic, printed by expanding `template` (with its
    /// `%1%`, `%2%`, etc. placeholders replaced by the printed `args`).
    Intrinsic { template: InternedStr, args: SmallVec<[Expr; 4]> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Plus,
    Neg,
    Not,
    BitNot,
    Deref,
    AddrOf,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnOp {
    pub fn is_inc_dec(self) -> bool {
        matches!(self, Self::PreInc | Self::PreDec | Self::PostInc | Self::PostDec)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    LogAnd,
    LogOr,
}

impl BinOp {
    pub fn c_symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::BitAnd => "&",
            Self::BitXor => "^",
            Self::BitOr => "|",
            Self::LogAnd => "&&",
            Self::LogOr => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Gt | Self::Le | Self::Ge | Self::Eq | Self::Ne)
    }
}

/// Any AST node with an identity, that diagnostics can be attached to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::From)]
pub enum Node {
    Stmt(Stmt),
    Expr(Expr),
}

/// Diagnostics produced by passes (e.g. why a loop was not vectorized).
#[derive(Clone, Debug)]
pub struct Diag {
    pub level: DiagLevel,
    // FIXME this may want to be `SmallVec` and/or `Rc`?
    pub message: Vec<DiagMsgPart>,
}

impl Diag {
    pub fn new(level: DiagLevel, message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self { level, message: message.into_iter().collect() }
    }

    #[track_caller]
    pub fn bug(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Bug(std::panic::Location::caller()), message)
    }

    pub fn err(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warn(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    pub fn note(message: impl IntoIterator<Item = DiagMsgPart>) -> Self {
        Self::new(DiagLevel::Note, message)
    }
}

/// The "severity" level of a [`Diag`]nostic.
///
/// Note: `Bug` diagnostics track their emission point for easier identification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagLevel {
    /// Internal inconsistency (an analysis expectation was violated), never
    /// caused by the input itself.
    Bug(&'static std::panic::Location<'static>),

    Error,
    Warning,

    /// Informational, e.g. the reason a loop was left as it was.
    Note,
}

/// One part of a [`Diag`]nostic message, allowing rich interpolation.
#[derive(Clone, Debug, derive_more::From)]
// HACK this sets the default as "opt-out", to avoid `#[from(forward)]`
// on the `Plain` variant from making it "opt-in" for all variants.
#[from]
pub enum DiagMsgPart {
    #[from(forward)]
    Plain(Cow<'static, str>),

    // FIXME this should be removed once `StmtDef`s can carry source locations.
    Expr(Expr),
    Type(Type),
}
