//! [`Context`](struct.Context.html) and related types/traits.

use crate::{TypeDef, TypeKind};
use elsa::FrozenIndexSet;
use rustc_hash::FxHasher;
use std::hash::{BuildHasherDefault, Hash};
use std::ops::{Index, IndexMut};

/// Context object with global resources for the AST.
///
/// Those resources currently are:
/// * interners, for anything without an identity, and which can be deduplicated
///   (i.e. [`InternedStr`]s and [`Type`]s)
// FIXME consider a more "global" entity allocator, so that handles from
// different functions can't be confused with each other.
#[derive(Default)]
pub struct Context {
    interners: Interners,
}

/// Dispatch helper, to allow implementing interning logic on
/// the type passed to `cx.intern(...)`.
pub trait InternInCx<I> {
    #[track_caller]
    fn intern_in_cx(self, cx: &Context) -> I;
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    #[track_caller]
    pub fn intern<T: InternInCx<I>, I>(&self, x: T) -> I {
        x.intern_in_cx(self)
    }
}

type FxFrozenIndexSet<T> = FrozenIndexSet<T, BuildHasherDefault<FxHasher>>;

#[derive(Default)]
struct Interners {
    strs: FxFrozenIndexSet<Box<str>>,
    types: FxFrozenIndexSet<Box<TypeDef>>,
}

/// Interned handle for a [`str`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternedStr(u32);

/// Interned handle for a [`TypeDef`](crate::TypeDef).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(u32);

impl InternInCx<InternedStr> for &'_ str {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interners.strs.insert_full(self.into());
        InternedStr(idx as u32)
    }
}

impl InternInCx<InternedStr> for String {
    fn intern_in_cx(self, cx: &Context) -> InternedStr {
        let (idx, _) = cx.interners.strs.insert_full(self.into_boxed_str());
        InternedStr(idx as u32)
    }
}

impl InternInCx<Type> for TypeDef {
    fn intern_in_cx(self, cx: &Context) -> Type {
        let (idx, _) = cx.interners.types.insert_full(Box::new(self));
        Type(idx as u32)
    }
}

impl InternInCx<Type> for TypeKind {
    fn intern_in_cx(self, cx: &Context) -> Type {
        cx.intern(TypeDef { kind: self })
    }
}

impl Index<InternedStr> for Context {
    type Output = str;

    fn index(&self, interned: InternedStr) -> &str {
        // NOTE interned handles are only ever created by this `Context`.
        &self.interners.strs[interned.0 as usize]
    }
}

impl Index<Type> for Context {
    type Output = TypeDef;

    fn index(&self, ty: Type) -> &TypeDef {
        &self.interners.types[ty.0 as usize]
    }
}

/// Handle for an entity, i.e. an AST node with an identity, defined by (and
/// only reachable through) an [`EntityDefs`] arena.
pub trait Entity: Copy + Eq + Hash + std::fmt::Debug {
    type Def;

    #[doc(hidden)]
    fn from_idx(idx: usize) -> Self;
    #[doc(hidden)]
    fn idx(self) -> usize;
}

/// Definitions for all entities of type `E`, owned by e.g. a function body.
pub struct EntityDefs<E: Entity> {
    defs: Vec<E::Def>,
}

impl<E: Entity> Clone for EntityDefs<E>
where
    E::Def: Clone,
{
    fn clone(&self) -> Self {
        Self { defs: self.defs.clone() }
    }
}

impl<E: Entity> Default for EntityDefs<E> {
    fn default() -> Self {
        Self { defs: vec![] }
    }
}

impl<E: Entity> EntityDefs<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: E::Def) -> E {
        let entity = E::from_idx(self.defs.len());
        self.defs.push(def);
        entity
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (E, &E::Def)> + '_ {
        self.defs.iter().enumerate().map(|(i, def)| (E::from_idx(i), def))
    }
}

impl<E: Entity> Index<E> for EntityDefs<E> {
    type Output = E::Def;

    fn index(&self, entity: E) -> &E::Def {
        &self.defs[entity.idx()]
    }
}

impl<E: Entity> IndexMut<E> for EntityDefs<E> {
    fn index_mut(&mut self, entity: E) -> &mut E::Def {
        &mut self.defs[entity.idx()]
    }
}

macro_rules! entities {
    ($($name:ident => $def:ident),+ $(,)?) => {
        $(
            #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(u32);

            impl Entity for $name {
                type Def = crate::$def;

                fn from_idx(idx: usize) -> Self {
                    Self(u32::try_from(idx).unwrap_or_else(|_| {
                        panic!(concat!("too many `", stringify!($name), "` entities"))
                    }))
                }

                fn idx(self) -> usize {
                    self.0 as usize
                }
            }
        )+
    };
}

entities! {
    GlobalVar => GlobalVarDecl,
    Var => VarDecl,
    Func => FuncDecl,
    Expr => ExprDef,
    Stmt => StmtDef,
}
