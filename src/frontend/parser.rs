use super::{Lexer, ParseError, Span, Token, TokenKind};
use crate::fold;
use crate::pragma::{Pragma, PragmaArg, PragmaDomain};
use crate::{
    BinOp, Context, Expr, ExprKind, Func, FuncDecl, FuncDefBody, GlobalVar, GlobalVarDecl,
    InternedStr, Item, LocalDecl, Module, ScalarType, Stmt, StmtKind, Type, TypeKind, UnOp, Var,
    VarDecl, VarKind,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::rc::Rc;

/// What an identifier refers to.
#[derive(Copy, Clone)]
enum Symbol {
    Var(Var),
    GlobalVar(GlobalVar),
    Func(Func),
    EnumConst(i64),
}

struct Declarator {
    name: Option<(InternedStr, Span)>,
    ty: Type,

    /// Present for function declarators, i.e. `name(params)`.
    params: Option<Vec<Param>>,
}

struct Param {
    name: Option<(InternedStr, Span)>,
    ty: Type,
    is_volatile: bool,
}

pub(super) struct Parser<'src> {
    cx: Rc<Context>,
    lexer: Lexer<'src>,
    current: Token,
    previous: Token,

    /// Tokens to hand out before lexing any more (lookahead, and pragma replay).
    buffered: VecDeque<Token>,

    module: Module,
    globals: FxHashMap<InternedStr, Symbol>,
    struct_types: FxHashMap<InternedStr, Type>,

    /// Body of the function being parsed (outside of function definitions,
    /// this is a scratch body, e.g. for the expressions of array lengths).
    func: FuncDefBody,
    ret_type: Type,
    scopes: Vec<FxHashMap<InternedStr, Symbol>>,

    /// `#pragma scout` lines (as tokens, without `PragmaStart`) waiting to be
    /// attached to the next statement or function.
    pending_pragmas: Vec<Vec<Token>>,
}

impl<'src> Parser<'src> {
    pub(super) fn new(cx: Rc<Context>, source: &'src str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token()?;
        let void = cx.intern(TypeKind::Void);
        Ok(Self {
            module: Module::new(cx.clone()),
            cx,
            lexer,
            current,
            previous: current,
            buffered: VecDeque::new(),
            globals: FxHashMap::default(),
            struct_types: FxHashMap::default(),
            func: FuncDefBody::new(),
            ret_type: void,
            scopes: vec![],
            pending_pragmas: vec![],
        })
    }

    pub(super) fn parse_module(mut self) -> Result<Module, ParseError> {
        loop {
            self.collect_pragmas()?;
            if self.check(TokenKind::Eof) {
                if !self.pending_pragmas.is_empty() {
                    return Err(self.error_at(self.current.span, "pragma not followed by anything"));
                }
                return Ok(self.module);
            }
            self.external_declaration()?;
        }
    }

    // Token helpers.

    fn next_raw(&mut self) -> Result<Token, ParseError> {
        match self.buffered.pop_front() {
            Some(token) => Ok(token),
            None => self.lexer.next_token(),
        }
    }

    /// Advance to the next token.
    fn advance(&mut self) -> Result<(), ParseError> {
        let next = self.next_raw()?;
        self.previous = std::mem::replace(&mut self.current, next);
        Ok(())
    }

    /// The token after the current one.
    fn peek(&mut self) -> Result<Token, ParseError> {
        if self.buffered.is_empty() {
            let token = self.lexer.next_token()?;
            self.buffered.push_back(token);
        }
        Ok(self.buffered[0])
    }

    /// Check if the current token is of the given kind.
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Consume the current token if it matches, otherwise return false.
    fn match_token(&mut self, kind: TokenKind) -> Result<bool, ParseError> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Require a token of the given kind, or return an error.
    fn consume(&mut self, kind: TokenKind, msg: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            self.advance()?;
            Ok(self.previous)
        } else {
            Err(self.error_at(
                self.current.span,
                format!("{msg}, found `{}`", self.current.kind.as_str()),
            ))
        }
    }

    fn text(&self, token: Token) -> &'src str {
        &self.lexer.source()[token.span.start..token.span.end]
    }

    fn ident(&mut self, msg: &str) -> Result<(InternedStr, Span), ParseError> {
        let token = self.consume(TokenKind::Ident, msg)?;
        Ok((self.cx.intern(self.text(token)), token.span))
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> ParseError {
        ParseError { message: message.into(), span }
    }

    // Types.

    fn scalar_ty(&self, scalar: ScalarType) -> Type {
        self.cx.intern(TypeKind::Scalar(scalar))
    }

    fn ptr_ty(&self, pointee: Type) -> Type {
        self.cx.intern(TypeKind::Ptr(pointee))
    }

    fn scalar_of(&self, ty: Type) -> Option<ScalarType> {
        self.cx[ty].kind.scalar()
    }

    fn is_integer(&self, ty: Type) -> bool {
        self.scalar_of(ty).is_some_and(|s| !s.is_float())
    }

    /// The element type, for pointers and arrays (i.e. what `[]` and `*` give).
    fn pointee_of(&self, ty: Type) -> Option<Type> {
        match self.cx[ty].kind {
            TypeKind::Ptr(pointee) | TypeKind::Array { elem: pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    fn is_type_start(kind: TokenKind) -> bool {
        use TokenKind as T;
        matches!(
            kind,
            T::KwVoid
                | T::KwChar
                | T::KwShort
                | T::KwInt
                | T::KwLong
                | T::KwFloat
                | T::KwDouble
                | T::KwSigned
                | T::KwUnsigned
                | T::KwConst
                | T::KwVolatile
                | T::KwStatic
                | T::KwExtern
                | T::KwInline
                | T::KwRestrict
                | T::KwStruct
                | T::KwEnum
                | T::KwTypedef
        )
    }

    /// Parse declaration specifiers (qualifiers and base type), returning the
    /// base type and whether `volatile` was present.
    fn decl_spec(&mut self) -> Result<(Type, bool), ParseError> {
        use TokenKind as T;

        let start = self.current.span;
        let mut is_volatile = false;
        let (mut void, mut char, mut short, mut int, mut float, mut double) =
            (false, false, false, false, false, false);
        let mut longs = 0;
        let mut signed = false;
        let mut tagged = None;
        loop {
            match self.current.kind {
                T::KwConst | T::KwStatic | T::KwExtern | T::KwInline | T::KwRestrict => {}
                T::KwVolatile => is_volatile = true,
                T::KwVoid => void = true,
                T::KwChar => char = true,
                T::KwShort => short = true,
                T::KwInt => int = true,
                T::KwLong => longs += 1,
                T::KwFloat => float = true,
                T::KwDouble => double = true,
                T::KwSigned => signed = true,
                T::KwUnsigned => {
                    return Err(self.error_at(
                        self.current.span,
                        "unsigned types are not supported",
                    ));
                }
                T::KwTypedef => {
                    return Err(self.error_at(self.current.span, "typedef is not supported"));
                }
                T::KwStruct => {
                    tagged = Some(self.struct_spec()?);
                    continue;
                }
                T::KwEnum => {
                    self.enum_spec()?;
                    tagged = Some(self.scalar_ty(ScalarType::Int));
                    continue;
                }
                _ => break,
            }
            self.advance()?;
        }

        let scalar = if double {
            Some(ScalarType::Double)
        } else if float {
            Some(ScalarType::Float)
        } else if char {
            Some(ScalarType::Char)
        } else if short {
            Some(ScalarType::Short)
        } else if longs > 0 {
            Some(ScalarType::Long)
        } else if int || signed {
            Some(ScalarType::Int)
        } else {
            None
        };
        let ty = match (tagged, scalar, void) {
            (Some(ty), None, false) => ty,
            (None, Some(scalar), false) => self.scalar_ty(scalar),
            (None, None, true) => self.cx.intern(TypeKind::Void),
            (None, None, false) => return Err(self.error_at(start, "expected type")),
            _ => return Err(self.error_at(start, "invalid combination of type specifiers")),
        };
        Ok((ty, is_volatile))
    }

    fn struct_spec(&mut self) -> Result<Type, ParseError> {
        self.consume(TokenKind::KwStruct, "expected `struct`")?;
        let (name, name_span) = self.ident("expected struct name")?;
        if !self.match_token(TokenKind::LBrace)? {
            return self.struct_types.get(&name).copied().ok_or_else(|| {
                self.error_at(name_span, format!("incomplete struct type `{}`", &self.cx[name]))
            });
        }
        if self.struct_types.contains_key(&name) {
            return Err(self.error_at(
                name_span,
                format!("redefinition of `struct {}`", &self.cx[name]),
            ));
        }
        let mut fields = SmallVec::new();
        while !self.match_token(TokenKind::RBrace)? {
            let (base, _) = self.decl_spec()?;
            loop {
                let decl = self.declarator(base)?;
                let Some((field_name, _)) = decl.name else {
                    return Err(self.error_at(self.current.span, "expected field name"));
                };
                fields.push((field_name, decl.ty));
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
            self.consume(TokenKind::Semi, "expected `;` after struct field")?;
        }
        let ty = self.cx.intern(TypeKind::Struct { name, fields });
        self.struct_types.insert(name, ty);
        self.module.items.push(Item::Struct(ty));
        Ok(ty)
    }

    fn enum_spec(&mut self) -> Result<(), ParseError> {
        self.consume(TokenKind::KwEnum, "expected `enum`")?;
        let name = if self.check(TokenKind::Ident) { Some(self.ident("")?.0) } else { None };
        if !self.match_token(TokenKind::LBrace)? {
            return Ok(());
        }
        let mut constants = vec![];
        let mut next_value = 0;
        while !self.match_token(TokenKind::RBrace)? {
            let (const_name, _) = self.ident("expected enumerator name")?;
            if self.match_token(TokenKind::Eq)? {
                next_value = self.const_int()?;
            }
            constants.push((const_name, next_value));
            self.define(const_name, Symbol::EnumConst(next_value));
            next_value += 1;
            if !self.match_token(TokenKind::Comma)? {
                self.consume(TokenKind::RBrace, "expected `}` after enumerators")?;
                break;
            }
        }
        self.module.items.push(Item::Enum { name, constants });
        Ok(())
    }

    /// Parse an integer constant expression (e.g. an array length).
    fn const_int(&mut self) -> Result<i64, ParseError> {
        let start = self.current.span;
        let expr = self.conditional_expr()?;
        fold::eval_int(&self.cx, &self.func, expr)
            .ok_or_else(|| self.error_at(start, "expected integer constant expression"))
    }

    fn declarator(&mut self, base: Type) -> Result<Declarator, ParseError> {
        let mut ty = base;
        while self.match_token(TokenKind::Star)? {
            ty = self.ptr_ty(ty);
            while matches!(
                self.current.kind,
                TokenKind::KwConst | TokenKind::KwVolatile | TokenKind::KwRestrict
            ) {
                self.advance()?;
            }
        }

        // Pointers to arrays, i.e. `(*name)[N]`.
        if self.check(TokenKind::LParen) && self.peek()?.kind == TokenKind::Star {
            self.advance()?;
            let mut inner_ptrs = 0;
            while self.match_token(TokenKind::Star)? {
                inner_ptrs += 1;
            }
            let name =
                if self.check(TokenKind::Ident) { Some(self.ident("")?) } else { None };
            self.consume(TokenKind::RParen, "expected `)` in declarator")?;
            let mut ty = self.array_suffixes(ty)?;
            for _ in 0..inner_ptrs {
                ty = self.ptr_ty(ty);
            }
            return Ok(Declarator { name, ty, params: None });
        }

        let name = if self.check(TokenKind::Ident) { Some(self.ident("")?) } else { None };
        if name.is_some() && self.match_token(TokenKind::LParen)? {
            let params = self.params()?;
            return Ok(Declarator { name, ty, params: Some(params) });
        }
        let ty = self.array_suffixes(ty)?;
        Ok(Declarator { name, ty, params: None })
    }

    /// Parse any `[N]` suffixes, with `[]` (only valid for parameters) as
    /// an array of length `0`.
    fn array_suffixes(&mut self, elem: Type) -> Result<Type, ParseError> {
        let mut lens = SmallVec::<[u32; 2]>::new();
        while self.match_token(TokenKind::LBracket)? {
            if self.match_token(TokenKind::RBracket)? {
                lens.push(0);
                continue;
            }
            let start = self.current.span;
            let len = self.const_int()?;
            let len = u32::try_from(len)
                .ok()
                .filter(|&len| len > 0)
                .ok_or_else(|| self.error_at(start, "array length must be positive"))?;
            lens.push(len);
            self.consume(TokenKind::RBracket, "expected `]`")?;
        }
        Ok(lens
            .into_iter()
            .rev()
            .fold(elem, |elem, len| self.cx.intern(TypeKind::Array { elem, len })))
    }

    fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = vec![];
        if self.match_token(TokenKind::RParen)? {
            return Ok(params);
        }
        if self.check(TokenKind::KwVoid) && self.peek()?.kind == TokenKind::RParen {
            self.advance()?;
            self.advance()?;
            return Ok(params);
        }
        loop {
            let (base, is_volatile) = self.decl_spec()?;
            let decl = self.declarator(base)?;
            // Array parameters are really pointers.
            let ty = match self.cx[decl.ty].kind {
                TypeKind::Array { elem, .. } => self.ptr_ty(elem),
                _ => decl.ty,
            };
            params.push(Param { name: decl.name, ty, is_volatile });
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
        }
        self.consume(TokenKind::RParen, "expected `)` after parameters")?;
        Ok(params)
    }

    /// Parse a type name, e.g. in casts and `sizeof`.
    fn type_name(&mut self) -> Result<Type, ParseError> {
        let start = self.current.span;
        let (base, _) = self.decl_spec()?;
        let decl = self.declarator(base)?;
        if decl.name.is_some() || decl.params.is_some() {
            return Err(self.error_at(start, "expected type name"));
        }
        Ok(decl.ty)
    }

    // Scopes.

    fn define(&mut self, name: InternedStr, symbol: Symbol) {
        match self.scopes.last_mut() {
            Some(scope) => scope.insert(name, symbol),
            None => self.globals.insert(name, symbol),
        };
    }

    fn lookup(&self, name: InternedStr) -> Option<Symbol> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(&name))
            .or_else(|| self.globals.get(&name))
            .copied()
    }

    // Pragmas.

    /// Stash the tokens of any `#pragma scout` lines at the current position.
    fn collect_pragmas(&mut self) -> Result<(), ParseError> {
        while self.match_token(TokenKind::PragmaStart)? {
            let mut tokens = vec![];
            loop {
                tokens.push(self.current);
                match self.current.kind {
                    TokenKind::PragmaEnd => break,
                    TokenKind::Eof => {
                        return Err(self.error_at(self.current.span, "unterminated pragma"));
                    }
                    _ => self.advance()?,
                }
            }
            self.advance()?;
            self.pending_pragmas.push(tokens);
        }
        Ok(())
    }

    /// Parse all pending pragmas (in the current scope and function body).
    fn take_pragmas(&mut self) -> Result<SmallVec<[Pragma; 1]>, ParseError> {
        let mut pragmas = SmallVec::new();
        for tokens in std::mem::take(&mut self.pending_pragmas) {
            let mut tokens = tokens.into_iter();
            let Some(first) = tokens.next() else {
                continue;
            };
            // Replay the pragma tokens, then resume where we left off.
            let resume = std::mem::replace(&mut self.current, first);
            let mut replay: VecDeque<Token> = tokens.collect();
            replay.push_back(resume);
            replay.extend(self.buffered.drain(..));
            self.buffered = replay;
            pragmas.push(self.pragma()?);
        }
        Ok(pragmas)
    }

    fn pragma(&mut self) -> Result<Pragma, ParseError> {
        let (domain_name, domain_span) = self.ident("expected pragma domain")?;
        let domain = PragmaDomain::from_name(&self.cx[domain_name]).ok_or_else(|| {
            self.error_at(domain_span, format!("unknown pragma domain `{}`", &self.cx[domain_name]))
        })?;
        let (action, _) = self.ident("expected pragma action")?;
        let mut args = SmallVec::new();
        while !self.check(TokenKind::PragmaEnd) {
            let (name, _) = self.ident("expected pragma argument")?;
            let mut exprs = SmallVec::new();
            if self.match_token(TokenKind::LParen)? {
                if !self.check(TokenKind::RParen) {
                    loop {
                        exprs.push(self.assignment_expr()?);
                        if !self.match_token(TokenKind::Comma)? {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RParen, "expected `)` after pragma argument list")?;
            }
            args.push(PragmaArg { name, exprs });
        }
        self.consume(TokenKind::PragmaEnd, "expected end of pragma")?;
        Ok(Pragma { domain, action, args })
    }

    // Top-level declarations.

    fn external_declaration(&mut self) -> Result<(), ParseError> {
        let (base, is_volatile) = self.decl_spec()?;
        if self.match_token(TokenKind::Semi)? {
            // Only `struct`/`enum` definitions.
            self.pending_pragmas.clear();
            return Ok(());
        }
        let mut decl = self.declarator(base)?;
        if let Some(params) = decl.params.take() {
            let Some(name) = decl.name else {
                return Err(self.error_at(self.current.span, "expected function name"));
            };
            return self.function(name, decl.ty, params);
        }

        self.pending_pragmas.clear();
        loop {
            let Some((name, name_span)) = decl.name else {
                return Err(self.error_at(self.current.span, "expected variable name"));
            };
            if self.check(TokenKind::Eq) {
                return Err(self.error_at(
                    self.current.span,
                    "global initializers are not supported",
                ));
            }
            if self.globals.contains_key(&name) {
                return Err(self.error_at(
                    name_span,
                    format!("redefinition of `{}`", &self.cx[name]),
                ));
            }
            let gv =
                self.module.global_vars.define(GlobalVarDecl { name, ty: decl.ty, is_volatile });
            self.globals.insert(name, Symbol::GlobalVar(gv));
            self.module.items.push(Item::GlobalVar(gv));
            if !self.match_token(TokenKind::Comma)? {
                break;
            }
            decl = self.declarator(base)?;
        }
        self.consume(TokenKind::Semi, "expected `;` after declaration")?;
        Ok(())
    }

    fn function(
        &mut self,
        (name, name_span): (InternedStr, Span),
        ret_type: Type,
        params: Vec<Param>,
    ) -> Result<(), ParseError> {
        let param_types = params.iter().map(|param| param.ty).collect();
        let func = match self.globals.get(&name) {
            Some(&Symbol::Func(func)) => func,
            Some(_) => {
                let message =
                    format!("`{}` redeclared as a different kind of symbol", &self.cx[name]);
                return Err(self.error_at(name_span, message));
            }
            None => {
                let func = self.module.funcs.define(FuncDecl {
                    name,
                    ret_type,
                    param_types,
                    pragmas: SmallVec::new(),
                    def: None,
                });
                self.globals.insert(name, Symbol::Func(func));
                func
            }
        };

        if self.match_token(TokenKind::Semi)? {
            // Prototypes have nowhere to keep pragma argument expressions.
            let pragmas = self.take_pragmas()?.into_iter().map(|mut pragma| {
                pragma.args.iter_mut().for_each(|arg| arg.exprs.clear());
                pragma
            });
            self.module.funcs[func].pragmas.extend(pragmas);
            self.module.items.push(Item::Func(func));
            return Ok(());
        }

        if self.module.funcs[func].def.is_some() {
            return Err(self.error_at(name_span, format!("redefinition of `{}`", &self.cx[name])));
        }

        self.func = FuncDefBody::new();
        self.ret_type = ret_type;
        self.scopes.push(FxHashMap::default());
        for Param { name, ty, is_volatile } in params {
            let Some((name, _)) = name else {
                return Err(self.error_at(name_span, "parameter name omitted"));
            };
            let var = self.func.vars.define(VarDecl {
                name,
                ty,
                kind: VarKind::Param,
                is_volatile,
                is_artificial: false,
            });
            self.func.params.push(var);
            self.define(name, Symbol::Var(var));
        }
        let pragmas = self.take_pragmas()?;
        if !self.check(TokenKind::LBrace) {
            return Err(self.error_at(
                self.current.span,
                "expected `{` or `;` after function declarator",
            ));
        }
        let body = self.statement()?;
        self.scopes.pop();

        let mut def = std::mem::take(&mut self.func);
        def.body = body;
        let decl = &mut self.module.funcs[func];
        decl.ret_type = ret_type;
        decl.param_types = def.params.iter().map(|&param| def.vars[param].ty).collect();
        decl.pragmas.extend(pragmas);
        decl.def = Some(def);
        self.module.items.push(Item::Func(func));
        Ok(())
    }

    // Statements.

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        self.collect_pragmas()?;
        let pragmas = self.take_pragmas()?;
        let stmt = self.statement_inner()?;
        self.func.stmts[stmt].pragmas.extend(pragmas);
        Ok(stmt)
    }

    fn statement_inner(&mut self) -> Result<Stmt, ParseError> {
        use TokenKind as T;

        if Self::is_type_start(self.current.kind) {
            return self.declaration_stmt();
        }

        let current_kind = self.current.kind;
        let kind = match current_kind {
            T::Semi => {
                self.advance()?;
                StmtKind::Null
            }
            T::LBrace => {
                self.advance()?;
                self.scopes.push(FxHashMap::default());
                let mut children = vec![];
                loop {
                    self.collect_pragmas()?;
                    if self.match_token(T::RBrace)? {
                        break;
                    }
                    children.push(self.statement()?);
                }
                self.scopes.pop();
                if !self.pending_pragmas.is_empty() {
                    return Err(self.error_at(
                        self.previous.span,
                        "pragma not followed by a statement",
                    ));
                }
                StmtKind::Compound(children)
            }
            T::KwIf => {
                self.advance()?;
                self.consume(T::LParen, "expected `(` after `if`")?;
                let cond = self.expression()?;
                self.consume(T::RParen, "expected `)` after condition")?;
                let then_stmt = self.statement()?;
                let else_stmt =
                    if self.match_token(T::KwElse)? { Some(self.statement()?) } else { None };
                StmtKind::If { cond, then_stmt, else_stmt }
            }
            T::KwFor => {
                self.advance()?;
                self.consume(T::LParen, "expected `(` after `for`")?;
                self.scopes.push(FxHashMap::default());
                let init = if self.match_token(T::Semi)? {
                    None
                } else if Self::is_type_start(self.current.kind) {
                    Some(self.declaration_stmt()?)
                } else {
                    let expr = self.expression()?;
                    self.consume(T::Semi, "expected `;` after loop initializer")?;
                    Some(self.func.new_expr_stmt(expr))
                };
                let cond = if self.check(T::Semi) { None } else { Some(self.expression()?) };
                self.consume(T::Semi, "expected `;` after loop condition")?;
                let step = if self.check(T::RParen) { None } else { Some(self.expression()?) };
                self.consume(T::RParen, "expected `)` after loop increment")?;
                let body = self.statement()?;
                self.scopes.pop();
                StmtKind::For { init, cond, step, body }
            }
            T::KwWhile => {
                self.advance()?;
                self.consume(T::LParen, "expected `(` after `while`")?;
                let cond = self.expression()?;
                self.consume(T::RParen, "expected `)` after condition")?;
                let body = self.statement()?;
                StmtKind::While { cond, body }
            }
            T::KwDo => {
                self.advance()?;
                let body = self.statement()?;
                self.consume(T::KwWhile, "expected `while` after `do` body")?;
                self.consume(T::LParen, "expected `(` after `while`")?;
                let cond = self.expression()?;
                self.consume(T::RParen, "expected `)` after condition")?;
                self.consume(T::Semi, "expected `;` after `do`-`while`")?;
                StmtKind::DoWhile { body, cond }
            }
            T::KwSwitch => {
                self.advance()?;
                self.consume(T::LParen, "expected `(` after `switch`")?;
                let cond = self.expression()?;
                self.consume(T::RParen, "expected `)` after `switch` value")?;
                let body = self.statement()?;
                StmtKind::Switch { cond, body }
            }
            T::KwCase => {
                self.advance()?;
                let value = self.conditional_expr()?;
                self.consume(T::Colon, "expected `:` after `case` value")?;
                let stmt = self.statement()?;
                StmtKind::Case { value, stmt }
            }
            T::KwDefault => {
                self.advance()?;
                self.consume(T::Colon, "expected `:` after `default`")?;
                StmtKind::Default(self.statement()?)
            }
            T::KwBreak => {
                self.advance()?;
                self.consume(T::Semi, "expected `;` after `break`")?;
                StmtKind::Break
            }
            T::KwContinue => {
                self.advance()?;
                self.consume(T::Semi, "expected `;` after `continue`")?;
                StmtKind::Continue
            }
            T::KwReturn => {
                self.advance()?;
                let value = if self.check(T::Semi) {
                    None
                } else {
                    let value = self.expression()?;
                    Some(self.convert(value, self.ret_type))
                };
                self.consume(T::Semi, "expected `;` after `return`")?;
                StmtKind::Return(value)
            }
            T::KwGoto => {
                self.advance()?;
                let (label, _) = self.ident("expected label after `goto`")?;
                self.consume(T::Semi, "expected `;` after `goto`")?;
                StmtKind::Goto(label)
            }
            T::Ident if self.peek()?.kind == T::Colon => {
                let (name, _) = self.ident("expected label")?;
                self.advance()?;
                StmtKind::Label { name, stmt: self.statement()? }
            }
            _ => {
                let expr = self.expression()?;
                self.consume(T::Semi, "expected `;` after expression")?;
                StmtKind::Expr(expr)
            }
        };
        Ok(self.func.new_stmt(kind))
    }

    fn declaration_stmt(&mut self) -> Result<Stmt, ParseError> {
        let (base, is_volatile) = self.decl_spec()?;
        let mut decls = SmallVec::new();
        if !self.check(TokenKind::Semi) {
            loop {
                let decl = self.declarator(base)?;
                let Some((name, _)) = decl.name else {
                    return Err(self.error_at(self.current.span, "expected variable name"));
                };
                if decl.params.is_some() {
                    return Err(self.error_at(
                        self.current.span,
                        "local function declarations are not supported",
                    ));
                }
                let var = self.func.vars.define(VarDecl {
                    name,
                    ty: decl.ty,
                    kind: VarKind::Local,
                    is_volatile,
                    is_artificial: false,
                });
                self.define(name, Symbol::Var(var));
                let init = if self.match_token(TokenKind::Eq)? {
                    if self.check(TokenKind::LBrace) {
                        return Err(self.error_at(
                            self.current.span,
                            "initializer lists are not supported",
                        ));
                    }
                    let init = self.assignment_expr()?;
                    Some(self.convert(init, decl.ty))
                } else {
                    None
                };
                decls.push(LocalDecl { var, init });
                if !self.match_token(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.consume(TokenKind::Semi, "expected `;` after declaration")?;
        let kind = if decls.is_empty() { StmtKind::Null } else { StmtKind::Decl(decls) };
        Ok(self.func.new_stmt(kind))
    }

    // Expressions.

    fn new_expr(&mut self, ty: Type, kind: ExprKind) -> Expr {
        self.func.new_expr(ty, kind)
    }

    fn ty_of(&self, expr: Expr) -> Type {
        self.func.exprs[expr].ty
    }

    /// Implicitly convert `expr` to `to` (only between different scalar types).
    fn convert(&mut self, expr: Expr, to: Type) -> Expr {
        let from = self.ty_of(expr);
        if from != to && self.scalar_of(from).is_some() && self.scalar_of(to).is_some() {
            self.new_expr(to, ExprKind::Cast { operand: expr, implicit: true })
        } else {
            expr
        }
    }

    /// Integer promotion (`char`/`short` to `int`).
    fn promote(&mut self, expr: Expr) -> Expr {
        match self.scalar_of(self.ty_of(expr)) {
            Some(scalar) if scalar < ScalarType::Int => {
                let int = self.scalar_ty(ScalarType::Int);
                self.convert(expr, int)
            }
            _ => expr,
        }
    }

    /// The usual arithmetic conversions.
    fn common_scalar(&self, a: Expr, b: Expr) -> Option<ScalarType> {
        let a = self.scalar_of(self.ty_of(a))?;
        let b = self.scalar_of(self.ty_of(b))?;
        Some(a.common(b))
    }

    pub(super) fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.assignment_expr()?;
        while self.match_token(TokenKind::Comma)? {
            let rhs = self.assignment_expr()?;
            let ty = self.ty_of(rhs);
            expr = self.new_expr(ty, ExprKind::Comma(expr, rhs));
        }
        Ok(expr)
    }

    fn assignment_expr(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let lhs = self.conditional_expr()?;
        let op = match self.current.kind {
            T::Eq => None,
            T::PlusEq => Some(BinOp::Add),
            T::MinusEq => Some(BinOp::Sub),
            T::StarEq => Some(BinOp::Mul),
            T::SlashEq => Some(BinOp::Div),
            T::PercentEq => Some(BinOp::Rem),
            T::AmpEq => Some(BinOp::BitAnd),
            T::PipeEq => Some(BinOp::BitOr),
            T::CaretEq => Some(BinOp::BitXor),
            T::ShlEq => Some(BinOp::Shl),
            T::ShrEq => Some(BinOp::Shr),
            _ => return Ok(lhs),
        };
        self.advance()?;
        let rhs = self.assignment_expr()?;
        let ty = self.ty_of(lhs);
        let is_ptr_arith =
            self.pointee_of(ty).is_some() && matches!(op, Some(BinOp::Add | BinOp::Sub));
        // `lhs op= rhs` computes `lhs op rhs` as a binary operator would, so
        // `rhs` is only converted to the common type of both sides.
        let rhs = match op {
            _ if is_ptr_arith => rhs,
            Some(BinOp::Shl | BinOp::Shr) => self.promote(rhs),
            Some(_) => match self.common_scalar(lhs, rhs) {
                Some(common) => {
                    let common_ty = self.scalar_ty(common);
                    self.convert(rhs, common_ty)
                }
                None => rhs,
            },
            None => self.convert(rhs, ty),
        };
        Ok(self.new_expr(ty, ExprKind::Assign { op, lhs, rhs }))
    }

    fn conditional_expr(&mut self) -> Result<Expr, ParseError> {
        let cond = self.binary(1)?;
        if !self.match_token(TokenKind::Question)? {
            return Ok(cond);
        }
        let then_expr = self.expression()?;
        self.consume(TokenKind::Colon, "expected `:` in conditional expression")?;
        let else_expr = self.conditional_expr()?;
        let (then_expr, else_expr, ty) = match self.common_scalar(then_expr, else_expr) {
            Some(scalar) => {
                let ty = self.scalar_ty(scalar);
                (self.convert(then_expr, ty), self.convert(else_expr, ty), ty)
            }
            None => (then_expr, else_expr, self.ty_of(then_expr)),
        };
        Ok(self.new_expr(ty, ExprKind::Cond { cond, then_expr, else_expr }))
    }

    fn binary_op(kind: TokenKind) -> Option<(BinOp, u8)> {
        use TokenKind as T;
        Some(match kind {
            T::PipePipe => (BinOp::LogOr, 1),
            T::AmpAmp => (BinOp::LogAnd, 2),
            T::Pipe => (BinOp::BitOr, 3),
            T::Caret => (BinOp::BitXor, 4),
            T::Amp => (BinOp::BitAnd, 5),
            T::EqEq => (BinOp::Eq, 6),
            T::BangEq => (BinOp::Ne, 6),
            T::Lt => (BinOp::Lt, 7),
            T::Gt => (BinOp::Gt, 7),
            T::Le => (BinOp::Le, 7),
            T::Ge => (BinOp::Ge, 7),
            T::Shl => (BinOp::Shl, 8),
            T::Shr => (BinOp::Shr, 8),
            T::Plus => (BinOp::Add, 9),
            T::Minus => (BinOp::Sub, 9),
            T::Star => (BinOp::Mul, 10),
            T::Slash => (BinOp::Div, 10),
            T::Percent => (BinOp::Rem, 10),
            _ => return None,
        })
    }

    /// Precedence climbing over the binary operators.
    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = Self::binary_op(self.current.kind)
            && prec >= min_prec
        {
            let op_span = self.current.span;
            self.advance()?;
            let rhs = self.binary(prec + 1)?;
            lhs = self.build_binary(op, lhs, rhs, op_span)?;
        }
        Ok(lhs)
    }

    fn build_binary(
        &mut self,
        op: BinOp,
        a: Expr,
        b: Expr,
        span: Span,
    ) -> Result<Expr, ParseError> {
        let int = self.scalar_ty(ScalarType::Int);
        let (ta, tb) = (self.ty_of(a), self.ty_of(b));
        let invalid = || format!("invalid operands to binary `{}`", op.c_symbol());

        if let BinOp::LogAnd | BinOp::LogOr = op {
            return Ok(self.new_expr(int, ExprKind::Binary(op, a, b)));
        }

        // Pointer arithmetic/comparisons (arrays decay to pointers).
        match (self.pointee_of(ta), self.pointee_of(tb)) {
            (Some(elem), None) if matches!(op, BinOp::Add | BinOp::Sub) && self.is_integer(tb) => {
                let ty = self.ptr_ty(elem);
                return Ok(self.new_expr(ty, ExprKind::Binary(op, a, b)));
            }
            (None, Some(elem)) if op == BinOp::Add && self.is_integer(ta) => {
                let ty = self.ptr_ty(elem);
                return Ok(self.new_expr(ty, ExprKind::Binary(op, a, b)));
            }
            (Some(_), Some(_)) if op == BinOp::Sub => {
                let long = self.scalar_ty(ScalarType::Long);
                return Ok(self.new_expr(long, ExprKind::Binary(op, a, b)));
            }
            (Some(_), Some(_)) if op.is_comparison() => {
                return Ok(self.new_expr(int, ExprKind::Binary(op, a, b)));
            }
            (None, None) => {}
            _ => return Err(self.error_at(span, invalid())),
        }

        let Some(common) = self.common_scalar(a, b) else {
            return Err(self.error_at(span, invalid()));
        };
        let integer_only = matches!(
            op,
            BinOp::Rem | BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor
        );
        if integer_only && common.is_float() {
            return Err(self.error_at(span, invalid()));
        }

        if let BinOp::Shl | BinOp::Shr = op {
            let (a, b) = (self.promote(a), self.promote(b));
            let ty = self.ty_of(a);
            return Ok(self.new_expr(ty, ExprKind::Binary(op, a, b)));
        }

        let common_ty = self.scalar_ty(common);
        let (a, b) = (self.convert(a, common_ty), self.convert(b, common_ty));
        let ty = if op.is_comparison() { int } else { common_ty };
        Ok(self.new_expr(ty, ExprKind::Binary(op, a, b)))
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let span = self.current.span;
        let current_kind = self.current.kind;
        let op = match current_kind {
            T::Plus => UnOp::Plus,
            T::Minus => UnOp::Neg,
            T::Bang => UnOp::Not,
            T::Tilde => UnOp::BitNot,
            T::Star => UnOp::Deref,
            T::Amp => UnOp::AddrOf,
            T::PlusPlus => UnOp::PreInc,
            T::MinusMinus => UnOp::PreDec,
            T::KwSizeof => {
                self.advance()?;
                let ty = if self.check(T::LParen) && Self::is_type_start(self.peek()?.kind) {
                    self.advance()?;
                    let ty = self.type_name()?;
                    self.consume(T::RParen, "expected `)` after type name")?;
                    ty
                } else {
                    let operand = self.unary()?;
                    self.ty_of(operand)
                };
                let long = self.scalar_ty(ScalarType::Long);
                return Ok(self.new_expr(long, ExprKind::SizeOf(ty)));
            }
            T::LParen if Self::is_type_start(self.peek()?.kind) => {
                self.advance()?;
                let ty = self.type_name()?;
                self.consume(T::RParen, "expected `)` after type name")?;
                let operand = self.unary()?;
                return Ok(self.new_expr(ty, ExprKind::Cast { operand, implicit: false }));
            }
            _ => return self.postfix(),
        };
        self.advance()?;
        let operand = self.unary()?;
        let operand_ty = self.ty_of(operand);
        let (operand, ty) = match op {
            UnOp::Plus | UnOp::Neg | UnOp::BitNot => {
                if self.scalar_of(operand_ty).is_none()
                    || (op == UnOp::BitNot && !self.is_integer(operand_ty))
                {
                    return Err(self.error_at(span, "invalid operand to unary operator"));
                }
                let operand = self.promote(operand);
                (operand, self.ty_of(operand))
            }
            UnOp::Not => (operand, self.scalar_ty(ScalarType::Int)),
            UnOp::Deref => match self.pointee_of(operand_ty) {
                Some(pointee) => (operand, pointee),
                None => return Err(self.error_at(span, "cannot dereference a non-pointer")),
            },
            UnOp::AddrOf => (operand, self.ptr_ty(operand_ty)),
            UnOp::PreInc | UnOp::PreDec | UnOp::PostInc | UnOp::PostDec => (operand, operand_ty),
        };
        Ok(self.new_expr(ty, ExprKind::Unary(op, operand)))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let mut expr = self.primary()?;
        loop {
            let span = self.current.span;
            match self.current.kind {
                T::LBracket => {
                    self.advance()?;
                    let index = self.expression()?;
                    self.consume(T::RBracket, "expected `]` after index")?;
                    let Some(elem) = self.pointee_of(self.ty_of(expr)) else {
                        return Err(self.error_at(
                            span,
                            "subscripted value is not an array or pointer",
                        ));
                    };
                    expr = self.new_expr(elem, ExprKind::Index { base: expr, index });
                }
                T::LParen => {
                    self.advance()?;
                    let ExprKind::Func(func) = self.func.exprs[expr].kind else {
                        return Err(self.error_at(span, "called object is not a function"));
                    };
                    let decl = &self.module.funcs[func];
                    let (ret_type, param_types) = (decl.ret_type, decl.param_types.clone());
                    let mut args = SmallVec::new();
                    if !self.check(T::RParen) {
                        loop {
                            let arg = self.assignment_expr()?;
                            let arg = match param_types.get(args.len()) {
                                Some(&param_ty) => self.convert(arg, param_ty),
                                None => arg,
                            };
                            args.push(arg);
                            if !self.match_token(T::Comma)? {
                                break;
                            }
                        }
                    }
                    self.consume(T::RParen, "expected `)` after arguments")?;
                    if args.len() != param_types.len() {
                        let message = format!(
                            "`{}` expects {} argument(s), found {}",
                            &self.cx[self.module.funcs[func].name],
                            param_types.len(),
                            args.len()
                        );
                        return Err(self.error_at(span, message));
                    }
                    expr = self.new_expr(ret_type, ExprKind::Call { callee: expr, args });
                }
                T::Dot | T::Arrow => {
                    let arrow = self.current.kind == T::Arrow;
                    self.advance()?;
                    let (field, field_span) = self.ident("expected field name")?;
                    let mut struct_ty = self.ty_of(expr);
                    if arrow {
                        struct_ty = match self.cx[struct_ty].kind {
                            TypeKind::Ptr(pointee) => pointee,
                            _ => return Err(self.error_at(span, "`->` on a non-pointer")),
                        };
                    }
                    let field_ty = match &self.cx[struct_ty].kind {
                        TypeKind::Struct { fields, .. } => fields
                            .iter()
                            .find(|&&(name, _)| name == field)
                            .map(|&(_, field_ty)| field_ty),
                        _ => None,
                    };
                    let Some(field_ty) = field_ty else {
                        let message = format!("no field named `{}`", &self.cx[field]);
                        return Err(self.error_at(field_span, message));
                    };
                    expr = self.new_expr(field_ty, ExprKind::Member { base: expr, field, arrow });
                }
                T::PlusPlus | T::MinusMinus => {
                    let op = match self.current.kind {
                        T::PlusPlus => UnOp::PostInc,
                        _ => UnOp::PostDec,
                    };
                    self.advance()?;
                    let ty = self.ty_of(expr);
                    expr = self.new_expr(ty, ExprKind::Unary(op, expr));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        use TokenKind as T;

        let token = self.current;
        match token.kind {
            T::Ident => {
                self.advance()?;
                let name = self.cx.intern(self.text(token));
                let Some(symbol) = self.lookup(name) else {
                    let message = format!("use of undeclared identifier `{}`", self.text(token));
                    return Err(self.error_at(token.span, message));
                };
                Ok(match symbol {
                    Symbol::Var(var) => self.func.new_var_use(var),
                    Symbol::GlobalVar(gv) => {
                        let ty = self.module.global_vars[gv].ty;
                        self.new_expr(ty, ExprKind::GlobalVar(gv))
                    }
                    Symbol::Func(func) => {
                        let ty = self.module.funcs[func].ret_type;
                        self.new_expr(ty, ExprKind::Func(func))
                    }
                    Symbol::EnumConst(value) => {
                        let int = self.scalar_ty(ScalarType::Int);
                        self.new_expr(int, ExprKind::EnumConst { name, value })
                    }
                })
            }
            T::IntLit => {
                self.advance()?;
                let text = self.text(token);
                let is_long = text.ends_with(['l', 'L']);
                let digits = text.trim_end_matches(['l', 'L']);
                let value = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                    Some(hex) => i64::from_str_radix(hex, 16),
                    None if digits.len() > 1 && digits.starts_with('0') => {
                        i64::from_str_radix(&digits[1..], 8)
                    }
                    None => digits.parse(),
                };
                let value =
                    value.map_err(|_| self.error_at(token.span, "invalid integer literal"))?;
                let scalar = if is_long || i32::try_from(value).is_err() {
                    ScalarType::Long
                } else {
                    ScalarType::Int
                };
                let ty = self.scalar_ty(scalar);
                Ok(self.new_expr(ty, ExprKind::IntLit(value)))
            }
            T::FloatLit => {
                self.advance()?;
                let text = self.text(token);
                let is_float = text.ends_with(['f', 'F']);
                let value: f64 = text
                    .trim_end_matches(['f', 'F', 'l', 'L'])
                    .parse()
                    .map_err(|_| self.error_at(token.span, "invalid floating-point literal"))?;
                let scalar = if is_float { ScalarType::Float } else { ScalarType::Double };
                let ty = self.scalar_ty(scalar);
                Ok(self.new_expr(ty, ExprKind::FloatLit(value)))
            }
            T::LParen => {
                self.advance()?;
                let inner = self.expression()?;
                self.consume(T::RParen, "expected `)`")?;
                let ty = self.ty_of(inner);
                Ok(self.new_expr(ty, ExprKind::Paren(inner)))
            }
            _ => Err(self.error_at(
                token.span,
                format!("expected expression, found `{}`", token.kind.as_str()),
            )),
        }
    }
}
