use crate::analysis::TypeEval;
use crate::analysis::typing::join;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Const, Context, Expr, Id, Length, Scope, ScopeTags, Stm, StmKind, SymTags, Type,
    TypeKind, builtins,
};
use polyhls_utils::{Error, HlsResult};

/// Upper bound on the rounds over all scopes.
const MAX_ROUNDS: usize = 64;
/// Upper bound on the local iterations over one scope within a round.
const MAX_LOCAL: usize = 16;

/// Why a scope could not be typed completely.
#[derive(Debug)]
pub enum PropError {
    /// A callee is not typed yet; the scope is retried in a later round.
    Reject(Id),
    /// Typing cannot continue.
    Fatal(Error),
}

impl From<Error> for PropError {
    fn from(e: Error) -> Self {
        PropError::Fatal(e)
    }
}

type PropResult<T> = Result<T, PropError>;

/// A copy of a generic function for concrete argument types, or of an
/// inherited method for the subclass `receiver`.
#[derive(Debug, Clone, PartialEq)]
struct Specialization {
    orig: Id,
    name: Id,
    params: Vec<Type>,
    receiver: Option<Id>,
}

/// Infers the type of every symbol from the values assigned to it and
/// specializes functions whose parameters are not annotated.
///
/// Types flow from constants, annotated parameters and constructors into
/// the symbols they are assigned to, from arguments into parameters and
/// from `ret` into the return type of the scope. All scopes are retyped in
/// rounds until a round makes no progress.
///
/// A call to a function with unannotated parameters is redirected to a copy
/// of the function whose parameters carry the argument types. The copy is
/// named after the mangled parameter types. A method called on an object
/// of a subclass that does not override it is copied into the subclass,
/// where `self` has the type of the subclass.
///
/// ## Example
/// ```text
/// scope @top.main [testbench] {
///   sym x: int16!;
///   block b0 entry exit {
///     r = add(x, x);
///     ret None;
///   }
/// }
/// ```
/// becomes
/// ```text
/// scope @top.main [testbench] {
///   sym x: int16!;
///   sym r: int16;
///   block b0 entry exit {
///     r = add_i16_i16(x, x);
///     ret None;
///   }
/// }
/// ```
#[derive(Default)]
pub struct TypePropagation;

impl Named for TypePropagation {
    fn name() -> &'static str {
        "type-propagation"
    }

    fn description() -> &'static str {
        "infer symbol types and specialize generic functions"
    }
}

impl Visitor for TypePropagation {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let mut round = 0;
        loop {
            let mut progress = false;
            let mut requests: Vec<Specialization> = vec![];
            for name in ctx.user_scopes() {
                let Some(rc) = ctx.get_scope(name) else {
                    continue;
                };
                if !rc.borrow().has_body() {
                    continue;
                }
                let mut scope = rc.borrow_mut();
                let mut typer = ScopeTyper {
                    ctx,
                    requests: &mut requests,
                };
                progress |= typer.run(&mut scope)?;
            }
            for req in requests {
                if !ctx.has_scope(req.name) {
                    specialize(ctx, &req)?;
                    progress = true;
                }
            }
            progress |= resolve_symbolic_types(ctx);
            round += 1;
            if !progress {
                break;
            }
            if round == MAX_ROUNDS {
                log::warn!("type propagation stopped after {MAX_ROUNDS} rounds");
                break;
            }
        }
        log::debug!("type propagation converged after {round} rounds");
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
    }
}

/// Copy `req.orig` under `req.name` with the parameter types fixed, and
/// make the copy visible next to the original.
fn specialize(ctx: &mut Context, req: &Specialization) -> HlsResult<()> {
    ctx.clone_scope(req.orig, req.name)?;
    {
        let rc = ctx.scope(req.name)?;
        let mut s = rc.borrow_mut();
        s.tags |= ScopeTags::SPECIALIZED;
        let params = s.param_names();
        for (p, t) in params.into_iter().zip(&req.params) {
            if let Some(sym) = s.sym_mut(p) {
                if !sym.typ.explicit {
                    sym.typ = t.clone();
                }
            }
        }
        if let Some(class) = req.receiver {
            if let Some(sym) = s.self_sym().and_then(|n| s.sym_mut(n)) {
                sym.typ = Type::object(class);
            }
        }
    }
    if let Some(parent) = req.name.parent() {
        ctx.scope(parent)?.borrow_mut().add_sym(
            Id::new(req.name.base()),
            Type::function(req.name),
            SymTags::empty(),
        );
    }
    log::debug!("specialized {} as {}", req.orig, req.name);
    Ok(())
}

/// Evaluate symbolic list lengths and `expr` types whose expressions have
/// become constant.
fn resolve_symbolic_types(ctx: &Context) -> bool {
    let mut changed = false;
    for name in ctx.user_scopes() {
        let Some(rc) = ctx.get_scope(name) else {
            continue;
        };
        let updates: Vec<(Id, Type)> = {
            let scope = rc.borrow();
            scope
                .symbols
                .values()
                .filter_map(|sym| {
                    let t = resolve_type(ctx, &scope, &sym.typ)?;
                    Some((sym.name, t))
                })
                .collect()
        };
        let mut scope = rc.borrow_mut();
        for (n, t) in updates {
            if let Some(sym) = scope.sym_mut(n) {
                sym.typ = t;
                changed = true;
            }
        }
    }
    changed
}

fn constant_value(ctx: &Context, scope: &Scope, e: &Expr) -> Option<i64> {
    if let Some(v) = e.as_int() {
        return Some(v);
    }
    let n = e.as_temp()?;
    let sym = ctx.lookup_sym(scope, n)?;
    let owner = ctx.get_scope(sym.scope)?;
    let owner = owner.try_borrow().ok()?;
    owner
        .constants
        .get(&n)
        .or_else(|| ctx.runtime_info.global_constant(sym.scope.child(n)))
        .and_then(Const::as_int)
}

fn resolve_type(ctx: &Context, scope: &Scope, t: &Type) -> Option<Type> {
    match &t.kind {
        TypeKind::List {
            elm,
            length: Length::Expr(e),
            ro,
        } => {
            let n = u64::try_from(constant_value(ctx, scope, e)?).ok()?;
            Some(Type {
                kind: TypeKind::List {
                    elm: elm.clone(),
                    length: Length::Const(n),
                    ro: *ro,
                },
                explicit: t.explicit,
            })
        }
        TypeKind::Expr(e) => match ctx.type_of_ref(scope, e)?.kind {
            TypeKind::Class { scope, .. } => Some(Type::object(scope).with_explicit(t.explicit)),
            _ => None,
        },
        _ => None,
    }
}

/// Types the statements of one scope.
struct ScopeTyper<'a> {
    ctx: &'a Context,
    requests: &'a mut Vec<Specialization>,
}

impl ScopeTyper<'_> {
    /// Type the scope until it stops changing. Returns whether anything,
    /// in this scope or another, changed.
    fn run(&mut self, scope: &mut Scope) -> HlsResult<bool> {
        let mut changed_any = self.type_self(scope);
        let mut pending = None;
        for _ in 0..MAX_LOCAL {
            let mut changed = false;
            pending = None;
            for blk in scope.live_blocks() {
                for i in 0..scope.block(blk).stms.len() {
                    match self.visit(scope, blk, i) {
                        Ok(c) => changed |= c,
                        Err(PropError::Reject(callee)) => pending = Some(callee),
                        Err(PropError::Fatal(e)) => return Err(e),
                    }
                }
            }
            changed_any |= changed;
            if !changed {
                break;
            }
        }
        if let Some(callee) = pending {
            log::trace!("{}: waiting for {callee}", scope.name);
        }
        Ok(changed_any)
    }

    /// Methods see their receiver as an object of the enclosing class.
    fn type_self(&self, scope: &mut Scope) -> bool {
        let Some(parent) = scope.parent.filter(|_| scope.is_method() || scope.is_ctor()) else {
            return false;
        };
        let Some(sym) = scope.self_sym().and_then(|s| scope.sym_mut(s)) else {
            return false;
        };
        if sym.typ.is_undef() {
            sym.typ = Type::object(parent);
            return true;
        }
        false
    }

    fn visit(&mut self, scope: &mut Scope, blk: BlockIdx, i: usize) -> PropResult<bool> {
        let mut stm = scope.block(blk).stms[i].clone();
        let mut changed = false;
        let mut reject = None;
        for e in stm.src_exprs_mut() {
            match self.resolve_calls(scope, e) {
                Ok(c) => changed |= c,
                Err(PropError::Reject(c)) => reject = Some(c),
                Err(fatal) => return Err(fatal),
            }
        }
        if stm != scope.block(blk).stms[i] {
            scope.block_mut(blk).stms[i] = stm.clone();
        }
        if let Some(c) = reject {
            return Err(PropError::Reject(c));
        }
        Ok(changed | self.assign_stm(scope, &stm)?)
    }

    fn assign_stm(&mut self, scope: &mut Scope, stm: &Stm) -> PropResult<bool> {
        let (dst, t) = {
            let ev = TypeEval::new(self.ctx, scope);
            match &stm.kind {
                StmKind::Move { dst, src } | StmKind::CMove { dst, src, .. } => (dst, ev.of(src)),
                StmKind::Phi(phi) => {
                    let t = phi
                        .args
                        .iter()
                        .filter(|a| !matches!(a, Expr::Const(Const::None)))
                        .fold(Type::undef(), |acc, a| join(&acc, &ev.of(a)));
                    (&phi.var, t)
                }
                StmKind::Ret(e) => {
                    let t = ev.of(e);
                    return Ok(match scope.return_type.propagate(&t) {
                        Some(n) => {
                            scope.return_type = n;
                            true
                        }
                        None => false,
                    });
                }
                _ => return Ok(false),
            }
        };
        self.assign(scope, dst, &t)
    }

    fn assign(&mut self, scope: &mut Scope, dst: &Expr, t: &Type) -> PropResult<bool> {
        match dst {
            Expr::Temp(n) => Ok(match scope.sym_mut(*n) {
                Some(sym) => match sym.typ.propagate(t) {
                    Some(nt) => {
                        sym.typ = nt;
                        true
                    }
                    None => false,
                },
                // Assignments to outer symbols do not retype them.
                None => false,
            }),
            Expr::Attr(base, field) => {
                let owner = TypeEval::new(self.ctx, scope).of(base).scope();
                let Some(owner) = owner.filter(|o| *o != scope.name) else {
                    return Ok(false);
                };
                let Some(rc) = self.ctx.get_scope(owner) else {
                    return Ok(false);
                };
                let Ok(mut class) = rc.try_borrow_mut() else {
                    return Ok(false);
                };
                Ok(match class.sym_mut(*field) {
                    Some(sym) => match sym.typ.propagate(t) {
                        Some(nt) => {
                            sym.typ = nt;
                            true
                        }
                        None => false,
                    },
                    None => {
                        // Assigning an unknown attribute declares a field.
                        class.add_sym(*field, t.clone(), SymTags::FIELD);
                        true
                    }
                })
            }
            _ => Ok(false),
        }
    }

    /// Resolve the calls inside `e`, innermost first.
    fn resolve_calls(&mut self, scope: &Scope, e: &mut Expr) -> PropResult<bool> {
        let mut changed = false;
        for k in e.kids_mut() {
            changed |= self.resolve_calls(scope, k)?;
        }
        match e {
            Expr::Call { func, args, kwargs } => {
                changed |= self.resolve_call(scope, func, args, kwargs)?
            }
            Expr::New { class, args, kwargs } => {
                let ctor = class.child("__init__");
                if self.ctx.has_scope(ctor) {
                    let types = self.arg_types(scope, ctor, args, kwargs);
                    changed |= self.bind_params(scope, ctor, &types);
                }
            }
            _ => {}
        }
        Ok(changed)
    }

    /// Types of the arguments of a call to `callee`, in parameter order.
    /// Missing arguments take the type of the parameter default.
    fn arg_types(
        &self,
        scope: &Scope,
        callee: Id,
        args: &[Expr],
        kwargs: &[(Id, Expr)],
    ) -> Vec<Type> {
        let ev = TypeEval::new(self.ctx, scope);
        let Some(rc) = self.ctx.get_scope(callee) else {
            return vec![];
        };
        let Ok(c) = rc.try_borrow() else {
            return vec![];
        };
        let callee_ev = TypeEval::new(self.ctx, &c);
        c.params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if let Some(a) = args.get(i) {
                    ev.of(a)
                } else if let Some((_, a)) = kwargs.iter().find(|(k, _)| *k == p.sym) {
                    ev.of(a)
                } else if let Some(d) = &p.default {
                    callee_ev.of(d)
                } else {
                    Type::undef()
                }
            })
            .collect()
    }

    /// Widen the unannotated parameters of `callee` with argument types.
    fn bind_params(&self, scope: &Scope, callee: Id, types: &[Type]) -> bool {
        if callee == scope.name {
            return false;
        }
        let Some(rc) = self.ctx.get_scope(callee) else {
            return false;
        };
        let Ok(mut c) = rc.try_borrow_mut() else {
            return false;
        };
        if c.is_lib() {
            return false;
        }
        let mut changed = false;
        for (p, t) in c.param_names().into_iter().zip(types) {
            if let Some(sym) = c.sym_mut(p) {
                if let Some(nt) = sym.typ.propagate(t) {
                    sym.typ = nt;
                    changed = true;
                }
            }
        }
        changed
    }

    fn resolve_call(
        &mut self,
        scope: &Scope,
        func: &mut Expr,
        args: &[Expr],
        kwargs: &[(Id, Expr)],
    ) -> PropResult<bool> {
        if let Expr::Attr(_, m) = func {
            if *m == builtins::APPEND_WORKER {
                let worker = args.first().and_then(|w| self.ctx.callee_of(scope, w));
                let Some(worker) = worker else {
                    return Ok(false);
                };
                let types = self.arg_types(scope, worker, &args[1..], kwargs);
                return Ok(self.bind_params(scope, worker, &types));
            }
        }
        let Some(callee) = self.ctx.callee_of(scope, func) else {
            return Ok(false);
        };
        if let Some(req) = self.inherited(scope, func, callee) {
            let name = req.name;
            if !self.requests.contains(&req) {
                self.requests.push(req);
            }
            return Err(PropError::Reject(name));
        }
        let Some(rc) = self.ctx.get_scope(callee) else {
            return Ok(false);
        };
        let (is_lib, generic, has_body, returns_undef) = {
            let Ok(c) = rc.try_borrow() else {
                return Ok(false);
            };
            let generic = c.is_function()
                && !c.is_method()
                && !c.tags.contains(ScopeTags::SPECIALIZED)
                && !c.params.is_empty()
                && c.params
                    .iter()
                    .any(|p| c.sym(p.sym).is_some_and(|s| !s.typ.explicit));
            (c.is_lib(), generic, c.has_body(), c.return_type.is_undef())
        };
        if is_lib {
            return Ok(false);
        }
        let types = self.arg_types(scope, callee, args, kwargs);
        if generic {
            if types.iter().any(Type::is_undef) {
                return Err(PropError::Reject(callee));
            }
            let bound = self.bound_types(callee, &types);
            let mangled = bound.iter().map(Type::mangle).collect::<Vec<_>>().join("_");
            let name = match callee.parent() {
                Some(p) => p.child(format!("{}_{mangled}", callee.base())),
                None => Id::new(format!("{callee}_{mangled}")),
            };
            if !self.ctx.has_scope(name) {
                let req = Specialization {
                    orig: callee,
                    name,
                    params: bound,
                    receiver: None,
                };
                if !self.requests.contains(&req) {
                    self.requests.push(req);
                }
                return Err(PropError::Reject(name));
            }
            retarget_call(func, name);
            return Ok(true);
        }
        let changed = self.bind_params(scope, callee, &types);
        if has_body && returns_undef && callee != scope.name {
            return Err(PropError::Reject(callee));
        }
        Ok(changed)
    }

    /// The copy needed when `func` reaches a method of a base class through
    /// an object of a subclass.
    fn inherited(&self, scope: &Scope, func: &Expr, callee: Id) -> Option<Specialization> {
        let Expr::Attr(recv, m) = func else {
            return None;
        };
        let TypeKind::Object { scope: class } = TypeEval::new(self.ctx, scope).of(recv).kind else {
            return None;
        };
        let base = callee.parent()?;
        if class == base || !self.ctx.is_subclass(class, base) {
            return None;
        }
        let rc = self.ctx.get_scope(callee)?;
        let c = rc.try_borrow().ok()?;
        if !c.is_method() || c.is_ctor() || c.is_lib() {
            return None;
        }
        Some(Specialization {
            orig: callee,
            name: class.child(m),
            params: vec![],
            receiver: Some(class),
        })
    }

    /// Parameter types of a specialization: annotations win over
    /// argument types.
    fn bound_types(&self, callee: Id, types: &[Type]) -> Vec<Type> {
        let Some(rc) = self.ctx.get_scope(callee) else {
            return types.to_vec();
        };
        let c = rc.borrow();
        c.params
            .iter()
            .zip(types)
            .map(|(p, t)| match c.sym(p.sym) {
                Some(s) if s.typ.explicit => s.typ.clone(),
                _ => t.clone().with_explicit(false),
            })
            .collect()
    }
}

/// Make a call target refer to the scope `name`, keeping the path used to
/// reach the original.
fn retarget_call(func: &mut Expr, name: Id) {
    let base = Id::new(name.base());
    match func {
        Expr::Temp(n) => *n = base,
        Expr::Attr(_, a) => *a = base,
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, Direction, from_ast::ast_to_ir};

    fn typed(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        TypePropagation::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    fn sym_type(ctx: &Context, scope: &str, sym: &str) -> Type {
        let rc = ctx.scope(Id::new(scope)).unwrap();
        let s = rc.borrow();
        s.sym(Id::new(sym)).unwrap().typ.clone()
    }

    #[test]
    fn generic_function_is_specialized() {
        let ctx = typed(
            r#"
scope @top [namespace] {}
scope @top.add [function] {
  param a: undef;
  param b: undef;
  sym @return: undef [return];
  block b0 entry exit {
    @return = (a + b);
    ret @return;
  }
}
scope @top.main [function, testbench] {
  sym x: int16!;
  sym y: int32!;
  block b0 entry exit {
    x = 1;
    y = 2;
    r1 = add(x, x);
    r2 = add(y, y);
    ret None;
  }
}
"#,
        );
        for (name, t) in [("@top.add_i16_i16", Type::int(16, true)), ("@top.add_i32_i32", Type::int(32, true))] {
            let rc = ctx.scope(Id::new(name)).unwrap();
            let s = rc.borrow();
            assert!(s.tags.contains(ScopeTags::SPECIALIZED));
            assert_eq!(s.origin, Some(Id::new("@top.add")));
            assert_eq!(s.return_type, t);
        }
        let main = ctx.scope(Id::new("@top.main")).unwrap();
        let main = main.borrow();
        let calls: Vec<String> = main
            .all_stms()
            .filter_map(|(_, s)| match s.src()? {
                Expr::Call { func, .. } => Some(func.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(calls, vec!["add_i16_i16", "add_i32_i32"]);
        assert_eq!(sym_type(&ctx, "@top.main", "r1"), Type::int(16, true));
    }

    #[test]
    fn inherited_method_runs_on_subclass() {
        let ctx = typed(
            r#"
scope @top [namespace] {}
scope @top.B [class] {
  sym x: int16 [field];
}
scope @top.B.get [method] {
  sym self: undef [self];
  sym @return: undef [return];
  block b0 entry exit {
    @return = self.x;
    ret @return;
  }
}
scope @top.S [class] bases(@top.B) {}
scope @top.main [function, testbench] {
  block b0 entry exit {
    o = new S();
    r = o.get();
    ret None;
  }
}
"#,
        );
        assert!(ctx.is_subclass(Id::new("@top.S"), Id::new("@top.B")));
        assert!(!ctx.is_subclass(Id::new("@top.B"), Id::new("@top.S")));
        assert_eq!(sym_type(&ctx, "@top.S.get", "self"), Type::object(Id::new("@top.S")));
        assert_eq!(sym_type(&ctx, "@top.B.get", "self"), Type::object(Id::new("@top.B")));
        assert_eq!(sym_type(&ctx, "@top.S", "get").scope(), Some(Id::new("@top.S.get")));
        assert_eq!(sym_type(&ctx, "@top.main", "r"), Type::int(16, true));
    }

    #[test]
    fn ports_and_fields() {
        let ctx = typed(
            r#"
scope @top [namespace] {}
scope @top.M [class, module] {
  sym p: undef [field];
}
scope @top.M.__init__ [method, ctor] {
  sym self: undef [self];
  block b0 entry exit {
    self.p = new polyphony.io.Port("int8", "out");
    self.n = 3;
    ret None;
  }
}
"#,
        );
        let p = sym_type(&ctx, "@top.M", "p");
        assert_eq!(p.port_direction(), Some(Direction::Output));
        assert!(sym_type(&ctx, "@top.M", "n").is_int());
        assert!(sym_type(&ctx, "@top.M.__init__", "self").is_object());
    }
}
