use super::TypePropagation;
use crate::analysis::TypeEval;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    Const, Context, Direction, Expr, Id, Scope, SymTags, Type, TypeKind,
    builtins::{self, PortAccess},
};
use polyhls_utils::{Error, ErrorCode, HlsResult, Loc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Fixes the direction of every port from the way it is accessed and
/// checks that ports are driven consistently:
/// 1. Within one scope a port is only read or only written.
/// 2. A port whose direction is already fixed is not accessed against it.
/// 3. A port has at most one writer, and a queue at most one reader.
///
/// Ports written by one scope and read by another are channels internal
/// to the module and keep the direction `any`.
///
/// Before that, every `polyphony.io.flipped(C)` is replaced by a copy of
/// class `C` named `C_flipped` whose ports point the other way. The copy is
/// deep: classes of port-bearing fields are flipped as well.
#[derive(Default)]
pub struct PortTypeProp;

impl Named for PortTypeProp {
    fn name() -> &'static str {
        "port-type-prop"
    }

    fn description() -> &'static str {
        "infer port directions and check reader/writer conflicts"
    }
}

impl Visitor for PortTypeProp {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        if flip_classes(ctx)? {
            TypePropagation.start_context(ctx)?;
        }
        let uses = collect_uses(ctx);
        for (key, uses) in uses {
            check_port(ctx, key, &uses)?;
        }
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
    }
}

/// A port is identified by the scope owning its symbol and the symbol.
type PortKey = (Id, Id);

#[derive(Debug)]
struct PortUse {
    scope: Id,
    access: PortAccess,
    direction: Direction,
    loc: Loc,
    /// Testbenches drive a module from the outside.
    outside: bool,
    /// Constructors may initialize a port.
    ctor: bool,
}

fn port_key(ctx: &Context, scope: &Scope, port: &Expr) -> Option<PortKey> {
    match port {
        Expr::Attr(base, field) => {
            let owner = TypeEval::new(ctx, scope).of(base).scope()?;
            Some((owner, *field))
        }
        Expr::Temp(n) => ctx.lookup_sym(scope, *n).map(|s| (s.scope, *n)),
        _ => None,
    }
}

fn collect_uses(ctx: &Context) -> BTreeMap<PortKey, Vec<PortUse>> {
    let mut out: BTreeMap<PortKey, Vec<PortUse>> = BTreeMap::new();
    for name in ctx.user_scopes() {
        let Some(rc) = ctx.get_scope(name) else {
            continue;
        };
        let scope = rc.borrow();
        if !scope.has_body() {
            continue;
        }
        let ev = TypeEval::new(ctx, &scope);
        for (_, stm) in scope.all_stms() {
            for e in stm.src_exprs() {
                e.walk(&mut |x| {
                    let Expr::Call { func, .. } = x else { return };
                    let Expr::Attr(port, method) = func.as_ref() else {
                        return;
                    };
                    let Some((access, direction)) = builtins::port_method(method.as_ref()) else {
                        return;
                    };
                    if !ev.of(port).is_port() {
                        return;
                    }
                    let Some(key) = port_key(ctx, &scope, port) else {
                        return;
                    };
                    out.entry(key).or_default().push(PortUse {
                        scope: scope.name,
                        access,
                        direction,
                        loc: stm.loc,
                        outside: scope.is_testbench(),
                        ctor: scope.is_ctor(),
                    });
                });
            }
        }
    }
    out
}

fn check_port(ctx: &Context, (owner, port): PortKey, uses: &[PortUse]) -> HlsResult<()> {
    let inside: Vec<&PortUse> = uses.iter().filter(|u| !u.outside).collect();

    // One direction per scope.
    let mut seen: HashMap<Id, Direction> = HashMap::new();
    for u in &inside {
        match seen.get(&u.scope) {
            Some(d) if *d != u.direction => {
                return Err(Error::fail(u.loc, ErrorCode::PortDirectionConflicted, &[port]));
            }
            _ => {
                seen.insert(u.scope, u.direction);
            }
        }
    }

    let is_queue = {
        let rc = ctx.scope(owner)?;
        let s = rc.borrow();
        s.sym(port).is_some_and(|sym| match &sym.typ.kind {
            TypeKind::Port { scope, .. } => *scope == builtins::QUEUE_CLASS,
            _ => false,
        })
    };
    conflicts(&inside, PortAccess::Write, ErrorCode::WritingIsConflicted, port)?;
    if is_queue {
        conflicts(&inside, PortAccess::Read, ErrorCode::ReadingIsConflicted, port)?;
    }

    let dirs: BTreeSet<Direction> = seen.values().copied().collect();
    let Some(&direction) = dirs.iter().next().filter(|_| dirs.len() == 1) else {
        log::debug!("{owner}.{port} is an internal channel");
        return Ok(());
    };
    let rc = ctx.scope(owner)?;
    let mut s = rc.borrow_mut();
    let Some(sym) = s.sym_mut(port) else {
        return Ok(());
    };
    if !sym.typ.assign_direction(direction) {
        let loc = inside.first().map(|u| u.loc).unwrap_or_else(Loc::unknown);
        return Err(Error::fail(loc, ErrorCode::PortDirectionConflicted, &[port]));
    }
    log::debug!("{owner}.{port} is {direction}");
    Ok(())
}

/// Report the first use by a second scope accessing the port with `access`.
fn conflicts(uses: &[&PortUse], access: PortAccess, code: ErrorCode, port: Id) -> HlsResult<()> {
    let mut first: Option<&PortUse> = None;
    for u in uses.iter().filter(|u| u.access == access && !u.ctor) {
        match first {
            None => first = Some(u),
            Some(f) if f.scope != u.scope => {
                let post = format!("first accessed in {} at line {}", f.scope, f.loc.line());
                return Err(Error::fail(u.loc, code, &[port]).with_post_msg(Some(post)));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Does an object of `class` carry ports, directly or through its fields?
fn has_ports(ctx: &Context, class: Id, depth: usize) -> bool {
    if depth > 8 {
        return false;
    }
    let Some(rc) = ctx.get_scope(class) else {
        return false;
    };
    let Ok(s) = rc.try_borrow() else {
        return false;
    };
    s.symbols.values().any(|sym| match &sym.typ.kind {
        TypeKind::Port { .. } => true,
        TypeKind::Object { scope } if *scope != class => has_ports(ctx, *scope, depth + 1),
        _ => false,
    })
}

fn flipped_name(class: Id) -> Id {
    match class.parent() {
        Some(p) => p.child(format!("{}_flipped", class.base())),
        None => Id::new(format!("{class}_flipped")),
    }
}

fn flip_type(t: &Type, classes: &HashMap<Id, Id>) -> Type {
    let mut t = t.flipped();
    t.rename_scopes(&|s| classes.get(&s).copied());
    t
}

fn flip_direction_arg(e: &mut Expr) {
    if let Expr::Const(Const::Str(s)) = e {
        if let Ok(d) = s.parse::<Direction>() {
            *s = d.flip().to_string();
        }
    }
}

/// Create `C_flipped` and the flipped copies of the classes it contains.
fn flip_class(ctx: &mut Context, class: Id) -> HlsResult<Id> {
    let name = flipped_name(class);
    if ctx.has_scope(name) {
        return Ok(name);
    }
    ctx.clone_scope(class, name)?;
    let prefix = format!("{name}.");
    let copies: Vec<Id> = ctx
        .scope_names()
        .into_iter()
        .filter(|n| *n == name || n.as_ref().starts_with(&prefix))
        .collect();

    let mut nested = HashMap::new();
    for c in &copies {
        let fields: Vec<Id> = {
            let rc = ctx.scope(*c)?;
            let s = rc.borrow();
            s.symbols
                .values()
                .filter_map(|sym| match &sym.typ.kind {
                    TypeKind::Object { scope } => Some(*scope),
                    _ => None,
                })
                .collect()
        };
        for f in fields {
            if f != class && !copies.contains(&f) && has_ports(ctx, f, 0) {
                let ff = flip_class(ctx, f)?;
                nested.insert(f, ff);
            }
        }
    }

    for c in &copies {
        let rc = ctx.scope(*c)?;
        let mut s = rc.borrow_mut();
        for (_, sym) in s.symbols.iter_mut() {
            sym.typ = flip_type(&sym.typ, &nested);
        }
        for blk in s.live_blocks() {
            for stm in s.block_mut(blk).stms.iter_mut() {
                for e in stm.exprs_mut() {
                    e.walk_mut(&mut |x| {
                        let Expr::New { class, args, kwargs } = x else {
                            return;
                        };
                        if builtins::is_port_class(*class) {
                            if let Some(d) = args.get_mut(1) {
                                flip_direction_arg(d);
                            }
                            for (k, v) in kwargs.iter_mut() {
                                if *k == "direction" {
                                    flip_direction_arg(v);
                                }
                            }
                        } else if let Some(f) = nested.get(class) {
                            *class = *f;
                        }
                    });
                }
            }
        }
    }

    if let Some(parent) = name.parent() {
        ctx.scope(parent)?
            .borrow_mut()
            .add_sym(Id::new(name.base()), Type::class(name), SymTags::empty());
    }
    log::debug!("flipped {class} as {name}");
    Ok(name)
}

/// The class argument of a `flipped(C)` call.
fn flipped_arg<'e>(ctx: &Context, scope: &Scope, e: &'e Expr) -> Option<(&'e Expr, Id)> {
    let arg = match e {
        Expr::Syscall { name, args, .. } if *name == builtins::FLIPPED => args.first()?,
        Expr::Call { func, args, .. }
            if ctx.callee_of(scope, func) == Some(Id::new(builtins::FLIPPED)) =>
        {
            args.first()?
        }
        _ => return None,
    };
    match ctx.type_of_ref(scope, arg)?.kind {
        TypeKind::Class { scope, .. } => Some((arg, scope)),
        _ => None,
    }
}

/// Replace `flipped(C)` by a reference to `C_flipped`. Returns whether any
/// class was flipped.
fn flip_classes(ctx: &mut Context) -> HlsResult<bool> {
    let mut requests: Vec<(Id, Id)> = vec![];
    for name in ctx.user_scopes() {
        let rc = ctx.scope(name)?;
        let scope = rc.borrow();
        for (_, stm) in scope.all_stms() {
            for e in stm.src_exprs() {
                e.walk(&mut |x| {
                    if let Some((_, class)) = flipped_arg(ctx, &scope, x) {
                        requests.push((name, class));
                    }
                });
            }
        }
    }
    if requests.is_empty() {
        return Ok(false);
    }
    let mut flipped = HashMap::new();
    for (_, class) in &requests {
        if !flipped.contains_key(class) {
            flipped.insert(*class, flip_class(ctx, *class)?);
        }
    }
    let users: BTreeSet<Id> = requests.iter().map(|(s, _)| *s).collect();
    for name in users {
        let rc = ctx.scope(name)?;
        let mut scope = rc.borrow_mut();
        for blk in scope.live_blocks() {
            for i in 0..scope.block(blk).stms.len() {
                let mut stm = scope.block(blk).stms[i].clone();
                for e in stm.src_exprs_mut() {
                    rewrite_flipped(ctx, &scope, e, &flipped);
                }
                scope.block_mut(blk).stms[i] = stm;
            }
        }
    }
    Ok(true)
}

fn rewrite_flipped(ctx: &Context, scope: &Scope, e: &mut Expr, flipped: &HashMap<Id, Id>) {
    if let Some(f) = flipped_arg(ctx, scope, e).and_then(|(_, c)| flipped.get(&c)) {
        *e = Expr::temp(f.base());
        return;
    }
    for k in e.kids_mut() {
        rewrite_flipped(ctx, scope, k, flipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    const MODULE: &str = r#"
scope @top [namespace] {}
scope @top.M [class, module] {
  sym p: port<polyphony.io.Port, int8, any> [field];
  sym q: port<polyphony.io.Port, int8, any> [field];
}
scope @top.M.a [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    10: self.p.wr(1);
    11: x = self.q.rd();
    ret None;
  }
}
scope @top.M.b [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    20: self.p.wr(2);
    ret None;
  }
}
"#;

    fn run(src: &str) -> (Context, HlsResult<()>) {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let res = PortTypeProp::do_pass_default(&mut ctx).map(|_| ());
        (ctx, res)
    }

    #[test]
    fn second_writer_conflicts() {
        let (_, res) = run(MODULE);
        let err = res.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::WritingIsConflicted));
        assert_eq!(err.loc().line(), 20);
        assert!(err.to_string().ends_with("first accessed in @top.M.a at line 10"));
    }

    #[test]
    fn directions_follow_uses() {
        let src = MODULE.replace("20: self.p.wr(2);", "");
        let (ctx, res) = run(&src);
        res.unwrap();
        let m = ctx.scope(Id::new("@top.M")).unwrap();
        let m = m.borrow();
        let dir = |n: &str| m.sym(Id::new(n)).unwrap().typ.port_direction();
        assert_eq!(dir("p"), Some(Direction::Output));
        assert_eq!(dir("q"), Some(Direction::Input));
    }

    #[test]
    fn mixed_access_in_one_scope() {
        let src = MODULE
            .replace("20: self.p.wr(2);", "")
            .replace("11: x = self.q.rd();", "11: x = self.p.rd();");
        let (_, res) = run(&src);
        assert_eq!(
            res.unwrap_err().code(),
            Some(ErrorCode::PortDirectionConflicted)
        );
    }

    #[test]
    fn flipped_class_is_deep() {
        let src = r#"
scope @top [namespace] {}
scope @top.Io [class] {
  sym i: port<polyphony.io.Port, int8, in> [field];
  sym o: port<polyphony.io.Port, int8, out> [field];
}
scope @top.f [function, testbench] {
  block b0 entry exit {
    c = syscall polyphony.io.flipped(Io);
    ret None;
  }
}
"#;
        let (ctx, res) = run(src);
        res.unwrap();
        let io = ctx.scope(Id::new("@top.Io_flipped")).unwrap();
        let io = io.borrow();
        assert_eq!(io.sym(Id::new("i")).unwrap().typ.port_direction(), Some(Direction::Output));
        assert_eq!(io.sym(Id::new("o")).unwrap().typ.port_direction(), Some(Direction::Input));
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        let src = f.all_stms().find_map(|(_, s)| s.src().cloned()).unwrap();
        assert_eq!(src, Expr::temp("Io_flipped"));
    }
}
