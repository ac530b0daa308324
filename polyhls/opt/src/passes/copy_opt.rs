use crate::analysis::TypeEval;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{Context, Expr, Id, Scope, StmId, StmKind, SymTags, Type, UseDefTable};
use std::collections::{BTreeMap, HashSet};

/// Tags of symbols whose moves are observable and must stay.
const PINNED: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::REGISTER)
    .union(SymTags::FIELD)
    .union(SymTags::FREE)
    .union(SymTags::STATIC)
    .union(SymTags::SELF);

/// Removes `d = s` moves between scalar locals by reading `s` wherever
/// `d` was read. Closures enclosed by the scope see the same rewrite.
#[derive(Default)]
pub struct CopyOpt;

/// Removes whole-record moves between object and sequence references,
/// including references to fields that are never reassigned in the scope.
#[derive(Default)]
pub struct ObjCopyOpt;

impl Named for CopyOpt {
    fn name() -> &'static str {
        "copy-opt"
    }

    fn description() -> &'static str {
        "propagate copies between scalar locals"
    }
}

impl Named for ObjCopyOpt {
    fn name() -> &'static str {
        "obj-copy-opt"
    }

    fn description() -> &'static str {
        "propagate copies of object and sequence references"
    }
}

struct CopyKind {
    picks: fn(&Type) -> bool,
    /// Sources may be field accesses.
    attrs: bool,
}

const SCALARS: CopyKind = CopyKind {
    picks: Type::is_scalar,
    attrs: false,
};

fn is_record(t: &Type) -> bool {
    t.is_object() || t.is_seq()
}

const RECORDS: CopyKind = CopyKind {
    picks: is_record,
    attrs: true,
};

fn pinned(scope: &Scope, name: Id) -> bool {
    scope.sym(name).is_none_or(|s| s.tags.intersects(PINNED))
}

/// The copies `d = s` that can be folded away, keyed by `d`.
fn copies(
    scope: &Scope,
    ctx: &Context,
    ud: &UseDefTable,
    kind: &CopyKind,
) -> BTreeMap<Id, (StmId, Expr)> {
    let ev = TypeEval::new(ctx, scope);
    let mut out = BTreeMap::new();
    for (_, stm) in scope.all_stms() {
        let StmKind::Move {
            dst: Expr::Temp(d),
            src,
        } = &stm.kind
        else {
            continue;
        };
        let Some(dsym) = scope.sym(*d) else { continue };
        if pinned(scope, *d)
            || !(kind.picks)(&dsym.typ)
            || ud.defs(*d).len() != 1
            || !ud.type_users(*d).is_empty()
        {
            continue;
        }
        let ok = match src {
            Expr::Temp(s) => {
                *s != *d && !pinned(scope, *s) && ud.defs(*s).len() <= 1
            }
            Expr::Attr(..) if kind.attrs => src
                .qsym()
                .is_some_and(|q| ud.qdefs(&q).is_empty() && ud.defs(q[0]).is_empty()),
            _ => false,
        };
        if ok && dsym.typ.is_compatible(&ev.of(src)) {
            out.insert(*d, (stm.id, src.clone()));
        }
    }
    out
}

/// Follow chains `c = b; b = a` to the first source that is not a copy.
fn resolve(map: &BTreeMap<Id, (StmId, Expr)>, d: Id) -> Expr {
    let mut cur = map[&d].1.clone();
    let mut hops = 0;
    while let Some(next) = cur.as_temp().and_then(|t| map.get(&t)) {
        cur = next.1.clone();
        hops += 1;
        if hops > map.len() {
            break;
        }
    }
    cur
}

/// Apply the replacements to the closures nested in `scope`.
fn rewrite_closures(ctx: &Context, scope: &Scope, reps: &[(Id, Expr)]) {
    for child in &scope.children {
        let Some(rc) = ctx.get_scope(*child) else {
            continue;
        };
        let Ok(mut closure) = rc.try_borrow_mut() else {
            continue;
        };
        if !closure.is_closure() {
            continue;
        }
        for blk in closure.live_blocks() {
            for stm in closure.block_mut(blk).stms.iter_mut() {
                for e in stm.exprs_mut() {
                    for (d, rep) in reps {
                        e.replace_temp(*d, rep);
                    }
                }
            }
        }
        for (d, rep) in reps {
            let Some(old) = closure.del_sym(*d) else { continue };
            if let Some(s) = rep.head() {
                if !closure.has_sym(s) {
                    closure.add_sym(s, old.typ, old.tags | SymTags::FREE);
                }
            }
        }
    }
}

fn propagate(scope: &mut Scope, ctx: &Context, kind: &CopyKind) -> bool {
    let ud = UseDefTable::build(scope);
    let map = copies(scope, ctx, &ud, kind);
    if map.is_empty() {
        return false;
    }
    let reps: Vec<(Id, Expr)> = map.keys().map(|d| (*d, resolve(&map, *d))).collect();
    let removed: HashSet<StmId> = map.values().map(|(id, _)| *id).collect();
    for blk in scope.live_blocks() {
        let b = scope.block_mut(blk);
        b.stms.retain(|s| !removed.contains(&s.id));
        for stm in b.stms.iter_mut() {
            for e in stm.exprs_mut() {
                for (d, rep) in &reps {
                    e.replace_temp(*d, rep);
                }
            }
        }
    }
    rewrite_closures(ctx, scope, &reps);
    for (d, rep) in &reps {
        log::debug!("{}: {d} replaced by {rep}", scope.name);
        scope.del_sym(*d);
    }
    scope.invalidate();
    true
}

impl Visitor for CopyOpt {
    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        while propagate(scope, ctx, &SCALARS) {}
        Ok(Action::SkipChildren)
    }
}

impl Visitor for ObjCopyOpt {
    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        while propagate(scope, ctx, &RECORDS) {}
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn context(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        ast_to_ir(prog, Config::default(), None).unwrap()
    }

    fn body(ctx: &Context, name: &str) -> Vec<String> {
        let rc = ctx.scope(Id::new(name)).unwrap();
        let s = rc.borrow();
        s.all_stms().map(|(_, s)| s.to_string()).collect()
    }

    const SCALAR_SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32;
  sym b: int32;
  sym c: int32;
  sym d: int32;
  sym e: int32;
  block b0 entry exit {
    b = (a + 1);
    c = b;
    d = c;
    e = a;
    ret ((d * 2) + e);
  }
}
"#;

    #[test]
    fn scalar_chain() {
        let mut ctx = context(SCALAR_SRC);
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(
            body(&ctx, "@top.f"),
            vec!["b = (a + 1)", "e = a", "ret ((b * 2) + e)"]
        );
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        assert!(!f.borrow().has_sym(Id::new("c")));
    }

    #[test]
    fn idempotent() {
        let mut ctx = context(SCALAR_SRC);
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        let once = body(&ctx, "@top.f");
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(body(&ctx, "@top.f"), once);
    }

    #[test]
    fn field_reference() {
        let src = r#"
scope @top [namespace] {}
scope @top.P [class] {
  sym x: int32 [field];
}
scope @top.M [class, module] {
  sym p: object<@top.P> [field];
}
scope @top.M.w [method, worker] {
  sym self: object<@top.M> [self];
  sym q: object<@top.P>;
  block b0 entry exit {
    q = self.p;
    y = q.x;
    ret y;
  }
}
"#;
        let mut ctx = context(src);
        CopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(body(&ctx, "@top.M.w").len(), 3);
        ObjCopyOpt::do_pass_default(&mut ctx).unwrap();
        assert_eq!(body(&ctx, "@top.M.w"), vec!["y = self.p.x", "ret y"]);
    }
}
