use crate::analysis::TypeEval;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Context, Expr, Id, Scope, StmKind, SymTags, Type, TypeKind, builtins,
};
use polyhls_utils::HlsResult;

/// Replaces field accesses through the sub-objects of a module object by a
/// single field of the module: `self.sub.x` becomes `self.sub_x` and the
/// module class gains the field `sub_x`. Accesses whose root is not a
/// module object stay dotted, as do method references.
#[derive(Default)]
pub struct FlattenFieldAccess;

impl Named for FlattenFieldAccess {
    fn name() -> &'static str {
        "flatten-field-access"
    }

    fn description() -> &'static str {
        "flatten sub-object fields of modules into module fields"
    }
}

/// A field to add to a module class.
struct NewField {
    module: Id,
    name: Id,
    typ: Type,
}

fn is_module(ctx: &Context, class: Id) -> bool {
    ctx.get_scope(class)
        .is_some_and(|c| c.try_borrow().is_ok_and(|c| c.is_module()))
}

/// Flatten the access chain `e` if it starts at a module object.
fn flatten_chain(e: &Expr, ctx: &Context, scope: &Scope) -> Option<(Expr, NewField)> {
    let mut fields = vec![];
    let mut root = e;
    while let Expr::Attr(base, f) = root {
        fields.push(*f);
        root = base;
    }
    if fields.len() < 2 {
        return None;
    }
    fields.reverse();
    let TypeKind::Object { scope: module } = TypeEval::new(ctx, scope).of(root).kind else {
        return None;
    };
    if !is_module(ctx, module) {
        return None;
    }
    let mut class = module;
    let mut typ = Type::undef();
    for (i, f) in fields.iter().enumerate() {
        let sym = ctx.class_field(class, *f)?;
        if i + 1 < fields.len() {
            let TypeKind::Object { scope } = sym.typ.kind else {
                return None;
            };
            class = scope;
        } else if sym.typ.is_function() {
            return None;
        } else {
            typ = sym.typ;
        }
    }
    let name = Id::new(fields.iter().map(|f| f.as_ref()).collect::<Vec<_>>().join("_"));
    Some((
        Expr::Attr(Box::new(root.clone()), name),
        NewField { module, name, typ },
    ))
}

fn flatten_expr(e: &mut Expr, ctx: &Context, scope: &Scope, out: &mut Vec<NewField>) -> bool {
    if let Some((flat, field)) = flatten_chain(e, ctx, scope) {
        *e = flat;
        out.push(field);
        return true;
    }
    let mut changed = false;
    for k in e.kids_mut() {
        changed |= flatten_expr(k, ctx, scope, out);
    }
    changed
}

fn add_fields(ctx: &Context, fields: Vec<NewField>) -> HlsResult<()> {
    for f in fields {
        let rc = ctx.scope(f.module)?;
        let mut module = rc.borrow_mut();
        if !module.has_sym(f.name) {
            log::debug!("{}: flattened field {}", f.module, f.name);
            module.add_sym(f.name, f.typ, SymTags::FIELD | SymTags::FLATTENED);
        }
    }
    Ok(())
}

impl Visitor for FlattenFieldAccess {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let mut fields = vec![];
        for name in ctx.user_scopes() {
            let rc = ctx.scope(name)?;
            let mut scope = rc.borrow_mut();
            if !scope.has_body() {
                continue;
            }
            let mut changed = false;
            for blk in scope.live_blocks() {
                for pos in 0..scope.block(blk).stms.len() {
                    let mut stm = scope.block(blk).stms[pos].clone();
                    let mut dirty = false;
                    for e in stm.exprs_mut() {
                        dirty |= flatten_expr(e, ctx, &scope, &mut fields);
                    }
                    if dirty {
                        scope.block_mut(blk).stms[pos] = stm;
                        changed = true;
                    }
                }
            }
            if changed {
                scope.usedef = None;
            }
        }
        add_fields(ctx, fields)?;
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
    }
}

/// Moves the workers of sub-modules into the module that owns them.
///
/// In a module constructor, `self.sub.append_worker(self.sub.f, a)`
/// clones `sub`'s method `f` into the module as `sub_f`, where the copy
/// accesses the flattened fields `sub_x` of the module, and the statement
/// becomes `self.append_worker(self.sub_f, a)`.
#[derive(Default)]
pub struct FlattenModule;

impl Named for FlattenModule {
    fn name() -> &'static str {
        "flatten-module"
    }

    fn description() -> &'static str {
        "move workers of sub-modules into their owning module"
    }
}

/// A worker registration of a sub-module found in a constructor.
struct SubWorker {
    blk: BlockIdx,
    pos: usize,
    /// The sub-module field.
    sub: Id,
    /// Its class.
    class: Id,
    /// The worker method of `class`.
    func: Id,
}

fn sub_attr(e: &Expr, me: Id) -> Option<(Id, Id)> {
    match e {
        Expr::Attr(base, f) => match &**base {
            Expr::Attr(root, sub) if root.as_temp() == Some(me) => Some((*sub, *f)),
            _ => None,
        },
        _ => None,
    }
}

fn sub_workers(ctx: &Context, module: Id, ctor: &Scope) -> Vec<SubWorker> {
    let Some(me) = ctor.self_sym() else {
        return vec![];
    };
    let mut out = vec![];
    for blk in ctor.live_blocks() {
        for (pos, stm) in ctor.block(blk).stms.iter().enumerate() {
            let StmKind::Expr(Expr::Call { func, args, .. }) = &stm.kind else {
                continue;
            };
            let Some((sub, method)) = sub_attr(func, me) else {
                continue;
            };
            if method != builtins::APPEND_WORKER {
                continue;
            }
            let Some((sub2, worker)) = args.first().and_then(|a| sub_attr(a, me)) else {
                continue;
            };
            let class = ctx.class_field(module, sub).and_then(|s| match s.typ.kind {
                TypeKind::Object { scope } => Some(scope),
                _ => None,
            });
            if let (true, Some(class)) = (sub == sub2, class) {
                out.push(SubWorker {
                    blk,
                    pos,
                    sub,
                    class,
                    func: worker,
                });
            }
        }
    }
    out
}

/// Rebind the copy `worker` to `module`: `self` becomes a module object and
/// its data fields are the flattened fields of `sub`.
fn rebind_worker(ctx: &Context, worker: Id, module: Id, sub: Id, class: Id) -> HlsResult<()> {
    let mut fields = vec![];
    {
        let rc = ctx.scope(worker)?;
        let mut w = rc.borrow_mut();
        let Some(me) = w.self_sym() else {
            return Ok(());
        };
        if let Some(sym) = w.sym_mut(me) {
            sym.typ = Type::object(module);
        }
        for blk in w.live_blocks() {
            for stm in w.block_mut(blk).stms.iter_mut() {
                for e in stm.exprs_mut() {
                    e.walk_mut(&mut |x| {
                        let Expr::Attr(base, f) = x else {
                            return;
                        };
                        if base.as_temp() != Some(me) {
                            return;
                        }
                        let Some(field) = ctx.class_field(class, *f) else {
                            return;
                        };
                        if field.typ.is_function() {
                            return;
                        }
                        let name = Id::new(format!("{sub}_{f}"));
                        fields.push(NewField {
                            module,
                            name,
                            typ: field.typ,
                        });
                        *f = name;
                    });
                }
            }
        }
        w.invalidate();
    }
    add_fields(ctx, fields)
}

impl Visitor for FlattenModule {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let modules: Vec<Id> = ctx
            .user_scopes()
            .into_iter()
            .filter(|m| is_module(ctx, *m))
            .collect();
        for module in modules {
            let ctor_name = module.child("__init__");
            let Some(rc) = ctx.get_scope(ctor_name) else {
                continue;
            };
            let found = sub_workers(ctx, module, &rc.borrow());
            for sw in found {
                let flat = Id::new(format!("{}_{}", sw.sub, sw.func));
                let copy = module.child(flat);
                if !ctx.has_scope(copy) {
                    ctx.clone_scope(sw.class.child(sw.func), copy)?;
                    rebind_worker(ctx, copy, module, sw.sub, sw.class)?;
                    ctx.scope(module)?
                        .borrow_mut()
                        .add_sym(flat, Type::function(copy), SymTags::empty());
                    log::debug!("moved worker {}.{} into {module}", sw.class, sw.func);
                }
                let mut ctor = rc.borrow_mut();
                let me = ctor.self_sym().unwrap_or_else(|| Id::new("self"));
                let stm = &mut ctor.block_mut(sw.blk).stms[sw.pos];
                if let StmKind::Expr(Expr::Call { func, args, .. }) = &mut stm.kind {
                    *func = Box::new(Expr::attr(Expr::Temp(me), builtins::APPEND_WORKER));
                    args[0] = Expr::attr(Expr::Temp(me), flat);
                }
                ctor.usedef = None;
            }
        }
        Ok(Action::Continue)
    }

    fn visits(&self, _scope: &Scope) -> bool {
        false
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
        let scope = rc.borrow();
        scope.all_stms().map(|(_, s)| s.to_string()).collect()
    }

    #[test]
    fn sub_object_fields() {
        let src = r#"
scope @top [namespace] {}
scope @top.S [class] {
  sym x: int32 [field];
  sym p: port<polyphony.io.Port, int8, out> [field];
}
scope @top.M [class, module] {
  sym s: object<@top.S> [field];
}
scope @top.M.w [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    v = (self.s.x + 1);
    self.s.p.wr(v);
    ret None;
  }
}
scope @top.f [function] {
  param o: object<@top.S>;
  block b0 entry exit {
    ret o.x;
  }
}
"#;
        let mut ctx = context(src);
        FlattenFieldAccess::do_pass_default(&mut ctx).unwrap();
        assert_eq!(
            body(&ctx, "@top.M.w"),
            vec!["v = (self.s_x + 1)", "self.s_p.wr(v)", "ret None"]
        );
        assert_eq!(body(&ctx, "@top.f"), vec!["ret o.x"]);
        let m = ctx.scope(Id::new("@top.M")).unwrap();
        let m = m.borrow();
        assert!(m.sym(Id::new("s_x")).unwrap().tags.contains(SymTags::FLATTENED));
        assert!(m.sym(Id::new("s_p")).unwrap().typ.is_port());
    }

    #[test]
    fn sub_module_worker() {
        let src = r#"
scope @top [namespace] {}
scope @top.S [class, module] {
  sym p: port<polyphony.io.Port, int8, out> [field];
  sym f: function<@top.S.f>;
}
scope @top.S.f [method, worker] {
  param n: int32;
  sym self: object<@top.S> [self];
  block b0 entry exit {
    self.p.wr(n);
    ret None;
  }
}
scope @top.M [class, module] {
  sym s: object<@top.S> [field];
}
scope @top.M.__init__ [method, ctor] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    self.s.append_worker(self.s.f, 1);
    ret None;
  }
}
"#;
        let mut ctx = context(src);
        FlattenModule::do_pass_default(&mut ctx).unwrap();
        assert_eq!(
            body(&ctx, "@top.M.__init__"),
            vec!["self.append_worker(self.s_f, 1)", "ret None"]
        );
        assert_eq!(body(&ctx, "@top.M.s_f"), vec!["self.s_p.wr(n)", "ret None"]);
        let w = ctx.scope(Id::new("@top.M.s_f")).unwrap();
        let me = w.borrow().sym(Id::new("self")).unwrap().typ.clone();
        assert_eq!(me, Type::object(Id::new("@top.M")));
        let m = ctx.scope(Id::new("@top.M")).unwrap();
        assert!(m.borrow().has_sym(Id::new("s_p")));
        assert!(m.borrow().sym(Id::new("s_f")).unwrap().typ.is_function());
    }
}
