use super::TypePropagation;
use crate::analysis::CallGraph;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    BlockIdx, Context, Expr, Id, JumpKind, Rewriter, Scope, ScopeTags, StmKind, SymTags, Symbol,
    builtins, cfg,
};
use polyhls_utils::{HlsResult, Loc};
use std::collections::HashMap;

/// Upper bound on the call sites inlined into one scope.
const MAX_SITES: usize = 4096;

/// Copies the body of called functions, methods and constructors into their
/// callers.
///
/// Callers are processed callees first, so a callee is already flat when it
/// gets copied. A call site `d = f(a)` splits its block: the statements
/// before the call jump into a renamed copy of the callee's blocks, and the
/// copy's `ret` jumps to the statements after the call, which start with
/// `d = f_return#N`. A constructor call `d = new C(a)` is kept as
/// `d = syscall $new(C)` and followed by the copy of `C.__init__` with
/// `self` bound to `d`.
///
/// Not inlined: testbenches and their calls, library and pure functions,
/// workers, recursive functions and, unless `perfect_inlining` is set,
/// constructors of modules.
#[derive(Default)]
pub struct Inliner;

impl Named for Inliner {
    fn name() -> &'static str {
        "inliner"
    }

    fn description() -> &'static str {
        "inline calls of functions, methods and constructors"
    }
}

/// A call that is going to be inlined.
struct Site {
    blk: BlockIdx,
    pos: usize,
    callee: Id,
    /// Destination of the call's value.
    dst: Option<Expr>,
    /// What `self` of the callee is bound to.
    receiver: Option<Expr>,
    args: Vec<Expr>,
    kwargs: Vec<(Id, Expr)>,
    /// Class of an inlined constructor.
    class: Option<Id>,
    loc: Loc,
}

fn should_inline(ctx: &Context, cg: &CallGraph, callee: Id) -> bool {
    let Some(rc) = ctx.get_scope(callee) else {
        return false;
    };
    let Ok(c) = rc.try_borrow() else {
        return false;
    };
    if !c.has_body() || !c.is_function_like() || c.is_testbench() || c.is_worker() {
        return false;
    }
    if c.is_pure() && ctx.config.enable_pure {
        return false;
    }
    if c.is_ctor() {
        let module = c
            .parent
            .and_then(|p| ctx.get_scope(p))
            .is_some_and(|p| p.try_borrow().is_ok_and(|p| p.is_module()));
        if module && !ctx.config.perfect_inlining {
            return false;
        }
    }
    !cg.is_recursive(callee)
}

/// The first call site of `caller` worth inlining.
fn find_site(ctx: &Context, cg: &CallGraph, caller: &Scope) -> Option<Site> {
    for blk in caller.live_blocks() {
        for (pos, stm) in caller.block(blk).stms.iter().enumerate() {
            let (dst, call) = match &stm.kind {
                StmKind::Move { dst, src } => (Some(dst), src),
                StmKind::Expr(e) => (None, e),
                _ => continue,
            };
            let site = |callee, receiver, args: &Vec<Expr>, kwargs: &Vec<(Id, Expr)>, class| Site {
                blk,
                pos,
                callee,
                dst: dst.cloned(),
                receiver,
                args: args.clone(),
                kwargs: kwargs.clone(),
                class,
                loc: stm.loc,
            };
            match call {
                Expr::Call { func, args, kwargs } => {
                    let Some(callee) = ctx.callee_of(caller, func) else {
                        continue;
                    };
                    if callee == caller.name || !should_inline(ctx, cg, callee) {
                        continue;
                    }
                    let receiver = match &**func {
                        Expr::Attr(obj, _) => Some((**obj).clone()),
                        _ => None,
                    };
                    return Some(site(callee, receiver, args, kwargs, None));
                }
                Expr::New { class, args, kwargs } => {
                    let Some(dst) = dst else {
                        continue;
                    };
                    let ctor = class.child("__init__");
                    if builtins::is_port_class(*class) || !should_inline(ctx, cg, ctor) {
                        continue;
                    }
                    return Some(site(ctor, Some(dst.clone()), args, kwargs, Some(*class)));
                }
                _ => {}
            }
        }
    }
    None
}

/// Prefix of the symbols copied out of `callee`.
fn copy_prefix(callee: Id, sym: Id) -> Id {
    let base = if callee.base() == "__init__" {
        callee.parent().map(|p| p.base()).unwrap_or("ctor")
    } else {
        callee.base()
    };
    Id::new(format!("{base}_{}", sym.root().as_ref().trim_start_matches('@')))
}

/// Resolve `name` in the scopes enclosing `from`. The caller is mutably
/// borrowed while it is edited, so it is consulted directly.
fn lookup_outer(ctx: &Context, from: &Scope, name: Id, caller: &Scope) -> Option<Symbol> {
    let mut cur = from.parent;
    while let Some(p) = cur {
        if p == caller.name {
            if let Some(sym) = caller.sym(name) {
                return Some(sym.clone());
            }
            cur = caller.parent;
            continue;
        }
        let rc = ctx.get_scope(p)?;
        let scope = rc.try_borrow().ok()?;
        if !scope.is_class() {
            if let Some(sym) = scope.sym(name) {
                return Some(sym.clone());
            }
        }
        cur = scope.parent;
    }
    None
}

/// Names used by the callee that are neither its own symbols nor visible
/// from the caller.
fn free_symbols(ctx: &Context, caller: &Scope, callee: &Scope) -> Vec<Symbol> {
    let mut out: Vec<Symbol> = vec![];
    for (_, stm) in callee.all_stms() {
        for q in stm.use_qsyms().into_iter().chain(stm.def_qsym()) {
            let n = q[0];
            if callee.has_sym(n) || out.iter().any(|s| s.name == n) {
                continue;
            }
            if ctx.lookup_sym(caller, n).is_some() {
                continue;
            }
            if let Some(sym) = lookup_outer(ctx, callee, n, caller) {
                out.push(sym);
            }
        }
    }
    out
}

fn inline_site(ctx: &Context, caller: &mut Scope, site: Site) -> HlsResult<()> {
    let rc = ctx.scope(site.callee)?;
    let callee = rc.borrow().clone();
    let imports = free_symbols(ctx, caller, &callee);
    log::debug!("inlining {} into {}", site.callee, caller.name);

    // Bindings of the callee's symbols in the caller.
    let defined: Vec<Id> = callee
        .all_stms()
        .filter_map(|(_, s)| s.def_sym())
        .collect();
    let mut temps: HashMap<Id, Expr> = HashMap::new();
    let mut param_moves = vec![];
    for (i, p) in callee.params.iter().enumerate() {
        let arg = site
            .args
            .get(i)
            .cloned()
            .or_else(|| site.kwargs.iter().find(|(k, _)| *k == p.sym).map(|(_, v)| v.clone()))
            .or_else(|| p.default.clone())
            .unwrap_or_else(Expr::none);
        if defined.contains(&p.sym) {
            let typ = callee.sym(p.sym).map(|s| s.typ.clone()).unwrap_or_default();
            let fresh = caller.gen_sym(copy_prefix(site.callee, p.sym), typ, SymTags::empty());
            param_moves.push(StmKind::Move {
                dst: Expr::Temp(fresh),
                src: arg,
            });
            temps.insert(p.sym, Expr::Temp(fresh));
        } else {
            temps.insert(p.sym, arg);
        }
    }
    if let (Some(me), Some(recv)) = (callee.self_sym(), &site.receiver) {
        temps.insert(me, recv.clone());
    }
    let ret_sym = callee.return_sym();
    for sym in callee.symbols.values() {
        if temps.contains_key(&sym.name) {
            continue;
        }
        let tags = sym.tags - (SymTags::PARAM | SymTags::RETURN | SymTags::SELF);
        let fresh = caller.gen_sym(copy_prefix(site.callee, sym.name), sym.typ.clone(), tags);
        temps.insert(sym.name, Expr::Temp(fresh));
    }
    // Every `ret e` of the callee stores `e` here.
    let ret_value = match ret_sym.and_then(|r| temps.get(&r)) {
        Some(v) => Some(v.clone()),
        None if site.dst.is_some() && site.class.is_none() => {
            let prefix = copy_prefix(site.callee, Id::new("@return"));
            let typ = callee.return_type.clone();
            Some(Expr::Temp(caller.gen_sym(prefix, typ, SymTags::empty())))
        }
        None => None,
    };

    // Split the host block around the call.
    let late = cfg::split_block(caller, site.blk, site.pos + 1);
    caller.block_mut(site.blk).stms.pop();
    if let (Some(class), Some(dst)) = (site.class, &site.dst) {
        let new = caller.mk_stm(
            StmKind::Move {
                dst: dst.clone(),
                src: Expr::Syscall {
                    name: Id::new(builtins::NEW),
                    args: vec![Expr::Temp(Id::new(class.base()))],
                    kwargs: vec![],
                },
            },
            site.loc,
        );
        caller.block_mut(site.blk).stms.push(new);
    }
    for kind in param_moves {
        let stm = caller.mk_stm(kind, site.loc);
        caller.block_mut(site.blk).stms.push(stm);
    }
    if site.class.is_none() {
        if let (Some(dst), Some(value)) = (&site.dst, &ret_value) {
            let mv = caller.mk_stm(
                StmKind::Move {
                    dst: dst.clone(),
                    src: value.clone(),
                },
                site.loc,
            );
            caller.block_mut(late).stms.insert(0, mv);
        }
    }

    // Copy the callee's blocks.
    let live = callee.live_blocks();
    let blocks: HashMap<BlockIdx, BlockIdx> =
        live.iter().map(|b| (*b, caller.new_block())).collect();
    let rw = Rewriter::new(temps, blocks);
    let mut exits = vec![];
    for &b in &live {
        let src = callee.block(b);
        let nb = rw.rewrite_block(b);
        let mut stms = Vec::with_capacity(src.stms.len());
        for stm in &src.stms {
            let mut stm = caller.renumber(stm.clone());
            rw.rewrite_stm(&mut stm);
            if let StmKind::Ret(e) = &stm.kind {
                if let Some(value) = &ret_value {
                    if e != value && *e != Expr::none() {
                        let mv = caller.mk_stm(
                            StmKind::Move {
                                dst: value.clone(),
                                src: e.clone(),
                            },
                            stm.loc,
                        );
                        stms.push(mv);
                    }
                }
                exits.push(nb);
                continue;
            }
            stms.push(stm);
        }
        let dst = caller.block_mut(nb);
        dst.stms = stms;
        dst.preds = src.preds.iter().map(|p| rw.rewrite_block(*p)).collect();
        dst.succs = src.succs.iter().map(|s| rw.rewrite_block(*s)).collect();
        dst.preds_loop = src.preds_loop.iter().map(|p| rw.rewrite_block(*p)).collect();
        dst.succs_loop = src.succs_loop.iter().map(|s| rw.rewrite_block(*s)).collect();
        dst.synth_params = src.synth_params;
    }
    let entry = rw.rewrite_block(callee.entry()?);
    cfg::add_jump(caller, site.blk, entry, JumpKind::Plain);
    for e in exits {
        cfg::add_jump(caller, e, late, JumpKind::Plain);
    }

    for sym in imports {
        caller.add_sym(sym.name, sym.typ, sym.tags | SymTags::IMPORTED);
    }
    cfg::mark_back_edges(caller);
    caller.invalidate();
    Ok(())
}

impl Visitor for Inliner {
    fn start_context(&mut self, ctx: &mut Context) -> VisResult {
        let mut inlined = 0;
        let cg = CallGraph::new(ctx);
        for name in cg.post_order() {
            let Some(rc) = ctx.get_scope(name) else {
                continue;
            };
            {
                let s = rc.borrow();
                if !s.has_body() || !s.is_function_like() || s.is_testbench() {
                    continue;
                }
            }
            let mut caller = rc.borrow_mut();
            let mut count = 0;
            while let Some(site) = find_site(ctx, &cg, &caller) {
                inline_site(ctx, &mut caller, site)?;
                count += 1;
                if count == MAX_SITES {
                    log::warn!("stopped inlining into {name} after {MAX_SITES} call sites");
                    break;
                }
            }
            if count > 0 && caller.tags.contains(ScopeTags::ENCLOSURE) {
                let callees = ctx.callees(&caller);
                if !caller.children.iter().any(|c| callees.contains(c)) {
                    caller.tags.remove(ScopeTags::ENCLOSURE);
                }
            }
            inlined += count;
        }
        if inlined > 0 {
            log::info!("inlined {inlined} call sites");
            TypePropagation.start_context(ctx)?;
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

    fn body(ctx: &Context, name: &str) -> Vec<String> {
        let rc = ctx.scope(Id::new(name)).unwrap();
        let scope = rc.borrow();
        cfg::topo_order(&scope)
            .into_iter()
            .flat_map(|b| scope.block(b).stms.iter().map(|s| s.to_string()).collect::<Vec<_>>())
            .collect()
    }

    fn inline(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        Inliner::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn function_call() {
        let src = r#"
scope @top [namespace] {
  sym add: function<@top.add>;
  sym main: function<@top.main>;
}
scope @top.add [function, returnable] {
  param a: int32!;
  param b: int32!;
  return: int32!;
  sym @return: int32 [return];
  block b0 entry exit {
    @return = (a + b);
    ret @return;
  }
}
scope @top.main [function] {
  param x: int32!;
  block b0 entry exit {
    y = add(x, 3);
    z = (y * 2);
    ret z;
  }
}
"#;
        let ctx = inline(src);
        assert_eq!(
            body(&ctx, "@top.main"),
            vec![
                "jump b2",
                "add_return#0 = (x + 3)",
                "jump b1",
                "y = add_return#0",
                "z = (y * 2)",
                "ret z"
            ]
        );
        let main = ctx.scope(Id::new("@top.main")).unwrap();
        assert_eq!(main.borrow().exit, Some(BlockIdx(1)));
        assert!(!main.borrow().sym(Id::new("add_return#0")).unwrap().is_return());
    }

    #[test]
    fn constant_returns() {
        let src = r#"
scope @top [namespace] {
  sym k: function<@top.k>;
  sym j: function<@top.j>;
}
scope @top.k [function] {
  block b0 entry exit {
    ret 5;
  }
}
scope @top.j [function, returnable] {
  sym @return: int32 [return];
  block b0 entry exit {
    ret 7;
  }
}
scope @top.main [function] {
  block b0 entry exit {
    r = k();
    s = j();
    ret (r + s);
  }
}
"#;
        let ctx = inline(src);
        let out = body(&ctx, "@top.main");
        assert!(out.contains(&"k_return#0 = 5".to_string()), "{out:?}");
        assert!(out.contains(&"r = k_return#0".to_string()), "{out:?}");
        assert!(out.contains(&"j_return#0 = 7".to_string()), "{out:?}");
        assert!(out.contains(&"s = j_return#0".to_string()), "{out:?}");
    }

    #[test]
    fn constructor_and_assigned_param() {
        let src = r#"
scope @top [namespace] {
  sym C: class<@top.C>;
  sym main: function<@top.main>;
}
scope @top.C [class] {
  sym v: int32 [field];
}
scope @top.C.__init__ [method, ctor] {
  param n: int32!;
  sym self: object<@top.C> [self];
  block b0 entry exit {
    n = (n + 1);
    self.v = n;
    ret None;
  }
}
scope @top.main [function] {
  block b0 entry exit {
    c = new C(5);
    ret c.v;
  }
}
"#;
        let ctx = inline(src);
        assert_eq!(
            body(&ctx, "@top.main"),
            vec![
                "c = syscall $new(C)",
                "C_n#0 = 5",
                "jump b2",
                "C_n#0 = (C_n#0 + 1)",
                "c.v = C_n#0",
                "jump b1",
                "ret c.v"
            ]
        );
    }

    #[test]
    fn testbench_calls_stay() {
        let src = r#"
scope @top [namespace] {
  sym f: function<@top.f>;
}
scope @top.f [function] {
  block b0 entry exit {
    ret None;
  }
}
scope @top.t [function, testbench] {
  block b0 entry exit {
    f();
    ret None;
  }
}
"#;
        let ctx = inline(src);
        assert_eq!(body(&ctx, "@top.t"), vec!["f()", "ret None"]);
    }
}
