use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{Context, Expr, Id, Scope, StmId, StmKind, SymTags, UseDefTable};
use std::collections::HashSet;

/// Removes moves and phis whose result is never read.
#[derive(Default)]
pub struct DeadCodeEliminator;

impl Named for DeadCodeEliminator {
    fn name() -> &'static str {
        "dead-code-eliminator"
    }

    fn description() -> &'static str {
        "remove definitions that are never used"
    }
}

const KEEP: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::FREE)
    .union(SymTags::FIELD)
    .union(SymTags::STATIC)
    .union(SymTags::SELF)
    .union(SymTags::REGISTER)
    .union(SymTags::CONDITION)
    .union(SymTags::IMPORTED)
    .union(SymTags::BUILTIN)
    .union(SymTags::PREDEFINED);

/// Symbols read by the path conditions of blocks.
fn path_syms(scope: &Scope) -> HashSet<Id> {
    let mut out = HashSet::new();
    for blk in scope.live_blocks() {
        if let Some(p) = &scope.block(blk).path_exp {
            out.extend(p.refs().into_iter().map(|q| q[0]));
        }
    }
    out
}

fn dead_stms(scope: &Scope) -> Vec<(StmId, Id)> {
    let ud = UseDefTable::build(scope);
    let in_paths = path_syms(scope);
    let mut out = vec![];
    for (_, stm) in scope.all_stms() {
        let dst = match &stm.kind {
            StmKind::Move {
                dst: Expr::Temp(d), ..
            } => *d,
            StmKind::Phi(phi) => match phi.var.as_temp() {
                Some(d) => d,
                None => continue,
            },
            _ => continue,
        };
        let Some(sym) = scope.sym(dst) else { continue };
        if sym.tags.intersects(KEEP) || in_paths.contains(&dst) || stm.has_side_effect() {
            continue;
        }
        let readers = ud.uses(dst);
        if readers.iter().all(|u| *u == stm.id) && ud.type_users(dst).is_empty() {
            out.push((stm.id, dst));
        }
    }
    out
}

impl Visitor for DeadCodeEliminator {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let mut changed = false;
        loop {
            let dead = dead_stms(scope);
            if dead.is_empty() {
                break;
            }
            let ids: HashSet<StmId> = dead.iter().map(|(id, _)| *id).collect();
            for blk in scope.live_blocks() {
                scope.block_mut(blk).stms.retain(|s| !ids.contains(&s.id));
            }
            let ud = UseDefTable::build(scope);
            for (_, sym) in dead {
                if ud.defs(sym).is_empty() && !ud.is_used(sym) {
                    log::debug!("{}: {sym} is dead", scope.name);
                    scope.del_sym(sym);
                }
            }
            changed = true;
        }
        if changed {
            scope.invalidate();
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32;
  sym t: int32;
  sym u: int32;
  sym w: int32;
  block b0 entry exit {
    t = (a + 1);
    u = (t * 2);
    w = (a + 3);
    syscall print(a);
    ret w;
  }
}
"#;

    fn run(ctx: &mut Context) -> Vec<String> {
        DeadCodeEliminator::do_pass_default(ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        f.all_stms().map(|(_, s)| s.to_string()).collect()
    }

    #[test]
    fn unused_chain_removed() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let out = run(&mut ctx);
        assert_eq!(out, vec!["w = (a + 3)", "syscall print(a)", "ret w"]);
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        assert!(!rc.borrow().has_sym(Id::new("t")));
    }

    #[test]
    fn idempotent() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let once = run(&mut ctx);
        assert_eq!(run(&mut ctx), once);
    }
}
