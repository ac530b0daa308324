use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{Context, Expr, Id, Scope, StmKind, SymTags, UseDefTable};
use std::collections::BTreeSet;

/// Marks the temporaries that can be wires instead of registers: branch
/// conditions, and combinational values read once in the block that
/// computes them.
#[derive(Default)]
pub struct AliasVarDetector;

impl Named for AliasVarDetector {
    fn name() -> &'static str {
        "alias-var-detector"
    }

    fn description() -> &'static str {
        "mark conditions and single-use combinational temporaries as wires"
    }
}

const NEVER_ALIAS: SymTags = SymTags::PARAM
    .union(SymTags::RETURN)
    .union(SymTags::FREE)
    .union(SymTags::FIELD)
    .union(SymTags::STATIC)
    .union(SymTags::SELF)
    .union(SymTags::REGISTER)
    .union(SymTags::INDUCTION)
    .union(SymTags::IMPORTED)
    .union(SymTags::BUILTIN);

/// Can `e` be computed by logic without state?
fn is_combinational(e: &Expr) -> bool {
    let mut ok = true;
    e.walk(&mut |x| {
        ok &= !x.is_call_like()
            && !matches!(x, Expr::Mref(..) | Expr::Mstore(..) | Expr::Array { .. });
    });
    ok
}

fn conditions(scope: &Scope) -> BTreeSet<Id> {
    let mut out = BTreeSet::new();
    for blk in scope.live_blocks() {
        match scope.block(blk).terminator().map(|t| &t.kind) {
            Some(StmKind::CJump { cond, .. }) => out.extend(cond.as_temp()),
            Some(StmKind::MCJump { conds, .. }) => {
                out.extend(conds.iter().filter_map(Expr::as_temp))
            }
            _ => {}
        }
    }
    out
}

/// The single combinational `MOVE` defining `sym`, with its block.
fn wire_def(scope: &Scope, ud: &UseDefTable, sym: Id) -> bool {
    let [def] = ud.defs(sym)[..] else {
        return false;
    };
    matches!(
        scope.stm(def).map(|s| &s.kind),
        Some(StmKind::Move { src, .. }) if is_combinational(src)
    )
}

impl Visitor for AliasVarDetector {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        if !scope.has_body() {
            return Ok(Action::SkipChildren);
        }
        let ud = UseDefTable::build(scope);
        let candidate = |scope: &Scope, sym: Id| {
            scope
                .sym(sym)
                .is_some_and(|s| !s.tags.intersects(NEVER_ALIAS) && s.typ.is_scalar())
        };

        let mut marks: Vec<(Id, SymTags)> = vec![];
        for c in conditions(scope) {
            if !candidate(scope, c) {
                continue;
            }
            let mut tags = SymTags::CONDITION;
            if wire_def(scope, &ud, c) {
                tags |= SymTags::ALIAS;
            }
            marks.push((c, tags));
        }

        for (blk, stm) in scope.all_stms() {
            let Some(d) = stm.def_sym() else { continue };
            if !candidate(scope, d)
                || !scope.sym(d).is_some_and(|s| s.is_temp())
                || !wire_def(scope, &ud, d)
            {
                continue;
            }
            let [user] = ud.uses(d)[..] else { continue };
            let same_block = ud.block_of(user) == Some(blk);
            let by_phi = scope.stm(user).is_some_and(|u| u.is_phi());
            if same_block && !by_phi {
                marks.push((d, SymTags::ALIAS));
            }
        }

        let name = scope.name;
        for (sym, tags) in marks {
            if let Some(s) = scope.sym_mut(sym) {
                if !s.tags.contains(tags) {
                    log::debug!("{name}: {sym} marked {}", tags.names().join(", "));
                }
                s.tags |= tags;
            }
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    #[test]
    fn wires_and_registers() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32;
  param m: list<int32>[4];
  sym @t#0: bool [temp];
  sym @t#1: int32 [temp];
  sym @t#2: int32 [temp];
  sym @t#3: int32 [temp];
  sym @t#4: int32 [temp];
  block b0 entry {
    @t#0 = (a < 3);
    @t#1 = (a + 1);
    @t#2 = m[a];
    @t#3 = (@t#1 * 2);
    @t#4 = (@t#3 + @t#2);
    cjump @t#0 ? b1 : b2;
  }
  block b1 preds(b0) {
    x#1 = @t#4;
    jump b3;
  }
  block b2 preds(b0) {
    x#2 = 0;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    x#3 = phi(x#1, x#2);
    ret x#3;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        AliasVarDetector::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let tags = |n: &str| f.sym(Id::new(n)).unwrap().tags;
        assert!(tags("@t#0").contains(SymTags::CONDITION | SymTags::ALIAS));
        assert!(tags("@t#1").contains(SymTags::ALIAS));
        assert!(!tags("@t#2").contains(SymTags::ALIAS));
        assert!(tags("@t#3").contains(SymTags::ALIAS));
        assert!(!tags("@t#4").contains(SymTags::ALIAS));
        assert!(!tags("x#1").contains(SymTags::ALIAS));
    }
}
