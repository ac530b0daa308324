use crate::analysis::path_exp::path_conds;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{Context, Scope};

/// Records on every block the condition under which it is reached from
/// the entry of its scope. Unreachable blocks get no path expression.
#[derive(Default)]
pub struct PathExpTracer;

impl Named for PathExpTracer {
    fn name() -> &'static str {
        "path-exp-tracer"
    }

    fn description() -> &'static str {
        "compute the reaching condition of every block"
    }
}

impl Visitor for PathExpTracer {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        let conds = path_conds(scope);
        for blk in scope.live_blocks() {
            scope.block_mut(blk).path_exp = conds.get(&blk).map(|c| c.to_expr());
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{BlockIdx, Config, Expr, Id, from_ast::ast_to_ir};

    #[test]
    fn nested_branches() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  param d: bool;
  block b0 entry {
    cjump c ? b1 : b4;
  }
  block b1 preds(b0) {
    cjump d ? b2 : b3;
  }
  block b2 preds(b1) {
    jump b3;
  }
  block b3 preds(b1, b2) {
    jump b4;
  }
  block b4 exit preds(b0, b3) {
    ret None;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        PathExpTracer::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let path = |b: u32| f.block(BlockIdx(b)).path_exp.clone().unwrap();
        let (c, d) = (Expr::temp("c"), Expr::temp("d"));
        assert_eq!(path(0), Expr::bool(true));
        assert_eq!(path(1), c.clone());
        assert_eq!(path(2), Expr::and(c.clone(), d));
        assert_eq!(path(3), c);
        assert_eq!(path(4), Expr::bool(true));
    }
}
