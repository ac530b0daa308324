use crate::analysis::{DominatorTree, build_loop_tree, loop_info};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{Context, LoopTree, Scope};

/// Builds the loop region tree of every scope with a body and records
/// the counter, bounds and trip count of each loop.
#[derive(Default)]
pub struct LoopDetector;

impl Named for LoopDetector {
    fn name() -> &'static str {
        "loop-detector"
    }

    fn description() -> &'static str {
        "build the loop region tree and recognize loop counters"
    }
}

/// The loop tree of `scope` with the facts of every loop filled in.
pub(crate) fn detect(scope: &Scope) -> LoopTree {
    let dom = DominatorTree::new(scope);
    let mut tree = build_loop_tree(scope, &dom);
    for r in tree.loops() {
        let info = loop_info(scope, &tree, r);
        tree.regions[r].info = info;
    }
    tree
}

impl Visitor for LoopDetector {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        if scope.has_body() {
            let tree = detect(scope);
            for r in tree.loops() {
                let region = &tree.regions[r];
                log::debug!(
                    "{}: loop at {:?} over {} blocks, {} trips",
                    scope.name,
                    region.head,
                    region.blocks.len(),
                    region
                        .info
                        .trip_count
                        .map_or_else(|| "unknown".to_string(), |n| n.to_string())
                );
            }
            scope.loop_tree = Some(tree);
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{BlockIdx, Config, Id, from_ast::ast_to_ir};

    #[test]
    fn nested_loops() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  block b0 entry {
    i#0 = 0;
    jump b1;
  }
  block b1 preds(b0, b4) {
    i#1 = lphi(i#0, i#2);
    @t#0 = (i#1 < 4);
    cjump @t#0 ? b2 : b5;
  }
  block b2 preds(b1, b3) {
    j#1 = lphi(0, j#2);
    @t#1 = (j#1 < 8);
    cjump @t#1 ? b3 : b4;
  }
  block b3 preds(b2) {
    j#2 = (j#1 + 2);
    jump b2 loop;
  }
  block b4 preds(b2) {
    i#2 = (i#1 + 1);
    jump b1 loop;
  }
  block b5 exit preds(b1) {
    ret None;
  }
}
"#;
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        LoopDetector::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        let tree = f.loop_tree.as_ref().unwrap();
        let loops = tree.loops();
        assert_eq!(loops.len(), 2);
        let (outer, inner) = (&tree.regions[loops[0]], &tree.regions[loops[1]]);
        assert_eq!(outer.head, Some(BlockIdx(1)));
        assert_eq!(inner.head, Some(BlockIdx(2)));
        assert_eq!(outer.info.trip_count, Some(4));
        assert_eq!(inner.info.trip_count, Some(4));
        assert_eq!(inner.info.exits, vec![BlockIdx(4)]);
    }
}
