use super::path_exp::{PathCond, path_conds};
use polyhls_ir::{BranchGraph, Scope, StmId, StmKind};

/// Collect the pairs of statements that can never execute in the same
/// pass through the scope: statements in blocks reached under
/// complementary branch conditions, and `CMOVE`/`CEXPR`s guarded by
/// complementary conditions.
pub fn build_branch_graph(scope: &Scope) -> BranchGraph {
    let blocks = path_conds(scope);
    let mut guarded: Vec<(StmId, PathCond)> = vec![];
    for (blk, stm) in scope.all_stms() {
        if stm.is_jump() {
            continue;
        }
        let Some(pc) = blocks.get(&blk) else { continue };
        let pc = match &stm.kind {
            StmKind::CMove { cond, .. } | StmKind::CExpr { cond, .. } => pc.and_lit(cond),
            _ => pc.clone(),
        };
        guarded.push((stm.id, pc));
    }
    let mut graph = BranchGraph::default();
    for (i, (a, pa)) in guarded.iter().enumerate() {
        for (b, pb) in &guarded[i + 1..] {
            if pa.is_exclusive_with(pb) {
                graph.add_exclusive(*a, *b);
            }
        }
    }
    log::debug!("{}: {} exclusive statement pairs", scope.name, graph.len());
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{BlockIdx, Config, Id, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool!;
  block b0 entry {
    x = 0;
    cmove c ? y = 1;
    cmove (!c) ? y = 2;
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x = 1;
    jump b3;
  }
  block b2 preds(b0) {
    x = 2;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    ret x;
  }
}
"#;

    #[test]
    fn branch_arms_are_exclusive() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let f = ctx.scope(Id::new("@top.f")).unwrap();
        let f = f.borrow();
        let g = build_branch_graph(&f);
        let first = |b: u32| f.block(BlockIdx(b)).stms[0].id;
        assert!(g.are_exclusive(first(1), first(2)));
        assert!(!g.are_exclusive(first(0), first(1)));
        let b0 = &f.block(BlockIdx(0)).stms;
        assert!(g.are_exclusive(b0[1].id, b0[2].id));
        assert!(g.are_exclusive(b0[1].id, first(2)));
        // Both arms of the join are reachable together with the entry.
        assert!(!g.are_exclusive(first(3), first(1)));
    }
}
