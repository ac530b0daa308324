use super::constant_opt::fold_branch;
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{BlockIdx, Context, JumpKind, Scope, StmKind, cfg};

/// Simplifies the block graph:
/// - blocks that only jump somewhere else are bypassed,
/// - a block whose single successor has no other predecessor absorbs it.
///
/// Runs after constant branches were folded and after inlining, both of
/// which leave such blocks behind.
#[derive(Default)]
pub struct BlockReducer;

impl Named for BlockReducer {
    fn name() -> &'static str {
        "block-reducer"
    }

    fn description() -> &'static str {
        "remove forwarding blocks and merge straight-line chains"
    }
}

/// The target of a block ending in a plain unconditional jump.
fn plain_jump(scope: &Scope, blk: BlockIdx) -> Option<BlockIdx> {
    match scope.block(blk).terminator()?.kind {
        StmKind::Jump {
            target,
            kind: JumpKind::Plain,
        } => Some(target),
        _ => None,
    }
}

/// Bypass `blk` if it only forwards to another block.
fn bypass(scope: &mut Scope, blk: BlockIdx) -> bool {
    if Some(blk) == scope.entry || !scope.block(blk).is_forwarding() {
        return false;
    }
    let Some(target) = plain_jump(scope, blk) else {
        return false;
    };
    if target == blk || scope.block(target).preds_loop.contains(&blk) {
        return false;
    }
    let Some(slot) = scope.block(target).pred_pos(blk) else {
        return false;
    };
    let has_phis = scope.block(target).phis().next().is_some();
    let mut changed = false;
    for p in scope.block(blk).preds.clone() {
        if scope.block(p).succs_loop.contains(&blk) {
            continue;
        }
        // Two edges from one block into a join would need distinct phi slots.
        if has_phis && scope.block(target).preds.contains(&p) {
            continue;
        }
        let carried: Vec<_> = scope
            .block(target)
            .phis()
            .filter_map(|s| s.as_phi().map(|phi| phi.args[slot].clone()))
            .collect();
        cfg::retarget(scope, p, blk, target);
        let last = scope.block(target).preds.len() - 1;
        let phis = scope
            .block_mut(target)
            .stms
            .iter_mut()
            .filter_map(|s| s.as_phi_mut());
        for (phi, arg) in phis.zip(carried) {
            phi.args[last] = arg;
        }
        fold_branch(scope, p);
        changed = true;
    }
    changed
}

/// Append the single successor of `blk` to it when `blk` is that
/// successor's only predecessor.
fn absorb_successor(scope: &mut Scope, blk: BlockIdx) -> bool {
    let Some(succ) = plain_jump(scope, blk) else {
        return false;
    };
    let s = scope.block(succ);
    if succ == blk
        || Some(succ) == scope.entry
        || s.preds != [blk]
        || s.is_loop_head()
        || s.phis().next().is_some()
        || s.synth_params != scope.block(blk).synth_params
    {
        return false;
    }
    let moved = std::mem::take(&mut scope.block_mut(succ).stms);
    let succs = std::mem::take(&mut scope.block_mut(succ).succs);
    let succs_loop = std::mem::take(&mut scope.block_mut(succ).succs_loop);
    for next in &succs {
        cfg::replace_pred(scope, *next, succ, blk);
    }
    let b = scope.block_mut(blk);
    b.stms.pop();
    b.stms.extend(moved);
    b.succs = succs;
    b.succs_loop = succs_loop;
    b.path_exp = None;
    let s = scope.block_mut(succ);
    s.preds.clear();
    s.removed = true;
    if scope.exit == Some(succ) {
        scope.exit = Some(blk);
    }
    true
}

impl Visitor for BlockReducer {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        cfg::remove_unreachable(scope);
        let mut changed = false;
        loop {
            let mut progress = false;
            for blk in scope.live_blocks() {
                if !scope.block(blk).removed {
                    progress |= bypass(scope, blk);
                }
            }
            if !cfg::remove_unreachable(scope).is_empty() {
                progress = true;
            }
            for blk in scope.live_blocks() {
                while !scope.block(blk).removed && absorb_successor(scope, blk) {
                    progress = true;
                }
            }
            if !progress {
                break;
            }
            changed = true;
        }
        if changed {
            log::debug!("{}: reduced to {} blocks", scope.name, scope.live_blocks().len());
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
    use polyhls_utils::Id;

    fn reduce(src: &str) -> Vec<(BlockIdx, Vec<String>)> {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        BlockReducer::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        f.live_blocks()
            .into_iter()
            .map(|b| (b, f.block(b).stms.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[test]
    fn chain_and_forwarding() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  param a: int32;
  block b0 entry {
    x = (a + 1);
    jump b1;
  }
  block b1 preds(b0) {
    cjump c ? b2 : b3;
  }
  block b2 preds(b1) {
    jump b4;
  }
  block b3 preds(b1) {
    x = 0;
    jump b4;
  }
  block b4 exit preds(b2, b3) {
    ret x;
  }
}
"#;
        let blocks = reduce(src);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].0, BlockIdx(0));
        assert_eq!(blocks[0].1, vec!["x = (a + 1)", "cjump c ? b4 : b3"]);
        assert_eq!(blocks[1].0, BlockIdx(3));
        assert_eq!(blocks[2].1, vec!["ret x"]);
    }

    #[test]
    fn forwarding_into_phi_keeps_argument() {
        let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x#1 = 1;
    jump b3;
  }
  block b2 preds(b0) {
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    x#2 = phi(x#1, 7);
    ret x#2;
  }
}
"#;
        let blocks = reduce(src);
        let exit = blocks.iter().find(|(b, _)| *b == BlockIdx(3)).unwrap();
        assert_eq!(exit.1[0], "x#2 = phi(x#1, 7)");
        assert!(blocks.iter().all(|(b, _)| *b != BlockIdx(2)));
    }
}
