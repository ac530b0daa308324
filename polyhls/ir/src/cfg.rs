//! Editing helpers for the block graph of a scope.
//!
//! Every helper keeps the `preds`/`succs` lists of both endpoints in sync
//! and keeps phi arguments aligned with `preds`.
use crate::{BlockIdx, Expr, JumpKind, Scope, StmKind};
use polyhls_utils::Loc;
use std::collections::BTreeSet;

/// Add the edge `from -> to`. The phi arguments of `to` are extended with
/// `None` placeholders.
pub fn connect(scope: &mut Scope, from: BlockIdx, to: BlockIdx) {
    if !scope.blocks[from].succs.contains(&to) {
        scope.blocks[from].succs.push(to);
    }
    if !scope.blocks[to].preds.contains(&from) {
        scope.blocks[to].preds.push(from);
        for stm in scope.blocks[to].stms.iter_mut() {
            if let Some(phi) = stm.as_phi_mut() {
                phi.args.push(Expr::none());
                if !phi.ps.is_empty() {
                    phi.ps.push(Expr::bool(false));
                }
            }
        }
    }
}

/// Remove the edge `from -> to`, dropping the matching phi arguments.
pub fn disconnect(scope: &mut Scope, from: BlockIdx, to: BlockIdx) {
    scope.blocks[from].succs.retain(|s| *s != to);
    scope.blocks[from].succs_loop.retain(|s| *s != to);
    let target = &mut scope.blocks[to];
    if let Some(pos) = target.pred_pos(from) {
        target.preds.remove(pos);
        for stm in target.stms.iter_mut() {
            if let Some(phi) = stm.as_phi_mut() {
                phi.remove_arg(pos);
            }
        }
    }
    target.preds_loop.retain(|p| *p != from);
}

/// Redirect the edge `from -> old` to `from -> new`, keeping the jump
/// statement of `from` consistent. The predecessor slot of `from` in `new`
/// is appended.
pub fn retarget(scope: &mut Scope, from: BlockIdx, old: BlockIdx, new: BlockIdx) {
    if let Some(term) = scope.blocks[from].terminator_mut() {
        term.replace_target(old, new);
    }
    disconnect(scope, from, old);
    connect(scope, from, new);
}

/// Replace `old` by `new` as a predecessor of `blk` without moving the
/// slot, so that phi arguments stay in place.
pub fn replace_pred(scope: &mut Scope, blk: BlockIdx, old: BlockIdx, new: BlockIdx) {
    for p in scope.blocks[blk].preds.iter_mut() {
        if *p == old {
            *p = new;
        }
    }
    for p in scope.blocks[blk].preds_loop.iter_mut() {
        if *p == old {
            *p = new;
        }
    }
}

/// Recompute `preds_loop`/`succs_loop` by a depth first search from the
/// entry: an edge to a block on the DFS stack is a back edge.
pub fn mark_back_edges(scope: &mut Scope) {
    for (_, b) in scope.blocks.iter_mut() {
        b.preds_loop.clear();
        b.succs_loop.clear();
    }
    let Some(entry) = scope.entry else {
        return;
    };
    let mut back = vec![];
    let mut visited = BTreeSet::new();
    let mut on_stack = BTreeSet::new();
    // (block, next successor index)
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    on_stack.insert(entry);
    while let Some((blk, i)) = stack.pop() {
        let succs = &scope.blocks[blk].succs;
        if i < succs.len() {
            let s = succs[i];
            stack.push((blk, i + 1));
            if on_stack.contains(&s) {
                back.push((blk, s));
            } else if visited.insert(s) {
                on_stack.insert(s);
                stack.push((s, 0));
            }
        } else {
            on_stack.remove(&blk);
        }
    }
    for (from, to) in back {
        scope.blocks[from].succs_loop.push(to);
        scope.blocks[to].preds_loop.push(from);
    }
}

/// Blocks reachable from the entry.
pub fn reachable(scope: &Scope) -> BTreeSet<BlockIdx> {
    let mut seen = BTreeSet::new();
    let Some(entry) = scope.entry else {
        return seen;
    };
    let mut work = vec![entry];
    while let Some(b) = work.pop() {
        if seen.insert(b) {
            work.extend(scope.blocks[b].succs.iter().copied());
        }
    }
    seen
}

/// Live blocks in reverse post-order over forward edges. Every block comes
/// after all of its forward predecessors. Successors are explored last to
/// first, so the taken side of a branch (a loop body) directly follows the
/// branching block.
pub fn topo_order(scope: &Scope) -> Vec<BlockIdx> {
    let Some(entry) = scope.entry else {
        return vec![];
    };
    let mut post = vec![];
    let mut visited = BTreeSet::new();
    let mut stack = vec![(entry, 0usize)];
    visited.insert(entry);
    while let Some((blk, i)) = stack.pop() {
        let succs: Vec<BlockIdx> = scope.blocks[blk].fwd_succs().collect();
        if i < succs.len() {
            stack.push((blk, i + 1));
            let s = succs[succs.len() - 1 - i];
            if visited.insert(s) {
                stack.push((s, 0));
            }
        } else {
            post.push(blk);
        }
    }
    post.reverse();
    post
}

/// Tombstone every block that cannot be reached from the entry and drop
/// its outgoing edges. Returns the removed blocks.
pub fn remove_unreachable(scope: &mut Scope) -> Vec<BlockIdx> {
    let live = reachable(scope);
    let dead: Vec<BlockIdx> = scope
        .live_blocks()
        .into_iter()
        .filter(|b| !live.contains(b))
        .collect();
    for &b in &dead {
        for s in scope.blocks[b].succs.clone() {
            disconnect(scope, b, s);
        }
        for p in scope.blocks[b].preds.clone() {
            disconnect(scope, p, b);
        }
        scope.blocks[b].removed = true;
    }
    if scope.exit.is_some_and(|e| dead.contains(&e)) {
        scope.exit = None;
    }
    if !dead.is_empty() {
        scope.invalidate();
    }
    dead
}

/// Split `blk` before statement `at`. Statements from `at` on move to a new
/// block which inherits the successors; `blk` ends up without a terminator
/// and without successors. Returns the new block.
pub fn split_block(scope: &mut Scope, blk: BlockIdx, at: usize) -> BlockIdx {
    let late = scope.new_block();
    let tail = scope.blocks[blk].stms.split_off(at);
    scope.blocks[late].stms = tail;
    scope.blocks[late].synth_params = scope.blocks[blk].synth_params;
    let succs = std::mem::take(&mut scope.blocks[blk].succs);
    let succs_loop = std::mem::take(&mut scope.blocks[blk].succs_loop);
    for s in &succs {
        replace_pred(scope, *s, blk, late);
    }
    scope.blocks[late].succs = succs;
    scope.blocks[late].succs_loop = succs_loop;
    if scope.exit == Some(blk) {
        scope.exit = Some(late);
    }
    scope.invalidate();
    late
}

/// Append an unconditional jump `from -> to` and connect the edge.
pub fn add_jump(scope: &mut Scope, from: BlockIdx, to: BlockIdx, kind: JumpKind) {
    let jump = scope.mk_stm(StmKind::Jump { target: to, kind }, Loc::unknown());
    scope.blocks[from].stms.push(jump);
    connect(scope, from, to);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScopeTags;
    use polyhls_utils::Id;

    /// b0 -> b1 -> b2 -> b1, b1 -> b3
    fn loop_scope() -> Scope {
        let mut s = Scope::new(Id::new("@top.f"), ScopeTags::FUNCTION);
        let b: Vec<BlockIdx> = (0..4).map(|_| s.new_block()).collect();
        s.entry = Some(b[0]);
        s.exit = Some(b[3]);
        add_jump(&mut s, b[0], b[1], JumpKind::Plain);
        let cj = s.mk_stm(
            StmKind::CJump {
                cond: Expr::temp("c"),
                t: b[2],
                f: b[3],
            },
            Loc::unknown(),
        );
        s.blocks[b[1]].stms.push(cj);
        connect(&mut s, b[1], b[2]);
        connect(&mut s, b[1], b[3]);
        add_jump(&mut s, b[2], b[1], JumpKind::Loop);
        s
    }

    #[test]
    fn back_edges_and_order() {
        let mut s = loop_scope();
        mark_back_edges(&mut s);
        assert_eq!(s.blocks[BlockIdx(1)].preds_loop, vec![BlockIdx(2)]);
        assert_eq!(s.blocks[BlockIdx(2)].succs_loop, vec![BlockIdx(1)]);
        let order = topo_order(&s);
        assert_eq!(order[0], BlockIdx(0));
        assert_eq!(order[1], BlockIdx(1));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn disconnect_drops_phi_arg() {
        let mut s = loop_scope();
        let phi = s.mk_stm(
            StmKind::Phi(crate::Phi::new(
                crate::PhiKind::Phi,
                Expr::temp("x"),
                vec![Expr::int(0), Expr::int(1)],
            )),
            Loc::unknown(),
        );
        s.blocks[BlockIdx(1)].stms.insert(0, phi);
        disconnect(&mut s, BlockIdx(0), BlockIdx(1));
        let args = &s.blocks[BlockIdx(1)].stms[0].as_phi().unwrap().args;
        assert_eq!(args, &vec![Expr::int(1)]);
        let dead = remove_unreachable(&mut s);
        assert_eq!(dead.len(), 3);
    }

    #[test]
    fn split_moves_successors() {
        let mut s = loop_scope();
        let late = split_block(&mut s, BlockIdx(1), 0);
        assert!(s.blocks[BlockIdx(1)].succs.is_empty());
        assert_eq!(s.blocks[late].succs, vec![BlockIdx(2), BlockIdx(3)]);
        assert_eq!(s.blocks[BlockIdx(3)].preds, vec![late]);
    }
}
