use super::loop_detector::detect;
use crate::traversal::{
    Action, ConstructVisitor, Named, ParseVal, PassOpt, VisResult, Visitor,
};
use polyhls_ir::{
    BlockIdx, Context, Expr, Id, JumpKind, LoopTree, PhiKind, RegionIdx, Scope, Stm, StmKind,
    SymTags, Type, cfg,
};
use polyhls_utils::{HlsResult, Loc};
use std::collections::HashMap;

/// Unrolls counted loops made of a head and a single body block.
///
/// A loop is unrolled when its head carries an `unroll` hint, or fully when
/// it belongs to a testbench and runs at most `full-limit` times
/// ([FULL_UNROLL_LIMIT] by default).
/// Full unrolling replaces the loop by straight-line code in the head.
/// Unrolling by a factor `k` that divides the trip count places `k` copies
/// of the body in the body block and keeps the loop.
pub struct SimpleLoopUnroll {
    full_limit: u64,
}

impl Named for SimpleLoopUnroll {
    fn name() -> &'static str {
        "simple-loop-unroll"
    }

    fn description() -> &'static str {
        "unroll simple counted loops"
    }

    fn opts() -> Vec<PassOpt> {
        vec![PassOpt::new(
            "full-limit",
            "largest trip count of a testbench loop that is fully unrolled",
            ParseVal::Num(FULL_UNROLL_LIMIT as i64),
            PassOpt::parse_num,
        )]
    }
}

impl ConstructVisitor for SimpleLoopUnroll {
    fn from(ctx: &Context) -> HlsResult<Self> {
        let opts = Self::get_opts(ctx);
        Ok(SimpleLoopUnroll {
            full_limit: opts["full-limit"].pos_num().unwrap_or(FULL_UNROLL_LIMIT),
        })
    }

    fn clear_data(&mut self) {}
}

/// Largest trip count a testbench loop is fully unrolled for by default.
pub const FULL_UNROLL_LIMIT: u64 = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Factor {
    Full,
    Partial(u64),
}

struct Candidate {
    head: BlockIdx,
    body: BlockIdx,
    pre: BlockIdx,
    exit: BlockIdx,
    trip: u64,
    factor: Factor,
}

fn candidate(scope: &Scope, tree: &LoopTree, r: RegionIdx, full_limit: u64) -> Option<Candidate> {
    let region = &tree.regions[r];
    let head = region.head?;
    if region.blocks.len() != 2 || !region.children.is_empty() {
        return None;
    }
    let body = *region.blocks.iter().find(|b| **b != head)?;
    let (h, b) = (scope.block(head), scope.block(body));
    if h.preds.len() != 2 || b.preds != [head] || b.succs != [head] {
        return None;
    }
    let StmKind::CJump { t, f: exit, .. } = h.terminator()?.kind else {
        return None;
    };
    let StmKind::Jump { target, .. } = b.terminator()?.kind else {
        return None;
    };
    if t != body || target != head {
        return None;
    }
    if h.phis().any(|s| s.as_phi().is_some_and(|p| p.kind != PhiKind::LPhi)) {
        return None;
    }
    let pre = h.preds.iter().copied().find(|p| *p != body)?;
    let trip = region.info.trip_count?;
    let factor = match h.synth_params.unroll {
        -1 => Factor::Full,
        0 if scope.is_testbench() && trip <= full_limit => Factor::Full,
        k if k > 1 => {
            let k = k as u64;
            if k >= trip {
                Factor::Full
            } else if trip % k == 0 {
                Factor::Partial(k)
            } else {
                log::warn!("{}: unroll factor {k} does not divide {trip} trips", scope.name);
                return None;
            }
        }
        _ => return None,
    };
    Some(Candidate {
        head,
        body,
        pre,
        exit,
        trip,
        factor,
    })
}

/// Replace every read of a key of `env` at once.
fn subst(e: &mut Expr, env: &HashMap<Id, Expr>) {
    e.walk_mut(&mut |x| {
        if let Expr::Temp(n) = x {
            if let Some(v) = env.get(n) {
                *x = v.clone();
            }
        }
    });
}

/// A copy of `stm` reading the values in `env`. The symbol it defines is
/// renamed and the new name is recorded in `env`.
fn copy_stm(scope: &mut Scope, stm: &Stm, env: &mut HashMap<Id, Expr>) -> Stm {
    let mut new = stm.clone();
    for e in new.src_exprs_mut() {
        subst(e, env);
    }
    if let Some(dst) = new.dst_mut() {
        match dst {
            Expr::Temp(d) => {
                let (typ, tags) = scope
                    .sym(*d)
                    .map_or((Type::undef(), SymTags::empty()), |s| (s.typ.clone(), s.tags));
                let fresh = scope.gen_sym(*d, typ, tags);
                env.insert(*d, Expr::Temp(fresh));
                *d = fresh;
            }
            dst => subst(dst, env),
        }
    }
    scope.renumber(new)
}

/// The loop phis of the head as `(var, initial value, carried value)`.
struct LoopState {
    phis: Vec<(Id, Expr, Expr)>,
    head_stms: Vec<Stm>,
    body_stms: Vec<Stm>,
    back_pos: usize,
}

impl LoopState {
    fn new(scope: &Scope, c: &Candidate) -> Option<Self> {
        let h = scope.block(c.head);
        let pre_pos = h.pred_pos(c.pre)?;
        let back_pos = h.pred_pos(c.body)?;
        let phis = h
            .phis()
            .filter_map(|s| {
                let p = s.as_phi()?;
                Some((
                    p.var.as_temp()?,
                    p.args.get(pre_pos)?.clone(),
                    p.args.get(back_pos)?.clone(),
                ))
            })
            .collect();
        let plain = |s: &&Stm| !s.is_phi() && !s.is_jump();
        Some(LoopState {
            phis,
            head_stms: h.stms.iter().filter(plain).cloned().collect(),
            body_stms: scope.block(c.body).stms.iter().filter(plain).cloned().collect(),
            back_pos,
        })
    }

    /// Move the phi variables to their values for the next iteration.
    fn advance(&self, env: &mut HashMap<Id, Expr>) {
        let next: Vec<(Id, Expr)> = self
            .phis
            .iter()
            .map(|(v, _, back)| {
                let mut e = back.clone();
                subst(&mut e, env);
                (*v, e)
            })
            .collect();
        env.extend(next);
    }

    /// Every symbol defined by the loop.
    fn defined(&self) -> Vec<Id> {
        self.phis
            .iter()
            .map(|(v, ..)| *v)
            .chain(self.head_stms.iter().chain(&self.body_stms).filter_map(Stm::def_sym))
            .collect()
    }
}

fn unroll_fully(scope: &mut Scope, c: &Candidate, st: &LoopState) {
    let loc = scope
        .block(c.head)
        .terminator()
        .map_or_else(Loc::unknown, |t| t.loc);
    let mut env: HashMap<Id, Expr> = st.phis.iter().map(|(v, init, _)| (*v, init.clone())).collect();
    let mut stms = vec![];
    for _ in 0..c.trip {
        for s in st.head_stms.iter().chain(&st.body_stms) {
            stms.push(copy_stm(scope, s, &mut env));
        }
        st.advance(&mut env);
    }
    // The head runs once more to leave the loop.
    for s in &st.head_stms {
        stms.push(copy_stm(scope, s, &mut env));
    }

    let finals: HashMap<Id, Expr> = st
        .defined()
        .into_iter()
        .filter_map(|o| env.get(&o).map(|v| (o, v.clone())))
        .collect();
    for blk in scope.live_blocks() {
        if blk == c.head || blk == c.body {
            continue;
        }
        for stm in scope.block_mut(blk).stms.iter_mut() {
            for e in stm.exprs_mut() {
                subst(e, &finals);
            }
        }
    }

    cfg::disconnect(scope, c.body, c.head);
    cfg::disconnect(scope, c.head, c.body);
    let jump = scope.mk_stm(
        StmKind::Jump {
            target: c.exit,
            kind: JumpKind::Plain,
        },
        loc,
    );
    stms.push(jump);
    scope.block_mut(c.head).stms = stms;
    let body = scope.block_mut(c.body);
    body.stms.clear();
    body.removed = true;
    for o in st.defined() {
        scope.del_sym(o);
    }
}

fn unroll_partially(scope: &mut Scope, c: &Candidate, st: &LoopState, k: u64) {
    let mut env = HashMap::new();
    let mut stms = st.body_stms.clone();
    for _ in 1..k {
        st.advance(&mut env);
        for s in st.head_stms.iter().chain(&st.body_stms) {
            stms.push(copy_stm(scope, s, &mut env));
        }
    }
    if let Some(jump) = scope.block(c.body).terminator() {
        stms.push(jump.clone());
    }
    scope.block_mut(c.body).stms = stms;
    let head = scope.block_mut(c.head);
    for stm in head.stms.iter_mut() {
        if let Some(phi) = stm.as_phi_mut() {
            if let Some(back) = phi.args.get_mut(st.back_pos) {
                subst(back, &env);
            }
        }
    }
    head.synth_params.unroll = 1;
}

impl Visitor for SimpleLoopUnroll {
    fn start(&mut self, scope: &mut Scope, _ctx: &mut Context) -> VisResult {
        if !scope.has_body() || scope.is_lib() {
            return Ok(Action::SkipChildren);
        }
        loop {
            let tree = detect(scope);
            let found = tree
                .loops()
                .into_iter()
                .rev()
                .find_map(|r| candidate(scope, &tree, r, self.full_limit));
            scope.loop_tree = Some(tree);
            let Some(c) = found else { break };
            let Some(st) = LoopState::new(scope, &c) else {
                break;
            };
            match c.factor {
                Factor::Full => unroll_fully(scope, &c, &st),
                Factor::Partial(k) => unroll_partially(scope, &c, &st, k),
            }
            log::info!(
                "{}: unrolled loop at {} ({:?}, {} trips)",
                scope.name,
                c.head,
                c.factor,
                c.trip
            );
            scope.invalidate();
        }
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::ConstantOpt;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn source(tags: &str, synth: &str) -> String {
        format!(
            r#"
scope @top [namespace] {{}}
scope @top.t [{tags}] {{
  block b0 entry {{
    i#0 = 0;
    s#0 = 0;
    jump b1;
  }}
  block b1 {synth} preds(b0, b2) {{
    i#1 = lphi(i#0, i#2);
    s#1 = lphi(s#0, s#2);
    @t#0 = (i#1 < 4);
    cjump @t#0 ? b2 : b3;
  }}
  block b2 preds(b1) {{
    s#2 = (s#1 + i#1);
    i#2 = (i#1 + 1);
    jump b1 loop;
  }}
  block b3 exit preds(b1) {{
    ret s#1;
  }}
}}
"#
        )
    }

    fn stms(scope: &Scope, blk: u32) -> Vec<String> {
        scope
            .block(BlockIdx(blk))
            .stms
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn testbench_loop_is_fully_unrolled() {
        let prog = IrParser::parse(source("function, testbench", "").as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        SimpleLoopUnroll::do_pass_default(&mut ctx).unwrap();
        {
            let rc = ctx.scope(Id::new("@top.t")).unwrap();
            let t = rc.borrow();
            assert!(t.block(BlockIdx(2)).removed);
            assert!(t.all_stms().all(|(_, s)| !s.is_phi()));
            assert_eq!(t.loop_tree.as_ref().unwrap().loops().len(), 0);
        }
        ConstantOpt::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.t")).unwrap();
        let t = rc.borrow();
        assert_eq!(t.live_blocks().len(), 3);
        assert_eq!(stms(&t, 3), vec!["ret 6"]);
    }

    #[test]
    fn full_limit_option() {
        let prog = IrParser::parse(source("function, testbench", "").as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        ctx.extra_opts = vec!["simple-loop-unroll:full-limit=3".to_string()];
        SimpleLoopUnroll::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.t")).unwrap();
        let t = rc.borrow();
        assert_eq!(t.loop_tree.as_ref().unwrap().loops().len(), 1);
        assert!(!t.block(BlockIdx(2)).removed);
    }

    #[test]
    fn plain_function_keeps_loop() {
        let prog = IrParser::parse(source("function", "").as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        SimpleLoopUnroll::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.t")).unwrap();
        let t = rc.borrow();
        assert_eq!(stms(&t, 2).len(), 3);
    }

    #[test]
    fn partial_unroll_by_two() {
        let prog =
            IrParser::parse(source("function", "synth(unroll=2)").as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        SimpleLoopUnroll::do_pass_default(&mut ctx).unwrap();
        let rc = ctx.scope(Id::new("@top.t")).unwrap();
        let t = rc.borrow();
        assert_eq!(
            stms(&t, 2),
            vec![
                "s#2 = (s#1 + i#1)",
                "i#2 = (i#1 + 1)",
                "@t#1 = (i#2 < 4)",
                "s#3 = (s#2 + i#2)",
                "i#3 = (i#2 + 1)",
                "jump b1 loop"
            ]
        );
        assert_eq!(
            stms(&t, 1),
            vec![
                "i#1 = lphi(i#0, i#3)",
                "s#1 = lphi(s#0, s#3)",
                "@t#0 = (i#1 < 4)",
                "cjump @t#0 ? b2 : b3"
            ]
        );
        assert_eq!(t.block(BlockIdx(1)).synth_params.unroll, 1);
    }
}
