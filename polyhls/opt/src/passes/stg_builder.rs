use crate::analysis::resources::{CallClass, classify_call};
use crate::traversal::{Action, Named, VisResult, Visitor};
use polyhls_ir::{
    Action as StgAction, ActionKind, BlockIdx, Context, Expr, Id, JumpKind, PipelineInfo,
    RETURN_REG, Schedule, Scope, State, Stg, Stm, StmKind, Transition, cfg,
};
use polyhls_utils::{Error, HlsResult};
use std::collections::HashMap;

/// Lowers the schedule of every scope to state transition graphs.
///
/// The main graph has one state per cycle of every block, named
/// `b{n}_S{k}`. A pipelined loop is a single state of the main graph that
/// starts a graph of its own: an `INIT` state, `ii` states in which every
/// stage advances, and the states draining the last iterations.
#[derive(Default)]
pub struct StgBuilder;

impl Named for StgBuilder {
    fn name() -> &'static str {
        "stg-builder"
    }

    fn description() -> &'static str {
        "lower scheduled scopes to state transition graphs"
    }
}

const FINISH: &str = "FINISH";

fn and_guard(guard: &Option<Expr>, cond: &Expr) -> Option<Expr> {
    Some(match guard {
        Some(g) => Expr::and(g.clone(), cond.clone()),
        None => cond.clone(),
    })
}

/// Translates statements to actions.
struct Lowering<'a> {
    scope: &'a Scope,
    ctx: &'a Context,
}

impl Lowering<'_> {
    fn is_register(&self, dst: &Expr) -> bool {
        match dst {
            Expr::Temp(d) => !self.scope.sym(*d).is_some_and(|s| s.is_alias()),
            _ => true,
        }
    }

    /// The action computing `src`, writing it to `dst` when given.
    fn value(&self, dst: Option<&Expr>, src: &Expr) -> ActionKind {
        match (dst, src) {
            (Some(d), Expr::Mref(mem, offset)) => ActionKind::MemRead {
                dst: d.clone(),
                mem: (**mem).clone(),
                offset: (**offset).clone(),
            },
            (_, Expr::Mstore(mem, offset, value)) => ActionKind::MemWrite {
                mem: (**mem).clone(),
                offset: (**offset).clone(),
                value: (**value).clone(),
            },
            (_, Expr::Call { func, args, .. }) => match classify_call(src, self.scope, self.ctx) {
                Some(CallClass::User(callee)) => ActionKind::Start {
                    callee,
                    args: args.clone(),
                    dst: dst.cloned(),
                },
                Some(CallClass::Port { method, .. }) => {
                    let port = match &**func {
                        Expr::Attr(port, _) => (**port).clone(),
                        other => other.clone(),
                    };
                    match method.as_ref() {
                        "wr" | "put" => ActionKind::PortWrite {
                            port,
                            value: args.first().cloned().unwrap_or_else(Expr::none),
                        },
                        _ => ActionKind::PortRead {
                            dst: dst.cloned(),
                            port,
                        },
                    }
                }
                _ => self.assign_or_eval(dst, src),
            },
            _ => self.assign_or_eval(dst, src),
        }
    }

    fn assign_or_eval(&self, dst: Option<&Expr>, src: &Expr) -> ActionKind {
        match dst {
            Some(d) if !src.is_call_like() => ActionKind::Assign {
                dst: d.clone(),
                src: src.clone(),
                register: self.is_register(d),
            },
            _ => ActionKind::Eval(src.clone()),
        }
    }

    fn actions(&self, stm: &Stm, guard: Option<Expr>) -> Vec<StgAction> {
        let kind = match &stm.kind {
            StmKind::Move { dst, src } => self.value(Some(dst), src),
            StmKind::Expr(e) => self.value(None, e),
            StmKind::CMove { cond, dst, src } => {
                return vec![StgAction::guarded(
                    self.value(Some(dst), src),
                    and_guard(&guard, cond),
                )];
            }
            StmKind::CExpr { cond, exp } => {
                return vec![StgAction::guarded(
                    self.value(None, exp),
                    and_guard(&guard, cond),
                )];
            }
            StmKind::Ret(e) if *e != Expr::none() => ActionKind::Assign {
                dst: Expr::temp(RETURN_REG),
                src: e.clone(),
                register: true,
            },
            _ => return vec![],
        };
        vec![StgAction::guarded(kind, guard)]
    }
}

/// States allocated for the blocks of the main graph.
struct Layout {
    first: HashMap<BlockIdx, usize>,
    finish: usize,
}

impl Layout {
    fn state_of(&self, blk: BlockIdx) -> usize {
        self.first.get(&blk).copied().unwrap_or(self.finish)
    }

    /// The transition taken after the last cycle of a block.
    fn leave(&self, scope: &Scope, blk: BlockIdx) -> Transition {
        let Some(term) = scope.block(blk).terminator() else {
            return Transition::Goto(self.finish);
        };
        match &term.kind {
            StmKind::Jump {
                kind: JumpKind::Exit,
                ..
            } => Transition::Goto(self.finish),
            StmKind::Jump { target, .. } => Transition::Goto(self.state_of(*target)),
            StmKind::CJump { cond, t, f } => Transition::Branch(vec![
                (Some(cond.clone()), self.state_of(*t)),
                (None, self.state_of(*f)),
            ]),
            StmKind::MCJump { conds, targets } => Transition::Branch(
                conds
                    .iter()
                    .zip(targets)
                    .map(|(c, t)| {
                        let always = c.as_const().and_then(|c| c.is_true()) == Some(true);
                        ((!always).then(|| c.clone()), self.state_of(*t))
                    })
                    .collect(),
            ),
            _ => Transition::Goto(self.finish),
        }
    }
}

fn pipe_state_name(head: BlockIdx) -> String {
    format!("{head}_PIPE")
}

fn pipeline_name(scope: &Scope, head: BlockIdx) -> Id {
    Id::new(format!("{}_{head}_pipeline", scope.name.base()))
}

/// Where control goes once the pipelined loop has drained.
fn pipeline_exit(scope: &Scope, p: &PipelineInfo) -> Option<BlockIdx> {
    p.blocks
        .iter()
        .flat_map(|b| scope.block(*b).succs.iter().copied())
        .find(|s| !p.blocks.contains(s))
}

/// The condition under which the loop runs another iteration.
fn continue_cond(scope: &Scope, p: &PipelineInfo) -> Option<Expr> {
    match &scope.block(p.head).terminator()?.kind {
        StmKind::CJump { cond, t, .. } if p.blocks.contains(t) => Some(cond.clone()),
        StmKind::CJump { cond, .. } => Some(Expr::not(cond.clone())),
        _ => None,
    }
}

fn build_main(scope: &Scope, ctx: &Context, schedule: &Schedule) -> HlsResult<Stg> {
    let lower = Lowering { scope, ctx };
    let order = cfg::topo_order(scope);
    let mut stg = Stg::new(scope.name, true);
    let mut first = HashMap::new();

    for &b in &order {
        if let Some(p) = schedule.pipeline_of(b) {
            if b == p.head {
                let idx = stg.add_state(State::new(pipe_state_name(b), Some(b), 0));
                for pb in &p.blocks {
                    first.insert(*pb, idx);
                }
            }
            continue;
        }
        let bs = schedule
            .blocks
            .get(&b)
            .ok_or_else(|| {
                Error::pass_assumption(
                    StgBuilder::name(),
                    format!("{}: {b} was not scheduled", scope.name),
                )
            })?;
        for step in 0..bs.length.max(1) {
            let idx = stg.add_state(State::new(format!("{b}_S{step}"), Some(b), step));
            first.entry(b).or_insert(idx);
        }
    }
    let mut fin = State::new(FINISH.to_string(), None, 0);
    fin.actions.push(StgAction::new(ActionKind::Done));
    let finish = stg.add_state(fin);
    let layout = Layout { first, finish };

    for idx in 0..finish {
        let Some(b) = stg.states[idx].block else { continue };
        if let Some(p) = schedule.pipeline_of(b) {
            let state = &mut stg.states[idx];
            state.actions.push(StgAction::new(ActionKind::Start {
                callee: pipeline_name(scope, p.head),
                args: vec![],
                dst: None,
            }));
            state.next = Transition::Goto(
                pipeline_exit(scope, p).map_or(finish, |e| layout.state_of(e)),
            );
            continue;
        }
        let Some(bs) = schedule.blocks.get(&b) else { continue };
        let step = stg.states[idx].step;
        let mut actions = vec![];
        for node in bs.nodes_at(step) {
            if let Some(stm) = scope.stm(node.stm) {
                actions.extend(lower.actions(stm, None));
            }
        }
        let state = &mut stg.states[idx];
        state.actions = actions;
        state.next = if step + 1 < bs.length.max(1) {
            Transition::Goto(idx + 1)
        } else {
            layout.leave(scope, b)
        };
    }
    Ok(stg)
}

fn set(dst: Expr, src: Expr) -> StgAction {
    StgAction::new(ActionKind::Assign {
        dst,
        src,
        register: true,
    })
}

/// Lowers a pipelined loop. A round is `ii` states in which stage `s`
/// runs the iteration issued `s` rounds earlier, enabled by the register
/// `{head}_valid{s}`. The valid bits shift at the end of every round and a
/// new iteration is issued while `{head}_run` holds. The iteration whose
/// loop condition fails clears its own valid bit and those of the younger
/// iterations, then the drain rounds let the older ones finish.
fn build_pipeline(scope: &Scope, ctx: &Context, schedule: &Schedule, p: &PipelineInfo) -> Stg {
    let lower = Lowering { scope, ctx };
    let head = p.head;
    let ii = p.ii.max(1);
    let stages = p.stages.max(p.exit_step / ii + 1);
    let base = schedule.blocks.get(&head).map_or(0, |b| b.base);
    let valid_name = |s: u32| Id::new(format!("{head}_valid{s}"));
    let valid = |s: u32| Expr::Temp(valid_name(s));
    let run_name = Id::new(format!("{head}_run"));
    let run = Expr::Temp(run_name);

    let test_stage = p.exit_step / ii;
    let test_slot = p.exit_step % ii;
    let go = continue_cond(scope, p);
    // False only when the tested iteration is valid and leaves the loop.
    let keep = go
        .clone()
        .map(|g| Expr::or(Expr::not(valid(test_stage)), g));
    let kept = |e: Expr, k: u32| match &keep {
        Some(c) if k == test_slot => Expr::and(e, c.clone()),
        _ => e,
    };

    // (iteration relative cycle, statement, in the head block)
    let mut placed = vec![];
    for b in &p.blocks {
        let Some(bs) = schedule.blocks.get(b) else { continue };
        for node in &bs.nodes {
            let Some(stm) = scope.stm(node.stm) else { continue };
            if stm.is_jump() {
                continue;
            }
            placed.push((node.begin.saturating_sub(base), stm, *b == head));
        }
    }
    let guard = |rel: u32, in_head: bool| match &go {
        // The valid bit is updated by the test one cycle too late.
        Some(g) if !in_head && rel == p.exit_step => Expr::and(valid(rel / ii), g.clone()),
        _ => valid(rel / ii),
    };
    let shift = |actions: &mut Vec<StgAction>, k: u32, issue: Expr| {
        for s in (1..stages).rev() {
            let prev = if s - 1 <= test_stage {
                kept(valid(s - 1), k)
            } else {
                valid(s - 1)
            };
            actions.push(set(valid(s), prev));
        }
        actions.push(set(valid(0), issue));
    };

    let mut stg = Stg::new(pipeline_name(scope, head), false);
    stg.ii = Some(ii);
    stg.control = (0..stages).map(&valid_name).chain([run_name]).collect();
    let init = stg.add_state(State::new(format!("{head}_INIT"), Some(head), 0));
    let body: Vec<usize> = (0..ii)
        .map(|k| stg.add_state(State::new(format!("{head}_P{k}"), Some(head), k)))
        .collect();
    let drain_rounds = stages.saturating_sub(test_stage + 2);
    let drain: Vec<Vec<usize>> = (0..drain_rounds)
        .map(|r| {
            (0..ii)
                .map(|k| {
                    let mut st = State::new(format!("{head}_E{r}_{k}"), Some(head), k);
                    st.stage = Some(test_stage + 2 + r);
                    stg.add_state(st)
                })
                .collect()
        })
        .collect();
    let mut fin = State::new(FINISH.to_string(), None, 0);
    fin.actions.push(StgAction::new(ActionKind::Done));
    let finish = stg.add_state(fin);

    let mut init_actions = vec![set(run.clone(), Expr::bool(true))];
    init_actions.extend((0..stages).map(|s| set(valid(s), Expr::bool(s == 0))));
    stg.states[init].actions = init_actions;
    stg.states[init].next = Transition::Goto(body[0]);

    let out = drain.first().map_or(finish, |r| r[0]);
    for (k, &idx) in (0..ii).zip(&body) {
        let mut actions = vec![];
        for (rel, stm, in_head) in &placed {
            if rel % ii == k {
                actions.extend(lower.actions(stm, Some(guard(*rel, *in_head))));
            }
        }
        let issue = kept(run.clone(), k);
        if k + 1 < ii {
            if k == test_slot && keep.is_some() {
                for s in 0..=test_stage {
                    actions.push(set(valid(s), kept(valid(s), k)));
                }
                actions.push(set(run.clone(), issue));
            }
            stg.states[idx].next = Transition::Goto(body[k as usize + 1]);
        } else {
            if k == test_slot && keep.is_some() {
                actions.push(set(run.clone(), issue.clone()));
            }
            shift(&mut actions, k, issue.clone());
            stg.states[idx].next = match &go {
                Some(_) => Transition::Branch(vec![(Some(issue), body[0]), (None, out)]),
                None => Transition::Goto(body[0]),
            };
        }
        stg.states[idx].actions = actions;
    }

    for (r, round) in drain.iter().enumerate() {
        let live = test_stage + 2 + r as u32;
        for (k, &idx) in (0..ii).zip(round) {
            let mut actions = vec![];
            for (rel, stm, _) in &placed {
                if rel % ii == k && rel / ii >= live {
                    actions.extend(lower.actions(stm, Some(valid(rel / ii))));
                }
            }
            let next = if k + 1 < ii {
                round[k as usize + 1]
            } else {
                shift(&mut actions, ii, Expr::bool(false));
                drain.get(r + 1).map_or(finish, |n| n[0])
            };
            stg.states[idx].actions = actions;
            stg.states[idx].next = Transition::Goto(next);
        }
    }
    stg
}

impl Visitor for StgBuilder {
    fn visits(&self, scope: &Scope) -> bool {
        scope.has_body() && scope.is_function_like() && scope.schedule.is_some()
    }

    fn start(&mut self, scope: &mut Scope, ctx: &mut Context) -> VisResult {
        let Some(schedule) = scope.schedule.take() else {
            return Ok(Action::SkipChildren);
        };
        let mut stgs = vec![build_main(scope, ctx, &schedule)?];
        for p in &schedule.pipelines {
            stgs.push(build_pipeline(scope, ctx, &schedule, p));
        }
        log::info!(
            "{}: {} state(s) in {} graph(s)",
            scope.name,
            stgs.iter().map(|s| s.states.len()).sum::<usize>(),
            stgs.len()
        );
        scope.schedule = Some(schedule);
        scope.stgs = stgs;
        Ok(Action::SkipChildren)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::Scheduler;
    use crate::traversal::Visitor as _;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    fn build(src: &str) -> Context {
        let prog = IrParser::parse(src.as_bytes()).unwrap();
        let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        Scheduler::do_pass_default(&mut ctx).unwrap();
        StgBuilder::do_pass_default(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn branches_and_return() {
        let ctx = build(
            r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  param a: int32;
  sym @return: int32 [return];
  block b0 entry {
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    @return = (a + 1);
    jump b3;
  }
  block b2 preds(b0) {
    @return = a;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    ret @return;
  }
}
"#,
        );
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        assert_eq!(f.stgs.len(), 1);
        let stg = &f.stgs[0];
        assert!(stg.is_main);
        let at = |n: &str| stg.state_index(n).unwrap();
        let entry = &stg.states[at("b0_S0")];
        assert_eq!(
            entry.next,
            Transition::Branch(vec![
                (Some(Expr::temp("c")), at("b1_S0")),
                (None, at("b2_S0"))
            ])
        );
        let then = &stg.states[at("b1_S0")];
        assert_eq!(
            then.actions,
            vec![StgAction::new(ActionKind::Assign {
                dst: Expr::temp("@return"),
                src: Expr::binop(polyhls_ir::BinOp::Add, Expr::temp("a"), Expr::int(1)),
                register: true,
            })]
        );
        assert_eq!(then.next, Transition::Goto(at("b3_S0")));
        let exit = &stg.states[at("b3_S0")];
        assert!(matches!(
            &exit.actions[..],
            [StgAction { kind: ActionKind::Assign { dst, .. }, guard: None }] if *dst == Expr::temp(RETURN_REG)
        ));
        assert_eq!(exit.next, Transition::Goto(at(FINISH)));
        assert_eq!(stg.finish_state(), Some(at(FINISH)));
    }

    #[test]
    fn pipelined_loop() {
        let ctx = build(
            r#"
scope @top [namespace] {}
scope @top.p [function] {
  param m: list<int32>[8];
  sym i: int32;
  sym @t#0: bool [temp];
  sym @t#1: int32 [temp];
  block b0 entry {
    i = 0;
    jump b1;
  }
  block b1 synth(scheduling=pipeline) preds(b0, b2) {
    @t#0 = (i < 8);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    @t#1 = m[i];
    i = (i + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret None;
  }
}
"#,
        );
        let rc = ctx.scope(Id::new("@top.p")).unwrap();
        let p = rc.borrow();
        assert_eq!(p.stgs.len(), 2);
        let main = &p.stgs[0];
        let pipe = &p.stgs[1];
        let pipe_state = main.state_index("b1_PIPE").unwrap();
        assert!(matches!(
            &main.states[pipe_state].actions[..],
            [StgAction { kind: ActionKind::Start { callee, .. }, .. }] if *callee == pipe.name
        ));
        assert_eq!(
            main.states[pipe_state].next,
            Transition::Goto(main.state_index("b3_S0").unwrap())
        );
        assert!(!pipe.is_main);
        let ii = pipe.ii.unwrap() as usize;
        assert_eq!(pipe.states[0].name, "b1_INIT");
        let last_body = pipe.state_index(&format!("b1_P{}", ii - 1)).unwrap();
        let Transition::Branch(arms) = &pipe.states[last_body].next else {
            panic!("pipeline body must branch on the loop condition");
        };
        assert_eq!(arms[0].1, pipe.state_index("b1_P0").unwrap());
        assert!(pipe.finish_state().is_some());

        // The condition is a register read one cycle in, in the last state
        // of the round, so the shift folds in the exit test.
        let valid0 = Expr::temp("b1_valid0");
        let run = Expr::temp("b1_run");
        let cond = Expr::temp("@t#0");
        assert_eq!(pipe.control, vec![Id::new("b1_valid0"), Id::new("b1_run")]);
        let init = &pipe.states[0].actions;
        assert!(init.contains(&set(valid0.clone(), Expr::bool(true))));
        assert!(init.contains(&set(run.clone(), Expr::bool(true))));
        let issue = Expr::and(run.clone(), Expr::or(Expr::not(valid0.clone()), cond.clone()));
        let last = &pipe.states[last_body].actions;
        assert!(last.contains(&set(run, issue.clone())));
        assert!(last.contains(&set(valid0.clone(), issue.clone())));
        assert_eq!(arms[0].0, Some(issue));

        let read = pipe
            .states
            .iter()
            .flat_map(|s| &s.actions)
            .find(|a| matches!(a.kind, ActionKind::MemRead { .. }))
            .unwrap();
        assert_eq!(read.guard, Some(Expr::and(valid0, cond)));
    }
}
