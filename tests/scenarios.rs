//! End-to-end compilation scenarios driven through the textual IR and the
//! registered pass pipelines.
use polyhls::driver::{compile_str, report_warnings};
use polyhls_backend::ModuleInfo;
use polyhls_frontend::IrParser;
use polyhls_ir::{
    BlockIdx, Config, Context, Expr, Id, Printer, StmKind, Transition, from_ast::ast_to_ir,
};
use polyhls_opt::pass_manager::{PassManager, PassResult};
use polyhls_utils::ErrorCode;

fn context(src: &str) -> Context {
    let prog = IrParser::parse(src.as_bytes()).unwrap();
    ast_to_ir(prog, Config::default(), None).unwrap()
}

fn run(ctx: &mut Context, passes: &[&str]) -> PassResult<()> {
    let pm = PassManager::default_passes()?;
    let passes: Vec<String> = passes.iter().map(|p| p.to_string()).collect();
    pm.execute_plan(ctx, &passes, &[], false)
}

fn block(ctx: &Context, scope: &str, blk: u32) -> Vec<String> {
    let rc = ctx.scope(Id::new(scope)).unwrap();
    let s = rc.borrow();
    s.block(BlockIdx(blk)).stms.iter().map(|s| s.to_string()).collect()
}

fn actions(ctx: &Context, scope: &str) -> Vec<String> {
    let rc = ctx.scope(Id::new(scope)).unwrap();
    let s = rc.borrow();
    s.stgs
        .iter()
        .flat_map(|g| &g.states)
        .flat_map(|st| &st.actions)
        .map(Printer::action_to_string)
        .collect()
}

fn state_actions(ctx: &Context, scope: &str, stg: usize, state: &str) -> Vec<String> {
    let rc = ctx.scope(Id::new(scope)).unwrap();
    let s = rc.borrow();
    let g = &s.stgs[stg];
    let idx = g.state_index(state).unwrap();
    g.states[idx].actions.iter().map(Printer::action_to_string).collect()
}

fn printed(ctx: &Context) -> String {
    let mut out = vec![];
    Printer::write_context(ctx, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn constant_fold_and_dead_store() {
    let src = r#"
scope @top [namespace] {}
scope @top.f [function, returnable] {
  return: int32;
  sym @return: int32 [return];
  block b0 entry exit {
    x = (2 + 3);
    y = (x * 4);
    @return = y;
    ret @return;
  }
}
"#;
    let mut ctx = context(src);
    run(&mut ctx, &["early"]).unwrap();
    assert_eq!(block(&ctx, "@top.f", 0), vec!["@return = 20", "ret @return"]);
    {
        let rc = ctx.scope(Id::new("@top.f")).unwrap();
        let f = rc.borrow();
        assert!(!f.has_sym(Id::new("x")));
        assert!(!f.has_sym(Id::new("y")));
    }

    run(&mut ctx, &["schedule", "stg"]).unwrap();
    let acts = actions(&ctx, "@top.f");
    assert!(acts.iter().any(|a| a == "@return <= 20"), "{acts:?}");
    assert!(acts.iter().any(|a| a == "return_reg <= @return"), "{acts:?}");
    assert_eq!(acts.last().map(String::as_str), Some("done"));
}

#[test]
fn ssa_on_diamond() {
    let src = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param c: bool;
  sym x: int32;
  block b0 entry {
    x = 1;
    cjump c ? b1 : b2;
  }
  block b1 preds(b0) {
    x = 2;
    jump b3;
  }
  block b2 preds(b0) {
    x = 3;
    jump b3;
  }
  block b3 exit preds(b1, b2) {
    ret x;
  }
}
"#;
    let mut ctx = context(src);
    run(&mut ctx, &["ssa"]).unwrap();
    let join = block(&ctx, "@top.f", 3);
    assert_eq!(join[0], "x#3 = phi(x#1 ? c, x#2 ? (!c))");

    let rc = ctx.scope(Id::new("@top.f")).unwrap();
    let f = rc.borrow();
    let phi = f.block(BlockIdx(3)).stms[0].as_phi().unwrap();
    assert_eq!(phi.args.len(), f.block(BlockIdx(3)).preds.len());
    assert_eq!(phi.ps, vec![Expr::temp("c"), Expr::not(Expr::temp("c"))]);
}

const LOOP: &str = r#"
scope @top [namespace] {}
scope @top.g [function] {
  sym i: int32;
  sym s: int32;
  sym @return: int32 [return];
  block b0 entry {
    i = 0;
    s = 0;
    jump b1;
  }
  block b1 preds(b0, b2) {
    @t#0 = (i < 10);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    s = (s + i);
    i = (i + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    @return = s;
    ret @return;
  }
}
"#;

#[test]
fn natural_loop_detection() {
    let mut ctx = context(LOOP);
    run(&mut ctx, &["ssa", "loop-detector"]).unwrap();
    let rc = ctx.scope(Id::new("@top.g")).unwrap();
    let g = rc.borrow();
    let tree = g.loop_tree.as_ref().unwrap();
    let loops = tree.loops();
    assert_eq!(loops.len(), 1);
    let info = &tree.regions[loops[0]].info;
    assert_eq!(info.counter, Some(Id::new("i#1")));
    assert_eq!(info.init, Some(Expr::int(0)));
    assert_eq!(info.update.as_ref().map(Expr::to_string).as_deref(), Some("(i#1 + 1)"));
    assert_eq!(info.cond.as_ref().map(Expr::to_string).as_deref(), Some("(i#1 < 10)"));
    assert_eq!(info.trip_count, Some(10));
    assert!(g.sym(Id::new("s#1")).unwrap().is_induction());
}

#[test]
fn loop_update_follows_condition() {
    let src = LOOP.replace("  sym i: int32;\n", "  synth cycle=any;\n  sym i: int32;\n");
    let mut ctx = context(&src);
    run(&mut ctx, &["ssa", "loops", "schedule"]).unwrap();
    let rc = ctx.scope(Id::new("@top.g")).unwrap();
    let g = rc.borrow();
    let sched = g.schedule.as_ref().unwrap();
    let begin = |blk: u32, src: &str| {
        let stm = g
            .block(BlockIdx(blk))
            .stms
            .iter()
            .find(|s| s.src().is_some_and(|e| e.to_string() == src))
            .unwrap();
        sched.blocks[&BlockIdx(blk)]
            .nodes
            .iter()
            .find(|n| n.stm == stm.id)
            .unwrap()
            .begin
    };
    assert_eq!(begin(2, "(i#1 + 1)"), begin(1, "(i#1 < 10)") + 1);
}

#[test]
fn optimized_ir_prints_back() {
    let src = r#"
scope @top [namespace] {}
scope @top.f [function, returnable] {
  param a: int32!;
  return: int32;
  sym @return: int32 [return];
  block b0 entry exit {
    x = (0 - 1);
    y = (x + a);
    z = (0 - (y * 2));
    @return = (z - -3);
    ret @return;
  }
}
"#;
    let mut ctx = context(src);
    run(&mut ctx, &["early"]).unwrap();
    let first = printed(&ctx);
    assert!(first.contains("-1"), "{first}");

    let again = context(&first);
    assert_eq!(printed(&again), first);
}

#[test]
fn pipelined_loop_compresses_to_ii_states() {
    let src = LOOP.replace("block b1 preds", "block b1 synth(scheduling=pipeline) preds");
    let mut ctx = context(&src);
    run(&mut ctx, &["ssa", "loops", "schedule", "stg"]).unwrap();
    let rc = ctx.scope(Id::new("@top.g")).unwrap();
    let g = rc.borrow();
    assert_eq!(g.stgs.len(), 2);
    let pipe = &g.stgs[1];
    let ii = pipe.ii.unwrap();
    let body = pipe.states.iter().filter(|s| s.name.starts_with("b1_P")).count();
    assert_eq!(body as u32, ii);
    assert!(g.stgs[0].state_index("b1_PIPE").is_some());
}

#[test]
fn port_direction_conflict() {
    let src = r#"
scope @top [namespace] {}
scope @top.M [class, module] {
  sym p: port<polyphony.io.Port, int8, any> [field];
}
scope @top.M.a [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    10: self.p.wr(1);
    ret None;
  }
}
scope @top.M.b [method, worker] {
  sym self: object<@top.M> [self];
  block b0 entry exit {
    20: self.p.wr(2);
    ret None;
  }
}
"#;
    let mut ctx = context(src);
    let errs = run(&mut ctx, &["port-type-prop"]).unwrap_err();
    let err = errs.first().unwrap();
    assert_eq!(err.code(), Some(ErrorCode::WritingIsConflicted));
    assert_eq!(err.loc().line(), 20);
}

#[test]
fn specialization() {
    let src = r#"
scope @top [namespace] {}
scope @top.add [function] {
  param a: undef;
  param b: undef;
  sym @return: undef [return];
  block b0 entry exit {
    @return = (a + b);
    ret @return;
  }
}
scope @top.main [function, testbench] {
  sym u: int16!;
  sym v: int32!;
  block b0 entry exit {
    u = 1;
    v = 2;
    r1 = add(u, u);
    r2 = add(v, v);
    ret None;
  }
}
"#;
    let mut ctx = context(src);
    run(
        &mut ctx,
        &["type-propagation", "call-graph-builder", "unused-scope-removal"],
    )
    .unwrap();
    assert!(ctx.has_scope(Id::new("@top.add_i16_i16")));
    assert!(ctx.has_scope(Id::new("@top.add_i32_i32")));
    assert!(!ctx.has_scope(Id::new("@top.add")));

    let rc = ctx.scope(Id::new("@top.main")).unwrap();
    let main = rc.borrow();
    let callees: Vec<String> = main
        .all_stms()
        .filter_map(|(_, s)| match &s.kind {
            StmKind::Move { src: Expr::Call { func, .. }, .. } => Some(func.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(callees, vec!["add_i16_i16", "add_i32_i32"]);
}

const RAM_LOOP: &str = r#"
scope @top [namespace] {}
scope @top.p [function] {
  param a: list<int32>[8]!;
  block b0 entry {
    i#0 = 1;
    jump b1;
  }
  block b1 synth(scheduling=pipeline) preds(b0, b2) {
    i#1 = lphi(i#0, i#2);
    @t#0 = (i#1 < 8);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    @t#1 = (i#1 - 1);
    @t#2 = a[@t#1];
    @t#3 = (@t#2 + 1);
    mstore(a, i#1, @t#3);
    i#2 = (i#1 + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret None;
  }
}
"#;

#[test]
fn pipeline_ram_conflict() {
    let mut ctx = context(RAM_LOOP);
    run(&mut ctx, &["early", "loop-detector", "schedule"]).unwrap();
    let rc = ctx.scope(Id::new("@top.p")).unwrap();
    let p = rc.borrow();
    let sched = p.schedule.as_ref().unwrap();
    let pipe = sched.pipeline_of(BlockIdx(2)).unwrap();
    // One read and one write share the single port of `a`.
    assert_eq!(pipe.ii, 2);
    assert_eq!(pipe.stages, 1);

    let body = &p.block(BlockIdx(2)).stms;
    let read = body[1].id;
    let write = body[3].id;
    assert_eq!(pipe.slots[&read], 0);
    assert_eq!(pipe.slots[&write], 1);
}

#[test]
fn pipeline_ram_conflict_states() {
    let mut ctx = context(RAM_LOOP);
    run(&mut ctx, &["early", "loop-detector", "schedule", "stg"]).unwrap();
    {
        let rc = ctx.scope(Id::new("@top.p")).unwrap();
        let p = rc.borrow();
        let pipe = &p.stgs[1];
        assert_eq!(pipe.ii, Some(2));
        assert_eq!(pipe.control, vec![Id::new("b1_valid0"), Id::new("b1_run")]);
        let names: Vec<&str> = pipe.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b1_INIT", "b1_P0", "b1_P1", "FINISH"]);
        let at = |n: &str| pipe.state_index(n).unwrap();
        assert_eq!(
            pipe.states[at("b1_P1")].next,
            Transition::Branch(vec![
                (Some(Expr::temp("b1_run")), at("b1_P0")),
                (None, at("FINISH"))
            ])
        );
    }

    let init = state_actions(&ctx, "@top.p", 1, "b1_INIT");
    assert_eq!(init, vec!["b1_run <= True", "b1_valid0 <= True"]);

    // The read shares the cycle of the exit test.
    let p0 = state_actions(&ctx, "@top.p", 1, "b1_P0");
    assert!(p0.contains(&"if (b1_valid0 && @t#0): @t#2 <= a[@t#1]".to_string()), "{p0:?}");
    let keep = "((!b1_valid0) || @t#0)";
    assert!(p0.contains(&format!("b1_valid0 <= (b1_valid0 && {keep})")), "{p0:?}");
    assert!(p0.contains(&format!("b1_run <= (b1_run && {keep})")), "{p0:?}");

    let p1 = state_actions(&ctx, "@top.p", 1, "b1_P1");
    assert!(p1.contains(&"if b1_valid0: a[i#1] <= @t#3".to_string()), "{p1:?}");
    assert!(p1.contains(&"if b1_valid0: i#1 <= i#2".to_string()), "{p1:?}");
    assert_eq!(p1.last().map(String::as_str), Some("b1_valid0 <= b1_run"));
}

#[test]
fn warnings_outlive_a_failed_run() {
    let mut ctx = context(RAM_LOOP);
    run(&mut ctx, &["early", "loop-detector", "schedule"]).unwrap();
    let recorded = ctx.warnings.len();
    assert!(
        ctx.warnings
            .iter()
            .any(|w| w.code() == Some(ErrorCode::PipelineRwSameRam))
    );

    {
        let rc = ctx.scope(Id::new("@top.p")).unwrap();
        rc.borrow_mut().block_mut(BlockIdx(1)).synth_params.ii = 1;
    }
    let errs = run(&mut ctx, &["scheduler"]).unwrap_err();
    assert_eq!(errs.first().unwrap().code(), Some(ErrorCode::PipelineIiTooSmall));
    assert_eq!(report_warnings(&mut ctx), recorded);
    assert!(ctx.warnings.is_empty());
}

#[test]
fn pipeline_drains_older_iterations() {
    let src = r#"
scope @top [namespace] {}
scope @top.d [function] {
  param m: list<int32>[8]!;
  param n: list<int32>[8]!;
  param q: list<int32>[8]!;
  param u: list<int32>[8]!;
  param r: list<int32>[8]!;
  block b0 entry {
    i#0 = 0;
    jump b1;
  }
  block b1 synth(scheduling=pipeline ii=2) preds(b0, b2) {
    i#1 = lphi(i#0, i#2);
    @t#0 = (i#1 < 8);
    cjump @t#0 ? b2 : b3;
  }
  block b2 preds(b1) {
    @t#1 = m[i#1];
    @t#2 = n[@t#1];
    @t#3 = q[@t#2];
    @t#4 = u[@t#3];
    mstore(r, @t#4, 1);
    i#2 = (i#1 + 1);
    jump b1 loop;
  }
  block b3 exit preds(b1) {
    ret None;
  }
}
"#;
    let mut ctx = context(src);
    run(&mut ctx, &["early", "loop-detector", "schedule", "stg"]).unwrap();
    {
        let rc = ctx.scope(Id::new("@top.d")).unwrap();
        let d = rc.borrow();
        let info = &d.schedule.as_ref().unwrap().pipelines[0];
        assert_eq!((info.ii, info.stages, info.exit_step), (2, 3, 0));

        let pipe = &d.stgs[1];
        assert_eq!(pipe.control.len(), 4);
        let names: Vec<&str> = pipe.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["b1_INIT", "b1_P0", "b1_P1", "b1_E0_0", "b1_E0_1", "FINISH"]
        );
        let at = |n: &str| pipe.state_index(n).unwrap();
        assert_eq!(
            pipe.states[at("b1_P1")].next,
            Transition::Branch(vec![
                (Some(Expr::temp("b1_run")), at("b1_P0")),
                (None, at("b1_E0_0"))
            ])
        );
        assert_eq!(pipe.states[at("b1_E0_0")].next, Transition::Goto(at("b1_E0_1")));
        assert_eq!(pipe.states[at("b1_E0_1")].next, Transition::Goto(at("FINISH")));
    }

    let p1 = state_actions(&ctx, "@top.d", 1, "b1_P1");
    let shift: Vec<&str> = p1.iter().rev().take(3).rev().map(String::as_str).collect();
    assert_eq!(
        shift,
        vec!["b1_valid2 <= b1_valid1", "b1_valid1 <= b1_valid0", "b1_valid0 <= b1_run"]
    );

    // Only the store of the last live stage is left to run.
    let e0 = state_actions(&ctx, "@top.d", 1, "b1_E0_0");
    assert_eq!(e0, vec!["if b1_valid2: r[@t#4] <= 1"]);
    let e1 = state_actions(&ctx, "@top.d", 1, "b1_E0_1");
    assert_eq!(
        e1,
        vec![
            "b1_valid2 <= b1_valid1",
            "b1_valid1 <= b1_valid0",
            "b1_valid0 <= False"
        ]
    );
}

#[test]
fn full_pipeline_emits_modules() {
    let src = r#"
scope @top [namespace] {}
scope @top.add [function] {
  param a: int32!;
  param b: int32!;
  sym @return: int32 [return];
  block b0 entry exit {
    @return = (a + b);
    ret @return;
  }
}
scope @top.main [function, testbench] {
  block b0 entry exit {
    r = add(1, 2);
    ret None;
  }
}
"#;
    let ctx = compile_str(src, Config::default(), &["all".to_string()]).unwrap();
    let modules = ModuleInfo::collect(&ctx).unwrap();
    assert!(modules.iter().all(|m| m.name != "@top.main"));
    let add = modules.iter().find(|m| m.name == "@top.add").unwrap();
    assert!(add.stgs.iter().any(|s| s.main));
    assert!(add.interface.iter().any(|s| s.name == "add_in_a"));
}
