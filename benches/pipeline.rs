use criterion::{
    BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main,
};
use polyhls_frontend::IrParser;
use polyhls_ir::{self as ir, Config, from_ast::ast_to_ir};
use polyhls_opt::pass_manager::PassManager;
use polyhls_opt::passes::{Scheduler, StgBuilder};
use polyhls_opt::traversal::Visitor;
use std::fmt::Write;

/// A loop summing `width` independent products per iteration.
fn unrolled_body(width: usize, pipelined: bool) -> String {
    let mut body = String::new();
    let mut sum = String::from("s");
    for k in 0..width {
        writeln!(body, "    p{k} = (a{k} * i);").unwrap();
        sum = format!("({sum} + p{k})");
    }
    let mut params = String::new();
    for k in 0..width {
        writeln!(params, "  param a{k}: int32!;").unwrap();
    }
    let synth = if pipelined {
        " synth(scheduling=pipeline)"
    } else {
        ""
    };
    format!(
        r#"
scope @top [namespace] {{}}
scope @top.k [function] {{
{params}  sym i: int32;
  sym s: int32;
  sym @return: int32 [return];
  block b0 entry {{
    i = 0;
    s = 0;
    jump b1;
  }}
  block b1{synth} preds(b0, b2) {{
    @t#0 = (i < 64);
    cjump @t#0 ? b2 : b3;
  }}
  block b2 preds(b1) {{
{body}    s = {sum};
    i = (i + 1);
    jump b1 loop;
  }}
  block b3 exit preds(b1) {{
    @return = s;
    ret @return;
  }}
}}
"#
    )
}

fn prepare(src: &str) -> ir::Context {
    let prog = IrParser::parse(src.as_bytes()).unwrap();
    let mut ctx = ast_to_ir(prog, Config::default(), None).unwrap();
    let pm = PassManager::default_passes().unwrap();
    let plan = ["ssa".to_string(), "ssa-opt".to_string(), "loops".to_string()];
    pm.execute_plan(&mut ctx, &plan, &[], false).unwrap();
    ctx
}

fn schedule_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule");
    for width in [4, 16, 64] {
        for pipelined in [false, true] {
            let src = unrolled_body(width, pipelined);
            let id = format!("{width}{}", if pipelined { "-pipe" } else { "" });
            group.bench_with_input(BenchmarkId::from_parameter(id), &src, |b, src| {
                b.iter_batched(
                    || prepare(src),
                    |mut ctx| {
                        Scheduler::do_pass_default(&mut ctx).unwrap();
                        StgBuilder::do_pass_default(&mut ctx).unwrap();
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }
    group.finish();
}

criterion_group! {
    name = pipeline;
    config = Criterion::default().sample_size(20);
    targets = schedule_bench
}
criterion_main!(pipeline);
