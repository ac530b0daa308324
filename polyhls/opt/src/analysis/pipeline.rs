//! Modulo scheduling of pipelined loops.
use super::build_branch_graph;
use super::dfg::Dfg;
use super::resources::Resource;
use super::scheduler::{Times, list_schedule, seq_length};
use petgraph::graph::NodeIndex;
use polyhls_ir::{
    BlockIdx, BranchGraph, Context, LoopTree, PhiKind, PipelineInfo, RegionIdx, Scope, StmKind,
};
use polyhls_utils::{Error, ErrorCode, HlsResult, Loc, WeightGraph};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub struct PipelineResult {
    pub info: PipelineInfo,
    pub dfg: Dfg,
    /// Node times relative to the start of an iteration.
    pub times: Times,
}

/// Recurrence bound: a value written by one iteration must be ready
/// before the next iteration reads it. This covers loop phis
/// `v = lphi(init, back)`, the moves they are lowered to, and memories
/// written after being read. A register must also keep its value until
/// the last reader of the same iteration, since the next iteration
/// writes it `ii` cycles later.
pub fn rec_mii(scope: &Scope, dfg: &Dfg, times: &Times, tree: &LoopTree, r: RegionIdx) -> u32 {
    let region = &tree.regions[r];
    let Some(head) = region.head else {
        return 0;
    };
    let head_blk = scope.block(head);
    let mut bound = 0;
    for phi in head_blk.phis().filter_map(|s| s.as_phi()) {
        if phi.kind != PhiKind::LPhi {
            continue;
        }
        let Some(var) = phi.var.as_temp() else {
            continue;
        };
        for (i, arg) in phi.args.iter().enumerate() {
            let back_edge = head_blk
                .preds
                .get(i)
                .is_some_and(|p| region.blocks.contains(p));
            let Some(back) = arg.as_temp().filter(|_| back_edge) else {
                continue;
            };
            let Some(def_end) = dfg
                .nodes()
                .find(|n| dfg.graph[*n].defs.iter().any(|d| d.as_slice() == [back]))
                .map(|n| times[&n].1)
            else {
                continue;
            };
            for u in dfg.nodes() {
                if dfg.graph[u].uses.iter().any(|q| q[0] == var) {
                    bound = bound.max(def_end.saturating_sub(times[&u].0));
                }
            }
        }
    }
    for d in dfg.nodes() {
        for u in dfg.nodes() {
            if dfg.loop_carried(d, u) {
                bound = bound.max(times[&d].1.saturating_sub(times[&u].0));
            } else if dfg.feeds(d, u) {
                bound = bound.max((times[&u].0 + 1).saturating_sub(times[&d].1));
            }
        }
    }
    bound
}

/// The head block statement computing the loop condition.
fn exit_test(scope: &Scope, dfg: &Dfg, head: BlockIdx) -> Option<NodeIndex> {
    let cond = match &scope.block(head).terminator()?.kind {
        StmKind::CJump { cond, .. } => cond.as_temp()?,
        _ => return None,
    };
    dfg.nodes().find(|n| {
        let node = &dfg.graph[*n];
        node.blk == head && node.defs.iter().any(|d| d.as_slice() == [cond])
    })
}

/// List schedule the body with the statements outside the head block
/// starting no earlier than the cycle the loop condition can be read.
fn schedule_gated(
    dfg: &Dfg,
    head: BlockIdx,
    test: Option<NodeIndex>,
    lower: &mut HashMap<NodeIndex, u32>,
) -> Times {
    let mut times = list_schedule(dfg, lower);
    let Some(t) = test else {
        return times;
    };
    let step = times[&t].1;
    let mut gated = false;
    for n in dfg.nodes().filter(|n| dfg.graph[*n].blk != head) {
        let l = lower.entry(n).or_default();
        if *l < step {
            *l = step;
            gated = true;
        }
    }
    if gated {
        times = list_schedule(dfg, lower);
    }
    times
}

/// Scarce resources and the nodes competing for each.
fn scarce_users(dfg: &Dfg) -> BTreeMap<Resource, Vec<NodeIndex>> {
    let mut users: BTreeMap<Resource, Vec<NodeIndex>> = BTreeMap::new();
    for n in dfg.nodes() {
        let rs: BTreeSet<Resource> = dfg.graph[n]
            .res
            .resources()
            .into_iter()
            .filter(Resource::is_scarce)
            .collect();
        for r in rs {
            users.entry(r).or_default().push(n);
        }
    }
    users
}

/// Resource bound: nodes sharing a scarce resource conflict unless they are
/// in exclusive branches. Each color of the conflict graph needs its own
/// modulo slot.
pub fn res_mii(dfg: &Dfg, bg: &BranchGraph) -> u32 {
    let mut bound = 0;
    for (r, users) in scarce_users(dfg) {
        let stms: Vec<_> = users.iter().map(|n| dfg.graph[*n].stm).collect();
        let mut conflicts: WeightGraph<_> = stms.iter().copied().into();
        for (i, a) in stms.iter().enumerate() {
            for b in &stms[i + 1..] {
                if !bg.are_exclusive(*a, *b) {
                    conflicts.add_edge(a, b);
                }
            }
        }
        let colors = conflicts.color_greedy().values().max().map_or(0, |c| c + 1);
        let need = colors.div_ceil(r.capacity());
        log::trace!("{r:?}: {} users need {need} slots", stms.len());
        log::trace!("{}", conflicts.to_dot());
        bound = bound.max(need as u32);
    }
    bound
}

/// Try to give every scarce access a free modulo slot. Returns the nodes
/// that must start later, or `None` when some node finds no slot.
fn modulo_shifts(
    dfg: &Dfg,
    times: &Times,
    bg: &BranchGraph,
    ii: u32,
) -> Option<HashMap<NodeIndex, u32>> {
    let mut nodes: Vec<NodeIndex> = dfg.nodes().collect();
    nodes.sort_by_key(|n| (times[n].0, dfg.graph[*n].order));
    let mut table: HashMap<(Resource, u32), Vec<NodeIndex>> = HashMap::new();
    let mut shifts = HashMap::new();
    for n in nodes {
        let rs: BTreeSet<Resource> = dfg.graph[n]
            .res
            .resources()
            .into_iter()
            .filter(Resource::is_scarce)
            .collect();
        if rs.is_empty() {
            continue;
        }
        let begin = times[&n].0;
        let stm = dfg.graph[n].stm;
        let free = |t: u32| {
            rs.iter().all(|r| {
                let busy = table
                    .get(&(r.clone(), t % ii))
                    .map(|occ| {
                        occ.iter()
                            .filter(|o| !bg.are_exclusive(dfg.graph[**o].stm, stm))
                            .count()
                    })
                    .unwrap_or(0);
                busy < r.capacity()
            })
        };
        let t = (begin..begin + ii).find(|t| free(*t))?;
        for r in rs {
            table.entry((r, t % ii)).or_default().push(n);
        }
        if t != begin {
            shifts.insert(n, t);
        }
    }
    Some(shifts)
}

fn too_small(loc: Loc, user: u32, bound: u32) -> Error {
    Error::fail(loc, ErrorCode::PipelineIiTooSmall, &[user, bound])
}

/// Schedule the body of loop `r` so a new iteration can start every `ii`
/// cycles. The user's `ii`, when given, is kept or rejected; otherwise the
/// smallest feasible interval from the recurrence and resource bounds up
/// is chosen.
pub fn schedule_pipeline(
    scope: &Scope,
    ctx: &mut Context,
    tree: &LoopTree,
    r: RegionIdx,
    blocks: &[BlockIdx],
) -> HlsResult<PipelineResult> {
    let region = &tree.regions[r];
    let head = region
        .head
        .ok_or_else(|| Error::malformed("pipelining a region without a loop head"))?;
    let loc = scope
        .block(head)
        .stms
        .first()
        .map(|s| s.loc)
        .unwrap_or(scope.loc);
    let bg = match &scope.branch_graph {
        Some(bg) => bg.clone(),
        None => build_branch_graph(scope),
    };
    let dfg = Dfg::build(scope, ctx, blocks);
    let test = exit_test(scope, &dfg, head);
    let mut lower: HashMap<NodeIndex, u32> = HashMap::new();
    let mut times = schedule_gated(&dfg, head, test, &mut lower);

    let rec = rec_mii(scope, &dfg, &times, tree, r);
    let res = res_mii(&dfg, &bg);
    let bound = rec.max(res).max(1);
    let user = match scope.block(head).synth_params.ii {
        0 => scope.synth_params.ii,
        ii => ii,
    };
    if user > 0 && user < bound {
        return Err(too_small(loc, user, bound));
    }
    let mut ii = if user > 0 { user } else { bound };
    log::debug!(
        "{}: pipeline at {head}: rec={rec} res={res}, trying ii={ii}",
        scope.name
    );

    let limit = 4 * (dfg.len() + 1);
    let mut rounds = 0;
    loop {
        let stable = match modulo_shifts(&dfg, &times, &bg, ii) {
            Some(shifts) if shifts.is_empty() => {
                rec_mii(scope, &dfg, &times, tree, r) <= ii
            }
            Some(shifts) if rounds < limit => {
                for (n, t) in shifts {
                    let l = lower.entry(n).or_default();
                    *l = (*l).max(t);
                }
                times = schedule_gated(&dfg, head, test, &mut lower);
                rounds += 1;
                continue;
            }
            _ => false,
        };
        if stable {
            break;
        }
        if user > 0 {
            return Err(too_small(loc, user, ii + 1));
        }
        ii += 1;
        lower.clear();
        times = schedule_gated(&dfg, head, test, &mut lower);
        rounds = 0;
    }

    warn_read_write(scope, ctx, &dfg);

    let latency = seq_length(&times);
    let exit_step = test.map_or(0, |t| times[&t].1);
    let slots = dfg
        .nodes()
        .map(|n| (dfg.graph[n].stm, times[&n].0 % ii))
        .collect();
    let info = PipelineInfo {
        region: r,
        head,
        blocks: blocks.to_vec(),
        ii,
        stages: latency.div_ceil(ii),
        latency,
        exit_step,
        slots,
    };
    log::info!(
        "{}: pipelined loop at {head} with ii={ii}, {} stage(s)",
        scope.name,
        info.stages
    );
    Ok(PipelineResult { info, dfg, times })
}

fn warn_read_write(scope: &Scope, ctx: &mut Context, dfg: &Dfg) {
    let mut reads: BTreeSet<polyhls_ir::Id> = BTreeSet::new();
    let mut writes: BTreeMap<polyhls_ir::Id, Loc> = BTreeMap::new();
    for n in dfg.nodes() {
        let node = &dfg.graph[n];
        reads.extend(node.res.mem_reads.iter().copied());
        let loc = scope.stm(node.stm).map(|s| s.loc).unwrap_or(scope.loc);
        for m in &node.res.mem_writes {
            writes.entry(*m).or_insert(loc);
        }
    }
    for (m, loc) in writes {
        if reads.contains(&m) {
            ctx.warn(Error::fail(loc, ErrorCode::PipelineRwSameRam, &[m]));
        }
    }
}

