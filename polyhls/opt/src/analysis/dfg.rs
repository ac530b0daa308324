//! Data flow graphs over straight-line statement sequences.
use super::latency::stm_latency;
use super::resources::NodeResources;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use polyhls_ir::{BlockIdx, Context, QSym, Scope, StmId};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The successor reads a value the predecessor writes.
    DefUse,
    /// The successor overwrites a value the predecessor reads.
    UseDef,
    /// Ordering without data flow: the same memory, port or side effect.
    Seq,
}

impl EdgeKind {
    /// Earliest start of the successor given the predecessor's times.
    pub fn release(&self, begin: u32, end: u32) -> u32 {
        match self {
            EdgeKind::DefUse | EdgeKind::Seq => end,
            EdgeKind::UseDef => begin,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DfNode {
    pub stm: StmId,
    pub blk: BlockIdx,
    /// Position in the sequence the graph was built from.
    pub order: usize,
    pub min_latency: u32,
    pub latency: u32,
    pub res: NodeResources,
    pub defs: Vec<QSym>,
    pub uses: Vec<QSym>,
}

fn overlaps(a: &[polyhls_ir::Id], b: &[polyhls_ir::Id]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

fn any_overlap(xs: &[QSym], ys: &[QSym]) -> bool {
    xs.iter().any(|x| ys.iter().any(|y| overlaps(x, y)))
}

pub struct Dfg {
    pub graph: DiGraph<DfNode, EdgeKind>,
    index: HashMap<StmId, NodeIndex>,
}

impl Dfg {
    /// Build the graph of the non-jump, non-phi statements of `blocks`,
    /// taken in the given order.
    pub fn build(scope: &Scope, ctx: &Context, blocks: &[BlockIdx]) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut order = 0;
        for &b in blocks {
            for stm in scope.block(b).stms.iter() {
                if stm.is_jump() || stm.is_phi() {
                    continue;
                }
                let res = NodeResources::extract(stm, scope, ctx);
                let (min_latency, latency) = stm_latency(stm, &res, scope, ctx);
                let node = DfNode {
                    stm: stm.id,
                    blk: b,
                    order,
                    min_latency,
                    latency,
                    res,
                    defs: stm.def_qsym().into_iter().collect(),
                    uses: stm.use_qsyms(),
                };
                order += 1;
                index.insert(stm.id, graph.add_node(node));
            }
        }
        let mut dfg = Dfg { graph, index };
        dfg.add_edges();
        dfg
    }

    fn add_edges(&mut self) {
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut edges = vec![];
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                let (na, nb) = (&self.graph[a], &self.graph[b]);
                if any_overlap(&na.defs, &nb.uses) {
                    edges.push((a, b, EdgeKind::DefUse));
                }
                if any_overlap(&na.uses, &nb.defs) {
                    edges.push((a, b, EdgeKind::UseDef));
                }
                if Self::ordered(na, nb) {
                    edges.push((a, b, EdgeKind::Seq));
                }
            }
        }
        for (a, b, k) in edges {
            self.graph.add_edge(a, b, k);
        }
    }

    /// Must `b` start after `a` ends even without data flow?
    fn ordered(a: &DfNode, b: &DfNode) -> bool {
        if any_overlap(&a.defs, &b.defs) {
            return true;
        }
        let mem_conflict = a
            .res
            .mem_writes
            .iter()
            .any(|m| b.res.mems().any(|n| n == m))
            || b.res.mem_writes.iter().any(|m| a.res.mem_reads.contains(m));
        let port_conflict = a.res.ports.iter().any(|p| b.res.ports.contains(p));
        mem_conflict || port_conflict || (a.res.exclusive && b.res.exclusive)
    }

    /// Does `user` read, one loop iteration later, what `def` writes? Only
    /// reads placed no later than the write in program order see the value
    /// of the previous iteration.
    pub fn loop_carried(&self, def: NodeIndex, user: NodeIndex) -> bool {
        let (d, u) = (&self.graph[def], &self.graph[user]);
        u.order <= d.order
            && (any_overlap(&d.defs, &u.uses)
                || d.res.mem_writes.iter().any(|m| u.res.mem_reads.contains(m)))
    }

    /// Does `user` read, in the same iteration, a value `def` writes?
    pub fn feeds(&self, def: NodeIndex, user: NodeIndex) -> bool {
        let (d, u) = (&self.graph[def], &self.graph[user]);
        u.order > d.order && any_overlap(&d.defs, &u.uses)
    }

    pub fn node_of(&self, stm: StmId) -> Option<NodeIndex> {
        self.index.get(&stm).copied()
    }

    pub fn node(&self, stm: StmId) -> Option<&DfNode> {
        self.node_of(stm).map(|n| &self.graph[n])
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Nodes in build order, which is also a topological order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn preds(&self, n: NodeIndex) -> impl Iterator<Item = (NodeIndex, EdgeKind)> + '_ {
        use petgraph::visit::EdgeRef;
        self.graph
            .edges_directed(n, Direction::Incoming)
            .map(|e| (e.source(), *e.weight()))
    }

    pub fn has_edge(&self, a: StmId, b: StmId, kind: EdgeKind) -> bool {
        use petgraph::visit::EdgeRef;
        let (Some(a), Some(b)) = (self.node_of(a), self.node_of(b)) else {
            return false;
        };
        self.graph.edges_connecting(a, b).any(|e| *e.weight() == kind)
    }

    /// Length of the longest latency-weighted data flow path from each
    /// node to a sink.
    pub fn priorities(&self) -> HashMap<NodeIndex, u32> {
        use petgraph::visit::EdgeRef;
        let mut prio = HashMap::new();
        let nodes: Vec<NodeIndex> = self.nodes().collect();
        for &n in nodes.iter().rev() {
            let tail = self
                .graph
                .edges_directed(n, Direction::Outgoing)
                .filter(|e| *e.weight() == EdgeKind::DefUse)
                .filter_map(|e| prio.get(&e.target()).copied())
                .max()
                .unwrap_or(0);
            prio.insert(n, self.graph[n].latency + tail);
        }
        prio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, Id, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {}
scope @top.f [function] {
  param a: int32!;
  param b: int32!;
  block b0 entry exit {
    x = (a + b);
    y = (x * 2);
    a = 1;
    ret y;
  }
}
"#;

    fn build() -> (Context, Dfg) {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let dfg = {
            let f = ctx.scope(Id::new("@top.f")).unwrap();
            let f = f.borrow();
            let entry = f.entry.unwrap();
            Dfg::build(&f, &ctx, &[entry])
        };
        (ctx, dfg)
    }

    #[test]
    fn data_and_anti_dependences() {
        let (_ctx, dfg) = build();
        let ids: Vec<StmId> = dfg.nodes().map(|n| dfg.graph[n].stm).collect();
        assert_eq!(ids.len(), 4);
        assert!(dfg.has_edge(ids[0], ids[1], EdgeKind::DefUse));
        assert!(dfg.has_edge(ids[0], ids[2], EdgeKind::UseDef));
        assert!(dfg.has_edge(ids[1], ids[3], EdgeKind::DefUse));
        assert!(!dfg.has_edge(ids[0], ids[3], EdgeKind::DefUse));
    }

    #[test]
    fn critical_path_priority() {
        let (_ctx, dfg) = build();
        let prio = dfg.priorities();
        let first = dfg.nodes().next().unwrap();
        // x and y take one cycle each, the return none.
        assert_eq!(prio[&first], 2);
    }
}
