use itertools::Itertools;
use petgraph::{
    Direction::{Incoming, Outgoing},
    algo,
    graphmap::DiGraphMap,
    visit::{Dfs, Walker},
};
use polyhls_ir::{Context, Id};
use std::collections::BTreeSet;

/// The call and dependency graph of the user scopes.
///
/// An edge `a -> b` means that `a` calls or instantiates `b`, or that the
/// class `a` owns the method `b`.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    graph: DiGraphMap<Id, ()>,
}

impl CallGraph {
    pub fn new(ctx: &Context) -> Self {
        let mut graph = DiGraphMap::new();
        let users = ctx.user_scopes();
        for name in &users {
            graph.add_node(*name);
        }
        for name in &users {
            let Some(rc) = ctx.get_scope(*name) else {
                continue;
            };
            let scope = rc.borrow();
            if scope.has_body() {
                for callee in ctx.callees(&scope) {
                    if graph.contains_node(callee) {
                        graph.add_edge(*name, callee, ());
                    }
                }
            }
            if scope.is_class() {
                for c in &scope.children {
                    if graph.contains_node(*c) {
                        graph.add_edge(*name, *c, ());
                    }
                }
            }
        }
        CallGraph { graph }
    }

    pub fn contains(&self, scope: Id) -> bool {
        self.graph.contains_node(scope)
    }

    pub fn callees(&self, scope: Id) -> impl Iterator<Item = Id> + '_ {
        self.graph
            .neighbors_directed(scope, Outgoing)
            .filter(move |c| self.graph.contains_node(*c))
    }

    pub fn callers(&self, scope: Id) -> impl Iterator<Item = Id> + '_ {
        self.graph.neighbors_directed(scope, Incoming)
    }

    /// Scopes ordered so that callees come before their callers. Scopes in
    /// a recursive cycle are adjacent and sorted by name.
    pub fn post_order(&self) -> Vec<Id> {
        algo::kosaraju_scc(&self.graph)
            .into_iter()
            .flat_map(|scc| scc.into_iter().sorted())
            .collect()
    }

    /// Every scope reachable from one of `roots`, roots included.
    pub fn reachable_from(&self, roots: impl IntoIterator<Item = Id>) -> BTreeSet<Id> {
        let mut out = BTreeSet::new();
        for r in roots {
            if !self.graph.contains_node(r) || out.contains(&r) {
                continue;
            }
            out.extend(Dfs::new(&self.graph, r).iter(&self.graph));
        }
        out
    }

    /// Does `scope` take part in a call cycle?
    pub fn is_recursive(&self, scope: Id) -> bool {
        if self.graph.contains_edge(scope, scope) {
            return true;
        }
        self.graph
            .neighbors_directed(scope, Outgoing)
            .any(|c| c != scope && self.reachable_from([c]).contains(&scope))
    }

    /// Graphviz rendering for debug logging.
    pub fn to_dot(&self) -> String {
        let nodes = self
            .graph
            .nodes()
            .sorted()
            .map(|n| format!("  \"{n}\";"))
            .join("\n");
        let edges = self
            .graph
            .all_edges()
            .map(|(a, b, _)| format!("  \"{a}\" -> \"{b}\";"))
            .sorted()
            .join("\n");
        format!("digraph calls {{\n{nodes}\n{edges}\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyhls_frontend::IrParser;
    use polyhls_ir::{Config, from_ast::ast_to_ir};

    const SRC: &str = r#"
scope @top [namespace] {
  sym main: function<@top.main>;
  sym f: function<@top.f>;
  sym g: function<@top.g>;
  synth scheduling=sequential cycle=any ii=0 unroll=0;
}
scope @top.g [function] {
  synth scheduling=sequential cycle=any ii=0 unroll=0;
  block b0 entry exit preds() {
    ret None;
  }
}
scope @top.f [function] {
  synth scheduling=sequential cycle=any ii=0 unroll=0;
  block b0 entry exit preds() {
    g();
    ret None;
  }
}
scope @top.main [function] {
  synth scheduling=sequential cycle=any ii=0 unroll=0;
  block b0 entry exit preds() {
    f();
    g();
    ret None;
  }
}
"#;

    #[test]
    fn callees_come_first() {
        let prog = IrParser::parse(SRC.as_bytes()).unwrap();
        let ctx = ast_to_ir(prog, Config::default(), None).unwrap();
        let cg = CallGraph::new(&ctx);
        let order = cg.post_order();
        let pos = |n: &str| order.iter().position(|x| *x == n).unwrap();
        assert!(pos("@top.g") < pos("@top.f"));
        assert!(pos("@top.f") < pos("@top.main"));
        assert_eq!(cg.callers(Id::new("@top.g")).count(), 2);
        let reach = cg.reachable_from([Id::new("@top.f")]);
        assert!(reach.contains(&Id::new("@top.g")));
        assert!(!reach.contains(&Id::new("@top.main")));
        assert!(!cg.is_recursive(Id::new("@top.main")));
    }
}
