use itertools::Itertools;
use petgraph::matrix_graph::{MatrixGraph, NodeIndex, UnMatrix, Zero};
use petgraph::visit::IntoEdgeReferences;
use std::{
    collections::{BTreeMap, HashMap},
    hash::Hash,
};

/// Edge weight used for the graph nodes
pub struct BoolIdx(bool);

impl From<bool> for BoolIdx {
    fn from(b: bool) -> Self {
        BoolIdx(b)
    }
}

impl Zero for BoolIdx {
    fn zero() -> Self {
        BoolIdx(false)
    }

    fn is_zero(&self) -> bool {
        !self.0
    }
}

/// Undirected graph whose nodes are identified by values of type `T`.
/// The scheduler uses it as a conflict graph: an edge means two statements
/// cannot occupy the same resource slot.
pub struct WeightGraph<T> {
    /// Mapping from T to a unique identifier.
    pub index_map: HashMap<T, NodeIndex>,
    /// Graph representating using identifier.
    pub graph: UnMatrix<(), BoolIdx>,
}

impl<T: Eq + Hash + Clone + Ord> Default for WeightGraph<T> {
    fn default() -> Self {
        WeightGraph {
            index_map: HashMap::new(),
            graph: MatrixGraph::new_undirected(),
        }
    }
}

impl<T, C> From<C> for WeightGraph<T>
where
    T: Eq + Hash + Ord,
    C: Iterator<Item = T>,
{
    fn from(nodes: C) -> Self {
        let mut graph = MatrixGraph::new_undirected();
        let index_map: HashMap<_, _> =
            nodes.map(|node| (node, graph.add_node(()))).collect();
        WeightGraph { index_map, graph }
    }
}

impl<T> WeightGraph<T>
where
    T: Eq + Hash + Clone + Ord,
{
    /// Add an edge between `a` and `b`.
    #[inline(always)]
    pub fn add_edge(&mut self, a: &T, b: &T) {
        self.graph
            .update_edge(self.index_map[a], self.index_map[b], true.into());
    }

    /// Returns a Map from `NodeIndex` to `T` (the reverse of the index)
    pub fn reverse_index(&self) -> HashMap<NodeIndex, T> {
        self.index_map
            .iter()
            .map(|(k, v)| (*v, k.clone()))
            .collect()
    }

    /// Greedy coloring in node order; adjacent nodes never share a color.
    pub fn color_greedy(&self) -> BTreeMap<T, usize> {
        let rev = self.reverse_index();
        let mut colors: BTreeMap<T, usize> = BTreeMap::new();
        for node in self.index_map.keys().sorted() {
            let taken = self
                .graph
                .neighbors(self.index_map[node])
                .filter_map(|n| colors.get(&rev[&n]).copied())
                .collect::<Vec<_>>();
            let color = (0..).find(|c| !taken.contains(c)).unwrap_or_default();
            colors.insert(node.clone(), color);
        }
        colors
    }
}

impl<T: Eq + Hash + ToString + Clone + Ord> WeightGraph<T> {
    /// Graphviz rendering, used by debug logging.
    pub fn to_dot(&self) -> String {
        let rev_map = self.reverse_index();
        let nodes = self
            .index_map
            .keys()
            .sorted()
            .map(|key| format!("  {} [label=\"{}\"];", key.to_string(), key.to_string()))
            .join("\n");
        let edges = self
            .graph
            .edge_references()
            .map(|(a_idx, b_idx, _)| {
                format!(
                    "  {} -- {};",
                    rev_map[&a_idx].to_string(),
                    rev_map[&b_idx].to_string()
                )
            })
            .join("\n");
        format!("graph {{ \n{nodes}\n{edges}\n }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coloring_separates_neighbors() {
        let mut g: WeightGraph<u32> = (0..4).into();
        g.add_edge(&0, &1);
        g.add_edge(&1, &2);
        let colors = g.color_greedy();
        assert_ne!(colors[&0], colors[&1]);
        assert_ne!(colors[&1], colors[&2]);
        assert_eq!(colors[&3], 0);
    }
}
