//! Deterministic dependency digraph with a Tarjan SCC sort.
//!
//! The initializer orders declarations (types before the constants that
//! mention them, constants before functions, and so on) by building a graph
//! of name-level dependencies and partitioning it into strongly-connected
//! components in reverse-topological order. Determinism matters: the same
//! source must compile to the same layout on every run, so node and edge
//! sets are insertion-ordered and ties break by insertion order.
//!
//! # Design
//!
//! - Nodes live in an arena of records indexed by a dense integer; a
//!   `HashMap<String, usize>` gives name lookup. Descriptors hold indices,
//!   never references, so there are no ownership cycles.
//! - Edge sets are `IndexSet<usize>` — iteration follows insertion order.
//! - `add_transitive_arrow` keeps the graph transitively closed as it grows,
//!   which lets callers ask "does a depend on b" with a single set lookup.

use indexmap::IndexSet;
use std::collections::HashMap;

/// A directed graph over string-named nodes.
#[derive(Debug, Clone, Default)]
pub struct Digraph {
    names: HashMap<String, usize>,
    nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone)]
struct NodeRecord {
    name: String,
    out: IndexSet<usize>,
}

impl Digraph {
    pub fn new() -> Self {
        Digraph::default()
    }

    /// Add a node with no edges; a no-op if it already exists.
    /// Returns the node's index.
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&ix) = self.names.get(name) {
            return ix;
        }
        let ix = self.nodes.len();
        self.names.insert(name.to_string(), ix);
        self.nodes.push(NodeRecord {
            name: name.to_string(),
            out: IndexSet::new(),
        });
        ix
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a plain arrow `a → b`, creating the nodes if needed.
    pub fn add_arrow(&mut self, a: &str, b: &str) {
        let from = self.add_node(a);
        let to = self.add_node(b);
        self.nodes[from].out.insert(to);
    }

    /// Add `a → b` while maintaining transitive closure.
    ///
    /// Assumes the graph is already transitively closed: everything `b`
    /// transitively leads to is among its immediate neighbors, so one level
    /// of copying is enough. Inserts `(a, b)`, `(a, x)` for every `b → x`,
    /// and `(y, b)`, `(y, x)` for every `y` with `y → a`.
    pub fn add_transitive_arrow(&mut self, a: &str, b: &str) {
        let from = self.add_node(a);
        let to = self.add_node(b);
        let mut reachable: Vec<usize> = vec![to];
        reachable.extend(self.nodes[to].out.iter().copied());
        let pointing_at_a: Vec<usize> = (0..self.nodes.len())
            .filter(|&y| self.nodes[y].out.contains(&from))
            .collect();
        for &x in &reachable {
            self.nodes[from].out.insert(x);
        }
        for y in pointing_at_a {
            for &x in &reachable {
                self.nodes[y].out.insert(x);
            }
        }
    }

    /// Does an arrow `a → b` exist?
    pub fn has_arrow(&self, a: &str, b: &str) -> bool {
        match (self.names.get(a), self.names.get(b)) {
            (Some(&from), Some(&to)) => self.nodes[from].out.contains(&to),
            _ => false,
        }
    }

    /// The names of the nodes `name` points at, in insertion order.
    pub fn arrows_from(&self, name: &str) -> Vec<&str> {
        match self.names.get(name) {
            Some(&ix) => self.nodes[ix]
                .out
                .iter()
                .map(|&o| self.nodes[o].name.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Partition into strongly-connected components, reverse-topologically
    /// ordered: each component appears before every component that depends
    /// on it. Within the output, ordering is determined entirely by node
    /// insertion order, so two runs over identical input agree.
    pub fn tarjan(&self) -> Vec<Vec<String>> {
        let n = self.nodes.len();
        let mut state = TarjanState {
            graph: self,
            index: vec![usize::MAX; n],
            lowlink: vec![0; n],
            stacked: vec![false; n],
            stack: Vec::new(),
            counter: 0,
            output: Vec::new(),
        };
        for v in 0..n {
            if state.index[v] == usize::MAX {
                state.connect(v);
            }
        }
        state.output
    }
}

struct TarjanState<'a> {
    graph: &'a Digraph,
    index: Vec<usize>,
    lowlink: Vec<usize>,
    stacked: Vec<bool>,
    stack: Vec<usize>,
    counter: usize,
    output: Vec<Vec<String>>,
}

impl TarjanState<'_> {
    fn connect(&mut self, v: usize) {
        self.index[v] = self.counter;
        self.lowlink[v] = self.counter;
        self.counter += 1;
        self.stack.push(v);
        self.stacked[v] = true;

        let successors: Vec<usize> = self.graph.nodes[v].out.iter().copied().collect();
        for w in successors {
            if self.index[w] == usize::MAX {
                self.connect(w);
                self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
            } else if self.stacked[w] {
                self.lowlink[v] = self.lowlink[v].min(self.index[w]);
            }
        }

        if self.lowlink[v] == self.index[v] {
            let mut component = Vec::new();
            loop {
                let w = self.stack.pop().expect("SCC stack underflow");
                self.stacked[w] = false;
                component.push(self.graph.nodes[w].name.clone());
                if w == v {
                    break;
                }
            }
            self.output.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_chain_sorts_leaves_first() {
        let mut g = Digraph::new();
        g.add_arrow("a", "b");
        g.add_arrow("b", "c");
        let sccs = g.tarjan();
        assert_eq!(sccs, vec![vec!["c"], vec!["b"], vec!["a"]]);
    }

    #[test]
    fn test_cycle_collapses_to_one_component() {
        let mut g = Digraph::new();
        g.add_arrow("f", "g");
        g.add_arrow("g", "f");
        g.add_arrow("f", "h");
        let sccs = g.tarjan();
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec!["h"]);
        let mut cycle = sccs[1].clone();
        cycle.sort();
        assert_eq!(cycle, vec!["f", "g"]);
    }

    #[test]
    fn test_deterministic_over_runs() {
        let build = || {
            let mut g = Digraph::new();
            g.add_node("alpha");
            g.add_node("beta");
            g.add_arrow("alpha", "gamma");
            g.add_arrow("beta", "gamma");
            g.add_arrow("gamma", "delta");
            g
        };
        assert_eq!(build().tarjan(), build().tarjan());
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let mut g = Digraph::new();
        g.add_node("x");
        g.add_node("y");
        g.add_node("z");
        let sccs = g.tarjan();
        assert_eq!(sccs, vec![vec!["x"], vec!["y"], vec!["z"]]);
    }

    #[test]
    fn test_transitive_arrow_closes_forward() {
        let mut g = Digraph::new();
        g.add_transitive_arrow("b", "c");
        g.add_transitive_arrow("a", "b");
        assert!(g.has_arrow("a", "b"));
        assert!(g.has_arrow("a", "c"));
    }

    #[test]
    fn test_transitive_arrow_closes_backward() {
        let mut g = Digraph::new();
        g.add_transitive_arrow("a", "b");
        g.add_transitive_arrow("b", "c");
        // a already pointed at b; adding b → c must extend a → c too.
        assert!(g.has_arrow("a", "c"));
    }

    #[test]
    fn test_self_arrow_is_a_cycle_of_one() {
        let mut g = Digraph::new();
        g.add_arrow("rec", "rec");
        assert_eq!(g.tarjan(), vec![vec!["rec"]]);
    }
}
