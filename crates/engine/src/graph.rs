//! In-memory view of a workflow's nodes and the lookups the processor
//! needs to navigate them.
//!
//! Nodes are kept in an arena (`Vec`) and addressed by id through an index,
//! so links are plain ids rather than references. Links that point to ids
//! outside the workflow are treated as absent.
//!
//! The walks in this module assume a well-formed graph; run
//! [`FlowGraph::validate`] before persisting or executing a workflow.

use std::collections::{HashMap, HashSet, VecDeque};

use db::models::FlowNodeRow;

use crate::EngineError;

#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    nodes: Vec<FlowNodeRow>,
    index: HashMap<i64, usize>,
}

impl FlowGraph {
    pub fn new(nodes: Vec<FlowNodeRow>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            // first occurrence wins; `validate` reports the duplicate
            index.entry(node.id).or_insert(position);
        }
        Self { nodes, index }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[FlowNodeRow] {
        &self.nodes
    }

    pub fn get(&self, id: i64) -> Option<&FlowNodeRow> {
        self.index.get(&id).map(|&position| &self.nodes[position])
    }

    pub fn upstream(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow> {
        node.upstream_id.and_then(|id| self.get(id))
    }

    pub fn downstream(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow> {
        node.downstream_id.and_then(|id| self.get(id))
    }

    /// The node with no upstream where execution starts.
    pub fn root(&self) -> Option<&FlowNodeRow> {
        self.nodes.iter().find(|node| self.upstream(node).is_none())
    }

    /// Entry nodes of the branches spawned by `node`, ordered by index.
    pub fn branches(&self, node: &FlowNodeRow) -> Vec<&FlowNodeRow> {
        let mut branches: Vec<&FlowNodeRow> = self
            .nodes
            .iter()
            .filter(|item| item.upstream_id == Some(node.id) && item.branch_index.is_some())
            .collect();
        branches.sort_by_key(|item| item.branch_index);
        branches
    }

    /// First node of the chain containing `node`: walk upstream until a
    /// branch entry or the root is reached.
    ///
    /// With `parent`, walk until the upstream is `parent` itself, which
    /// yields the entry of the `parent` branch containing `node` even when
    /// it is nested several branches deep.
    pub fn branch_start<'a>(
        &'a self,
        node: &'a FlowNodeRow,
        parent: Option<&FlowNodeRow>,
    ) -> Option<&'a FlowNodeRow> {
        let mut current = node;
        match parent {
            Some(parent) => loop {
                let upstream = self.upstream(current)?;
                if upstream.id == parent.id {
                    return Some(current);
                }
                current = upstream;
            },
            None => loop {
                if current.branch_index.is_some() {
                    return Some(current);
                }
                match self.upstream(current) {
                    Some(upstream) => current = upstream,
                    None => return Some(current),
                }
            },
        }
    }

    /// The node that spawned the branch `node` is on; `None` on the main
    /// chain.
    pub fn branch_parent(&self, node: &FlowNodeRow) -> Option<&FlowNodeRow> {
        let start = self.branch_start(node, None)?;
        match start.branch_index {
            Some(_) => self.upstream(start),
            None => None,
        }
    }

    /// Last node of the chain `node` is on.
    pub fn branch_end<'a>(&'a self, node: &'a FlowNodeRow) -> &'a FlowNodeRow {
        let mut current = node;
        while let Some(next) = self.downstream(current) {
            current = next;
        }
        current
    }

    /// Check the structural rules of a workflow and return its node ids in
    /// topological order (each node after its upstream).
    ///
    /// # Errors
    /// - [`EngineError::DuplicateNodeId`] if two nodes share an id.
    /// - [`EngineError::UnknownNodeReference`] if a link names a missing node.
    /// - [`EngineError::LinkMismatch`] if a downstream link is not mirrored
    ///   by the target's upstream link, or targets a branch entry.
    /// - [`EngineError::MissingRoot`] / [`EngineError::MultipleRoots`] unless
    ///   exactly one node has no upstream.
    /// - [`EngineError::CycleDetected`] if following upstream links loops.
    pub fn validate(&self) -> Result<Vec<i64>, EngineError> {
        // -------------------------------------------------------------------
        // 1. Ensure node ids are unique
        // -------------------------------------------------------------------
        let mut seen_ids: HashSet<i64> = HashSet::new();
        for node in &self.nodes {
            if !seen_ids.insert(node.id) {
                return Err(EngineError::DuplicateNodeId(node.id));
            }
        }

        // -------------------------------------------------------------------
        // 2. Validate link endpoints
        // -------------------------------------------------------------------
        for node in &self.nodes {
            if let Some(id) = node.upstream_id {
                if !seen_ids.contains(&id) {
                    return Err(EngineError::UnknownNodeReference {
                        node_id: node.id,
                        side: "upstream",
                    });
                }
            }
            if let Some(id) = node.downstream_id {
                let Some(downstream) = self.get(id) else {
                    return Err(EngineError::UnknownNodeReference {
                        node_id: node.id,
                        side: "downstream",
                    });
                };
                if downstream.upstream_id != Some(node.id) || downstream.branch_index.is_some() {
                    return Err(EngineError::LinkMismatch {
                        node_id: node.id,
                        downstream_id: id,
                    });
                }
            }
        }

        // -------------------------------------------------------------------
        // 3. Exactly one root
        // -------------------------------------------------------------------
        let roots: Vec<i64> = self
            .nodes
            .iter()
            .filter(|node| node.upstream_id.is_none())
            .map(|node| node.id)
            .collect();
        match roots.len() {
            0 if !self.nodes.is_empty() => return Err(EngineError::MissingRoot),
            0 | 1 => {}
            _ => return Err(EngineError::MultipleRoots(roots)),
        }

        // -------------------------------------------------------------------
        // 4. Topological sort over upstream edges (Kahn's algorithm)
        // -------------------------------------------------------------------
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut in_degree: HashMap<i64, usize> = HashMap::new();

        for node in &self.nodes {
            children.entry(node.id).or_default();
            in_degree.entry(node.id).or_insert(0);
        }
        for node in &self.nodes {
            if let Some(upstream) = node.upstream_id {
                children.entry(upstream).or_default().push(node.id);
                *in_degree.entry(node.id).or_insert(0) += 1;
            }
        }

        let mut queue: VecDeque<i64> = roots.into_iter().collect();
        let mut sorted: Vec<i64> = Vec::with_capacity(self.nodes.len());

        while let Some(node_id) = queue.pop_front() {
            sorted.push(node_id);

            if let Some(next) = children.get(&node_id) {
                for &child in next {
                    let degree = in_degree.entry(child).or_insert(0);
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        // If we didn't visit every node the upstream links contain a cycle.
        if sorted.len() != self.nodes.len() {
            return Err(EngineError::CycleDetected);
        }

        Ok(sorted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn node(id: i64, upstream: Option<i64>, downstream: Option<i64>) -> FlowNodeRow {
        FlowNodeRow {
            id,
            workflow_id: 1,
            title: None,
            node_type: "mock".into(),
            config: Value::Null,
            upstream_id: upstream,
            downstream_id: downstream,
            branch_index: None,
        }
    }

    fn branch(id: i64, parent: i64, index: i32, downstream: Option<i64>) -> FlowNodeRow {
        FlowNodeRow {
            branch_index: Some(index),
            ..node(id, Some(parent), downstream)
        }
    }

    /// ```text
    /// 1 ─ 2 ─ 5
    ///     ├─[0] 3 ─ 4
    ///     └─[1] 6 ─[0] 7
    /// ```
    fn nested() -> FlowGraph {
        FlowGraph::new(vec![
            node(1, None, Some(2)),
            node(2, Some(1), Some(5)),
            branch(3, 2, 0, Some(4)),
            node(4, Some(3), None),
            node(5, Some(2), None),
            branch(6, 2, 1, None),
            branch(7, 6, 0, None),
        ])
    }

    #[test]
    fn root_is_the_node_without_upstream() {
        let graph = nested();
        assert_eq!(graph.root().map(|n| n.id), Some(1));
    }

    #[test]
    fn branches_are_sorted_by_index() {
        let graph = nested();
        let parent = graph.get(2).unwrap();
        let ids: Vec<i64> = graph.branches(parent).iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![3, 6]);
        // the plain downstream is not a branch
        assert!(graph.branches(graph.get(5).unwrap()).is_empty());
    }

    #[test]
    fn branch_start_stops_at_entry_or_root() {
        let graph = nested();
        assert_eq!(graph.branch_start(graph.get(4).unwrap(), None).map(|n| n.id), Some(3));
        assert_eq!(graph.branch_start(graph.get(5).unwrap(), None).map(|n| n.id), Some(1));
    }

    #[test]
    fn branch_start_with_parent_crosses_nested_branches() {
        let graph = nested();
        let parent = graph.get(2).unwrap();
        let deep = graph.get(7).unwrap();
        assert_eq!(graph.branch_start(deep, Some(parent)).map(|n| n.id), Some(6));
        // a node that is not under `parent` has no such start
        assert!(graph.branch_start(graph.get(1).unwrap(), Some(parent)).is_none());
    }

    #[test]
    fn branch_parent_of_main_chain_is_none() {
        let graph = nested();
        assert!(graph.branch_parent(graph.get(5).unwrap()).is_none());
        assert_eq!(graph.branch_parent(graph.get(4).unwrap()).map(|n| n.id), Some(2));
        assert_eq!(graph.branch_parent(graph.get(7).unwrap()).map(|n| n.id), Some(6));
    }

    #[test]
    fn branch_end_follows_downstream() {
        let graph = nested();
        assert_eq!(graph.branch_end(graph.get(1).unwrap()).id, 5);
        assert_eq!(graph.branch_end(graph.get(3).unwrap()).id, 4);
    }

    #[test]
    fn dangling_links_are_treated_as_absent() {
        let graph = FlowGraph::new(vec![node(1, None, Some(9))]);
        assert!(graph.downstream(graph.get(1).unwrap()).is_none());
    }

    #[test]
    fn valid_graph_returns_topological_order() {
        let order = nested().validate().expect("should be valid");
        assert_eq!(order.len(), 7);
        let position = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(position(2) < position(3));
        assert!(position(6) < position(7));
        assert_eq!(order[0], 1);
    }

    #[test]
    fn empty_graph_is_valid() {
        assert_eq!(FlowGraph::default().validate().unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let graph = FlowGraph::new(vec![node(1, None, None), node(1, None, None)]);
        assert!(matches!(graph.validate(), Err(EngineError::DuplicateNodeId(1))));
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let graph = FlowGraph::new(vec![node(1, None, Some(2))]);
        assert!(matches!(
            graph.validate(),
            Err(EngineError::UnknownNodeReference { node_id: 1, side: "downstream" })
        ));
    }

    #[test]
    fn one_sided_link_is_rejected() {
        let graph = FlowGraph::new(vec![node(1, None, Some(2)), node(2, None, None)]);
        assert!(matches!(
            graph.validate(),
            Err(EngineError::LinkMismatch { node_id: 1, downstream_id: 2 })
        ));
    }

    #[test]
    fn two_roots_are_rejected() {
        let graph = FlowGraph::new(vec![node(1, None, None), node(2, None, None)]);
        assert!(matches!(graph.validate(), Err(EngineError::MultipleRoots(ids)) if ids == vec![1, 2]));
    }

    #[test]
    fn cycle_without_root_is_reported_missing_root() {
        let graph = FlowGraph::new(vec![node(1, Some(2), Some(2)), node(2, Some(1), Some(1))]);
        assert!(matches!(graph.validate(), Err(EngineError::MissingRoot)));
    }

    #[test]
    fn detached_cycle_is_detected() {
        let graph = FlowGraph::new(vec![
            node(1, None, None),
            node(2, Some(3), Some(3)),
            node(3, Some(2), Some(2)),
        ]);
        assert!(matches!(graph.validate(), Err(EngineError::CycleDetected)));
    }
}
