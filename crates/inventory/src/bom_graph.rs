//! BOM graph guard: acyclicity and bounded depth over a tenant's BOM edges.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use factory_core::PartId;

use crate::bom::BomError;

/// Locked maximum number of levels below any BOM root.
pub const MAX_BOM_DEPTH: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BomEdge {
    pub parent_part_id: PartId,
    pub component_part_id: PartId,
}

/// Adjacency view of every parent → component edge of one tenant.
#[derive(Debug, Clone, Default)]
pub struct BomGraph {
    children: BTreeMap<PartId, Vec<PartId>>,
    parents: BTreeMap<PartId, Vec<PartId>>,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

impl BomGraph {
    pub fn from_edges(edges: impl IntoIterator<Item = BomEdge>) -> Self {
        let mut graph = Self::default();
        for e in edges {
            graph.children.entry(e.parent_part_id).or_default().push(e.component_part_id);
            graph.parents.entry(e.component_part_id).or_default().push(e.parent_part_id);
        }
        graph
    }

    fn children_of(&self, node: PartId) -> &[PartId] {
        self.children.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fail if any cycle is reachable from `root`.
    pub fn validate_acyclic(&self, root: PartId) -> Result<(), BomError> {
        self.longest_path_from(root).map(|_| ())
    }

    /// Fail if the deepest chain below `root` has more than `max_depth` edges.
    pub fn validate_max_depth(&self, root: PartId, max_depth: usize) -> Result<(), BomError> {
        let depth = self.longest_path_from(root)?;
        if depth > max_depth {
            return Err(BomError::MaxDepthExceeded { max_depth, depth });
        }
        Ok(())
    }

    /// Number of edges on the longest downward chain starting at `root`.
    ///
    /// Iterative DFS; a back edge to a node still on the stack is a cycle.
    pub fn longest_path_from(&self, root: PartId) -> Result<usize, BomError> {
        let mut marks: HashMap<PartId, Mark> = HashMap::new();
        let mut depth: HashMap<PartId, usize> = HashMap::new();
        let mut stack: Vec<(PartId, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::InProgress);

        while let Some((node, next_child)) = stack.pop() {
            let children = self.children_of(node);
            if let Some(&child) = children.get(next_child) {
                stack.push((node, next_child + 1));
                match marks.get(&child) {
                    Some(Mark::InProgress) => return Err(BomError::CycleDetected(child)),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::InProgress);
                        stack.push((child, 0));
                    }
                }
                continue;
            }

            let below = children
                .iter()
                .map(|c| depth.get(c).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, below);
            marks.insert(node, Mark::Done);
        }

        Ok(depth.get(&root).copied().unwrap_or(0))
    }

    /// Every part that (transitively) uses `node` as a component.
    pub fn ancestors(&self, node: PartId) -> BTreeSet<PartId> {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![node];
        while let Some(current) = frontier.pop() {
            for parent in self.parents.get(&current).map(Vec::as_slice).unwrap_or(&[]) {
                if seen.insert(*parent) {
                    frontier.push(*parent);
                }
            }
        }
        seen.remove(&node);
        seen
    }
}
