use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::catalog::{CatalogEntry, DumpId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Waiting,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug)]
struct Node {
    entry: Arc<CatalogEntry>,
    state: NodeState,
    /// Dependencies inside the graph that have not completed yet.
    waiting_on: HashSet<DumpId>,
}

/// Ready-queue scheduler over the entries of one phase.
///
/// An entry becomes ready once every dependency that is part of the graph has completed.
/// Dependencies on entries outside the graph are considered satisfied; callers report those
/// that failed earlier in the run through [`DependencyGraph::fail`] before scheduling.
#[derive(Debug)]
pub struct DependencyGraph {
    nodes: HashMap<DumpId, Node>,
    /// Reverse edges, including edges from dump ids that are not part of the graph.
    dependents: HashMap<DumpId, Vec<DumpId>>,
    ready: VecDeque<DumpId>,
    running: usize,
}

impl DependencyGraph {
    /// Builds the graph. Entries without pending dependencies are ready in input order.
    pub fn new(entries: impl IntoIterator<Item = Arc<CatalogEntry>>) -> Self {
        let entries: Vec<_> = entries.into_iter().collect();
        let ids: HashSet<DumpId> = entries.iter().map(|entry| entry.dump_id).collect();

        let mut nodes = HashMap::with_capacity(entries.len());
        let mut dependents: HashMap<DumpId, Vec<DumpId>> = HashMap::new();
        let mut ready = VecDeque::new();

        for entry in entries {
            let mut waiting_on = HashSet::new();
            for dependency in &entry.dependencies {
                dependents.entry(*dependency).or_default().push(entry.dump_id);
                if ids.contains(dependency) {
                    waiting_on.insert(*dependency);
                }
            }

            let state = if waiting_on.is_empty() {
                ready.push_back(entry.dump_id);
                NodeState::Ready
            } else {
                NodeState::Waiting
            };

            nodes.insert(
                entry.dump_id,
                Node {
                    entry,
                    state,
                    waiting_on,
                },
            );
        }

        Self {
            nodes,
            dependents,
            ready,
            running: 0,
        }
    }

    /// Takes the next entry whose dependencies have all completed and marks it running.
    pub fn next_ready(&mut self) -> Option<Arc<CatalogEntry>> {
        while let Some(dump_id) = self.ready.pop_front() {
            let Some(node) = self.nodes.get_mut(&dump_id) else {
                continue;
            };
            if node.state != NodeState::Ready {
                continue;
            }

            node.state = NodeState::Running;
            self.running += 1;

            return Some(node.entry.clone());
        }

        None
    }

    /// Marks a running entry as completed and releases the dependents waiting only on it.
    pub fn complete(&mut self, dump_id: DumpId) {
        self.finish_running(dump_id, NodeState::Completed);

        let Some(dependents) = self.dependents.get(&dump_id) else {
            return;
        };

        for dependent in dependents {
            let Some(node) = self.nodes.get_mut(dependent) else {
                continue;
            };
            node.waiting_on.remove(&dump_id);

            if node.state == NodeState::Waiting && node.waiting_on.is_empty() {
                node.state = NodeState::Ready;
                self.ready.push_back(*dependent);
            }
        }
    }

    /// Marks an entry as failed and skips everything that transitively depends on it.
    ///
    /// `dump_id` does not need to be part of the graph. Returns the skipped entries in the
    /// order they were reached.
    pub fn fail(&mut self, dump_id: DumpId) -> Vec<DumpId> {
        self.finish_running(dump_id, NodeState::Failed);

        let mut skipped = Vec::new();
        let mut queue = VecDeque::from([dump_id]);
        while let Some(current) = queue.pop_front() {
            let Some(dependents) = self.dependents.get(&current) else {
                continue;
            };

            for dependent in dependents {
                let Some(node) = self.nodes.get_mut(dependent) else {
                    continue;
                };
                if matches!(node.state, NodeState::Waiting | NodeState::Ready) {
                    node.state = NodeState::Skipped;
                    skipped.push(*dependent);
                    queue.push_back(*dependent);
                }
            }
        }

        skipped
    }

    /// Returns `true` once every entry has completed, failed or been skipped.
    pub fn is_finished(&self) -> bool {
        self.running == 0 && self.pending().is_empty()
    }

    /// Number of entries currently handed out by [`DependencyGraph::next_ready`].
    pub fn running(&self) -> usize {
        self.running
    }

    /// Entries not started yet, sorted by dump id.
    ///
    /// Pending entries with nothing running and nothing ready can never start: their
    /// dependencies form a cycle.
    pub fn pending(&self) -> Vec<DumpId> {
        let mut pending: Vec<_> = self
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node.state, NodeState::Waiting | NodeState::Ready))
            .map(|(dump_id, _)| *dump_id)
            .collect();
        pending.sort();

        pending
    }

    /// Returns `true` when entries are pending but none can ever become ready.
    pub fn is_stalled(&self) -> bool {
        self.running == 0 && self.ready.is_empty() && !self.pending().is_empty()
    }

    fn finish_running(&mut self, dump_id: DumpId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(&dump_id) {
            if node.state == NodeState::Running {
                self.running -= 1;
            }
            node.state = state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry::data_entry;

    fn entry(dump_id: i32, dependencies: &[i32]) -> Arc<CatalogEntry> {
        let mut entry = data_entry(dump_id, "public", &format!("t{dump_id}"));
        entry.dependencies = dependencies.iter().copied().map(DumpId).collect();
        Arc::new(entry)
    }

    fn drain_ready(graph: &mut DependencyGraph) -> Vec<i32> {
        std::iter::from_fn(|| graph.next_ready())
            .map(|entry| entry.dump_id.0)
            .collect()
    }

    #[test]
    fn dependents_start_only_after_their_dependencies_complete() {
        let mut graph = DependencyGraph::new([
            entry(1, &[]),
            entry(2, &[1]),
            entry(3, &[]),
            entry(4, &[2, 3]),
        ]);

        assert_eq!(drain_ready(&mut graph), vec![1, 3]);
        assert_eq!(graph.running(), 2);

        graph.complete(DumpId(3));
        assert!(graph.next_ready().is_none());

        graph.complete(DumpId(1));
        assert_eq!(drain_ready(&mut graph), vec![2]);

        graph.complete(DumpId(2));
        assert_eq!(drain_ready(&mut graph), vec![4]);
        assert!(!graph.is_finished());

        graph.complete(DumpId(4));
        assert!(graph.is_finished());
    }

    #[test]
    fn dependencies_outside_the_graph_are_satisfied() {
        let mut graph = DependencyGraph::new([entry(10, &[1, 2])]);
        assert_eq!(drain_ready(&mut graph), vec![10]);
    }

    #[test]
    fn failure_skips_transitive_dependents() {
        let mut graph = DependencyGraph::new([
            entry(1, &[]),
            entry(2, &[1]),
            entry(3, &[2]),
            entry(4, &[]),
        ]);

        assert_eq!(drain_ready(&mut graph), vec![1, 4]);
        assert_eq!(graph.fail(DumpId(1)), vec![DumpId(2), DumpId(3)]);

        graph.complete(DumpId(4));
        assert!(graph.next_ready().is_none());
        assert!(graph.is_finished());
    }

    #[test]
    fn failure_outside_the_graph_skips_ready_entries() {
        let mut graph = DependencyGraph::new([entry(5, &[1]), entry(6, &[])]);

        assert_eq!(graph.fail(DumpId(1)), vec![DumpId(5)]);
        assert_eq!(drain_ready(&mut graph), vec![6]);
    }

    #[test]
    fn cycles_stall_the_graph() {
        let mut graph = DependencyGraph::new([entry(1, &[2]), entry(2, &[1]), entry(3, &[])]);

        assert_eq!(drain_ready(&mut graph), vec![3]);
        assert!(!graph.is_stalled());

        graph.complete(DumpId(3));
        assert!(graph.is_stalled());
        assert_eq!(graph.pending(), vec![DumpId(1), DumpId(2)]);
    }
}
