//! AggregateStore - cross-flow statistics trees
//!
//! One tree per distinct root component. Completed flows arrive as flat
//! log sequences in pre-order with child counts; the merge reconstructs
//! the tree shape from that encoding alone and folds durations into
//! running count/min/max/average and fault totals.

use dashmap::DashMap;
use metrics::{counter, gauge};
use tracing::debug;

use fs_common::ComponentType;

use crate::log::ComponentLog;

/// Running statistics for one component position within an aggregate tree.
///
/// Created on first observation of a `(parent_id, component_id, msg_id,
/// parent_msg_id)` tuple under its parent; every later observation updates
/// counters in place. Nodes are only ever removed by a full store reset.
#[derive(Debug, Clone)]
pub struct AggregateNode {
    pub component_id: String,
    pub component_type: ComponentType,
    pub parent_id: String,
    pub parent_msg_id: i64,
    pub msg_id: i64,
    pub max_time: u64,
    pub min_time: u64,
    pub avg_time: f64,
    pub invocation_count: u64,
    pub fault_count: u64,
    pub is_response: bool,
    children: Vec<AggregateNode>,
}

impl AggregateNode {
    fn from_log(log: &ComponentLog) -> Self {
        Self {
            component_id: log.component_id.clone(),
            component_type: log.component_type,
            parent_id: log.parent_component_id.clone(),
            parent_msg_id: log.parent_msg_id,
            msg_id: log.msg_id,
            max_time: 0,
            min_time: u64::MAX,
            avg_time: 0.0,
            invocation_count: 0,
            fault_count: 0,
            is_response: log.is_response,
            children: Vec::new(),
        }
    }

    /// Fold one observed invocation into the running counters
    fn observe(&mut self, log: &ComponentLog) {
        let duration = log.duration();
        let count = self.invocation_count as f64;
        self.avg_time = (self.avg_time * count + duration as f64) / (count + 1.0);
        self.invocation_count += 1;
        self.max_time = self.max_time.max(duration);
        self.min_time = self.min_time.min(duration);
        self.fault_count += log.fault_count as u64;
    }

    fn find_or_create_child(&mut self, log: &ComponentLog) -> &mut AggregateNode {
        let pos = self.children.iter().position(|child| {
            child.parent_id == log.parent_component_id
                && child.component_id == log.component_id
                && child.msg_id == log.msg_id
                && child.parent_msg_id == log.parent_msg_id
        });

        let idx = match pos {
            Some(idx) => idx,
            None => {
                self.children.push(AggregateNode::from_log(log));
                self.children.len() - 1
            }
        };
        &mut self.children[idx]
    }

    pub fn children(&self) -> &[AggregateNode] {
        &self.children
    }
}

/// One persistent tree rooted at an entry-point component
#[derive(Debug, Clone)]
pub struct AggregateTree {
    root: AggregateNode,
}

impl AggregateTree {
    fn seed(root_log: &ComponentLog) -> Self {
        Self {
            root: AggregateNode::from_log(root_log),
        }
    }

    pub fn root(&self) -> &AggregateNode {
        &self.root
    }

    /// Merge one completed flow's flat logs into this tree.
    ///
    /// Each log's `child_count` bounds how many of the subsequent entries
    /// matching it as parent belong to it; mark-and-skip guarantees each
    /// flat log is consumed exactly once even though the scan re-examines
    /// the array at every recursion level.
    fn merge(&mut self, logs: &[ComponentLog]) {
        self.root.observe(&logs[0]);

        let mut visited = vec![false; logs.len()];
        visited[0] = true;
        Self::merge_children(&mut self.root, logs, 0, &mut visited);
    }

    fn merge_children(
        node: &mut AggregateNode,
        logs: &[ComponentLog],
        parent_pos: usize,
        visited: &mut [bool],
    ) {
        let parent_id = logs[parent_pos].component_id.clone();
        let parent_msg_id = logs[parent_pos].msg_id;
        let mut remaining = logs[parent_pos].child_count;

        let mut i = parent_pos + 1;
        while i < logs.len() && remaining > 0 {
            if !visited[i]
                && logs[i].parent_component_id == parent_id
                && logs[i].parent_msg_id == parent_msg_id
            {
                visited[i] = true;
                remaining -= 1;

                let child = node.find_or_create_child(&logs[i]);
                child.observe(&logs[i]);
                if logs[i].has_children {
                    Self::merge_children(child, logs, i, visited);
                }
            }
            i += 1;
        }
    }
}

/// Process-wide map from root component id to its aggregate tree.
///
/// Shared across all completing flows and the periodic cleaner; tree
/// mutation happens under the map's per-entry exclusivity and never while
/// any per-flow lock is held.
#[derive(Debug, Default)]
pub struct AggregateStore {
    trees: DashMap<String, AggregateTree>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self {
            trees: DashMap::new(),
        }
    }

    /// Merge a completed flow's harvested logs, creating the tree on first
    /// use of its root component id
    pub fn merge(&self, logs: &[ComponentLog]) {
        let Some(root_log) = logs.first() else {
            return;
        };

        let mut entry = self
            .trees
            .entry(root_log.component_id.clone())
            .or_insert_with(|| {
                debug!(root = %root_log.component_id, "Creating aggregate tree");
                AggregateTree::seed(root_log)
            });
        entry.merge(logs);
        // Release the shard write lock before trees.len() below read-locks
        // every shard, which would self-deadlock on this entry's shard
        drop(entry);

        counter!("flowscope_flows_merged_total").increment(1);
        gauge!("flowscope_aggregate_trees").set(self.trees.len() as f64);
    }

    /// Run a closure against one tree under the store's read access
    pub fn with_tree<R>(&self, root_id: &str, f: impl FnOnce(&AggregateTree) -> R) -> Option<R> {
        self.trees.get(root_id).map(|tree| f(&tree))
    }

    pub fn tree_names(&self) -> Vec<String> {
        self.trees.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Drop every tree. Invoked by the cleaner or on demand.
    pub fn reset(&self) {
        let dropped = self.trees.len();
        self.trees.clear();
        counter!("flowscope_store_resets_total").increment(1);
        gauge!("flowscope_aggregate_trees").set(0.0);
        debug!(dropped = dropped, "Aggregate store reset");
    }
}
