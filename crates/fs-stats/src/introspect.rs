//! Read-side adapter over the aggregate store
//!
//! Translates aggregate trees into flat, externally consumable records for
//! the monitoring surface. Pure read/administrative side; no correlation
//! logic lives here.

use std::sync::Arc;

use fs_common::FlatStatistic;

use crate::aggregate::{AggregateNode, AggregateStore};

/// Introspection façade handed to the monitoring caller
#[derive(Clone)]
pub struct StatisticsReader {
    store: Arc<AggregateStore>,
}

impl StatisticsReader {
    pub fn new(store: Arc<AggregateStore>) -> Self {
        Self { store }
    }

    pub fn tree_count(&self) -> usize {
        self.store.tree_count()
    }

    pub fn tree_names(&self) -> Vec<String> {
        self.store.tree_names()
    }

    /// Drop all collected statistics
    pub fn reset(&self) {
        self.store.reset();
    }

    /// The root of one tree as a flat record
    pub fn get_tree(&self, root_id: &str) -> Option<FlatStatistic> {
        self.store.with_tree(root_id, |tree| flatten_node(tree.root()))
    }

    /// One whole tree flattened in pre-order
    pub fn get_tree_as_list(&self, root_id: &str) -> Option<Vec<FlatStatistic>> {
        self.store.with_tree(root_id, |tree| {
            let mut records = Vec::new();
            flatten_preorder(tree.root(), &mut records);
            records
        })
    }
}

fn flatten_node(node: &AggregateNode) -> FlatStatistic {
    FlatStatistic {
        component_id: node.component_id.clone(),
        component_type: node.component_type,
        parent_id: node.parent_id.clone(),
        parent_msg_id: node.parent_msg_id,
        msg_id: node.msg_id,
        max_time: node.max_time,
        // A node that was created but never observed reports 0, not MAX
        min_time: if node.invocation_count == 0 { 0 } else { node.min_time },
        avg_time: node.avg_time,
        invocation_count: node.invocation_count,
        fault_count: node.fault_count,
        is_response: node.is_response,
    }
}

fn flatten_preorder(node: &AggregateNode, out: &mut Vec<FlatStatistic>) {
    out.push(flatten_node(node));
    for child in node.children() {
        flatten_preorder(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowEntry;
    use fs_common::{ComponentType, TRUNK_MSG_ID};

    fn seeded_reader() -> StatisticsReader {
        let store = Arc::new(AggregateStore::new());

        let mut flow = FlowEntry::new("ProxyA", ComponentType::Proxy, TRUNK_MSG_ID, 0, false);
        flow.create_log("Seq1", ComponentType::Sequence, TRUNK_MSG_ID, "ProxyA", 1, false);
        flow.create_log("Med1", ComponentType::Mediator, TRUNK_MSG_ID, "Seq1", 2, false);
        flow.close_log("Med1", TRUNK_MSG_ID, None, 3);
        flow.close_log("Seq1", TRUNK_MSG_ID, None, 5);
        assert!(flow.end_all(10, false));
        store.merge(&flow.into_logs());

        StatisticsReader::new(store)
    }

    #[test]
    fn test_get_tree_returns_root_record() {
        let reader = seeded_reader();
        assert_eq!(reader.tree_count(), 1);

        let root = reader.get_tree("ProxyA").unwrap();
        assert_eq!(root.component_id, "ProxyA");
        assert_eq!(root.parent_id, "");
        assert_eq!(root.invocation_count, 1);
        assert_eq!(root.avg_time, 10.0);
    }

    #[test]
    fn test_list_is_preorder() {
        let reader = seeded_reader();

        let list = reader.get_tree_as_list("ProxyA").unwrap();
        let ids: Vec<&str> = list.iter().map(|r| r.component_id.as_str()).collect();
        assert_eq!(ids, vec!["ProxyA", "Seq1", "Med1"]);

        // Each record carries its parent linkage
        assert_eq!(list[1].parent_id, "ProxyA");
        assert_eq!(list[2].parent_id, "Seq1");
    }

    #[test]
    fn test_missing_tree_is_none() {
        let reader = seeded_reader();
        assert!(reader.get_tree("Nope").is_none());
        assert!(reader.get_tree_as_list("Nope").is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let reader = seeded_reader();
        reader.reset();
        assert_eq!(reader.tree_count(), 0);
        assert!(reader.get_tree("ProxyA").is_none());
    }
}
