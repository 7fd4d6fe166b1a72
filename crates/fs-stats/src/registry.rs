//! FlowRegistry - routes lifecycle events to per-flow correlation state
//!
//! Owns the trace-id to FlowEntry map. Events for the same trace id can
//! arrive from several threads at once (request path, response path,
//! callbacks, cloned branches); per-flow mutation is serialized by a
//! per-entry mutex while different trace ids never contend.
//!
//! Statistics must never affect mediation: an event for an unknown trace
//! id is a silent no-op, and nothing in here returns an error to the
//! producer.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::debug;

use fs_common::{CollectionConfig, ComponentType, FlowEvent, NodeIdentity};

use crate::aggregate::AggregateStore;
use crate::flow::FlowEntry;

/// Entry point for every lifecycle event, keyed by trace id.
///
/// Owned by the service instance that embeds it; lifecycle is tied to that
/// service, not to a process-wide static.
pub struct FlowRegistry {
    flows: DashMap<String, Mutex<FlowEntry>>,
    store: Arc<AggregateStore>,
    enabled: bool,
    node: NodeIdentity,
}

impl FlowRegistry {
    pub fn new(store: Arc<AggregateStore>) -> Self {
        Self::with_config(store, &CollectionConfig::default(), NodeIdentity::default())
    }

    pub fn with_config(
        store: Arc<AggregateStore>,
        collection: &CollectionConfig,
        node: NodeIdentity,
    ) -> Self {
        Self {
            flows: DashMap::new(),
            store,
            enabled: collection.enabled,
            node,
        }
    }

    /// Cluster identity recorded as metadata only
    pub fn node(&self) -> &NodeIdentity {
        &self.node
    }

    /// Dispatch one lifecycle event to the right flow
    pub fn handle(&self, event: FlowEvent) {
        if !self.enabled {
            return;
        }

        match event {
            FlowEvent::CreateEntry {
                trace_id,
                component_id,
                component_type,
                parent_id,
                msg_id,
                time,
                is_response,
            } => self.create_entry(
                &trace_id,
                &component_id,
                component_type,
                &parent_id,
                msg_id,
                time,
                is_response,
            ),
            FlowEvent::CreateFaultLog {
                trace_id,
                component_id,
                component_type,
                parent_id,
                msg_id,
                time,
                is_response,
            } => self.create_fault_log(
                &trace_id,
                &component_id,
                component_type,
                &parent_id,
                msg_id,
                time,
                is_response,
            ),
            FlowEvent::CloseLog {
                trace_id,
                component_id,
                parent_id,
                msg_id,
                time,
            } => self.close_log(&trace_id, &component_id, msg_id, parent_id.as_deref(), time),
            FlowEvent::CloseFaultLog {
                trace_id,
                component_id,
                msg_id,
                time,
            } => self.close_fault_log(&trace_id, &component_id, msg_id, time),
            FlowEvent::AddCallback {
                trace_id,
                callback_id,
                msg_id,
            } => self.add_callback(&trace_id, &callback_id, msg_id),
            FlowEvent::CallbackReceived {
                trace_id,
                callback_id,
                time,
            } => self.callback_received(&trace_id, &callback_id, time),
            FlowEvent::RemoveCallback {
                trace_id,
                callback_id,
            } => self.remove_callback(&trace_id, &callback_id),
            FlowEvent::InformClone { trace_id, msg_id } => {
                self.inform_clone(&trace_id, msg_id)
            }
            FlowEvent::InformAggregateFinish { trace_id, time } => {
                self.inform_aggregate_finish(&trace_id, time)
            }
            FlowEvent::Finalize { trace_id, time } => self.finalize_entry(&trace_id, time),
            FlowEvent::CloseForcefully { trace_id, time } => {
                self.close_forcefully(&trace_id, time)
            }
        }
    }

    /// Create a flow for the trace id, or append a component log to the
    /// existing one. A create after a finalized flow starts a fresh,
    /// unrelated entry.
    #[allow(clippy::too_many_arguments)]
    pub fn create_entry(
        &self,
        trace_id: &str,
        component_id: &str,
        component_type: ComponentType,
        parent_id: &str,
        msg_id: i64,
        time: u64,
        is_response: bool,
    ) {
        if !self.enabled {
            return;
        }

        match self.flows.entry(trace_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                entry.get().lock().create_log(
                    component_id,
                    component_type,
                    msg_id,
                    parent_id,
                    time,
                    is_response,
                );
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                debug!(trace_id = %trace_id, root = %component_id, "Opening flow");
                entry.insert(Mutex::new(FlowEntry::new(
                    component_id,
                    component_type,
                    msg_id,
                    time,
                    is_response,
                )));
                counter!("flowscope_flows_opened_total").increment(1);
                gauge!("flowscope_flows_active").set(self.flows.len() as f64);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_fault_log(
        &self,
        trace_id: &str,
        component_id: &str,
        component_type: ComponentType,
        parent_id: &str,
        msg_id: i64,
        time: u64,
        is_response: bool,
    ) {
        if let Some(entry) = self.flows.get(trace_id) {
            entry.lock().create_fault_log(
                component_id,
                component_type,
                msg_id,
                parent_id,
                time,
                is_response,
            );
        } else {
            self.on_missing(trace_id);
        }
    }

    /// Close a branch; when the flow's synchronous portion looks finished,
    /// attempt to finalize it.
    pub fn close_log(
        &self,
        trace_id: &str,
        component_id: &str,
        msg_id: i64,
        parent_id: Option<&str>,
        time: u64,
    ) {
        let maybe_done = match self.flows.get(trace_id) {
            Some(entry) => entry.lock().close_log(component_id, msg_id, parent_id, time),
            None => {
                self.on_missing(trace_id);
                return;
            }
        };
        // Map ref dropped above; finalization takes the shard write lock

        if maybe_done {
            self.end_message_flow(trace_id, time, false);
        }
    }

    pub fn close_fault_log(&self, trace_id: &str, component_id: &str, msg_id: i64, time: u64) {
        let maybe_done = match self.flows.get(trace_id) {
            Some(entry) => entry.lock().close_fault_log(component_id, msg_id, time),
            None => {
                self.on_missing(trace_id);
                return;
            }
        };

        if maybe_done {
            self.end_message_flow(trace_id, time, false);
        }
    }

    pub fn add_callback(&self, trace_id: &str, callback_id: &str, msg_id: i64) {
        if let Some(entry) = self.flows.get(trace_id) {
            entry.lock().add_callback(callback_id, msg_id);
        } else {
            self.on_missing(trace_id);
        }
    }

    pub fn callback_received(&self, trace_id: &str, callback_id: &str, time: u64) {
        if let Some(entry) = self.flows.get(trace_id) {
            entry.lock().callback_received(callback_id, time);
        } else {
            self.on_missing(trace_id);
        }
    }

    pub fn remove_callback(&self, trace_id: &str, callback_id: &str) {
        if let Some(entry) = self.flows.get(trace_id) {
            entry.lock().remove_callback(callback_id);
        } else {
            self.on_missing(trace_id);
        }
    }

    /// Note a clone announced with an externally assigned branch msg id
    pub fn inform_clone(&self, trace_id: &str, msg_id: i64) {
        if let Some(entry) = self.flows.get(trace_id) {
            entry.lock().register_clone(msg_id);
        } else {
            self.on_missing(trace_id);
        }
    }

    /// An aggregating component combined the flow's cloned branches; close
    /// them and, when the flow looks drained, attempt finalization.
    pub fn inform_aggregate_finish(&self, trace_id: &str, time: u64) {
        let maybe_done = match self.flows.get(trace_id) {
            Some(entry) => entry.lock().aggregate_finished(time),
            None => {
                self.on_missing(trace_id);
                return;
            }
        };

        if maybe_done {
            self.end_message_flow(trace_id, time, false);
        }
    }

    /// Attempt normal completion regardless of prior close hints
    pub fn finalize_entry(&self, trace_id: &str, time: u64) {
        self.end_message_flow(trace_id, time, false);
    }

    /// Finalize even with branches still open (abnormal termination)
    pub fn close_forcefully(&self, trace_id: &str, time: u64) {
        self.end_message_flow(trace_id, time, true);
    }

    /// Fresh msg id for a cloned fan-out branch, or -1 if the flow is gone
    pub fn cloned_msg_number(&self, trace_id: &str) -> i64 {
        match self.flows.get(trace_id) {
            Some(entry) => entry.lock().next_cloned_msg_id(),
            None => {
                self.on_missing(trace_id);
                -1
            }
        }
    }

    /// Number of flows currently resident
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    /// Decide completion, remove from the registry, and merge into the
    /// store as one critical section per flow.
    ///
    /// `remove_if` evaluates `end_all` under the map's shard write lock
    /// while holding the flow mutex, and per-flow guards are never held
    /// outside a map-ref scope elsewhere, so a successful removal owns the
    /// flow exclusively. No event for the removed trace id can resurrect
    /// it; a later create starts a fresh entry.
    fn end_message_flow(&self, trace_id: &str, time: u64, forceful: bool) {
        let removed = self
            .flows
            .remove_if(trace_id, |_, flow| flow.lock().end_all(time, forceful));

        if let Some((_, flow)) = removed {
            let logs = flow.into_inner().into_logs();
            debug!(trace_id = %trace_id, logs = logs.len(), forceful = forceful, "Harvesting flow");
            self.store.merge(&logs);
            counter!("flowscope_flows_completed_total").increment(1);
            gauge!("flowscope_flows_active").set(self.flows.len() as f64);
        }
    }

    fn on_missing(&self, trace_id: &str) {
        // The flow may have completed already, or collection may have been
        // toggled; either way this event is dropped silently
        debug!(trace_id = %trace_id, "Event for unknown trace id dropped");
        counter!("flowscope_events_dropped_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs_common::TRUNK_MSG_ID;

    fn registry() -> (FlowRegistry, Arc<AggregateStore>) {
        let store = Arc::new(AggregateStore::new());
        (FlowRegistry::new(store.clone()), store)
    }

    #[test]
    fn test_linear_flow_is_harvested_once() {
        let (registry, store) = registry();

        registry.create_entry("t-1", "ProxyA", ComponentType::Proxy, "", TRUNK_MSG_ID, 0, false);
        registry.create_entry("t-1", "Seq1", ComponentType::Sequence, "ProxyA", TRUNK_MSG_ID, 1, false);
        registry.close_log("t-1", "Seq1", TRUNK_MSG_ID, None, 5);
        assert_eq!(store.tree_count(), 0);
        assert_eq!(registry.active_flows(), 1);

        registry.finalize_entry("t-1", 10);
        assert_eq!(registry.active_flows(), 0);
        assert_eq!(store.tree_count(), 1);

        store
            .with_tree("ProxyA", |tree| {
                assert_eq!(tree.root().avg_time, 10.0);
                assert_eq!(tree.root().children()[0].avg_time, 4.0);
            })
            .unwrap();
    }

    #[test]
    fn test_events_for_unknown_trace_are_no_ops() {
        let (registry, store) = registry();

        registry.close_log("ghost", "Seq1", TRUNK_MSG_ID, None, 5);
        registry.add_callback("ghost", "cb-1", TRUNK_MSG_ID);
        registry.callback_received("ghost", "cb-1", 6);
        registry.remove_callback("ghost", "cb-1");
        registry.inform_clone("ghost", 0);
        registry.inform_aggregate_finish("ghost", 8);
        registry.finalize_entry("ghost", 10);
        assert_eq!(registry.cloned_msg_number("ghost"), -1);

        assert_eq!(registry.active_flows(), 0);
        assert_eq!(store.tree_count(), 0);
    }

    #[test]
    fn test_callback_gating_through_registry() {
        let (registry, store) = registry();

        registry.create_entry("t-1", "ProxyA", ComponentType::Proxy, "", TRUNK_MSG_ID, 0, false);
        registry.add_callback("t-1", "cb-1", TRUNK_MSG_ID);

        // All branches closed but callback pending
        registry.finalize_entry("t-1", 10);
        assert_eq!(registry.active_flows(), 1);

        registry.callback_received("t-1", "cb-1", 12);
        registry.remove_callback("t-1", "cb-1");
        assert_eq!(registry.active_flows(), 1);

        // Gating cleared; the next finalize attempt succeeds
        registry.finalize_entry("t-1", 12);
        assert_eq!(registry.active_flows(), 0);
        assert_eq!(store.tree_count(), 1);
    }

    #[test]
    fn test_forceful_close_bypasses_open_branches() {
        let (registry, store) = registry();

        registry.create_entry("t-1", "ProxyA", ComponentType::Proxy, "", TRUNK_MSG_ID, 0, false);
        registry.create_entry("t-1", "Seq1", ComponentType::Sequence, "ProxyA", TRUNK_MSG_ID, 1, false);

        registry.finalize_entry("t-1", 10);
        assert_eq!(registry.active_flows(), 1);

        registry.close_forcefully("t-1", 10);
        assert_eq!(registry.active_flows(), 0);
        assert_eq!(store.tree_count(), 1);
    }

    #[test]
    fn test_create_after_finalize_starts_fresh_flow() {
        let (registry, store) = registry();

        registry.create_entry("t-1", "ProxyA", ComponentType::Proxy, "", TRUNK_MSG_ID, 0, false);
        registry.finalize_entry("t-1", 10);
        assert_eq!(store.tree_count(), 1);

        registry.create_entry("t-1", "ProxyA", ComponentType::Proxy, "", TRUNK_MSG_ID, 20, false);
        assert_eq!(registry.active_flows(), 1);
        registry.finalize_entry("t-1", 50);

        store
            .with_tree("ProxyA", |tree| {
                assert_eq!(tree.root().invocation_count, 2);
                assert_eq!(tree.root().max_time, 30);
            })
            .unwrap();
    }

    #[test]
    fn test_disabled_collection_ignores_everything() {
        let store = Arc::new(AggregateStore::new());
        let registry = FlowRegistry::with_config(
            store.clone(),
            &CollectionConfig { enabled: false },
            NodeIdentity::default(),
        );

        registry.handle(FlowEvent::CreateEntry {
            trace_id: "t-1".to_string(),
            component_id: "ProxyA".to_string(),
            component_type: ComponentType::Proxy,
            parent_id: String::new(),
            msg_id: TRUNK_MSG_ID,
            time: 0,
            is_response: false,
        });

        assert_eq!(registry.active_flows(), 0);
    }

    #[test]
    fn test_inform_clone_advances_clone_counter() {
        let (registry, _) = registry();

        registry.create_entry("t-1", "API1", ComponentType::Api, "", TRUNK_MSG_ID, 0, false);
        registry.handle(FlowEvent::InformClone {
            trace_id: "t-1".to_string(),
            msg_id: 3,
        });

        // Fresh ids start after the announced one
        assert_eq!(registry.cloned_msg_number("t-1"), 4);
    }

    #[test]
    fn test_inform_aggregate_finish_closes_cloned_branches() {
        let (registry, store) = registry();

        registry.create_entry("t-1", "API1", ComponentType::Api, "", TRUNK_MSG_ID, 0, false);
        let clone_a = registry.cloned_msg_number("t-1");
        let clone_b = registry.cloned_msg_number("t-1");
        registry.create_entry("t-1", "CloneSeq", ComponentType::Sequence, "API1", clone_a, 1, false);
        registry.create_entry("t-1", "CloneSeq", ComponentType::Sequence, "API1", clone_b, 1, false);

        // Cloned branches open, normal finalize is gated
        registry.finalize_entry("t-1", 5);
        assert_eq!(registry.active_flows(), 1);

        registry.handle(FlowEvent::InformAggregateFinish {
            trace_id: "t-1".to_string(),
            time: 6,
        });
        assert_eq!(registry.active_flows(), 1);

        registry.finalize_entry("t-1", 10);
        assert_eq!(registry.active_flows(), 0);

        store
            .with_tree("API1", |tree| {
                assert_eq!(tree.root().children().len(), 2);
                for child in tree.root().children() {
                    // Closed by the aggregate notification at t=6
                    assert_eq!(child.max_time, 5);
                }
            })
            .unwrap();
    }

    #[test]
    fn test_handle_dispatches_by_kind() {
        let (registry, store) = registry();

        registry.handle(FlowEvent::CreateEntry {
            trace_id: "t-1".to_string(),
            component_id: "API1".to_string(),
            component_type: ComponentType::Api,
            parent_id: String::new(),
            msg_id: TRUNK_MSG_ID,
            time: 0,
            is_response: false,
        });
        registry.handle(FlowEvent::Finalize {
            trace_id: "t-1".to_string(),
            time: 7,
        });

        assert_eq!(store.tree_count(), 1);
        store
            .with_tree("API1", |tree| assert_eq!(tree.root().avg_time, 7.0))
            .unwrap();
    }
}
