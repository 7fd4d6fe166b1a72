//! FlowEntry - per-flow correlation state machine
//!
//! Reconstructs one message flow's invocation tree from unordered
//! start/end/fault/callback events. A flow is complete only once every
//! opened branch, every registered callback, and every open fault has
//! resolved; `end_all` evaluates that predicate, the registry performs the
//! harvest.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use fs_common::{ComponentType, TRUNK_MSG_ID};

use crate::log::ComponentLog;

/// Correlation state for one in-flight message flow.
///
/// `logs` is append-only; index 0 is always the flow root. `open_branches`
/// is an insertion-ordered set of log indices (open order preserved,
/// removal by key), so the most recently opened branch is the last entry
/// and out-of-order closes stay O(1) on membership.
#[derive(Debug)]
pub struct FlowEntry {
    logs: Vec<ComponentLog>,
    open_branches: IndexMap<usize, ()>,
    callbacks: HashMap<String, usize>,
    open_fault_count: u32,
    cloned_branch_counter: i64,
}

impl FlowEntry {
    /// Create a flow with its root component at index 0
    pub fn new(
        component_id: impl Into<String>,
        component_type: ComponentType,
        msg_id: i64,
        start_time: u64,
        is_response: bool,
    ) -> Self {
        let root = ComponentLog::root(component_id, component_type, msg_id, start_time, is_response);
        let mut open_branches = IndexMap::new();
        open_branches.insert(0, ());
        Self {
            logs: vec![root],
            open_branches,
            callbacks: HashMap::new(),
            open_fault_count: 0,
            cloned_branch_counter: -1,
        }
    }

    /// Record a component start event.
    ///
    /// Resolves the parent among the open branches: by msg id on the
    /// unnamed path, by (parent id, msg id) otherwise, falling back to the
    /// open trunk branch (`msg_id == -1`) when the exact lineage is not
    /// open yet. Unresolvable events are dropped.
    pub fn create_log(
        &mut self,
        component_id: &str,
        component_type: ComponentType,
        msg_id: i64,
        parent_id: &str,
        start_time: u64,
        is_response: bool,
    ) {
        if self.open_branches.is_empty() {
            // Event arrived without a prior create for this flow; treat it
            // as a new root-level log rather than dropping the whole branch
            let idx = self.logs.len();
            self.logs.push(ComponentLog::root(
                component_id,
                component_type,
                msg_id,
                start_time,
                is_response,
            ));
            self.open_branches.insert(idx, ());
            return;
        }

        // Re-announcement of the root while only the root is open
        if let Some((&first_open, _)) = self.open_branches.last() {
            if first_open == 0 && self.logs[0].component_id == component_id {
                debug!(component_id = %component_id, "Duplicate root announcement, ignoring");
                return;
            }
        }

        let parent_idx = if parent_id.is_empty() {
            self.find_open_branch(|log| log.msg_id == msg_id)
                .or_else(|| self.find_open_trunk())
        } else {
            self.find_open_branch(|log| log.component_id == parent_id && log.msg_id == msg_id)
                .or_else(|| self.find_open_trunk())
        };

        let parent_idx = match parent_idx {
            Some(idx) => idx,
            None => {
                debug!(
                    component_id = %component_id,
                    parent_id = %parent_id,
                    msg_id = msg_id,
                    "No open parent branch resolvable, dropping event"
                );
                return;
            }
        };

        self.append_child(parent_idx, component_id, component_type, msg_id, start_time, is_response, false);
    }

    /// Record the start of a fault sequence.
    ///
    /// The parent is the most recent log in the whole sequence matching
    /// (parent id, msg id), open or not; a fault may start from any point.
    /// Fault visibility rolls up every ancestor to the root.
    pub fn create_fault_log(
        &mut self,
        component_id: &str,
        component_type: ComponentType,
        msg_id: i64,
        parent_id: &str,
        start_time: u64,
        is_response: bool,
    ) {
        let parent_idx = self
            .logs
            .iter()
            .enumerate()
            .rev()
            .find(|(_, log)| log.component_id == parent_id && log.msg_id == msg_id)
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        self.append_child(parent_idx, component_id, component_type, msg_id, start_time, is_response, true);

        let mut cursor = Some(parent_idx);
        while let Some(idx) = cursor {
            self.logs[idx].fault_count += 1;
            cursor = self.logs[idx].parent_level;
        }

        self.open_fault_count += 1;
    }

    /// Record a component end event.
    ///
    /// Returns true when no open branch remains at all, a hint that the
    /// synchronous portion of the flow may be finished. Since the root is
    /// only ever closed by `end_all`, this fires for flows whose root-level
    /// logs were opened defensively; normal flows complete through an
    /// explicit finalize. The caller still has to check callbacks and
    /// faults before harvesting.
    pub fn close_log(
        &mut self,
        component_id: &str,
        msg_id: i64,
        parent_id: Option<&str>,
        end_time: u64,
    ) -> bool {
        let found = self.find_open_branch(|log| {
            !log.is_fault
                && log.component_id == component_id
                && log.msg_id == msg_id
                && parent_id.map_or(true, |p| log.parent_component_id == p)
        });

        // The root is never closed here; only end_all may close it
        if let Some(idx) = found {
            if idx != 0 {
                self.close_branch(idx, end_time);
            }
        }

        self.open_branches.is_empty()
    }

    /// Record a fault sequence end event.
    ///
    /// Returns true when no callbacks and no open faults remain.
    pub fn close_fault_log(&mut self, component_id: &str, msg_id: i64, end_time: u64) -> bool {
        let found = self.find_open_branch(|log| {
            log.is_fault && log.component_id == component_id && log.msg_id == msg_id
        });

        if let Some(idx) = found {
            if idx != 0 {
                self.close_branch(idx, end_time);
            }
        }

        self.open_fault_count = self.open_fault_count.saturating_sub(1);
        self.callbacks.is_empty() && self.open_fault_count == 0
    }

    /// Pin a pending external response to the branch that issued it
    pub fn add_callback(&mut self, callback_id: &str, msg_id: i64) {
        let idx = self
            .find_open_branch(|log| log.msg_id == msg_id)
            .unwrap_or(0);
        self.callbacks.insert(callback_id.to_string(), idx);
    }

    /// Correct ancestor end times once the external reply lands.
    ///
    /// The pinned branch was typically closed when the request went out;
    /// this walk overwrites already-closed end times upward so the ancestors
    /// report when the reply actually arrived.
    pub fn callback_received(&mut self, callback_id: &str, end_time: u64) {
        if let Some(&idx) = self.callbacks.get(callback_id) {
            self.extend_end_time(Some(idx), end_time);
        }
    }

    /// Drop a callback once no further rollup is needed for it
    pub fn remove_callback(&mut self, callback_id: &str) {
        self.callbacks.remove(callback_id);
    }

    /// Evaluate the completion predicate and, on success, stamp end times
    /// on the remaining open entries (normally just the root).
    ///
    /// `forceful` bypasses the predicate entirely and closes every still
    /// open log at `end_time`.
    pub fn end_all(&mut self, end_time: u64, forceful: bool) -> bool {
        let complete = forceful
            || (self.callbacks.is_empty()
                && self.open_fault_count == 0
                && self.open_branches.len() <= 1);

        if !complete {
            return false;
        }

        if forceful {
            for log in &mut self.logs {
                if log.end_time.is_none() {
                    log.end_time = Some(end_time);
                }
            }
        } else {
            let open: Vec<usize> = self.open_branches.keys().copied().collect();
            for idx in open {
                if self.logs[idx].end_time.is_none() {
                    self.logs[idx].end_time = Some(end_time);
                }
            }
        }

        self.open_branches.clear();
        true
    }

    /// Next msg id for a cloned fan-out branch; first clone gets 0
    pub fn next_cloned_msg_id(&mut self) -> i64 {
        self.cloned_branch_counter += 1;
        self.cloned_branch_counter
    }

    /// Note a clone announced with an externally assigned msg id, keeping
    /// the counter ahead of it so later `next_cloned_msg_id` calls do not
    /// collide
    pub fn register_clone(&mut self, msg_id: i64) {
        if msg_id > self.cloned_branch_counter {
            self.cloned_branch_counter = msg_id;
        }
    }

    /// An aggregating component combined the cloned branches; close every
    /// cloned branch still open at `end_time`.
    ///
    /// Returns the same drained hint as `close_log`: true when no open
    /// branch remains at all.
    pub fn aggregate_finished(&mut self, end_time: u64) -> bool {
        let cloned: Vec<usize> = self
            .open_branches
            .keys()
            .copied()
            .filter(|&idx| idx != 0 && self.logs[idx].msg_id != TRUNK_MSG_ID)
            .collect();
        for idx in cloned {
            self.close_branch(idx, end_time);
        }
        self.open_branches.is_empty()
    }

    pub fn logs(&self) -> &[ComponentLog] {
        &self.logs
    }

    pub fn into_logs(self) -> Vec<ComponentLog> {
        self.logs
    }

    pub fn open_branch_count(&self) -> usize {
        self.open_branches.len()
    }

    pub fn pending_callback_count(&self) -> usize {
        self.callbacks.len()
    }

    pub fn open_fault_count(&self) -> u32 {
        self.open_fault_count
    }

    // ------------------------------------------------------------------
    // internals
    // ------------------------------------------------------------------

    /// Most-recently-opened-first scan over the open branches
    fn find_open_branch(&self, pred: impl Fn(&ComponentLog) -> bool) -> Option<usize> {
        self.open_branches
            .keys()
            .rev()
            .copied()
            .find(|&idx| pred(&self.logs[idx]))
    }

    /// Closest open ancestor on the unbranched trunk. Known heuristic:
    /// orphaned branch events reparent here, which can attribute their
    /// statistics to the wrong ancestor under out-of-order delivery.
    fn find_open_trunk(&self) -> Option<usize> {
        self.find_open_branch(|log| log.msg_id == TRUNK_MSG_ID)
    }

    #[allow(clippy::too_many_arguments)]
    fn append_child(
        &mut self,
        parent_idx: usize,
        component_id: &str,
        component_type: ComponentType,
        msg_id: i64,
        start_time: u64,
        is_response: bool,
        is_fault: bool,
    ) {
        let new_idx = self.logs.len();
        let parent = &mut self.logs[parent_idx];
        parent.child_count += 1;
        parent.has_children = true;

        let mut log = ComponentLog::child_of(
            parent,
            parent_idx,
            component_id,
            component_type,
            msg_id,
            start_time,
            is_response,
        );
        log.is_fault = is_fault;

        self.logs.push(log);
        self.open_branches.insert(new_idx, ());
    }

    fn close_branch(&mut self, idx: usize, end_time: u64) {
        self.open_branches.shift_remove(&idx);
        self.logs[idx].end_time = Some(end_time);
        let parent = self.logs[idx].parent_level;
        self.extend_end_time(parent, end_time);
    }

    /// While the ancestor is already closed, overwrite its end time with
    /// this later one and keep climbing; stop at the first still-open
    /// ancestor. Keeps a closed ancestor's reported end equal to the latest
    /// finish of any of its asynchronously completing descendants.
    fn extend_end_time(&mut self, start: Option<usize>, end_time: u64) {
        let mut cursor = start;
        while let Some(idx) = cursor {
            let log = &mut self.logs[idx];
            if log.end_time.is_some() {
                log.end_time = Some(end_time);
                cursor = log.parent_level;
            } else {
                break;
            }
        }
    }
}
