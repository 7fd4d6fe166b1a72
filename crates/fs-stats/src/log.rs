//! ComponentLog - one component's participation in one flow
//!
//! Created when the component announces itself, mutated only while the
//! branch is open (end time, child count, fault rollup), then frozen into
//! the flow's flat log sequence.

use fs_common::ComponentType;

/// Record of one component invocation within a flow.
///
/// Logs live in a single growable array per flow; tree edges are expressed
/// through `parent_level` back-references and `child_count`, never through
/// separate child objects.
#[derive(Debug, Clone)]
pub struct ComponentLog {
    pub component_id: String,
    pub component_type: ComponentType,
    /// `TRUNK_MSG_ID` for the unbranched trunk, a clone counter value for
    /// fan-out branches
    pub msg_id: i64,
    pub parent_msg_id: i64,
    /// `""` for the flow root
    pub parent_component_id: String,
    /// Index of the parent within the flow's log sequence; `None` for the
    /// root. Always refers to an index strictly earlier in the sequence.
    pub parent_level: Option<usize>,
    pub start_time: u64,
    /// `None` while the branch is open
    pub end_time: Option<u64>,
    pub has_children: bool,
    pub child_count: u32,
    pub fault_count: u32,
    pub is_response: bool,
    /// Set for logs opened by a fault sequence; close events are matched
    /// within their own class
    pub is_fault: bool,
}

impl ComponentLog {
    /// A root-level log with no parent
    pub fn root(
        component_id: impl Into<String>,
        component_type: ComponentType,
        msg_id: i64,
        start_time: u64,
        is_response: bool,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            component_type,
            msg_id,
            parent_msg_id: msg_id,
            parent_component_id: String::new(),
            parent_level: None,
            start_time,
            end_time: None,
            has_children: false,
            child_count: 0,
            fault_count: 0,
            is_response,
            is_fault: false,
        }
    }

    /// A log attached under the parent at `parent_level`
    pub fn child_of(
        parent: &ComponentLog,
        parent_level: usize,
        component_id: impl Into<String>,
        component_type: ComponentType,
        msg_id: i64,
        start_time: u64,
        is_response: bool,
    ) -> Self {
        Self {
            component_id: component_id.into(),
            component_type,
            msg_id,
            parent_msg_id: parent.msg_id,
            parent_component_id: parent.component_id.clone(),
            parent_level: Some(parent_level),
            start_time,
            end_time: None,
            has_children: false,
            child_count: 0,
            fault_count: 0,
            is_response,
            is_fault: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Measured duration; a log harvested without an end time reports 0
    /// rather than skewing aggregates with an underflow.
    pub fn duration(&self) -> u64 {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time))
            .unwrap_or(0)
    }
}
