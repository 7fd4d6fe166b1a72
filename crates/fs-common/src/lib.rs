//! Shared types for the FlowScope statistics engine: the mediation
//! component model, flow lifecycle events, flattened introspection
//! records, and configuration structs used across the workspace.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

// ============================================================================
// Component Model
// ============================================================================

/// Message id of the unbranched trunk. Cloned fan-out branches get
/// non-negative ids from the flow's clone counter.
pub const TRUNK_MSG_ID: i64 = -1;

/// The kind of mediation component reporting statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentType {
    Proxy,
    Api,
    Sequence,
    Mediator,
    Endpoint,
    InboundEndpoint,
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ComponentType::Proxy => "PROXY",
            ComponentType::Api => "API",
            ComponentType::Sequence => "SEQUENCE",
            ComponentType::Mediator => "MEDIATOR",
            ComponentType::Endpoint => "ENDPOINT",
            ComponentType::InboundEndpoint => "INBOUND_ENDPOINT",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// A lifecycle event emitted by the mediation pipeline.
///
/// Each variant carries exactly the fields that event kind needs; there are
/// no optional fields whose meaning depends on context. Times are epoch
/// milliseconds supplied by the producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FlowEvent {
    /// A component started participating in a flow. The first event for a
    /// trace id establishes the flow root.
    #[serde(rename_all = "camelCase")]
    CreateEntry {
        trace_id: String,
        component_id: String,
        component_type: ComponentType,
        /// `""` for the flow root
        parent_id: String,
        msg_id: i64,
        time: u64,
        is_response: bool,
    },
    /// A fault sequence started somewhere in the flow
    #[serde(rename_all = "camelCase")]
    CreateFaultLog {
        trace_id: String,
        component_id: String,
        component_type: ComponentType,
        parent_id: String,
        msg_id: i64,
        time: u64,
        is_response: bool,
    },
    /// A component finished its synchronous work
    #[serde(rename_all = "camelCase")]
    CloseLog {
        trace_id: String,
        component_id: String,
        parent_id: Option<String>,
        msg_id: i64,
        time: u64,
    },
    /// A fault sequence finished
    #[serde(rename_all = "camelCase")]
    CloseFaultLog {
        trace_id: String,
        component_id: String,
        msg_id: i64,
        time: u64,
    },
    /// A pending external response was registered against a branch
    #[serde(rename_all = "camelCase")]
    AddCallback {
        trace_id: String,
        callback_id: String,
        msg_id: i64,
    },
    /// The external response for a registered callback arrived
    #[serde(rename_all = "camelCase")]
    CallbackReceived {
        trace_id: String,
        callback_id: String,
        time: u64,
    },
    /// A registered callback needs no further rollup
    #[serde(rename_all = "camelCase")]
    RemoveCallback {
        trace_id: String,
        callback_id: String,
    },
    /// The pipeline cloned the message into a fan-out branch with an
    /// externally assigned msg id
    #[serde(rename_all = "camelCase")]
    InformClone { trace_id: String, msg_id: i64 },
    /// An aggregating component finished combining cloned branches
    #[serde(rename_all = "camelCase")]
    InformAggregateFinish { trace_id: String, time: u64 },
    /// Attempt normal completion of the flow
    #[serde(rename_all = "camelCase")]
    Finalize { trace_id: String, time: u64 },
    /// Finalize regardless of open branches (abnormal termination)
    #[serde(rename_all = "camelCase")]
    CloseForcefully { trace_id: String, time: u64 },
}

impl FlowEvent {
    /// The correlation key this event is addressed to
    pub fn trace_id(&self) -> &str {
        match self {
            FlowEvent::CreateEntry { trace_id, .. }
            | FlowEvent::CreateFaultLog { trace_id, .. }
            | FlowEvent::CloseLog { trace_id, .. }
            | FlowEvent::CloseFaultLog { trace_id, .. }
            | FlowEvent::AddCallback { trace_id, .. }
            | FlowEvent::CallbackReceived { trace_id, .. }
            | FlowEvent::RemoveCallback { trace_id, .. }
            | FlowEvent::InformClone { trace_id, .. }
            | FlowEvent::InformAggregateFinish { trace_id, .. }
            | FlowEvent::Finalize { trace_id, .. }
            | FlowEvent::CloseForcefully { trace_id, .. } => trace_id,
        }
    }
}

// ============================================================================
// Introspection Records
// ============================================================================

/// One aggregate node flattened for external consumption
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlatStatistic {
    pub component_id: String,
    pub component_type: ComponentType,
    /// `""` for a tree root
    pub parent_id: String,
    pub parent_msg_id: i64,
    pub msg_id: i64,
    pub max_time: u64,
    pub min_time: u64,
    pub avg_time: f64,
    pub invocation_count: u64,
    pub fault_count: u64,
    pub is_response: bool,
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Statistics collection settings, read once at startup by the owning process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub enabled: bool,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Periodic store reset settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl CleanerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
        }
    }
}

/// Cluster identity recorded as metadata only; no cross-node synchronization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub host: Option<String>,
    pub port: Option<u16>,
}
