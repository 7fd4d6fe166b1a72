//! FlowScope statistics core
//!
//! Reconstructs a tree of component invocations for every in-flight
//! message flow from an unordered stream of start/end/fault/callback
//! events, and folds each completed flow into a long-lived aggregate tree
//! with running performance counters.
//!
//! - FlowRegistry: routes lifecycle events by trace id, harvests completed flows
//! - FlowEntry: per-flow correlation state machine
//! - AggregateStore: cross-flow statistics trees with find-or-create merge
//! - StatisticsReader: flat read-side records for the monitoring surface
//! - StoreCleaner: periodic store reset

pub mod aggregate;
pub mod cleaner;
pub mod flow;
pub mod introspect;
pub mod log;
pub mod registry;

pub use aggregate::{AggregateNode, AggregateStore, AggregateTree};
pub use cleaner::StoreCleaner;
pub use flow::FlowEntry;
pub use introspect::StatisticsReader;
pub use log::ComponentLog;
pub use registry::FlowRegistry;
