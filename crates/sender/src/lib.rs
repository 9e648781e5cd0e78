//! The Klaxon sender.
//!
//! Turns durable incident rows into concrete messages: the escalation
//! engine walks incidents through their plan steps, the aggregation engine
//! rate-limits and batches per (plan, application, priority, target), the
//! renderer produces content from per-(application, mode) templates, the
//! contact resolver picks a destination with mode fallback, and the
//! dispatcher delivers through slaves or local vendors.
//!
//! One process is the master and runs the maintenance tick; any number of
//! slave processes run only the dispatch pipeline, fed over RPC.

pub mod aggregation;
pub mod auditlog;
pub mod cache;
pub mod config;
pub mod contacts;
pub mod dispatcher;
pub mod error;
pub mod escalation;
pub mod maintenance;
pub mod metrics;
pub mod renderer;
pub mod rpc;

pub use aggregation::AggregationEngine;
pub use auditlog::AuditLog;
pub use cache::Cache;
pub use config::{OneclickConfig, SenderConfig, SenderSection, VendorsConfig};
pub use contacts::ContactResolver;
pub use dispatcher::{Dispatcher, SharedReceiver, VendorSender};
pub use error::SenderError;
pub use escalation::EscalationEngine;
pub use maintenance::{MaintenanceConfig, MaintenanceLoop};
pub use metrics::{ModeStat, SenderMetrics};
pub use renderer::{OneclickSigner, Renderer};
pub use rpc::{RpcRequest, RpcServer, SlavePool};

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
