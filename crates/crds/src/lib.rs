//! Monitoring CRD Definitions
//!
//! Custom resources consumed by the Prometheus shard operator, together with
//! the shared credential, selector and relabeling types they embed.

pub mod auth;
pub mod pod_monitor;
pub mod probe;
pub mod prometheus;
pub mod prometheus_rule;
pub mod references;
pub mod relabel;
pub mod scrape_config;
pub mod service_monitor;

pub use auth::*;
pub use pod_monitor::*;
pub use probe::*;
pub use prometheus::*;
pub use prometheus_rule::*;
pub use references::*;
pub use relabel::*;
pub use scrape_config::*;
pub use service_monitor::*;
