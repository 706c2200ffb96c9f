pub mod browse;
pub mod config;
pub mod hierarchy;
pub mod identity;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod publisher;
pub mod sources;
pub mod sync;

pub use pipeline::{Envelope, MirrorError, Pipeline, TopologyMismatch};
