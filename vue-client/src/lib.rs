//! Client for the energy-monitoring account API: login, device list and
//! per-channel usage snapshots, plus the domain types they decode into.

pub mod api;
pub mod domain;
pub mod error;

pub use api::{Credentials, VueConfig, VueSession};
pub use error::VueError;
