//! Coral Discovery - Mesh Discovery Service
//!
//! Registry where colonies (mesh gateways) and agents (workloads inside a
//! mesh) publish identity and reachability, partitioned by `mesh_id`.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod config;
pub mod directory;
pub mod handlers;
pub mod metrics;
pub mod partition;
pub mod server;
pub mod store;

pub use config::Config;
pub use directory::{PartitionDirectory, partition_id};
pub use handlers::AppState;
pub use server::{create_router, run};
