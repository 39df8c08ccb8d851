//! Stored registration records
//!
//! Timestamps are milliseconds since the Unix epoch. The wire layer converts
//! them to RFC 3339 where the response schemas call for it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::endpoint::{ObservedEndpoint, PublicEndpoint};

/// Registration held for a mesh gateway. One colony per `mesh_id` at a time;
/// a differing `pubkey` for the same `mesh_id` is a split-brain and is
/// rejected at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColonyRecord {
    pub mesh_id: String,
    pub pubkey: String,
    pub endpoints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_ipv4: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mesh_ipv6: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_endpoint: Option<ObservedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_endpoint: Option<PublicEndpoint>,
    #[serde(default)]
    pub nat_hint: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}

/// Registration held for a workload inside a mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: String,
    pub mesh_id: String,
    pub pubkey: String,
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_endpoint: Option<ObservedEndpoint>,
    pub created_at: i64,
    pub updated_at: i64,
    pub expires_at: i64,
}
