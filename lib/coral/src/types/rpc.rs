//! Request and response schemas for the Connect unary RPCs
//!
//! Field names are exact. Optional fields are omitted when unset. 64-bit
//! integers travel as decimal strings (see [`string_i64`]); RFC 3339 strings
//! carry timestamps (`expiresAt`, `lastSeen`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::endpoint::{ObservedEndpoint, PublicEndpoint};

/// Serialize an `i64` as a decimal string. Deserialization accepts either a
/// string or a bare number so hand-written clients keep working.
pub mod string_i64 {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrInt {
            String(String),
            Int(i64),
        }

        match StringOrInt::deserialize(deserializer)? {
            StringOrInt::String(s) => s.parse().map_err(de::Error::custom),
            StringOrInt::Int(i) => Ok(i),
        }
    }
}

// ==================== RegisterColony ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterColonyRequest {
    #[serde(default)]
    pub mesh_id: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_ipv6: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<u16>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_endpoint: Option<ObservedEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_endpoint: Option<PublicEndpoint>,
}

/// Shared by `RegisterColony` and `RegisterAgent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub success: bool,
    pub ttl: u32,
    /// RFC 3339
    pub expires_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_endpoint: Option<ObservedEndpoint>,
}

// ==================== LookupColony ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupColonyRequest {
    #[serde(default)]
    pub mesh_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupColonyResponse {
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    /// RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
    pub observed_endpoints: Vec<ObservedEndpoint>,
    pub nat: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_endpoint: Option<PublicEndpoint>,
}

// ==================== RegisterAgent / LookupAgent ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub mesh_id: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_endpoint: Option<ObservedEndpoint>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupAgentRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub mesh_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupAgentResponse {
    pub agent_id: String,
    pub mesh_id: String,
    pub pubkey: String,
    pub endpoints: Vec<String>,
    pub observed_endpoints: Vec<ObservedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

// ==================== CreateBootstrapToken ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBootstrapTokenRequest {
    #[serde(default)]
    pub reef_id: String,
    #[serde(default)]
    pub colony_id: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBootstrapTokenResponse {
    pub jwt: String,
    /// Seconds since epoch, stringified (64-bit on the wire).
    #[serde(with = "string_i64")]
    pub expires_at: i64,
}

// ==================== Health ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(with = "string_i64")]
    pub uptime_seconds: i64,
    #[serde(with = "string_i64")]
    pub registered_colonies: i64,
}

// ==================== Metrics ====================

/// Counts from one registry partition's cleanup cycle, keyed in the metrics
/// store by the originating partition id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSnapshot {
    pub expired_colonies: i64,
    pub expired_agents: i64,
    /// Milliseconds since epoch.
    pub updated_at: i64,
}

/// Hourly rollup served at `/stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub operations: HashMap<String, i64>,
    pub cleanups: HashMap<String, CleanupSnapshot>,
}
