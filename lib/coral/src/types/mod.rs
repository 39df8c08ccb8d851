//! Wire and record types for the discovery service

mod endpoint;
mod error;
mod record;
mod rpc;

pub use endpoint::{CaFingerprint, ObservedEndpoint, PublicEndpoint};
pub use error::{ConnectCode, ErrorBody};
pub use record::{AgentRecord, ColonyRecord};
pub use rpc::{
    CleanupSnapshot, CreateBootstrapTokenRequest, CreateBootstrapTokenResponse, HealthResponse,
    LookupAgentRequest, LookupAgentResponse, LookupColonyRequest, LookupColonyResponse,
    RegisterAgentRequest, RegisterColonyRequest, RegisterResponse, StatsResponse, string_i64,
};
