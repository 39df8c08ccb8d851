//! Coral discovery client/server library
//!
//! Shared types, Ed25519 key handling, and bootstrap token (JWT) operations
//! for the Coral mesh discovery service.

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

pub mod error;
pub mod jwt;
pub mod keys;
pub mod net;
pub mod types;

pub use error::CoralError;
pub use jwt::{
    AUDIENCE, BootstrapClaims, DEFAULT_TOKEN_TTL_SECS, ISSUER, create_bootstrap_token,
    verify_bootstrap_token,
};
pub use keys::{GeneratedKeyPair, Jwk, Jwks, SigningKeyConfig, SigningKeyStore, generate_keypair};
pub use net::is_private_address;
pub use types::{
    AgentRecord, CaFingerprint, CleanupSnapshot, ColonyRecord, ConnectCode,
    CreateBootstrapTokenRequest, CreateBootstrapTokenResponse, ErrorBody, HealthResponse,
    LookupAgentRequest, LookupAgentResponse, LookupColonyRequest, LookupColonyResponse,
    ObservedEndpoint, PublicEndpoint, RegisterAgentRequest, RegisterColonyRequest,
    RegisterResponse, StatsResponse,
};
