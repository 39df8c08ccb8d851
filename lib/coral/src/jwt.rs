//! Bootstrap token creation and verification
//!
//! Tokens are compact-form EdDSA JWTs: `base64url(header).base64url(payload).
//! base64url(signature)` with no padding, signed over the ASCII bytes of
//! `header_b64 "." payload_b64`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use chrono::Utc;
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::error::CoralError;
use crate::keys::{Jwks, SigningKeyStore, verify_with_jwk};

pub const ISSUER: &str = "coral-discovery";
pub const AUDIENCE: &str = "coral-colony";

/// Lifetime of a bootstrap token. The request schema carries no TTL, so every
/// token gets this.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
    kid: String,
}

/// Claims carried by a bootstrap token authorizing an agent to join a colony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapClaims {
    pub jti: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub reef_id: String,
    pub colony_id: String,
    pub agent_id: String,
    pub intent: String,
}

/// Mints a bootstrap token signed with the store's current key. Returns the
/// compact JWT and its expiry in seconds since epoch.
pub fn create_bootstrap_token(
    store: &SigningKeyStore,
    reef_id: &str,
    colony_id: &str,
    agent_id: &str,
    intent: &str,
    ttl_secs: i64,
) -> Result<(String, i64), CoralError> {
    let now = Utc::now().timestamp();
    let exp = now + ttl_secs;

    let header = Header {
        alg: "EdDSA".to_string(),
        typ: "JWT".to_string(),
        kid: store.current_kid().to_string(),
    };
    let claims = BootstrapClaims {
        jti: uuid::Uuid::new_v4().to_string(),
        iss: ISSUER.to_string(),
        aud: vec![AUDIENCE.to_string()],
        iat: now,
        exp,
        reef_id: reef_id.to_string(),
        colony_id: colony_id.to_string(),
        agent_id: agent_id.to_string(),
        intent: intent.to_string(),
    };

    let header_b64 = BASE64_URL.encode(serde_json::to_vec(&header)?);
    let payload_b64 = BASE64_URL.encode(serde_json::to_vec(&claims)?);
    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let signature = store.sign(signing_input.as_bytes());

    Ok((
        format!("{}.{}", signing_input, BASE64_URL.encode(signature.to_bytes())),
        exp,
    ))
}

/// Verifies a compact JWT against a published JWKS: the signature must match
/// the key named by `kid` and the token must not be expired.
pub fn verify_bootstrap_token(token: &str, jwks: &Jwks) -> Result<BootstrapClaims, CoralError> {
    let mut parts = token.split('.');
    let (header_b64, payload_b64, signature_b64) =
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => {
                return Err(CoralError::Verification(
                    "token is not a compact JWT".to_string(),
                ));
            }
        };

    let header: Header = serde_json::from_slice(
        &BASE64_URL
            .decode(header_b64)
            .map_err(|e| CoralError::Verification(format!("invalid header encoding: {}", e)))?,
    )
    .map_err(|e| CoralError::Verification(format!("invalid header: {}", e)))?;

    if header.alg != "EdDSA" {
        return Err(CoralError::Verification(format!(
            "unsupported algorithm: {}",
            header.alg
        )));
    }

    let jwk = jwks
        .find(&header.kid)
        .ok_or_else(|| CoralError::Verification(format!("unknown kid: {}", header.kid)))?;

    let signature_bytes = BASE64_URL
        .decode(signature_b64)
        .map_err(|e| CoralError::Verification(format!("invalid signature encoding: {}", e)))?;
    let signature_bytes: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| CoralError::Verification("signature is not 64 bytes".to_string()))?;
    let signature = Signature::from_bytes(&signature_bytes);

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    verify_with_jwk(jwk, signing_input.as_bytes(), &signature)?;

    let claims: BootstrapClaims = serde_json::from_slice(
        &BASE64_URL
            .decode(payload_b64)
            .map_err(|e| CoralError::Verification(format!("invalid payload encoding: {}", e)))?,
    )
    .map_err(|e| CoralError::Verification(format!("invalid claims: {}", e)))?;

    if claims.exp < Utc::now().timestamp() {
        return Err(CoralError::Verification("token is expired".to_string()));
    }

    Ok(claims)
}
