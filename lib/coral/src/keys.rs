//! Ed25519 signing key store and JWKS publication
//!
//! Keys arrive as configuration secrets: `DISCOVERY_SIGNING_KEY` holds the
//! current key as JSON `{id, privateKey}`, `DISCOVERY_PREVIOUS_KEYS` an
//! optional JSON array of the same shape kept live for JWKS publication
//! during rotation. The base64 payload is either a 32-byte seed or a 64-byte
//! seed ‖ public key blob.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::CoralError;

/// One configured key, as it appears in the secret JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningKeyConfig {
    pub id: String,
    pub private_key: String,
}

/// A JSON Web Key for one Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub kty: String,
    pub crv: String,
    pub x: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// An imported key: signing capability plus the derived public half.
#[derive(Debug)]
pub struct LoadedKey {
    pub id: String,
    signing: SigningKey,
}

impl LoadedKey {
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn jwk(&self) -> Jwk {
        Jwk {
            kid: self.id.clone(),
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: BASE64_URL.encode(self.public_bytes()),
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
        }
    }
}

/// Holds the current signing key and any previous keys still published for
/// verification.
#[derive(Debug)]
pub struct SigningKeyStore {
    current: LoadedKey,
    previous: Vec<LoadedKey>,
}

impl SigningKeyStore {
    /// Parses the current key and any previous keys from their secret JSON.
    pub fn from_config(current: &str, previous: Option<&str>) -> Result<Self, CoralError> {
        let config: SigningKeyConfig = serde_json::from_str(current)
            .map_err(|e| CoralError::KeyImport(format!("invalid signing key config: {}", e)))?;
        let current = import_key(&config)?;

        let mut prev = Vec::new();
        if let Some(json) = previous {
            let configs: Vec<SigningKeyConfig> = serde_json::from_str(json)
                .map_err(|e| CoralError::KeyImport(format!("invalid previous keys: {}", e)))?;
            for config in &configs {
                prev.push(import_key(config)?);
            }
        }

        Ok(Self {
            current,
            previous: prev,
        })
    }

    pub fn current_kid(&self) -> &str {
        &self.current.id
    }

    /// Signs with the current key.
    pub fn sign(&self, data: &[u8]) -> Signature {
        self.current.signing.sign(data)
    }

    /// Every loaded key, current first.
    pub fn keys(&self) -> impl Iterator<Item = &LoadedKey> {
        std::iter::once(&self.current).chain(self.previous.iter())
    }

    pub fn find(&self, kid: &str) -> Option<&LoadedKey> {
        self.keys().find(|k| k.id == kid)
    }

    pub fn jwks(&self) -> Jwks {
        Jwks {
            keys: self.keys().map(LoadedKey::jwk).collect(),
        }
    }
}

fn import_key(config: &SigningKeyConfig) -> Result<LoadedKey, CoralError> {
    let bytes = BASE64
        .decode(&config.private_key)
        .map_err(|e| CoralError::KeyImport(format!("key {}: invalid base64: {}", config.id, e)))?;

    let signing = match bytes.len() {
        32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            SigningKey::from_bytes(&seed)
        }
        64 => {
            let mut pair = [0u8; 64];
            pair.copy_from_slice(&bytes);
            SigningKey::from_keypair_bytes(&pair).map_err(|_| {
                CoralError::KeyImport(format!(
                    "key {}: public key does not match seed",
                    config.id
                ))
            })?
        }
        n => {
            return Err(CoralError::KeyImport(format!(
                "key {}: expected 32 or 64 bytes, got {}",
                config.id, n
            )));
        }
    };

    Ok(LoadedKey {
        id: config.id.clone(),
        signing,
    })
}

/// Verifies `signature` over `data` against the JWK published under `kid`.
pub fn verify_with_jwk(jwk: &Jwk, data: &[u8], signature: &Signature) -> Result<(), CoralError> {
    let bytes = BASE64_URL
        .decode(&jwk.x)
        .map_err(|e| CoralError::Verification(format!("invalid jwk x: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CoralError::Verification("jwk x is not 32 bytes".to_string()))?;
    let key = VerifyingKey::from_bytes(&bytes)
        .map_err(|e| CoralError::Verification(e.to_string()))?;
    key.verify(data, signature)
        .map_err(|e| CoralError::Verification(e.to_string()))
}

// ==================== Key Generation ====================

/// A freshly generated key pair, in the shapes operators feed back into
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedKeyPair {
    pub id: String,
    /// base64(seed ‖ public key)
    pub private_key: String,
    /// base64(public key)
    pub public_key: String,
    pub jwk: Jwk,
}

/// Generates a new Ed25519 key pair with a random key id.
pub fn generate_keypair() -> GeneratedKeyPair {
    let signing = SigningKey::generate(&mut rand::rngs::OsRng);
    let id = uuid::Uuid::new_v4().to_string();
    let public = signing.verifying_key().to_bytes();

    GeneratedKeyPair {
        private_key: BASE64.encode(signing.to_keypair_bytes()),
        public_key: BASE64.encode(public),
        jwk: Jwk {
            kid: id.clone(),
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: BASE64_URL.encode(public),
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
        },
        id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_json(id: &str, private_key: &str) -> String {
        serde_json::to_string(&SigningKeyConfig {
            id: id.to_string(),
            private_key: private_key.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_import_64_byte_keypair() {
        let pair = generate_keypair();
        let store = SigningKeyStore::from_config(&key_json("k1", &pair.private_key), None).unwrap();
        assert_eq!(store.current_kid(), "k1");
        assert_eq!(
            BASE64.encode(store.find("k1").unwrap().public_bytes()),
            pair.public_key
        );
    }

    #[test]
    fn test_import_32_byte_seed() {
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let seed = BASE64.encode(signing.to_bytes());
        let store = SigningKeyStore::from_config(&key_json("seed-key", &seed), None).unwrap();
        assert_eq!(
            store.find("seed-key").unwrap().public_bytes(),
            signing.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_import_rejects_bad_length() {
        let err =
            SigningKeyStore::from_config(&key_json("short", &BASE64.encode([0u8; 16])), None)
                .unwrap_err();
        assert!(err.to_string().contains("expected 32 or 64 bytes"));
    }

    #[test]
    fn test_import_rejects_mismatched_public_half() {
        let a = SigningKey::generate(&mut rand::rngs::OsRng);
        let b = SigningKey::generate(&mut rand::rngs::OsRng);
        let mut blob = [0u8; 64];
        blob[..32].copy_from_slice(&a.to_bytes());
        blob[32..].copy_from_slice(&b.verifying_key().to_bytes());

        let err = SigningKeyStore::from_config(&key_json("bad", &BASE64.encode(blob)), None)
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_import_rejects_garbage_json() {
        assert!(SigningKeyStore::from_config("{not json", None).is_err());
    }

    #[test]
    fn test_previous_keys_in_jwks() {
        let current = generate_keypair();
        let old = generate_keypair();
        let previous = format!(
            "[{}]",
            key_json("old-key", &old.private_key)
        );
        let store = SigningKeyStore::from_config(
            &key_json("new-key", &current.private_key),
            Some(&previous),
        )
        .unwrap();

        let jwks = store.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, "new-key");
        assert_eq!(jwks.keys[1].kid, "old-key");
        for key in &jwks.keys {
            assert_eq!(key.kty, "OKP");
            assert_eq!(key.crv, "Ed25519");
            assert_eq!(key.alg, "EdDSA");
            assert_eq!(key.use_, "sig");
        }
    }

    #[test]
    fn test_sign_verifies_with_published_jwk() {
        let pair = generate_keypair();
        let store = SigningKeyStore::from_config(&key_json("k1", &pair.private_key), None).unwrap();

        let message = b"test message";
        let signature = store.sign(message);
        let jwks = store.jwks();
        verify_with_jwk(jwks.find("k1").unwrap(), message, &signature).unwrap();
    }

    #[test]
    fn test_jwk_use_field_name() {
        let jwk = generate_keypair().jwk;
        let json = serde_json::to_string(&jwk).unwrap();
        assert!(json.contains("\"use\":\"sig\""));
    }
}
