//! Per-application secret derivation
//!
//! The authentication context owns a single master key and derives a
//! deterministic secret per application origin with HMAC-SHA256. The same
//! master key and origin always produce the same secret.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of a master identity key in bytes
pub const MASTER_KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum DeriveError {
    #[error("invalid master key: {0}")]
    InvalidMasterKey(String),
}

/// Master identity key held by the authentication context
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKey(Vec<u8>);

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

impl MasterKey {
    /// Generate a random 32 byte master key
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MASTER_KEY_SIZE];
        getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
        tracing::debug!("generated new master key");
        Self(bytes)
    }

    /// Parse a master key from hex, ignoring whitespace
    pub fn from_hex(hex: &str) -> Result<Self, DeriveError> {
        let cleaned: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.len() % 2 != 0 {
            return Err(DeriveError::InvalidMasterKey(
                "hex length must be even".to_string(),
            ));
        }
        let bytes = hex::decode(&cleaned).map_err(|e| DeriveError::InvalidMasterKey(e.to_string()))?;
        if bytes.is_empty() {
            return Err(DeriveError::InvalidMasterKey("empty key".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Derive the hex encoded secret for `app_origin`
pub fn derive_secret(master_key: &MasterKey, app_origin: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(master_key.bytes())
        .expect("hmac accepts keys of any length");
    mac.update(app_origin.as_bytes());
    let secret = hex::encode(mac.finalize().into_bytes());
    tracing::debug!(
        app_origin,
        secret_prefix = &secret[..16],
        "derived application secret"
    );
    secret
}

/// Check a previously derived secret against the master key
pub fn verify_secret(master_key: &MasterKey, app_origin: &str, expected: &str) -> bool {
    derive_secret(master_key, app_origin) == expected
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let master = MasterKey::generate();
        let a = derive_secret(&master, "https://app.example");
        let b = derive_secret(&master, "https://app.example");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(verify_secret(&master, "https://app.example", &a));
    }

    #[test]
    fn test_origins_get_distinct_secrets() {
        let master = MasterKey::generate();
        assert_ne!(
            derive_secret(&master, "https://a.example"),
            derive_secret(&master, "https://b.example")
        );
    }

    #[test]
    fn test_rfc4231_case_two() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let master = MasterKey::from_hex(&hex::encode("Jefe")).unwrap();
        assert_eq!(
            derive_secret(&master, "what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_master_key_hex_validation() {
        assert!(MasterKey::from_hex("abc").is_err());
        assert!(MasterKey::from_hex("").is_err());
        let key = MasterKey::from_hex("de ad be ef").unwrap();
        assert_eq!(key.to_hex(), "deadbeef");
    }
}
