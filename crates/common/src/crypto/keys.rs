use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};

use super::keccak256;

/// Size of a secp256k1 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of a compressed SEC1 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 33;
/// Size of a recoverable signature: `r || s || v`
pub const SIGNATURE_SIZE: usize = 65;
/// Size of an Ethereum account address
pub const ETH_ADDRESS_SIZE: usize = 20;

const SIGNED_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Hash `msg` the way Ethereum wallets do before signing it
fn signed_message_hash(msg: &[u8]) -> [u8; 32] {
    let len = msg.len().to_string();
    keccak256(&[SIGNED_MESSAGE_PREFIX.as_bytes(), len.as_bytes(), msg])
}

/// Public half of a postage signing keypair
///
/// The batch owner is identified on chain by the Ethereum address of this
/// key; nodes recover it from each stamp signature and compare.
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub struct PublicKey(VerifyingKey);

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| anyhow::anyhow!("invalid public key: {}", e))?;
        Ok(PublicKey(key))
    }
}

impl PublicKey {
    /// Parse a SEC1 public key, compressed or not, from hex
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes =
            hex::decode(hex).map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        Self::try_from(&bytes[..])
    }

    /// Compressed SEC1 encoding
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        bytes.copy_from_slice(self.0.to_encoded_point(true).as_bytes());
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Ethereum address: the last 20 bytes of the keccak of the
    /// uncompressed point
    pub fn eth_address(&self) -> [u8; ETH_ADDRESS_SIZE] {
        let point = self.0.to_encoded_point(false);
        let hash = keccak256(&[&point.as_bytes()[1..]]);
        let mut address = [0u8; ETH_ADDRESS_SIZE];
        address.copy_from_slice(&hash[32 - ETH_ADDRESS_SIZE..]);
        address
    }

    /// Check that `signature` over `msg` was made by this key
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), KeyError> {
        if signature.recover(msg)? != *self {
            return Err(anyhow::anyhow!("signature was made by another key").into());
        }
        Ok(())
    }
}

/// Recoverable secp256k1 signature over an Ethereum signed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    inner: EcdsaSignature,
    recovery_id: RecoveryId,
}

impl Signature {
    /// Parse `r || s || v`, with `v` as 27/28 or as a raw recovery id
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(anyhow::anyhow!(
                "invalid signature size, expected {}, got {}",
                SIGNATURE_SIZE,
                bytes.len()
            )
            .into());
        }
        let inner = EcdsaSignature::from_slice(&bytes[..64])
            .map_err(|e| anyhow::anyhow!("invalid signature: {}", e))?;
        let v = bytes[64];
        let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
            .ok_or_else(|| anyhow::anyhow!("invalid recovery byte {}", v))?;
        Ok(Self { inner, recovery_id })
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_SIZE] {
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..64].copy_from_slice(&self.inner.to_bytes());
        bytes[64] = 27 + self.recovery_id.to_byte();
        bytes
    }

    /// Recover the key that signed `msg`
    pub fn recover(&self, msg: &[u8]) -> Result<PublicKey, KeyError> {
        let key = VerifyingKey::recover_from_prehash(
            &signed_message_hash(msg),
            &self.inner,
            self.recovery_id,
        )
        .map_err(|e| anyhow::anyhow!("signature recovery failed: {}", e))?;
        Ok(PublicKey(key))
    }
}

/// Private half of a postage signing keypair
///
/// Held by the broker on behalf of an application session and never sent
/// back to the host. Persisted as hex inside the session record, or as PEM
/// by the command line front end.
#[derive(Debug, Clone)]
pub struct SecretKey(SigningKey);

impl TryFrom<[u8; PRIVATE_KEY_SIZE]> for SecretKey {
    type Error = KeyError;
    fn try_from(secret: [u8; PRIVATE_KEY_SIZE]) -> Result<Self, Self::Error> {
        let key = SigningKey::from_slice(&secret)
            .map_err(|e| anyhow::anyhow!("invalid private key: {}", e))?;
        Ok(Self(key))
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for SecretKey {}

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        Self::try_from(buff)
    }

    /// Generate a new random secret key using a cryptographically secure RNG
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; PRIVATE_KEY_SIZE];
            getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
            // Zero and values past the curve order are the only rejects
            if let Ok(key) = Self::try_from(bytes) {
                return key;
            }
        }
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(*self.0.verifying_key())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        bytes.copy_from_slice(&self.0.to_bytes());
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Encode secret key in PEM format for on-disk storage
    pub fn to_pem(&self) -> String {
        let pem = pem::Pem::new("PRIVATE KEY", self.to_bytes());
        pem::encode(&pem)
    }

    /// Parse a secret key from PEM format
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The PEM string is malformed
    /// - The PEM tag is not "PRIVATE KEY"
    /// - The key size is incorrect or the scalar is not a valid key
    pub fn from_pem(pem_str: &str) -> Result<Self, KeyError> {
        let pem = pem::parse(pem_str).map_err(|e| anyhow::anyhow!("failed to parse PEM: {}", e))?;

        if pem.tag() != "PRIVATE KEY" {
            return Err(anyhow::anyhow!("invalid PEM tag, expected PRIVATE KEY").into());
        }

        let contents = pem.contents();
        if contents.len() != PRIVATE_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid private key size in PEM, expected {}, got {}",
                PRIVATE_KEY_SIZE,
                contents.len()
            )
            .into());
        }

        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        bytes.copy_from_slice(contents);
        Self::try_from(bytes)
    }

    /// Sign `msg` as an Ethereum signed message
    pub fn sign(&self, msg: &[u8]) -> Result<Signature, KeyError> {
        let (inner, recovery_id) = self
            .0
            .sign_prehash_recoverable(&signed_message_hash(msg))
            .map_err(|e| anyhow::anyhow!("signing failed: {}", e))?;
        Ok(Signature { inner, recovery_id })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keypair_hex_round_trip() {
        let private_key = SecretKey::generate();
        let public_key = private_key.public();

        let recovered_private = SecretKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(private_key, recovered_private);

        let recovered_public = PublicKey::from_hex(&format!("0x{}", public_key.to_hex())).unwrap();
        assert_eq!(public_key, recovered_public);
    }

    #[test]
    fn test_pem_serialization() {
        let private_key = SecretKey::generate();

        let pem = private_key.to_pem();
        let recovered_private = SecretKey::from_pem(&pem).unwrap();
        assert_eq!(private_key.public(), recovered_private.public());
    }

    #[test]
    fn test_sign_and_verify() {
        let secret_key = SecretKey::generate();
        let public_key = secret_key.public();
        let message = b"hello, world!";

        let signature = secret_key.sign(message).unwrap();
        assert!(public_key.verify(message, &signature).is_ok());
        assert_eq!(signature.recover(message).unwrap(), public_key);

        let wrong_message = b"hello, world?";
        assert!(public_key.verify(wrong_message, &signature).is_err());

        let other_key = SecretKey::generate().public();
        assert!(other_key.verify(message, &signature).is_err());

        let parsed = Signature::from_slice(&signature.to_bytes()).unwrap();
        assert_eq!(parsed, signature);
        assert!(matches!(signature.to_bytes()[64], 27 | 28));
    }

    #[test]
    fn test_known_eth_address() {
        // Private key 1 maps to the generator point
        let mut bytes = [0u8; PRIVATE_KEY_SIZE];
        bytes[31] = 1;
        let key = SecretKey::try_from(bytes).unwrap();
        assert_eq!(
            hex::encode(key.public().eth_address()),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_bad_keys_rejected() {
        assert!(SecretKey::from_hex("zz").is_err());
        assert!(SecretKey::try_from([0u8; PRIVATE_KEY_SIZE]).is_err());
        assert!(PublicKey::from_hex("00").is_err());
        assert!(Signature::from_slice(&[0u8; 64]).is_err());
    }
}
