//! Cryptographic primitives for Swarm ID
//!
//! - **Content addressing**: Keccak-256, the hash every chunk address is built on
//! - **Chunk encryption**: per-chunk 32-byte `Secret` keys driving the segment
//!   XOR transform used for encrypted references
//! - **Postage signing**: secp256k1 keypairs (`SecretKey`/`PublicKey`) that sign
//!   stamps attaching chunks to a postage batch, recoverable to the owner's
//!   Ethereum address
//! - **Session derivation**: HMAC-SHA256 derivation of per-application secrets
//!   from a master identity key
//!
//! # Security Model
//!
//! A master key never leaves the authentication context. Each application origin
//! receives its own derived secret, so compromising one application's session
//! doesn't expose any other. Chunk keys are generated fresh for every chunk and
//! only ever travel inside encrypted references.

mod derive;
mod keys;
mod secret;

pub use derive::{derive_secret, verify_secret, DeriveError, MasterKey, MASTER_KEY_SIZE};
pub use keys::{KeyError, PublicKey, SecretKey, Signature, ETH_ADDRESS_SIZE};
pub use secret::{Secret, SecretError, SECRET_SIZE};

use sha3::{Digest, Keccak256};

/// Size of a Keccak-256 digest in bytes
pub const KECCAK_HASH_SIZE: usize = 32;

/// Hash the concatenation of `parts` with Keccak-256
pub fn keccak256(parts: &[&[u8]]) -> [u8; KECCAK_HASH_SIZE] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}
