use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Address, ChunkError, ADDRESS_SIZE};
use crate::crypto::{Secret, SECRET_SIZE};

/// Size of an encrypted reference: address followed by chunk key
pub const ENCRYPTED_REFERENCE_SIZE: usize = ADDRESS_SIZE + SECRET_SIZE;

/// Pointer to a stored chunk tree
///
/// Plain references are the 32-byte root address. Encrypted references
/// append the root chunk's 32-byte key. The two are told apart by length
/// alone, both in binary form and as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reference {
    Plain(Address),
    Encrypted { address: Address, key: Secret },
}

impl Reference {
    pub fn address(&self) -> &Address {
        match self {
            Reference::Plain(address) => address,
            Reference::Encrypted { address, .. } => address,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Reference::Encrypted { .. })
    }

    pub fn size(&self) -> usize {
        match self {
            Reference::Plain(_) => ADDRESS_SIZE,
            Reference::Encrypted { .. } => ENCRYPTED_REFERENCE_SIZE,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reference::Plain(address) => address.as_bytes().to_vec(),
            Reference::Encrypted { address, key } => {
                let mut bytes = Vec::with_capacity(ENCRYPTED_REFERENCE_SIZE);
                bytes.extend_from_slice(address.as_bytes());
                bytes.extend_from_slice(key.bytes());
                bytes
            }
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl From<Address> for Reference {
    fn from(address: Address) -> Self {
        Reference::Plain(address)
    }
}

impl TryFrom<&[u8]> for Reference {
    type Error = ChunkError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        match bytes.len() {
            ADDRESS_SIZE => Ok(Reference::Plain(Address::try_from(bytes)?)),
            ENCRYPTED_REFERENCE_SIZE => {
                let address = Address::try_from(&bytes[..ADDRESS_SIZE])?;
                let key = Secret::from_slice(&bytes[ADDRESS_SIZE..])
                    .map_err(|e| ChunkError::InvalidReference(e.to_string()))?;
                Ok(Reference::Encrypted { address, key })
            }
            n => Err(ChunkError::InvalidReference(format!(
                "expected {} or {} bytes, got {}",
                ADDRESS_SIZE, ENCRYPTED_REFERENCE_SIZE, n
            ))),
        }
    }
}

impl FromStr for Reference {
    type Err = ChunkError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ChunkError::InvalidReference(e.to_string()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
