use super::{BatchId, SlotAssignment, BATCH_ID_SIZE};
use crate::chunk::Address;
use crate::crypto::{keccak256, KeyError, PublicKey, SecretKey, Signature};

const INDEX_SIZE: usize = 8;
const TIMESTAMP_SIZE: usize = 8;
const SIGNATURE_SIZE: usize = 65;

/// Size of a serialized stamp: batch id, index, timestamp and signature
pub const STAMP_SIZE: usize = BATCH_ID_SIZE + INDEX_SIZE + TIMESTAMP_SIZE + SIGNATURE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum StampError {
    #[error("invalid stamp: {0}")]
    Invalid(String),
    #[error("stamp signature does not verify")]
    BadSignature,
    #[error("signing failed: {0}")]
    Signing(#[from] KeyError),
}

/// Proof that a chunk was written into a batch slot by the batch owner
///
/// Laid out as `batch_id (32) || bucket u32 BE || slot u32 BE ||
/// timestamp u64 BE (ns) || signature (65)`, the form Bee nodes accept in
/// the `swarm-postage-stamp` header. The signature is a recoverable
/// secp256k1 Ethereum signed message over
/// `keccak256(address || batch_id || index || timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    batch_id: BatchId,
    slot: SlotAssignment,
    timestamp: u64,
    signature: Signature,
}

impl Stamp {
    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn slot(&self) -> SlotAssignment {
        self.slot
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn to_bytes(&self) -> [u8; STAMP_SIZE] {
        let mut bytes = [0u8; STAMP_SIZE];
        let (batch, rest) = bytes.split_at_mut(BATCH_ID_SIZE);
        let (index, rest) = rest.split_at_mut(INDEX_SIZE);
        let (timestamp, signature) = rest.split_at_mut(TIMESTAMP_SIZE);
        batch.copy_from_slice(self.batch_id.as_bytes());
        index.copy_from_slice(&encode_index(self.slot));
        timestamp.copy_from_slice(&self.timestamp.to_be_bytes());
        signature.copy_from_slice(&self.signature.to_bytes());
        bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StampError> {
        if bytes.len() != STAMP_SIZE {
            return Err(StampError::Invalid(format!(
                "expected {} bytes, got {}",
                STAMP_SIZE,
                bytes.len()
            )));
        }
        let mut batch = [0u8; BATCH_ID_SIZE];
        batch.copy_from_slice(&bytes[..BATCH_ID_SIZE]);

        let index = &bytes[BATCH_ID_SIZE..BATCH_ID_SIZE + INDEX_SIZE];
        let bucket = u32::from_be_bytes([index[0], index[1], index[2], index[3]]);
        let slot = u32::from_be_bytes([index[4], index[5], index[6], index[7]]);
        let bucket = u16::try_from(bucket)
            .map_err(|_| StampError::Invalid(format!("bucket {} out of range", bucket)))?;

        let ts_start = BATCH_ID_SIZE + INDEX_SIZE;
        let mut timestamp = [0u8; TIMESTAMP_SIZE];
        timestamp.copy_from_slice(&bytes[ts_start..ts_start + TIMESTAMP_SIZE]);

        let signature = Signature::from_slice(&bytes[ts_start + TIMESTAMP_SIZE..])
            .map_err(|e| StampError::Invalid(e.to_string()))?;

        Ok(Self {
            batch_id: BatchId::from(batch),
            slot: SlotAssignment { bucket, slot },
            timestamp: u64::from_be_bytes(timestamp),
            signature,
        })
    }

    /// Recover the key that stamped `address`
    pub fn signer(&self, address: &Address) -> Result<PublicKey, StampError> {
        let digest = digest(address, &self.batch_id, self.slot, self.timestamp);
        self.signature
            .recover(&digest)
            .map_err(|_| StampError::BadSignature)
    }

    /// Check the stamp was issued for `address` by the holder of `owner`
    pub fn verify(&self, address: &Address, owner: &PublicKey) -> Result<(), StampError> {
        if self.signer(address)?.eth_address() != owner.eth_address() {
            return Err(StampError::BadSignature);
        }
        Ok(())
    }
}

fn encode_index(slot: SlotAssignment) -> [u8; INDEX_SIZE] {
    let mut index = [0u8; INDEX_SIZE];
    index[..4].copy_from_slice(&(slot.bucket as u32).to_be_bytes());
    index[4..].copy_from_slice(&slot.slot.to_be_bytes());
    index
}

fn digest(address: &Address, batch_id: &BatchId, slot: SlotAssignment, timestamp: u64) -> [u8; 32] {
    keccak256(&[
        address.as_bytes().as_slice(),
        batch_id.as_bytes().as_slice(),
        encode_index(slot).as_slice(),
        timestamp.to_be_bytes().as_slice(),
    ])
}

/// Signing capability for one batch
#[derive(Debug, Clone)]
pub struct Stamper {
    key: SecretKey,
    batch_id: BatchId,
    depth: u8,
}

impl Stamper {
    pub fn new(key: SecretKey, batch_id: BatchId, depth: u8) -> Self {
        Self {
            key,
            batch_id,
            depth,
        }
    }

    pub fn batch_id(&self) -> &BatchId {
        &self.batch_id
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn public_key(&self) -> PublicKey {
        self.key.public()
    }

    /// Stamp `address` at an already assigned slot
    pub fn stamp(&self, address: &Address, slot: SlotAssignment) -> Result<Stamp, StampError> {
        let timestamp = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .max(0) as u64;
        let signature = self
            .key
            .sign(&digest(address, &self.batch_id, slot, timestamp))?;
        Ok(Stamp {
            batch_id: self.batch_id,
            slot,
            timestamp,
            signature,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stamper() -> Stamper {
        Stamper::new(SecretKey::generate(), BatchId::from([7u8; BATCH_ID_SIZE]), 20)
    }

    #[test]
    fn test_stamp_layout() {
        let stamper = stamper();
        let address = Address::from([1u8; 32]);
        let stamp = stamper
            .stamp(
                &address,
                SlotAssignment {
                    bucket: 0x0101,
                    slot: 5,
                },
            )
            .unwrap();

        let bytes = stamp.to_bytes();
        assert_eq!(STAMP_SIZE, 113);
        assert_eq!(&bytes[..32], &[7u8; 32]);
        assert_eq!(&bytes[32..36], &0x0101u32.to_be_bytes());
        assert_eq!(&bytes[36..40], &5u32.to_be_bytes());
        assert_eq!(&bytes[40..48], &stamp.timestamp().to_be_bytes());
        assert!(matches!(bytes[112], 27 | 28));
        assert_eq!(stamp.to_hex().len(), STAMP_SIZE * 2);

        let parsed = Stamp::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, stamp);
    }

    #[test]
    fn test_stamp_verifies_against_owner() {
        let stamper = stamper();
        let address = Address::from([1u8; 32]);
        let slot = SlotAssignment { bucket: 1, slot: 0 };
        let stamp = stamper.stamp(&address, slot).unwrap();

        assert!(stamp.verify(&address, &stamper.public_key()).is_ok());
        assert_eq!(stamp.signer(&address).unwrap(), stamper.public_key());
        assert!(stamp
            .verify(&Address::from([2u8; 32]), &stamper.public_key())
            .is_err());
        assert!(stamp
            .verify(&address, &SecretKey::generate().public())
            .is_err());
    }

    #[test]
    fn test_signature_is_an_ethereum_signed_message() {
        let key = SecretKey::generate();
        let stamper = Stamper::new(key.clone(), BatchId::from([3u8; BATCH_ID_SIZE]), 17);
        let address = Address::from([5u8; 32]);
        let slot = SlotAssignment { bucket: 9, slot: 2 };
        let stamp = stamper.stamp(&address, slot).unwrap();

        let bytes = stamp.to_bytes();
        let mut index = [0u8; INDEX_SIZE];
        index.copy_from_slice(&bytes[32..40]);
        let to_sign = keccak256(&[
            address.as_bytes().as_slice(),
            &[3u8; 32][..],
            &index[..],
            &bytes[40..48],
        ]);
        let prehash = keccak256(&[&b"\x19Ethereum Signed Message:\n32"[..], &to_sign[..]]);

        let signature = k256::ecdsa::Signature::from_slice(&bytes[48..112]).unwrap();
        let recovery = k256::ecdsa::RecoveryId::from_byte(bytes[112] - 27).unwrap();
        let recovered =
            k256::ecdsa::VerifyingKey::recover_from_prehash(&prehash, &signature, recovery)
                .unwrap();
        assert_eq!(PublicKey::from(recovered), key.public());
    }

    #[test]
    fn test_tampered_stamp_fails() {
        let stamper = stamper();
        let address = Address::from([1u8; 32]);
        let stamp = stamper
            .stamp(&address, SlotAssignment { bucket: 4, slot: 1 })
            .unwrap();
        let mut bytes = stamp.to_bytes();
        bytes[40] ^= 0xff;
        let tampered = Stamp::from_bytes(&bytes).unwrap();
        assert!(tampered.verify(&address, &stamper.public_key()).is_err());
    }

    #[test]
    fn test_short_stamp_rejected() {
        assert!(Stamp::from_bytes(&[0u8; 10]).is_err());
    }
}
