//! Deterministic VM identities.
//!
//! A VM is identified by its canonical name: the UTF-8 bytes of the name,
//! zero-padded to 32 bytes and encoded as CB58 (base58 of the payload followed
//! by the last four bytes of its SHA-256 digest).

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the raw identifier.
pub const VM_ID_LEN: usize = 32;

const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmIdError {
    #[error("VM name '{name}' is {len} bytes long, at most {VM_ID_LEN} are allowed")]
    NameTooLong { name: String, len: usize },
    #[error("VM name must not be empty")]
    EmptyName,
    #[error("invalid CB58 string: {0}")]
    InvalidEncoding(String),
    #[error("CB58 checksum mismatch")]
    BadChecksum,
}

/// A 32-byte VM identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId([u8; VM_ID_LEN]);

impl VmId {
    /// Derive the identity of the VM named `name`.
    pub fn from_name(name: &str) -> Result<Self, VmIdError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() {
            return Err(VmIdError::EmptyName);
        }
        if bytes.len() > VM_ID_LEN {
            return Err(VmIdError::NameTooLong {
                name: name.to_string(),
                len: bytes.len(),
            });
        }

        let mut id = [0u8; VM_ID_LEN];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn to_cb58(&self) -> String {
        let mut payload = Vec::with_capacity(VM_ID_LEN + CHECKSUM_LEN);
        payload.extend_from_slice(&self.0);
        payload.extend_from_slice(&checksum(&self.0));
        bs58::encode(payload).into_string()
    }
}

fn checksum(data: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[digest.len() - CHECKSUM_LEN..]);
    out
}

impl FromStr for VmId {
    type Err = VmIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| VmIdError::InvalidEncoding(e.to_string()))?;
        if decoded.len() != VM_ID_LEN + CHECKSUM_LEN {
            return Err(VmIdError::InvalidEncoding(format!(
                "expected {} bytes, got {}",
                VM_ID_LEN + CHECKSUM_LEN,
                decoded.len()
            )));
        }

        let (payload, sum) = decoded.split_at(VM_ID_LEN);
        if checksum(payload) != sum {
            return Err(VmIdError::BadChecksum);
        }

        let mut id = [0u8; VM_ID_LEN];
        id.copy_from_slice(payload);
        Ok(Self(id))
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cb58())
    }
}

impl fmt::Debug for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmId({})", self.to_cb58())
    }
}

impl Serialize for VmId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_cb58())
    }
}

impl<'de> Deserialize<'de> for VmId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        let cases = [
            ("Lux EVM", "ag3GReYPNuSR17rUP8acMdZipQBikdXNRKDyFszAysmy3vDXE"),
            ("lux-evm", "pmSJB3vLVKGEGEPULpcsBwfYyd8dBHnCgbUNrMniLq6izCjKq"),
            ("test-vm", "tGBrM5Vzpy2xBhnHvo2zt7NR3sMjLCa3Rgw2a6X2Gu2PuSvsH"),
        ];

        for (name, expected) in cases {
            let id = VmId::from_name(name).expect("valid name");
            assert_eq!(id.to_string(), expected, "VM id of {name}");
        }
    }

    #[test]
    fn test_deterministic_and_distinct() {
        let a = VmId::from_name("alpha-vm").unwrap();
        let b = VmId::from_name("alpha-vm").unwrap();
        let c = VmId::from_name("beta-vm").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_name_too_long() {
        let err = VmId::from_name("this-is-a-very-long-vm-name-that-exceeds-32-bytes").unwrap_err();
        assert!(matches!(err, VmIdError::NameTooLong { len: 49, .. }));
    }

    #[test]
    fn test_parse_roundtrip_and_checksum() {
        let id = VmId::from_name("Lux EVM").unwrap();
        let parsed: VmId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);

        let mut tampered = id.to_string();
        tampered.replace_range(0..1, "b");
        assert!(tampered.parse::<VmId>().is_err());
    }
}
