#[cfg(test)]
#[path = "tests/object.rs"]
mod tests;

use core::fmt;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Hash, HASH_LEN};

/// Length of an identifier in the legacy object namespace.
pub const LEGACY_OBJECT_ID_LEN: usize = 20;

/// Length of an identifier in the content chunk namespace.
pub const CHUNK_ID_LEN: usize = HASH_LEN;

/// The two storage namespaces an [`ObjectId`] can address.
///
/// The namespace is implied by the identifier length and nothing else.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Namespace {
    Legacy,
    Chunk,
}

#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ObjectId {
    Legacy([u8; LEGACY_OBJECT_ID_LEN]),
    Chunk([u8; CHUNK_ID_LEN]),
}

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
pub enum InvalidObjectId {
    #[error("objectID is wrong size: expected {LEGACY_OBJECT_ID_LEN} or {CHUNK_ID_LEN} bytes, got {0}")]
    WrongSize(usize),

    #[error("objectID is not valid hex")]
    InvalidHex,
}

impl ObjectId {
    /// The chunk identifier for `data`, i.e. its SHA-256 digest.
    #[must_use]
    pub fn chunk_of(data: &[u8]) -> Self {
        Self::Chunk(Hash::new(data).into())
    }

    #[must_use]
    pub const fn namespace(&self) -> Namespace {
        match self {
            Self::Legacy(_) => Namespace::Legacy,
            Self::Chunk(_) => Namespace::Chunk,
        }
    }

    #[must_use]
    pub const fn is_chunk(&self) -> bool {
        matches!(self, Self::Chunk(_))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Legacy(bytes) => bytes,
            Self::Chunk(bytes) => bytes,
        }
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl TryFrom<&[u8]> for ObjectId {
    type Error = InvalidObjectId;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if let Ok(bytes) = <[u8; CHUNK_ID_LEN]>::try_from(bytes) {
            return Ok(Self::Chunk(bytes));
        }

        if let Ok(bytes) = <[u8; LEGACY_OBJECT_ID_LEN]>::try_from(bytes) {
            return Ok(Self::Legacy(bytes));
        }

        Err(InvalidObjectId::WrongSize(bytes.len()))
    }
}

impl TryFrom<Vec<u8>> for ObjectId {
    type Error = InvalidObjectId;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(bytes.as_slice())
    }
}

impl From<Hash> for ObjectId {
    fn from(hash: Hash) -> Self {
        Self::Chunk(hash.into())
    }
}

impl FromStr for ObjectId {
    type Err = InvalidObjectId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| InvalidObjectId::InvalidHex)?;

        Self::try_from(bytes)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObjectId").field(&self.to_hex()).finish()
    }
}

impl Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;

        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of a legacy object. Chunks are always [`ObjectType::Blob`].
#[derive(
    BorshDeserialize,
    BorshSerialize,
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    PartialEq,
    Serialize,
)]
#[borsh(use_discriminant = true)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ObjectType {
    Commit = 1,
    Tree = 2,
    Blob = 3,
    Tag = 4,
}

#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("unknown object type tag {0}")]
pub struct UnknownObjectType(pub u8);

impl ObjectType {
    #[must_use]
    pub const fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ObjectType {
    type Error = UnknownObjectType;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Commit),
            2 => Ok(Self::Tree),
            3 => Ok(Self::Blob),
            4 => Ok(Self::Tag),
            other => Err(UnknownObjectType(other)),
        }
    }
}
