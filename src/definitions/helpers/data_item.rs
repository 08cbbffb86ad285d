//! Support for embedded
//! [CBOR Data Items](https://www.ietf.org/rfc/rfc8949.html#name-encoded-cbor-data-item),
//! also known as a tagged data item with tag number 24.
//!
//! A [DataItem] owns the exact bytes of its embedded item. Those bytes are fixed when the item
//! is created (decoded from the wire, or encoded once from a value) and are the only thing ever
//! fed into digests and signatures. The logical value is decoded from them on first request and
//! cached.

use std::fmt;
use std::sync::OnceLock;

use ciborium::Value;
use serde::{de, de::DeserializeOwned, Deserialize, Serialize};

use crate::cbor::{self, CborError};

pub const DATA_ITEM_TAG: u64 = 24;

/// A wrapper for a struct that is to be encoded as a CBOR tagged item, with tag number 24.
pub struct DataItem<T> {
    inner_bytes: Vec<u8>,
    inner: OnceLock<T>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Expected a CBOR byte string, received: '{0:?}'")]
    InvalidTag24(Box<Value>),
    #[error("Expected a CBOR tagged data item with tag number 24, received: '{0:?}'")]
    NotATag24(Value),
    #[error("Unable to encode value as CBOR: {0}")]
    UnableToEncode(CborError),
    #[error("Unable to decode bytes to inner type: {0}")]
    UnableToDecode(CborError),
}

impl<T> DataItem<T> {
    /// Wrap bytes received from elsewhere. Nothing is decoded until [DataItem::inner] is called.
    pub fn from_bytes(inner_bytes: Vec<u8>) -> Self {
        Self {
            inner_bytes,
            inner: OnceLock::new(),
        }
    }

    /// The embedded encoding, i.e. the content of the tag-24 byte string.
    pub fn bytes(&self) -> &[u8] {
        &self.inner_bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner_bytes
    }

    /// The full wire encoding, `#6.24(bstr)`.
    pub fn encoded(&self) -> Result<Vec<u8>> {
        cbor::to_vec(&self.to_value()).map_err(Error::UnableToEncode)
    }

    pub fn to_value(&self) -> Value {
        Value::Tag(DATA_ITEM_TAG, Box::new(Value::Bytes(self.inner_bytes.clone())))
    }
}

impl<T: Serialize> DataItem<T> {
    /// Encode `inner` once and freeze the result.
    ///
    /// The value is consumed; later reads decode it back from the frozen bytes, so nothing the
    /// caller still holds can alter what gets digested or signed.
    pub fn new(inner: T) -> Result<DataItem<T>> {
        let inner_bytes = cbor::to_vec(&inner).map_err(Error::UnableToEncode)?;
        Ok(Self::from_bytes(inner_bytes))
    }
}

impl<T: DeserializeOwned> DataItem<T> {
    /// The decoded value, computed on first access.
    pub fn inner(&self) -> Result<&T> {
        if let Some(inner) = self.inner.get() {
            return Ok(inner);
        }
        let decoded = cbor::from_slice(&self.inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(self.inner.get_or_init(|| decoded))
    }

    pub fn into_inner(self) -> Result<T> {
        match self.inner.into_inner() {
            Some(inner) => Ok(inner),
            None => cbor::from_slice(&self.inner_bytes).map_err(Error::UnableToDecode),
        }
    }
}

impl<T> Clone for DataItem<T> {
    /// Clones share bytes only; each clone keeps its own decode cell.
    fn clone(&self) -> Self {
        Self::from_bytes(self.inner_bytes.clone())
    }
}

impl<T> PartialEq for DataItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner_bytes == other.inner_bytes
    }
}

impl<T> Eq for DataItem<T> {}

impl<T> fmt::Debug for DataItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataItem")
            .field(&hex::encode(&self.inner_bytes))
            .finish()
    }
}

impl<T> TryFrom<Value> for DataItem<T> {
    type Error = Error;

    fn try_from(v: Value) -> Result<DataItem<T>> {
        match v {
            Value::Tag(DATA_ITEM_TAG, inner_value) => match *inner_value {
                Value::Bytes(inner_bytes) => Ok(DataItem::from_bytes(inner_bytes)),
                other => Err(Error::InvalidTag24(Box::new(other))),
            },
            _ => Err(Error::NotATag24(v)),
        }
    }
}

impl<T> From<DataItem<T>> for Value {
    fn from(DataItem { inner_bytes, .. }: DataItem<T>) -> Value {
        Value::Tag(DATA_ITEM_TAG, Box::new(Value::Bytes(inner_bytes)))
    }
}

impl<T> Serialize for DataItem<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for DataItem<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer)?
            .try_into()
            .map_err(de::Error::custom)
    }
}
