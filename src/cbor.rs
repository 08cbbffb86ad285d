//! CBOR codec adapter.
//!
//! Every encode and decode in the crate goes through this module so that the underlying
//! library ([ciborium]) can be swapped without touching the data model. Generic values keep maps
//! as ordered `(key, value)` pair lists: mdoc payloads use integer and structured keys, so nothing
//! here ever coerces keys to text.
pub mod extensions;

use coset::{cbor, CoseError, EndOfFile};
use serde::{de, Serialize};
use thiserror::Error;

/// Tag number for RFC 8746 uint8 typed arrays, used when [Options::tag_byte_strings] is set.
pub const TYPED_ARRAY_UINT8_TAG: u64 = 64;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(cbor::de::Error<EndOfFile>),
    /// Duplicate map key detected.
    #[error("duplicate map key")]
    DuplicateMapKey,
    /// CBOR encoding failure.
    #[error("CBOR encoding failure")]
    EncodeFailed,
    /// CBOR input had extra data.
    #[error("extraneous data")]
    ExtraneousData,
    /// Integer value on the wire is outside the range of integers representable in this crate.
    #[error("integer value out of range")]
    OutOfRangeIntegerValue,
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
    /// Unrecognized value in IANA-controlled range (with no private range).
    #[error("unregistered IANA value")]
    UnregisteredIanaValue,
    /// Unrecognized value in neither IANA-controlled range nor private range.
    #[error("unregistered non-private IANA value")]
    UnregisteredIanaNonPrivateValue,
    /// A tagged item did not satisfy its registered extension.
    #[error("invalid content for tag {0}: {1}")]
    InvalidTaggedItem(u64, String),
}

impl From<CoseError> for CborError {
    fn from(e: CoseError) -> Self {
        match e {
            CoseError::DecodeFailed(e) => CborError::DecodeFailed(e),
            CoseError::DuplicateMapKey => CborError::DuplicateMapKey,
            CoseError::EncodeFailed => CborError::EncodeFailed,
            CoseError::ExtraneousData => CborError::ExtraneousData,
            CoseError::OutOfRangeIntegerValue => CborError::OutOfRangeIntegerValue,
            CoseError::UnexpectedItem(s, s2) => CborError::UnexpectedItem(s, s2),
            CoseError::UnregisteredIanaValue => CborError::UnregisteredIanaValue,
            CoseError::UnregisteredIanaNonPrivateValue => {
                CborError::UnregisteredIanaNonPrivateValue
            }
        }
    }
}

/// Codec options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Wrap every byte string in tag 64 when encoding. Never set for mdoc payloads.
    pub tag_byte_strings: bool,
    /// Validate tagged items against the [extensions] registry when decoding.
    pub apply_extensions: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            tag_byte_strings: false,
            apply_extensions: true,
        }
    }
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|_| CborError::EncodeFailed)?;
    Ok(buf)
}

/// Decode exactly one item from `slice`; trailing bytes are an error.
pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    let mut data = slice;
    let value = ciborium::from_reader(&mut data).map_err(|e| {
        CborError::DecodeFailed(ciborium::de::Error::Semantic(None, e.to_string()))
    })?;
    if !data.is_empty() {
        return Err(CborError::ExtraneousData);
    }
    Ok(value)
}

/// Encode a value honouring `options`.
pub fn encode_with(value: &ciborium::Value, options: Options) -> Result<Vec<u8>, CborError> {
    if options.tag_byte_strings {
        to_vec(&tag_byte_strings(value.clone()))
    } else {
        to_vec(value)
    }
}

/// Decode a value honouring `options`.
pub fn decode_with(bytes: &[u8], options: Options) -> Result<ciborium::Value, CborError> {
    let value: ciborium::Value = from_slice(bytes)?;
    if options.apply_extensions {
        extensions::registry().validate(&value)?;
    }
    Ok(value)
}

fn tag_byte_strings(value: ciborium::Value) -> ciborium::Value {
    use ciborium::Value as V;
    match value {
        V::Bytes(b) => V::Tag(TYPED_ARRAY_UINT8_TAG, Box::new(V::Bytes(b))),
        V::Tag(TYPED_ARRAY_UINT8_TAG, inner) if inner.is_bytes() => {
            V::Tag(TYPED_ARRAY_UINT8_TAG, inner)
        }
        V::Tag(t, inner) => V::Tag(t, Box::new(tag_byte_strings(*inner))),
        V::Array(a) => V::Array(a.into_iter().map(tag_byte_strings).collect()),
        V::Map(m) => V::Map(
            m.into_iter()
                .map(|(k, v)| (tag_byte_strings(k), tag_byte_strings(v)))
                .collect(),
        ),
        other => other,
    }
}

pub(crate) fn bytes(value: ciborium::Value, name: &'static str) -> coset::Result<Vec<u8>> {
    value
        .into_bytes()
        .map_err(|_| CoseError::UnexpectedItem("non-bstr", name))
}

pub(crate) fn array(value: ciborium::Value, name: &'static str) -> coset::Result<Vec<ciborium::Value>> {
    value
        .into_array()
        .map_err(|_| CoseError::UnexpectedItem("non-array", name))
}

/// Serde bridge for types that only speak [coset::AsCborValue], such as [coset::CoseKey].
///
/// Use as `#[serde(with = "crate::cbor::coset_value")]`.
pub mod coset_value {
    use coset::AsCborValue;
    use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: AsCborValue + Clone,
        S: Serializer,
    {
        value
            .clone()
            .to_cbor_value()
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: AsCborValue,
        D: Deserializer<'de>,
    {
        let value = ciborium::Value::deserialize(deserializer)?;
        T::from_cbor_value(value).map_err(de::Error::custom)
    }
}
