//! Session transcript input for device authentication.
//!
//! The transcript reaches the verifier either as a decoded CBOR value or as
//! `SessionTranscriptBytes` (`#6.24(bstr .cbor SessionTranscript)`). Both forms resolve to the
//! same logical value and the same tag-24 encoding.
use ciborium::Value;

use crate::definitions::helpers::{data_item, DataItem};

#[derive(Clone, Debug, PartialEq)]
pub enum SessionTranscript {
    Value(Value),
    Bytes(DataItem<Value>),
}

impl SessionTranscript {
    /// `[DeviceEngagementBytes, EReaderKeyBytes, Handover]` as used for proximity presentation.
    pub fn new(device_engagement_bytes: Value, e_reader_key_bytes: Value, handover: Value) -> Self {
        Self::Value(Value::Array(vec![
            device_engagement_bytes,
            e_reader_key_bytes,
            handover,
        ]))
    }

    /// The logical transcript value. Tag-24 wrapped input is unwrapped one level.
    pub fn value(&self) -> Result<Value, data_item::Error> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Bytes(item) => item.inner().cloned(),
        }
    }

    /// `SessionTranscriptBytes`: the tag-24 wire encoding.
    pub fn bytes(&self) -> Result<Vec<u8>, data_item::Error> {
        match self {
            Self::Value(value) => DataItem::new(value.clone())?.encoded(),
            Self::Bytes(item) => item.encoded(),
        }
    }
}

impl From<Value> for SessionTranscript {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<DataItem<Value>> for SessionTranscript {
    fn from(item: DataItem<Value>) -> Self {
        Self::Bytes(item)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn both_forms_agree() {
        let value = Value::Array(vec![Value::Null, Value::Null, Value::Text("handover".into())]);
        let decoded = SessionTranscript::Value(value.clone());
        let wrapped = SessionTranscript::Bytes(DataItem::new(value.clone()).unwrap());
        assert_eq!(decoded.value().unwrap(), value);
        assert_eq!(wrapped.value().unwrap(), value);
        assert_eq!(decoded.bytes().unwrap(), wrapped.bytes().unwrap());
        assert_eq!(decoded.bytes().unwrap()[..2], [0xd8, 0x18]);
    }
}
