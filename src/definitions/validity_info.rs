use ciborium::Value;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

use crate::cbor::extensions::TDATE_TAG;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityInfo {
    #[serde(with = "tdate")]
    pub signed: OffsetDateTime,
    #[serde(with = "tdate")]
    pub valid_from: OffsetDateTime,
    #[serde(with = "tdate")]
    pub valid_until: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "tdate::option")]
    pub expected_update: Option<OffsetDateTime>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Expected to parse a CBOR text string, received: '{0:?}'")]
    NotATextString(Box<Value>),
    #[error("Expected to parse a CBOR tag (number {0}), received: '{1:?}'")]
    NotATag(u64, Value),
    #[error("Failed to parse date string as rfc3339 date: {0}")]
    UnableToParseDate(time::error::Parse),
    #[error("Failed to format date as rfc3339: {0}")]
    UnableToFormatDate(time::error::Format),
}

impl ValidityInfo {
    /// Whether `at` falls within `validFrom..=validUntil`.
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.valid_from <= at && at <= self.valid_until
    }
}

/// `tdate` (tag 0 over an RFC 3339 string) as a serde field codec.
mod tdate {
    use serde::{de, ser, Deserialize, Deserializer, Serialize, Serializer};
    use time::OffsetDateTime;

    use super::{cbor_to_datetime, datetime_to_cbor};

    pub fn serialize<S: Serializer>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        datetime_to_cbor(*dt)
            .map_err(ser::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        cbor_to_datetime(ciborium::Value::deserialize(deserializer)?).map_err(de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<OffsetDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => super::serialize(dt, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            super::deserialize(deserializer).map(Some)
        }
    }
}

/// `tdate` carries whole seconds only.
fn datetime_to_cbor(dt: OffsetDateTime) -> Result<Value> {
    let dt = dt
        .replace_nanosecond(0)
        .map_err(|_| Error::UnableToFormatDate(time::error::Format::InvalidComponent("nanosecond")))?;
    let s = dt.format(&Rfc3339).map_err(Error::UnableToFormatDate)?;
    Ok(Value::Tag(TDATE_TAG, Box::new(Value::Text(s))))
}

fn cbor_to_datetime(v: Value) -> Result<OffsetDateTime> {
    if let Value::Tag(TDATE_TAG, inner) = v {
        if let Value::Text(date_str) = inner.as_ref() {
            OffsetDateTime::parse(date_str, &Rfc3339).map_err(Error::UnableToParseDate)
        } else {
            Err(Error::NotATextString(inner))
        }
    } else {
        Err(Error::NotATag(TDATE_TAG, v))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use time::macros::datetime;

    #[test]
    fn tdate_round_trip_drops_subseconds() {
        let info = ValidityInfo {
            signed: datetime!(2024-01-15 10:00:00.25 UTC),
            valid_from: datetime!(2024-01-15 10:00:00 UTC),
            valid_until: datetime!(2029-01-15 10:00:00 UTC),
            expected_update: None,
        };
        let bytes = cbor::to_vec(&info).unwrap();
        let value: Value = cbor::from_slice(&bytes).unwrap();
        let Value::Map(entries) = &value else {
            panic!("expected a map");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].1,
            Value::Tag(0, Box::new(Value::Text("2024-01-15T10:00:00Z".into())))
        );
        let back: ValidityInfo = cbor::from_slice(&bytes).unwrap();
        assert_eq!(back.signed, datetime!(2024-01-15 10:00:00 UTC));
        assert_eq!(back.valid_until, info.valid_until);
        assert_eq!(back.expected_update, None);
    }

    #[test]
    fn untagged_dates_are_rejected() {
        let value = Value::Map(vec![
            (Value::Text("signed".into()), Value::Text("2024-01-15T10:00:00Z".into())),
            (Value::Text("validFrom".into()), Value::Text("2024-01-15T10:00:00Z".into())),
            (Value::Text("validUntil".into()), Value::Text("2029-01-15T10:00:00Z".into())),
        ]);
        let bytes = cbor::to_vec(&value).unwrap();
        assert!(cbor::from_slice::<ValidityInfo>(&bytes).is_err());
    }
}
