//! This module contains the definitions related to device signing.
//!
//! The [DeviceSigned] struct represents a device signed object, which includes namespaces and
//! device authentication information. [DeviceAuthentication] is the structure the device's
//! signature or MAC covers.
use std::{collections::BTreeMap, fmt, marker::PhantomData};

use ciborium::Value;
use serde::{
    de::{self, MapAccess, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::cose::{CoseMac0, CoseSign1};
use crate::definitions::{
    helpers::{data_item, DataItem},
    session::SessionTranscript,
};

/// Represents a device-signed structure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub namespaces: DeviceNamespacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = DataItem<DeviceNamespaces>;
pub type DeviceSignedItems = BTreeMap<String, Value>;

/// Device-signed elements by namespace. Keys are kept sorted, so the encoding does not depend
/// on insertion order. A repeated namespace or element identifier fails to decode.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeviceNamespaces(pub BTreeMap<String, DeviceSignedItems>);

/// Device authentication: exactly one of the two envelopes is expected.
///
/// Both are optional here so that a response carrying neither, or both, still parses and can be
/// reported on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_signature: Option<CoseSign1>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_mac: Option<CoseMac0>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceAuthType {
    Sign1,
    Mac0,
}

/// `["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes]`
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceAuthentication {
    pub session_transcript: Value,
    pub doc_type: String,
    pub namespaces_bytes: DeviceNamespacesBytes,
}

pub type DeviceAuthenticationBytes = DataItem<DeviceAuthentication>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to encode value as CBOR: {0}")]
    UnableToEncode(data_item::Error),
    #[error("Unable to resolve the session transcript: {0}")]
    SessionTranscript(data_item::Error),
}

const DEVICE_AUTHENTICATION: &str = "DeviceAuthentication";

impl DeviceAuth {
    pub fn signature(signature: CoseSign1) -> Self {
        Self {
            device_signature: Some(signature),
            device_mac: None,
        }
    }

    pub fn mac(mac: CoseMac0) -> Self {
        Self {
            device_signature: None,
            device_mac: Some(mac),
        }
    }

    /// The kind of authentication, when exactly one envelope is present.
    pub fn auth_type(&self) -> Option<DeviceAuthType> {
        match (&self.device_signature, &self.device_mac) {
            (Some(_), None) => Some(DeviceAuthType::Sign1),
            (None, Some(_)) => Some(DeviceAuthType::Mac0),
            _ => None,
        }
    }
}

impl DeviceAuthentication {
    /// Bind the received DeviceNameSpacesBytes, used verbatim.
    pub fn new(
        session_transcript: &SessionTranscript,
        doc_type: String,
        namespaces_bytes: DeviceNamespacesBytes,
    ) -> Result<Self, Error> {
        Ok(Self {
            session_transcript: session_transcript
                .value()
                .map_err(Error::SessionTranscript)?,
            doc_type,
            namespaces_bytes,
        })
    }

    /// Encode `namespaces` once and bind the result.
    pub fn from_namespaces(
        session_transcript: &SessionTranscript,
        doc_type: String,
        namespaces: DeviceNamespaces,
    ) -> Result<Self, Error> {
        let namespaces_bytes = DataItem::new(namespaces).map_err(Error::UnableToEncode)?;
        Self::new(session_transcript, doc_type, namespaces_bytes)
    }

    /// `DeviceAuthenticationBytes`: the tag-24 encoding of this structure, which is the detached
    /// payload of the device's COSE envelope.
    pub fn to_bytes(self) -> Result<Vec<u8>, Error> {
        DeviceAuthenticationBytes::new(self)
            .and_then(|item| item.encoded())
            .map_err(Error::UnableToEncode)
    }
}

impl DeviceNamespaces {
    pub fn is_empty(&self) -> bool {
        self.0.values().all(BTreeMap::is_empty)
    }

    /// `(namespace, element identifier)` pairs in key order.
    pub fn elements(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(namespace, items)| {
            items
                .keys()
                .map(move |id| (namespace.as_str(), id.as_str()))
        })
    }
}

impl From<BTreeMap<String, DeviceSignedItems>> for DeviceNamespaces {
    fn from(namespaces: BTreeMap<String, DeviceSignedItems>) -> Self {
        Self(namespaces)
    }
}

impl<'de> Deserialize<'de> for DeviceNamespaces {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let UniqueKeys(namespaces) = UniqueKeys::<UniqueKeys<Value>>::deserialize(deserializer)?;
        Ok(Self(
            namespaces
                .into_iter()
                .map(|(namespace, UniqueKeys(items))| (namespace, items))
                .collect(),
        ))
    }
}

/// A text-keyed map that refuses repeated keys instead of keeping the last one.
struct UniqueKeys<V>(BTreeMap<String, V>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for UniqueKeys<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(UniqueKeysVisitor(PhantomData))
    }
}

struct UniqueKeysVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeysVisitor<V> {
    type Value = UniqueKeys<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map with text keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, V>()? {
            if map.contains_key(&key) {
                return Err(de::Error::custom(format!("duplicate map key '{key}'")));
            }
            map.insert(key, value);
        }
        Ok(UniqueKeys(map))
    }
}

impl Serialize for DeviceAuthentication {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (
            DEVICE_AUTHENTICATION,
            &self.session_transcript,
            &self.doc_type,
            &self.namespaces_bytes,
        )
            .serialize(serializer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    fn transcript() -> SessionTranscript {
        SessionTranscript::new(Value::Null, Value::Null, Value::Text("handover".into()))
    }

    fn namespaces(entries: &[(&str, &str, Value)]) -> DeviceNamespaces {
        let mut namespaces = DeviceNamespaces::default();
        for (namespace, id, value) in entries {
            namespaces
                .0
                .entry(namespace.to_string())
                .or_default()
                .insert(id.to_string(), value.clone());
        }
        namespaces
    }

    fn bytes(namespaces: DeviceNamespaces) -> Vec<u8> {
        DeviceAuthentication::from_namespaces(&transcript(), "org.iso.18013.5.1.mDL".into(), namespaces)
            .unwrap()
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn empty_namespaces_exact_bytes() {
        let expected = DeviceAuthentication::from_namespaces(
            &SessionTranscript::Value(Value::Null),
            "d".into(),
            DeviceNamespaces::default(),
        )
        .unwrap()
        .to_bytes()
        .unwrap();
        // 24(<< ["DeviceAuthentication", null, "d", 24(<< {} >>)] >>)
        assert_eq!(
            expected,
            hex!("d818581d847444657669636541757468656e7469636174696f6ef66164d81841a0")
        );
    }

    #[test]
    fn deterministic_and_order_independent() {
        let a = namespaces(&[
            ("org.iso.18013.5.1", "given_name", Value::Text("ALICE".into())),
            ("org.example", "member", Value::Bool(true)),
        ]);
        let b = namespaces(&[
            ("org.example", "member", Value::Bool(true)),
            ("org.iso.18013.5.1", "given_name", Value::Text("ALICE".into())),
        ]);
        assert_eq!(bytes(a.clone()), bytes(a.clone()));
        assert_eq!(bytes(a.clone()), bytes(b));

        let changed = namespaces(&[
            ("org.iso.18013.5.1", "given_name", Value::Text("ALICF".into())),
            ("org.example", "member", Value::Bool(true)),
        ]);
        assert_ne!(bytes(a), bytes(changed));
    }

    #[test]
    fn wrapped_transcript_is_unwrapped_once() {
        let value = transcript().value().unwrap();
        let wrapped = SessionTranscript::Bytes(DataItem::new(value).unwrap());
        let direct = DeviceAuthentication::from_namespaces(
            &transcript(),
            "doc".into(),
            DeviceNamespaces::default(),
        )
        .unwrap();
        let via_bytes =
            DeviceAuthentication::from_namespaces(&wrapped, "doc".into(), DeviceNamespaces::default())
                .unwrap();
        assert_eq!(direct.to_bytes().unwrap(), via_bytes.to_bytes().unwrap());
    }

    #[test]
    fn received_namespace_bytes_are_used_verbatim() {
        // {} encoded with an indefinite-length map header.
        let received = DataItem::<DeviceNamespaces>::from_bytes(vec![0xbf, 0xff]);
        let auth = DeviceAuthentication::new(&transcript(), "doc".into(), received.clone()).unwrap();
        assert_eq!(auth.namespaces_bytes.bytes(), &[0xbf, 0xff]);
        assert!(received.inner().unwrap().is_empty());
        assert_ne!(
            auth.to_bytes().unwrap(),
            DeviceAuthentication::from_namespaces(&transcript(), "doc".into(), DeviceNamespaces::default())
                .unwrap()
                .to_bytes()
                .unwrap()
        );
    }

    #[test]
    fn repeated_keys_are_rejected() {
        // {"ns": {"a": 1, "a": 2}}
        let element = 
            DataItem::<DeviceNamespaces>::from_bytes(hex!("a1626e73a2616101616102").to_vec());
        assert!(element.inner().is_err());
        // {"ns": {}, "ns": {}}
        let namespace = 
            DataItem::<DeviceNamespaces>::from_bytes(hex!("a2626e73a0626e73a0").to_vec());
        assert!(namespace.inner().is_err());
        // {"ns": {"a": 1, "b": 2}}
        let distinct = 
            DataItem::<DeviceNamespaces>::from_bytes(hex!("a1626e73a2616101616202").to_vec());
        assert_eq!(distinct.inner().unwrap().elements().count(), 2);
    }

    #[test]
    fn auth_type_requires_exactly_one() {
        let neither = DeviceAuth {
            device_signature: None,
            device_mac: None,
        };
        assert_eq!(neither.auth_type(), None);
    }
}
