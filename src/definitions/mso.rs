use std::collections::BTreeMap;

use ciborium::Value;
use coset::CoseKey;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::cbor;
use crate::definitions::ValidityInfo;

pub type DigestId = u64;
pub type DigestIds = BTreeMap<DigestId, ByteBuf>;
pub type ValueDigests = BTreeMap<String, DigestIds>;

/// Mobile security object: the issuer-signed digest table of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mso {
    pub version: String,
    /// Kept as received so an unsupported identifier is reported rather than rejected at decode.
    pub digest_algorithm: String,
    pub value_digests: ValueDigests,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: String,
    pub validity_info: ValidityInfo,
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Serialize, EnumString, AsRefStr, Display)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    #[strum(serialize = "SHA-256")]
    SHA256,
    #[serde(rename = "SHA-384")]
    #[strum(serialize = "SHA-384")]
    SHA384,
    #[serde(rename = "SHA-512")]
    #[strum(serialize = "SHA-512")]
    SHA512,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    #[serde(with = "cbor::coset_value")]
    pub device_key: CoseKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_authorizations: Option<KeyAuthorizations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_info: Option<BTreeMap<i64, Value>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAuthorizations {
    #[serde(
        rename = "nameSpaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub namespaces: Option<Vec<String>>,
    #[serde(
        rename = "dataElements",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub data_elements: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("namespace '{0}' cannot be present in both authorized_namespaces and authorized_data_elements")]
    DoubleAuthorized(String),
}

impl Mso {
    pub fn digest_algorithm(&self) -> Option<DigestAlgorithm> {
        self.digest_algorithm.parse().ok()
    }

    pub fn digest(&self, namespace: &str, digest_id: DigestId) -> Option<&[u8]> {
        self.value_digests
            .get(namespace)
            .and_then(|ids| ids.get(&digest_id))
            .map(|digest| digest.as_slice())
    }
}

impl KeyAuthorizations {
    /// If a namespace is present in authorized namespaces then it cannot be present in
    /// authorized data elements.
    pub fn validate(&self) -> Result<(), Error> {
        let (Some(namespaces), Some(data_elements)) = (&self.namespaces, &self.data_elements)
        else {
            return Ok(());
        };
        namespaces.iter().try_for_each(|namespace| {
            data_elements
                .get(namespace)
                .map_or(Ok(()), |_| Err(Error::DoubleAuthorized(namespace.clone())))
        })
    }

    /// Determine whether the key is permitted to sign over the designated element.
    pub fn permitted(&self, namespace: &str, element_identifier: &str) -> bool {
        let whole_namespace = self
            .namespaces
            .as_ref()
            .map(|ns| ns.iter().any(|n| n == namespace))
            .unwrap_or(false);
        let single_element = self
            .data_elements
            .as_ref()
            .and_then(|de| de.get(namespace))
            .map(|ids| ids.iter().any(|id| id == element_identifier))
            .unwrap_or(false);
        whole_namespace || single_element
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coset::iana;
    use time::macros::datetime;

    fn mso() -> Mso {
        let device_key = coset::CoseKeyBuilder::new_ec2_pub_key(
            iana::EllipticCurve::P_256,
            vec![1; 32],
            vec![2; 32],
        )
        .build();
        Mso {
            version: "1.0".into(),
            digest_algorithm: "SHA-256".into(),
            value_digests: [(
                "org.iso.18013.5.1".to_string(),
                [(1, ByteBuf::from(vec![0xaa; 32]))].into_iter().collect(),
            )]
            .into_iter()
            .collect(),
            device_key_info: DeviceKeyInfo {
                device_key,
                key_authorizations: Some(KeyAuthorizations {
                    namespaces: Some(vec!["org.iso.18013.5.1".into()]),
                    data_elements: None,
                }),
                key_info: None,
            },
            doc_type: "org.iso.18013.5.1.mDL".into(),
            validity_info: ValidityInfo {
                signed: datetime!(2024-01-01 00:00:00 UTC),
                valid_from: datetime!(2024-01-01 00:00:00 UTC),
                valid_until: datetime!(2025-01-01 00:00:00 UTC),
                expected_update: None,
            },
        }
    }

    #[test]
    fn mso_round_trip() {
        let original = mso();
        let bytes = cbor::to_vec(&original).unwrap();
        let decoded: Mso = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.digest_algorithm(), Some(DigestAlgorithm::SHA256));
        assert_eq!(decoded.digest("org.iso.18013.5.1", 1), Some(&[0xaa; 32][..]));
        assert_eq!(decoded.digest("org.iso.18013.5.1", 2), None);
    }

    #[test]
    fn unknown_digest_algorithm_still_decodes() {
        let mut original = mso();
        original.digest_algorithm = "MD5".into();
        let decoded: Mso = cbor::from_slice(&cbor::to_vec(&original).unwrap()).unwrap();
        assert_eq!(decoded.digest_algorithm(), None);
    }

    #[test]
    fn wire_field_names() {
        let value: Value = cbor::from_slice(&cbor::to_vec(&mso()).unwrap()).unwrap();
        let keys: Vec<_> = value
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(
            keys,
            [
                "version",
                "digestAlgorithm",
                "valueDigests",
                "deviceKeyInfo",
                "docType",
                "validityInfo"
            ]
        );
    }

    #[test]
    fn missing_device_key_fails_to_decode() {
        let value = Value::Map(vec![(
            Value::Text("keyAuthorizations".into()),
            Value::Map(vec![]),
        )]);
        let bytes = cbor::to_vec(&value).unwrap();
        assert!(cbor::from_slice::<DeviceKeyInfo>(&bytes).is_err());
    }

    #[test]
    fn key_authorizations() {
        let auth = KeyAuthorizations {
            namespaces: Some(vec!["a".into()]),
            data_elements: Some([("b".to_string(), vec!["x".to_string()])].into()),
        };
        assert!(auth.validate().is_ok());
        assert!(auth.permitted("a", "anything"));
        assert!(auth.permitted("b", "x"));
        assert!(!auth.permitted("b", "y"));
        assert!(!auth.permitted("c", "x"));

        let double = KeyAuthorizations {
            namespaces: Some(vec!["a".into()]),
            data_elements: Some([("a".to_string(), vec!["x".to_string()])].into()),
        };
        assert!(double.validate().is_err());
    }
}
