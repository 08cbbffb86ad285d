//! This module contains the definition of the [IssuerSigned] struct and related types.
//!
//! Namespaces keep their wire order, and each element stays a [DataItem] holding the exact bytes
//! the issuer digested. Element values are only decoded when asked for.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cbor::{self, CborError};
use crate::cose::CoseSign1;
use crate::definitions::{
    helpers::{data_item, DataItem},
    DigestId,
};

/// Represents an issuer-signed object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    #[serde(
        rename = "nameSpaces",
        default,
        skip_serializing_if = "Option::is_none",
        with = "wire_order"
    )]
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: CoseSign1,
}

/// Namespace name with its elements, in the order received.
pub type IssuerNamespaces = Vec<(String, Vec<IssuerSignedItemBytes>)>;
pub type IssuerSignedItemBytes = DataItem<IssuerSignedItem>;

/// Represents an item signed by the issuer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedItem {
    /// The ID of the digest used for signing.
    #[serde(rename = "digestID")]
    pub digest_id: DigestId,

    /// Random bytes associated with the signed item.
    #[serde(with = "serde_bytes")]
    pub random: Vec<u8>,

    /// The identifier of the element.
    pub element_identifier: String,

    /// The value of the element.
    pub element_value: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("issuerSigned carries no nameSpaces")]
    MissingNamespaces,
    #[error("element {index} of namespace '{namespace}' could not be decoded: {source}")]
    UndecodableElement {
        namespace: String,
        index: usize,
        source: data_item::Error,
    },
}

impl IssuerSigned {
    /// Namespace names in wire order.
    pub fn namespace_names(&self) -> Vec<&str> {
        self.namespaces
            .iter()
            .flatten()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The elements of one namespace by identifier, or `None` if the namespace is absent.
    pub fn namespace(&self, name: &str) -> Result<Option<BTreeMap<String, Value>>, Error> {
        let Some((namespace, items)) = self
            .namespaces
            .iter()
            .flatten()
            .find(|(namespace, _)| namespace == name)
        else {
            return Ok(None);
        };
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.inner()
                    .map(|item| (item.element_identifier.clone(), item.element_value.clone()))
                    .map_err(|source| Error::UndecodableElement {
                        namespace: namespace.clone(),
                        index,
                        source,
                    })
            })
            .collect::<Result<_, _>>()
            .map(Some)
    }

    /// Every namespace, materialised. Fails on the first element that cannot be decoded.
    pub fn all_namespaces(&self) -> Result<BTreeMap<String, BTreeMap<String, Value>>, Error> {
        let namespaces = self.namespaces.as_ref().ok_or(Error::MissingNamespaces)?;
        namespaces
            .iter()
            .map(|(name, _)| {
                let elements = self.namespace(name)?.unwrap_or_default();
                Ok((name.clone(), elements))
            })
            .collect()
    }

    /// The encode-ready structure. Elements are emitted from their stored bytes and issuerAuth
    /// from its stored fields, so unmodified content reproduces the received encoding.
    pub fn prepare(&self) -> Result<Value, CborError> {
        cbor::from_slice(&cbor::to_vec(self)?)
    }
}

/// `IssuerNameSpaces` as a CBOR map kept in wire order. A namespace may appear only once.
mod wire_order {
    use std::fmt;

    use serde::{
        de::{self, MapAccess, Visitor},
        Deserializer, Serializer,
    };

    use super::{IssuerNamespaces, IssuerSignedItemBytes};

    pub fn serialize<S: Serializer>(
        namespaces: &Option<IssuerNamespaces>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match namespaces {
            Some(namespaces) => {
                serializer.collect_map(namespaces.iter().map(|(name, items)| (name, items)))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<IssuerNamespaces>, D::Error> {
        deserializer.deserialize_map(NamespacesVisitor).map(Some)
    }

    struct NamespacesVisitor;

    impl<'de> Visitor<'de> for NamespacesVisitor {
        type Value = IssuerNamespaces;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a map of namespace to an array of IssuerSignedItemBytes")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut namespaces = IssuerNamespaces::new();
            while let Some((name, items)) =
                access.next_entry::<String, Vec<IssuerSignedItemBytes>>()?
            {
                if namespaces.iter().any(|(existing, _)| *existing == name) {
                    return Err(de::Error::custom(format!("duplicate namespace '{name}'")));
                }
                namespaces.push((name, items));
            }
            Ok(namespaces)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cose::PreparedCoseSign1;
    use coset::{iana, Header, HeaderBuilder};

    fn item(digest_id: DigestId, id: &str, value: Value) -> IssuerSignedItemBytes {
        DataItem::new(IssuerSignedItem {
            digest_id,
            random: vec![0x5a; 16],
            element_identifier: id.into(),
            element_value: value,
        })
        .unwrap()
    }

    fn issuer_signed() -> IssuerSigned {
        let issuer_auth = PreparedCoseSign1::new(
            HeaderBuilder::new()
                .algorithm(iana::Algorithm::ES256)
                .build(),
            Header::default(),
            Some(vec![0xa0]),
            None,
            false,
        )
        .unwrap()
        .finalize(vec![0; 64]);
        IssuerSigned {
            namespaces: Some(vec![
                (
                    "org.iso.18013.5.1".into(),
                    vec![
                        item(1, "given_name", Value::Text("ALICE".into())),
                        item(2, "age_over_18", Value::Bool(true)),
                    ],
                ),
                (
                    "org.example".into(),
                    vec![item(0, "member", Value::Integer(7.into()))],
                ),
            ]),
            issuer_auth,
        }
    }

    #[test]
    fn namespaces_keep_wire_order() {
        let signed = issuer_signed();
        assert_eq!(
            signed.namespace_names(),
            vec!["org.iso.18013.5.1", "org.example"]
        );
        let mdl = signed.namespace("org.iso.18013.5.1").unwrap().unwrap();
        assert_eq!(mdl["given_name"], Value::Text("ALICE".into()));
        assert!(signed.namespace("org.unknown").unwrap().is_none());
        assert_eq!(signed.all_namespaces().unwrap().len(), 2);
    }

    #[test]
    fn prepare_reproduces_element_bytes() {
        let signed = issuer_signed();
        let bytes = cbor::to_vec(&signed).unwrap();
        let decoded: IssuerSigned = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, signed);
        assert_eq!(cbor::to_vec(&decoded.prepare().unwrap()).unwrap(), bytes);
    }

    #[test]
    fn item_wire_form() {
        let item = IssuerSignedItem {
            digest_id: 3,
            random: vec![0x01, 0x02],
            element_identifier: "a".into(),
            element_value: Value::Bool(true),
        };
        // {"digestID": 3, "random": h'0102', "elementIdentifier": "a", "elementValue": true}
        assert_eq!(
            hex::encode(cbor::to_vec(&item).unwrap()),
            concat!(
                "a4686469676573744944036672616e646f6d420102",
                "71656c656d656e744964656e74696669657261616c",
                "656c656d656e7456616c7565f5"
            )
        );
    }

    #[test]
    fn duplicate_namespace_is_rejected() {
        let issuer_auth = cbor::to_vec(&issuer_signed().issuer_auth).unwrap();
        // {"nameSpaces": {"a": [], "a": []}, "issuerAuth": ...}
        let mut bytes =
            hex::decode("a26a6e616d65537061636573a26161806161806a69737375657241757468").unwrap();
        bytes.extend(issuer_auth);
        assert!(cbor::from_slice::<IssuerSigned>(&bytes).is_err());
    }

    #[test]
    fn undecodable_element_is_a_structural_error() {
        let mut signed = issuer_signed();
        if let Some(namespaces) = signed.namespaces.as_mut() {
            namespaces[1].1.push(DataItem::from_bytes(vec![0xa1]));
        }
        assert!(signed.namespace("org.iso.18013.5.1").is_ok());
        assert!(matches!(
            signed.all_namespaces(),
            Err(Error::UndecodableElement { index: 1, .. })
        ));
    }
}
