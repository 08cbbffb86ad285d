//! The top-level response a holder sends to a reader, and the parser entry point for it.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString, EnumVariantNames};

use crate::cbor::{self, extensions, CborError};
use crate::definitions::{
    helpers::{data_item, DataItem},
    issuer_signed, DeviceSigned, IssuerSigned, Mso,
};

/// Represents a device response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    /// The version of the response.
    pub version: String,

    /// The documents associated with the response, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<Document>>,

    /// The errors associated with the documents, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_errors: Option<DocumentErrors>,

    /// The status of the response.
    pub status: Status,
}

/// Represents a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// A string representing the type of the document.
    pub doc_type: String,

    /// The issuer-signed data.
    pub issuer_signed: IssuerSigned,

    /// The device-signed data, absent when the document was not device authenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_signed: Option<DeviceSigned>,

    /// Errors for elements that were requested but not returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Errors>,
}

/// Errors mapped by namespace and element identifier.
pub type Errors = BTreeMap<String, BTreeMap<String, DocumentErrorCode>>;
/// A list of document errors.
pub type DocumentErrors = Vec<DocumentError>;
/// A map of document type to document error for them.
pub type DocumentError = BTreeMap<String, DocumentErrorCode>;

/// Document specific errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum DocumentErrorCode {
    DataNotReturned,
    ApplicationSpecific(i64),
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, EnumString, EnumVariantNames, AsRefStr,
)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    OK = 0,
    GeneralError = 10,
    CborDecodingError = 11,
    CborValidationError = 12,
}

pub const DEVICE_RESPONSE_VERSION: &str = "1.0";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid status value: {0}")]
    InvalidStatus(u64),
    #[error("issuerAuth carries no payload")]
    DetachedIssuerAuth,
    #[error("issuerAuth payload is not a tag-24 data item: {0}")]
    MsoNotDataItem(CborError),
    #[error("unable to decode the mobile security object: {0}")]
    MsoDecoding(data_item::Error),
    #[error(transparent)]
    IssuerSigned(#[from] issuer_signed::Error),
}

impl DeviceResponse {
    /// A response carrying `documents` with status OK.
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            version: DEVICE_RESPONSE_VERSION.to_string(),
            documents: Some(documents),
            document_errors: None,
            status: Status::OK,
        }
    }

    pub fn documents(&self) -> &[Document] {
        self.documents.as_deref().unwrap_or_default()
    }
}

impl Document {
    /// The tag-24 wrapped MSO carried as the issuerAuth payload, with its bytes as received.
    pub fn mso_bytes(&self) -> Result<DataItem<Mso>, Error> {
        let payload = self
            .issuer_signed
            .issuer_auth
            .payload
            .as_deref()
            .ok_or(Error::DetachedIssuerAuth)?;
        cbor::from_slice(payload).map_err(Error::MsoNotDataItem)
    }

    pub fn mso(&self) -> Result<Mso, Error> {
        self.mso_bytes()?.into_inner().map_err(Error::MsoDecoding)
    }

    /// The issuer-signed claims rendered as JSON, by namespace and element identifier.
    pub fn issuer_claims_json(
        &self,
    ) -> Result<BTreeMap<String, BTreeMap<String, serde_json::Value>>, Error> {
        Ok(self
            .issuer_signed
            .all_namespaces()?
            .into_iter()
            .map(|(namespace, elements)| {
                let elements = elements
                    .iter()
                    .map(|(id, value)| (id.clone(), extensions::to_json(value)))
                    .collect();
                (namespace, elements)
            })
            .collect())
    }
}

impl From<DocumentErrorCode> for i64 {
    fn from(code: DocumentErrorCode) -> Self {
        match code {
            DocumentErrorCode::DataNotReturned => 0,
            DocumentErrorCode::ApplicationSpecific(i) => i,
        }
    }
}

impl From<i64> for DocumentErrorCode {
    fn from(code: i64) -> Self {
        match code {
            0 => DocumentErrorCode::DataNotReturned,
            i => DocumentErrorCode::ApplicationSpecific(i),
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::OK),
            10 => Ok(Status::GeneralError),
            11 => Ok(Status::CborDecodingError),
            12 => Ok(Status::CborValidationError),
            other => Err(Error::InvalidStatus(other)),
        }
    }
}

impl From<Status> for u64 {
    fn from(status: Status) -> Self {
        status as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ciborium::Value;

    #[test]
    fn status_codes() {
        assert_eq!(Status::try_from(0).unwrap(), Status::OK);
        assert_eq!(Status::try_from(11).unwrap(), Status::CborDecodingError);
        assert!(Status::try_from(3).is_err());
        assert_eq!(u64::from(Status::CborValidationError), 12);
    }

    #[test]
    fn empty_response_round_trip() {
        let response = DeviceResponse {
            version: "1.0".into(),
            documents: None,
            document_errors: Some(vec![BTreeMap::from([(
                "org.iso.18013.5.1.mDL".to_string(),
                DocumentErrorCode::DataNotReturned,
            )])]),
            status: Status::OK,
        };
        let bytes = cbor::to_vec(&response).unwrap();
        let decoded: DeviceResponse = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, response);
        assert!(decoded.documents().is_empty());
    }

    #[test]
    fn missing_status_fails_to_parse() {
        let bytes = cbor::to_vec(&Value::Map(vec![(
            Value::Text("version".into()),
            Value::Text("1.0".into()),
        )]))
        .unwrap();
        assert!(cbor::from_slice::<DeviceResponse>(&bytes).is_err());
    }

    #[test]
    fn unknown_status_fails_to_parse() {
        let bytes = cbor::to_vec(&Value::Map(vec![
            (Value::Text("version".into()), Value::Text("1.0".into())),
            (Value::Text("status".into()), Value::Integer(3.into())),
        ]))
        .unwrap();
        assert!(cbor::from_slice::<DeviceResponse>(&bytes).is_err());
    }

    #[test]
    fn error_codes_are_integers() {
        let errors: Errors = BTreeMap::from([(
            "org.iso.18013.5.1".to_string(),
            BTreeMap::from([
                ("portrait".to_string(), DocumentErrorCode::DataNotReturned),
                ("x".to_string(), DocumentErrorCode::ApplicationSpecific(-3)),
            ]),
        )]);
        let value: Value = cbor::from_slice(&cbor::to_vec(&errors).unwrap()).unwrap();
        let codes = value.as_map().unwrap()[0].1.as_map().unwrap();
        assert_eq!(codes[0].1, Value::Integer(0.into()));
        assert_eq!(codes[1].1, Value::Integer((-3).into()));
    }
}
