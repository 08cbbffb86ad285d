//! COSE envelopes used by mdocs: `COSE_Sign1` (issuerAuth, deviceSignature) and `COSE_Mac0`
//! (deviceMac).
//!
//! Protected headers are held as the exact bytes that were received or first encoded. Every
//! signing input is built from those bytes; the decoded header map is only ever read.
pub mod mac0;
pub mod sign1;

use std::sync::OnceLock;

use ciborium::Value;
use coset::{iana::EnumI64, AsCborValue, CborSerializable, CoseError, Header, Label};

pub use mac0::{CoseMac0, PreparedCoseMac0};
pub use sign1::{CoseSign1, PreparedCoseSign1};

use crate::cbor;

/// Header label of the X.509 certificate chain (RFC 9360).
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

/// Unprotected headers are never part of a signing input and stay freely editable.
pub type UnprotectedHeaders = Header;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to encode protected headers: {0}")]
    ProtectedHeadersEncoding(CoseError),
    #[error("unable to decode protected headers: {0}")]
    ProtectedHeadersDecoding(CoseError),
    #[error("no payload: the envelope is detached and no external payload was supplied")]
    MissingPayload,
    #[error("the envelope embeds a payload but a detached payload was supplied")]
    PayloadNotDetached,
    #[error("x5chain header is neither a bstr nor an array of bstr")]
    MalformedX5Chain,
    #[error("crypto capability failed: {0}")]
    Capability(anyhow::Error),
}

/// Protected headers with frozen bytes.
///
/// Built either from received bytes (decoded on first access) or from a header map (encoded
/// once). An empty map is represented by a zero-length byte string.
pub struct ProtectedHeaders {
    bytes: Vec<u8>,
    header: OnceLock<Header>,
}

impl ProtectedHeaders {
    pub fn new(header: Header) -> Result<Self, Error> {
        let bytes = if header.is_empty() {
            vec![]
        } else {
            header
                .clone()
                .to_vec()
                .map_err(Error::ProtectedHeadersEncoding)?
        };
        Ok(Self {
            bytes,
            header: OnceLock::from(header),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            header: OnceLock::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header(&self) -> Result<&Header, Error> {
        if let Some(header) = self.header.get() {
            return Ok(header);
        }
        let decoded = if self.bytes.is_empty() {
            Header::default()
        } else {
            Header::from_slice(&self.bytes).map_err(Error::ProtectedHeadersDecoding)?
        };
        Ok(self.header.get_or_init(|| decoded))
    }

    /// The coset view used for `Sig_structure`/`MAC_structure`: only `original_data` is
    /// consulted when encoding, so the frozen bytes are used as-is.
    pub(crate) fn to_coset(&self) -> coset::ProtectedHeader {
        coset::ProtectedHeader {
            original_data: Some(self.bytes.clone()),
            header: Header::default(),
        }
    }
}

impl Clone for ProtectedHeaders {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes.clone(),
            header: self.header.clone(),
        }
    }
}

impl PartialEq for ProtectedHeaders {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl std::fmt::Debug for ProtectedHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedHeaders")
            .field("bytes", &hex::encode(&self.bytes))
            .field("header", &self.header.get())
            .finish()
    }
}

/// The four fields shared by `COSE_Sign1` and `COSE_Mac0`.
pub(crate) struct Envelope {
    pub tagged: bool,
    pub protected: ProtectedHeaders,
    pub unprotected: UnprotectedHeaders,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
}

impl Envelope {
    pub fn from_cbor_value(value: Value, cose_tag: u64, name: &'static str) -> coset::Result<Self> {
        let (tagged, value) = match value {
            Value::Tag(t, inner) if t == cose_tag => (true, *inner),
            Value::Tag(_, _) => return Err(CoseError::UnexpectedItem("other tag", name)),
            v => (false, v),
        };
        let fields = cbor::array(value, name)?;
        let [protected, unprotected, payload, tag]: [Value; 4] = fields
            .try_into()
            .map_err(|_| CoseError::UnexpectedItem("array with wrong length", name))?;
        let protected = ProtectedHeaders::from_bytes(cbor::bytes(protected, "protected headers")?);
        let unprotected = Header::from_cbor_value(unprotected)?;
        let payload = match payload {
            Value::Null => None,
            v => Some(cbor::bytes(v, "payload")?),
        };
        let tag = cbor::bytes(tag, "signature or tag")?;
        Ok(Self {
            tagged,
            protected,
            unprotected,
            payload,
            tag,
        })
    }

    pub fn to_cbor_value(self, cose_tag: u64) -> coset::Result<Value> {
        let array = Value::Array(vec![
            Value::Bytes(self.protected.bytes),
            self.unprotected.to_cbor_value()?,
            self.payload.map(Value::Bytes).unwrap_or(Value::Null),
            Value::Bytes(self.tag),
        ]);
        Ok(if self.tagged {
            Value::Tag(cose_tag, Box::new(array))
        } else {
            array
        })
    }
}

/// The payload a signing input covers. An envelope either embeds its payload or is given a
/// detached one, never both.
pub(crate) fn covered_payload<'a>(
    embedded: Option<&'a [u8]>,
    detached: Option<&'a [u8]>,
) -> Result<&'a [u8], Error> {
    match (embedded, detached) {
        (Some(_), Some(_)) => Err(Error::PayloadNotDetached),
        (Some(payload), None) | (None, Some(payload)) => Ok(payload),
        (None, None) => Err(Error::MissingPayload),
    }
}

/// The `alg` protected header as a COSE algorithm identifier.
pub(crate) fn algorithm(protected: &ProtectedHeaders) -> Result<Option<i64>, Error> {
    Ok(protected.header()?.alg.as_ref().and_then(|alg| match alg {
        coset::Algorithm::Assigned(a) => Some(a.to_i64()),
        coset::Algorithm::PrivateUse(i) => Some(*i),
        coset::Algorithm::Text(_) => None,
    }))
}

/// DER certificates from the x5chain header, leaf first. Unprotected headers take precedence.
pub(crate) fn x5chain(
    protected: &ProtectedHeaders,
    unprotected: &UnprotectedHeaders,
) -> Result<Option<Vec<Vec<u8>>>, Error> {
    let label = Label::Int(X5CHAIN_HEADER_LABEL);
    let find = |header: &Header| {
        header
            .rest
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.clone())
    };
    let value = match find(unprotected) {
        Some(value) => value,
        None => match find(protected.header()?) {
            Some(value) => value,
            None => return Ok(None),
        },
    };
    match value {
        Value::Bytes(der) => Ok(Some(vec![der])),
        Value::Array(certs) if !certs.is_empty() => certs
            .into_iter()
            .map(|c| c.into_bytes().map_err(|_| Error::MalformedX5Chain))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        _ => Err(Error::MalformedX5Chain),
    }
}

/// The x5chain header value for `certificates`: a single bstr for one certificate, otherwise an
/// array.
pub fn x5chain_header_value(mut certificates: Vec<Vec<u8>>) -> Value {
    if certificates.len() == 1 {
        Value::Bytes(certificates.remove(0))
    } else {
        Value::Array(certificates.into_iter().map(Value::Bytes).collect())
    }
}
