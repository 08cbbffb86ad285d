use ciborium::Value;
use coset::{sig_structure_data, AsCborValue, CborSerializable, CoseKey, Header, SignatureContext};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Envelope, Error, ProtectedHeaders, UnprotectedHeaders};
use crate::{capability::CoseProvider, cbor};

/// CBOR tag for `COSE_Sign1_Tagged`.
pub const COSE_SIGN1_TAG: u64 = 18;

/// A `COSE_Sign1` carrying a signature, either received or freshly produced.
#[derive(Clone, Debug, PartialEq)]
pub struct CoseSign1 {
    pub protected: ProtectedHeaders,
    pub unprotected: UnprotectedHeaders,
    /// `None` when the payload is detached.
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
    tagged: bool,
}

/// A `COSE_Sign1` whose headers and payload are fixed and which awaits its signature.
#[derive(Clone, Debug)]
pub struct PreparedCoseSign1 {
    cose_sign1: CoseSign1,
    signature_payload: Vec<u8>,
}

impl CoseSign1 {
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// The `Sig_structure` this envelope's signature covers. `detached_payload` must be given
    /// exactly when the envelope carries no payload of its own.
    pub fn signature_payload(&self, detached_payload: Option<&[u8]>) -> Result<Vec<u8>, Error> {
        let payload = super::covered_payload(self.payload.as_deref(), detached_payload)?;
        Ok(sig_structure_data(
            SignatureContext::CoseSign1,
            self.protected.to_coset(),
            None,
            &[],
            payload,
        ))
    }

    pub fn algorithm(&self) -> Result<Option<i64>, Error> {
        super::algorithm(&self.protected)
    }

    pub fn x5chain(&self) -> Result<Option<Vec<Vec<u8>>>, Error> {
        super::x5chain(&self.protected, &self.unprotected)
    }

    /// Check the signature. A mismatch is `Ok(false)`; errors are reserved for envelopes or keys
    /// the provider cannot work with.
    pub async fn verify<P>(
        &self,
        provider: &P,
        key: &CoseKey,
        detached_payload: Option<&[u8]>,
    ) -> Result<bool, Error>
    where
        P: CoseProvider,
    {
        provider
            .sign1_verify(self, key, detached_payload)
            .await
            .map_err(Error::Capability)
    }
}

impl PreparedCoseSign1 {
    /// Freeze `protected` and compute the signing input. With `detached_payload` set, the
    /// envelope is emitted with a nil payload.
    pub fn new(
        protected: Header,
        unprotected: UnprotectedHeaders,
        payload: Option<Vec<u8>>,
        detached_payload: Option<&[u8]>,
        tagged: bool,
    ) -> Result<Self, Error> {
        let cose_sign1 = CoseSign1 {
            protected: ProtectedHeaders::new(protected)?,
            unprotected,
            payload: if detached_payload.is_some() { None } else { payload },
            signature: vec![],
            tagged,
        };
        let signature_payload = cose_sign1.signature_payload(detached_payload)?;
        Ok(Self {
            cose_sign1,
            signature_payload,
        })
    }

    pub fn signature_payload(&self) -> &[u8] {
        &self.signature_payload
    }

    pub fn algorithm(&self) -> Result<Option<i64>, Error> {
        self.cose_sign1.algorithm()
    }

    pub fn finalize(self, signature: Vec<u8>) -> CoseSign1 {
        CoseSign1 {
            signature,
            ..self.cose_sign1
        }
    }

    pub async fn sign<P>(self, provider: &P, key: &CoseKey) -> Result<CoseSign1, Error>
    where
        P: CoseProvider,
    {
        let signature = provider
            .sign1_sign(&self, key)
            .await
            .map_err(Error::Capability)?;
        Ok(self.finalize(signature))
    }
}

impl Serialize for CoseSign1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        cbor::coset_value::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for CoseSign1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        cbor::coset_value::deserialize(deserializer)
    }
}

impl CborSerializable for CoseSign1 {}
impl AsCborValue for CoseSign1 {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        let envelope = Envelope::from_cbor_value(value, COSE_SIGN1_TAG, "COSE_Sign1")?;
        Ok(Self {
            protected: envelope.protected,
            unprotected: envelope.unprotected,
            payload: envelope.payload,
            signature: envelope.tag,
            tagged: envelope.tagged,
        })
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Envelope {
            tagged: self.tagged,
            protected: self.protected,
            unprotected: self.unprotected,
            payload: self.payload,
            tag: self.signature,
        }
        .to_cbor_value(COSE_SIGN1_TAG)
    }
}
