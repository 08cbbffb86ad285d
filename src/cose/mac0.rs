use ciborium::Value;
use coset::{mac_structure_data, AsCborValue, CborSerializable, CoseKey, Header, MacContext};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Envelope, Error, ProtectedHeaders, UnprotectedHeaders};
use crate::{capability::CoseProvider, cbor};

/// CBOR tag for `COSE_Mac0_Tagged`.
pub const COSE_MAC0_TAG: u64 = 17;

/// A `COSE_Mac0` carrying its authentication tag.
#[derive(Clone, Debug, PartialEq)]
pub struct CoseMac0 {
    pub protected: ProtectedHeaders,
    pub unprotected: UnprotectedHeaders,
    /// `None` when the payload is detached.
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
    tagged: bool,
}

/// A `COSE_Mac0` whose headers and payload are fixed and which awaits its tag.
#[derive(Clone, Debug)]
pub struct PreparedCoseMac0 {
    cose_mac0: CoseMac0,
    tag_payload: Vec<u8>,
}

impl CoseMac0 {
    pub fn is_tagged(&self) -> bool {
        self.tagged
    }

    /// The `MAC_structure` this envelope's tag covers. `detached_payload` must be given exactly
    /// when the envelope carries no payload of its own.
    pub fn tag_payload(&self, detached_payload: Option<&[u8]>) -> Result<Vec<u8>, Error> {
        let payload = super::covered_payload(self.payload.as_deref(), detached_payload)?;
        Ok(mac_structure_data(
            MacContext::CoseMac0,
            self.protected.to_coset(),
            &[],
            payload,
        ))
    }

    pub fn algorithm(&self) -> Result<Option<i64>, Error> {
        super::algorithm(&self.protected)
    }

    /// Check the tag. A mismatch is `Ok(false)`.
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
            .mac0_verify(self, key, detached_payload)
            .await
            .map_err(Error::Capability)
    }
}

impl PreparedCoseMac0 {
    pub fn new(
        protected: Header,
        unprotected: UnprotectedHeaders,
        payload: Option<Vec<u8>>,
        detached_payload: Option<&[u8]>,
        tagged: bool,
    ) -> Result<Self, Error> {
        let cose_mac0 = CoseMac0 {
            protected: ProtectedHeaders::new(protected)?,
            unprotected,
            payload: if detached_payload.is_some() { None } else { payload },
            tag: vec![],
            tagged,
        };
        let tag_payload = cose_mac0.tag_payload(detached_payload)?;
        Ok(Self {
            cose_mac0,
            tag_payload,
        })
    }

    pub fn tag_payload(&self) -> &[u8] {
        &self.tag_payload
    }

    pub fn algorithm(&self) -> Result<Option<i64>, Error> {
        self.cose_mac0.algorithm()
    }

    pub fn finalize(self, tag: Vec<u8>) -> CoseMac0 {
        CoseMac0 {
            tag,
            ..self.cose_mac0
        }
    }

    pub async fn tag<P>(self, provider: &P, key: &CoseKey) -> Result<CoseMac0, Error>
    where
        P: CoseProvider,
    {
        let tag = provider
            .mac0_tag(&self, key)
            .await
            .map_err(Error::Capability)?;
        Ok(self.finalize(tag))
    }
}

impl Serialize for CoseMac0 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        cbor::coset_value::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for CoseMac0 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        cbor::coset_value::deserialize(deserializer)
    }
}

impl CborSerializable for CoseMac0 {}
impl AsCborValue for CoseMac0 {
    fn from_cbor_value(value: Value) -> coset::Result<Self> {
        let envelope = Envelope::from_cbor_value(value, COSE_MAC0_TAG, "COSE_Mac0")?;
        Ok(Self {
            protected: envelope.protected,
            unprotected: envelope.unprotected,
            payload: envelope.payload,
            tag: envelope.tag,
            tagged: envelope.tagged,
        })
    }

    fn to_cbor_value(self) -> coset::Result<Value> {
        Envelope {
            tagged: self.tagged,
            protected: self.protected,
            unprotected: self.unprotected,
            payload: self.payload,
            tag: self.tag,
        }
        .to_cbor_value(COSE_MAC0_TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::software::SoftwareProvider;
    use coset::{iana, CoseKeyBuilder, HeaderBuilder};
    use hex_literal::hex;

    fn hmac_header() -> Header {
        HeaderBuilder::new()
            .algorithm(iana::Algorithm::HMAC_256_256)
            .build()
    }

    #[test]
    fn tag_payload_structure() {
        let prepared =
            PreparedCoseMac0::new(hmac_header(), Header::default(), None, Some(&[0xaa]), false)
                .unwrap();
        // ["MAC0", h'a10105', h'', h'aa']
        assert_eq!(
            prepared.tag_payload(),
            hex!("84644d41433043a101054041aa").as_slice()
        );
        let mac0 = prepared.finalize(vec![0; 32]);
        assert_eq!(mac0.algorithm().unwrap(), Some(5));
        assert!(mac0.payload.is_none());
    }

    #[test]
    fn tagged_round_trip() {
        let mac0 = PreparedCoseMac0::new(hmac_header(), Header::default(), Some(vec![1]), None, true)
            .unwrap()
            .finalize(vec![7; 32]);
        let bytes = mac0.clone().to_vec().unwrap();
        assert_eq!(bytes[0], 0xd1);
        assert_eq!(CoseMac0::from_slice(&bytes).unwrap(), mac0);
    }

    #[test]
    fn embedded_payload_is_not_overridden() {
        let mac0 = PreparedCoseMac0::new(hmac_header(), Header::default(), Some(vec![1]), None, false)
            .unwrap()
            .finalize(vec![0; 32]);
        assert!(matches!(
            mac0.tag_payload(Some(&[1])),
            Err(Error::PayloadNotDetached)
        ));
        assert!(mac0.tag_payload(None).is_ok());
    }

    #[tokio::test]
    async fn tag_and_verify() {
        let provider = SoftwareProvider::default();
        let key = CoseKeyBuilder::new_symmetric_key(vec![0x42; 32]).build();
        let detached = b"device authentication bytes";
        let mac0 = PreparedCoseMac0::new(hmac_header(), Header::default(), None, Some(detached), false)
            .unwrap()
            .tag(&provider, &key)
            .await
            .unwrap();
        assert!(mac0.verify(&provider, &key, Some(detached)).await.unwrap());

        let other = CoseKeyBuilder::new_symmetric_key(vec![0x43; 32]).build();
        assert!(!mac0.verify(&provider, &other, Some(detached)).await.unwrap());
    }
}
