//! Holder side: presenting an issued [Mdoc] with selective disclosure and device
//! authentication.
//!
//! ```ignore
//! let response = DeviceResponseBuilder::new(mdoc)
//!     .disclose("org.iso.18013.5.1", ["given_name", "age_over_18"])
//!     .session_transcript(transcript)
//!     .authenticate_with_signature(device_key, iana::Algorithm::ES256)
//!     .build(&provider)
//!     .await?;
//! ```
use std::collections::{BTreeMap, BTreeSet};

use ciborium::Value;
use coset::{iana, CoseKey, Header, HeaderBuilder};

use crate::{
    capability::{CoseProvider, CryptoProvider},
    cose::{self, PreparedCoseMac0, PreparedCoseSign1},
    definitions::{
        device_signed::{self, DeviceAuthentication},
        helpers::{data_item, DataItem},
        DeviceAuth, DeviceNamespaces, DeviceResponse, DeviceSigned, Document, SessionTranscript,
    },
    issuance::{self, Mdoc},
};

/// Various errors that can occur while building a response.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no session transcript was supplied")]
    MissingSessionTranscript,
    #[error("no device authentication method was chosen")]
    MissingAuthentication,
    #[error("element '{element}' of namespace '{namespace}' is not in the mdoc")]
    UnknownElement { namespace: String, element: String },
    #[error(transparent)]
    Issuance(#[from] issuance::Error),
    #[error("error encoding value to CBOR: {0}")]
    DataItem(#[from] data_item::Error),
    #[error(transparent)]
    DeviceAuthentication(#[from] device_signed::Error),
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error("unable to derive the ephemeral MAC key: {0}")]
    KeyDerivation(anyhow::Error),
}

/// How the device authenticates the response.
#[derive(Clone, Debug)]
enum Authentication {
    Signature {
        device_key: CoseKey,
        algorithm: iana::Algorithm,
    },
    Mac {
        device_private_key: CoseKey,
        reader_public_key: CoseKey,
    },
}

/// Builds a single-document [DeviceResponse], or the [Document] for combining several.
#[derive(Clone, Debug)]
pub struct DeviceResponseBuilder {
    mdoc: Mdoc,
    disclosed: Option<BTreeMap<String, BTreeSet<String>>>,
    device_namespaces: DeviceNamespaces,
    session_transcript: Option<SessionTranscript>,
    authentication: Option<Authentication>,
}

impl DeviceResponseBuilder {
    /// Without a call to [Self::disclose], every issuer-signed element is presented.
    pub fn new(mdoc: Mdoc) -> Self {
        Self {
            mdoc,
            disclosed: None,
            device_namespaces: DeviceNamespaces::default(),
            session_transcript: None,
            authentication: None,
        }
    }

    /// Present `elements` of `namespace`. Repeated calls accumulate.
    pub fn disclose<I, S>(mut self, namespace: impl Into<String>, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disclosed
            .get_or_insert_with(BTreeMap::new)
            .entry(namespace.into())
            .or_default()
            .extend(elements.into_iter().map(Into::into));
        self
    }

    /// Elements asserted by the device itself.
    pub fn device_namespaces(mut self, namespaces: DeviceNamespaces) -> Self {
        self.device_namespaces = namespaces;
        self
    }

    /// Add one device-signed element.
    pub fn device_element(
        mut self,
        namespace: impl Into<String>,
        element: impl Into<String>,
        value: Value,
    ) -> Self {
        self.device_namespaces
            .0
            .entry(namespace.into())
            .or_default()
            .insert(element.into(), value);
        self
    }

    pub fn session_transcript(mut self, session_transcript: impl Into<SessionTranscript>) -> Self {
        self.session_transcript = Some(session_transcript.into());
        self
    }

    /// Authenticate with a `COSE_Sign1` made with the device key.
    pub fn authenticate_with_signature(
        mut self,
        device_key: CoseKey,
        algorithm: iana::Algorithm,
    ) -> Self {
        self.authentication = Some(Authentication::Signature {
            device_key,
            algorithm,
        });
        self
    }

    /// Authenticate with a `COSE_Mac0` under the ephemeral MAC key agreed with the reader.
    pub fn authenticate_with_mac(
        mut self,
        device_private_key: CoseKey,
        reader_public_key: CoseKey,
    ) -> Self {
        self.authentication = Some(Authentication::Mac {
            device_private_key,
            reader_public_key,
        });
        self
    }

    pub async fn build<P>(self, provider: &P) -> Result<DeviceResponse, Error>
    where
        P: CryptoProvider + CoseProvider,
    {
        Ok(DeviceResponse::new(vec![self.build_document(provider).await?]))
    }

    pub async fn build_document<P>(self, provider: &P) -> Result<Document, Error>
    where
        P: CryptoProvider + CoseProvider,
    {
        let session_transcript = self
            .session_transcript
            .ok_or(Error::MissingSessionTranscript)?;
        let authentication = self.authentication.ok_or(Error::MissingAuthentication)?;

        let issuer_signed = match &self.disclosed {
            None => self.mdoc.issuer_signed(),
            Some(disclosed) => {
                check_disclosed(&self.mdoc, disclosed)?;
                self.mdoc.issuer_signed_filtered(|namespace, element| {
                    disclosed
                        .get(namespace)
                        .is_some_and(|elements| elements.contains(element))
                })?
            }
        };

        let doc_type = self.mdoc.doc_type;
        let namespaces = DataItem::new(self.device_namespaces)?;
        let detached_payload =
            DeviceAuthentication::new(&session_transcript, doc_type.clone(), namespaces.clone())?
                .to_bytes()?;

        let device_auth = match authentication {
            Authentication::Signature {
                device_key,
                algorithm,
            } => {
                let protected = HeaderBuilder::new().algorithm(algorithm).build();
                let signature = PreparedCoseSign1::new(
                    protected,
                    Header::default(),
                    None,
                    Some(&detached_payload),
                    false,
                )?
                .sign(provider, &device_key)
                .await?;
                DeviceAuth::signature(signature)
            }
            Authentication::Mac {
                device_private_key,
                reader_public_key,
            } => {
                let session_transcript_bytes = session_transcript.bytes()?;
                let mac_key = provider
                    .calculate_ephemeral_mac_key(
                        &device_private_key,
                        &reader_public_key,
                        &session_transcript_bytes,
                    )
                    .await
                    .map_err(Error::KeyDerivation)?;
                let protected = HeaderBuilder::new()
                    .algorithm(iana::Algorithm::HMAC_256_256)
                    .build();
                let mac = PreparedCoseMac0::new(
                    protected,
                    Header::default(),
                    None,
                    Some(&detached_payload),
                    false,
                )?
                .tag(provider, &mac_key)
                .await?;
                DeviceAuth::mac(mac)
            }
        };

        tracing::debug!(doc_type = %doc_type, "built device-authenticated document");

        Ok(Document {
            doc_type,
            issuer_signed,
            device_signed: Some(DeviceSigned {
                namespaces,
                device_auth,
            }),
            errors: None,
        })
    }
}

fn check_disclosed(mdoc: &Mdoc, disclosed: &BTreeMap<String, BTreeSet<String>>) -> Result<(), Error> {
    for (namespace, elements) in disclosed {
        let items = mdoc
            .namespaces
            .iter()
            .find(|(name, _)| name == namespace)
            .map(|(_, items)| items.as_slice())
            .unwrap_or_default();
        for element in elements {
            let mut present = false;
            for item in items {
                if &item.inner()?.element_identifier == element {
                    present = true;
                    break;
                }
            }
            if !present {
                return Err(Error::UnknownElement {
                    namespace: namespace.clone(),
                    element: element.clone(),
                });
            }
        }
    }
    Ok(())
}
