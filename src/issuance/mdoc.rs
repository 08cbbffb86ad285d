use std::collections::BTreeMap;

use ciborium::Value;
use coset::{iana, CoseKey, HeaderBuilder};
use serde_bytes::ByteBuf;

use crate::{
    capability::{CoseProvider, CryptoProvider},
    cose::{self, x5chain_header_value, CoseSign1, PreparedCoseSign1, X5CHAIN_HEADER_LABEL},
    definitions::{
        helpers::{data_item, DataItem},
        mso, DeviceKeyInfo, DigestAlgorithm, DigestIds, Document, IssuerNamespaces, IssuerSigned,
        IssuerSignedItem, IssuerSignedItemBytes, Mso, ValidityInfo,
    },
};

/// Element values by namespace and element identifier.
pub type Namespaces = BTreeMap<String, BTreeMap<String, Value>>;

/// Length of the salt mixed into every issuer-signed item.
pub const RANDOM_LENGTH: usize = 32;
pub const MSO_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq)]
/// A signed mdoc.
pub struct Mdoc {
    pub doc_type: String,
    pub mso: Mso,
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: CoseSign1,
}

#[derive(Debug, Clone)]
/// An incomplete mdoc, requiring a remotely signed signature to be completed.
pub struct PreparedMdoc {
    doc_type: String,
    mso: Mso,
    namespaces: IssuerNamespaces,
    prepared_sig: PreparedCoseSign1,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<String>,
    namespaces: Option<Namespaces>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key_info: Option<DeviceKeyInfo>,
    x5chain: Option<Vec<Vec<u8>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing parameter: '{0}'")]
    MissingParameter(&'static str),
    #[error("at least one namespace required")]
    NoNamespaces,
    #[error("at least one element required in namespace '{0}'")]
    EmptyNamespace(String),
    #[error("x5chain must hold at least one certificate")]
    EmptyX5Chain,
    #[error(transparent)]
    KeyAuthorizations(#[from] mso::Error),
    #[error("unable to encode as CBOR: {0}")]
    Encoding(#[from] data_item::Error),
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error("capability call failed: {0}")]
    Capability(anyhow::Error),
}

impl Mdoc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Prepare mdoc for remote signing.
    ///
    /// Salts and digests are obtained from `provider`.
    #[allow(clippy::too_many_arguments)]
    pub async fn prepare<P>(
        provider: &P,
        doc_type: String,
        namespaces: Namespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key_info: DeviceKeyInfo,
        x5chain: Vec<Vec<u8>>,
        signature_algorithm: iana::Algorithm,
    ) -> Result<PreparedMdoc, Error>
    where
        P: CryptoProvider,
    {
        if let Some(authorizations) = &device_key_info.key_authorizations {
            authorizations.validate()?;
        }
        if x5chain.is_empty() {
            return Err(Error::EmptyX5Chain);
        }

        let issuer_namespaces = to_issuer_namespaces(provider, namespaces).await?;
        let value_digests =
            digest_namespaces(provider, &issuer_namespaces, digest_algorithm).await?;

        let mso = Mso {
            version: MSO_VERSION.to_string(),
            digest_algorithm: digest_algorithm.to_string(),
            value_digests,
            device_key_info,
            doc_type: doc_type.clone(),
            validity_info,
        };

        let mso_bytes = DataItem::new(mso.clone())?.encoded()?;

        let protected = HeaderBuilder::new()
            .algorithm(signature_algorithm)
            .build();
        let unprotected = HeaderBuilder::new()
            .value(X5CHAIN_HEADER_LABEL, x5chain_header_value(x5chain))
            .build();

        let prepared_sig =
            PreparedCoseSign1::new(protected, unprotected, Some(mso_bytes), None, false)?;

        Ok(PreparedMdoc {
            doc_type,
            namespaces: issuer_namespaces,
            mso,
            prepared_sig,
        })
    }

    /// The issuer-signed structure, with every namespace disclosed.
    pub fn issuer_signed(&self) -> IssuerSigned {
        IssuerSigned {
            namespaces: Some(self.namespaces.clone()),
            issuer_auth: self.issuer_auth.clone(),
        }
    }

    /// The issuer-signed structure holding only the elements `keep` accepts.
    pub fn issuer_signed_filtered<F>(&self, mut keep: F) -> Result<IssuerSigned, Error>
    where
        F: FnMut(&str, &str) -> bool,
    {
        let mut namespaces = IssuerNamespaces::new();
        for (namespace, items) in &self.namespaces {
            let mut kept = vec![];
            for item in items {
                if keep(namespace, &item.inner()?.element_identifier) {
                    kept.push(item.clone());
                }
            }
            if !kept.is_empty() {
                namespaces.push((namespace.clone(), kept));
            }
        }
        Ok(IssuerSigned {
            namespaces: Some(namespaces),
            issuer_auth: self.issuer_auth.clone(),
        })
    }

    /// A document carrying every issuer-signed element and no device authentication.
    pub fn to_document(&self) -> Document {
        Document {
            doc_type: self.doc_type.clone(),
            issuer_signed: self.issuer_signed(),
            device_signed: None,
            errors: None,
        }
    }
}

impl PreparedMdoc {
    /// Retrieve the payload for a remote signature.
    pub fn signature_payload(&self) -> &[u8] {
        self.prepared_sig.signature_payload()
    }

    /// Supply the remotely signed signature to complete and issue the prepared mdoc.
    pub fn complete(self, signature: Vec<u8>) -> Mdoc {
        let PreparedMdoc {
            doc_type,
            namespaces,
            mso,
            prepared_sig,
        } = self;

        let issuer_auth = prepared_sig.finalize(signature);

        Mdoc {
            doc_type,
            mso,
            namespaces,
            issuer_auth,
        }
    }

    /// Sign through `provider` and complete.
    pub async fn sign<P>(self, provider: &P, issuer_key: &CoseKey) -> Result<Mdoc, Error>
    where
        P: CoseProvider,
    {
        let signature = provider
            .sign1_sign(&self.prepared_sig, issuer_key)
            .await
            .map_err(Error::Capability)?;
        Ok(self.complete(signature))
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Set the data elements.
    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Set the validity information
    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm to be used for hashing the data elements.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the information about the device key that this mdoc will be issued to.
    pub fn device_key_info(mut self, device_key_info: DeviceKeyInfo) -> Self {
        self.device_key_info = Some(device_key_info);
        self
    }

    /// Set the x5chain of the issuing key, leaf first, DER encoded.
    pub fn x5chain(mut self, x5chain: Vec<Vec<u8>>) -> Self {
        self.x5chain = Some(x5chain);
        self
    }

    /// Prepare the mdoc for remote signing.
    ///
    /// The signature algorithm which the mdoc will be signed with must be known ahead of time as
    /// it is a required field in the signature headers.
    pub async fn prepare<P>(
        self,
        provider: &P,
        signature_algorithm: iana::Algorithm,
    ) -> Result<PreparedMdoc, Error>
    where
        P: CryptoProvider,
    {
        let doc_type = self
            .doc_type
            .ok_or(Error::MissingParameter("doc_type"))?;
        let namespaces = self
            .namespaces
            .ok_or(Error::MissingParameter("namespaces"))?;
        let validity_info = self
            .validity_info
            .ok_or(Error::MissingParameter("validity_info"))?;
        let digest_algorithm = self
            .digest_algorithm
            .ok_or(Error::MissingParameter("digest_algorithm"))?;
        let device_key_info = self
            .device_key_info
            .ok_or(Error::MissingParameter("device_key_info"))?;
        let x5chain = self.x5chain.ok_or(Error::MissingParameter("x5chain"))?;

        Mdoc::prepare(
            provider,
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            x5chain,
            signature_algorithm,
        )
        .await
    }

    /// Directly issue an mdoc.
    pub async fn issue<P>(
        self,
        provider: &P,
        issuer_key: &CoseKey,
        signature_algorithm: iana::Algorithm,
    ) -> Result<Mdoc, Error>
    where
        P: CryptoProvider + CoseProvider,
    {
        self.prepare(provider, signature_algorithm)
            .await?
            .sign(provider, issuer_key)
            .await
    }
}

/// Digest IDs are assigned sequentially within each namespace, in element identifier order.
async fn to_issuer_namespaces<P>(
    provider: &P,
    namespaces: Namespaces,
) -> Result<IssuerNamespaces, Error>
where
    P: CryptoProvider,
{
    if namespaces.is_empty() {
        return Err(Error::NoNamespaces);
    }
    let mut issuer_namespaces = IssuerNamespaces::new();
    for (name, elements) in namespaces {
        if elements.is_empty() {
            return Err(Error::EmptyNamespace(name));
        }
        let mut items = Vec::with_capacity(elements.len());
        for (digest_id, (element_identifier, element_value)) in (0..).zip(elements) {
            let random = provider
                .random(RANDOM_LENGTH)
                .await
                .map_err(Error::Capability)?;
            items.push(DataItem::new(IssuerSignedItem {
                digest_id,
                random,
                element_identifier,
                element_value,
            })?);
        }
        issuer_namespaces.push((name, items));
    }
    Ok(issuer_namespaces)
}

async fn digest_namespaces<P>(
    provider: &P,
    namespaces: &IssuerNamespaces,
    digest_algorithm: DigestAlgorithm,
) -> Result<BTreeMap<String, DigestIds>, Error>
where
    P: CryptoProvider,
{
    let mut value_digests = BTreeMap::new();
    for (name, elements) in namespaces {
        value_digests.insert(
            name.clone(),
            digest_namespace(provider, elements, digest_algorithm).await?,
        );
    }
    Ok(value_digests)
}

async fn digest_namespace<P>(
    provider: &P,
    elements: &[IssuerSignedItemBytes],
    digest_algorithm: DigestAlgorithm,
) -> Result<DigestIds, Error>
where
    P: CryptoProvider,
{
    let mut digests = DigestIds::new();
    for element in elements {
        let digest = provider
            .digest(digest_algorithm, &element.encoded()?)
            .await
            .map_err(Error::Capability)?;
        digests.insert(element.inner()?.digest_id, ByteBuf::from(digest));
    }
    Ok(digests)
}
