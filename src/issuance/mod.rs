//! Issuer side: turning element values into a signed mdoc.
//!
//! Salts and digests come from a [CryptoProvider](crate::capability::CryptoProvider) and the
//! issuerAuth signature from a [CoseProvider](crate::capability::CoseProvider), so the issuing key
//! never has to be held in process.
pub mod mdoc;

pub use mdoc::{Builder, Error, Mdoc, Namespaces, PreparedMdoc};
