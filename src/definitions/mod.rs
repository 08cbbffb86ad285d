pub mod device_response;
pub mod device_signed;
pub mod helpers;
pub mod issuer_signed;
pub mod mso;
pub mod session;
pub mod validity_info;

pub use device_response::{DeviceResponse, Document, Status};
pub use device_signed::{
    DeviceAuth, DeviceAuthType, DeviceAuthentication, DeviceNamespaces, DeviceNamespacesBytes,
    DeviceSigned,
};
pub use issuer_signed::{IssuerNamespaces, IssuerSigned, IssuerSignedItem, IssuerSignedItemBytes};
pub use mso::{DeviceKeyInfo, DigestAlgorithm, DigestId, DigestIds, KeyAuthorizations, Mso};
pub use session::SessionTranscript;
pub use validity_info::ValidityInfo;
