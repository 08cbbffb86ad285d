//! DEVICE_AUTH: the holder device's signature or MAC over DeviceAuthenticationBytes.
use std::ops::ControlFlow;

use super::{assess, check_algorithm, Error, Recorder, Verifier, VerifyOptions};
use crate::{
    capability::Provider,
    cose::{CoseMac0, CoseSign1},
    definitions::{
        device_response::Document, DeviceAuthentication, DeviceNamespaces, DeviceSigned, Mso,
        SessionTranscript,
    },
    presentation::authentication::{
        VerificationAssessment, VerificationCallback, VerificationCategory,
    },
};

pub const DEVICE_SIGNED_PRESENT: &str = "device_signed_present";
pub const SESSION_TRANSCRIPT_SUPPLIED: &str = "session_transcript_supplied";
pub const DEVICE_KEY_PRESENT: &str = "device_key_present";
pub const DEVICE_ELEMENTS_AUTHORIZED: &str = "device_elements_authorized";
pub const DEVICE_AUTH_FORM: &str = "device_auth_exactly_one";
pub const DEVICE_AUTH_DETACHED: &str = "device_auth_payload_detached";
pub const DEVICE_SIGNATURE_ALGORITHM: &str = "device_signature_algorithm_allowed";
pub const DEVICE_SIGNATURE_VALID: &str = "device_signature_valid";
pub const DEVICE_MAC_ALGORITHM: &str = "device_mac_algorithm_allowed";
pub const READER_KEY_SUPPLIED: &str = "reader_ephemeral_key_supplied";
pub const DEVICE_MAC_VALID: &str = "device_mac_valid";

const CATEGORY: VerificationCategory = VerificationCategory::DeviceAuth;

pub(super) async fn check<P, C>(
    verifier: &Verifier<P>,
    document: &Document,
    mso: Option<&Mso>,
    options: &VerifyOptions,
    recorder: &mut Recorder<'_, C>,
) -> ControlFlow<()>
where
    P: Provider,
    C: VerificationCallback + ?Sized,
{
    let Some(device_signed) = &document.device_signed else {
        if verifier.config.require_device_signed {
            recorder.emit(VerificationAssessment::failed(
                CATEGORY,
                DEVICE_SIGNED_PRESENT,
                Error::MissingDeviceSigned,
            ))?;
        }
        return ControlFlow::Continue(());
    };
    recorder.emit(VerificationAssessment::passed(CATEGORY, DEVICE_SIGNED_PRESENT))?;

    let transcript = options.session_transcript.as_ref();
    recorder.emit(assess(
        CATEGORY,
        SESSION_TRANSCRIPT_SUPPLIED,
        transcript.map(drop).ok_or(Error::MissingSessionTranscript),
    ))?;
    recorder.emit(assess(
        CATEGORY,
        DEVICE_KEY_PRESENT,
        mso.map(drop).ok_or(Error::MsoUnavailable),
    ))?;

    let authorization = device_signed
        .namespaces
        .inner()
        .map_err(Error::from)
        .and_then(|namespaces| match mso {
            Some(mso) => authorized(mso, namespaces),
            None => Err(Error::MsoUnavailable),
        });
    recorder.emit(assess(CATEGORY, DEVICE_ELEMENTS_AUTHORIZED, authorization))?;

    let device_auth = &device_signed.device_auth;
    let (signature, mac) = match (&device_auth.device_signature, &device_auth.device_mac) {
        (Some(signature), None) => (Some(signature), None),
        (None, Some(mac)) => (None, Some(mac)),
        _ => {
            return recorder.emit(VerificationAssessment::failed(
                CATEGORY,
                DEVICE_AUTH_FORM,
                Error::DeviceAuthForm,
            ));
        }
    };
    recorder.emit(VerificationAssessment::passed(CATEGORY, DEVICE_AUTH_FORM))?;

    let embedded = signature
        .and_then(|signature| signature.payload.as_ref())
        .or(mac.and_then(|mac| mac.payload.as_ref()));
    recorder.emit(assess(CATEGORY, DEVICE_AUTH_DETACHED, detached(embedded)))?;

    let binding = Binding {
        document,
        device_signed,
        transcript,
        mso,
    };

    if let Some(signature) = signature {
        let algorithm = check_algorithm(
            signature.algorithm(),
            &verifier.config.allowed_signature_algorithms,
        );
        recorder.emit(assess(CATEGORY, DEVICE_SIGNATURE_ALGORITHM, algorithm))?;
        let valid = verify_signature(&verifier.provider, &binding, signature).await;
        recorder.emit(assess(CATEGORY, DEVICE_SIGNATURE_VALID, valid))?;
    }

    if let Some(mac) = mac {
        let algorithm = check_algorithm(mac.algorithm(), &verifier.config.allowed_mac_algorithms);
        recorder.emit(assess(CATEGORY, DEVICE_MAC_ALGORITHM, algorithm))?;
        let reader_key = options.ephemeral_reader_key.as_ref();
        recorder.emit(assess(
            CATEGORY,
            READER_KEY_SUPPLIED,
            reader_key.map(drop).ok_or(Error::MissingReaderKey),
        ))?;
        let valid = match reader_key {
            Some(reader_key) => verify_mac(&verifier.provider, &binding, mac, reader_key).await,
            None => Err(Error::MissingReaderKey),
        };
        recorder.emit(assess(CATEGORY, DEVICE_MAC_VALID, valid))?;
    }
    ControlFlow::Continue(())
}

/// Everything the device's envelope is bound to.
struct Binding<'a> {
    document: &'a Document,
    device_signed: &'a DeviceSigned,
    transcript: Option<&'a SessionTranscript>,
    mso: Option<&'a Mso>,
}

impl Binding<'_> {
    /// DeviceAuthenticationBytes over the received DeviceNameSpacesBytes.
    fn detached_payload(&self) -> Result<Vec<u8>, Error> {
        let transcript = self.transcript.ok_or(Error::MissingSessionTranscript)?;
        Ok(DeviceAuthentication::new(
            transcript,
            self.document.doc_type.clone(),
            self.device_signed.namespaces.clone(),
        )?
        .to_bytes()?)
    }

    fn mso(&self) -> Result<&Mso, Error> {
        self.mso.ok_or(Error::MsoUnavailable)
    }
}

/// The reader computes DeviceAuthenticationBytes itself; the envelope must not carry a payload.
fn detached(embedded: Option<&Vec<u8>>) -> Result<(), Error> {
    match embedded {
        Some(_) => Err(Error::EmbeddedDevicePayload),
        None => Ok(()),
    }
}

/// Every device-signed element must be covered by the MSO's key authorizations.
fn authorized(mso: &Mso, namespaces: &DeviceNamespaces) -> Result<(), Error> {
    let authorizations = mso.device_key_info.key_authorizations.as_ref();
    match namespaces
        .elements()
        .find(|(ns, id)| !authorizations.is_some_and(|auth| auth.permitted(ns, id)))
    {
        Some((ns, id)) => Err(Error::UnauthorizedElement(ns.to_string(), id.to_string())),
        None => Ok(()),
    }
}

async fn verify_signature<P: Provider>(
    provider: &P,
    binding: &Binding<'_>,
    signature: &CoseSign1,
) -> Result<(), Error> {
    let payload = binding.detached_payload()?;
    let device_key = &binding.mso()?.device_key_info.device_key;
    if signature.verify(provider, device_key, Some(&payload)).await? {
        Ok(())
    } else {
        Err(Error::SignatureMismatch)
    }
}

async fn verify_mac<P: Provider>(
    provider: &P,
    binding: &Binding<'_>,
    mac: &CoseMac0,
    reader_key: &coset::CoseKey,
) -> Result<(), Error> {
    let payload = binding.detached_payload()?;
    let device_key = &binding.mso()?.device_key_info.device_key;
    let transcript_bytes = binding
        .transcript
        .ok_or(Error::MissingSessionTranscript)?
        .bytes()?;
    let mac_key = provider
        .calculate_ephemeral_mac_key(reader_key, device_key, &transcript_bytes)
        .await
        .map_err(Error::KeyDerivation)?;
    if mac.verify(provider, &mac_key, Some(&payload)).await? {
        Ok(())
    } else {
        Err(Error::MacMismatch)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use ciborium::Value;
    use coset::{iana, CoseKeyBuilder};
    use time::macros::datetime;

    use super::*;
    use crate::definitions::{DeviceKeyInfo, KeyAuthorizations, ValidityInfo};

    fn mso(key_authorizations: Option<KeyAuthorizations>) -> Mso {
        Mso {
            version: "1.0".into(),
            digest_algorithm: "SHA-256".into(),
            value_digests: BTreeMap::new(),
            device_key_info: DeviceKeyInfo {
                device_key: CoseKeyBuilder::new_ec2_pub_key(
                    iana::EllipticCurve::P_256,
                    vec![1; 32],
                    vec![2; 32],
                )
                .build(),
                key_authorizations,
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

    fn namespaces() -> DeviceNamespaces {
        BTreeMap::from([(
            "org.example".to_string(),
            BTreeMap::from([("nickname".to_string(), Value::Text("Al".into()))]),
        )])
        .into()
    }

    #[test]
    fn embedded_payload_is_refused() {
        assert!(detached(None).is_ok());
        assert!(matches!(
            detached(Some(&vec![0xd8, 0x18])),
            Err(Error::EmbeddedDevicePayload)
        ));
    }

    #[test]
    fn no_elements_need_no_authorization() {
        assert!(authorized(&mso(None), &DeviceNamespaces::default()).is_ok());
    }

    #[test]
    fn elements_need_authorization() {
        assert!(matches!(
            authorized(&mso(None), &namespaces()),
            Err(Error::UnauthorizedElement(ns, id)) if ns == "org.example" && id == "nickname"
        ));
        let by_namespace = KeyAuthorizations {
            namespaces: Some(vec!["org.example".into()]),
            data_elements: None,
        };
        assert!(authorized(&mso(Some(by_namespace)), &namespaces()).is_ok());
        let by_element = KeyAuthorizations {
            namespaces: None,
            data_elements: Some(BTreeMap::from([(
                "org.example".to_string(),
                vec!["other".to_string()],
            )])),
        };
        assert!(authorized(&mso(Some(by_element)), &namespaces()).is_err());
    }
}
