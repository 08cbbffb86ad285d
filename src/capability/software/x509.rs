use anyhow::{anyhow, bail, Context, Error};
use coset::{iana, CoseKey, CoseKeyBuilder};
use der::{
    asn1::{Ia5StringRef, PrintableStringRef, TeletexStringRef, Utf8StringRef},
    oid::ObjectIdentifier,
    referenced::OwnedToRef,
    Decode, Encode, Tag, Tagged,
};
use ecdsa::{PrimeCurve, VerifyingKey};
use elliptic_curve::{
    sec1::{FromEncodedPoint, ModulusSize, ToEncodedPoint},
    AffinePoint, CurveArithmetic, FieldBytesSize, PublicKey,
};
use const_oid::AssociatedOid;
use sha2::{Digest, Sha256};
use signature::Verifier;
use time::OffsetDateTime;
use x509_cert::{attr::AttributeValue, name::Name, Certificate};

use crate::capability::{CertificateData, NameField};

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ED25519: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.101.112");

const COUNTRY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const STATE_OR_PROVINCE_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const LOCALITY_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const ORGANIZATION_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const ORGANIZATIONAL_UNIT_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");

fn parse(der: &[u8]) -> Result<Certificate, Error> {
    Certificate::from_der(der).context("could not parse certificate")
}

fn oid(field: NameField) -> ObjectIdentifier {
    match field {
        NameField::C => COUNTRY_NAME,
        NameField::ST => STATE_OR_PROVINCE_NAME,
        NameField::L => LOCALITY_NAME,
        NameField::O => ORGANIZATION_NAME,
        NameField::OU => ORGANIZATIONAL_UNIT_NAME,
        NameField::CN => COMMON_NAME,
    }
}

fn attribute_value_to_str(av: &AttributeValue) -> Option<&str> {
    match av.tag() {
        Tag::PrintableString => PrintableStringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Utf8String => Utf8StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::Ia5String => Ia5StringRef::try_from(av).ok().map(|s| s.as_str()),
        Tag::TeletexString => TeletexStringRef::try_from(av).ok().map(|s| s.as_str()),
        _ => None,
    }
}

fn name_field(name: &Name, field: NameField) -> Vec<String> {
    let oid = oid(field);
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .filter(|attribute| attribute.oid == oid)
        .filter_map(|attribute| attribute_value_to_str(&attribute.value))
        .map(ToString::to_string)
        .collect()
}

fn ec_public_key<C>(certificate: &Certificate) -> Result<PublicKey<C>, Error>
where
    C: AssociatedOid + CurveArithmetic + PrimeCurve,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    certificate
        .tbs_certificate
        .subject_public_key_info
        .owned_to_ref()
        .try_into()
        .map_err(|e| anyhow!("could not parse public key from SPKI: {e}"))
}

fn ec2_cose_key<C>(key: &PublicKey<C>, curve: iana::EllipticCurve) -> CoseKey
where
    C: CurveArithmetic,
    AffinePoint<C>: FromEncodedPoint<C> + ToEncodedPoint<C>,
    FieldBytesSize<C>: ModulusSize,
{
    let point = key.to_encoded_point(false);
    CoseKeyBuilder::new_ec2_pub_key(
        curve,
        point.x().map(|x| x.to_vec()).unwrap_or_default(),
        point.y().map(|y| y.to_vec()).unwrap_or_default(),
    )
    .build()
}

pub(super) fn public_key(der: &[u8], alg: iana::Algorithm) -> Result<CoseKey, Error> {
    let certificate = parse(der)?;
    match alg {
        iana::Algorithm::ES256 => Ok(ec2_cose_key(
            &ec_public_key::<p256::NistP256>(&certificate)?,
            iana::EllipticCurve::P_256,
        )),
        iana::Algorithm::ES384 => Ok(ec2_cose_key(
            &ec_public_key::<p384::NistP384>(&certificate)?,
            iana::EllipticCurve::P_384,
        )),
        iana::Algorithm::EdDSA => {
            let spki = &certificate.tbs_certificate.subject_public_key_info;
            if spki.algorithm.oid != ED25519 {
                bail!("certificate key is not an Ed25519 key");
            }
            let bytes: [u8; 32] = spki
                .subject_public_key
                .raw_bytes()
                .try_into()
                .context("Ed25519 public key must be 32 bytes")?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)?;
            Ok(super::ed25519_public_key(&key))
        }
        other => bail!("unsupported certificate key algorithm {other:?}"),
    }
}

/// Check that the issuer certificate signed the subject certificate.
fn issuer_signed_subject(subject: &Certificate, issuer: &Certificate) -> bool {
    let tbs = match subject.tbs_certificate.to_der() {
        Ok(tbs) => tbs,
        Err(e) => {
            tracing::error!("failed to encode subject tbs: {e:?}");
            return false;
        }
    };
    let signature = subject.signature.raw_bytes();

    let algorithm = subject.signature_algorithm.oid;
    let verified = if algorithm == ECDSA_WITH_SHA256 {
        ec_public_key::<p256::NistP256>(issuer).and_then(|key| {
            let sig = ecdsa::Signature::<p256::NistP256>::from_der(signature)?;
            Ok(VerifyingKey::from(key).verify(&tbs, &sig)?)
        })
    } else if algorithm == ECDSA_WITH_SHA384 {
        ec_public_key::<p384::NistP384>(issuer).and_then(|key| {
            let sig = ecdsa::Signature::<p384::NistP384>::from_der(signature)?;
            Ok(VerifyingKey::from(key).verify(&tbs, &sig)?)
        })
    } else {
        Err(anyhow!("unsupported certificate signature algorithm {algorithm}"))
    };

    match verified {
        Ok(()) => true,
        Err(e) => {
            tracing::info!("subject certificate signature could not be validated: {e:?}");
            false
        }
    }
}

fn check_validity_period_at(certificate: &Certificate, at: OffsetDateTime) -> Result<(), Error> {
    let validity = &certificate.tbs_certificate.validity;
    let not_after = OffsetDateTime::from(validity.not_after.to_system_time());
    let not_before = OffsetDateTime::from(validity.not_before.to_system_time());
    if not_after < at {
        bail!("certificate '{}' expired", certificate.tbs_certificate.subject);
    }
    if not_before > at {
        bail!("certificate '{}' not yet valid", certificate.tbs_certificate.subject);
    }
    Ok(())
}

/// Walk `x5chain` from the leaf towards a trust anchor.
///
/// Each certificate must be within its validity period at `at` and signed by the next one. The
/// chain is trusted when one of its certificates is itself a trust anchor, or when its last
/// certificate was issued and signed by one.
pub(super) fn validate_chain(
    trusted: &[Vec<u8>],
    x5chain: &[Vec<u8>],
    at: OffsetDateTime,
) -> Result<(), Error> {
    if x5chain.is_empty() {
        bail!("x5chain is empty");
    }
    if trusted.is_empty() {
        bail!("no trust anchors configured");
    }
    let chain = x5chain
        .iter()
        .map(|der| parse(der))
        .collect::<Result<Vec<_>, _>>()?;
    let anchors = trusted
        .iter()
        .map(|der| parse(der))
        .collect::<Result<Vec<_>, _>>()?;

    for (index, certificate) in chain.iter().enumerate() {
        check_validity_period_at(certificate, at)?;
        if trusted.iter().any(|t| t == &x5chain[index]) {
            tracing::debug!("x5chain reaches trust anchor at position {index}");
            return Ok(());
        }
        if let Some(issuer) = chain.get(index + 1) {
            if certificate.tbs_certificate.issuer != issuer.tbs_certificate.subject {
                bail!("certificate at position {index} was not issued by its successor");
            }
            if !issuer_signed_subject(certificate, issuer) {
                bail!("signature of certificate at position {index} is invalid");
            }
        }
    }

    // The chain does not include an anchor; its last certificate must have been issued by one.
    let Some(last) = chain.last() else {
        bail!("x5chain is empty");
    };
    let anchor = anchors
        .iter()
        .filter(|anchor| anchor.tbs_certificate.subject == last.tbs_certificate.issuer)
        .find(|anchor| issuer_signed_subject(last, anchor))
        .ok_or_else(|| {
            anyhow!(
                "no trust anchor issued '{}'",
                last.tbs_certificate.issuer
            )
        })?;
    check_validity_period_at(anchor, at)
}

pub(super) fn certificate_data(der: &[u8]) -> Result<CertificateData, Error> {
    let certificate = parse(der)?;
    let tbs = &certificate.tbs_certificate;
    Ok(CertificateData {
        issuer_name: tbs.issuer.to_string(),
        subject_name: tbs.subject.to_string(),
        serial_number: hex::encode(tbs.serial_number.as_bytes()),
        thumbprint: hex::encode(Sha256::digest(der)),
        not_before: OffsetDateTime::from(tbs.validity.not_before.to_system_time()),
        not_after: OffsetDateTime::from(tbs.validity.not_after.to_system_time()),
        pem: pem_rfc7468::encode_string("CERTIFICATE", pem_rfc7468::LineEnding::LF, der)
            .map_err(|e| anyhow!("could not encode certificate as PEM: {e}"))?,
    })
}

pub(super) fn issuer_name_field(der: &[u8], field: NameField) -> Result<Vec<String>, Error> {
    Ok(name_field(&parse(der)?.tbs_certificate.issuer, field))
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    fn der(pem: &str) -> Vec<u8> {
        pem_rfc7468::decode_vec(pem.as_bytes()).unwrap().1
    }

    fn iaca() -> Vec<u8> {
        der(include_str!("../../../tests/data/iaca-cert.pem"))
    }

    fn issuer() -> Vec<u8> {
        der(include_str!("../../../tests/data/issuer-cert.pem"))
    }

    fn other_iaca() -> Vec<u8> {
        der(include_str!("../../../tests/data/other-iaca-cert.pem"))
    }

    const IN_VALIDITY: OffsetDateTime = datetime!(2030-01-01 00:00:00 UTC);

    #[test]
    fn correct_signature() {
        assert!(issuer_signed_subject(
            &parse(&issuer()).unwrap(),
            &parse(&iaca()).unwrap()
        ));
    }

    #[test]
    fn incorrect_signature() {
        assert!(!issuer_signed_subject(
            &parse(&iaca()).unwrap(),
            &parse(&issuer()).unwrap()
        ));
    }

    #[test]
    fn chain_to_anchor() {
        assert!(validate_chain(&[iaca()], &[issuer()], IN_VALIDITY).is_ok());
        assert!(validate_chain(&[iaca()], &[issuer(), iaca()], IN_VALIDITY).is_ok());
        assert!(validate_chain(&[other_iaca()], &[issuer()], IN_VALIDITY).is_err());
        assert!(validate_chain(&[], &[issuer()], IN_VALIDITY).is_err());
    }

    #[test]
    fn chain_outside_validity() {
        let long_ago = datetime!(2000-01-01 00:00:00 UTC);
        assert!(validate_chain(&[iaca()], &[issuer()], long_ago).is_err());
    }

    #[test]
    fn issuer_name_fields() {
        assert_eq!(issuer_name_field(&issuer(), NameField::C).unwrap(), ["US"]);
        assert_eq!(issuer_name_field(&issuer(), NameField::ST).unwrap(), ["NY"]);
        assert_eq!(
            issuer_name_field(&issuer(), NameField::CN).unwrap(),
            ["Example IACA Root"]
        );
        assert!(issuer_name_field(&issuer(), NameField::OU).unwrap().is_empty());
    }

    #[test]
    fn certificate_data_of_issuer() {
        let data = certificate_data(&issuer()).unwrap();
        assert_eq!(data.serial_number, "1a2b3c4d");
        assert!(data.subject_name.contains("CN=Example Document Signer"));
        assert!(data.issuer_name.contains("CN=Example IACA Root"));
        assert!(data.is_valid_at(IN_VALIDITY));
        assert!(data.pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(data.thumbprint.len(), 64);
    }

    #[test]
    fn public_key_of_issuer() {
        let key = public_key(&issuer(), iana::Algorithm::ES256).unwrap();
        assert_eq!(key.kty, coset::KeyType::Assigned(iana::KeyType::EC2));
        assert!(public_key(&issuer(), iana::Algorithm::EdDSA).is_err());
    }
}
