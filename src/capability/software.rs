//! Pure-Rust capability provider built on the RustCrypto crates.
//!
//! Supported: ES256 (P-256), ES384 (P-384) and EdDSA (Ed25519) signatures, HMAC 256/256, and
//! ECDH over P-256/P-384 for the ephemeral MAC key.
mod x509;

use anyhow::{anyhow, bail, Context};
use ciborium::Value;
use coset::{iana, iana::EnumI64, CoseKey, CoseKeyBuilder, KeyType, Label};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::{Signer, Verifier};

use super::{CertificateData, CoseProvider, CryptoProvider, NameField, Result, X509Provider};
use crate::cose::{CoseMac0, CoseSign1, PreparedCoseMac0, PreparedCoseSign1};
use crate::definitions::DigestAlgorithm;

/// Length of the derived `EMacKey`.
const EMAC_KEY_LENGTH: usize = 32;

#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareProvider;

impl SoftwareProvider {
    /// A fresh P-256 key pair as `(private, public)` COSE_Keys.
    pub fn generate_p256_key_pair() -> (CoseKey, CoseKey) {
        let secret = p256::SecretKey::random(&mut rand::thread_rng());
        (p256_private_key(&secret), p256_public_key(&secret.public_key()))
    }
}

/// EC2 COSE_Key holding the private scalar and the public point.
pub fn p256_private_key(secret: &p256::SecretKey) -> CoseKey {
    use elliptic_curve::sec1::ToEncodedPoint;
    let point = secret.public_key().to_encoded_point(false);
    CoseKeyBuilder::new_ec2_priv_key(
        iana::EllipticCurve::P_256,
        point.x().map(|x| x.to_vec()).unwrap_or_default(),
        point.y().map(|y| y.to_vec()).unwrap_or_default(),
        secret.to_bytes().to_vec(),
    )
    .build()
}

pub fn p256_public_key(public: &p256::PublicKey) -> CoseKey {
    use elliptic_curve::sec1::ToEncodedPoint;
    let point = public.to_encoded_point(false);
    CoseKeyBuilder::new_ec2_pub_key(
        iana::EllipticCurve::P_256,
        point.x().map(|x| x.to_vec()).unwrap_or_default(),
        point.y().map(|y| y.to_vec()).unwrap_or_default(),
    )
    .build()
}

/// Load a PKCS#8 PEM P-256 private key as a COSE_Key.
pub fn p256_private_key_from_pem(pem: &str) -> Result<CoseKey> {
    use p256::pkcs8::DecodePrivateKey;
    let secret =
        p256::SecretKey::from_pkcs8_pem(pem).context("could not parse PKCS#8 P-256 private key")?;
    Ok(p256_private_key(&secret))
}

/// OKP COSE_Key for an Ed25519 public key.
pub fn ed25519_public_key(public: &ed25519_dalek::VerifyingKey) -> CoseKey {
    CoseKey {
        kty: KeyType::Assigned(iana::KeyType::OKP),
        params: vec![
            (
                Label::Int(iana::OkpKeyParameter::Crv.to_i64()),
                Value::from(iana::EllipticCurve::Ed25519.to_i64()),
            ),
            (
                Label::Int(iana::OkpKeyParameter::X.to_i64()),
                Value::Bytes(public.to_bytes().to_vec()),
            ),
        ],
        ..Default::default()
    }
}

/// OKP COSE_Key holding an Ed25519 seed and its public key.
pub fn ed25519_private_key(secret: &ed25519_dalek::SigningKey) -> CoseKey {
    let mut key = ed25519_public_key(&secret.verifying_key());
    key.params.push((
        Label::Int(iana::OkpKeyParameter::D.to_i64()),
        Value::Bytes(secret.to_bytes().to_vec()),
    ));
    key
}

fn param(key: &CoseKey, label: i64) -> Option<&Value> {
    key.params
        .iter()
        .find(|(l, _)| *l == Label::Int(label))
        .map(|(_, v)| v)
}

fn bytes_param<'a>(key: &'a CoseKey, label: i64, name: &str) -> Result<&'a [u8]> {
    param(key, label)
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| anyhow!("COSE_Key is missing '{name}'"))
}

fn curve(key: &CoseKey) -> Result<iana::EllipticCurve> {
    let crv = param(key, iana::Ec2KeyParameter::Crv.to_i64())
        .and_then(Value::as_integer)
        .and_then(|i| i64::try_from(i).ok())
        .ok_or_else(|| anyhow!("COSE_Key is missing 'crv'"))?;
    iana::EllipticCurve::from_i64(crv).ok_or_else(|| anyhow!("unsupported curve {crv}"))
}

fn ec2_point(key: &CoseKey) -> Result<Vec<u8>> {
    if key.kty != KeyType::Assigned(iana::KeyType::EC2) {
        bail!("expected an EC2 key");
    }
    let x = bytes_param(key, iana::Ec2KeyParameter::X.to_i64(), "x")?;
    let y = bytes_param(key, iana::Ec2KeyParameter::Y.to_i64(), "y")?;
    let mut point = Vec::with_capacity(1 + x.len() + y.len());
    point.push(0x04);
    point.extend_from_slice(x);
    point.extend_from_slice(y);
    Ok(point)
}

fn ec2_scalar(key: &CoseKey) -> Result<&[u8]> {
    bytes_param(key, iana::Ec2KeyParameter::D.to_i64(), "d")
}

fn symmetric_key(key: &CoseKey) -> Result<&[u8]> {
    if key.kty != KeyType::Assigned(iana::KeyType::Symmetric) {
        bail!("expected a symmetric key");
    }
    bytes_param(key, iana::SymmetricKeyParameter::K.to_i64(), "k")
}

fn algorithm(alg: Option<i64>) -> Result<iana::Algorithm> {
    let alg = alg.ok_or_else(|| anyhow!("envelope does not declare an algorithm"))?;
    iana::Algorithm::from_i64(alg).ok_or_else(|| anyhow!("unknown algorithm {alg}"))
}

fn sign(alg: iana::Algorithm, key: &CoseKey, message: &[u8]) -> Result<Vec<u8>> {
    match alg {
        iana::Algorithm::ES256 => {
            let signing_key = p256::ecdsa::SigningKey::from_slice(ec2_scalar(key)?)?;
            let signature: p256::ecdsa::Signature = signing_key.try_sign(message)?;
            Ok(signature.to_bytes().to_vec())
        }
        iana::Algorithm::ES384 => {
            let signing_key = p384::ecdsa::SigningKey::from_slice(ec2_scalar(key)?)?;
            let signature: p384::ecdsa::Signature = signing_key.try_sign(message)?;
            Ok(signature.to_bytes().to_vec())
        }
        iana::Algorithm::EdDSA => {
            let seed: [u8; 32] = bytes_param(key, iana::OkpKeyParameter::D.to_i64(), "d")?
                .try_into()
                .context("Ed25519 seed must be 32 bytes")?;
            let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
            let signature: ed25519_dalek::Signature = signing_key.try_sign(message)?;
            Ok(signature.to_bytes().to_vec())
        }
        other => bail!("unsupported signature algorithm {other:?}"),
    }
}

fn verify(alg: iana::Algorithm, key: &CoseKey, message: &[u8], signature: &[u8]) -> Result<bool> {
    match alg {
        iana::Algorithm::ES256 => {
            let verifying_key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&ec2_point(key)?)?;
            let Ok(signature) = p256::ecdsa::Signature::from_slice(signature) else {
                tracing::debug!("malformed ES256 signature");
                return Ok(false);
            };
            Ok(verifying_key.verify(message, &signature).is_ok())
        }
        iana::Algorithm::ES384 => {
            let verifying_key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&ec2_point(key)?)?;
            let Ok(signature) = p384::ecdsa::Signature::from_slice(signature) else {
                tracing::debug!("malformed ES384 signature");
                return Ok(false);
            };
            Ok(verifying_key.verify(message, &signature).is_ok())
        }
        iana::Algorithm::EdDSA => {
            let public: [u8; 32] = bytes_param(key, iana::OkpKeyParameter::X.to_i64(), "x")?
                .try_into()
                .context("Ed25519 public key must be 32 bytes")?;
            let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&public)?;
            let Ok(signature) = ed25519_dalek::Signature::from_slice(signature) else {
                tracing::debug!("malformed EdDSA signature");
                return Ok(false);
            };
            Ok(verifying_key.verify(message, &signature).is_ok())
        }
        other => bail!("unsupported signature algorithm {other:?}"),
    }
}

fn hmac_sha256(key: &CoseKey) -> Result<Hmac<Sha256>> {
    Hmac::<Sha256>::new_from_slice(symmetric_key(key)?)
        .map_err(|e| anyhow!("unable to initialise HMAC: {e}"))
}

fn shared_secret(private_key: &CoseKey, public_key: &CoseKey) -> Result<Vec<u8>> {
    let crv = curve(private_key)?;
    if crv != curve(public_key)? {
        bail!("ECDH keys are on different curves");
    }
    let scalar = ec2_scalar(private_key)?;
    let point = ec2_point(public_key)?;
    match crv {
        iana::EllipticCurve::P_256 => {
            let secret = p256::SecretKey::from_slice(scalar)?;
            let public = p256::PublicKey::from_sec1_bytes(&point)?;
            let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        iana::EllipticCurve::P_384 => {
            let secret = p384::SecretKey::from_slice(scalar)?;
            let public = p384::PublicKey::from_sec1_bytes(&point)?;
            let shared = p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
            Ok(shared.raw_secret_bytes().to_vec())
        }
        other => bail!("unsupported ECDH curve {other:?}"),
    }
}

fn random_bytes(length: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

impl CryptoProvider for SoftwareProvider {
    async fn random(&self, length: usize) -> Result<Vec<u8>> {
        Ok(random_bytes(length))
    }

    async fn digest(&self, algorithm: DigestAlgorithm, bytes: &[u8]) -> Result<Vec<u8>> {
        Ok(match algorithm {
            DigestAlgorithm::SHA256 => Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::SHA384 => Sha384::digest(bytes).to_vec(),
            DigestAlgorithm::SHA512 => Sha512::digest(bytes).to_vec(),
        })
    }

    async fn calculate_ephemeral_mac_key(
        &self,
        private_key: &CoseKey,
        public_key: &CoseKey,
        session_transcript_bytes: &[u8],
    ) -> Result<CoseKey> {
        let ikm = zeroize::Zeroizing::new(shared_secret(private_key, public_key)?);
        let salt = Sha256::digest(session_transcript_bytes);
        let mut okm = zeroize::Zeroizing::new([0u8; EMAC_KEY_LENGTH]);
        Hkdf::<Sha256>::new(Some(salt.as_slice()), &ikm)
            .expand(b"EMacKey", &mut okm[..])
            .map_err(|e| anyhow!("unable to perform HKDF: {}", e))?;
        Ok(CoseKeyBuilder::new_symmetric_key(okm.to_vec()).build())
    }
}

impl CoseProvider for SoftwareProvider {
    async fn sign1_sign(&self, sign1: &PreparedCoseSign1, key: &CoseKey) -> Result<Vec<u8>> {
        sign(algorithm(sign1.algorithm()?)?, key, sign1.signature_payload())
    }

    async fn sign1_verify(
        &self,
        sign1: &CoseSign1,
        key: &CoseKey,
        detached_payload: Option<&[u8]>,
    ) -> Result<bool> {
        let alg = algorithm(sign1.algorithm()?)?;
        let payload = sign1.signature_payload(detached_payload)?;
        verify(alg, key, &payload, &sign1.signature)
    }

    async fn mac0_tag(&self, mac0: &PreparedCoseMac0, key: &CoseKey) -> Result<Vec<u8>> {
        match algorithm(mac0.algorithm()?)? {
            iana::Algorithm::HMAC_256_256 => {
                let mut mac = hmac_sha256(key)?;
                mac.update(mac0.tag_payload());
                Ok(mac.finalize().into_bytes().to_vec())
            }
            other => bail!("unsupported MAC algorithm {other:?}"),
        }
    }

    async fn mac0_verify(
        &self,
        mac0: &CoseMac0,
        key: &CoseKey,
        detached_payload: Option<&[u8]>,
    ) -> Result<bool> {
        match algorithm(mac0.algorithm()?)? {
            iana::Algorithm::HMAC_256_256 => {
                let mut mac = hmac_sha256(key)?;
                mac.update(&mac0.tag_payload(detached_payload)?);
                Ok(mac.verify_slice(&mac0.tag).is_ok())
            }
            other => bail!("unsupported MAC algorithm {other:?}"),
        }
    }
}

impl X509Provider for SoftwareProvider {
    async fn validate_certificate_chain(
        &self,
        trusted_certificates: &[Vec<u8>],
        x5chain: &[Vec<u8>],
    ) -> Result<()> {
        x509::validate_chain(trusted_certificates, x5chain, time::OffsetDateTime::now_utc())
    }

    async fn get_public_key(&self, certificate: &[u8], alg: i64) -> Result<CoseKey> {
        x509::public_key(certificate, algorithm(Some(alg))?)
    }

    async fn get_certificate_data(&self, certificate: &[u8]) -> Result<CertificateData> {
        x509::certificate_data(certificate)
    }

    async fn get_issuer_name_field(
        &self,
        certificate: &[u8],
        field: NameField,
    ) -> Result<Vec<String>> {
        x509::issuer_name_field(certificate, field)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[tokio::test]
    async fn digests() {
        let provider = SoftwareProvider;
        let digest = provider
            .digest(DigestAlgorithm::SHA256, b"abc")
            .await
            .unwrap();
        assert_eq!(
            digest,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(
            provider
                .digest(DigestAlgorithm::SHA384, b"abc")
                .await
                .unwrap()
                .len(),
            48
        );
        assert_eq!(provider.random(32).await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn ephemeral_mac_key_is_symmetric() {
        let provider = SoftwareProvider;
        let (device_private, device_public) = SoftwareProvider::generate_p256_key_pair();
        let (reader_private, reader_public) = SoftwareProvider::generate_p256_key_pair();
        let transcript = b"session transcript bytes";

        let device_side = provider
            .calculate_ephemeral_mac_key(&device_private, &reader_public, transcript)
            .await
            .unwrap();
        let reader_side = provider
            .calculate_ephemeral_mac_key(&reader_private, &device_public, transcript)
            .await
            .unwrap();
        assert_eq!(device_side, reader_side);
        assert_eq!(symmetric_key(&device_side).unwrap().len(), 32);

        let other_session = provider
            .calculate_ephemeral_mac_key(&device_private, &reader_public, b"other")
            .await
            .unwrap();
        assert_ne!(device_side, other_session);
    }

    #[test]
    fn eddsa_sign_and_verify() {
        let secret = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        let private = ed25519_private_key(&secret);
        let public = ed25519_public_key(&secret.verifying_key());
        let signature = sign(iana::Algorithm::EdDSA, &private, b"message").unwrap();
        assert!(verify(iana::Algorithm::EdDSA, &public, b"message", &signature).unwrap());
        assert!(!verify(iana::Algorithm::EdDSA, &public, b"massage", &signature).unwrap());
    }

    #[test]
    fn mismatched_key_type_is_an_error() {
        let key = CoseKeyBuilder::new_symmetric_key(vec![1; 32]).build();
        assert!(verify(iana::Algorithm::ES256, &key, b"m", &[0; 64]).is_err());
    }

    #[test]
    fn pem_private_key_loads() {
        let key = p256_private_key_from_pem(include_str!("../../tests/data/issuer-key.pem")).unwrap();
        assert_eq!(curve(&key).unwrap(), iana::EllipticCurve::P_256);
        let signature = sign(iana::Algorithm::ES256, &key, b"m").unwrap();
        assert!(verify(iana::Algorithm::ES256, &key, b"m", &signature).unwrap());
    }
}
