//! Keys, keyboxes and device certificate chains for unit tests.

use std::str::FromStr;
use std::sync::OnceLock;

use der::asn1::OctetString;
use der::pem::LineEnding;
use der::{Encode, EncodePem};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::pkcs8::DecodePublicKey;
use rand_core::OsRng;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::signature::Verifier;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::certificate::{Certificate, TbsCertificate, Version};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;

use crate::attestation::{
    AttestationRecord, Authorization, AuthorizationList, RootOfTrust, SecurityLevel,
    VerifiedBootState,
};
use crate::cert::{self, MAX_VALIDITY_SECS};
use crate::keybox::KeyboxRecord;
use crate::signing::{Algorithm, KeyMaterial, SignatureHash};

pub(crate) const KEYBOX_SUBJECT: &str = "CN=Test Keybox Intermediate";

pub(crate) fn ec_key() -> KeyMaterial {
    KeyMaterial::Ec(p256::SecretKey::random(&mut OsRng))
}

/// 1024-bit RSA key, generated once per test binary.
pub(crate) fn rsa_key() -> KeyMaterial {
    static KEY: OnceLock<KeyMaterial> = OnceLock::new();
    KEY.get_or_init(|| {
        KeyMaterial::Rsa(Box::new(RsaPrivateKey::new(&mut OsRng, 1024).unwrap()))
    })
    .clone()
}

fn key_pem(key: &KeyMaterial) -> String {
    match key {
        KeyMaterial::Ec(secret) => secret.to_sec1_pem(LineEnding::LF).unwrap().to_string(),
        KeyMaterial::Rsa(private) => private.to_pkcs1_pem(LineEnding::LF).unwrap().to_string(),
    }
}

pub(crate) fn ec_key_pem() -> String {
    key_pem(&ec_key())
}

pub(crate) fn tbs(
    subject: &str,
    issuer: &str,
    spki: SubjectPublicKeyInfoOwned,
    extensions: Option<Vec<Extension>>,
) -> TbsCertificate {
    let placeholder = ec_key().signature_algorithm(SignatureHash::Sha256);
    TbsCertificate {
        version: Version::V3,
        serial_number: SerialNumber::new(&[0x2a]).unwrap(),
        signature: placeholder,
        issuer: Name::from_str(issuer).unwrap(),
        validity: Validity {
            not_before: cert::validity_time(1_600_000_000).unwrap(),
            not_after: cert::validity_time(MAX_VALIDITY_SECS).unwrap(),
        },
        subject: Name::from_str(subject).unwrap(),
        subject_public_key_info: spki,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions,
    }
}

pub(crate) struct TestKeybox {
    pub key: KeyMaterial,
    /// One self-signed certificate with subject [`KEYBOX_SUBJECT`].
    pub chain: Vec<Vec<u8>>,
    pub record: KeyboxRecord,
}

fn keybox(key: KeyMaterial, algorithm: &str) -> TestKeybox {
    let tbs = tbs(KEYBOX_SUBJECT, "CN=Test Keybox Root", key.public_key_info().unwrap(), None);
    let certificate = cert::sign_certificate(tbs, &key, SignatureHash::Sha256).unwrap();
    TestKeybox {
        chain: vec![certificate.to_der().unwrap()],
        record: KeyboxRecord {
            algorithm: algorithm.to_owned(),
            private_key_pem: key_pem(&key),
            certificate_pems: vec![certificate.to_pem(LineEnding::LF).unwrap()],
        },
        key,
    }
}

pub(crate) fn ec_keybox() -> TestKeybox {
    keybox(ec_key(), "ecdsa")
}

pub(crate) fn rsa_keybox() -> TestKeybox {
    keybox(rsa_key(), "rsa")
}

/// A `KeyDescription` as a TEE would produce it for an unlocked device.
pub(crate) fn device_key_description() -> Vec<u8> {
    let tee = AuthorizationList::from_entries([
        Authorization::Purpose(vec![2, 3]),
        Authorization::Algorithm(3),
        Authorization::KeySize(256),
        Authorization::Digest(vec![4]),
        Authorization::EcCurve(1),
        Authorization::NoAuthRequired,
        Authorization::Origin(0),
        Authorization::RootOfTrust(RootOfTrust {
            verified_boot_key: OctetString::new(vec![0u8; 32]).unwrap(),
            device_locked: false,
            verified_boot_state: VerifiedBootState::Unverified,
            verified_boot_hash: OctetString::new(vec![0x55; 32]).unwrap(),
        }),
        Authorization::OsVersion(140000),
        Authorization::OsPatchLevel(202301),
        Authorization::VendorPatchLevel(20230101),
        Authorization::BootPatchLevel(20230101),
    ])
    .unwrap();
    AttestationRecord {
        attestation_version: 300,
        attestation_security_level: SecurityLevel::TrustedEnvironment,
        keymint_version: 300,
        keymint_security_level: SecurityLevel::TrustedEnvironment,
        attestation_challenge: OctetString::new(b"challenge".to_vec()).unwrap(),
        unique_id: OctetString::new(Vec::new()).unwrap(),
        software_enforced: AuthorizationList::from_entries([Authorization::CreationDateTime(
            1_700_000_000_000,
        )])
        .unwrap(),
        tee_enforced: tee,
    }
    .to_der()
    .unwrap()
}

fn key_usage_extension() -> Extension {
    // digitalSignature
    Extension {
        extn_id: der::oid::ObjectIdentifier::new_unwrap("2.5.29.15"),
        critical: true,
        extn_value: OctetString::new(vec![0x03, 0x02, 0x07, 0x80]).unwrap(),
    }
}

/// A device-issued chain: an EC leaf signed by a device root, then the root.
/// The leaf carries an attestation extension when `with_attestation` is set.
pub(crate) fn device_chain(with_attestation: bool) -> Vec<Vec<u8>> {
    device_chain_for(&ec_key(), SignatureHash::Sha256, with_attestation)
}

/// An attested RSA leaf whose device root signed it with ECDSA/SHA-384.
pub(crate) fn rsa_device_chain() -> Vec<Vec<u8>> {
    device_chain_for(&rsa_key(), SignatureHash::Sha384, true)
}

fn device_chain_for(
    leaf_key: &KeyMaterial,
    hash: SignatureHash,
    with_attestation: bool,
) -> Vec<Vec<u8>> {
    let root_key = ec_key();

    let mut extensions = vec![key_usage_extension()];
    if with_attestation {
        extensions.push(cert::attestation_extension_from(device_key_description()).unwrap());
    }
    let leaf_tbs = tbs(
        "CN=Android Keystore Key",
        "CN=Device Root",
        leaf_key.public_key_info().unwrap(),
        Some(extensions),
    );
    let leaf = cert::sign_certificate(leaf_tbs, &root_key, hash).unwrap();

    let root_tbs =
        tbs("CN=Device Root", "CN=Device Root", root_key.public_key_info().unwrap(), None);
    let root = cert::sign_certificate(root_tbs, &root_key, SignatureHash::Sha256).unwrap();

    vec![leaf.to_der().unwrap(), root.to_der().unwrap()]
}

/// Check `cert`'s signature against `spki`, using the digest its signature
/// algorithm names.
pub(crate) fn is_signed_by(cert: &Certificate, spki: &SubjectPublicKeyInfoOwned) -> bool {
    let tbs = cert.tbs_certificate.to_der().unwrap();
    let signature = cert.signature.raw_bytes();
    let hash = SignatureHash::from_signature_oid(&cert.signature_algorithm.oid);
    let spki_der = spki.to_der().unwrap();
    match Algorithm::from_spki(spki) {
        Some(Algorithm::Ec) => {
            let Ok(public) = p256::PublicKey::from_public_key_der(&spki_der) else {
                return false;
            };
            let Ok(signature) = p256::ecdsa::Signature::from_der(signature) else {
                return false;
            };
            p256::ecdsa::VerifyingKey::from(public)
                .verify_prehash(&hash.digest(&tbs), &signature)
                .is_ok()
        }
        Some(Algorithm::Rsa) => {
            let Ok(public) = <RsaPublicKey as rsa::pkcs8::DecodePublicKey>::from_public_key_der(
                &spki_der,
            ) else {
                return false;
            };
            let Ok(signature) = rsa::pkcs1v15::Signature::try_from(signature) else {
                return false;
            };
            match hash {
                SignatureHash::Sha256 => {
                    rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public).verify(&tbs, &signature)
                }
                SignatureHash::Sha384 => {
                    rsa::pkcs1v15::VerifyingKey::<Sha384>::new(public).verify(&tbs, &signature)
                }
                SignatureHash::Sha512 => {
                    rsa::pkcs1v15::VerifyingKey::<Sha512>::new(public).verify(&tbs, &signature)
                }
            }
            .is_ok()
        }
        None => false,
    }
}

/// Chain whose leaf key is neither EC nor RSA (an Ed25519 SPKI).
pub(crate) fn ed25519_chain() -> Vec<Vec<u8>> {
    let root_key = ec_key();
    let spki = SubjectPublicKeyInfoOwned {
        algorithm: x509_cert::spki::AlgorithmIdentifierOwned {
            oid: der::oid::ObjectIdentifier::new_unwrap("1.3.101.112"),
            parameters: None,
        },
        subject_public_key: der::asn1::BitString::from_bytes(&[0x11; 32]).unwrap(),
    };
    let extensions = vec![cert::attestation_extension_from(device_key_description()).unwrap()];
    let leaf_tbs = tbs("CN=Android Keystore Key", "CN=Device Root", spki, Some(extensions));
    let leaf = cert::sign_certificate(leaf_tbs, &root_key, SignatureHash::Sha256).unwrap();
    vec![leaf.to_der().unwrap()]
}
