//! X.509 certificate parsing and re-signing.

use std::time::Duration;

use der::asn1::{BitString, GeneralizedTime, OctetString, UtcTime};
use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use x509_cert::certificate::{Certificate, TbsCertificate};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::time::Time;

use crate::attestation::ATTESTATION_EXTENSION_OID;
use crate::error::{Error, Result};
use crate::signing::{KeyMaterial, SignatureHash};

/// 9999-12-31T23:59:59Z, the conventional "no expiry" notAfter.
pub const MAX_VALIDITY_SECS: u64 = 253_402_300_799;

pub fn parse_certificate(der: &[u8]) -> Result<Certificate> {
    Ok(Certificate::from_der(der)?)
}

pub fn find_extension<'a>(cert: &'a Certificate, oid: &ObjectIdentifier) -> Option<&'a Extension> {
    cert.tbs_certificate
        .extensions
        .as_ref()?
        .iter()
        .find(|ext| ext.extn_id == *oid)
}

pub fn attestation_extension(cert: &Certificate) -> Option<&Extension> {
    find_extension(cert, &ATTESTATION_EXTENSION_OID)
}

/// Non-critical attestation extension wrapping `key_description`.
pub fn attestation_extension_from(key_description: Vec<u8>) -> Result<Extension> {
    Ok(Extension {
        extn_id: ATTESTATION_EXTENSION_OID,
        critical: false,
        extn_value: OctetString::new(key_description)?,
    })
}

/// Sign `tbs` with `key`, overwriting its inner signature algorithm so the
/// two algorithm identifiers always agree.
pub fn sign_certificate(
    mut tbs: TbsCertificate,
    key: &KeyMaterial,
    hash: SignatureHash,
) -> Result<Certificate> {
    let algorithm = key.signature_algorithm(hash);
    tbs.signature = algorithm.clone();
    let signature = key.sign(hash, &tbs.to_der()?)?;
    Ok(Certificate {
        tbs_certificate: tbs,
        signature_algorithm: algorithm,
        signature: BitString::from_bytes(&signature)?,
    })
}

/// Rebuild `leaf` under a new issuer.
///
/// Serial, validity, subject and subject public key are kept. Extensions keep
/// their order; the attestation extension is swapped for `key_description`.
/// The signature digest follows the original leaf's signature algorithm.
pub fn forge_leaf(
    leaf: &Certificate,
    key_description: Vec<u8>,
    issuer: &Name,
    key: &KeyMaterial,
) -> Result<Certificate> {
    let mut tbs = leaf.tbs_certificate.clone();
    tbs.issuer = issuer.clone();

    let replacement = attestation_extension_from(key_description)?;
    let extensions = tbs
        .extensions
        .as_mut()
        .ok_or(Error::Malformed("leaf has no extensions"))?;
    let slot = extensions
        .iter_mut()
        .find(|ext| ext.extn_id == ATTESTATION_EXTENSION_OID)
        .ok_or(Error::Malformed("leaf has no attestation extension"))?;
    *slot = replacement;

    let hash = SignatureHash::from_signature_oid(&leaf.signature_algorithm.oid);
    sign_certificate(tbs, key, hash)
}

/// Certificate time for `secs` after the Unix epoch. RFC 5280 section
/// 4.1.2.5 requires UTCTime up to 2049 and GeneralizedTime from 2050 onwards.
pub fn validity_time(secs: u64) -> Result<Time> {
    const MAX_UTC_TIME: Duration = Duration::from_secs(2_524_608_000); // 2050-01-01T00:00:00Z

    let duration = Duration::from_secs(secs);
    if duration >= MAX_UTC_TIME {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(duration)?))
    }
}

/// [`validity_time`] for a KeyMint millisecond timestamp; negative values
/// clamp to the epoch.
pub fn validity_time_from_millis(ms: i64) -> Result<Time> {
    validity_time(u64::try_from(ms / 1000).unwrap_or(0))
}
