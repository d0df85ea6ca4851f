//! Fresh key pairs with a forged attestation certificate chain.

use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use der::asn1::{OctetString, OctetStringRef};
use der::oid::AssociatedOid;
use der::{Decode, Encode, Sequence};
use flagset::FlagSet;
use log::info;
use rand_core::OsRng;
use rsa::{BigUint, RsaPrivateKey};
use sha2::{Digest, Sha256};
use x509_cert::certificate::{TbsCertificate, Version};
use x509_cert::ext::pkix::{KeyUsage, KeyUsages};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;

use crate::asn1;
use crate::attestation::{
    AttestationRecord, Authorization, AuthorizationList, RootOfTrust, SecurityLevel,
};
use crate::cert::{self, MAX_VALIDITY_SECS};
use crate::config::{self, BootState, ConfigSource};
use crate::error::{Error, Result};
use crate::keybox::KeyboxRegistry;
use crate::params::{algorithm, ec_curve, purpose, KeyGenParameters, DEFAULT_RSA_EXPONENT};
use crate::signing::{Algorithm, KeyMaterial, SignatureHash};

const DEFAULT_SUBJECT: &str = "CN=Android Keystore Key";
const DEFAULT_ATTESTATION_VERSION: i32 = 100;
/// `KeyOrigin::GENERATED`
const ORIGIN_GENERATED: i64 = 0;

/// Identifies a generated key within the keystore.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyDescriptor {
    pub domain: i32,
    pub namespace: i64,
    pub alias: String,
}

/// A caller-chosen issuer that replaces the keybox, used when a key is
/// attested by another forged key.
#[derive(Debug, Clone)]
pub struct Issuer {
    pub key: KeyMaterial,
    /// DER certificates, `key`'s own certificate first.
    pub chain: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct GeneratedKey {
    key: KeyMaterial,
    chain: Vec<Vec<u8>>,
}

impl GeneratedKey {
    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// DER PKCS#8 private key.
    pub fn private_key_pkcs8(&self) -> Result<Vec<u8>> {
        self.key.to_pkcs8_der()
    }

    /// DER `SubjectPublicKeyInfo`.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        self.key.public_key_der()
    }

    /// New leaf first, then the issuer chain.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// This key as the issuer of a further generated key.
    pub fn as_issuer(&self) -> Issuer {
        Issuer { key: self.key.clone(), chain: self.chain.clone() }
    }
}

#[derive(Sequence)]
struct PackageInfoRecord<'a> {
    package_name: OctetStringRef<'a>,
    version: i64,
}

/// DER `AttestationApplicationId` for every package `caller` owns.
pub fn application_id(config: &dyn ConfigSource, caller: u32) -> Result<Vec<u8>> {
    let mut package_infos = Vec::new();
    let mut signature_digests = Vec::new();
    for package in config.packages_for_caller(caller) {
        let Some(info) = config.package_info(&package, caller) else {
            continue;
        };
        package_infos.push(
            PackageInfoRecord {
                package_name: OctetStringRef::new(package.as_bytes())?,
                version: info.version_code,
            }
            .to_der()?,
        );
        for certificate in &info.signing_certificates {
            signature_digests.push(OctetString::new(Sha256::digest(certificate).to_vec())?.to_der()?);
        }
    }
    Ok(asn1::sequence_of_encoded(&[
        asn1::set_of_encoded(package_infos)?,
        asn1::set_of_encoded(signature_digests)?,
    ])?)
}

/// KeyUsage bits implied by the requested purposes.
pub fn key_usage(purposes: &[i64]) -> KeyUsage {
    let mut bits = FlagSet::<KeyUsages>::default();
    for &p in purposes {
        match p {
            purpose::SIGN | purpose::VERIFY => bits |= KeyUsages::DigitalSignature,
            purpose::ENCRYPT | purpose::DECRYPT => {
                bits |= KeyUsages::DataEncipherment;
                bits |= KeyUsages::KeyEncipherment;
            }
            purpose::WRAP_KEY => bits |= KeyUsages::KeyEncipherment,
            purpose::AGREE_KEY => bits |= KeyUsages::KeyAgreement,
            purpose::ATTEST_KEY => bits |= KeyUsages::KeyCertSign,
            _ => {}
        }
    }
    if bits.is_empty() {
        bits |= KeyUsages::DigitalSignature;
    }
    KeyUsage(bits)
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Builds attestation records and certificates for freshly generated keys.
pub struct KeyGenerator<'a> {
    pub registry: &'a KeyboxRegistry,
    pub config: &'a dyn ConfigSource,
    pub boot: &'a dyn BootState,
}

impl KeyGenerator<'_> {
    /// DER `KeyDescription` for a key generated by `caller` with `params`.
    pub fn build_key_description(&self, caller: u32, params: &KeyGenParameters) -> Result<Vec<u8>> {
        let boot_patch_level = self.boot.boot_patch_level();
        let mut tee = AuthorizationList::new();
        if !params.purposes.is_empty() {
            tee.insert(Authorization::Purpose(params.purposes.clone()));
        }
        tee.insert(Authorization::Algorithm(params.algorithm));
        let key_size = match params.algorithm {
            algorithm::RSA => params.effective_rsa_key_size(),
            _ => params.effective_ec_key_size(),
        };
        tee.insert(Authorization::KeySize(key_size.into()));
        if !params.digests.is_empty() {
            tee.insert(Authorization::Digest(params.digests.clone()));
        }
        if params.algorithm == algorithm::EC {
            tee.insert(Authorization::EcCurve(params.effective_ec_curve()));
        }
        tee.insert(Authorization::NoAuthRequired);
        tee.insert(Authorization::Origin(ORIGIN_GENERATED));
        tee.insert(Authorization::RootOfTrust(RootOfTrust::locked_verified(
            &self.boot.verified_boot_key(),
            &self.boot.verified_boot_hash(),
        )?));
        tee.insert(Authorization::OsVersion(self.boot.os_version().into()));
        tee.insert(Authorization::OsPatchLevel(self.config.effective_patch_level(caller).into()));
        tee.insert(Authorization::VendorPatchLevel(boot_patch_level));
        tee.insert(Authorization::BootPatchLevel(boot_patch_level));

        if params.requests_device_ids() {
            let ids = [
                params.brand.clone().map(Authorization::AttestationIdBrand),
                params.device.clone().map(Authorization::AttestationIdDevice),
                params.product.clone().map(Authorization::AttestationIdProduct),
                params.manufacturer.clone().map(Authorization::AttestationIdManufacturer),
                params.model.clone().map(Authorization::AttestationIdModel),
            ];
            for id in ids.into_iter().flatten() {
                tee.insert(id);
            }
        }
        if let Some(hash) = config::module_hash(self.config) {
            tee.insert(Authorization::ModuleHash(hash));
        }

        let software = AuthorizationList::from_entries([
            Authorization::AttestationApplicationId(application_id(self.config, caller)?),
            Authorization::CreationDateTime(now_millis()),
        ])?;

        let record = AttestationRecord {
            attestation_version: config::build_var_i32(self.config, "ATTESTATION_VERSION")
                .unwrap_or(DEFAULT_ATTESTATION_VERSION),
            attestation_security_level: SecurityLevel::TrustedEnvironment,
            keymint_version: config::build_var_i32(self.config, "KEYMINT_VERSION")
                .unwrap_or_else(|| self.boot.keymint_version()),
            keymint_security_level: SecurityLevel::TrustedEnvironment,
            attestation_challenge: OctetString::new(
                params.attestation_challenge.clone().unwrap_or_default(),
            )?,
            unique_id: OctetString::new(Vec::new())?,
            software_enforced: software,
            tee_enforced: tee,
        };
        Ok(record.to_der()?)
    }

    /// Generate the key pair `params` asks for.
    pub fn generate_key(&self, params: &KeyGenParameters) -> Result<KeyMaterial> {
        match params.algorithm {
            algorithm::EC => match params.effective_ec_curve() {
                ec_curve::P_256 => Ok(KeyMaterial::Ec(p256::SecretKey::random(&mut OsRng))),
                curve => Err(Error::UnsupportedAlgorithm(format!("EC curve {curve}"))),
            },
            algorithm::RSA => {
                let bits = usize::try_from(params.effective_rsa_key_size())
                    .map_err(|_| Error::KeyGeneration("RSA key size out of range"))?;
                let exponent =
                    BigUint::from(params.rsa_public_exponent.unwrap_or(DEFAULT_RSA_EXPONENT));
                RsaPrivateKey::new_with_exp(&mut OsRng, bits, &exponent)
                    .map(|key| KeyMaterial::Rsa(Box::new(key)))
                    .map_err(|_| Error::KeyGeneration("RSA key generation failed"))
            }
            other => Err(Error::UnsupportedAlgorithm(format!("algorithm {other}"))),
        }
    }

    /// Generate a key for `caller` and certify it under `issuer`, or under
    /// the keybox for the key's algorithm when no issuer is given.
    pub fn generate(
        &self,
        caller: u32,
        params: &KeyGenParameters,
        issuer: Option<&Issuer>,
    ) -> Result<GeneratedKey> {
        let key = self.generate_key(params)?;

        let keybox;
        let (signing_key, issuer_chain) = match issuer {
            Some(issuer) => (&issuer.key, issuer.chain.as_slice()),
            None => {
                keybox = self
                    .registry
                    .lookup(key.algorithm())
                    .ok_or_else(|| Error::UnsupportedAlgorithm(key.algorithm().to_string()))?;
                (keybox.key(), keybox.chain())
            }
        };
        let issuer_der = issuer_chain.first().ok_or(Error::Malformed("issuer chain is empty"))?;
        let issuer_name = cert::parse_certificate(issuer_der)?.tbs_certificate.subject;

        let description = self.build_key_description(caller, params)?;
        let tbs = self.tbs_certificate(params, &key, issuer_name, description)?;
        let leaf = cert::sign_certificate(tbs, signing_key, SignatureHash::Sha256)?;

        let mut chain = Vec::with_capacity(issuer_chain.len() + 1);
        chain.push(leaf.to_der()?);
        chain.extend(issuer_chain.iter().cloned());
        info!("generated {} key for caller {caller}", key.algorithm());
        Ok(GeneratedKey { key, chain })
    }

    fn tbs_certificate(
        &self,
        params: &KeyGenParameters,
        key: &KeyMaterial,
        issuer: Name,
        key_description: Vec<u8>,
    ) -> Result<TbsCertificate> {
        let serial = match params.certificate_serial.as_deref() {
            Some(serial) if !serial.is_empty() => serial,
            _ => &[1],
        };
        let subject = match &params.certificate_subject {
            Some(subject) => Name::from_der(subject)?,
            None => Name::from_str(DEFAULT_SUBJECT)?,
        };
        let not_before = cert::validity_time_from_millis(params.certificate_not_before.unwrap_or(0))?;
        let not_after = match params.certificate_not_after {
            Some(ms) => cert::validity_time_from_millis(ms)?,
            None => cert::validity_time(MAX_VALIDITY_SECS)?,
        };
        let key_usage = Extension {
            extn_id: KeyUsage::OID,
            critical: true,
            extn_value: OctetString::new(key_usage(&params.purposes).to_der()?)?,
        };

        Ok(TbsCertificate {
            version: Version::V3,
            serial_number: SerialNumber::new(serial)?,
            // Overwritten when signed.
            signature: key.signature_algorithm(SignatureHash::Sha256),
            issuer,
            validity: Validity { not_before, not_after },
            subject,
            subject_public_key_info: key.public_key_info()?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(vec![key_usage, cert::attestation_extension_from(key_description)?]),
        })
    }
}

/// Family a parameter set asks for, if it is one keyboxes can serve.
pub fn requested_algorithm(params: &KeyGenParameters) -> Option<Algorithm> {
    match params.algorithm {
        algorithm::EC => Some(Algorithm::Ec),
        algorithm::RSA => Some(Algorithm::Rsa),
        _ => None,
    }
}
