//! Private key material and X.509 signature production.

use std::fmt;

use der::asn1::{Any, AnyRef};
use der::oid::ObjectIdentifier;
use der::Decode;
use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};

use crate::error::{Error, Result};

const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ECDSA_WITH_SHA512: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.4");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");

/// Key algorithm family a keybox serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Ec,
    Rsa,
}

impl Algorithm {
    /// Map a keybox algorithm attribute (`ecdsa`, `ec`, `rsa`) to a family.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ecdsa" | "ec" => Some(Algorithm::Ec),
            "rsa" => Some(Algorithm::Rsa),
            _ => None,
        }
    }

    /// Family of a subject public key, if it is one a keybox can serve.
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Option<Self> {
        let oid = spki.algorithm.oid;
        if oid == ID_EC_PUBLIC_KEY {
            Some(Algorithm::Ec)
        } else if oid == RSA_ENCRYPTION {
            Some(Algorithm::Rsa)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ec => "EC",
            Algorithm::Rsa => "RSA",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest used inside a certificate signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureHash {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureHash {
    /// Digest named by a certificate's signature algorithm. Anything
    /// unrecognised signs with SHA-256.
    pub fn from_signature_oid(oid: &ObjectIdentifier) -> Self {
        if *oid == ECDSA_WITH_SHA384 || *oid == SHA384_WITH_RSA {
            SignatureHash::Sha384
        } else if *oid == ECDSA_WITH_SHA512 || *oid == SHA512_WITH_RSA {
            SignatureHash::Sha512
        } else {
            SignatureHash::Sha256
        }
    }

    pub(crate) fn digest(&self, msg: &[u8]) -> Vec<u8> {
        match self {
            SignatureHash::Sha256 => Sha256::digest(msg).to_vec(),
            SignatureHash::Sha384 => Sha384::digest(msg).to_vec(),
            SignatureHash::Sha512 => Sha512::digest(msg).to_vec(),
        }
    }
}

/// A signing key, either a keybox key or a freshly generated one.
#[derive(Clone)]
pub enum KeyMaterial {
    Ec(p256::SecretKey),
    Rsa(Box<RsaPrivateKey>),
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key bytes.
        write!(f, "KeyMaterial({})", self.algorithm())
    }
}

impl KeyMaterial {
    /// Parse a PEM private key for `algorithm`.
    ///
    /// EC keys may be SEC1 or PKCS#8 and must be on P-256. RSA keys may be
    /// PKCS#1 or PKCS#8. The error string never quotes the input.
    pub fn from_pem(algorithm: Algorithm, pem: &str) -> std::result::Result<Self, &'static str> {
        match algorithm {
            Algorithm::Ec => p256::SecretKey::from_sec1_pem(pem)
                .or_else(|_| p256::SecretKey::from_pkcs8_pem(pem))
                .map(KeyMaterial::Ec)
                .map_err(|_| "EC private key is not a P-256 SEC1 or PKCS#8 key"),
            Algorithm::Rsa => RsaPrivateKey::from_pkcs1_pem(pem)
                .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
                .map(|key| KeyMaterial::Rsa(Box::new(key)))
                .map_err(|_| "RSA private key is not a PKCS#1 or PKCS#8 key"),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            KeyMaterial::Ec(_) => Algorithm::Ec,
            KeyMaterial::Rsa(_) => Algorithm::Rsa,
        }
    }

    /// DER `SubjectPublicKeyInfo` of the public half.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let doc = match self {
            KeyMaterial::Ec(key) => key.public_key().to_public_key_der(),
            KeyMaterial::Rsa(key) => key.to_public_key().to_public_key_der(),
        }
        .map_err(|_| Error::KeyGeneration("public key export failed"))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn public_key_info(&self) -> Result<SubjectPublicKeyInfoOwned> {
        Ok(SubjectPublicKeyInfoOwned::from_der(&self.public_key_der()?)?)
    }

    /// DER PKCS#8 `PrivateKeyInfo`.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let doc = match self {
            KeyMaterial::Ec(key) => key.to_pkcs8_der(),
            KeyMaterial::Rsa(key) => key.to_pkcs8_der(),
        }
        .map_err(|_| Error::KeyGeneration("private key export failed"))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// `AlgorithmIdentifier` for signatures this key produces with `hash`.
    pub fn signature_algorithm(&self, hash: SignatureHash) -> AlgorithmIdentifierOwned {
        match self {
            KeyMaterial::Ec(_) => AlgorithmIdentifierOwned {
                oid: match hash {
                    SignatureHash::Sha256 => ECDSA_WITH_SHA256,
                    SignatureHash::Sha384 => ECDSA_WITH_SHA384,
                    SignatureHash::Sha512 => ECDSA_WITH_SHA512,
                },
                parameters: None,
            },
            KeyMaterial::Rsa(_) => AlgorithmIdentifierOwned {
                oid: match hash {
                    SignatureHash::Sha256 => SHA256_WITH_RSA,
                    SignatureHash::Sha384 => SHA384_WITH_RSA,
                    SignatureHash::Sha512 => SHA512_WITH_RSA,
                },
                parameters: Some(Any::from(AnyRef::NULL)),
            },
        }
    }

    /// Sign `msg`: DER ECDSA for EC keys, PKCS#1 v1.5 for RSA keys.
    pub fn sign(&self, hash: SignatureHash, msg: &[u8]) -> Result<Vec<u8>> {
        match self {
            KeyMaterial::Ec(key) => {
                let signing_key = p256::ecdsa::SigningKey::from(key);
                let signature: p256::ecdsa::Signature = signing_key
                    .sign_prehash(&hash.digest(msg))
                    .map_err(|_| Error::Signing("ECDSA signing failed"))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            KeyMaterial::Rsa(key) => {
                let key = key.as_ref().clone();
                let signature = match hash {
                    SignatureHash::Sha256 => {
                        rsa::pkcs1v15::SigningKey::<Sha256>::new(key).try_sign(msg)
                    }
                    SignatureHash::Sha384 => {
                        rsa::pkcs1v15::SigningKey::<Sha384>::new(key).try_sign(msg)
                    }
                    SignatureHash::Sha512 => {
                        rsa::pkcs1v15::SigningKey::<Sha512>::new(key).try_sign(msg)
                    }
                }
                .map_err(|_| Error::Signing("RSA signing failed"))?;
                Ok(signature.to_vec())
            }
        }
    }
}
