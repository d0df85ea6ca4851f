//! Keybox registry: the signing keys and certificate chains forged
//! certificates are issued under.
//!
//! Readers always see one complete snapshot. A reload builds a new map off to
//! the side and swaps it in with a single pointer store.

use std::collections::HashMap;
use std::sync::Arc;

use der::{DecodePem, Encode};
use log::{error, info};
use parking_lot::RwLock;
use x509_cert::certificate::Certificate;
use x509_cert::name::Name;

use crate::error::{Error, Result};
use crate::signing::{Algorithm, KeyMaterial};

/// One keybox as described by the configuration source.
#[derive(Clone, Default)]
pub struct KeyboxRecord {
    /// `ecdsa` or `rsa`.
    pub algorithm: String,
    pub private_key_pem: String,
    /// PEM certificates, the certificate directly above the forged leaf first.
    pub certificate_pems: Vec<String>,
}

impl std::fmt::Debug for KeyboxRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyboxRecord")
            .field("algorithm", &self.algorithm)
            .field("certificates", &self.certificate_pems.len())
            .finish_non_exhaustive()
    }
}

/// A loaded keybox. Immutable once built.
#[derive(Debug)]
pub struct KeyBox {
    key: KeyMaterial,
    issuer: Name,
    chain: Vec<Vec<u8>>,
}

impl KeyBox {
    fn from_record(record: &KeyboxRecord) -> std::result::Result<(Algorithm, Self), &'static str> {
        let algorithm =
            Algorithm::from_name(&record.algorithm).ok_or("unknown keybox algorithm")?;
        let key = KeyMaterial::from_pem(algorithm, &trim_pem(&record.private_key_pem))?;

        let certificates = record
            .certificate_pems
            .iter()
            .map(|pem| Certificate::from_pem(trim_pem(pem)))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| "certificate is not valid PEM X.509")?;
        let first = certificates.first().ok_or("certificate chain is empty")?;
        let issuer = first.tbs_certificate.subject.clone();
        let chain = certificates
            .iter()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| "certificate does not re-encode")?;

        Ok((algorithm, KeyBox { key, issuer, chain }))
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Subject of the first chain certificate, the issuer of every leaf
    /// signed with this keybox.
    pub fn issuer(&self) -> &Name {
        &self.issuer
    }

    /// DER certificates, issuer of the forged leaf first.
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }
}

/// Keybox XML indents PEM blocks; strip every line.
fn trim_pem(pem: &str) -> String {
    pem.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default)]
struct Snapshot {
    generation: u64,
    keyboxes: HashMap<Algorithm, Arc<KeyBox>>,
}

#[derive(Debug, Default)]
pub struct KeyboxRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl KeyboxRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every keybox with those in `records`; `None` clears.
    ///
    /// All or nothing: if any record fails to load, the registry is left empty
    /// and the error names only the record index. Every call, failed or not,
    /// advances [`generation`](Self::generation).
    pub fn reload(&self, records: Option<&[KeyboxRecord]>) -> Result<usize> {
        let mut next = HashMap::new();
        for (index, record) in records.unwrap_or_default().iter().enumerate() {
            match KeyBox::from_record(record) {
                Ok((algorithm, keybox)) => {
                    next.insert(algorithm, Arc::new(keybox));
                }
                Err(reason) => {
                    error!("keybox record {index} rejected: {reason}; all keyboxes cleared");
                    self.swap(HashMap::new());
                    return Err(Error::Keybox { index, reason });
                }
            }
        }
        let count = next.len();
        self.swap(next);
        info!("loaded {count} keyboxes");
        Ok(count)
    }

    fn swap(&self, keyboxes: HashMap<Algorithm, Arc<KeyBox>>) {
        let mut snapshot = self.snapshot.write();
        let generation = snapshot.generation.wrapping_add(1);
        *snapshot = Arc::new(Snapshot { generation, keyboxes });
    }

    pub fn lookup(&self, algorithm: Algorithm) -> Option<Arc<KeyBox>> {
        self.snapshot.read().keyboxes.get(&algorithm).cloned()
    }

    /// Like [`lookup`](Self::lookup), also returning the generation of the
    /// snapshot the keybox came from.
    pub fn lookup_versioned(&self, algorithm: Algorithm) -> (u64, Option<Arc<KeyBox>>) {
        let snapshot = self.snapshot.read();
        (snapshot.generation, snapshot.keyboxes.get(&algorithm).cloned())
    }

    /// Number of reloads so far. Anything derived from a keybox is stale once
    /// this moves past the generation it was looked up under.
    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    pub fn count(&self) -> usize {
        self.snapshot.read().keyboxes.len()
    }

    pub fn is_active(&self) -> bool {
        self.count() > 0
    }
}
