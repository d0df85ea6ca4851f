//! The `CertHack` engine: one object owning the keyboxes, the forge cache and
//! the collaborators, exposing every operation the interception layer calls.
//!
//! Nothing here returns an error to the caller. Forging degrades to the
//! original chain and the RKP builders return `None`.

use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use rand_core::{OsRng, RngCore};

use crate::cache::LruCache;
use crate::cbor::{self, CborValue};
use crate::config::{BootState, ConfigSource};
use crate::cose;
use crate::error::{Error, Result};
use crate::forge::ChainForger;
use crate::keybox::{KeyboxRecord, KeyboxRegistry};
use crate::keygen::{self, GeneratedKey, Issuer, KeyDescriptor, KeyGenerator};
use crate::params::KeyGenParameters;
use crate::rkp::{self, HardwareInfo, RkpKeyPair, RkpKeyStore};
use crate::signing::KeyMaterial;

/// Generated keys remembered for later lookups by descriptor.
pub const GENERATED_KEY_CAPACITY: usize = 100;

fn report(operation: &str, e: &Error) {
    match e {
        Error::UnsupportedAlgorithm(algorithm) => info!("{operation}: no support for {algorithm}"),
        e if e.is_sensitive() => warn!("{operation} failed ({})", e.kind()),
        e => warn!("{operation} failed: {e}"),
    }
}

pub struct CertHack {
    registry: Arc<KeyboxRegistry>,
    config: Arc<dyn ConfigSource>,
    boot: Arc<dyn BootState>,
    forger: ChainForger,
    generated: LruCache<(u32, KeyDescriptor), Arc<GeneratedKey>>,
    rkp_keys: RwLock<Arc<RkpKeyStore>>,
}

fn random_hmac_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

impl CertHack {
    /// An engine with no keyboxes loaded.
    pub fn new(config: Arc<dyn ConfigSource>, boot: Arc<dyn BootState>) -> Self {
        let registry = Arc::new(KeyboxRegistry::new());
        let forger =
            ChainForger::new(Arc::clone(&registry), Arc::clone(&config), Arc::clone(&boot));
        CertHack {
            registry,
            config,
            boot,
            forger,
            generated: LruCache::new(GENERATED_KEY_CAPACITY),
            rkp_keys: RwLock::new(Arc::new(RkpKeyStore::new(random_hmac_key()))),
        }
    }

    /// Replace the loaded keyboxes; `None` clears them. Forged chains cached
    /// under the previous keyboxes are dropped whether or not the reload
    /// succeeds.
    pub fn reload_keyboxes(&self, records: Option<&[KeyboxRecord]>) -> Result<usize> {
        let loaded = self.registry.reload(records);
        self.forger.clear_cache();
        loaded
    }

    /// Forge `chain` (DER, leaf first) for `caller`. Any failure returns the
    /// chain unchanged.
    pub fn forge_certificate_chain(&self, chain: &[Vec<u8>], caller: u32) -> Vec<Vec<u8>> {
        self.forger.forge_certificate_chain(chain, caller)
    }

    /// Generate a key for `caller` and certify it under `issuer`, or under the
    /// matching keybox. The result is remembered under `descriptor`.
    pub fn generate_forged_key_and_chain(
        &self,
        caller: u32,
        descriptor: &KeyDescriptor,
        params: &KeyGenParameters,
        issuer: Option<&Issuer>,
    ) -> Option<Arc<GeneratedKey>> {
        if issuer.is_none() {
            match keygen::requested_algorithm(params) {
                Some(algorithm) if self.registry.lookup(algorithm).is_none() => {
                    info!("no keybox for {algorithm}, not generating {}", descriptor.alias);
                    return None;
                }
                _ => {}
            }
        }

        let generator = KeyGenerator {
            registry: &self.registry,
            config: &*self.config,
            boot: &*self.boot,
        };
        match generator.generate(caller, params, issuer) {
            Ok(key) => {
                let key = Arc::new(key);
                self.generated.insert((caller, descriptor.clone()), Arc::clone(&key));
                Some(key)
            }
            Err(e) => {
                report("key generation", &e);
                None
            }
        }
    }

    /// A key earlier returned by [`Self::generate_forged_key_and_chain`].
    pub fn generated_key(
        &self,
        caller: u32,
        descriptor: &KeyDescriptor,
    ) -> Option<Arc<GeneratedKey>> {
        self.generated.get(&(caller, descriptor.clone()))
    }

    pub fn encode_canonical_cbor(&self, value: &CborValue) -> Vec<u8> {
        cbor::encode(value)
    }

    /// COSE_Mac0 over the public half of an EC key. RSA keys yield `None`.
    pub fn build_maced_public_key(&self, key: &KeyMaterial, hmac_key: &[u8]) -> Option<Vec<u8>> {
        let KeyMaterial::Ec(secret) = key else {
            info!("MACed public keys are P-256 only, got {}", key.algorithm());
            return None;
        };
        cose::maced_public_key(&secret.public_key(), hmac_key)
            .map_err(|e| report("MACed public key", &Error::from(e)))
            .ok()
    }

    pub fn build_certificate_request_response(
        &self,
        maced_keys: &[Vec<u8>],
        challenge: &[u8],
        device_info: &[u8],
    ) -> Option<Vec<u8>> {
        rkp::create_certificate_request_response(maced_keys, challenge, device_info)
            .map_err(|e| report("certificate request response", &Error::from(e)))
            .ok()
    }

    /// DeviceInfo map. Each missing field falls back to its build variable,
    /// then to a generic default. `os_version` comes from the boot state.
    pub fn build_device_info(
        &self,
        brand: Option<&str>,
        manufacturer: Option<&str>,
        product: Option<&str>,
        model: Option<&str>,
        device: Option<&str>,
    ) -> Vec<u8> {
        let field = |value: Option<&str>, name: &str| {
            value.map(str::to_owned).or_else(|| self.config.build_variable(name))
        };
        let brand = field(brand, "BRAND");
        let manufacturer = field(manufacturer, "MANUFACTURER");
        let product = field(product, "PRODUCT");
        let model = field(model, "MODEL");
        let device = field(device, "DEVICE");
        rkp::create_device_info_cbor(
            brand.as_deref(),
            manufacturer.as_deref(),
            product.as_deref(),
            model.as_deref(),
            device.as_deref(),
            &self.boot.os_version().to_string(),
        )
    }

    /// MAC RKP key pairs generated from now on with `hmac_key`. Until this
    /// is called a random per-process key is used. Pairs generated under the
    /// previous key are forgotten.
    pub fn set_rkp_hmac_key(&self, hmac_key: Vec<u8>) {
        *self.rkp_keys.write() = Arc::new(RkpKeyStore::new(hmac_key));
    }

    /// New RKP key pair, remembered by its handle for later certificate
    /// requests.
    pub fn generate_rkp_key_pair(&self) -> Option<Arc<RkpKeyPair>> {
        let store = Arc::clone(&self.rkp_keys.read());
        store
            .generate_key_pair()
            .map_err(|e| report("RKP key pair", &Error::from(e)))
            .ok()
    }

    pub fn rkp_key_pair(&self, handle: &[u8]) -> Option<Arc<RkpKeyPair>> {
        self.rkp_keys.read().get(handle)
    }

    /// Certificate request response over key pairs from
    /// [`Self::generate_rkp_key_pair`], with the DeviceInfo of
    /// [`Self::build_device_info`]. `None` if any handle is unknown.
    pub fn build_certificate_request_for_handles(
        &self,
        handles: &[&[u8]],
        challenge: &[u8],
    ) -> Option<Vec<u8>> {
        let store = Arc::clone(&self.rkp_keys.read());
        let mut maced_keys = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(pair) = store.get(handle) else {
                info!("unknown RKP key handle, no certificate request built");
                return None;
            };
            maced_keys.push(pair.maced_public_key().to_vec());
        }
        let device_info = self.build_device_info(None, None, None, None, None);
        self.build_certificate_request_response(&maced_keys, challenge, &device_info)
    }

    pub fn hardware_info(&self) -> HardwareInfo {
        HardwareInfo::from_config(&*self.config)
    }

    pub fn keybox_count(&self) -> usize {
        self.registry.count()
    }

    /// Whether any keybox is loaded, i.e. whether forging can happen at all.
    pub fn is_active(&self) -> bool {
        self.registry.is_active()
    }

    /// Drop cached forged chains. Call after patch-level or module-hash
    /// configuration changes.
    pub fn clear_cache(&self) {
        self.forger.clear_cache();
    }
}
