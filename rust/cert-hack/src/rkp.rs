//! Remote Key Provisioning: device info, certificate request responses and
//! the RKP key pairs handed out to callers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::info;
use rand_core::OsRng;

use crate::cache::LruCache;
use crate::cbor::{self, CborError, CborValue};
use crate::config::ConfigSource;
use crate::cose::{self, CoseError};

/// Number of RKP key pairs remembered for later certificate requests.
pub const KEY_STORE_CAPACITY: usize = 100;
pub const HANDLE_LEN: usize = 32;

/// Create a DeviceInfo CBOR map matching the Android RKP DeviceInfo schema.
///
/// Generates a CBOR map with 11 entries (0xAB header). Missing identity
/// fields fall back to generic Pixel values.
///
/// # Arguments
/// * `brand` - Device brand (e.g., "google").
/// * `manufacturer` - Device manufacturer (e.g., "Google").
/// * `product` - Product name (e.g., "husky").
/// * `model` - Model name (e.g., "Pixel 8 Pro").
/// * `device` - Device codename (e.g., "husky").
/// * `os_version` - OS version as reported in attestation (e.g., "150000").
pub fn create_device_info_cbor(
    brand: Option<&str>,
    manufacturer: Option<&str>,
    product: Option<&str>,
    model: Option<&str>,
    device: Option<&str>,
    os_version: &str,
) -> Vec<u8> {
    let text = |s: &str| CborValue::TextString(s.into());
    let map = CborValue::Map(vec![
        (text("brand"), text(brand.unwrap_or("google"))),
        (text("manufacturer"), text(manufacturer.unwrap_or("Google"))),
        (text("product"), text(product.unwrap_or("generic"))),
        (text("model"), text(model.unwrap_or("Pixel"))),
        (text("device"), text(device.unwrap_or("generic"))),
        (text("vb_state"), text("green")),
        (text("bootloader_state"), text("locked")),
        (text("vbmeta_digest"), CborValue::ByteString(vec![0; 32])),
        (text("os_version"), text(os_version)),
        (text("security_level"), text("tee")),
        (text("fused"), CborValue::UnsignedInt(1)),
    ]);
    cbor::encode(&map)
}

/// DeviceInfo with identity fields from the `BRAND`, `MANUFACTURER`,
/// `PRODUCT`, `MODEL` and `DEVICE` build variables.
pub fn device_info_from_config(config: &dyn ConfigSource, os_version: &str) -> Vec<u8> {
    let brand = config.build_variable("BRAND");
    let manufacturer = config.build_variable("MANUFACTURER");
    let product = config.build_variable("PRODUCT");
    let model = config.build_variable("MODEL");
    let device = config.build_variable("DEVICE");
    create_device_info_cbor(
        brand.as_deref(),
        manufacturer.as_deref(),
        product.as_deref(),
        model.as_deref(),
        device.as_deref(),
        os_version,
    )
}

/// Create a certificate request response for RKP.
///
/// Structure: [deviceInfo, challenge, protectedData, [COSE_Mac0...]]
///
/// `device_info` and every entry of `maced_keys` must each be exactly one
/// encoded CBOR item; they are spliced in unchanged.
pub fn create_certificate_request_response(
    maced_keys: &[Vec<u8>],
    challenge: &[u8],
    device_info: &[u8],
) -> Result<Vec<u8>, CborError> {
    let keys = maced_keys
        .iter()
        .map(|key| CborValue::pre_encoded(key.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let response = CborValue::Array(vec![
        CborValue::pre_encoded(device_info.to_vec())?,
        CborValue::ByteString(challenge.to_vec()),
        cose::encrypt_placeholder(),
        CborValue::Array(keys),
    ]);
    Ok(cbor::encode(&response))
}

/// `RpcHardwareInfo` reported to provisioning callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    pub version_number: i32,
    pub rpc_author_name: String,
    /// 2 = P-256.
    pub supported_eek_curve: i32,
    pub unique_id: String,
    pub supported_num_keys_in_csr: i32,
}

impl HardwareInfo {
    pub fn from_config(config: &dyn ConfigSource) -> Self {
        HardwareInfo {
            version_number: 3,
            rpc_author_name: "Google".into(),
            supported_eek_curve: 2,
            unique_id: config.build_variable("DEVICE").unwrap_or_else(|| "generic".into()),
            supported_num_keys_in_csr: 20,
        }
    }
}

/// A P-256 key pair generated for RKP, with its MACed public key.
pub struct RkpKeyPair {
    secret: p256::SecretKey,
    maced_public_key: Vec<u8>,
    handle: [u8; HANDLE_LEN],
}

impl fmt::Debug for RkpKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RkpKeyPair")
            .field("handle", &hex::encode(&self.handle[..4]))
            .finish_non_exhaustive()
    }
}

impl RkpKeyPair {
    pub fn secret_key(&self) -> &p256::SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> p256::PublicKey {
        self.secret.public_key()
    }

    /// COSE_Mac0 over the public key.
    pub fn maced_public_key(&self) -> &[u8] {
        &self.maced_public_key
    }

    /// Opaque private key handle: a big-endian counter then zeros.
    pub fn handle(&self) -> &[u8; HANDLE_LEN] {
        &self.handle
    }
}

fn handle_index(handle: &[u8]) -> Option<u32> {
    let handle: &[u8; HANDLE_LEN] = handle.try_into().ok()?;
    let (index, rest) = handle.split_at(4);
    if rest.iter().any(|&b| b != 0) {
        return None;
    }
    Some(u32::from_be_bytes(index.try_into().ok()?))
}

/// Generates RKP key pairs under one HMAC key and remembers the most recent
/// ones by handle.
pub struct RkpKeyStore {
    hmac_key: Vec<u8>,
    counter: AtomicU32,
    keys: LruCache<u32, Arc<RkpKeyPair>>,
}

impl fmt::Debug for RkpKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RkpKeyStore").field("keys", &self.keys.len()).finish_non_exhaustive()
    }
}

impl RkpKeyStore {
    pub fn new(hmac_key: Vec<u8>) -> Self {
        RkpKeyStore {
            hmac_key,
            counter: AtomicU32::new(0),
            keys: LruCache::new(KEY_STORE_CAPACITY),
        }
    }

    pub fn generate_key_pair(&self) -> Result<Arc<RkpKeyPair>, CoseError> {
        let secret = p256::SecretKey::random(&mut OsRng);
        let maced_public_key = cose::maced_public_key(&secret.public_key(), &self.hmac_key)?;

        let index = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut handle = [0u8; HANDLE_LEN];
        handle[..4].copy_from_slice(&index.to_be_bytes());

        let pair = Arc::new(RkpKeyPair { secret, maced_public_key, handle });
        self.keys.insert(index, Arc::clone(&pair));
        info!("generated RKP key pair handle={index}");
        Ok(pair)
    }

    pub fn get(&self, handle: &[u8]) -> Option<Arc<RkpKeyPair>> {
        self.keys.get(&handle_index(handle)?)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
