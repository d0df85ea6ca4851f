//! C ABI for the native interception layer.
//!
//! The engine is exposed as an opaque `CertHack *` created by
//! [`rust_cert_hack_new`] and released by [`rust_cert_hack_free`]. Stateless
//! RKP builders are exported alongside it.
//!
//! Byte results come back as a [`RustBuffer`] owned by Rust; the caller hands
//! it to [`rust_free_buffer`]. A panic never unwinds into C: every entry point
//! catches it and reports failure the same way as a rejected argument (an
//! empty buffer, a null handle, `-1` or `false`).
//!
//! Lists cross the boundary packed into one byte buffer plus `count + 1`
//! ascending offsets; item `i` is `data[offsets[i]..offsets[i + 1]]`. Forged
//! and generated certificate chains come back as concatenated DER, which is
//! self-delimiting.
//!
//! # Safety
//!
//! Every pointer argument must be valid for the stated number of elements, or
//! may be null when that number is zero. Engine pointers must come from
//! [`rust_cert_hack_new`] and must not be used after [`rust_cert_hack_free`].

use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use log::warn;

use crate::config::{DeviceBootState, StaticConfig};
use crate::cose;
use crate::engine::CertHack;
use crate::keybox::KeyboxRecord;
use crate::keygen::KeyDescriptor;
use crate::params::{KeyGenParameters, KeyParam};
use crate::rkp::{self, HANDLE_LEN};

/// Borrow `len` elements at `ptr`. `None` for a null or misaligned pointer, or
/// a length whose byte size exceeds `isize::MAX`.
unsafe fn raw_slice<'a, T>(ptr: *const T, len: usize) -> Option<&'a [T]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() || (ptr as usize) % std::mem::align_of::<T>() != 0 {
        return None;
    }
    let bytes = len.checked_mul(std::mem::size_of::<T>())?;
    if bytes > isize::MAX as usize {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

/// Split an offset-packed list. Offsets that go backwards or past the end of
/// `data` reject the whole list.
unsafe fn packed_items<'a>(
    data: *const u8,
    data_len: usize,
    offsets: *const usize,
    count: usize,
) -> Option<Vec<&'a [u8]>> {
    if count == 0 {
        return Some(Vec::new());
    }
    let data = raw_slice(data, data_len)?;
    let offsets = raw_slice(offsets, count.checked_add(1)?)?;
    offsets.windows(2).map(|bounds| data.get(bounds[0]..bounds[1])).collect()
}

/// UTF-8 text argument; empty means absent.
unsafe fn text_arg(ptr: *const u8, len: usize) -> Option<String> {
    let bytes = raw_slice(ptr, len)?;
    if bytes.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Split concatenated PEM certificates into single blocks.
fn pem_certificates(text: &str) -> Vec<String> {
    const END: &str = "-----END CERTIFICATE-----";
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(at) = rest.find(END) {
        let (block, tail) = rest.split_at(at + END.len());
        blocks.push(block.trim().to_owned());
        rest = tail;
    }
    blocks
}

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        warn!("panic caught at the C boundary");
        fallback
    })
}

fn buffer(f: impl FnOnce() -> Option<Vec<u8>>) -> RustBuffer {
    guarded(None, f).map_or_else(RustBuffer::empty, RustBuffer::from_vec)
}

/// Bytes owned by Rust and lent to C until [`rust_free_buffer`].
#[repr(C)]
pub struct RustBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl RustBuffer {
    fn from_vec(v: Vec<u8>) -> Self {
        let len = v.len();
        let data = Box::into_raw(v.into_boxed_slice()).cast::<u8>();
        RustBuffer { data, len }
    }

    fn empty() -> Self {
        RustBuffer { data: ptr::null_mut(), len: 0 }
    }

    #[cfg(test)]
    fn as_slice(&self) -> &[u8] {
        if self.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

/// Release a buffer returned by any `rust_*` function. Empty buffers are a
/// no-op.
///
/// # Safety
/// `buf` must come from this library and must not have been freed already.
#[no_mangle]
pub unsafe extern "C" fn rust_free_buffer(buf: RustBuffer) {
    if buf.data.is_null() || buf.len == 0 {
        return;
    }
    guarded((), || {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buf.data, buf.len)));
    });
}

/// Create an engine with no keyboxes loaded.
///
/// `security_patch` is the device's `YYYY-MM-DD` patch. `build_vars` holds
/// `KEY=VALUE` lines and `patch_overrides` the per-package patch file; either
/// may be empty. Returns null on failure.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_new(
    sdk: u32,
    security_patch_ptr: *const u8,
    security_patch_len: usize,
    build_vars_ptr: *const u8,
    build_vars_len: usize,
    patch_overrides_ptr: *const u8,
    patch_overrides_len: usize,
) -> *mut CertHack {
    guarded(ptr::null_mut(), || {
        let Some(security_patch) = text_arg(security_patch_ptr, security_patch_len) else {
            return ptr::null_mut();
        };
        let config = StaticConfig::new(&security_patch)
            .with_build_vars(&text_arg(build_vars_ptr, build_vars_len).unwrap_or_default())
            .with_security_patch_overrides(
                &text_arg(patch_overrides_ptr, patch_overrides_len).unwrap_or_default(),
            );
        let boot = DeviceBootState::new(sdk, &security_patch);
        Box::into_raw(Box::new(CertHack::new(Arc::new(config), Arc::new(boot))))
    })
}

/// # Safety
/// `engine` must come from [`rust_cert_hack_new`] or be null, and must not be
/// used afterwards.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_free(engine: *mut CertHack) {
    if engine.is_null() {
        return;
    }
    guarded((), || drop(Box::from_raw(engine)));
}

/// Replace the loaded keyboxes. Record `i` is made of item `i` of each packed
/// list: the algorithm name, the PEM private key and its PEM certificates
/// concatenated. `count == 0` clears every keybox.
///
/// Returns the number loaded, or `-1` if any record or argument is rejected,
/// in which case no keybox stays loaded.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_reload_keyboxes(
    engine: *const CertHack,
    algorithms_ptr: *const u8,
    algorithms_len: usize,
    algorithms_offsets: *const usize,
    keys_ptr: *const u8,
    keys_len: usize,
    keys_offsets: *const usize,
    certificates_ptr: *const u8,
    certificates_len: usize,
    certificates_offsets: *const usize,
    count: usize,
) -> i64 {
    guarded(-1, || {
        let Some(engine) = engine.as_ref() else { return -1 };
        let lists = (
            packed_items(algorithms_ptr, algorithms_len, algorithms_offsets, count),
            packed_items(keys_ptr, keys_len, keys_offsets, count),
            packed_items(certificates_ptr, certificates_len, certificates_offsets, count),
        );
        let (Some(algorithms), Some(keys), Some(certificates)) = lists else {
            // Keep the all-or-nothing contract for malformed arguments too.
            let _ = engine.reload_keyboxes(None);
            return -1;
        };
        if count == 0 {
            return engine.reload_keyboxes(None).map_or(-1, |n| n as i64);
        }
        let records: Vec<KeyboxRecord> = algorithms
            .iter()
            .zip(&keys)
            .zip(&certificates)
            .map(|((algorithm, key), certs)| KeyboxRecord {
                algorithm: String::from_utf8_lossy(algorithm).into_owned(),
                private_key_pem: String::from_utf8_lossy(key).into_owned(),
                certificate_pems: pem_certificates(&String::from_utf8_lossy(certs)),
            })
            .collect();
        engine.reload_keyboxes(Some(&records)).map_or(-1, |n| n as i64)
    })
}

/// Number of loaded keyboxes; `0` for a null engine.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_keybox_count(engine: *const CertHack) -> usize {
    guarded(0, || engine.as_ref().map_or(0, CertHack::keybox_count))
}

/// Forge a DER chain (leaf first, offset-packed) for `caller` and return it
/// as concatenated DER. A chain that cannot be forged comes back unchanged;
/// the buffer is empty only when the arguments are rejected.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_forge_chain(
    engine: *const CertHack,
    chain_ptr: *const u8,
    chain_len: usize,
    chain_offsets: *const usize,
    count: usize,
    caller: u32,
) -> RustBuffer {
    buffer(|| {
        let engine = engine.as_ref()?;
        let chain: Vec<Vec<u8>> = packed_items(chain_ptr, chain_len, chain_offsets, count)?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        Some(engine.forge_certificate_chain(&chain, caller).concat())
    })
}

/// Generate a key for `caller` under `alias` and return its attested chain
/// as concatenated DER. `algorithm` and `key_size` take KeyMint values; a zero
/// key size picks the default. Empty when no keybox serves the algorithm.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_generate_key(
    engine: *const CertHack,
    caller: u32,
    alias_ptr: *const u8,
    alias_len: usize,
    algorithm: i64,
    key_size: u32,
    purposes_ptr: *const i64,
    purposes_len: usize,
    challenge_ptr: *const u8,
    challenge_len: usize,
) -> RustBuffer {
    buffer(|| {
        let engine = engine.as_ref()?;
        let descriptor = key_descriptor(text_arg(alias_ptr, alias_len)?);
        let purposes = raw_slice(purposes_ptr, purposes_len)?;
        let challenge = raw_slice(challenge_ptr, challenge_len)?;

        let mut params = vec![KeyParam::Algorithm(algorithm)];
        if key_size != 0 {
            params.push(KeyParam::KeySize(key_size));
        }
        params.extend(purposes.iter().map(|&purpose| KeyParam::Purpose(purpose)));
        if !challenge.is_empty() {
            params.push(KeyParam::AttestationChallenge(challenge.to_vec()));
        }
        let params = KeyGenParameters::new(&params);

        let key = engine.generate_forged_key_and_chain(caller, &descriptor, &params, None)?;
        Some(key.chain().concat())
    })
}

/// PKCS#8 private key of a key generated by [`rust_cert_hack_generate_key`].
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_generated_key_pkcs8(
    engine: *const CertHack,
    caller: u32,
    alias_ptr: *const u8,
    alias_len: usize,
) -> RustBuffer {
    buffer(|| {
        let engine = engine.as_ref()?;
        let descriptor = key_descriptor(text_arg(alias_ptr, alias_len)?);
        engine.generated_key(caller, &descriptor)?.private_key_pkcs8().ok()
    })
}

fn key_descriptor(alias: String) -> KeyDescriptor {
    // Domain APP, namespace -1: the keystore's per-app default.
    KeyDescriptor { domain: 0, namespace: -1, alias }
}

/// Set the HMAC key RKP key pairs are MACed with.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_set_rkp_hmac_key(
    engine: *const CertHack,
    hmac_key_ptr: *const u8,
    hmac_key_len: usize,
) -> bool {
    guarded(false, || {
        let (Some(engine), Some(hmac_key)) =
            (engine.as_ref(), raw_slice(hmac_key_ptr, hmac_key_len))
        else {
            return false;
        };
        engine.set_rkp_hmac_key(hmac_key.to_vec());
        true
    })
}

/// Generate an RKP key pair. Writes its 32-byte private key handle to
/// `handle_out` and returns the MACed public key.
///
/// # Safety
/// `handle_out` must be writable for `handle_out_len` bytes. See also the
/// module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_generate_rkp_key_pair(
    engine: *const CertHack,
    handle_out: *mut u8,
    handle_out_len: usize,
) -> RustBuffer {
    buffer(|| {
        let engine = engine.as_ref()?;
        if handle_out.is_null() || handle_out_len < HANDLE_LEN {
            return None;
        }
        let pair = engine.generate_rkp_key_pair()?;
        ptr::copy_nonoverlapping(pair.handle().as_ptr(), handle_out, HANDLE_LEN);
        Some(pair.maced_public_key().to_vec())
    })
}

/// Certificate request response over RKP key pairs named by their handles
/// (offset-packed). Empty if any handle is unknown.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_cert_hack_certificate_request(
    engine: *const CertHack,
    handles_ptr: *const u8,
    handles_len: usize,
    handles_offsets: *const usize,
    count: usize,
    challenge_ptr: *const u8,
    challenge_len: usize,
) -> RustBuffer {
    buffer(|| {
        let engine = engine.as_ref()?;
        let handles = packed_items(handles_ptr, handles_len, handles_offsets, count)?;
        let challenge = raw_slice(challenge_ptr, challenge_len)?;
        engine.build_certificate_request_for_handles(&handles, challenge)
    })
}

/// COSE_Mac0 over an encoded P-256 public key (uncompressed SEC1 point or
/// SubjectPublicKeyInfo DER).
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_generate_maced_public_key_from_encoded(
    public_key_ptr: *const u8,
    public_key_len: usize,
    hmac_key_ptr: *const u8,
    hmac_key_len: usize,
) -> RustBuffer {
    buffer(|| {
        let public_key = raw_slice(public_key_ptr, public_key_len)?;
        let hmac_key = raw_slice(hmac_key_ptr, hmac_key_len)?;
        cose::generate_maced_public_key_from_encoded(public_key, hmac_key).ok()
    })
}

/// DeviceInfo map. Empty strings select the generic defaults; `os_version`
/// is the attested value, e.g. `150000`.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_create_device_info(
    brand_ptr: *const u8,
    brand_len: usize,
    manufacturer_ptr: *const u8,
    manufacturer_len: usize,
    product_ptr: *const u8,
    product_len: usize,
    model_ptr: *const u8,
    model_len: usize,
    device_ptr: *const u8,
    device_len: usize,
    os_version: i32,
) -> RustBuffer {
    buffer(|| {
        let brand = text_arg(brand_ptr, brand_len);
        let manufacturer = text_arg(manufacturer_ptr, manufacturer_len);
        let product = text_arg(product_ptr, product_len);
        let model = text_arg(model_ptr, model_len);
        let device = text_arg(device_ptr, device_len);
        Some(rkp::create_device_info_cbor(
            brand.as_deref(),
            manufacturer.as_deref(),
            product.as_deref(),
            model.as_deref(),
            device.as_deref(),
            &os_version.to_string(),
        ))
    })
}

/// Certificate request response from offset-packed MACed keys. Empty when
/// the device info or any key is not exactly one CBOR item.
///
/// # Safety
/// See the module documentation.
#[no_mangle]
pub unsafe extern "C" fn rust_create_certificate_request(
    keys_ptr: *const u8,
    keys_len: usize,
    keys_offsets: *const usize,
    keys_count: usize,
    challenge_ptr: *const u8,
    challenge_len: usize,
    device_info_ptr: *const u8,
    device_info_len: usize,
) -> RustBuffer {
    buffer(|| {
        let maced_keys: Vec<Vec<u8>> = packed_items(keys_ptr, keys_len, keys_offsets, keys_count)?
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        let challenge = raw_slice(challenge_ptr, challenge_len)?;
        let device_info = raw_slice(device_info_ptr, device_info_len)?;
        rkp::create_certificate_request_response(&maced_keys, challenge, device_info).ok()
    })
}
