//! Rewriting an existing attestation extension under a spoofed identity.

use der::{Decode, Encode};

use crate::attestation::{tag, AttestationRecord, Authorization, RootOfTrust};
use crate::config::{self, BootState, ConfigSource};
use crate::error::Result;

/// What gets replaced in the TEE-enforced list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPolicy {
    /// Value written as the OS patch level (tag 706).
    pub patch_level: i32,
    /// Module hash (tag 724); `None` leaves the tag out.
    pub module_hash: Option<Vec<u8>>,
    pub boot_key: [u8; 32],
    /// Used when the original root of trust carries no readable hash.
    pub fallback_boot_hash: [u8; 32],
}

impl PatchPolicy {
    pub fn from_config(patch_level: i32, config: &dyn ConfigSource, boot: &dyn BootState) -> Self {
        PatchPolicy {
            patch_level,
            module_hash: config::module_hash(config),
            boot_key: boot.verified_boot_key(),
            fallback_boot_hash: boot.verified_boot_hash(),
        }
    }
}

/// Rewrite the DER `KeyDescription` in `extension_value` according to
/// `policy` and return the new DER.
///
/// In the TEE-enforced list the OS patch level and module hash are always
/// replaced, never merged, and the root of trust is rebuilt as locked and
/// verified with the local boot key. Every other entry, and the rest of the
/// record, is carried over. Entries this crate does not interpret keep their
/// original bytes.
///
/// The whole record is decoded and re-encoded, so the output is always
/// canonical DER: list entries come out in ascending tag order. A list that
/// repeats a tag does not decode and is an error, which the forging path
/// turns into passing the original chain through untouched.
pub fn rewrite_extension(extension_value: &[u8], policy: &PatchPolicy) -> Result<Vec<u8>> {
    let mut record = AttestationRecord::from_der(extension_value)?;
    let tee = &mut record.tee_enforced;

    let original_root = tee.remove(tag::ROOT_OF_TRUST);
    tee.remove(tag::OS_PATCH_LEVEL);
    tee.remove(tag::MODULE_HASH);

    tee.insert(Authorization::OsPatchLevel(policy.patch_level.into()));
    if let Some(hash) = &policy.module_hash {
        tee.insert(Authorization::ModuleHash(hash.clone()));
    }

    let boot_hash = match &original_root {
        Some(Authorization::RootOfTrust(root)) => root.verified_boot_hash.as_bytes(),
        _ => &policy.fallback_boot_hash[..],
    };
    tee.insert(Authorization::RootOfTrust(RootOfTrust::locked_verified(
        &policy.boot_key,
        boot_hash,
    )?));

    Ok(record.to_der()?)
}
