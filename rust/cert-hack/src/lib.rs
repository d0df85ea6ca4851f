//! Android key attestation forging and RKP CBOR/COSE encoding.
//!
//! The [`CertHack`] engine re-issues device attestation certificates under a
//! loaded keybox, generates new attested keys and builds the COSE structures
//! used by Remote Key Provisioning. The interception layer drives it through
//! the Rust API or the C ABI in [`ffi`].
//!
//! Encoding follows RFC 8949 (canonical CBOR), RFC 9052 (COSE) and the Android
//! key attestation ASN.1 schema.

pub(crate) mod asn1;
pub mod attestation;
pub mod cache;
pub mod cbor;
pub mod cert;
pub mod config;
pub mod cose;
pub mod engine;
pub mod error;
pub mod forge;
pub mod keybox;
pub mod keygen;
pub mod params;
pub mod patch;
pub mod rkp;
pub mod signing;

#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(test)]
mod testutil;

pub use cbor::{CborError, CborValue};
pub use config::{BootState, ConfigSource};
pub use engine::CertHack;
pub use error::{Error, Result};
pub use keybox::KeyboxRecord;
pub use keygen::{GeneratedKey, Issuer, KeyDescriptor};
pub use params::{KeyGenParameters, KeyParam};
