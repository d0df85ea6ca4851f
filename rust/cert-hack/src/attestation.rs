//! Android key attestation extension (`1.3.6.1.4.1.11129.2.1.17`).
//!
//! ```asn1
//! KeyDescription ::= SEQUENCE {
//!     attestationVersion         INTEGER,
//!     attestationSecurityLevel   SecurityLevel,
//!     keyMintVersion             INTEGER,
//!     keymintSecurityLevel       SecurityLevel,
//!     attestationChallenge       OCTET_STRING,
//!     uniqueId                   OCTET_STRING,
//!     softwareEnforced           AuthorizationList,
//!     hardwareEnforced           AuthorizationList,
//! }
//! ```
//!
//! Authorization lists are decoded into typed entries for the tags this crate
//! reads or writes. Every other entry is carried as [`Authorization::Opaque`]
//! and re-encodes byte-for-byte.

use std::collections::BTreeMap;

use der::asn1::{Null, OctetString, OctetStringRef};
use der::oid::ObjectIdentifier;
use der::{Decode, DecodeValue, Encode, EncodeValue, Enumerated, Header, Length, Reader, Sequence, Writer};

use crate::asn1::{decode_integer_set, explicit_fields, integer_set, ExplicitTaggedValue, RawDer};

/// OID value for the Android Attestation extension.
pub const ATTESTATION_EXTENSION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.1.17");

/// Authorization list tag numbers (KeyMint `Tag` values without the type bits).
pub mod tag {
    pub const PURPOSE: u32 = 1;
    pub const ALGORITHM: u32 = 2;
    pub const KEY_SIZE: u32 = 3;
    pub const DIGEST: u32 = 5;
    pub const EC_CURVE: u32 = 10;
    pub const NO_AUTH_REQUIRED: u32 = 503;
    pub const CREATION_DATETIME: u32 = 701;
    pub const ORIGIN: u32 = 702;
    pub const ROOT_OF_TRUST: u32 = 704;
    pub const OS_VERSION: u32 = 705;
    pub const OS_PATCH_LEVEL: u32 = 706;
    pub const ATTESTATION_APPLICATION_ID: u32 = 709;
    pub const ATTESTATION_ID_BRAND: u32 = 710;
    pub const ATTESTATION_ID_DEVICE: u32 = 711;
    pub const ATTESTATION_ID_PRODUCT: u32 = 712;
    pub const ATTESTATION_ID_MANUFACTURER: u32 = 716;
    pub const ATTESTATION_ID_MODEL: u32 = 717;
    pub const VENDOR_PATCH_LEVEL: u32 = 718;
    pub const BOOT_PATCH_LEVEL: u32 = 719;
    pub const MODULE_HASH: u32 = 724;
}

/// ```asn1
/// SecurityLevel ::= ENUMERATED {
///     Software                   (0),
///     TrustedEnvironment         (1),
///     StrongBox                  (2),
/// }
/// ```
#[repr(u32)]
#[derive(Debug, Clone, Copy, Enumerated, PartialEq, Eq)]
pub enum SecurityLevel {
    Software = 0,
    TrustedEnvironment = 1,
    Strongbox = 2,
}

/// ```asn1
/// VerifiedBootState ::= ENUMERATED {
///     Verified                   (0),
///     SelfSigned                 (1),
///     Unverified                 (2),
///     Failed                     (3),
/// }
/// ```
#[repr(u32)]
#[derive(Debug, Clone, Copy, Enumerated, PartialEq, Eq)]
pub enum VerifiedBootState {
    Verified = 0,
    SelfSigned = 1,
    Unverified = 2,
    Failed = 3,
}

/// ```asn1
/// RootOfTrust ::= SEQUENCE {
///     verifiedBootKey            OCTET_STRING,
///     deviceLocked               BOOLEAN,
///     verifiedBootState          VerifiedBootState,
///     verifiedBootHash           OCTET_STRING,
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Sequence)]
pub struct RootOfTrust {
    pub verified_boot_key: OctetString,
    pub device_locked: bool,
    pub verified_boot_state: VerifiedBootState,
    pub verified_boot_hash: OctetString,
}

impl RootOfTrust {
    /// A root of trust claiming a locked device with a verified boot chain.
    pub fn locked_verified(boot_key: &[u8], boot_hash: &[u8]) -> der::Result<Self> {
        Ok(RootOfTrust {
            verified_boot_key: OctetString::new(boot_key)?,
            device_locked: true,
            verified_boot_state: VerifiedBootState::Verified,
            verified_boot_hash: OctetString::new(boot_hash)?,
        })
    }
}

/// One entry of an authorization list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Purpose(Vec<i64>),
    Algorithm(i64),
    KeySize(i64),
    Digest(Vec<i64>),
    EcCurve(i64),
    NoAuthRequired,
    CreationDateTime(i64),
    Origin(i64),
    RootOfTrust(RootOfTrust),
    OsVersion(i64),
    OsPatchLevel(i64),
    AttestationApplicationId(Vec<u8>),
    AttestationIdBrand(Vec<u8>),
    AttestationIdDevice(Vec<u8>),
    AttestationIdProduct(Vec<u8>),
    AttestationIdManufacturer(Vec<u8>),
    AttestationIdModel(Vec<u8>),
    VendorPatchLevel(i64),
    BootPatchLevel(i64),
    ModuleHash(Vec<u8>),
    /// Any other tag, or a known tag whose value did not decode. `value` is
    /// the inner DER exactly as found inside the explicit tag.
    Opaque { tag: u32, value: Vec<u8> },
}

impl Authorization {
    pub fn tag(&self) -> u32 {
        match self {
            Authorization::Purpose(_) => tag::PURPOSE,
            Authorization::Algorithm(_) => tag::ALGORITHM,
            Authorization::KeySize(_) => tag::KEY_SIZE,
            Authorization::Digest(_) => tag::DIGEST,
            Authorization::EcCurve(_) => tag::EC_CURVE,
            Authorization::NoAuthRequired => tag::NO_AUTH_REQUIRED,
            Authorization::CreationDateTime(_) => tag::CREATION_DATETIME,
            Authorization::Origin(_) => tag::ORIGIN,
            Authorization::RootOfTrust(_) => tag::ROOT_OF_TRUST,
            Authorization::OsVersion(_) => tag::OS_VERSION,
            Authorization::OsPatchLevel(_) => tag::OS_PATCH_LEVEL,
            Authorization::AttestationApplicationId(_) => tag::ATTESTATION_APPLICATION_ID,
            Authorization::AttestationIdBrand(_) => tag::ATTESTATION_ID_BRAND,
            Authorization::AttestationIdDevice(_) => tag::ATTESTATION_ID_DEVICE,
            Authorization::AttestationIdProduct(_) => tag::ATTESTATION_ID_PRODUCT,
            Authorization::AttestationIdManufacturer(_) => tag::ATTESTATION_ID_MANUFACTURER,
            Authorization::AttestationIdModel(_) => tag::ATTESTATION_ID_MODEL,
            Authorization::VendorPatchLevel(_) => tag::VENDOR_PATCH_LEVEL,
            Authorization::BootPatchLevel(_) => tag::BOOT_PATCH_LEVEL,
            Authorization::ModuleHash(_) => tag::MODULE_HASH,
            Authorization::Opaque { tag, .. } => *tag,
        }
    }

    /// Decode the inner DER of an `[tag] EXPLICIT` field. Never fails: values
    /// that do not match their expected type are kept opaque.
    fn decode(tag: u32, value: &[u8]) -> Self {
        Self::decode_typed(tag, value)
            .unwrap_or_else(|_| Authorization::Opaque { tag, value: value.to_vec() })
    }

    fn decode_typed(tag: u32, value: &[u8]) -> der::Result<Self> {
        let octets = |v: &[u8]| -> der::Result<Vec<u8>> { Ok(OctetString::from_der(v)?.into_bytes()) };
        Ok(match tag {
            tag::PURPOSE => Authorization::Purpose(decode_integer_set(value)?),
            tag::ALGORITHM => Authorization::Algorithm(i64::from_der(value)?),
            tag::KEY_SIZE => Authorization::KeySize(i64::from_der(value)?),
            tag::DIGEST => Authorization::Digest(decode_integer_set(value)?),
            tag::EC_CURVE => Authorization::EcCurve(i64::from_der(value)?),
            tag::NO_AUTH_REQUIRED => {
                Null::from_der(value)?;
                Authorization::NoAuthRequired
            }
            tag::CREATION_DATETIME => Authorization::CreationDateTime(i64::from_der(value)?),
            tag::ORIGIN => Authorization::Origin(i64::from_der(value)?),
            tag::ROOT_OF_TRUST => Authorization::RootOfTrust(RootOfTrust::from_der(value)?),
            tag::OS_VERSION => Authorization::OsVersion(i64::from_der(value)?),
            tag::OS_PATCH_LEVEL => Authorization::OsPatchLevel(i64::from_der(value)?),
            tag::ATTESTATION_APPLICATION_ID => Authorization::AttestationApplicationId(octets(value)?),
            tag::ATTESTATION_ID_BRAND => Authorization::AttestationIdBrand(octets(value)?),
            tag::ATTESTATION_ID_DEVICE => Authorization::AttestationIdDevice(octets(value)?),
            tag::ATTESTATION_ID_PRODUCT => Authorization::AttestationIdProduct(octets(value)?),
            tag::ATTESTATION_ID_MANUFACTURER => {
                Authorization::AttestationIdManufacturer(octets(value)?)
            }
            tag::ATTESTATION_ID_MODEL => Authorization::AttestationIdModel(octets(value)?),
            tag::VENDOR_PATCH_LEVEL => Authorization::VendorPatchLevel(i64::from_der(value)?),
            tag::BOOT_PATCH_LEVEL => Authorization::BootPatchLevel(i64::from_der(value)?),
            tag::MODULE_HASH => Authorization::ModuleHash(octets(value)?),
            _ => return Err(der::ErrorKind::TagNumberInvalid.into()),
        })
    }

    fn encode_to_vec(&self, out: &mut Vec<u8>) -> der::Result<()> {
        let tag = self.tag();
        match self {
            Authorization::Purpose(values) | Authorization::Digest(values) => {
                ExplicitTaggedValue { tag, val: integer_set(values)? }.encode_to_vec(out)?
            }
            Authorization::Algorithm(v)
            | Authorization::KeySize(v)
            | Authorization::EcCurve(v)
            | Authorization::CreationDateTime(v)
            | Authorization::Origin(v)
            | Authorization::OsVersion(v)
            | Authorization::OsPatchLevel(v)
            | Authorization::VendorPatchLevel(v)
            | Authorization::BootPatchLevel(v) => {
                ExplicitTaggedValue { tag, val: *v }.encode_to_vec(out)?
            }
            Authorization::NoAuthRequired => ExplicitTaggedValue { tag, val: Null }.encode_to_vec(out)?,
            Authorization::RootOfTrust(rot) => {
                ExplicitTaggedValue { tag, val: rot.clone() }.encode_to_vec(out)?
            }
            Authorization::AttestationApplicationId(bytes)
            | Authorization::AttestationIdBrand(bytes)
            | Authorization::AttestationIdDevice(bytes)
            | Authorization::AttestationIdProduct(bytes)
            | Authorization::AttestationIdManufacturer(bytes)
            | Authorization::AttestationIdModel(bytes)
            | Authorization::ModuleHash(bytes) => {
                ExplicitTaggedValue { tag, val: OctetStringRef::new(bytes)? }.encode_to_vec(out)?
            }
            Authorization::Opaque { value, .. } => {
                ExplicitTaggedValue { tag, val: RawDer(value) }.encode_to_vec(out)?
            }
        };
        Ok(())
    }
}

/// An authorization list, keyed and serialized by ascending tag number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationList {
    entries: BTreeMap<u32, Authorization>,
}

impl AuthorizationList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from entries; a repeated tag is rejected.
    pub fn from_entries(entries: impl IntoIterator<Item = Authorization>) -> der::Result<Self> {
        let mut list = Self::new();
        for entry in entries {
            if list.entries.insert(entry.tag(), entry).is_some() {
                return Err(der::ErrorKind::SetDuplicate.into());
            }
        }
        Ok(list)
    }

    pub fn get(&self, tag: u32) -> Option<&Authorization> {
        self.entries.get(&tag)
    }

    /// Insert an entry, returning any entry previously held for the same tag.
    pub fn insert(&mut self, entry: Authorization) -> Option<Authorization> {
        self.entries.insert(entry.tag(), entry)
    }

    pub fn remove(&mut self, tag: u32) -> Option<Authorization> {
        self.entries.remove(&tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Entries in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = &Authorization> {
        self.entries.values()
    }

    pub fn tags(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn encode_entries(&self) -> der::Result<Vec<u8>> {
        let mut out = Vec::new();
        for entry in self.entries.values() {
            entry.encode_to_vec(&mut out)?;
        }
        Ok(out)
    }
}

impl<'a> DecodeValue<'a> for AuthorizationList {
    fn decode_value<R: Reader<'a>>(reader: &mut R, header: Header) -> der::Result<Self> {
        let content = reader.read_slice(header.length)?;
        Self::from_entries(
            explicit_fields(content)?
                .into_iter()
                .map(|(tag, value)| Authorization::decode(tag, value)),
        )
    }
}

impl EncodeValue for AuthorizationList {
    fn value_len(&self) -> der::Result<Length> {
        Length::try_from(self.encode_entries()?.len())
    }

    fn encode_value(&self, writer: &mut impl Writer) -> der::Result<()> {
        writer.write(&self.encode_entries()?)
    }
}

impl<'a> Sequence<'a> for AuthorizationList {}

/// The decoded `KeyDescription` carried in the attestation extension.
#[derive(Debug, Clone, PartialEq, Eq, Sequence)]
pub struct AttestationRecord {
    pub attestation_version: i32,
    pub attestation_security_level: SecurityLevel,
    pub keymint_version: i32,
    pub keymint_security_level: SecurityLevel,
    pub attestation_challenge: OctetString,
    pub unique_id: OctetString,
    pub software_enforced: AuthorizationList,
    pub tee_enforced: AuthorizationList,
}
