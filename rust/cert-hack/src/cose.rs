//! COSE structure helpers for Android Remote Key Provisioning (RKP).
//!
//! Implements the COSE_Key, COSE_Mac0 and COSE_Encrypt framing needed for
//! MACed public keys and certificate request responses.
//!
//! Based on RFC 9052 (COSE) and the Android RKP specification.

use hmac::{Hmac, Mac};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::Sha256;
use thiserror::Error;

use crate::cbor::{self, CborValue};

type HmacSha256 = Hmac<Sha256>;

/// COSE header label for algorithm.
const COSE_HEADER_ALG: i64 = 1;
/// COSE algorithm identifier for HMAC-256/256.
const COSE_ALG_HMAC_256_256: i64 = 5;
/// COSE algorithm identifier for A256GCM.
const COSE_ALG_A256GCM: i64 = 3;
/// COSE algorithm identifier for ES256.
const COSE_ALG_ES256: i64 = -7;

const COSE_KEY_TYPE: i64 = 1;
const COSE_KEY_ALG: i64 = 3;
const COSE_KEY_TYPE_EC2: i64 = 2;
const COSE_KEY_EC2_CRV: i64 = -1;
const COSE_KEY_EC2_X: i64 = -2;
const COSE_KEY_EC2_Y: i64 = -3;
const COSE_CRV_P256: i64 = 1;

const P256_COORDINATE_LEN: usize = 32;

/// Length of the placeholder ciphertext in [`encrypt_placeholder`].
pub const PLACEHOLDER_CIPHERTEXT_LEN: usize = 16;

/// Errors that can occur during COSE operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoseError {
    #[error("invalid HMAC key length")]
    InvalidKeyLength,
    #[error("invalid EC public key coordinates")]
    InvalidPublicKey,
    #[error("encoded public key is {0} bytes, at least 64 are required")]
    PublicKeyTooShort(usize),
}

/// Build the COSE_Mac0 MAC structure for computing the MAC tag.
///
/// MAC_structure = [
///   "MAC0",           // context
///   protected,        // serialized protected headers
///   external_aad,     // empty byte string
///   payload           // the payload bytes
/// ]
fn build_mac_structure(protected_headers: &[u8], payload: &[u8]) -> Vec<u8> {
    let structure = CborValue::Array(vec![
        CborValue::TextString("MAC0".into()),
        CborValue::ByteString(protected_headers.to_vec()),
        CborValue::ByteString(vec![]), // external_aad
        CborValue::ByteString(payload.to_vec()),
    ]);
    cbor::encode(&structure)
}

fn compute_hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CoseError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CoseError::InvalidKeyLength)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn encode_protected_headers(alg: i64) -> Vec<u8> {
    let headers = CborValue::Map(vec![(
        CborValue::from_int(COSE_HEADER_ALG),
        CborValue::from_int(alg),
    )]);
    cbor::encode(&headers)
}

/// Encode a P-256 public key as an ES256 COSE_Key.
///
/// # Arguments
/// * `x` - The X coordinate of the public key (32 bytes).
/// * `y` - The Y coordinate of the public key (32 bytes).
pub fn encode_cose_key(x: &[u8], y: &[u8]) -> Result<Vec<u8>, CoseError> {
    if x.len() != P256_COORDINATE_LEN || y.len() != P256_COORDINATE_LEN {
        return Err(CoseError::InvalidPublicKey);
    }
    let key = CborValue::Map(vec![
        (CborValue::from_int(COSE_KEY_TYPE), CborValue::from_int(COSE_KEY_TYPE_EC2)),
        (CborValue::from_int(COSE_KEY_ALG), CborValue::from_int(COSE_ALG_ES256)),
        (CborValue::from_int(COSE_KEY_EC2_CRV), CborValue::from_int(COSE_CRV_P256)),
        (CborValue::from_int(COSE_KEY_EC2_X), CborValue::ByteString(x.to_vec())),
        (CborValue::from_int(COSE_KEY_EC2_Y), CborValue::ByteString(y.to_vec())),
    ]);
    Ok(cbor::encode(&key))
}

/// Generate a COSE_Mac0 structure for a MACed public key.
///
/// COSE_Mac0 = [
///   protected,     // serialized protected headers
///   unprotected,   // empty map
///   payload,       // COSE_Key bytes
///   tag            // HMAC-SHA256 tag
/// ]
pub fn generate_maced_public_key(
    x: &[u8],
    y: &[u8],
    hmac_key: &[u8],
) -> Result<Vec<u8>, CoseError> {
    let protected = encode_protected_headers(COSE_ALG_HMAC_256_256);
    let payload = encode_cose_key(x, y)?;

    let mac_structure = build_mac_structure(&protected, &payload);
    let tag = compute_hmac(hmac_key, &mac_structure)?;

    let cose_mac0 = CborValue::Array(vec![
        CborValue::ByteString(protected),
        CborValue::Map(vec![]), // unprotected headers (empty)
        CborValue::ByteString(payload),
        CborValue::ByteString(tag),
    ]);

    Ok(cbor::encode(&cose_mac0))
}

/// [`generate_maced_public_key`] for an encoded public key whose last 64
/// bytes are X then Y, as in an uncompressed SEC1 point or a P-256 SPKI.
pub fn generate_maced_public_key_from_encoded(
    encoded_public_key: &[u8],
    hmac_key: &[u8],
) -> Result<Vec<u8>, CoseError> {
    let len = encoded_public_key.len();
    if len < 2 * P256_COORDINATE_LEN {
        return Err(CoseError::PublicKeyTooShort(len));
    }
    let coordinates = &encoded_public_key[len - 2 * P256_COORDINATE_LEN..];
    let (x, y) = coordinates.split_at(P256_COORDINATE_LEN);
    generate_maced_public_key(x, y, hmac_key)
}

/// [`generate_maced_public_key`] for a P-256 public key.
pub fn maced_public_key(
    public_key: &p256::PublicKey,
    hmac_key: &[u8],
) -> Result<Vec<u8>, CoseError> {
    let point = public_key.to_encoded_point(false);
    generate_maced_public_key_from_encoded(point.as_bytes(), hmac_key)
}

/// A COSE_Encrypt with `{alg: A256GCM}` protected, an empty unprotected map,
/// zeroed ciphertext and no recipients.
///
/// This carries the shape of a protected-data payload only; nothing is
/// encrypted.
pub fn encrypt_placeholder() -> CborValue {
    CborValue::Array(vec![
        CborValue::ByteString(encode_protected_headers(COSE_ALG_A256GCM)),
        CborValue::Map(vec![]),
        CborValue::ByteString(vec![0; PLACEHOLDER_CIPHERTEXT_LEN]),
        CborValue::Array(vec![]),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use coset::iana;
    use coset::{CborSerializable, CoseKey, CoseMac0, KeyType, Label};

    fn verify_mac0(bytes: &[u8], hmac_key: &[u8]) -> CoseMac0 {
        let mac0 = CoseMac0::from_slice(bytes).unwrap();
        mac0.verify_tag(b"", |tag, data| {
            if compute_hmac(hmac_key, data).unwrap() == tag {
                Ok(())
            } else {
                Err("tag mismatch")
            }
        })
        .unwrap();
        mac0
    }

    #[test]
    fn test_maced_public_key_verifies() {
        let x = vec![0x01; 32];
        let y = vec![0x02; 32];
        let hmac_key = vec![0x00; 32];

        let result = generate_maced_public_key(&x, &y, &hmac_key).unwrap();
        assert_eq!(result[0], 0x84, "should start with COSE array header (4 items)");

        let mac0 = verify_mac0(&result, &hmac_key);
        assert_eq!(
            mac0.protected.header.alg,
            Some(coset::Algorithm::Assigned(iana::Algorithm::HMAC_256_256))
        );
        assert_eq!(mac0.tag.len(), 32);
        assert_eq!(mac0.unprotected, coset::Header::default());
    }

    #[test]
    fn test_wrong_hmac_key_fails_verification() {
        let result = generate_maced_public_key(&[0x01; 32], &[0x02; 32], &[0xaa; 32]).unwrap();
        let mac0 = CoseMac0::from_slice(&result).unwrap();
        let verdict = mac0.verify_tag(b"", |tag, data| {
            if compute_hmac(&[0xbb; 32], data).unwrap() == tag {
                Ok(())
            } else {
                Err(())
            }
        });
        assert!(verdict.is_err());
    }

    #[test]
    fn test_cose_key_fields() {
        let x = vec![0xAA; 32];
        let y = vec![0xBB; 32];

        let key_bytes = encode_cose_key(&x, &y).unwrap();
        assert_eq!(hex::encode(&key_bytes[..7]), "a5010203262001");

        let key = CoseKey::from_slice(&key_bytes).unwrap();
        assert_eq!(key.kty, KeyType::Assigned(iana::KeyType::EC2));
        assert_eq!(key.alg, Some(coset::Algorithm::Assigned(iana::Algorithm::ES256)));
        let param = |label: i64| {
            key.params
                .iter()
                .find(|(l, _)| *l == Label::Int(label))
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(param(-1), coset::cbor::value::Value::Integer(1.into()));
        assert_eq!(param(-2), coset::cbor::value::Value::Bytes(x));
        assert_eq!(param(-3), coset::cbor::value::Value::Bytes(y));
    }

    #[test]
    fn test_invalid_key_coordinates() {
        let hmac_key = vec![0x00; 32];
        assert_eq!(
            generate_maced_public_key(&[], &[0x02; 32], &hmac_key),
            Err(CoseError::InvalidPublicKey)
        );
        assert_eq!(
            generate_maced_public_key(&[0x01; 31], &[0x02; 32], &hmac_key),
            Err(CoseError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_maced_key_from_encoded_point() {
        let secret = p256::SecretKey::random(&mut rand_core::OsRng);
        let public = secret.public_key();
        let point = public.to_encoded_point(false);
        let hmac_key = [0x42; 32];

        let maced = maced_public_key(&public, &hmac_key).unwrap();
        let mac0 = verify_mac0(&maced, &hmac_key);
        let key = CoseKey::from_slice(&mac0.payload.unwrap()).unwrap();
        let x = key.params.iter().find(|(l, _)| *l == Label::Int(-2)).unwrap();
        assert_eq!(x.1, coset::cbor::value::Value::Bytes(point.x().unwrap().to_vec()));

        // Any prefix before the coordinates is ignored.
        let mut prefixed = vec![0x30, 0x59, 0x04];
        prefixed.extend_from_slice(&point.as_bytes()[1..]);
        assert_eq!(generate_maced_public_key_from_encoded(&prefixed, &hmac_key).unwrap(), maced);
    }

    #[test]
    fn test_short_encoded_key_is_an_error() {
        assert_eq!(
            generate_maced_public_key_from_encoded(&[0x04; 63], &[0; 32]),
            Err(CoseError::PublicKeyTooShort(63))
        );
    }

    #[test]
    fn test_hmac_deterministic() {
        let result1 = generate_maced_public_key(&[0x01; 32], &[0x02; 32], &[0xAA; 32]).unwrap();
        let result2 = generate_maced_public_key(&[0x01; 32], &[0x02; 32], &[0xAA; 32]).unwrap();
        assert_eq!(result1, result2, "same inputs should produce same output");
    }

    #[test]
    fn test_encrypt_placeholder_shape() {
        let encoded = cbor::encode(&encrypt_placeholder());
        assert_eq!(
            hex::encode(encoded),
            format!("8443a10103a050{}80", "00".repeat(PLACEHOLDER_CIPHERTEXT_LEN))
        );
    }
}
