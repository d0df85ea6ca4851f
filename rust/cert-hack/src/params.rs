//! Key generation request parameters.

/// KeyMint `Algorithm` values.
pub mod algorithm {
    pub const RSA: i64 = 1;
    pub const EC: i64 = 3;
}

/// KeyMint `EcCurve` values.
pub mod ec_curve {
    pub const P_224: i64 = 0;
    pub const P_256: i64 = 1;
    pub const P_384: i64 = 2;
    pub const P_521: i64 = 3;
    pub const CURVE_25519: i64 = 4;
}

/// KeyMint `KeyPurpose` values.
pub mod purpose {
    pub const ENCRYPT: i64 = 0;
    pub const DECRYPT: i64 = 1;
    pub const SIGN: i64 = 2;
    pub const VERIFY: i64 = 3;
    pub const WRAP_KEY: i64 = 5;
    pub const AGREE_KEY: i64 = 6;
    pub const ATTEST_KEY: i64 = 7;
}

pub const DEFAULT_RSA_EXPONENT: u64 = 65537;

/// One tag/value pair of a generation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParam {
    Algorithm(i64),
    KeySize(u32),
    EcCurve(i64),
    RsaPublicExponent(u64),
    Purpose(i64),
    Digest(i64),
    NoAuthRequired,
    /// Big-endian serial number bytes.
    CertificateSerial(Vec<u8>),
    /// DER `Name`.
    CertificateSubject(Vec<u8>),
    /// Milliseconds since the Unix epoch.
    CertificateNotBefore(i64),
    CertificateNotAfter(i64),
    AttestationChallenge(Vec<u8>),
    AttestationIdBrand(Vec<u8>),
    AttestationIdDevice(Vec<u8>),
    AttestationIdProduct(Vec<u8>),
    AttestationIdManufacturer(Vec<u8>),
    AttestationIdModel(Vec<u8>),
}

/// Read-only view over a request's [`KeyParam`]s. Repeated scalar tags keep
/// the last value; purposes and digests accumulate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyGenParameters {
    pub algorithm: i64,
    pub key_size: u32,
    pub ec_curve: Option<i64>,
    pub rsa_public_exponent: Option<u64>,
    pub purposes: Vec<i64>,
    pub digests: Vec<i64>,
    pub certificate_serial: Option<Vec<u8>>,
    pub certificate_subject: Option<Vec<u8>>,
    pub certificate_not_before: Option<i64>,
    pub certificate_not_after: Option<i64>,
    pub attestation_challenge: Option<Vec<u8>>,
    pub brand: Option<Vec<u8>>,
    pub device: Option<Vec<u8>>,
    pub product: Option<Vec<u8>>,
    pub manufacturer: Option<Vec<u8>>,
    pub model: Option<Vec<u8>>,
}

impl KeyGenParameters {
    pub fn new(params: &[KeyParam]) -> Self {
        let mut out = Self::default();
        for param in params {
            match param {
                KeyParam::Algorithm(v) => out.algorithm = *v,
                KeyParam::KeySize(v) => out.key_size = *v,
                KeyParam::EcCurve(v) => out.ec_curve = Some(*v),
                KeyParam::RsaPublicExponent(v) => out.rsa_public_exponent = Some(*v),
                KeyParam::Purpose(v) => out.purposes.push(*v),
                KeyParam::Digest(v) => out.digests.push(*v),
                // Generated keys always report NO_AUTH_REQUIRED.
                KeyParam::NoAuthRequired => {}
                KeyParam::CertificateSerial(v) => out.certificate_serial = Some(v.clone()),
                KeyParam::CertificateSubject(v) => out.certificate_subject = Some(v.clone()),
                KeyParam::CertificateNotBefore(v) => out.certificate_not_before = Some(*v),
                KeyParam::CertificateNotAfter(v) => out.certificate_not_after = Some(*v),
                KeyParam::AttestationChallenge(v) => out.attestation_challenge = Some(v.clone()),
                KeyParam::AttestationIdBrand(v) => out.brand = Some(v.clone()),
                KeyParam::AttestationIdDevice(v) => out.device = Some(v.clone()),
                KeyParam::AttestationIdProduct(v) => out.product = Some(v.clone()),
                KeyParam::AttestationIdManufacturer(v) => out.manufacturer = Some(v.clone()),
                KeyParam::AttestationIdModel(v) => out.model = Some(v.clone()),
            }
        }
        out
    }

    /// EC curve, defaulting from the key size when only a size was given.
    pub fn effective_ec_curve(&self) -> i64 {
        self.ec_curve.unwrap_or(match self.key_size {
            224 => ec_curve::P_224,
            384 => ec_curve::P_384,
            521 => ec_curve::P_521,
            _ => ec_curve::P_256,
        })
    }

    /// Size in bits reported for an EC key: the requested size, else the
    /// size of the curve.
    pub fn effective_ec_key_size(&self) -> u32 {
        if self.key_size != 0 {
            return self.key_size;
        }
        match self.effective_ec_curve() {
            ec_curve::P_224 => 224,
            ec_curve::P_384 => 384,
            ec_curve::P_521 => 521,
            _ => 256,
        }
    }

    pub fn effective_rsa_key_size(&self) -> u32 {
        if self.key_size == 0 {
            2048
        } else {
            self.key_size
        }
    }

    /// Whether device identifiers were requested for attestation.
    pub fn requests_device_ids(&self) -> bool {
        self.brand.is_some()
            || self.device.is_some()
            || self.product.is_some()
            || self.manufacturer.is_some()
            || self.model.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_fold() {
        let params = KeyGenParameters::new(&[
            KeyParam::Algorithm(algorithm::EC),
            KeyParam::KeySize(256),
            KeyParam::Purpose(purpose::SIGN),
            KeyParam::Purpose(purpose::VERIFY),
            KeyParam::Digest(4),
            KeyParam::AttestationChallenge(b"abc".to_vec()),
            KeyParam::KeySize(384),
        ]);
        assert_eq!(params.algorithm, algorithm::EC);
        assert_eq!(params.key_size, 384);
        assert_eq!(params.purposes, vec![purpose::SIGN, purpose::VERIFY]);
        assert_eq!(params.digests, vec![4]);
        assert_eq!(params.attestation_challenge.as_deref(), Some(&b"abc"[..]));
        assert!(!params.requests_device_ids());
    }

    #[test]
    fn test_curve_defaults() {
        let mut params = KeyGenParameters::new(&[KeyParam::Algorithm(algorithm::EC)]);
        assert_eq!(params.effective_ec_curve(), ec_curve::P_256);
        params.key_size = 384;
        assert_eq!(params.effective_ec_curve(), ec_curve::P_384);
        params.ec_curve = Some(ec_curve::CURVE_25519);
        assert_eq!(params.effective_ec_curve(), ec_curve::CURVE_25519);
    }

    #[test]
    fn test_ec_key_size_follows_curve() {
        let mut params = KeyGenParameters::new(&[KeyParam::Algorithm(algorithm::EC)]);
        assert_eq!(params.effective_ec_key_size(), 256);
        params.ec_curve = Some(ec_curve::P_384);
        assert_eq!(params.effective_ec_key_size(), 384);
        params.ec_curve = Some(ec_curve::P_521);
        assert_eq!(params.effective_ec_key_size(), 521);
        params.key_size = 224;
        assert_eq!(params.effective_ec_key_size(), 224);
    }

    #[test]
    fn test_rsa_size_default() {
        let params = KeyGenParameters::new(&[KeyParam::Algorithm(algorithm::RSA)]);
        assert_eq!(params.effective_rsa_key_size(), 2048);
        assert_eq!(params.rsa_public_exponent, None);
    }

    #[test]
    fn test_device_id_request() {
        let params = KeyGenParameters::new(&[KeyParam::AttestationIdModel(b"Pixel".to_vec())]);
        assert!(params.requests_device_ids());
    }
}
