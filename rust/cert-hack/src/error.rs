//! Crate-wide error type.

use thiserror::Error;

use crate::cbor::CborError;
use crate::cose::CoseError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A keybox record could not be turned into key material. The reason never
    /// includes the record contents.
    #[error("keybox record {index}: {reason}")]
    Keybox { index: usize, reason: &'static str },

    #[error("DER error: {0}")]
    Der(#[from] der::Error),

    #[error("malformed attestation data: {0}")]
    Malformed(&'static str),

    #[error("no keybox for algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("signing failed: {0}")]
    Signing(&'static str),

    #[error("key generation failed: {0}")]
    KeyGeneration(&'static str),

    #[error(transparent)]
    Cbor(#[from] CborError),

    #[error(transparent)]
    Cose(#[from] CoseError),
}

impl Error {
    /// Static variant name, safe to log when the full message could carry
    /// key material.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Keybox { .. } => "Keybox",
            Error::Der(_) => "Der",
            Error::Malformed(_) => "Malformed",
            Error::UnsupportedAlgorithm(_) => "UnsupportedAlgorithm",
            Error::Signing(_) => "Signing",
            Error::KeyGeneration(_) => "KeyGeneration",
            Error::Cbor(_) => "Cbor",
            Error::Cose(_) => "Cose",
        }
    }

    /// Whether the Display form may include input-derived detail.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Error::Keybox { .. } | Error::Signing(_) | Error::KeyGeneration(_))
    }
}
