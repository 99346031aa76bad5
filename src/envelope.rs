//! Envelope codec: `<iv-hex>.<tag-hex>.<ciphertext-hex>`
//!
//! The at-rest form of an encrypted `auth` blob. All three fields are
//! lowercase hex, so `.` can only ever appear as the separator. A value
//! without any `.` was never encrypted and is passed through untouched.

use thiserror::Error;

use crate::crypto::{EncryptedData, IV_SIZE, TAG_SIZE};

/// Field separator
pub const DELIMITER: char = '.';

/// Reasons an envelope string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeParseError {
    #[error("expected 3 fields, found {0}")]
    FieldCount(usize),

    #[error("{field} is not lowercase hex")]
    InvalidHex { field: &'static str },

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result of parsing a stored `auth` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed<'a> {
    /// Not an envelope; the value is plaintext as stored
    Passthrough(&'a str),
    /// A well-formed envelope
    Sealed(EncryptedData),
}

/// Render an encryption result as an envelope string
pub fn serialize(encrypted: &EncryptedData) -> String {
    format!(
        "{}{}{}{}{}",
        hex::encode(encrypted.iv),
        DELIMITER,
        hex::encode(encrypted.tag),
        DELIMITER,
        hex::encode(&encrypted.ciphertext)
    )
}

/// Parse an envelope string, passing through values without a delimiter
pub fn parse(envelope: &str) -> Result<Parsed<'_>, EnvelopeParseError> {
    if !envelope.contains(DELIMITER) {
        return Ok(Parsed::Passthrough(envelope));
    }

    let fields: Vec<&str> = envelope.split(DELIMITER).collect();
    if fields.len() != 3 {
        return Err(EnvelopeParseError::FieldCount(fields.len()));
    }

    let iv = decode_fixed::<IV_SIZE>("iv", fields[0])?;
    let tag = decode_fixed::<TAG_SIZE>("tag", fields[1])?;
    let ciphertext = decode_hex("ciphertext", fields[2])?;

    Ok(Parsed::Sealed(EncryptedData { iv, tag, ciphertext }))
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, EnvelopeParseError> {
    // hex::decode accepts uppercase too; the wire format does not.
    if !value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(EnvelopeParseError::InvalidHex { field });
    }
    hex::decode(value).map_err(|_| EnvelopeParseError::InvalidHex { field })
}

fn decode_fixed<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], EnvelopeParseError> {
    let bytes = decode_hex(field, value)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| EnvelopeParseError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        })
}
