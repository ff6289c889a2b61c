//! Version codec for hex directory-name tokens.
//!
//! Each version of an artifact lives in a subdirectory whose name is a
//! zero-padded hexadecimal token. The codec turns that token into a
//! comparable `i32` whose ordering matches the client's own version
//! ordering. Decoding is bit-reproducible: the same token always yields
//! the same integer.

use thiserror::Error;

/// Errors that can occur when decoding a version token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version token contains non-hex character: {0:?}")]
    InvalidDigit(char),
    #[error("version token has too many significant digits: {0}")]
    TooManyDigits(usize),
}

/// Decode a hexadecimal directory-name token into a version number.
///
/// Leading zeros are trimmed (an all-zero token decodes to 0), the
/// remainder is left-padded to an even digit count, hex-decoded, and the
/// resulting bytes are read as a little-endian 32-bit integer (least
/// significant byte last in the token, as the client writes them).
///
/// Tokens containing non-hex characters or more than eight significant
/// digits are rejected rather than panicking.
pub fn decode_version(token: &str) -> Result<i32, VersionError> {
    if let Some(bad) = token.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(VersionError::InvalidDigit(bad));
    }

    let trimmed = token.trim_start_matches('0');
    if trimmed.is_empty() {
        return Ok(0);
    }
    if trimmed.len() > 8 {
        return Err(VersionError::TooManyDigits(trimmed.len()));
    }

    let padded = if trimmed.len() % 2 == 0 {
        trimmed.to_string()
    } else {
        format!("0{trimmed}")
    };

    // Infallible: the token was validated as hex above.
    let decoded = hex::decode(&padded).map_err(|_| VersionError::InvalidDigit('?'))?;

    let mut le = [0u8; 4];
    for (i, byte) in decoded.iter().rev().enumerate() {
        le[i] = *byte;
    }
    Ok(i32::from_le_bytes(le))
}
