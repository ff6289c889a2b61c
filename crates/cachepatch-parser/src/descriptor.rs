//! Reference bundle parser: a framed descriptor table.
//!
//! Payload layout: 4-byte magic, little-endian `u32` body length, then a
//! bincode-encoded `Vec<Descriptor>`. A payload shorter than its declared
//! body is reported as [`ParseError::UnexpectedEof`] — the signature the
//! watcher's retry loop keys on while the client is still writing.

use crate::{BundleParser, Descriptor, FieldTree, ParseError};
use std::fs;
use std::path::Path;

/// Magic bytes identifying a descriptor-table payload.
pub const PAYLOAD_MAGIC: [u8; 4] = *b"CPB1";

const HEADER_LEN: usize = PAYLOAD_MAGIC.len() + 4;

/// Built-in [`BundleParser`] for descriptor-table payloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct DescriptorTableParser;

impl DescriptorTableParser {
    /// Encode a descriptor table into payload bytes.
    ///
    /// # Errors
    /// Returns an error if the table cannot be serialized.
    pub fn encode(descriptors: &[Descriptor]) -> Result<Vec<u8>, ParseError> {
        let body = bincode::serialize(descriptors)
            .map_err(|e| ParseError::Decode(e.to_string()))?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&PAYLOAD_MAGIC);
        out.extend_from_slice(&u32::try_from(body.len()).map_err(|_| {
            ParseError::Decode("descriptor table exceeds u32 length".to_string())
        })?.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Write a descriptor-table payload file (used by tests and tooling).
    ///
    /// # Errors
    /// Returns an error on serialization or i/o failure.
    pub fn write_payload(path: &Path, descriptors: &[Descriptor]) -> Result<(), ParseError> {
        let bytes = Self::encode(descriptors)?;
        fs::write(path, bytes)?;
        Ok(())
    }
}

impl BundleParser for DescriptorTableParser {
    fn parse(&self, path: &Path) -> Result<FieldTree, ParseError> {
        let bytes = fs::read(path)?;

        if bytes.len() < PAYLOAD_MAGIC.len() {
            // Could be a half-written header; let the caller retry.
            return Err(ParseError::UnexpectedEof);
        }
        if bytes[..PAYLOAD_MAGIC.len()] != PAYLOAD_MAGIC {
            return Err(ParseError::UnsupportedFormat);
        }
        if bytes.len() < HEADER_LEN {
            return Err(ParseError::UnexpectedEof);
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[PAYLOAD_MAGIC.len()..HEADER_LEN]);
        let body_len = u32::from_le_bytes(len_bytes) as usize;

        let body = &bytes[HEADER_LEN..];
        if body.len() < body_len {
            return Err(ParseError::UnexpectedEof);
        }

        let descriptors: Vec<Descriptor> = bincode::deserialize(&body[..body_len])
            .map_err(|e| ParseError::Decode(e.to_string()))?;
        if descriptors.is_empty() {
            return Err(ParseError::NoLoadableSegment);
        }

        Ok(FieldTree { descriptors })
    }
}
