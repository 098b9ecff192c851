//! Decoding compiled-type members into index records.
//!
//! The real class-file parser lives outside this crate; the index only
//! requires the `Converter` seam. `ClassNameConverter` is a minimal built-in
//! implementation that validates the class-file magic and derives the type
//! identity from the member path.

use thiserror::Error;

use crate::types::TypeRecord;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid class file magic header")]
    InvalidMagic,

    #[error("truncated class file")]
    Truncated,

    #[error("not a class file member: {0}")]
    NotAClassFile(String),
}

/// Turns raw member bytes into a structured type record. Implementations
/// must not touch the store; the indexer persists results itself.
pub trait Converter: Send + Sync {
    fn convert(&self, member_name: &str, bytes: &[u8]) -> Result<TypeRecord, ConvertError>;
}

const CLASS_MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];
const CLASS_SUFFIX: &str = ".class";

#[derive(Debug, Default)]
pub struct ClassNameConverter;

impl Converter for ClassNameConverter {
    fn convert(&self, member_name: &str, bytes: &[u8]) -> Result<TypeRecord, ConvertError> {
        let Some(slashed) = member_name.strip_suffix(CLASS_SUFFIX) else {
            return Err(ConvertError::NotAClassFile(member_name.to_string()));
        };
        if bytes.len() < 8 {
            return Err(ConvertError::Truncated);
        }
        if bytes[..4] != CLASS_MAGIC {
            return Err(ConvertError::InvalidMagic);
        }

        Ok(TypeRecord {
            binary_name: slashed.replace('/', "."),
            field_descriptor: format!("L{slashed};"),
        })
    }
}
