//! Binary container for compiled programs.
//!
//! ```text
//! "AQUA"  u16 version (LE)
//! u32 len (LE)  postcard Vec<Constant>
//! u32 len (LE)  postcard Vec<String>        global names
//! u32 len (LE)  postcard Vec<FunctionInfo>
//! u32 len (LE)  postcard Vec<Instruction>   code
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::bytecode::ir::ProgramBc;

pub const MAGIC: [u8; 4] = *b"AQUA";
pub const VERSION: u16 = 1;

const HEADER_LEN: usize = MAGIC.len() + 2;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not an AquaScript bytecode file (bad magic tag)")]
    BadMagic,

    #[error("unsupported bytecode version {found}")]
    UnsupportedVersion { found: u16 },

    #[error("truncated {section}: needed {needed} bytes, {available} available")]
    Truncated {
        section: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{section} section length does not match its contents")]
    LengthMismatch { section: &'static str },

    #[error("malformed {section} section: {source}")]
    Decode {
        section: &'static str,
        #[source]
        source: postcard::Error,
    },

    #[error("failed to encode {section} section: {source}")]
    Encode {
        section: &'static str,
        #[source]
        source: postcard::Error,
    },

    #[error("{count} unexpected bytes after the last section")]
    TrailingBytes { count: usize },
}

/// Encodes a program into the container layout.
#[instrument(skip_all)]
pub fn serialize(bc: &ProgramBc) -> Result<Vec<u8>, FormatError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());

    write_section(&mut out, "constants", &bc.constants)?;
    write_section(&mut out, "globals", &bc.globals)?;
    write_section(&mut out, "functions", &bc.functions)?;
    write_section(&mut out, "code", &bc.code)?;

    debug!(bytes = out.len(), "serialized program");
    Ok(out)
}

fn write_section<T: Serialize + ?Sized>(
    out: &mut Vec<u8>,
    section: &'static str,
    value: &T,
) -> Result<(), FormatError> {
    let payload =
        postcard::to_allocvec(value).map_err(|source| FormatError::Encode { section, source })?;
    let len = u32::try_from(payload.len()).map_err(|_| FormatError::Encode {
        section,
        source: postcard::Error::SerializeBufferFull,
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(())
}

/// Decodes a container produced by [`serialize`].
///
/// The magic tag and version are checked before any section is read. Any
/// truncation, length mismatch, or trailing data is rejected.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn load(bytes: &[u8]) -> Result<ProgramBc, FormatError> {
    let magic_len = bytes.len().min(MAGIC.len());
    if bytes[..magic_len] != MAGIC[..magic_len] {
        return Err(FormatError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(FormatError::Truncated {
            section: "header",
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }
    let found = u16::from_le_bytes([bytes[4], bytes[5]]);
    if found != VERSION {
        return Err(FormatError::UnsupportedVersion { found });
    }

    let mut reader = SectionReader {
        bytes,
        pos: HEADER_LEN,
    };
    let bc = ProgramBc {
        constants: reader.section("constants")?,
        globals: reader.section("globals")?,
        functions: reader.section("functions")?,
        code: reader.section("code")?,
    };

    let rest = bytes.len() - reader.pos;
    if rest != 0 {
        return Err(FormatError::TrailingBytes { count: rest });
    }

    debug!(
        constants = bc.constants.len(),
        functions = bc.functions.len(),
        instructions = bc.code.len(),
        "loaded program"
    );
    Ok(bc)
}

struct SectionReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> SectionReader<'a> {
    fn take(&mut self, section: &'static str, needed: usize) -> Result<&'a [u8], FormatError> {
        let available = self.bytes.len() - self.pos;
        if available < needed {
            return Err(FormatError::Truncated {
                section,
                needed,
                available,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn section<T: DeserializeOwned>(&mut self, section: &'static str) -> Result<T, FormatError> {
        let raw = self.take(section, 4)?;
        let len = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let payload = self.take(section, len)?;

        let (value, rest) = postcard::take_from_bytes::<T>(payload)
            .map_err(|source| FormatError::Decode { section, source })?;
        if !rest.is_empty() {
            return Err(FormatError::LengthMismatch { section });
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ir::Constant;
    use crate::compile;

    fn sample() -> ProgramBc {
        compile(
            r#"
            var greeting = "hi"
            func twice(x) { return x * 2 }
            for n in [1, 2.5] { print(f"{greeting} {twice(n)}") }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_load_restores_serialized_program() {
        let bc = sample();
        let bytes = serialize(&bc).unwrap();
        assert_eq!(load(&bytes).unwrap(), bc);
    }

    #[test]
    fn test_header_layout() {
        let bytes = serialize(&ProgramBc::new()).unwrap();
        assert_eq!(&bytes[..4], b"AQUA");
        assert_eq!(&bytes[4..6], &[1, 0]);
        // four empty sections: u32 length 1, postcard length prefix 0
        assert_eq!(bytes.len(), 6 + 4 * 5);
        assert_eq!(&bytes[6..11], &[1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = serialize(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(load(&bytes), Err(FormatError::BadMagic)));
        assert!(matches!(load(b"PK"), Err(FormatError::BadMagic)));
    }

    #[test]
    fn test_unsupported_version_checked_before_sections() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            load(&bytes),
            Err(FormatError::UnsupportedVersion { found: 2 })
        ));
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = serialize(&sample()).unwrap();
        for cut in 0..bytes.len() {
            let err = load(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, FormatError::Truncated { .. }),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = serialize(&sample()).unwrap();
        bytes.push(0);
        assert!(matches!(
            load(&bytes),
            Err(FormatError::TrailingBytes { count: 1 })
        ));
    }

    #[test]
    fn test_section_longer_than_its_payload() {
        let mut payload = postcard::to_allocvec(&vec![Constant::Int(7)]).unwrap();
        payload.push(0);

        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        assert!(matches!(
            load(&bytes),
            Err(FormatError::LengthMismatch {
                section: "constants"
            })
        ));
    }

    #[test]
    fn test_garbage_payload() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(5); // claims five constants, provides none
        assert!(matches!(
            load(&bytes),
            Err(FormatError::Decode {
                section: "constants",
                ..
            })
        ));
    }
}
