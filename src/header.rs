//! Archive and entry headers.
//!
//! # Layout
//! ```text
//! archive        := archive_header entry * files_number
//! archive_header := H16(files_number) 000             24 bits
//! entry          := file_header payload padding
//! file_header    := H16(chunk_size)                    21 bits
//!                   H64(file_size)                     71 bits
//!                   H8(padding)                        12 bits
//!                   H8(name byte) * 150              1800 bits
//! payload        := Hc(chunk) * ceil(file_size / chunk_size)
//! ```
//! `Hn` is the Hamming codeword of an `n`-bit value (see [`crate::hamming`]).
//! `file_size` counts payload *bits*.  `padding` zero bits bring the encoded
//! payload to a byte boundary, and the file header itself is exactly 238
//! bytes, so every entry starts on a byte boundary.
//!
//! There is no magic, no version tag and no index; changing any width here
//! breaks every archive written before.

use std::io::{self, Read, Seek, Write};

use serde::Serialize;
use tracing::{debug, warn};

use crate::bitstream::{from_bits, BitReader, BitWriter, Bit, Bits, BITS_IN_BYTE};
use crate::error::{ArchiveError, Result};
use crate::hamming::{encode_string, ChunkCode, ENCODED_BYTE_BITS};

/// Bytes reserved for the file name.
pub const FILE_NAME_BYTES: usize = 150;

/// Payload chunk width used when the caller does not pick one.
pub const DEFAULT_CHUNK_BITS: u16 = 8;

pub const FILES_NUMBER_CODE: ChunkCode = ChunkCode::fixed(16);
pub const CHUNK_SIZE_CODE:   ChunkCode = ChunkCode::fixed(16);
pub const FILE_SIZE_CODE:    ChunkCode = ChunkCode::fixed(64);
pub const PADDING_CODE:      ChunkCode = ChunkCode::fixed(8);

/// Encoded files_number plus filler, rounded up to whole bytes.
pub const ARCHIVE_HEADER_BITS: usize =
    FILES_NUMBER_CODE.encoded_bits().next_multiple_of(BITS_IN_BYTE);

pub const FILE_HEADER_BITS: usize = CHUNK_SIZE_CODE.encoded_bits()
    + FILE_SIZE_CODE.encoded_bits()
    + PADDING_CODE.encoded_bits()
    + FILE_NAME_BYTES * ENCODED_BYTE_BITS;

// ── Corrections ──────────────────────────────────────────────────────────────

/// A single-bit error repaired while reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub field:      &'static str,
    /// Absolute bit offset of the repaired bit.
    pub bit_offset: u64,
}

/// Read one codeword of `code` and return its corrected data bits.
pub(crate) fn read_chunk<R: Read + Seek>(
    reader: &mut BitReader<R>,
    code:   ChunkCode,
    field:  &'static str,
    fixes:  &mut Vec<Correction>,
) -> Result<Bits> {
    let offset = reader.position();
    let word = reader
        .read(code.encoded_bits())
        .map_err(|e| ArchiveError::from_read(e, offset))?;
    let decoded = code
        .decode(&word)
        .map_err(|source| ArchiveError::Corrupted { field, bit_offset: offset, source })?;

    if let Some(position) = decoded.corrected {
        let bit_offset = offset + position as u64 - 1;
        warn!(field, bit_offset, "corrected single-bit error");
        fixes.push(Correction { field, bit_offset });
    }
    Ok(decoded.data)
}

fn read_word<R: Read + Seek>(
    reader: &mut BitReader<R>,
    code:   ChunkCode,
    field:  &'static str,
    fixes:  &mut Vec<Correction>,
) -> Result<u64> {
    Ok(from_bits(&read_chunk(reader, code, field, fixes)?))
}

// ── ArchiveHeader ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArchiveHeader {
    pub files_number: u16,
}

impl ArchiveHeader {
    pub fn to_bits(&self) -> Bits {
        let mut bits = FILES_NUMBER_CODE.encode_word(self.files_number as u64);
        bits.resize(ARCHIVE_HEADER_BITS, false);
        bits
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut BitWriter<W>) -> io::Result<()> {
        writer.write(&self.to_bits())
    }

    /// Decode the header at the reader's cursor, leaving it on the first entry.
    pub fn read<R: Read + Seek>(reader: &mut BitReader<R>, fixes: &mut Vec<Correction>) -> Result<Self> {
        let files_number = read_word(reader, FILES_NUMBER_CODE, "files number", fixes)? as u16;
        let filler = (ARCHIVE_HEADER_BITS - FILES_NUMBER_CODE.encoded_bits()) as u64;
        let offset = reader.position();
        reader.skip(filler).map_err(|e| ArchiveError::from_read(e, offset))?;
        debug!(files_number, "read archive header");
        Ok(Self { files_number })
    }
}

// ── FileHeader ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Payload chunk width in bits.
    pub chunk_size: u16,
    /// Payload length in bits, before encoding.
    pub file_size:  u64,
    /// Zero bits written after the last payload codeword.
    pub padding:    u8,
    pub file_name:  String,
    code:           ChunkCode,
}

impl FileHeader {
    /// Describe a new entry.  Fails on names that do not fit the 150-byte
    /// slot and on chunk widths without a valid Hamming layout.
    pub fn new(file_name: &str, chunk_size: u16, file_size: u64) -> Result<Self> {
        validate_name(file_name)?;
        let code = ChunkCode::new(chunk_size as usize)?;
        Ok(Self {
            chunk_size,
            file_size,
            padding: padding_bits(file_size, code),
            file_name: file_name.to_owned(),
            code,
        })
    }

    pub fn code(&self) -> ChunkCode {
        self.code
    }

    /// Payload codewords; a short final chunk is zero-filled before encoding.
    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size as u64)
    }

    /// Bits between the end of this header and the next entry.  Saturates
    /// when the declared sizes cannot be represented; skipping that far
    /// then fails as end of data.
    pub fn encoded_payload_bits(&self) -> u64 {
        payload_bits(self.file_size, self.code, self.padding).unwrap_or(u64::MAX)
    }

    /// Payload length in bytes.
    pub fn size(&self) -> u64 {
        self.file_size.div_ceil(BITS_IN_BYTE as u64)
    }

    pub fn write<W: Write + Seek>(&self, writer: &mut BitWriter<W>) -> io::Result<()> {
        writer.write(&CHUNK_SIZE_CODE.encode_word(self.chunk_size as u64))?;
        writer.write(&FILE_SIZE_CODE.encode_word(self.file_size))?;
        writer.write(&PADDING_CODE.encode_word(self.padding as u64))?;

        let mut slot = self.file_name.as_bytes().to_vec();
        slot.resize(FILE_NAME_BYTES, 0);
        writer.write(&encode_string(&slot))
    }

    pub fn read<R: Read + Seek>(reader: &mut BitReader<R>, fixes: &mut Vec<Correction>) -> Result<Self> {
        let chunk_offset = reader.position();
        let chunk_size = read_word(reader, CHUNK_SIZE_CODE, "chunk size", fixes)? as u16;
        let file_size  = read_word(reader, FILE_SIZE_CODE, "file size", fixes)?;
        let padding    = read_word(reader, PADDING_CODE, "padding", fixes)? as u8;

        let mut slot = Vec::with_capacity(FILE_NAME_BYTES);
        for _ in 0..FILE_NAME_BYTES {
            slot.push(read_word(reader, ChunkCode::BYTE, "file name", fixes)? as u8);
        }
        let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        let file_name = String::from_utf8_lossy(&slot[..end]).into_owned();

        // A width that decodes cleanly but has no layout can only come from
        // multi-bit damage.
        let code = ChunkCode::new(chunk_size as usize).map_err(|source| ArchiveError::Corrupted {
            field: "chunk size",
            bit_offset: chunk_offset,
            source,
        })?;

        if payload_bits(file_size, code, padding).is_none() {
            return Err(ArchiveError::PayloadOverflow { file_size, bit_offset: chunk_offset });
        }

        debug!(%file_name, chunk_size, file_size, padding, "read file header");
        Ok(Self { chunk_size, file_size, padding, file_name, code })
    }
}

/// Smallest filler that ends the encoded payload on a byte boundary.
pub fn padding_bits(file_size: u64, code: ChunkCode) -> u8 {
    let byte = BITS_IN_BYTE as u64;
    let chunks = file_size.div_ceil(code.data_bits() as u64) % byte;
    let encoded = chunks * (code.encoded_bits() as u64 % byte) % byte;
    ((byte - encoded) % byte) as u8
}

/// Encoded payload length in bits, or `None` when it does not fit a `u64`.
fn payload_bits(file_size: u64, code: ChunkCode, padding: u8) -> Option<u64> {
    file_size
        .div_ceil(code.data_bits() as u64)
        .checked_mul(code.encoded_bits() as u64)?
        .checked_add(padding as u64)
}

fn validate_name(name: &str) -> Result<()> {
    if name.len() > FILE_NAME_BYTES {
        return Err(ArchiveError::NameTooLong {
            name:  name.to_owned(),
            len:   name.len(),
            limit: FILE_NAME_BYTES,
        });
    }
    if name.is_empty() || name.contains(['\0', '/', '\\']) {
        return Err(ArchiveError::InvalidName { name: name.to_owned() });
    }
    Ok(())
}

/// Zero bits of filler.
pub(crate) fn filler(len: usize) -> Vec<Bit> {
    vec![false; len]
}
