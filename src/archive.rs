//! High-level [`Archive`] API, the main embedding surface.
//!
//! ```no_run
//! use hamarc::archive::Archive;
//!
//! // Write
//! let mut ar = Archive::create("out.ham")?;
//! ar.append_bytes("readme.txt", b"Hello, world!", 8)?;
//!
//! // Read
//! let mut ar = Archive::open("out.ham")?;
//! assert_eq!(ar.list_files()?, vec!["readme.txt".to_string()]);
//! assert_eq!(ar.read_file("readme.txt")?, b"Hello, world!");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Scanning
//! The format has no index.  Every read operation starts at bit 0, decodes
//! the archive header, then walks the entries in order: each file header is
//! decoded and its payload is either decoded or skipped using the sizes the
//! header declares.
//!
//! # Appending
//! A new entry is written right after the last entry the header counts;
//! only then is the archive header rewritten in place with the incremented
//! count.  An append interrupted half-way leaves trailing bytes that readers
//! never reach, and the next append writes over them.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bitstream::{Bit, BitReader, BitWriter, BITS_IN_BYTE};
use crate::error::{ArchiveError, Result};
use crate::header::{filler, read_chunk, ArchiveHeader, Correction, FileHeader};

// ── FileInfo ──────────────────────────────────────────────────────────────────

/// Lightweight descriptor returned by [`Archive::entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name:         String,
    pub chunk_bits:   u16,
    /// Payload size in bytes.
    pub size:         u64,
    /// Encoded payload length in bits, padding included.
    pub encoded_bits: u64,
}

impl From<&FileHeader> for FileInfo {
    fn from(h: &FileHeader) -> Self {
        FileInfo {
            name:         h.file_name.clone(),
            chunk_bits:   h.chunk_size,
            size:         h.size(),
            encoded_bits: h.encoded_payload_bits(),
        }
    }
}

// ── VerifyReport ──────────────────────────────────────────────────────────────

/// Outcome of [`Archive::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub files:         usize,
    /// Payload codewords decoded.
    pub chunks:        u64,
    /// Single-bit errors repaired in memory, headers included.
    pub corrections:   Vec<Correction>,
    /// Bytes exist after the last entry.
    pub trailing_data: bool,
}

// ── Scan ──────────────────────────────────────────────────────────────────────

/// One forward pass over the entries of an archive.
struct Scan<'a, S: Read + Seek> {
    reader:      BitReader<&'a mut S>,
    remaining:   u16,
    corrections: Vec<Correction>,
}

impl<S: Read + Seek> Scan<'_, S> {
    fn next_header(&mut self) -> Result<Option<FileHeader>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        FileHeader::read(&mut self.reader, &mut self.corrections).map(Some)
    }

    fn skip_payload(&mut self, header: &FileHeader) -> Result<()> {
        let offset = self.reader.position();
        debug!(file_name = %header.file_name, bits = header.encoded_payload_bits(), "skipping payload");
        self.reader
            .skip(header.encoded_payload_bits())
            .map_err(|e| ArchiveError::from_read(e, offset))
    }

    /// Decode every payload chunk, handing the recovered bits to `emit`.
    /// Returns the number of codewords decoded.
    fn decode_payload<F>(&mut self, header: &FileHeader, mut emit: F) -> Result<u64>
    where
        F: FnMut(&[Bit]) -> Result<()>,
    {
        let code = header.code();
        let mut remaining = header.file_size;
        let chunks = header.chunk_count();
        for _ in 0..chunks {
            let data = read_chunk(&mut self.reader, code, "payload chunk", &mut self.corrections)?;
            let take = remaining.min(code.data_bits() as u64) as usize;
            emit(&data[..take])?;
            remaining -= take as u64;
        }

        let offset = self.reader.position();
        self.reader
            .skip(header.padding as u64)
            .map_err(|e| ArchiveError::from_read(e, offset))?;
        Ok(chunks)
    }
}

// ── Archive ───────────────────────────────────────────────────────────────────

/// An open archive.  Owns its backing resource for the session's lifetime.
pub struct Archive<S> {
    storage:      S,
    files_number: u16,
}

impl Archive<File> {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Create an empty archive at `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|source| ArchiveError::ArchiveUnavailable { path: path.to_owned(), source })?;
        info!(path = %path.display(), "created empty archive");
        Self::create_in(file)
    }

    /// Open an existing archive read-only.  Appends through this session
    /// fail with an I/O error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|source| ArchiveError::ArchiveUnavailable { path: path.to_owned(), source })?;
        Self::open_in(file)
    }

    /// Open an existing archive for appending.
    pub fn open_append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| ArchiveError::ArchiveUnavailable { path: path.to_owned(), source })?;
        Self::open_in(file)
    }
}

impl<S: Read + Seek> Archive<S> {
    /// Wrap existing archive bytes and decode the header.
    pub fn open_in(storage: S) -> Result<Self> {
        let mut archive = Self { storage, files_number: 0 };
        archive.files_number = archive.read_files_number()?;
        Ok(archive)
    }

    /// Entry count as of the last header read.
    pub fn files_number(&self) -> u16 {
        self.files_number
    }

    pub fn into_inner(self) -> S {
        self.storage
    }

    fn read_files_number(&mut self) -> Result<u16> {
        Ok(self.scan()?.remaining)
    }

    /// Bit offset just past the last counted entry.
    fn end_of_entries(&mut self) -> Result<u64> {
        let mut scan = self.scan()?;
        while let Some(header) = scan.next_header()? {
            scan.skip_payload(&header)?;
        }
        Ok(scan.reader.position())
    }

    /// Rewind, re-derive the entry count and position on the first entry.
    fn scan(&mut self) -> Result<Scan<'_, S>> {
        let mut reader = BitReader::new(&mut self.storage)?;
        reader.refresh()?;
        let mut corrections = Vec::new();
        let header = ArchiveHeader::read(&mut reader, &mut corrections)?;
        self.files_number = header.files_number;
        Ok(Scan { reader, remaining: header.files_number, corrections })
    }

    /// Names of every entry, in the order they were appended.
    pub fn list_files(&mut self) -> Result<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|info| info.name).collect())
    }

    /// Decode every file header, skipping payloads.
    pub fn entries(&mut self) -> Result<Vec<FileInfo>> {
        let mut scan = self.scan()?;
        let mut out = Vec::with_capacity(scan.remaining as usize);
        while let Some(header) = scan.next_header()? {
            scan.skip_payload(&header)?;
            out.push(FileInfo::from(&header));
        }
        Ok(out)
    }

    /// Extract the entries whose names appear in `names` into `dest`.
    /// Returns the names written, in archive order.
    pub fn extract_files<N, P>(&mut self, names: &[N], dest: P) -> Result<Vec<String>>
    where
        N: AsRef<str>,
        P: AsRef<Path>,
    {
        let extracted = self.extract_where(dest.as_ref(), |name| {
            names.iter().any(|wanted| wanted.as_ref() == name)
        })?;
        for wanted in names {
            if !extracted.iter().any(|name| name == wanted.as_ref()) {
                warn!(name = wanted.as_ref(), "requested file not found in archive");
            }
        }
        Ok(extracted)
    }

    /// Extract every entry into `dest`.
    pub fn extract_all_files<P: AsRef<Path>>(&mut self, dest: P) -> Result<Vec<String>> {
        self.extract_where(dest.as_ref(), |_| true)
    }

    fn extract_where<F>(&mut self, dest: &Path, wanted: F) -> Result<Vec<String>>
    where
        F: Fn(&str) -> bool,
    {
        fs::create_dir_all(dest)
            .map_err(|source| ArchiveError::DestinationUnwritable { path: dest.to_owned(), source })?;

        let mut scan = self.scan()?;
        let mut extracted = Vec::new();
        while let Some(header) = scan.next_header()? {
            if !wanted(header.file_name.as_str()) {
                scan.skip_payload(&header)?;
                continue;
            }
            check_entry_name(&header.file_name)?;

            let target = dest.join(&header.file_name);
            let unwritable = |source: io::Error| ArchiveError::DestinationUnwritable { path: target.clone(), source };
            let file = File::create(&target).map_err(unwritable)?;
            let mut writer = BitWriter::new(file);
            let written = scan
                .decode_payload(&header, |bits| writer.write(bits).map_err(unwritable))
                .and_then(|_| writer.close().map_err(unwritable));
            if let Err(err) = written {
                drop(writer);
                if let Err(e) = fs::remove_file(&target) {
                    warn!(target = %target.display(), error = %e, "could not remove partial output");
                }
                return Err(err);
            }

            info!(file_name = %header.file_name, target = %target.display(), "extracted");
            extracted.push(header.file_name);
        }
        Ok(extracted)
    }

    /// Decode the first entry called `name` into memory.
    pub fn read_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let mut scan = self.scan()?;
        while let Some(header) = scan.next_header()? {
            if header.file_name != name {
                scan.skip_payload(&header)?;
                continue;
            }
            let mut writer = BitWriter::new(Cursor::new(Vec::new()));
            scan.decode_payload(&header, |bits| Ok(writer.write(bits)?))?;
            writer.close()?;
            return Ok(writer.into_inner().into_inner());
        }
        Err(ArchiveError::EntryNotFound { name: name.to_owned() })
    }

    /// Decode every codeword of every entry without writing anything.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let mut scan = self.scan()?;
        let mut report = VerifyReport::default();
        while let Some(header) = scan.next_header()? {
            report.chunks += scan.decode_payload(&header, |_| Ok(()))?;
            report.files += 1;
        }
        report.trailing_data = !scan.reader.eof()?;
        report.corrections = scan.corrections;
        if report.trailing_data {
            warn!("archive has data after its last entry");
        }
        Ok(report)
    }
}

impl<S: Read + Write + Seek> Archive<S> {
    /// Write an empty archive header at the start of `storage`.
    pub fn create_in(mut storage: S) -> Result<Self> {
        {
            let mut writer = BitWriter::new(&mut storage);
            ArchiveHeader::default().write(&mut writer)?;
            writer.close()?;
        }
        Ok(Self { storage, files_number: 0 })
    }

    /// Append the file at `path` under its final path component.
    pub fn append_file<P: AsRef<Path>>(&mut self, path: P, chunk_bits: u16) -> Result<()> {
        let path = path.as_ref();
        let data = fs::read(path)
            .map_err(|source| ArchiveError::SourceUnreadable { path: path.to_owned(), source })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ArchiveError::InvalidName { name: path.display().to_string() })?;
        self.append_bytes(name, &data, chunk_bits)
    }

    /// Append `data` as a new entry, encoding it in `chunk_bits`-wide chunks,
    /// then rewrite the archive header.
    pub fn append_bytes(&mut self, name: &str, data: &[u8], chunk_bits: u16) -> Result<()> {
        let header = FileHeader::new(name, chunk_bits, data.len() as u64 * BITS_IN_BYTE as u64)?;
        let code = header.code();
        let end = self.end_of_entries()?;
        let files_number = self.files_number;
        let next = files_number
            .checked_add(1)
            .ok_or(ArchiveError::ArchiveFull(files_number))?;

        // Entries are byte-aligned, so `end` is a whole number of bytes.
        self.storage.seek(SeekFrom::Start(end / BITS_IN_BYTE as u64))?;
        let mut writer = BitWriter::new(&mut self.storage);
        header.write(&mut writer)?;

        let mut payload = BitReader::new(Cursor::new(data))?;
        let mut remaining = header.file_size;
        while !payload.eof()? {
            let take = remaining.min(code.data_bits() as u64) as usize;
            let chunk = payload.read(take)?;
            writer.write(&code.encode_padded(&chunk))?;
            remaining -= take as u64;
        }
        writer.write(&filler(header.padding as usize))?;
        let written = writer.bits_written();

        // close() rewinds, so the header rewrite lands at offset 0.
        writer.close()?;
        ArchiveHeader { files_number: next }.write(&mut writer)?;
        writer.close()?;
        self.files_number = next;

        info!(
            file_name = %header.file_name,
            chunk_bits,
            bytes = data.len(),
            encoded_bits = written,
            files_number = next,
            "appended file"
        );
        Ok(())
    }
}

/// Names that would escape the destination directory are refused.
fn check_entry_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ArchiveError::UnsafeEntryName { name: name.to_owned() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FILE_HEADER_BITS;

    fn memory_archive() -> Archive<Cursor<Vec<u8>>> {
        Archive::create_in(Cursor::new(Vec::new())).unwrap()
    }

    #[test]
    fn fresh_archive_has_zero_files() {
        let ar = memory_archive();
        let bytes = ar.into_inner().into_inner();
        assert_eq!(bytes, vec![0u8; 3]);

        let mut ar = Archive::open_in(Cursor::new(bytes)).unwrap();
        assert_eq!(ar.files_number(), 0);
        assert!(ar.list_files().unwrap().is_empty());
    }

    #[test]
    fn append_layout_matches_header_arithmetic() {
        let mut ar = memory_archive();
        ar.append_bytes("hello.txt", &[0x48, 0x65, 0x6C, 0x6C, 0x6F], 8).unwrap();
        assert_eq!(ar.files_number(), 1);

        let bytes = ar.into_inner().into_inner();
        // 3 header bytes + 238 file header bytes + 64 payload bits.
        assert_eq!(bytes.len(), 3 + FILE_HEADER_BITS / 8 + 8);

        let mut ar = Archive::open_in(Cursor::new(bytes)).unwrap();
        assert_eq!(ar.files_number(), 1);
        assert_eq!(
            ar.entries().unwrap(),
            vec![FileInfo { name: "hello.txt".into(), chunk_bits: 8, size: 5, encoded_bits: 64 }]
        );
        assert_eq!(ar.read_file("hello.txt").unwrap(), b"Hello".to_vec());
    }

    #[test]
    fn every_archive_width_roundtrips() {
        let data: Vec<u8> = (0u8..=255).rev().cycle().take(1001).collect();
        let mut ar = memory_archive();
        for bits in [8u16, 16, 64, 24] {
            ar.append_bytes(&format!("w{bits}"), &data, bits).unwrap();
        }
        for bits in [8u16, 16, 64, 24] {
            assert_eq!(ar.read_file(&format!("w{bits}")).unwrap(), data, "width {bits}");
        }
        let report = ar.verify().unwrap();
        assert_eq!(report.files, 4);
        assert!(report.corrections.is_empty());
        assert!(!report.trailing_data);
    }

    #[test]
    fn empty_payload_is_allowed() {
        let mut ar = memory_archive();
        ar.append_bytes("empty", &[], 8).unwrap();
        ar.append_bytes("after", b"x", 8).unwrap();
        assert_eq!(ar.read_file("empty").unwrap(), Vec::<u8>::new());
        assert_eq!(ar.read_file("after").unwrap(), b"x".to_vec());
    }

    #[test]
    fn single_flips_in_payload_are_repaired_and_reported() {
        let mut ar = memory_archive();
        ar.append_bytes("a.bin", &[0xDE, 0xAD, 0xBE, 0xEF], 16).unwrap();
        let mut bytes = ar.into_inner().into_inner();

        // First payload bit sits right after the two headers.
        let payload_start = 24 + FILE_HEADER_BITS;
        for bit in [payload_start + 2, payload_start + 21 + 20] {
            bytes[bit / 8] ^= 1 << (bit % 8);
        }

        let mut ar = Archive::open_in(Cursor::new(bytes)).unwrap();
        assert_eq!(ar.read_file("a.bin").unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let report = ar.verify().unwrap();
        assert_eq!(report.chunks, 2);
        let offsets: Vec<u64> = report.corrections.iter().map(|c| c.bit_offset).collect();
        assert_eq!(offsets, vec![(payload_start + 2) as u64, (payload_start + 41) as u64]);
        assert!(report.corrections.iter().all(|c| c.field == "payload chunk"));
    }

    #[test]
    fn uncorrectable_payload_aborts() {
        let mut ar = memory_archive();
        ar.append_bytes("a.bin", b"ab", 8).unwrap();
        let mut bytes = ar.into_inner().into_inner();

        // Positions 6 and 9 of the first codeword: syndrome 15 is outside it.
        let payload_start = 24 + FILE_HEADER_BITS;
        for bit in [payload_start + 5, payload_start + 8] {
            bytes[bit / 8] ^= 1 << (bit % 8);
        }

        let mut ar = Archive::open_in(Cursor::new(bytes)).unwrap();
        // Listing skips payloads, so it still works.
        assert_eq!(ar.list_files().unwrap(), vec!["a.bin".to_string()]);
        let err = ar.read_file("a.bin").unwrap_err();
        assert!(
            matches!(err, ArchiveError::Corrupted { field: "payload chunk", bit_offset, .. } if bit_offset == payload_start as u64),
            "{err}"
        );
        assert!(ar.verify().is_err());
    }

    #[test]
    fn header_count_beyond_entries_is_truncation() {
        let mut ar = memory_archive();
        ar.append_bytes("only", b"1", 8).unwrap();
        let mut storage = ar.into_inner();

        // Claim two entries.
        {
            let mut writer = BitWriter::new(&mut storage);
            ArchiveHeader { files_number: 2 }.write(&mut writer).unwrap();
            writer.close().unwrap();
        }

        let mut ar = Archive::open_in(storage).unwrap();
        assert!(matches!(ar.list_files(), Err(ArchiveError::Truncated { .. })));
    }

    #[test]
    fn trailing_bytes_are_flagged_by_verify() {
        let mut ar = memory_archive();
        ar.append_bytes("x", b"xyz", 8).unwrap();
        let mut bytes = ar.into_inner().into_inner();
        bytes.extend_from_slice(&[0xAA; 7]);

        let mut ar = Archive::open_in(Cursor::new(bytes)).unwrap();
        assert_eq!(ar.list_files().unwrap(), vec!["x".to_string()]);
        assert!(ar.verify().unwrap().trailing_data);
    }

    #[test]
    fn append_overwrites_bytes_left_by_an_interrupted_append() {
        let mut ar = memory_archive();
        ar.append_bytes("a", b"a", 8).unwrap();
        let mut storage = ar.into_inner();
        storage.get_mut().extend_from_slice(&[0u8; 5]);

        let mut ar = Archive::open_in(storage).unwrap();
        ar.append_bytes("b", b"b", 8).unwrap();
        assert_eq!(ar.files_number(), 2);
        assert_eq!(ar.list_files().unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(ar.read_file("b").unwrap(), b"b".to_vec());
        assert!(!ar.verify().unwrap().trailing_data);
    }

    /// One entry whose header claims `file_size` payload bits but carries none.
    fn archive_claiming(file_size: u64) -> Cursor<Vec<u8>> {
        use crate::hamming::encode_string;
        use crate::header::{CHUNK_SIZE_CODE, FILE_NAME_BYTES, FILE_SIZE_CODE, PADDING_CODE};

        let mut slot = b"evil".to_vec();
        slot.resize(FILE_NAME_BYTES, 0);
        let mut storage = Cursor::new(Vec::new());
        {
            let mut w = BitWriter::new(&mut storage);
            ArchiveHeader { files_number: 1 }.write(&mut w).unwrap();
            w.write(&CHUNK_SIZE_CODE.encode_word(8)).unwrap();
            w.write(&FILE_SIZE_CODE.encode_word(file_size)).unwrap();
            w.write(&PADDING_CODE.encode_word(0)).unwrap();
            w.write(&encode_string(&slot)).unwrap();
            w.close().unwrap();
        }
        storage
    }

    #[test]
    fn unrepresentable_payload_size_is_an_error() {
        let mut ar = Archive::open_in(archive_claiming(u64::MAX)).unwrap();
        let err = ar.list_files().unwrap_err();
        assert!(
            matches!(err, ArchiveError::PayloadOverflow { file_size: u64::MAX, bit_offset: 24 }),
            "{err}"
        );
        assert!(ar.read_file("evil").is_err());
        assert!(ar.verify().is_err());
    }

    #[test]
    fn oversized_payload_claim_is_truncation() {
        let mut ar = Archive::open_in(archive_claiming(1 << 62)).unwrap();
        assert!(matches!(ar.list_files(), Err(ArchiveError::Truncated { .. })));
        assert!(matches!(ar.read_file("evil"), Err(ArchiveError::Truncated { .. })));
    }

    #[test]
    fn missing_entry_is_reported() {
        let mut ar = memory_archive();
        assert!(matches!(ar.read_file("nope"), Err(ArchiveError::EntryNotFound { .. })));
    }

    #[test]
    fn unsafe_names_are_refused() {
        for name in ["", ".", "..", "a/b", "..\\x"] {
            assert!(check_entry_name(name).is_err(), "{name:?}");
        }
        assert!(check_entry_name("notes.txt").is_ok());
    }
}
