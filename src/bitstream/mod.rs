//! Bit-granular sequential I/O over byte-oriented storage.
//!
//! # Bit order
//! Stream bit `i` is bit `i % 8` of byte `i / 8`; bits are packed
//! least-significant first inside every byte.  [`BitReader`] and
//! [`BitWriter`] agree on this order, so a file read bit-by-bit and written
//! back bit-by-bit is byte-identical.
//!
//! Multi-bit integers are laid out MSB-first *in stream order*; use
//! [`to_bits`] / [`from_bits`] to convert.
//!
//! # Reader
//! [`BitReader`] works over any `Read + Seek` resource and keeps a 64 KiB
//! byte buffer.  `skip()` past the buffered region seeks the resource
//! instead of decoding the skipped bytes.
//!
//! # Writer
//! [`BitWriter`] accumulates bits in a 32 KiB buffer and writes whole
//! buffers.  `close()` flushes the trailing partial byte (unused bits are
//! zero) and then rewinds the resource to offset 0.  Archive code relies on
//! that rewind to rewrite the header right after appending an entry.

use std::io::{self, Read, Seek, SeekFrom, Write};

pub type Bit  = bool;
pub type Bits = Vec<Bit>;

pub const BITS_IN_BYTE: usize = 8;

/// Reader buffer capacity in bytes.
pub const READ_BUFFER_SIZE:  usize = 1 << 16;
/// Writer buffer capacity in bytes.
pub const WRITE_BUFFER_SIZE: usize = 1 << 15;

// ── Integer helpers ──────────────────────────────────────────────────────────

/// The low `width` bits of `value`, most significant first.
pub fn to_bits(value: u64, width: usize) -> Bits {
    debug_assert!(width <= 64, "cannot spread more than 64 bits");
    (0..width).rev().map(|shift| (value >> shift) & 1 == 1).collect()
}

/// Inverse of [`to_bits`].  Only the last 64 bits of longer input survive.
pub fn from_bits(bits: &[Bit]) -> u64 {
    bits.iter().fold(0u64, |acc, &bit| (acc << 1) | bit as u64)
}

fn end_of_data(bit_position: u64, wanted: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("bit stream exhausted at bit {bit_position} ({wanted} more bits requested)"),
    )
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct BitReader<R: Read + Seek> {
    reader:    R,
    buf:       Vec<u8>,
    /// Valid bytes in `buf`.
    filled:    usize,
    /// Bit cursor inside `buf`.
    pos:       usize,
    /// Resource offset of `buf[0]`.
    buf_start: u64,
}

impl<R: Read + Seek> BitReader<R> {
    /// Start reading at the resource's current position.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let buf_start = reader.stream_position()?;
        Ok(Self {
            reader,
            buf: vec![0u8; READ_BUFFER_SIZE],
            filled: 0,
            pos: 0,
            buf_start,
        })
    }

    /// Absolute bit offset of the cursor within the resource.
    pub fn position(&self) -> u64 {
        self.buf_start * BITS_IN_BYTE as u64 + self.pos as u64
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    #[inline]
    fn buffered_bits(&self) -> usize {
        self.filled * BITS_IN_BYTE - self.pos
    }

    /// Replace the (fully consumed) buffer with the next bytes of the resource.
    fn fill_buffer(&mut self) -> io::Result<()> {
        debug_assert_eq!(self.buffered_bits(), 0);
        self.buf_start += self.filled as u64;
        self.filled = 0;
        self.pos = 0;
        while self.filled < self.buf.len() {
            match self.reader.read(&mut self.buf[self.filled..]) {
                Ok(0) => break,
                Ok(n) => self.filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    #[inline]
    fn read_bit(&mut self) -> io::Result<Bit> {
        if self.buffered_bits() == 0 {
            self.fill_buffer()?;
            if self.filled == 0 {
                return Err(end_of_data(self.position(), 1));
            }
        }
        let bit = (self.buf[self.pos / BITS_IN_BYTE] >> (self.pos % BITS_IN_BYTE)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    /// Read exactly `n` bits.  Fails with `UnexpectedEof` when fewer remain.
    pub fn read(&mut self, n: usize) -> io::Result<Bits> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.read_bit()?);
        }
        Ok(out)
    }

    /// Advance the cursor by `n` bits.  Same cursor state and the same
    /// end-of-data failure as discarding `read(n)`.
    pub fn skip(&mut self, n: u64) -> io::Result<()> {
        if n <= self.buffered_bits() as u64 {
            self.pos += n as usize;
            return Ok(());
        }

        let resume   = self.buf_start + self.filled as u64;
        let len_bits = self.reader.seek(SeekFrom::End(0))?.saturating_mul(BITS_IN_BYTE as u64);
        let target   = self.position().checked_add(n).filter(|&t| t <= len_bits);
        let Some(target) = target else {
            self.reader.seek(SeekFrom::Start(resume))?;
            return Err(end_of_data(self.position(), n));
        };

        let byte = target / BITS_IN_BYTE as u64;
        self.reader.seek(SeekFrom::Start(byte))?;
        self.buf_start = byte;
        self.filled = 0;
        self.pos = 0;

        let bit = (target % BITS_IN_BYTE as u64) as usize;
        if bit > 0 {
            self.fill_buffer()?;
            self.pos = bit;
        }
        Ok(())
    }

    /// True once every bit of the resource has been consumed.
    pub fn eof(&mut self) -> io::Result<bool> {
        if self.buffered_bits() == 0 {
            self.fill_buffer()?;
        }
        Ok(self.buffered_bits() == 0)
    }

    /// Rewind to the first bit of the resource.
    pub fn refresh(&mut self) -> io::Result<()> {
        self.reader.seek(SeekFrom::Start(0))?;
        self.buf_start = 0;
        self.filled = 0;
        self.pos = 0;
        Ok(())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct BitWriter<W: Write + Seek> {
    writer:       W,
    buf:          Vec<u8>,
    /// Bits used in `buf`.
    pos:          usize,
    bits_written: u64,
}

impl<W: Write + Seek> BitWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buf: vec![0u8; WRITE_BUFFER_SIZE],
            pos: 0,
            bits_written: 0,
        }
    }

    /// Total bits accepted by `write` over the writer's lifetime.
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    #[inline]
    fn write_bit(&mut self, bit: Bit) -> io::Result<()> {
        if bit {
            self.buf[self.pos / BITS_IN_BYTE] |= 1 << (self.pos % BITS_IN_BYTE);
        }
        self.pos += 1;
        if self.pos == self.buf.len() * BITS_IN_BYTE {
            self.writer.write_all(&self.buf)?;
            self.buf.fill(0);
            self.pos = 0;
        }
        Ok(())
    }

    pub fn write(&mut self, bits: &[Bit]) -> io::Result<()> {
        for &bit in bits {
            self.write_bit(bit)?;
        }
        self.bits_written += bits.len() as u64;
        Ok(())
    }

    /// Flush buffered bits (zero-filling the last byte), then rewind the
    /// resource to offset 0 and reset buffering state.
    pub fn close(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            let bytes = self.pos.div_ceil(BITS_IN_BYTE);
            self.writer.write_all(&self.buf[..bytes])?;
        }
        self.writer.flush()?;
        self.writer.seek(SeekFrom::Start(0))?;
        self.buf.fill(0);
        self.pos = 0;
        Ok(())
    }

    /// Unflushed bits are discarded; call `close` first.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
