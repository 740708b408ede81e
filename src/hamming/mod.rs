//! Single-error-correcting Hamming code over fixed-width bit chunks.
//!
//! # Codeword layout
//! Codeword positions are 1-indexed.  Every power-of-two position `2^k`
//! holds a control bit; every other position holds a data bit, in the
//! chunk's original order.  Control bit `2^k` is the XOR of all positions
//! whose index has bit `k` set, so the XOR of the indices of all set bits
//! (the *syndrome*) is zero for a valid codeword and names the flipped
//! position when exactly one bit went bad.
//!
//! # Widths
//! A chunk of `d` data bits gets `r = floor(log2 d) + 1` control bits.  That
//! formula only yields a valid layout when `2^r >= d + r + 1`, which holds for
//! every width the archive uses (8, 16, 64) but not for e.g. 7 or 30.  Widths
//! are checked on every [`control_bits_for`] call and rejected when the
//! inequality fails.
//!
//! # Limitations
//! Two flipped bits never yield a zero syndrome, but the syndrome they do
//! yield usually names a third, healthy position.  Decoding then "corrects"
//! that position and returns wrong data without reporting an error.  Only
//! syndromes pointing outside the codeword are detected.

use thiserror::Error;

use crate::bitstream::{from_bits, to_bits, Bit, Bits, BITS_IN_BYTE};

/// Encoded width of one string byte: 8 data bits + 4 control bits.
pub const ENCODED_BYTE_BITS: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HammingError {
    #[error("chunk width of {0} bits has no single-error-correcting layout")]
    UnsupportedWidth(usize),
    #[error("codeword length mismatch: expected {expected} bits, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("uncorrectable codeword (syndrome {syndrome})")]
    Uncorrectable { syndrome: usize },
}

/// Control bits needed for `chunk_bits` data bits.
pub fn control_bits_for(chunk_bits: usize) -> Result<usize, HammingError> {
    if chunk_bits == 0 {
        return Err(HammingError::UnsupportedWidth(chunk_bits));
    }
    let r = chunk_bits.ilog2() as usize + 1;
    if r >= usize::BITS as usize || (1usize << r) < chunk_bits + r + 1 {
        return Err(HammingError::UnsupportedWidth(chunk_bits));
    }
    Ok(r)
}

pub fn encoded_size(chunk_bits: usize) -> Result<usize, HammingError> {
    Ok(chunk_bits + control_bits_for(chunk_bits)?)
}

fn syndrome(codeword: &[Bit]) -> usize {
    codeword
        .iter()
        .enumerate()
        .filter(|&(_, &bit)| bit)
        .fold(0, |acc, (i, _)| acc ^ (i + 1))
}

#[inline]
fn is_control_position(index: usize) -> bool {
    (index + 1).is_power_of_two()
}

/// Encode a chunk whose width is taken from `chunk.len()`.
pub fn encode(chunk: &[Bit]) -> Result<Bits, HammingError> {
    ChunkCode::new(chunk.len())?.encode(chunk)
}

/// Check and correct `codeword`, then strip its `control_bits` control
/// positions.
pub fn decode(codeword: &[Bit], control_bits: usize) -> Result<Decoded, HammingError> {
    let data_bits = codeword.len().saturating_sub(control_bits);
    let code = ChunkCode::new(data_bits)?;
    if code.control_bits != control_bits {
        return Err(HammingError::LengthMismatch {
            expected: code.encoded_bits(),
            found:    codeword.len(),
        });
    }
    code.decode(codeword)
}

/// Encode every byte of `bytes` as its own 12-bit codeword.
pub fn encode_string(bytes: &[u8]) -> Bits {
    let mut out = Vec::with_capacity(bytes.len() * ENCODED_BYTE_BITS);
    for &byte in bytes {
        out.extend(ChunkCode::BYTE.encode_word(byte as u64));
    }
    out
}

/// Decode a string written by [`encode_string`].  Any byte failing fails the
/// whole string.
pub fn decode_string(bits: &[Bit]) -> Result<Vec<u8>, HammingError> {
    if bits.len() % ENCODED_BYTE_BITS != 0 {
        return Err(HammingError::LengthMismatch {
            expected: bits.len().next_multiple_of(ENCODED_BYTE_BITS),
            found:    bits.len(),
        });
    }
    bits.chunks(ENCODED_BYTE_BITS)
        .map(|word| ChunkCode::BYTE.decode(word).map(|d| from_bits(&d.data) as u8))
        .collect()
}

// ── Decoded ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub data:      Bits,
    /// 1-indexed codeword position that was flipped back, if any.
    pub corrected: Option<usize>,
}

// ── ChunkCode ────────────────────────────────────────────────────────────────

/// A validated chunk width and its control bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCode {
    data_bits:    usize,
    control_bits: usize,
}

impl ChunkCode {
    /// The code used for string bytes.
    pub const BYTE: ChunkCode = ChunkCode::fixed(BITS_IN_BYTE);

    pub fn new(data_bits: usize) -> Result<Self, HammingError> {
        Ok(Self { data_bits, control_bits: control_bits_for(data_bits)? })
    }

    /// Const constructor for widths fixed by the file format.  Fails to
    /// compile when `data_bits` breaks the Hamming bound.
    pub const fn fixed(data_bits: usize) -> Self {
        let control_bits = data_bits.ilog2() as usize + 1;
        assert!(
            (1usize << control_bits) >= data_bits + control_bits + 1,
            "width breaks the Hamming bound"
        );
        Self { data_bits, control_bits }
    }

    pub const fn data_bits(&self) -> usize {
        self.data_bits
    }

    pub const fn control_bits(&self) -> usize {
        self.control_bits
    }

    pub const fn encoded_bits(&self) -> usize {
        self.data_bits + self.control_bits
    }

    pub fn encode(&self, chunk: &[Bit]) -> Result<Bits, HammingError> {
        if chunk.len() != self.data_bits {
            return Err(HammingError::LengthMismatch {
                expected: self.data_bits,
                found:    chunk.len(),
            });
        }

        Ok(self.seal(chunk))
    }

    /// Encode a possibly short final chunk, zero-filling it to full width.
    pub fn encode_padded(&self, chunk: &[Bit]) -> Bits {
        debug_assert!(chunk.len() <= self.data_bits);
        self.seal(chunk)
    }

    /// Encode the low `data_bits` bits of `value` (MSB-first).
    pub fn encode_word(&self, value: u64) -> Bits {
        self.seal(&to_bits(value, self.data_bits))
    }

    /// Interleave `data` with freshly computed control bits.  Missing data
    /// bits stay zero.
    fn seal(&self, data: &[Bit]) -> Bits {
        let mut codeword = vec![false; self.encoded_bits()];
        let mut data = data.iter();
        for (i, slot) in codeword.iter_mut().enumerate() {
            if !is_control_position(i) {
                if let Some(&bit) = data.next() {
                    *slot = bit;
                }
            }
        }

        let parity = syndrome(&codeword);
        for k in 0..self.control_bits {
            codeword[(1 << k) - 1] = (parity >> k) & 1 == 1;
        }
        codeword
    }

    pub fn decode(&self, codeword: &[Bit]) -> Result<Decoded, HammingError> {
        if codeword.len() != self.encoded_bits() {
            return Err(HammingError::LengthMismatch {
                expected: self.encoded_bits(),
                found:    codeword.len(),
            });
        }

        let mut word = codeword.to_vec();
        let mut corrected = None;

        let parity = syndrome(&word);
        if parity != 0 {
            if parity > word.len() {
                return Err(HammingError::Uncorrectable { syndrome: parity });
            }
            word[parity - 1] = !word[parity - 1];
            corrected = Some(parity);

            let recheck = syndrome(&word);
            if recheck != 0 {
                return Err(HammingError::Uncorrectable { syndrome: recheck });
            }
        }

        let data = word
            .iter()
            .enumerate()
            .filter(|(i, _)| !is_control_position(*i))
            .map(|(_, &bit)| bit)
            .collect();
        Ok(Decoded { data, corrected })
    }

    /// Decode and fold the data bits back into an integer.
    pub fn decode_word(&self, codeword: &[Bit]) -> Result<(u64, Option<usize>), HammingError> {
        let decoded = self.decode(codeword)?;
        Ok((from_bits(&decoded.data), decoded.corrected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WIDTHS: [usize; 3] = [8, 16, 64];

    fn flip(word: &[Bit], index: usize) -> Bits {
        let mut out = word.to_vec();
        out[index] = !out[index];
        out
    }

    #[test]
    fn control_bit_counts_for_archive_widths() {
        assert_eq!(control_bits_for(8), Ok(4));
        assert_eq!(control_bits_for(16), Ok(5));
        assert_eq!(control_bits_for(64), Ok(7));
        assert_eq!(encoded_size(8), Ok(12));
        assert_eq!(encoded_size(16), Ok(21));
        assert_eq!(encoded_size(64), Ok(71));
        assert_eq!(ChunkCode::new(8), Ok(ChunkCode::BYTE));
        assert_eq!(ChunkCode::new(64), Ok(ChunkCode::fixed(64)));
    }

    #[test]
    fn widths_breaking_the_hamming_bound_are_rejected() {
        for width in [0usize, 1, 2, 3, 7, 15, 30, 31, 63] {
            assert_eq!(control_bits_for(width), Err(HammingError::UnsupportedWidth(width)), "{width}");
        }
        for width in [4usize, 24, 32, 128, 1024] {
            let r = control_bits_for(width).unwrap();
            assert!((1usize << r) >= width + r + 1, "{width}");
        }
    }

    #[test]
    fn control_bits_land_on_powers_of_two() {
        // Data 0xFF: syndrome of data positions 3,5,6,7,9,10,11,12 is 0b0011.
        let word = encode(&[true; 8]).unwrap();
        assert_eq!(
            word,
            vec![true, true, true, false, true, true, true, false, true, true, true, true]
        );
        assert_eq!(encode(&[false; 8]).unwrap(), vec![false; 12]);
    }

    #[test]
    fn encode_word_matches_encode() {
        for value in [0u64, 1, 0x48, 0xA5, 0xFF] {
            assert_eq!(ChunkCode::BYTE.encode_word(value), encode(&to_bits(value, 8)).unwrap());
        }
        let code = ChunkCode::new(64).unwrap();
        let value = 0x0123_4567_89AB_CDEF;
        assert_eq!(code.encode_word(value), code.encode(&to_bits(value, 64)).unwrap());
    }

    #[test]
    fn short_final_chunk_is_zero_filled() {
        let code = ChunkCode::new(16).unwrap();
        let word = code.encode_padded(&to_bits(0xAB, 8));
        assert_eq!(code.decode_word(&word), Ok((0xAB00, None)));
    }

    #[test]
    fn clean_roundtrip_every_width() {
        for width in WIDTHS {
            let code = ChunkCode::new(width).unwrap();
            for seed in 0u64..64 {
                let value = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> (64 - width);
                let word = code.encode_word(value);
                assert_eq!(code.decode_word(&word), Ok((value, None)), "width {width} value {value:#x}");
                let decoded = decode(&word, code.control_bits()).unwrap();
                assert_eq!(decoded.data, to_bits(value, width));
            }
        }
    }

    #[test]
    fn every_single_flip_of_every_byte_is_corrected() {
        for byte in 0u64..=255 {
            let word = ChunkCode::BYTE.encode_word(byte);
            for i in 0..word.len() {
                assert_eq!(
                    ChunkCode::BYTE.decode_word(&flip(&word, i)),
                    Ok((byte, Some(i + 1))),
                    "byte {byte:#04x} flip {i}"
                );
            }
        }
    }

    #[test]
    fn every_single_flip_of_wide_chunks_is_corrected() {
        for width in [16usize, 64] {
            let code = ChunkCode::new(width).unwrap();
            for value in [0u64, 1, 0xBEEF, u64::MAX >> (64 - width), 0x5555_5555_5555_5555 >> (64 - width)] {
                let word = code.encode_word(value);
                for i in 0..word.len() {
                    assert_eq!(code.decode_word(&flip(&word, i)), Ok((value, Some(i + 1))));
                }
            }
        }
    }

    /// Records the known double-flip limitation: a double flip is never
    /// reported clean, but most pairs are silently miscorrected.
    #[test]
    fn double_flips_are_detected_or_silently_miscorrected() {
        // (width, detected pairs, silently miscorrected pairs)
        for (width, detected, silent) in [(8usize, 15usize, 51usize), (16, 60, 150)] {
            let code = ChunkCode::new(width).unwrap();
            let value = 0xA5A5 >> (16 - width);
            let word = code.encode_word(value);
            let len = word.len();

            let mut seen_detected = 0;
            let mut seen_silent = Vec::new();
            for a in 0..len {
                for b in a + 1..len {
                    let damaged = flip(&flip(&word, a), b);
                    match code.decode_word(&damaged) {
                        Err(HammingError::Uncorrectable { syndrome }) => {
                            assert!(syndrome > len);
                            seen_detected += 1;
                        }
                        Ok((got, corrected)) => {
                            assert_ne!(got, value, "pair ({a}, {b}) decoded to the original");
                            assert_eq!(corrected, Some((a + 1) ^ (b + 1)));
                            seen_silent.push((a + 1, b + 1));
                        }
                        Err(other) => panic!("unexpected {other:?}"),
                    }
                }
            }
            assert_eq!(seen_detected, detected, "width {width}");
            assert_eq!(seen_silent.len(), silent, "width {width}");
            assert!(seen_silent.iter().all(|&(p, q)| p ^ q <= len));
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        assert_eq!(
            ChunkCode::BYTE.decode(&[false; 11]),
            Err(HammingError::LengthMismatch { expected: 12, found: 11 })
        );
        assert!(matches!(decode(&[false; 21], 4), Err(HammingError::LengthMismatch { .. })));
        assert!(matches!(
            ChunkCode::new(16).unwrap().encode(&[true; 8]),
            Err(HammingError::LengthMismatch { expected: 16, found: 8 })
        ));
    }

    #[test]
    fn strings_roundtrip_and_correct_per_byte() {
        let mut name = b"hello.txt".to_vec();
        name.resize(150, 0);
        let encoded = encode_string(&name);
        assert_eq!(encoded.len(), 150 * ENCODED_BYTE_BITS);
        assert_eq!(decode_string(&encoded).unwrap(), name);

        // One flip in each of several bytes is still fine.
        let mut damaged = encoded.clone();
        for byte in [0usize, 4, 8, 149] {
            let i = byte * ENCODED_BYTE_BITS + byte % ENCODED_BYTE_BITS;
            damaged[i] = !damaged[i];
        }
        assert_eq!(decode_string(&damaged).unwrap(), name);
    }

    #[test]
    fn string_fails_when_any_byte_fails() {
        let encoded = encode_string(b"ab");
        // Positions 6 and 9 of the second byte: syndrome 15 lies outside the word.
        let mut damaged = encoded.clone();
        damaged[ENCODED_BYTE_BITS + 5] = !damaged[ENCODED_BYTE_BITS + 5];
        damaged[ENCODED_BYTE_BITS + 8] = !damaged[ENCODED_BYTE_BITS + 8];
        assert_eq!(decode_string(&damaged), Err(HammingError::Uncorrectable { syndrome: 15 }));
        assert!(matches!(decode_string(&encoded[..13]), Err(HammingError::LengthMismatch { .. })));
    }

    proptest! {
        #[test]
        fn random_wide_chunks_survive_one_flip(value in any::<u64>(), index in 0usize..71) {
            let code = ChunkCode::new(64).unwrap();
            let word = code.encode_word(value);
            prop_assert_eq!(code.decode_word(&flip(&word, index)), Ok((value, Some(index + 1))));
        }

        #[test]
        fn random_sixteen_bit_chunks_roundtrip(value in any::<u16>()) {
            let code = ChunkCode::new(16).unwrap();
            let word = code.encode(&to_bits(value as u64, 16)).unwrap();
            prop_assert_eq!(code.decode_word(&word), Ok((value as u64, None)));
        }
    }
}
