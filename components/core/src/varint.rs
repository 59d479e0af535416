//! C1 — byte reader and the two varint encodings this indexer has to speak: Bitcoin's
//! compact-size varint (transaction wire format) and Bitcoin Core's varint-B128 (the
//! `blocks/index` LevelDB value encoding). These are unrelated formats that happen to both be
//! called "varint" in Bitcoin Core's own source, so they get separate functions rather than a
//! shared trait.

use std::io::{self, Read};

use ord::outpoint::TxHash;

pub const MAX_VARINT_B128_LEN: usize = 9;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("varint-B128 value exceeded the maximum encodable length")]
    VarintB128Overflow,
    #[error("compact-size varint overflowed u64")]
    CompactVarintOverflow,
    #[error("declared length {0} exceeds configured maximum {1}")]
    LengthExceedsMax(u64, u64),
    #[error("unexpected magic bytes {0:08x}, expected {1:08x}")]
    BadMagic(u32, u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Wraps any `Read` with Bitcoin wire-format primitive decoders. `R` is not required to be
/// `Seek`; C2 re-opens a fresh reader positioned at the right file offset rather than seeking
/// mid-stream, so a plain buffered reader is enough here.
pub struct ByteReader<R> {
    inner: R,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        ByteReader { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let mut buf = [0u8; 1];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("u8"))?;
        Ok(buf[0])
    }

    pub fn read_u16_le(&mut self) -> Result<u16, DecodeError> {
        let mut buf = [0u8; 2];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("u16"))?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("u32"))?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("u64"))?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_exact_vec(&mut self, n: usize) -> Result<Vec<u8>, DecodeError> {
        let mut buf = vec![0u8; n];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("fixed-length bytes"))?;
        Ok(buf)
    }

    pub fn read_hash32(&mut self) -> Result<TxHash, DecodeError> {
        let mut buf = [0u8; 32];
        self.inner
            .read_exact(&mut buf)
            .map_err(|_| DecodeError::UnexpectedEof("32-byte hash"))?;
        Ok(TxHash(buf))
    }

    /// Bitcoin's compact-size varint (transaction/script wire format, §4.1).
    pub fn read_compact_varint(&mut self) -> Result<u64, DecodeError> {
        let first = self.read_u8()?;
        Ok(match first {
            0xFD => self.read_u16_le()? as u64,
            0xFE => self.read_u32_le()? as u64,
            0xFF => self.read_u64_le()?,
            n => n as u64,
        })
    }

    /// Reads `len`, failing if it exceeds `max` — the generic defense-against-malformed-files
    /// check named in §4.1.
    pub fn read_bounded_compact_varint(&mut self, max: u64) -> Result<u64, DecodeError> {
        let len = self.read_compact_varint()?;
        if len > max {
            return Err(DecodeError::LengthExceedsMax(len, max));
        }
        Ok(len)
    }
}

/// Bitcoin Core's "varint-B128": accumulate 7 bits per byte, MSB continues, add 1 after each
/// continuation byte. Operates over an in-memory slice (LevelDB values are read whole) rather
/// than a `Read`, returning the decoded value and how many bytes it consumed.
pub fn decode_varint_b128(bytes: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut value: u64 = 0;
    for (consumed, &byte) in bytes.iter().enumerate() {
        if consumed >= MAX_VARINT_B128_LEN {
            return Err(DecodeError::VarintB128Overflow);
        }
        value = value
            .checked_shl(7)
            .ok_or(DecodeError::VarintB128Overflow)?
            | (byte & 0x7F) as u64;
        if byte & 0x80 != 0 {
            value = value.checked_add(1).ok_or(DecodeError::VarintB128Overflow)?;
        } else {
            return Ok((value, consumed + 1));
        }
    }
    Err(DecodeError::UnexpectedEof("varint-B128"))
}

pub fn encode_varint_b128(mut value: u64) -> Vec<u8> {
    let mut tmp = Vec::with_capacity(MAX_VARINT_B128_LEN);
    loop {
        tmp.push((value & 0x7F) as u8);
        if value <= 0x7F {
            break;
        }
        value = (value >> 7) - 1;
    }
    let mut out = Vec::with_capacity(tmp.len());
    for (i, &byte) in tmp.iter().rev().enumerate() {
        if i + 1 == tmp.len() {
            out.push(byte);
        } else {
            out.push(byte | 0x80);
        }
    }
    out
}

pub fn encode_compact_varint(value: u64) -> Vec<u8> {
    if value < 0xFD {
        vec![value as u8]
    } else if value <= u16::MAX as u64 {
        let mut out = vec![0xFD];
        out.extend_from_slice(&(value as u16).to_le_bytes());
        out
    } else if value <= u32::MAX as u64 {
        let mut out = vec![0xFE];
        out.extend_from_slice(&(value as u32).to_le_bytes());
        out
    } else {
        let mut out = vec![0xFF];
        out.extend_from_slice(&value.to_le_bytes());
        out
    }
}

pub fn decode_compact_varint(bytes: &[u8]) -> Result<u64, DecodeError> {
    let mut reader = ByteReader::new(bytes);
    reader.read_compact_varint()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case(0 ; "zero")]
    #[test_case(1 ; "one")]
    #[test_case(0xFC ; "just below first prefix")]
    #[test_case(0xFD ; "first prefix boundary")]
    #[test_case(0xFFFF ; "u16 max")]
    #[test_case(0x1_0000 ; "just above u16 max")]
    #[test_case(u32::MAX as u64 ; "u32 max")]
    #[test_case(u32::MAX as u64 + 1 ; "just above u32 max")]
    #[test_case(u64::MAX ; "u64 max")]
    fn compact_varint_round_trips(value: u64) {
        let encoded = encode_compact_varint(value);
        assert_eq!(decode_compact_varint(&encoded).unwrap(), value);
    }

    #[test_case(0 ; "zero")]
    #[test_case(1 ; "one")]
    #[test_case(127 ; "single byte boundary")]
    #[test_case(128 ; "first continuation")]
    #[test_case(16384 ; "three byte value")]
    #[test_case(767_430 ; "a real block height")]
    #[test_case(u32::MAX as u64 ; "u32 max")]
    fn varint_b128_round_trips(value: u64) {
        let encoded = encode_varint_b128(value);
        let (decoded, consumed) = decode_varint_b128(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn compact_varint_single_byte_form_matches_spec_table() {
        assert_eq!(encode_compact_varint(0xFC), vec![0xFC]);
        assert_eq!(encode_compact_varint(0xFD)[0], 0xFD);
        assert_eq!(encode_compact_varint(0x1_0000)[0], 0xFE);
        assert_eq!(encode_compact_varint(u32::MAX as u64 + 1)[0], 0xFF);
    }

    #[test]
    fn read_bounded_compact_varint_rejects_oversized_length() {
        let mut reader = ByteReader::new(&encode_compact_varint(1_000)[..]);
        assert!(matches!(
            reader.read_bounded_compact_varint(100),
            Err(DecodeError::LengthExceedsMax(1_000, 100))
        ));
    }

    #[test]
    fn read_hash32_reads_32_bytes_in_order() {
        let bytes: Vec<u8> = (0..32).collect();
        let mut reader = ByteReader::new(&bytes[..]);
        let hash = reader.read_hash32().unwrap();
        assert_eq!(hash.0.to_vec(), bytes);
    }

    #[test]
    fn truncated_stream_yields_unexpected_eof() {
        let mut reader = ByteReader::new(&[0x01u8][..]);
        assert!(matches!(
            reader.read_u32_le(),
            Err(DecodeError::UnexpectedEof(_))
        ));
    }
}
