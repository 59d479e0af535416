//! C3 — reads Bitcoin Core's `blocks/index` LevelDB store read-only and builds the in-memory
//! map C7 replays against. Grounded on the only place in the retrieval pack that actually reads
//! this format: `other_examples/554fd12d_jonheaven-dog__src-index-updater-blk_reader.rs.rs`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use rusty_leveldb::{LdbIterator, Options, DB};

use crate::blockfile::{self, Block, BlockHeader, Coin};
use crate::varint::{decode_varint_b128, ByteReader, DecodeError};

const BLOCK_INDEX_KEY_PREFIX: u8 = b'b';
const BLOCK_VALID_CHAIN: u64 = 4;
const BLOCK_HAVE_DATA: u64 = 8;
const BLOCK_HAVE_UNDO: u64 = 16;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("blocks/index not found at {0}")]
    NotFound(PathBuf),
    #[error("leveldb error: {0}")]
    Leveldb(#[from] rusty_leveldb::Status),
    #[error("{0}")]
    Decode(#[from] DecodeError),
    #[error("index entry for height {stored} stored under map key {key}")]
    HeightMismatch { key: u64, stored: u64 },
    #[error("index entry at height {0} has status bits indicating no on-disk block data")]
    NoBlockData(u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One decoded `blocks/index` record (§4.3). `header` carries the 80-byte block header as
/// stored inline in the index, ahead of actually reading the `.blk` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub format_version: u64,
    pub height: u64,
    pub status: u64,
    pub tx_count: u64,
    pub blk_file_index: Option<u32>,
    pub data_offset: Option<u64>,
    pub undo_offset: Option<u64>,
    pub header: BlockHeader,
}

impl IndexEntry {
    fn has_data(&self) -> bool {
        self.status & (BLOCK_VALID_CHAIN | BLOCK_HAVE_DATA) != 0
    }
}

/// Advances `bytes[*pos..]` past one varint-B128 value, returning the decoded value.
fn take_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let (value, consumed) = decode_varint_b128(&bytes[*pos..])?;
    *pos += consumed;
    Ok(value)
}

/// Decodes one `blocks/index` value (key already stripped of its `'b'` prefix and hash tail).
/// Layout: `format_version, height, status, tx_count` varints, then `blk_file_index` and
/// `data_offset` varints if `BLOCK_HAVE_DATA`/`BLOCK_HAVE_UNDO` are set, then the 80-byte block
/// header (version:u32 | prev:32 | merkle_root:32 | timestamp:u32 | bits:u32 | nonce:u32).
fn decode_index_record(value: &[u8]) -> Result<IndexEntry, DecodeError> {
    let mut pos = 0usize;
    let format_version = take_varint(value, &mut pos)?;
    let height = take_varint(value, &mut pos)?;
    let status = take_varint(value, &mut pos)?;
    let tx_count = take_varint(value, &mut pos)?;

    let mut blk_file_index = None;
    let mut data_offset = None;
    let mut undo_offset = None;
    if status & (BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO) != 0 {
        blk_file_index = Some(take_varint(value, &mut pos)? as u32);
    }
    if status & BLOCK_HAVE_DATA != 0 {
        data_offset = Some(take_varint(value, &mut pos)?);
    }
    if status & BLOCK_HAVE_UNDO != 0 {
        undo_offset = Some(take_varint(value, &mut pos)?);
    }

    let remaining = &value[pos..];
    let mut header_reader = ByteReader::new(remaining);
    let header = BlockHeader {
        version: header_reader.read_u32_le()?,
        prev: header_reader.read_hash32()?,
        merkle_root: header_reader.read_hash32()?,
        timestamp: header_reader.read_u32_le()?,
        bits: header_reader.read_u32_le()?,
        nonce: header_reader.read_u32_le()?,
    };

    Ok(IndexEntry {
        format_version,
        height,
        status,
        tx_count,
        blk_file_index,
        data_offset,
        undo_offset,
        header,
    })
}

/// In-memory map built from `blocks/index`, plus a small LRU of open `.blk` file handles so
/// replaying consecutive heights out of the same file doesn't reopen it every time.
pub struct BlockIndex {
    blocks_dir: PathBuf,
    coin: Coin,
    entries: HashMap<u64, IndexEntry>,
    max_height: u64,
    max_height_in_blk: HashMap<u32, u64>,
    open_files: LruCache<u32, File>,
}

impl BlockIndex {
    /// Opens `<btc_data_dir>/blocks/index` read-only and scans every `'b'`-prefixed record.
    pub fn open(
        btc_data_dir: &Path,
        blocks_dir: PathBuf,
        coin: Coin,
        blk_file_cache_size: usize,
    ) -> Result<BlockIndex, IndexError> {
        let index_path = btc_data_dir.join("blocks").join("index");
        if !index_path.exists() {
            return Err(IndexError::NotFound(index_path));
        }

        let mut opts = Options::default();
        opts.create_if_missing = false;
        let mut db = DB::open(&index_path, opts)?;
        let mut iter = db.new_iter()?;
        iter.seek(&[BLOCK_INDEX_KEY_PREFIX]);

        let mut entries = HashMap::new();
        let mut max_height = 0u64;
        let mut max_height_in_blk: HashMap<u32, u64> = HashMap::new();
        let (mut key, mut value) = (Vec::new(), Vec::new());
        while iter.advance() {
            iter.current(&mut key, &mut value);
            if key.first() != Some(&BLOCK_INDEX_KEY_PREFIX) {
                break;
            }
            let entry = decode_index_record(&value)?;
            if !entry.has_data() {
                continue;
            }
            if let Some(file_idx) = entry.blk_file_index {
                let seen = max_height_in_blk.entry(file_idx).or_insert(0);
                if entry.height > *seen {
                    *seen = entry.height;
                }
            }
            if entry.height > max_height {
                max_height = entry.height;
            }
            entries.insert(entry.height, entry);
        }

        for (&key, entry) in entries.iter() {
            if entry.height != key {
                return Err(IndexError::HeightMismatch {
                    key,
                    stored: entry.height,
                });
            }
        }

        let capacity = NonZeroUsize::new(blk_file_cache_size.max(1)).expect("nonzero by max(1)");
        Ok(BlockIndex {
            blocks_dir,
            coin,
            entries,
            max_height,
            max_height_in_blk,
            open_files: LruCache::new(capacity),
        })
    }

    pub fn max_height(&self) -> u64 {
        self.max_height
    }

    pub fn entry(&self, height: u64) -> Option<&IndexEntry> {
        self.entries.get(&height)
    }

    pub fn max_height_in_blk(&self, blk_file_index: u32) -> Option<u64> {
        self.max_height_in_blk.get(&blk_file_index).copied()
    }

    /// Reads the full block at `height` from its `.blk` file, reusing a cached file handle
    /// when possible.
    pub fn read_block(&mut self, height: u64) -> Result<Block, IndexError> {
        let entry = self
            .entries
            .get(&height)
            .ok_or(IndexError::NoBlockData(height))?
            .clone();
        let file_idx = entry.blk_file_index.ok_or(IndexError::NoBlockData(height))?;
        let offset = entry.data_offset.ok_or(IndexError::NoBlockData(height))?;

        if !self.open_files.contains(&file_idx) {
            let path = self.blocks_dir.join(format!("blk{:05}.dat", file_idx));
            let file = File::open(path)?;
            self.open_files.put(file_idx, file);
        }
        let file = self.open_files.get_mut(&file_idx).expect("just inserted");
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = ByteReader::new(file);
        Ok(blockfile::read_block(&mut reader, &self.coin)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::varint::encode_varint_b128;

    fn sample_record_bytes(height: u64, status: u64, file_idx: u64, offset: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend(encode_varint_b128(1)); // format_version
        buf.extend(encode_varint_b128(height));
        buf.extend(encode_varint_b128(status));
        buf.extend(encode_varint_b128(1)); // tx_count
        if status & (BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO) != 0 {
            buf.extend(encode_varint_b128(file_idx));
        }
        if status & BLOCK_HAVE_DATA != 0 {
            buf.extend(encode_varint_b128(offset));
        }
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    #[test]
    fn decodes_a_record_with_data_and_no_undo() {
        let bytes = sample_record_bytes(767_430, BLOCK_VALID_CHAIN | BLOCK_HAVE_DATA, 42, 1234);
        let entry = decode_index_record(&bytes).unwrap();
        assert_eq!(entry.height, 767_430);
        assert_eq!(entry.blk_file_index, Some(42));
        assert_eq!(entry.data_offset, Some(1234));
        assert_eq!(entry.undo_offset, None);
        assert!(entry.has_data());
    }

    #[test]
    fn entry_with_only_tree_validity_has_no_data() {
        let bytes = sample_record_bytes(100, 2, 0, 0);
        let entry = decode_index_record(&bytes).unwrap();
        assert!(!entry.has_data());
    }

    #[test]
    fn undo_offset_present_when_status_bit_set() {
        let mut buf = Vec::new();
        let status = BLOCK_VALID_CHAIN | BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO;
        buf.extend(encode_varint_b128(1));
        buf.extend(encode_varint_b128(5));
        buf.extend(encode_varint_b128(status));
        buf.extend(encode_varint_b128(3));
        buf.extend(encode_varint_b128(7)); // file index
        buf.extend(encode_varint_b128(900)); // data offset
        buf.extend(encode_varint_b128(450)); // undo offset
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&[0u8; 32]);
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let entry = decode_index_record(&buf).unwrap();
        assert_eq!(entry.undo_offset, Some(450));
    }
}
