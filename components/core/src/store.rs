//! C8 — the embedded KV façade (§3.2/§3.4). Grounded directly on `original_source/Ordi.h`'s own
//! `Ordi` constructor: five separate `rusty_leveldb` databases, one directory per column family,
//! rather than one process opening a single multi-column-family database. `OUTPUT_INSCRIPTION`
//! is opened with `rusty_leveldb::in_memory()`, matching the "reverse lookup, hot path, may be
//! kept in-memory only" note in §3.2.
//!
//! Atomicity (I4) spans five independent on-disk databases, so there's no single cross-store
//! transaction to rely on. Instead [`Store::commit`] writes the three plain batches, then the
//! `OUTPUT_INSCRIPTION` reverse-column ops one at a time (each is its own read-modify-write, see
//! below), then `STATUS.last_height` last; a crash partway through leaves some already-committed
//! data for block `H+1` lying around, but `last_height` still reads `H`, so C7 simply re-applies
//! `H+1` on restart. Every write here is idempotent under replay: plain `put`s overwrite, the
//! `output_value` `delete` is for a key the re-applied block will delete again, and the reverse
//! ops check membership (`Insert` no-ops if the id is already in the list, `Remove` no-ops if
//! it's already gone) rather than blindly adding/removing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ord::inscription::Inscription;
use ord::inscription_id::InscriptionId;
use ord::outpoint::Outpoint;
use ord::sat_point::SatPoint;
use rusty_leveldb::{LdbIterator, Options, WriteBatch, DB};

const STATUS_DIR: &str = "status";
const OUTPUT_VALUE_DIR: &str = "output_value";
const ID_INSCRIPTION_DIR: &str = "id_inscription";
const INSCRIPTION_OUTPUT_DIR: &str = "inscription_output";
const OUTPUT_INSCRIPTION_DIR: &str = "output_inscription";

const LAST_HEIGHT_KEY: &[u8] = b"last_height";
const UNBOUND_INSCRIPTIONS_KEY: &[u8] = b"unbound_inscriptions";
const LOST_SATS_KEY: &[u8] = b"lost_sats";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("leveldb error: {0}")]
    Leveldb(#[from] rusty_leveldb::Status),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `OUTPUT_INSCRIPTION` values hold every id currently sharing a satpoint (S5: a reinscription
/// lands on a sat that already carries an earlier inscription), newline-joined since an
/// `InscriptionId`'s `<hex_txid>i<index>` display form never contains one.
fn encode_ids(ids: &[InscriptionId]) -> Vec<u8> {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

fn decode_ids(bytes: &[u8]) -> Vec<InscriptionId> {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.split('\n').filter_map(|part| part.parse().ok()).collect(),
        Err(_) => Vec::new(),
    }
}

fn open_disk_db(working_dir: &Path, name: &str, max_file_size: usize) -> Result<DB, StoreError> {
    fs::create_dir_all(working_dir)?;
    let mut opts = Options::default();
    opts.create_if_missing = true;
    opts.max_file_size = max_file_size;
    Ok(DB::open(working_dir.join(name), opts)?)
}

fn open_memory_db(name: &str) -> Result<DB, StoreError> {
    let mut opts = rusty_leveldb::in_memory();
    opts.create_if_missing = true;
    Ok(DB::open(PathBuf::from(name), opts)?)
}

/// `OUTPUT_INSCRIPTION` lives in an in-memory `DB` and starts empty on every process restart.
/// Rebuild it from the durable `INSCRIPTION_OUTPUT` column (id -> location) by walking every
/// entry and writing the inverse (location -> ids), so a restart doesn't silently lose every
/// reverse lookup until the next transfer touches each inscription again. Ids are grouped by
/// location before writing rather than put one at a time, so two ids sharing a satpoint (S5)
/// don't clobber each other the way a naive `put(location, id)` per entry would.
fn rebuild_output_inscription(
    inscription_output: &mut DB,
    output_inscription: &mut DB,
) -> Result<(), StoreError> {
    let mut iter = inscription_output.new_iter()?;
    let mut by_location: HashMap<Vec<u8>, Vec<InscriptionId>> = HashMap::new();
    let (mut key, mut value) = (Vec::new(), Vec::new());
    while iter.advance() {
        iter.current(&mut key, &mut value);
        let Ok(key_str) = std::str::from_utf8(&key) else {
            continue;
        };
        let Ok(id) = key_str.parse::<InscriptionId>() else {
            continue;
        };
        by_location.entry(value.clone()).or_default().push(id);
    }
    let mut batch = WriteBatch::new();
    for (location, ids) in &by_location {
        batch.put(location, &encode_ids(ids));
    }
    output_inscription.write(batch, true)?;
    Ok(())
}

/// A pending mutation to the `OUTPUT_INSCRIPTION` reverse column, applied at commit time against
/// whatever ids are actually on disk for that satpoint (§3.2, S5) rather than blindly overwriting
/// or deleting the whole entry — a satpoint can carry more than one id (reinscription).
enum OutputInscriptionOp {
    Insert(SatPoint, InscriptionId),
    Remove(SatPoint, InscriptionId),
}

/// Accumulates the mutations produced by applying one block (§3.4 "one batch per block"); handed
/// to [`Store::commit`] once C6 has finished walking the block's transactions.
pub struct BlockBatch {
    output_value: WriteBatch,
    id_inscription: WriteBatch,
    inscription_output: WriteBatch,
    output_inscription_ops: Vec<OutputInscriptionOp>,
    unbound_inscriptions: Option<u64>,
    lost_sats: Option<u64>,
}

impl BlockBatch {
    pub fn new() -> BlockBatch {
        BlockBatch {
            output_value: WriteBatch::new(),
            id_inscription: WriteBatch::new(),
            inscription_output: WriteBatch::new(),
            output_inscription_ops: Vec::new(),
            unbound_inscriptions: None,
            lost_sats: None,
        }
    }

    /// Records the block's ending value for the `unbound_inscriptions`/`lost_sats` running
    /// counters (§3.2 STATUS "running counters"); written alongside `last_height` in
    /// [`Store::commit`] so a crash mid-block can't leave them ahead of the checkpoint.
    pub fn set_unbound_inscriptions(&mut self, total: u64) {
        self.unbound_inscriptions = Some(total);
    }

    pub fn set_lost_sats(&mut self, total: u64) {
        self.lost_sats = Some(total);
    }

    pub fn set_output_value(&mut self, outpoint: &Outpoint, value: u64) {
        self.output_value
            .put(outpoint.to_string().as_bytes(), &value.to_le_bytes());
    }

    pub fn delete_output_value(&mut self, outpoint: &Outpoint) {
        self.output_value.delete(outpoint.to_string().as_bytes());
    }

    pub fn insert_inscription(
        &mut self,
        id: &InscriptionId,
        inscription: &Inscription,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(inscription)?;
        self.id_inscription.put(id.to_string().as_bytes(), &bytes);
        Ok(())
    }

    /// Records the inscription's new location, and (if it had a previous one) removes *this id*
    /// from its old reverse-lookup entry so `OUTPUT_INSCRIPTION` doesn't accumulate dead rows
    /// (I2) — without touching any other id a reinscription may still share that satpoint with
    /// (S5). The actual read-modify-write against what's on disk happens in [`Store::commit`].
    pub fn set_inscription_location(
        &mut self,
        id: &InscriptionId,
        old_location: Option<&SatPoint>,
        new_location: &SatPoint,
    ) {
        if let Some(old) = old_location {
            self.output_inscription_ops
                .push(OutputInscriptionOp::Remove(old.clone(), id.clone()));
        }
        self.inscription_output
            .put(id.to_string().as_bytes(), new_location.to_string().as_bytes());
        self.output_inscription_ops
            .push(OutputInscriptionOp::Insert(new_location.clone(), id.clone()));
    }
}

/// The KV façade itself: five `rusty_leveldb` handles plus the accessor methods C6 needs to read
/// current state before building the next block's [`BlockBatch`].
pub struct Store {
    status: DB,
    output_value: DB,
    id_inscription: DB,
    inscription_output: DB,
    output_inscription: DB,
}

impl Store {
    pub fn open(working_dir: &Path, max_file_size: usize) -> Result<Store, StoreError> {
        let mut inscription_output = open_disk_db(working_dir, INSCRIPTION_OUTPUT_DIR, max_file_size)?;
        let mut output_inscription = open_memory_db(OUTPUT_INSCRIPTION_DIR)?;
        rebuild_output_inscription(&mut inscription_output, &mut output_inscription)?;

        Ok(Store {
            status: open_disk_db(working_dir, STATUS_DIR, max_file_size)?,
            output_value: open_disk_db(working_dir, OUTPUT_VALUE_DIR, max_file_size)?,
            id_inscription: open_disk_db(working_dir, ID_INSCRIPTION_DIR, max_file_size)?,
            inscription_output,
            output_inscription,
        })
    }

    pub fn last_height(&mut self) -> Option<u64> {
        let bytes = self.status.get(LAST_HEIGHT_KEY)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn output_value(&mut self, outpoint: &Outpoint) -> Option<u64> {
        let bytes = self.output_value.get(outpoint.to_string().as_bytes())?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn inscription(&mut self, id: &InscriptionId) -> Result<Option<Inscription>, StoreError> {
        match self.id_inscription.get(id.to_string().as_bytes()) {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn inscription_location(&mut self, id: &InscriptionId) -> Option<SatPoint> {
        let bytes = self.inscription_output.get(id.to_string().as_bytes())?;
        String::from_utf8(bytes).ok()?.parse().ok()
    }

    /// Every id currently sitting at `satpoint`. Usually at most one, but a reinscription onto an
    /// already-occupied sat (S5) leaves more than one id resolvable here — the bijection P1
    /// promises only holds per-id (`OUTPUT_INSCRIPTION[INSCRIPTION_OUTPUT[id]]` always contains
    /// `id`), not per-satpoint.
    pub fn inscription_at(&mut self, satpoint: &SatPoint) -> Vec<InscriptionId> {
        self.output_inscription
            .get(satpoint.to_string().as_bytes())
            .map(|bytes| decode_ids(&bytes))
            .unwrap_or_default()
    }

    /// Every inscription currently sitting somewhere inside `outpoint`'s value range, used by
    /// C6 Step A to learn what a spent input carries forward (§4.6). Relies on `OUTPUT_INSCRIPTION`
    /// keys being `<outpoint>:<offset>`, so every satpoint on the same outpoint shares the
    /// `<outpoint>:` prefix and sorts together. A satpoint holding more than one id (S5) yields
    /// one `(satpoint, id)` pair per id, not a single pair per key.
    pub fn inscriptions_at_outpoint(
        &mut self,
        outpoint: &Outpoint,
    ) -> Result<Vec<(SatPoint, InscriptionId)>, StoreError> {
        let prefix = format!("{outpoint}:");
        let mut iter = self.output_inscription.new_iter()?;
        iter.seek(prefix.as_bytes());

        let mut found = Vec::new();
        let (mut key, mut value) = (Vec::new(), Vec::new());
        while iter.advance() {
            iter.current(&mut key, &mut value);
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let Ok(satpoint_str) = String::from_utf8(key.clone()) else {
                continue;
            };
            let Ok(satpoint) = satpoint_str.parse() else {
                continue;
            };
            for id in decode_ids(&value) {
                found.push((satpoint.clone(), id));
            }
        }
        Ok(found)
    }

    pub fn unbound_inscriptions(&mut self) -> u64 {
        self.status
            .get(UNBOUND_INSCRIPTIONS_KEY)
            .and_then(|bytes| Some(u64::from_le_bytes(bytes.try_into().ok()?)))
            .unwrap_or(0)
    }

    pub fn lost_sats(&mut self) -> u64 {
        self.status
            .get(LOST_SATS_KEY)
            .and_then(|bytes| Some(u64::from_le_bytes(bytes.try_into().ok()?)))
            .unwrap_or(0)
    }

    /// Applies one pending `OUTPUT_INSCRIPTION` mutation against whatever is actually on disk for
    /// that satpoint right now, so a satpoint already shared by another id (S5) keeps that id
    /// instead of having its whole entry clobbered.
    fn apply_output_inscription_op(&mut self, op: OutputInscriptionOp) -> Result<(), StoreError> {
        let (satpoint, id, inserting) = match op {
            OutputInscriptionOp::Insert(satpoint, id) => (satpoint, id, true),
            OutputInscriptionOp::Remove(satpoint, id) => (satpoint, id, false),
        };
        let key = satpoint.to_string();
        let mut ids = self
            .output_inscription
            .get(key.as_bytes())
            .map(|bytes| decode_ids(&bytes))
            .unwrap_or_default();

        if inserting {
            if !ids.contains(&id) {
                ids.push(id);
            }
        } else {
            ids.retain(|existing| existing != &id);
        }

        if ids.is_empty() {
            self.output_inscription.delete(key.as_bytes())?;
        } else {
            self.output_inscription.put(key.as_bytes(), &encode_ids(&ids))?;
        }
        Ok(())
    }

    /// Commits one block's worth of mutations, data stores first, `STATUS` (counters plus
    /// `last_height`) last (see module docs for why the ordering matters).
    pub fn commit(&mut self, height: u64, batch: BlockBatch) -> Result<(), StoreError> {
        self.output_value.write(batch.output_value, false)?;
        self.id_inscription.write(batch.id_inscription, false)?;
        self.inscription_output.write(batch.inscription_output, false)?;
        for op in batch.output_inscription_ops {
            self.apply_output_inscription_op(op)?;
        }

        let mut status_batch = WriteBatch::new();
        if let Some(total) = batch.unbound_inscriptions {
            status_batch.put(UNBOUND_INSCRIPTIONS_KEY, &total.to_le_bytes());
        }
        if let Some(total) = batch.lost_sats {
            status_batch.put(LOST_SATS_KEY, &total.to_le_bytes());
        }
        status_batch.put(LAST_HEIGHT_KEY, &height.to_le_bytes());
        self.status.write(status_batch, true)?;
        Ok(())
    }
}
