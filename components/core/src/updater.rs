//! C6 — per-block state machine (§4.6): pre-fetches spent-input state, extracts new
//! inscriptions via C5, tracks transfers (including fee-to-coinbase reassignment), updates UTXO
//! accounting, and fires callbacks once the block's batch is committed.
//!
//! Grounded on `other_examples/2a256663_hertarr-ordi__src-block.rs.rs`'s `BlockUpdater`/
//! `InscriptionUpdater`: the coinbase-processed-last ordering, the `Flotsam`/`Origin` split
//! between inscriptions carried from earlier blocks and ones newly extracted this block, and the
//! reward/fee bookkeeping that lets sats which overflow their own transaction's outputs land on
//! the block's coinbase. Adapted onto this build's own `Store`/`BlockBatch`/`Callbacks` instead
//! of raw `rocksdb` column families.

use bitcoin::Witness;
use bitcoincore_rpc::Client;

use ord::envelope::extract_transaction_inscriptions;
use ord::height::Height;
use ord::inscription::{Curse, Inscription};
use ord::inscription_id::InscriptionId;
use ord::outpoint::{Outpoint, TxHash};
use ord::sat_point::SatPoint;

use crate::blockfile::{Block, RawTx, TxOut};
use crate::callbacks::Callbacks;
use crate::rpc::{self, RpcError};
use crate::store::{BlockBatch, Store, StoreError};
use crate::Context;

#[derive(Debug, thiserror::Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// What an entry in flight between Step A/B and Step C owes its final location to.
enum Origin {
    /// Already inscribed before this block; `old_location` is cleared once the new one lands.
    Old { old_location: SatPoint },
    /// Newly extracted by C5 this block.
    New {
        inscription: Inscription,
        curses: Vec<Curse>,
        unbound: bool,
    },
}

/// One inscription in flight within the current tx (or, once deferred, within the block's
/// reward stream). `offset` is a position in whichever stream currently owns it.
struct Flotsam {
    id: InscriptionId,
    offset: u64,
    origin: Origin,
}

/// Finds the output whose value range contains `offset`, per §4.6 Step C. `None` means `offset`
/// falls past the end of every output — lost to fees.
fn locate_in_outputs(offset: u64, outputs: &[TxOut]) -> Option<(u32, u64)> {
    let mut cumulative = 0u64;
    for (index, output) in outputs.iter().enumerate() {
        if offset < cumulative + output.value {
            return Some((index as u32, offset - cumulative));
        }
        cumulative += output.value;
    }
    None
}

/// Step D: records each output's value and drops the now-spent inputs' entries. Shared by the
/// full updater and by the replay-time UTXO-only optimization (§4.7).
fn record_utxo_changes(tx: &RawTx, txid: TxHash, batch: &mut BlockBatch) {
    for (vout, output) in tx.outputs.iter().enumerate() {
        batch.set_output_value(&Outpoint { txid, vout: vout as u32 }, output.value);
    }
    for input in &tx.inputs {
        if !input.previous_output.is_null() {
            batch.delete_output_value(&input.previous_output);
        }
    }
}

pub struct Updater<'a> {
    store: &'a mut Store,
    rpc_client: &'a Client,
    callbacks: &'a Callbacks,
    ctx: &'a Context,
}

type InscribeEvent = (InscriptionId, SatPoint, Inscription, Vec<Curse>);
type TransferEvent = (InscriptionId, SatPoint, SatPoint);

impl<'a> Updater<'a> {
    pub fn new(
        store: &'a mut Store,
        rpc_client: &'a Client,
        callbacks: &'a Callbacks,
        ctx: &'a Context,
    ) -> Updater<'a> {
        Updater {
            store,
            rpc_client,
            callbacks,
            ctx,
        }
    }

    /// Step D only, no inscription logic: the replay optimization C7 uses for heights before
    /// `FIRST_INSCRIPTION_HEIGHT`, where no inscription can exist yet (§4.7).
    pub fn apply_block_utxo_only(&mut self, height: u64, block: &Block) -> Result<(), UpdaterError> {
        let mut batch = BlockBatch::new();
        for tx in &block.txs {
            record_utxo_changes(tx, tx.txid(), &mut batch);
        }
        self.store.commit(height, batch)?;
        Ok(())
    }

    /// Full Steps A–E for one block.
    pub fn apply_block(&mut self, height: u64, block: &Block) -> Result<(), UpdaterError> {
        let mut batch = BlockBatch::new();
        let mut inscribe_events: Vec<InscribeEvent> = Vec::new();
        let mut transfer_events: Vec<TransferEvent> = Vec::new();

        let mut reward = Height(height).subsidy();
        let mut unbound_total = self.store.unbound_inscriptions();
        let mut lost_total = self.store.lost_sats();
        let mut deferred: Vec<Flotsam> = Vec::new();

        let (coinbase, rest) = block
            .txs
            .split_first()
            .expect("a block always has at least a coinbase transaction");

        for (position, tx) in rest.iter().enumerate() {
            let tx_index = position as u32 + 1;
            let txid = tx.txid();
            let (mut floating, total_input_value) = self.collect_flotsam(tx, txid, false)?;
            record_utxo_changes(tx, txid, &mut batch);

            let total_output_value: u64 = tx.outputs.iter().map(|o| o.value).sum();
            let fee = total_input_value.saturating_sub(total_output_value);

            floating.sort_by_key(|f| f.offset);
            for flotsam in floating {
                let overflow = resolve_flotsam(
                    flotsam,
                    &tx.outputs,
                    txid,
                    &mut unbound_total,
                    &mut batch,
                    &mut inscribe_events,
                    &mut transfer_events,
                )?;
                if let Some(overflow) = overflow {
                    try_debug!(
                        self.ctx,
                        "inscription {} falls through to the fee stream at {}",
                        overflow.id,
                        Outpoint::fee(tx_index)
                    );
                    let carried_offset = reward + (overflow.offset - total_output_value);
                    deferred.push(Flotsam {
                        offset: carried_offset,
                        ..overflow
                    });
                }
            }
            reward += fee;
        }

        let coinbase_txid = coinbase.txid();
        let (coinbase_new, _) = self.collect_flotsam(coinbase, coinbase_txid, true)?;
        record_utxo_changes(coinbase, coinbase_txid, &mut batch);

        let mut all = deferred;
        all.extend(coinbase_new);
        all.sort_by_key(|f| f.offset);

        for flotsam in all {
            let overflow = resolve_flotsam(
                flotsam,
                &coinbase.outputs,
                coinbase_txid,
                &mut unbound_total,
                &mut batch,
                &mut inscribe_events,
                &mut transfer_events,
            )?;
            if let Some(overflow) = overflow {
                // Overflows even the coinbase: the miner claimed less than the subsidy plus
                // collected fees. The sat carrying this inscription no longer exists.
                try_warn!(
                    self.ctx,
                    "inscription {}'s sat overflowed the coinbase, marking lost",
                    overflow.id
                );
                let new_location = SatPoint {
                    outpoint: Outpoint::null(),
                    offset: u64::MAX - lost_total,
                };
                lost_total += 1;
                finalize_flotsam(overflow, new_location, &mut batch, &mut inscribe_events, &mut transfer_events)?;
            }
        }

        batch.set_unbound_inscriptions(unbound_total);
        batch.set_lost_sats(lost_total);
        self.store.commit(height, batch)?;

        for (id, satpoint, inscription, curses) in &inscribe_events {
            self.callbacks
                .fire_inscribe(id, satpoint, inscription, curses, self.ctx);
        }
        for (id, old_satpoint, new_satpoint) in &transfer_events {
            self.callbacks
                .fire_transfer(id, old_satpoint, new_satpoint, self.ctx);
        }
        Ok(())
    }

    /// Steps A and B for one transaction: pre-fetches what each non-coinbase input carries
    /// forward, then extracts any new inscriptions the tx's witnesses commit. Returns the
    /// combined flotsam (offsets within this tx's own input-value stream) plus the tx's total
    /// input value, needed by the caller to compute its fee.
    fn collect_flotsam(
        &mut self,
        tx: &RawTx,
        txid: TxHash,
        is_coinbase: bool,
    ) -> Result<(Vec<Flotsam>, u64), UpdaterError> {
        let mut floating = Vec::new();
        let mut input_values = Vec::with_capacity(tx.inputs.len());
        let mut total_input_value = 0u64;

        if !is_coinbase {
            for input in &tx.inputs {
                let outpoint = input.previous_output;
                let value = match self.store.output_value(&outpoint) {
                    Some(value) => value,
                    None => rpc::get_output_value(self.rpc_client, &outpoint)?,
                };
                for (satpoint, id) in self.store.inscriptions_at_outpoint(&outpoint)? {
                    floating.push(Flotsam {
                        id,
                        offset: total_input_value + satpoint.offset,
                        origin: Origin::Old { old_location: satpoint },
                    });
                }
                input_values.push(value);
                total_input_value += value;
            }
        }
        let step_a_len = floating.len();

        let mut input_offset = vec![0u64; tx.inputs.len()];
        let mut cumulative = 0u64;
        for (i, value) in input_values.iter().enumerate() {
            input_offset[i] = cumulative;
            cumulative += value;
        }

        let witnesses: Vec<Witness> = tx.inputs.iter().map(|input| input.witness.clone()).collect();
        for (k, extracted) in extract_transaction_inscriptions(&witnesses).into_iter().enumerate() {
            let id = InscriptionId { txid, index: k as u32 };

            let mut curses = Vec::new();
            if extracted.tx_in_index != 0 {
                curses.push(Curse::NotInFirstInput);
            }
            if extracted.tx_in_offset != 0 {
                curses.push(Curse::NotAtOffsetZero);
            }
            if extracted.tx_in_index == 0
                && extracted.tx_in_offset == 0
                && floating[..step_a_len].iter().any(|f| f.offset == 0)
            {
                curses.push(Curse::Reinscription);
            }

            let unbound = is_coinbase
                || input_values
                    .get(extracted.tx_in_index as usize)
                    .copied()
                    .unwrap_or(0)
                    == 0;
            let offset = if is_coinbase {
                0
            } else {
                input_offset[extracted.tx_in_index as usize]
            };

            floating.push(Flotsam {
                id,
                offset,
                origin: Origin::New {
                    inscription: extracted.inscription,
                    curses,
                    unbound,
                },
            });
        }

        Ok((floating, total_input_value))
    }
}

/// Resolves one flotsam against a set of outputs: an unbound new inscription always lands on
/// the synthetic all-zero outpoint regardless of `outputs`, since it never had a real sat to
/// begin with. Otherwise places it by offset; `Ok(Some(flotsam))` means it didn't fit in
/// `outputs` and the caller must decide what happens next (defer to the coinbase, or mark lost).
#[allow(clippy::too_many_arguments)]
fn resolve_flotsam(
    flotsam: Flotsam,
    outputs: &[TxOut],
    txid: TxHash,
    unbound_total: &mut u64,
    batch: &mut BlockBatch,
    inscribe_events: &mut Vec<InscribeEvent>,
    transfer_events: &mut Vec<TransferEvent>,
) -> Result<Option<Flotsam>, StoreError> {
    if matches!(&flotsam.origin, Origin::New { unbound: true, .. }) {
        let location = SatPoint {
            outpoint: Outpoint::null(),
            offset: *unbound_total,
        };
        *unbound_total += 1;
        finalize_flotsam(flotsam, location, batch, inscribe_events, transfer_events)?;
        return Ok(None);
    }
    match locate_in_outputs(flotsam.offset, outputs) {
        Some((vout, local_offset)) => {
            let location = SatPoint {
                outpoint: Outpoint { txid, vout },
                offset: local_offset,
            };
            finalize_flotsam(flotsam, location, batch, inscribe_events, transfer_events)?;
            Ok(None)
        }
        None => Ok(Some(flotsam)),
    }
}

/// Writes the inscription's new location (and callback payload) into the block's batch. Shared
/// by the per-tx pass and the coinbase fee-remapping pass.
fn finalize_flotsam(
    flotsam: Flotsam,
    new_location: SatPoint,
    batch: &mut BlockBatch,
    inscribe_events: &mut Vec<InscribeEvent>,
    transfer_events: &mut Vec<TransferEvent>,
) -> Result<(), StoreError> {
    match flotsam.origin {
        Origin::Old { old_location } => {
            batch.set_inscription_location(&flotsam.id, Some(&old_location), &new_location);
            transfer_events.push((flotsam.id, old_location, new_location));
        }
        Origin::New { inscription, curses, .. } => {
            batch.insert_inscription(&flotsam.id, &inscription)?;
            batch.set_inscription_location(&flotsam.id, None, &new_location);
            inscribe_events.push((flotsam.id, new_location, inscription, curses));
        }
    }
    Ok(())
}
