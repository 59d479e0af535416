//! C4 — JSON-RPC fallback client. Only consulted once C3's file index is exhausted (§4.4); the
//! node is the source of truth for anything not yet flushed to a `.blk` file.
//!
//! Block bytes come back over RPC as raw consensus-serialized hex, so `get_block_by_hash`
//! decodes them with the same C2 parser a file read would use — one decode path regardless of
//! source.

use std::thread;
use std::time::Duration;

use bitcoin::hashes::Hash;
use bitcoincore_rpc::jsonrpc::simple_http::SimpleHttpTransport;
use bitcoincore_rpc::jsonrpc::Client as JsonRpcClient;
use bitcoincore_rpc::{Client, RpcApi};
use config::config::BitcoindConfig;
use ord::outpoint::{Outpoint, TxHash};

use crate::blockfile::{self, Block, Coin};
use crate::varint::{ByteReader, DecodeError};
use crate::Context;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("rpc error: {0}")]
    Client(#[from] bitcoincore_rpc::Error),
    #[error("rpc transport error: {0}")]
    Transport(#[from] bitcoincore_rpc::jsonrpc::simple_http::Error),
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("block decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("outpoint {0} references a vout past the end of its transaction's outputs")]
    OutputIndexOutOfRange(Outpoint),
}

/// Builds a `Client` whose underlying transport actually enforces `bitcoind.rpc_timeout` on
/// every call (§5, §10.2). `bitcoincore_rpc::Client::new` has no timeout knob at all, so the
/// client has to be assembled from the lower-level `jsonrpc` transport it wraps instead.
fn build_client(bitcoind: &BitcoindConfig) -> Result<Client, RpcError> {
    let transport = SimpleHttpTransport::builder()
        .url(&bitcoind.rpc_url)
        .map_err(RpcError::Transport)?
        .timeout(bitcoind.rpc_timeout)
        .auth(bitcoind.rpc_username.clone(), Some(bitcoind.rpc_password.clone()))
        .build();
    Ok(Client::from_jsonrpc(JsonRpcClient::with_transport(transport)))
}

fn to_tx_hash(hash: bitcoin::BlockHash) -> TxHash {
    TxHash(hash.to_byte_array())
}

fn to_block_hash(hash: &TxHash) -> bitcoin::BlockHash {
    bitcoin::BlockHash::from_byte_array(hash.0)
}

/// Builds a client and blocks until the node actually answers an RPC call, retrying
/// construction itself on a fixed backoff — the node may not have its RPC listener open yet at
/// process start, matching how this design's reference product bootstraps its own connection.
pub fn connect_with_retry(bitcoind: &BitcoindConfig, retry_backoff: Duration, ctx: &Context) -> Client {
    loop {
        let attempt = build_client(bitcoind).and_then(|client| {
            client
                .get_blockchain_info()
                .map(|_| client)
                .map_err(RpcError::from)
        });

        match attempt {
            Ok(client) => return client,
            Err(e) => {
                try_error!(
                    ctx,
                    "rpc node not ready ({}), retrying in {:?}",
                    e,
                    retry_backoff
                );
                thread::sleep(retry_backoff);
            }
        }
    }
}

pub fn get_block_hash(client: &Client, height: u64) -> Result<TxHash, RpcError> {
    Ok(to_tx_hash(client.get_block_hash(height)?))
}

pub fn get_block_by_hash(client: &Client, hash: &TxHash, coin: &Coin) -> Result<Block, RpcError> {
    let hex_blob = client.get_block_hex(&to_block_hash(hash))?;
    let bytes = hex::decode(hex_blob)?;
    let mut reader = ByteReader::new(&bytes[..]);
    Ok(blockfile::read_block(&mut reader, coin)?)
}

pub fn get_block_by_height(client: &Client, height: u64, coin: &Coin) -> Result<Block, RpcError> {
    let hash = client.get_block_hash(height)?;
    let hex_blob = client.get_block_hex(&hash)?;
    let bytes = hex::decode(hex_blob)?;
    let mut reader = ByteReader::new(&bytes[..]);
    Ok(blockfile::read_block(&mut reader, coin)?)
}

/// Looks up a spent output's value straight from the node (§4.6 Step A fallback): the
/// updater's own `OUTPUT_VALUE` column should already have every value it needs from earlier
/// blocks, so this only fires for an input spending an output this process never indexed itself.
pub fn get_output_value(client: &Client, outpoint: &Outpoint) -> Result<u64, RpcError> {
    let txid = bitcoin::Txid::from_byte_array(outpoint.txid.0);
    let tx = client.get_raw_transaction(&txid, None)?;
    let output = tx
        .output
        .get(outpoint.vout as usize)
        .ok_or(RpcError::OutputIndexOutOfRange(*outpoint))?;
    Ok(output.value.to_sat())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_hash_conversion_round_trips() {
        let mut raw = [0u8; 32];
        raw[0] = 0xAB;
        raw[31] = 0xCD;
        let tx_hash = TxHash(raw);
        let block_hash = to_block_hash(&tx_hash);
        assert_eq!(to_tx_hash(block_hash), tx_hash);
    }
}
