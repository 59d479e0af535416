use std::fmt;
use std::str::FromStr;

use crate::outpoint::TxHash;

/// `"<hex_txid>i<index>"`, where `index` is the 0-based ordinal of the inscription among all
/// inscriptions emitted by its transaction (not per-input — see I5).
#[derive(Debug, PartialEq, Eq, Clone, Hash, PartialOrd, Ord)]
pub struct InscriptionId {
    pub txid: TxHash,
    pub index: u32,
}

impl fmt::Display for InscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}i{}", self.txid, self.index)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid inscription id: `{0}`")]
pub struct ParseInscriptionIdError(String);

impl FromStr for InscriptionId {
    type Err = ParseInscriptionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid_str, index_str) = s
            .split_once('i')
            .ok_or_else(|| ParseInscriptionIdError(s.to_string()))?;
        let txid =
            TxHash::from_hex(txid_str).ok_or_else(|| ParseInscriptionIdError(s.to_string()))?;
        let index: u32 = index_str
            .parse()
            .map_err(|_| ParseInscriptionIdError(s.to_string()))?;
        Ok(InscriptionId { txid, index })
    }
}
