use std::fmt;
use std::str::FromStr;

/// Double-SHA256 transaction hash, big-endian display order (matches Bitcoin's own txid
/// convention of displaying the byte-reversed hash).
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub const ZERO: TxHash = TxHash([0u8; 32]);

    /// Sentinel txid used by [`Outpoint::fee`] to build the synthetic `fee:<tx_index>` satpoint
    /// outpoint (§3.1): sats that fall off the end of a tx's outputs and are reassigned to the
    /// block's coinbase. Distinct from [`TxHash::ZERO`] so it can never collide with a real
    /// txid or with the coinbase-input null outpoint.
    pub const FEE_MARKER: TxHash = TxHash([0xFFu8; 32]);

    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        bytes.reverse();
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(TxHash(out))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// `(txid, vout)`. The null outpoint `(0x00..00, 0xFFFFFFFF)` is used by coinbase inputs.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    pub txid: TxHash,
    pub vout: u32,
}

impl Outpoint {
    pub const NULL_VOUT: u32 = u32::MAX;

    pub fn null() -> Self {
        Self {
            txid: TxHash::ZERO,
            vout: Self::NULL_VOUT,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == TxHash::ZERO && self.vout == Self::NULL_VOUT
    }

    /// Synthetic outpoint standing in for "position `offset` in the fee stream of tx `tx_index`
    /// of the current block" (§4.6 Step C), used only as the intermediate satpoint before the
    /// fee-to-coinbase remapping pass runs.
    pub fn fee(tx_index: u32) -> Self {
        Self {
            txid: TxHash::FEE_MARKER,
            vout: tx_index,
        }
    }

    pub fn is_fee(&self) -> bool {
        self.txid == TxHash::FEE_MARKER
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fee() {
            write!(f, "fee:{}", self.vout)
        } else {
            write!(f, "{}:{}", self.txid, self.vout)
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid outpoint: `{0}`")]
pub struct ParseOutpointError(String);

impl FromStr for Outpoint {
    type Err = ParseOutpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid_str, vout_str) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseOutpointError(s.to_string()))?;
        let vout: u32 = vout_str
            .parse()
            .map_err(|_| ParseOutpointError(s.to_string()))?;
        if txid_str == "fee" {
            return Ok(Outpoint::fee(vout));
        }
        let txid =
            TxHash::from_hex(txid_str).ok_or_else(|| ParseOutpointError(s.to_string()))?;
        Ok(Outpoint { txid, vout })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn null_outpoint_round_trips_through_is_null() {
        assert!(Outpoint::null().is_null());
        assert!(!Outpoint {
            txid: TxHash::ZERO,
            vout: 0,
        }
        .is_null());
    }

    #[test]
    fn txhash_hex_round_trips() {
        let hex = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33";
        let hash = TxHash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn fee_outpoint_displays_and_parses_as_fee_colon_index() {
        let outpoint = Outpoint::fee(3);
        assert_eq!(outpoint.to_string(), "fee:3");
        let parsed: Outpoint = "fee:3".parse().unwrap();
        assert_eq!(parsed, outpoint);
        assert!(parsed.is_fee());
    }

    #[test]
    fn ordinary_outpoint_round_trips_through_display_and_parse() {
        let hex = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33";
        let outpoint = Outpoint {
            txid: TxHash::from_hex(hex).unwrap(),
            vout: 9,
        };
        let parsed: Outpoint = outpoint.to_string().parse().unwrap();
        assert_eq!(parsed, outpoint);
    }
}
