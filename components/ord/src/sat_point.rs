use std::fmt;
use std::str::FromStr;

use crate::outpoint::Outpoint;

/// `<outpoint>:<sat_offset>` — the outpoint carrying the sat plus its byte offset inside that
/// output's value range. Two synthetic outpoint forms are used by the updater (C6 §4.6):
/// `fee:<tx_index>:<offset>` for sats still in flight to the coinbase, and an
/// all-zero/`u32::MAX` outpoint for sats that never land on any real output ("unbound").
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct SatPoint {
    pub outpoint: Outpoint,
    pub offset: u64,
}

impl fmt::Display for SatPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.outpoint, self.offset)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid satpoint: `{0}`")]
pub struct ParseSatPointError(String);

impl FromStr for SatPoint {
    type Err = ParseSatPointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (outpoint_str, offset_str) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseSatPointError(s.to_string()))?;
        let outpoint: Outpoint = outpoint_str
            .parse()
            .map_err(|_| ParseSatPointError(s.to_string()))?;
        let offset: u64 = offset_str
            .parse()
            .map_err(|_| ParseSatPointError(s.to_string()))?;
        Ok(SatPoint { outpoint, offset })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::outpoint::TxHash;

    #[test]
    fn displays_as_outpoint_colon_offset() {
        let satpoint = SatPoint {
            outpoint: Outpoint {
                txid: TxHash::ZERO,
                vout: 0,
            },
            offset: 42,
        };
        assert_eq!(
            satpoint.to_string(),
            "0000000000000000000000000000000000000000000000000000000000000000:0:42"
        );
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let hex = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33";
        let satpoint = SatPoint {
            outpoint: Outpoint {
                txid: TxHash::from_hex(hex).unwrap(),
                vout: 3,
            },
            offset: 7,
        };
        let parsed: SatPoint = satpoint.to_string().parse().unwrap();
        assert_eq!(parsed, satpoint);
    }

    #[test]
    fn fee_satpoint_round_trips() {
        let satpoint = SatPoint {
            outpoint: Outpoint::fee(12),
            offset: 400,
        };
        assert_eq!(satpoint.to_string(), "fee:12:400");
        let parsed: SatPoint = satpoint.to_string().parse().unwrap();
        assert_eq!(parsed, satpoint);
    }
}
