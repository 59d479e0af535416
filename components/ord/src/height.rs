use crate::epoch::Epoch;

/// A dense block ordinal from genesis.
#[derive(Debug, PartialEq, Copy, Clone, PartialOrd, Ord, Eq, Hash)]
pub struct Height(pub u64);

impl Height {
    pub fn subsidy(&self) -> u64 {
        Epoch::from_height(self.0).subsidy()
    }

    pub fn n(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Height {
    fn from(height: u64) -> Self {
        Self(height)
    }
}
