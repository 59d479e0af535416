#![allow(dead_code)]

#[macro_use]
extern crate serde_derive;

pub mod envelope;
pub mod epoch;
pub mod height;
pub mod inscription;
pub mod inscription_id;
pub mod outpoint;
pub mod sat_point;
pub mod tag;

pub const SUBSIDY_HALVING_INTERVAL: u32 = 210_000;
pub const COIN_VALUE: u64 = 100_000_000;
pub const FIRST_POST_SUBSIDY_EPOCH: u32 = 33;

/// Height at which this build turns on inscription recognition during replay (C7 §4.7).
/// The source defines this constant twice, with `0` and `767430`; §9 OQ4 resolves the
/// ambiguity in favor of the larger value.
pub const FIRST_INSCRIPTION_HEIGHT: u64 = 767_430;
