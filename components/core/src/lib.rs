#[macro_use]
extern crate hiro_system_kit;

#[macro_use]
pub mod logging;

pub mod block_index;
pub mod blockfile;
pub mod callbacks;
pub mod error;
pub mod orchestrator;
pub mod rpc;
pub mod store;
pub mod updater;
pub mod varint;

pub use error::IndexerError;
pub use logging::Context;
