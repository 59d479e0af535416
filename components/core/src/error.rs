use crate::block_index::IndexError;
use crate::rpc::RpcError;
use crate::store::StoreError;
use crate::updater::UpdaterError;
use crate::varint::DecodeError;

/// Crate-wide error, composing each component's own error enum via `#[from]` (§10.1). This is
/// what the orchestrator (C7) and the CLI ultimately match on.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("block decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("block index error: {0}")]
    Index(#[from] IndexError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("config error: {0}")]
    Config(#[from] config::config::ConfigError),
    #[error("updater error: {0}")]
    Updater(#[from] UpdaterError),
}
