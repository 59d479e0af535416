use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BLK_FILE_CACHE_SIZE: usize = 8;
pub const DEFAULT_RETRY_BACKOFF_SECS: u64 = 10;

/// Bitcoin node data directory and RPC connection details (§6 `btc_data_dir`/`btc_rpc_*`).
#[derive(Clone, Debug)]
pub struct BitcoindConfig {
    pub data_dir: PathBuf,
    pub rpc_url: String,
    pub rpc_username: String,
    pub rpc_password: String,
    pub rpc_timeout: Duration,
}

impl BitcoindConfig {
    pub fn blocks_dir(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub fn block_index_dir(&self) -> PathBuf {
        self.blocks_dir().join("index")
    }
}

/// Where the embedded stores live (§6 `ordi_data_dir`, §4.8 column-family directories).
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub working_dir: PathBuf,
    pub max_file_size: usize,
}

impl StorageConfig {
    pub fn column_family_path(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }
}

/// Ambient resource knobs (§5, §10.2) that aren't named by the distilled spec's own
/// configuration table but are needed to run the process at all.
#[derive(Clone, Debug)]
pub struct ResourcesConfig {
    pub blk_file_cache_size: usize,
    pub retry_backoff: Duration,
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bitcoind: BitcoindConfig,
    pub storage: StorageConfig,
    pub resources: ResourcesConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    MissingVar(&'static str),
}

impl Config {
    /// Builds configuration from the environment variables named in §6: `btc_data_dir`,
    /// `ordi_data_dir`, `btc_rpc_host`, `btc_rpc_user`, `btc_rpc_pass`, plus the ambient knobs
    /// in §10.2, each with a sensible default.
    pub fn from_env() -> Result<Config, ConfigError> {
        let btc_data_dir = required_var("btc_data_dir")?;
        let ordi_data_dir = required_var("ordi_data_dir")?;
        let rpc_url = required_var("btc_rpc_host")?;
        let rpc_username = required_var("btc_rpc_user")?;
        let rpc_password = required_var("btc_rpc_pass")?;

        let rpc_timeout_secs = optional_var("btc_rpc_timeout_secs")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);
        let blk_file_cache_size = optional_var("ordi_blk_cache_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BLK_FILE_CACHE_SIZE);
        let log_level = optional_var("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Config {
            bitcoind: BitcoindConfig {
                data_dir: PathBuf::from(btc_data_dir),
                rpc_url,
                rpc_username,
                rpc_password,
                rpc_timeout: Duration::from_secs(rpc_timeout_secs),
            },
            storage: StorageConfig {
                working_dir: PathBuf::from(ordi_data_dir),
                max_file_size: 64 * 1024 * 1024,
            },
            resources: ResourcesConfig {
                blk_file_cache_size,
                retry_backoff: Duration::from_secs(DEFAULT_RETRY_BACKOFF_SECS),
                log_level,
            },
        })
    }

    /// A config pointing at a throwaway temp directory, for unit/integration tests that never
    /// reach a real node or real disk state across runs.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn test_default() -> Config {
        Config {
            bitcoind: BitcoindConfig {
                data_dir: PathBuf::from("/tmp/ord-index-test/bitcoin"),
                rpc_url: "http://127.0.0.1:18443".to_string(),
                rpc_username: "test".to_string(),
                rpc_password: "test".to_string(),
                rpc_timeout: Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS),
            },
            storage: StorageConfig {
                working_dir: PathBuf::from("/tmp/ord-index-test/data"),
                max_file_size: 64 * 1024 * 1024,
            },
            resources: ResourcesConfig {
                blk_file_cache_size: DEFAULT_BLK_FILE_CACHE_SIZE,
                retry_backoff: Duration::from_millis(10),
                log_level: "debug".to_string(),
            },
        }
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_default_points_at_temp_paths() {
        let config = Config::test_default();
        assert_eq!(config.storage.max_file_size, 64 * 1024 * 1024);
        assert_eq!(config.bitcoind.rpc_timeout, Duration::from_secs(30));
    }

    #[test]
    fn blocks_dir_and_index_dir_are_derived_from_data_dir() {
        let config = Config::test_default();
        assert_eq!(
            config.bitcoind.blocks_dir(),
            config.bitcoind.data_dir.join("blocks")
        );
        assert_eq!(
            config.bitcoind.block_index_dir(),
            config.bitcoind.data_dir.join("blocks").join("index")
        );
    }
}
