use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use config::config::Config;
use ord_index_core::callbacks::Callbacks;
use ord_index_core::orchestrator::Orchestrator;
use ord_index_core::try_error;
use ord_index_core::Context;

#[derive(Parser, Debug)]
#[clap(name = "ord-index")]
enum Opts {
    /// Bootstrap from the node's `blocks/index`, then follow the chain tip forever.
    Run,
    /// Maintenance commands that don't touch the store.
    #[clap(subcommand)]
    Config(ConfigCommand),
}

#[derive(Parser, Debug)]
enum ConfigCommand {
    /// Print the configuration resolved from the environment (§6), redacting `btc_rpc_pass`.
    Show,
}

pub fn main() {
    let logger = hiro_system_kit::log::setup_logger();
    let _guard = hiro_system_kit::log::setup_global_logger(logger.clone());
    let ctx = Context {
        logger: Some(logger),
        tracer: false,
    };

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            println!("{e}");
            process::exit(1);
        }
    };

    let result = match opts {
        Opts::Run => run(&ctx),
        Opts::Config(ConfigCommand::Show) => show_config(),
    };

    if let Err(e) = result {
        try_error!(ctx, "{}", e);
        process::exit(1);
    }
}

fn run(ctx: &Context) -> Result<(), String> {
    let config = Config::from_env().map_err(|e| e.to_string())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| format!("failed to install signal handler: {e}"))?;

    let mut orchestrator = Orchestrator::bootstrap(&config, ctx).map_err(|e| e.to_string())?;
    let callbacks = Callbacks::none();
    orchestrator
        .run(&callbacks, &shutdown, ctx)
        .map_err(|e| e.to_string())
}

fn show_config() -> Result<(), String> {
    let config = Config::from_env().map_err(|e| e.to_string())?;
    println!("btc_data_dir    = {}", config.bitcoind.data_dir.display());
    println!("btc_rpc_host    = {}", config.bitcoind.rpc_url);
    println!("btc_rpc_user    = {}", config.bitcoind.rpc_username);
    println!("btc_rpc_pass    = ***redacted***");
    println!("btc_rpc_timeout = {:?}", config.bitcoind.rpc_timeout);
    println!("ordi_data_dir   = {}", config.storage.working_dir.display());
    println!(
        "ordi_blk_cache_size = {}",
        config.resources.blk_file_cache_size
    );
    println!("retry_backoff   = {:?}", config.resources.retry_backoff);
    println!("log_level       = {}", config.resources.log_level);
    Ok(())
}
