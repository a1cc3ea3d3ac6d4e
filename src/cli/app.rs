use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{apply_runtime_overrides, init_logging, load_local_env_overrides, ConfigFile};

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let args = CliArgs::parse();
    init_logging(&args.log_level, args.debug)?;
    debug!(version = env!("CARGO_PKG_VERSION"), "baibridge starting");

    let file = ConfigFile::locate(args.config.as_ref())?;
    let config = apply_runtime_overrides(file.load().await?);
    let ctx = CliContext::new(config, file.path, args.output);

    let result = dispatch(&args, &ctx).await;
    if let Err(err) = &result {
        let chain = format!("{:#}", err);
        error!(error = %chain, "command failed");
    }
    result
}
