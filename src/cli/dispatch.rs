use super::config::cmd_config;
use super::env::CliArgs;
use super::queue::cmd_queue;
use super::record::cmd_record;
use super::run::cmd_run;
use super::runlist::cmd_runlist;
use super::scan::cmd_scan;
use super::session::{cmd_clear, cmd_handshake, cmd_session};
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Session(args) => cmd_session(args, ctx).await,
        Commands::Handshake(args) => cmd_handshake(args, ctx).await,
        Commands::Scan(args) => cmd_scan(args, ctx).await,
        Commands::Queue => cmd_queue(ctx).await,
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::RunList(args) => cmd_runlist(args, ctx).await,
        Commands::Record(args) => cmd_record(args, ctx).await,
        Commands::Clear(args) => cmd_clear(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
    }
}
