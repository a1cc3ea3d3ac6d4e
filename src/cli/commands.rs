use clap::Subcommand;

use super::config::ConfigArgs;
use super::record::RecordArgs;
use super::run::RunArgs;
use super::runlist::RunListArgs;
use super::scan::ScanArgs;
use super::session::{ClearArgs, HandshakeArgs, SessionArgs};

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Show the session line to paste into the chat, or rotate the token
    Session(SessionArgs),

    /// Start the staged workflow handshake and print the bootstrap prompt
    Handshake(HandshakeArgs),

    /// Scan transcript text for protocol lines
    Scan(ScanArgs),

    /// Show the reconciled action queue
    Queue,

    /// Execute the queue or the run list
    Run(RunArgs),

    /// Edit the operator-curated run list
    #[command(name = "runlist")]
    RunList(RunListArgs),

    /// Record page elements for the run list
    Record(RecordArgs),

    /// Drop reconciled actions
    Clear(ClearArgs),

    /// Manage bridge configuration
    Config(ConfigArgs),
}
