use action_queue::{EntrySource, RunList};
use anyhow::Result;
use baibridge_core_types::{ActionId, EntryId};
use clap::{Args, Subcommand};

use crate::cli::context::CliContext;
use crate::cli::output::truncate;

#[derive(Args, Clone, Debug)]
pub struct RunListArgs {
    #[command(subcommand)]
    pub command: RunListCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum RunListCommand {
    /// Show the run list
    List,
    /// Append a queued AI action by its six-digit id
    Add {
        /// Action id, e.g. 000001
        action_id: String,
    },
    /// Append a recorded element
    AddRecorded {
        /// Recorded item id
        entry_id: String,
    },
    /// Remove an entry
    Remove {
        /// Run-list entry id
        entry_id: String,
    },
    /// Move an entry into the position held by another
    Move {
        /// Entry to move
        entry_id: String,
        /// Entry whose position it takes
        target_id: String,
    },
    /// Remove every entry
    Clear,
}

pub async fn cmd_runlist(args: RunListArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    match args.command {
        RunListCommand::List => {}
        RunListCommand::Add { action_id } => {
            let id = ActionId::parse(action_id.trim())?;
            let entry = engine.add_to_run_list(&id).await?;
            println!("Added {} ({})", entry.label, entry.id);
        }
        RunListCommand::AddRecorded { entry_id } => {
            let entry = engine.add_recorded_to_run_list(&EntryId(entry_id)).await?;
            println!("Added {} ({})", entry.label, entry.id);
        }
        RunListCommand::Remove { entry_id } => {
            engine.remove_from_run_list(&EntryId(entry_id)).await?;
        }
        RunListCommand::Move {
            entry_id,
            target_id,
        } => {
            engine
                .move_in_run_list(&EntryId(entry_id), &EntryId(target_id))
                .await?;
        }
        RunListCommand::Clear => {
            engine.clear_run_list().await?;
        }
    }

    let list = engine.run_list().await;
    ctx.output().emit(&list, print_run_list)
}

fn print_run_list(list: &RunList) {
    if list.is_empty() {
        println!("[run list is empty]");
        return;
    }
    println!("{:<4} {:<38} {:<9} {:<12} {}", "#", "Entry", "Source", "Type", "Label");
    println!("{}", "-".repeat(90));
    for (idx, entry) in list.entries().iter().enumerate() {
        let source = match entry.source {
            EntrySource::Ai => "ai",
            EntrySource::Recorded => "recorded",
        };
        println!(
            "{:<4} {:<38} {:<9} {:<12} {}",
            idx + 1,
            entry.id.0,
            source,
            entry.action_type,
            truncate(&entry.label, 40),
        );
    }
}
