use action_queue::{RecordedElement, RecordedItem};
use anyhow::Result;
use baibridge_core_types::EntryId;
use clap::{Args, Subcommand};

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct RecordArgs {
    #[command(subcommand)]
    pub command: RecordCommand,
}

#[derive(Subcommand, Clone, Debug)]
pub enum RecordCommand {
    /// Record an element by selector
    Add {
        /// CSS selector of the element
        selector: String,
        /// Human-readable label
        #[arg(long)]
        label: Option<String>,
        /// Page the element was recorded on
        #[arg(long)]
        url: Option<String>,
    },
    /// List recorded elements
    List,
    /// Forget a recorded element
    Remove {
        /// Recorded item id
        entry_id: String,
    },
}

pub async fn cmd_record(args: RecordArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    match args.command {
        RecordCommand::Add {
            selector,
            label,
            url,
        } => {
            let element = RecordedElement {
                selector,
                label,
                url,
            };
            match engine.record_element(element).await? {
                Some(item) => println!("Recorded {} ({})", item.label, item.id),
                None => println!("Duplicate recording ignored"),
            }
            Ok(())
        }
        RecordCommand::List => {
            let items = engine.recorded().await;
            ctx.output().emit(&items, |items| print_items(items))
        }
        RecordCommand::Remove { entry_id } => {
            engine.remove_recorded(&EntryId(entry_id)).await?;
            Ok(())
        }
    }
}

fn print_items(items: &[RecordedItem]) {
    if items.is_empty() {
        println!("[nothing recorded]");
        return;
    }
    println!("{:<38} {:<24} {}", "ID", "Label", "Selector");
    println!("{}", "-".repeat(90));
    for item in items {
        println!("{:<38} {:<24} {}", item.id.0, item.label, item.selector);
    }
}
