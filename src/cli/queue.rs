use action_queue::{ActionQueueEntry, ActionStatus};
use anyhow::Result;

use crate::cli::context::CliContext;
use crate::cli::output::truncate;

pub async fn cmd_queue(ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let entries = engine.queue().await;
    ctx.output().emit(&entries, |entries| print_queue(entries))
}

fn print_queue(entries: &[ActionQueueEntry]) {
    if entries.is_empty() {
        println!("[queue is empty]");
        return;
    }
    println!("{:<8} {:<12} {:<4} {:<24} {}", "ID", "Status", "Ver", "Label", "Target");
    println!("{}", "-".repeat(80));
    for entry in entries {
        println!(
            "{:<8} {:<12} {:<4} {:<24} {}",
            entry.action_id.as_str(),
            status_label(entry.status),
            entry.update_version,
            truncate(&entry.label, 24),
            truncate(&entry.meta(), 40),
        );
    }
}

fn status_label(status: ActionStatus) -> &'static str {
    match status {
        ActionStatus::Queued => "queued",
        ActionStatus::ParseError => "parse error",
        ActionStatus::Deleted => "deleted",
    }
}
