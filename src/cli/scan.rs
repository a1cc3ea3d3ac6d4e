use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use baibridge_core_types::TabId;
use bridge_kernel::{ScanEngine, ScanReport};
use clap::Args;
use extensions_bridge::ScriptedPage;
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct ScanArgs {
    /// Transcript file, or `-` to read stdin
    pub source: String,

    /// Re-read the file every SECS seconds until Ctrl-C
    #[arg(long, value_name = "SECS")]
    pub watch: Option<u64>,

    /// Tab the bridge is attached to; actions naming another tab are flagged
    #[arg(long)]
    pub tab: Option<String>,
}

pub async fn cmd_scan(args: ScanArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    if let Some(tab) = args.tab.clone() {
        engine.set_current_tab(Some(TabId(tab))).await;
    }

    match args.watch {
        None => {
            let text = read_source(&args.source).await?;
            let report = engine.ingest_text(&text).await?;
            print_report(ctx.output(), &report)
        }
        Some(_) if args.source == "-" => bail!("--watch needs a file, not stdin"),
        Some(secs) => {
            watch(
                &engine,
                PathBuf::from(&args.source),
                Duration::from_secs(secs.max(1)),
                ctx.output(),
            )
            .await
        }
    }
}

async fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("reading stdin")?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("reading {}", source))
    }
}

/// Poll the file through the evidence path, the same way a page would be polled.
async fn watch(
    engine: &ScanEngine,
    path: PathBuf,
    every: Duration,
    output: OutputFormat,
) -> Result<()> {
    let protocol = &engine.config().protocol;
    let (bus, _) = broadcast::channel(16);
    let page = ScriptedPage::new(bus)
        .with_markers([
            protocol.handshake_line_prefix.clone(),
            protocol.ack_line_prefix.clone(),
        ])
        .with_excerpt_chars(engine.config().bridge.excerpt_chars);
    let mut ticker = tokio::time::interval(every);
    info!(path = %path.display(), secs = every.as_secs(), "watching transcript");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("watch stopped");
                return Ok(());
            }
        }

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => page.set_transcript(text),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "transcript unreadable; skipping tick");
                continue;
            }
        }
        match engine.scan_evidence(&page).await {
            Ok(report) if report.changes() > 0 || report.ack_line.is_some() => {
                print_report(output, &report)?;
            }
            Ok(_) => {}
            Err(err) => warn!(code = ?err.code(), error = %err, "scan failed"),
        }
    }
}

fn print_report(output: OutputFormat, report: &ScanReport) -> Result<()> {
    output.emit(report, |report| {
        println!(
            "{} line(s): {} created, {} replaced, {} updated, {} deleted, {} stale, {} repeated",
            report.lines,
            report.created,
            report.replaced,
            report.updated,
            report.deleted,
            report.stale,
            report.suppressed,
        );
        for id in &report.parse_errors {
            println!("  parse error in action #{}", id);
        }
        for stale in &report.stale_tabs {
            println!(
                "  action #{} targets tab {}, not the attached tab",
                stale.action_id, stale.tab
            );
        }
        if report.malformed_sessions > 0 {
            println!("  {} malformed session line(s)", report.malformed_sessions);
        }
        if report.foreign_sessions > 0 {
            println!(
                "  {} session line(s) carried another session key",
                report.foreign_sessions
            );
        }
        println!(
            "Connection: {}",
            if report.connected { "connected" } else { "disconnected" }
        );
        if let Some(ack) = &report.ack_line {
            println!("\nPaste this acknowledgement into the chat:\n\n  {}", ack);
        }
    })
}
