use std::sync::Arc;

use action_flow::{ExecutionDriver, FailureStrategy, RunReport, StepStatus};
use anyhow::Result;
use bridge_kernel::RunSource;
use clap::{Args, ValueEnum};
use extensions_bridge::{BridgeEvent, ScriptedPage};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::output::{truncate, OutputFormat};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 250;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Execute the run list instead of the reconciled queue
    #[arg(long)]
    pub run_list: bool,

    /// Pause between steps in seconds (0.1 to 10)
    #[arg(long, value_name = "SECS")]
    pub delay: Option<f64>,

    /// What to do when a step fails
    #[arg(long, value_enum)]
    pub on_failure: Option<FailureMode>,

    /// Only these selectors resolve; without any, every selector does
    #[arg(long = "element", value_name = "SELECTOR")]
    pub elements: Vec<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FailureMode {
    Abort,
    Continue,
    Retry,
}

impl From<FailureMode> for FailureStrategy {
    fn from(mode: FailureMode) -> Self {
        match mode {
            FailureMode::Abort => FailureStrategy::Abort,
            FailureMode::Continue => FailureStrategy::Continue,
            FailureMode::Retry => FailureStrategy::Retry {
                max_attempts: RETRY_ATTEMPTS,
                backoff_ms: RETRY_BACKOFF_MS,
            },
        }
    }
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let mut options = ctx.config().driver_options();
    if let Some(secs) = args.delay {
        options = options.with_delay_secs(secs);
    }
    if let Some(mode) = args.on_failure {
        options = options.with_failure_strategy(mode.into());
    }

    let (bus, events) = broadcast::channel(256);
    let page = Arc::new(ScriptedPage::new(bus));
    if args.elements.is_empty() {
        page.set_permissive(true);
    }
    for selector in &args.elements {
        page.add_element(selector.as_str());
    }
    let printer = tokio::spawn(print_events(events, ctx.output()));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling run");
                cancel.cancel();
            }
        })
    };

    let source = if args.run_list {
        RunSource::RunList
    } else {
        RunSource::Queue
    };
    info!(?source, delay_ms = options.delay.as_millis() as u64, "starting run");
    let driver = ExecutionDriver::new(page.clone(), page.clone(), options);
    let report = engine.execute(&driver, source, &cancel).await;

    interrupt.abort();
    drop(driver);
    drop(page);
    let _ = printer.await;

    ctx.output().emit(&report, print_report)
}

async fn print_events(mut events: broadcast::Receiver<BridgeEvent>, output: OutputFormat) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if output == OutputFormat::Human {
                    print_event(&event);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &BridgeEvent) {
    match event {
        BridgeEvent::ActionDispatched { op, selector, ok } => {
            let mark = if *ok { "ok" } else { "failed" };
            match selector {
                Some(selector) => println!("  -> {} {} [{}]", op, selector, mark),
                None => println!("  -> {} [{}]", op, mark),
            }
        }
        BridgeEvent::Highlighted { selector } => println!("  .. {}", selector),
        BridgeEvent::HighlightCleared | BridgeEvent::EvidenceCollected { .. } => {}
    }
}

fn print_report(report: &RunReport) {
    if report.steps.is_empty() {
        println!("[nothing to run]");
        return;
    }
    println!();
    println!("{:<10} {:<10} {:<28} {}", "Step", "Status", "Label", "Detail");
    println!("{}", "-".repeat(80));
    for step in &report.steps {
        let status = match step.status {
            StepStatus::Succeeded => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        println!(
            "{:<10} {:<10} {:<28} {}",
            truncate(&step.step_id, 10),
            status,
            truncate(&step.label, 28),
            step.error.as_deref().unwrap_or(""),
        );
    }
    println!(
        "\n{} succeeded, {} failed, {} skipped in {} ms{}",
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report.latency_ms,
        if report.cancelled {
            " (cancelled)"
        } else if report.aborted {
            " (aborted)"
        } else {
            ""
        }
    );
}
