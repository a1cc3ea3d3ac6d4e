use anyhow::Result;
use clap::Args;
use serde_json::json;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Generate a new session token; the chat must confirm it again
    #[arg(long)]
    pub rotate: bool,
}

#[derive(Args, Clone, Debug)]
pub struct HandshakeArgs {
    /// Forget the current workflow instead of starting one
    #[arg(long)]
    pub reset: bool,
}

#[derive(Args, Clone, Debug)]
pub struct ClearArgs {
    /// Also forget seen fingerprints, the run list and recordings
    #[arg(long)]
    pub all: bool,
}

pub async fn cmd_session(args: SessionArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    if args.rotate {
        engine.rotate_session().await?;
    }
    let status = engine.status().await;
    let line = engine.session_line().await;

    let view = json!({ "session_line": line, "status": status });
    ctx.output().emit(&view, |_| {
        println!("Paste this line into the chat:\n");
        println!("  {}\n", line);
        println!(
            "Connection: {}",
            if status.connected { "connected" } else { "disconnected" }
        );
        println!("Handshake:  {:?}", status.handshake_stage);
        println!(
            "Queue:      {} action(s), {} executable",
            status.records, status.executable
        );
        println!("Run list:   {} step(s)", status.run_list);
    })
}

pub async fn cmd_handshake(args: HandshakeArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    if args.reset {
        engine.reset_handshake().await?;
        println!("Workflow handshake reset");
        return Ok(());
    }
    let prompt = engine.begin_handshake().await?;
    let status = engine.status().await;

    let view = json!({
        "workflow_id": status.workflow_id,
        "stage": status.handshake_stage,
        "prompt": prompt,
    });
    ctx.output().emit(&view, |_| println!("{}", prompt))
}

pub async fn cmd_clear(args: ClearArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    if args.all {
        engine.clear_all().await?;
        println!("Cleared queue, seen lines, run list and recordings");
    } else {
        engine.clear_queue().await?;
        println!("Cleared action queue");
    }
    Ok(())
}
