//! Replays a recorded debugger transcript through the crash analysis
//! pipeline and prints the finalized report JSON.
//!
//! A transcript is a JSON object mapping command strings to their raw
//! output, captured from a live LLDB or WinDbg session:
//!
//! ```text
//! postmortem-analyze transcript.json --dialect lldb --pretty
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use postmortem::common::Dialect;
use postmortem::debugger::{Debugger, ReplayTransport};
use postmortem::pipeline::{run_analysis, PipelineOptions};

#[derive(Debug, Parser)]
#[command(about = "Analyze a recorded debugger transcript into a crash report")]
struct Args {
    /// Path to the transcript JSON ({"command": "output", …}).
    transcript: PathBuf,

    /// Debugger dialect the transcript was recorded from.
    #[arg(long, default_value = "lldb")]
    dialect: String,

    /// Pretty-print the report JSON.
    #[arg(long)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let dialect = match args.dialect.to_ascii_lowercase().as_str() {
        "lldb" => Dialect::Lldb,
        "windbg" | "cdb" => Dialect::WinDbg,
        other => anyhow::bail!("unknown dialect `{other}` (expected lldb or windbg)"),
    };

    let transport = ReplayTransport::from_json_file(dialect, &args.transcript)
        .with_context(|| format!("failed to load {}", args.transcript.display()))?;
    let debugger = Debugger::new(Box::new(transport));
    debugger
        .open(&args.transcript)
        .context("failed to open transcript")?;

    let report = run_analysis(&debugger, None, &PipelineOptions::default());
    let json = if args.pretty {
        report.to_json_pretty()?
    } else {
        report.to_json()?
    };
    println!("{json}");
    Ok(())
}
