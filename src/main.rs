use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{debug, info, warn};

use logscope_logs::{Engine, EngineEvent};
use logscope_reader::Reader;

mod config;

use config::Settings;

/// Logscope - tail and filter structured logs, printing the matching records
#[derive(Parser, Debug)]
#[command(name = "logscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files to follow (reads standard input when none are given)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Filter query, e.g. 'level == "ERROR" AND count > 10'
    #[arg(short, long)]
    filter: Option<String>,

    /// Byte offset to start reading from (single file only)
    #[arg(long)]
    offset: Option<u64>,

    /// Settings file (TOML)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the matching records once at the end instead of as they arrive
    #[arg(long)]
    no_follow: bool,

    /// Prefix lines from multiple files with the file name
    #[arg(long)]
    with_origin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays clean for records
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn settings_from(args: &Args) -> Result<Settings> {
    let mut settings = Settings::load_or_default(args.config.as_deref())?;
    if let Some(offset) = args.offset {
        if args.files.len() != 1 {
            bail!("--offset needs exactly one file");
        }
        settings.reader.offset = offset;
    }
    if args.with_origin {
        settings.reader.with_origin = true;
    }
    if args.no_follow {
        settings.engine.follow = false;
    }
    Ok(settings)
}

async fn run(args: Args) -> Result<()> {
    let settings = settings_from(&args)?;
    debug!(?settings, "settings loaded");

    let (mut engine, mut events) = Engine::new(settings.engine.clone());
    if let Some(query) = args.filter.as_deref() {
        engine
            .submit_filter(query)
            .with_context(|| format!("Invalid filter: {}", query))?;
    }

    let reader = Reader::from_paths(&args.files, settings.reader.clone());
    engine
        .start(reader)
        .await
        .context("Failed to start log sources")?;

    let mut printer = ViewPrinter::default();
    let mut failure = None;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = events.recv() => event,
        };

        match event {
            Some(EngineEvent::Redraw | EngineEvent::ScrollToEnd) => {
                if engine.is_following() && !printer.print_new(&engine, &mut io::stdout().lock())? {
                    break;
                }
            }
            Some(EngineEvent::FilterError(reason)) => {
                warn!(error = %reason, "filter failed on a record and was cleared");
            }
            Some(EngineEvent::StreamFailed(reason)) => {
                failure = Some(reason);
                break;
            }
            Some(EngineEvent::Stopped) | None => {
                wait_settled(&engine).await;
                break;
            }
        }
    }

    engine.stop().await;
    printer.print_new(&engine, &mut io::stdout().lock())?;

    info!(
        records = engine.total_count(),
        matched = engine.matched_count(),
        "session finished"
    );

    if let Some(reason) = failure {
        bail!("Log source failed: {}", reason);
    }
    Ok(())
}

/// Wait for an in-flight resweep to reach the end, or for Ctrl-C
async fn wait_settled(engine: &Engine) {
    let settled = async {
        while !engine.is_settled() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::select! {
        _ = settled => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
}

/// Writes view records as JSON lines, remembering how far it got
#[derive(Default)]
struct ViewPrinter {
    printed: usize,
    generation: u64,
}

impl ViewPrinter {
    /// Print records added to the view since the last call. Returns false
    /// when the output has gone away.
    fn print_new(&mut self, engine: &Engine, out: &mut impl Write) -> Result<bool> {
        let (generation, records) = loop {
            let generation = engine.view_generation();
            let start = if generation == self.generation {
                self.printed
            } else {
                0
            };
            let (seen, records) = engine.view_from(start);
            // Retry if the view was rebuilt between the two reads
            if seen == generation {
                break (generation, records);
            }
        };

        if generation != self.generation {
            if self.printed > 0 {
                warn!(printed = self.printed, "view rebuilt, printing from the start");
            }
            self.generation = generation;
            self.printed = 0;
        }

        for record in &records {
            let line = serde_json::to_string(&**record)?;
            if let Err(e) = writeln!(out, "{}", line) {
                if e.kind() == io::ErrorKind::BrokenPipe {
                    return Ok(false);
                }
                return Err(e.into());
            }
        }
        out.flush().or_else(|e| match e.kind() {
            io::ErrorKind::BrokenPipe => Ok(()),
            _ => Err(e),
        })?;

        self.printed += records.len();
        Ok(true)
    }
}
