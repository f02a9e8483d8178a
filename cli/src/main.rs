//! filegate - Command-line interface for the file transfer engine.
//!
//! `poll` consumes a directory and hands every file to an atomic writer on a
//! second directory; `write` stores a single file through the producer.
//! Options not exposed as flags come from a JSON file using the documented
//! option names (`readLock`, `maxMessagesPerPoll`, ...).

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use filegate_engine::{
    AtomicWriter, EndpointOptions, FileConsumer, FileExist, FileProcessor, FileUnit,
    PollLifecycle, PollReport, ProcessError, ReadLockKind, Scheduler, TransferOutcome,
    WriteOutcome,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// filegate - poll directories and write files atomically
#[derive(Parser, Debug)]
#[command(name = "filegate")]
#[command(version = "0.1.0")]
#[command(about = "Move files between directories with read locks and atomic writes")]
struct Args {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume files from one directory into another
    Poll(PollArgs),
    /// Write a single file into a directory
    Write(WriteArgs),
}

#[derive(clap::Args, Debug)]
struct PollArgs {
    /// Directory to consume
    #[arg(long, value_name = "PATH")]
    from: PathBuf,

    /// Directory consumed files are written to
    #[arg(long, value_name = "PATH")]
    to: PathBuf,

    /// JSON file with endpoint options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read lock: none, markerFile, rename, fileLock, changed or idempotent
    #[arg(long, value_name = "KIND")]
    read_lock: Option<String>,

    /// Threads processing the files of one batch
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Descend into sub-directories
    #[arg(long)]
    recursive: bool,

    /// Keep polling for this many seconds instead of a single cycle
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,
}

#[derive(clap::Args, Debug)]
struct WriteArgs {
    /// Target directory
    #[arg(long, value_name = "PATH")]
    to: PathBuf,

    /// File to read; standard input when omitted
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Target name relative to the directory (defaults to the input file name)
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Existing file policy: Override, Append, Fail, Ignore, Move or TryRename
    #[arg(long, value_name = "POLICY")]
    file_exist: Option<String>,

    /// JSON file with producer options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

/// Hands every consumed file to an `AtomicWriter`.
struct CopyProcessor {
    writer: AtomicWriter,
}

impl FileProcessor for CopyProcessor {
    type Token = Instant;

    fn begin_processing(&self, _unit: &FileUnit) -> Result<Instant, ProcessError> {
        Ok(Instant::now())
    }

    fn process(
        &self,
        _started: &mut Instant,
        unit: &FileUnit,
        reader: &mut dyn Read,
    ) -> Result<(), ProcessError> {
        let name = unit.entry.relative_name();
        self.writer
            .write_with_modified(&name, reader, Some(unit.entry.last_modified))?;
        Ok(())
    }

    fn end_processing(&self, started: Instant, outcome: &TransferOutcome) {
        tracing::debug!(elapsed = ?started.elapsed(), %outcome, "file finished");
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);

    // A second initialization (tests) keeps the first subscriber.
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

/// Parse arguments, set up logging, then run the command
fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.log_format);

    let exit_code = match run_cli(&args) {
        Ok(()) => 0,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<(), String> {
    match &args.command {
        Command::Poll(poll) => run_poll(poll),
        Command::Write(write) => run_write(write),
    }
}

fn load_options(path: Option<&Path>) -> Result<EndpointOptions, String> {
    let Some(path) = path else {
        return Ok(EndpointOptions::default());
    };
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read config {}: {}", path.display(), e))?;
    EndpointOptions::from_json_str(&json).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

fn run_poll(args: &PollArgs) -> Result<(), String> {
    let mut options = load_options(args.config.as_deref())?;
    if let Some(kind) = &args.read_lock {
        let kind: ReadLockKind = kind.parse().map_err(|e| format!("{}", e))?;
        options.read_lock = Some(kind);
    }
    if args.workers.is_some() {
        options.workers = args.workers;
    }
    if args.recursive {
        options.recursive = Some(true);
    }
    if options.initial_delay.is_none() {
        options.initial_delay = Some(0);
    }

    let consumer_config = options.build(&args.from).map_err(|e| e.to_string())?;
    let producer_config = EndpointOptions {
        auto_create: Some(true),
        ..Default::default()
    }
    .build_producer(&args.to)
    .map_err(|e| e.to_string())?;
    let schedule = consumer_config.schedule.clone();

    let processor = CopyProcessor {
        writer: AtomicWriter::new(producer_config),
    };
    let consumer = Arc::new(
        FileConsumer::new(consumer_config, Arc::new(processor)).map_err(|e| e.to_string())?,
    );

    match args.duration {
        None => {
            consumer.start().map_err(|e| format!("Cannot start consumer: {}", e))?;
            let report = consumer.poll().map_err(|e| format!("Poll failed: {}", e))?;
            print_report(&report);
            if report.rolled_back() > 0 {
                return Err(format!("{} file(s) were rolled back", report.rolled_back()));
            }
            Ok(())
        }
        Some(secs) => {
            let mut scheduler = Scheduler::new();
            scheduler
                .spawn(consumer, schedule)
                .map_err(|e| format!("Cannot start consumer: {}", e))?;
            info!(seconds = secs, "polling");
            std::thread::sleep(Duration::from_secs(secs));

            let shutdown = scheduler.shutdown(SHUTDOWN_TIMEOUT);
            if !shutdown.is_clean() {
                warn!(unfinished = shutdown.unfinished.len(), "shutdown timed out");
                return Err("Consumer did not stop in time".to_string());
            }
            Ok(())
        }
    }
}

fn print_report(report: &PollReport) {
    for (path, outcome) in &report.outcomes {
        eprintln!("  {}: {}", path.display(), outcome);
    }
    eprintln!(
        "Summary: {} committed, {} rolled back, {} skipped",
        report.committed(),
        report.rolled_back(),
        report.skipped()
    );
}

fn run_write(args: &WriteArgs) -> Result<(), String> {
    let mut options = load_options(args.config.as_deref())?;
    if let Some(policy) = &args.file_exist {
        let policy: FileExist = policy.parse().map_err(|e| format!("{}", e))?;
        options.file_exist = Some(policy);
    }

    let name = match (&args.name, &args.input) {
        (Some(name), _) => name.clone(),
        (None, Some(input)) => input
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| format!("Cannot derive a name from {}", input.display()))?,
        (None, None) => return Err("--name is required when reading standard input".to_string()),
    };

    let writer = AtomicWriter::new(options.build_producer(&args.to).map_err(|e| e.to_string())?);
    let outcome = match &args.input {
        Some(input) => {
            let mut file = fs::File::open(input)
                .map_err(|e| format!("Cannot open {}: {}", input.display(), e))?;
            writer.write(&name, &mut file)
        }
        None => writer.write(&name, &mut io::stdin().lock()),
    }
    .map_err(|e| format!("Write failed: {}", e))?;

    match outcome {
        WriteOutcome::Written { path, bytes, checksum } => {
            eprintln!("Wrote {} ({} bytes)", path.display(), bytes);
            if let Some(checksum) = checksum {
                eprintln!("  {}: {}", checksum.algorithm(), checksum);
            }
        }
        WriteOutcome::Ignored { path } => eprintln!("Skipped existing {}", path.display()),
    }
    Ok(())
}
