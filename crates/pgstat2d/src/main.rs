//! pgstat2d - PostgreSQL statistics collector daemon.
//!
//! Runs a collection cycle every interval and writes the normalized records
//! to stdout as JSON lines or InfluxDB line protocol. Logs go to stderr.

use std::io::{Stdout, stdout};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgstat2_core::config::{CollectorConfig, DEFAULT_ADDRESS};
use pgstat2_core::gather::{CycleReport, Gatherer};
use pgstat2_core::record::{Fields, Tags};
use pgstat2_core::sink::{JsonLinesSink, LineProtocolSink, ServerTagged, Sink};
use pgstat2_core::source::PostgresSource;

/// Output encoding for collected records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// One JSON object per line.
    Json,
    /// InfluxDB line protocol.
    Line,
}

/// PostgreSQL statistics collector daemon.
#[derive(Parser, Debug)]
#[command(name = "pgstat2d", about = "PostgreSQL statistics collector daemon", version)]
struct Args {
    /// Connection address: libpq key=value string or postgres:// URL.
    #[arg(long, env = "PGSTAT2_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Value for the "server" tag. Defaults to the address without credentials.
    #[arg(long, env = "PGSTAT2_OUTPUT_ADDRESS")]
    output_address: Option<String>,

    /// Only collect these databases (comma separated). Do not combine with --ignored-databases.
    #[arg(long, env = "PGSTAT2_DATABASES", value_delimiter = ',')]
    databases: Vec<String>,

    /// Collect every database except these (comma separated).
    #[arg(long, env = "PGSTAT2_IGNORED_DATABASES", value_delimiter = ',')]
    ignored_databases: Vec<String>,

    /// Maximum connection lifetime (e.g. "30m", "1h"). "0s" keeps connections forever.
    #[arg(long, env = "PGSTAT2_MAX_LIFETIME", default_value = "0s", value_parser = humantime::parse_duration)]
    max_lifetime: Duration,

    /// The address points at a transaction-pooling proxy (pgbouncer).
    #[arg(long, env = "PGSTAT2_PGBOUNCER")]
    pgbouncer: bool,

    /// Collection interval (e.g. "10s", "1m").
    #[arg(short, long, default_value = "10s", value_parser = humantime::parse_duration)]
    interval: Duration,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            address: self.address.clone(),
            output_address: self.output_address.clone(),
            databases: non_empty(&self.databases),
            ignored_databases: non_empty(&self.ignored_databases),
            max_lifetime: self.max_lifetime,
            pgbouncer: self.pgbouncer,
        }
    }
}

/// Drops blank entries left by trailing commas or empty env vars.
fn non_empty(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stdout writer in the selected format.
enum Output {
    Json(JsonLinesSink<Stdout>),
    Line(LineProtocolSink<Stdout>),
}

impl Output {
    fn new(format: Format) -> Self {
        match format {
            Format::Json => Output::Json(JsonLinesSink::new(stdout())),
            Format::Line => Output::Line(LineProtocolSink::new(stdout())),
        }
    }

    fn flush(&mut self) {
        match self {
            Output::Json(s) => s.flush(),
            Output::Line(s) => s.flush(),
        }
    }

    fn write_errors(&self) -> u64 {
        match self {
            Output::Json(s) => s.write_errors(),
            Output::Line(s) => s.write_errors(),
        }
    }
}

impl Sink for Output {
    fn append(&mut self, measurement: &str, fields: Fields, tags: Tags) {
        match self {
            Output::Json(s) => s.append(measurement, fields, tags),
            Output::Line(s) => s.append(measurement, fields, tags),
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgstat2d", "pgstat2_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Describes a cycle report for logging.
fn describe_report(report: &CycleReport) -> String {
    let collected = report.collected().count();
    let skipped = report.skipped().count();
    let mut description = format!(
        "{} records from {} categories",
        report.records(),
        collected
    );
    if skipped > 0 {
        let names: Vec<&str> = report.skipped().map(|c| c.name()).collect();
        description.push_str(&format!(", skipped {}", names.join(", ")));
    }
    description.push_str(&format!(" in {}ms", report.total.as_millis()));
    description
}

fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let config = args.collector_config();

    info!("pgstat2d {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}, format={:?}, pgbouncer={}, max_lifetime={}",
        humantime::format_duration(args.interval),
        args.format,
        args.pgbouncer,
        humantime::format_duration(args.max_lifetime)
    );

    let server = config.server_tag();
    let mut source = match PostgresSource::from_config(&config) {
        Ok(source) => source,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match source.try_connect() {
        Ok(()) => info!("Connected to {}", server),
        Err(e) => warn!("Initial connection failed ({}), will retry every cycle", e),
    }

    let gatherer = Gatherer::new(config.address.clone()).with_compatibility(config.compatibility());
    let mut sink = ServerTagged::new(server, Output::new(args.format));

    // Setup graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut cycle_count: u64 = 0;
    let mut failed_cycles: u64 = 0;
    let mut last_write_errors: u64 = 0;

    info!("Starting collection loop");

    while running.load(Ordering::SeqCst) {
        cycle_count += 1;

        match gatherer.gather(&mut source, &mut sink) {
            Ok(report) => {
                info!("Cycle #{}: {}", cycle_count, describe_report(&report));
            }
            Err(e) => {
                failed_cycles += 1;
                error!(
                    "Cycle #{} failed at {}: {} ({} records forwarded before failure)",
                    cycle_count,
                    e.category,
                    e,
                    e.report.records()
                );
            }
        }

        let output = sink.inner_mut();
        output.flush();
        let write_errors = output.write_errors();
        if write_errors > last_write_errors {
            warn!(
                "{} records could not be written this cycle",
                write_errors - last_write_errors
            );
            last_write_errors = write_errors;
        }

        if args.once {
            break;
        }

        // Sleep with periodic checks for shutdown signal
        let sleep_interval = Duration::from_millis(100);
        let mut remaining = args.interval;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = remaining.min(sleep_interval);
            std::thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    debug!("{} cycles, {} failed", cycle_count, failed_cycles);
    info!("Shutdown complete");

    if args.once && failed_cycles > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
