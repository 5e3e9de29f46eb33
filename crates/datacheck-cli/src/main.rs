//! datacheck CLI - compare tables between a source and a target database.

use clap::{Args, Parser, Subcommand};
use datacheck::config::split_list;
use datacheck::{CheckError, CheckOptions, CompareMode, Config, DbPair, DbType, EndpointConfig, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code for a run interrupted by SIGINT or SIGTERM.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser)]
#[command(name = "datacheck")]
#[command(about = "Row-level data consistency check between two databases")]
#[command(version)]
struct Cli {
    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check MySQL / MariaDB databases
    Mysql(CheckArgs),

    /// Check PostgreSQL databases
    Pgsql(CheckArgs),

    /// Run a check described by a YAML configuration file
    Run {
        /// Path to YAML configuration file
        #[arg(short, long, default_value = "datacheck.yaml")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct CheckArgs {
    /// Source address, host:port
    #[arg(long)]
    source: String,

    /// Source user
    #[arg(long)]
    source_user: String,

    /// Source password
    #[arg(long, default_value = "")]
    source_password: String,

    /// Target address, host:port
    #[arg(long)]
    target: String,

    /// Target user [default: source user]
    #[arg(long)]
    target_user: Option<String>,

    /// Target password [default: source password]
    #[arg(long)]
    target_password: Option<String>,

    /// TLS mode: disable, require, verify-ca, verify-full
    #[arg(long, default_value = "disable")]
    ssl_mode: String,

    /// Databases, comma separated; `src:dst` maps differently named databases
    #[arg(short, long)]
    databases: String,

    /// Tables to check, comma separated [default: every table on both sides]
    #[arg(long, default_value = "")]
    tables: String,

    /// Tables to skip, comma separated
    #[arg(long, default_value = "")]
    skip_tables: String,

    /// Columns left out of the comparison, comma separated
    #[arg(long, default_value = "")]
    skip_cols: String,

    /// Key columns to use instead of the primary key, comma separated
    #[arg(long, default_value = "")]
    keys: String,

    /// Row filter applied on both sides
    #[arg(long = "where")]
    where_clause: Option<String>,

    /// Comparison mode: count, fast or slow
    #[arg(long, default_value = "fast", value_parser = parse_mode)]
    mode: CompareMode,

    /// Tables checked concurrently
    #[arg(long, default_value = "2")]
    parallel: usize,

    /// Most uncertain rows kept per table before giving up on it
    #[arg(long, default_value = "10000")]
    capacity: usize,

    /// Recheck passes over differing rows (0 disables rechecking)
    #[arg(long, default_value = "3")]
    max_recheck_times: i64,

    /// Skip rechecking tables with more differing rows than this
    #[arg(long, default_value = "1000")]
    max_recheck_rows: i64,

    /// Seconds to wait between recheck passes
    #[arg(long, default_value = "10")]
    recheck_interval: u64,

    /// Report directory [default: <target_host>_<target_port>]
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
}

fn parse_mode(s: &str) -> Result<CompareMode, String> {
    match s.to_lowercase().as_str() {
        "count" => Ok(CompareMode::Count),
        "fast" => Ok(CompareMode::Fast),
        "slow" => Ok(CompareMode::Slow),
        other => Err(format!("unknown mode '{}': expected count, fast or slow", other)),
    }
}

impl CheckArgs {
    fn into_config(self, db_type: DbType) -> Result<Config, CheckError> {
        let mut source = EndpointConfig::new(
            self.source,
            Some(self.source_user),
            Some(self.source_password),
        );
        let mut target = EndpointConfig::new(self.target, self.target_user, self.target_password);
        source.ssl_mode = self.ssl_mode.clone();
        target.ssl_mode = self.ssl_mode;

        let check = CheckOptions {
            mode: self.mode,
            parallel: self.parallel,
            capacity: self.capacity,
            max_recheck_times: self.max_recheck_times,
            max_recheck_rows: self.max_recheck_rows,
            recheck_interval_secs: self.recheck_interval,
            tables: split_list(&self.tables),
            skip_tables: split_list(&self.skip_tables),
            skip_cols: split_list(&self.skip_cols),
            keys: split_list(&self.keys),
            where_clause: self.where_clause,
            out_dir: self.out_dir,
            ..CheckOptions::default()
        };

        Config {
            db_type,
            source,
            target,
            databases: DbPair::parse_list(&self.databases)?,
            check,
        }
        .prepare()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, CheckError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = match cli.command {
        Commands::Mysql(args) => args.into_config(DbType::Mysql)?,
        Commands::Pgsql(args) => args.into_config(DbType::Postgres)?,
        Commands::Run { config } => {
            let loaded = Config::load(&config)?;
            info!("Loaded configuration from {:?}", config);
            loaded
        }
    };

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let shutdown = setup_signal_handler();

    let result = Orchestrator::new(config)
        .with_shutdown(shutdown)
        .run()
        .await?;

    if cli.output_json {
        println!("{}", result.to_json()?);
    } else {
        for db in &result.databases {
            println!(
                "{}: {} consistent, {} inconsistent, {} failed",
                db.pair,
                db.summary.consistent.len(),
                db.summary.inconsistent.len(),
                db.summary.unknown.len()
            );
        }
        println!("Reports written to {}", result.output_dir.display());
    }

    if result.is_cancelled() {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Printed once a shutdown signal arrives. Running tables are cancelled and
/// reported as failed; queued ones are not started.
fn shutdown_notice(signal: &str) -> String {
    format!("Received {}. Cancelling running tables, skipping the rest...", signal)
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\n{}", shutdown_notice(name));
            token.cancel();
        });
    }

    shutdown
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\n{}", shutdown_notice("Ctrl-C"));
        token.cancel();
    });

    shutdown
}
