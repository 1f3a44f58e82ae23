//! psync - bidirectional directory synchronization
//!
//! Two psync processes connected by a byte stream reconcile every directory
//! both of them have configured. `psync sync -- <command>` starts the peer
//! (typically `ssh host psync serve`) and drives the run; `psync serve`
//! speaks the protocol on standard input and output.

mod display;
mod json_output;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use display::{ConsoleSink, Origin, RawSink};
use json_output::RunResultJson;
use psync_config::{Config, ConfigLoader, LoggingConfig};
use psync_io::WireDuplex;
use psync_protocol::{DirectoryRegistry, Negotiator};
use psync_types::{CancellationToken, Error, StatusLine, StatusSink, SyncMode};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Command, ExitStatus, Stdio};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// psync - bidirectional directory synchronization
#[derive(Parser)]
#[command(
    name = "psync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Bidirectional directory synchronization between two peers",
    long_about = "psync keeps directory trees on two machines in sync.\n\
                  Changes made on either side since the last run are merged,\n\
                  and replaced or deleted files are kept as backups."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Quiet mode - no progress counters
    #[arg(short, long)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of standard error
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Format logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the peer protocol on standard input and output
    Serve,
    /// Start a peer and synchronize the shared directories
    Sync {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
        /// Make the peer's trees identical to the local ones
        #[arg(short, long, conflicts_with = "get")]
        put: bool,
        /// Make the local trees identical to the peer's
        #[arg(short, long)]
        get: bool,
        /// Command that starts the peer, e.g. `ssh host psync serve`
        #[arg(required = true, trailing_var_arg = true, num_args = 1..)]
        remote: Vec<String>,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let code = run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(&cli, &config.logging)?;

    info!("psync v{} starting", env!("CARGO_PKG_VERSION"));

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Serve => serve_command(config, token).await,
        Commands::Sync {
            json,
            put,
            get,
            remote,
        } => {
            let mode = if put {
                SyncMode::Put
            } else if get {
                SyncMode::Get
            } else {
                SyncMode::Sync
            };
            sync_command(config, remote, mode, json, cli.quiet, token).await
        }
        Commands::Config { default } => {
            config_command(&config, default)?;
            Ok(0)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("Failed to load configuration '{}'", path.display()))?,
        None => ConfigLoader::load_default().context("Failed to load configuration")?,
    };
    Ok(config)
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let log_file = cli.log_file.as_ref().or(logging.log_file.as_ref());
    let (writer, guard) = match log_file {
        Some(path) => {
            let name = path
                .file_name()
                .ok_or_else(|| anyhow!("Invalid log file path '{}'", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(io::stderr), None),
    };

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(log_file.is_none() && logging.colored_output)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if cli.json_logs || logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(guard)
}

async fn serve_command(config: Config, token: CancellationToken) -> Result<i32> {
    let registry = DirectoryRegistry::from_config(&config)?;
    info!("Serving {} directories on standard input", registry.len());

    let transport = config.transport;
    let outcome = tokio::task::spawn_blocking(move || {
        let mut duplex = WireDuplex::stdio(transport.timeout(), transport.buffer_size)
            .map_err(Error::from)?;
        let sink = RawSink::new(io::stderr());
        let (reader, writer) = duplex.split();
        Negotiator::new(&registry, &sink, token).run(reader, writer)
    })
    .await?;

    match outcome {
        Ok(report) => {
            info!("{} of {} directories synchronized", report.synced(), report.directories.len());
            Ok(report.exit_code())
        }
        Err(e) => {
            warn!("Negotiation aborted: {}", e);
            Ok(e.exit_code().max(1))
        }
    }
}

async fn sync_command(
    config: Config,
    remote: Vec<String>,
    mode: SyncMode,
    json: bool,
    quiet: bool,
    token: CancellationToken,
) -> Result<i32> {
    let registry = DirectoryRegistry::from_config(&config)?;
    let (program, args) = remote
        .split_first()
        .ok_or_else(|| anyhow!("No remote command given"))?;

    if !quiet && !json {
        println!(
            "{} {} of {} directories with {}",
            style("⟲").blue().bold(),
            match mode {
                SyncMode::Sync => "Synchronizing",
                SyncMode::Put => "Putting",
                SyncMode::Get => "Getting",
            },
            registry.len(),
            style(remote.join(" ")).cyan()
        );
    }

    info!("Starting peer: {}", remote.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start '{}'", program))?;
    let stdin = child.stdin.take().context("Peer input is not piped")?;
    let stdout = child.stdout.take().context("Peer output is not piped")?;
    let stderr = child.stderr.take().context("Peer status is not piped")?;

    let status_quiet = quiet || json;
    let forwarder = std::thread::spawn(move || forward_peer_status(stderr, status_quiet));

    let transport = config.transport;
    let (outcome, status) = tokio::task::spawn_blocking(move || -> io::Result<_> {
        let outcome = {
            let mut duplex =
                WireDuplex::wire(stdout, stdin, transport.timeout(), transport.buffer_size);
            let sink = ConsoleSink::new(Origin::Local, status_quiet);
            let (reader, writer) = duplex.split();
            Negotiator::new(&registry, &sink, token)
                .with_mode(mode)
                .run(reader, writer)
        };
        let status = child.wait()?;
        Ok((outcome, status))
    })
    .await??;

    if forwarder.join().is_err() {
        warn!("Peer status forwarding thread panicked");
    }
    report_peer_exit(status);

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", style("✗").red().bold(), e);
            return Ok(e.exit_code().max(1));
        }
    };

    if json {
        println!("{}", RunResultJson::new(&mode.to_string(), &report).to_json()?);
    } else if !quiet {
        display::print_report(&report);
    }
    info!("Sync completed");
    Ok(report.exit_code())
}

/// Show the peer's status lines next to the local ones
fn forward_peer_status(stderr: ChildStderr, quiet: bool) {
    let sink = ConsoleSink::new(Origin::Remote, quiet);
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else {
            break;
        };
        match line.parse::<StatusLine>() {
            Ok(status) => sink.emit(&status),
            Err(_) => eprintln!("{} {}", style("peer").dim(), line),
        }
    }
}

fn report_peer_exit(status: ExitStatus) {
    if !status.success() {
        warn!("Peer exited with {}", status);
    }
}

fn config_command(config: &Config, default: bool) -> Result<()> {
    let shown = if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        serde_yaml::to_string(&Config::default())?
    } else {
        println!("{} Current configuration:", style("⚙").blue().bold());
        if ConfigLoader::config_exists().is_none() {
            println!("# no configuration file found, showing defaults");
        }
        serde_yaml::to_string(config)?
    };
    print!("{}", shown);
    Ok(())
}
