use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use conduit_core::{
    init_logging, AppDirs, CancellationToken, Config, ConnectorOptions, ErrorKind, Record,
    Registry, RegistryBuilder, RegistryError,
};
use conduit_plugin::{registrations, transfer, ConnectorHost, TransferSummary};
use serde::Serialize;
use std::future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::UNIX_EPOCH;

#[derive(Debug, Parser)]
#[command(name = "conduit", version, about = "Stream backup records between connectors")]
struct Cli {
    /// Directory relative locations resolve against (defaults to the current directory)
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered connectors and their flags
    Protocols {
        #[arg(long)]
        json: bool,
    },
    /// Check that a location is reachable
    Ping {
        /// `<protocol>://path` or `@name` from config.toml
        location: String,
    },
    /// List the records an importer emits
    Ls {
        location: String,
        #[arg(long)]
        json: bool,
    },
    /// Copy every record from one location into another
    Sync {
        from: String,
        to: String,
        #[arg(long)]
        json: bool,
    },
}

/// One line of `ls` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Listing {
    pathname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    target: String,
    size: u64,
    mode: u32,
    mod_time: u64,
    dev: u64,
}

impl Listing {
    fn of(record: &Record) -> Self {
        let info = &record.file_info;
        Self {
            pathname: record.pathname.clone(),
            target: record.target.clone(),
            size: info.size,
            mode: info.mode,
            mod_time: info
                .mod_time
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            dev: info.dev,
        }
    }

    fn line(&self) -> String {
        let mut line = format!("{:06o} {:>10} {}", self.mode, self.size, self.pathname);
        if !self.target.is_empty() {
            line.push_str(" -> ");
            line.push_str(&self.target);
        }
        line
    }
}

/// Writes `ls` lines, going quiet once the reader hangs up.
struct ListingWriter<W: Write> {
    out: W,
    json: bool,
    closed: bool,
}

impl<W: Write> ListingWriter<W> {
    fn new(out: W, json: bool) -> Self {
        Self {
            out,
            json,
            closed: false,
        }
    }

    /// A broken pipe is the end of output, not an error.
    fn emit(&mut self, listing: &Listing) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        let line = if self.json {
            serde_json::to_string(listing)?
        } else {
            listing.line()
        };
        match writeln!(self.out, "{line}") {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                self.closed = true;
                Ok(())
            }
            other => other,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

fn build_registry() -> Result<Registry, RegistryError> {
    let mut builder = RegistryBuilder::new();
    test_connector::register(&mut builder)?;
    Ok(builder.build())
}

fn connector_options(cwd: Option<PathBuf>) -> ConnectorOptions {
    let mut options = ConnectorOptions::from_env();
    if let Some(cwd) = cwd {
        options.cwd = cwd;
    }
    options
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let dirs = AppDirs::discover()?;
    let config = Config::load_or_default(&dirs)?;
    let _logging = init_logging(&config.logging, &dirs)?;

    let host = ConnectorHost::new(build_registry()?, connector_options(cli.cwd))
        .with_record_buffer(config.transfer.record_buffer);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    run(cli.command, &config, &host, &cancel).await
}

async fn run(
    command: Command,
    config: &Config,
    host: &ConnectorHost,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    match command {
        Command::Protocols { json } => {
            let rows = registrations(host.registry());
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in rows {
                    println!("{:<12} {:<9} {}", row.protocol, row.role.to_string(), row.flags);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ping { location } => {
            let importer = host.open_importer(&config.resolve_location(&location)?).await?;
            let reachable = importer.ping(cancel).await;
            importer.close(cancel).await?;
            reachable.with_context(|| format!("{location} is not reachable"))?;
            println!("{location}: ok");
            Ok(ExitCode::SUCCESS)
        }
        Command::Ls { location, json } => {
            let mut importer = host.open_importer(&config.resolve_location(&location)?).await?;
            // Cancelled on its own once the reader of stdout goes away.
            let listing_done = cancel.child_token();
            let mut out = ListingWriter::new(io::stdout().lock(), json);
            let listed = importer
                .import_with(&listing_done, |record| {
                    let result = match out.emit(&Listing::of(&record)) {
                        Ok(()) => record.ok(),
                        Err(err) => record.error(err),
                    };
                    if out.is_closed() {
                        listing_done.cancel();
                    }
                    future::ready(result)
                })
                .await;
            let pipe_closed = out.is_closed();
            importer.close(cancel).await?;

            let summary = match listed {
                Err(err) if pipe_closed && err.kind() == ErrorKind::Cancelled => {
                    tracing::debug!(location = %location, "Output closed, listing stopped");
                    return Ok(ExitCode::SUCCESS);
                }
                other => other?,
            };
            tracing::info!(location = %location, records = summary.records, "Listed records");
            Ok(exit_code(&summary))
        }
        Command::Sync { from, to, json } => {
            let mut importer = host.open_importer(&config.resolve_location(&from)?).await?;
            let exporter = host.open_exporter(&config.resolve_location(&to)?).await?;

            let transferred = transfer(&mut importer, &exporter, cancel).await;
            importer.close(cancel).await?;
            exporter.close(cancel).await?;
            let summary =
                transferred.with_context(|| format!("sync from {from} to {to} failed"))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(exit_code(&summary))
        }
    }
}

fn print_summary(summary: &TransferSummary) {
    println!(
        "{} records, {} succeeded, {} failed",
        summary.records,
        summary.succeeded,
        summary.failed.len()
    );
    for failure in &summary.failed {
        println!(
            "  {}: {}",
            failure.pathname,
            failure.error().unwrap_or("unknown error")
        );
    }
}

fn exit_code(summary: &TransferSummary) -> ExitCode {
    if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
