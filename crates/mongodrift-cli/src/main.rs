#![forbid(unsafe_code)]

mod output;

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use mongodrift_core::config::{ConfigOverrides, DriftConfig, resolve_config};
use mongodrift_core::orchestrator::Orchestrator;
use mongodrift_sampler::MongoSampler;
use output::{CliError, render_error};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "mongodrift: detect configuration drift in a MongoDB deployment",
    long_about = "Sample a MongoDB deployment's databases, users, and replica-set layout, \
                  print a unified diff against the previous snapshot, and store the new one.",
    after_help = "EXAMPLES:\n    # Compare against the last run and store a new snapshot\n    mongodrift --mongo-uri mongodb://db-a:27017 --name prod\n\n    # Only print the current inventory\n    mongodrift --no-diff\n\n    # Emit machine-readable output\n    mongodrift --json"
)]
struct Cli {
    /// MongoDB connection string.
    #[arg(long, value_name = "URI")]
    mongo_uri: Option<String>,

    /// Directory holding stored snapshots.
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Unchanged lines shown around each change.
    #[arg(long = "context-line", value_name = "N")]
    context_lines: Option<usize>,

    /// Number of snapshot versions to keep per name.
    #[arg(long = "keep-version", value_name = "N")]
    keep_versions: Option<u64>,

    /// Print the sampled inventory only; no diff, nothing stored.
    #[arg(long)]
    no_diff: bool,

    /// Snapshot namespace.
    #[arg(long)]
    name: Option<String>,

    /// Sampling timeout in seconds.
    #[arg(long = "timeout", value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Config file (default: <config dir>/mongodrift/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit JSON output instead of a unified diff.
    #[arg(long)]
    json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mongo_uri: self.mongo_uri.clone(),
            data_dir: self.data_dir.clone(),
            context_lines: self.context_lines,
            keep_versions: self.keep_versions,
            name: self.name.clone(),
            no_diff: self.no_diff,
            sample_timeout_secs: self.timeout_secs,
            json: self.json,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("MONGODRIFT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "mongodrift=debug,mongodrift_core=debug,mongodrift_sampler=debug,info"
        } else {
            "mongodrift=warn,mongodrift_core=warn,mongodrift_sampler=warn,error"
        })
    });

    let format = env::var("MONGODRIFT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(io::stderr))
                .init();
        }
    }
}

fn run(config: &DriftConfig) -> Result<(), CliError> {
    let sampler = MongoSampler::new(config.mongo_uri.clone());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let outcome = Orchestrator::new(config, sampler)
        .run(&mut out)
        .map_err(|err| CliError::from(&err))?;

    if let Some(warning) = &outcome.retention_warning {
        warn!(name = %config.name, "{warning}");
    }
    info!(
        name = %config.name,
        state = %outcome.state,
        saved = outcome.saved.as_ref().map(|rec| rec.sequence),
        "run finished"
    );
    Ok(())
}

fn fail(json: bool, error: &CliError) -> ExitCode {
    let stderr = io::stderr();
    let mut err_out = stderr.lock();
    // Nothing sensible is left to do if stderr itself is gone.
    let _ = render_error(&mut err_out, json, error);
    let _ = err_out.flush();
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match resolve_config(cli.config.as_deref(), cli.overrides()) {
        Ok(config) => config,
        Err(err) => return fail(cli.json, &CliError::config(&err)),
    };
    if cli.verbose {
        info!(?config, "configuration resolved");
    }

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(cli.json, &err),
    }
}
