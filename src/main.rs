// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, set up logging, build the API
//   client and hand the command to the UI layer.
// - Every failure is reported once and mapped to exit code 2.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use forge_oss_cli::api::ApiClient;
use forge_oss_cli::chunk::TokenPolicy;
use forge_oss_cli::config::Config;
use forge_oss_cli::state::StateDir;
use forge_oss_cli::ui::{report_failure, run_resumable, ResumeMode};
use forge_oss_cli::upload::{RetryPolicy, UploadOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "forge-oss")]
#[command(about = "Object storage command line client", long_about = None)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TokenRefresh {
    EveryChunk,
    OnUnauthorized,
}

impl From<TokenRefresh> for TokenPolicy {
    fn from(value: TokenRefresh) -> Self {
        match value {
            TokenRefresh::EveryChunk => TokenPolicy::EveryChunk,
            TokenRefresh::OnUnauthorized => TokenPolicy::OnUnauthorized,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "upload a file in multiple pieces (i.e. resumables)")]
    Resumable {
        #[arg(help = "file name")]
        filename: PathBuf,

        #[arg(help = "split the file in N pieces")]
        pieces: u32,

        #[arg(short, long, help = "bucket key [default: current bucket]")]
        bucket: Option<String>,

        #[arg(long, help = "fail if the server finalizes the object before the last piece")]
        strict: bool,

        #[arg(long, default_value_t = 0, help = "retries per piece on network or 5xx errors")]
        retries: u32,

        #[arg(long, value_enum, default_value_t = TokenRefresh::EveryChunk)]
        token_refresh: TokenRefresh,

        #[arg(long, value_name = "SECS", help = "give up between pieces after this many seconds")]
        timeout: Option<u64>,

        #[arg(long, conflicts_with = "no_resume", help = "continue an unfinished upload without asking")]
        resume: bool,

        #[arg(long, help = "always start a new upload session")]
        no_resume: bool,
    },
    #[command(about = "print the URN of an uploaded file")]
    Urn {
        #[arg(help = "file key")]
        file_key: String,

        #[arg(short, long, help = "bucket key [default: current bucket]")]
        bucket: Option<String>,

        #[arg(long, help = "padded base64 instead of the URL-safe form")]
        raw: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let state = StateDir::new(&config.data_dir);

    match cli.command {
        Commands::Resumable {
            filename,
            pieces,
            bucket,
            strict,
            retries,
            token_refresh,
            timeout,
            resume,
            no_resume,
        } => {
            let api = ApiClient::new(&config)?;
            let mut options = UploadOptions::new(pieces);
            options.strict = strict;
            options.retry = RetryPolicy::with_retries(retries);
            options.token_policy = token_refresh.into();
            options.timeout = timeout.map(Duration::from_secs);
            let mode = match (resume, no_resume) {
                (true, _) => ResumeMode::Always,
                (_, true) => ResumeMode::Never,
                _ => ResumeMode::Ask,
            };
            run_resumable(&api, &state, &filename, bucket.as_deref(), options, mode)?;
        }
        Commands::Urn { file_key, bucket, raw } => {
            let bucket_key = state.current_bucket(bucket.as_deref())?;
            println!("{}", state.urn(&bucket_key, &file_key, !raw)?);
        }
    }
    Ok(())
}
