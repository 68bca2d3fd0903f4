use std::collections::BTreeMap;
use std::fs;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cae_retriever::app::{App, RunOptions};
use cae_retriever::cache::DiskCache;
use cae_retriever::client::DatascapeHttpClient;
use cae_retriever::config::{ClientCredentials, ConfigLoader, RetrieverConfig};
use cae_retriever::domain::OutFormat;
use cae_retriever::error::{ErrorKind, RetrieverError};
use cae_retriever::output::{JsonOutput, LogProgress};
use cae_retriever::request::{FilterValue, RawRequest, TimeRangeInput};
use cae_retriever::upload::S3Uploader;

#[derive(Parser)]
#[command(name = "cae-retriever")]
#[command(about = "Retrieve CAE sensor time series as a GeoJSON feature collection")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run a retrieval request")]
    Run(RunArgs),
    #[command(about = "Inspect or clear persisted credential and catalog state")]
    Cache(CacheArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    lat_range: Option<Vec<f64>>,

    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"], allow_negative_numbers = true)]
    long_range: Option<Vec<f64>>,

    #[arg(long, num_args = 1..=2, value_names = ["START", "END"])]
    time_range: Option<Vec<String>>,

    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    filters: Vec<String>,

    #[arg(long)]
    out_format: Option<OutFormat>,

    #[arg(long)]
    out: Option<String>,

    #[arg(long)]
    bucket_destination: Option<String>,

    #[arg(long, value_name = "FILE")]
    request: Option<String>,
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    command: CacheCommand,
}

#[derive(Subcommand)]
enum CacheCommand {
    #[command(about = "Remove the cached token and catalog")]
    Clear {
        #[arg(long)]
        auth_only: bool,
    },
    #[command(about = "Show cached token expiry and catalog size")]
    Info,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<RetrieverError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &RetrieverError) -> u8 {
    error.kind().map(kind_exit_code).unwrap_or(1)
}

fn kind_exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidInput => 2,
        ErrorKind::UpstreamError => 3,
        ErrorKind::Denied | ErrorKind::ExpiredToken => 4,
    }
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let cache = DiskCache::new(config.cache_dir.clone());

    match cli.command {
        Commands::Run(args) => run_request(args, config, cache),
        Commands::Cache(args) => run_cache(args, config, cache),
    }
}

fn build_app(
    config: &RetrieverConfig,
    cache: DiskCache,
) -> miette::Result<App<DatascapeHttpClient, DiskCache, S3Uploader>> {
    let client = DatascapeHttpClient::new(config)?;
    let mut options = RunOptions::new(ClientCredentials::from_env(), config.work_dir.clone());
    options.concurrency = config.concurrency;
    let uploader = S3Uploader::new(config)?;
    Ok(App::new(client, cache, uploader, options))
}

fn run_request(args: RunArgs, config: RetrieverConfig, cache: DiskCache) -> miette::Result<ExitCode> {
    let document = match &args.request {
        Some(path) => {
            let content = fs::read_to_string(path).into_diagnostic()?;
            RawRequest::from_json(&content)?
        }
        None => RawRequest::default(),
    };
    let raw = document.merge(overrides_from_args(&args)?);

    let app = build_app(&config, cache)?;
    let envelope = app.execute(&raw, &LogProgress)?;
    JsonOutput::print_envelope(&envelope).into_diagnostic()?;

    Ok(match envelope.error {
        Some(kind) => ExitCode::from(kind_exit_code(kind)),
        None => ExitCode::SUCCESS,
    })
}

fn overrides_from_args(args: &RunArgs) -> Result<RawRequest, RetrieverError> {
    let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for item in &args.filters {
        let (field, value) = item.split_once('=').ok_or_else(|| {
            RetrieverError::InvalidInput(format!("filter must be FIELD=VALUE, got '{item}'"))
        })?;
        filters
            .entry(field.trim().to_string())
            .or_default()
            .push(value.trim().to_string());
    }

    Ok(RawRequest {
        lat_range: args.lat_range.clone(),
        long_range: args.long_range.clone(),
        time_range: args.time_range.clone().map(TimeRangeInput::List),
        filters: (!filters.is_empty()).then(|| {
            filters
                .into_iter()
                .map(|(field, values)| (field, FilterValue::List(values)))
                .collect()
        }),
        out_format: args.out_format.map(|format| format.to_string()),
        bucket_destination: args.bucket_destination.clone(),
        out: args.out.clone(),
    })
}

fn run_cache(args: CacheArgs, config: RetrieverConfig, cache: DiskCache) -> miette::Result<ExitCode> {
    let app = build_app(&config, cache)?;
    match args.command {
        CacheCommand::Clear { auth_only } => {
            let result = app.clear_cache(auth_only, &JsonOutput)?;
            JsonOutput::print_clear(&result).into_diagnostic()?;
        }
        CacheCommand::Info => {
            let info = app.cache_info()?;
            JsonOutput::print_info(&info).into_diagnostic()?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
