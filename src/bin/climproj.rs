use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use climproj::app::{App, ProgressSink};
use climproj::catalog::EsgfHttpClient;
use climproj::config::{ConfigLoader, Overrides};
use climproj::domain::{BoundingBox, Point};
use climproj::download::HttpFetcher;
use climproj::error::ClimprojError;
use climproj::metadata::StaticMetadata;
use climproj::netcdf_io::NetcdfIo;
use climproj::output::{JsonOutput, OutputMode, TextOutput};

#[derive(Parser)]
#[command(name = "climproj")]
#[command(
    about = "Download CMIP6 daily projections from ESGF and reshape them into per-year grids or point tables"
)]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./climproj.json, then the user config directory)
    #[arg(long)]
    config: Option<String>,

    /// Restrict to these models (comma separated)
    #[arg(long, value_delimiter = ',')]
    models: Option<Vec<String>>,

    /// Scenarios, e.g. ssp245,ssp585
    #[arg(long, value_delimiter = ',')]
    experiments: Option<Vec<String>>,

    /// Variables, canonical (PR, T2M) or CMIP6 (pr, tas)
    #[arg(long, value_delimiter = ',')]
    variables: Option<Vec<String>>,

    /// lon_min,lat_min,lon_max,lat_max
    #[arg(long, allow_hyphen_values = true, conflicts_with = "point")]
    bbox: Option<BoundingBox>,

    /// lon,lat (repeatable)
    #[arg(long, allow_hyphen_values = true)]
    point: Vec<Point>,

    /// Skip files that end before this year
    #[arg(long)]
    start_year: Option<i32>,

    /// Output root directory
    #[arg(long, short)]
    output: Option<String>,

    /// Concurrent downloads and post-processing jobs
    #[arg(long)]
    workers: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    non_interactive: bool,

    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ClimprojError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ClimprojError) -> u8 {
    match error {
        ClimprojError::MissingCredentials
        | ClimprojError::ConflictingSpatialMode
        | ClimprojError::MissingField(_)
        | ClimprojError::InvalidBbox(_)
        | ClimprojError::InvalidPoint(_)
        | ClimprojError::InvalidIdentifier(_)
        | ClimprojError::ConfigRead(_)
        | ClimprojError::ConfigParse(_)
        | ClimprojError::UnknownVariable { .. } => 2,
        ClimprojError::CatalogHttp(_)
        | ClimprojError::CatalogStatus { .. }
        | ClimprojError::CatalogDecode(_)
        | ClimprojError::DownloadHttp(_)
        | ClimprojError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let overrides = Overrides {
        models: cli.models,
        experiments: cli.experiments,
        variables: cli.variables,
        bbox: cli.bbox,
        points: (!cli.point.is_empty()).then_some(cli.point),
        start_year: cli.start_year,
        output: cli.output,
        workers: cli.workers,
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;

    let settings = &resolved.catalog;
    let catalog = EsgfHttpClient::new(
        &settings.url,
        settings.data_node.as_deref(),
        settings.connect_timeout,
        settings.timeout,
    )?;
    let fetcher = HttpFetcher::new(
        resolved.request.credentials.clone(),
        settings.connect_timeout,
        settings.download_timeout,
    )?;
    let app = App::new(catalog, fetcher, NetcdfIo, StaticMetadata);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.acquire(&resolved.request, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let text = TextOutput::new(std::io::stdout().is_terminal());
            let sink: &dyn ProgressSink = &text;
            let report = app.acquire(&resolved.request, sink)?;
            text.print_report(&report).into_diagnostic()?;
        }
    }
    Ok(())
}
