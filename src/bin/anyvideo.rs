use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use anyvideo::app::{
    App, METHOD_DOWNLOAD, METHOD_DOWNLOAD_ARCHIVE, METHOD_LAUNCH_UPDATE, METHOD_QUERY,
    METHOD_SKIP_UPDATE, OutcomeReport,
};
use anyvideo::config::{CachedSettings, ConfigLoader, ResolvedConfig};
use anyvideo::domain::{ProvisioningOutcome, SortKey};
use anyvideo::error::AnyVideoError;
use anyvideo::fetch::FallbackFetcher;
use anyvideo::media::YtDlpExtractor;
use anyvideo::output::JsonOutput;
use anyvideo::package_index::PackageIndexHttpClient;
use anyvideo::process::ProcessLauncher;
use anyvideo::provision::Provisioner;
use anyvideo::store::Store;
use anyvideo::update::UpdateRunner;

const SETTINGS_TTL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "anyvideo")]
#[command(about = "Download media from any URL: dependency provisioning and format resolution for a launcher plugin")]
#[command(version)]
struct Cli {
    /// Plugin directory holding the binaries (the library root is its sibling `lib`).
    #[arg(long, global = true)]
    plugin_root: Option<String>,

    /// Settings file (defaults to `anyvideo.json` in the plugin root).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    #[command(about = "Dispatch a host JSON-RPC request ({\"method\": ..., \"parameters\": [...]})")]
    Rpc { request: String },
    #[command(about = "Answer host JSON-RPC requests from stdin, one per line")]
    Serve,
    #[command(about = "Resolve formats for a URL")]
    Query {
        #[arg(long)]
        sort: Option<SortKey>,
        text: Vec<String>,
    },
    #[command(about = "Download one format")]
    Download {
        url: String,
        format_id: String,
        download_path: Option<String>,
    },
    #[command(about = "Fetch and extract the auxiliary binaries in the background")]
    #[command(alias = "download_archive_binaries")]
    DownloadArchiveBinaries,
    #[command(about = "Update the extraction library in the background")]
    #[command(alias = "launch_library_update")]
    LaunchLibraryUpdate,
    #[command(about = "Defer the pending library update")]
    #[command(alias = "skip_library_update")]
    SkipLibraryUpdate,
    #[command(about = "Show dependency and update state")]
    Status,
    #[command(hide = true)]
    RunSetup,
    #[command(hide = true)]
    RunUpdate,
}

impl Commands {
    fn is_worker(&self) -> bool {
        matches!(self, Commands::RunSetup | Commands::RunUpdate)
    }
}

#[derive(Debug, Deserialize)]
struct RpcRequest {
    method: String,
    #[serde(default)]
    parameters: Vec<serde_json::Value>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<AnyVideoError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AnyVideoError) -> u8 {
    match error {
        AnyVideoError::InvalidUrl(_)
        | AnyVideoError::ConfigRead(_)
        | AnyVideoError::ConfigParse(_) => 2,
        AnyVideoError::Network(_)
        | AnyVideoError::OperationTimeout(_)
        | AnyVideoError::PackageIndex(_)
        | AnyVideoError::NoCompatibleDistributable(_)
        | AnyVideoError::MediaExtraction(_) => 3,
        AnyVideoError::LockContention { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // Detached workers write to the plugin log, so keep their milestones.
    let default_level = if cli.command.is_worker() {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
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

    let store = match &cli.plugin_root {
        Some(root) => Store::from_plugin_root(Utf8PathBuf::from(root)),
        None => Store::new()?,
    };
    let default_config = store.config_path().into_std_path_buf();
    let settings = ConfigLoader::refresh(
        None,
        cli.config.as_deref(),
        &default_config,
        SETTINGS_TTL,
        Utc::now(),
    )?;

    let command = match cli.command {
        Commands::Rpc { request } => rpc_command(&request)?,
        command => command,
    };

    let launcher = ProcessLauncher::current_exe(
        launcher_args(&store, cli.config.as_ref()),
        Some(store.log_path().into_std_path_buf()),
    )?;
    let extractor = YtDlpExtractor::new(store.primary_binary().into_std_path_buf());
    let app = App::new(store, extractor, launcher);

    if command == Commands::Serve {
        let stdin = std::io::stdin();
        return serve(
            stdin.lock(),
            settings,
            |cached| {
                ConfigLoader::refresh(
                    Some(cached),
                    cli.config.as_deref(),
                    &default_config,
                    SETTINGS_TTL,
                    Utc::now(),
                )
            },
            |config, command| dispatch(&app, config, command),
        );
    }
    dispatch(&app, &settings.value, command)
}

/// One host request per input line. Settings are refreshed before each
/// request through `reload`, which hands back the cached value while fresh.
/// A failed request is logged and the loop moves on.
fn serve<R, L, H>(
    input: R,
    mut settings: CachedSettings,
    mut reload: L,
    mut handle: H,
) -> miette::Result<()>
where
    R: BufRead,
    L: FnMut(CachedSettings) -> Result<CachedSettings, AnyVideoError>,
    H: FnMut(&ResolvedConfig, Commands) -> miette::Result<()>,
{
    for line in input.lines() {
        let line = line.into_diagnostic()?;
        if line.trim().is_empty() {
            continue;
        }
        settings = match reload(settings.clone()) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "keeping previous settings");
                settings
            }
        };
        if let Err(report) = rpc_command(&line).and_then(|command| handle(&settings.value, command)) {
            warn!(error = %report, "request failed");
        }
    }
    Ok(())
}

fn launcher_args(store: &Store, config: Option<&PathBuf>) -> Vec<String> {
    let mut args = vec![
        "--plugin-root".to_string(),
        store.plugin_root().to_string(),
    ];
    if let Some(config) = config {
        args.push("--config".to_string());
        args.push(config.display().to_string());
    }
    args
}

fn rpc_command(raw: &str) -> miette::Result<Commands> {
    let request: RpcRequest = serde_json::from_str(raw).into_diagnostic()?;
    let mut parameters = request.parameters.into_iter().map(|value| match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    });
    match request.method.as_str() {
        METHOD_QUERY => Ok(Commands::Query {
            sort: None,
            text: parameters.collect(),
        }),
        METHOD_DOWNLOAD => {
            let url = parameters
                .next()
                .ok_or_else(|| miette::miette!("download requires a URL"))?;
            let format_id = parameters
                .next()
                .ok_or_else(|| miette::miette!("download requires a format id"))?;
            Ok(Commands::Download {
                url,
                format_id,
                download_path: parameters.next(),
            })
        }
        METHOD_DOWNLOAD_ARCHIVE => Ok(Commands::DownloadArchiveBinaries),
        METHOD_LAUNCH_UPDATE => Ok(Commands::LaunchLibraryUpdate),
        METHOD_SKIP_UPDATE => Ok(Commands::SkipLibraryUpdate),
        other => Err(miette::miette!("unknown method: {other}")),
    }
}

fn dispatch(
    app: &App<YtDlpExtractor, ProcessLauncher>,
    config: &ResolvedConfig,
    command: Commands,
) -> miette::Result<()> {
    match command {
        Commands::Rpc { .. } | Commands::Serve => {
            Err(miette::miette!("nested rpc requests are not supported"))
        }
        Commands::Query { sort, text } => {
            let result = match sort {
                Some(sort) => {
                    let mut config = config.clone();
                    config.query.sort = sort;
                    app.query(&text.join(" "), &config)
                }
                None => app.query(&text.join(" "), config),
            };
            JsonOutput::print_query(&result).into_diagnostic()
        }
        Commands::Download {
            url,
            format_id,
            download_path,
        } => Ok(app.download(&url, &format_id, download_path.as_deref(), config)?),
        Commands::DownloadArchiveBinaries => report(app.download_archive_binaries(config)),
        Commands::LaunchLibraryUpdate => report(app.launch_library_update(config)),
        Commands::SkipLibraryUpdate => report(app.skip_library_update(config)),
        Commands::Status => JsonOutput::print_status(&app.status(config)).into_diagnostic(),
        Commands::RunSetup => {
            let fetcher = FallbackFetcher::standard()?;
            let outcome = Provisioner::new(app.store(), &config.provision, fetcher).provision();
            finish_worker("setup", outcome)
        }
        Commands::RunUpdate => {
            let client = PackageIndexHttpClient::new()?;
            let outcome = UpdateRunner::new(app.store(), &config.update, client).run();
            finish_worker("update", outcome)
        }
    }
}

/// Host actions are fire-and-forget: the outcome is reported, never raised.
fn report(outcome: ProvisioningOutcome) -> miette::Result<()> {
    if let Some(err) = outcome.error() {
        warn!(error = %err, "action did not complete");
    }
    JsonOutput::print_outcome(&OutcomeReport::from(&outcome)).into_diagnostic()
}

fn finish_worker(task: &str, outcome: ProvisioningOutcome) -> miette::Result<()> {
    match outcome {
        ProvisioningOutcome::Failed(err) => {
            warn!(task, error = %err, "detached task failed");
            Err(err.into())
        }
        outcome => {
            info!(task, reason = ?outcome.reason(), "detached task finished");
            Ok(())
        }
    }
}
