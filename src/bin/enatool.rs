use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use enatool::app::{App, DownloadRequest, DownloadResult, InfoResult, MetadataResult};
use enatool::cancel::CancelToken;
use enatool::config::{ConfigLoader, ResolvedConfig};
use enatool::coordinator::ProgressSink;
use enatool::domain::ProjectAccession;
use enatool::ena::EnaPortalClient;
use enatool::error::EnaError;
use enatool::fetcher::{FileFetcher, HttpTransport};
use enatool::output::{JsonOutput, OutputMode, TerminalProgress};
use enatool::store::Store;

#[derive(Parser)]
#[command(name = "enatool")]
#[command(about = "European Nucleotide Archive raw read downloader")]
#[command(version, author)]
struct Cli {
    /// Print JSON results instead of the human summary.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// Transfer attempts per file.
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Runs downloaded at the same time.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[arg(long, global = true)]
    no_banner: bool,

    #[arg(long, global = true)]
    no_progress_bar: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch metadata for an ENA project")]
    Fetch(ProjectArgs),
    #[command(about = "Fetch metadata and download FASTQ files")]
    Download(DownloadArgs),
    #[command(about = "Download FASTQ files for existing metadata")]
    DownloadFiles(DownloadFilesArgs),
    #[command(about = "Show information about a project")]
    Info(ExistingProjectArgs),
}

#[derive(Args)]
struct ProjectArgs {
    /// ENA project accession (e.g. PRJNA335681).
    project: String,

    /// Output directory (default: <project>).
    #[arg(short, long, value_name = "DIR")]
    path: Option<PathBuf>,
}

#[derive(Args)]
struct ExistingProjectArgs {
    project: String,

    /// Directory containing the saved metadata.
    #[arg(short, long, value_name = "DIR")]
    path: PathBuf,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    project: ProjectArgs,

    /// Keep files that downloaded with MD5 errors.
    #[arg(short, long)]
    keep_failed: bool,
}

#[derive(Args)]
struct DownloadFilesArgs {
    #[command(flatten)]
    project: ExistingProjectArgs,

    #[arg(short, long)]
    keep_failed: bool,

    /// Prebuilt download manifest to use instead of the metadata table.
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<EnaError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &EnaError) -> u8 {
    match error {
        err if err.is_structural() => 2,
        EnaError::InvalidProjectAccession(_)
        | EnaError::MissingManifestSource
        | EnaError::MetadataNotFound(_)
        | EnaError::ConfigRead(_)
        | EnaError::ConfigParse(_) => 2,
        EnaError::EnaHttp(_) | EnaError::EnaStatus { .. } => 3,
        EnaError::Cancelled => 130,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    if !cli.no_banner && matches!(output_mode, OutputMode::Interactive) {
        print_banner();
    }

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency.max(1);
    }

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, finishing current run");
        handler_token.cancel();
    })
    .into_diagnostic()?;

    let progress = TerminalProgress::new(
        !cli.no_progress_bar && matches!(output_mode, OutputMode::Interactive),
    );
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &progress,
        OutputMode::NonInteractive => &JsonOutput,
    };

    match cli.command {
        Commands::Fetch(args) => {
            let app = build_app(&args.project, args.path, &config, cancel)?;
            let result = app.fetch_metadata(sink);
            progress.finish();
            let result = result?;
            match output_mode {
                OutputMode::Interactive => print_metadata_summary(&result, &app.info(&JsonOutput)?),
                OutputMode::NonInteractive => JsonOutput::print_metadata(&result).into_diagnostic()?,
            }
            Ok(())
        }
        Commands::Download(args) => {
            config.keep_failed |= args.keep_failed;
            let app = build_app(&args.project.project, args.project.path, &config, cancel)?;
            let request = DownloadRequest {
                refresh_metadata: true,
                manifest_path: None,
                options: config.run_options(),
            };
            let result = app.download(request, sink);
            progress.finish();
            report_download(result?, output_mode)
        }
        Commands::DownloadFiles(args) => {
            config.keep_failed |= args.keep_failed;
            let app = build_app(
                &args.project.project,
                Some(args.project.path),
                &config,
                cancel,
            )?;
            let request = DownloadRequest {
                refresh_metadata: false,
                manifest_path: args.manifest,
                options: config.run_options(),
            };
            let result = app.download(request, sink);
            progress.finish();
            report_download(result?, output_mode)
        }
        Commands::Info(args) => {
            let app = build_app(&args.project, Some(args.path), &config, cancel)?;
            let result = app.info(sink);
            progress.finish();
            let result = result?;
            match output_mode {
                OutputMode::Interactive => print_info(&result),
                OutputMode::NonInteractive => JsonOutput::print_info(&result).into_diagnostic()?,
            }
            Ok(())
        }
    }
}

fn build_app(
    project: &str,
    path: Option<PathBuf>,
    config: &ResolvedConfig,
    cancel: CancelToken,
) -> miette::Result<App<EnaPortalClient, HttpTransport>> {
    let project: ProjectAccession = project.parse()?;
    let destination = path.or_else(|| config.destination.clone());
    let store = Store::for_project(&project, destination.as_deref())?;
    let client = EnaPortalClient::new(config.timeout)?.with_cancel(cancel.clone());
    let fetcher = FileFetcher::new(HttpTransport::new(config.timeout)?)
        .with_backoff(config.network_backoff, config.checksum_backoff)
        .with_cancel(cancel);
    Ok(App::new(store, project, client, fetcher).with_columns(config.columns.clone()))
}

fn report_download(result: DownloadResult, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Interactive => print_download_summary(&result),
        OutputMode::NonInteractive => JsonOutput::print_download(&result).into_diagnostic()?,
    }
    Ok(())
}

fn print_banner() {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    println!("{cyan}ENATool v{}{reset}", env!("CARGO_PKG_VERSION"));
    println!("{cyan}European Nucleotide Archive Data Manager{reset}");
    println!();
}

fn print_metadata_summary(result: &MetadataResult, info: &InfoResult) {
    let green = "\x1b[32m";
    let reset = "\x1b[0m";

    println!("{green}Retrieved metadata for {}{reset}", result.project);
    println!("  Total runs: {}", result.runs);
    println!("  Metadata table: {}", result.path);
    print_counts("Organisms", &info.scientific_names, Some(5));
    print_counts("Sequencing platforms", &info.platforms, None);
}

fn print_download_summary(result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    let summary = &result.summary;

    println!("{cyan}Download summary for {}{reset}", result.project);
    println!("  Total files: {}", summary.total_files);
    println!("{green}  Successfully downloaded: {}{reset}", summary.successful);
    println!("  Already existed: {}", summary.already_existed);
    println!("  Failed: {}", summary.failed);
    if summary.runs_without_files > 0 {
        println!("  Runs without files: {}", summary.runs_without_files);
    }

    if !result.incomplete.is_empty() {
        println!(
            "{yellow}Some downloads failed. Check {} for details.{reset}",
            result.manifest_path
        );
        let shown = result
            .incomplete
            .iter()
            .take(5)
            .map(|run| run.run.as_str())
            .collect::<Vec<_>>();
        println!("{yellow}  Failed accessions: {}{reset}", shown.join(", "));
        if result.incomplete.len() > 5 {
            println!("{yellow}  ... and {} more{reset}", result.incomplete.len() - 5);
        }
    }
    println!("  Manifest: {}", result.manifest_path);
}

fn print_info(result: &InfoResult) {
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}{}{reset}", result.project);
    println!("  Total runs: {}", result.runs);
    println!("  Samples: {}", result.samples);
    print_counts("Organisms", &result.scientific_names, Some(10));
    print_counts("Sequencing platforms", &result.platforms, None);
    print_counts("Library strategies", &result.library_strategies, Some(5));
    print_counts("Library layout", &result.library_layouts, None);
    if let Some(summary) = &result.manifest {
        println!("\nDownload status:");
        println!("  OK: {}", summary.successful);
        println!("  Exists: {}", summary.already_existed);
        println!("  Error: {}", summary.failed);
        println!("  Not attempted: {}", summary.not_attempted);
    }
}

fn print_counts(title: &str, counts: &[enatool::app::ValueCount], limit: Option<usize>) {
    if counts.is_empty() {
        return;
    }
    println!("\n{title}:");
    for entry in counts.iter().take(limit.unwrap_or(usize::MAX)) {
        println!("  {}: {}", entry.value, entry.count);
    }
}
