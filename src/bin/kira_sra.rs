use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_sra_batch::app::App;
use kira_sra_batch::config::{ConfigLoader, ConfigOverrides};
use kira_sra_batch::domain::{LayoutOverride, UnknownLayoutPolicy};
use kira_sra_batch::error::KiraError;
use kira_sra_batch::metadata::EutilsHttpClient;
use kira_sra_batch::output::JsonOutput;
use kira_sra_batch::sra::{SraToolStatus, SraToolkit, SystemSraToolkit};

#[derive(Parser)]
#[command(name = "kira-sra")]
#[command(about = "Batch download SRA runs per species and convert them to FASTQ")]
#[command(version, author, arg_required_else_help = true)]
struct Cli {
    /// Batch file, one `species,accession,...` line per species
    #[arg(long)]
    input: PathBuf,

    /// Output directory [default: .]
    #[arg(long)]
    outdir: Option<String>,

    /// Accessions per metadata query [default: 350]
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Pause between metadata queries, in seconds [default: 1]
    #[arg(long)]
    sleep_secs: Option<u64>,

    /// Force the library layout instead of reading it from metadata
    #[arg(long, value_enum, ignore_case = true)]
    layout: Option<LayoutOverride>,

    /// What to do with runs whose layout cannot be resolved [default: assume-single]
    #[arg(long, value_enum, ignore_case = true)]
    unknown_layout: Option<UnknownLayoutPolicy>,

    /// JSON settings file; command-line flags take precedence
    #[arg(long)]
    config: Option<String>,

    /// Skip runs whose FASTQ outputs already exist
    #[arg(long)]
    skip_existing: bool,

    /// Resolve metadata and layouts without downloading
    #[arg(long)]
    dry_run: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InputNotFound(_) | KiraError::MissingConfig(_) => 2,
        KiraError::NcbiHttp(_)
        | KiraError::NcbiStatus { .. }
        | KiraError::NcbiResponse(_)
        | KiraError::MissingTool(_)
        | KiraError::ToolFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        outdir: cli.outdir,
        chunk_size: cli.chunk_size,
        sleep_secs: cli.sleep_secs,
        layout: cli.layout,
        unknown_layout: cli.unknown_layout,
        skip_existing: cli.skip_existing,
        dry_run: cli.dry_run,
    };
    let resolved = ConfigLoader::resolve(cli.config.as_deref(), overrides)?;

    if !cli.input.is_file() {
        return Err(KiraError::InputNotFound(cli.input).into());
    }

    let toolkit =
        SystemSraToolkit::with_paths(resolved.tools.prefetch, resolved.tools.fasterq_dump);
    if !resolved.pipeline.dry_run {
        if let SraToolStatus::Missing { message } = toolkit.tool_status() {
            return Err(KiraError::MissingTool(message).into());
        }
        let info = toolkit.tool_info();
        info!(
            "prefetch {}, fasterq-dump {}",
            info.prefetch.as_deref().unwrap_or("(unknown version)"),
            info.fasterq_dump.as_deref().unwrap_or("(unknown version)")
        );
    }

    let metadata = EutilsHttpClient::new(resolved.ncbi_api_key)?;
    let app = App::new(resolved.pipeline, metadata, toolkit);
    let report = app.run_file(&cli.input)?;

    if cli.json {
        JsonOutput::print_report(&report).into_diagnostic()?;
    }
    Ok(())
}
