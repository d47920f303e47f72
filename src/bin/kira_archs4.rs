use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_archs4::app::{App, ProgressSink, QueryResult, SilentSink};
use kira_archs4::config::ConfigLoader;
use kira_archs4::domain::{NormalizationMethod, Species};
use kira_archs4::download::HttpDownloadClient;
use kira_archs4::error::KiraError;
use kira_archs4::extract::ExtractOptions;
use kira_archs4::inspect;
use kira_archs4::meta;
use kira_archs4::output::{BarSink, JsonOutput, OutputMode, TsvOutput};
use kira_archs4::query::{self, QueryOptions};
use kira_archs4::source::{ExpressionSource, HttpObjectStore, ObjectStore};
use kira_archs4::table::MetadataTable;

#[derive(Parser, Debug)]
#[command(name = "kira-archs4")]
#[command(about = "Subset ARCHS4 gene expression archives, local or remote")]
#[command(version, author)]
struct Cli {
    /// Suppress progress output.
    #[arg(long, global = true)]
    silent: bool,

    /// Print results as JSON instead of TSV/text.
    #[arg(long, global = true)]
    json: bool,

    /// Release catalogue overriding the bundled one.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "List known dataset versions")]
    Versions(SpeciesArgs),
    #[command(about = "Download a gene-count archive")]
    Download(DownloadArgs),
    #[command(about = "Show the group/dataset tree of an archive")]
    Ls(LsArgs),
    #[command(about = "Extract samples and genes by position")]
    Index(IndexArgs),
    #[command(about = "Extract samples whose metadata matches a term")]
    Search(SearchArgs),
    #[command(about = "Extract a seeded random draw of samples")]
    Random(RandomArgs),
    #[command(about = "Extract all samples of a GEO series")]
    Series(SeriesArgs),
    #[command(about = "Extract samples by GEO accession")]
    Samples(SamplesArgs),
    #[command(about = "Query sample metadata without reading expression")]
    Meta(MetaArgs),
}

#[derive(Args, Debug)]
struct SpeciesArgs {
    #[arg(long, value_enum, default_value_t = Species::Human)]
    species: Species,
}

#[derive(Args, Debug)]
struct DownloadArgs {
    #[arg(long, value_enum, default_value_t = Species::Human)]
    species: Species,

    #[arg(long, default_value = "latest")]
    version: String,

    /// Destination directory.
    #[arg(long, default_value = ".")]
    dest: PathBuf,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Local HDF5 path or remote URL; defaults to the species' configured archive.
    #[arg(long)]
    source: Option<String>,

    #[arg(long, value_enum, default_value_t = Species::Human)]
    species: Species,
}

#[derive(Args, Debug)]
struct ExpressionArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, value_enum)]
    normalize: Option<NormalizationMethod>,

    /// Concurrent column fetches (default 16 local, 4 remote).
    #[arg(long)]
    workers: Option<usize>,

    /// Drop samples that are likely single-cell.
    #[arg(long)]
    remove_sc: bool,
}

impl ExpressionArgs {
    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            extract: ExtractOptions {
                workers: self.workers,
            },
            remove_single_cell: self.remove_sc,
        }
    }
}

#[derive(Args, Debug)]
struct LsArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[command(flatten)]
    expression: ExpressionArgs,

    /// Sample columns; an empty list yields an empty table.
    #[arg(long, value_delimiter = ',')]
    samples: Vec<usize>,

    /// Gene rows; all genes when omitted.
    #[arg(long, value_delimiter = ',')]
    genes: Vec<usize>,
}

#[derive(Args, Debug)]
struct SearchArgs {
    #[command(flatten)]
    expression: ExpressionArgs,

    term: String,

    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,
}

#[derive(Args, Debug)]
struct RandomArgs {
    #[command(flatten)]
    expression: ExpressionArgs,

    #[arg(long)]
    number: usize,

    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[derive(Args, Debug)]
struct SeriesArgs {
    #[command(flatten)]
    expression: ExpressionArgs,

    series_id: String,
}

#[derive(Args, Debug)]
struct SamplesArgs {
    #[command(flatten)]
    expression: ExpressionArgs,

    #[arg(required = true)]
    accessions: Vec<String>,
}

#[derive(Args, Debug)]
struct MetaArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: MetaCommand,
}

#[derive(Subcommand, Debug)]
enum MetaCommand {
    #[command(about = "Metadata of samples matching a term")]
    Search {
        term: String,
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
        #[arg(long)]
        remove_sc: bool,
    },
    #[command(about = "Metadata of samples by accession")]
    Samples {
        #[arg(required = true)]
        accessions: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    #[command(about = "Metadata of all samples in a series")]
    Series {
        series_id: String,
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    #[command(about = "All values of one metadata field")]
    Field { name: String },
}

impl MetaCommand {
    /// Requested fields, or the command's default set when none were given.
    fn fields(&self) -> Vec<String> {
        match self {
            MetaCommand::Search { fields, .. } => {
                or_default(fields.clone(), meta::default_meta_search_fields)
            }
            MetaCommand::Samples { fields, .. } | MetaCommand::Series { fields, .. } => {
                or_default(fields.clone(), meta::default_meta_fields)
            }
            MetaCommand::Field { .. } => Vec::new(),
        }
    }
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
        KiraError::InvalidSource(_)
        | KiraError::MissingField(_)
        | KiraError::SampleIndexOutOfRange { .. }
        | KiraError::GeneIndexOutOfRange { .. }
        | KiraError::InvalidSearchTerm(_)
        | KiraError::SampleSize { .. }
        | KiraError::UnknownSpecies(_)
        | KiraError::UnknownVersion { .. }
        | KiraError::InvalidNormalization(_)
        | KiraError::ConfigRead(_) => 2,
        KiraError::SourceUnavailable { .. }
        | KiraError::DownloadHttp(_)
        | KiraError::DownloadStatus { .. } => 3,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let objects: Arc<dyn ObjectStore> = Arc::new(HttpObjectStore::new()?);
    let app = App::new(config, HttpDownloadClient::new()?, objects);

    let bar = (!cli.silent && output_mode == OutputMode::Text).then(BarSink::new);
    let sink: &dyn ProgressSink = match (&bar, output_mode) {
        (Some(bar), _) => bar,
        (None, OutputMode::Json) => &JsonOutput,
        (None, OutputMode::Text) => &SilentSink,
    };

    let outcome = run_command(cli.command, &app, output_mode, sink);
    if let Some(bar) = &bar {
        bar.finish();
    }
    outcome
}

fn run_command(
    command: Commands,
    app: &App<HttpDownloadClient>,
    output_mode: OutputMode,
    sink: &dyn ProgressSink,
) -> miette::Result<()> {
    match command {
        Commands::Versions(args) => {
            let result = app.versions(args.species);
            match output_mode {
                OutputMode::Json => JsonOutput::print_versions(&result).into_diagnostic()?,
                OutputMode::Text => result.versions.iter().for_each(|v| println!("{v}")),
            }
        }
        Commands::Download(args) => {
            let result = app.download(args.species, &args.version, &args.dest, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_download(&result).into_diagnostic()?,
                OutputMode::Text => println!("{}", result.path),
            }
        }
        Commands::Ls(args) => {
            let source = open(app, &args.source)?;
            let tree = inspect::ls(source.as_ref())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_tree(&tree).into_diagnostic()?,
                OutputMode::Text => print!("{}", inspect::render_tree(&tree)),
            }
        }
        Commands::Index(args) => {
            let source = open(app, &args.expression.source)?;
            let options = args.expression.query_options();
            let result = app.index(
                source.as_ref(),
                &args.samples,
                &args.genes,
                &options.extract,
                args.expression.normalize,
                sink,
            )?;
            print_query(&result, output_mode)?;
        }
        Commands::Search(args) => {
            let source = open(app, &args.expression.source)?;
            let fields = or_default(args.fields, query::default_search_fields);
            let result = app.search(
                source.as_ref(),
                &args.term,
                &fields,
                &args.expression.query_options(),
                args.expression.normalize,
                sink,
            )?;
            print_query(&result, output_mode)?;
        }
        Commands::Random(args) => {
            let source = open(app, &args.expression.source)?;
            let result = app.random(
                source.as_ref(),
                args.number,
                args.seed,
                &args.expression.query_options(),
                args.expression.normalize,
                sink,
            )?;
            print_query(&result, output_mode)?;
        }
        Commands::Series(args) => {
            let source = open(app, &args.expression.source)?;
            let result = app.series(
                source.as_ref(),
                &args.series_id,
                &args.expression.query_options(),
                args.expression.normalize,
                sink,
            )?;
            match result {
                Some(result) => print_query(&result, output_mode)?,
                None => eprintln!("no samples found for series {}", args.series_id),
            }
        }
        Commands::Samples(args) => {
            let source = open(app, &args.expression.source)?;
            let result = app.samples(
                source.as_ref(),
                &args.accessions,
                &args.expression.query_options(),
                args.expression.normalize,
                sink,
            )?;
            match result {
                Some(result) => print_query(&result, output_mode)?,
                None => eprintln!("none of the requested samples were found"),
            }
        }
        Commands::Meta(args) => {
            let source = open(app, &args.source)?;
            run_meta(args.command, source.as_ref(), output_mode)?;
        }
    }
    Ok(())
}

fn run_meta(
    command: MetaCommand,
    source: &dyn ExpressionSource,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let fields = command.fields();
    let table = match command {
        MetaCommand::Search {
            term, remove_sc, ..
        } => meta::search(source, &term, &fields, remove_sc)?,
        MetaCommand::Samples { accessions, .. } => meta::samples(source, &accessions, &fields)?,
        MetaCommand::Series { series_id, .. } => meta::series(source, &series_id, &fields)?,
        MetaCommand::Field { name } => {
            let values = meta::field(source, &name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_json(&values).into_diagnostic()?,
                OutputMode::Text => values.iter().for_each(|v| println!("{v}")),
            }
            return Ok(());
        }
    };
    print_metadata(&table, output_mode)
}

fn open(
    app: &App<HttpDownloadClient>,
    args: &SourceArgs,
) -> Result<Box<dyn ExpressionSource>, KiraError> {
    app.source_or_default(args.source.as_deref(), args.species)
}

fn or_default(fields: Vec<String>, default: fn() -> Vec<String>) -> Vec<String> {
    if fields.is_empty() { default() } else { fields }
}

fn print_query(result: &QueryResult, output_mode: OutputMode) -> miette::Result<()> {
    if let Some(warning) = failure_warning(&result.extraction.failed_samples()) {
        eprintln!("{warning}");
    }
    let stdout = io::stdout().lock();
    match (output_mode, &result.normalized) {
        (OutputMode::Json, Some(normalized)) => {
            JsonOutput::print_matrix(normalized).into_diagnostic()?
        }
        (OutputMode::Json, None) => JsonOutput::print_matrix(result.table()).into_diagnostic()?,
        (OutputMode::Text, Some(normalized)) => TsvOutput::write_matrix(stdout, normalized)?,
        (OutputMode::Text, None) => TsvOutput::write_matrix(stdout, result.table())?,
    }
    Ok(())
}

fn failure_warning(failed: &[&str]) -> Option<String> {
    (!failed.is_empty()).then(|| {
        format!(
            "warning: {} sample column(s) could not be read and were zero-filled: {}",
            failed.len(),
            failed.join(", ")
        )
    })
}

fn print_metadata(table: &MetadataTable, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_metadata(table).into_diagnostic()?,
        OutputMode::Text => TsvOutput::write_metadata(io::stdout().lock(), table)?,
    }
    Ok(())
}
