//! crm-unify CLI - unify personnel and company exports from several CRMs
//!
//! Reads the run configuration, unifies every configured export and writes
//! the persons, companies and relationships tables.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crm_unify::config::{ConfigError, RunConfig};
use crm_unify::extraction::{Extractor, FieldPath};
use crm_unify::source::load_records;
use crm_unify::{DirectorySink, OutputFormat, Pipeline, UnifyError};

const CONFIG_ENV: &str = "CRM_UNIFY_CONFIG";
const DEFAULT_CONFIG: &str = "config/unify.yaml";

#[derive(Parser)]
#[command(name = "crm-unify")]
#[command(
    version,
    about = "Entity resolution and merge for multi-CRM personnel exports",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unify all configured exports and write the result tables
    Run {
        /// Path to the run configuration (default: $CRM_UNIFY_CONFIG, then config/unify.yaml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the output directory from the config file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the output format (csv, ndjson, json)
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Also write the run report as JSON to this path
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Validate the run configuration, mapping and name-processing files
    Validate {
        /// Path to the run configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print what a mapping path resolves to for each record of an export
    Extract {
        /// JSON export file
        #[arg(short, long)]
        input: PathBuf,

        /// Field path, e.g. `Account_Name.name` or `emails[0]`
        #[arg(short, long)]
        path: String,
    },
}

fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            output,
            format,
            report,
        } => run(config, output, format, report),
        Commands::Validate { config } => validate(config),
        Commands::Extract { input, path } => extract(input, path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

/// CLI flag, then environment, then the default location
fn config_path(cli: Option<PathBuf>) -> PathBuf {
    cli.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG))
}

fn run(
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    format: Option<OutputFormat>,
    report_path: Option<PathBuf>,
) -> Result<(), UnifyError> {
    let config_path = config_path(config);
    tracing::info!("Loading configuration from {}", config_path.display());

    let config = RunConfig::load_from_file(&config_path)?;
    let pipeline = Pipeline::from_config(&config)?;
    let result = pipeline.run();

    let dir = output.unwrap_or_else(|| config.output.dir.clone());
    let format = format.unwrap_or(config.output.format);
    let mut sink = DirectorySink::new(&dir, format)?;
    result.write_to(&mut sink)?;

    if let Some(path) = report_path {
        result.report.write_json(&path)?;
        tracing::info!("Wrote run report to {}", path.display());
    }

    println!("✓ {} persons", result.persons.len());
    if let Some(companies) = &result.companies {
        println!("✓ {} companies", companies.len());
    }
    println!("✓ {} relationships", result.relationships.len());
    for path in sink.written() {
        println!("  {}", path.display());
    }

    Ok(())
}

fn validate(config: Option<PathBuf>) -> Result<(), UnifyError> {
    let config_path = config_path(config);
    let config = RunConfig::load_from_file(&config_path)?;
    let pipeline = Pipeline::from_config(&config)?;

    println!("✓ Configuration is valid: {}", config_path.display());
    for source in pipeline.sources().iter() {
        println!(
            "  {} ({:?}, priority {}, native id column '{}')",
            source.name, source.kind, source.priority, source.native_id_column
        );
    }
    println!("  {} person columns", pipeline.person_schema().columns.len());
    if let Some(companies) = pipeline.company_schema() {
        println!("  {} company columns", companies.columns.len());
    }
    println!("  transforms: {}", pipeline.transforms().list_transforms().join(", "));

    Ok(())
}

fn extract(input: PathBuf, path: String) -> Result<(), UnifyError> {
    let field_path = FieldPath::parse(&path).map_err(|e| ConfigError::Path {
        context: "--path".to_string(),
        source: e,
    })?;
    let records = load_records(&input)?;

    for (index, record) in records.iter().enumerate() {
        match record.extract(&field_path) {
            Some(value) => println!("{}\t{}", index, value),
            None => println!("{}\t<absent>", index),
        }
    }
    Ok(())
}
