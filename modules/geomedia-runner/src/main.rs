use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use tracing::info;
use tracing_subscriber::EnvFilter;

use geomedia_common::{
    load_config, AppConfig, FileConfig, GeoReference, GeoReferenceTable, LogFormat, TaggedDocument,
};
use geomedia_cube::{HypercubeRow, Pipeline, PipelineReport};

#[derive(Parser)]
#[command(name = "geomedia")]
#[command(about = "Topic salience and geographic co-occurrence networks from tagged news")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write a JSON report
    Run {
        /// TOML config (falls back to GEOMEDIA_CONFIG, then defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON array of tagged documents
        #[arg(short, long)]
        documents: PathBuf,

        /// JSON array of geographic reference entries
        #[arg(short, long)]
        geo: Option<PathBuf>,

        /// Report destination (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print JSON Schemas of the input and output tables
    Schema {
        #[arg(value_enum, default_value = "all")]
        table: SchemaTable,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SchemaTable {
    All,
    Document,
    Geo,
    Row,
    Report,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("geomedia=info".parse()?);
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn write_output(output: Option<&Path>, body: &str) -> Result<()> {
    match output {
        Some(path) => fs::write(path, body)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(body.as_bytes())?;
            stdout.write_all(b"\n")?;
            Ok(())
        }
    }
}

fn run(
    app: &AppConfig,
    config: Option<PathBuf>,
    documents: &Path,
    geo: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let config = match config.or_else(|| app.config_path.clone()) {
        Some(path) => load_config(&path)?,
        None => {
            info!("No config file given, using defaults");
            FileConfig::default()
        }
    };

    let documents: Vec<TaggedDocument> = read_json(documents)?;
    let reference = match geo {
        Some(path) => GeoReferenceTable::from_entries(read_json::<Vec<GeoReference>>(path)?)
            .with_context(|| format!("Invalid geographic reference table: {}", path.display()))?,
        None => GeoReferenceTable::default(),
    };
    info!(
        documents = documents.len(),
        geo_entries = reference.len(),
        "Inputs loaded"
    );

    let report = Pipeline::new(config)?.run(&documents, &reference)?;
    info!(run_id = %report.run_id, "Report ready");

    write_output(output, &serde_json::to_string_pretty(&report)?)
}

fn schema(table: SchemaTable) -> Result<()> {
    let value = match table {
        SchemaTable::Document => serde_json::to_value(schemars::schema_for!(TaggedDocument))?,
        SchemaTable::Geo => serde_json::to_value(schemars::schema_for!(GeoReference))?,
        SchemaTable::Row => serde_json::to_value(schemars::schema_for!(HypercubeRow))?,
        SchemaTable::Report => serde_json::to_value(schemars::schema_for!(PipelineReport))?,
        SchemaTable::All => serde_json::json!({
            "document": schemars::schema_for!(TaggedDocument),
            "geo": schemars::schema_for!(GeoReference),
            "row": schemars::schema_for!(HypercubeRow),
            "report": schemars::schema_for!(PipelineReport),
        }),
    };
    write_output(None, &serde_json::to_string_pretty(&value)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = AppConfig::from_env();
    init_tracing(app.log_format)?;
    app.log_settings();

    match cli.command {
        Commands::Run {
            config,
            documents,
            geo,
            output,
        } => run(&app, config, &documents, geo.as_deref(), output.as_deref()),
        Commands::Schema { table } => schema(table),
    }
}
