//! CLI interface for indexed collections over JSON records

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexed_memory::{
    CollectionConfig, Entry, IndexedCollection, Key, MemoryStore,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type People = IndexedCollection<MemoryStore<Value>>;

#[derive(Parser)]
#[command(name = "indexed-memory")]
#[command(about = "Query secondary indices over a JSON record file", long_about = None)]
struct Cli {
    /// Collection configuration (id property, rebuild mode, indices)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON file holding an array of records
    #[arg(long)]
    data: Option<PathBuf>,

    /// Defer rebuilds until an index is read
    #[arg(long)]
    lazy: bool,

    /// Log rebuild activity
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up a key in one index
    Lookup {
        /// Indexed field
        field: String,
        /// Key; parsed as a JSON scalar when possible (e.g. 42, true), otherwise a string
        key: String,
    },
    /// Print every key of one index with its records
    Index {
        /// Indexed field
        field: String,
    },
    /// Print rebuild statistics after loading
    Stats,
    /// List indexed fields and their accessors
    Fields,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_records(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read records from {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    match value {
        Value::Array(records) => Ok(records),
        _ => anyhow::bail!("{} must contain a JSON array of records", path.display()),
    }
}

fn open(cli: &Cli) -> Result<People> {
    let mut config = match &cli.config {
        Some(path) => CollectionConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => CollectionConfig::default(),
    };
    if cli.lazy {
        config.lazy = true;
    }

    let records = match &cli.data {
        Some(path) => load_records(path)?,
        None => Vec::new(),
    };

    let store = MemoryStore::keyed_by(config.id_property.clone()).with_records(records)?;
    Ok(IndexedCollection::from_config(store, &config)?)
}

fn render(records: &[Arc<Value>]) -> Value {
    Value::Array(records.iter().map(|r| (**r).clone()).collect())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(collection: &People, command: Commands) -> Result<()> {
    match command {
        Commands::Lookup { field, key } => match collection.get_by(&field, Key::parse(&key))? {
            Some(Entry::One(record)) => print_json(&record)?,
            Some(Entry::Many(records)) if !records.is_empty() => print_json(&render(&records))?,
            _ => println!("No records for {} = {}", field, key),
        },
        Commands::Index { field } => {
            let index = collection.index(&field)?;
            println!("Index {} ({}, {} keys):", field, index.kind(), index.len());
            for key in index.keys() {
                let records: Vec<Arc<Value>> = match index.get(&key) {
                    Some(Entry::One(record)) => vec![record],
                    Some(Entry::Many(records)) => records,
                    None => Vec::new(),
                };
                println!("  {} => {}", key, render(&records));
            }
        }
        Commands::Stats => {
            // Reading every index once settles a lazy collection.
            for field in collection.index_fields() {
                collection.index(field)?;
            }
            let stats = collection.stats();
            let mut report = serde_json::to_value(&stats)?;
            if let Value::Object(map) = &mut report {
                map.insert("records".to_string(), json!(collection.len()));
                map.insert("indices".to_string(), json!(collection.index_fields().len()));
                map.insert(
                    "avg_rebuild_latency_us".to_string(),
                    json!(stats.avg_rebuild_latency_us()),
                );
                map.insert(
                    "p99_rebuild_latency_us".to_string(),
                    json!(stats.percentile_rebuild_latency_us(99.0)),
                );
            }
            print_json(&report)?;
        }
        Commands::Fields => {
            let fields = collection.index_fields();
            if fields.is_empty() {
                println!("No indices configured");
            } else {
                println!("Indices ({} total):", fields.len());
                for field in fields {
                    let accessor = collection.accessor_for(field)?;
                    println!("  - {} ({}) via {}", field, accessor.kind(), accessor.name());
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let collection = open(&cli)?;
    run(&collection, cli.command)
}
