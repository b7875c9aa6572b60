//! Catalogflow CLI - stream and transform XML product catalogs
//!
//! # Main Commands
//!
//! ```bash
//! catalogflow process in.xml -o out.xml --op fix_ampersands --op copy_name_to_attrs
//! catalogflow process in.xml -o out.xml --config pipeline.json --async --stats stats.json
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! catalogflow inspect in.xml --show 2    # Decode and summarize a catalog
//! catalogflow operations                 # Show available operations
//! catalogflow schema --extended          # Show the record field layout
//! ```

use clap::{Parser, Subcommand};
use catalogflow::logs::LOG_BROADCASTER;
use catalogflow::{
    decode, operations_description, process_catalog, process_catalog_async, CatalogRecord,
    FailurePolicy, LogSink, OperationSpec, PipelineConfig, Product, ProductWithName, Record,
    TransformOptions,
};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "catalogflow")]
#[command(about = "Stream, transform and rewrite XML product catalogs", long_about = None)]
struct Cli {
    /// Do not echo log lines to stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full run: decode → operations → encode
    Process {
        /// Input catalog
        input: PathBuf,

        /// Output catalog
        #[arg(short, long)]
        output: PathBuf,

        /// Operation to apply, repeatable; applied after those from --config
        #[arg(long = "op")]
        operations: Vec<String>,

        /// Pipeline configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Records carry a secondary name (man_name)
        #[arg(long)]
        extended: bool,

        /// Drop records an operation rejects instead of aborting
        #[arg(long)]
        skip_failed: bool,

        /// Decode on a background worker
        #[arg(long = "async")]
        run_async: bool,

        /// Write the run summary as JSON
        #[arg(long)]
        stats: Option<PathBuf>,
    },

    /// Decode a catalog and report what it contains
    Inspect {
        /// Input catalog
        input: PathBuf,

        /// Records carry a secondary name (man_name)
        #[arg(long)]
        extended: bool,

        /// Print the first N records as JSON
        #[arg(long, default_value = "0")]
        show: usize,
    },

    /// Show available operations
    Operations,

    /// Show the record field layout
    Schema {
        /// Describe the extended record type
        #[arg(long)]
        extended: bool,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    if cli.quiet {
        LOG_BROADCASTER.set_echo(false);
    }

    let result = match cli.command {
        Commands::Process {
            input,
            output,
            operations,
            config,
            extended,
            skip_failed,
            run_async,
            stats,
        } => {
            let request = ProcessRequest {
                input: &input,
                output: &output,
                operations: &operations,
                config: config.as_deref(),
                skip_failed,
                run_async,
                stats: stats.as_deref(),
            };
            if extended {
                cmd_process::<ProductWithName>(request).await
            } else {
                cmd_process::<Product>(request).await
            }
        }

        Commands::Inspect {
            input,
            extended,
            show,
        } => {
            if extended {
                cmd_inspect::<ProductWithName>(&input, show)
            } else {
                cmd_inspect::<Product>(&input, show)
            }
        }

        Commands::Operations => cmd_operations(),

        Commands::Schema { extended } => {
            if extended {
                cmd_schema::<ProductWithName>()
            } else {
                cmd_schema::<Product>()
            }
        }
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

struct ProcessRequest<'a> {
    input: &'a Path,
    output: &'a Path,
    operations: &'a [String],
    config: Option<&'a Path>,
    skip_failed: bool,
    run_async: bool,
    stats: Option<&'a Path>,
}

async fn cmd_process<R: CatalogRecord>(request: ProcessRequest<'_>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing: {}", request.input.display());

    let mut config = match request.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    for name in request.operations {
        config.push(OperationSpec::from_name(name)?);
    }
    if request.skip_failed {
        config.failure_policy = FailurePolicy::SkipRecord;
    }

    let options = TransformOptions::from_env()?;
    let mut built = config.build::<R>()?;

    let summary = if request.run_async {
        process_catalog_async(request.input, request.output, LogSink, &mut built.pipeline, &options).await?
    } else {
        process_catalog(request.input, request.output, LogSink, &mut built.pipeline, &options)?
    };

    eprintln!("\n📊 Results:");
    eprintln!("   Decoded: {}", summary.records_decoded);
    eprintln!("   Written: {}", summary.records_written);
    if summary.decode_errors > 0 {
        eprintln!("   ⚠️  Malformed: {}", summary.decode_errors);
    }
    if summary.records_skipped > 0 {
        eprintln!("   ⚠️  Skipped: {}", summary.records_skipped);
    }

    let manufacturers = built.manufacturers.as_ref().map(|tally| tally.snapshot());
    if let Some(ref counts) = manufacturers {
        eprintln!("\n🏭 Manufacturers: {}", counts.len());
        for (name, count) in counts.iter().take(10) {
            let label = if name.is_empty() { "(none)" } else { name.as_str() };
            eprintln!("   {}: {}", label, count);
        }
    }

    if let Some(path) = request.stats {
        let report = serde_json::json!({
            "summary": summary,
            "manufacturers": manufacturers,
        });
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
        eprintln!("   💾 Stats saved to: {}", path.display());
    }

    eprintln!("\n✨ Done!");
    Ok(())
}

fn cmd_inspect<R: Record + Serialize>(input: &Path, show: usize) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("🔍 Inspecting: {}", input.display());

    let source = BufReader::new(File::open(input)?);
    let mut decoder = decode::<R, _>(source, LogSink)?;

    let mut shown = Vec::new();
    for record in decoder.by_ref() {
        let record = record?;
        if shown.len() < show {
            shown.push(serde_json::to_value(&record)?);
        }
    }

    let stats = decoder.stats();
    eprintln!("   Records: {}", stats.records);
    eprintln!("   Malformed: {}", stats.errors);
    eprintln!("   Largest record: {} nodes", stats.peak_record_nodes);

    if !shown.is_empty() {
        println!("{}", serde_json::to_string_pretty(&shown)?);
    }
    Ok(())
}

fn cmd_operations() -> Result<(), Box<dyn std::error::Error>> {
    println!("Available operations:\n");
    for (name, description) in operations_description() {
        println!("  {:<24} {}", name, description);
    }
    println!("\nFailure policies: {}, {}", FailurePolicy::Abort, FailurePolicy::SkipRecord);
    Ok(())
}

fn cmd_schema<R: Record>() -> Result<(), Box<dyn std::error::Error>> {
    let schema = R::describe()?;
    println!("<{}> of <{}>\n", schema.root_tag(), schema.record_tag());
    for field in schema.fields() {
        let mut notes = Vec::new();
        if field.is_literal() {
            notes.push("literal".to_string());
        }
        if let Some(entry) = field.entry_tag() {
            notes.push(format!("entries <{}>", entry));
        }
        println!("  {:<22} {:<16} {}", field.name(), field.kind().to_string(), notes.join(", "));
    }
    Ok(())
}
