//! akh-disjoint CLI: infer disjointness facts over a taxonomy snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use akh_disjoint::bubble::BubbleUp;
use akh_disjoint::config::DisjointConfig;
use akh_disjoint::mining::{MiningPipeline, read_observations};
use akh_disjoint::taxonomy::memory::MemoryTaxonomy;
use akh_disjoint::taxonomy::resolve::AliasIndex;

#[derive(Parser)]
#[command(name = "akh-disjoint", version, about = "Disjointness inference over concept taxonomies")]
struct Cli {
    /// Taxonomy snapshot (JSON).
    #[arg(long, short = 't')]
    taxonomy: PathBuf,

    /// Engine configuration (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generalize existing disjoint facts to ancestor collections.
    BubbleUp {
        /// Override the number of passes.
        #[arg(long)]
        iterations: Option<usize>,
    },

    /// Mine disjointness from relation observations.
    Mine {
        /// Observation file: `relation<TAB>left<TAB>right` per line.
        #[arg(long, short = 'o')]
        observations: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<DisjointConfig> {
    match path {
        Some(path) => Ok(DisjointConfig::load(path)?),
        None => Ok(DisjointConfig::default()),
    }
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let out = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .into_diagnostic()?;
    println!("{out}");
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    let taxonomy = Arc::new(MemoryTaxonomy::load_json(&cli.taxonomy)?);
    tracing::info!(
        concepts = taxonomy.concept_count(),
        path = %cli.taxonomy.display(),
        "taxonomy loaded"
    );

    match cli.command {
        Commands::BubbleUp { iterations } => {
            if let Some(iterations) = iterations {
                config.bubble_up.max_iterations = iterations;
            }
            let report = BubbleUp::new(taxonomy, config)?.run()?;
            print_json(&report, cli.pretty)?;
        }

        Commands::Mine { observations } => {
            let parsed = read_observations(&observations)?;
            let index = AliasIndex::from_labels(taxonomy.as_ref(), taxonomy.concept_ids());
            tracing::info!(
                aliases = index.len(),
                observations = parsed.observations.len(),
                malformed = parsed.malformed,
                "observations loaded"
            );
            let pipeline = MiningPipeline::new(taxonomy, Arc::new(index), config)?;
            let mut report = pipeline.run(parsed.observations)?;
            report.malformed_lines = parsed.malformed;
            print_json(&report, cli.pretty)?;
        }
    }

    Ok(())
}
