use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use scadoc_extract::{load_existing_dataset, PrintVersionSource, ReferenceSource, SourceContext};
use scadoc_reconcile::TrainingPairSynthesizer;
use scadoc_storage::{write_json_atomic, HttpFetcher};
use scadoc_verify::{VerifyConfig, VerifyPipeline};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "scadoc-cli")]
#[command(about = "Audit a scraped OpenSCAD documentation dataset against the Wikibooks print versions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Compare the dataset with both print versions and write every output (default)
    Verify(VerifyArgs),
    /// Extract one print-version page and print its sections as JSON
    Extract {
        /// URL or local HTML file
        location: String,
        #[arg(long, default_value = scadoc_extract::MAIN_PRINT_SOURCE_ID)]
        source_id: String,
    },
    /// Generate training pairs from a dataset without comparing it
    Synthesize {
        dataset: PathBuf,
        /// Write the pairs here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        domain: Option<String>,
    },
}

#[derive(Debug, Default, Args)]
struct VerifyArgs {
    #[arg(long)]
    dataset: Option<PathBuf>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,
    #[arg(long)]
    main_print: Option<String>,
    #[arg(long)]
    language_print: Option<String>,
    /// YAML file listing the key sections to check
    #[arg(long)]
    key_sections: Option<PathBuf>,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    user_agent: Option<String>,
    #[arg(long)]
    http_timeout_secs: Option<u64>,
    /// Pause between the two print-page requests
    #[arg(long)]
    request_delay_ms: Option<u64>,
    /// Also write the plain-text training corpus
    #[arg(long)]
    training_text: bool,
    /// Create absent categories for supplemented code examples instead of dropping them
    #[arg(long)]
    synthesize_missing_categories: bool,
}

impl VerifyArgs {
    fn apply(self, config: &mut VerifyConfig) {
        if let Some(v) = self.dataset {
            config.dataset_path = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.artifacts_dir {
            config.artifacts_dir = v;
        }
        if let Some(v) = self.main_print {
            config.main_print_url = v;
        }
        if let Some(v) = self.language_print {
            config.language_print_url = v;
        }
        if let Some(v) = self.key_sections {
            config.key_sections_path = Some(v);
        }
        if let Some(v) = self.domain {
            config.domain = v;
        }
        if let Some(v) = self.user_agent {
            config.user_agent = v;
        }
        if let Some(v) = self.http_timeout_secs {
            config.http_timeout_secs = v;
        }
        if let Some(v) = self.request_delay_ms {
            config.request_delay_ms = v;
        }
        if self.synthesize_missing_categories {
            config.synthesize_missing_categories = true;
        }
        if self.training_text {
            config.write_training_text = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = VerifyConfig::from_env();

    match cli.command.unwrap_or(Commands::Verify(VerifyArgs::default())) {
        Commands::Verify(args) => {
            args.apply(&mut config);
            let pipeline = VerifyPipeline::new(config)?;
            let outcome = pipeline.run_once().await?;
            let run = &outcome.run;
            println!(
                "verify complete: run_id={} missing={} incomplete={} code_gaps={} pairs={} output={}",
                run.run_id,
                run.missing_sections,
                run.incomplete_sections,
                run.missing_code_examples,
                run.training_pairs,
                run.output_dir
            );
            if !run.succeeded() {
                let files = run
                    .failed_writes
                    .iter()
                    .map(|f| f.file.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("verification run {} failed to write: {files}", run.run_id);
            }
        }
        Commands::Extract {
            location,
            source_id,
        } => {
            let http = HttpFetcher::new(config.http_client_config())?;
            let source = PrintVersionSource::new(source_id, location);
            let ctx = SourceContext {
                run_id: Uuid::new_v4(),
                fetched_at: Utc::now(),
            };
            let page = source.fetch(&http, &ctx).await?;
            let doc = source.parse(&page)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&doc).context("serializing extracted sections")?
            );
        }
        Commands::Synthesize {
            dataset,
            output,
            domain,
        } => {
            let dataset = load_existing_dataset(&dataset)?;
            let domain = domain.unwrap_or(config.domain);
            let pairs = TrainingPairSynthesizer::new(domain).synthesize(&dataset.user_manual);
            match output {
                Some(path) => {
                    write_json_atomic(&path, &pairs)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!(pairs = pairs.len(), path = %path.display(), "wrote training pairs");
                }
                None => println!(
                    "{}",
                    serde_json::to_string_pretty(&pairs).context("serializing training pairs")?
                ),
            }
        }
    }

    Ok(())
}
