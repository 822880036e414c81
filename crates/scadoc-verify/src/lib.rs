//! Verification run orchestration: fetch both print versions, reconcile the
//! existing dataset against them and persist every output.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use scadoc_core::{
    default_key_sections, ComparisonResult, DocumentationDataset, ExtractedDocument,
    KeySectionSpec, ReferencePair, TrainingPair,
};
use scadoc_extract::{
    language_print_source, load_existing_dataset, main_print_source, ExtractError,
    PrintVersionSource, ReferenceSource, SourceContext,
};
use scadoc_reconcile::{
    enhance_with_policy, render_training_text, report, CodeGapPolicy, ContentComparator,
    GapReport, TrainingPairSynthesizer, DEFAULT_DOMAIN,
};
use scadoc_storage::{
    write_atomic, write_json_atomic, ArtifactStore, HttpClientConfig, HttpFetcher, PersistError,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "scadoc-verify";

pub const DEFAULT_MAIN_PRINT_URL: &str =
    "https://en.wikibooks.org/wiki/OpenSCAD_User_Manual/Print_version";
pub const DEFAULT_LANGUAGE_PRINT_URL: &str =
    "https://en.wikibooks.org/wiki/OpenSCAD_User_Manual/The_OpenSCAD_Language";

pub const COMPARISON_RESULTS_FILE: &str = "comparison_results.json";
pub const VERIFICATION_REPORT_FILE: &str = "verification_report.md";
pub const ENHANCED_DATASET_FILE: &str = "enhanced_training_data.json";
pub const ENHANCED_USER_MANUAL_FILE: &str = "enhanced_usermanual.json";
pub const TRAINING_EXAMPLES_FILE: &str = "enhanced_training_examples.json";
pub const PRINT_VERSION_CONTENT_FILE: &str = "print_version_content.json";
pub const VERIFICATION_RUN_FILE: &str = "verification_run.json";
pub const TRAINING_TEXT_FILE: &str = "openscad_training_data.txt";

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub dataset_path: PathBuf,
    pub output_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub main_print_url: String,
    pub language_print_url: String,
    pub key_sections_path: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Pause between the two print-page requests of a run.
    pub request_delay_ms: u64,
    pub domain: String,
    pub synthesize_missing_categories: bool,
    pub write_training_text: bool,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            dataset_path: PathBuf::from("openscad_docs/openscad_training_data.json"),
            output_dir: PathBuf::from("openscad_docs/verification"),
            artifacts_dir: PathBuf::from("./artifacts"),
            main_print_url: DEFAULT_MAIN_PRINT_URL.to_string(),
            language_print_url: DEFAULT_LANGUAGE_PRINT_URL.to_string(),
            key_sections_path: None,
            user_agent: "scadoc-bot/0.1".to_string(),
            http_timeout_secs: 30,
            request_delay_ms: 1000,
            domain: DEFAULT_DOMAIN.to_string(),
            synthesize_missing_categories: false,
            write_training_text: false,
        }
    }
}

impl VerifyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup; unset or unparsable values
    /// keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            dataset_path: lookup("SCADOC_DATASET_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dataset_path),
            output_dir: lookup("SCADOC_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            artifacts_dir: lookup("SCADOC_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            main_print_url: lookup("SCADOC_MAIN_PRINT_URL").unwrap_or(defaults.main_print_url),
            language_print_url: lookup("SCADOC_LANGUAGE_PRINT_URL")
                .unwrap_or(defaults.language_print_url),
            key_sections_path: lookup("SCADOC_KEY_SECTIONS")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            user_agent: lookup("SCADOC_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: lookup("SCADOC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            request_delay_ms: lookup("SCADOC_REQUEST_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.request_delay_ms),
            domain: lookup("SCADOC_DOMAIN").unwrap_or(defaults.domain),
            synthesize_missing_categories: lookup("SCADOC_SYNTHESIZE_MISSING_CATEGORIES")
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.synthesize_missing_categories),
            write_training_text: lookup("SCADOC_WRITE_TRAINING_TEXT")
                .map(|v| is_truthy(&v))
                .unwrap_or(defaults.write_training_text),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn code_gap_policy(&self) -> CodeGapPolicy {
        if self.synthesize_missing_categories {
            CodeGapPolicy::SynthesizeCategory
        } else {
            CodeGapPolicy::DropMissingCategory
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    /// Key sections from the configured YAML file, or the compiled-in list.
    pub async fn key_sections(&self) -> Result<Vec<KeySectionSpec>> {
        match &self.key_sections_path {
            Some(path) => load_key_sections(path).await,
            None => Ok(default_key_sections()),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySectionsFile {
    #[serde(default = "default_key_sections_version")]
    pub version: u32,
    pub key_sections: Vec<KeySectionSpec>,
}

fn default_key_sections_version() -> u32 {
    1
}

pub async fn load_key_sections(path: &Path) -> Result<Vec<KeySectionSpec>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file: KeySectionsFile =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    anyhow::ensure!(
        file.version == 1,
        "unsupported key sections version {} in {}",
        file.version,
        path.display()
    );
    Ok(file.key_sections)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFetchRecord {
    pub source_id: String,
    pub location: String,
    pub available: bool,
    pub sections: usize,
    pub artifact_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedWrite {
    pub file: String,
    pub error: String,
}

/// Persisted record of one verification run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub dataset_path: String,
    pub output_dir: String,
    pub references: Vec<ReferenceFetchRecord>,
    pub key_sections: usize,
    pub missing_sections: usize,
    pub incomplete_sections: usize,
    pub missing_code_examples: usize,
    pub training_pairs: usize,
    pub written: Vec<String>,
    pub failed_writes: Vec<FailedWrite>,
}

impl VerificationRun {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Everything a run computed, valid even when some outputs failed to persist.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub run: VerificationRun,
    pub reference: ReferencePair,
    pub comparison: ComparisonResult,
    pub report: GapReport,
    pub enhanced: DocumentationDataset,
    pub training_pairs: Vec<TrainingPair>,
}

pub struct VerifyPipeline {
    config: VerifyConfig,
    artifact_store: ArtifactStore,
    http: HttpFetcher,
}

impl VerifyPipeline {
    pub fn new(config: VerifyConfig) -> Result<Self> {
        let artifact_store = ArtifactStore::new(config.artifacts_dir.clone());
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self {
            config,
            artifact_store,
            http,
        })
    }

    /// Fetch both references one after the other, then reconcile.
    pub async fn run_once(&self) -> Result<VerifyOutcome> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let ctx = SourceContext {
            run_id,
            fetched_at: started_at,
        };
        info!(%run_id, dataset = %self.config.dataset_path.display(), "starting verification run");

        let main = main_print_source(self.config.main_print_url.clone());
        let language = language_print_source(self.config.language_print_url.clone());

        let (main_print, main_record) = self.acquire(&main, &ctx).await;
        let delay = self.config.request_delay();
        if !delay.is_zero() {
            debug!(delay_ms = self.config.request_delay_ms, "pausing before next print page");
            tokio::time::sleep(delay).await;
        }
        let (language_print, language_record) = self.acquire(&language, &ctx).await;

        let reference = ReferencePair {
            main_print,
            language_print,
        };
        self.reconcile(
            run_id,
            started_at,
            reference,
            vec![main_record, language_record],
        )
        .await
    }

    /// Reconcile against an already extracted reference pair.
    pub async fn run_with_reference(&self, reference: ReferencePair) -> Result<VerifyOutcome> {
        self.reconcile(Uuid::new_v4(), Utc::now(), reference, Vec::new())
            .await
    }

    /// A failed source degrades to an empty document; the matcher then falls
    /// through to its remaining steps.
    async fn acquire(
        &self,
        source: &PrintVersionSource,
        ctx: &SourceContext,
    ) -> (ExtractedDocument, ReferenceFetchRecord) {
        let mut record = ReferenceFetchRecord {
            source_id: source.source_id().to_string(),
            location: source.location().to_string(),
            available: false,
            sections: 0,
            artifact_path: None,
            error: None,
        };

        let page = match source.fetch(&self.http, ctx).await {
            Ok(page) => page,
            Err(err) => {
                warn!(source_id = source.source_id(), error = %err, "reference unavailable");
                record.error = Some(err.to_string());
                return (ExtractedDocument::new(), record);
            }
        };

        match self
            .artifact_store
            .store_bytes(page.fetched_at, &page.source_id, "html", page.body.as_bytes())
            .await
        {
            Ok(stored) => {
                record.artifact_path = Some(stored.relative_path.display().to_string());
            }
            Err(err) => {
                warn!(source_id = source.source_id(), error = %err, "could not store raw page");
            }
        }

        match source.parse(&page) {
            Ok(doc) => {
                record.available = true;
                record.sections = doc.len();
                (doc, record)
            }
            Err(err @ ExtractError::ReferenceUnavailable { .. }) => {
                warn!(source_id = source.source_id(), error = %err, "reference unavailable");
                record.error = Some(err.to_string());
                (ExtractedDocument::new(), record)
            }
            Err(err) => {
                warn!(source_id = source.source_id(), error = %err, "reference could not be parsed");
                record.error = Some(err.to_string());
                (ExtractedDocument::new(), record)
            }
        }
    }

    async fn reconcile(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        reference: ReferencePair,
        references: Vec<ReferenceFetchRecord>,
    ) -> Result<VerifyOutcome> {
        let dataset = load_existing_dataset(&self.config.dataset_path)
            .with_context(|| format!("loading dataset {}", self.config.dataset_path.display()))?;
        let keys = self.config.key_sections().await?;

        let span = info_span!("reconcile", %run_id, key_sections = keys.len());
        let (comparison, gap_report, enhanced, training_pairs) = span.in_scope(|| {
            let comparison =
                ContentComparator::default().compare(&keys, &dataset.user_manual, &reference);
            let gap_report = report(&comparison);
            let manual = enhance_with_policy(
                &dataset.user_manual,
                &comparison,
                self.config.code_gap_policy(),
            );
            let training_pairs = TrainingPairSynthesizer::new(self.config.domain.clone()).synthesize(&manual);
            let enhanced = DocumentationDataset {
                user_manual: manual,
                ..dataset.clone()
            };
            (comparison, gap_report, enhanced, training_pairs)
        });

        info!(
            missing = comparison.missing_sections.len(),
            incomplete = comparison.incomplete_content.len(),
            code_gaps = comparison.missing_code_examples.len(),
            training_pairs = training_pairs.len(),
            "reconciliation finished"
        );

        let mut run = VerificationRun {
            run_id,
            started_at,
            finished_at: started_at,
            status: RunStatus::Completed,
            dataset_path: self.config.dataset_path.display().to_string(),
            output_dir: self.config.output_dir.display().to_string(),
            references,
            key_sections: keys.len(),
            missing_sections: comparison.missing_sections.len(),
            incomplete_sections: comparison.incomplete_content.len(),
            missing_code_examples: comparison.missing_code_examples.len(),
            training_pairs: training_pairs.len(),
            written: Vec::new(),
            failed_writes: Vec::new(),
        };

        let outcome_parts = OutputSet {
            reference: &reference,
            comparison: &comparison,
            report: &gap_report,
            enhanced: &enhanced,
            training_pairs: &training_pairs,
        };
        self.write_outputs(&outcome_parts, &mut run).await;

        run.finished_at = Utc::now();
        if !run.failed_writes.is_empty() {
            run.status = RunStatus::Failed;
        }
        let run_path = self.config.output_dir.join(VERIFICATION_RUN_FILE);
        if let Err(err) = write_json_atomic(&run_path, &run).await {
            error!(path = %run_path.display(), error = %err, "failed to write run record");
            run.status = RunStatus::Failed;
            run.failed_writes.push(failed_write(VERIFICATION_RUN_FILE, &err));
        }

        Ok(VerifyOutcome {
            run,
            reference,
            comparison,
            report: gap_report,
            enhanced,
            training_pairs,
        })
    }

    /// Attempt every output; a failed write is recorded and the rest proceed.
    async fn write_outputs(&self, outputs: &OutputSet<'_>, run: &mut VerificationRun) {
        let dir = &self.config.output_dir;
        let mut results = vec![
            (
                COMPARISON_RESULTS_FILE,
                write_json_atomic(&dir.join(COMPARISON_RESULTS_FILE), outputs.comparison).await,
            ),
            (
                VERIFICATION_REPORT_FILE,
                write_atomic(
                    &dir.join(VERIFICATION_REPORT_FILE),
                    outputs.report.human_readable.as_bytes(),
                )
                .await,
            ),
            (
                ENHANCED_DATASET_FILE,
                write_json_atomic(&dir.join(ENHANCED_DATASET_FILE), outputs.enhanced).await,
            ),
            (
                ENHANCED_USER_MANUAL_FILE,
                write_json_atomic(
                    &dir.join(ENHANCED_USER_MANUAL_FILE),
                    &outputs.enhanced.user_manual,
                )
                .await,
            ),
            (
                TRAINING_EXAMPLES_FILE,
                write_json_atomic(&dir.join(TRAINING_EXAMPLES_FILE), outputs.training_pairs).await,
            ),
            (
                PRINT_VERSION_CONTENT_FILE,
                write_json_atomic(&dir.join(PRINT_VERSION_CONTENT_FILE), outputs.reference).await,
            ),
        ];
        if self.config.write_training_text {
            let text = render_training_text(
                &self.config.domain,
                &outputs.enhanced.user_manual,
                outputs.reference,
            );
            results.push((
                TRAINING_TEXT_FILE,
                write_atomic(&dir.join(TRAINING_TEXT_FILE), text.as_bytes()).await,
            ));
        }

        for (file, result) in results {
            match result {
                Ok(()) => run.written.push(file.to_string()),
                Err(err) => {
                    error!(file, error = %err, "failed to persist output");
                    run.failed_writes.push(failed_write(file, &err));
                }
            }
        }
    }
}

struct OutputSet<'a> {
    reference: &'a ReferencePair,
    comparison: &'a ComparisonResult,
    report: &'a GapReport,
    enhanced: &'a DocumentationDataset,
    training_pairs: &'a [TrainingPair],
}

fn failed_write(file: &str, err: &PersistError) -> FailedWrite {
    FailedWrite {
        file: file.to_string(),
        error: err.to_string(),
    }
}

pub async fn run_verify_once_from_env() -> Result<VerifyOutcome> {
    let pipeline = VerifyPipeline::new(VerifyConfig::from_env())?;
    pipeline.run_once().await
}
