//! End-to-end batch pipeline.
//!
//! Orchestrates the full flow for one batch:
//!   1. Load each document (inline XML or file path)
//!   2. Parse into the owned tree
//!   3. Classify via the rule cache
//!   4. Look up the case's mapping profile
//!   5. Resolve into a canonical document
//!   6. Record detection history and per-rule statistics (best-effort)
//!   7. Emit progress events via broadcast channel
//!
//! Per-document failures are accumulated with a human-readable reason and
//! the batch continues; an unreachable rule repository is systemic and
//! aborts the whole run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use nodulyx_common::{NodulyxError, Result, XmlDocument};
use nodulyx_mapping::{CanonicalDocument, ProfileMappingEngine, ProfileStore, ResolveContext};
use nodulyx_rules::{Classification, RuleRepository, StructureClassifier, XML_PARSE_ERROR};

// ── Job config ────────────────────────────────────────────────────────────────

/// Where one document's XML comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DocumentInput {
    Inline(String),
    Path(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDocument {
    pub source_id: String,
    pub input: DocumentInput,
}

impl BatchDocument {
    pub fn inline(source_id: &str, xml: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            input: DocumentInput::Inline(xml.to_string()),
        }
    }

    pub fn from_path(path: PathBuf) -> Self {
        Self {
            source_id: path.display().to_string(),
            input: DocumentInput::Path(path),
        }
    }
}

/// Parameters for a single batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub label: String,
    pub documents: Vec<BatchDocument>,
}

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a batch run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub batch_id: Uuid,
    pub stage: String,
    pub message: String,
    pub processed: usize,
    pub failed: usize,
}

// ── Result summary ────────────────────────────────────────────────────────────

/// One per-document failure with a human-readable reason.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentError {
    pub source_id: String,
    pub reason: String,
}

#[derive(Debug)]
pub struct BatchResult {
    pub batch_id: Uuid,
    pub processed: usize,
    pub succeeded: usize,
    pub case_counts: HashMap<String, usize>,
    pub errors: Vec<DocumentError>,
    pub documents: Vec<CanonicalDocument>,
    pub duration_ms: u64,
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

/// Runs the end-to-end pipeline for one batch.
///
/// Progress events are sent via `progress_tx` if provided. Only
/// `RuleRepositoryUnavailable` aborts; everything else is per-document.
#[instrument(skip_all, fields(label = %job.label, n_docs = job.documents.len()))]
pub async fn run_batch(
    job: BatchJob,
    classifier: Arc<StructureClassifier>,
    profile_store: Arc<dyn ProfileStore>,
    repo: Arc<dyn RuleRepository>,
    progress_tx: Option<broadcast::Sender<BatchProgress>>,
) -> Result<BatchResult> {
    let batch_id = Uuid::new_v4();
    let t0 = std::time::Instant::now();
    let engine = ProfileMappingEngine::new();

    info!(batch_id = %batch_id, "Starting batch");

    let mut result = BatchResult {
        batch_id,
        processed: 0,
        succeeded: 0,
        case_counts: HashMap::new(),
        errors: Vec::new(),
        documents: Vec::new(),
        duration_ms: 0,
    };

    let emit = |stage: &str, msg: &str, result: &BatchResult| {
        if let Some(ref tx) = progress_tx {
            let _ = tx.send(BatchProgress {
                batch_id,
                stage: stage.to_string(),
                message: msg.to_string(),
                processed: result.processed,
                failed: result.errors.len(),
            });
        }
    };

    emit("start", &format!("{} documents queued", job.documents.len()), &result);

    for doc_ref in &job.documents {
        result.processed += 1;
        let doc_t0 = std::time::Instant::now();

        let xml = match load_input(&doc_ref.input) {
            Ok(xml) => xml,
            Err(reason) => {
                warn!(source = %doc_ref.source_id, %reason, "Document load failed");
                result.errors.push(DocumentError {
                    source_id: doc_ref.source_id.clone(),
                    reason,
                });
                continue;
            }
        };

        // Parse first: a syntax error never reaches the rule cache.
        let tree = match XmlDocument::parse_str(&xml) {
            Ok(tree) => tree,
            Err(NodulyxError::XmlSyntax(msg)) => {
                warn!(source = %doc_ref.source_id, error = %msg, "XML parse error");
                *result.case_counts.entry(XML_PARSE_ERROR.to_string()).or_default() += 1;
                result.errors.push(DocumentError {
                    source_id: doc_ref.source_id.clone(),
                    reason: format!("XML parse error: {msg}"),
                });
                continue;
            }
            Err(e) => return Err(e),
        };

        // Repository unavailability is systemic: abort the batch here
        // rather than mis-classify the remainder.
        let classification = match classifier.classify_tree(&tree).await {
            Ok(c) => c,
            Err(e @ NodulyxError::RuleRepositoryUnavailable(_)) => {
                warn!(batch_id = %batch_id, error = %e, "Aborting batch");
                return Err(e);
            }
            Err(e) => {
                result.errors.push(DocumentError {
                    source_id: doc_ref.source_id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let case_name = classification.case_name.clone();
        *result.case_counts.entry(case_name.clone()).or_default() += 1;

        let profile = match profile_store.get_profile_for_case(&case_name).await {
            Ok(p) => p,
            Err(e) => {
                record_failure_async(repo.clone(), classification.rule_id, doc_t0.elapsed());
                result.errors.push(DocumentError {
                    source_id: doc_ref.source_id.clone(),
                    reason: format!("profile lookup failed: {e}"),
                });
                continue;
            }
        };

        let ctx = ResolveContext::new(&doc_ref.source_id, &case_name)
            .with_expected_fields(classification.expected_fields.clone());
        let mapped = match engine.resolve(&profile, &tree, &ctx) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(source = %doc_ref.source_id, error = %e, "Mapping failed");
                record_failure_async(repo.clone(), classification.rule_id, doc_t0.elapsed());
                result.errors.push(DocumentError {
                    source_id: doc_ref.source_id.clone(),
                    reason: format!("mapping failed: {e}"),
                });
                continue;
            }
        };

        let duration = doc_t0.elapsed();
        record_detection_async(
            repo.clone(),
            &doc_ref.source_id,
            &classification,
            duration,
        );

        result.succeeded += 1;
        result.documents.push(mapped);
        debug!(
            source = %doc_ref.source_id,
            case = %case_name,
            duration_ms = duration.as_millis() as u64,
            "Document mapped"
        );
        emit("document", &format!("{} -> {case_name}", doc_ref.source_id), &result);
    }

    result.duration_ms = t0.elapsed().as_millis() as u64;
    info!(
        batch_id   = %batch_id,
        processed  = result.processed,
        succeeded  = result.succeeded,
        failed     = result.errors.len(),
        duration_ms = result.duration_ms,
        "Batch complete"
    );
    emit(
        "complete",
        &format!(
            "Done. {} mapped, {} failed.",
            result.succeeded,
            result.errors.len()
        ),
        &result,
    );

    Ok(result)
}

fn load_input(input: &DocumentInput) -> std::result::Result<String, String> {
    match input {
        DocumentInput::Inline(xml) => Ok(xml.clone()),
        DocumentInput::Path(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display())),
    }
}

/// A document that classified but then failed downstream still counts
/// against its matched rule. Same fire-and-forget contract as the success
/// path.
fn record_failure_async(repo: Arc<dyn RuleRepository>, rule_id: Option<Uuid>, duration: Duration) {
    let Some(rule_id) = rule_id else { return };
    tokio::spawn(async move {
        if let Err(e) = repo.update_statistics(rule_id, false, duration).await {
            warn!(rule = %rule_id, error = %e, "update_statistics failed (ignored)");
        }
    });
}

/// Detection history and per-rule statistics are fire-and-forget relative
/// to the main path: a recording failure is logged and never fails the run.
fn record_detection_async(
    repo: Arc<dyn RuleRepository>,
    source_id: &str,
    classification: &Classification,
    duration: Duration,
) {
    let source_id = source_id.to_string();
    let case_name = classification.case_name.clone();
    let rule_id = classification.rule_id;
    let metadata = classification
        .features
        .as_ref()
        .and_then(|f| serde_json::to_value(f).ok())
        .unwrap_or(serde_json::Value::Null);

    tokio::spawn(async move {
        if let Err(e) = repo
            .record_detection(&source_id, &case_name, metadata, duration)
            .await
        {
            warn!(source = %source_id, error = %e, "record_detection failed (ignored)");
        }
        if let Some(rule_id) = rule_id {
            if let Err(e) = repo.update_statistics(rule_id, true, duration).await {
                warn!(rule = %rule_id, error = %e, "update_statistics failed (ignored)");
            }
        }
    });
}
