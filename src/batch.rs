//! Dataset-driven completion and evaluation runs.
//!
//! A batch drives many prompts through the analyzers and keeps going past
//! individual failures: a prompt that errors gets an `{"error": ...}` record
//! and the limiter and usage counters stay valid for the rest of the run.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;
use crate::dispatch::GenerationConfig;
use crate::error::EvalError;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Dataset {
    rows: Vec<DatasetRow>,
}

#[derive(Debug, Deserialize)]
struct DatasetRow {
    row: RowFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RowFields {
    goal: String,
    category: Option<String>,
    behavior: Option<String>,
    source: Option<String>,
}

/// One prompt selected from a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetPrompt {
    pub instruction: String,
    pub category: Option<String>,
    pub behavior: Option<String>,
    pub source: Option<String>,
}

/// Row filter; an empty list accepts everything for that field.
#[derive(Debug, Clone, Default)]
pub struct DatasetFilter {
    pub categories: Vec<String>,
    pub behaviors: Vec<String>,
    pub sources: Vec<String>,
}

impl DatasetFilter {
    fn accepts(&self, row: &RowFields) -> bool {
        fn matches(allowed: &[String], value: &Option<String>) -> bool {
            allowed.is_empty() || value.as_ref().is_some_and(|v| allowed.contains(v))
        }
        matches(&self.categories, &row.category)
            && matches(&self.behaviors, &row.behavior)
            && matches(&self.sources, &row.source)
    }
}

/// Parse a dataset document and keep the rows the filter accepts.
pub fn parse_dataset(text: &str, filter: &DatasetFilter) -> Result<Vec<DatasetPrompt>, serde_json::Error> {
    let dataset: Dataset = serde_json::from_str(text)?;
    Ok(dataset
        .rows
        .into_iter()
        .map(|r| r.row)
        .filter(|row| filter.accepts(row))
        .map(|row| DatasetPrompt {
            instruction: row.goal,
            category: row.category,
            behavior: row.behavior,
            source: row.source,
        })
        .collect())
}

pub async fn load_dataset(path: &Path, filter: &DatasetFilter) -> Result<Vec<DatasetPrompt>, BatchError> {
    let text = read(path).await?;
    parse_dataset(&text, filter).map_err(|source| BatchError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub provider: String,
    pub model: String,
    pub config: GenerationConfig,
    /// Completion text, or `{"error": ..., "reason": ...}`.
    pub completion: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionRecord {
    #[serde(flatten)]
    pub prompt: DatasetPrompt,
    pub completions: Vec<CompletionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub providers: Vec<ProviderInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResults {
    pub metadata: RunMetadata,
    pub instructions: Vec<InstructionRecord>,
}

fn error_value(err: &EvalError) -> Value {
    json!({"error": err.user_message(), "reason": err.reason()})
}

fn cancelled_value() -> Value {
    json!({"error": "cancelled", "reason": "cancelled"})
}

/// Run `call` unless `cancel` fires first. A cancelled call is dropped
/// mid-flight (limiter wait, backoff, or repair resubmission included).
async fn unless_cancelled<T>(cancel: Option<&CancellationToken>, call: impl Future<Output = T>) -> Option<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = call => Some(out),
        },
        None => Some(call.await),
    }
}

// ---------------------------------------------------------------------------
// Completion run
// ---------------------------------------------------------------------------

/// One analyzer plus the generation configs to sweep for every prompt.
pub struct CompletionTarget<'a> {
    pub analyzer: &'a Analyzer,
    /// Empty means "the analyzer's session config".
    pub configs: Vec<GenerationConfig>,
}

impl<'a> CompletionTarget<'a> {
    pub fn new(analyzer: &'a Analyzer) -> Self {
        Self {
            analyzer,
            configs: Vec::new(),
        }
    }

    pub fn with_configs(mut self, configs: Vec<GenerationConfig>) -> Self {
        self.configs = configs;
        self
    }

    fn effective_configs(&self) -> Vec<GenerationConfig> {
        if self.configs.is_empty() {
            vec![self.analyzer.effective_config()]
        } else {
            let defaults = self.analyzer.adapter().default_config();
            self.configs.iter().map(|c| c.merged_over(&defaults)).collect()
        }
    }
}

pub struct CompletionRun<'a> {
    targets: Vec<CompletionTarget<'a>>,
    concurrency: usize,
    cancel: Option<CancellationToken>,
}

impl<'a> CompletionRun<'a> {
    pub fn new(targets: Vec<CompletionTarget<'a>>) -> Self {
        Self {
            targets,
            concurrency: 1,
            cancel: None,
        }
    }

    /// Prompts in flight at once. Output order always matches input order.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn metadata(&self) -> RunMetadata {
        RunMetadata {
            providers: self
                .targets
                .iter()
                .map(|t| ProviderInfo {
                    name: t.analyzer.provider().to_string(),
                    model: t.analyzer.model().to_string(),
                })
                .collect(),
        }
    }

    pub async fn run(&self, prompts: Vec<DatasetPrompt>) -> CompletionResults {
        let total = prompts.len();
        tracing::info!(prompts = total, providers = self.targets.len(), "starting completion run");

        let sweeps: Vec<Vec<GenerationConfig>> =
            self.targets.iter().map(|t| t.effective_configs()).collect();
        let sweeps = &sweeps;

        let instructions = stream::iter(prompts.into_iter().enumerate())
            .map(|(idx, prompt)| async move {
                let mut completions = Vec::new();
                for (target, configs) in self.targets.iter().zip(sweeps) {
                    for config in configs {
                        completions.push(self.complete_one(idx, total, &prompt, target, config).await);
                    }
                }
                tracing::info!("prompt {}/{total} complete", idx + 1);
                InstructionRecord { prompt, completions }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        CompletionResults {
            metadata: self.metadata(),
            instructions,
        }
    }

    async fn complete_one(
        &self,
        idx: usize,
        total: usize,
        prompt: &DatasetPrompt,
        target: &CompletionTarget<'_>,
        config: &GenerationConfig,
    ) -> CompletionRecord {
        let analyzer = target.analyzer;
        let call = analyzer.generate_with(&prompt.instruction, config);
        let completion = match unless_cancelled(self.cancel.as_ref(), call).await {
            None => cancelled_value(),
            Some(Ok(text)) => Value::String(text),
            Some(Err(e)) => {
                tracing::warn!(
                    provider = %analyzer.provider(),
                    "generation failed for prompt {}/{total}: {e}",
                    idx + 1
                );
                error_value(&e)
            }
        };

        CompletionRecord {
            provider: analyzer.provider().to_string(),
            model: analyzer.model().to_string(),
            config: config.clone(),
            completion,
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation run
// ---------------------------------------------------------------------------

/// Append serialized samples to an evaluation prompt.
pub fn evaluation_prompt(base: &str, samples: &[String]) -> String {
    if samples.is_empty() {
        return base.to_string();
    }
    format!("{base}\n\nIncluded Samples:\n{}", samples.join("\n"))
}

/// Judge every instruction record with structured output.
pub struct EvaluationRun<'a> {
    judge: &'a Analyzer,
    eval_prompt: String,
    concurrency: usize,
    cancel: Option<CancellationToken>,
}

impl<'a> EvaluationRun<'a> {
    pub fn new(judge: &'a Analyzer, eval_prompt: impl Into<String>) -> Self {
        Self {
            judge,
            eval_prompt: eval_prompt.into(),
            concurrency: 1,
            cancel: None,
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Returns the records with an `evaluations` field added to each.
    pub async fn run(&self, instructions: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
        let total = instructions.len();
        tracing::info!(instructions = total, judge = %self.judge.provider(), "starting evaluation run");

        stream::iter(instructions.into_iter().enumerate())
            .map(|(idx, mut record)| async move {
                let evaluation = self.evaluate_one(idx, total, &record).await;
                record.insert("evaluations".to_string(), evaluation);
                record
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn evaluate_one(&self, idx: usize, total: usize, record: &Map<String, Value>) -> Value {
        let sample = Value::Object(record.clone()).to_string();
        let prompt = evaluation_prompt(&self.eval_prompt, &[sample]);
        match unless_cancelled(self.cancel.as_ref(), self.judge.generate_json(&prompt)).await {
            None => cancelled_value(),
            Some(Ok(value)) => {
                tracing::info!("instruction {}/{total} evaluated", idx + 1);
                value
            }
            Some(Err(e)) => {
                tracing::warn!("evaluation failed for instruction {}/{total}: {e}", idx + 1);
                error_value(&e)
            }
        }
    }
}

/// Read the `instructions` array of a completions file.
pub async fn load_instructions(path: &Path) -> Result<Vec<Map<String, Value>>, BatchError> {
    #[derive(Deserialize)]
    struct CompletionsFile {
        #[serde(default)]
        instructions: Vec<Map<String, Value>>,
    }

    let text = read(path).await?;
    let file: CompletionsFile = serde_json::from_str(&text).map_err(|source| BatchError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.instructions)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// `{timestamp}_{prefix}_{categories...}.json`, with `/` and spaces in
/// category names flattened to `_`.
pub fn output_filename(prefix: &str, categories: &[String]) -> String {
    let mut parts = vec![chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()];
    if !prefix.is_empty() {
        parts.push(prefix.to_string());
    }
    parts.extend(categories.iter().map(|c| c.replace(['/', ' '], "_")));
    format!("{}.json", parts.join("_"))
}

/// Pretty-print `value` to `dir/filename`, creating `dir` if needed.
/// Atomic write: temp file + rename prevents partial reads.
pub async fn write_json<T: Serialize>(dir: &Path, filename: &str, value: &T) -> Result<PathBuf, BatchError> {
    let path = dir.join(filename);
    let write_err = |source| BatchError::Write {
        path: path.clone(),
        source,
    };

    tokio::fs::create_dir_all(dir).await.map_err(write_err)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(std::io::Error::other)
        .map_err(write_err)?;

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }

    Ok(path)
}

async fn read(path: &Path) -> Result<String, BatchError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| BatchError::Read {
            path: path.to_path_buf(),
            source,
        })
}
