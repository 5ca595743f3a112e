use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use nanieval::analyzer::{Analyzer, AnalyzerSettings};
use nanieval::batch::{self, CompletionRun, CompletionTarget, DatasetFilter, EvaluationRun};
use nanieval::config::Config;
use nanieval::dispatch::GenerationConfig;
use nanieval::dispatch::registry::{AdapterRequest, Registry};

const DEFAULT_DATASET: &str = "data/datasets/JBB_dataset.json";

#[derive(Parser)]
#[command(name = "nanieval", version, about = "Run prompt datasets through LLM providers and judge the completions")]
struct Cli {
    /// TOML config file (defaults to ./nanieval.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for result files; overrides the config file.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate completions for a dataset, optionally judging them afterwards.
    Completions(CompletionsArgs),
    /// Judge an existing completions file.
    Evaluate(EvaluateArgs),
}

#[derive(Args)]
struct CompletionsArgs {
    /// Provider(s) to generate with.
    #[arg(long = "provider", default_value = "nani")]
    providers: Vec<String>,

    /// Model for a single provider; use --provider-models with several.
    #[arg(long)]
    model: Option<String>,

    /// Per-provider models as provider:model.
    #[arg(long, num_args = 1..)]
    provider_models: Vec<String>,

    /// Per-provider endpoints as provider:url.
    #[arg(long, num_args = 1..)]
    provider_urls: Vec<String>,

    /// Per-provider credentials as provider:key.
    #[arg(long, num_args = 1..)]
    provider_api_keys: Vec<String>,

    #[arg(long, default_value = DEFAULT_DATASET)]
    dataset: PathBuf,

    /// JSON file holding one generation config object or an array of them.
    #[arg(long)]
    generation_config: Option<PathBuf>,

    #[arg(long = "category", num_args = 1..)]
    categories: Vec<String>,

    #[arg(long = "behavior", num_args = 1..)]
    behaviors: Vec<String>,

    #[arg(long = "source", num_args = 1..)]
    sources: Vec<String>,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Judge the completions with this provider once they are written.
    #[arg(long, requires = "eval_prompt")]
    judge: Option<String>,

    #[arg(long)]
    judge_model: Option<String>,

    /// Evaluation prompt file for --judge.
    #[arg(long, requires = "judge")]
    eval_prompt: Option<PathBuf>,

    #[arg(long, requires = "judge")]
    system_prompt: Option<String>,
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long)]
    judge: String,

    /// Completions file to evaluate.
    #[arg(long)]
    file: PathBuf,

    #[arg(long)]
    eval_prompt: PathBuf,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    system_prompt: Option<String>,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,
}

struct JudgeArgs<'a> {
    provider: &'a str,
    model: Option<String>,
    eval_prompt: &'a Path,
    system_prompt: Option<String>,
    concurrency: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref());
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    let registry = Registry::from_config(config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::warn!("interrupt received, cancelling remaining prompts (Ctrl-C again to abort)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        });
    }

    match cli.command {
        Command::Completions(args) => run_completions(&registry, args, &cancel).await,
        Command::Evaluate(args) => {
            let judge = JudgeArgs {
                provider: &args.judge,
                model: args.model,
                eval_prompt: &args.eval_prompt,
                system_prompt: args.system_prompt,
                concurrency: args.concurrency,
            };
            let path = run_evaluation(&registry, judge, &args.file, &cancel).await?;
            tracing::info!("evaluation completed: {}", path.display());
            Ok(())
        }
    }
}

/// Load `.env` next to the binary, then from the cargo project root for
/// development builds, then from the working directory.
fn load_dotenv() {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    if let Some(dir) = exe_dir {
        for candidate in [dir.join(".env"), dir.join("../../.env")] {
            if candidate.exists() {
                dotenvy::from_path(&candidate).ok();
                return;
            }
        }
    }
    dotenvy::dotenv().ok();
}

fn settings_for(registry: &Registry, system_prompt: Option<String>) -> AnalyzerSettings {
    let limits = &registry.config().rate_limit;
    AnalyzerSettings {
        system_prompt,
        rate: limits.rate,
        period: limits.period(),
        ..AnalyzerSettings::default()
    }
}

async fn run_completions(
    registry: &Registry,
    args: CompletionsArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let configs = match &args.generation_config {
        Some(path) => load_generation_configs(path).await?,
        None => Vec::new(),
    };

    if args.model.is_some() && args.providers.len() > 1 {
        anyhow::bail!("--model is ambiguous with several providers; use --provider-models provider:model");
    }
    let mut overrides = registry.provider_overrides(
        &args.provider_models,
        &args.provider_urls,
        &args.provider_api_keys,
    )?;

    let analyzers = args
        .providers
        .iter()
        .map(|provider| {
            let name = registry.descriptor(provider)?.name;
            let mut request = overrides.remove(name).unwrap_or_default();
            if request.model.is_none() {
                request.model = args.model.clone();
            }
            Analyzer::from_registry(registry, provider, request, settings_for(registry, None))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let filter = DatasetFilter {
        categories: args.categories.clone(),
        behaviors: args.behaviors,
        sources: args.sources,
    };
    let prompts = batch::load_dataset(&args.dataset, &filter).await?;
    tracing::info!("loaded {} prompts from {}", prompts.len(), args.dataset.display());

    let targets = analyzers
        .iter()
        .map(|a| CompletionTarget::new(a).with_configs(configs.clone()))
        .collect();
    let results = CompletionRun::new(targets)
        .concurrency(args.concurrency)
        .cancel_on(cancel.clone())
        .run(prompts)
        .await;

    let output_dir = &registry.config().output_dir;
    let filename = batch::output_filename("completions", &args.categories);
    let path = batch::write_json(output_dir, &filename, &results).await?;
    tracing::info!("completions generated: {}", path.display());

    for analyzer in &analyzers {
        let usage = analyzer.usage();
        tracing::info!(
            provider = %analyzer.provider(),
            requests = usage.requests,
            total_tokens = usage.total_tokens,
            "usage"
        );
    }

    if let Some(provider) = &args.judge {
        let eval_prompt = args
            .eval_prompt
            .as_deref()
            .context("--eval-prompt is required with --judge")?;
        let judge = JudgeArgs {
            provider,
            model: args.judge_model,
            eval_prompt,
            system_prompt: args.system_prompt,
            concurrency: args.concurrency,
        };
        let path = run_evaluation(registry, judge, &path, cancel).await?;
        tracing::info!("evaluation completed: {}", path.display());
    }

    Ok(())
}

async fn run_evaluation(
    registry: &Registry,
    judge: JudgeArgs<'_>,
    completions: &Path,
    cancel: &CancellationToken,
) -> anyhow::Result<PathBuf> {
    let eval_prompt = tokio::fs::read_to_string(judge.eval_prompt)
        .await
        .with_context(|| format!("failed to read eval prompt {}", judge.eval_prompt.display()))?;

    let request = AdapterRequest {
        model: judge.model,
        ..AdapterRequest::default()
    };
    let analyzer = Analyzer::from_registry(
        registry,
        judge.provider,
        request,
        settings_for(registry, judge.system_prompt),
    )?;

    let instructions = batch::load_instructions(completions).await?;
    let evaluated = EvaluationRun::new(&analyzer, eval_prompt)
        .concurrency(judge.concurrency)
        .cancel_on(cancel.clone())
        .run(instructions)
        .await;

    let prefix = format!("evaluations_{}", analyzer.provider());
    let filename = batch::output_filename(&prefix, &[]);
    let output = serde_json::json!({ "instructions": evaluated });
    let path = batch::write_json(&registry.config().output_dir, &filename, &output).await?;

    let usage = analyzer.usage();
    tracing::info!(
        provider = %analyzer.provider(),
        requests = usage.requests,
        total_tokens = usage.total_tokens,
        "usage"
    );
    Ok(path)
}

async fn load_generation_configs(path: &Path) -> anyhow::Result<Vec<GenerationConfig>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read generation config {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse generation config {}", path.display()))?;
    let configs = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<GenerationConfig>, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(configs)
}
