use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use treellm::config::{FeedbackPolicy, OutputFormat, Preset};
use treellm::io::read_input;
use treellm::metrics::forecast_all;
use treellm::models::ProgressStatus;
use treellm::pipeline::NoProgress;
use treellm::server::{serve, AppState, InMemorySessionStore};
use treellm::{
    resolve, ChatBackend, ConfigOverrides, MockBackend, OpenAiClient, OpenAiConfig, Orchestrator,
    PipelineRun, PresetName, ResolvedConfig, RunOptions,
};

#[derive(Parser)]
#[command(name = "treellm")]
#[command(author, version, about = "Multi-stage LLM review and revision pipeline for academic papers", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Paper to process (plain text or Markdown)
    input: Option<PathBuf>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen port
        #[arg(long, env = "PORT", default_value = "5000")]
        port: u16,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List the available presets
    Presets,

    /// Forecast the cost of processing a paper under each preset
    Estimate {
        /// Paper to estimate
        input: PathBuf,
    },
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Hyperparameter preset (fast, balanced, precision, research)
    #[arg(long, default_value = "balanced")]
    preset: String,

    /// Disable the stage cache
    #[arg(long)]
    no_cache: bool,

    /// Disable quality metrics
    #[arg(long)]
    no_metrics: bool,

    /// Do not write per-stage intermediate files
    #[arg(long)]
    no_intermediate: bool,

    /// Print progress events as stages start and finish
    #[arg(long)]
    stream: bool,

    /// Use the offline mock backend instead of the OpenAI API
    #[arg(long)]
    mock: bool,

    /// Config overrides as inline JSON or a path to a JSON file
    #[arg(long)]
    overrides: Option<String>,

    /// Model for every stage
    #[arg(long)]
    model: Option<String>,

    /// Global temperature
    #[arg(long)]
    temperature: Option<f64>,

    /// Directory for cache, intermediate files, results and logs
    #[arg(long, default_value = "sample")]
    result_dir: PathBuf,

    /// Final paper format (md, html, latex)
    #[arg(long, default_value = "md")]
    format: OutputFormat,

    /// Directory with prompt template overrides
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Treat unparseable global-check feedback as a single issue instead of failing
    #[arg(long)]
    lenient_feedback: bool,

    /// Skip the summary file
    #[arg(long)]
    no_summary: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            result_dir: self.result_dir.clone(),
            enable_caching: !self.no_cache,
            enable_metrics: !self.no_metrics,
            save_intermediate: !self.no_intermediate,
            output_format: self.format,
            generate_summary: !self.no_summary,
            prompt_dir: self.prompt_dir.clone(),
            feedback_policy: if self.lenient_feedback {
                FeedbackPolicy::Lenient
            } else {
                FeedbackPolicy::Strict
            },
            ..RunOptions::default()
        }
    }

    fn config(&self) -> Result<ResolvedConfig> {
        let mut overrides = match &self.overrides {
            Some(value) => load_overrides(value)?,
            None => ConfigOverrides::default(),
        };
        if let Some(model) = &self.model {
            overrides.model = Some(model.clone());
        }
        if let Some(temperature) = self.temperature {
            overrides.temperature = Some(temperature);
        }
        resolve(&self.preset, Some(&overrides)).context("Invalid configuration")
    }
}

fn load_overrides(value: &str) -> Result<ConfigOverrides> {
    let json = if value.trim_start().starts_with('{') {
        value.to_string()
    } else {
        std::fs::read_to_string(value)
            .with_context(|| format!("Failed to read overrides file {value}"))?
    };
    ConfigOverrides::from_json(&json).context("Failed to parse overrides")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { port, run }) => {
            setup_logging(run.verbose, Some(&run.result_dir))?;
            // Fail fast on a bad preset or overrides before binding
            run.config()?;
            let options = run.options();
            if run.mock {
                serve_api(port, MockBackend::new(), options).await
            } else {
                let client = OpenAiClient::new(OpenAiConfig::from_env()?)?;
                serve_api(port, client, options).await
            }
        }
        Some(Commands::Presets) => {
            list_presets();
            Ok(())
        }
        Some(Commands::Estimate { input }) => {
            setup_logging(false, None)?;
            estimate(&input)
        }
        None => {
            let Some(input) = cli.input else {
                bail!("No input file given (see --help)");
            };
            let args = cli.run;
            setup_logging(args.verbose, Some(&args.result_dir))?;
            process_paper(&input, &args).await
        }
    }
}

/// Console output plus, when a result directory is given, `treellm.log` and
/// an ERROR-only `errors.log` inside it
fn setup_logging(verbose: bool, result_dir: Option<&Path>) -> Result<()> {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let console_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let console = fmt::layer().with_target(false).with_filter(console_filter);

    let (file_layer, error_layer) = match result_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create result directory {dir:?}"))?;
            let log = File::options()
                .create(true)
                .append(true)
                .open(dir.join("treellm.log"))
                .context("Failed to open treellm.log")?;
            let errors = File::options()
                .create(true)
                .append(true)
                .open(dir.join("errors.log"))
                .context("Failed to open errors.log")?;
            (
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(log))
                        .with_filter(level),
                ),
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(errors))
                        .with_filter(LevelFilter::ERROR),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(error_layer)
        .try_init()
        .ok();
    Ok(())
}

async fn process_paper(input: &Path, args: &RunArgs) -> Result<()> {
    let config = args.config()?;
    let options = args.options();

    if args.mock {
        info!("Using the offline mock backend");
        run_pipeline(MockBackend::new(), config, options, input, args.stream).await
    } else {
        let api_config = OpenAiConfig::from_env()?.with_timeout(config.request_timeout);
        let client = OpenAiClient::new(api_config)?;
        run_pipeline(client, config, options, input, args.stream).await
    }
}

async fn run_pipeline<B: ChatBackend + 'static>(
    backend: B,
    config: ResolvedConfig,
    options: RunOptions,
    input: &Path,
    stream: bool,
) -> Result<()> {
    let result_dir = options.result_dir.clone();
    let orchestrator = Orchestrator::new(backend, config, options)
        .context("Failed to set up the pipeline")?;

    let run = if stream {
        let (mut events, handle) = Arc::new(orchestrator).run_stream_file(input.to_path_buf());
        while let Some(event) = events.recv().await {
            let status = match event.status {
                ProgressStatus::Started => "started",
                ProgressStatus::Completed => "completed",
                ProgressStatus::Cached => "cached",
                ProgressStatus::Failed => "FAILED",
            };
            println!("[{}/7] {} {}", event.step, event.name, status);
        }
        handle.await.context("Pipeline task panicked")??
    } else {
        orchestrator.run_file(input, &mut NoProgress).await?
    };

    print_summary(&run, &result_dir);
    Ok(())
}

fn print_summary(run: &PipelineRun, result_dir: &Path) {
    let perf = &run.performance_metrics;
    println!();
    println!("Pipeline Complete");
    println!("=================");
    println!("Run id: {}", run.run_id);
    println!("Preset: {}", run.preset_name);
    println!("Duration: {:.1}s", perf.total_duration_ms as f64 / 1000.0);
    println!(
        "API calls: {} ({} failed attempts), cache hits: {}",
        perf.api_calls, perf.failed_attempts, perf.cache_hits
    );
    println!(
        "Estimated tokens: {}, estimated cost: ${:.4}",
        perf.estimated_tokens, perf.estimated_cost
    );
    if let Some(quality) = &run.quality_metrics {
        println!("Quality score (heuristic): {:.3}", quality.overall_score);
    }
    println!("Results in {}", result_dir.display());
}

fn list_presets() {
    println!("Presets");
    println!("=======");
    for name in PresetName::ALL {
        let preset = Preset::get(name);
        println!(
            "{:<10} {:<22} model={} temperature={} top_p={} max_tokens={} workers={}",
            name.as_str(),
            preset.label,
            preset.params.model,
            preset.params.temperature,
            preset.params.top_p,
            preset.params.max_tokens,
            preset.max_workers
        );
        println!("{:<10} {}", "", preset.description);
    }
}

fn estimate(input: &Path) -> Result<()> {
    let document = read_input(input).context("Failed to read input paper")?;

    println!("Cost Estimate (approximate)");
    println!("===========================");
    for forecast in forecast_all(&document.text) {
        println!(
            "{:<10} {:<14} ~{} input tokens  ~${:.4}",
            forecast.preset.as_str(),
            forecast.model,
            forecast.input_tokens,
            forecast.estimated_cost
        );
    }
    Ok(())
}

async fn serve_api<B: ChatBackend + 'static>(
    port: u16,
    backend: B,
    options: RunOptions,
) -> Result<()> {
    let state = AppState {
        sessions: Arc::new(InMemorySessionStore::new()),
        backend: Arc::new(backend),
        options,
    };
    serve(port, state).await.context("Server error")
}
