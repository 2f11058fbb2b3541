mod playwright;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use qaforge_core::config::{AppConfig, ModelConfig};
use qaforge_core::event::EventBus;
use qaforge_core::traits::{AiResponder, ArtifactSink, CodeValidator};
use qaforge_core::types::WorkflowEvent;

use qaforge_llm::LlmResponder;
use qaforge_mcp::McpConnector;
use qaforge_workflow::report::RESULTS_FILE;
use qaforge_workflow::{
    list_fixtures, CapturedImage, ExecutionResult, FsArtifactSink, Node, NodeServices,
    PlaywrightValidator, SelfHealer, WorkflowEngine,
};

use playwright::PlaywrightRunner;

#[derive(Parser)]
#[command(
    name = "qaforge",
    version,
    about = "Turn plain-language test steps into Playwright page objects and specs"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "qaforge.toml")]
    config: PathBuf,

    /// LLM provider (gemini, openai, groq, ...). Overrides the config file.
    #[arg(long, env = "AI_PROVIDER")]
    provider: Option<String>,

    /// Model ID. Overrides the config file.
    #[arg(long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow for one fixture
    Run {
        /// Fixture file, or its name inside the fixtures directory
        fixture: String,
        /// Run the generated spec with Playwright afterwards, healing the page object on failure
        #[arg(long)]
        execute: bool,
    },
    /// List available fixtures
    List,
    /// Summarize a Playwright JSON results file
    Report {
        /// Results file (defaults to the server directory's test-results.json)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("qaforge=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run { fixture, execute } => run_workflow(&config, &fixture, execute).await,
        Commands::List => {
            let fixtures = list_fixtures(&config.workflow.fixtures_dir)?;
            if fixtures.is_empty() {
                println!(
                    "No fixtures found in {}",
                    config.workflow.fixtures_dir.display()
                );
            }
            for path in fixtures {
                if let Some(name) = path.file_name() {
                    println!("{}", name.to_string_lossy());
                }
            }
            Ok(())
        }
        Commands::Report { path } => {
            let path = path.unwrap_or_else(|| config.workflow.server_dir.join(RESULTS_FILE));
            let summary = qaforge_workflow::parse_test_results(&path)?;
            playwright::print_summary(&summary);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config");
        AppConfig::load(&cli.config)?
    } else {
        warn!(
            path = %cli.config.display(),
            "No config file found, using environment"
        );
        AppConfig::from_env()
    };

    if let Some(provider) = &cli.provider {
        if *provider != config.model.provider {
            config.model = ModelConfig::from_env(provider, cli.model.as_deref());
        }
    }
    if let Some(model) = &cli.model {
        config.model.model_id = model.clone();
    }
    Ok(config)
}

fn resolve_fixture(config: &AppConfig, fixture: &str) -> PathBuf {
    let direct = PathBuf::from(fixture);
    if direct.exists() {
        return direct;
    }
    let mut path = config.workflow.fixtures_dir.join(fixture);
    if path.extension().is_none() {
        path.set_extension("md");
    }
    path
}

async fn run_workflow(config: &AppConfig, fixture: &str, execute: bool) -> anyhow::Result<()> {
    let fixture_path = resolve_fixture(config, fixture);
    let event_bus = Arc::new(EventBus::default());

    let responder: Arc<dyn AiResponder> = Arc::new(LlmResponder::from_config(&config.model));
    let validator: Arc<dyn CodeValidator> = Arc::new(PlaywrightValidator::default());
    let sink: Arc<dyn ArtifactSink> = Arc::new(FsArtifactSink::new());
    let mut services = NodeServices::new(responder.clone(), validator.clone(), sink.clone())
        .with_event_bus(event_bus.clone());

    if config.workflow.optimize {
        let model = config
            .optimizer_model
            .as_ref()
            .unwrap_or(&config.model);
        info!(provider = %model.provider, model = %model.model_id, "Optimizer enabled");
        services = services.with_optimizer(Arc::new(LlmResponder::from_config(model)));
    }

    let engine = WorkflowEngine::new(Arc::new(McpConnector::new(config.server.clone())), services)
        .add_node(Node::fixture_loader(&fixture_path))
        .add_node(Node::step_runner(
            config.workflow.system_prompt.clone(),
            Duration::from_millis(config.workflow.step_delay_ms),
        ))
        .add_node(Node::pom_generator(&config.workflow.pages_dir))
        .add_node(Node::spec_generator(&config.workflow.specs_dir));

    let cancel = engine.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n[cancelling...]");
            cancel.cancel();
        }
    });

    let mut rx = event_bus.subscribe();
    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let done = matches!(event, WorkflowEvent::RunFinished { .. });
            print_event(event);
            if done {
                break;
            }
        }
    });

    info!(
        fixture = %fixture_path.display(),
        provider = %config.model.provider,
        model = %config.model.model_id,
        "Starting workflow"
    );
    let result = engine.run().await;
    print_handle.await.ok();

    save_captures(&config.workflow.captures_dir, &result).await;
    print_result(&result);

    if !result.succeeded {
        anyhow::bail!(
            "workflow failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    if !execute {
        return Ok(());
    }

    let runner = PlaywrightRunner::new(&config.workflow.server_dir);
    let ctx = &result.context;
    let (Some(spec), Some(pom), Some(class_name)) =
        (&ctx.spec_path, &ctx.pom_path, &ctx.pom_class_name)
    else {
        let run = runner.run_all().await?;
        playwright::print_run(&run);
        if !run.passed {
            anyhow::bail!("Playwright tests failed");
        }
        return Ok(());
    };

    let outcome = SelfHealer::new(responder, validator, sink)
        .with_max_runs(config.workflow.test_runs)
        .run(&runner, spec, pom, class_name)
        .await?;
    playwright::print_run(&outcome.last);
    if outcome.heals > 0 {
        println!("  Page object healed {} time(s)", outcome.heals);
    }
    if !outcome.passed {
        anyhow::bail!("generated test failed after {} run(s)", outcome.runs);
    }
    Ok(())
}

fn print_event(event: WorkflowEvent) {
    match event {
        WorkflowEvent::NodeStarted { node } => eprintln!("\n== {} ==", node),
        WorkflowEvent::StepStarted {
            index,
            total,
            instruction,
        } => eprintln!("[step {}/{}] {}", index + 1, total, instruction),
        WorkflowEvent::ModelNote { text } => eprintln!("  [model] {}", text),
        WorkflowEvent::ToolStart { name, args } => eprintln!("  [tool: {}] {}", name, args),
        WorkflowEvent::ToolEnd { name, preview } => eprintln!("  [{}: ok] {}", name, preview),
        WorkflowEvent::ActionRecorded { action } => eprintln!("  [recorded] {}", action),
        WorkflowEvent::ArtifactWritten { kind, path, valid } => {
            let status = if valid { "valid" } else { "UNVERIFIED" };
            eprintln!("[{} {}] {}", kind, status, path);
        }
        WorkflowEvent::NodeFinished {
            node,
            failed: true,
            elapsed_ms,
        } => eprintln!("[{} failed after {}ms]", node, elapsed_ms),
        WorkflowEvent::RunFinished {
            error: Some(error), ..
        } => eprintln!("\n[error: {}]", error),
        WorkflowEvent::RunStarted { .. }
        | WorkflowEvent::NodeFinished { .. }
        | WorkflowEvent::RunFinished { .. } => {}
    }
}

fn print_result(result: &ExecutionResult) {
    let ctx = &result.context;
    if result.succeeded {
        println!(
            "\nWorkflow '{}' completed in {}ms ({} recorded actions)",
            ctx.test_name,
            result.total_elapsed_ms,
            ctx.recorded_history.len()
        );
        if let Some(path) = &ctx.pom_path {
            println!("  Page object: {}", path.display());
        }
        if let Some(path) = &ctx.spec_path {
            println!("  Spec:        {}", path.display());
        }
    } else {
        println!("\nWorkflow '{}' failed", ctx.test_name);
    }
}

async fn save_captures(dir: &Path, result: &ExecutionResult) {
    let captures = &result.context.captures;
    if captures.is_empty() {
        return;
    }
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        error!(dir = %dir.display(), error = %e, "Cannot create captures directory");
        return;
    }
    for (i, capture) in captures.iter().enumerate() {
        let path = dir.join(capture_file_name(&result.context.test_name, i, capture));
        match tokio::fs::write(&path, &capture.bytes).await {
            Ok(()) => info!(path = %path.display(), instruction = %capture.instruction, "Saved capture"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to save capture"),
        }
    }
}

fn capture_file_name(test_name: &str, index: usize, capture: &CapturedImage) -> String {
    format!("{}-{:02}-{}.png", test_name, index + 1, capture.tool)
}
