use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use tracing_subscriber::EnvFilter;

use pagepilot_lib::action::Action;
use pagepilot_lib::agent::{Agent, AgentUpdate};
use pagepilot_lib::api::GeminiClient;
use pagepilot_lib::cdp::TargetId;
use pagepilot_lib::chrome::ChromeClient;
use pagepilot_lib::config::Config;
use pagepilot_lib::executor::ActionExecutor;
use pagepilot_lib::scheduler::Scheduler;
use pagepilot_lib::session::SessionManager;
use pagepilot_lib::storage::RunStore;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "pagepilot")]
#[command(about = "Drive a browser page with a computer-use model")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./pagepilot.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent loop on a page until the goal is reached
    Run {
        goal: String,
        /// Target id of an open page (see `targets`)
        #[arg(long, conflicts_with = "url")]
        target: Option<String>,
        /// Open a new page at this URL and run there
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// List open pages
    Targets,
    /// Execute a single action, e.g. '{"type":"CLICK","x":500,"y":200}'
    Act {
        target: String,
        action: String,
        /// Write the screenshot of a CAPTURE_SCREENSHOT action here
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// List recorded runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            goal,
            target,
            url,
            max_steps,
        } => run(config, &goal, target, url, max_steps).await,
        Command::Targets => targets(&config).await,
        Command::Act { target, action, save } => act(&config, &target, &action, save).await,
        Command::Runs { limit } => runs(&config, limit),
    }
}

async fn pick_target(chrome: &ChromeClient, target: Option<String>, url: Option<String>) -> Result<TargetId> {
    if let Some(id) = target {
        return Ok(TargetId::new(id));
    }
    if let Some(url) = url {
        return Ok(chrome.new_page(&url).await?);
    }
    match chrome.list_targets().await?.into_iter().next() {
        Some(first) => Ok(first.id),
        None => Ok(chrome.new_page("about:blank").await?),
    }
}

fn print_update(update: &AgentUpdate) {
    match update {
        AgentUpdate::Started { target, goal } => println!("[{target}] {goal}"),
        AgentUpdate::Step { step, max_steps } => println!("-- step {step}/{max_steps}"),
        AgentUpdate::Thinking { message } => println!("   {message}"),
        AgentUpdate::Action { function, action } => println!("   > {function}: {}", action.kind()),
        AgentUpdate::Finished { outcome, summary } => println!("== {}: {summary}", outcome.as_str()),
        AgentUpdate::Error { message } => println!("!! {message}"),
    }
}

async fn run(
    mut config: Config,
    goal: &str,
    target: Option<String>,
    url: Option<String>,
    max_steps: Option<u32>,
) -> Result<()> {
    if let Some(n) = max_steps {
        config.max_steps = n;
    }

    let api_key = config
        .api_key
        .clone()
        .ok_or_else(|| anyhow!("No API key set. Add GEMINI_API_KEY to .env or the config file"))?;
    let engine = GeminiClient::new(api_key, config.model.clone(), config.generation())?;

    let chrome = Arc::new(ChromeClient::connect(config.chrome_url.as_deref()).await?);
    let target = pick_target(&chrome, target, url).await?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            print_update(&update);
        }
    });

    let agent = Agent::new(
        Arc::new(engine),
        Arc::new(SessionManager::new(chrome)),
        ActionExecutor::new(config.screenshot_settle()),
        config.agent(),
    )
    .with_updates(tx);

    let mut scheduler = Scheduler::new(Arc::new(agent));
    match RunStore::open(&config.db_path()) {
        Ok(store) => scheduler = scheduler.with_store(Arc::new(store)),
        Err(e) => tracing::warn!(error = %e, "run history disabled"),
    }

    let mut handle = scheduler.start(&target, goal).await?;
    let result = tokio::select! {
        joined = &mut handle => joined,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, cancelling");
            scheduler.cancel(&target).await;
            handle.await
        }
    };

    // the agent (and its sender) lives in the scheduler
    drop(scheduler);
    let _ = printer.await;

    let report = result.context("agent task panicked")??;
    println!("\nOutcome: {}", report.outcome.as_str());
    println!("Steps: {}", report.steps);
    println!("Summary: {}", report.summary);
    Ok(())
}

async fn targets(config: &Config) -> Result<()> {
    let chrome = ChromeClient::connect(config.chrome_url.as_deref()).await?;
    let targets = chrome.list_targets().await?;
    if targets.is_empty() {
        println!("No pages open");
    }
    for t in targets {
        println!("{}  {}  {}", t.id, t.url, t.title);
    }
    Ok(())
}

async fn act(config: &Config, target: &str, action: &str, save: Option<PathBuf>) -> Result<()> {
    let action: Action = serde_json::from_str(action).context("invalid action JSON")?;

    let chrome = Arc::new(ChromeClient::connect(config.chrome_url.as_deref()).await?);
    let sessions = SessionManager::new(chrome);
    let session = sessions.attach(&TargetId::new(target)).await?;

    let executor = ActionExecutor::new(config.screenshot_settle());
    let mut result = executor.execute(&session, &action).await;
    sessions.release(&session).await;

    if let (Some(path), Some(shot)) = (&save, &result.screenshot) {
        let png = BASE64.decode(&shot.base64).context("screenshot is not valid base64")?;
        std::fs::write(path, png).with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved screenshot to {}", path.display());
    }
    // keep the printed result readable
    if let Some(shot) = result.screenshot.as_mut() {
        shot.base64 = format!("<{} base64 chars>", shot.base64.len());
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        return Err(anyhow!(result.error.unwrap_or_else(|| "action failed".to_string())));
    }
    Ok(())
}

fn runs(config: &Config, limit: usize) -> Result<()> {
    let store = RunStore::open(&config.db_path())?;
    let runs = store.list(limit, 0)?;
    if runs.is_empty() {
        println!("No runs recorded");
    }
    for run in runs {
        let started = chrono::DateTime::from_timestamp(run.started_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "{}  {}  {:<10}  {:>3} steps  {}",
            run.id, started, run.outcome, run.steps, run.goal
        );
    }
    Ok(())
}
