//! Kiln CLI - prompt to generated site
//!
//! Usage:
//!   kiln init                   Write default configuration to .kiln/config.toml
//!   kiln build <prompt>         Run a build and write the generated files
//!   kiln pricing                Show the credit cost of each agent

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use kiln_agent::{AnthropicClient, GenerativeClient, ModelRouter, OfflineClient};
use kiln_core::{AgentKind, BuildArtifact, BuildRequest, Context, KilnConfig};
use kiln_ledger::{InMemoryLedger, Ledger, TransactionJournal};
use kiln_metrics::MetricsStorage;
use kiln_orchestrator::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about = "Multi-agent site generation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root holding .kiln/
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    Init,

    /// Run a build from a prompt
    Build {
        /// What to build
        prompt: String,

        /// Starting credit balance of the local account
        #[arg(long, default_value = "100")]
        credits: u64,

        /// Account to charge
        #[arg(long, default_value = "local")]
        account: String,

        /// Model hint for planning and code generation (opus, sonnet, haiku or a full name)
        #[arg(long)]
        model: Option<String>,

        /// Build from fallbacks only, without calling the generative service
        #[arg(long)]
        offline: bool,

        /// Directory to write the generated files to
        #[arg(short, long, default_value = "kiln-out")]
        out: PathBuf,

        /// Uploaded image URL to use in the site (repeatable)
        #[arg(long = "image", value_name = "URL")]
        images: Vec<String>,

        /// Print the artifact as JSON instead of streaming events
        #[arg(long)]
        json: bool,
    },

    /// Show agent prices
    Pricing,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_writer(std::io::stderr);
    if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(builder.with_env_filter(EnvFilter::from_default_env()).finish())?;
    } else {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?;
    }

    match cli.command {
        Commands::Init => cmd_init(&cli.root),
        Commands::Build {
            prompt,
            credits,
            account,
            model,
            offline,
            out,
            images,
            json,
        } => {
            let request = BuildRequest::new(account, prompt).with_uploaded_images(images);
            let request = match model {
                Some(model) => request.with_model(model),
                None => request,
            };
            cmd_build(&cli.root, request, credits, offline, &out, json).await
        }
        Commands::Pricing => cmd_pricing(&cli.root),
    }
}

fn cmd_init(root: &Path) -> Result<()> {
    KilnConfig::write_default(root).context("Failed to write configuration")?;
    println!("Initialized Kiln in {:?}", root);
    println!("Created:");
    println!("  .kiln/config.toml");
    Ok(())
}

fn cmd_pricing(root: &Path) -> Result<()> {
    let config = KilnConfig::load_or_default(root)?;
    println!("{:<10} {:>7}", "agent", "credits");
    for agent in AgentKind::ALL {
        println!("{:<10} {:>7}", agent, config.pricing.price(agent));
    }
    println!("{:<10} {:>7}", "ceiling", config.pricing.ceiling());
    Ok(())
}

fn client_for(config: &KilnConfig, offline: bool) -> Result<Arc<dyn GenerativeClient>> {
    if offline {
        info!("Offline mode: every agent uses its fallback");
        return Ok(Arc::new(OfflineClient));
    }

    let anthropic = AnthropicClient::from_env(&config.models.api_key_env, &config.models.code)
        .context("No API key found; set it or pass --offline")?;
    let router = ModelRouter::new(Arc::new(anthropic));
    // The messages API cannot produce images; skip the round trip
    let router = match config.models.image {
        Some(_) => router,
        None => router.route(AgentKind::Image, Arc::new(OfflineClient)),
    };
    Ok(Arc::new(router))
}

async fn cmd_build(
    root: &Path,
    request: BuildRequest,
    credits: u64,
    offline: bool,
    out: &Path,
    json: bool,
) -> Result<()> {
    let config = KilnConfig::load_or_default(root)?;
    let client = client_for(&config, offline)?;

    let kiln_dir = root.join(".kiln");
    let ledger = Arc::new(
        InMemoryLedger::with_balances([(request.account.clone(), credits)])
            .with_journal(TransactionJournal::new(kiln_dir.join("transactions.jsonl"))),
    );
    let orchestrator = Orchestrator::builder(ledger.clone(), client)
        .with_config(config)
        .build();

    let (ctx, cancel) = Context::with_cancel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling build");
            cancel.cancel();
        }
    });

    let mut events = orchestrator.bus().subscribe(request.id);
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !json {
                println!("{}", event);
            }
        }
    });

    let account = request.account.clone();
    let build_id = request.id;
    let artifact = orchestrator.build(&ctx, request).await?;
    let _ = printer.await;

    write_files(&artifact, out).await?;

    if let Some(metrics) = orchestrator.metrics().build_metrics(build_id).await {
        let storage = MetricsStorage::append_file(kiln_dir.join("metrics.jsonl"));
        if let Err(e) = storage.store(&metrics).await {
            warn!("Failed to store metrics: {}", e);
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&artifact)?);
    } else {
        print_summary(&artifact, out, ledger.balance(&account).await);
    }

    artifact.into_result()?;
    Ok(())
}

async fn write_files(artifact: &BuildArtifact, out: &Path) -> Result<()> {
    for (path, content) in artifact.files() {
        let target = out.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content)
            .await
            .with_context(|| format!("Failed to write {:?}", target))?;
    }
    Ok(())
}

fn print_summary(artifact: &BuildArtifact, out: &Path, balance: u64) {
    println!();
    println!("Build {}: {}", artifact.build_id().short(), artifact.status());
    if let Some(plan) = artifact.plan() {
        println!("  Project:  {} ({})", plan.project_name, plan.project_type);
    }
    for run in artifact.agent_runs() {
        let note = if run.skipped {
            " (skipped)"
        } else if run.used_fallback {
            " (fallback)"
        } else {
            ""
        };
        println!("  {:<9} {}{}", run.kind, run.status, note);
    }
    if let Some(report) = artifact.test_report() {
        println!(
            "  Score:    {}/100 ({} issue(s))",
            report.score,
            report.issues.len()
        );
    }
    println!(
        "  Credits:  {} used, {} refunded, {} left",
        artifact.credits_used(),
        artifact.credits_refunded(),
        balance
    );
    println!("  Files:    {} written to {:?}", artifact.files().len(), out);
}
