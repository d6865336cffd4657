use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, render::feed_table, AnalysisApi, ApiToken, CheckOrchestrator, CheckOutcome,
    CheckReport, ClientSettings, ConsoleView, FeedRenderer, HttpAnalysisClient, RefreshOutcome,
};
use shared::domain::AnalysisKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "observa-console",
    version,
    about = "Drift and secret-leak console for the ObservaGuard analysis service"
)]
struct Cli {
    /// Settings file (TOML). Defaults to ./observa.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Analysis service base URL.
    #[arg(long, global = true)]
    api_base: Option<String>,
    /// Bearer token sent with every request.
    #[arg(long, global = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ping the service.
    Health,
    /// Show the recent event feed.
    Events,
    /// Score a Kubernetes manifest for drift.
    Drift {
        /// Manifest file, `-` for stdin. Uses the built-in demo manifest when omitted.
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Score a diff for leaked secrets.
    Secret {
        /// Diff file, `-` for stdin. Uses the built-in demo diff when omitted.
        #[arg(long)]
        diff: Option<PathBuf>,
    },
    /// Run both checks at once.
    All {
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        diff: Option<PathBuf>,
    },
}

impl Cli {
    fn settings(&self) -> Result<ClientSettings> {
        let mut settings = load_settings(self.config.as_deref())?;
        apply_flags(&mut settings, self.api_base.clone(), self.token.clone());
        settings.validate()?;
        Ok(settings)
    }
}

fn apply_flags(settings: &mut ClientSettings, api_base: Option<String>, token: Option<String>) {
    if let Some(api_base) = api_base {
        settings.api_base = api_base;
    }
    if let Some(token) = token {
        settings.api_token = ApiToken::new(token);
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        return std::io::read_to_string(std::io::stdin()).context("failed to read stdin");
    }
    fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))
}

fn print_view(view: &ConsoleView, kinds: &[AnalysisKind]) {
    for kind in kinds {
        match kind {
            AnalysisKind::Drift => println!("{}", view.drift),
            AnalysisKind::Secret => println!("{}", view.secret),
        }
    }
    if !kinds.is_empty() {
        println!();
    }
    println!("Recent Events ({})", view.feed_status);
    print!("{}", feed_table(&view.feed));
}

/// Fails the process when any submit failed, after the view has been printed.
fn ensure_submitted(reports: &[&CheckReport]) -> Result<()> {
    let failures: Vec<String> = reports
        .iter()
        .filter_map(|report| match &report.submit {
            CheckOutcome::Failed(reason) => Some(format!("{} check: {reason}", report.ticket.kind)),
            CheckOutcome::Scored(_) => None,
        })
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    bail!(failures.join("; "))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = cli.settings()?;
    info!(api_base = %settings.normalized_base(), "console: using analysis service");

    let client = Arc::new(HttpAnalysisClient::new(&settings)?);
    let orchestrator = CheckOrchestrator::new(client.clone());
    let renderer = FeedRenderer::local();

    match cli.command {
        Command::Health => {
            let health = client.health().await?;
            println!("{} ok={}", client.api_base(), health.ok);
            if !health.ok {
                bail!("analysis service reported unhealthy");
            }
        }
        Command::Events => {
            if let RefreshOutcome::Failed(reason) = orchestrator.refresh_events().await {
                bail!("failed to load events: {reason}");
            }
            print_view(&renderer.render_session(&orchestrator.snapshot().await), &[]);
        }
        Command::Drift { manifest } => {
            if let Some(path) = manifest {
                orchestrator.set_manifest_text(read_input(&path)?).await;
            }
            let report = orchestrator.run_drift_check().await;
            print_view(
                &renderer.render_session(&orchestrator.snapshot().await),
                &[AnalysisKind::Drift],
            );
            ensure_submitted(&[&report])?;
        }
        Command::Secret { diff } => {
            if let Some(path) = diff {
                orchestrator.set_diff_text(read_input(&path)?).await;
            }
            let report = orchestrator.run_secret_check().await;
            print_view(
                &renderer.render_session(&orchestrator.snapshot().await),
                &[AnalysisKind::Secret],
            );
            ensure_submitted(&[&report])?;
        }
        Command::All { manifest, diff } => {
            if let Some(path) = manifest {
                orchestrator.set_manifest_text(read_input(&path)?).await;
            }
            if let Some(path) = diff {
                orchestrator.set_diff_text(read_input(&path)?).await;
            }
            let (drift, secret) = futures::join!(
                orchestrator.run_drift_check(),
                orchestrator.run_secret_check()
            );
            print_view(
                &renderer.render_session(&orchestrator.snapshot().await),
                &AnalysisKind::ALL,
            );
            ensure_submitted(&[&drift, &secret])?;
        }
    }

    Ok(())
}
