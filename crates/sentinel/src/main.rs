//! Sentinel CLI - budgeted root-cause investigation for cluster alerts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel::alert::AlertIntake;
use sentinel::report::{Finding, ReportComposer};
use sentinel::server::{run_server, ServerState};
use sentinel::{AlertKind, ClusterEvidence, Investigator, SentinelConfig, Severity};

/// Sentinel - investigate cluster alerts within a fixed evidence budget.
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(about = "Budgeted root-cause investigation for Kubernetes alerts")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a JSON config file
    #[arg(long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service (Alertmanager webhook + API)
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:8080")]
        addr: String,
    },

    /// Investigate a single alert and print the report
    Investigate {
        /// Alert kind (crash_loop, resource_high, service_unreachable, sync_failure)
        #[arg(long, default_value = "unknown")]
        kind: String,

        #[arg(long, short)]
        namespace: Option<String>,

        #[arg(long)]
        workload: Option<String>,

        #[arg(long)]
        pod: Option<String>,

        #[arg(long)]
        node: Option<String>,

        /// Free-text description
        #[arg(long)]
        description: Option<String>,

        /// Also deliver the Finding to configured chat channels
        #[arg(long)]
        notify: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the playbook library
    Playbooks {
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = SentinelConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { addr } => run_serve(config, &addr).await,
        Commands::Investigate {
            kind,
            namespace,
            workload,
            pod,
            node,
            description,
            notify,
            format,
        } => {
            let intake = AlertIntake {
                kind: kind.parse().unwrap_or(AlertKind::Unknown),
                namespace,
                workload,
                pod,
                node,
                description,
            };
            run_investigate(config, intake, notify, format).await
        }
        Commands::Playbooks { format } => run_playbooks(&config, format),
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("sentinel=debug,notify=debug,info")
        } else {
            EnvFilter::new("sentinel=info,notify=info,warn")
        }
    });

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

fn cluster_evidence(config: &SentinelConfig) -> Result<ClusterEvidence> {
    ClusterEvidence::from_config(config.metrics_config(), config.logs_config())
        .context("Failed to create evidence backends")
}

async fn run_serve(config: SentinelConfig, addr: &str) -> Result<()> {
    let evidence = Arc::new(cluster_evidence(&config)?);
    let investigator = Investigator::from_config(evidence.clone(), &config);
    let state = Arc::new(ServerState::new(
        investigator,
        evidence,
        ReportComposer::new(config.max_evidence_lines),
        Arc::new(notify::Notifier::from_env()),
    ));

    info!(
        metrics = %config.metrics_url,
        logs = %config.logs_url,
        budget = config.budget,
        "Starting sentinel server"
    );
    run_server(state, addr).await
}

async fn run_investigate(
    config: SentinelConfig,
    intake: AlertIntake,
    deliver: bool,
    format: OutputFormat,
) -> Result<()> {
    let evidence = Arc::new(cluster_evidence(&config)?);
    let investigator = Investigator::from_config(evidence, &config);
    let composer = ReportComposer::new(config.max_evidence_lines);
    let alert = intake.into_alert();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let finding = investigator
        .investigate(&alert, &cancel)
        .await
        .context("Investigation did not complete")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&finding)?);
        }
        OutputFormat::Text => print_report(&composer, &finding),
    }

    if deliver {
        let notifier = notify::Notifier::from_env();
        if !notifier.has_channels() {
            warn!("--notify given but no notification channel is configured");
        }
        for (channel, result) in notifier
            .notify_and_wait(composer.notify_event(&finding))
            .await
        {
            match result {
                Ok(()) => info!(channel, "Finding delivered"),
                Err(e) => warn!(channel, error = %e, "Finding delivery failed"),
            }
        }
    }

    Ok(())
}

fn print_report(composer: &ReportComposer, finding: &Finding) {
    let report = composer.render(finding);
    let mut lines = report.lines();
    if let Some(headline) = lines.next() {
        let headline = match finding.severity {
            Severity::Critical => headline.red().bold(),
            Severity::Warning => headline.yellow().bold(),
            Severity::Info => headline.cyan().bold(),
            Severity::Resolved => headline.green().bold(),
        };
        println!("{headline}");
    }
    for line in lines {
        if line.starts_with("Next:") {
            println!("{}", line.bold());
        } else if line.starts_with("Evidence calls:") {
            println!("{}", line.dimmed());
        } else {
            println!("{line}");
        }
    }
}

fn run_playbooks(config: &SentinelConfig, format: OutputFormat) -> Result<()> {
    let library = sentinel::PlaybookLibrary::standard();
    let views = library.describe(&config.log_labels);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for view in views {
        let kind = view.kind.map_or_else(|| "fallback".to_string(), |k| k.to_string());
        println!("{} {}", view.name.cyan().bold(), format!("({kind})").dimmed());
        println!("  {}", view.description);
        for (i, step) in view.steps.iter().enumerate() {
            println!("  {}. {} [{}]", i + 1, step.name.bold(), step.source);
            println!("     {}", step.query);
            if let Some(alternate) = &step.alternate {
                println!("     {} {alternate}", "or".dimmed());
            }
        }
        println!();
    }
    Ok(())
}
