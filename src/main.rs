//! clusterplug - add-on management for local multi-node Kubernetes clusters

use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clusterplug::catalog;
use clusterplug::config::{self, AppConfig};
use clusterplug::graph::{DependencyGraph, DependencyValidator};
use clusterplug::installer::DriverFactory;
use clusterplug::kube::KubeClient;
use clusterplug::orchestrator::{BatchOptions, BatchReport, Orchestrator};
use clusterplug::plugin::PluginRegistry;
use clusterplug::readiness::{Cancellation, KubeWorkloadProbe, ReadinessPolicy, SignalGuard};
use clusterplug::selector::{GitOpsControllerProbe, InstallerSelector};
use clusterplug::tracker::InstallerTracker;

#[derive(Parser)]
#[command(name = "clusterplug")]
#[command(author, version, about = "Dependency-ordered add-on management for local Kubernetes clusters")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available plugins and their recorded installer
    List,

    /// Print the order plugins would be processed in
    Order {
        #[arg(value_enum)]
        direction: Direction,

        /// Target plugins
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Show a plugin's dependencies, dependents and recorded installer
    Info { name: String },

    /// Install plugins and everything they depend on
    Install {
        #[arg(required = true)]
        names: Vec<String>,

        /// Wait for workloads to become available after each install
        #[arg(short, long)]
        wait: bool,

        /// Continue with unaffected plugins after a failure
        #[arg(short, long)]
        keep_going: bool,
    },

    /// Uninstall plugins and everything that depends on them
    Uninstall {
        #[arg(required = true)]
        names: Vec<String>,

        /// Continue with unaffected plugins after a failure
        #[arg(short, long)]
        keep_going: bool,
    },

    /// Show current configuration
    Config {
        /// Write a default configuration file to .clusterplug/config.yaml
        #[arg(long)]
        init: bool,

        /// Overwrite an existing configuration file
        #[arg(short, long, requires = "init")]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Direction {
    Install,
    Uninstall,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "clusterplug=debug"
    } else {
        "clusterplug=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::List => cmd_list().await,
        Commands::Order { direction, names } => cmd_order(direction, &names),
        Commands::Info { name } => cmd_info(&name).await,
        Commands::Install {
            names,
            wait,
            keep_going,
        } => cmd_install(&names, BatchOptions { wait, keep_going }).await,
        Commands::Uninstall { names, keep_going } => {
            cmd_uninstall(
                &names,
                BatchOptions {
                    wait: false,
                    keep_going,
                },
            )
            .await
        }
        Commands::Config { init, force } => cmd_config(init, force),
    }
}

/// Everything one session needs to talk to the cluster
struct Session {
    registry: PluginRegistry,
    tracker: InstallerTracker,
    orchestrator: Orchestrator,
}

impl Session {
    fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let registry = catalog::configured_registry(&config.plugins)?;
        let client = KubeClient::new(&config.kube)?;
        let tracker = InstallerTracker::from_config(client.clone(), &config.tracker);

        let selector = InstallerSelector::new(
            tracker.clone(),
            Arc::new(GitOpsControllerProbe::new(client.clone(), &config.gitops)),
            Arc::new(DriverFactory::new(config)),
        )
        .with_probe_timeout(config.gitops.probe_timeout());

        let orchestrator = Orchestrator::new(selector)
            .with_workload_probe(Arc::new(KubeWorkloadProbe::new(client)))
            .with_readiness(ReadinessPolicy::from(&config.readiness));

        Ok(Self {
            registry,
            tracker,
            orchestrator,
        })
    }

    /// Plugins whose workloads are present in the cluster
    async fn installed(&self) -> anyhow::Result<HashSet<String>> {
        Ok(self.orchestrator.installed_snapshot(&self.registry).await?)
    }
}

/// Cancellation wired to Ctrl+C, listening until the guard is dropped
fn ctrl_c_cancellation() -> (Cancellation, SignalGuard) {
    Cancellation::on_signal(async {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received Ctrl+C, stopping after the current plugin...");
        } else {
            std::future::pending::<()>().await;
        }
    })
}

async fn cmd_list() -> anyhow::Result<()> {
    let config = config::load_config()?;
    let session = Session::connect(&config)?;

    let records = match session.tracker.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!("Could not read installer records: {}", e);
            Vec::new()
        }
    };

    println!("{:<16} {:<10} {:<28} DESCRIPTION", "PLUGIN", "INSTALLER", "DEPENDS ON");
    for plugin in session.registry.iter() {
        let installer = records
            .iter()
            .find(|(name, _)| name == plugin.name())
            .map(|(_, kind)| kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        let deps = if plugin.dependencies().is_empty() {
            "-".to_string()
        } else {
            plugin.dependencies().join(", ")
        };
        println!(
            "{:<16} {:<10} {:<28} {}",
            plugin.name(),
            installer,
            deps,
            catalog::describe(plugin.name()).unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_order(direction: Direction, names: &[String]) -> anyhow::Result<()> {
    let registry = catalog::builtin_registry()?;
    let graph = DependencyGraph::from_registry(&registry);

    let order = match direction {
        Direction::Install => graph.install_order(names)?,
        Direction::Uninstall => graph.uninstall_order(names)?,
    };

    for (step, name) in order.iter().enumerate() {
        println!("{:>2}. {}", step + 1, name);
    }
    Ok(())
}

async fn cmd_info(name: &str) -> anyhow::Result<()> {
    let config = config::load_config()?;
    let session = Session::connect(&config)?;
    let Some(plugin) = session.registry.get(name) else {
        anyhow::bail!("Unknown plugin: {}", name);
    };

    let validator = DependencyValidator::from_registry(&session.registry);
    let info = validator.dependency_info(name);
    let options = plugin.options();

    println!("Plugin: {}", name);
    if let Some(description) = catalog::describe(name) {
        println!("  {}", description);
    }
    println!();
    println!("Namespace:    {}", options.namespace);
    println!("Release:      {}", options.release);
    println!(
        "Chart:        {}/{}{}",
        options.chart.repository,
        options.chart.chart,
        options
            .chart
            .version
            .as_deref()
            .map(|v| format!(" ({})", v))
            .unwrap_or_default()
    );
    println!("Depends on:   {}", join_or_dash(&info.dependencies));
    println!("Required by:  {}", join_or_dash(&info.dependents));

    match session.tracker.get(name).await {
        Ok(Some(kind)) => println!("Installer:    {}", kind),
        Ok(None) => println!("Installer:    not recorded"),
        Err(e) => println!("Installer:    unavailable ({})", e),
    }
    Ok(())
}

async fn cmd_install(names: &[String], options: BatchOptions) -> anyhow::Result<()> {
    let config = config::load_config()?;
    let session = Session::connect(&config)?;
    let installed = session.installed().await?;

    let (cancel, signal) = ctrl_c_cancellation();
    let report = session
        .orchestrator
        .install_all(&session.registry, names, &installed, options, cancel)
        .await;
    drop(signal);
    let report = report?;

    if report.planned.is_empty() {
        info!("Nothing to install, everything requested is already installed");
    }
    print_report(&report)
}

async fn cmd_uninstall(names: &[String], options: BatchOptions) -> anyhow::Result<()> {
    let config = config::load_config()?;
    let session = Session::connect(&config)?;
    let installed = session.installed().await?;

    let (cancel, signal) = ctrl_c_cancellation();
    let report = session
        .orchestrator
        .uninstall_all(&session.registry, names, &installed, options, cancel)
        .await;
    drop(signal);
    let report = report?;

    if report.planned.is_empty() {
        info!("Nothing to uninstall, none of the requested plugins are installed");
    }
    print_report(&report)
}

fn print_report(report: &BatchReport) -> anyhow::Result<()> {
    for outcome in &report.completed {
        println!("  ok       {} ({}, {})", outcome.plugin, outcome.kind, outcome.source);
    }
    for failure in &report.failed {
        println!("  failed   {}", failure);
    }
    for name in &report.skipped {
        println!("  skipped  {}", name);
    }
    println!("\n{}", report);

    if report.is_success() {
        Ok(())
    } else {
        anyhow::bail!("{} plugin(s) did not complete", report.failed.len() + report.skipped.len())
    }
}

/// Show current configuration, or write the default one
fn cmd_config(init: bool, force: bool) -> anyhow::Result<()> {
    if init {
        let path = PathBuf::from(".clusterplug/config.yaml");
        if config::write_default_config(&path, force)? {
            info!("Wrote default configuration to {}", path.display());
        } else {
            error!("Configuration already exists. Use --force to overwrite.");
        }
        return Ok(());
    }

    match config::load_config() {
        Ok(config) => {
            println!("clusterplug Configuration\n");
            println!("Kubernetes:");
            println!("  API server: {}", config.kube.api_server);
            let token = match config.kube.resolve_token() {
                Ok(Some(_)) => "configured".to_string(),
                Ok(None) => "not set".to_string(),
                Err(e) => format!("unreadable ({})", e),
            };
            println!("  Token: {}", token);
            println!("  Skip TLS verify: {}", config.kube.insecure_skip_tls_verify);
            println!();
            println!("Tracker:");
            println!(
                "  ConfigMap: {}/{}",
                config.tracker.namespace, config.tracker.config_map
            );
            println!(
                "  Timeouts: read {}s, write {}s",
                config.tracker.read_timeout_secs, config.tracker.write_timeout_secs
            );
            println!();
            println!("GitOps:");
            println!("  Namespace: {}", config.gitops.namespace);
            println!("  Controller selector: {}", config.gitops.controller_selector);
            println!("  Probe timeout: {}s", config.gitops.probe_timeout_secs);
            println!();
            println!("Helm:");
            println!("  Binary: {}", config.helm.binary);
            println!("  Timeout: {}s", config.helm.timeout_secs);
            println!();
            println!("Readiness:");
            println!(
                "  Poll every {}s, give up after {}s",
                config.readiness.interval_secs, config.readiness.timeout_secs
            );
            if !config.plugins.is_empty() {
                println!();
                println!("Plugin overrides:");
                for (name, overrides) in &config.plugins {
                    println!("  {}: {} value key(s)", name, overrides.values.len());
                }
            }
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Run 'clusterplug config --init' to create a configuration file.");
        }
    }
    Ok(())
}

fn join_or_dash(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
