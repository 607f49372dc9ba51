use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ztc::config::{self, Config};
use ztc::fixer::types::FixOptions;
use ztc::fixer::Fixer;
use ztc::scanner::types::ScanOptions;
use ztc::scanner::Scanner;
use ztc::zabbix::Client;
use ztc::{logging, telemetry};

/// Zabbix Threat Control - vulnerability assessment for Zabbix.
///
/// Scans hosts monitored by Zabbix for security vulnerabilities in
/// installed packages and reports them back to Zabbix for centralized
/// monitoring and alerting.
#[derive(Parser)]
#[command(name = "ztc", version, about, long_about = None)]
struct Cli {
    /// Config file path.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan hosts for vulnerabilities and push the results to Zabbix.
    Scan {
        /// Limit the number of hosts to scan (0 = unlimited).
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Do not push results to Zabbix.
        #[arg(long)]
        nopush: bool,
        /// Dry-run mode (implies --nopush).
        #[arg(long)]
        dry_run: bool,
        /// Specific host IDs to scan (comma-separated).
        #[arg(long, value_delimiter = ',')]
        hosts: Vec<String>,
    },

    /// Create and configure the Zabbix objects vulnerability monitoring
    /// needs. With no flags, everything is created.
    Prepare {
        /// Create all Zabbix objects.
        #[arg(short, long)]
        all: bool,
        /// Create/update the OS-report template.
        #[arg(short, long)]
        templates: bool,
        /// Create the virtual hosts.
        #[arg(short = 'V', long)]
        virtual_hosts: bool,
        /// Create the dashboard.
        #[arg(short, long)]
        dashboard: bool,
        /// Check that the alerting action exists.
        #[arg(short = 'A', long)]
        actions: bool,
        /// Recreate existing objects (use after upgrades that change the
        /// key schema).
        #[arg(short, long)]
        force: bool,
    },

    /// Fix vulnerabilities on hosts (experimental). Reads previously
    /// published scan data to decide which packages to upgrade; falls back
    /// to a full system update when no per-package data is available.
    Fix {
        /// Bulletin ID to fix across all affected hosts.
        #[arg(long)]
        bulletin: Option<String>,
        /// Specific host ID to fix.
        #[arg(long)]
        host: Option<String>,
        /// Host technical name to fix (resolved to a host ID).
        #[arg(long)]
        host_name: Option<String>,
        /// Show the fix plan without executing.
        #[arg(long)]
        dry_run: bool,
        /// Use SSH instead of the Zabbix agent.
        #[arg(long)]
        ssh: bool,
        /// SSH user for remote execution.
        #[arg(long, default_value = "root")]
        ssh_user: String,
        /// Skip the experimental-command confirmation.
        #[arg(long)]
        force: bool,
    },

    /// Rewrite a legacy INI config file as canonical YAML.
    MigrateConfig {
        /// Legacy INI file to read (defaults to the config search path).
        #[arg(long)]
        input: Option<PathBuf>,
        /// YAML file to write.
        #[arg(long, default_value = "/etc/ztc.yaml")]
        output: PathBuf,
    },

    /// Print version and build information.
    Version,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // These two handle their own configuration.
    match &cli.command {
        Command::Version => {
            println!(
                "ztc {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            return Ok(());
        }
        Command::MigrateConfig { input, output } => {
            return migrate_config(input.clone(), output.clone());
        }
        _ => {}
    }

    let config_path = cli.config.clone().unwrap_or_else(config::find_config_path);
    let cfg = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let telemetry = telemetry::init(&cfg.telemetry).context("failed to init telemetry")?;
    let _log_guard = logging::init(cli.verbose, telemetry.tracer());

    let cfg = Arc::new(cfg);
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let outcome = match cli.command {
        Command::Scan {
            limit,
            nopush,
            dry_run,
            hosts,
        } => {
            run_scan(
                cfg,
                &cancel,
                ScanOptions {
                    limit,
                    no_push: nopush,
                    dry_run,
                    host_ids: hosts,
                },
            )
            .await
        }
        Command::Prepare {
            all,
            templates,
            virtual_hosts,
            dashboard,
            actions,
            force,
        } => run_prepare(cfg, all, templates, virtual_hosts, dashboard, actions, force).await,
        Command::Fix {
            bulletin,
            host,
            host_name,
            dry_run,
            ssh,
            ssh_user,
            force,
        } => {
            run_fix(
                cfg,
                &cancel,
                FixOptions {
                    bulletin_id: bulletin.unwrap_or_default(),
                    host_id: host.unwrap_or_default(),
                    host_name: host_name.unwrap_or_default(),
                    dry_run,
                    use_ssh: ssh,
                    ssh_user,
                },
                force,
            )
            .await
        }
        Command::Version | Command::MigrateConfig { .. } => unreachable!(),
    };

    telemetry.shutdown();
    outcome
}

/// Cancel in-flight work on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let interrupt = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(_) => {
                    interrupt.await.ok();
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = interrupt => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            interrupt.await.ok();
        }
        warn!("received shutdown signal, cancelling");
        cancel.cancel();
    });
}

async fn run_scan(
    cfg: Arc<Config>,
    cancel: &CancellationToken,
    opts: ScanOptions,
) -> anyhow::Result<()> {
    cfg.require_vulners_key()?;

    info!("starting vulnerability scan");

    let scanner = Scanner::new(cfg)
        .await
        .context("failed to initialize scanner")?;

    let results = match scanner.scan(cancel, &opts).await {
        Ok(results) => results,
        Err(e) => {
            let _ = scanner.close().await;
            return Err(anyhow::Error::new(e).context("scan failed"));
        }
    };

    info!(
        hosts_scanned = results.hosts_scanned,
        vulnerable_packages = results.vulnerable_packages,
        max_cvss = results.max_cvss,
        "scan completed"
    );

    let outcome = if !opts.no_push && !opts.dry_run {
        info!("pushing results to Zabbix");
        scanner
            .publish(cancel, &results)
            .await
            .map_err(|e| anyhow::Error::new(e).context("failed to push results"))
    } else {
        info!("skipping push to Zabbix (--nopush or --dry-run specified)");
        Ok(())
    };

    let _ = scanner.close().await;
    outcome
}

async fn run_prepare(
    cfg: Arc<Config>,
    all: bool,
    mut templates: bool,
    mut virtual_hosts: bool,
    mut dashboard: bool,
    mut actions: bool,
    force: bool,
) -> anyhow::Result<()> {
    info!("preparing Zabbix objects");

    let client = Client::connect(cfg)
        .await
        .context("failed to connect to Zabbix")?;

    // Default to everything so a bare `ztc prepare` never silently no-ops.
    let no_flags = !all && !templates && !virtual_hosts && !dashboard && !actions;
    if no_flags {
        warn!("no flags specified, defaulting to --all (create all Zabbix objects)");
    }
    if all || no_flags {
        templates = true;
        virtual_hosts = true;
        dashboard = true;
        actions = true;
    }

    if force {
        warn!("force mode enabled, existing objects will be recreated");
    }

    if templates {
        info!("creating/updating OS-report template");
        client
            .ensure_os_report_template(force)
            .await
            .context("failed to create template")?;
        info!("OS-report template ready");
    }

    if virtual_hosts {
        info!("creating virtual hosts");
        client
            .ensure_virtual_hosts(force)
            .await
            .context("failed to create virtual hosts")?;
    }

    if dashboard {
        info!("creating dashboard");
        client
            .ensure_dashboard(force)
            .await
            .context("failed to create dashboard")?;
        info!("dashboard ready");
    }

    if actions {
        info!("checking actions");
        client
            .ensure_actions()
            .await
            .context("failed to check actions")?;
    }

    let _ = client.logout().await;
    info!("Zabbix preparation complete");
    Ok(())
}

async fn run_fix(
    cfg: Arc<Config>,
    cancel: &CancellationToken,
    opts: FixOptions,
    force: bool,
) -> anyhow::Result<()> {
    cfg.require_vulners_key()?;

    if opts.bulletin_id.is_empty() && opts.host_id.is_empty() && opts.host_name.is_empty() {
        anyhow::bail!("either --bulletin, --host, or --host-name must be specified");
    }

    if !force && !opts.dry_run {
        eprintln!("WARNING: the fix command is experimental and executes remote commands.");
        eprintln!("Use --dry-run to review the plan first, or --force to skip this check.");
        anyhow::bail!("pass --force to proceed (or --dry-run to preview)");
    }

    info!("preparing fix operation");

    let fixer = Fixer::new(cfg)
        .await
        .context("failed to initialize fixer")?;

    let plan = match fixer.plan(&opts).await {
        Ok(plan) => plan,
        Err(e) => {
            let _ = fixer.close().await;
            return Err(anyhow::Error::new(e).context("failed to create fix plan"));
        }
    };

    info!(hosts = plan.hosts.len(), "fix plan created");

    if opts.dry_run {
        info!("dry-run mode, showing plan without executing");
        for host in &plan.hosts {
            println!("Host: {} ({})", host.name, host.address);
            println!("  Packages: {}", host.packages.len());
            println!("  Command:  {}", host.command);
        }
        let _ = fixer.close().await;
        return Ok(());
    }

    info!("executing fix plan");
    let outcome = fixer.execute(cancel, &plan, &opts).await;
    let _ = fixer.close().await;

    let results = outcome.context("fix execution failed")?;
    info!(
        successful = results.successful,
        failed = results.failed,
        "fix operation completed"
    );

    Ok(())
}

fn migrate_config(input: Option<PathBuf>, output: PathBuf) -> anyhow::Result<()> {
    let input = input.unwrap_or_else(config::find_config_path);

    let (cfg, warnings) = Config::load_ini_with_warnings(&input)
        .with_context(|| format!("failed to read legacy config {}", input.display()))?;
    for warning in &warnings {
        eprintln!("WARNING: {warning}");
    }

    let yaml = cfg.to_yaml()?;
    std::fs::write(&output, yaml)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "migrated {} -> {} ({} warnings)",
        input.display(),
        output.display(),
        warnings.len()
    );
    Ok(())
}
