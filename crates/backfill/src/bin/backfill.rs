//! Backfill CLI - create GPU servers on idle capacity and clean them up.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use backfill::capacity::CapacityOracle;
use backfill::providers::cloudsigma::{CloudSigma, DEFAULT_API_URL};
use backfill::{BackfillConfig, Controller, CycleReport, Settings};

/// Backfill CLI - Provision GPU servers on backfill capacity.
#[derive(Parser)]
#[command(name = "backfill")]
#[command(about = "Create and start grey and white GPU servers, and clean them up")]
struct Cli {
    /// API endpoint (or set `CLOUDSIGMA_API_URL` env var).
    #[arg(long, env = "CLOUDSIGMA_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Account email (or set `CLOUDSIGMA_USERNAME` env var).
    #[arg(long, env = "CLOUDSIGMA_USERNAME", default_value = "")]
    username: String,

    /// Account password (or set `CLOUDSIGMA_PASSWORD` env var).
    #[arg(long, env = "CLOUDSIGMA_PASSWORD", default_value = "", hide_env_values = true)]
    password: String,

    /// Append logs to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one provisioning cycle with explicit parameters.
    Run(RunArgs),

    /// Run provisioning cycles forever, re-reading the config file each time.
    Watch {
        /// Path to the TOML config file.
        #[arg(long, default_value = "backfill.toml")]
        config: PathBuf,
    },

    /// Stop and remove all managed servers and drives.
    Cleanup,

    /// Show current backfill capacity for a GPU model.
    Capacity {
        /// GPU model id.
        #[arg(long)]
        gpu_model: String,

        /// Host CPU class.
        #[arg(long, default_value = "amd")]
        cpu_type: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Number of servers to create (default: as many as capacity allows for
    /// grey servers, one for white servers).
    #[arg(long, value_name = "N")]
    servers: Option<u32>,

    /// Number of GPUs per server.
    #[arg(long, value_name = "N")]
    gpus: u32,

    /// GPU model id.
    #[arg(long)]
    gpu_model: String,

    /// Create grey (backfill) servers instead of white ones.
    #[arg(long, default_value = "false")]
    grey: bool,

    /// CPU size of a server in GHz.
    #[arg(long)]
    server_cpu: u64,

    /// Memory size of a server in GB.
    #[arg(long)]
    server_mem: u64,

    /// Host CPU class.
    #[arg(long, default_value = "amd")]
    cpu_type: String,

    /// UUID of a drive to clone as boot disk.
    #[arg(long)]
    drive_uuid: Option<String>,

    /// SSH public key uuid to attach.
    #[arg(long)]
    pubkey: Option<String>,

    /// Suffix of generated server names.
    #[arg(long, default_value = "backfill")]
    unique_name: String,

    /// Attach a DHCP public NIC.
    #[arg(long, default_value = "false")]
    public_network: bool,

    /// Attach a private NIC (requires `--vlan-uuid`).
    #[arg(long, default_value = "false")]
    private_network: bool,

    /// VLAN for the private NIC.
    #[arg(long)]
    vlan_uuid: Option<String>,

    /// Clamp GPUs per server to the per-host maximum.
    #[arg(long, default_value = "false")]
    auto_adjust_max_gpus: bool,

    /// VNC console password (random when not given).
    #[arg(long)]
    vnc_password: Option<String>,

    /// Seconds to wait before re-checking capacity when no GPUs are free.
    #[arg(long, value_name = "SECS")]
    capacity_retry_sec: Option<u64>,
}

impl From<RunArgs> for Settings {
    fn from(args: RunArgs) -> Self {
        Self {
            gpus: Some(args.gpus),
            gpu_model: Some(args.gpu_model),
            grey: Some(args.grey),
            server_cpu: Some(args.server_cpu),
            server_mem: Some(args.server_mem),
            cpu_type: Some(args.cpu_type),
            drive: args.drive_uuid,
            pubkey: args.pubkey,
            unique_name: Some(args.unique_name),
            public_network: Some(args.public_network),
            private_network: Some(args.private_network),
            vlan_uuid: args.vlan_uuid,
            auto_adjust_max_gpus: Some(args.auto_adjust_max_gpus),
            vnc_password: args.vnc_password,
            capacity_retry_sec: args.capacity_retry_sec,
            servers: args.servers,
            ..Self::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let client = build_client(&cli)?;
    let controller = Controller::new(Arc::new(client.clone()));

    match cli.command {
        Commands::Run(args) => {
            let config = Settings::from(args)
                .validate()
                .context("Invalid server parameters")?;
            let report = controller.run_cycle(&config).await?;
            print_report(&report);
        }

        Commands::Watch { config } => {
            let initial = BackfillConfig::load(&config)
                .with_context(|| format!("Failed to load config from {}", config.display()))?;
            info!(path = %config.display(), "Starting continuous mode");
            controller.watch(&config, initial).await;
        }

        Commands::Cleanup => {
            let report = controller.cleanup_all().await?;
            println!("\n🧹 Cleanup finished");
            println!("   Servers deleted: {}", report.servers_deleted.len());
            println!("   Drives deleted:  {}", report.drives_deleted.len());
            if !report.servers_stuck.is_empty() || !report.drives_stuck.is_empty() {
                println!(
                    "   ⚠️  Stuck: servers {:?}, drives {:?}",
                    report.servers_stuck, report.drives_stuck
                );
            }
            if !report.servers_pending.is_empty() || !report.drives_pending.is_empty() {
                println!(
                    "   ⏳ Left for next pass: servers {:?}, drives {:?}",
                    report.servers_pending, report.drives_pending
                );
            }
        }

        Commands::Capacity {
            gpu_model,
            cpu_type,
        } => {
            let oracle = CapacityOracle::new(&client);
            match oracle.probe(&gpu_model, &cpu_type).await? {
                Some(snapshot) => {
                    println!("\n🎮 Backfill capacity for {gpu_model} on {cpu_type} hosts");
                    println!("   GPUs available:   {}", snapshot.total_gpus);
                    println!("   Max per host:     {}", snapshot.max_per_host);
                    println!("   Free CPU (MHz):   {}", snapshot.most_free_cpu);
                    println!(
                        "   Free memory (GB): {}",
                        snapshot.most_free_mem / (1 << 30)
                    );
                    println!("   CPU per SMP:      {}", snapshot.smp_size);
                }
                None => println!("\n🔴 No backfill GPUs of model {gpu_model} available"),
            }
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    Ok(())
}

fn build_client(cli: &Cli) -> Result<CloudSigma> {
    let username = cli.username.trim();
    let password = cli.password.trim();

    if username.is_empty() || password.is_empty() {
        anyhow::bail!(
            "CloudSigma credentials are missing. Provide --username/--password or set CLOUDSIGMA_USERNAME/CLOUDSIGMA_PASSWORD."
        );
    }

    CloudSigma::with_base_url(cli.api_url.trim(), username, password)
        .context("Failed to create CloudSigma client")
}

fn print_report(report: &CycleReport) {
    println!(
        "\n{:<38} {:<28} {:<10} {:<10}",
        "UUID", "NAME", "STATUS", "STARTUP"
    );
    println!("{}", "-".repeat(90));

    for launch in &report.launches {
        let status_emoji = if launch.started { "🟢" } else { "🔴" };
        let startup = launch
            .startup
            .map_or_else(|| "-".to_string(), |d| format!("{}s", d.as_secs()));
        println!(
            "{:<38} {:<28} {} {:<8} {:<10}",
            launch.server.uuid,
            launch.server.name,
            status_emoji,
            launch.server.status.to_string(),
            startup
        );
    }

    println!(
        "\n✅ {} of {} planned servers running",
        report.started(),
        report.planned
    );
    for failure in &report.failures {
        println!("   ❌ {failure}");
    }
}
