//! redis-broker CLI - operate the instances on this node

use clap::{Parser, Subcommand};
use colored::Colorize;
use redis_broker::{
    Broker, BrokerConfig, BrokerResponse, Error, InstanceId, InstanceRepository, Plan, Result,
    Snapshotter,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "redis-broker")]
#[command(about = "Provision and manage Redis instances on this node", long_about = None)]
#[command(version)]
struct Cli {
    /// Broker configuration file (JSON)
    #[arg(long, short, default_value = "/var/vcap/jobs/cf-redis-broker/config/broker.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List shared and dedicated instances
    List,

    /// Provision a new instance
    Provision {
        /// Instance id
        id: String,
        /// Plan to provision under (shared or dedicated)
        #[arg(long, default_value = "shared")]
        plan: String,
    },

    /// Print credentials for a binding
    Bind {
        /// Instance id
        id: String,
        /// Binding id
        binding: String,
    },

    /// Stop an instance and remove its state
    Deprovision {
        /// Instance id
        id: String,
    },

    /// Start every shared instance that is not running
    EnsureRunning,

    /// Snapshot a shared instance into the backup directory
    Backup {
        /// Instance id
        id: String,
    },
}

fn info(msg: &str) {
    println!("{} {}", "[INFO]".blue(), msg);
}

fn success(msg: &str) {
    println!("{} {}", "[OK]".green(), msg);
}

fn warn(msg: &str) {
    println!("{} {}", "[WARN]".yellow(), msg);
}

fn error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red(), msg);
}

fn parse_id(id: &str) -> Result<InstanceId> {
    InstanceId::new(id).map_err(Error::InvalidInstanceId)
}

fn print_response(response: &BrokerResponse) {
    info(&format!("HTTP {} {}", response.status, response.body));
}

fn cmd_list(broker: &Broker) -> Result<()> {
    let config = broker.config();
    let shared = broker.repository().all_instances()?;

    info(&format!(
        "Shared instances ({}/{}):",
        shared.len(),
        config.service_instance_limit
    ));
    println!();
    println!("{:<38} {:<8} {:<8}", "ID", "PORT", "LOCKED");
    println!("{:<38} {:<8} {:<8}", "--", "----", "------");
    for instance in &shared {
        let locked = if broker.repository().is_locked(&instance.id) {
            "yes"
        } else {
            "no"
        };
        println!("{:<38} {:<8} {:<8}", instance.id, instance.port, locked);
    }

    println!();
    info("Dedicated instances:");
    let dedicated = broker.dedicated().all_instances()?;
    if dedicated.is_empty() {
        println!("  (no dedicated instances)");
    } else {
        for instance in dedicated {
            println!("  {:<38} {}", instance.id, instance.host);
        }
    }
    let free = broker.dedicated().free_nodes()?;
    println!("  {} dedicated node(s) free", free.len());

    Ok(())
}

fn cmd_provision(broker: &Broker, id: &str, plan: &str) -> Result<()> {
    let id = parse_id(id)?;
    let plan: Plan = plan
        .parse()
        .map_err(|_| Error::UnknownPlan(plan.to_string()))?;

    info(&format!("Provisioning {} instance '{}'...", plan, id));
    let result = broker.provision(&id, plan);
    print_response(&BrokerResponse::provision(&result));
    let instance = result?;
    success(&format!("Instance '{}' listening on {}", id, instance.address()));

    Ok(())
}

fn cmd_bind(broker: &Broker, id: &str, binding: &str) -> Result<()> {
    let id = parse_id(id)?;

    let result = broker.bind(&id, binding);
    print_response(&BrokerResponse::bind(&result));
    result?;

    Ok(())
}

fn cmd_deprovision(broker: &Broker, id: &str) -> Result<()> {
    let id = parse_id(id)?;

    info(&format!("Deprovisioning instance '{}'...", id));
    let result = broker.deprovision(&id);
    print_response(&BrokerResponse::removal(&result));
    result?;
    success(&format!("Instance '{}' removed", id));

    Ok(())
}

fn cmd_ensure_running(broker: &Broker) -> Result<()> {
    info("Checking shared instances...");
    let count = broker.ensure_all_running()?;
    success(&format!("{} instance(s) running", count));

    Ok(())
}

fn cmd_backup(broker: &Broker, id: &str) -> Result<()> {
    let id = parse_id(id)?;

    if broker.repository().is_locked(&id) {
        warn(&format!("Instance '{}' is still being set up", id));
    }

    info(&format!("Snapshotting instance '{}'...", id));
    let artifact = broker.snapshotter(&id)?.snapshot()?;
    success(&format!("Snapshot written to {}", artifact.path().display()));

    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = BrokerConfig::load(&cli.config)?;
    let broker = Broker::new(config);

    match cli.command {
        None | Some(Commands::List) => cmd_list(&broker),
        Some(Commands::Provision { id, plan }) => cmd_provision(&broker, &id, &plan),
        Some(Commands::Bind { id, binding }) => cmd_bind(&broker, &id, &binding),
        Some(Commands::Deprovision { id }) => cmd_deprovision(&broker, &id),
        Some(Commands::EnsureRunning) => cmd_ensure_running(&broker),
        Some(Commands::Backup { id }) => cmd_backup(&broker, &id),
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
