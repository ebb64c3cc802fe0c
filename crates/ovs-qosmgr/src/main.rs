//! qosctl entry point.
//!
//! One-shot front end to the QoS manager: each invocation loads the
//! configuration, applies a single operation against the switch and exits.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ovs_qosmgr::{NetemParams, PodRef, QosMgr, QosMgrConfig, DEFAULT_CONFIG_PATH};
use ovs_vsctl::OvsError;

/// Per-interface QoS control for the Open vSwitch integration bridge
#[derive(Parser, Debug)]
#[command(name = "qosctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Path of the ovs-vsctl binary, overrides the config file
    #[arg(long)]
    vsctl: Option<String>,

    /// Maximum concurrent ovs-vsctl invocations, overrides the config file
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Integration bridge, overrides the config file
    #[arg(long)]
    bridge: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PodArgs {
    /// Pod name
    #[arg(long, default_value = "")]
    pod: String,

    /// Pod namespace
    #[arg(long, default_value = "")]
    namespace: String,
}

impl PodArgs {
    fn pod_ref(&self) -> PodRef {
        PodRef::new(&self.pod, &self.namespace)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set ingress policing and the egress cap of an interface
    Bandwidth {
        iface_id: String,
        #[command(flatten)]
        pod: PodArgs,
        /// Ingress limit in Mbps, 0 disables policing
        #[arg(long, default_value = "0")]
        ingress: u64,
        /// Egress limit in Mbps, 0 removes the HTB queue
        #[arg(long, default_value = "0")]
        egress: u64,
    },

    /// Set network emulation on an interface; all zero removes it
    Netem {
        iface_id: String,
        #[command(flatten)]
        pod: PodArgs,
        /// Latency in milliseconds
        #[arg(long, default_value = "0")]
        latency: u32,
        /// Jitter in milliseconds
        #[arg(long, default_value = "0")]
        jitter: u32,
        /// Queue limit in packets
        #[arg(long, default_value = "0")]
        limit: u32,
        /// Loss percentage
        #[arg(long, default_value = "0")]
        loss: f64,
    },

    /// Print the netem settings bound to an interface
    NetemShow {
        iface_id: String,
        #[command(flatten)]
        pod: PodArgs,
    },

    /// Remove all QoS state of an interface
    Clear {
        iface_id: String,
        #[command(flatten)]
        pod: PodArgs,
    },

    /// Exit 0 when the interface is shaped by HTB, 1 otherwise
    IsHtb { iface_id: String },

    /// Remove lost interfaces and orphaned QoS records, list residual ports
    Cleanup,

    /// Keep one interface per iface-id
    Dedupe { iface_id: String, port_name: String },
}

/// Initialize tracing/logging.
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn load_config(cli: &Cli) -> anyhow::Result<QosMgrConfig> {
    let mut config = QosMgrConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(vsctl) = &cli.vsctl {
        config.vsctl.binary = vsctl.clone();
    }
    if let Some(limit) = cli.max_concurrency {
        config.vsctl.max_concurrency = limit;
    }
    if let Some(bridge) = &cli.bridge {
        config.switch.integration_bridge = bridge.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let mgr = QosMgr::from_config(&config)?;

    match cli.command {
        Command::Bandwidth {
            iface_id,
            pod,
            ingress,
            egress,
        } => {
            let mut queue_map = mgr.queue_iface_map().await?;
            mgr.set_interface_bandwidth(&pod.pod_ref(), &iface_id, ingress, egress, &mut queue_map)
                .await?;
            info!(iface_id = %iface_id, ingress, egress, "Bandwidth applied");
        }
        Command::Netem {
            iface_id,
            pod,
            latency,
            jitter,
            limit,
            loss,
        } => {
            let params = NetemParams::new(latency, jitter, limit, loss);
            mgr.set_netem_qos(&pod.pod_ref(), &iface_id, &params).await?;
            info!(iface_id = %iface_id, ?params, "Netem applied");
        }
        Command::NetemShow { iface_id, pod } => {
            for qos in mgr.get_qos_list(&pod.pod_ref(), &iface_id).await? {
                match mgr.get_netem_qos_config(&qos).await {
                    Ok(config) => println!(
                        "{} latency={}us jitter={}us limit={} loss={}%",
                        qos, config.latency_us, config.jitter_us, config.limit_pkts, config.loss_percent
                    ),
                    Err(OvsError::MalformedOutput { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Command::Clear { iface_id, pod } => {
            mgr.clear_pod_bandwidth(&pod.pod_ref(), &iface_id).await?;
            info!(iface_id = %iface_id, "QoS cleared");
        }
        Command::IsHtb { iface_id } => {
            let htb = mgr.is_htb_qos(&iface_id).await?;
            println!("{}", htb);
            if !htb {
                return Ok(ExitCode::from(1));
            }
        }
        Command::Cleanup => {
            for name in mgr.clean_lost_interface().await? {
                println!("deleted lost interface {}", name);
            }
            for qos in mgr.clean_orphan_qos().await? {
                println!("destroyed orphan qos {}", qos);
            }
            for port in mgr.get_residual_internal_ports().await? {
                println!("residual internal port {}", port);
            }
        }
        Command::Dedupe {
            iface_id,
            port_name,
        } => {
            for name in mgr.clean_duplicate_port(&iface_id, &port_name).await? {
                println!("deleted duplicate port {}", name);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("qosctl: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("qosctl failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
