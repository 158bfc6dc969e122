//! ovs-bridgectl entry point.
//!
//! Small operator tool over the bridge library: manage bridges and ports
//! and inspect flows, VIFs and VLAN tags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ovs_agent_common::config::DEFAULT_CONFIG_PATH;
use ovs_agent_common::{OvsConfig, ProcessExecutor};
use ovs_bridge::{InterfaceOptions, Ovs, INVALID_OFPORT};

/// Exit code of `br-exists` for a missing bridge, mirroring ovs-vsctl
const EXIT_BRIDGE_ABSENT: u8 = 2;

/// Open vSwitch bridge control
#[derive(Parser, Debug)]
#[command(name = "ovs-bridgectl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "warn")]
    log_level: String,

    /// Command prefix used to run switch commands with privileges
    #[arg(long)]
    root_helper: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a bridge if it does not exist
    AddBr { bridge: String },
    /// Delete a bridge if it exists
    DelBr { bridge: String },
    /// Exit with status 2 if the bridge does not exist
    BrExists { bridge: String },
    /// List bridges
    ListBr,
    /// Add a port and wait for its OpenFlow port number
    AddPort {
        bridge: String,
        port: String,
        /// Interface settings as key=value
        #[arg(value_parser = parse_key_value)]
        options: Vec<(String, String)>,
    },
    /// Delete a port if it exists
    DelPort { bridge: String, port: String },
    /// Print the flows of a bridge
    DumpFlows {
        bridge: String,
        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },
    /// Print the VIF ports of a bridge
    VifPorts { bridge: String },
    /// Print the VLAN tag of every port on a bridge
    PortTags { bridge: String },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

/// Initialize tracing/logging.
fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> Result<ExitCode> {
    let mut config = OvsConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.root_helper.is_some() {
        config.root_helper = args.root_helper;
    }
    config.validate()?;

    let executor = Arc::new(ProcessExecutor::with_root_helper(config.root_helper.as_deref()));
    let ovs = Ovs::new(executor, &config);

    match args.command {
        Command::AddBr { bridge } => {
            ovs.add_bridge(&bridge).await?;
            info!(bridge = %bridge, "Bridge present");
        }
        Command::DelBr { bridge } => {
            ovs.delete_bridge(&bridge).await?;
            info!(bridge = %bridge, "Bridge absent");
        }
        Command::BrExists { bridge } => {
            if !ovs.bridge_exists(&bridge).await? {
                return Ok(ExitCode::from(EXIT_BRIDGE_ABSENT));
            }
        }
        Command::ListBr => {
            for bridge in ovs.get_bridges().await? {
                println!("{}", bridge);
            }
        }
        Command::AddPort {
            bridge,
            port,
            options,
        } => {
            let options: InterfaceOptions = options;
            let ofport = ovs.bridge(bridge).add_port(&port, &options).await?;
            if ofport == INVALID_OFPORT {
                anyhow::bail!("port {} got no OpenFlow port number and was removed", port);
            }
            println!("{}", ofport);
        }
        Command::DelPort { bridge, port } => {
            ovs.bridge(bridge).delete_port(&port).await?;
        }
        Command::DumpFlows { bridge, table } => {
            let br = ovs.bridge(bridge);
            match table {
                Some(table) => {
                    if let Some(flows) = br.dump_flows_for_table(&table).await? {
                        println!("{}", flows);
                    }
                }
                None => {
                    for flow in br.dump_flows().await? {
                        println!("{}", flow);
                    }
                }
            }
        }
        Command::VifPorts { bridge } => {
            for vif in ovs.bridge(bridge).get_vif_ports().await? {
                println!("{}", vif);
            }
        }
        Command::PortTags { bridge } => {
            let mut tags: Vec<_> = ovs.bridge(bridge).get_port_tag_dict().await?.into_iter().collect();
            tags.sort();
            for (port, tag) in tags {
                match tag {
                    Some(tag) => println!("{} {}", port, tag),
                    None => println!("{} -", port),
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("ovs-bridgectl error: {:#}", e);
            eprintln!("ovs-bridgectl: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
