pub mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "marathon-consul")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Registers Marathon tasks as services in the Consul catalog", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to a YAML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(
        short,
        long = "agent",
        global = true,
        help = "Consul agent address, may be repeated"
    )]
    pub agents: Vec<String>,

    #[arg(short, long, global = true, help = "Marathon location as host:port")]
    pub marathon: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied
    pub fn load_config(&self) -> crate::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        if !self.agents.is_empty() {
            config.consul.agents = self.agents.clone();
        }
        if let Some(location) = &self.marathon {
            config.marathon.location = location.clone();
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "List services registered from Marathon")]
    Services {
        #[arg(short, long, help = "Only instances of this service")]
        name: Option<String>,
    },
    #[command(about = "Register every healthy task of every integrated Marathon app")]
    Sync {
        #[arg(long, help = "Print Prometheus metrics when done")]
        metrics: bool,
    },
    #[command(about = "Deregister every service of a Marathon task")]
    Deregister {
        #[arg(short, long, help = "Marathon task ID")]
        task: String,
    },
}
