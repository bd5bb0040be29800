//! The `rangectl` command-line surface (§6).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value_t = String::from("/etc/rangectl/config.yaml"))]
    config: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_config_path(&self) -> PathBuf {
        PathBuf::from(&self.config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialize the registry and seed the built-in exploit library.
    Init,
    /// Start the control plane as a long-lived process.
    Serve,
    #[command(subcommand)]
    Lab(LabCommand),
    #[command(subcommand)]
    Deploy(DeployCommand),
    #[command(subcommand)]
    Mission(MissionCommand),
}

#[derive(Subcommand, Debug)]
pub enum LabCommand {
    List,
    Show { lab_id: String },
    Create { path: PathBuf },
    Delete { lab_id: String },
}

#[derive(Subcommand, Debug)]
pub enum DeployCommand {
    List,
    Create { lab_id: String, deploy_id: String },
    Destroy { deploy_id: String },
}

#[derive(Subcommand, Debug)]
pub enum MissionCommand {
    Create { path: PathBuf },
    Start { mission_id: String },
    Cancel { mission_id: String },
}
