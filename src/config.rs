//! Command-line configuration.
//!
//! ```text
//! dataflow-node kvs-coordinator      --bind 0.0.0.0:8000
//! dataflow-node kvs-worker           --bind 0.0.0.0:8001 --coordinator host:8000 [--storage-dir DIR]
//! dataflow-node dataflow-coordinator --bind 0.0.0.0:9000 --kvs host:8000
//! dataflow-node dataflow-worker      --bind 0.0.0.0:9001 --coordinator host:9000
//! dataflow-node submit               --coordinator host:9000 --class word_count [--arg TEXT]...
//! ```

use anyhow::{Context, Result, anyhow, bail};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_STORAGE_DIR: &str = "worker-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    KvsCoordinator,
    KvsWorker,
    DataflowCoordinator,
    DataflowWorker,
    Submit,
}

impl Role {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "kvs-coordinator" => Ok(Role::KvsCoordinator),
            "kvs-worker" => Ok(Role::KvsWorker),
            "dataflow-coordinator" => Ok(Role::DataflowCoordinator),
            "dataflow-worker" => Ok(Role::DataflowWorker),
            "submit" => Ok(Role::Submit),
            other => bail!("unknown role '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    pub bind: Option<SocketAddr>,
    /// `host:port` of the coordinator this node heartbeats to (workers) or
    /// submits to (`submit`).
    pub coordinator: Option<String>,
    /// Storage coordinator used by the dataflow coordinator.
    pub kvs: Option<String>,
    pub storage_dir: PathBuf,
    pub class: Option<String>,
    pub args: Vec<String>,
    pub verbose: bool,
}

impl NodeConfig {
    /// Parses `args` without the program name.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let role = Role::parse(args.first().ok_or_else(|| anyhow!("missing role"))?)?;
        let mut config = NodeConfig {
            role,
            bind: None,
            coordinator: None,
            kvs: None,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            class: None,
            args: Vec::new(),
            verbose: false,
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--bind" => {
                    config.bind = Some(value(args, i)?.parse::<SocketAddr>().context("--bind must be ip:port")?);
                    i += 2;
                }
                "--coordinator" => {
                    config.coordinator = Some(value(args, i)?.clone());
                    i += 2;
                }
                "--kvs" => {
                    config.kvs = Some(value(args, i)?.clone());
                    i += 2;
                }
                "--storage-dir" => {
                    config.storage_dir = PathBuf::from(value(args, i)?);
                    i += 2;
                }
                "--class" => {
                    config.class = Some(value(args, i)?.clone());
                    i += 2;
                }
                "--arg" => {
                    config.args.push(value(args, i)?.clone());
                    i += 2;
                }
                "--verbose" => {
                    config.verbose = true;
                    i += 1;
                }
                other => bail!("unknown option '{}'", other),
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let needs_bind = self.role != Role::Submit;
        let needs_coordinator = matches!(self.role, Role::KvsWorker | Role::DataflowWorker | Role::Submit);
        if needs_bind && self.bind.is_none() {
            bail!("--bind is required");
        }
        if needs_coordinator && self.coordinator.is_none() {
            bail!("--coordinator is required");
        }
        if self.role == Role::DataflowCoordinator && self.kvs.is_none() {
            bail!("--kvs is required");
        }
        if self.role == Role::Submit && self.class.is_none() {
            bail!("--class is required");
        }
        Ok(())
    }

    pub fn usage(program: &str) -> String {
        format!(
            "Usage: {} <kvs-coordinator|kvs-worker|dataflow-coordinator|dataflow-worker|submit> [options]\n\
             Options: --bind <ip:port> --coordinator <host:port> --kvs <host:port>\n\
             \x20        --storage-dir <dir> --class <job> --arg <value> --verbose",
            program
        )
    }
}

fn value(args: &[String], i: usize) -> Result<&String> {
    args.get(i + 1)
        .ok_or_else(|| anyhow!("{} needs a value", args[i]))
}
