//! Layered configuration: a `serde`-derived TOML file with every field defaulted,
//! overlaid by `structopt` CLI flags — CLI wins over file, file wins over built-in default,
//! the same precedence this family's existing config module already follows.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "snmp-subagent", about = "AgentX subagent exposing switch state")]
struct CliOpt {
    #[structopt(short, long, parse(from_os_str), default_value = "/etc/snmp/snmp_subagent.toml")]
    config: PathBuf,

    #[structopt(short = "t", long = "host")]
    host: Option<String>,

    #[structopt(short = "p", long = "port")]
    port: Option<u16>,

    #[structopt(short = "s", long = "unix_socket_path", parse(from_os_str))]
    unix_socket_path: Option<PathBuf>,

    #[structopt(short = "d", long = "debug")]
    debug: Option<u8>,

    #[structopt(short = "f", long = "frequency")]
    frequency: Option<u64>,

    #[structopt(short = "r", long = "enable_dynamic_frequency")]
    enable_dynamic_frequency: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MasterAgentOpt {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_unix_socket_path")]
    pub unix_socket_path: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

fn default_unix_socket_path() -> Option<String> {
    Some("/var/agentx/master".to_string())
}

fn default_agent_timeout_secs() -> u64 {
    5
}

impl Default for MasterAgentOpt {
    fn default() -> Self {
        MasterAgentOpt {
            host: None,
            port: None,
            unix_socket_path: default_unix_socket_path(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateOpt {
    #[serde(default = "default_frequency_secs")]
    pub frequency_secs: u64,
    #[serde(default = "default_enable_dynamic_frequency")]
    pub enable_dynamic_frequency: bool,
}

fn default_frequency_secs() -> u64 {
    5
}

fn default_enable_dynamic_frequency() -> bool {
    true
}

impl Default for UpdateOpt {
    fn default() -> Self {
        UpdateOpt {
            frequency_secs: default_frequency_secs(),
            enable_dynamic_frequency: default_enable_dynamic_frequency(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LogOpt {
    #[serde(default)]
    pub level: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendOpt {
    #[serde(default = "default_redis_unix_socket_path")]
    pub redis_unix_socket_path: String,
    /// Additional per-ASIC namespace socket paths, host namespace excluded.
    #[serde(default)]
    pub namespace_socket_paths: Vec<String>,
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_redis_unix_socket_path() -> String {
    "/var/run/redis/redis.sock".to_string()
}

fn default_backend_timeout_secs() -> u64 {
    5
}

impl Default for BackendOpt {
    fn default() -> Self {
        BackendOpt {
            redis_unix_socket_path: default_redis_unix_socket_path(),
            namespace_socket_paths: Vec::new(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ConfigOpt {
    #[serde(default)]
    pub master_agent: MasterAgentOpt,
    #[serde(default)]
    pub update: UpdateOpt,
    #[serde(default)]
    pub log: LogOpt,
    #[serde(default)]
    pub backend: BackendOpt,
}

/// Loads the TOML file at `cli.config` if it exists (a missing file is not an error — every
/// field defaults), then overlays the CLI flags on top.
pub fn from_args() -> Result<ConfigOpt> {
    let cli = CliOpt::from_args();
    let mut config = if cli.config.exists() {
        let content = fs::read_to_string(&cli.config)
            .with_context(|| format!("reading config file {}", cli.config.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", cli.config.display()))?
    } else {
        ConfigOpt::default()
    };

    if let Some(host) = cli.host {
        config.master_agent.host = Some(host);
    }
    if let Some(port) = cli.port {
        config.master_agent.port = Some(port);
    }
    if let Some(path) = cli.unix_socket_path {
        config.master_agent.unix_socket_path = Some(path.to_string_lossy().into_owned());
    }
    if let Some(debug) = cli.debug {
        config.log.level = debug_level_to_filter(debug).to_string();
    } else if config.log.level.is_empty() {
        config.log.level = "info".to_string();
    }
    if let Some(frequency) = cli.frequency {
        config.update.frequency_secs = frequency;
    }
    if cli.enable_dynamic_frequency {
        config.update.enable_dynamic_frequency = true;
    }

    Ok(config)
}

fn debug_level_to_filter(debug: u8) -> &'static str {
    match debug {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}
