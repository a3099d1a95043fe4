//! Server configuration — a JSON file loaded once at startup and treated
//! as immutable afterwards.
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ident;

/// Default capacity for the bounded message queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

/// A password for an operator directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Password {
    #[serde(rename = "type")]
    pub kind: String,
    pub pass: String,
}

/// An operator configuration directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Oper {
    pub name: String,
    pub password: Password,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A user/server connection class directive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Class {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Configuration for a remote server link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// A ports directive: a port range and whether it expects TLS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ports {
    #[serde(default)]
    pub ssl: bool,
    pub port: String,
}

/// Errors from the port-range grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortRangeError {
    #[error("invalid port range {0:?}: more than two endpoints")]
    TooManyEndpoints(String),
    #[error("invalid port range {0:?}: inverted range")]
    Inverted(String),
    #[error("invalid port range {0:?}: non-numeric bound")]
    NonNumeric(String),
}

impl Ports {
    /// Expand the range(s) in this directive. Understood formats:
    ///   6667           a single port
    ///   6666-6669      a port range
    ///   6666-6669,6697 comma-separated ranges
    pub fn port_list(&self) -> Result<Vec<u16>, PortRangeError> {
        let mut ports = Vec::new();
        for range in self.port.split(',') {
            let range = range.trim();
            let bounds: Vec<&str> = range.split('-').collect();
            if bounds.len() > 2 {
                return Err(PortRangeError::TooManyEndpoints(range.to_owned()));
            }
            let low: u16 = bounds[0]
                .parse()
                .map_err(|_| PortRangeError::NonNumeric(range.to_owned()))?;
            if bounds.len() == 1 {
                ports.push(low);
                continue;
            }
            let high: u16 = bounds[1]
                .parse()
                .map_err(|_| PortRangeError::NonNumeric(range.to_owned()))?;
            if low > high {
                return Err(PortRangeError::Inverted(range.to_owned()));
            }
            ports.extend(low..=high);
        }
        Ok(ports)
    }
}

/// Configuration for the network this server runs on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub desc: String,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Errors loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid server name {0:?}: must match \\w+(\\.\\w+)+")]
    BadName(String),
    #[error("invalid server id {0:?}: must match [0-9][0-9A-Z]{{2}}")]
    BadSid(String),
    #[error("no operators defined: at least one required")]
    NoOperators,
}

/// The full server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    pub sid: String,
    pub admin: String,
    pub network: Network,
    pub ports: Vec<Ports>,
    #[serde(default)]
    pub classes: Vec<Class>,
    pub operators: Vec<Oper>,
    #[serde(default = "default_queue_depth")]
    pub sendq: usize,
    #[serde(default = "default_queue_depth")]
    pub recvq: usize,
}

impl Config {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse from a JSON string.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Validate the loaded configuration.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !ident::valid_server_name(&self.name) {
            return Err(ConfigError::BadName(self.name.clone()));
        }
        if !ident::valid_sid(&self.sid) {
            return Err(ConfigError::BadSid(self.sid.clone()));
        }
        if self.operators.is_empty() {
            return Err(ConfigError::NoOperators);
        }
        Ok(())
    }

    /// A suitable default configuration on which an admin should base
    /// their own.
    pub fn default_config() -> Self {
        Config {
            name: "shoal.local".into(),
            sid: "8SH".into(),
            admin: "Foo Bar [foo@bar.com]".into(),
            network: Network {
                name: "ShoalNet".into(),
                desc: "An unconfigured IRC network.".into(),
                links: vec![Link {
                    name: "shoal2.local".into(),
                    hosts: vec!["shoal2.localdomain.local".into(), "127.0.0.1".into()],
                    flags: vec!["leaf".into()],
                }],
            },
            ports: vec![
                Ports {
                    ssl: false,
                    port: "6666-6669".into(),
                },
                Ports {
                    ssl: true,
                    port: "6696-6699,9999".into(),
                },
            ],
            classes: vec![Class {
                name: "users".into(),
                hosts: vec!["*".into()],
                flags: vec!["noident".into()],
            }],
            operators: vec![Oper {
                name: "god".into(),
                password: Password {
                    kind: "plain".into(),
                    pass: "shoal".into(),
                },
                hosts: vec!["127.0.0.1".into()],
                flags: vec!["admin".into(), "oper".into()],
            }],
            sendq: DEFAULT_QUEUE_DEPTH,
            recvq: DEFAULT_QUEUE_DEPTH,
        }
    }
}
