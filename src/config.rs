use std::{collections::HashMap, fs::read_to_string, path::PathBuf};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(version)]
struct Cli {
    /// gateway configuration file path.
    ///
    /// the configuration file is in json5 format; when no path is given
    /// every section falls back to its defaults.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Log {
    /// log level
    ///
    /// An optional property of the log, this value defaults to "info".
    #[serde(default = "Log::level")]
    pub level: LogLevel,
}

impl Log {
    fn level() -> LogLevel {
        LogLevel::Info
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: Self::level(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Gateway {
    /// production mode
    ///
    /// in production mode, fault descriptions and diagnostics are
    /// stripped from client-visible error messages and only the fault
    /// code travels to the caller.
    #[serde(default)]
    pub production: bool,
}

/// A statically configured account.
#[derive(Deserialize, Debug, Clone)]
pub struct User {
    pub userid: String,
    pub password: String,
    /// the ACL role assumed after authentication.
    pub role: String,
    /// an optional session token echoed to LOGIN commands.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Role {
    pub id: String,
    /// parent roles, in priority order; the last entry wins conflicts.
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Allow,
    Deny,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Rule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// affected roles; omitted means all roles.
    #[serde(default)]
    pub roles: Option<Vec<String>>,
    /// affected resources; omitted means all resources.
    #[serde(default)]
    pub resources: Option<Vec<String>>,
    /// affected privileges; omitted means all privileges.
    #[serde(default)]
    pub privileges: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default)]
pub struct AclConfig {
    /// whether dispatch consults the ACL at all.
    ///
    /// the engine is a whitelist, so enabling it with no rules denies
    /// every call.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub gateway: Gateway,
    /// wire class alias to server class id mappings.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub acl: AclConfig,
}

impl Config {
    pub fn load() -> Result<Self> {
        let source = Cli::parse()
            .config
            .map(read_to_string)
            .transpose()?
            .unwrap_or_default();

        Self::parse(&source)
    }

    pub fn parse(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_json5::from_str(source)?)
    }
}
