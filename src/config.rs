//! Configuration management for the pool integration harness
//!
//! Two layers: the command line (with environment-variable fallbacks) sets
//! how the harness behaves, and the `.env` file describes the deployment
//! under test. The `.env` file is resolved once into a [`HarnessEnv`] that
//! is handed to every component explicitly.

use crate::poller::PollBudget;
use crate::scenario::ScenarioKind;
use crate::{ConnectionEndpoint, Error, NetType, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Host the pool and its web UI are reached on
pub const POOL_HOST: &str = "127.0.0.1";

/// Keys every `.env` file must define
pub const REQUIRED_KEYS: [&str; 12] = [
    "monerod_ip",
    "monerod_rpc_port",
    "wallet_rpc_ip",
    "wallet_rpc_port",
    "wallet_file",
    "wallet_password",
    "nettype",
    "test_pool_port",
    "test_pool_webui_port",
    "test_pool_wallet_address",
    "test_pool_fee_wallet_address",
    "test_build_dir",
];

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Harness subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run scenarios (all of them when none are named)
    Run {
        #[arg(value_enum)]
        scenarios: Vec<ScenarioKind>,
    },
    /// List available scenarios
    List,
    /// Validate the environment file and exit
    CheckEnv,
    /// Print the resolved environment as YAML
    PrintConfig,
}

/// Command-line configuration
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pool-integ",
    version = env!("CARGO_PKG_VERSION"),
    about = "Mining pool integration harness",
    long_about = "Checks a running mining pool, its daemon, wallet RPC and mining client through their network interfaces"
)]
pub struct Config {
    /// Environment file describing the deployment under test
    #[arg(long, env = "POOL_INTEG_ENV_FILE", default_value = "tools/local/.env")]
    pub env_file: PathBuf,

    /// Log level (overridden by RUST_LOG)
    #[arg(short = 'l', long, default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Attempts the block-found poll may use
    #[arg(long, env = "POOL_INTEG_POLL_ATTEMPTS", default_value = "60")]
    pub poll_attempts: u32,

    /// Delay between block-found poll attempts
    #[arg(long, env = "POOL_INTEG_POLL_DELAY", default_value = "60s", value_parser = humantime::parse_duration)]
    pub poll_delay: Duration,

    /// Bound on each network operation
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub io_timeout: Duration,

    /// How long the mining client runs before live statistics are read
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    pub mining_warmup: Duration,

    /// Blocks the login job height may trail or lead the daemon by
    #[arg(long, default_value = "1")]
    pub height_window: u64,

    /// Mining client binary
    #[arg(long, env = "POOL_INTEG_XMRIG", default_value = "xmrig")]
    pub xmrig: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Config {
    /// Behavioral settings for the scenario runner
    pub fn settings(&self) -> Result<HarnessSettings> {
        Ok(HarnessSettings {
            poll_budget: PollBudget::new(self.poll_attempts, self.poll_delay)?,
            io_timeout: self.io_timeout,
            mining_warmup: self.mining_warmup,
            height_window: self.height_window,
        })
    }
}

/// Scenario runner knobs that do not come from the `.env` file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessSettings {
    pub poll_budget: PollBudget,
    pub io_timeout: Duration,
    pub mining_warmup: Duration,
    pub height_window: u64,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            poll_budget: PollBudget::default(),
            io_timeout: Duration::from_secs(10),
            mining_warmup: Duration::from_secs(60),
            height_window: 1,
        }
    }
}

/// Raw `key="value"` pairs from an environment file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: BTreeMap<String, String>,
}

impl EnvFile {
    /// Read and parse an environment file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::config(format!("Failed to read env file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse `key="value"` lines; blank lines and `#` comments are skipped
    pub fn parse(content: &str) -> Result<Self> {
        let entries = dotenvy::from_read_iter(content.as_bytes())
            .collect::<std::result::Result<BTreeMap<_, _>, _>>()
            .map_err(|e| Error::config(format!("Malformed env file: {}", e)))?;
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Value of a required key
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("env file is missing `{}`", key)))
    }

    /// Value of a required key parsed as a port
    pub fn require_port(&self, key: &str) -> Result<u16> {
        let raw = self.require(key)?;
        match raw.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(Error::config(format!(
                "`{}` must be a port in 1..=65535, got {:?}",
                key, raw
            ))),
        }
    }
}

/// Outcome of an address format check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FormatCheck {
    /// A literal IP address
    Valid,
    /// Not an IP literal; accepted without checking (hostnames resolve at connect time)
    Unchecked(String),
}

impl fmt::Display for FormatCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatCheck::Valid => write!(f, "valid IP address"),
            FormatCheck::Unchecked(value) => write!(f, "format unchecked ({:?})", value),
        }
    }
}

/// Classify a host value without rejecting it
pub fn check_ip_format(key: &str, value: &str) -> FormatCheck {
    if value.parse::<IpAddr>().is_ok() {
        FormatCheck::Valid
    } else {
        warn!("`{}` = {:?} is not an IP address; format unchecked", key, value);
        FormatCheck::Unchecked(value.to_string())
    }
}

/// Resolved, validated description of the deployment under test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HarnessEnv {
    pub daemon: ConnectionEndpoint,
    pub wallet_rpc: ConnectionEndpoint,
    pub wallet_file: String,
    #[serde(serialize_with = "redact")]
    pub wallet_password: String,
    pub nettype: NetType,
    pub pool: ConnectionEndpoint,
    pub webui: ConnectionEndpoint,
    pub pool_wallet_address: String,
    pub fee_wallet_address: String,
    pub build_dir: PathBuf,
}

fn redact<S: Serializer>(_: &String, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str("********")
}

impl HarnessEnv {
    /// Load and validate an environment file
    pub async fn load(path: &Path) -> Result<Self> {
        let file = EnvFile::load(path).await?;
        Self::from_env_file(&file)
    }

    /// Validate raw pairs into typed configuration
    pub fn from_env_file(file: &EnvFile) -> Result<Self> {
        for key in REQUIRED_KEYS {
            file.require(key)?;
        }

        let build_dir = PathBuf::from(file.require("test_build_dir")?);
        check_build_dir(&build_dir)?;

        Ok(Self {
            daemon: ConnectionEndpoint::new(
                file.require("monerod_ip")?,
                file.require_port("monerod_rpc_port")?,
            )?,
            wallet_rpc: ConnectionEndpoint::new(
                file.require("wallet_rpc_ip")?,
                file.require_port("wallet_rpc_port")?,
            )?,
            wallet_file: file.require("wallet_file")?.to_string(),
            wallet_password: file.require("wallet_password")?.to_string(),
            nettype: file.require("nettype")?.parse()?,
            pool: ConnectionEndpoint::new(POOL_HOST, file.require_port("test_pool_port")?)?,
            webui: ConnectionEndpoint::new(POOL_HOST, file.require_port("test_pool_webui_port")?)?,
            pool_wallet_address: file.require("test_pool_wallet_address")?.to_string(),
            fee_wallet_address: file.require("test_pool_fee_wallet_address")?.to_string(),
            build_dir,
        })
    }

    /// IP format of the daemon and wallet RPC hosts
    pub fn host_format_checks(&self) -> [(&'static str, FormatCheck); 2] {
        [
            ("monerod_ip", check_ip_format("monerod_ip", self.daemon.host())),
            (
                "wallet_rpc_ip",
                check_ip_format("wallet_rpc_ip", self.wallet_rpc.host()),
            ),
        ]
    }
}

/// The build directory itself may not exist yet, but its parent must
pub fn check_build_dir(build_dir: &Path) -> Result<()> {
    let parent = match build_dir.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => {
            return Err(Error::config(format!(
                "test_build_dir {} has no parent directory",
                build_dir.display()
            )))
        }
    };
    if parent.is_dir() {
        Ok(())
    } else {
        Err(Error::config(format!(
            "parent of test_build_dir does not exist: {}",
            parent.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn env_content(build_dir: &Path) -> String {
        format!(
            r#"monerod_ip="127.0.0.1"
monerod_rpc_port="38081"
wallet_rpc_ip="localhost"
wallet_rpc_port="38083"
wallet_file="pool-wallet"
wallet_password="p=ss"
nettype="stagenet"
test_pool_port="4242"
test_pool_webui_port="4243"
test_pool_wallet_address="55pool"
test_pool_fee_wallet_address="55fee"
test_build_dir="{}"
"#,
            build_dir.display()
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::try_parse_from(["pool-integ"]).unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.poll_attempts, 60);
        assert_eq!(config.poll_delay, Duration::from_secs(60));
        assert_eq!(config.height_window, 1);
        assert!(config.command.is_none());
    }

    #[test]
    fn test_run_subcommand_with_scenarios() {
        let config = Config::try_parse_from([
            "pool-integ",
            "--poll-delay",
            "5s",
            "run",
            "login",
            "webui-stats",
        ])
        .unwrap();
        assert_eq!(config.poll_delay, Duration::from_secs(5));
        match config.command {
            Some(Command::Run { scenarios }) => {
                assert_eq!(scenarios, vec![ScenarioKind::Login, ScenarioKind::WebuiStats])
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_zero_poll_attempts_rejected() {
        let config = Config::try_parse_from(["pool-integ", "--poll-attempts", "0"]).unwrap();
        assert_matches!(config.settings(), Err(Error::Configuration { .. }));
    }

    #[test]
    fn test_env_file_parsing() {
        let file = EnvFile::parse("a=\"1\"\n\n# comment\nb=two\npassword=\"x=y\"\n").unwrap();
        assert_eq!(file.get("a"), Some("1"));
        assert_eq!(file.get("b"), Some("two"));
        assert_eq!(file.get("password"), Some("x=y"));
        assert_eq!(file.get("c"), None);

        assert_matches!(EnvFile::parse("novalue\n"), Err(Error::Configuration { .. }));
    }

    #[test]
    fn test_env_file_quoting_styles() {
        let file = EnvFile::parse("export nettype=stagenet\nwallet_file='pool wallet'\nempty=\"\"\n")
            .unwrap();
        assert_eq!(file.get("nettype"), Some("stagenet"));
        assert_eq!(file.get("wallet_file"), Some("pool wallet"));
        assert_eq!(file.get("empty"), Some(""));
    }

    #[test]
    fn test_require_port() {
        let file = EnvFile::parse("p=\"4242\"\nz=\"0\"\nbig=\"70000\"\nword=\"abc\"").unwrap();
        assert_eq!(file.require_port("p").unwrap(), 4242);
        assert!(file.require_port("z").is_err());
        assert!(file.require_port("big").is_err());
        assert!(file.require_port("word").is_err());
        assert!(file.require_port("missing").is_err());
    }

    #[tokio::test]
    async fn test_harness_env_from_file() {
        let dir = TempDir::new().unwrap();
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", env_content(&dir.path().join("build"))).unwrap();

        let env = HarnessEnv::load(temp_file.path()).await.unwrap();

        assert_eq!(env.daemon.authority(), "127.0.0.1:38081");
        assert_eq!(env.pool.authority(), "127.0.0.1:4242");
        assert_eq!(env.webui.port(), 4243);
        assert_eq!(env.nettype, NetType::Stagenet);
        assert_eq!(env.wallet_password, "p=ss");
        assert_eq!(env.fee_wallet_address, "55fee");

        let checks = env.host_format_checks();
        assert_eq!(checks[0].1, FormatCheck::Valid);
        assert_eq!(checks[1].1, FormatCheck::Unchecked("localhost".to_string()));
    }

    #[test]
    fn test_missing_key_named() {
        let dir = TempDir::new().unwrap();
        let content = env_content(&dir.path().join("build")).replace("nettype=\"stagenet\"\n", "");
        let err = HarnessEnv::from_env_file(&EnvFile::parse(&content).unwrap()).unwrap_err();
        assert_matches!(err, Error::Configuration { ref message } if message.contains("nettype"));
    }

    #[test]
    fn test_bad_nettype_rejected() {
        let dir = TempDir::new().unwrap();
        let content = env_content(&dir.path().join("build")).replace("stagenet", "regtest");
        assert!(HarnessEnv::from_env_file(&EnvFile::parse(&content).unwrap()).is_err());
    }

    #[test]
    fn test_build_dir_parent_must_exist() {
        let dir = TempDir::new().unwrap();
        assert!(check_build_dir(&dir.path().join("build")).is_ok());
        assert!(check_build_dir(&dir.path().join("nope").join("build")).is_err());
        assert!(check_build_dir(Path::new("build")).is_ok());
    }

    #[test]
    fn test_print_config_redacts_password() {
        let dir = TempDir::new().unwrap();
        let env =
            HarnessEnv::from_env_file(&EnvFile::parse(&env_content(&dir.path().join("b"))).unwrap())
                .unwrap();
        let yaml = serde_yaml::to_string(&env).unwrap();
        assert!(yaml.contains("********"));
        assert!(!yaml.contains("p=ss"));
        assert!(yaml.contains("stagenet"));
    }
}
