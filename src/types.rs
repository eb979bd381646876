//! Core types shared by the harness components
//!
//! Endpoints, the login request/response wire shapes and the poll outcome.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Host and port of a collaborator service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionEndpoint {
    host: String,
    port: u16,
}

impl ConnectionEndpoint {
    /// Create a new endpoint, rejecting an empty host and port 0
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::config("Endpoint host must not be empty"));
        }
        if port == 0 {
            return Err(Error::config(format!(
                "Endpoint port for {} must be in 1..=65535",
                host
            )));
        }
        Ok(Self { host, port })
    }

    /// Host part
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port part
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` string suitable for `TcpStream::connect`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Plain-HTTP base URL for this endpoint
    pub fn http_base(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

impl fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Network type of the daemon the pool is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetType {
    Mainnet,
    Stagenet,
    Testnet,
}

impl FromStr for NetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mainnet" => Ok(NetType::Mainnet),
            "stagenet" => Ok(NetType::Stagenet),
            "testnet" => Ok(NetType::Testnet),
            other => Err(Error::config(format!(
                "nettype must be one of mainnet, stagenet, testnet; got {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for NetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetType::Mainnet => write!(f, "mainnet"),
            NetType::Stagenet => write!(f, "stagenet"),
            NetType::Testnet => write!(f, "testnet"),
        }
    }
}

/// Parameters of the `login` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginParams {
    /// Wallet address to credit
    pub login: String,
    /// Difficulty directive, e.g. `d=300000`
    pub pass: String,
    pub agent: String,
    #[serde(rename = "rigid")]
    pub rig_id: String,
    #[serde(rename = "algo")]
    pub algorithms: Vec<String>,
}

/// Login request frame sent by a mining client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    pub params: LoginParams,
}

impl LoginRequest {
    pub const PROTOCOL_VERSION: &'static str = "2.0";
    pub const METHOD: &'static str = "login";

    /// Build a fresh request with id 1
    pub fn new(params: LoginParams) -> Self {
        Self {
            id: 1,
            jsonrpc: Self::PROTOCOL_VERSION.to_string(),
            method: Self::METHOD.to_string(),
            params,
        }
    }

    /// Serialize into a single newline-terminated frame
    pub fn to_frame(&self) -> Result<Vec<u8>> {
        let mut frame = serde_json::to_vec(self)?;
        frame.push(b'\n');
        Ok(frame)
    }
}

/// First job handed out in a login response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub blob: String,
    pub job_id: String,
    pub target: String,
    pub height: u64,
    pub seed_hash: String,
    pub next_seed_hash: String,
}

impl JobDescriptor {
    /// The six keys every job object must carry
    pub const KEYS: [&'static str; 6] = [
        "blob",
        "job_id",
        "target",
        "height",
        "seed_hash",
        "next_seed_hash",
    ];
}

/// `result` member of a successful login response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResult {
    pub id: String,
    pub job: JobDescriptor,
    pub status: String,
}

/// Typed login response, produced only after the handshake contract holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub id: i64,
    pub jsonrpc: String,
    pub error: Option<Value>,
    pub result: LoginResult,
}

/// Outcome of one convergence poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollResult {
    pub succeeded: bool,
    /// Counter value captured before the first attempt
    pub baseline: i64,
    pub final_value: i64,
    pub attempts_used: u32,
}

impl PollResult {
    /// Turn an unsuccessful poll into a convergence timeout for `key`
    pub fn ensure_advanced(self, key: &str) -> Result<i64> {
        if self.succeeded {
            Ok(self.final_value)
        } else {
            Err(Error::ConvergenceTimeout {
                key: key.to_string(),
                baseline: self.baseline,
                last: self.final_value,
                attempts: self.attempts_used,
            })
        }
    }
}
