//! JSON-RPC clients for the daemon and the wallet RPC service
//!
//! Only the handful of calls the scenarios need: the daemon's chain height
//! and the wallet's primary address and balance.

use crate::{ConnectionEndpoint, Error, Result};
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Atomic units per XMR
pub const ATOMIC_UNITS_PER_XMR: u64 = 1_000_000_000_000;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<Value>,
}

/// Shared JSON-RPC transport over `POST /json_rpc`
#[derive(Debug, Clone)]
struct JsonRpc {
    client: Client,
    url: Url,
}

impl JsonRpc {
    fn new(endpoint: &ConnectionEndpoint, timeout: Duration) -> Result<Self> {
        let url = Url::parse(&endpoint.http_base())
            .and_then(|base| base.join("json_rpc"))
            .map_err(|e| Error::config(format!("Invalid RPC URL for {}: {}", endpoint, e)))?;
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(Error::from)?;
        Ok(Self { client, url })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        debug!("JSON-RPC {} -> {}", method, self.url);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::from_http(method, e))?;

        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "{}: HTTP {}",
                method,
                response.status()
            )));
        }

        let body: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("{}: undecodable reply: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(Error::protocol(format!("{} returned error {}", method, error)));
        }
        body.result
            .ok_or_else(|| Error::protocol(format!("{} reply has no result", method)))
    }
}

/// Blockchain daemon RPC
#[derive(Debug, Clone)]
pub struct DaemonRpc {
    rpc: JsonRpc,
}

#[derive(Debug, Deserialize)]
struct BlockCount {
    count: u64,
}

impl DaemonRpc {
    pub fn new(endpoint: &ConnectionEndpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpc::new(endpoint, timeout)?,
        })
    }

    /// Number of blocks in the daemon's main chain
    #[instrument(skip(self))]
    pub async fn get_block_count(&self) -> Result<u64> {
        let reply: BlockCount = self.rpc.call("get_block_count", None).await?;
        Ok(reply.count)
    }
}

/// Balance held by a wallet, in atomic units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Balance {
    pub atomic: u64,
    pub unlocked_atomic: u64,
}

impl Balance {
    /// Whole-coin amount with twelve decimal places
    pub fn to_decimal_string(atomic: u64) -> String {
        format!(
            "{}.{:012}",
            atomic / ATOMIC_UNITS_PER_XMR,
            atomic % ATOMIC_UNITS_PER_XMR
        )
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} XMR ({} unlocked)",
            Self::to_decimal_string(self.atomic),
            Self::to_decimal_string(self.unlocked_atomic)
        )
    }
}

#[derive(Debug, Deserialize)]
struct AddressReply {
    address: String,
}

#[derive(Debug, Deserialize)]
struct BalanceReply {
    balance: u64,
    unlocked_balance: u64,
}

/// Wallet RPC service
#[derive(Debug, Clone)]
pub struct WalletRpc {
    rpc: JsonRpc,
}

impl WalletRpc {
    pub fn new(endpoint: &ConnectionEndpoint, timeout: Duration) -> Result<Self> {
        Ok(Self {
            rpc: JsonRpc::new(endpoint, timeout)?,
        })
    }

    /// Primary address of account 0
    #[instrument(skip(self))]
    pub async fn get_address(&self) -> Result<String> {
        let reply: AddressReply = self
            .rpc
            .call("get_address", Some(serde_json::json!({ "account_index": 0 })))
            .await?;
        Ok(reply.address)
    }

    /// Balance of account 0
    #[instrument(skip(self))]
    pub async fn get_balance(&self) -> Result<Balance> {
        let reply: BalanceReply = self
            .rpc
            .call("get_balance", Some(serde_json::json!({ "account_index": 0 })))
            .await?;
        Ok(Balance {
            atomic: reply.balance,
            unlocked_atomic: reply.unlocked_balance,
        })
    }
}
