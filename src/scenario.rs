//! End-to-end scenarios against a running pool deployment
//!
//! Each scenario builds its own clients from the shared read-only
//! [`HarnessEnv`], stops at the first failed check and reports a single
//! outcome. Scenarios share no mutable state, so they may run in any order
//! or alone.

use crate::client::WebUiClient;
use crate::config::{check_build_dir, FormatCheck, HarnessEnv, HarnessSettings};
use crate::miner::{MinerLauncher, MinerSpec, XmrigLauncher, RIG_ID};
use crate::poller::{ConvergencePoller, Sleeper, StatsCounter, TokioSleeper};
use crate::rpc::{DaemonRpc, WalletRpc};
use crate::schema::{describe, Schema};
use crate::stratum::StratumClient;
use crate::{Error, LoginParams, NetType, Result};
use clap::ValueEnum;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

/// Agent string sent on login
pub const LOGIN_AGENT: &str = "monero-pool integration test";
/// Rig id sent on login
pub const LOGIN_RIG_ID: &str = "monero-pool_int_test";
/// Difficulty directive for the login handshake and block mining
pub const BLOCK_DIFFICULTY: u64 = 300_000;
/// Difficulty the live-statistics scenario mines at
pub const LIVE_DIFFICULTY: u64 = 1_000;
/// Counter that advances when the pool finds a block
pub const BLOCKS_FOUND_KEY: &str = "pool_blocks_found";

/// Named scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum ScenarioKind {
    /// Environment file is complete and well-formed
    Env,
    /// Wallet RPC reports the pool wallet and a balance
    WalletRpc,
    /// Login handshake yields a well-formed first job at the daemon height
    Login,
    /// Aggregate /stats payload schema with empty hashrate history
    WebuiStats,
    /// /stats scoped to the fee wallet
    WebuiStatsWallet,
    /// Landing page is served as HTML
    WebuiPoolPage,
    /// /workers is a JSON list
    WebuiWorkers,
    /// A running miner shows up in live statistics
    ActualMining,
    /// The pool finds a block within the poll budget
    MineBlock,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 9] = [
        ScenarioKind::Env,
        ScenarioKind::WalletRpc,
        ScenarioKind::Login,
        ScenarioKind::WebuiStats,
        ScenarioKind::WebuiStatsWallet,
        ScenarioKind::WebuiPoolPage,
        ScenarioKind::WebuiWorkers,
        ScenarioKind::ActualMining,
        ScenarioKind::MineBlock,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioKind::Env => "env",
            ScenarioKind::WalletRpc => "wallet-rpc",
            ScenarioKind::Login => "login",
            ScenarioKind::WebuiStats => "webui-stats",
            ScenarioKind::WebuiStatsWallet => "webui-stats-wallet",
            ScenarioKind::WebuiPoolPage => "webui-pool-page",
            ScenarioKind::WebuiWorkers => "webui-workers",
            ScenarioKind::ActualMining => "actual-mining",
            ScenarioKind::MineBlock => "mine-block",
        }
    }

    /// Whether the scenario starts a mining client
    pub fn needs_miner(&self) -> bool {
        matches!(self, ScenarioKind::ActualMining | ScenarioKind::MineBlock)
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one scenario
#[derive(Debug)]
pub enum Outcome {
    Passed(String),
    Skipped(String),
    Failed(Error),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}

/// Scenario outcome with timing
#[derive(Debug)]
pub struct ScenarioReport {
    pub kind: ScenarioKind,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

enum Verdict {
    Passed(String),
    Skipped(String),
}

/// Runs scenarios against one deployment
pub struct ScenarioRunner<L = XmrigLauncher, S = TokioSleeper> {
    env: HarnessEnv,
    settings: HarnessSettings,
    launcher: L,
    sleeper: S,
}

impl ScenarioRunner<XmrigLauncher, TokioSleeper> {
    pub fn new(env: HarnessEnv, settings: HarnessSettings, launcher: XmrigLauncher) -> Self {
        Self::with_collaborators(env, settings, launcher, TokioSleeper)
    }
}

impl<L, S> ScenarioRunner<L, S>
where
    L: MinerLauncher,
    S: Sleeper + Clone,
{
    pub fn with_collaborators(
        env: HarnessEnv,
        settings: HarnessSettings,
        launcher: L,
        sleeper: S,
    ) -> Self {
        Self {
            env,
            settings,
            launcher,
            sleeper,
        }
    }

    pub fn env(&self) -> &HarnessEnv {
        &self.env
    }

    /// Run scenarios in the given order; every one runs even if an earlier one failed
    pub async fn run_all(&self, kinds: &[ScenarioKind]) -> Vec<ScenarioReport> {
        let mut reports = Vec::with_capacity(kinds.len());
        for kind in kinds {
            reports.push(self.run(*kind).await);
        }
        reports
    }

    /// Run one scenario
    pub async fn run(&self, kind: ScenarioKind) -> ScenarioReport {
        let span = info_span!("scenario", name = kind.name());
        let started = Instant::now();

        let outcome = match self.dispatch(kind).instrument(span.clone()).await {
            Ok(Verdict::Passed(detail)) => {
                span.in_scope(|| info!("PASS {}: {}", kind, detail));
                Outcome::Passed(detail)
            }
            Ok(Verdict::Skipped(reason)) => {
                span.in_scope(|| warn!("SKIP {}: {}", kind, reason));
                Outcome::Skipped(reason)
            }
            Err(e) => {
                span.in_scope(|| error!(category = e.category(), "FAIL {}: {}", kind, e));
                Outcome::Failed(e)
            }
        };

        ScenarioReport {
            kind,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    async fn dispatch(&self, kind: ScenarioKind) -> Result<Verdict> {
        match kind {
            ScenarioKind::Env => self.env_check(),
            ScenarioKind::WalletRpc => self.wallet_rpc().await,
            ScenarioKind::Login => self.login().await,
            ScenarioKind::WebuiStats => self.webui_stats().await,
            ScenarioKind::WebuiStatsWallet => self.webui_stats_wallet().await,
            ScenarioKind::WebuiPoolPage => self.webui_pool_page().await,
            ScenarioKind::WebuiWorkers => self.webui_workers().await,
            ScenarioKind::ActualMining => self.actual_mining().await,
            ScenarioKind::MineBlock => self.mine_block().await,
        }
    }

    fn webui(&self) -> Result<WebUiClient> {
        WebUiClient::new(&self.env.webui, self.settings.io_timeout)
    }

    fn env_check(&self) -> Result<Verdict> {
        check_build_dir(&self.env.build_dir)?;

        let unchecked: Vec<String> = self
            .env
            .host_format_checks()
            .into_iter()
            .filter_map(|(key, check)| match check {
                FormatCheck::Valid => None,
                unchecked => Some(format!("{} {}", key, unchecked)),
            })
            .collect();

        let mut detail = format!(
            "{} on {}, pool {} / web UI {}",
            self.env.nettype, self.env.daemon, self.env.pool, self.env.webui
        );
        if !unchecked.is_empty() {
            detail.push_str("; ");
            detail.push_str(&unchecked.join(", "));
        }
        Ok(Verdict::Passed(detail))
    }

    async fn wallet_rpc(&self) -> Result<Verdict> {
        let wallet = WalletRpc::new(&self.env.wallet_rpc, self.settings.io_timeout)?;

        let address = wallet.get_address().await?;
        if address != self.env.pool_wallet_address {
            return Err(Error::assertion(
                "wallet RPC address",
                &self.env.pool_wallet_address,
                &address,
            ));
        }

        let balance = wallet.get_balance().await?;
        Ok(Verdict::Passed(format!("wallet {} holds {}", address, balance)))
    }

    async fn login(&self) -> Result<Verdict> {
        let client =
            StratumClient::new(self.env.pool.clone()).with_io_timeout(self.settings.io_timeout);
        let params = LoginParams {
            login: self.env.fee_wallet_address.clone(),
            pass: format!("d={}", BLOCK_DIFFICULTY),
            agent: LOGIN_AGENT.to_string(),
            rig_id: LOGIN_RIG_ID.to_string(),
            algorithms: vec!["rx/0".to_string()],
        };

        let response = client.login_checked(params).await?;
        let job_height = response.result.job.height;

        let daemon = DaemonRpc::new(&self.env.daemon, self.settings.io_timeout)?;
        let chain_height = daemon.get_block_count().await?;

        if job_height.abs_diff(chain_height) > self.settings.height_window {
            return Err(Error::assertion(
                format!(
                    "result.job.height within {} of daemon height",
                    self.settings.height_window
                ),
                chain_height,
                job_height,
            ));
        }

        Ok(Verdict::Passed(format!(
            "job {} at height {} (daemon {})",
            response.result.job.job_id, job_height, chain_height
        )))
    }

    async fn webui_stats(&self) -> Result<Verdict> {
        let stats = self.webui()?.get_stats(None).await?;
        Schema::idle_stats().validate(&stats)?;
        Ok(Verdict::Passed(format!(
            "network height {}, {} blocks found",
            stats["network_height"], stats[BLOCKS_FOUND_KEY]
        )))
    }

    async fn webui_stats_wallet(&self) -> Result<Verdict> {
        let stats = self
            .webui()?
            .get_stats(Some(&self.env.fee_wallet_address))
            .await?;
        Schema::stats().validate(&stats)?;
        Ok(Verdict::Passed(format!(
            "miner balance {}",
            stats["miner_balance"]
        )))
    }

    async fn webui_pool_page(&self) -> Result<Verdict> {
        let page = self.webui()?.get_pool_page().await?;
        Ok(Verdict::Passed(format!("{} bytes of HTML", page.len())))
    }

    async fn webui_workers(&self) -> Result<Verdict> {
        let workers = self.webui()?.get_workers().await?;
        Ok(Verdict::Passed(format!("{} workers listed", workers.len())))
    }

    async fn actual_mining(&self) -> Result<Verdict> {
        let spec = MinerSpec::new(
            self.env.fee_wallet_address.clone(),
            self.env.pool.clone(),
            LIVE_DIFFICULTY,
            self.env.build_dir.clone(),
        );
        let webui = self.webui()?;

        let handle = self.launcher.start(&spec).await?;
        info!("Letting {} mine for {:?}", RIG_ID, self.settings.mining_warmup);
        self.sleeper.sleep(self.settings.mining_warmup).await;
        let observed = webui.get_stats(Some(&spec.wallet)).await;
        let stopped = self.launcher.stop(handle).await;

        let stats = observed?;
        stopped?;

        Schema::stats().validate(&stats)?;
        for key in ["worker_count", "connected_miners", "miner_hashrate"] {
            require_positive(&stats, key)?;
        }

        Ok(Verdict::Passed(format!(
            "{} workers, miner hashrate {}",
            stats["worker_count"], stats["miner_hashrate"]
        )))
    }

    async fn mine_block(&self) -> Result<Verdict> {
        if self.env.nettype == NetType::Mainnet {
            return Ok(Verdict::Skipped(
                "Do not try mining a block on mainnet".to_string(),
            ));
        }

        let spec = MinerSpec::new(
            self.env.fee_wallet_address.clone(),
            self.env.pool.clone(),
            BLOCK_DIFFICULTY,
            self.env.build_dir.clone(),
        );
        let counter = StatsCounter::new(self.webui()?, BLOCKS_FOUND_KEY);
        let poller =
            ConvergencePoller::with_sleeper(self.settings.poll_budget, self.sleeper.clone());

        let handle = self.launcher.start(&spec).await?;
        let polled = poller.poll_until_advanced(&counter).await;
        let stopped = self.launcher.stop(handle).await;

        let result = polled?;
        stopped?;

        let found = result.ensure_advanced(BLOCKS_FOUND_KEY)?;
        Ok(Verdict::Passed(format!(
            "{} went {} -> {} after {} attempts",
            BLOCKS_FOUND_KEY, result.baseline, found, result.attempts_used
        )))
    }
}

fn require_positive(stats: &Value, key: &str) -> Result<()> {
    let value = stats
        .get(key)
        .ok_or_else(|| Error::schema(key, "integer", "missing"))?;
    match value.as_i64() {
        Some(n) if n > 0 => Ok(()),
        Some(n) => Err(Error::assertion(key, "> 0", n)),
        None => Err(Error::schema(key, "integer", describe(value))),
    }
}
