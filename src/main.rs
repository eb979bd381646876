//! Mining Pool Integration Harness - Main Application

use clap::Parser;
use pool_integ::{
    config::{Command, Config},
    miner::XmrigLauncher,
    Error, HarnessEnv, Outcome, Result, ScenarioKind, ScenarioReport, ScenarioRunner, APP_NAME,
    APP_VERSION,
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_logging(config: &Config) {
    let level: tracing::Level = config.log_level.into();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_logging(&config);

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!(category = e.category(), "{}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(config: Config) -> Result<ExitCode> {
    let command = config
        .command
        .clone()
        .unwrap_or(Command::Run { scenarios: Vec::new() });

    match command {
        Command::List => {
            list_scenarios();
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckEnv => {
            let env = HarnessEnv::load(&config.env_file).await?;
            check_env(&env);
            Ok(ExitCode::SUCCESS)
        }
        Command::PrintConfig => {
            let env = HarnessEnv::load(&config.env_file).await?;
            print!("{}", serde_yaml::to_string(&env)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { scenarios } => {
            let env = HarnessEnv::load(&config.env_file).await?;
            let kinds = if scenarios.is_empty() {
                ScenarioKind::ALL.to_vec()
            } else {
                scenarios
            };

            info!("Starting {} v{} against {}", APP_NAME, APP_VERSION, env.pool);
            let runner = ScenarioRunner::new(
                env,
                config.settings()?,
                XmrigLauncher::new(config.xmrig.clone()),
            );
            let reports = runner.run_all(&kinds).await;
            if summarize(&reports) == 0 {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

fn list_scenarios() {
    use clap::ValueEnum;
    for kind in ScenarioKind::ALL {
        let help = kind
            .to_possible_value()
            .and_then(|v| v.get_help().map(ToString::to_string))
            .unwrap_or_default();
        let marker = if kind.needs_miner() { " (starts a miner)" } else { "" };
        println!("{:<20} {}{}", kind.name(), help, marker);
    }
}

fn check_env(env: &HarnessEnv) {
    println!("nettype     {}", env.nettype);
    println!("daemon      {}", env.daemon);
    println!("wallet rpc  {}", env.wallet_rpc);
    println!("pool        {}", env.pool);
    println!("web ui      {}", env.webui);
    println!("build dir   {}", env.build_dir.display());
    for (key, check) in env.host_format_checks() {
        println!("{:<11} {}", key, check);
    }
}

/// Print one line per scenario and return the number of failures
fn summarize(reports: &[ScenarioReport]) -> usize {
    let mut failed = 0;
    for report in reports {
        let (label, detail) = match &report.outcome {
            Outcome::Passed(detail) => ("PASS", detail.clone()),
            Outcome::Skipped(reason) => ("SKIP", reason.clone()),
            Outcome::Failed(e) => {
                failed += 1;
                ("FAIL", failure_detail(e))
            }
        };
        println!(
            "{} {:<20} {:>8}  {}",
            label,
            report.kind.name(),
            humantime::format_duration(truncate_to_millis(report.elapsed)).to_string(),
            detail
        );
    }

    println!("{} scenarios, {} failed", reports.len(), failed);
    failed
}

fn failure_detail(e: &Error) -> String {
    format!("[{}] {}", e.category(), e)
}

fn truncate_to_millis(d: std::time::Duration) -> std::time::Duration {
    std::time::Duration::from_millis(d.as_millis() as u64)
}
