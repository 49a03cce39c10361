//! Prediction Market Operator CLI
//!
//! Commands:
//! - `session`: Detect the wallet session
//! - `markets`: List configured market deployments
//! - `info`: Read a market contract once
//! - `watch`: Stream synchronizer snapshots until Ctrl+C
//! - `buy` / `redeem`: Trade through the allowance sequencer
//! - `resolve` / `resolve-manually`: Administrative resolution
//!
//! # Usage
//! ```bash
//! # Read a configured market
//! market_cli --config market.toml info --market btc-100k
//!
//! # Read any contract by address
//! market_cli info --address 0x1234567890123456789012345678901234567890
//!
//! # Watch snapshots, also appending them as JSONL
//! market_cli --config market.toml watch --market btc-100k --out data/snapshots.jsonl
//!
//! # Buy 100 USDC of YES
//! market_cli --config market.toml buy --market btc-100k --side yes --amount 100
//! ```

use std::path::PathBuf;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use market_client::gateway::RpcGateway;
use market_client::rpc::RpcClient;
use market_client::units::to_decimal;
use market_client::{
    ClientConfig, MarketClient, MarketError, MarketGateway, MarketInfo, MarketSnapshot, Outcome, Side,
};

#[derive(Parser)]
#[command(name = "market_cli")]
#[command(about = "Operator CLI for on-chain prediction markets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the wallet session (bridge, then injected wallet)
    Session {
        /// Prompt the wallet to authorize an account
        #[arg(long, default_value = "false")]
        connect: bool,

        /// Also show the collateral balance for this market id
        #[arg(long)]
        market: Option<String>,
    },

    /// List configured market deployments
    Markets,

    /// Read a market contract once
    Info {
        /// Market id from the config
        #[arg(long, conflicts_with = "address")]
        market: Option<String>,

        /// Contract address, bypassing the config
        #[arg(long)]
        address: Option<Address>,
    },

    /// Stream snapshots for a market until Ctrl+C
    Watch {
        #[arg(long)]
        market: String,

        /// Also append each snapshot as JSONL
        #[arg(long)]
        out: Option<PathBuf>,

        /// Stop after this many snapshots (0 = unlimited)
        #[arg(long, default_value = "0")]
        limit: u64,
    },

    /// Buy an outcome with collateral (approves first if needed)
    Buy {
        #[arg(long)]
        market: String,

        /// yes or no
        #[arg(long)]
        side: String,

        /// Collateral amount as a decimal, e.g. 100 or 2.5
        #[arg(long)]
        amount: String,
    },

    /// Redeem winning outcome tokens
    Redeem {
        #[arg(long)]
        market: String,

        #[arg(long)]
        amount: String,
    },

    /// Resolve from the oracle price
    Resolve {
        #[arg(long)]
        market: String,
    },

    /// Force the outcome
    ResolveManually {
        #[arg(long)]
        market: String,

        /// yes or no
        #[arg(long)]
        result: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::default(),
    };
    info!("RPC: {}", config.rpc_url);

    match cli.command {
        Commands::Session { connect, market } => run_session(&config, connect, market).await,
        Commands::Markets => run_markets(&config),
        Commands::Info { market, address } => run_info(&config, market, address).await,
        Commands::Watch { market, out, limit } => run_watch(&config, market, out, limit).await,
        Commands::Buy { market, side, amount } => run_buy(&config, market, side, amount).await,
        Commands::Redeem { market, amount } => run_redeem(&config, market, amount).await,
        Commands::Resolve { market } => run_resolve(&config, market, None).await,
        Commands::ResolveManually { market, result } => run_resolve(&config, market, Some(result)).await,
    }
}

async fn run_session(config: &ClientConfig, connect: bool, market: Option<String>) -> Result<()> {
    info!("=== Wallet Session ===");
    let client = MarketClient::from_config(config)?;

    let session = if connect { client.session_provider().connect().await } else { client.start().await };

    if session.connected {
        info!("Account: {:?}", session.account);
        info!("Chain: {:?}", session.chain_id);
        info!("Source: {:?}", session.source);
        info!("Can sign: {}", session.can_sign());
        if let Some(market) = market {
            print_collateral(&client, &market).await;
        }
    } else {
        warn!("No wallet session (not configured, unreachable or not authorized)");
    }
    Ok(())
}

fn run_markets(config: &ClientConfig) -> Result<()> {
    info!("=== Configured Markets ===");
    if config.markets.is_empty() {
        warn!("No markets configured");
    }
    for (id, deployment) in &config.markets {
        info!("  {}: {} (chain {})", id, deployment.address, deployment.chain_id);
    }
    Ok(())
}

async fn run_info(config: &ClientConfig, market: Option<String>, address: Option<Address>) -> Result<()> {
    let contract = match (market.as_deref(), address) {
        (_, Some(address)) => address,
        (Some(id), None) => match config.registry().address(id) {
            Some(address) => address,
            None => {
                warn!("Market {} is not deployed yet", id);
                return Ok(());
            }
        },
        (None, None) => anyhow::bail!("Pass --market or --address"),
    };

    info!("=== Market {} ===", contract);
    let rpc = RpcClient::new(&config.rpc_url)?;
    let gateway = RpcGateway::new(rpc);

    let info = gateway.get_market_info(contract).await.context("Failed to read market")?;
    print_market(&info, config.token_decimals);

    match gateway.get_current_oracle_price(contract).await {
        Ok(price) => info!("Oracle price: {}", price),
        Err(e) => warn!("Oracle price unavailable: {}", e),
    }
    Ok(())
}

async fn run_watch(config: &ClientConfig, market: String, out: Option<PathBuf>, limit: u64) -> Result<()> {
    info!("=== Watching {} ===", market);
    info!("Poll interval: {:?}", config.poll_interval());
    info!("Limit: {} (0 = unlimited)", limit);
    info!("Press Ctrl+C to stop");

    let client = MarketClient::from_config(config)?;
    client.start().await;
    if client.track(&market).is_none() {
        warn!("Market {} is not deployed yet, nothing to watch", market);
        return Ok(());
    }

    let mut file = match &out {
        Some(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Some(file)
        }
        None => None,
    };

    let mut subscription = client.subscribe();
    let mut seen: u64 = 0;
    loop {
        let snapshot = tokio::select! {
            snapshot = subscription.changed() => snapshot,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        };
        if snapshot.loading {
            continue;
        }

        print_snapshot(&snapshot, config.token_decimals);
        if let Some(file) = file.as_mut() {
            let mut line = serde_json::to_string(&snapshot)?;
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }

        seen += 1;
        if limit > 0 && seen >= limit {
            break;
        }
    }

    info!("Snapshots received: {}", seen);
    if let Some(path) = out {
        info!("Output written to: {}", path.display());
    }
    Ok(())
}

async fn run_buy(config: &ClientConfig, market: String, side: String, amount: String) -> Result<()> {
    let side = Side::parse(&side).with_context(|| format!("Unknown side '{}', expected yes or no", side))?;
    info!("=== Buy {:?} {} on {} ===", side, amount, market);

    let client = MarketClient::from_config(config)?;
    client.start().await;

    match client.buy(&market, side, &amount).await {
        Ok(receipt) => {
            if let Some(approval) = receipt.approval {
                info!("Approval: {}", approval);
            }
            info!("Buy confirmed: {}", receipt.buy);
            print_collateral(&client, &market).await;
            Ok(())
        }
        Err(e) => Err(report(e)),
    }
}

async fn run_redeem(config: &ClientConfig, market: String, amount: String) -> Result<()> {
    info!("=== Redeem {} on {} ===", amount, market);
    let client = MarketClient::from_config(config)?;
    client.start().await;

    match client.redeem(&market, &amount).await {
        Ok(hash) => {
            info!("Redeem confirmed: {}", hash);
            Ok(())
        }
        Err(e) => Err(report(e)),
    }
}

async fn run_resolve(config: &ClientConfig, market: String, result: Option<String>) -> Result<()> {
    let client = MarketClient::from_config(config)?;
    client.start().await;

    let outcome = match result {
        Some(result) => {
            let outcome = Outcome::parse(&result).with_context(|| format!("Unknown result '{}'", result))?;
            info!("=== Resolve {} manually as {} ===", market, outcome.label());
            client.resolve_manually(&market, outcome).await
        }
        None => {
            info!("=== Resolve {} from oracle ===", market);
            client.resolve(&market).await
        }
    };

    match outcome {
        Ok(hash) => {
            info!("Resolution confirmed: {}", hash);
            Ok(())
        }
        Err(e) => Err(report(e)),
    }
}

async fn print_collateral(client: &MarketClient, market: &str) {
    match client.collateral_balance(market).await {
        Ok(Some(balance)) => info!("Collateral balance: {}", balance.display()),
        Ok(None) => warn!("No collateral balance for {} (no account or not deployed)", market),
        Err(e) => warn!("Collateral balance unavailable: {}", e),
    }
}

fn report(e: MarketError) -> anyhow::Error {
    if e.is_approval_failure() {
        error!("Approval step failed, nothing was bought");
    }
    error!("{}", e.user_message());
    e.into()
}

fn print_market(info: &MarketInfo, decimals: u8) {
    info!("Question: {}", info.question);
    match info.end_time_utc() {
        Some(end) => {
            let state = if info.is_expired(Utc::now()) { "closed" } else { "open" };
            info!("Ends: {} ({})", end, state);
        }
        None => info!("Ends: {} (unix)", info.end_time),
    }
    info!("Total collateral: {}", to_decimal(info.total_collateral, decimals));
    info!("Resolved: {} (result: {})", info.resolved, info.result.label());
    info!("YES token: {}", info.yes_token);
    info!("NO token: {}", info.no_token);
}

fn print_snapshot(snapshot: &MarketSnapshot, decimals: u8) {
    info!("--- {:?} at {:?} ---", snapshot.phase, snapshot.updated_at);
    if let Some(info) = &snapshot.market_info {
        print_market(info, decimals);
    }
    if let Some(probs) = &snapshot.probabilities {
        info!("YES {:.2}% / NO {:.2}%", probs.yes_probability, probs.no_probability);
    }
    if let Some(balances) = &snapshot.user_balances {
        let (yes, no) = balances.display(decimals);
        info!("Balances: YES {} / NO {}", yes, no);
    }
    if let Some(price) = snapshot.current_price {
        info!("Oracle price: {}", price);
    }
    if let Some(e) = &snapshot.error {
        error!("Error: {}", e);
    }
    for warning in &snapshot.warnings {
        warn!("{}", warning);
    }
}
