//! Command-line front ends over the backtesting core.

use std::sync::Arc;

use alloy::primitives::{B256, U256};
use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use searcher_arb::{detect_opportunity, get_pair_pools, ArbSimulator, DetectorConfig};
use searcher_backtest::recognizer::find_actual_arbitrages;
use searcher_backtest::{Runner, RunnerConfig};
use searcher_data::client::ChainClient;
use searcher_data::mempool::MempoolDb;
use searcher_data::registry::{self, TokenInfo};
use searcher_data::state_cache::StateCacheDb;
use searcher_sim::ForkedState;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "searcher")]
#[command(about = "Historical two-leg arbitrage research over Ethereum mainnet")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Path of the persistent state cache.
    #[arg(long, global = true, default_value = "data/state_cache.db")]
    state_db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Detect opportunities for one pair at one block.
    Scan(ScanArgs),
    /// Detect opportunities over a block range.
    ScanRange(ScanRangeArgs),
    /// Simulate the synthesized bundle for a detected opportunity.
    Simulate(SimulateArgs),
    /// Compare detector predictions against executed arbitrages.
    Backtest(BacktestArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[arg(long)]
    block: u64,

    /// Token pair, e.g. WETH/USDC.
    #[arg(long, default_value = "WETH/USDC")]
    pair: String,
}

#[derive(Args, Debug)]
struct ScanRangeArgs {
    #[arg(long)]
    start: u64,

    #[arg(long)]
    end: u64,

    /// Scan every n-th block.
    #[arg(long, default_value_t = 1)]
    step: u64,

    #[arg(long, default_value = "WETH/USDC")]
    pair: String,
}

#[derive(Args, Debug)]
struct SimulateArgs {
    #[arg(long)]
    block: u64,

    #[arg(long, default_value = "WETH/USDC")]
    pair: String,

    /// Prewarm the fork from this transaction's prestate trace.
    #[arg(long)]
    tx: Option<B256>,
}

#[derive(Args, Debug)]
struct BacktestArgs {
    #[arg(long)]
    start: u64,

    #[arg(long)]
    end: u64,

    /// Mempool corpus produced by the ingester; checked for coverage.
    #[arg(long, default_value = "data/mempool.db")]
    db: String,

    /// Also simulate each detected opportunity as a bundle.
    #[arg(long)]
    simulate: bool,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

fn parse_pair(pair: &str) -> Result<(&'static TokenInfo, &'static TokenInfo)> {
    let (left, right) = pair
        .split_once('/')
        .ok_or_else(|| eyre!("pair must look like WETH/USDC, got {pair}"))?;
    let token_a = registry::token_by_symbol(left)
        .ok_or_else(|| eyre!("unknown token symbol {left}"))?;
    let token_b = registry::token_by_symbol(right)
        .ok_or_else(|| eyre!("unknown token symbol {right}"))?;
    Ok((token_a, token_b))
}

fn default_gas() -> (U256, U256) {
    (U256::from(30_000_000_000u64), U256::from(300_000u64))
}

fn opportunity_table(opportunities: &[searcher_arb::Opportunity]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Block", "Buy DEX", "Sell DEX", "Spread %", "Optimal in", "Est. profit",
    ]);
    for opportunity in opportunities {
        table.add_row(vec![
            opportunity.block_number.to_string(),
            opportunity.buy_pool.dex.to_string(),
            opportunity.sell_pool.dex.to_string(),
            format!("{:.4}", opportunity.spread_percent),
            opportunity.optimal_in.to_string(),
            opportunity.est_profit.to_string(),
        ]);
    }
    table
}

async fn scan_block(
    client: &ChainClient,
    block: u64,
    token_a: &TokenInfo,
    token_b: &TokenInfo,
) -> Result<Option<searcher_arb::Opportunity>> {
    let pair = match get_pair_pools(
        client,
        block,
        (token_a.address, token_a.decimals),
        (token_b.address, token_b.decimals),
    )
    .await
    {
        Ok(pair) => pair,
        Err(err) => {
            tracing::info!(block, %err, "pair not scannable");
            return Ok(None);
        }
    };

    let (gas_price, gas_limit) = default_gas();
    let mut detected =
        detect_opportunity(&pair, gas_price, gas_limit, &DetectorConfig::default())?;
    if let Some(opportunity) = detected.as_mut() {
        opportunity.block_number = block;
    }
    Ok(detected)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scan(args) => {
            let client = Arc::new(ChainClient::from_env().await?);
            let (token_a, token_b) = parse_pair(&args.pair)?;

            match scan_block(&client, args.block, token_a, token_b).await? {
                Some(opportunity) => println!("{}", opportunity_table(&[opportunity])),
                None => println!(
                    "no opportunity on {} at block {}",
                    args.pair, args.block
                ),
            }
        }

        Commands::ScanRange(args) => {
            if args.start > args.end {
                bail!("--start must not exceed --end");
            }
            if args.step == 0 {
                bail!("--step must be positive");
            }
            let client = Arc::new(ChainClient::from_env().await?);
            let (token_a, token_b) = parse_pair(&args.pair)?;

            let mut found = Vec::new();
            let mut block = args.start;
            while block <= args.end {
                if let Some(opportunity) =
                    scan_block(&client, block, token_a, token_b).await?
                {
                    found.push(opportunity);
                }
                block += args.step;
            }

            if found.is_empty() {
                println!("no opportunities in {}..={}", args.start, args.end);
            } else {
                println!("{}", opportunity_table(&found));
            }
        }

        Commands::Simulate(args) => {
            if args.block == 0 {
                bail!("cannot simulate against the genesis block");
            }
            let client = Arc::new(ChainClient::from_env().await?);
            let state_cache = Arc::new(StateCacheDb::new(&cli.state_db)?);
            let (token_a, token_b) = parse_pair(&args.pair)?;
            let parent = args.block - 1;

            let fork =
                ForkedState::new(Arc::clone(&client), Some(state_cache), parent).await?;
            if let Some(tx_hash) = args.tx {
                fork.prewarm(tx_hash).await;
            }

            let Some(opportunity) =
                scan_block(&client, parent, token_a, token_b).await?
            else {
                println!("no opportunity to simulate at block {}", args.block);
                return Ok(());
            };

            let outcome = ArbSimulator::new(&fork).simulate_opportunity(&opportunity)?;
            println!("{}", outcome.comparison());
            println!("cache stats: {:?}", fork.cache_stats());

            let actual = find_actual_arbitrages(&client, args.block).await?;
            println!("executed arbitrages in block {}: {}", args.block, actual.len());
        }

        Commands::Backtest(args) => {
            let client = Arc::new(ChainClient::from_env().await?);
            let state_cache = Arc::new(StateCacheDb::new(&cli.state_db)?);

            // The corpus is advisory here: report what the ingester has
            // covered so sparse ranges are explainable afterwards.
            match MempoolDb::open(&args.db) {
                Ok(mempool) => {
                    let (total_txs, blocks_covered) = mempool.stats()?;
                    tracing::info!(total_txs, blocks_covered, db = %args.db, "mempool corpus");
                    if let Ok(pending) = mempool.mempool_for_block(args.start) {
                        tracing::info!(
                            block = args.start,
                            pending = pending.len(),
                            "mempool depth at range start"
                        );
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, db = %args.db, "mempool corpus unavailable");
                }
            }
            let config = RunnerConfig {
                simulate: args.simulate,
                ..Default::default()
            };

            let runner = Runner::new(client, Some(state_cache), config);
            let report = runner.run(args.start, args.end).await?;
            println!("{}", report.render());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing() {
        let (a, b) = parse_pair("WETH/USDC").expect("valid pair");
        assert_eq!(a.symbol, "WETH");
        assert_eq!(b.symbol, "USDC");

        assert!(parse_pair("WETHUSDC").is_err());
        assert!(parse_pair("WETH/PEPE").is_err());
    }

    #[test]
    fn cli_parses_backtest_command() {
        let cli = Cli::parse_from([
            "searcher", "-vv", "backtest", "--start", "100", "--end", "110", "--simulate",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Backtest(args) => {
                assert_eq!(args.start, 100);
                assert_eq!(args.end, 110);
                assert!(args.simulate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
