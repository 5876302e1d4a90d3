//! Sequential block-by-block backtest loop.
//!
//! For every block N: fork state at N−1, load pool snapshots, run the
//! detector across tracked pairs, optionally simulate the synthesized
//! bundle, and compare against the arbitrages that actually executed in
//! N. Per-block failures are logged and skipped; only configuration and
//! store errors halt the run.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use eyre::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use searcher_arb::{detect_opportunity, get_pair_pools, ArbSimulator, DetectorConfig};
use searcher_data::client::ChainClient;
use searcher_data::registry::USDC;
use searcher_data::state_cache::StateCacheDb;
use searcher_sim::ForkedState;

use crate::recognizer::{find_actual_arbitrages, TRACKED_PAIRS};
use crate::report::{BacktestReport, BlockOutcome};

/// Runner policy knobs.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Assumed bundle gas price for detector gating (30 gwei).
    pub gas_price: U256,
    /// Assumed bundle gas limit for detector gating (300k).
    pub gas_limit: U256,
    /// Simulate each detected opportunity through the bundle executor.
    pub simulate: bool,
    /// Inter-block sleep to stay under upstream RPC quotas.
    pub block_sleep: Duration,
    /// Per-block processing deadline.
    pub block_deadline: Duration,
    pub detector: DetectorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            gas_price: U256::from(30_000_000_000u64),
            gas_limit: U256::from(300_000u64),
            simulate: false,
            block_sleep: Duration::from_millis(500),
            block_deadline: Duration::from_secs(120),
            detector: DetectorConfig::default(),
        }
    }
}

pub struct Runner {
    client: Arc<ChainClient>,
    state_cache: Option<Arc<StateCacheDb>>,
    config: RunnerConfig,
}

impl Runner {
    pub fn new(
        client: Arc<ChainClient>,
        state_cache: Option<Arc<StateCacheDb>>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            client,
            state_cache,
            config,
        }
    }

    /// Backtests every block in `start..=end`.
    ///
    /// Each block gets a fresh fork, so a failed block leaks no state
    /// into the next; its absence from the report is the only trace.
    pub async fn run(&self, start: u64, end: u64) -> Result<BacktestReport> {
        if start > end {
            bail!("invalid range: start {start} > end {end}");
        }
        if start == 0 {
            bail!("cannot backtest the genesis block (no parent state)");
        }

        let mut report = BacktestReport::new(start, end);
        let progress = ProgressBar::new(end - start + 1);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks ({eta})")
                .expect("valid progress template"),
        );

        for block_number in start..=end {
            tokio::time::sleep(self.config.block_sleep).await;

            match tokio::time::timeout(
                self.config.block_deadline,
                self.process_block(block_number),
            )
            .await
            {
                Ok(Ok(outcome)) => report.record(outcome),
                Ok(Err(err)) => {
                    tracing::warn!(block_number, %err, "block skipped");
                }
                Err(_) => {
                    tracing::warn!(block_number, "block deadline exceeded; skipped");
                }
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        report.compute_metrics();
        Ok(report)
    }

    /// Runs detection and ground-truth recognition for one block.
    pub async fn process_block(&self, block_number: u64) -> Result<BlockOutcome> {
        if block_number == 0 {
            bail!("block 0 has no parent state to fork");
        }
        let parent = block_number - 1;

        let fork = ForkedState::new(
            Arc::clone(&self.client),
            self.state_cache.clone(),
            parent,
        )
        .await?;

        let mut predicted = Vec::new();
        for (token_a, token_b) in TRACKED_PAIRS {
            let pair = match get_pair_pools(
                &self.client,
                parent,
                (token_a.address, token_a.decimals),
                (token_b.address, token_b.decimals),
            )
            .await
            {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::debug!(
                        pair = format!("{}/{}", token_a.symbol, token_b.symbol),
                        %err,
                        "pair skipped"
                    );
                    continue;
                }
            };

            match detect_opportunity(
                &pair,
                self.config.gas_price,
                self.config.gas_limit,
                &self.config.detector,
            ) {
                Ok(Some(mut opportunity)) => {
                    opportunity.block_number = block_number;

                    if self.config.simulate && pair.token0 == USDC.address {
                        let simulator = ArbSimulator::new(&fork);
                        match simulator.simulate_opportunity(&opportunity) {
                            Ok(outcome) => tracing::info!(
                                block_number,
                                pair = format!("{}/{}", token_a.symbol, token_b.symbol),
                                result = outcome.comparison(),
                                "opportunity simulated"
                            ),
                            Err(err) => {
                                tracing::warn!(block_number, %err, "simulation failed")
                            }
                        }
                    }

                    predicted.push(opportunity);
                }
                Ok(None) => {}
                Err(err) => tracing::debug!(block_number, %err, "detector declined pair"),
            }
        }

        let actual = find_actual_arbitrages(&self.client, block_number).await?;

        // Diagnose misses: what did the spreads look like when a real
        // arbitrage slipped past the detector?
        if !actual.is_empty() && predicted.is_empty() {
            for (token_a, token_b) in TRACKED_PAIRS {
                let Ok(pair) = get_pair_pools(
                    &self.client,
                    parent,
                    (token_a.address, token_a.decimals),
                    (token_b.address, token_b.decimals),
                )
                .await
                else {
                    continue;
                };
                if let Some(prices) = pair.prices() {
                    if prices.len() >= 2 {
                        let spread = searcher_arb::math::spread_percent(
                            prices[0].token1_per_token0,
                            prices[1].token1_per_token0,
                        );
                        tracing::warn!(
                            block_number,
                            pair = format!("{}/{}", token_a.symbol, token_b.symbol),
                            spread_percent = spread,
                            actual_arbs = actual.len(),
                            "missed block"
                        );
                    }
                }
            }
        }

        tracing::info!(
            block_number,
            predicted = predicted.len(),
            actual = actual.len(),
            cache_stats = ?fork.cache_stats(),
            "block processed"
        );

        Ok(BlockOutcome {
            block_number,
            predicted,
            actual,
        })
    }
}
