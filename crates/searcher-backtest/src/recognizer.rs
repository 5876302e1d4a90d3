//! Ground-truth arbitrage recognition from block receipts.
//!
//! A transaction counts as a two-leg arbitrage when it swapped against
//! two tracked pools of the same token pair in opposite directions.
//! Same-direction activity (sandwiches), single-direction routing and
//! single-pool trading never match.

use std::collections::{HashMap, HashSet};

use alloy::consensus::TxReceipt;
use alloy::primitives::{b256, Address, Bytes, B256, U256};
use alloy::rpc::types::TransactionReceipt;
use searcher_arb::pools::compute_pair_address;
use searcher_data::client::{ChainClient, ClientError};
use searcher_data::registry::{TokenInfo, DAI, KNOWN_DEXES, USDC, USDT, WBTC, WETH};

/// topic0 of `Swap(address,uint256,uint256,uint256,uint256,address)`.
pub const SWAP_EVENT_TOPIC: B256 =
    b256!("d78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822");

/// Token pairs whose pools the recognizer watches.
pub const TRACKED_PAIRS: [(&TokenInfo, &TokenInfo); 4] = [
    (&WETH, &USDC),
    (&WETH, &USDT),
    (&WETH, &DAI),
    (&WETH, &WBTC),
];

/// An arbitrage that actually executed on-chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutedArbitrage {
    pub tx_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub pools_hit: Vec<Address>,
    pub gas_used: u64,
}

/// Tracked pool addresses, grouped by the token pair they trade.
pub struct PairGroups {
    tracked: HashSet<Address>,
    groups: Vec<Vec<Address>>,
}

impl PairGroups {
    /// Derives every tracked pair × DEX pool address. Pure CREATE2, no
    /// I/O.
    pub fn build() -> Self {
        let mut tracked = HashSet::new();
        let mut groups = Vec::with_capacity(TRACKED_PAIRS.len());

        for (token_a, token_b) in TRACKED_PAIRS {
            let (token0, token1) = if token_a.address < token_b.address {
                (token_a.address, token_b.address)
            } else {
                (token_b.address, token_a.address)
            };
            let group: Vec<Address> = KNOWN_DEXES
                .iter()
                .map(|dex| compute_pair_address(dex, token0, token1))
                .collect();
            tracked.extend(group.iter().copied());
            groups.push(group);
        }

        Self { tracked, groups }
    }

    pub fn is_tracked(&self, pool: Address) -> bool {
        self.tracked.contains(&pool)
    }

    /// True when both pools trade the same token pair.
    pub fn pair_matched(&self, a: Address, b: Address) -> bool {
        self.groups
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b))
    }

    /// Every tracked pool address.
    pub fn all_pools(&self) -> Vec<Address> {
        self.tracked.iter().copied().collect()
    }
}

/// The slice of a receipt the recognizer needs.
#[derive(Clone, Debug)]
pub struct ReceiptView {
    pub tx_hash: B256,
    pub from: Address,
    pub gas_used: u64,
    pub logs: Vec<LogView>,
}

#[derive(Clone, Debug)]
pub struct LogView {
    pub address: Address,
    pub topic0: Option<B256>,
    pub data: Bytes,
}

impl ReceiptView {
    pub fn from_receipt(receipt: &TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            from: receipt.from,
            gas_used: receipt.gas_used,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| LogView {
                    address: log.inner.address,
                    topic0: log.inner.data.topics().first().copied(),
                    data: log.inner.data.data.clone(),
                })
                .collect(),
        }
    }
}

/// Classifies a V2 `Swap` log's direction from its four amount words:
/// `+1` for token0-in/token1-out, `-1` for the mirror, `0` for anything
/// mixed or malformed.
pub fn swap_direction(log: &LogView) -> i8 {
    if log.topic0 != Some(SWAP_EVENT_TOPIC) || log.data.len() < 128 {
        return 0;
    }

    let amount0_in = U256::from_be_slice(&log.data[0..32]);
    let amount1_in = U256::from_be_slice(&log.data[32..64]);
    let amount0_out = U256::from_be_slice(&log.data[64..96]);
    let amount1_out = U256::from_be_slice(&log.data[96..128]);

    if !amount0_in.is_zero()
        && !amount1_out.is_zero()
        && amount1_in.is_zero()
        && amount0_out.is_zero()
    {
        1
    } else if !amount1_in.is_zero()
        && !amount0_out.is_zero()
        && amount0_in.is_zero()
        && amount1_out.is_zero()
    {
        -1
    } else {
        0
    }
}

/// Scans receipt views for transactions that swapped two same-pair
/// tracked pools in opposite directions.
pub fn recognize(
    views: &[ReceiptView],
    groups: &PairGroups,
    block_number: u64,
) -> Vec<ExecutedArbitrage> {
    let mut arbitrages = Vec::new();

    for view in views {
        let mut pool_directions: HashMap<Address, i8> = HashMap::new();
        for log in &view.logs {
            if !groups.is_tracked(log.address) {
                continue;
            }
            let direction = swap_direction(log);
            if direction != 0 {
                pool_directions.insert(log.address, direction);
            }
        }

        if pool_directions.len() < 2 {
            continue;
        }

        let pools: Vec<Address> = pool_directions.keys().copied().collect();
        let is_arbitrage = pools.iter().enumerate().any(|(i, a)| {
            pools[i + 1..].iter().any(|b| {
                groups.pair_matched(*a, *b) && pool_directions[a] != pool_directions[b]
            })
        });

        if is_arbitrage {
            arbitrages.push(ExecutedArbitrage {
                tx_hash: view.tx_hash,
                block_number,
                from: view.from,
                pools_hit: pools,
                gas_used: view.gas_used,
            });
        }
    }

    arbitrages
}

/// Fetches the block's receipts and enumerates the arbitrages that
/// actually executed on tracked pools.
pub async fn find_actual_arbitrages(
    client: &ChainClient,
    block_number: u64,
) -> Result<Vec<ExecutedArbitrage>, ClientError> {
    let groups = PairGroups::build();
    let receipts = client.block_receipts(block_number).await?;
    let views: Vec<ReceiptView> = receipts.iter().map(ReceiptView::from_receipt).collect();

    let tracked_swaps: usize = views
        .iter()
        .flat_map(|view| &view.logs)
        .filter(|log| groups.is_tracked(log.address) && log.topic0 == Some(SWAP_EVENT_TOPIC))
        .count();
    tracing::debug!(
        block_number,
        receipts = views.len(),
        tracked_swaps,
        "scanning block for executed arbitrages"
    );

    let arbitrages = recognize(&views, &groups, block_number);
    tracing::debug!(block_number, found = arbitrages.len(), "recognizer done");
    Ok(arbitrages)
}
