//! Typed wrapper over a JSON-RPC Ethereum archive endpoint.
//!
//! Every operation takes an explicit block number (never "latest") and an
//! internal deadline. Errors are classified as transient (timeout,
//! transport) or permanent (decoding, endpoint rejection); the client
//! never retries; retry policy belongs to the caller.

use std::collections::HashMap;
use std::time::Duration;

use alloy::network::Ethereum;
use alloy::primitives::{Address, Bytes, B256, U256, U64};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{
    Block, BlockNumberOrTag, TransactionInput, TransactionReceipt, TransactionRequest,
};
use alloy::transports::{RpcError, TransportErrorKind};
use eyre::{Context, Result};
use thiserror::Error;

/// Deadline for single account/storage reads.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for block and receipt fetches.
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for `debug_traceTransaction` (traces can be slow).
pub const TRACE_TIMEOUT: Duration = Duration::from_secs(60);

/// Classified RPC failure. `is_transient` implements the retry taxonomy:
/// timeouts and transport faults may succeed on retry, everything else
/// is permanent for the same request.
#[derive(Clone, Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request exceeded {0:?} deadline")]
    Timeout(Duration),
    #[error("endpoint rejected request (code {code}): {message}")]
    Rpc { code: i64, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("endpoint does not support {0}")]
    NotSupported(&'static str),
    #[error("missing data: {0}")]
    MissingData(String),
}

impl ClientError {
    /// True for failures that a retry against the same endpoint may resolve.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

fn classify(err: RpcError<TransportErrorKind>, op: &'static str) -> ClientError {
    match err {
        RpcError::ErrorResp(payload) => {
            let message = payload.message.to_string();
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("not supported")
                || lowered.contains("method not found")
                || lowered.contains("does not exist")
            {
                ClientError::NotSupported(op)
            } else {
                ClientError::Rpc {
                    code: payload.code,
                    message,
                }
            }
        }
        RpcError::SerError(err) => ClientError::Decode(err.to_string()),
        RpcError::DeserError { err, .. } => ClientError::Decode(err.to_string()),
        RpcError::NullResp => ClientError::MissingData(op.to_string()),
        RpcError::UnsupportedFeature(_) => ClientError::NotSupported(op),
        RpcError::Transport(kind) => ClientError::Transport(kind.to_string()),
        other => ClientError::Transport(other.to_string()),
    }
}

/// A single account's state at one block, as returned by batched reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub address: Address,
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
}

/// Accounts and storage slots touched by one transaction, recovered from
/// a prestate trace. Used to prewarm caches in bulk.
#[derive(Clone, Debug, Default)]
pub struct PrestateTrace {
    pub accounts: Vec<Address>,
    pub storage: HashMap<Address, Vec<U256>>,
}

/// Typed chain client over HTTP JSON-RPC.
pub struct ChainClient {
    provider: RootProvider<Ethereum>,
}

impl ChainClient {
    /// Connects to `url` and probes connectivity via `eth_blockNumber`.
    ///
    /// # Errors
    /// Returns error if the URL is malformed or the probe fails.
    pub async fn new(url: &str) -> Result<Self> {
        let provider =
            RootProvider::<Ethereum>::new_http(url.parse().wrap_err("invalid RPC URL format")?);

        let latest = provider
            .get_block_number()
            .await
            .wrap_err("failed to reach RPC endpoint with eth_blockNumber")?;

        tracing::info!(latest_block = latest, "RPC connection established");
        Ok(Self { provider })
    }

    /// Connects using the `ALCHEMY_URL` environment variable.
    ///
    /// # Errors
    /// Returns error if the variable is unset, a fatal configuration
    /// error at process start.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("ALCHEMY_URL")
            .wrap_err("ALCHEMY_URL not set; export a JSON-RPC archive endpoint URL")?;
        Self::new(&url).await
    }

    async fn with_deadline<T>(
        &self,
        deadline: Duration,
        op: &'static str,
        fut: impl std::future::IntoFuture<Output = Result<T, RpcError<TransportErrorKind>>>,
    ) -> Result<T, ClientError> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify(err, op)),
            Err(_) => Err(ClientError::Timeout(deadline)),
        }
    }

    /// Fetches the full block (with transactions) at `number`.
    pub async fn block_by_number(&self, number: u64) -> Result<Block, ClientError> {
        let block = self
            .with_deadline(
                BLOCK_TIMEOUT,
                "eth_getBlockByNumber",
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .full(),
            )
            .await?;
        block.ok_or_else(|| ClientError::MissingData(format!("block {number} not found")))
    }

    /// Fetches every receipt of the block at `number`, in block order.
    pub async fn block_receipts(&self, number: u64) -> Result<Vec<TransactionReceipt>, ClientError> {
        let receipts = self
            .with_deadline(
                BLOCK_TIMEOUT,
                "eth_getBlockReceipts",
                self.provider.get_block_receipts(number.into()),
            )
            .await?;
        receipts.ok_or_else(|| ClientError::MissingData(format!("receipts for block {number}")))
    }

    /// Account balance at a specific block.
    pub async fn balance_at(&self, address: Address, number: u64) -> Result<U256, ClientError> {
        self.with_deadline(
            READ_TIMEOUT,
            "eth_getBalance",
            self.provider.get_balance(address).block_id(number.into()),
        )
        .await
    }

    /// Account nonce at a specific block.
    pub async fn nonce_at(&self, address: Address, number: u64) -> Result<u64, ClientError> {
        self.with_deadline(
            READ_TIMEOUT,
            "eth_getTransactionCount",
            self.provider
                .get_transaction_count(address)
                .block_id(number.into()),
        )
        .await
    }

    /// Contract bytecode at a specific block.
    pub async fn code_at(&self, address: Address, number: u64) -> Result<Bytes, ClientError> {
        self.with_deadline(
            READ_TIMEOUT,
            "eth_getCode",
            self.provider.get_code_at(address).block_id(number.into()),
        )
        .await
    }

    /// Storage slot value at a specific block.
    pub async fn storage_at(
        &self,
        address: Address,
        slot: U256,
        number: u64,
    ) -> Result<U256, ClientError> {
        self.with_deadline(
            READ_TIMEOUT,
            "eth_getStorageAt",
            self.provider
                .get_storage_at(address, slot)
                .block_id(number.into()),
        )
        .await
    }

    /// Executes a view call against state at `number`, returning raw bytes.
    pub async fn call(
        &self,
        to: Address,
        calldata: Bytes,
        number: u64,
    ) -> Result<Bytes, ClientError> {
        let request = TransactionRequest {
            to: Some(to.into()),
            input: TransactionInput::new(calldata),
            ..Default::default()
        };
        self.with_deadline(
            READ_TIMEOUT,
            "eth_call",
            self.provider.call(&request).block(number.into()),
        )
        .await
    }

    /// Receipt of a mined transaction, if any.
    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<TransactionReceipt>, ClientError> {
        self.with_deadline(
            READ_TIMEOUT,
            "eth_getTransactionReceipt",
            self.provider.get_transaction_receipt(hash),
        )
        .await
    }

    /// Fetches balance, nonce and code for many accounts in one
    /// multiplexed JSON-RPC batch (three calls per account).
    ///
    /// A whole-batch transport failure is returned as the outer error;
    /// per-item RPC failures land in the corresponding vector slot.
    pub async fn batch_accounts(
        &self,
        addresses: &[Address],
        number: u64,
    ) -> Result<Vec<Result<AccountSnapshot, ClientError>>, ClientError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let tag = BlockNumberOrTag::Number(number);
        let client = self.provider.client();
        let mut batch = client.new_batch();
        let mut waiters = Vec::with_capacity(addresses.len());
        for address in addresses {
            let balance = batch
                .add_call::<_, U256>("eth_getBalance", &(*address, tag))
                .map_err(|e| classify(e, "eth_getBalance"))?;
            let nonce = batch
                .add_call::<_, U64>("eth_getTransactionCount", &(*address, tag))
                .map_err(|e| classify(e, "eth_getTransactionCount"))?;
            let code = batch
                .add_call::<_, Bytes>("eth_getCode", &(*address, tag))
                .map_err(|e| classify(e, "eth_getCode"))?;
            waiters.push((*address, balance, nonce, code));
        }

        match tokio::time::timeout(BLOCK_TIMEOUT, batch.send()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(classify(err, "batch")),
            Err(_) => return Err(ClientError::Timeout(BLOCK_TIMEOUT)),
        }

        let mut results = Vec::with_capacity(waiters.len());
        for (address, balance, nonce, code) in waiters {
            let item = async {
                Ok(AccountSnapshot {
                    address,
                    balance: balance.await.map_err(|e| classify(e, "eth_getBalance"))?,
                    nonce: nonce
                        .await
                        .map_err(|e| classify(e, "eth_getTransactionCount"))?
                        .to::<u64>(),
                    code: code.await.map_err(|e| classify(e, "eth_getCode"))?,
                })
            }
            .await;
            results.push(item);
        }
        Ok(results)
    }

    /// Fetches many storage slots in one multiplexed JSON-RPC batch.
    pub async fn batch_storage(
        &self,
        requests: &[(Address, U256)],
        number: u64,
    ) -> Result<Vec<Result<U256, ClientError>>, ClientError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let tag = BlockNumberOrTag::Number(number);
        let client = self.provider.client();
        let mut batch = client.new_batch();
        let mut waiters = Vec::with_capacity(requests.len());
        for (address, slot) in requests {
            let value = batch
                .add_call::<_, B256>("eth_getStorageAt", &(*address, *slot, tag))
                .map_err(|e| classify(e, "eth_getStorageAt"))?;
            waiters.push(value);
        }

        match tokio::time::timeout(BLOCK_TIMEOUT, batch.send()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(classify(err, "batch")),
            Err(_) => return Err(ClientError::Timeout(BLOCK_TIMEOUT)),
        }

        let mut results = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            results.push(
                waiter
                    .await
                    .map(|value| U256::from_be_bytes(value.0))
                    .map_err(|e| classify(e, "eth_getStorageAt")),
            );
        }
        Ok(results)
    }

    /// Runs `debug_traceTransaction` with the prestate tracer and returns
    /// the touched account and storage-slot sets.
    ///
    /// Restricted endpoints fail with [`ClientError::NotSupported`];
    /// callers must treat that as non-fatal (prewarming is best-effort).
    pub async fn trace_transaction(&self, hash: B256) -> Result<PrestateTrace, ClientError> {
        let params = (hash, serde_json::json!({ "tracer": "prestateTracer" }));
        let value: serde_json::Value = self
            .with_deadline(
                TRACE_TIMEOUT,
                "debug_traceTransaction",
                self.provider
                    .client()
                    .request("debug_traceTransaction", params),
            )
            .await?;
        Ok(parse_prestate(&value))
    }
}

/// Parses prestate-tracer output leniently.
///
/// Provider output shapes vary; anything that does not look like
/// `{address: {"storage": {slot: value}}}` contributes no hints rather
/// than an error.
pub fn parse_prestate(value: &serde_json::Value) -> PrestateTrace {
    let mut trace = PrestateTrace::default();
    let Some(map) = value.as_object() else {
        return trace;
    };

    for (address_hex, entry) in map {
        let Ok(address) = address_hex.parse::<Address>() else {
            continue;
        };
        trace.accounts.push(address);

        let Some(slots) = entry.get("storage").and_then(|s| s.as_object()) else {
            continue;
        };
        let parsed: Vec<U256> = slots
            .keys()
            .filter_map(|slot_hex| slot_hex.parse::<U256>().ok())
            .collect();
        if !parsed.is_empty() {
            trace.storage.insert(address, parsed);
        }
    }

    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_rejects_malformed_url() {
        let result = ChainClient::new("not a url").await;
        assert!(result.is_err(), "should reject malformed URL");
    }

    #[test]
    fn transient_classification() {
        assert!(ClientError::Timeout(READ_TIMEOUT).is_transient());
        assert!(ClientError::Transport("reset".into()).is_transient());
        assert!(!ClientError::Decode("bad hex".into()).is_transient());
        assert!(!ClientError::NotSupported("debug_traceTransaction").is_transient());
    }

    #[test]
    fn parse_prestate_extracts_accounts_and_slots() {
        let value = serde_json::json!({
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2": {
                "balance": "0x1",
                "storage": {
                    "0x0000000000000000000000000000000000000000000000000000000000000008": "0x01",
                    "0x0000000000000000000000000000000000000000000000000000000000000009": "0x02"
                }
            },
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48": { "balance": "0x0" }
        });

        let trace = parse_prestate(&value);
        assert_eq!(trace.accounts.len(), 2);
        let weth: Address = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"
            .parse()
            .unwrap();
        assert_eq!(trace.storage[&weth].len(), 2);
    }

    #[test]
    fn parse_prestate_tolerates_unknown_shapes() {
        let trace = parse_prestate(&serde_json::json!("unexpected"));
        assert!(trace.accounts.is_empty());

        let trace = parse_prestate(&serde_json::json!({
            "not-an-address": { "storage": { "alsonotaslot": "0x1" } },
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2": { "storage": "wrong type" }
        }));
        assert_eq!(trace.accounts.len(), 1);
        assert!(trace.storage.is_empty());
    }
}
