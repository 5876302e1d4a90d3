//! searcher-data: chain access and persistence layer.
//!
//! Wraps a JSON-RPC archive endpoint behind a typed client with batched
//! reads and prestate tracing, persists historical account/storage state
//! in SQLite, and exposes a read-only view over the mempool corpus
//! produced by the external ingester.

pub mod client;
pub mod mempool;
pub mod registry;
pub mod state_cache;

pub use client::{AccountSnapshot, ChainClient, ClientError, PrestateTrace};
pub use mempool::MempoolDb;
pub use registry::{DexConfig, TokenInfo, KNOWN_DEXES, KNOWN_TOKENS};
pub use state_cache::StateCacheDb;
