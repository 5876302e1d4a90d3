//! Process-lifetime registries of tracked DEXes and tokens.
//!
//! All entries are Ethereum mainnet. A factory address plus its pair
//! init-code hash is everything needed to derive any pair address, so
//! the tables below never require an on-chain lookup.

use alloy::primitives::{address, b256, Address, B256};

/// A Uniswap V2-compatible exchange: factory, init-code hash, router.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DexConfig {
    /// Short lowercase identifier (e.g. "uniswap").
    pub name: &'static str,
    /// Pair factory contract.
    pub factory: Address,
    /// keccak-256 of the pair contract creation code, as deployed by `factory`.
    pub init_code_hash: B256,
    /// Router02-compatible swap router.
    pub router: Address,
}

/// All tracked Uniswap V2 forks on Ethereum mainnet.
///
/// Re-ordering entries is safe: pair derivation keys on sorted token
/// addresses, never on registry position.
pub const KNOWN_DEXES: [DexConfig; 3] = [
    DexConfig {
        name: "uniswap",
        factory: address!("5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
        init_code_hash: b256!("96e8ac4277198ff8b6f785478aa9a39f403cb768dd02cbee326c3e7da348845f"),
        router: address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
    },
    DexConfig {
        name: "sushiswap",
        factory: address!("C0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac"),
        init_code_hash: b256!("e18a34eb0e04b04f7a0ac29a6e80748dca96319b42c54d679cb821dca90c6303"),
        router: address!("d9e1cE17f2641f24aE83637ab66a2cca9C378B9F"),
    },
    DexConfig {
        name: "shibaswap",
        factory: address!("115934131916C8b277DD010Ee02de363c09d037c"),
        init_code_hash: b256!("65d1a3b1e46c6e4f1be1ad5f99ef14dc488ae0549dc97db9b30afe2241ce1c7a"),
        router: address!("03f7724180AA6b939894B5Ca4314783B0b36b329"),
    },
];

/// Token address plus display metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
}

pub const WETH: TokenInfo = TokenInfo {
    symbol: "WETH",
    address: address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"),
    decimals: 18,
};

pub const USDC: TokenInfo = TokenInfo {
    symbol: "USDC",
    address: address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
    decimals: 6,
};

pub const USDT: TokenInfo = TokenInfo {
    symbol: "USDT",
    address: address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
    decimals: 6,
};

pub const DAI: TokenInfo = TokenInfo {
    symbol: "DAI",
    address: address!("6B175474E89094C44Da98b954EedeAC495271d0F"),
    decimals: 18,
};

pub const WBTC: TokenInfo = TokenInfo {
    symbol: "WBTC",
    address: address!("2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"),
    decimals: 8,
};

/// Every token the analytics layer knows about.
pub const KNOWN_TOKENS: [TokenInfo; 5] = [WETH, USDC, USDT, DAI, WBTC];

/// Looks up a token by its display symbol (case-insensitive).
pub fn token_by_symbol(symbol: &str) -> Option<&'static TokenInfo> {
    KNOWN_TOKENS
        .iter()
        .find(|token| token.symbol.eq_ignore_ascii_case(symbol))
}

/// Looks up a DEX by its registry name.
pub fn dex_by_name(name: &str) -> Option<&'static DexConfig> {
    KNOWN_DEXES.iter().find(|dex| dex.name == name)
}
