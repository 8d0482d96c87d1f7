use crate::pair_graph::RoutingBases;
use crate::pair_state::StablePoolConfig;
use crate::normalization::Percent;
use crate::router::{SearchOptions, BETTER_TRADE_LESS_HOPS_THRESHOLD_BPS, DEFAULT_MAX_HOPS};
use crate::types::{Currency, CurrencyError, NativeCurrency, Token};
use config::{Config, ConfigError, File};
use ethers::types::{Address, U256};
use log::warn;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{field}: invalid address {value:?}")]
    InvalidAddress { field: String, value: String },
    #[error("{field}: {source}")]
    InvalidToken {
        field: String,
        #[source]
        source: CurrencyError,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    #[serde(default)]
    pub http_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_multicall_batch_size")]
    pub multicall_batch_size: usize,
}

fn default_multicall_batch_size() -> usize {
    200
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            http_url: None,
            ws_url: None,
            multicall_batch_size: default_multicall_batch_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenEntry {
    pub address: String,
    pub decimals: u8,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Chain {
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// Multicall3 address
    #[serde(default)]
    pub multicall: Option<String>,
    /// Uniswap V2-style factory
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub wrapped_native: Option<TokenEntry>,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}
fn default_native_decimals() -> u8 {
    18
}

impl Default for Chain {
    fn default() -> Self {
        Self {
            chain_id: None,
            multicall: None,
            factory: None,
            wrapped_native: None,
            native_symbol: default_native_symbol(),
            native_decimals: default_native_decimals(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OfficialPairEntry {
    #[serde(default)]
    pub token_a: Option<TokenEntry>,
    #[serde(default)]
    pub token_b: Option<TokenEntry>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Tokens {
    #[serde(default)]
    pub bases: Vec<TokenEntry>,
    /// token address -> the only counter-tokens it may pair with
    #[serde(default)]
    pub custom_bases: HashMap<String, Vec<TokenEntry>>,
    /// token address -> extra bases used whenever it is traded
    #[serde(default)]
    pub additional_bases: HashMap<String, Vec<TokenEntry>>,
    #[serde(default)]
    pub official_pairs: Vec<OfficialPairEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StablePoolEntry {
    pub address: String,
    pub lp_token: String,
    /// Coin index order of the pool
    pub tokens: Vec<TokenEntry>,
    #[serde(default = "default_amplification")]
    pub amplification: u64,
    #[serde(default = "default_stable_fee_bps")]
    pub fee_bps: u32,
}

fn default_amplification() -> u64 {
    100
}
fn default_stable_fee_bps() -> u32 {
    4
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuoteSource {
    #[default]
    OnChain,
    Aggregator,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Routing {
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default)]
    pub single_hop_only: bool,
    #[serde(default = "default_better_trade_threshold_bps")]
    pub better_trade_threshold_bps: u32,
    #[serde(default = "default_v2_fee_bps")]
    pub v2_fee_bps: u32,
    #[serde(default = "default_allowed_slippage_bps")]
    pub allowed_slippage_bps: u32,
    #[serde(default)]
    pub quote_source: QuoteSource,
    #[serde(default = "default_trade_cache_capacity")]
    pub trade_cache_capacity: usize,
}

fn default_max_hops() -> usize {
    DEFAULT_MAX_HOPS
}
fn default_better_trade_threshold_bps() -> u32 {
    BETTER_TRADE_LESS_HOPS_THRESHOLD_BPS
}
fn default_v2_fee_bps() -> u32 {
    30
}
fn default_allowed_slippage_bps() -> u32 {
    50
}
fn default_trade_cache_capacity() -> usize {
    64
}

impl Default for Routing {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            single_hop_only: false,
            better_trade_threshold_bps: default_better_trade_threshold_bps(),
            v2_fee_bps: default_v2_fee_bps(),
            allowed_slippage_bps: default_allowed_slippage_bps(),
            quote_source: QuoteSource::default(),
            trade_cache_capacity: default_trade_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Refresh {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_block_channel_capacity")]
    pub block_channel_capacity: usize,
}

fn default_interval_seconds() -> u64 {
    15
}
fn default_debounce_ms() -> u64 {
    150
}
fn default_block_channel_capacity() -> usize {
    64
}

impl Default for Refresh {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            debounce_ms: default_debounce_ms(),
            block_channel_capacity: default_block_channel_capacity(),
        }
    }
}

impl Refresh {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Aggregator {
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub rpc: Rpc,
    #[serde(default)]
    pub chain: Chain,
    #[serde(default)]
    pub tokens: Tokens,
    #[serde(default)]
    pub stable_pools: Vec<StablePoolEntry>,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default)]
    pub refresh: Refresh,
    #[serde(default)]
    pub aggregator: Aggregator,
    #[serde(default)]
    pub log: Log,
}

/// Typed configuration handed to the routing components.
#[derive(Debug, Clone)]
pub struct RoutingContext {
    pub chain_id: Option<u64>,
    pub native: Option<NativeCurrency>,
    pub multicall: Option<Address>,
    pub factory: Option<Address>,
    pub bases: RoutingBases,
    pub stable_pools: Vec<StablePoolConfig>,
    pub official_pairs: Vec<(Option<Token>, Option<Token>)>,
    pub search: SearchOptions,
    pub v2_fee_bps: u32,
    pub slippage: Percent,
    pub quote_source: QuoteSource,
    pub single_hop_only: bool,
    pub trade_cache_capacity: usize,
}

impl RoutingContext {
    /// Every token the configuration names, first definition wins.
    pub fn known_tokens(&self) -> Vec<Token> {
        let mut all: Vec<Token> = Vec::new();
        let mut push = |token: &Token| {
            if !all.contains(token) {
                all.push(token.clone());
            }
        };
        if let Some(native) = &self.native {
            push(&native.wrapped);
        }
        self.bases.bases.iter().for_each(&mut push);
        self.bases.custom_bases.values().flatten().for_each(&mut push);
        self.bases.additional_bases.values().flatten().for_each(&mut push);
        self.stable_pools.iter().flat_map(|p| p.tokens.iter()).for_each(&mut push);
        all
    }

    /// Resolves the native symbol, a configured token symbol or address, or
    /// `<address>:<decimals>` for tokens the configuration does not list.
    pub fn resolve_currency(&self, input: &str) -> Option<Currency> {
        let input = input.trim();
        let chain_id = self.chain_id?;
        if let Some(native) = &self.native {
            if native.symbol.eq_ignore_ascii_case(input) {
                return Some(Currency::Native(native.clone()));
            }
        }
        let known = self.known_tokens();
        if let Some(token) = known.iter().find(|t| {
            t.symbol
                .as_deref()
                .map_or(false, |s| s.eq_ignore_ascii_case(input))
        }) {
            return Some(token.clone().into());
        }
        let (raw_address, decimals) = match input.split_once(':') {
            Some((address, decimals)) => (address, Some(decimals.parse::<u8>().ok()?)),
            None => (input, None),
        };
        let address = Address::from_str(raw_address).ok()?;
        if let Some(token) = known.iter().find(|t| t.address == address) {
            return Some(token.clone().into());
        }
        Token::new(chain_id, address, decimals?, None, None)
            .ok()
            .map(Currency::from)
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address, SettingsError> {
    Address::from_str(value.trim()).map_err(|_| SettingsError::InvalidAddress {
        field: field.to_string(),
        value: value.to_string(),
    })
}

fn parse_optional_address(field: &str, value: &Option<String>) -> Result<Option<Address>, SettingsError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_address(field, raw).map(Some),
    }
}

impl TokenEntry {
    pub fn to_token(&self, chain_id: u64, field: &str) -> Result<Token, SettingsError> {
        let address = parse_address(field, &self.address)?;
        Token::new(chain_id, address, self.decimals, self.symbol.clone(), self.name.clone()).map_err(
            |source| SettingsError::InvalidToken {
                field: field.to_string(),
                source,
            },
        )
    }
}

fn to_tokens(entries: &[TokenEntry], chain_id: u64, field: &str) -> Result<Vec<Token>, SettingsError> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| entry.to_token(chain_id, &format!("{}[{}]", field, i)))
        .collect()
}

fn to_token_map(
    map: &HashMap<String, Vec<TokenEntry>>,
    chain_id: u64,
    field: &str,
) -> Result<HashMap<Address, Vec<Token>>, SettingsError> {
    map.iter()
        .map(|(key, entries)| {
            let address = parse_address(field, key)?;
            Ok((address, to_tokens(entries, chain_id, &format!("{}.{}", field, key))?))
        })
        .collect()
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_overrides(|key| env::var(key).ok());
        Ok(settings)
    }

    /// Environment overrides. `lookup` is `std::env::var` outside tests.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("SDK_RPC_HTTP_URL") {
            self.rpc.http_url = Some(url);
        }
        if let Some(url) = non_empty("SDK_RPC_WS_URL") {
            self.rpc.ws_url = Some(url);
        }
        if let Some(raw) = non_empty("SDK_CHAIN_ID") {
            match raw.parse() {
                Ok(chain_id) => self.chain.chain_id = Some(chain_id),
                Err(e) => warn!("Ignoring SDK_CHAIN_ID={:?}: {}", raw, e),
            }
        }
        if let Some(api_base) = non_empty("SDK_AGGREGATOR_API_BASE") {
            self.aggregator.api_base = Some(api_base);
        }
        // JSON list of { address, decimals, symbol?, name? }
        if let Some(raw) = non_empty("SDK_BASE_TOKENS") {
            match serde_json::from_str::<Vec<TokenEntry>>(&raw) {
                Ok(bases) => self.tokens.bases = bases,
                Err(e) => warn!("Failed to parse SDK_BASE_TOKENS as JSON: {}", e),
            }
        }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_hops: if self.routing.single_hop_only {
                1
            } else {
                self.routing.max_hops
            },
            better_trade_threshold_bps: self.routing.better_trade_threshold_bps,
        }
    }

    /// Converts the raw configuration into domain values. Without a chain id every
    /// token list is empty.
    pub fn routing_context(&self) -> Result<RoutingContext, SettingsError> {
        let multicall = parse_optional_address("chain.multicall", &self.chain.multicall)?;
        let factory = parse_optional_address("chain.factory", &self.chain.factory)?;
        let mut context = RoutingContext {
            chain_id: self.chain.chain_id,
            native: None,
            multicall,
            factory,
            bases: RoutingBases::default(),
            stable_pools: Vec::new(),
            official_pairs: Vec::new(),
            search: self.search_options(),
            v2_fee_bps: self.routing.v2_fee_bps,
            slippage: Percent::from_bps(self.routing.allowed_slippage_bps),
            quote_source: self.routing.quote_source,
            single_hop_only: self.routing.single_hop_only,
            trade_cache_capacity: self.routing.trade_cache_capacity,
        };
        let Some(chain_id) = self.chain.chain_id else {
            warn!("chain.chain_id is not set; routing will yield no trades");
            return Ok(context);
        };

        if let Some(entry) = &self.chain.wrapped_native {
            context.native = Some(NativeCurrency {
                chain_id,
                symbol: self.chain.native_symbol.clone(),
                decimals: self.chain.native_decimals,
                wrapped: entry.to_token(chain_id, "chain.wrapped_native")?,
            });
        }

        context.bases = RoutingBases {
            bases: to_tokens(&self.tokens.bases, chain_id, "tokens.bases")?,
            custom_bases: to_token_map(&self.tokens.custom_bases, chain_id, "tokens.custom_bases")?,
            additional_bases: to_token_map(
                &self.tokens.additional_bases,
                chain_id,
                "tokens.additional_bases",
            )?,
        };

        context.stable_pools = self
            .stable_pools
            .iter()
            .enumerate()
            .map(|(i, pool)| {
                let field = format!("stable_pools[{}]", i);
                Ok(StablePoolConfig {
                    address: parse_address(&format!("{}.address", field), &pool.address)?,
                    lp_token: parse_address(&format!("{}.lp_token", field), &pool.lp_token)?,
                    tokens: to_tokens(&pool.tokens, chain_id, &format!("{}.tokens", field))?,
                    amplification: U256::from(pool.amplification),
                    fee_bps: pool.fee_bps,
                })
            })
            .collect::<Result<_, SettingsError>>()?;

        context.official_pairs = self
            .tokens
            .official_pairs
            .iter()
            .enumerate()
            .map(|(i, pair)| {
                let field = format!("tokens.official_pairs[{}]", i);
                let a = pair
                    .token_a
                    .as_ref()
                    .map(|t| t.to_token(chain_id, &field))
                    .transpose()?;
                let b = pair
                    .token_b
                    .as_ref()
                    .map(|t| t.to_token(chain_id, &field))
                    .transpose()?;
                Ok((a, b))
            })
            .collect::<Result<_, SettingsError>>()?;

        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[chain]
chain_id = 42161
multicall = "0xcA11bde05977b3631167028862bE2a173976CA11"
factory = "0xc35DADB65012eC5796536bD9864eD8773aBc74C4"
wrapped_native = { address = "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1", decimals = 18, symbol = "WETH" }

[[tokens.bases]]
address = "0x82aF49447D8a07e3bd95BD0d56f35241523fBab1"
decimals = 18
symbol = "WETH"

[[tokens.bases]]
address = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831"
decimals = 6
symbol = "USDC"

[[stable_pools]]
address = "0x7f90122BF0700F9E7e1F688fe926940E8839F353"
lp_token = "0x7f90122BF0700F9E7e1F688fe926940E8839F353"
tokens = [
  { address = "0xaf88d065e77c8cC2239327C5EDb3A432268e5831", decimals = 6, symbol = "USDC" },
  { address = "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9", decimals = 6, symbol = "USDT" },
]

[routing]
single_hop_only = true
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let file = write_config("[chain]\nchain_id = 1\n");
        let settings = Settings::from_path(file.path()).unwrap();
        assert_eq!(settings.routing.max_hops, 3);
        assert_eq!(settings.routing.better_trade_threshold_bps, 50);
        assert_eq!(settings.routing.v2_fee_bps, 30);
        assert_eq!(settings.routing.quote_source, QuoteSource::OnChain);
        assert_eq!(settings.refresh.interval(), Duration::from_secs(15));
        assert_eq!(settings.refresh.debounce(), Duration::from_millis(150));
    }

    #[test]
    fn test_routing_context_builds_typed_values() {
        let file = write_config(SAMPLE);
        let settings = Settings::from_path(file.path()).unwrap();
        let context = settings.routing_context().unwrap();
        assert_eq!(context.chain_id, Some(42161));
        assert_eq!(context.bases.bases.len(), 2);
        assert_eq!(context.stable_pools[0].tokens[1].symbol.as_deref(), Some("USDT"));
        assert_eq!(context.search.max_hops, 1);
        assert!(context.factory.is_some());

        assert!(context.resolve_currency("eth").unwrap().is_native());
        assert_eq!(context.resolve_currency("usdt").unwrap().decimals(), 6);
        let unknown = context
            .resolve_currency("0x0000000000000000000000000000000000000abc:8")
            .unwrap();
        assert_eq!(unknown.decimals(), 8);
        assert!(context.resolve_currency("0x0000000000000000000000000000000000000abc").is_none());
    }

    #[test]
    fn test_missing_chain_id_degrades_to_empty_context() {
        let file = write_config("[routing]\nmax_hops = 2\n");
        let context = Settings::from_path(file.path()).unwrap().routing_context().unwrap();
        assert_eq!(context.chain_id, None);
        assert!(context.bases.bases.is_empty());
        assert!(context.resolve_currency("ETH").is_none());
    }

    #[test]
    fn test_bad_address_is_reported_with_field() {
        let mut settings = Settings::default();
        settings.chain.chain_id = Some(1);
        settings.chain.factory = Some("0xnothex".into());
        let err = settings.routing_context().unwrap_err();
        assert!(err.to_string().contains("chain.factory"));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        let env: HashMap<&str, &str> = [
            ("SDK_CHAIN_ID", "10"),
            ("SDK_RPC_HTTP_URL", "https://rpc.example.org"),
            ("SDK_AGGREGATOR_API_BASE", " "),
            (
                "SDK_BASE_TOKENS",
                r#"[{"address":"0x4200000000000000000000000000000000000006","decimals":18,"symbol":"WETH"}]"#,
            ),
        ]
        .into_iter()
        .collect();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(settings.chain.chain_id, Some(10));
        assert_eq!(settings.rpc.http_url.as_deref(), Some("https://rpc.example.org"));
        assert!(settings.aggregator.api_base.is_none());
        assert_eq!(settings.tokens.bases[0].symbol.as_deref(), Some("WETH"));
    }
}
