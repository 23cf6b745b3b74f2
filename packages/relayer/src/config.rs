use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tendermint_rpc::client::CompatMode;

use crate::submitter::{GasPolicy, RetryPolicy, DEFAULT_GAS_LIMIT, DEFAULT_MIN_GAS_PRICE};

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub tendermint: TendermintConfig,
    pub evm: EvmConfig,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Cosmos node endpoints
#[derive(Debug, Clone)]
pub struct TendermintConfig {
    pub rpc_url: String,
    pub ws_url: String,
    /// RPC dialect; detected from the node's `/status` when unset
    pub compat_mode: Option<CompatMode>,
}

/// EVM configuration
#[derive(Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub registry_address: Address,
    pub private_key: String,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for EvmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("registry_address", &self.registry_address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Relayer configuration
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub checkpoint_db_path: PathBuf,
    pub min_gas_price_wei: u128,
    pub gas_limit: u64,
    pub submit_max_retries: u32,
    pub submit_retry_delay_ms: u64,
    pub restart_delay_ms: u64,
}

impl RelayerConfig {
    pub fn gas_policy(&self) -> GasPolicy {
        GasPolicy {
            min_gas_price: self.min_gas_price_wei,
            gas_limit: self.gas_limit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.submit_max_retries,
            Duration::from_millis(self.submit_retry_delay_ms),
        )
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Health/metrics API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Listen port; 0 disables the server
    pub port: u16,
}

/// Default functions
fn default_checkpoint_db_path() -> PathBuf {
    PathBuf::from("./relayerdb")
}

fn checkpoint_db_path(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    var("CHECKPOINT_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(default_checkpoint_db_path)
}

fn default_submit_max_retries() -> u32 {
    30
}

fn default_submit_retry_delay() -> u64 {
    1000
}

fn default_restart_delay() -> u64 {
    1000
}

fn default_api_port() -> u16 {
    9090
}

/// `http(s)://host:port` -> `ws(s)://host:port/websocket`
fn default_ws_url(rpc_url: &str) -> String {
    let base = rpc_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/websocket", ws)
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Checkpoint location alone, for commands that never reach either chain
    pub fn checkpoint_db_path_from_file(path: &str) -> Result<PathBuf> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Ok(checkpoint_db_path(|key| env::var(key).ok()))
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required =
            |key: &str| var(key).ok_or_else(|| eyre!("{} environment variable is required", key));

        let rpc_url = required("TENDERMINT_RPC_URL")?;
        let compat_mode = var("TENDERMINT_COMPAT_MODE")
            .map(|v| v.parse::<CompatMode>())
            .transpose()
            .wrap_err("TENDERMINT_COMPAT_MODE must be v0.34 or v0.37")?;
        let tendermint = TendermintConfig {
            ws_url: var("TENDERMINT_WS_URL").unwrap_or_else(|| default_ws_url(&rpc_url)),
            rpc_url,
            compat_mode,
        };

        let evm = EvmConfig {
            rpc_url: required("EVM_RPC_URL")?,
            chain_id: required("EVM_CHAIN_ID")?
                .parse()
                .wrap_err("EVM_CHAIN_ID must be a valid u64")?,
            registry_address: required("BRIDGE_REGISTRY_ADDRESS")?
                .parse()
                .wrap_err("BRIDGE_REGISTRY_ADDRESS must be a valid hex address")?,
            private_key: required("ETHEREUM_PRIVATE_KEY")?,
        };

        let relayer = RelayerConfig {
            checkpoint_db_path: checkpoint_db_path(&var),
            min_gas_price_wei: var("MIN_GAS_PRICE_WEI")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_GAS_PRICE),
            gas_limit: var("GAS_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_GAS_LIMIT),
            submit_max_retries: var("SUBMIT_MAX_RETRIES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_submit_max_retries()),
            submit_retry_delay_ms: var("SUBMIT_RETRY_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_submit_retry_delay()),
            restart_delay_ms: var("RESTART_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_restart_delay()),
        };

        let api = ApiConfig {
            port: var("API_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_api_port()),
        };

        let config = Config {
            tendermint,
            evm,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.tendermint.rpc_url.is_empty() {
            return Err(eyre!("tendermint.rpc_url cannot be empty"));
        }

        let ws_url = &self.tendermint.ws_url;
        if !ws_url.starts_with("ws://") && !ws_url.starts_with("wss://") {
            return Err(eyre!("tendermint.ws_url must use the ws:// or wss:// scheme"));
        }

        if self.evm.rpc_url.is_empty() {
            return Err(eyre!("evm.rpc_url cannot be empty"));
        }

        if self.evm.registry_address == Address::ZERO {
            return Err(eyre!("evm.registry_address cannot be the zero address"));
        }

        // Validate EVM private key
        let key = self.evm.private_key.trim_start_matches("0x");
        if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(eyre!(
                "evm.private_key must be 64 hex chars (optionally 0x-prefixed)"
            ));
        }

        if self.relayer.submit_max_retries == 0 {
            return Err(eyre!("relayer.submit_max_retries must be at least 1"));
        }

        if self.relayer.gas_limit == 0 {
            return Err(eyre!("relayer.gas_limit cannot be zero"));
        }

        Ok(())
    }
}
