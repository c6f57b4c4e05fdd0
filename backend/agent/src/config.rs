//! Application configuration loaded from environment variables.

use crate::errors::{AgentError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// EVM JSON-RPC endpoint (e.g. https://rpc.sepolia.mantle.xyz)
    pub rpc_url: String,
    /// The SubscriptionNFT contract address (0x-prefixed)
    pub contract_address: String,
    /// Chain id sessions are expected to connect with
    pub chain_id: u64,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Object storage REST base URL
    pub storage_url: String,
    /// Bearer key for object storage writes
    pub storage_key: String,
    /// Processing webhook endpoint
    pub webhook_url: String,
    /// Maximum accepted upload size in bytes
    pub max_file_bytes: i64,
    /// Minimum interval between accepted uploads per session (ms)
    pub upload_cooldown_ms: u64,
    /// How often (in seconds) to poll for a transaction receipt
    pub receipt_poll_secs: u64,
    /// How many receipt polls before a transaction is considered lost
    pub receipt_poll_attempts: u32,
    /// How often (in seconds) to re-check active subscriptions against chain expiry
    pub revalidate_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://rpc.sepolia.mantle.xyz".to_string()),
            contract_address: env_var("CONTRACT_ADDRESS").map_err(|_| {
                AgentError::Config("CONTRACT_ADDRESS environment variable is required".to_string())
            })?,
            chain_id: env_var("CHAIN_ID")
                .unwrap_or_else(|_| "5003".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid CHAIN_ID".to_string()))?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./fundraise_agent.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid API_PORT".to_string()))?,
            storage_url: env_var("STORAGE_URL").map_err(|_| {
                AgentError::Config("STORAGE_URL environment variable is required".to_string())
            })?,
            storage_key: env_var("STORAGE_KEY").map_err(|_| {
                AgentError::Config("STORAGE_KEY environment variable is required".to_string())
            })?,
            webhook_url: env_var("WEBHOOK_URL").map_err(|_| {
                AgentError::Config("WEBHOOK_URL environment variable is required".to_string())
            })?,
            max_file_bytes: env_var("MAX_FILE_BYTES")
                .unwrap_or_else(|_| "52428800".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid MAX_FILE_BYTES".to_string()))?,
            upload_cooldown_ms: env_var("UPLOAD_COOLDOWN_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid UPLOAD_COOLDOWN_MS".to_string()))?,
            receipt_poll_secs: env_var("RECEIPT_POLL_SECS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid RECEIPT_POLL_SECS".to_string()))?,
            receipt_poll_attempts: env_var("RECEIPT_POLL_ATTEMPTS")
                .unwrap_or_else(|_| "40".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid RECEIPT_POLL_ATTEMPTS".to_string()))?,
            revalidate_interval_secs: env_var("REVALIDATE_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| AgentError::Config("Invalid REVALIDATE_INTERVAL_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AgentError::Config(format!("Missing env var: {key}")))
}
