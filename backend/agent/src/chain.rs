//! EVM JSON-RPC client for the SubscriptionNFT contract.
//!
//! Read calls go through `eth_call` with hand-encoded ABI (4-byte selector +
//! 32-byte padded words) — the contract surface is small enough that a codegen
//! dependency buys nothing.  State-changing calls are signed client-side by
//! the wallet; this client only broadcasts the raw transaction and polls for
//! the receipt.
//!
//! ## Resilience
//!
//! Transient transport errors and rate-limit responses are retried with
//! exponential back-off, up to [`MAX_RPC_ATTEMPTS`] attempts.  JSON-RPC
//! errors from the node are hard failures and surfaced verbatim.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{AgentError, Result};
use crate::session::WalletAddress;

const MAX_RPC_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;

// Function selectors: first four bytes of keccak-256 of the signature.
/// `subscriptionCost()`
const SEL_SUBSCRIPTION_COST: [u8; 4] = [0x7d, 0xd3, 0x9f, 0xa7];
/// `totalSupply()`
const SEL_TOTAL_SUPPLY: [u8; 4] = [0x18, 0x16, 0x0d, 0xdd];
/// `isSubscriptionActive(uint256)`
const SEL_IS_SUBSCRIPTION_ACTIVE: [u8; 4] = [0x57, 0xe2, 0xc0, 0xf5];
/// `getSubscriptionData(uint256)`
const SEL_GET_SUBSCRIPTION_DATA: [u8; 4] = [0xc2, 0xa9, 0x4d, 0xb4];
/// `mint(address)`
const SEL_MINT: [u8; 4] = [0x6a, 0x62, 0x78, 0x42];
/// `extendSubscription(uint256)`
const SEL_EXTEND_SUBSCRIPTION: [u8; 4] = [0xfc, 0x59, 0x28, 0x2d];

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// On-chain subscription data for a token: `(expiresAt, active, mintedAt)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionData {
    pub expires_at: u64,
    pub active: bool,
    pub minted_at: u64,
}

// ─────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────

pub struct ContractClient {
    client: Client,
    rpc_url: String,
    contract: String,
    receipt_poll_interval: Duration,
    receipt_poll_attempts: u32,
}

impl ContractClient {
    pub fn new(
        client: Client,
        rpc_url: impl Into<String>,
        contract: impl Into<String>,
        receipt_poll_interval: Duration,
        receipt_poll_attempts: u32,
    ) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            contract: contract.into(),
            receipt_poll_interval,
            receipt_poll_attempts,
        }
    }

    /// The chain id the RPC node is serving (`eth_chainId`).
    pub async fn chain_id(&self) -> Result<u64> {
        let result = self.call_rpc("eth_chainId", json!([])).await?;
        decode_quantity(result_str(&result)?)
    }

    /// Current mint price in the chain's smallest denomination.
    pub async fn subscription_cost(&self) -> Result<u128> {
        let data = encode_call(SEL_SUBSCRIPTION_COST, &[]);
        let words = self.eth_call(&data).await?;
        Ok(word_to_u128(first_word(&words)?))
    }

    /// Number of subscription tokens minted so far.  Tokens are minted
    /// sequentially, so this doubles as the id of the newest token.
    pub async fn total_supply(&self) -> Result<u64> {
        let data = encode_call(SEL_TOTAL_SUPPLY, &[]);
        let words = self.eth_call(&data).await?;
        Ok(word_to_u128(first_word(&words)?) as u64)
    }

    pub async fn is_subscription_active(&self, token_id: u64) -> Result<bool> {
        let data = encode_call(SEL_IS_SUBSCRIPTION_ACTIVE, &[encode_u256(token_id as u128)]);
        let words = self.eth_call(&data).await?;
        Ok(word_to_bool(first_word(&words)?))
    }

    pub async fn subscription_data(&self, token_id: u64) -> Result<SubscriptionData> {
        let data = encode_call(SEL_GET_SUBSCRIPTION_DATA, &[encode_u256(token_id as u128)]);
        let words = self.eth_call(&data).await?;
        if words.len() < 3 {
            return Err(AgentError::Chain(format!(
                "getSubscriptionData returned {} words, expected 3",
                words.len()
            )));
        }
        Ok(SubscriptionData {
            expires_at: word_to_u128(&words[0]) as u64,
            active: word_to_bool(&words[1]),
            minted_at: word_to_u128(&words[2]) as u64,
        })
    }

    /// Calldata for `mint(address)`, for the wallet to sign.
    pub fn mint_calldata(&self, recipient: &WalletAddress) -> Result<String> {
        Ok(encode_call(SEL_MINT, &[encode_address(recipient)?]))
    }

    /// Calldata for `extendSubscription(uint256)`, for the wallet to sign.
    pub fn extend_calldata(&self, token_id: u64) -> String {
        encode_call(SEL_EXTEND_SUBSCRIPTION, &[encode_u256(token_id as u128)])
    }

    pub fn contract_address(&self) -> &str {
        &self.contract
    }

    /// Broadcast a wallet-signed transaction.  Returns the transaction hash.
    pub async fn send_raw_transaction(&self, signed_tx: &str) -> Result<String> {
        let result = self
            .call_rpc("eth_sendRawTransaction", json!([signed_tx]))
            .await?;
        Ok(result_str(&result)?.to_string())
    }

    /// Poll for a transaction receipt until it lands or the attempt budget is
    /// exhausted.  A receipt with `status == 0x0` is a revert.
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<()> {
        for attempt in 1..=self.receipt_poll_attempts {
            let result = self
                .call_rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if result.is_null() {
                debug!("Receipt for {tx_hash} not yet available (attempt {attempt})");
                tokio::time::sleep(self.receipt_poll_interval).await;
                continue;
            }

            let status = result
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("0x0");
            if status == "0x1" {
                return Ok(());
            }
            return Err(AgentError::Chain(format!("Transaction {tx_hash} reverted")));
        }
        Err(AgentError::Chain(format!(
            "Transaction {tx_hash} not confirmed after {} polls",
            self.receipt_poll_attempts
        )))
    }

    async fn eth_call(&self, data: &str) -> Result<Vec<[u8; 32]>> {
        let params = json!([{ "to": self.contract, "data": data }, "latest"]);
        let result = self.call_rpc("eth_call", params).await?;
        decode_words(result_str(&result)?)
    }

    async fn call_rpc(&self, method: &str, params: Value) -> Result<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let mut backoff = INITIAL_BACKOFF_SECS;

        for attempt in 1..=MAX_RPC_ATTEMPTS {
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&request)
                .send()
                .await;

            match response {
                Err(e) if attempt < MAX_RPC_ATTEMPTS => {
                    warn!("RPC request failed (will retry in {backoff}s): {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff *= 2;
                    continue;
                }
                Err(e) => return Err(e.into()),
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
                        && attempt < MAX_RPC_ATTEMPTS
                    {
                        warn!("Rate-limited by RPC (will retry in {backoff}s)");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff *= 2;
                        continue;
                    }

                    let body: RpcResponse = resp.json().await?;
                    if let Some(err) = body.error {
                        // Node-reported errors (reverts, bad params) are
                        // surfaced verbatim, never retried.
                        return Err(AgentError::Chain(format!(
                            "RPC error {}: {}",
                            err.code, err.message
                        )));
                    }
                    return body.result.ok_or_else(|| {
                        AgentError::Chain(format!("Empty result from {method}"))
                    });
                }
            }
        }
        unreachable!("rpc attempt loop always returns")
    }
}

// ─────────────────────────────────────────────────────────
// ABI encode / decode helpers
// ─────────────────────────────────────────────────────────

fn encode_call(selector: [u8; 4], args: &[[u8; 32]]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector);
    for arg in args {
        data.extend_from_slice(arg);
    }
    format!("0x{}", hex::encode(data))
}

fn encode_u256(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_address(address: &WalletAddress) -> Result<[u8; 32]> {
    let bytes = hex::decode(&address.as_str()[2..])
        .map_err(|e| AgentError::Chain(format!("Bad address hex: {e}")))?;
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

fn decode_words(data: &str) -> Result<Vec<[u8; 32]>> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    let bytes =
        hex::decode(stripped).map_err(|e| AgentError::Chain(format!("Bad call result: {e}")))?;
    if bytes.len() % 32 != 0 {
        return Err(AgentError::Chain(format!(
            "Call result length {} is not word-aligned",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn first_word(words: &[[u8; 32]]) -> Result<&[u8; 32]> {
    words
        .first()
        .ok_or_else(|| AgentError::Chain("Empty call result".to_string()))
}

fn word_to_u128(word: &[u8; 32]) -> u128 {
    let mut tail = [0u8; 16];
    tail.copy_from_slice(&word[16..]);
    u128::from_be_bytes(tail)
}

fn word_to_bool(word: &[u8; 32]) -> bool {
    word.iter().any(|&b| b != 0)
}

/// Decode a `0x`-prefixed hex quantity (e.g. `eth_chainId` results).
fn decode_quantity(data: &str) -> Result<u64> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    u64::from_str_radix(stripped, 16)
        .map_err(|e| AgentError::Chain(format!("Bad quantity {data}: {e}")))
}

fn result_str(result: &Value) -> Result<&str> {
    result
        .as_str()
        .ok_or_else(|| AgentError::Chain(format!("Expected string result, got {result}")))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
