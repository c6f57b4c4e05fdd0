//! Wallet sessions — the explicit per-wallet context that gates everything.
//!
//! Every piece of mutable per-user state lives in a [`SessionContext`] with a
//! defined lifecycle: created on connect, dropped on disconnect.  The wallet
//! address is the sole tenant key; all persisted data hangs off it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::info;

use crate::errors::{AgentError, Result};
use crate::subscription::GateState;

/// An externally-owned account address (`0x` + 40 hex chars).
///
/// Normalised to lowercase so it can be used directly as a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let hex_part = raw
            .strip_prefix("0x")
            .ok_or_else(|| AgentError::Validation(format!("Invalid wallet address: {raw}")))?;
        if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AgentError::Validation(format!(
                "Invalid wallet address: {raw}"
            )));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-session upload bookkeeping: the cooldown clock and the set of
/// `(display_name, size_bytes)` pairs already accepted this session.
#[derive(Debug, Default)]
pub struct UploadLedger {
    pub last_accepted: Option<Instant>,
    pub seen: HashSet<(String, i64)>,
}

/// All mutable state for one connected wallet.
#[derive(Debug)]
pub struct SessionContext {
    pub address: WalletAddress,
    pub chain_id: u64,
    pub connected_at: DateTime<Utc>,
    /// Subscription gate state machine.
    pub gate: RwLock<GateState>,
    /// Upload cooldown clock and duplicate ledger.
    pub uploads: Mutex<UploadLedger>,
    /// Single-slot upload flight handle: at most one upload in flight per
    /// session.  A second caller fails `try_lock` and is rejected, not queued.
    pub flight: Mutex<()>,
    /// Trigger job ids currently in flight.
    pub jobs: Mutex<HashSet<String>>,
}

impl SessionContext {
    pub fn new(address: WalletAddress, chain_id: u64) -> Self {
        Self {
            address,
            chain_id,
            connected_at: Utc::now(),
            gate: RwLock::new(GateState::Unsubscribed),
            uploads: Mutex::new(UploadLedger::default()),
            flight: Mutex::new(()),
            jobs: Mutex::new(HashSet::new()),
        }
    }
}

/// Registry of live sessions, keyed by wallet address.
pub struct SessionRegistry {
    expected_chain_id: u64,
    sessions: RwLock<HashMap<WalletAddress, Arc<SessionContext>>>,
}

impl SessionRegistry {
    pub fn new(expected_chain_id: u64) -> Self {
        Self {
            expected_chain_id,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Open a session for a wallet.  Connecting the same wallet twice returns
    /// the existing session unchanged.  A wallet on the wrong network is
    /// refused before any state is created.
    pub async fn connect(
        &self,
        address: WalletAddress,
        chain_id: u64,
    ) -> Result<Arc<SessionContext>> {
        if chain_id != self.expected_chain_id {
            return Err(AgentError::Auth(format!(
                "Wrong network: expected chain {}, got {chain_id}",
                self.expected_chain_id
            )));
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&address) {
            return Ok(existing.clone());
        }

        let session = Arc::new(SessionContext::new(address.clone(), chain_id));
        sessions.insert(address.clone(), session.clone());
        info!("Session opened for {address}");
        Ok(session)
    }

    pub async fn get(&self, address: &WalletAddress) -> Result<Arc<SessionContext>> {
        self.sessions
            .read()
            .await
            .get(address)
            .cloned()
            .ok_or_else(|| AgentError::Auth(format!("No active session for {address}")))
    }

    /// Tear down a session.  All gate, cooldown and in-flight state is
    /// dropped with it; the persisted project record is untouched.
    pub async fn disconnect(&self, address: &WalletAddress) -> bool {
        let removed = self.sessions.write().await.remove(address).is_some();
        if removed {
            info!("Session closed for {address}");
        }
        removed
    }

    /// Snapshot of all live sessions (used by the revalidation sweep).
    pub async fn all(&self) -> Vec<Arc<SessionContext>> {
        self.sessions.read().await.values().cloned().collect()
    }
}
