//! Subscription gate — the on-chain state machine that unlocks everything else.
//!
//! Per session the gate moves through:
//!
//! ```text
//! Unsubscribed ──► Subscribing ──► Active ──► Expired
//!       ▲               │            ▲           │
//!       └───────────────┘ (failure)  └───────────┘ (extend)
//! ```
//!
//! "Disconnected" is represented by the absence of a session.  `Active` is
//! never taken on faith: it is confirmed against the contract after the mint
//! receipt lands, and re-validated against on-chain expiry both on demand and
//! by a periodic background sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::chain::ContractClient;
use crate::errors::{AgentError, RejectReason, Result};
use crate::session::{SessionContext, SessionRegistry};

/// Gate state for one wallet session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateState {
    /// Connected, no subscription token confirmed.
    Unsubscribed,
    /// A mint transaction has been broadcast and awaits confirmation.
    Subscribing,
    /// Subscription confirmed on chain.
    Active {
        #[serde(rename = "tokenId")]
        token_id: u64,
        #[serde(rename = "expiresAt")]
        expires_at: i64,
    },
    /// The token's on-chain expiry has passed.
    Expired {
        #[serde(rename = "tokenId")]
        token_id: u64,
    },
}

impl GateState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// A transaction request for the wallet to sign: the mint/extend call the
/// frontend submits back through [`SubscriptionGate::subscribe`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
    pub to: String,
    /// Call value in the chain's smallest denomination, as a decimal string.
    pub value: String,
    pub data: String,
}

pub struct SubscriptionGate {
    chain: Arc<ContractClient>,
}

impl SubscriptionGate {
    pub fn new(chain: Arc<ContractClient>) -> Self {
        Self { chain }
    }

    /// Build the mint transaction for the wallet to sign, priced by a live
    /// `subscriptionCost()` read.
    pub async fn prepare_mint(&self, session: &SessionContext) -> Result<TxRequest> {
        let cost = self.chain.subscription_cost().await?;
        Ok(TxRequest {
            to: self.chain.contract_address().to_string(),
            value: cost.to_string(),
            data: self.chain.mint_calldata(&session.address)?,
        })
    }

    /// Build the extend transaction for an existing token.
    pub async fn prepare_extend(&self, token_id: u64) -> Result<TxRequest> {
        let cost = self.chain.subscription_cost().await?;
        Ok(TxRequest {
            to: self.chain.contract_address().to_string(),
            value: cost.to_string(),
            data: self.chain.extend_calldata(token_id),
        })
    }

    /// Broadcast a wallet-signed mint transaction and track it to
    /// confirmation.  On success the gate becomes `Active`; on any failure it
    /// returns to `Unsubscribed` with the error surfaced verbatim — no retry.
    pub async fn subscribe(&self, session: &SessionContext, signed_tx: &str) -> Result<GateState> {
        {
            let mut gate = session.gate.write().await;
            match *gate {
                GateState::Subscribing => return Err(AgentError::Rejected(RejectReason::Busy)),
                GateState::Active { .. } => return Ok(gate.clone()),
                _ => *gate = GateState::Subscribing,
            }
        }

        let result = self.confirm_mint(session, signed_tx).await;
        let mut gate = session.gate.write().await;
        match result {
            Ok(state) => {
                *gate = state.clone();
                Ok(state)
            }
            Err(e) => {
                *gate = GateState::Unsubscribed;
                Err(e)
            }
        }
    }

    async fn confirm_mint(&self, session: &SessionContext, signed_tx: &str) -> Result<GateState> {
        let tx_hash = self.chain.send_raw_transaction(signed_tx).await?;
        info!("Mint broadcast for {}: {tx_hash}", session.address);

        self.chain.wait_for_receipt(&tx_hash).await?;

        // Tokens are minted sequentially; the newest id is the total supply.
        // A mint from another wallet landing between the receipt and this
        // read would shift the id.
        // TODO: decode the Transfer log from the receipt to pin the exact id.
        let token_id = self.chain.total_supply().await?;
        let data = self.chain.subscription_data(token_id).await?;
        if !self.chain.is_subscription_active(token_id).await? {
            return Err(AgentError::Chain(format!(
                "Mint {tx_hash} confirmed but token {token_id} is not active"
            )));
        }

        info!(
            "Subscription active for {}: token {token_id}, expires at {}",
            session.address, data.expires_at
        );
        Ok(GateState::Active {
            token_id,
            expires_at: data.expires_at as i64,
        })
    }

    /// Broadcast a wallet-signed `extendSubscription` transaction and
    /// re-read the token's data once confirmed.
    pub async fn extend(
        &self,
        session: &SessionContext,
        signed_tx: &str,
        token_id: u64,
    ) -> Result<GateState> {
        let tx_hash = self.chain.send_raw_transaction(signed_tx).await?;
        info!("Extend broadcast for {}: {tx_hash}", session.address);
        self.chain.wait_for_receipt(&tx_hash).await?;

        let data = self.chain.subscription_data(token_id).await?;
        let state = if data.active {
            GateState::Active {
                token_id,
                expires_at: data.expires_at as i64,
            }
        } else {
            GateState::Expired { token_id }
        };
        *session.gate.write().await = state.clone();
        Ok(state)
    }

    /// Re-check a session's gate against chain truth.  `Active` sessions are
    /// demoted when their token has expired; `Expired` sessions are promoted
    /// back if the token was renewed out of band.
    pub async fn refresh(&self, session: &SessionContext) -> Result<GateState> {
        let token_id = match *session.gate.read().await {
            GateState::Active { token_id, .. } | GateState::Expired { token_id } => token_id,
            ref other => return Ok(other.clone()),
        };

        let data = self.chain.subscription_data(token_id).await?;
        let state = if data.active {
            GateState::Active {
                token_id,
                expires_at: data.expires_at as i64,
            }
        } else {
            info!(
                "Subscription expired for {} (token {token_id})",
                session.address
            );
            GateState::Expired { token_id }
        };
        *session.gate.write().await = state.clone();
        Ok(state)
    }
}

/// Periodic sweep re-validating every live session against on-chain expiry.
/// Runs as a background [`tokio`] task for the life of the process.
pub async fn run_revalidator(
    registry: Arc<SessionRegistry>,
    gate: Arc<SubscriptionGate>,
    interval: Duration,
) {
    info!("Subscription revalidator starting (every {interval:?})");
    loop {
        tokio::time::sleep(interval).await;
        for session in registry.all().await {
            if let Err(e) = gate.refresh(&session).await {
                error!("Revalidation failed for {}: {e}", session.address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_active_opens_the_gate() {
        assert!(!GateState::Unsubscribed.is_active());
        assert!(!GateState::Subscribing.is_active());
        assert!(!GateState::Expired { token_id: 7 }.is_active());
        assert!(GateState::Active {
            token_id: 7,
            expires_at: 0
        }
        .is_active());
    }

    #[test]
    fn gate_state_serialises_with_tag() {
        let json = serde_json::to_value(GateState::Active {
            token_id: 3,
            expires_at: 1_700_000_000,
        })
        .unwrap();
        assert_eq!(json["state"], "active");
        assert_eq!(json["tokenId"], 3);
        assert_eq!(json["expiresAt"], 1_700_000_000i64);
    }
}
