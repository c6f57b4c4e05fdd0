//! Fundraise trigger — hands a complete project record to the processing
//! webhook and surfaces the returned result link.
//!
//! The webhook owns the actual analysis; this side only enforces the
//! preconditions (active gate, both links present, job not already running)
//! and the response contract.  Failures are logged and the in-flight marker
//! is removed so a later call is never blocked by a stale job.

use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::errors::{AgentError, RejectReason, Result};
use crate::records::ProjectRecordStore;
use crate::session::SessionContext;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    pitch_deck_link: &'a str,
    funds_list_link: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    ok: bool,
    spreadsheet_url: Option<String>,
}

/// The webhook's result link.  Ephemeral — surfaced to the caller, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub spreadsheet_url: String,
}

pub struct FundraiseTrigger {
    client: Client,
    webhook_url: String,
    records: Arc<ProjectRecordStore>,
}

impl FundraiseTrigger {
    pub fn new(client: Client, webhook_url: impl Into<String>, records: Arc<ProjectRecordStore>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
            records,
        }
    }

    pub async fn start(&self, session: &SessionContext) -> Result<ProcessingResult> {
        if !session.gate.read().await.is_active() {
            return Err(AgentError::Auth(
                "Active subscription required to start processing".to_string(),
            ));
        }

        let record = self
            .records
            .get(&session.address)
            .await?
            .ok_or_else(|| AgentError::Validation("No project record for wallet".to_string()))?;

        let (pitch_deck_link, funds_list_link) =
            match (record.pitch_deck_link, record.funds_list_link) {
                (Some(deck), Some(funds)) => (deck, funds),
                _ => {
                    return Err(AgentError::Validation(
                        "Both a pitch deck and a funds list must be uploaded first".to_string(),
                    ))
                }
            };

        // One logical job per wallet; a second start while it runs is refused.
        let job_id = session.address.as_str().to_string();
        if !session.jobs.lock().await.insert(job_id.clone()) {
            return Err(AgentError::Rejected(RejectReason::Busy));
        }

        let result = self
            .call_webhook(&pitch_deck_link, &funds_list_link)
            .await;

        // Always clear the marker, success or failure.
        session.jobs.lock().await.remove(&job_id);

        match result {
            Ok(processing) => {
                info!(
                    "Processing complete for {}: {}",
                    session.address, processing.spreadsheet_url
                );
                Ok(processing)
            }
            Err(e) => {
                error!("Processing failed for {}: {e}", session.address);
                Err(e)
            }
        }
    }

    async fn call_webhook(
        &self,
        pitch_deck_link: &str,
        funds_list_link: &str,
    ) -> Result<ProcessingResult> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&ProcessRequest {
                pitch_deck_link,
                funds_list_link,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AgentError::Webhook(format!(
                "Processing webhook returned {status}"
            )));
        }

        let body: ProcessResponse = resp.json().await?;
        if !body.ok {
            return Err(AgentError::Webhook(
                "Processing webhook reported failure".to_string(),
            ));
        }
        let spreadsheet_url = body.spreadsheet_url.ok_or_else(|| {
            AgentError::Webhook("Processing webhook response missing spreadsheetUrl".to_string())
        })?;

        Ok(ProcessingResult { spreadsheet_url })
    }
}
