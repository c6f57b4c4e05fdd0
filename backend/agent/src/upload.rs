//! Upload coordinator — validates, guards, stores, and records one file.
//!
//! Per call the pipeline is strictly sequential: storage write → public URL →
//! project record upsert.  Guards run before any network call, in order:
//!
//! 1. gate — the session's subscription must be active;
//! 2. validation — size cap and a non-empty name;
//! 3. single-flight — the session's one upload slot must be free;
//! 4. cooldown — a fixed interval must have passed since the last accepted
//!    call (the clock starts at acceptance, not completion);
//! 5. duplicate — the same `(name, size)` pair is accepted once per session.
//!
//! On failure nothing is stored or recorded and the flight slot is released
//! on drop; only the cooldown clock of an accepted call remains.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::errors::{AgentError, RejectReason, Result};
use crate::records::{ProjectPatch, ProjectRecordStore};
use crate::session::SessionContext;
use crate::storage::{Bucket, StorageClient};

/// A file as received from the client, before any classification.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub display_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FilePayload {
    pub fn size_bytes(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// A successfully stored file.  Immutable once created; a re-upload is a new
/// asset under a new key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedAsset {
    /// The object key within its bucket.
    pub id: String,
    pub display_name: String,
    pub file_kind: String,
    pub remote_url: String,
    pub storage_bucket: String,
    pub size_bytes: i64,
}

pub struct UploadCoordinator {
    storage: Arc<StorageClient>,
    records: Arc<ProjectRecordStore>,
    max_file_bytes: i64,
    cooldown: Duration,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<StorageClient>,
        records: Arc<ProjectRecordStore>,
        max_file_bytes: i64,
        cooldown: Duration,
    ) -> Self {
        Self {
            storage,
            records,
            max_file_bytes,
            cooldown,
        }
    }

    pub async fn upload(
        &self,
        session: &SessionContext,
        file: FilePayload,
    ) -> Result<UploadedAsset> {
        if !session.gate.read().await.is_active() {
            return Err(AgentError::Auth(
                "Active subscription required to upload".to_string(),
            ));
        }

        if file.display_name.is_empty() {
            return Err(AgentError::Validation("File name is empty".to_string()));
        }
        if file.size_bytes() > self.max_file_bytes {
            return Err(AgentError::Validation(format!(
                "File size {} exceeds the {} byte limit",
                file.size_bytes(),
                self.max_file_bytes
            )));
        }

        // Single-slot flight handle: a concurrent caller is rejected, not
        // queued.  Released on drop, success or failure.
        let _flight = session
            .flight
            .try_lock()
            .map_err(|_| AgentError::Rejected(RejectReason::Busy))?;

        let dedup_key = (file.display_name.clone(), file.size_bytes());
        {
            let mut ledger = session.uploads.lock().await;
            if let Some(last) = ledger.last_accepted {
                if last.elapsed() < self.cooldown {
                    return Err(AgentError::Rejected(RejectReason::Cooldown));
                }
            }
            if ledger.seen.contains(&dedup_key) {
                return Err(AgentError::Rejected(RejectReason::Duplicate));
            }
            // The cooldown window runs from acceptance, not from the storage
            // round-trip completing.
            ledger.last_accepted = Some(tokio::time::Instant::now());
        }

        let bucket = Bucket::for_mime(&file.mime);
        let key = object_key(session.address.as_str(), &file.display_name);
        let size_bytes = file.size_bytes();

        self.storage
            .upload(bucket, &key, &file.mime, file.bytes)
            .await?;
        let remote_url = self.storage.public_url(bucket, &key);

        // Only the two classified buckets feed the project record; generic
        // documents are stored without a link column.
        let patch = match bucket {
            Bucket::PitchDecks => Some(ProjectPatch::pitch_deck(&remote_url)),
            Bucket::FundsLists => Some(ProjectPatch::funds_list(&remote_url)),
            Bucket::Documents => None,
        };
        if let Some(patch) = patch {
            let record = self.records.upsert(&session.address, &patch).await?;
            if record.is_complete() {
                info!(
                    "Project record complete for {} — ready for processing",
                    session.address
                );
            }
        }

        session.uploads.lock().await.seen.insert(dedup_key);

        info!(
            "Uploaded {} ({size_bytes} bytes) to {}/{key}",
            file.display_name,
            bucket.as_str()
        );
        Ok(UploadedAsset {
            id: key,
            display_name: file.display_name,
            file_kind: file.mime,
            remote_url,
            storage_bucket: bucket.as_str().to_string(),
            size_bytes,
        })
    }
}

/// Remote object key: tenant prefix + timestamp + original name.  Collision
/// avoidance, not cryptographic uniqueness.
fn object_key(wallet: &str, display_name: &str) -> String {
    format!("{wallet}/{}-{display_name}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::routing::post;
    use axum::Router;

    use crate::records::memory_pool;
    use crate::session::WalletAddress;
    use crate::subscription::GateState;

    /// Throwaway storage stand-in counting writes; accepts every POST.
    async fn mock_storage(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/storage/v1/object/:bucket/*key",
            post(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async { "ok" }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    async fn coordinator(
        base_url: &str,
        cooldown: Duration,
    ) -> (UploadCoordinator, Arc<ProjectRecordStore>) {
        let records = Arc::new(ProjectRecordStore::new(memory_pool().await));
        let storage = Arc::new(StorageClient::new(
            reqwest::Client::new(),
            base_url,
            "test-key",
        ));
        (
            UploadCoordinator::new(storage, records.clone(), 1024, cooldown),
            records,
        )
    }

    fn active_session() -> SessionContext {
        SessionContext::new(
            WalletAddress::parse("0x2222222222222222222222222222222222222222").unwrap(),
            5003,
        )
    }

    async fn unlock(session: &SessionContext) {
        *session.gate.write().await = GateState::Active {
            token_id: 1,
            expires_at: i64::MAX,
        };
    }

    fn pdf(name: &str, len: usize) -> FilePayload {
        FilePayload {
            display_name: name.to_string(),
            mime: "application/pdf".to_string(),
            bytes: vec![0u8; len],
        }
    }

    #[tokio::test]
    async fn upload_requires_active_gate() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, _) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();

        let err = coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap_err();
        assert!(matches!(err, AgentError::Auth(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_file_rejected_before_any_network_call() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, _) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        let err = coordinator
            .upload(&session, pdf("deck.pdf", 4096))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_call_within_cooldown_is_rejected() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, _) = coordinator(&base, Duration::from_millis(1000)).await;
        let session = active_session();
        unlock(&session).await;

        coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap();
        let err = coordinator
            .upload(&session, pdf("other.pdf", 20))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::Rejected(RejectReason::Cooldown)
        ));
        // Exactly one accepted upload reached storage.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_name_and_size_is_rejected() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, _) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap();
        let err = coordinator
            .upload(&session, pdf("deck.pdf", 10))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AgentError::Rejected(RejectReason::Duplicate)
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Same name with different content is a new asset.
        coordinator.upload(&session, pdf("deck.pdf", 11)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pdf_upload_sets_pitch_deck_link() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, records) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        let asset = coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap();
        assert_eq!(asset.storage_bucket, "pitch-decks");
        assert!(asset.remote_url.contains("/public/pitch-decks/"));

        let record = records.get(&session.address).await.unwrap().unwrap();
        assert_eq!(record.pitch_deck_link.as_deref(), Some(asset.remote_url.as_str()));
        assert_eq!(record.funds_list_link, None);
    }

    #[tokio::test]
    async fn csv_upload_sets_funds_list_link() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, records) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        let asset = coordinator
            .upload(
                &session,
                FilePayload {
                    display_name: "funds.csv".to_string(),
                    mime: "text/csv".to_string(),
                    bytes: vec![0u8; 10],
                },
            )
            .await
            .unwrap();
        assert_eq!(asset.storage_bucket, "funds-lists");

        let record = records.get(&session.address).await.unwrap().unwrap();
        assert_eq!(record.funds_list_link.as_deref(), Some(asset.remote_url.as_str()));
    }

    #[tokio::test]
    async fn generic_document_does_not_touch_project_record() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = mock_storage(hits.clone()).await;
        let (coordinator, records) = coordinator(&base, Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        let asset = coordinator
            .upload(
                &session,
                FilePayload {
                    display_name: "notes.txt".to_string(),
                    mime: "text/plain".to_string(),
                    bytes: vec![0u8; 10],
                },
            )
            .await
            .unwrap();
        assert_eq!(asset.storage_bucket, "documents");
        assert!(records.get(&session.address).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_storage_write_records_nothing() {
        // No server behind this address: the write fails at transport level.
        let (coordinator, records) = coordinator("http://127.0.0.1:1", Duration::ZERO).await;
        let session = active_session();
        unlock(&session).await;

        let err = coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap_err();
        assert!(matches!(err, AgentError::Http(_)));
        assert!(records.get(&session.address).await.unwrap().is_none());

        // The failed file was never marked seen, so the same file can be
        // retried, and the flight slot was released.
        assert!(session.uploads.lock().await.seen.is_empty());
        assert!(session.flight.try_lock().is_ok());
    }

    #[tokio::test]
    async fn cooldown_clock_starts_at_acceptance() {
        // The first call is accepted (it passes every guard) even though the
        // storage write then fails; the second call lands inside the window.
        let (coordinator, _) = coordinator("http://127.0.0.1:1", Duration::from_millis(1000)).await;
        let session = active_session();
        unlock(&session).await;

        let err = coordinator.upload(&session, pdf("deck.pdf", 10)).await.unwrap_err();
        assert!(matches!(err, AgentError::Http(_)));

        let err = coordinator
            .upload(&session, pdf("other.pdf", 20))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Rejected(RejectReason::Cooldown)));
    }
}
