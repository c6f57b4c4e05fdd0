//! Object storage client.
//!
//! Talks to a Supabase-style storage REST API: objects are written to
//! `POST {base}/storage/v1/object/{bucket}/{key}` and served publicly from
//! `{base}/storage/v1/object/public/{bucket}/{key}`.  Writes are
//! non-destructive (`x-upsert: false`): an existing key is never overwritten.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::errors::{AgentError, Result};

/// Storage partition for one category of uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    PitchDecks,
    FundsLists,
    Documents,
}

impl Bucket {
    /// Classify a file by MIME type: PDF is a pitch deck, CSV/Excel is a
    /// funds list, everything else goes to the generic documents bucket.
    pub fn for_mime(mime: &str) -> Self {
        match mime {
            "application/pdf" => Self::PitchDecks,
            "text/csv"
            | "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Self::FundsLists
            }
            _ => Self::Documents,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PitchDecks => "pitch-decks",
            Self::FundsLists => "funds-lists",
            Self::Documents => "documents",
        }
    }
}

pub struct StorageClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StorageClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            api_key: api_key.into(),
        }
    }

    /// Write an object.  Fails if an object with the exact key already
    /// exists; the caller avoids this in practice by keying with a timestamp.
    pub async fn upload(&self, bucket: Bucket, key: &str, mime: &str, bytes: Vec<u8>) -> Result<()> {
        let url = format!("{}/storage/v1/object/{}/{key}", self.base_url, bucket.as_str());

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("x-upsert", "false")
            .header(CONTENT_TYPE, mime)
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::CONFLICT {
            return Err(AgentError::Storage(format!(
                "Object already exists: {}/{key}",
                bucket.as_str()
            )));
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AgentError::Storage(format!(
            "Storage write failed ({status}): {body}"
        )))
    }

    /// Public URL for a stored object.  Purely a string derivation — the
    /// storage service serves public buckets at a fixed path.
    pub fn public_url(&self, bucket: Bucket, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{key}",
            self.base_url,
            bucket.as_str()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_routes_to_pitch_decks() {
        assert_eq!(Bucket::for_mime("application/pdf"), Bucket::PitchDecks);
    }

    #[test]
    fn spreadsheet_mimes_route_to_funds_lists() {
        assert_eq!(Bucket::for_mime("text/csv"), Bucket::FundsLists);
        assert_eq!(
            Bucket::for_mime("application/vnd.ms-excel"),
            Bucket::FundsLists
        );
        assert_eq!(
            Bucket::for_mime(
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            ),
            Bucket::FundsLists
        );
    }

    #[test]
    fn unknown_mimes_route_to_documents() {
        assert_eq!(Bucket::for_mime("image/png"), Bucket::Documents);
        assert_eq!(Bucket::for_mime("text/plain"), Bucket::Documents);
        assert_eq!(Bucket::for_mime(""), Bucket::Documents);
    }

    #[test]
    fn public_url_is_derived_from_base_and_key() {
        let storage = StorageClient::new(Client::new(), "https://store.example/", "key");
        assert_eq!(
            storage.public_url(Bucket::PitchDecks, "0xabc/17-deck.pdf"),
            "https://store.example/storage/v1/object/public/pitch-decks/0xabc/17-deck.pdf"
        );
    }
}
