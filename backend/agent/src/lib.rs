//! FundraiseAgent backend — the wallet-gated subscription and file pipeline.
//!
//! Coordinates four pieces around a per-wallet session: the on-chain
//! subscription gate, the upload pipeline into object storage, the per-wallet
//! project record, and the processing webhook trigger.  Exposed over a small
//! Axum REST API for frontend consumption.

pub mod api;
pub mod chain;
pub mod config;
pub mod errors;
pub mod records;
pub mod session;
pub mod storage;
pub mod subscription;
pub mod trigger;
pub mod upload;
