//! Snapshot of the current analysis, optionally recorded to history.

use std::sync::Arc;
use thiserror::Error;

use crate::publisher::AnalysisPublisher;
use crate::store::{SnapshotRecord, Store, StoreError};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame has been published yet")]
    NoFrameYet,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Label text as published at the moment of capture.
    pub label_text: String,
    /// History row, when the capture was made by a signed-in user.
    pub record: Option<SnapshotRecord>,
}

pub struct SnapshotCapture {
    publisher: Arc<AnalysisPublisher>,
    store: Store,
}

impl SnapshotCapture {
    pub fn new(publisher: Arc<AnalysisPublisher>, store: Store) -> Self {
        Self { publisher, store }
    }

    /// Take the latest published label and, for a signed-in `username`,
    /// append it to that user's history.
    pub async fn capture(&self, username: Option<&str>) -> Result<Snapshot, CaptureError> {
        let state = self.publisher.snapshot();
        if state.frame.is_none() {
            return Err(CaptureError::NoFrameYet);
        }
        let label_text = state.label_text();

        let record = match username {
            Some(username) => Some(self.store.append_history(username, &label_text).await?),
            None => None,
        };
        tracing::info!(user = username.unwrap_or("-"), label = %label_text, "snapshot captured");
        Ok(Snapshot { label_text, record })
    }
}
