//! Latest-result slot shared between the pipeline and request handlers.
//!
//! The pipeline replaces the whole published state in one step, so a reader
//! always sees a label and frame that came from the same iteration.

use bytes::Bytes;
use glowscan_core::ClassificationLabel;
use std::sync::{Arc, PoisonError, RwLock};

/// Label text before anything has been published.
pub const PLACEHOLDER_TEXT: &str = "Waiting for face analysis...";

/// One published analysis result.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
    /// `None` until the first publish.
    pub label: Option<ClassificationLabel>,
    /// JPEG of the (annotated) frame the label was computed from.
    pub frame: Option<Bytes>,
    /// Number of publishes so far; 0 before the first.
    pub sequence: u64,
}

impl PublishedState {
    pub fn label_text(&self) -> String {
        self.label
            .map(|label| label.status_text())
            .unwrap_or_else(|| PLACEHOLDER_TEXT.to_string())
    }
}

#[derive(Debug, Default)]
pub struct AnalysisPublisher {
    slot: RwLock<Arc<PublishedState>>,
}

impl AnalysisPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published label and frame together.
    pub fn publish(&self, label: ClassificationLabel, frame: Bytes) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let sequence = slot.sequence + 1;
        *slot = Arc::new(PublishedState {
            label: Some(label),
            frame: Some(frame),
            sequence,
        });
    }

    /// The most recent published state, as one consistent value.
    pub fn snapshot(&self) -> Arc<PublishedState> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn read_label(&self) -> String {
        self.snapshot().label_text()
    }

    pub fn read_frame(&self) -> Option<Bytes> {
        self.snapshot().frame.clone()
    }
}
