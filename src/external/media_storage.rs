//! Media storage contract used by the media-externalizer stage (§6).

use crate::error::Result;
use crate::message::MediaReference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Default)]
pub struct MediaStorageMetadata {
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_index: Option<usize>,
    pub part_index: Option<usize>,
    pub mime_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub retention_policy: Option<String>,
}

#[async_trait]
pub trait MediaStorage: Send + Sync {
    async fn store(&self, data: Vec<u8>, metadata: MediaStorageMetadata) -> Result<MediaReference>;
    async fn retrieve(&self, reference: &MediaReference) -> Result<Vec<u8>>;
}
