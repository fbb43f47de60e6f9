//! Media externalizer stage (§4.5, Transform): moves inline media above a
//! size threshold into external storage, replacing it with a reference.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::external::media_storage::{MediaStorage, MediaStorageMetadata};
use crate::message::MediaPayload;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
pub struct MediaExternalizerConfig {
    pub enabled: bool,
    pub size_threshold_bytes: usize,
}

impl Default for MediaExternalizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            size_threshold_bytes: 64 * 1024,
        }
    }
}

pub struct MediaExternalizerStage {
    name: String,
    config: MediaExternalizerConfig,
    storage: Option<Arc<dyn MediaStorage>>,
}

impl MediaExternalizerStage {
    pub fn new(
        name: impl Into<String>,
        config: MediaExternalizerConfig,
        storage: Option<Arc<dyn MediaStorage>>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            storage,
        }
    }

    fn active(&self) -> bool {
        self.config.enabled && self.storage.is_some()
    }
}

#[async_trait]
impl Stage for MediaExternalizerStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Transform
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        loop {
            let mut elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            if self.active() {
                let storage = self.storage.as_ref().expect("checked by active()");
                if let Some(message) = &mut elem.message {
                    for (part_index, part) in message.parts.iter_mut().enumerate() {
                        let should_externalize = matches!(
                            &part.media,
                            Some(MediaPayload::Inline { data, .. })
                                if data.len() >= self.config.size_threshold_bytes
                        );
                        if !should_externalize {
                            continue;
                        }
                        let Some(MediaPayload::Inline { data, mime_type }) = part.media.take() else {
                            unreachable!("should_externalize only true for Inline");
                        };
                        let metadata = MediaStorageMetadata {
                            part_index: Some(part_index),
                            mime_type,
                            timestamp: Some(elem.created_at),
                            ..Default::default()
                        };
                        let reference = storage.store(data, metadata).await?;
                        part.media = Some(MediaPayload::External(reference));
                    }
                }
            }

            send_cancellable(&output, elem, cancel).await?;
        }
    }
}
