//! Speech-to-text stage (§4.5, Transform): transcribes audio elements
//! above a minimum size; empty transcriptions are dropped.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::Result;
use crate::external::services::SpeechToText;
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;

pub struct SttStage {
    name: String,
    min_audio_bytes: usize,
    stt: Arc<dyn SpeechToText>,
}

impl SttStage {
    pub fn new(name: impl Into<String>, min_audio_bytes: usize, stt: Arc<dyn SpeechToText>) -> Self {
        Self {
            name: name.into(),
            min_audio_bytes,
            stt,
        }
    }
}

#[async_trait]
impl Stage for SttStage {
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
            let elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => return Ok(()),
            };

            let audio = match &elem.audio {
                Some(audio) if audio.samples.len() >= self.min_audio_bytes => audio.clone(),
                _ => {
                    send_cancellable(&output, elem, cancel).await?;
                    continue;
                }
            };

            match self.stt.transcribe(&audio).await {
                Ok(text) if text.is_empty() => {}
                Ok(text) => {
                    send_cancellable(&output, StreamElement::text(text), cancel).await?;
                }
                Err(err) => {
                    let mut error_elem = StreamElement::error(err);
                    error_elem.source = elem.source.clone();
                    send_cancellable(&output, error_elem, cancel).await?;
                }
            }
        }
    }
}
