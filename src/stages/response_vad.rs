//! Response VAD (§4.5, Transform with buffer-of-one): holds an arriving
//! end-of-stream until the VAD reports continuous silence over the
//! flowing audio, or a max wait elapses. Decouples upstream turn markers
//! from the actual audio tail.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use crate::external::services::{VadEvent, VoiceActivityDetector};
use crate::stage::{send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};
use tokio::time::Instant as TokioInstant;

#[derive(Debug, Clone, Copy)]
pub struct ResponseVadConfig {
    pub silence_duration: Duration,
    pub max_wait_duration: Duration,
}

impl Default for ResponseVadConfig {
    fn default() -> Self {
        Self {
            silence_duration: Duration::from_millis(500),
            max_wait_duration: Duration::from_secs(5),
        }
    }
}

pub struct ResponseVadStage {
    name: String,
    config: ResponseVadConfig,
    vad: Arc<dyn VoiceActivityDetector>,
}

impl ResponseVadStage {
    pub fn new(
        name: impl Into<String>,
        config: ResponseVadConfig,
        vad: Arc<dyn VoiceActivityDetector>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            vad,
        }
    }
}

#[async_trait]
impl Stage for ResponseVadStage {
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
        let mut held_eos: Option<StreamElement> = None;
        let mut eos_arrived_at: Option<StdInstant> = None;
        let mut silence_since: Option<StdInstant> = None;

        loop {
            if let Some(arrived_at) = eos_arrived_at {
                let deadline = TokioInstant::from_std(arrived_at + self.config.max_wait_duration);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(deadline) => {
                        let eos = held_eos.take().expect("eos_arrived_at implies held_eos");
                        send_cancellable(&output, eos, cancel).await?;
                        eos_arrived_at = None;
                        silence_since = None;
                    }
                    maybe_elem = input.recv() => {
                        match maybe_elem {
                            Some(elem) => {
                                self
                                    .handle_element(elem, &mut silence_since, &output, cancel, &mut held_eos, &mut eos_arrived_at)
                                    .await?;
                            }
                            None => {
                                if let Some(eos) = held_eos.take() {
                                    send_cancellable(&output, eos, cancel).await?;
                                }
                                return Ok(());
                            }
                        }
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    maybe_elem = input.recv() => {
                        match maybe_elem {
                            Some(elem) => {
                                self
                                    .handle_element(elem, &mut silence_since, &output, cancel, &mut held_eos, &mut eos_arrived_at)
                                    .await?;
                            }
                            None => return Ok(()),
                        }
                    }
                }
            }
        }
    }
}

impl ResponseVadStage {
    #[allow(clippy::too_many_arguments)]
    async fn handle_element(
        &self,
        elem: StreamElement,
        silence_since: &mut Option<StdInstant>,
        output: &ElementSender,
        cancel: &CancelToken,
        held_eos: &mut Option<StreamElement>,
        eos_arrived_at: &mut Option<StdInstant>,
    ) -> Result<()> {
        if elem.end_of_stream {
            *held_eos = Some(elem);
            *eos_arrived_at = Some(StdInstant::now());
            return Ok(());
        }

        if let Some(audio) = &elem.audio {
            let now = StdInstant::now();
            match self.vad.observe(audio).await? {
                VadEvent::Speech => *silence_since = None,
                VadEvent::Silence => {
                    silence_since.get_or_insert(now);
                }
            }
        }

        send_cancellable(output, elem, cancel).await?;

        if let (Some(since), true) = (*silence_since, held_eos.is_some()) {
            if since.elapsed() >= self.config.silence_duration {
                let eos = held_eos.take().expect("checked is_some above");
                *eos_arrived_at = None;
                *silence_since = None;
                send_cancellable(output, eos, cancel).await?;
            }
        }

        Ok(())
    }
}
