//! The duplex provider bridge (§4.6): one stage, two coordinated workers.
//!
//! The input forwarder drains the upstream input channel into the external
//! session; the response forwarder drains the session's response channel
//! into the downstream output. A lazy-connect path buffers input while the
//! session is still being created so nothing sent before the session exists
//! is lost.

use crate::cancel::CancelToken;
use crate::element::{AudioPayload, StreamElement};
use crate::error::{Error, Result};
use crate::external::event_bus::{Event, EventBus, EventContext};
use crate::external::session::{
    MediaChunk, ProviderSession, SessionConfig, SessionFactory, StreamChunk,
};
use crate::message::{ContentPart, Message, StreamingToolDefinition, ToolResponse};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;

use super::state::DuplexAccumulatorState;

#[derive(Debug, Clone, Copy)]
pub struct DuplexBridgeConfig {
    /// How long the response forwarder waits, after input closes and before
    /// the remote has signaled every response is in, before closing the
    /// session unilaterally. Not specified by the upstream design; chosen as
    /// a conservative default long enough for a slow final turn.
    pub final_response_timeout: Duration,
}

impl Default for DuplexBridgeConfig {
    fn default() -> Self {
        Self {
            final_response_timeout: Duration::from_secs(30),
        }
    }
}

/// Where the bridge gets its session from. A caller-supplied session is
/// still closed by the bridge's own close orchestration; the lazy path waits
/// for the first input element to extract enough context to create one.
pub enum SessionSource {
    Preconfigured(Arc<dyn ProviderSession>),
    Lazy(Arc<dyn SessionFactory>),
}

/// Where to publish `ProviderCallStarted`/`ProviderCallCompleted` (§6), set
/// via [`DuplexBridgeStage::with_event_bus`]. Optional: a bridge with no
/// event bus attached just skips publication.
struct ProviderEvents {
    event_bus: Arc<dyn EventBus>,
    context: EventContext,
    provider: String,
}

pub struct DuplexBridgeStage {
    name: String,
    config: DuplexBridgeConfig,
    source: SessionSource,
    events: Option<ProviderEvents>,
}

impl DuplexBridgeStage {
    pub fn new(name: impl Into<String>, config: DuplexBridgeConfig, source: SessionSource) -> Self {
        Self {
            name: name.into(),
            config,
            source,
            events: None,
        }
    }

    /// Attach an event bus so every session the bridge establishes publishes
    /// a `ProviderCallStarted`/`ProviderCallCompleted` pair around it.
    pub fn with_event_bus(
        mut self,
        event_bus: Arc<dyn EventBus>,
        context: EventContext,
        provider: impl Into<String>,
    ) -> Self {
        self.events = Some(ProviderEvents {
            event_bus,
            context,
            provider: provider.into(),
        });
        self
    }

    async fn establish_session(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
    ) -> Result<(Arc<dyn ProviderSession>, ElementReceiver)> {
        match &self.source {
            SessionSource::Preconfigured(session) => Ok((session.clone(), input)),
            SessionSource::Lazy(factory) => {
                let first = match recv_cancellable(&mut input, cancel).await? {
                    Some(elem) => elem,
                    None => return Err(Error::NoProvider),
                };

                let system_prompt = first.meta_str("system_prompt").map(str::to_string);
                let tools = first
                    .metadata
                    .get("tools")
                    .and_then(|v| serde_json::from_value::<Vec<StreamingToolDefinition>>(v.clone()).ok())
                    .unwrap_or_default();
                let session_config = SessionConfig {
                    system_instruction: system_prompt,
                    tools,
                };

                let mut saw_eos = first.end_of_stream;
                let mut buffered = vec![first];

                let create_fut = factory.create_session(cancel, session_config);
                tokio::pin!(create_fut);

                let session = loop {
                    if saw_eos {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            result = &mut create_fut => break result?,
                        }
                    } else {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(Error::Cancelled),
                            result = &mut create_fut => break result?,
                            maybe_elem = recv_cancellable(&mut input, cancel) => {
                                match maybe_elem? {
                                    Some(elem) => {
                                        if elem.end_of_stream {
                                            saw_eos = true;
                                        }
                                        buffered.push(elem);
                                    }
                                    None => saw_eos = true,
                                }
                            }
                        }
                    }
                };

                let (replay_tx, replay_rx) = mpsc::channel(buffered.len() + 16);
                let drain_cancel = cancel.clone();
                tokio::spawn(async move {
                    for elem in buffered {
                        if send_cancellable(&replay_tx, elem, &drain_cancel).await.is_err() {
                            return;
                        }
                    }
                    loop {
                        match recv_cancellable(&mut input, &drain_cancel).await {
                            Ok(Some(elem)) => {
                                if send_cancellable(&replay_tx, elem, &drain_cancel).await.is_err() {
                                    return;
                                }
                            }
                            Ok(None) | Err(_) => return,
                        }
                    }
                });

                Ok((session, replay_rx))
            }
        }
    }
}

#[async_trait]
impl Stage for DuplexBridgeStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Bidirectional
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        let (session, forward_input) = self.establish_session(cancel, input).await?;
        let response_rx = session.take_response_channel();
        let state = Arc::new(DuplexAccumulatorState::new());
        let call_started = Instant::now();

        if let Some(events) = &self.events {
            let _ = events
                .event_bus
                .publish(Event::ProviderCallStarted {
                    context: events.context.clone(),
                    provider: events.provider.clone(),
                    message_count: 0,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }

        let input_cancel = CancelToken::new();
        let linked_parent = cancel.clone();
        let linked_child = input_cancel.clone();
        tokio::spawn(async move {
            linked_parent.cancelled().await;
            linked_child.cancel();
        });

        let input_handle = tokio::spawn(input_forwarder(
            input_cancel.clone(),
            forward_input,
            output.clone(),
            session.clone(),
            state.clone(),
        ));

        let response_result =
            response_forwarder(cancel, &self.config, response_rx, output, state, session).await;

        if let Some(events) = &self.events {
            let _ = events
                .event_bus
                .publish(Event::ProviderCallCompleted {
                    context: events.context.clone(),
                    provider: events.provider.clone(),
                    duration_ms: call_started.elapsed().as_millis() as u64,
                    cost_info: None,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        }

        input_cancel.cancel();
        match tokio::time::timeout(Duration::from_millis(100), input_handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) if !e.is_cancelled() => {
                tracing::warn!(error = %e, "input forwarder exited with a non-cancellation error");
            }
            Ok(Ok(Err(_))) => {}
            Ok(Err(join_err)) => tracing::warn!(error = %join_err, "input forwarder task panicked"),
            Err(_) => tracing::warn!("input forwarder did not exit within its grace period"),
        }

        response_result
    }
}

#[derive(Default)]
struct AudioTiming {
    chunk_count: u64,
    total_bytes: u64,
    stream_start: Option<Instant>,
    last_chunk_time: Option<Instant>,
}

impl AudioTiming {
    fn record_chunk(&mut self, bytes: usize) {
        let now = Instant::now();
        let gap = self.last_chunk_time.map(|t| now.duration_since(t));
        self.chunk_count += 1;
        self.total_bytes += bytes as u64;
        self.stream_start.get_or_insert(now);
        self.last_chunk_time = Some(now);

        let should_log =
            self.chunk_count % 50 == 0 || gap.map(|g| g > Duration::from_millis(30)).unwrap_or(false);
        if should_log {
            tracing::debug!(
                chunk_count = self.chunk_count,
                total_bytes = self.total_bytes,
                gap_ms = gap.map(|g| g.as_millis()),
                "input audio timing"
            );
        }
    }

    fn reset(&mut self) {
        *self = AudioTiming::default();
    }
}

async fn input_forwarder(
    cancel: CancelToken,
    mut input: ElementReceiver,
    output: ElementSender,
    session: Arc<dyn ProviderSession>,
    state: Arc<DuplexAccumulatorState>,
) -> Result<()> {
    let mut timing = AudioTiming::default();

    loop {
        let elem = match recv_cancellable(&mut input, &cancel).await? {
            Some(elem) => elem,
            None => {
                state.input_done.close();
                return Ok(());
            }
        };

        if elem.meta_bool("all_responses_received") {
            state.all_responses_received.close();
            continue;
        }

        if let Some(messages_value) = elem.metadata.get("tool_result_messages") {
            if let Ok(messages) = serde_json::from_value::<Vec<Message>>(messages_value.clone()) {
                for message in messages {
                    send_cancellable(&output, StreamElement::message(message), &cancel).await?;
                }
            }
        }

        let mut handled_tool_responses = false;
        if let Some(responses_value) = elem.metadata.get("tool_responses") {
            if let Ok(responses) = serde_json::from_value::<Vec<ToolResponse>>(responses_value.clone()) {
                session.send_tool_responses(&cancel, responses).await?;
                handled_tool_responses = true;
            }
        }

        if let Some(message) = &elem.message {
            send_cancellable(&output, StreamElement::message(message.clone()), &cancel).await?;
            if let Some(turn_id) = elem.meta_str("turn_id") {
                if !turn_id.is_empty() {
                    state.push_turn_id(turn_id.to_string());
                }
            }
        }

        if handled_tool_responses {
            continue;
        }

        send_element_to_session(&elem, &session, &state, &cancel, &mut timing).await?;
    }
}

async fn send_element_to_session(
    elem: &StreamElement,
    session: &Arc<dyn ProviderSession>,
    state: &DuplexAccumulatorState,
    cancel: &CancelToken,
    timing: &mut AudioTiming,
) -> Result<()> {
    if let Some(prompt) = elem.meta_str("system_prompt") {
        if state.try_claim_system_prompt_send() {
            session.send_system_context(cancel, prompt).await?;
        }
    }

    if let Some(audio) = &elem.audio {
        if !audio.is_empty() {
            if state.transcription_captured() {
                state.reset_for_new_audio_turn();
            }
            timing.record_chunk(audio.samples.len());
            session
                .send_chunk(
                    cancel,
                    MediaChunk {
                        data: audio.samples.clone(),
                        sample_rate_hz: audio.sample_rate_hz,
                        encoding: audio.encoding,
                    },
                )
                .await?;
        }
    } else if let Some(text) = &elem.text {
        session.send_text(cancel, text).await?;
    }

    if elem.end_of_stream {
        session.end_input(cancel).await?;
        timing.reset();
    }

    Ok(())
}

async fn response_forwarder(
    cancel: &CancelToken,
    config: &DuplexBridgeConfig,
    mut response_rx: mpsc::Receiver<StreamChunk>,
    output: ElementSender,
    state: Arc<DuplexAccumulatorState>,
    session: Arc<dyn ProviderSession>,
) -> Result<()> {
    let mut text_acc = String::new();
    let mut media_acc: Vec<u8> = Vec::new();
    let mut was_interrupted = false;

    let mut input_done_seen = false;
    let mut we_closed_session = false;
    let mut timer_deadline: Option<TokioInstant> = None;

    loop {
        let timer_sleep = async {
            match timer_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                if let Some(elem) = build_final_assistant_element(&text_acc, &media_acc, "complete") {
                    let fresh = CancelToken::new();
                    let _ = tokio::time::timeout(
                        Duration::from_millis(200),
                        send_cancellable(&output, elem, &fresh),
                    )
                    .await;
                }
                return Err(Error::Cancelled);
            }
            _ = state.input_done.wait(), if !input_done_seen => {
                input_done_seen = true;
                if state.all_responses_received.is_closed() {
                    let _ = session.close().await;
                    we_closed_session = true;
                } else {
                    timer_deadline = Some(TokioInstant::now() + config.final_response_timeout);
                }
            }
            _ = timer_sleep, if timer_deadline.is_some() => {
                let _ = session.close().await;
                we_closed_session = true;
                timer_deadline = None;
            }
            maybe_chunk = response_rx.recv() => {
                match maybe_chunk {
                    Some(chunk) => {
                        process_chunk(
                            chunk,
                            &output,
                            cancel,
                            &state,
                            &mut text_acc,
                            &mut media_acc,
                            &mut was_interrupted,
                        )
                        .await?;
                    }
                    None => {
                        tracing::debug!(we_closed_session, "response channel closed");
                        if let Some(elem) = build_final_assistant_element(&text_acc, &media_acc, "complete") {
                            send_cancellable(&output, elem, cancel).await?;
                        }
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn process_chunk(
    chunk: StreamChunk,
    output: &ElementSender,
    cancel: &CancelToken,
    state: &DuplexAccumulatorState,
    text_acc: &mut String,
    media_acc: &mut Vec<u8>,
    was_interrupted: &mut bool,
) -> Result<()> {
    if let Some(err) = &chunk.error {
        let err = err.clone();
        send_cancellable(output, StreamElement::error(err.clone()), cancel).await?;
        return Err(err);
    }

    let chunk_type = chunk.metadata.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match chunk_type {
        "input_transcription" => {
            if !state.transcription_captured() {
                if let Some(text) = chunk.metadata.get("transcription").and_then(|v| v.as_str()) {
                    state.append_input_transcription(text);
                }
            }
        }
        "output_transcription" => {
            if let Some(delta) = &chunk.delta {
                text_acc.push_str(delta);
            }
        }
        _ => {
            if let Some(content) = &chunk.content {
                if !content.is_empty() {
                    text_acc.push_str(content);
                }
            }
        }
    }

    if let Some(media_delta) = &chunk.media_delta {
        if let Ok(bytes) = BASE64.decode(media_delta) {
            media_acc.extend_from_slice(&bytes);
        }
    }

    let elem = chunk_to_element(&chunk, state, text_acc, media_acc, was_interrupted);
    let is_eos = elem.end_of_stream;
    let has_real_finish_reason = chunk.finish_reason.as_deref().map(|s| !s.is_empty()).unwrap_or(false);

    send_cancellable(output, elem, cancel).await?;

    if has_real_finish_reason && is_eos {
        text_acc.clear();
        media_acc.clear();
        state.mark_transcription_captured();
    }

    Ok(())
}

/// A bare `StreamElement` with no payload, built off an existing constructor
/// so it still gets a sequence number and default priority.
fn new_control_element() -> StreamElement {
    let mut elem = StreamElement::text(String::new());
    elem.text = None;
    elem
}

fn copy_chunk_metadata(elem: &mut StreamElement, chunk: &StreamChunk) {
    for (key, value) in &chunk.metadata {
        elem.metadata.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

fn chunk_to_element(
    chunk: &StreamChunk,
    state: &DuplexAccumulatorState,
    text_acc: &mut String,
    media_acc: &mut Vec<u8>,
    was_interrupted: &mut bool,
) -> StreamElement {
    let mut elem = new_control_element();

    if chunk.interrupted {
        let mut message = Message::assistant(text_acc.clone());
        if !text_acc.is_empty() {
            message.parts.push(ContentPart::text(text_acc.clone()));
        }
        if !media_acc.is_empty() {
            message.parts.push(ContentPart::audio_inline(media_acc.clone(), "audio/pcm"));
        }
        message.meta.insert("finish_reason".to_string(), Value::String("interrupted".into()));
        message.meta.insert("is_partial".to_string(), Value::Bool(true));
        message
            .meta
            .insert("interrupted_at".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
        elem.message = Some(message);
        text_acc.clear();
        media_acc.clear();
        *was_interrupted = true;
        elem.metadata.insert("interrupted".to_string(), Value::Bool(true));
        elem.metadata
            .insert("finish_reason".to_string(), Value::String("interrupted".into()));
        copy_chunk_metadata(&mut elem, chunk);
        return elem;
    }

    if let Some(content) = &chunk.content {
        if !content.is_empty() {
            elem.text = Some(content.clone());
        }
    }
    if let Some(media_delta) = &chunk.media_delta {
        if let Ok(bytes) = BASE64.decode(media_delta) {
            elem.audio = Some(AudioPayload {
                samples: bytes,
                sample_rate_hz: crate::message::MODEL_SAMPLE_RATE_HZ,
                channels: 1,
                encoding: crate::message::AudioEncoding::Pcm16,
                duration_ms: None,
            });
        }
    }

    let finish_reason_nonempty = chunk.finish_reason.as_deref().map(|s| !s.is_empty()).unwrap_or(false);
    if finish_reason_nonempty {
        let finish_reason = chunk.finish_reason.clone().expect("checked nonempty above");
        let has_content = !text_acc.is_empty() || !media_acc.is_empty();

        if *was_interrupted && !has_content {
            elem.metadata
                .insert("interrupted_turn_complete".to_string(), Value::Bool(true));
            elem.metadata
                .insert("finish_reason".to_string(), Value::String(finish_reason));
        } else {
            let mut message = Message::assistant(text_acc.clone());
            if !text_acc.is_empty() {
                message.parts.push(ContentPart::text(text_acc.clone()));
            }
            if !media_acc.is_empty() {
                message.parts.push(ContentPart::audio_inline(media_acc.clone(), "audio/pcm"));
            }
            message.cost_info = chunk.cost_info;
            message.tool_calls = chunk.tool_calls.clone();
            message
                .meta
                .insert("finish_reason".to_string(), Value::String(finish_reason));
            elem.message = Some(message);
            elem.end_of_stream = true;
            *was_interrupted = false;
        }
    }

    copy_chunk_metadata(&mut elem, chunk);

    if elem.end_of_stream {
        if let Some(turn_id) = state.pop_turn_id_once() {
            let transcription = state.input_transcription_snapshot();
            if !transcription.is_empty() {
                elem.metadata
                    .insert("input_transcription".to_string(), Value::String(transcription));
                elem.metadata
                    .insert("transcription_turn_id".to_string(), Value::String(turn_id));
            }
        }
    }

    elem
}

fn build_final_assistant_element(text_acc: &str, media_acc: &[u8], finish_reason: &str) -> Option<StreamElement> {
    if text_acc.is_empty() && media_acc.is_empty() {
        return None;
    }
    let mut message = Message::assistant(text_acc.to_string());
    if !text_acc.is_empty() {
        message.parts.push(ContentPart::text(text_acc.to_string()));
    }
    if !media_acc.is_empty() {
        message.parts.push(ContentPart::audio_inline(media_acc.to_vec(), "audio/pcm"));
    }
    message
        .meta
        .insert("finish_reason".to_string(), Value::String(finish_reason.to_string()));
    let mut elem = StreamElement::message(message);
    elem.end_of_stream = true;
    Some(elem)
}
