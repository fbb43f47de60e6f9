//! Recording stage (§4.5): a pure observer that publishes to an event bus
//! without modifying the stream.

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::external::event_bus::{Event, EventBus, EventContext};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderRole {
    User,
    Assistant,
}

impl RecorderRole {
    fn as_str(self) -> &'static str {
        match self {
            RecorderRole::User => "user",
            RecorderRole::Assistant => "assistant",
        }
    }
}

pub struct RecordingStage {
    name: String,
    role: RecorderRole,
    context: EventContext,
    event_bus: Arc<dyn EventBus>,
}

impl RecordingStage {
    pub fn new(
        name: impl Into<String>,
        role: RecorderRole,
        context: EventContext,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            context,
            event_bus,
        }
    }
}

#[async_trait]
impl Stage for RecordingStage {
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
            match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => {
                    if let Some(err) = &elem.error {
                        let _ = self
                            .event_bus
                            .publish(Event::StreamInterrupted {
                                context: self.context.clone(),
                                reason: err.to_string(),
                                timestamp: elem.created_at,
                            })
                            .await;
                    } else if !elem.end_of_stream {
                        if let Some(message) = &elem.message {
                            let _ = self
                                .event_bus
                                .publish(Event::MessageCreated {
                                    context: self.context.clone(),
                                    role: self.role.as_str().to_string(),
                                    content: message.content.clone(),
                                    tool_calls: message.tool_calls.clone(),
                                    tool_result: message.tool_result.clone(),
                                    timestamp: elem.created_at,
                                })
                                .await;
                        }
                        if let Some(tool_call) = &elem.tool_call {
                            let _ = self
                                .event_bus
                                .publish(Event::ToolCallStarted {
                                    context: self.context.clone(),
                                    tool_name: tool_call.name.clone(),
                                    call_id: tool_call.id.clone(),
                                    timestamp: elem.created_at,
                                })
                                .await;
                        }
                    }
                    send_cancellable(&output, elem, cancel).await?;
                }
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StreamElement;
    use crate::error::Error;
    use crate::message::Message;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    struct RecordingEventBus {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventBus for RecordingEventBus {
        async fn publish(&self, event: Event) -> Result<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn message_elements_publish_message_created() {
        let bus = Arc::new(RecordingEventBus {
            events: Mutex::new(Vec::new()),
        });
        let stage = RecordingStage::new(
            "rec",
            RecorderRole::Assistant,
            EventContext::default(),
            bus.clone(),
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx
            .send(StreamElement::message(Message::assistant("hi")))
            .await
            .unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert!(out_rx.recv().await.is_some());
        assert_eq!(bus.events.lock().len(), 1);
        assert!(matches!(bus.events.lock()[0], Event::MessageCreated { .. }));
    }

    #[tokio::test]
    async fn end_of_stream_publishes_nothing() {
        let bus = Arc::new(RecordingEventBus {
            events: Mutex::new(Vec::new()),
        });
        let stage = RecordingStage::new(
            "rec",
            RecorderRole::User,
            EventContext::default(),
            bus.clone(),
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::end_of_stream()).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert!(out_rx.recv().await.is_some());
        assert!(bus.events.lock().is_empty());
    }

    #[tokio::test]
    async fn tool_call_elements_publish_tool_call_started() {
        let bus = Arc::new(RecordingEventBus {
            events: Mutex::new(Vec::new()),
        });
        let stage = RecordingStage::new(
            "rec",
            RecorderRole::Assistant,
            EventContext::default(),
            bus.clone(),
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        let mut elem = StreamElement::default();
        elem.tool_call = Some(crate::message::MessageToolCall {
            id: "call-1".to_string(),
            name: "lookup".to_string(),
            arguments: "{}".to_string(),
        });
        in_tx.send(elem).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert!(out_rx.recv().await.is_some());
        let events = bus.events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ToolCallStarted { tool_name, call_id, .. } => {
                assert_eq!(tool_name, "lookup");
                assert_eq!(call_id, "call-1");
            }
            other => panic!("expected ToolCallStarted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_elements_publish_stream_interrupted() {
        let bus = Arc::new(RecordingEventBus {
            events: Mutex::new(Vec::new()),
        });
        let stage = RecordingStage::new(
            "rec",
            RecorderRole::User,
            EventContext::default(),
            bus.clone(),
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx
            .send(StreamElement::error(Error::RemoteClosed))
            .await
            .unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert!(out_rx.recv().await.is_some());
        assert!(matches!(bus.events.lock()[0], Event::StreamInterrupted { .. }));
    }
}
