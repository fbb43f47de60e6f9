//! Tracing stage (§4.5, Transform wrapper): stamps a trace id (via a
//! caller-supplied generator) onto elements missing one, then records the
//! wrapped stage's name and completion time into `metadata["stage_times"]`.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

pub struct TracingStage {
    name: String,
    inner: Arc<dyn Stage>,
    id_generator: IdGenerator,
    buffer_size: usize,
}

impl TracingStage {
    pub fn new(
        name: impl Into<String>,
        inner: Arc<dyn Stage>,
        id_generator: IdGenerator,
        buffer_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            inner,
            id_generator,
            buffer_size,
        }
    }
}

#[async_trait]
impl Stage for TracingStage {
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
        let (to_inner_tx, to_inner_rx) = mpsc::channel(self.buffer_size.max(1));
        let (from_inner_tx, mut from_inner_rx) = mpsc::channel(self.buffer_size.max(1));

        let feeder_cancel = cancel.clone();
        let id_gen = self.id_generator.clone();
        let feeder = tokio::spawn(async move {
            loop {
                match recv_cancellable(&mut input, &feeder_cancel).await {
                    Ok(Some(mut elem)) => {
                        if !elem.metadata.contains_key("trace_id") {
                            elem.metadata
                                .insert("trace_id".to_string(), Value::String((id_gen)()));
                        }
                        if send_cancellable(&to_inner_tx, elem, &feeder_cancel).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) | Err(_) => return,
                }
            }
        });

        let inner = self.inner.clone();
        let inner_cancel = cancel.clone();
        let inner_name = self.inner.name().to_string();
        let inner_handle = tokio::spawn(async move {
            inner.process(&inner_cancel, to_inner_rx, from_inner_tx).await
        });

        loop {
            match recv_cancellable(&mut from_inner_rx, cancel).await {
                Ok(Some(mut elem)) => {
                    let entry = elem
                        .metadata
                        .entry("stage_times".to_string())
                        .or_insert_with(|| Value::Object(serde_json::Map::new()));
                    if let Value::Object(map) = entry {
                        map.insert(inner_name.clone(), Value::String(chrono::Utc::now().to_rfc3339()));
                    }
                    send_cancellable(&output, elem, cancel).await?;
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = feeder.await;
                    let _ = inner_handle.await;
                    return Err(e);
                }
            }
        }

        let _ = feeder.await;
        inner_handle
            .await
            .map_err(|e| Error::Execution(format!("wrapped stage panicked: {e}")))??;
        Ok(())
    }
}
