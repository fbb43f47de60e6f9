//! Metrics stage (§4.5, Transform wrapper): runs a wrapped stage through an
//! intermediate buffered channel, timing each element's round trip through
//! it and exposing a thread-safe snapshot of totals.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default)]
struct MetricsTotals {
    processed: u64,
    errors: u64,
    total_latency: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub errors: u64,
    pub average_latency: Duration,
}

pub struct MetricsStage {
    name: String,
    inner: Arc<dyn Stage>,
    buffer_size: usize,
    totals: Arc<Mutex<MetricsTotals>>,
}

impl MetricsStage {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Stage>, buffer_size: usize) -> Self {
        Self {
            name: name.into(),
            inner,
            buffer_size,
            totals: Arc::new(Mutex::new(MetricsTotals::default())),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let totals = self.totals.lock();
        let average_latency = if totals.processed > 0 {
            totals.total_latency / totals.processed as u32
        } else {
            Duration::ZERO
        };
        MetricsSnapshot {
            processed: totals.processed,
            errors: totals.errors,
            average_latency,
        }
    }
}

#[async_trait]
impl Stage for MetricsStage {
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
        let arrivals: Arc<Mutex<VecDeque<Instant>>> = Arc::new(Mutex::new(VecDeque::new()));

        let feeder_cancel = cancel.clone();
        let feeder_arrivals = arrivals.clone();
        let feeder = tokio::spawn(async move {
            loop {
                match recv_cancellable(&mut input, &feeder_cancel).await {
                    Ok(Some(elem)) => {
                        feeder_arrivals.lock().push_back(Instant::now());
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
        let inner_handle = tokio::spawn(async move {
            inner.process(&inner_cancel, to_inner_rx, from_inner_tx).await
        });

        loop {
            match recv_cancellable(&mut from_inner_rx, cancel).await {
                Ok(Some(elem)) => {
                    let started = arrivals.lock().pop_front();
                    {
                        let mut totals = self.totals.lock();
                        totals.processed += 1;
                        if elem.error.is_some() {
                            totals.errors += 1;
                        }
                        if let Some(started) = started {
                            totals.total_latency += started.elapsed();
                        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StreamElement;
    use crate::stage::PassThroughStage;
    use tokio::sync::mpsc as tokio_mpsc;

    #[tokio::test]
    async fn counts_processed_elements_and_forwards_them() {
        let stage = MetricsStage::new("metrics", Arc::new(PassThroughStage::new("inner")), 4);
        let (in_tx, in_rx) = tokio_mpsc::channel(4);
        let (out_tx, mut out_rx) = tokio_mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx.send(StreamElement::text("a")).await.unwrap();
        in_tx.send(StreamElement::text("b")).await.unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();

        assert_eq!(out_rx.recv().await.unwrap().text.as_deref(), Some("a"));
        assert_eq!(out_rx.recv().await.unwrap().text.as_deref(), Some("b"));
        assert!(out_rx.recv().await.is_none());

        let snapshot = stage.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.errors, 0);
    }

    #[tokio::test]
    async fn counts_error_elements() {
        let stage = MetricsStage::new("metrics", Arc::new(PassThroughStage::new("inner")), 4);
        let (in_tx, in_rx) = tokio_mpsc::channel(4);
        let (out_tx, mut out_rx) = tokio_mpsc::channel(4);
        let cancel = CancelToken::new();

        in_tx
            .send(StreamElement::error(crate::error::Error::RemoteClosed))
            .await
            .unwrap();
        drop(in_tx);
        stage.process(&cancel, in_rx, out_tx).await.unwrap();
        assert!(out_rx.recv().await.unwrap().error.is_some());

        assert_eq!(stage.snapshot().errors, 1);
    }
}
