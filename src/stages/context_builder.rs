//! Context builder stage (§4.5, Accumulate): collects messages until the
//! stream ends, estimates their token cost with a word-count heuristic, and
//! truncates to fit a budget before emitting them in order.

use crate::cancel::CancelToken;
use crate::element::StreamElement;
use crate::error::{Error, Result};
use crate::stage::{recv_cancellable, send_cancellable, ElementReceiver, ElementSender, Stage, StageType};
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationStrategy {
    Oldest,
    Fail,
    Relevance,
    Summarize,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextBuilderConfig {
    pub token_budget: usize,
    pub reserve_for_output: usize,
    pub system_tokens: usize,
    pub strategy: TruncationStrategy,
    pub enable_cache_breakpoints: bool,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            token_budget: 8_000,
            reserve_for_output: 1_000,
            system_tokens: 200,
            strategy: TruncationStrategy::Oldest,
            enable_cache_breakpoints: false,
        }
    }
}

pub struct ContextBuilderStage {
    name: String,
    config: ContextBuilderConfig,
}

impl ContextBuilderStage {
    pub fn new(name: impl Into<String>, config: ContextBuilderConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    fn estimate_tokens(elem: &StreamElement) -> usize {
        elem.message
            .as_ref()
            .map(|m| m.content.split_whitespace().count())
            .unwrap_or(0)
    }

    fn available_budget(&self) -> usize {
        self.config
            .token_budget
            .saturating_sub(self.config.reserve_for_output)
            .saturating_sub(self.config.system_tokens)
    }

    fn truncate_oldest(buffered: &mut Vec<StreamElement>, total: &mut usize, available: usize) {
        while *total > available && !buffered.is_empty() {
            let removed = buffered.remove(0);
            *total = total.saturating_sub(Self::estimate_tokens(&removed));
        }
    }

    async fn flush(
        &self,
        mut buffered: Vec<StreamElement>,
        output: &ElementSender,
        cancel: &CancelToken,
    ) -> Result<()> {
        if buffered.is_empty() {
            return Ok(());
        }

        let available = self.available_budget();
        let mut total: usize = buffered.iter().map(Self::estimate_tokens).sum();
        let mut truncated = false;

        if total > available {
            match self.config.strategy {
                TruncationStrategy::Fail => {
                    return Err(Error::resource(
                        "context_builder",
                        format!("token budget exceeded: {total} > {available}"),
                    ));
                }
                TruncationStrategy::Oldest => {
                    Self::truncate_oldest(&mut buffered, &mut total, available);
                    truncated = true;
                }
                TruncationStrategy::Relevance | TruncationStrategy::Summarize => {
                    tracing::warn!(
                        strategy = ?self.config.strategy,
                        "relevance/summarize truncation not implemented, falling back to oldest"
                    );
                    Self::truncate_oldest(&mut buffered, &mut total, available);
                    truncated = true;
                }
            }
        }

        for mut elem in buffered {
            if truncated {
                elem.metadata
                    .insert("context_truncated".to_string(), Value::Bool(true));
            }
            elem.metadata.insert(
                "enable_cache_breakpoints".to_string(),
                Value::Bool(self.config.enable_cache_breakpoints),
            );
            send_cancellable(output, elem, cancel).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl Stage for ContextBuilderStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn stage_type(&self) -> StageType {
        StageType::Accumulate
    }

    async fn process(
        &self,
        cancel: &CancelToken,
        mut input: ElementReceiver,
        output: ElementSender,
    ) -> Result<()> {
        let mut buffered: Vec<StreamElement> = Vec::new();

        loop {
            let elem = match recv_cancellable(&mut input, cancel).await? {
                Some(elem) => elem,
                None => {
                    self.flush(std::mem::take(&mut buffered), &output, cancel).await?;
                    return Ok(());
                }
            };

            if elem.end_of_stream {
                self.flush(std::mem::take(&mut buffered), &output, cancel).await?;
                send_cancellable(&output, elem, cancel).await?;
                return Ok(());
            }

            if elem.message.is_some() {
                buffered.push(elem);
            } else {
                send_cancellable(&output, elem, cancel).await?;
            }
        }
    }
}
