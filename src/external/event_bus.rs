//! Event bus contract used by the recording stage (§6).

use crate::error::Result;
use crate::message::{CostInfo, MessageToolCall, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Identifiers every published event carries.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub run_id: Option<String>,
    pub session_id: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Event {
    MessageCreated {
        context: EventContext,
        role: String,
        content: String,
        tool_calls: Vec<MessageToolCall>,
        tool_result: Option<ToolResult>,
        timestamp: DateTime<Utc>,
    },
    ToolCallStarted {
        context: EventContext,
        tool_name: String,
        call_id: String,
        timestamp: DateTime<Utc>,
    },
    StreamInterrupted {
        context: EventContext,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ProviderCallStarted {
        context: EventContext,
        provider: String,
        message_count: usize,
        timestamp: DateTime<Utc>,
    },
    ProviderCallCompleted {
        context: EventContext,
        provider: String,
        duration_ms: u64,
        cost_info: Option<CostInfo>,
        timestamp: DateTime<Utc>,
    },
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;
}
