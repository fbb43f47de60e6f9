//! Single-responsibility Transform/Accumulate stages (§4.5).

pub mod context_builder;
pub mod debug;
pub mod media_externalizer;
pub mod metrics;
pub mod rate_limit;
pub mod recording;
pub mod response_vad;
pub mod stt;
pub mod template;
pub mod tracing_stage;
pub mod tts;
pub mod vad_turn;
pub mod variable_provider;

pub use context_builder::{ContextBuilderConfig, ContextBuilderStage, TruncationStrategy};
pub use debug::{DebugConfig, DebugStage};
pub use media_externalizer::{MediaExternalizerConfig, MediaExternalizerStage};
pub use metrics::{MetricsSnapshot, MetricsStage};
pub use rate_limit::{DropStrategy, RateLimitConfig, RateLimitStage};
pub use recording::{RecorderRole, RecordingStage};
pub use response_vad::{ResponseVadConfig, ResponseVadStage};
pub use stt::SttStage;
pub use template::TemplateStage;
pub use tracing_stage::TracingStage;
pub use tts::{TtsConfig, TtsStage};
pub use vad_turn::{VadTurnConfig, VadTurnStage};
pub use variable_provider::VariableProviderStage;
