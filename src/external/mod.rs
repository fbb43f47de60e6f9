//! Narrow contracts for every out-of-scope collaborator (§6): the provider
//! session, VAD/STT/TTS services, the event bus, media storage, and
//! variable providers. Concrete implementations (WebSocket/HTTP transports,
//! real VAD/STT/TTS models, a real event bus) live outside this crate.

pub mod event_bus;
pub mod media_storage;
pub mod services;
pub mod session;

pub use event_bus::{Event, EventBus};
pub use media_storage::{MediaStorage, MediaStorageMetadata};
pub use services::{InterruptionHandler, SpeechToText, TextToSpeech, VadEvent, VariableProvider, VoiceActivityDetector};
pub use session::{MediaChunk, ProviderSession, SessionConfig, SessionFactory, StreamChunk};
