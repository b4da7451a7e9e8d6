pub mod config;
pub mod controller;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod state;
pub mod transport;

// Re-export main types for convenience
pub use config::Config;
pub use controller::{Phase, StreamHandle, StreamOutcome, TranscriptController, TranscriptEvent};
pub use error::{CopilotError, Result};
pub use persistence::{JsonFileStore, MemoryStore, TranscriptStore};
pub use protocol::{classify, Frame, FrameDecoder};
pub use state::{ChatMessage, ChatRole, MessageMeta};
pub use transport::{ChatRequest, FrameSource, StreamTransport, TransportEvent};
pub use tokio_util::sync::CancellationToken;
