//! Wire protocol of the co-pilot response stream.
//!
//! The backend answers with newline-delimited `data: <payload>` lines. A
//! payload is `[DONE]`, `[META]{json}`, `[ERROR] text`, or literal token text.

pub mod classify;
pub mod decoder;

pub use classify::{classify, Frame};
pub use decoder::FrameDecoder;
