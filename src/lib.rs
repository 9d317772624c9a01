//! lmchat: chat client for OpenAI-compatible completion APIs.
//!
//! The core is [`stream::StreamReassembler`], which decodes an incrementally
//! delivered SSE body into classified text deltas (reasoning vs. answer),
//! and [`stream::MessageAccumulator`], which folds those deltas into the
//! visible assistant message. [`client::ChatSession`] wires both to HTTP.

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod stream;

pub use client::{ChatSession, TurnEvent, TurnOutcome};
pub use errors::ChatError;
pub use models::message::{ChatMessage, Role};
pub use stream::{DeltaChunk, DeltaMode, MessageAccumulator, StreamReassembler};
