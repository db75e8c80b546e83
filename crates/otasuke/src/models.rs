//! Conversation objects exchanged between the agent and the model.
//!
//! The shapes follow the Bedrock Converse API closely so that a message
//! serialises directly into a request body: content blocks are externally
//! tagged (`{"text": ...}`, `{"toolUse": {...}}`, `{"toolResult": {...}}`).
pub mod message;
pub mod role;
pub mod tool;
