//! The per-session chat loop: decodes the agent's streamed output and drives
//! a [`TurnView`](view::TurnView) while keeping the visible transcript.
pub mod chunk;
pub mod session;
pub mod view;

pub use chunk::{extract_text, extract_tool_start, StreamChunk, CURSOR};
pub use session::{AgentFactory, ChatAgent, ChatMessage, ChatSession, SessionState, TurnOutcome};
pub use view::{RecordingView, TurnView, ViewOp};
