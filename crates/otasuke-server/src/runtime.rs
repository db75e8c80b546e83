//! One long-lived task per browser session. The task owns the session's
//! [`ChatSession`] and runs its commands one at a time, so a turn always
//! finishes before the next one starts.
use otasuke::chat::{AgentFactory, ChatMessage, ChatSession, SessionState, TurnOutcome, TurnView};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub messages: Vec<ChatMessage>,
    pub state: SessionState,
    /// Notice to show instead of the input while the session is halted
    pub halted: Option<String>,
}

pub enum Command {
    Snapshot(oneshot::Sender<Snapshot>),
    Turn {
        prompt: String,
        view: Box<dyn TurnView>,
        done: oneshot::Sender<TurnOutcome>,
    },
}

/// Queue into a running session task; the task stops once every handle is dropped
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub fn spawn(factory: Arc<dyn AgentFactory>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(ChatSession::new(factory), rx));
        Self { tx }
    }

    /// Current transcript; builds the agent on first call
    pub async fn snapshot(&self) -> Option<Snapshot> {
        let (done, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(done)).ok()?;
        rx.await.ok()
    }

    /// Queue a turn. The outcome arrives once the turn has been rendered.
    pub fn turn(
        &self,
        prompt: String,
        view: Box<dyn TurnView>,
    ) -> Option<oneshot::Receiver<TurnOutcome>> {
        let (done, rx) = oneshot::channel();
        self.tx.send(Command::Turn { prompt, view, done }).ok()?;
        Some(rx)
    }
}

async fn run(mut session: ChatSession, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Snapshot(reply) => {
                let halted = session.prepare().await.map(str::to_string);
                let _ = reply.send(Snapshot {
                    messages: session.transcript().to_vec(),
                    state: session.state(),
                    halted,
                });
            }
            Command::Turn {
                prompt,
                mut view,
                done,
            } => {
                let outcome = session.run_turn(&prompt, view.as_mut()).await;
                drop(view);
                let _ = done.send(outcome);
            }
        }
    }
    tracing::debug!("Session runtime stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::ScriptedFactory;
    use otasuke::chat::RecordingView;

    #[tokio::test]
    async fn test_turns_run_in_order() {
        let handle = SessionHandle::spawn(ScriptedFactory::replies(&["一つ目", "二つ目"]));

        let first = handle
            .turn("a".to_string(), Box::new(RecordingView::new()))
            .unwrap();
        let second = handle
            .turn("b".to_string(), Box::new(RecordingView::new()))
            .unwrap();

        assert_eq!(first.await.unwrap(), TurnOutcome::Completed("一つ目".to_string()));
        assert_eq!(second.await.unwrap(), TurnOutcome::Completed("二つ目".to_string()));

        let snapshot = handle.snapshot().await.unwrap();
        let contents: Vec<&str> = snapshot.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "一つ目", "b", "二つ目"]);
        assert_eq!(snapshot.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_snapshot_reports_halt() {
        let handle = SessionHandle::spawn(ScriptedFactory::failing("bad credentials"));
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, SessionState::Halted);
        assert_eq!(
            snapshot.halted.as_deref(),
            Some("エージェントの初期化に失敗しました: bad credentials")
        );
    }
}
