use crate::configuration::SessionSettings;
use crate::runtime::SessionHandle;
use otasuke::chat::AgentFactory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct SessionEntry {
    handle: SessionHandle,
    last_used: Instant,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    factory: Arc<dyn AgentFactory>,
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    max_sessions: usize,
    idle_timeout: Duration,
}

impl AppState {
    pub fn new(factory: Arc<dyn AgentFactory>, settings: &SessionSettings) -> Self {
        Self {
            factory,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            max_sessions: settings.max_sessions,
            idle_timeout: Duration::from_secs(settings.idle_timeout_secs),
        }
    }

    /// Start a session under a fresh id. Returns `None` when the server is
    /// already holding `max_sessions` sessions.
    pub async fn open_session(&self) -> Option<(String, SessionHandle)> {
        let mut sessions = self.sessions.lock().await;
        if sessions.len() >= self.max_sessions {
            tracing::warn!(sessions = sessions.len(), "Session limit reached");
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        tracing::info!(session = %id, "Starting session");
        let handle = SessionHandle::spawn(self.factory.clone());
        sessions.insert(
            id.clone(),
            SessionEntry {
                handle: handle.clone(),
                last_used: Instant::now(),
            },
        );
        Some((id, handle))
    }

    /// The running session issued as `id`, marked as used now
    pub async fn session(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions.get_mut(id)?;
        entry.last_used = Instant::now();
        Some(entry.handle.clone())
    }

    /// Mark the session as used now
    pub async fn touch(&self, id: &str) {
        if let Some(entry) = self.sessions.lock().await.get_mut(id) {
            entry.last_used = Instant::now();
        }
    }

    /// Forget the session; its task ends after any turn in progress
    pub async fn end_session(&self, id: &str) -> bool {
        self.sessions.lock().await.remove(id).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop sessions unused for at least `max_idle`
    pub async fn remove_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_used.elapsed() < max_idle);
        before - sessions.len()
    }

    /// Sweep idle sessions every `every` for the life of the server
    pub fn spawn_idle_sweeper(&self, every: Duration) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await; // skip first immediate tick

            loop {
                ticker.tick().await;
                let removed = state.remove_idle(state.idle_timeout).await;
                if removed > 0 {
                    tracing::info!(removed, "Expired idle sessions");
                }
            }
        });
    }
}
