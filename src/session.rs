use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use tokio::sync::Mutex;

use crate::agents::orchestrator::Orchestrator;
use crate::runner::OrchestratorFactory;
use crate::streaming::{EventStream, event_channel};

pub type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

/// One orchestrator per conversation session, least recently used evicted first.
/// Turns for the same session serialize on that session's mutex.
pub struct SessionRegistry {
    factory: Arc<OrchestratorFactory>,
    sessions: Mutex<IndexMap<String, SharedOrchestrator>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(factory: Arc<OrchestratorFactory>, max_sessions: usize) -> Self {
        Self {
            factory,
            sessions: Mutex::new(IndexMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    pub fn factory(&self) -> &Arc<OrchestratorFactory> {
        &self.factory
    }

    pub async fn get_or_create(&self, session_id: &str) -> Result<(SharedOrchestrator, &'static str)> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(anyhow::anyhow!("session id cannot be empty"));
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.shift_remove(session_id) {
            sessions.insert(session_id.to_string(), existing.clone());
            return Ok((existing, "hit"));
        }

        while sessions.len() >= self.max_sessions {
            let Some((evicted, _)) = sessions.shift_remove_index(0) else {
                break;
            };
            tracing::info!(evicted_session = %evicted, cache_size = sessions.len(), "session registry eviction");
        }

        let orchestrator = Arc::new(Mutex::new(self.factory.build(session_id)?));
        sessions.insert(session_id.to_string(), orchestrator.clone());
        tracing::debug!(session_id = session_id, "session created");
        Ok((orchestrator, "miss"))
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().await.contains_key(session_id)
    }
}

/// Runs one turn on a background task and hands back its event stream.
pub fn spawn_turn(orchestrator: SharedOrchestrator, message: String) -> EventStream {
    let (sink, stream) = event_channel();
    tokio::spawn(async move {
        let mut orchestrator = orchestrator.lock().await;
        orchestrator.handle(&message, sink).await;
    });
    stream
}
