use anyhow::Result;
use courier::artifacts::{ArtifactResolver, LocalArtifactStore};
use courier::discovery::{DiscoveryClient, ToolRegistry};
use courier::dispatcher::ChatDispatcher;
use courier::prompt_template::SystemTemplate;
use courier::providers::openai::OpenAiProvider;
use courier::tracker::ToolCallTracker;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::auth::{ApiKeyAuthenticator, Authenticator};
use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<ChatDispatcher>,
    pub registry: Arc<ToolRegistry>,
    pub artifacts: ArtifactResolver,
    pub auth: Arc<dyn Authenticator>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let provider = OpenAiProvider::new(settings.provider.into_config())?;

        let client = DiscoveryClient::mcp(settings.tools.connect_timeout())?
            .with_policy(settings.tools.fallback);
        let registry = Arc::new(ToolRegistry::new(client, settings.tools.providers));

        let system = settings
            .chat
            .system_prompt
            .map(SystemTemplate::File)
            .unwrap_or_default();
        let dispatcher = ChatDispatcher::new(
            Arc::new(provider),
            registry.clone(),
            settings.models.catalog(),
        )
        .with_system_template(system)
        .with_max_tool_rounds(settings.chat.max_tool_rounds);

        let store = LocalArtifactStore::new(settings.artifacts.root);

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            registry,
            artifacts: ArtifactResolver::new(Arc::new(store)),
            auth: Arc::new(ApiKeyAuthenticator::new(settings.auth.api_keys)),
            sessions: SessionRegistry::default(),
        })
    }
}

struct Session {
    generation: u64,
    tracker: ToolCallTracker,
    cancel: CancellationToken,
}

/// The dispatch currently running on a thread
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub thread_id: String,
    pub generation: u64,
    pub tracker: ToolCallTracker,
    pub cancel: CancellationToken,
}

/// Live chat sessions by thread id. One active dispatch per thread.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    generations: Arc<AtomicU64>,
}

impl SessionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a new dispatch, cancelling whatever was running on the thread
    pub fn start(&self, thread_id: &str) -> ActiveSession {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let mut sessions = self.lock();

        if let Some(previous) = sessions.remove(thread_id) {
            tracing::info!(thread_id, "superseding active chat");
            previous.cancel.cancel();
            previous.tracker.reset();
        }
        // The superseded dispatch keeps its own tracker until it winds down
        let tracker = ToolCallTracker::new();
        let cancel = CancellationToken::new();
        sessions.insert(
            thread_id.to_string(),
            Session {
                generation,
                tracker: tracker.clone(),
                cancel: cancel.clone(),
            },
        );

        ActiveSession {
            thread_id: thread_id.to_string(),
            generation,
            tracker,
            cancel,
        }
    }

    /// Drop the session, unless a newer dispatch has taken the thread over
    pub fn finish(&self, session: &ActiveSession) {
        let mut sessions = self.lock();
        if sessions
            .get(&session.thread_id)
            .is_some_and(|s| s.generation == session.generation)
        {
            sessions.remove(&session.thread_id);
        }
    }

    pub fn cancel(&self, thread_id: &str) -> bool {
        match self.lock().get(thread_id) {
            Some(session) => {
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn tracker(&self, thread_id: &str) -> Option<ToolCallTracker> {
        self.lock().get(thread_id).map(|s| s.tracker.clone())
    }
}
