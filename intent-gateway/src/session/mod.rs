//! Streaming recognition sessions as a typed message bus.
//!
//! Each session owns a task that drains text chunks, refreshes a rolling
//! summary every few chunks, and re-classifies the summary through the
//! engine. Events fan out on one broadcast channel; a reaper evicts
//! sessions idle for more than five minutes.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use meltdown::Token;
use rustc_hash::FxHashMap;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    classify::IntentEngine, error::runtime::RuntimeError,
    types::request::IntentRequest, types::response::IntentResponse,
};

const CHUNK_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;
const SUMMARY_EVERY_CHUNKS: u64 = 5;
const SUMMARY_WINDOW_CHUNKS: usize = 10;
const IDLE_EVICTION: Duration = Duration::from_secs(300);
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
    },
    ChunkProcessed {
        session_id: String,
        sequence: u64,
    },
    SummaryUpdated {
        session_id: String,
        summary: String,
    },
    IntentRecognized {
        session_id: String,
        response: Box<IntentResponse>,
    },
    SessionExpired {
        session_id: String,
    },
}

/// Client side of one session: push chunks, drop to end the session.
pub struct SessionHandle {
    pub session_id: String,
    chunk_tx: mpsc::Sender<String>,
}

impl SessionHandle {
    pub async fn send_chunk(
        &self,
        chunk: impl Into<String>,
    ) -> Result<(), SessionClosed> {
        self.chunk_tx
            .send(chunk.into())
            .await
            .map_err(|_| SessionClosed)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

struct SessionEntry {
    cancel: CancellationToken,
    last_active: Arc<std::sync::Mutex<Instant>>,
}

pub struct SessionBus {
    engine: Arc<IntentEngine>,
    events: broadcast::Sender<SessionEvent>,
    sessions: Arc<RwLock<FxHashMap<String, SessionEntry>>>,
}

impl SessionBus {
    #[must_use]
    pub fn new(engine: Arc<IntentEngine>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            engine,
            events,
            sessions: Arc::new(RwLock::new(FxHashMap::default())),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Open a session and spawn its owning task.
    pub async fn open(&self, session_id: impl Into<String>) -> SessionHandle {
        let session_id = session_id.into();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let cancel = CancellationToken::new();
        let last_active = Arc::new(std::sync::Mutex::new(Instant::now()));

        {
            let mut sessions = self.sessions.write().await;
            // Reopening an id cancels the previous owner.
            if let Some(previous) = sessions.insert(
                session_id.clone(),
                SessionEntry {
                    cancel: cancel.clone(),
                    last_active: last_active.clone(),
                },
            ) {
                previous.cancel.cancel();
            }
        }

        let _ = self.events.send(SessionEvent::SessionStarted {
            session_id: session_id.clone(),
        });

        tokio::spawn(run_session(
            session_id.clone(),
            self.engine.clone(),
            self.events.clone(),
            self.sessions.clone(),
            chunk_rx,
            cancel,
            last_active,
        ));

        SessionHandle {
            session_id,
            chunk_tx,
        }
    }

    /// Cancel sessions idle past the eviction window.
    pub async fn reap_idle(&self) {
        let sessions = self.sessions.read().await;
        for (session_id, entry) in sessions.iter() {
            let idle = entry
                .last_active
                .lock()
                .expect("session clock never poisoned")
                .elapsed();
            if idle > IDLE_EVICTION {
                tracing::debug!(
                    session_id,
                    idle_secs = idle.as_secs(),
                    "evicting idle session"
                );
                entry.cancel.cancel();
            }
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn run_session(
    session_id: String,
    engine: Arc<IntentEngine>,
    events: broadcast::Sender<SessionEvent>,
    sessions: Arc<RwLock<FxHashMap<String, SessionEntry>>>,
    mut chunk_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    last_active: Arc<std::sync::Mutex<Instant>>,
) {
    let mut recent_chunks: Vec<String> = Vec::new();
    let mut sequence: u64 = 0;
    let mut expired = false;

    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                expired = true;
                break;
            }
            chunk = chunk_rx.recv() => match chunk {
                Some(chunk) => chunk,
                // Handle dropped: orderly end of the stream.
                None => break,
            },
        };

        *last_active
            .lock()
            .expect("session clock never poisoned") = Instant::now();
        sequence += 1;
        recent_chunks.push(chunk);
        if recent_chunks.len() > SUMMARY_WINDOW_CHUNKS {
            recent_chunks.remove(0);
        }
        let _ = events.send(SessionEvent::ChunkProcessed {
            session_id: session_id.clone(),
            sequence,
        });

        if sequence % SUMMARY_EVERY_CHUNKS == 0 {
            let summary = recent_chunks.join(" ");
            let _ = events.send(SessionEvent::SummaryUpdated {
                session_id: session_id.clone(),
                summary: summary.clone(),
            });
            match engine
                .classify_intent(&IntentRequest::from_text(summary))
                .await
            {
                Ok(response) => {
                    let _ = events.send(SessionEvent::IntentRecognized {
                        session_id: session_id.clone(),
                        response: Box::new(response),
                    });
                }
                Err(error) => {
                    tracing::debug!(
                        session_id,
                        error = %error,
                        "summary classification failed"
                    );
                }
            }
        }
    }

    if expired {
        let _ = events.send(SessionEvent::SessionExpired {
            session_id: session_id.clone(),
        });
    }
    sessions.write().await.remove(&session_id);
}

/// Periodic eviction of idle sessions, registered as a meltdown task.
pub struct SessionReaper {
    bus: Arc<SessionBus>,
}

impl SessionReaper {
    #[must_use]
    pub fn new(bus: Arc<SessionBus>) -> Self {
        Self { bus }
    }
}

impl meltdown::Service for SessionReaper {
    type Future = BoxFuture<'static, Result<(), RuntimeError>>;

    fn run(self, mut token: Token) -> Self::Future {
        Box::pin(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => self.bus.reap_idle().await,
                    () = &mut token => {
                        tracing::debug!(name = "session-reaper", "task shut down successfully");
                        return Ok(());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::ResponseCache,
        classify::gemini::LlmClassifier,
        config::{
            cache::CacheConfig, llm::LlmConfig, registry::RegistryConfig,
            routing::RoutingConfig,
        },
        registry::ServiceRegistry,
    };

    fn bus() -> SessionBus {
        let registry = Arc::new(
            ServiceRegistry::new(&RegistryConfig::default()).unwrap(),
        );
        let engine = Arc::new(
            IntentEngine::new(
                RoutingConfig::default(),
                LlmClassifier::new(&LlmConfig::default()).unwrap(),
                ResponseCache::from_config(&CacheConfig::default()),
                registry,
            )
            .unwrap(),
        );
        SessionBus::new(engine)
    }

    async fn next_event(
        rx: &mut broadcast::Receiver<SessionEvent>,
    ) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event before timeout")
            .expect("bus open")
    }

    #[tokio::test]
    async fn five_chunks_produce_a_summary_and_an_intent() {
        let bus = bus();
        let mut events = bus.subscribe();
        let handle = bus.open("session-1").await;

        for chunk in [
            "I forgot",
            "my password",
            "and need",
            "to reset",
            "it please",
        ] {
            handle.send_chunk(chunk).await.unwrap();
        }

        let mut saw_summary = false;
        let mut recognized = None;
        for _ in 0..16 {
            match next_event(&mut events).await {
                SessionEvent::SummaryUpdated { summary, .. } => {
                    assert!(summary.contains("password"));
                    saw_summary = true;
                }
                SessionEvent::IntentRecognized { response, .. } => {
                    recognized = Some(response);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_summary);
        let response = recognized.expect("intent event");
        assert_eq!(
            response.routing.target_service.as_str(),
            "user-authentication-service"
        );
    }

    #[tokio::test]
    async fn dropping_the_handle_ends_the_session() {
        let bus = bus();
        let handle = bus.open("session-2").await;
        handle.send_chunk("hello").await.unwrap();
        drop(handle);
        // The owning task drains and deregisters.
        for _ in 0..50 {
            if bus.session_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session was not cleaned up");
    }

    #[tokio::test]
    async fn cancelled_sessions_emit_expired() {
        let bus = bus();
        let mut events = bus.subscribe();
        let _handle = bus.open("session-3").await;
        {
            let sessions = bus.sessions.read().await;
            sessions["session-3"].cancel.cancel();
        }
        loop {
            match next_event(&mut events).await {
                SessionEvent::SessionExpired { session_id } => {
                    assert_eq!(session_id, "session-3");
                    break;
                }
                _ => {}
            }
        }
    }
}
