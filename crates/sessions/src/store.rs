//! Session state and the keyed store.
//!
//! One [`Session`] per logical conversation. The conversation history is
//! append-only from the outside; audio stream state and the optional
//! recognition coordinator are owned here so a disconnect or expiry can
//! tear them down in one place.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use vg_domain::error::{Error, Result};
use vg_domain::message::{ChatTurn, Message};
use vg_domain::stream::AudioEncoding;
use vg_providers::traits::{TurnDetector, Vad};

/// Handle to the per-session audio recognition coordinator. The concrete
/// type lives in the gateway; the session only needs to clear and stop it.
#[async_trait::async_trait]
pub trait RecognitionHandle: Send + Sync {
    fn clear_user_turn(&self);
    async fn stop(&self);
}

#[derive(Default)]
struct AudioState {
    active: bool,
    sample_rate: Option<u32>,
    encoding: Option<AudioEncoding>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Last-activity stamp: the monotonic instant drives expiry, the wall
/// clock is what the read-model displays.
struct ActivityStamp {
    instant: tokio::time::Instant,
    at: DateTime<Utc>,
}

impl ActivityStamp {
    fn now() -> Self {
        Self {
            instant: tokio::time::Instant::now(),
            at: Utc::now(),
        }
    }
}

pub struct Session {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    conversation: Mutex<Vec<Message>>,
    audio: Mutex<AudioState>,
    vad: Mutex<Option<Box<dyn Vad>>>,
    turn_detector: Option<Arc<dyn TurnDetector>>,
    recognition: Mutex<Option<Arc<dyn RecognitionHandle>>>,
    last_activity: Mutex<ActivityStamp>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, turn_detector: Option<Arc<dyn TurnDetector>>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            conversation: Mutex::new(Vec::new()),
            audio: Mutex::new(AudioState::default()),
            vad: Mutex::new(None),
            turn_detector,
            recognition: Mutex::new(None),
            last_activity: Mutex::new(ActivityStamp::now()),
        }
    }

    // ── Conversation ────────────────────────────────────────────────

    /// Append a message. Entries never mutate after insertion.
    pub fn add_message(&self, message: Message) {
        self.conversation.lock().push(message);
        self.touch();
    }

    pub fn conversation_snapshot(&self) -> Vec<Message> {
        self.conversation.lock().clone()
    }

    pub fn conversation_len(&self) -> usize {
        self.conversation.lock().len()
    }

    /// Conversation reduced to `{role, content}` pairs for the turn
    /// detector; empty-content entries are dropped.
    pub fn history_for_turn_detector(&self) -> Vec<ChatTurn> {
        self.conversation
            .lock()
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| {
                let role = match m.role {
                    vg_domain::message::Role::System => "system",
                    vg_domain::message::Role::User => "user",
                    vg_domain::message::Role::Assistant => "assistant",
                    vg_domain::message::Role::Tool => "tool",
                };
                ChatTurn::new(role, m.content.clone())
            })
            .collect()
    }

    // ── Activity ────────────────────────────────────────────────────

    pub fn touch(&self) {
        *self.last_activity.lock() = ActivityStamp::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity.lock().at
    }

    pub fn is_expired(&self, timeout_secs: u64) -> bool {
        self.last_activity.lock().instant.elapsed().as_secs() > timeout_secs
    }

    // ── Audio stream state ──────────────────────────────────────────

    /// Begin an audio stream. At most one may be open per session.
    pub fn start_audio_stream(&self, sample_rate: u32, encoding: AudioEncoding) -> Result<()> {
        let mut audio = self.audio.lock();
        if audio.active {
            return Err(Error::validation(
                "audio",
                "audio stream already active for this session",
            ));
        }
        audio.active = true;
        audio.sample_rate = Some(sample_rate);
        audio.encoding = Some(encoding);
        drop(audio);
        self.touch();
        Ok(())
    }

    pub fn end_audio_stream(&self) {
        let mut audio = self.audio.lock();
        audio.active = false;
        audio.sample_rate = None;
        audio.encoding = None;
        drop(audio);
        self.touch();
    }

    pub fn audio_active(&self) -> bool {
        self.audio.lock().active
    }

    pub fn audio_params(&self) -> Option<(u32, AudioEncoding)> {
        let audio = self.audio.lock();
        Some((audio.sample_rate?, audio.encoding?))
    }

    // ── Handlers ────────────────────────────────────────────────────

    pub fn turn_detector(&self) -> Option<Arc<dyn TurnDetector>> {
        self.turn_detector.clone()
    }

    pub fn set_vad(&self, vad: Box<dyn Vad>) {
        *self.vad.lock() = Some(vad);
    }

    pub fn clear_vad(&self) {
        *self.vad.lock() = None;
    }

    /// Run `f` with exclusive access to the session's VAD processor, if
    /// one is installed.
    pub fn with_vad<R>(&self, f: impl FnOnce(&mut dyn Vad) -> R) -> Option<R> {
        let mut slot = self.vad.lock();
        slot.as_mut().map(|vad| f(vad.as_mut()))
    }

    pub fn set_recognition(&self, handle: Arc<dyn RecognitionHandle>) {
        *self.recognition.lock() = Some(handle);
    }

    pub fn recognition(&self) -> Option<Arc<dyn RecognitionHandle>> {
        self.recognition.lock().clone()
    }

    pub fn take_recognition(&self) -> Option<Arc<dyn RecognitionHandle>> {
        self.recognition.lock().take()
    }

    /// Clear conversation and per-turn audio state, keeping the id.
    pub fn reset(&self) {
        self.conversation.lock().clear();
        if let Some(vad) = self.vad.lock().as_mut() {
            vad.reset();
        }
        if let Some(recognition) = self.recognition() {
            recognition.clear_user_turn();
        }
        self.touch();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keyed mapping of `session_id` → [`Session`].
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Resolve or create a session. Creation is idempotent per id;
    /// returns `(session, is_new)`.
    pub fn get_or_create(
        &self,
        session_id: &str,
        turn_detector: Option<Arc<dyn TurnDetector>>,
    ) -> (Arc<Session>, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(session) = sessions.get(session_id) {
                return (session.clone(), false);
            }
        }

        let mut sessions = self.sessions.write();
        // Re-check under the write lock: another connection may have
        // created the session between the locks.
        if let Some(session) = sessions.get(session_id) {
            return (session.clone(), false);
        }
        let session = Arc::new(Session::new(session_id, turn_detector));
        sessions.insert(session_id.to_owned(), session.clone());
        tracing::info!(session_id, "session created");
        (session, true)
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.write().remove(session_id)
    }

    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Sessions idle longer than `timeout_secs`.
    pub fn expired(&self, timeout_secs: u64) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_expired(timeout_secs))
            .cloned()
            .collect()
    }
}
