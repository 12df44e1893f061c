//! Metrics collection: per-session counters and server-wide aggregates.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Counters for a single session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionMetrics {
    pub messages_received: u64,
    pub audio_chunks_received: u64,
    pub stt_transcriptions: u64,
    pub agent_responses: u64,
    pub tool_calls: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
    pub stt_latency_ms: f64,
}

impl SessionMetrics {
    pub fn average_latency_ms(&self) -> f64 {
        if self.agent_responses == 0 {
            0.0
        } else {
            self.total_latency_ms / self.agent_responses as f64
        }
    }
}

/// Server-wide snapshot served over HTTP and broadcast on the bus.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMetricsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_tool_calls: u64,
    pub total_errors: u64,
    pub total_audio_chunks: u64,
    pub total_stt_transcriptions: u64,
    pub total_agent_responses: u64,
    pub average_latency_ms: f64,
    pub average_stt_latency_ms: f64,
    pub uptime_seconds: f64,
}

#[derive(Default)]
struct Totals {
    active_connections: u64,
    total_connections: u64,
    total_messages: u64,
    total_tool_calls: u64,
    total_errors: u64,
    total_audio_chunks: u64,
    total_stt_transcriptions: u64,
    total_agent_responses: u64,
    agent_latency_ms: f64,
    stt_latency_ms: f64,
    stt_latency_samples: u64,
}

pub struct MetricsCollector {
    started: Instant,
    totals: Mutex<Totals>,
    sessions: Mutex<HashMap<String, SessionMetrics>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            totals: Mutex::new(Totals::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub fn create_session(&self, session_id: &str) {
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_default();
    }

    pub fn remove_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    pub fn session_snapshot(&self, session_id: &str) -> Option<SessionMetrics> {
        self.sessions.lock().get(session_id).cloned()
    }

    // ── Connections ─────────────────────────────────────────────────

    pub fn increment_connection(&self) {
        let mut totals = self.totals.lock();
        totals.active_connections += 1;
        totals.total_connections += 1;
    }

    pub fn decrement_connection(&self) {
        let mut totals = self.totals.lock();
        totals.active_connections = totals.active_connections.saturating_sub(1);
    }

    pub fn active_connections(&self) -> u64 {
        self.totals.lock().active_connections
    }

    // ── Recording ───────────────────────────────────────────────────

    pub fn record_message(&self, session_id: &str) {
        self.totals.lock().total_messages += 1;
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.messages_received += 1;
        }
    }

    pub fn record_audio_chunk(&self, session_id: &str) {
        self.totals.lock().total_audio_chunks += 1;
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.audio_chunks_received += 1;
        }
    }

    pub fn record_stt_transcription(&self, session_id: &str, latency_ms: Option<f64>) {
        let mut totals = self.totals.lock();
        totals.total_stt_transcriptions += 1;
        if let Some(latency) = latency_ms {
            totals.stt_latency_ms += latency;
            totals.stt_latency_samples += 1;
        }
        drop(totals);
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.stt_transcriptions += 1;
            session.stt_latency_ms += latency_ms.unwrap_or(0.0);
        }
    }

    pub fn record_agent_response(&self, session_id: &str, latency_ms: f64) {
        let mut totals = self.totals.lock();
        totals.total_agent_responses += 1;
        totals.agent_latency_ms += latency_ms;
        drop(totals);
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.agent_responses += 1;
            session.total_latency_ms += latency_ms;
        }
    }

    pub fn record_tool_call(&self, session_id: &str) {
        self.totals.lock().total_tool_calls += 1;
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.tool_calls += 1;
        }
    }

    pub fn record_error(&self, session_id: &str) {
        self.totals.lock().total_errors += 1;
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.errors += 1;
        }
    }

    // ── Snapshot ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ServerMetricsSnapshot {
        let totals = self.totals.lock();
        let average_latency_ms = if totals.total_agent_responses == 0 {
            0.0
        } else {
            totals.agent_latency_ms / totals.total_agent_responses as f64
        };
        let average_stt_latency_ms = if totals.stt_latency_samples == 0 {
            0.0
        } else {
            totals.stt_latency_ms / totals.stt_latency_samples as f64
        };
        ServerMetricsSnapshot {
            active_connections: totals.active_connections,
            total_connections: totals.total_connections,
            total_messages: totals.total_messages,
            total_tool_calls: totals.total_tool_calls,
            total_errors: totals.total_errors,
            total_audio_chunks: totals.total_audio_chunks,
            total_stt_transcriptions: totals.total_stt_transcriptions,
            total_agent_responses: totals.total_agent_responses,
            average_latency_ms,
            average_stt_latency_ms,
            uptime_seconds: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counting_never_underflows() {
        let metrics = MetricsCollector::new();
        metrics.increment_connection();
        metrics.decrement_connection();
        metrics.decrement_connection();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_connections, 0);
        assert_eq!(snapshot.total_connections, 1);
    }

    #[test]
    fn agent_latency_averages_over_responses() {
        let metrics = MetricsCollector::new();
        metrics.create_session("s1");
        metrics.record_agent_response("s1", 100.0);
        metrics.record_agent_response("s1", 300.0);

        assert!((metrics.snapshot().average_latency_ms - 200.0).abs() < 1e-9);
        let session = metrics.session_snapshot("s1").unwrap();
        assert_eq!(session.agent_responses, 2);
        assert!((session.average_latency_ms() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn stt_latency_averages_only_over_measured_samples() {
        let metrics = MetricsCollector::new();
        metrics.create_session("s1");
        metrics.record_stt_transcription("s1", Some(50.0));
        metrics.record_stt_transcription("s1", None);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_stt_transcriptions, 2);
        assert!((snapshot.average_stt_latency_ms - 50.0).abs() < 1e-9);
    }

    #[test]
    fn per_session_counters_track_independently() {
        let metrics = MetricsCollector::new();
        metrics.create_session("a");
        metrics.create_session("b");
        metrics.record_message("a");
        metrics.record_tool_call("a");
        metrics.record_error("b");

        let a = metrics.session_snapshot("a").unwrap();
        let b = metrics.session_snapshot("b").unwrap();
        assert_eq!(a.messages_received, 1);
        assert_eq!(a.tool_calls, 1);
        assert_eq!(a.errors, 0);
        assert_eq!(b.errors, 1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_messages, 1);
        assert_eq!(snapshot.total_tool_calls, 1);
        assert_eq!(snapshot.total_errors, 1);
    }

    #[test]
    fn removing_a_session_keeps_server_totals() {
        let metrics = MetricsCollector::new();
        metrics.create_session("s1");
        metrics.record_message("s1");
        metrics.remove_session("s1");

        assert!(metrics.session_snapshot("s1").is_none());
        assert_eq!(metrics.snapshot().total_messages, 1);
    }
}
