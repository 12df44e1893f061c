//! Audio recognition coordinator.
//!
//! Owns the per-session audio pipeline: raw PCM frames flow through a
//! bounded queue into the streaming STT provider; VAD events and new
//! final transcripts arm an end-of-utterance decision with an adaptive
//! endpointing delay; when the delay expires with transcript still
//! accumulated, the user turn is committed to the agent loop.
//!
//! Two invariants drive commits:
//! 1. the committed transcript is captured *after* the endpointing delay,
//!    so finals arriving during the delay are never lost;
//! 2. every new final transcript cancels the in-flight commit task and
//!    arms a fresh one with the updated transcript.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vg_domain::error::Error;
use vg_domain::message::ChatTurn;
use vg_domain::stream::{AudioEncoding, Transcript};
use vg_providers::traits::{SttHandler, TurnDetector};
use vg_providers::vad::VadEvent;
use vg_sessions::RecognitionHandle;

/// Grace period for the STT stream task to drain after the sentinel.
const STOP_GRACE: Duration = Duration::from_secs(2);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Callbacks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub type TranscriptCallback = Arc<dyn Fn(Transcript) -> BoxFuture<'static, ()> + Send + Sync>;
pub type TurnEndCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(Error) -> BoxFuture<'static, ()> + Send + Sync>;
pub type HistoryFn = Arc<dyn Fn() -> Vec<ChatTurn> + Send + Sync>;

/// Closures created at coordinator construction. They capture only the
/// outbound message sender, the session's history snapshot, and the agent
/// entry point — never the coordinator itself.
pub struct RecognitionCallbacks {
    /// Interim or final transcript for the client.
    pub on_transcript: TranscriptCallback,
    /// A committed user turn, handed to the agent loop.
    pub on_turn_end: TurnEndCallback,
    /// STT stream failure surfaced to the client.
    pub on_error: ErrorCallback,
    /// Conversation snapshot for the turn detector.
    pub history: HistoryFn,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct TurnState {
    /// Accumulated final transcripts for the in-progress user turn.
    audio_transcript: String,
    /// Latest interim hypothesis; replaced wholesale by each update.
    interim_transcript: String,
    /// Last known VAD state.
    speaking: bool,
    last_final_at: Option<tokio::time::Instant>,
}

struct Inner {
    stt: Arc<dyn SttHandler>,
    turn_detector: Option<Arc<dyn TurnDetector>>,
    min_delay: Duration,
    max_delay: Duration,
    callbacks: RecognitionCallbacks,
    state: Mutex<TurnState>,
    audio_tx: mpsc::Sender<Option<Vec<u8>>>,
    /// Taken by `start`; `None` afterwards makes `start` idempotent.
    audio_rx: Mutex<Option<mpsc::Receiver<Option<Vec<u8>>>>>,
    stt_task: Mutex<Option<JoinHandle<()>>>,
    eou_task: Mutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
}

pub struct AudioRecognition {
    inner: Arc<Inner>,
}

impl AudioRecognition {
    pub fn new(
        stt: Arc<dyn SttHandler>,
        turn_detector: Option<Arc<dyn TurnDetector>>,
        min_delay: Duration,
        max_delay: Duration,
        queue_capacity: usize,
        callbacks: RecognitionCallbacks,
    ) -> Self {
        let (audio_tx, audio_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                stt,
                turn_detector,
                min_delay,
                max_delay,
                callbacks,
                state: Mutex::new(TurnState::default()),
                audio_tx,
                audio_rx: Mutex::new(Some(audio_rx)),
                stt_task: Mutex::new(None),
                eou_task: Mutex::new(None),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn the STT streaming task. Idempotent per coordinator.
    pub async fn start(&self, sample_rate: u32, encoding: AudioEncoding, language: Option<String>) {
        let Some(mut rx) = self.inner.audio_rx.lock().take() else {
            return;
        };

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let audio = Box::pin(async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    match item {
                        Some(frame) => yield frame,
                        None => break,
                    }
                }
            });

            let mut transcripts = match inner
                .stt
                .stream_transcribe(audio, sample_rate, encoding, language)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(error = %e, "failed to open STT stream");
                    (inner.callbacks.on_error)(e).await;
                    return;
                }
            };

            while let Some(result) = transcripts.next().await {
                match result {
                    Ok(transcript) => Inner::handle_transcript(&inner, transcript).await,
                    Err(e) => {
                        tracing::error!(error = %e, "STT stream error");
                        (inner.callbacks.on_error)(e).await;
                        break;
                    }
                }
            }
            tracing::debug!("STT streaming task finished");
        });

        *self.inner.stt_task.lock() = Some(handle);
        tracing::info!(sample_rate, encoding = encoding.as_str(), "audio recognition started");
    }

    /// Enqueue audio for the STT stream. Bounded; applies backpressure to
    /// the caller rather than buffering without limit.
    pub async fn push_audio_frame(&self, frame: Vec<u8>) {
        if self.inner.closing.load(Ordering::Acquire) {
            return;
        }
        let _ = self.inner.audio_tx.send(Some(frame)).await;
    }

    /// Feed a VAD event derived from the incoming chunk stream.
    pub async fn handle_vad_event(&self, event: VadEvent, probability: f32) {
        match event {
            VadEvent::StartOfSpeech => {
                self.inner.state.lock().speaking = true;
                tracing::debug!(probability, "user started speaking");
                // The user resumed; any pending commit is stale.
                Inner::cancel_eou(&self.inner).await;
            }
            VadEvent::EndOfSpeech => {
                let has_transcript = {
                    let mut state = self.inner.state.lock();
                    state.speaking = false;
                    !state.audio_transcript.is_empty()
                };
                tracing::debug!(probability, has_transcript, "user stopped speaking");
                if has_transcript {
                    Inner::run_eou_detection(&self.inner).await;
                }
                // Nothing transcribed yet: wait for STT to catch up.
            }
            VadEvent::Continuing => {}
        }
    }

    /// Last known VAD state.
    pub fn is_speaking(&self) -> bool {
        self.inner.state.lock().speaking
    }

    /// Accumulated finals plus the trailing interim hypothesis.
    pub fn current_transcript(&self) -> String {
        let state = self.inner.state.lock();
        if state.interim_transcript.is_empty() {
            state.audio_transcript.clone()
        } else {
            format!("{} {}", state.audio_transcript, state.interim_transcript)
                .trim()
                .to_string()
        }
    }

    pub fn clear_user_turn(&self) {
        let mut state = self.inner.state.lock();
        state.audio_transcript.clear();
        state.interim_transcript.clear();
        state.last_final_at = None;
    }

    /// Drain and stop. No commit happens after this returns.
    pub async fn stop(&self) {
        self.inner.closing.store(true, Ordering::Release);

        // Sentinel lets the STT generator finish cleanly.
        let _ = self.inner.audio_tx.send(None).await;

        let stt_task = self.inner.stt_task.lock().take();
        if let Some(handle) = stt_task {
            let abort = handle.abort_handle();
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("STT streaming task did not stop in time, cancelling");
                    abort.abort();
                }
            }
        }

        Inner::cancel_eou(&self.inner).await;
        tracing::info!("audio recognition stopped");
    }
}

impl Inner {
    /// One yielded STT result.
    async fn handle_transcript(inner: &Arc<Inner>, transcript: Transcript) {
        if transcript.is_final {
            {
                let mut state = inner.state.lock();
                let text = transcript.text.trim();
                if state.audio_transcript.is_empty() {
                    state.audio_transcript = text.to_string();
                } else {
                    state.audio_transcript.push(' ');
                    state.audio_transcript.push_str(text);
                }
                state.interim_transcript.clear();
                state.last_final_at = Some(tokio::time::Instant::now());
            }

            (inner.callbacks.on_transcript)(transcript).await;

            // Always re-arm: the decision must use the updated transcript
            // even while the user is still speaking. A later
            // StartOfSpeech will cancel it again.
            Inner::run_eou_detection(inner).await;
        } else {
            inner.state.lock().interim_transcript = transcript.text.clone();
            (inner.callbacks.on_transcript)(transcript).await;
        }
    }

    /// Cancel any pending end-of-utterance task and wait it out.
    async fn cancel_eou(inner: &Arc<Inner>) {
        let handle = inner.eou_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Arm a fresh end-of-utterance decision, replacing any pending one.
    async fn run_eou_detection(inner: &Arc<Inner>) {
        Inner::cancel_eou(inner).await;
        let task_inner = inner.clone();
        let handle = tokio::spawn(async move {
            Inner::eou_with_delay(task_inner).await;
        });
        *inner.eou_task.lock() = Some(handle);
    }

    /// Predict end-of-utterance, sleep the adaptive delay, then commit
    /// whatever transcript has accumulated by commit time.
    async fn eou_with_delay(inner: Arc<Inner>) {
        let snapshot = inner.state.lock().audio_transcript.clone();

        let mut delay = inner.min_delay;
        if let Some(detector) = inner.turn_detector.clone() {
            if !snapshot.is_empty() {
                let mut history = (inner.callbacks.history)();
                history.push(ChatTurn::new("user", snapshot));

                // Inference is compute-bound; keep it off the event loop.
                let prediction = tokio::task::spawn_blocking(move || {
                    let probability = detector.predict_end_of_turn(&history);
                    (probability, detector.threshold())
                })
                .await;

                delay = match prediction {
                    Ok((probability, threshold)) if probability >= threshold => {
                        tracing::debug!(probability, threshold, "high EOU probability, min delay");
                        inner.min_delay
                    }
                    Ok((probability, threshold)) => {
                        tracing::debug!(probability, threshold, "low EOU probability, max delay");
                        inner.max_delay
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "turn detector task failed, using max delay");
                        inner.max_delay
                    }
                };
            }
        }

        // Finals arriving during this sleep re-arm the decision by
        // cancelling this task.
        tokio::time::sleep(delay).await;

        if inner.closing.load(Ordering::Acquire) {
            return;
        }

        // Capture at commit time, not decision time.
        let (transcript, since_final) = {
            let mut state = inner.state.lock();
            if state.audio_transcript.is_empty() {
                return;
            }
            state.interim_transcript.clear();
            let since_final = state.last_final_at.take().map(|t| t.elapsed());
            (std::mem::take(&mut state.audio_transcript), since_final)
        };

        tracing::info!(
            transcript = %transcript,
            since_last_final = ?since_final,
            "committing user turn"
        );
        (inner.callbacks.on_turn_end)(transcript).await;
    }
}

#[async_trait::async_trait]
impl RecognitionHandle for AudioRecognition {
    fn clear_user_turn(&self) {
        AudioRecognition::clear_user_turn(self);
    }

    async fn stop(&self) {
        AudioRecognition::stop(self).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vg_domain::error::Result;
    use vg_domain::stream::BoxStream;

    /// STT fake: replays transcripts from a channel and counts the audio
    /// frames it consumed.
    struct ScriptedStt {
        script_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Transcript>>>>,
        frames_seen: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl SttHandler for ScriptedStt {
        async fn stream_transcribe(
            &self,
            audio: BoxStream<'static, Vec<u8>>,
            _sample_rate: u32,
            _encoding: AudioEncoding,
            _language: Option<String>,
        ) -> Result<BoxStream<'static, Result<Transcript>>> {
            let mut script = self.script_rx.lock().take().expect("stream started twice");
            let frames_seen = self.frames_seen.clone();

            // Drain audio in the background so pushes never block.
            tokio::spawn(async move {
                let mut audio = audio;
                while audio.next().await.is_some() {
                    frames_seen.fetch_add(1, Ordering::SeqCst);
                }
            });

            Ok(Box::pin(async_stream::stream! {
                while let Some(item) = script.recv().await {
                    yield item;
                }
            }))
        }
    }

    struct FixedDetector {
        probability: f32,
        threshold: f32,
        calls: Arc<AtomicUsize>,
    }

    impl TurnDetector for FixedDetector {
        fn predict_end_of_turn(&self, _history: &[ChatTurn]) -> f32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.probability
        }

        fn threshold(&self) -> f32 {
            self.threshold
        }
    }

    struct Harness {
        recognition: AudioRecognition,
        script_tx: mpsc::UnboundedSender<Result<Transcript>>,
        commits_rx: mpsc::UnboundedReceiver<String>,
        transcripts_rx: mpsc::UnboundedReceiver<Transcript>,
        frames_seen: Arc<AtomicUsize>,
    }

    async fn harness(detector: Option<Arc<dyn TurnDetector>>) -> Harness {
        let (script_tx, script_rx) = mpsc::unbounded_channel();
        let frames_seen = Arc::new(AtomicUsize::new(0));
        let stt = Arc::new(ScriptedStt {
            script_rx: Mutex::new(Some(script_rx)),
            frames_seen: frames_seen.clone(),
        });

        let (commits_tx, commits_rx) = mpsc::unbounded_channel();
        let (transcripts_tx, transcripts_rx) = mpsc::unbounded_channel();

        let callbacks = RecognitionCallbacks {
            on_transcript: Arc::new(move |t| {
                let tx = transcripts_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(t);
                })
            }),
            on_turn_end: Arc::new(move |transcript| {
                let tx = commits_tx.clone();
                Box::pin(async move {
                    let _ = tx.send(transcript);
                })
            }),
            on_error: Arc::new(|_| Box::pin(async {})),
            history: Arc::new(Vec::new),
        };

        let recognition = AudioRecognition::new(
            stt,
            detector,
            Duration::from_millis(500),
            Duration::from_secs(3),
            64,
            callbacks,
        );
        recognition
            .start(16000, AudioEncoding::Pcm16, None)
            .await;
        Harness {
            recognition,
            script_tx,
            commits_rx,
            transcripts_rx,
            frames_seen,
        }
    }

    fn final_t(text: &str) -> Result<Transcript> {
        Ok(Transcript::finalized(text, Some(0.9)))
    }

    #[tokio::test(start_paused = true)]
    async fn finals_accumulate_and_commit_once_with_latest_transcript() {
        let mut h = harness(None).await;

        // Two finals in quick succession: the second re-arms the pending
        // commit, so exactly one turn lands with the merged transcript.
        h.script_tx.send(final_t("hello")).unwrap();
        h.script_tx.send(final_t(" world")).unwrap();

        let committed = h.commits_rx.recv().await.unwrap();
        assert_eq!(committed, "hello world");

        // No second commit.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.commits_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn low_eou_probability_waits_max_delay() {
        let calls = Arc::new(AtomicUsize::new(0));
        let detector: Arc<dyn TurnDetector> = Arc::new(FixedDetector {
            probability: 0.1,
            threshold: 0.6,
            calls: calls.clone(),
        });
        let mut h = harness(Some(detector)).await;

        let armed_at = tokio::time::Instant::now();
        h.script_tx.send(final_t("um")).unwrap();

        let committed = h.commits_rx.recv().await.unwrap();
        assert_eq!(committed, "um");
        // The commit waited at least the 3-second max delay.
        assert!(armed_at.elapsed() >= Duration::from_secs(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probability_at_threshold_uses_min_delay() {
        let detector: Arc<dyn TurnDetector> = Arc::new(FixedDetector {
            probability: 0.6,
            threshold: 0.6,
            calls: Arc::new(AtomicUsize::new(0)),
        });
        let mut h = harness(Some(detector)).await;

        let armed_at = tokio::time::Instant::now();
        h.script_tx.send(final_t("done")).unwrap();

        let _ = h.commits_rx.recv().await.unwrap();
        let waited = armed_at.elapsed();
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn interim_transcripts_replace_and_reach_the_client() {
        let mut h = harness(None).await;

        h.script_tx
            .send(Ok(Transcript::interim("hel")))
            .unwrap();
        h.script_tx
            .send(Ok(Transcript::interim("hello")))
            .unwrap();

        let first = h.transcripts_rx.recv().await.unwrap();
        let second = h.transcripts_rx.recv().await.unwrap();
        assert!(!first.is_final);
        assert_eq!(second.text, "hello");

        // Interims alone never commit a turn.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.commits_rx.try_recv().is_err());
        assert_eq!(h.recognition.current_transcript(), "hello");
    }

    #[tokio::test(start_paused = true)]
    async fn current_transcript_joins_finals_and_interim() {
        let mut h = harness(None).await;

        h.script_tx.send(final_t("first part")).unwrap();
        h.script_tx
            .send(Ok(Transcript::interim("and more")))
            .unwrap();

        // Drain the two transcript callbacks so state is settled.
        let _ = h.transcripts_rx.recv().await;
        let _ = h.transcripts_rx.recv().await;

        assert_eq!(h.recognition.current_transcript(), "first part and more");
    }

    #[tokio::test(start_paused = true)]
    async fn vad_end_of_speech_commits_accumulated_transcript() {
        let mut h = harness(None).await;

        h.script_tx.send(final_t("hello there")).unwrap();
        let _ = h.transcripts_rx.recv().await;

        h.recognition
            .handle_vad_event(VadEvent::StartOfSpeech, 0.9)
            .await;
        assert!(h.recognition.is_speaking());
        h.recognition
            .handle_vad_event(VadEvent::EndOfSpeech, 0.2)
            .await;
        assert!(!h.recognition.is_speaking());

        let committed = h.commits_rx.recv().await.unwrap();
        assert_eq!(committed, "hello there");
    }

    #[tokio::test(start_paused = true)]
    async fn end_of_speech_without_transcript_waits_for_stt() {
        let mut h = harness(None).await;

        h.recognition
            .handle_vad_event(VadEvent::EndOfSpeech, 0.2)
            .await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.commits_rx.try_recv().is_err());

        // The transcript arriving later still commits.
        h.script_tx.send(final_t("late words")).unwrap();
        let committed = h.commits_rx.recv().await.unwrap();
        assert_eq!(committed, "late words");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_commits_nothing_afterwards() {
        let mut h = harness(None).await;

        h.script_tx.send(final_t("about to stop")).unwrap();
        let _ = h.transcripts_rx.recv().await;

        h.recognition.stop().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.commits_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn frames_pushed_equal_frames_forwarded() {
        let h = harness(None).await;

        for i in 0..25u8 {
            h.recognition.push_audio_frame(vec![i; 320]).await;
        }
        // Let the drain task catch up, then stop (which appends only the
        // sentinel, not a frame).
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.recognition.stop().await;

        assert_eq!(h.frames_seen.load(Ordering::SeqCst), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_user_turn_discards_pending_transcript() {
        let mut h = harness(None).await;

        h.script_tx.send(final_t("discard me")).unwrap();
        let _ = h.transcripts_rx.recv().await;

        h.recognition.clear_user_turn();
        assert_eq!(h.recognition.current_transcript(), "");

        // The armed EOU task finds an empty transcript and commits nothing.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.commits_rx.try_recv().is_err());
    }
}
