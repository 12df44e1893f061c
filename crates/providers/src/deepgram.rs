//! Deepgram streaming STT over WebSocket.
//!
//! One upstream socket per audio stream. Three tasks cooperate around the
//! socket: a writer draining an outbound channel, a sender forwarding
//! audio frames (closing with `CloseStream`), and a keepalive ticking
//! every 5 seconds. Parsed transcripts flow through a bounded queue to
//! the caller-visible stream; a `None` sentinel marks the end.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use vg_domain::config::SttConfig;
use vg_domain::error::{Error, Result};
use vg_domain::stream::{AudioEncoding, BoxStream, Transcript};

use crate::registry::SttPlugin;
use crate::traits::SttHandler;

const DEEPGRAM_WS_URL: &str = "wss://api.deepgram.com/v1/listen";
const KEEPALIVE_MSG: &str = r#"{"type":"KeepAlive"}"#;
const CLOSE_MSG: &str = r#"{"type":"CloseStream"}"#;
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct DeepgramStt {
    api_key: String,
    model: String,
    language: String,
    interim_results: bool,
    punctuate: bool,
    smart_format: bool,
    endpointing_ms: u32,
}

impl DeepgramStt {
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("Deepgram API key required (set DEEPGRAM_API_KEY)".into()))?;

        Ok(Self {
            api_key,
            model: cfg.model.clone().unwrap_or_else(|| "nova-2".into()),
            language: cfg.language.clone(),
            interim_results: cfg.interim_results,
            punctuate: cfg.punctuate,
            smart_format: cfg.smart_format,
            endpointing_ms: cfg.endpointing_ms,
        })
    }

    fn build_ws_url(&self, sample_rate: u32, encoding: AudioEncoding, language: &str) -> String {
        let encoding = match encoding {
            AudioEncoding::Pcm16 => "linear16",
            AudioEncoding::Pcm8 => "linear8",
        };
        format!(
            "{DEEPGRAM_WS_URL}?model={}&language={}&sample_rate={}&encoding={}&channels=1\
             &interim_results={}&punctuate={}&smart_format={}&endpointing={}&no_delay=true",
            self.model,
            language,
            sample_rate,
            encoding,
            self.interim_results,
            self.punctuate,
            self.smart_format,
            self.endpointing_ms,
        )
    }
}

#[async_trait::async_trait]
impl SttHandler for DeepgramStt {
    async fn stream_transcribe(
        &self,
        audio: BoxStream<'static, Vec<u8>>,
        sample_rate: u32,
        encoding: AudioEncoding,
        language: Option<String>,
    ) -> Result<BoxStream<'static, Result<Transcript>>> {
        let language = language.unwrap_or_else(|| self.language.clone());
        let url = self.build_ws_url(sample_rate, encoding, &language);

        let mut request = url
            .into_client_request()
            .map_err(|e| Error::Stt {
                message: format!("invalid Deepgram URL: {e}"),
                retriable: false,
            })?;
        request.headers_mut().insert(
            "Authorization",
            format!("Token {}", self.api_key)
                .parse()
                .map_err(|_| Error::Stt {
                    message: "API key is not a valid header value".into(),
                    retriable: false,
                })?,
        );

        let connect = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(request),
        )
        .await;
        let (socket, _response) = match connect {
            Err(_) => {
                return Err(Error::Stt {
                    message: "Deepgram connect timed out".into(),
                    retriable: true,
                })
            }
            Ok(Err(e)) => return Err(classify_handshake_error(e)),
            Ok(Ok(pair)) => pair,
        };
        tracing::info!(sample_rate, language = %language, "Deepgram WebSocket connected");

        let (mut ws_sink, mut ws_stream) = socket.split();

        // Writer task: single owner of the sink; sender + keepalive both
        // feed this channel.
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(64);
        let writer: JoinHandle<()> = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if ws_sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Sender task: forward audio frames, then signal end of stream.
        let sender = {
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let mut audio = audio;
                let mut frames: u64 = 0;
                while let Some(frame) = audio.next().await {
                    frames += 1;
                    if outbound_tx.send(WsMessage::Binary(frame)).await.is_err() {
                        return;
                    }
                }
                tracing::debug!(frames, "audio stream ended, closing Deepgram stream");
                let _ = outbound_tx.send(WsMessage::Text(CLOSE_MSG.into())).await;
            })
        };

        // Keepalive task.
        let keepalive = {
            let outbound_tx = outbound_tx.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if outbound_tx
                        .send(WsMessage::Text(KEEPALIVE_MSG.into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };

        // Receiver task: parse transcripts onto the bounded queue.
        let (tx, mut rx) = mpsc::channel::<Option<Result<Transcript>>>(64);
        let receiver = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if let Some(transcript) = parse_results(&text) {
                            if tx.send(Some(Ok(transcript))).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx
                            .send(Some(Err(Error::Stt {
                                message: format!("Deepgram stream error: {e}"),
                                retriable: true,
                            })))
                            .await;
                        break;
                    }
                }
            }
            let _ = tx.send(None).await;
        });

        let guard = TaskGuard(vec![writer, sender, keepalive, receiver]);
        let stream = async_stream::stream! {
            let _guard = guard;
            while let Some(item) = rx.recv().await {
                match item {
                    Some(result) => yield result,
                    None => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Aborts the socket tasks when the caller drops the transcript stream.
struct TaskGuard(Vec<JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

fn classify_handshake_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    let retriable = match &e {
        // Rejected handshake: bad credentials or protocol mismatch.
        WsError::Http(response) => !matches!(response.status().as_u16(), 401 | 403 | 400),
        WsError::Url(_) | WsError::HttpFormat(_) => false,
        _ => true,
    };
    Error::Stt {
        message: format!("Deepgram connect failed: {e}"),
        retriable,
    }
}

/// Extract a transcript from a Deepgram `Results` payload. Non-result
/// payloads (`SpeechStarted`, `UtteranceEnd`, `Metadata`) and empty
/// hypotheses yield `None`.
fn parse_results(text: &str) -> Option<Transcript> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(Value::as_str) != Some("Results") {
        return None;
    }

    let alternative = value
        .get("channel")?
        .get("alternatives")?
        .get(0)?
        .clone();
    let transcript = alternative.get("transcript")?.as_str()?.trim().to_string();
    if transcript.is_empty() {
        return None;
    }

    let is_final = value
        .get("is_final")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let confidence = alternative
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c as f32)
        .filter(|_| is_final);

    Some(Transcript {
        text: transcript,
        is_final,
        confidence,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeepgramPlugin;

impl SttPlugin for DeepgramPlugin {
    fn name(&self) -> &str {
        "deepgram-stt"
    }

    fn provider(&self) -> &str {
        "deepgram"
    }

    fn required_env_vars(&self) -> &[&str] {
        &["DEEPGRAM_API_KEY"]
    }

    fn validate(&self, config: &SttConfig) -> Result<()> {
        if config.api_key.is_none() {
            return Err(Error::Config(
                "Deepgram API key required (set DEEPGRAM_API_KEY)".into(),
            ));
        }
        Ok(())
    }

    fn create_handler(&self, config: &SttConfig) -> Result<Arc<dyn SttHandler>> {
        Ok(Arc::new(DeepgramStt::from_config(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> DeepgramStt {
        let config = SttConfig {
            api_key: Some("dg_key".into()),
            ..Default::default()
        };
        DeepgramStt::from_config(&config).unwrap()
    }

    #[test]
    fn ws_url_carries_stream_parameters() {
        let url = handler().build_ws_url(16000, AudioEncoding::Pcm16, "en-US");
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("endpointing=300"));
    }

    #[test]
    fn results_payload_parses_interim_and_final() {
        let interim = r#"{"type":"Results","is_final":false,
            "channel":{"alternatives":[{"transcript":"hel","confidence":0.4}]}}"#;
        let parsed = parse_results(interim).unwrap();
        assert_eq!(parsed.text, "hel");
        assert!(!parsed.is_final);
        assert_eq!(parsed.confidence, None);

        let final_ = r#"{"type":"Results","is_final":true,
            "channel":{"alternatives":[{"transcript":"hello","confidence":0.97}]}}"#;
        let parsed = parse_results(final_).unwrap();
        assert_eq!(parsed.text, "hello");
        assert!(parsed.is_final);
        assert!((parsed.confidence.unwrap() - 0.97).abs() < 1e-6);
    }

    #[test]
    fn empty_and_non_result_payloads_are_skipped() {
        assert!(parse_results(r#"{"type":"SpeechStarted"}"#).is_none());
        assert!(parse_results(r#"{"type":"Metadata","duration":1.0}"#).is_none());
        let empty = r#"{"type":"Results","is_final":false,
            "channel":{"alternatives":[{"transcript":"  "}]}}"#;
        assert!(parse_results(empty).is_none());
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let config = SttConfig::default();
        assert!(DeepgramStt::from_config(&config).is_err());
        assert!(DeepgramPlugin.validate(&config).is_err());
    }
}
