//! End-of-utterance detection.
//!
//! A truncated classifier over the recent conversation: the last few
//! turns are rendered with the model's chat template, tokenized with a
//! left-truncated 128-token window, and scored by an ONNX model whose
//! last logit is the probability that the user's utterance is complete.
//!
//! Prediction never fails: every error path logs and returns 0.0.

use std::sync::Arc;

use parking_lot::Mutex;

use vg_domain::config::TurnDetectorConfig;
use vg_domain::error::{Error, Result};
use vg_domain::message::ChatTurn;

use crate::registry::TurnDetectorPlugin;
use crate::traits::TurnDetector;

/// Token budget for the classifier input; older turns truncate from the head.
pub const MAX_HISTORY_TOKENS: usize = 128;
/// Turns considered from the end of the conversation.
pub const MAX_HISTORY_TURNS: usize = 6;

const IM_END: &str = "<|im_end|>";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub trait EouTokenizer: std::fmt::Debug + Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<i64>>;
}

pub trait EouInference: std::fmt::Debug + Send + Sync {
    fn predict(&self, input_ids: &[i64]) -> Result<f32>;
}

/// HuggingFace tokenizer loaded from a `tokenizer.json` file.
#[derive(Debug)]
pub struct HfTokenizer(tokenizers::Tokenizer);

impl HfTokenizer {
    pub fn from_file(path: &str) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|e| {
            Error::Config(format!("failed to load turn-detector tokenizer from {path}: {e}"))
        })?;
        Ok(Self(tokenizer))
    }
}

impl EouTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>> {
        let encoding = self
            .0
            .encode(text, false)
            .map_err(|e| Error::Internal(format!("tokenization failed: {e}")))?;
        Ok(encoding.get_ids().iter().map(|&id| id as i64).collect())
    }
}

/// ONNX classifier session. `ort` sessions require exclusive access to
/// run, so the session sits behind a mutex; predictions are short.
#[derive(Debug)]
pub struct OnnxEouInference {
    session: Mutex<ort::session::Session>,
}

impl OnnxEouInference {
    pub fn from_file(model_path: &str) -> Result<Self> {
        let session = ort::session::Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| {
                Error::Config(format!(
                    "failed to load turn-detector model from {model_path}: {e}"
                ))
            })?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl EouInference for OnnxEouInference {
    fn predict(&self, input_ids: &[i64]) -> Result<f32> {
        use ort::value::Value;

        let mut session = self.session.lock();
        let mut run = || -> std::result::Result<f32, ort::Error> {
            let input = Value::from_array(([1usize, input_ids.len()], input_ids.to_vec()))?;
            let outputs = session.run(ort::inputs![input])?;
            let (_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;
            Ok(logits.last().copied().unwrap_or(0.0))
        };
        run().map_err(|e| Error::Internal(format!("turn-detector inference failed: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct MultilingualTurnDetector {
    tokenizer: Box<dyn EouTokenizer>,
    inference: Box<dyn EouInference>,
    threshold: f32,
}

impl MultilingualTurnDetector {
    pub fn new(
        tokenizer: Box<dyn EouTokenizer>,
        inference: Box<dyn EouInference>,
        threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(
                "turn_detector.threshold must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(Self {
            tokenizer,
            inference,
            threshold,
        })
    }
}

/// Render the chat context for the classifier: adjacent same-role turns
/// merge with a single space, empty turns are skipped, and the end token
/// of the final (in-progress) utterance is removed.
pub fn format_chat_context(turns: &[ChatTurn]) -> String {
    let mut merged: Vec<ChatTurn> = Vec::new();
    for turn in turns {
        if turn.content.trim().is_empty() {
            continue;
        }
        match merged.last_mut() {
            Some(last) if last.role == turn.role => {
                last.content.push(' ');
                last.content.push_str(&turn.content);
            }
            _ => merged.push(turn.clone()),
        }
    }

    let mut text = String::new();
    for turn in &merged {
        text.push_str(&format!(
            "<|im_start|>{}\n{}{IM_END}\n",
            turn.role, turn.content
        ));
    }

    match text.rfind(IM_END) {
        Some(ix) => text[..ix].to_string(),
        None => text,
    }
}

/// Keep the newest `max` token ids, truncating from the head.
fn truncate_left(ids: Vec<i64>, max: usize) -> Vec<i64> {
    if ids.len() <= max {
        ids
    } else {
        ids[ids.len() - max..].to_vec()
    }
}

impl TurnDetector for MultilingualTurnDetector {
    fn predict_end_of_turn(&self, history: &[ChatTurn]) -> f32 {
        if history.is_empty() {
            return 0.0;
        }

        let start = history.len().saturating_sub(MAX_HISTORY_TURNS);
        let text = format_chat_context(&history[start..]);
        if text.trim().is_empty() {
            return 0.0;
        }

        let ids = match self.tokenizer.encode(&text) {
            Ok(ids) => truncate_left(ids, MAX_HISTORY_TOKENS),
            Err(e) => {
                tracing::warn!(error = %e, "turn-detector tokenization failed");
                return 0.0;
            }
        };
        if ids.is_empty() {
            return 0.0;
        }

        match self.inference.predict(&ids) {
            Ok(probability) => probability,
            Err(e) => {
                tracing::warn!(error = %e, "turn-detector inference failed");
                0.0
            }
        }
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MultilingualPlugin;

impl TurnDetectorPlugin for MultilingualPlugin {
    fn name(&self) -> &str {
        "multilingual-turn-detector"
    }

    fn provider(&self) -> &str {
        "multilingual"
    }

    fn required_env_vars(&self) -> &[&str] {
        &[
            "VG_TURN_DETECTOR_MODEL_PATH",
            "VG_TURN_DETECTOR_TOKENIZER_PATH",
        ]
    }

    fn validate(&self, config: &TurnDetectorConfig) -> Result<()> {
        if !(0.0..=1.0).contains(&config.threshold) {
            return Err(Error::Config(
                "turn_detector.threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if config.model_path.is_none() {
            return Err(Error::Config(
                "turn-detector model path required (set VG_TURN_DETECTOR_MODEL_PATH)".into(),
            ));
        }
        if config.tokenizer_path.is_none() {
            return Err(Error::Config(
                "turn-detector tokenizer path required (set VG_TURN_DETECTOR_TOKENIZER_PATH)"
                    .into(),
            ));
        }
        Ok(())
    }

    fn create_handler(&self, config: &TurnDetectorConfig) -> Result<Arc<dyn TurnDetector>> {
        let model_path = config.model_path.as_deref().unwrap_or_default();
        let tokenizer_path = config.tokenizer_path.as_deref().unwrap_or_default();
        let detector = MultilingualTurnDetector::new(
            Box::new(HfTokenizer::from_file(tokenizer_path)?),
            Box::new(OnnxEouInference::from_file(model_path)?),
            config.threshold,
        )?;
        Ok(Arc::new(detector))
    }
}
