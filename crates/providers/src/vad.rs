//! Voice activity detection.
//!
//! The frame processor slices PCM16 audio into fixed inference windows
//! (256 samples @ 8 kHz, 512 @ 16 kHz), carries a small context tail
//! across windows, and derives `StartOfSpeech` / `EndOfSpeech` /
//! `Continuing` events from per-window speech probabilities. Inference
//! runs behind [`VadInference`]; the production implementation is the
//! Silero v5 model through ONNX Runtime.

use serde::Serialize;

use vg_domain::config::VadConfig;
use vg_domain::error::{Error, Result};

use crate::registry::VadPlugin;
use crate::traits::Vad;

pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [8000, 16000];

/// Inference window in samples (32 ms at either rate).
pub fn window_size_for(sample_rate: u32) -> usize {
    match sample_rate {
        8000 => 256,
        _ => 512,
    }
}

/// Context samples carried from the previous window.
pub fn context_size_for(sample_rate: u32) -> usize {
    match sample_rate {
        8000 => 32,
        _ => 64,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VadEvent {
    StartOfSpeech,
    EndOfSpeech,
    Continuing,
}

/// Outcome of one inference window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VadFrameResult {
    pub probability: f32,
    pub is_speech: bool,
    pub is_speaking: bool,
    pub event: VadEvent,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PCM helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Little-endian PCM16 bytes to samples. A trailing odd byte is dropped.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Normalize i16 samples to f32 in [-1.0, 1.0].
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inference seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs the recurrent VAD model on one context-prefixed window and
/// returns the speech probability.
pub trait VadInference: std::fmt::Debug + Send {
    fn process(&mut self, input: &[f32]) -> Result<f32>;
    fn reset(&mut self);
}

/// Silero VAD v5 over ONNX Runtime. The hidden state tensor `[2,1,128]`
/// persists across calls and is zeroed on reset.
#[derive(Debug)]
pub struct SileroInference {
    session: ort::session::Session,
    state: Vec<f32>,
    sample_rate: i64,
}

impl SileroInference {
    pub fn new(model_path: &str, sample_rate: u32) -> Result<Self> {
        let session = ort::session::Session::builder()
            .and_then(|b| b.with_intra_threads(1))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|e| Error::AudioProcessing {
                message: format!("failed to load VAD model from {model_path}: {e}"),
                retriable: false,
            })?;

        Ok(Self {
            session,
            state: vec![0.0; 2 * 128],
            sample_rate: sample_rate as i64,
        })
    }
}

impl VadInference for SileroInference {
    fn process(&mut self, input: &[f32]) -> Result<f32> {
        use ort::value::Value;

        let mut run = || -> std::result::Result<(f32, Vec<f32>), ort::Error> {
            let audio = Value::from_array(([1usize, input.len()], input.to_vec()))?;
            let state = Value::from_array(([2usize, 1usize, 128usize], self.state.clone()))?;
            let sr = Value::from_array(([1usize], vec![self.sample_rate]))?;

            let outputs = self.session.run(ort::inputs![audio, state, sr])?;

            let (_shape, probs) = outputs[0].try_extract_tensor::<f32>()?;
            let probability = probs.first().copied().unwrap_or(0.0);

            let (_shape, new_state) = outputs[1].try_extract_tensor::<f32>()?;
            Ok((probability, new_state.to_vec()))
        };

        let (probability, new_state) = run().map_err(|e| Error::AudioProcessing {
            message: format!("VAD inference failed: {e}"),
            retriable: true,
        })?;
        if new_state.len() == self.state.len() {
            self.state.copy_from_slice(&new_state);
        }
        Ok(probability)
    }

    fn reset(&mut self) {
        self.state.fill(0.0);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame processor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct VadProcessor {
    inference: Box<dyn VadInference>,
    sample_rate: u32,
    window_size: usize,
    context_size: usize,
    /// Tail of the previous inference input, prepended to the next window.
    context: Vec<f32>,
    threshold: f32,
    speaking: bool,
}

impl VadProcessor {
    pub fn new(inference: Box<dyn VadInference>, sample_rate: u32, threshold: f32) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(Error::AudioProcessing {
                message: format!(
                    "VAD supports sample rates {SUPPORTED_SAMPLE_RATES:?}, got {sample_rate}"
                ),
                retriable: false,
            });
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Config(
                "VAD activation threshold must be between 0.0 and 1.0".into(),
            ));
        }

        let context_size = context_size_for(sample_rate);
        Ok(Self {
            inference,
            sample_rate,
            window_size: window_size_for(sample_rate),
            context_size,
            context: vec![0.0; context_size],
            threshold,
            speaking: false,
        })
    }
}

impl Vad for VadProcessor {
    fn window_size_samples(&self) -> usize {
        self.window_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process_frame(&mut self, frame: &[i16]) -> Result<VadFrameResult> {
        if frame.len() != self.window_size {
            return Err(Error::AudioProcessing {
                message: format!(
                    "audio frame must be exactly {} samples at {} Hz, got {}",
                    self.window_size,
                    self.sample_rate,
                    frame.len()
                ),
                retriable: true,
            });
        }

        let mut input = Vec::with_capacity(self.context_size + self.window_size);
        input.extend_from_slice(&self.context);
        input.extend(frame.iter().map(|&s| s as f32 / 32768.0));

        let probability = self.inference.process(&input)?;
        self.context
            .copy_from_slice(&input[input.len() - self.context_size..]);

        let is_speech = probability >= self.threshold;
        let event = if is_speech && !self.speaking {
            self.speaking = true;
            VadEvent::StartOfSpeech
        } else if !is_speech && self.speaking {
            self.speaking = false;
            VadEvent::EndOfSpeech
        } else {
            VadEvent::Continuing
        };

        Ok(VadFrameResult {
            probability,
            is_speech,
            is_speaking: self.speaking,
            event,
        })
    }

    fn process_chunk(&mut self, chunk: &[u8]) -> Result<VadFrameResult> {
        if chunk.len() < 2 {
            return Ok(VadFrameResult {
                probability: 0.0,
                is_speech: false,
                is_speaking: self.speaking,
                event: VadEvent::Continuing,
            });
        }

        let samples = bytes_to_i16(chunk);
        if samples.len() >= self.window_size {
            let tail = &samples[samples.len() - self.window_size..];
            self.process_frame(tail)
        } else {
            let mut frame = vec![0i16; self.window_size];
            frame[..samples.len()].copy_from_slice(&samples);
            self.process_frame(&frame)
        }
    }

    fn reset(&mut self) {
        self.speaking = false;
        self.context.fill(0.0);
        self.inference.reset();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SileroPlugin;

impl VadPlugin for SileroPlugin {
    fn name(&self) -> &str {
        "silero-vad"
    }

    fn provider(&self) -> &str {
        "silero"
    }

    fn required_env_vars(&self) -> &[&str] {
        &["VG_VAD_MODEL_PATH"]
    }

    fn validate(&self, config: &VadConfig) -> Result<()> {
        if !SUPPORTED_SAMPLE_RATES.contains(&config.sample_rate) {
            return Err(Error::Config(format!(
                "Silero VAD supports sample rates {SUPPORTED_SAMPLE_RATES:?}, got {}",
                config.sample_rate
            )));
        }
        if !(0.0..=1.0).contains(&config.activation_threshold) {
            return Err(Error::Config(
                "vad.activation_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if config.model_path.is_none() {
            return Err(Error::Config(
                "VAD model path required (set VG_VAD_MODEL_PATH)".into(),
            ));
        }
        Ok(())
    }

    fn create_handler(&self, config: &VadConfig) -> Result<Box<dyn Vad>> {
        let model_path = config
            .model_path
            .as_deref()
            .ok_or_else(|| Error::Config("VAD model path required".into()))?;
        let inference = SileroInference::new(model_path, config.sample_rate)?;
        Ok(Box::new(VadProcessor::new(
            Box::new(inference),
            config.sample_rate,
            config.activation_threshold,
        )?))
    }
}
