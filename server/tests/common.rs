//! Common utilities for integration tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use server::AppState;
use tts_core::elevenlabs::StatusCode;
use tts_core::{
    AppendConcatenator, AudioCombiner, AudioConcatenator, ConcatError, SpeechSynthesizer,
    SynthesisError,
};

/// Fake synthesizer: the "audio" for a line is `<line>`. Shorter lines
/// take longer, so calls finish out of order.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Option<String>,
}

impl FakeSynthesizer {
    pub fn failing_on(text: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on: Some(text.to_string()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        self.calls.lock().unwrap().push(text.to_string());
        let delay = 30u64.saturating_sub(text.len() as u64 * 3);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if self.fail_on.as_deref() == Some(text) {
            return Err(SynthesisError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: "invalid api key".to_string(),
            });
        }
        Ok(format!("<{text}>").into_bytes())
    }
}

/// Synthesizer that takes `delay` for every line
pub struct SlowSynthesizer {
    pub delay: Duration,
}

#[async_trait]
impl SpeechSynthesizer for SlowSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("<{text}>").into_bytes())
    }
}

/// Writes half an output file, then fails like a crashed ffmpeg.
pub struct BrokenConcatenator;

#[async_trait]
impl AudioConcatenator for BrokenConcatenator {
    async fn concatenate(&self, _inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        tokio::fs::write(output, b"partial").await?;
        Err(ConcatError::Io(std::io::Error::other(
            "Invalid data found when processing input",
        )))
    }
}

/// Router backed by `synthesizer` and the in-process concatenator, staging
/// files under `temp_dir`.
pub fn create_test_app(synthesizer: Arc<dyn SpeechSynthesizer>, temp_dir: &Path) -> Router {
    let combiner = AudioCombiner::new(synthesizer, Arc::new(AppendConcatenator), temp_dir);
    server::router(AppState::new(combiner))
}

/// Number of entries left in `dir`
pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
