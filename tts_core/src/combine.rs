use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::{stream, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::concat::{AudioConcatenator, ConcatError};
use crate::elevenlabs::{SpeechSynthesizer, SynthesisError};
use crate::staging::{MergedFile, StagedFiles};

#[derive(Debug, Error)]
pub enum CombineError {
    #[error("synthesis failed for line {index}: {source}")]
    Synthesis {
        index: usize,
        #[source]
        source: SynthesisError,
    },

    #[error("failed to stage audio: {0}")]
    Staging(#[source] std::io::Error),

    #[error(transparent)]
    Concat(#[from] ConcatError),
}

/// Synthesizes lines, stages the clips and merges them into one file.
#[derive(Clone)]
pub struct AudioCombiner {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    concatenator: Arc<dyn AudioConcatenator>,
    temp_dir: PathBuf,
    // 0 = every line in flight at once
    concurrency: usize,
}

impl AudioCombiner {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        concatenator: Arc<dyn AudioConcatenator>,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            synthesizer,
            concatenator,
            temp_dir: temp_dir.into(),
            concurrency: 0,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// One synthesis call per line. Results come back in input order no
    /// matter which call finishes first; the first failure drops the calls
    /// still in flight.
    pub async fn synthesize_all(&self, lines: &[String]) -> Result<Vec<Vec<u8>>, CombineError> {
        let limit = if self.concurrency == 0 {
            lines.len().max(1)
        } else {
            self.concurrency
        };

        // Futures are built up front so the stream holds no borrowing closure.
        let calls: Vec<_> = lines
            .iter()
            .enumerate()
            .map(|(index, line)| async move {
                self.synthesizer
                    .synthesize(line)
                    .await
                    .map_err(|source| CombineError::Synthesis { index, source })
            })
            .collect();

        stream::iter(calls).buffered(limit).try_collect().await
    }

    /// Run the whole pipeline. Staged clips are gone by the time this
    /// returns; the merged file is removed when the returned guard drops.
    pub async fn combine(&self, lines: &[String]) -> Result<MergedFile, CombineError> {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let started = Instant::now();

        let buffers = self.synthesize_all(lines).await?;
        let total_bytes: usize = buffers.iter().map(Vec::len).sum();
        tracing::info!(
            "Synthesized {} lines ({} bytes) in {:.2}s",
            lines.len(),
            total_bytes,
            started.elapsed().as_secs_f64()
        );

        let staged = StagedFiles::write(&self.temp_dir, &token, &buffers)
            .await
            .map_err(CombineError::Staging)?;
        drop(buffers);

        let merged = MergedFile::reserve(&self.temp_dir, &token);
        self.concatenator
            .concatenate(staged.paths(), merged.path())
            .await?;
        drop(staged);

        tracing::debug!("Merged audio written to {}", merged.path().display());
        Ok(merged)
    }
}
