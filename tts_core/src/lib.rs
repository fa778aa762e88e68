//! Speech synthesis and audio merging for the combine-audio service.
//!
//! Lines of text are turned into MP3 clips by a [`SpeechSynthesizer`]
//! (ElevenLabs in production), staged as transient files and joined by an
//! [`AudioConcatenator`]. [`AudioCombiner`] runs the whole pipeline and hands
//! back a [`MergedFile`] guard that deletes the output when dropped.

pub mod combine;
pub mod concat;
pub mod elevenlabs;
pub mod staging;

pub use combine::{AudioCombiner, CombineError};
pub use concat::{AppendConcatenator, AudioConcatenator, ConcatError, FfmpegConcatenator};
pub use elevenlabs::{ElevenLabsClient, ElevenLabsConfig, SpeechSynthesizer, SynthesisError};
pub use staging::{MergedFile, StagedFiles};
