use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum ConcatError {
    #[error("no input files to concatenate")]
    NoInputs,

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("concatenation exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("path cannot be passed to the ffmpeg concat protocol: {0}")]
    UnsupportedPath(PathBuf),

    #[error("concatenation I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Joins audio files, in the given order, into one output file.
#[async_trait]
pub trait AudioConcatenator: Send + Sync {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError>;
}

/// Stream-copies the inputs through ffmpeg's concat protocol; no re-encoding.
#[derive(Debug, Clone)]
pub struct FfmpegConcatenator {
    ffmpeg_path: PathBuf,
}

impl FfmpegConcatenator {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }
}

/// The concat protocol splits its source on `|`.
pub fn is_concat_safe(path: &Path) -> bool {
    !path.as_os_str().to_string_lossy().contains('|')
}

/// Command line for `ffmpeg -i concat:a|b|c -c copy -f mp3 <output>`
pub fn ffmpeg_concat_args(inputs: &[PathBuf], output: &Path) -> Vec<OsString> {
    let mut source = OsString::from("concat:");
    for (i, input) in inputs.iter().enumerate() {
        if i > 0 {
            source.push("|");
        }
        source.push(input.as_os_str());
    }

    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
        .iter()
        .map(|arg| OsString::from(*arg))
        .collect();
    args.push(source);
    args.extend(["-c", "copy", "-f", "mp3"].iter().map(|arg| OsString::from(*arg)));
    args.push(output.as_os_str().to_os_string());
    args
}

#[async_trait]
impl AudioConcatenator for FfmpegConcatenator {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::NoInputs);
        }
        if let Some(bad) = inputs.iter().find(|p| !is_concat_safe(p)) {
            return Err(ConcatError::UnsupportedPath(bad.clone()));
        }

        let result = tokio::process::Command::new(&self.ffmpeg_path)
            .args(ffmpeg_concat_args(inputs, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ConcatError::Spawn {
                program: self.ffmpeg_path.display().to_string(),
                source,
            })?;

        if !result.status.success() {
            return Err(ConcatError::Failed {
                status: result.status,
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        tracing::debug!("ffmpeg merged {} files into {}", inputs.len(), output.display());
        Ok(())
    }
}

/// In-process backend: MPEG audio frames are self-delimiting, so the streams
/// are appended as-is. Only the first input keeps its leading ID3v2 tag and
/// only the last keeps a trailing ID3v1 tag. Xing/Info frames are dropped
/// from every input since they describe a single clip's length. VBRI headers
/// are not recognised and pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendConcatenator;

/// Byte length of a leading ID3v2 tag, header and optional footer included.
pub fn id3v2_tag_len(data: &[u8]) -> usize {
    if data.len() < 10 || &data[..3] != b"ID3" {
        return 0;
    }
    let size_bytes = &data[6..10];
    // Synchsafe integer: 7 bits per byte, high bit always clear.
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return 0;
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b as usize));
    let footer = if data[5] & 0x10 != 0 { 10 } else { 0 };
    (10 + size + footer).min(data.len())
}

/// 128-byte ID3v1 block at the end of the stream, if any.
pub fn id3v1_tag_len(data: &[u8]) -> usize {
    if data.len() >= 128 && &data[data.len() - 128..data.len() - 125] == b"TAG" {
        128
    } else {
        0
    }
}

// Layer III bitrates in kbps, by bitrate index
const MPEG1_L3_KBPS: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const MPEG2_L3_KBPS: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Length of a Xing/Info frame at the start of `data`, or 0.
pub fn xing_frame_len(data: &[u8]) -> usize {
    if data.len() < 4 || data[0] != 0xFF || data[1] & 0xE0 != 0xE0 {
        return 0;
    }
    let version = (data[1] >> 3) & 0b11; // 3 = MPEG1, 2 = MPEG2, 0 = MPEG2.5
    let layer = (data[1] >> 1) & 0b11; // 1 = Layer III
    let bitrate_index = (data[2] >> 4) as usize;
    let rate_index = ((data[2] >> 2) & 0b11) as usize;
    if version == 1 || layer != 1 || bitrate_index == 0 || bitrate_index == 15 || rate_index == 3 {
        return 0;
    }

    let mpeg1 = version == 3;
    let base_rate = [44_100u32, 48_000, 32_000][rate_index];
    let sample_rate = match version {
        3 => base_rate,
        2 => base_rate / 2,
        _ => base_rate / 4,
    };
    let kbps = if mpeg1 { MPEG1_L3_KBPS } else { MPEG2_L3_KBPS }[bitrate_index];
    let padding = ((data[2] >> 1) & 1) as u32;
    let coefficient = if mpeg1 { 144 } else { 72 };
    let frame_len = (coefficient * kbps * 1000 / sample_rate + padding) as usize;

    let mono = data[3] >> 6 == 0b11;
    let side_info = match (mpeg1, mono) {
        (true, false) => 32,
        (true, true) => 17,
        (false, false) => 17,
        (false, true) => 9,
    };
    let tag_at = 4 + side_info;
    match data.get(tag_at..tag_at + 4) {
        Some(b"Xing") | Some(b"Info") if frame_len <= data.len() => frame_len,
        _ => 0,
    }
}

#[async_trait]
impl AudioConcatenator for AppendConcatenator {
    async fn concatenate(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ConcatError> {
        if inputs.is_empty() {
            return Err(ConcatError::NoInputs);
        }

        let mut out = tokio::fs::File::create(output).await?;
        let last = inputs.len() - 1;
        for (i, input) in inputs.iter().enumerate() {
            let data = tokio::fs::read(input).await?;
            let tag = id3v2_tag_len(&data);
            if i == 0 {
                out.write_all(&data[..tag]).await?;
            }
            let start = tag + xing_frame_len(&data[tag..]);
            let end = if i == last {
                data.len()
            } else {
                data.len() - id3v1_tag_len(&data[start..])
            };
            out.write_all(&data[start..end]).await?;
        }
        out.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id3_tag(body_len: u8) -> Vec<u8> {
        let mut tag = b"ID3\x04\x00\x00\x00\x00\x00".to_vec();
        tag.push(body_len);
        tag.extend(std::iter::repeat(0u8).take(body_len as usize));
        tag
    }

    /// MPEG1 Layer III, 128 kbps, 44.1 kHz, stereo: 417-byte frames.
    fn mp3_frame(tag: &[u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        frame[36..40].copy_from_slice(tag);
        frame
    }

    fn id3v1_tag() -> Vec<u8> {
        let mut tag = b"TAG".to_vec();
        tag.resize(128, b' ');
        tag
    }

    #[test]
    fn test_xing_frame_len() {
        assert_eq!(xing_frame_len(&mp3_frame(b"Xing")), 417);
        assert_eq!(xing_frame_len(&mp3_frame(b"Info")), 417);
        assert_eq!(xing_frame_len(&mp3_frame(b"\0\0\0\0")), 0);
        assert_eq!(xing_frame_len(b"AAAA"), 0);
        // Truncated frame is left alone
        assert_eq!(xing_frame_len(&mp3_frame(b"Info")[..100]), 0);
    }

    #[test]
    fn test_id3v1_tag_len() {
        let mut data = b"audio".to_vec();
        assert_eq!(id3v1_tag_len(&data), 0);
        data.extend(id3v1_tag());
        assert_eq!(id3v1_tag_len(&data), 128);
    }

    #[tokio::test]
    async fn test_append_drops_per_clip_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let audio = mp3_frame(b"\0\0\0\0");

        let mut a = id3_tag(2);
        a.extend(mp3_frame(b"Info"));
        a.extend(&audio);
        a.extend(id3v1_tag());
        let mut b = mp3_frame(b"Xing");
        b.extend(&audio);
        b.extend(id3v1_tag());

        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.mp3");
        std::fs::write(&first, &a).unwrap();
        std::fs::write(&second, &b).unwrap();

        let output = dir.path().join("out.mp3");
        AppendConcatenator.concatenate(&[first, second], &output).await.unwrap();

        let mut expected = id3_tag(2);
        expected.extend(&audio);
        expected.extend(&audio);
        expected.extend(id3v1_tag());
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_ffmpeg_rejects_pipe_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a|b.mp3");
        std::fs::write(&input, b"audio").unwrap();

        let ffmpeg = FfmpegConcatenator::new(dir.path().join("no-such-ffmpeg"));
        let result = ffmpeg.concatenate(&[input], &dir.path().join("out.mp3")).await;
        assert!(matches!(result, Err(ConcatError::UnsupportedPath(_))));
        assert!(!is_concat_safe(Path::new("/tmp/a|b")));
        assert!(is_concat_safe(Path::new("/tmp/ab")));
    }

    #[test]
    fn test_ffmpeg_args_keep_input_order() {
        let inputs = vec![PathBuf::from("/tmp/a_0000.mp3"), PathBuf::from("/tmp/a_0001.mp3")];
        let args = ffmpeg_concat_args(&inputs, Path::new("/tmp/out.mp3"));

        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"concat:/tmp/a_0000.mp3|/tmp/a_0001.mp3".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp3");
        let copy = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[copy + 1], "copy");
    }

    #[test]
    fn test_id3v2_tag_len() {
        assert_eq!(id3v2_tag_len(b"\xff\xfb\x90\x00"), 0);
        assert_eq!(id3v2_tag_len(&id3_tag(5)), 15);

        let mut with_audio = id3_tag(3);
        with_audio.extend_from_slice(b"\xff\xfb");
        assert_eq!(id3v2_tag_len(&with_audio), 13);

        // Size byte with high bit set is not a valid tag
        let mut bogus = id3_tag(0);
        bogus[9] = 0x80;
        assert_eq!(id3v2_tag_len(&bogus), 0);
    }

    #[tokio::test]
    async fn test_append_concatenator_strips_later_tags() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.mp3");
        let second = dir.path().join("b.mp3");

        let mut a = id3_tag(2);
        a.extend_from_slice(b"AAAA");
        let mut b = id3_tag(4);
        b.extend_from_slice(b"BBBB");
        std::fs::write(&first, &a).unwrap();
        std::fs::write(&second, &b).unwrap();

        let output = dir.path().join("out.mp3");
        AppendConcatenator
            .concatenate(&[first, second], &output)
            .await
            .unwrap();

        let mut expected = a.clone();
        expected.extend_from_slice(b"BBBB");
        assert_eq!(std::fs::read(&output).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp3");
        let result = AppendConcatenator.concatenate(&[], &output).await;
        assert!(matches!(result, Err(ConcatError::NoInputs)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.mp3");
        std::fs::write(&input, b"audio").unwrap();

        let ffmpeg = FfmpegConcatenator::new(dir.path().join("no-such-ffmpeg"));
        let result = ffmpeg.concatenate(&[input], &dir.path().join("out.mp3")).await;
        assert!(matches!(result, Err(ConcatError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_failure_reports_stderr() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\necho 'Invalid data found' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("a.mp3");
        std::fs::write(&input, b"audio").unwrap();

        let ffmpeg = FfmpegConcatenator::new(&script);
        match ffmpeg.concatenate(&[input], &dir.path().join("out.mp3")).await {
            Err(ConcatError::Failed { status, stderr }) => {
                assert_eq!(status.code(), Some(1));
                assert!(stderr.contains("Invalid data"));
            }
            other => panic!("expected ffmpeg failure, got {other:?}"),
        }
    }
}
