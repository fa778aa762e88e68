// Configuration for the server, read once at startup

use std::path::PathBuf;
use std::time::Duration;

use tts_core::ElevenLabsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatBackend {
    /// Shell out to ffmpeg
    Ffmpeg,
    /// Append MPEG streams in-process
    Append,
}

impl ConcatBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Some(Self::Ffmpeg),
            "append" => Some(Self::Append),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub temp_dir: PathBuf,
    pub concat_backend: ConcatBackend,
    pub ffmpeg_path: PathBuf,
    pub synthesis_concurrency: usize,
    pub elevenlabs: ElevenLabsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 60,
            request_timeout_secs: 120,
            max_body_bytes: 1024 * 1024,
            cors_allowed_origins: None,
            temp_dir: std::env::temp_dir(),
            concat_backend: ConcatBackend::Ffmpeg,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            synthesis_concurrency: 0,
            elevenlabs: ElevenLabsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let rate_limit_per_minute = std::env::var("RATE_LIMIT_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0)
            .unwrap_or(defaults.rate_limit_per_minute);

        let request_timeout_secs = std::env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.request_timeout_secs);

        let max_body_bytes = std::env::var("MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_body_bytes);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect()
            });

        let temp_dir = std::env::var("TEMP_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.temp_dir);

        let concat_backend = std::env::var("CONCAT_BACKEND")
            .ok()
            .and_then(|v| ConcatBackend::parse(&v))
            .unwrap_or(defaults.concat_backend);

        let ffmpeg_path = std::env::var("FFMPEG_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.ffmpeg_path);

        let synthesis_concurrency = std::env::var("SYNTHESIS_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.synthesis_concurrency);

        Self {
            port,
            rate_limit_per_minute,
            request_timeout_secs,
            max_body_bytes,
            cors_allowed_origins,
            temp_dir,
            concat_backend,
            ffmpeg_path,
            synthesis_concurrency,
            elevenlabs: ElevenLabsConfig::from_env(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
