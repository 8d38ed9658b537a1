use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::PipelineError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Time-free playlist endpoint of the reference deployment.
pub const DEFAULT_PLAYLIST_URL: &str = "https://tf-f-rpaa-radiko.smartstream.ne.jp/tf/playlist.m3u8";

// --- HTTP Configuration ---
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Overall timeout for a single request (zero disables it)
    pub timeout: Duration,
    /// Time to establish the initial connection
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Headers sent with every request
    pub headers: HeaderMap,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HttpConfig::get_default_headers(),
        }
    }
}

impl HttpConfig {
    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("*/*"),
        );
        default_headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        default_headers
    }

    /// Build the shared client used by every component of a run.
    pub fn build_client(&self) -> Result<reqwest::Client, PipelineError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(self.headers.clone())
            .connect_timeout(self.connect_timeout);
        if !self.timeout.is_zero() {
            builder = builder.timeout(self.timeout);
        }
        builder
            .build()
            .map_err(|e| PipelineError::invalid_request(format!("failed to build HTTP client: {e}")))
    }
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct PlaylistConfig {
    /// Authenticated time-free playlist endpoint
    pub playlist_url: String,
    /// Distance the seek cursor advances per probe
    pub seek_step: Duration,
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            playlist_url: DEFAULT_PLAYLIST_URL.to_owned(),
            seek_step: Duration::from_secs(300),
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Total attempts per segment, key or artwork download
    pub max_attempts: u32,
    /// Fixed pause between two attempts
    pub retry_delay: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

// --- Pool Configuration ---
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrent segment workers
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 3 }
    }
}

// --- Decryption Configuration ---
#[derive(Debug, Clone)]
pub struct DecryptionConfig {
    /// Run AES on the blocking thread pool instead of the async worker
    pub offload_to_blocking_pool: bool,
}

impl Default for DecryptionConfig {
    fn default() -> Self {
        Self {
            offload_to_blocking_pool: true,
        }
    }
}

// --- Encoder Configuration ---
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub ffmpeg_path: PathBuf,
    /// Container extension of the muxed file
    pub output_extension: String,
    /// Lines of encoder stderr kept in failure reports
    pub stderr_tail_lines: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: std::env::var_os("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            output_extension: "m4a".to_owned(),
            stderr_tail_lines: 40,
        }
    }
}

// --- Top-Level Configuration ---
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub http: HttpConfig,
    pub playlist: PlaylistConfig,
    pub fetcher: FetcherConfig,
    pub pool: PoolConfig,
    pub decryption: DecryptionConfig,
    pub encoder: EncoderConfig,
    /// Parent directory of per-run workspaces
    pub workspace_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            playlist: PlaylistConfig::default(),
            fetcher: FetcherConfig::default(),
            pool: PoolConfig::default(),
            decryption: DecryptionConfig::default(),
            encoder: EncoderConfig::default(),
            workspace_root: std::env::temp_dir(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.playlist.seek_step.is_zero() {
            return Err(PipelineError::invalid_request("seek step must be positive"));
        }
        if self.fetcher.max_attempts == 0 {
            return Err(PipelineError::invalid_request(
                "at least one fetch attempt is required",
            ));
        }
        if self.pool.workers == 0 {
            return Err(PipelineError::invalid_request(
                "download pool needs at least one worker",
            ));
        }
        Ok(())
    }
}
