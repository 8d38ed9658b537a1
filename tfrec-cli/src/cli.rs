use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tfrec_engine::PipelineConfig;
use tfrec_engine::config::{
    DEFAULT_PLAYLIST_URL, DecryptionConfig, EncoderConfig, FetcherConfig, HttpConfig,
    PlaylistConfig, PoolConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "tfrec",
    version,
    about = "Record a time-free radio broadcast window into a tagged audio file",
    long_about = "Reads one download request (JSON) from a file or stdin, downloads and \
                  decrypts every segment of the broadcast window, muxes them with ffmpeg, \
                  stores the result and prints a JSON run report."
)]
pub struct Args {
    /// Request JSON file; stdin when omitted or `-`
    #[arg(short, long)]
    pub request: Option<PathBuf>,

    /// Directory finished recordings are stored in
    #[arg(short, long, env = "TFREC_OUTPUT_DIR", default_value = "recordings")]
    pub output_dir: PathBuf,

    /// Parent directory for per-run scratch workspaces
    #[arg(long, env = "TFREC_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Time-free playlist endpoint
    #[arg(long, env = "TFREC_PLAYLIST_URL", default_value = DEFAULT_PLAYLIST_URL)]
    pub playlist_url: String,

    #[arg(long, env = "TFREC_AUTH_TOKEN", default_value = "", hide_env_values = true)]
    pub auth_token: String,

    #[arg(long, env = "TFREC_AREA_ID", default_value = "JP13")]
    pub area_id: String,

    /// Concurrent segment downloads
    #[arg(short, long, env = "TFREC_WORKERS", default_value_t = 3)]
    pub workers: usize,

    /// Attempts per segment, key and artwork download
    #[arg(long, env = "TFREC_ATTEMPTS", default_value_t = 3)]
    pub attempts: u32,

    #[arg(long, env = "TFREC_RETRY_DELAY_MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Seek cursor step in seconds
    #[arg(long, env = "TFREC_SEEK_STEP_SECS", default_value_t = 300)]
    pub seek_step_secs: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "TFREC_TIMEOUT_SECS", default_value_t = 60)]
    pub timeout_secs: u64,

    /// Decrypt on the async worker instead of the blocking pool
    #[arg(long)]
    pub inline_decryption: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "TFREC_JSON_LOGS")]
    pub json_logs: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Args {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            http: HttpConfig {
                timeout: Duration::from_secs(self.timeout_secs),
                ..HttpConfig::default()
            },
            playlist: PlaylistConfig {
                playlist_url: self.playlist_url.clone(),
                seek_step: Duration::from_secs(self.seek_step_secs),
            },
            fetcher: FetcherConfig {
                max_attempts: self.attempts,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
            },
            pool: PoolConfig {
                workers: self.workers,
            },
            decryption: DecryptionConfig {
                offload_to_blocking_pool: !self.inline_decryption,
            },
            encoder: EncoderConfig {
                ffmpeg_path: self.ffmpeg.clone(),
                ..EncoderConfig::default()
            },
            workspace_root: self
                .work_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}
