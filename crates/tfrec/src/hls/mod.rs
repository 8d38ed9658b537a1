// Time-free HLS acquisition: playlist discovery, segment download and decryption.

pub mod decryption;
pub mod fetcher;
pub mod playlist;
pub mod pool;
pub mod retry;

// Re-exports for easier access
pub use decryption::{DecryptionOffloader, KeyFetcher, KeyRing, decrypt_segment};
pub use fetcher::{SegmentDownloader, SegmentFetcher};
pub use playlist::{
    KeyReference, PlaylistCursor, PlaylistEngine, PlaylistEntry, PlaylistProvider,
    SegmentReference, parse_playlist,
};
pub use pool::{DownloadPool, SegmentOutcome};
pub use retry::{RetryAction, RetryPolicy, retry_with_delay};

use bytes::Bytes;
use reqwest::Client;

use crate::PipelineError;

/// GET `url` and return the body; any non-2xx status is an error.
pub(crate) async fn get_bytes(client: &Client, url: &str) -> Result<Bytes, PipelineError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| PipelineError::upstream(url, e.to_string()))?;
    if !response.status().is_success() {
        return Err(PipelineError::http_status(url, response.status()));
    }
    response
        .bytes()
        .await
        .map_err(|e| PipelineError::upstream(url, e.to_string()))
}
