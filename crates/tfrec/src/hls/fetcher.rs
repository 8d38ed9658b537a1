// Segment Fetcher: downloads one segment with bounded retry, decrypts it when
// a key applies, and persists it into the run's workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::PipelineError;
use crate::hls::decryption::{DecryptionOffloader, KeyRing};
use crate::hls::get_bytes;
use crate::hls::playlist::SegmentReference;
use crate::hls::retry::{RetryAction, RetryPolicy, retry_with_delay};
use crate::request::sanitize_file_name;

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Store `segment` under `dir` and return the local path.
    async fn fetch(&self, segment: &SegmentReference, dir: &Path) -> Result<PathBuf, PipelineError>;
}

pub struct SegmentFetcher {
    client: Client,
    policy: RetryPolicy,
    keys: Arc<KeyRing>,
    offloader: DecryptionOffloader,
}

impl SegmentFetcher {
    pub fn new(
        client: Client,
        policy: RetryPolicy,
        keys: Arc<KeyRing>,
        offloader: DecryptionOffloader,
    ) -> Self {
        Self {
            client,
            policy,
            keys,
            offloader,
        }
    }

    /// `<index:05>_<basename>`; the index prefix keeps names unique across sub-playlists.
    pub fn local_file_name(segment: &SegmentReference) -> String {
        let basename = Url::parse(&segment.url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_owned))
            })
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "segment".to_string());
        format!("{:05}_{}", segment.index, sanitize_file_name(&basename))
    }

    async fn fetch_once(&self, segment: &SegmentReference, path: &Path) -> Result<(), PipelineError> {
        let raw = get_bytes(&self.client, &segment.url).await?;

        let payload = match &segment.key {
            Some(key_ref) => {
                let key = self.keys.get(&key_ref.uri).ok_or_else(|| {
                    PipelineError::decryption(format!("no key resolved for {}", key_ref.uri))
                })?;
                self.offloader.decrypt(raw, *key, key_ref.iv).await?
            }
            None => raw,
        };

        tokio::fs::write(path, &payload).await?;
        debug!(size = payload.len(), encrypted = segment.key.is_some(), "Stored segment");
        Ok(())
    }
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    #[instrument(skip(self, segment, dir), fields(index = segment.index))]
    async fn fetch(&self, segment: &SegmentReference, dir: &Path) -> Result<PathBuf, PipelineError> {
        let path = dir.join(Self::local_file_name(segment));
        let target = path.as_path();

        retry_with_delay(&self.policy, &segment.url, |_| async move {
            RetryAction::from(self.fetch_once(segment, target).await)
        })
        .await?;

        Ok(path)
    }
}
