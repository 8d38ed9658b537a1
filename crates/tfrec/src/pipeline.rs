//! Pipeline Orchestrator.
//!
//! One run walks `Init → PlaylistDiscovery → KeyResolution → SegmentDownload
//! → CountVerification → Mux → Upload → Cleanup`. Any failure jumps straight
//! to cleanup and is reported together with the stage it happened in. The
//! encoder only runs once every discovered segment is on disk.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use tracing::{Instrument, error, info, info_span, instrument, warn};

use crate::PipelineError;
use crate::config::PipelineConfig;
use crate::credentials::CredentialProvider;
use crate::hls::{
    DecryptionOffloader, DownloadPool, KeyFetcher, KeyRing, PlaylistEngine, PlaylistProvider,
    RetryPolicy, SegmentFetcher,
};
use crate::mux::Muxer;
use crate::report::{RunReport, human_size};
use crate::request::DownloadRequest;
use crate::storage::OutputStore;
use crate::workspace::WorkspaceDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Init,
    PlaylistDiscovery,
    KeyResolution,
    SegmentDownload,
    CountVerification,
    Mux,
    Upload,
    Cleanup,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::PlaylistDiscovery => "PlaylistDiscovery",
            Self::KeyResolution => "KeyResolution",
            Self::SegmentDownload => "SegmentDownload",
            Self::CountVerification => "CountVerification",
            Self::Mux => "Mux",
            Self::Upload => "Upload",
            Self::Cleanup => "Cleanup",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stored recording of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    /// Where the store put the file
    pub location: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub title: String,
    pub on_air: String,
    pub segment_count: usize,
}

impl OutputDescriptor {
    pub fn human_size(&self) -> String {
        human_size(self.size_bytes)
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Success(OutputDescriptor),
    Failed {
        stage: PipelineStage,
        error: PipelineError,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn report(&self) -> RunReport {
        match self {
            Self::Success(output) => RunReport::success(output),
            Self::Failed { stage, error } => RunReport::failure(*stage, error),
        }
    }
}

/// Gate between download and mux: every discovered segment must be present.
pub fn verify_segment_count(
    expected: usize,
    slots: Vec<Option<PathBuf>>,
) -> Result<Vec<PathBuf>, PipelineError> {
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.is_none().then_some(index))
        .collect();
    let fetched = slots.len() - missing.len();

    if fetched != expected || !missing.is_empty() {
        return Err(PipelineError::SegmentCountMismatch {
            expected,
            fetched,
            missing,
        });
    }
    Ok(slots.into_iter().flatten().collect())
}

pub struct Pipeline {
    config: PipelineConfig,
    client: Client,
    playlist: Arc<dyn PlaylistProvider>,
    store: Arc<dyn OutputStore>,
}

impl Pipeline {
    /// Pipeline backed by the authenticated time-free playlist service.
    pub fn new(
        config: PipelineConfig,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn OutputStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = config.http.build_client()?;
        let playlist = Arc::new(PlaylistEngine::new(
            client.clone(),
            config.playlist.clone(),
            credentials,
        ));
        Ok(Self {
            config,
            client,
            playlist,
            store,
        })
    }

    /// Pipeline with a caller-supplied segment discovery.
    pub fn with_playlist_provider(
        config: PipelineConfig,
        playlist: Arc<dyn PlaylistProvider>,
        store: Arc<dyn OutputStore>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let client = config.http.build_client()?;
        Ok(Self {
            config,
            client,
            playlist,
            store,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request to completion. Never panics on pipeline errors; the
    /// workspace is gone when this returns.
    #[instrument(skip_all, fields(station = %request.station_id, title = %request.title))]
    pub async fn run(&self, request: &DownloadRequest) -> PipelineOutcome {
        if let Err(error) = request.validate() {
            error!(error = %error, "Rejected request");
            return PipelineOutcome::Failed {
                stage: PipelineStage::Init,
                error,
            };
        }

        let workspace = match WorkspaceDir::create(&self.config.workspace_root).await {
            Ok(workspace) => workspace,
            Err(error) => {
                error!(error = %error, "Cannot create workspace");
                return PipelineOutcome::Failed {
                    stage: PipelineStage::Init,
                    error,
                };
            }
        };

        let mut stage = PipelineStage::Init;
        let result = self.execute(request, &workspace, &mut stage).await;
        let cleanup = workspace
            .cleanup()
            .instrument(info_span!("stage", name = PipelineStage::Cleanup.as_str()))
            .await;

        match (result, cleanup) {
            (Ok(output), Ok(())) => {
                info!(
                    location = %output.location,
                    size = %output.human_size(),
                    segments = output.segment_count,
                    "Download completed"
                );
                PipelineOutcome::Success(output)
            }
            (Ok(_), Err(error)) => {
                error!(error = %error, "Workspace cleanup failed");
                PipelineOutcome::Failed {
                    stage: PipelineStage::Cleanup,
                    error,
                }
            }
            (Err(error), cleanup) => {
                if let Err(cleanup_error) = cleanup {
                    warn!(error = %cleanup_error, "Workspace cleanup failed after error");
                }
                error!(stage = %stage, kind = error.kind(), error = %error, "Pipeline failed");
                PipelineOutcome::Failed { stage, error }
            }
        }
    }

    async fn execute(
        &self,
        request: &DownloadRequest,
        workspace: &WorkspaceDir,
        stage: &mut PipelineStage,
    ) -> Result<OutputDescriptor, PipelineError> {
        let policy = RetryPolicy::from(&self.config.fetcher);

        *stage = PipelineStage::PlaylistDiscovery;
        let segments = self
            .playlist
            .discover_segments(request)
            .instrument(info_span!("stage", name = stage.as_str()))
            .await?;
        if segments.is_empty() {
            return Err(PipelineError::NothingToDownload {
                station_id: request.station_id.clone(),
            });
        }
        let expected = segments.len();

        *stage = PipelineStage::KeyResolution;
        let key_fetcher = KeyFetcher::new(self.client.clone(), policy.clone());
        let keys = KeyRing::resolve(&segments, &key_fetcher)
            .instrument(info_span!("stage", name = stage.as_str()))
            .await?;

        *stage = PipelineStage::SegmentDownload;
        let fetcher = SegmentFetcher::new(
            self.client.clone(),
            policy.clone(),
            Arc::new(keys),
            DecryptionOffloader::new(self.config.decryption.offload_to_blocking_pool),
        );
        let pool = DownloadPool::new(self.config.pool.workers, Arc::new(fetcher));
        let slots = pool
            .run(segments, workspace.path())
            .instrument(info_span!("stage", name = stage.as_str()))
            .await;

        *stage = PipelineStage::CountVerification;
        let files = verify_segment_count(expected, slots)?;

        *stage = PipelineStage::Mux;
        let file_name = request.output_file_name(&self.config.encoder.output_extension);
        let output = async {
            let muxer = Muxer::new(self.config.encoder.clone(), self.client.clone(), policy);
            let artwork = match request.metadata.artwork_url() {
                Some(url) => muxer.fetch_artwork(url, workspace.path()).await,
                None => None,
            };
            muxer
                .mux(
                    &files,
                    &request.metadata,
                    artwork.as_deref(),
                    workspace.path(),
                    &file_name,
                )
                .await
        }
        .instrument(info_span!("stage", name = stage.as_str()))
        .await?;
        let size_bytes = tokio::fs::metadata(&output).await?.len();

        *stage = PipelineStage::Upload;
        let location = self
            .store
            .store(&output, &file_name)
            .instrument(info_span!("stage", name = stage.as_str()))
            .await?;

        Ok(OutputDescriptor {
            location,
            file_name,
            size_bytes,
            title: request.title.clone(),
            on_air: request.on_air_label(),
            segment_count: expected,
        })
    }
}
