pub mod config;
pub mod credentials;
pub mod error;
pub mod hls;
pub mod mux;
pub mod pipeline;
pub mod report;
pub mod request;
pub mod storage;
pub mod workspace;

pub use config::PipelineConfig;
pub use credentials::{CredentialProvider, Credentials, StaticCredentials};
pub use error::PipelineError;
pub use pipeline::{OutputDescriptor, Pipeline, PipelineOutcome, PipelineStage};
pub use report::{ReportStatus, RunReport};
pub use request::{DownloadRequest, Metadata};
pub use storage::{LocalDirectoryStore, OutputStore};
pub use workspace::WorkspaceDir;
