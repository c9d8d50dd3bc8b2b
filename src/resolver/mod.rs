//! The media resolver: turns a source URL into a descriptor and executes
//! download plans. All site-specific work happens in the external tool.

mod ytdlp;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::{media::MediaDescriptor, plan::DownloadPlan, platform::SourceUrl};

pub use ytdlp::YtDlpResolver;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0} is not installed. Install it and restart the backend.")]
    NotInstalled(String),
    #[error("The resolver did not finish within {0} seconds.")]
    Timeout(u64),
    #[error("Could not run the resolver: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("{0}")]
    Failed(String),
    #[error("Could not read resolver output: {0}")]
    InvalidOutput(String),
    #[error("The downloaded file could not be found.")]
    MissingArtifact,
    #[error("Could not access the download directory: {0}")]
    Io(#[source] std::io::Error),
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    async fn resolve(&self, source: &SourceUrl) -> Result<MediaDescriptor, ResolveError>;

    /// Runs `plan` and returns the produced file, which lives inside `job_dir`.
    async fn execute(
        &self,
        plan: &DownloadPlan,
        source: &SourceUrl,
        job_dir: &Path,
    ) -> Result<PathBuf, ResolveError>;

    async fn version(&self) -> Result<String, ResolveError>;
}
