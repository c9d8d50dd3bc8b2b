use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Output,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::{process::Command, time::timeout};
use tracing::{debug, info, warn};

use super::{MediaResolver, ResolveError};
use crate::{
    config::ResolverConfig,
    media::{MediaDescriptor, StreamVariant},
    plan::DownloadPlan,
    platform::SourceUrl,
};

const OUTPUT_TEMPLATE: &str = "%(title).140B-%(id)s.%(ext)s";

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<f64>,
    format_note: Option<String>,
}

impl From<YtDlpFormat> for StreamVariant {
    fn from(format: YtDlpFormat) -> Self {
        let has_video = matches!(format.vcodec.as_deref(), Some(value) if value != "none");
        let container_ext = format
            .ext
            .filter(|ext| !ext.trim().is_empty())
            .unwrap_or_else(|| (if has_video { "mp4" } else { "m4a" }).to_string());

        StreamVariant {
            format_id: format.format_id,
            container_ext,
            video_codec: format.vcodec,
            audio_codec: format.acodec,
            height: format
                .height
                .filter(|height| *height >= 1.0)
                .map(|height| height.round() as u32),
            format_note: format.format_note,
        }
    }
}

/// Resolver backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    config: ResolverConfig,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    fn auth_args(&self, source: &SourceUrl) -> Vec<String> {
        let auth = &self.config.auth;
        let mut args = vec!["--user-agent".to_string(), auth.user_agent.clone()];

        if let Some(cookie_file) = auth.cookie_file(source.platform()) {
            args.push("--cookies".to_string());
            args.push(cookie_file.to_string_lossy().into_owned());
        }

        args
    }

    fn resolve_args(&self, source: &SourceUrl) -> Vec<String> {
        let mut args = vec![
            "-J".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
        ];
        args.extend(self.auth_args(source));
        args.push(source.as_str().to_string());
        args
    }

    fn execute_args(&self, plan: &DownloadPlan, source: &SourceUrl, job_dir: &Path) -> Vec<String> {
        let output_template = job_dir.join(OUTPUT_TEMPLATE);

        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
        ];
        args.extend(self.auth_args(source));

        args.push("-f".to_string());
        args.push(plan.selector());
        if plan.needs_merge
            && let Some(container) = plan.target_container
        {
            args.push("--merge-output-format".to_string());
            args.push(container.to_string());
        }

        args.push(source.as_str().to_string());
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, ResolveError> {
        debug!("Running {} {:?}", self.config.binary, args);

        let command_future = Command::new(&self.config.binary)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = timeout(self.config.timeout, command_future)
            .await
            .map_err(|_| ResolveError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ResolveError::NotInstalled(self.config.binary.clone())
                } else {
                    ResolveError::Spawn(error)
                }
            })?;

        if !output.status.success() {
            return Err(ResolveError::Failed(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, source: &SourceUrl) -> Result<MediaDescriptor, ResolveError> {
        let output = self.run(self.resolve_args(source)).await?;
        let descriptor = parse_descriptor(&output.stdout, source)?;

        info!(
            "Resolved {:?} ({}) with {} variant(s)",
            source.as_str(),
            source.platform(),
            descriptor.variants.len()
        );
        Ok(descriptor)
    }

    async fn execute(
        &self,
        plan: &DownloadPlan,
        source: &SourceUrl,
        job_dir: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let output = self.run(self.execute_args(plan, source, job_dir)).await?;
        let printed_path = last_output_line(&output.stdout);
        resolve_downloaded_file(job_dir, printed_path.as_deref()).await
    }

    async fn version(&self) -> Result<String, ResolveError> {
        let output = self.run(vec!["--version".to_string()]).await?;
        last_output_line(&output.stdout)
            .ok_or_else(|| ResolveError::InvalidOutput("empty version output".to_string()))
    }
}

/// Builds a descriptor from `yt-dlp -J` output.
///
/// Formats that fail to deserialize are skipped. Extractors that report a
/// single format at the top level yield a one-variant descriptor.
fn parse_descriptor(stdout: &[u8], source: &SourceUrl) -> Result<MediaDescriptor, ResolveError> {
    let info: Value = serde_json::from_slice(stdout)
        .map_err(|error| ResolveError::InvalidOutput(error.to_string()))?;
    if !info.is_object() {
        return Err(ResolveError::InvalidOutput(
            "expected a JSON object".to_string(),
        ));
    }

    let title = info
        .get("title")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let raw_formats = match info.get("formats").and_then(Value::as_array) {
        Some(formats) => formats.clone(),
        None if info.get("format_id").is_some() => vec![info.clone()],
        None => Vec::new(),
    };

    let variants = raw_formats
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<YtDlpFormat>(raw) {
            Ok(format) => Some(StreamVariant::from(format)),
            Err(error) => {
                debug!("Skipping unreadable format entry: {error}");
                None
            }
        })
        .collect();

    Ok(MediaDescriptor::new(title, source.platform(), variants))
}

fn run_error_message(stderr: &[u8]) -> String {
    let message = String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string();
    let lower = message.to_ascii_lowercase();

    if lower.contains("unsupported url") {
        "Unsupported or invalid URL.".to_string()
    } else if lower.contains("requested format is not available") {
        "The requested format is not available for this URL.".to_string()
    } else {
        message
    }
}

fn last_output_line(stdout: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(ToString::to_string)
}

async fn resolve_downloaded_file(
    job_dir: &Path,
    printed_path: Option<&str>,
) -> Result<PathBuf, ResolveError> {
    let canonical_job_dir = tokio::fs::canonicalize(job_dir)
        .await
        .map_err(ResolveError::Io)?;

    if let Some(path_value) = printed_path {
        let path = PathBuf::from(path_value);
        if let Some(valid_path) = resolve_download_candidate(&canonical_job_dir, &path).await? {
            return Ok(valid_path);
        }

        let relative_candidate = job_dir.join(path_value);
        if let Some(valid_path) =
            resolve_download_candidate(&canonical_job_dir, &relative_candidate).await?
        {
            return Ok(valid_path);
        }
    }

    let mut entries = tokio::fs::read_dir(job_dir).await.map_err(ResolveError::Io)?;
    while let Some(entry) = entries.next_entry().await.map_err(ResolveError::Io)? {
        let path = entry.path();
        let is_partial = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext, "part" | "ytdl"));
        if is_partial {
            continue;
        }
        if let Some(valid_path) = resolve_download_candidate(&canonical_job_dir, &path).await? {
            return Ok(valid_path);
        }
    }

    Err(ResolveError::MissingArtifact)
}

async fn resolve_download_candidate(
    canonical_job_dir: &Path,
    candidate_path: &Path,
) -> Result<Option<PathBuf>, ResolveError> {
    let metadata = match tokio::fs::metadata(candidate_path).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(ResolveError::Io(error)),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let canonical_candidate = tokio::fs::canonicalize(candidate_path)
        .await
        .map_err(ResolveError::Io)?;

    if !canonical_candidate.starts_with(canonical_job_dir) {
        warn!(
            "Ignoring a file outside the job directory: {:?}",
            canonical_candidate
        );
        return Ok(None);
    }

    Ok(Some(canonical_candidate))
}
