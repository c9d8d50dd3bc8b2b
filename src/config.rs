use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{info, warn};

use crate::platform::PlatformClass;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
const DEFAULT_MAX_DOWNLOAD_MB: u64 = 250;
const DEFAULT_YT_DLP_BIN: &str = "yt-dlp";
const DEFAULT_YT_DLP_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    pub max_concurrent_downloads: usize,
    pub max_download_bytes: u64,
    pub transfer_dir: PathBuf,
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub binary: String,
    pub timeout: Duration,
    pub auth: AuthConfig,
}

/// User-Agent and per-platform cookie files injected into every resolver call.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub user_agent: String,
    cookie_files: HashMap<PlatformClass, PathBuf>,
}

impl AuthConfig {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            cookie_files: HashMap::new(),
        }
    }

    pub fn with_cookie_file(mut self, platform: PlatformClass, path: impl Into<PathBuf>) -> Self {
        self.cookie_files.insert(platform, path.into());
        self
    }

    pub fn cookie_file(&self, platform: PlatformClass) -> Option<&Path> {
        self.cookie_files.get(&platform).map(PathBuf::as_path)
    }

    /// Drops configured cookie files that do not exist; those platforms run
    /// unauthenticated.
    pub fn discard_missing_cookie_files(&mut self) {
        self.cookie_files.retain(|platform, path| {
            if path.is_file() {
                info!("Using cookie file {:?} for {platform}", path);
                true
            } else {
                warn!(
                    "Cookie file {:?} for {platform} does not exist; continuing without cookies",
                    path
                );
                false
            }
        });
    }
}

fn cookie_env_key(platform: PlatformClass) -> &'static str {
    match platform {
        PlatformClass::YouTubeLike => "YOUTUBE_COOKIES_FILE",
        PlatformClass::InstagramLike => "INSTAGRAM_COOKIES_FILE",
        PlatformClass::FacebookLike => "FACEBOOK_COOKIES_FILE",
        PlatformClass::Other => "OTHER_COOKIES_FILE",
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let number = |name: &str| text(name).and_then(|value| value.parse::<u64>().ok());

        let bind_addr = text("APP_ADDR")
            .or_else(|| {
                text("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let allowed_origins = text("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let max_concurrent_downloads = number("MAX_CONCURRENT_DOWNLOADS")
            .filter(|value| *value > 0)
            .map(|value| value as usize)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_DOWNLOADS);

        let max_download_bytes = number("MAX_DOWNLOAD_MB")
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_DOWNLOAD_MB)
            * 1024
            * 1024;

        let transfer_dir = text("TRANSFER_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("temp_downloads"));

        let mut auth = AuthConfig::new(
            text("YT_DLP_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        );
        for platform in PlatformClass::ALL {
            if let Some(path) = text(cookie_env_key(platform)) {
                auth = auth.with_cookie_file(platform, path);
            }
        }

        let resolver = ResolverConfig {
            binary: text("YT_DLP_BIN").unwrap_or_else(|| DEFAULT_YT_DLP_BIN.to_string()),
            timeout: Duration::from_secs(
                number("YT_DLP_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_YT_DLP_TIMEOUT_SECONDS),
            ),
            auth,
        };

        Self {
            bind_addr,
            allowed_origins,
            max_concurrent_downloads,
            max_download_bytes,
            transfer_dir,
            resolver,
        }
    }
}

pub fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
