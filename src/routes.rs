use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    catalog::{Catalog, build_catalog},
    config::non_empty,
    delivery::{self, DOWNLOAD_FILENAME_HEADER, JobDir},
    error::ApiError,
    plan::{fallback_plan, select_plan},
    platform::SourceUrl,
    resolver::MediaResolver,
};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn MediaResolver>,
    pub download_semaphore: Arc<Semaphore>,
    pub transfer_dir: PathBuf,
    pub max_download_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct FetchInfoParams {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    url: Option<String>,
    format_id: Option<String>,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/health/resolver", get(resolver_health))
        .route("/fetch-info", get(fetch_info))
        .route("/download", get(download))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn resolver_health(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let version = state
        .resolver
        .version()
        .await
        .map_err(ApiError::resolution_failure)?;
    Ok(Json(serde_json::json!({"status": "ok", "version": version})))
}

async fn fetch_info(
    State(state): State<AppState>,
    Query(params): Query<FetchInfoParams>,
) -> Result<Json<Catalog>, ApiError> {
    let source = SourceUrl::parse(params.url.as_deref())?;

    let descriptor = state.resolver.resolve(&source).await.map_err(|error| {
        warn!("Could not resolve {:?}: {error}", source.as_str());
        ApiError::resolution_failure(error)
    })?;

    Ok(Json(build_catalog(&descriptor)))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let source = SourceUrl::parse(params.url.as_deref())?;
    let format_id = params
        .format_id
        .as_deref()
        .and_then(non_empty)
        .ok_or_else(|| ApiError::missing_input("Missing format_id parameter."))?
        .to_string();

    let plan = match state.resolver.resolve(&source).await {
        Ok(descriptor) => select_plan(&descriptor, &format_id)?,
        Err(error) => {
            warn!(
                "Could not inspect formats of {:?} ({error}); using the {} fallback plan",
                source.as_str(),
                source.platform()
            );
            fallback_plan(source.platform(), &format_id)
        }
    };
    info!(
        "Download plan for {:?} ({}): {} merge={}",
        source.as_str(),
        source.platform(),
        plan.selector(),
        plan.needs_merge
    );

    let _download_permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve download capacity."))?;

    let job = JobDir::create(&state.transfer_dir).await?;
    let artifact = state
        .resolver
        .execute(&plan, &source, job.path())
        .await
        .map_err(|error| {
            warn!("Download of {:?} failed: {error}", source.as_str());
            ApiError::execution_failure(error)
        })?;

    delivery::attachment(job, &artifact, state.max_download_bytes).await
}

pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let origins = if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set. Falling back to development origins.");
        vec![
            "http://127.0.0.1:5173".to_string(),
            "http://localhost:5173".to_string(),
        ]
    } else {
        configured.to_vec()
    };

    let normalized_origins = origins
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    let allowed_origins = Arc::new(normalized_origins);
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    let allow_origin = AllowOrigin::predicate({
        let allowed_origins = Arc::clone(&allowed_origins);
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!(
                "CORS origin check raw={:?} normalized={:?} allowed={}",
                origin, normalized, allowed
            );
            allowed
        }
    });

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ]))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use axum::{
        body::to_bytes,
        http::{StatusCode, header::CONTENT_TYPE},
        response::IntoResponse,
    };
    use serde_json::Value;

    use super::*;
    use crate::{
        media::{MediaDescriptor, StreamVariant},
        plan::DownloadPlan,
        resolver::ResolveError,
    };

    #[derive(Default)]
    struct FakeResolver {
        fail_resolve: bool,
        fail_execute: bool,
        resolves: AtomicUsize,
        executed: std::sync::Mutex<Vec<String>>,
    }

    fn variant(id: &str, ext: &str, vcodec: &str, acodec: &str, height: Option<u32>) -> StreamVariant {
        StreamVariant {
            format_id: id.to_string(),
            container_ext: ext.to_string(),
            video_codec: Some(vcodec.to_string()),
            audio_codec: Some(acodec.to_string()),
            height,
            format_note: None,
        }
    }

    #[async_trait]
    impl MediaResolver for FakeResolver {
        async fn resolve(&self, source: &SourceUrl) -> Result<MediaDescriptor, ResolveError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if self.fail_resolve {
                return Err(ResolveError::Failed("ERROR: private video".to_string()));
            }
            Ok(MediaDescriptor::new(
                Some("Clip".to_string()),
                source.platform(),
                vec![
                    variant("sb0", "mhtml", "none", "none", None),
                    variant("22", "mp4", "avc1", "none", Some(720)),
                    variant("140", "m4a", "none", "mp4a", None),
                ],
            ))
        }

        async fn execute(
            &self,
            plan: &DownloadPlan,
            _source: &SourceUrl,
            job_dir: &Path,
        ) -> Result<PathBuf, ResolveError> {
            self.executed.lock().unwrap().push(plan.selector());
            tokio::fs::write(job_dir.join("partial.mp4.part"), b"x")
                .await
                .map_err(ResolveError::Io)?;
            if self.fail_execute {
                return Err(ResolveError::Failed("ERROR: merge failed".to_string()));
            }
            let artifact = job_dir.join("Clip-x.mp4");
            tokio::fs::write(&artifact, b"merged")
                .await
                .map_err(ResolveError::Io)?;
            Ok(artifact)
        }

        async fn version(&self) -> Result<String, ResolveError> {
            Ok("2026.01.01".to_string())
        }
    }

    struct TestContext {
        transfer: tempfile::TempDir,
        resolver: Arc<FakeResolver>,
        state: AppState,
    }

    impl TestContext {
        fn new(resolver: FakeResolver) -> Self {
            let transfer = tempfile::tempdir().unwrap();
            let resolver = Arc::new(resolver);
            let state = AppState {
                resolver: resolver.clone(),
                download_semaphore: Arc::new(Semaphore::new(1)),
                transfer_dir: transfer.path().to_path_buf(),
                max_download_bytes: 1024,
            };
            Self {
                transfer,
                resolver,
                state,
            }
        }

        fn executed(&self) -> Vec<String> {
            self.resolver.executed.lock().unwrap().clone()
        }

        fn leftover_jobs(&self) -> usize {
            std::fs::read_dir(self.transfer.path()).unwrap().count()
        }
    }

    fn download_params(url: Option<&str>, format_id: Option<&str>) -> Query<DownloadParams> {
        Query(DownloadParams {
            url: url.map(ToString::to_string),
            format_id: format_id.map(ToString::to_string),
        })
    }

    async fn error_json(error: ApiError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn fetch_info_returns_catalog() {
        let ctx = TestContext::new(FakeResolver::default());
        let params = Query(FetchInfoParams {
            url: Some("https://youtube.com/watch?v=x".to_string()),
        });

        let Json(catalog) = fetch_info(State(ctx.state.clone()), params).await.unwrap();
        assert_eq!(catalog.title, "Clip");
        let ids: Vec<&str> = catalog
            .formats
            .iter()
            .map(|format| format.format_id.as_str())
            .collect();
        assert_eq!(ids, ["22", "140"]);
    }

    #[tokio::test]
    async fn fetch_info_requires_url() {
        let ctx = TestContext::new(FakeResolver::default());
        let error = fetch_info(State(ctx.state.clone()), Query(FetchInfoParams { url: None }))
            .await
            .unwrap_err();

        let (status, body) = error_json(error).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_INPUT");
        assert_eq!(ctx.resolver.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_info_reports_resolution_failure() {
        let ctx = TestContext::new(FakeResolver {
            fail_resolve: true,
            ..FakeResolver::default()
        });
        let params = Query(FetchInfoParams {
            url: Some("https://example.com/v".to_string()),
        });

        let error = fetch_info(State(ctx.state.clone()), params).await.unwrap_err();
        let (status, body) = error_json(error).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "RESOLUTION_FAILURE");
        assert_eq!(body["error"], "ERROR: private video");
    }

    #[tokio::test]
    async fn download_merges_youtube_video_only_and_cleans_up() {
        let ctx = TestContext::new(FakeResolver::default());

        let response = download(
            State(ctx.state.clone()),
            download_params(Some("https://youtube.com/watch?v=x"), Some("22")),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
        assert_eq!(ctx.executed(), ["22+bestaudio/best"]);
        assert_eq!(ctx.resolver.resolves.load(Ordering::SeqCst), 1);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"merged");
        assert_eq!(ctx.leftover_jobs(), 0);
    }

    #[tokio::test]
    async fn download_is_direct_for_instagram() {
        let ctx = TestContext::new(FakeResolver::default());

        download(
            State(ctx.state.clone()),
            download_params(Some("https://instagram.com/reel/x"), Some("22")),
        )
        .await
        .unwrap();

        assert_eq!(ctx.executed(), ["22"]);
    }

    #[tokio::test]
    async fn download_rejects_unknown_format() {
        let ctx = TestContext::new(FakeResolver::default());

        let error = download(
            State(ctx.state.clone()),
            download_params(Some("https://fb.watch/x"), Some("999")),
        )
        .await
        .unwrap_err();

        let (status, body) = error_json(error).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "FORMAT_NOT_FOUND");
        assert!(ctx.executed().is_empty());
    }

    #[tokio::test]
    async fn download_requires_format_id() {
        let ctx = TestContext::new(FakeResolver::default());

        let error = download(
            State(ctx.state.clone()),
            download_params(Some("https://youtube.com/watch?v=x"), Some("  ")),
        )
        .await
        .unwrap_err();

        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.code, Some("MISSING_INPUT"));
    }

    #[tokio::test]
    async fn download_degrades_when_formats_cannot_be_inspected() {
        let ctx = TestContext::new(FakeResolver {
            fail_resolve: true,
            ..FakeResolver::default()
        });

        download(
            State(ctx.state.clone()),
            download_params(Some("https://youtube.com/watch?v=x"), Some("18")),
        )
        .await
        .unwrap();

        assert_eq!(ctx.executed(), ["18+bestaudio/best"]);
    }

    #[tokio::test]
    async fn failed_execution_releases_job_dir() {
        let ctx = TestContext::new(FakeResolver {
            fail_execute: true,
            ..FakeResolver::default()
        });

        let error = download(
            State(ctx.state.clone()),
            download_params(Some("https://vimeo.com/1"), Some("22")),
        )
        .await
        .unwrap_err();

        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code, Some("EXECUTION_FAILURE"));
        assert_eq!(ctx.leftover_jobs(), 0);
    }

    #[tokio::test]
    async fn resolver_health_reports_version() {
        let ctx = TestContext::new(FakeResolver::default());
        let Json(body) = resolver_health(State(ctx.state.clone())).await.unwrap();
        assert_eq!(body["version"], "2026.01.01");
    }

    #[test]
    fn origins_are_normalized() {
        assert_eq!(
            normalize_origin("HTTPS://Example.com:443").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            normalize_origin("http://localhost:5173").as_deref(),
            Some("http://localhost:5173")
        );
        assert_eq!(normalize_origin("https://example.com/app"), None);
        assert_eq!(normalize_origin("ftp://example.com"), None);
    }

    #[test]
    fn invalid_configured_origin_is_rejected() {
        assert!(build_cors_layer(&["not an origin".to_string()]).is_err());
        assert!(build_cors_layer(&[]).is_ok());
    }
}
