#![forbid(unsafe_code)]

//! Client for the download service.
//!
//! [`MediaService`] is the seam the session talks to; [`HttpService`] is the
//! real implementation on top of a blocking `ureq` agent. Every blocking
//! call runs on tokio's blocking pool so the session loop never stalls.

use std::{
    fs,
    io::{self, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::ClientSettings;
use crate::error::{ClientError, DOWNLOAD_FALLBACK_MESSAGE, INFO_FALLBACK_MESSAGE, rejection_message};
use crate::metadata::{InfoResponse, MediaMetadata};
use crate::orchestrator::JobId;
use crate::platform::Platform;
use crate::progress::{Subscription, read_event_stream};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on how long a progress reader can block on a quiet stream
/// before it rechecks whether its subscription was closed.
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Body of `POST /api/download`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub url: String,
    pub platform: Platform,
    /// Backend format selector.
    pub format: String,
    pub format_id: String,
}

#[derive(Serialize)]
struct InfoRequest<'a> {
    url: &'a str,
    platform: Platform,
}

/// Some backends hand out numeric ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawJobId {
    Text(String),
    Number(u64),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadAccepted {
    download_id: RawJobId,
}

/// A finished artifact saved on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedFile {
    pub path: PathBuf,
    pub bytes: u64,
}

#[async_trait]
pub trait MediaService: Send + Sync {
    async fn fetch_info(&self, url: &str, platform: Platform) -> Result<MediaMetadata, ClientError>;

    async fn create_download(&self, request: &DownloadRequest) -> Result<JobId, ClientError>;

    /// Opens the progress stream for `job_id`. Connection failures are
    /// delivered through the returned subscription.
    fn subscribe(&self, job_id: &JobId) -> Subscription;

    async fn retrieve_file(&self, job_id: &JobId) -> Result<RetrievedFile, ClientError>;
}

#[derive(Clone)]
pub struct HttpService {
    agent: ureq::Agent,
    stream_agent: ureq::Agent,
    api_base: String,
    download_dir: PathBuf,
    request_timeout: Duration,
}

impl HttpService {
    pub fn new(settings: &ClientSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .build();
        let stream_agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(STREAM_POLL_INTERVAL)
            .build();
        Self {
            agent,
            stream_agent,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            download_dir: settings.download_dir.clone(),
            request_timeout: settings.request_timeout,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn post_json<B, T>(&self, path: &str, body: &B, fallback: &str) -> Result<T, ClientError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path);
        debug!(%url, "POST");
        let response = self
            .agent
            .post(&url)
            .timeout(self.request_timeout)
            .send_json(body)
            .map_err(|err| map_ureq_error(err, fallback))?;
        let status = response.status();
        response
            .into_json::<T>()
            .map_err(|_| ClientError::RequestRejected {
                status,
                message: fallback.to_string(),
            })
    }

    fn download_to_disk(&self, job_id: &JobId) -> Result<RetrievedFile, ClientError> {
        let url = self.endpoint(&format!("download-file/{job_id}"));
        debug!(%url, "GET");
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|err| map_ureq_error(err, DOWNLOAD_FALLBACK_MESSAGE))?;

        let file_name = response
            .header("Content-Disposition")
            .and_then(disposition_file_name)
            .unwrap_or_else(|| fallback_file_name(job_id, response.content_type()));

        fs::create_dir_all(&self.download_dir)?;
        let mut tmp = NamedTempFile::new_in(&self.download_dir)?;
        let bytes = io::copy(&mut response.into_reader(), tmp.as_file_mut())?;
        let path = unique_destination(&self.download_dir, &file_name);
        tmp.persist(&path).map_err(|err| err.error)?;
        info!(path = %path.display(), bytes, "saved download");
        Ok(RetrievedFile { path, bytes })
    }
}

#[async_trait]
impl MediaService for HttpService {
    async fn fetch_info(&self, url: &str, platform: Platform) -> Result<MediaMetadata, ClientError> {
        let this = self.clone();
        let url = url.to_string();
        run_blocking(move || {
            let info: InfoResponse = this.post_json(
                "info",
                &InfoRequest {
                    url: &url,
                    platform,
                },
                INFO_FALLBACK_MESSAGE,
            )?;
            Ok(MediaMetadata::from(info))
        })
        .await
    }

    async fn create_download(&self, request: &DownloadRequest) -> Result<JobId, ClientError> {
        let this = self.clone();
        let request = request.clone();
        run_blocking(move || {
            let accepted: DownloadAccepted =
                this.post_json("download", &request, DOWNLOAD_FALLBACK_MESSAGE)?;
            Ok(match accepted.download_id {
                RawJobId::Text(id) => JobId::from(id),
                RawJobId::Number(id) => JobId::from(id.to_string()),
            })
        })
        .await
    }

    fn subscribe(&self, job_id: &JobId) -> Subscription {
        let (sender, subscription) = Subscription::channel(job_id.clone());
        let agent = self.stream_agent.clone();
        let url = self.endpoint(&format!("download-progress/{job_id}"));
        // Reads time out every poll interval so a closed subscription frees
        // the worker even when the server goes quiet.
        tokio::task::spawn_blocking(move || {
            debug!(%url, "opening progress stream");
            match agent.get(&url).set("Accept", "text/event-stream").call() {
                Ok(response) => {
                    read_event_stream(BufReader::new(response.into_reader()), &sender);
                }
                Err(err) => {
                    sender.blocking_send(Err(ClientError::Transport(err.to_string())));
                }
            }
        });
        subscription
    }

    async fn retrieve_file(&self, job_id: &JobId) -> Result<RetrievedFile, ClientError> {
        let this = self.clone();
        let job_id = job_id.clone();
        run_blocking(move || this.download_to_disk(&job_id)).await
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T, ClientError>
where
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|err| ClientError::Transport(format!("request worker failed: {err}")))?
}

fn map_ureq_error(err: ureq::Error, fallback: &str) -> ClientError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            ClientError::RequestRejected {
                status,
                message: rejection_message(&body, fallback),
            }
        }
        ureq::Error::Transport(transport) => ClientError::Transport(transport.to_string()),
    }
}

/// `attachment; filename="clip.mp4"` -> `clip.mp4`. Path components are
/// stripped so the server cannot escape the download directory.
fn disposition_file_name(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("filename="))
        .map(|value| value.trim().trim_matches('"'))
        .and_then(|value| Path::new(value).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty() && name != ".." && !name.contains(['/', '\\']))
}

fn fallback_file_name(job_id: &JobId, content_type: &str) -> String {
    let subtype = content_type.split('/').nth(1).unwrap_or_default();
    let extension = mime_guess::get_mime_extensions_str(content_type)
        .and_then(|candidates| {
            candidates
                .iter()
                .find(|ext| **ext == subtype)
                .or_else(|| candidates.first())
        })
        .copied()
        .unwrap_or("bin");
    let stem: String = job_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{stem}.{extension}")
}

/// Appends ` (1)`, ` (2)`, ... like a browser instead of overwriting.
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){extension}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressStatus;
    use axum::{
        Json, Router,
        extract::{Path as AxumPath, State},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    };
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeBackend {
        download_bodies: Arc<Mutex<Vec<Value>>>,
    }

    async fn info(Json(body): Json<Value>) -> Response {
        let url = body["url"].as_str().unwrap_or_default();
        if url.contains("private") {
            return (StatusCode::FORBIDDEN, Json(json!({"error": "Private video"}))).into_response();
        }
        if url.contains("broken") {
            return (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").into_response();
        }
        Json(json!({
            "title": "Sample",
            "thumbnails": [{"url": "https://cdn/t.jpg"}],
            "duration": 125,
            "view_count": 1500,
            "channel": "Chan",
        }))
        .into_response()
    }

    async fn download(State(state): State<FakeBackend>, Json(body): Json<Value>) -> Response {
        state.download_bodies.lock().push(body.clone());
        if body["url"].as_str().unwrap_or_default().contains("unsupported") {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": "Unsupported URL"})))
                .into_response();
        }
        if body["formatId"] == "numeric" {
            return Json(json!({"downloadId": 77})).into_response();
        }
        Json(json!({"downloadId": "job-42"})).into_response()
    }

    async fn progress(AxumPath(id): AxumPath<String>) -> Response {
        if id == "gone" {
            return StatusCode::NOT_FOUND.into_response();
        }
        let body = ": hello\n\n\
                    data: {\"status\":\"downloading\",\"percent\":10}\n\n\
                    event: heartbeat\ndata: {}\n\n\
                    data: {\"status\":\"processing\",\"percent\":90}\n\n\
                    data: {\"status\":\"complete\"}\n\n";
        ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
    }

    async fn file(AxumPath(id): AxumPath<String>) -> Response {
        match id.as_str() {
            "named" => (
                [
                    (header::CONTENT_TYPE, "video/mp4"),
                    (header::CONTENT_DISPOSITION, "attachment; filename=\"../clip.mp4\""),
                ],
                "fake-bytes",
            )
                .into_response(),
            "plain" => ([(header::CONTENT_TYPE, "video/mp4")], "0123").into_response(),
            "odd" => (
                [(header::CONTENT_TYPE, "application/x-something-unknown")],
                "zz",
            )
                .into_response(),
            _ => (StatusCode::GONE, Json(json!({"error": "File expired"}))).into_response(),
        }
    }

    async fn spawn_backend() -> (String, FakeBackend) {
        let state = FakeBackend::default();
        let app = Router::new()
            .route("/api/info", post(info))
            .route("/api/download", post(download))
            .route("/api/download-progress/{id}", get(progress))
            .route("/api/download-file/{id}", get(file))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api"), state)
    }

    fn service(api_base: &str, download_dir: &Path) -> HttpService {
        HttpService::new(&ClientSettings {
            api_base: format!("{api_base}/"),
            download_dir: download_dir.to_path_buf(),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_info_normalizes_payload() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let meta = service(&base, dir.path())
            .fetch_info("https://youtu.be/x", Platform::YouTube)
            .await
            .unwrap();
        assert_eq!(meta.title, "Sample");
        assert_eq!(meta.thumbnail_url.as_deref(), Some("https://cdn/t.jpg"));
        assert_eq!(meta.duration_label().as_deref(), Some("2:05"));
        assert_eq!(meta.views_label().as_deref(), Some("1.5K"));
        assert_eq!(meta.uploader.as_deref(), Some("Chan"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_info_surfaces_server_message_or_fallback() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&base, dir.path());

        let err = svc
            .fetch_info("https://youtu.be/private", Platform::YouTube)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RequestRejected { status: 403, .. }));
        assert_eq!(err.user_message(), "Private video");

        let err = svc
            .fetch_info("https://youtu.be/broken", Platform::YouTube)
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), INFO_FALLBACK_MESSAGE);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreachable_backend_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dir = tempfile::tempdir().unwrap();
        let err = service(&format!("http://{addr}/api"), dir.path())
            .fetch_info("https://youtu.be/x", Platform::YouTube)
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_download_sends_camel_case_body() {
        let (base, backend) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&base, dir.path());
        let request = DownloadRequest {
            url: "https://youtu.be/x".into(),
            platform: Platform::YouTube,
            format: "bestaudio".into(),
            format_id: "audio".into(),
        };
        let job = svc.create_download(&request).await.unwrap();
        assert_eq!(job, JobId::from("job-42"));

        let bodies = backend.download_bodies.lock().clone();
        assert_eq!(
            bodies,
            vec![json!({
                "url": "https://youtu.be/x",
                "platform": "youtube",
                "format": "bestaudio",
                "formatId": "audio",
            })]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_download_accepts_numeric_ids_and_reports_rejections() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&base, dir.path());
        let mut request = DownloadRequest {
            url: "https://youtu.be/x".into(),
            platform: Platform::YouTube,
            format: "best".into(),
            format_id: "numeric".into(),
        };
        assert_eq!(svc.create_download(&request).await.unwrap(), JobId::from("77"));

        request.url = "https://youtu.be/unsupported".into();
        let err = svc.create_download(&request).await.unwrap_err();
        assert_eq!(err.user_message(), "Unsupported URL");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_streams_message_events_in_order() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let mut subscription = service(&base, dir.path()).subscribe(&JobId::from("job-42"));

        let mut seen = Vec::new();
        while let Some(item) = subscription.next().await {
            let event = item.unwrap();
            seen.push((event.status, event.percent));
        }
        assert_eq!(
            seen,
            vec![
                (Some(ProgressStatus::Downloading), Some(10.0)),
                (Some(ProgressStatus::Processing), Some(90.0)),
                (Some(ProgressStatus::Complete), None),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscription_reports_http_failures_as_transport() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let mut subscription = service(&base, dir.path()).subscribe(&JobId::from("gone"));
        let err = subscription.next().await.unwrap().unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retrieve_file_uses_sanitized_disposition_name() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&base, dir.path());

        let first = svc.retrieve_file(&JobId::from("named")).await.unwrap();
        assert_eq!(first.path, dir.path().join("clip.mp4"));
        assert_eq!(first.bytes, 10);
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "fake-bytes");

        let second = svc.retrieve_file(&JobId::from("named")).await.unwrap();
        assert_eq!(second.path, dir.path().join("clip (1).mp4"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retrieve_file_derives_name_from_job_and_content_type() {
        let (base, _) = spawn_backend().await;
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&base, dir.path());

        let plain = svc.retrieve_file(&JobId::from("plain")).await.unwrap();
        assert_eq!(plain.path, dir.path().join("plain.mp4"));
        let odd = svc.retrieve_file(&JobId::from("odd")).await.unwrap();
        assert_eq!(odd.path, dir.path().join("odd.bin"));

        let err = svc.retrieve_file(&JobId::from("expired")).await.unwrap_err();
        assert_eq!(err.user_message(), "File expired");
    }

    #[test]
    fn disposition_parsing_rejects_empty_and_traversal() {
        assert_eq!(
            disposition_file_name("attachment; filename=\"a b.webm\""),
            Some("a b.webm".to_string())
        );
        assert_eq!(disposition_file_name("attachment; filename=x.mp3"), Some("x.mp3".into()));
        assert_eq!(disposition_file_name("attachment"), None);
        assert_eq!(disposition_file_name("attachment; filename=\"\""), None);
        assert_eq!(disposition_file_name("attachment; filename=\"..\""), None);
    }
}
