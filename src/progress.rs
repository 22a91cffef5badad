#![forbid(unsafe_code)]

//! Progress events pushed by `GET /api/download-progress/{id}` and the
//! closable subscription handle that delivers them.
//!
//! The wire format is `text/event-stream`. Only unnamed (or `message`)
//! events are delivered, matching what a browser `EventSource` hands to
//! `onmessage`. Each event's data is a JSON object such as
//! `{"status":"downloading","percent":42.5}`.

use std::io::{self, BufRead};

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::orchestrator::JobId;

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Analyzing,
    Downloading,
    Processing,
    Complete,
    Error,
}

impl ProgressStatus {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "analyzing" => Some(Self::Analyzing),
            "downloading" => Some(Self::Downloading),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressEvent {
    /// `None` for missing or unrecognized statuses.
    pub status: Option<ProgressStatus>,
    pub percent: Option<f64>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct RawProgressEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    percent: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

impl ProgressEvent {
    pub fn parse(data: &str) -> Result<Self, serde_json::Error> {
        let raw: RawProgressEvent = serde_json::from_str(data)?;
        Ok(Self {
            status: raw.status.as_deref().and_then(ProgressStatus::parse),
            percent: raw.percent,
            error: raw.error,
        })
    }

    pub fn status(status: ProgressStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_percent(mut self, percent: f64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Incremental `text/event-stream` decoder. Feed it one line at a time;
/// it returns the data payload whenever an event is dispatched.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: Vec<String>,
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        match event.as_deref() {
            None | Some("") | Some("message") => Some(data),
            Some(other) => {
                debug!(event = other, "ignoring named server event");
                None
            }
        }
    }
}

pub type ProgressItem = Result<ProgressEvent, ClientError>;

/// Receiving end of one job's progress stream. Closing it (or dropping
/// it) stops delivery; the server is not told to abort the job.
#[derive(Debug)]
pub struct Subscription {
    job_id: JobId,
    events: mpsc::Receiver<ProgressItem>,
    cancel: CancellationToken,
}

/// Producer half handed to whatever reads the transport.
#[derive(Debug, Clone)]
pub struct SubscriptionSender {
    events: mpsc::Sender<ProgressItem>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn channel(job_id: JobId) -> (SubscriptionSender, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        (
            SubscriptionSender {
                events: tx,
                cancel: cancel.clone(),
            },
            Subscription {
                job_id,
                events: rx,
                cancel,
            },
        )
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Next item, or `None` once the stream ended or was closed.
    pub async fn next(&mut self) -> Option<ProgressItem> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.events.recv() => item,
        }
    }

    pub fn close(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!(job = %self.job_id, "closing progress subscription");
        }
        self.cancel.cancel();
        self.events.close();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl SubscriptionSender {
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.events.is_closed()
    }

    pub async fn send(&self, item: ProgressItem) -> bool {
        if self.is_closed() {
            return false;
        }
        self.events.send(item).await.is_ok()
    }

    /// For transport readers running on a blocking thread.
    pub fn blocking_send(&self, item: ProgressItem) -> bool {
        if self.is_closed() {
            return false;
        }
        self.events.blocking_send(item).is_ok()
    }
}

/// Reads an event stream until EOF, a read error or closure of the
/// subscription. EOF simply drops the sender, which the receiving side
/// observes as the end of the stream.
///
/// Lines are decoded lossily. A read timeout is not a failure: it only
/// gives the reader a chance to notice that the subscription was closed.
pub fn read_event_stream<R: BufRead>(mut reader: R, sender: &SubscriptionSender) {
    let mut decoder = SseDecoder::new();
    let mut buf = Vec::new();
    loop {
        if sender.is_closed() {
            return;
        }
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) if is_poll_timeout(&err) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                sender.blocking_send(Err(ClientError::Transport(err.to_string())));
                return;
            }
        }
        // A partial line is kept until its terminator arrives.
        if buf.last() != Some(&b'\n') {
            continue;
        }
        let line = String::from_utf8_lossy(&buf[..buf.len() - 1]).into_owned();
        buf.clear();
        let Some(data) = decoder.push_line(&line) else {
            continue;
        };
        match ProgressEvent::parse(&data) {
            Ok(event) => {
                if !sender.blocking_send(Ok(event)) {
                    return;
                }
            }
            Err(err) => warn!(%err, data = %data, "skipping malformed progress event"),
        }
    }
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
