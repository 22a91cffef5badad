#![forbid(unsafe_code)]

//! Download state machine.
//!
//! The orchestrator never performs I/O. Every transition returns the list
//! of [`Effect`]s the session has to carry out (create the job, open or
//! close the progress subscription, schedule the file retrieval, notify the
//! user). Callbacks are tagged with the [`Ticket`] of the download they
//! belong to; anything carrying an older ticket is dropped, so a superseded
//! job can never touch the current one.
//!
//! ```text
//! Idle -> Requesting -> Subscribed{starting, analyzing, downloading, processing}
//!                                 -> Complete | Failed
//! (any) --reset--> Idle
//! ```

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::DownloadRequest;
use crate::error::{CONNECTION_LOST_MESSAGE, ClientError, DOWNLOAD_FALLBACK_MESSAGE};
use crate::platform::{FormatOption, Platform};
use crate::progress::{ProgressEvent, ProgressStatus};

/// Lets the server finalize the artifact before it is requested.
pub const RETRIEVAL_DELAY: Duration = Duration::from_millis(500);
/// Keeps the full progress bar visible for a moment after completion.
pub const SETTLE_DELAY: Duration = Duration::from_millis(2000);

pub const DOWNLOAD_COMPLETED_MESSAGE: &str = "Download completed!";
pub const CONNECTION_ERROR_TOAST: &str = "Connection error";

/// Opaque server-issued job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation counter for requests and jobs started by this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticket(u64);

impl Ticket {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Starting,
    Analyzing,
    Downloading,
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Starting => Some("Starting..."),
            Self::Analyzing => Some("Analyzing media..."),
            Self::Downloading => Some("Downloading..."),
            Self::Processing => Some("Processing file..."),
            Self::Complete => Some("Complete!"),
            Self::Error => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub id: JobId,
    pub status: JobStatus,
    pub percent: u8,
    pub error_message: Option<String>,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadState {
    #[default]
    Idle,
    Requesting,
    Subscribed,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

/// A user-facing notification (rendered as a toast).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateJob {
        ticket: Ticket,
        request: DownloadRequest,
    },
    OpenSubscription {
        ticket: Ticket,
        job_id: JobId,
    },
    CloseSubscription,
    RetrieveFile {
        ticket: Ticket,
        job_id: JobId,
        delay: Duration,
    },
    Settle {
        ticket: Ticket,
        delay: Duration,
    },
    Notify(Notice),
}

#[derive(Debug, Default)]
pub struct DownloadOrchestrator {
    state: DownloadState,
    ticket: Ticket,
    job: Option<DownloadJob>,
    percent: u8,
    phase_label: Option<&'static str>,
    error: Option<String>,
    subscription_open: bool,
    retrieval_triggered: bool,
}

impl DownloadOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub fn job(&self) -> Option<&DownloadJob> {
        self.job.as_ref()
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn phase_label(&self) -> Option<&'static str> {
        self.phase_label
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn subscription_open(&self) -> bool {
        self.subscription_open
    }

    /// Whether the progress bar is on screen. It stays up for
    /// [`SETTLE_DELAY`] after completion.
    pub fn shows_progress(&self) -> bool {
        match self.state {
            DownloadState::Requesting | DownloadState::Subscribed => true,
            DownloadState::Complete => self.phase_label.is_some(),
            DownloadState::Idle | DownloadState::Failed => false,
        }
    }

    /// User confirmed a format. No-op without a URL or a format.
    pub fn start(
        &mut self,
        url: &str,
        platform: Platform,
        format: Option<&FormatOption>,
    ) -> Vec<Effect> {
        let Some(format) = format else {
            return Vec::new();
        };
        if url.is_empty() {
            return Vec::new();
        }

        let mut effects = self.close_subscription();
        self.ticket = self.ticket.next();
        self.state = DownloadState::Requesting;
        self.job = None;
        self.percent = 0;
        self.phase_label = JobStatus::Starting.label();
        self.error = None;
        self.retrieval_triggered = false;

        info!(%platform, format = format.id, "requesting download job");
        effects.push(Effect::CreateJob {
            ticket: self.ticket,
            request: DownloadRequest {
                url: url.to_string(),
                platform,
                format: format.selector.to_string(),
                format_id: format.id.to_string(),
            },
        });
        effects
    }

    pub fn accepted(&mut self, ticket: Ticket, job_id: JobId) -> Vec<Effect> {
        if !self.is_current(ticket, DownloadState::Requesting) {
            debug!(%job_id, "ignoring acceptance for a superseded request");
            return Vec::new();
        }
        info!(%job_id, "download job accepted");

        let mut effects = self.close_subscription();
        self.job = Some(DownloadJob {
            id: job_id.clone(),
            status: JobStatus::Starting,
            percent: 0,
            error_message: None,
            accepted_at: Utc::now(),
        });
        self.state = DownloadState::Subscribed;
        self.subscription_open = true;
        effects.push(Effect::OpenSubscription { ticket, job_id });
        effects
    }

    pub fn rejected(&mut self, ticket: Ticket, err: &ClientError) -> Vec<Effect> {
        if !self.is_current(ticket, DownloadState::Requesting) {
            return Vec::new();
        }
        let message = err.user_message();
        warn!(%message, "download request rejected");
        self.fail(message.clone());
        self.percent = 0;
        vec![Effect::Notify(Notice::error(message))]
    }

    pub fn progress(&mut self, ticket: Ticket, event: &ProgressEvent) -> Vec<Effect> {
        if !self.is_current(ticket, DownloadState::Subscribed) {
            debug!("dropping progress event outside an active subscription");
            return Vec::new();
        }

        if let Some(percent) = event.percent.filter(|p| p.is_finite() && (0.0..=100.0).contains(p)) {
            self.percent = percent.round() as u8;
            if let Some(job) = self.job.as_mut() {
                job.percent = self.percent;
            }
        }

        match event.status {
            Some(ProgressStatus::Analyzing) => self.set_status(JobStatus::Analyzing),
            Some(ProgressStatus::Downloading) => self.set_status(JobStatus::Downloading),
            Some(ProgressStatus::Processing) => self.set_status(JobStatus::Processing),
            Some(ProgressStatus::Complete) => return self.complete(ticket),
            Some(ProgressStatus::Error) => {
                let err = ClientError::ServerReported(
                    event
                        .error
                        .clone()
                        .filter(|message| !message.trim().is_empty())
                        .unwrap_or_else(|| DOWNLOAD_FALLBACK_MESSAGE.to_string()),
                );
                let message = err.user_message();
                warn!(%message, "server reported download error");
                let mut effects = self.close_subscription();
                self.fail(message.clone());
                effects.push(Effect::Notify(Notice::error(message)));
                return effects;
            }
            None => {}
        }
        Vec::new()
    }

    /// The subscription broke or ended before a terminal event.
    pub fn stream_failed(&mut self, ticket: Ticket, err: &ClientError) -> Vec<Effect> {
        if !self.is_current(ticket, DownloadState::Subscribed) {
            return Vec::new();
        }
        warn!(cause = %describe(err), "progress subscription lost");
        let mut effects = self.close_subscription();
        self.fail(CONNECTION_LOST_MESSAGE.to_string());
        effects.push(Effect::Notify(Notice::error(CONNECTION_ERROR_TOAST)));
        effects
    }

    /// Clears the finished progress bar; the job record stays.
    pub fn settle(&mut self, ticket: Ticket) {
        if self.is_current(ticket, DownloadState::Complete) {
            self.percent = 0;
            self.phase_label = None;
        }
    }

    pub fn reset(&mut self) -> Vec<Effect> {
        if self.subscription_open {
            debug!("reset while subscribed");
        }
        self.subscription_open = false;
        self.ticket = self.ticket.next();
        self.state = DownloadState::Idle;
        self.job = None;
        self.percent = 0;
        self.phase_label = None;
        self.error = None;
        self.retrieval_triggered = false;
        vec![Effect::CloseSubscription]
    }

    fn complete(&mut self, ticket: Ticket) -> Vec<Effect> {
        let mut effects = self.close_subscription();
        self.state = DownloadState::Complete;
        self.set_status(JobStatus::Complete);
        if self.retrieval_triggered {
            return effects;
        }
        self.retrieval_triggered = true;

        let Some(job_id) = self.job.as_ref().map(|job| job.id.clone()) else {
            return effects;
        };
        info!(%job_id, "download complete");
        effects.push(Effect::RetrieveFile {
            ticket,
            job_id,
            delay: RETRIEVAL_DELAY,
        });
        effects.push(Effect::Notify(Notice::success(DOWNLOAD_COMPLETED_MESSAGE)));
        effects.push(Effect::Settle {
            ticket,
            delay: SETTLE_DELAY,
        });
        effects
    }

    fn set_status(&mut self, status: JobStatus) {
        self.phase_label = status.label();
        if let Some(job) = self.job.as_mut() {
            job.status = status;
        }
    }

    fn fail(&mut self, message: String) {
        self.state = DownloadState::Failed;
        self.phase_label = None;
        if let Some(job) = self.job.as_mut() {
            job.status = JobStatus::Error;
            job.error_message = Some(message.clone());
        }
        self.error = Some(message);
    }

    fn close_subscription(&mut self) -> Vec<Effect> {
        if std::mem::take(&mut self.subscription_open) {
            vec![Effect::CloseSubscription]
        } else {
            Vec::new()
        }
    }

    fn is_current(&self, ticket: Ticket, state: DownloadState) -> bool {
        ticket == self.ticket && self.state == state
    }
}

fn describe(err: &ClientError) -> String {
    match err {
        ClientError::Transport(cause) => cause.clone(),
        other => other.to_string(),
    }
}
