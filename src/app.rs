#![forbid(unsafe_code)]

//! Application state behind the view.
//!
//! `App` owns the form (platform, URL, metadata, chosen format), the
//! download orchestrator and the UI chrome (error panel, toast, modal).
//! User input arrives as [`Intent`]s and service results through the
//! `*_loaded`/`*_created` style callbacks. Every method returns the
//! [`Command`]s the session has to run; `App` itself never does I/O.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::api::RetrievedFile;
use crate::error::ClientError;
use crate::metadata::MediaMetadata;
use crate::orchestrator::{DownloadOrchestrator, Effect, JobId, Notice, Ticket};
use crate::platform::{FormatOption, Platform, PlatformProfile};
use crate::progress::ProgressEvent;
use crate::validate::{self, UrlValidity};

pub const TOAST_LIFETIME: Duration = Duration::from_secs(4);
pub const ANALYZE_SUCCESS_MESSAGE: &str = "Media analyzed successfully!";
pub const CLIPBOARD_FAILURE_MESSAGE: &str = "Failed to read clipboard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modal {
    About,
    HowItWorks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub notice: Notice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectPlatform(Platform),
    /// Address-bar style deep link, e.g. `#/tiktok`.
    Navigate(String),
    EditUrl(String),
    Paste(String),
    PasteFailed,
    Analyze,
    SelectFormat(String),
    Download,
    Reset,
    DismissError,
    DismissToast,
    OpenModal(Modal),
    CloseModal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    FetchInfo {
        ticket: Ticket,
        url: String,
        platform: Platform,
    },
    Download(Effect),
    ExpireToast {
        id: u64,
        delay: Duration,
    },
}

#[derive(Debug, Default)]
pub struct App {
    platform: Platform,
    url: String,
    validity: UrlValidity,
    analyzing: bool,
    analysis: Ticket,
    metadata: Option<MediaMetadata>,
    selected_format: Option<&'static FormatOption>,
    download: DownloadOrchestrator,
    error: Option<String>,
    toast: Option<Toast>,
    next_toast_id: u64,
    modal: Option<Modal>,
    last_file: Option<RetrievedFile>,
}

impl App {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            ..Self::default()
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn profile(&self) -> &'static PlatformProfile {
        self.platform.profile()
    }

    pub fn route(&self) -> String {
        self.platform.fragment()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn validity(&self) -> UrlValidity {
        self.validity
    }

    pub fn is_analyzing(&self) -> bool {
        self.analyzing
    }

    pub fn can_analyze(&self) -> bool {
        self.validity.is_valid() && !self.analyzing
    }

    pub fn metadata(&self) -> Option<&MediaMetadata> {
        self.metadata.as_ref()
    }

    pub fn selected_format(&self) -> Option<&'static FormatOption> {
        self.selected_format
    }

    /// Format choices for the active platform only.
    pub fn format_options(&self) -> &'static [FormatOption] {
        self.profile().formats
    }

    pub fn download(&self) -> &DownloadOrchestrator {
        &self.download
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn toast(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }

    pub fn modal(&self) -> Option<Modal> {
        self.modal
    }

    pub fn last_file(&self) -> Option<&RetrievedFile> {
        self.last_file.as_ref()
    }

    pub fn apply(&mut self, intent: Intent) -> Vec<Command> {
        match intent {
            Intent::SelectPlatform(platform) => self.switch_platform(platform),
            Intent::Navigate(fragment) => match Platform::from_fragment(&fragment) {
                Some(platform) => self.switch_platform(platform),
                None => {
                    debug!(%fragment, "ignoring unknown route");
                    Vec::new()
                }
            },
            Intent::EditUrl(value) | Intent::Paste(value) => {
                self.set_url(value);
                Vec::new()
            }
            Intent::PasteFailed => self.notify(Notice::error(CLIPBOARD_FAILURE_MESSAGE)),
            Intent::Analyze => self.analyze(),
            Intent::SelectFormat(id) => {
                match self.profile().format(&id) {
                    Some(option) => self.selected_format = Some(option),
                    None => warn!(format = %id, platform = %self.platform, "unknown format"),
                }
                Vec::new()
            }
            Intent::Download => {
                let effects = self
                    .download
                    .start(&self.url, self.platform, self.selected_format);
                if !effects.is_empty() {
                    self.error = None;
                }
                self.run_effects(effects)
            }
            Intent::Reset => self.reset(),
            Intent::DismissError => {
                self.error = None;
                self.download.clear_error();
                Vec::new()
            }
            Intent::DismissToast => {
                self.toast = None;
                Vec::new()
            }
            Intent::OpenModal(modal) => {
                self.modal = Some(modal);
                Vec::new()
            }
            Intent::CloseModal => {
                self.modal = None;
                Vec::new()
            }
        }
    }

    pub fn info_loaded(
        &mut self,
        ticket: Ticket,
        result: Result<MediaMetadata, ClientError>,
    ) -> Vec<Command> {
        if ticket != self.analysis || !self.analyzing {
            debug!("discarding stale analysis result");
            return Vec::new();
        }
        self.analyzing = false;
        match result {
            Ok(metadata) => {
                info!(title = %metadata.title, "media analyzed");
                self.metadata = Some(metadata);
                self.selected_format = Some(self.profile().default_format());
                self.notify(Notice::success(ANALYZE_SUCCESS_MESSAGE))
            }
            Err(err) => {
                let message = err.user_message();
                warn!(%message, "analysis failed");
                self.metadata = None;
                self.selected_format = None;
                self.error = Some(message.clone());
                self.notify(Notice::error(message))
            }
        }
    }

    pub fn job_created(&mut self, ticket: Ticket, result: Result<JobId, ClientError>) -> Vec<Command> {
        let effects = match result {
            Ok(job_id) => self.download.accepted(ticket, job_id),
            Err(err) => self.download.rejected(ticket, &err),
        };
        self.run_effects(effects)
    }

    pub fn progress(&mut self, ticket: Ticket, event: &ProgressEvent) -> Vec<Command> {
        let effects = self.download.progress(ticket, event);
        self.run_effects(effects)
    }

    pub fn stream_failed(&mut self, ticket: Ticket, err: &ClientError) -> Vec<Command> {
        let effects = self.download.stream_failed(ticket, err);
        self.run_effects(effects)
    }

    pub fn settle(&mut self, ticket: Ticket) {
        self.download.settle(ticket);
    }

    pub fn file_retrieved(
        &mut self,
        ticket: Ticket,
        result: Result<RetrievedFile, ClientError>,
    ) -> Vec<Command> {
        match result {
            Ok(file) => {
                if ticket == self.download.ticket() {
                    self.last_file = Some(file);
                } else {
                    debug!(path = %file.path.display(), "file saved for a superseded download");
                }
                Vec::new()
            }
            Err(err) => {
                let message = err.user_message();
                warn!(%message, "file retrieval failed");
                if ticket == self.download.ticket() {
                    self.error = Some(message.clone());
                }
                self.notify(Notice::error(message))
            }
        }
    }

    pub fn expire_toast(&mut self, id: u64) {
        if self.toast.as_ref().is_some_and(|toast| toast.id == id) {
            self.toast = None;
        }
    }

    fn set_url(&mut self, value: String) {
        self.validity = validate::check(self.platform, &value);
        self.url = value;
        self.error = None;
        self.metadata = None;
        self.selected_format = None;
        self.cancel_analysis();
    }

    fn analyze(&mut self) -> Vec<Command> {
        if !self.can_analyze() {
            return Vec::new();
        }
        self.analysis = self.analysis.next();
        self.analyzing = true;
        self.error = None;
        vec![Command::FetchInfo {
            ticket: self.analysis,
            url: self.url.clone(),
            platform: self.platform,
        }]
    }

    fn switch_platform(&mut self, platform: Platform) -> Vec<Command> {
        info!(%platform, "switching platform");
        self.platform = platform;
        self.reset()
    }

    fn reset(&mut self) -> Vec<Command> {
        self.url.clear();
        self.validity = UrlValidity::Unknown;
        self.metadata = None;
        self.selected_format = None;
        self.error = None;
        self.last_file = None;
        self.cancel_analysis();
        let effects = self.download.reset();
        self.run_effects(effects)
    }

    fn cancel_analysis(&mut self) {
        if self.analyzing {
            self.analysis = self.analysis.next();
            self.analyzing = false;
        }
    }

    fn notify(&mut self, notice: Notice) -> Vec<Command> {
        self.next_toast_id += 1;
        let id = self.next_toast_id;
        self.toast = Some(Toast { id, notice });
        vec![Command::ExpireToast {
            id,
            delay: TOAST_LIFETIME,
        }]
    }

    /// Turns notifications into toasts, mirrors orchestrator errors into
    /// the error panel and forwards the rest to the session.
    fn run_effects(&mut self, effects: Vec<Effect>) -> Vec<Command> {
        if let Some(message) = self.download.error() {
            self.error = Some(message.to_string());
        }
        let mut commands = Vec::with_capacity(effects.len());
        for effect in effects {
            match effect {
                Effect::Notify(notice) => commands.extend(self.notify(notice)),
                other => commands.push(Command::Download(other)),
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{DownloadState, NoticeKind};
    use crate::progress::ProgressStatus;

    const URL: &str = "https://www.youtube.com/watch?v=abc";

    fn sample_metadata() -> MediaMetadata {
        MediaMetadata {
            title: "Clip".into(),
            thumbnail_url: None,
            duration_seconds: Some(45.0),
            view_count: Some(950),
            uploader: None,
        }
    }

    fn analyzed(app: &mut App) {
        app.apply(Intent::EditUrl(URL.into()));
        let commands = app.apply(Intent::Analyze);
        let Command::FetchInfo { ticket, .. } = commands[0].clone() else {
            panic!("expected fetch");
        };
        app.info_loaded(ticket, Ok(sample_metadata()));
    }

    fn create_job_ticket(commands: &[Command]) -> Ticket {
        commands
            .iter()
            .find_map(|command| match command {
                Command::Download(Effect::CreateJob { ticket, .. }) => Some(*ticket),
                _ => None,
            })
            .expect("create job command")
    }

    #[test]
    fn editing_url_updates_validity_tri_state() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::EditUrl("https://vimeo.com/1".into()));
        assert_eq!(app.validity(), UrlValidity::Invalid);
        assert!(!app.can_analyze());
        app.apply(Intent::EditUrl(String::new()));
        assert_eq!(app.validity(), UrlValidity::Unknown);
        app.apply(Intent::Paste(URL.into()));
        assert_eq!(app.validity(), UrlValidity::Valid);
        assert!(app.can_analyze());
    }

    #[test]
    fn analyze_is_a_noop_for_invalid_urls() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::EditUrl("nope".into()));
        assert!(app.apply(Intent::Analyze).is_empty());
        assert!(!app.is_analyzing());
    }

    #[test]
    fn successful_analysis_selects_first_format() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        assert_eq!(app.metadata().unwrap().title, "Clip");
        assert_eq!(app.selected_format().unwrap().id, "best");
        assert_eq!(app.toast().unwrap().notice, Notice::success(ANALYZE_SUCCESS_MESSAGE));
        assert!(!app.is_analyzing());
    }

    #[test]
    fn failed_analysis_clears_metadata_and_shows_error() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        app.apply(Intent::EditUrl(URL.into()));
        let commands = app.apply(Intent::Analyze);
        let Command::FetchInfo { ticket, .. } = commands[0].clone() else {
            panic!("expected fetch");
        };
        app.info_loaded(
            ticket,
            Err(ClientError::RequestRejected {
                status: 404,
                message: "Video not found".into(),
            }),
        );
        assert!(app.metadata().is_none());
        assert_eq!(app.error(), Some("Video not found"));
        assert_eq!(app.toast().unwrap().notice.kind, NoticeKind::Error);
        assert_eq!(app.url(), URL);
    }

    #[test]
    fn analysis_result_after_url_edit_is_discarded() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::EditUrl(URL.into()));
        let commands = app.apply(Intent::Analyze);
        let Command::FetchInfo { ticket, .. } = commands[0].clone() else {
            panic!("expected fetch");
        };
        app.apply(Intent::EditUrl("https://youtu.be/other".into()));
        assert!(app.info_loaded(ticket, Ok(sample_metadata())).is_empty());
        assert!(app.metadata().is_none());
    }

    #[test]
    fn format_selection_is_limited_to_active_platform() {
        let mut app = App::new(Platform::TikTok);
        app.apply(Intent::SelectFormat("1080p".into()));
        assert!(app.selected_format().is_none());
        app.apply(Intent::SelectFormat("best".into()));
        assert_eq!(app.selected_format().unwrap().selector, "best");
        assert_eq!(app.format_options().len(), 1);
    }

    #[test]
    fn download_without_format_does_nothing() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::EditUrl(URL.into()));
        assert!(app.apply(Intent::Download).is_empty());
        assert_eq!(app.download().state(), DownloadState::Idle);
    }

    #[test]
    fn rejected_download_fills_error_panel() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        let ticket = create_job_ticket(&app.apply(Intent::Download));
        let commands = app.job_created(
            ticket,
            Err(ClientError::RequestRejected {
                status: 400,
                message: "Unsupported URL".into(),
            }),
        );
        assert!(commands
            .iter()
            .all(|command| !matches!(command, Command::Download(Effect::OpenSubscription { .. }))));
        assert_eq!(app.error(), Some("Unsupported URL"));
        assert_eq!(app.toast().unwrap().notice, Notice::error("Unsupported URL"));

        app.apply(Intent::DismissError);
        assert!(app.error().is_none());
        assert!(app.download().error().is_none());
    }

    #[test]
    fn switching_platform_clears_everything() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        let ticket = create_job_ticket(&app.apply(Intent::Download));
        app.job_created(ticket, Ok(JobId::from("j1")));
        app.progress(ticket, &ProgressEvent::default().with_percent(30.0));

        let commands = app.apply(Intent::SelectPlatform(Platform::Instagram));
        assert_eq!(commands, vec![Command::Download(Effect::CloseSubscription)]);
        assert_eq!(app.platform(), Platform::Instagram);
        assert_eq!(app.url(), "");
        assert_eq!(app.validity(), UrlValidity::Unknown);
        assert!(app.metadata().is_none());
        assert!(app.selected_format().is_none());
        assert!(app.error().is_none());
        assert_eq!(app.download().state(), DownloadState::Idle);
        assert_eq!(app.download().percent(), 0);
        assert!(app.download().job().is_none());
    }

    #[test]
    fn deep_link_switches_only_for_known_routes() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::EditUrl(URL.into()));
        assert!(app.apply(Intent::Navigate("#/faq".into())).is_empty());
        assert_eq!(app.platform(), Platform::YouTube);
        assert_eq!(app.url(), URL);

        app.apply(Intent::Navigate("#/pinterest".into()));
        assert_eq!(app.platform(), Platform::Pinterest);
        assert_eq!(app.route(), "#/pinterest");
        assert_eq!(app.url(), "");
    }

    #[test]
    fn server_error_event_populates_error_panel() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        let ticket = create_job_ticket(&app.apply(Intent::Download));
        app.job_created(ticket, Ok(JobId::from("j1")));
        app.progress(
            ticket,
            &ProgressEvent::status(ProgressStatus::Error).with_error("Video unavailable"),
        );
        assert_eq!(app.error(), Some("Video unavailable"));
    }

    #[test]
    fn toast_expiry_only_removes_matching_toast() {
        let mut app = App::new(Platform::YouTube);
        let first = app.apply(Intent::PasteFailed);
        let Command::ExpireToast { id: first_id, delay } = first[0] else {
            panic!("expected toast expiry");
        };
        assert_eq!(delay, TOAST_LIFETIME);
        analyzed(&mut app);
        app.expire_toast(first_id);
        assert_eq!(app.toast().unwrap().notice.message, ANALYZE_SUCCESS_MESSAGE);
        let current = app.toast().unwrap().id;
        app.expire_toast(current);
        assert!(app.toast().is_none());
    }

    fn saved_file() -> RetrievedFile {
        RetrievedFile {
            path: std::path::PathBuf::from("/tmp/clip.mp4"),
            bytes: 4,
        }
    }

    fn completed(app: &mut App) -> Ticket {
        analyzed(app);
        let ticket = create_job_ticket(&app.apply(Intent::Download));
        app.job_created(ticket, Ok(JobId::from("j1")));
        app.progress(ticket, &ProgressEvent::status(ProgressStatus::Complete));
        ticket
    }

    #[test]
    fn reset_forgets_the_saved_file() {
        let mut app = App::new(Platform::YouTube);
        let ticket = completed(&mut app);
        app.file_retrieved(ticket, Ok(saved_file()));
        assert_eq!(app.last_file(), Some(&saved_file()));

        app.apply(Intent::Reset);
        assert!(app.last_file().is_none());

        let ticket = completed(&mut app);
        app.file_retrieved(ticket, Ok(saved_file()));
        app.apply(Intent::SelectPlatform(Platform::TikTok));
        assert!(app.last_file().is_none());
    }

    #[test]
    fn retrieval_landing_after_reset_is_not_shown() {
        let mut app = App::new(Platform::YouTube);
        let ticket = completed(&mut app);
        app.apply(Intent::Reset);
        assert!(app.file_retrieved(ticket, Ok(saved_file())).is_empty());
        assert!(app.last_file().is_none());
    }

    #[test]
    fn editing_url_after_analysis_requires_a_new_analysis() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        assert!(app.selected_format().is_some());

        app.apply(Intent::EditUrl("https://vimeo.com/1".into()));
        assert!(app.selected_format().is_none());
        assert!(app.apply(Intent::Download).is_empty());
        assert_eq!(app.download().state(), DownloadState::Idle);
    }

    #[test]
    fn failed_analysis_drops_the_format_choice() {
        let mut app = App::new(Platform::YouTube);
        analyzed(&mut app);
        app.apply(Intent::SelectFormat("720p".into()));
        let commands = app.apply(Intent::Analyze);
        let Command::FetchInfo { ticket, .. } = commands[0].clone() else {
            panic!("expected fetch");
        };
        app.info_loaded(ticket, Err(ClientError::Transport("refused".into())));
        assert!(app.selected_format().is_none());
        assert!(app.apply(Intent::Download).is_empty());
    }

    #[test]
    fn modals_open_and_close() {
        let mut app = App::new(Platform::YouTube);
        app.apply(Intent::OpenModal(Modal::HowItWorks));
        assert_eq!(app.modal(), Some(Modal::HowItWorks));
        app.apply(Intent::CloseModal);
        assert!(app.modal().is_none());
    }
}
