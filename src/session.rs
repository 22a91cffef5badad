#![forbid(unsafe_code)]

//! Single-threaded event loop driving an [`App`] against a [`MediaService`].
//!
//! Network calls and timers run as tokio tasks, but their results come back
//! through one inbox and are applied in order on the loop, so the state is
//! only ever touched from one place. The session also owns the one live
//! progress subscription; nothing else can open or close it.

use std::{future, sync::Arc};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::api::{MediaService, RetrievedFile};
use crate::app::{App, Command, Intent};
use crate::error::ClientError;
use crate::metadata::MediaMetadata;
use crate::orchestrator::{Effect, JobId, Ticket};
use crate::progress::{ProgressItem, Subscription};

#[derive(Debug)]
enum Message {
    InfoLoaded {
        ticket: Ticket,
        result: Result<MediaMetadata, ClientError>,
    },
    JobCreated {
        ticket: Ticket,
        result: Result<JobId, ClientError>,
    },
    FileRetrieved {
        ticket: Ticket,
        result: Result<RetrievedFile, ClientError>,
    },
    SettleDue {
        ticket: Ticket,
    },
    ToastExpired {
        id: u64,
    },
}

impl Message {
    /// Toast expiry is cosmetic and does not keep the session busy.
    fn tracks_work(&self) -> bool {
        !matches!(self, Self::ToastExpired { .. })
    }
}

enum Wake {
    Message(Message),
    Progress(Ticket, Option<ProgressItem>),
}

struct ActiveSubscription {
    ticket: Ticket,
    subscription: Subscription,
}

pub struct Session {
    app: App,
    service: Arc<dyn MediaService>,
    inbox_tx: mpsc::UnboundedSender<Message>,
    inbox: mpsc::UnboundedReceiver<Message>,
    active: Option<ActiveSubscription>,
    pending: usize,
}

impl Session {
    pub fn new(app: App, service: Arc<dyn MediaService>) -> Self {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        Self {
            app,
            service,
            inbox_tx,
            inbox,
            active: None,
            pending: 0,
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn has_open_subscription(&self) -> bool {
        self.active.is_some()
    }

    /// No request, timer or subscription is outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending == 0 && self.active.is_none()
    }

    pub fn dispatch(&mut self, intent: Intent) {
        debug!(?intent, "dispatch");
        let commands = self.app.apply(intent);
        self.execute(commands);
    }

    /// Waits for the next message or progress event and applies it.
    pub async fn step(&mut self) {
        let wake = tokio::select! {
            message = self.inbox.recv() => match message {
                Some(message) => Wake::Message(message),
                None => return,
            },
            (ticket, item) = next_progress(&mut self.active) => Wake::Progress(ticket, item),
        };

        match wake {
            Wake::Message(message) => self.handle_message(message),
            Wake::Progress(ticket, Some(Ok(event))) => {
                let commands = self.app.progress(ticket, &event);
                self.execute(commands);
            }
            Wake::Progress(ticket, Some(Err(err))) => {
                let commands = self.app.stream_failed(ticket, &err);
                self.execute(commands);
                self.drop_subscription(ticket);
            }
            Wake::Progress(ticket, None) => {
                let err = ClientError::Transport("progress stream ended".into());
                let commands = self.app.stream_failed(ticket, &err);
                self.execute(commands);
                self.drop_subscription(ticket);
            }
        }
    }

    /// Steps until idle, calling `on_change` after every applied update.
    pub async fn run_until_idle(&mut self, mut on_change: impl FnMut(&App)) {
        while !self.is_idle() {
            self.step().await;
            on_change(&self.app);
        }
    }

    fn handle_message(&mut self, message: Message) {
        if message.tracks_work() {
            self.pending = self.pending.saturating_sub(1);
        }
        let commands = match message {
            Message::InfoLoaded { ticket, result } => self.app.info_loaded(ticket, result),
            Message::JobCreated { ticket, result } => self.app.job_created(ticket, result),
            Message::FileRetrieved { ticket, result } => self.app.file_retrieved(ticket, result),
            Message::SettleDue { ticket } => {
                self.app.settle(ticket);
                Vec::new()
            }
            Message::ToastExpired { id } => {
                self.app.expire_toast(id);
                Vec::new()
            }
        };
        self.execute(commands);
    }

    fn execute(&mut self, commands: Vec<Command>) {
        for command in commands {
            match command {
                Command::FetchInfo {
                    ticket,
                    url,
                    platform,
                } => {
                    let service = Arc::clone(&self.service);
                    self.spawn_work(async move {
                        let result = service.fetch_info(&url, platform).await;
                        Message::InfoLoaded { ticket, result }
                    });
                }
                Command::ExpireToast { id, delay } => {
                    let inbox = self.inbox_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = inbox.send(Message::ToastExpired { id });
                    });
                }
                Command::Download(effect) => self.run_effect(effect),
            }
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::CreateJob { ticket, request } => {
                let service = Arc::clone(&self.service);
                self.spawn_work(async move {
                    let result = service.create_download(&request).await;
                    Message::JobCreated { ticket, result }
                });
            }
            Effect::OpenSubscription { ticket, job_id } => {
                if let Some(previous) = self.active.take() {
                    warn!(job = %previous.subscription.job_id(), "closing stale subscription before opening a new one");
                    close(previous);
                }
                let subscription = self.service.subscribe(&job_id);
                self.active = Some(ActiveSubscription {
                    ticket,
                    subscription,
                });
            }
            Effect::CloseSubscription => {
                if let Some(active) = self.active.take() {
                    close(active);
                }
            }
            Effect::RetrieveFile {
                ticket,
                job_id,
                delay,
            } => {
                let service = Arc::clone(&self.service);
                self.spawn_work(async move {
                    tokio::time::sleep(delay).await;
                    let result = service.retrieve_file(&job_id).await;
                    Message::FileRetrieved { ticket, result }
                });
            }
            Effect::Settle { ticket, delay } => {
                self.spawn_work(async move {
                    tokio::time::sleep(delay).await;
                    Message::SettleDue { ticket }
                });
            }
            Effect::Notify(notice) => {
                debug!(?notice, "notification without a toast slot");
            }
        }
    }

    fn spawn_work<F>(&mut self, work: F)
    where
        F: Future<Output = Message> + Send + 'static,
    {
        self.pending += 1;
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            let message = work.await;
            let _ = inbox.send(message);
        });
    }

    /// A finished or failed stream must not be polled again.
    fn drop_subscription(&mut self, ticket: Ticket) {
        if self.active.as_ref().is_some_and(|active| active.ticket == ticket) {
            if let Some(active) = self.active.take() {
                close(active);
            }
        }
    }
}

fn close(mut active: ActiveSubscription) {
    active.subscription.close();
}

async fn next_progress(active: &mut Option<ActiveSubscription>) -> (Ticket, Option<ProgressItem>) {
    match active {
        Some(active) => (active.ticket, active.subscription.next().await),
        None => future::pending().await,
    }
}
