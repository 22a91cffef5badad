#![forbid(unsafe_code)]

//! Terminal front end: analyzes a media URL and optionally downloads it,
//! reprinting the screen whenever the state changes.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use mediagrab::{
    api::HttpService,
    app::{App, Intent},
    config::{SettingsOverrides, resolve_settings},
    error::ClientError,
    platform::Platform,
    session::Session,
    view,
};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "mediagrab=info";

#[derive(Parser, Debug)]
#[command(author, version, about = "Download videos from YouTube, TikTok, Pinterest and Instagram", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,

    /// Platform to validate against; detected from the URL when omitted.
    #[arg(long, global = true)]
    platform: Option<Platform>,

    /// Deep link fragment such as `#/tiktok`.
    #[arg(long, global = true)]
    route: Option<String>,

    /// Service API base, e.g. `http://localhost:3001/api`.
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Directory the finished file is saved into.
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// List supported platforms and their formats.
    Platforms,
    /// Show title, uploader, duration and views for a URL.
    Info { url: String },
    /// Analyze and download a URL.
    Download {
        url: String,
        /// Format id, e.g. `720p` or `audio`. Defaults to the first option.
        #[arg(short, long)]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let (url, format) = match &cli.command {
        CliCommand::Platforms => {
            print!("{}", view::render_platforms());
            return Ok(());
        }
        CliCommand::Info { url } => (url.clone(), None),
        CliCommand::Download { url, format } => (url.clone(), Some(format.clone())),
    };

    let settings = resolve_settings(SettingsOverrides {
        api_base: cli.api_base.clone(),
        download_dir: cli.output.clone(),
        timeout_secs: cli.timeout,
        env_path: cli.env_file.clone(),
        config_path: cli.config.clone(),
    })
    .context("loading settings")?;
    info!(api = %settings.api_base, dir = %settings.download_dir.display(), "settings resolved");

    let service = Arc::new(HttpService::new(&settings));
    let mut session = Session::new(App::default(), service);
    select_platform(&mut session, &cli, &url)?;

    session.dispatch(Intent::EditUrl(url));
    if !session.app().can_analyze() {
        return Err(ClientError::Validation(view::invalid_url_hint(session.app().platform())).into());
    }

    session.dispatch(Intent::Analyze);
    drive(&mut session).await?;
    if session.app().metadata().is_none() {
        bail!(
            session
                .app()
                .error()
                .unwrap_or("analysis produced no metadata")
                .to_string()
        );
    }

    let Some(format) = format else {
        return Ok(());
    };
    if let Some(id) = format {
        let profile = session.app().profile();
        if profile.format(&id).is_none() {
            let known: Vec<&str> = profile.formats.iter().map(|option| option.id).collect();
            bail!(
                "{} has no format '{id}' (expected one of {})",
                profile.display_name,
                known.join(", ")
            );
        }
        session.dispatch(Intent::SelectFormat(id));
    }

    session.dispatch(Intent::Download);
    drive(&mut session).await?;

    if let Some(error) = session.app().error() {
        bail!(error.to_string());
    }
    let file = session
        .app()
        .last_file()
        .ok_or_else(|| anyhow!("download finished without a file"))?;
    info!(path = %file.path.display(), bytes = file.bytes, "saved");
    Ok(())
}

fn select_platform(session: &mut Session, cli: &Cli, url: &str) -> Result<()> {
    if let Some(route) = &cli.route {
        let platform = Platform::from_fragment(route)
            .ok_or_else(|| anyhow!("unknown route '{route}'"))?;
        session.dispatch(Intent::Navigate(platform.fragment()));
        return Ok(());
    }
    let platform = match cli.platform {
        Some(platform) => platform,
        None => Platform::detect(url).unwrap_or_else(|| {
            warn!("could not detect the platform, assuming {}", Platform::default());
            Platform::default()
        }),
    };
    session.dispatch(Intent::SelectPlatform(platform));
    Ok(())
}

/// Runs the session until nothing is pending, printing each new screen.
/// Ctrl+C resets the flow and aborts.
async fn drive(session: &mut Session) -> Result<()> {
    let mut last = String::new();
    print_if_changed(session.app(), &mut last);

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while !session.is_idle() {
        tokio::select! {
            _ = session.step() => print_if_changed(session.app(), &mut last),
            result = &mut ctrl_c => {
                if let Err(err) = result {
                    warn!(%err, "failed to listen for Ctrl+C");
                }
                session.dispatch(Intent::Reset);
                bail!("cancelled");
            }
        }
    }
    Ok(())
}

fn print_if_changed(app: &App, last: &mut String) {
    let screen = view::render(app);
    if screen != *last {
        println!("{screen}");
        *last = screen;
    }
}
