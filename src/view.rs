#![forbid(unsafe_code)]

//! Plain-text rendering of the application state.
//!
//! Rendering is a pure function of [`App`]; the binary reprints it after
//! every state change.

use std::fmt::Write;

use crate::app::{App, Modal};
use crate::orchestrator::NoticeKind;
use crate::platform::Platform;
use crate::validate::UrlValidity;

const BAR_WIDTH: usize = 30;

pub const VALID_URL_HINT: &str = "✓ Valid URL detected";

const ABOUT_TEXT: &str = "\
MediaGrab is a free, fast, and secure video downloader supporting multiple platforms including YouTube, TikTok, Instagram, and Pinterest.
Downloads come without watermarks or ads.
Legal notice: always respect copyright laws and platform terms of service. Only download content you have rights to use.";

const HOW_IT_WORKS_TEXT: &str = "\
1. Copy URL: go to YouTube, TikTok, Instagram, or Pinterest and copy the video URL
2. Paste URL: paste it into the downloader
3. Select Quality: choose your preferred video quality or audio format
4. Download: start the download and save the file
Supported: YouTube videos in 1080p, 720p and MP3 audio; TikTok videos without watermark; Instagram photos, videos and reels; Pinterest images and videos in original quality.";

pub fn invalid_url_hint(platform: Platform) -> String {
    format!("Please enter a valid {} URL", platform.display_name())
}

/// Full screen render.
pub fn render(app: &App) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_screen(&mut out, app);
    out
}

/// One line per platform, used by `mediagrab platforms`.
pub fn render_platforms() -> String {
    let mut out = String::new();
    for platform in Platform::ALL {
        let profile = platform.profile();
        let formats: Vec<&str> = profile.formats.iter().map(|option| option.id).collect();
        let _ = writeln!(
            out,
            "{:<10} {:<12} formats: {}",
            profile.key,
            platform.fragment(),
            formats.join(", ")
        );
        let _ = writeln!(out, "           {}", profile.description);
    }
    out
}

pub fn progress_bar(percent: u8) -> String {
    let filled = usize::from(percent.min(100)) * BAR_WIDTH / 100;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled))
}

fn write_screen(out: &mut String, app: &App) -> std::fmt::Result {
    write_tabs(out, app.platform())?;
    let profile = app.profile();
    writeln!(out, "{} Downloader  ({})", profile.display_name, app.route())?;
    writeln!(out)?;

    if app.url().is_empty() {
        writeln!(out, "URL: {}", profile.placeholder)?;
    } else {
        writeln!(out, "URL: {}", app.url())?;
    }
    match app.validity() {
        UrlValidity::Invalid => writeln!(out, "  {}", invalid_url_hint(app.platform()))?,
        UrlValidity::Valid if app.metadata().is_none() => writeln!(out, "  {VALID_URL_HINT}")?,
        _ => {}
    }

    match app.metadata() {
        None => {
            if app.is_analyzing() {
                writeln!(out, "Analyzing...")?;
            } else if app.can_analyze() {
                writeln!(out, "Ready: Analyze Media")?;
            }
        }
        Some(metadata) => {
            writeln!(out)?;
            writeln!(out, "{}", metadata.title)?;
            if let Some(uploader) = &metadata.uploader {
                writeln!(out, "by {uploader}")?;
            }
            let mut facts = Vec::new();
            if let Some(duration) = metadata.duration_label() {
                facts.push(duration);
            }
            if let Some(views) = metadata.views_label() {
                facts.push(format!("{views} views"));
            }
            if !facts.is_empty() {
                writeln!(out, "{}", facts.join("  |  "))?;
            }
            if let Some(thumbnail) = &metadata.thumbnail_url {
                writeln!(out, "thumbnail: {thumbnail}")?;
            }

            writeln!(out)?;
            writeln!(out, "Select Quality:")?;
            let selected = app.selected_format().map(|option| option.id);
            for option in app.format_options() {
                let marker = if selected == Some(option.id) { '*' } else { ' ' };
                writeln!(out, " ({marker}) {:<6} {}", option.id, option.label)?;
            }
        }
    }

    let download = app.download();
    if download.shows_progress() {
        writeln!(out)?;
        writeln!(out, "{} {:>3}%", progress_bar(download.percent()), download.percent())?;
        if let Some(label) = download.phase_label() {
            writeln!(out, "{label}")?;
        }
    }

    if let Some(file) = app.last_file() {
        writeln!(out, "Saved {} ({} bytes)", file.path.display(), file.bytes)?;
    }
    if let Some(error) = app.error() {
        writeln!(out)?;
        writeln!(out, "! {error}")?;
    }
    if let Some(toast) = app.toast() {
        let prefix = match toast.notice.kind {
            NoticeKind::Success => "ok",
            NoticeKind::Error => "error",
        };
        writeln!(out, "[{prefix}] {}", toast.notice.message)?;
    }
    if let Some(modal) = app.modal() {
        writeln!(out)?;
        write_modal(out, modal)?;
    }
    Ok(())
}

fn write_tabs(out: &mut String, active: Platform) -> std::fmt::Result {
    let tabs: Vec<String> = Platform::ALL
        .iter()
        .map(|platform| {
            if *platform == active {
                format!("[{}]", platform.display_name())
            } else {
                format!(" {} ", platform.display_name())
            }
        })
        .collect();
    writeln!(out, "{}", tabs.join(" "))
}

fn write_modal(out: &mut String, modal: Modal) -> std::fmt::Result {
    let (title, body) = match modal {
        Modal::About => ("About MediaGrab", ABOUT_TEXT),
        Modal::HowItWorks => ("How It Works", HOW_IT_WORKS_TEXT),
    };
    writeln!(out, "== {title} ==")?;
    writeln!(out, "{body}")
}
