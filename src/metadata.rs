#![forbid(unsafe_code)]

//! Media metadata returned by `POST /api/info`.
//!
//! The backend forwards a trimmed yt-dlp info dict, so most fields are
//! optional and some are spelled differently depending on the extractor.
//! `InfoResponse` mirrors the wire shape; `MediaMetadata` is the
//! normalized record the view renders.

use serde::{Deserialize, Serialize};

use crate::format::{format_count, format_duration};

pub const UNKNOWN_TITLE: &str = "Unknown Title";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoResponse {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub thumbnails: Option<Vec<ThumbnailEntry>>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub view_count: Option<f64>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThumbnailEntry {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaMetadata {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

impl MediaMetadata {
    pub fn duration_label(&self) -> Option<String> {
        self.duration_seconds.map(format_duration)
    }

    pub fn views_label(&self) -> Option<String> {
        self.view_count.map(format_count)
    }
}

impl From<InfoResponse> for MediaMetadata {
    fn from(info: InfoResponse) -> Self {
        let title = non_empty(info.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string());
        let thumbnail_url = non_empty(info.thumbnail).or_else(|| {
            info.thumbnails
                .and_then(|entries| entries.into_iter().next())
                .and_then(|entry| non_empty(entry.url))
        });
        // Zero is what extractors report when they do not know the value.
        let duration_seconds = info
            .duration
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0);
        let view_count = info
            .view_count
            .filter(|count| count.is_finite() && *count >= 1.0)
            .map(|count| count as u64);
        let uploader = non_empty(info.uploader).or_else(|| non_empty(info.channel));

        Self {
            title,
            thumbnail_url,
            duration_seconds,
            view_count,
            uploader,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
