#![forbid(unsafe_code)]

//! Static registry of the supported media platforms.
//!
//! Every platform carries its URL pattern, the format options the backend
//! understands for it, and the presentation data the view needs. Nothing in
//! here is mutated after startup.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// One quality/container choice offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOption {
    pub id: &'static str,
    pub label: &'static str,
    /// Opaque yt-dlp format selector forwarded to the backend.
    pub selector: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorTheme {
    pub primary: &'static str,
    pub gradient: &'static str,
}

#[derive(Debug)]
pub struct PlatformProfile {
    pub key: &'static str,
    pub display_name: &'static str,
    pub pattern: &'static str,
    pub theme: ColorTheme,
    pub placeholder: &'static str,
    pub description: &'static str,
    pub keywords: &'static str,
    pub formats: &'static [FormatOption],
}

impl PlatformProfile {
    pub fn format(&self, id: &str) -> Option<&'static FormatOption> {
        self.formats.iter().find(|option| option.id == id)
    }

    /// The option preselected after a successful analysis.
    pub fn default_format(&self) -> &'static FormatOption {
        &self.formats[0]
    }
}

const BEST_ONLY: &[FormatOption] = &[FormatOption {
    id: "best",
    label: "Best Quality",
    selector: "best",
}];

static YOUTUBE: PlatformProfile = PlatformProfile {
    key: "youtube",
    display_name: "YouTube",
    pattern: r"^(https?://)?(www\.)?(youtube\.com|youtu\.be)/.+",
    theme: ColorTheme {
        primary: "#FF0000",
        gradient: "from-red-600 to-red-700",
    },
    placeholder: "https://www.youtube.com/watch?v=...",
    description: "Download YouTube videos in HD quality - 1080p, 720p, 480p or extract MP3 audio.",
    keywords: "youtube downloader, youtube video download, youtube to mp4, youtube to mp3",
    formats: &[
        FormatOption {
            id: "best",
            label: "Best Quality (MP4)",
            selector: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best",
        },
        FormatOption {
            id: "1080p",
            label: "1080p MP4",
            selector: "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]",
        },
        FormatOption {
            id: "720p",
            label: "720p MP4",
            selector: "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]",
        },
        FormatOption {
            id: "audio",
            label: "Audio Only (MP3)",
            selector: "bestaudio",
        },
    ],
};

static TIKTOK: PlatformProfile = PlatformProfile {
    key: "tiktok",
    display_name: "TikTok",
    pattern: r"^(https?://)?(www\.)?(tiktok\.com|vm\.tiktok\.com)/.+",
    theme: ColorTheme {
        primary: "#25F4EE",
        gradient: "from-cyan-400 to-pink-500",
    },
    placeholder: "https://www.tiktok.com/@username/video/...",
    description: "Download TikTok videos without watermark in HD quality.",
    keywords: "tiktok downloader, download tiktok video, tiktok no watermark",
    formats: BEST_ONLY,
};

static PINTEREST: PlatformProfile = PlatformProfile {
    key: "pinterest",
    display_name: "Pinterest",
    pattern: r"^(https?://)?(www\.)?pinterest\.(com|ca|co\.uk)/.+",
    theme: ColorTheme {
        primary: "#E60023",
        gradient: "from-red-600 to-red-800",
    },
    placeholder: "https://www.pinterest.com/pin/...",
    description: "Download Pinterest images and videos in high quality.",
    keywords: "pinterest downloader, download pinterest image, save pinterest video",
    formats: BEST_ONLY,
};

static INSTAGRAM: PlatformProfile = PlatformProfile {
    key: "instagram",
    display_name: "Instagram",
    pattern: r"^(https?://)?(www\.)?instagram\.com/(p|reel|reels|tv)/[A-Za-z0-9_-]+",
    theme: ColorTheme {
        primary: "#833AB4",
        gradient: "from-purple-600 via-pink-600 to-orange-500",
    },
    placeholder: "https://www.instagram.com/p/...",
    description: "Download Instagram photos, videos, reels, and IGTV in HD.",
    keywords: "instagram downloader, download instagram video, save instagram reel",
    formats: BEST_ONLY,
};

/// Supported media source. Serialized with the lowercase registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    YouTube,
    TikTok,
    Pinterest,
    Instagram,
}

impl Platform {
    /// Registry order, which is also the order of the selector tabs.
    pub const ALL: [Platform; 4] = [
        Platform::YouTube,
        Platform::TikTok,
        Platform::Pinterest,
        Platform::Instagram,
    ];

    pub fn profile(self) -> &'static PlatformProfile {
        match self {
            Self::YouTube => &YOUTUBE,
            Self::TikTok => &TIKTOK,
            Self::Pinterest => &PINTEREST,
            Self::Instagram => &INSTAGRAM,
        }
    }

    pub fn key(self) -> &'static str {
        self.profile().key
    }

    pub fn display_name(self) -> &'static str {
        self.profile().display_name
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|platform| platform.key() == key)
    }

    /// Resolves an address-bar style fragment (`#/tiktok`, `/tiktok` or
    /// `tiktok`). Unknown fragments yield `None`.
    pub fn from_fragment(fragment: &str) -> Option<Self> {
        let key = fragment.trim();
        let key = key.strip_prefix('#').unwrap_or(key);
        let key = key.strip_prefix('/').unwrap_or(key);
        Self::from_key(key)
    }

    pub fn fragment(self) -> String {
        format!("#/{}", self.key())
    }

    /// First platform whose pattern accepts `url`.
    pub fn detect(url: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|platform| crate::validate::validate(*platform, url))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        Self::from_key(&lowered).ok_or_else(|| {
            let known: Vec<&str> = Self::ALL.iter().map(|platform| platform.key()).collect();
            format!("unknown platform '{value}' (expected one of {})", known.join(", "))
        })
    }
}
