#![forbid(unsafe_code)]

//! URL validation against the platform registry patterns.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::platform::Platform;

static PATTERNS: Lazy<HashMap<Platform, Regex>> = Lazy::new(|| {
    Platform::ALL
        .into_iter()
        .map(|platform| {
            let regex = Regex::new(platform.profile().pattern)
                .unwrap_or_else(|err| panic!("invalid pattern for {platform}: {err}"));
            (platform, regex)
        })
        .collect()
});

/// Tri-state result shown next to the URL field. Empty input is `Unknown`
/// so that no error hint appears before the user typed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UrlValidity {
    #[default]
    Unknown,
    Valid,
    Invalid,
}

impl UrlValidity {
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }
}

pub fn validate(platform: Platform, input: &str) -> bool {
    PATTERNS
        .get(&platform)
        .is_some_and(|regex| regex.is_match(input))
}

pub fn check(platform: Platform, input: &str) -> UrlValidity {
    if input.is_empty() {
        UrlValidity::Unknown
    } else if validate(platform, input) {
        UrlValidity::Valid
    } else {
        UrlValidity::Invalid
    }
}
