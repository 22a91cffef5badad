#![forbid(unsafe_code)]

//! Client for the MediaGrab download service.
//!
//! Validates media URLs for the supported platforms, fetches metadata,
//! asks the service to prepare a download, follows its progress stream and
//! saves the finished artifact. The state machine lives in [`orchestrator`]
//! and [`app`]; [`session`] drives it against a [`api::MediaService`].

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod format;
pub mod metadata;
pub mod orchestrator;
pub mod platform;
pub mod progress;
pub mod session;
pub mod validate;
pub mod view;
