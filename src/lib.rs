#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod nav;

pub use config::Config;
pub use error::ClientError;
