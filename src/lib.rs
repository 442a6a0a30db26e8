#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

//! Meridian — a Telegram ⇄ Gemini relay bot with durable per-chat memory.
//!
//! The interesting part lives in [`chat`] and [`store`]: a bounded
//! conversation history with a character budget applied at request time,
//! persisted write-through into a reconnecting key/value store. The rest
//! is the glue a chat bot needs: a Telegram long-poll channel, a Gemini
//! client with media upload, proactive web search, and a command router.

pub mod agent;
pub mod app;
pub mod channels;
pub mod chat;
pub mod config;
pub mod error;
pub mod providers;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::{MeridianError, Result};
