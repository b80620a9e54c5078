//! Core of the anti-promotion moderation bot.
//!
//! Platform-agnostic: the chat platform and the session store live behind
//! ports (traits) implemented in adapter crates. Everything between them
//! (admission, per-key serialization, decisions, punishment, outbound
//! throttling and retry) lives here.

pub mod admission;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod moderation;
pub mod pipeline;
pub mod platform;
pub mod punishment;
pub mod retry;
pub mod serializer;
pub mod session;
pub mod store;
pub mod throttle;

pub use errors::{Error, Result};
