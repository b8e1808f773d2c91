//! Async client library for Twitch's IRCv3-derived chat protocol (TMI).
//!
//! The public surface is [`ClientHandle`]: connect, register listeners for
//! the events in [`dispatcher`]'s routing table, and issue commands through
//! [`ClientHandle`]'s wrappers over [`commands::Commands`].

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod message;
pub mod queue;
pub mod state;
pub mod supervisor;

pub use client::ClientHandle;
pub use config::{ClientConfig, Identity};
pub use error::{Error, Result};
pub use event::{EventEmitter, EventPayload, ListenerId};
pub use message::{IRCMessage, TagValue};
pub use state::{ChannelState, ReadyState};
