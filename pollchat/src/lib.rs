//! `PollChat`: client-side synchronization core for a polled two-party chat.
//!
//! Keeps a deduplicated, time-ordered view of the active conversation,
//! echoes outgoing messages optimistically and reconciles them with the
//! server, and drives message and presence refresh from one timer loop.

pub mod api;
pub mod client;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod error;
pub mod event;
pub mod outbound;
pub mod pagination;
pub mod poller;
pub mod session;
pub mod transport;
