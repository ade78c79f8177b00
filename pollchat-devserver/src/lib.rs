//! `PollChat` development backend library.
//!
//! An in-memory stand-in for the chat backend: the same endpoints, reply
//! envelope and paging rules, served by axum. Used by integration tests and
//! for running the client locally.

pub mod config;
pub mod server;
pub mod store;
