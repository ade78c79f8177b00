//! Shared wire definitions for the `PollChat` backend API.
//!
//! The backend speaks JSON over HTTP. Every reply is an object carrying a
//! `success` flag next to its payload; [`codec`] turns those bodies into
//! typed [`codec::Reply`] values.

pub mod api;
pub mod codec;
pub mod ids;
mod lenient;
pub mod message;
pub mod time;
pub mod user;
