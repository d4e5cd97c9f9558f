//! FlashKV line protocol
//!
//! A newline-delimited request/response protocol: one case-insensitive
//! command per line in, one response line out. This crate only translates
//! text to [`Command`] values and results back to response lines; it never
//! touches the engine.

pub mod command;
pub mod response;

pub use command::{Command, ProtocolError, parse};
pub use response::Response;
