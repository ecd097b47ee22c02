//! Domain types for the quarry downloader.
//!
//! Pure data: no I/O, no async, no HTTP. The net and engine crates build on
//! these types; keeping them here means the job model and wire protocol can
//! be tested without touching the network or the filesystem.

pub mod config;
pub mod error;
pub mod job;
pub mod wire;

pub use config::Config;
pub use error::{Error, Result};
pub use job::{Hash, Job, JobId, Mirror, Part, Piece};
pub use wire::Message;
