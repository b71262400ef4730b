//! Murmur core
//!
//! Shared plumbing for the Murmur voice crates:
//!
//! - [`MurmurError`] and the crate-wide [`Result`] alias
//! - `.env` loading and typed environment lookups
//! - tracing initialization
//! - deterministic UUIDs for session and entity keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use uuid::Uuid;

pub mod config;
pub mod error;
pub mod utils;

pub use config::{get_env_bool, get_env_float, get_env_int, get_env_opt, get_env_or, load_env};
pub use error::{MurmurError, Result};
pub use utils::logger::init_logging;
pub use utils::uuid::string_to_uuid;
