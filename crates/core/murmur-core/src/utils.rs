//! Utility functions and helpers

pub mod logger;
pub mod uuid;

pub use self::uuid::string_to_uuid;
