//! Shared helpers.

pub mod payload_path;

pub use payload_path::PayloadPathError;
