//! Shared helpers

pub mod fs;
pub mod logger;
pub mod timer;
