//! The shatter pipeline: readers, run configuration and the coordinator.

pub mod config;
pub mod reader;
pub mod shatter;

pub use config::*;
pub use reader::*;
pub use shatter::*;
