//! lobridge core - platform-independent abstractions and configuration
//!
//! This crate provides the traits, configuration, option handling and error
//! types shared by the platform-specific process managers and the converter.

mod bridge;
mod config;
pub mod discovery;
mod endpoint;
mod error;
mod family;
mod options;
mod output;
pub mod pdf;
mod process;
mod registry;

pub use bridge::*;
pub use config::*;
pub use endpoint::*;
pub use error::*;
pub use family::*;
pub use options::*;
pub use output::*;
pub use process::*;
pub use registry::*;
