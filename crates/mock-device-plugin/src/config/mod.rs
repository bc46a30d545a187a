use core::error::Error;

pub mod cli;
pub mod devices;

pub use cli::*;
pub use devices::*;

/// Errors raised while loading the device configuration.
#[derive(Debug, derive_more::Display)]
pub enum ConfigError {
    #[display("Failed to read device config file: {path}")]
    Read { path: String },
    #[display("Failed to parse device config file: {path}")]
    Parse { path: String },
}

impl Error for ConfigError {}
