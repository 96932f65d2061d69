use thiserror::Error;

/// Failures while assembling the client runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is missing or invalid, or logging could not
    /// be installed
    #[error("Configuration error: {0}")]
    Config(String),

    /// No bridge was supplied for a required platform capability and no
    /// desktop default is available
    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
