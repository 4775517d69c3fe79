/// Core error types for the Stormy compositor.
use crate::frame::PixelFormat;

/// A specialized Result type for Stormy operations.
pub type StormyResult<T> = Result<T, StormyError>;

/// Top-level error type encompassing all Stormy subsystems.
#[derive(Debug, thiserror::Error)]
pub enum StormyError {
    #[error("shader resource not found: {name}")]
    MissingShaderResource { name: String },

    #[error("buffer allocation failed for {width}x{height} {format:?}: {reason}")]
    BufferAllocation {
        width: u32,
        height: u32,
        format: PixelFormat,
        reason: String,
    },

    #[error("unknown render target #{0}")]
    UnknownTarget(u32),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StormyError {
    /// Create a missing-shader error.
    pub fn missing_shader(name: impl Into<String>) -> Self {
        StormyError::MissingShaderResource { name: name.into() }
    }

    /// Create a buffer allocation error.
    pub fn allocation(width: u32, height: u32, format: PixelFormat, reason: impl Into<String>) -> Self {
        StormyError::BufferAllocation {
            width,
            height,
            format,
            reason: reason.into(),
        }
    }

    /// Whether this error came from the target pool running dry.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(self, StormyError::BufferAllocation { .. })
    }
}

impl From<toml::de::Error> for StormyError {
    fn from(err: toml::de::Error) -> Self {
        StormyError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for StormyError {
    fn from(err: toml::ser::Error) -> Self {
        StormyError::Config(err.to_string())
    }
}
