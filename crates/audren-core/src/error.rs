//! Renderer and sink error types

use thiserror::Error;

/// Result module shared by every renderer error code
pub const AUDIO_MODULE: u32 = 153;

/// Description of `ERR_INVALID_PARAMETERS`
const DESC_INVALID_PARAMETERS: u32 = 41;
/// Description of `ERR_INVALID_ADDRESS_INFO`
const DESC_INVALID_ADDRESS_INFO: u32 = 42;
/// Description of `ERR_SPLITTER_SORT_FAILED`
const DESC_SPLITTER_SORT_FAILED: u32 = 43;

/// Encode a (module, description) pair into a raw result code
pub const fn make_result_code(module: u32, description: u32) -> u32 {
    module | (description << 9)
}

/// Raw code of `ERR_INVALID_PARAMETERS`
pub const ERR_INVALID_PARAMETERS: u32 = make_result_code(AUDIO_MODULE, DESC_INVALID_PARAMETERS);
/// Raw code of `ERR_INVALID_ADDRESS_INFO`, reported through the behavior
/// error list when a wave-buffer lies outside every attached memory pool
pub const ERR_INVALID_ADDRESS_INFO: u32 = make_result_code(AUDIO_MODULE, DESC_INVALID_ADDRESS_INFO);
/// Raw code of `ERR_SPLITTER_SORT_FAILED`
pub const ERR_SPLITTER_SORT_FAILED: u32 = make_result_code(AUDIO_MODULE, DESC_SPLITTER_SORT_FAILED);

/// Errors surfaced to renderer clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RendererError {
    /// A size, alignment, magic, range or revision check failed in an update
    #[error("Invalid update parameters: {0}")]
    InvalidParameters(String),

    /// The mix graph contains a cycle
    #[error("Splitter sort failed: mix graph contains a cycle")]
    SplitterSortFailed,

    /// Creation parameters are unusable
    #[error("Invalid renderer parameters: {0}")]
    InvalidRendererParams(String),
}

impl RendererError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        RendererError::InvalidParameters(reason.into())
    }

    /// Numeric result code reported to the guest
    pub fn result_code(&self) -> u32 {
        match self {
            RendererError::SplitterSortFailed => ERR_SPLITTER_SORT_FAILED,
            RendererError::InvalidParameters(_) | RendererError::InvalidRendererParams(_) => {
                ERR_INVALID_PARAMETERS
            }
        }
    }
}

/// Result type for renderer operations
pub type RendererResult<T> = Result<T, RendererError>;

/// Errors raised by sink backends
#[derive(Error, Debug)]
pub enum SinkError {
    /// No output device could be opened
    #[error("No audio output device available: {0}")]
    NoDevice(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the output stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Stream layout the backend cannot produce
    #[error("Unsupported stream format: {channels} channels at {sample_rate}Hz")]
    UnsupportedFormat { channels: usize, sample_rate: u32 },

    /// Operation on a sink whose stream was never opened
    #[error("Sink stream is not open")]
    NotOpen,

    /// WAV writer failure
    #[error("WAV output error: {0}")]
    Wav(#[from] hound::Error),

    /// File I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_codes() {
        assert_eq!(ERR_INVALID_PARAMETERS, 153 | (41 << 9));
        assert_eq!(ERR_SPLITTER_SORT_FAILED, 153 | (43 << 9));
        assert_eq!(
            RendererError::SplitterSortFailed.result_code(),
            ERR_SPLITTER_SORT_FAILED
        );
        assert_eq!(
            RendererError::invalid("bad magic").result_code(),
            ERR_INVALID_PARAMETERS
        );
    }

    #[test]
    fn test_error_display() {
        let err = RendererError::invalid("voice section size mismatch");
        assert!(err.to_string().contains("voice section size mismatch"));

        let err = SinkError::UnsupportedFormat {
            channels: 3,
            sample_rate: 48000,
        };
        assert!(err.to_string().contains("3 channels"));
    }
}
