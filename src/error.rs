use crate::config::ConfigError;
use crate::transport::TransportError;

/// Failures surfaced while assembling a capture pipeline.
///
/// Recording events never fails for the caller; only construction and config
/// loading return this.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_inner_messages() {
        let error: CaptureError = ConfigError::Invalid("bad batch size".to_string()).into();
        assert_eq!(error.to_string(), "bad batch size");

        let error: CaptureError = TransportError::Config("empty url".to_string()).into();
        assert!(matches!(error, CaptureError::Transport(_)));
    }
}
