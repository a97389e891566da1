/// Errors produced while building or loading rate limit rules.
///
/// Rejections are not errors: they are reported through [`crate::Reason`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A threshold was configured with a zero count or an empty window.
    ///
    /// This is fatal to the configuration being built; it is never clamped.
    #[error("Invalid rate limit configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// A rules document could not be parsed.
    #[error("Failed to parse rate limit rules: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A rules file could not be read.
    #[error("Failed to read rate limit rules: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}
