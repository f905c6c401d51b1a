/// Crate-wide result alias.
pub type ReelResult<T> = Result<T, ReelError>;

/// Error taxonomy for timeline validation, media decode and export.
///
/// Validation and encoder-configuration failures are fatal before the frame
/// loop; per-element and per-effect errors during the loop are caught at the
/// frame-renderer boundary and never surface through this type.
#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    /// Structural problems in the timeline or settings, reported up-front.
    #[error("validation error: {0}")]
    Validation(String),

    /// No acceptable H.264 encoder configuration exists in this environment.
    #[error("unsupported environment: {0}")]
    Unsupported(String),

    /// A media asset could not be opened or decoded.
    #[error("media error: {0}")]
    Media(String),

    /// A video seek exceeded its wall-time budget; transient, per frame.
    #[error("seek timed out after {0} ms")]
    SeekTimeout(u64),

    /// The encoder or muxer failed; fatal once the frame loop has started.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// The export was cancelled through its [`crate::export::CancelToken`].
    #[error("export cancelled")]
    Cancelled,

    /// Any other failure, with context attached.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReelError {
    /// Build a [`ReelError::Validation`].
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`ReelError::Unsupported`].
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Build a [`ReelError::Media`].
    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// Build a [`ReelError::Encoder`].
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Return `true` for the cancellation terminal state.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
