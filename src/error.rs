use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// ErrNotReady indicates an operation invoked while the channel is not
    /// in the Activated state.
    #[error("channel not ready")]
    ErrNotReady,

    /// ErrChannelFailed indicates the channel entered the terminal Failed
    /// state; every further operation on it is rejected.
    #[error("channel failed")]
    ErrChannelFailed,

    /// ErrClosed indicates an operation executed after the channel has
    /// already been shut down.
    #[error("channel closed")]
    ErrClosed,

    /// ErrInvalidLinkId indicates an unknown or empty link id.
    #[error("invalid link id")]
    ErrInvalidLinkId,

    /// ErrInvalidConnectionId indicates an unknown or empty connection id.
    #[error("invalid connection id")]
    ErrInvalidConnectionId,

    /// ErrInvalidArgument indicates a malformed caller argument.
    #[error("invalid argument")]
    ErrInvalidArgument,

    /// ErrNoUsableAction indicates the link has no upcoming action a package
    /// could ride on. Retryable: the timeline may refill.
    #[error("no usable action on link")]
    ErrNoUsableAction,

    /// ErrUnknownEncoding indicates no composed encoding matches the
    /// requested encoding parameters.
    #[error("no encoding matches parameters")]
    ErrUnknownEncoding,

    /// ErrMissingComponent indicates the composition was activated without
    /// one of its required components.
    #[error("component missing from composition")]
    ErrMissingComponent,

    /// ErrComponentFailed indicates a component reported a fatal failure.
    #[error("component failed")]
    ErrComponentFailed,

    /// ErrFramingViolation indicates content that cannot be expressed in the
    /// composition's framing mode, e.g. two packages in a SINGLE slot.
    #[error("framing mode violation")]
    ErrFramingViolation,

    /// ErrShortBuffer indicates a wire buffer too short to hold the framing
    /// header it claims.
    #[error("buffer too short")]
    ErrShortBuffer,

    /// ErrMalformedRecord indicates a length-prefixed record that overruns
    /// its buffer.
    #[error("malformed record")]
    ErrMalformedRecord,

    /// ErrPackageTooLarge indicates a package that can never fit the
    /// composition's framing, e.g. exceeding a SINGLE slot's capacity.
    #[error("package exceeds action capacity")]
    ErrPackageTooLarge,

    #[error("JsonError: {0}")]
    ErrJsonError(#[from] serde_json::Error),

    #[error("Other errors: {0}")]
    ErrOthers(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}
