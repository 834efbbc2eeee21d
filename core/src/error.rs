use thiserror::Error;

/// Errors produced by the sonictag physical layer.
///
/// Encoder-side errors surface to the caller. Receiver-side errors never
/// escape [`crate::Receiver::push`]; they send the state machine back to
/// searching and are kept in `last_error` for telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SonicTagError {
    #[error("payload exceeds what the Reed-Solomon block can carry")]
    PayloadTooLarge,

    #[error("length field inconsistent with block size")]
    BadLength,

    #[error("CRC-32 mismatch over length and payload")]
    BadCrc,

    #[error("Reed-Solomon could not correct the block")]
    UncorrectableErrors,

    #[error("symbol slice shorter than fft_size + cp_len")]
    Truncated,

    #[error("header symbol failed to decode")]
    HeaderInvalid,

    #[error("FFT processing failed: {0}")]
    Fft(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SonicTagError>;
