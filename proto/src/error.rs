use thiserror::Error;

/// Failure to parse an `EntityId` from its text form.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("expected 16 id bytes, got {0}")]
    InvalidLength(usize),
}
