//! Serialization errors.
//!
//! Tick-path code in this workspace is infallible; encoding and decoding the
//! wire messages is the only surface that can fail in core.

pub type Result<T> = core::result::Result<T, SerializationError>;

#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error(transparent)]
    Encode(#[from] bincode::error::EncodeError),
    #[error(transparent)]
    Decode(#[from] bincode::error::DecodeError),
}
