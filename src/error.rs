/*!
# UMICP Error Types

Error taxonomy for UMICP operations. Every variant maps to a stable numeric
code that is carried on the wire inside ERROR envelopes.
*/

use thiserror::Error;

/// Main error type for UMICP operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UmicpError {
    /// Envelope failed structural validation
    #[error("Invalid envelope: {message}")]
    InvalidEnvelope { message: String },

    /// Frame failed wire-format validation
    #[error("Invalid frame: {message}")]
    InvalidFrame { message: String },

    /// Security operation attempted from the wrong state, or peer rejected
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// AEAD tag mismatch or undecryptable ciphertext
    #[error("Decryption failed: {message}")]
    DecryptionFailed { message: String },

    /// Compression backend reported an error
    #[error("Compression failed: {message}")]
    CompressionFailed { message: String },

    /// Decompression backend reported an error
    #[error("Decompression failed: {message}")]
    DecompressionFailed { message: String },

    /// Encoding or decoding of an envelope failed
    #[error("Serialization failed: {message}")]
    SerializationFailed { message: String },

    /// Transport-level failure, or no transport available to carry a message
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// Operation exceeded its deadline
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// Buffer capacity limit exceeded
    #[error("Buffer overflow: {message}")]
    BufferOverflow { message: String },

    /// Allocation failure surfaced as a recoverable error
    #[error("Memory allocation failed: {message}")]
    MemoryAllocation { message: String },

    /// Caller passed an argument that violates a documented precondition
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Requested capability is not compiled in or not yet available
    #[error("Not implemented: {message}")]
    NotImplemented { message: String },
}

/// Result type alias for UMICP operations
pub type Result<T> = std::result::Result<T, UmicpError>;

impl UmicpError {
    /// Stable numeric code carried in ERROR envelopes. Code 0 is SUCCESS and
    /// never appears on an error value.
    pub fn code(&self) -> u8 {
        match self {
            UmicpError::InvalidEnvelope { .. } => 1,
            UmicpError::InvalidFrame { .. } => 2,
            UmicpError::AuthenticationFailed { .. } => 3,
            UmicpError::DecryptionFailed { .. } => 4,
            UmicpError::CompressionFailed { .. } => 5,
            UmicpError::DecompressionFailed { .. } => 6,
            UmicpError::SerializationFailed { .. } => 7,
            UmicpError::NetworkError { .. } => 8,
            UmicpError::Timeout { .. } => 9,
            UmicpError::BufferOverflow { .. } => 10,
            UmicpError::MemoryAllocation { .. } => 11,
            UmicpError::InvalidArgument { .. } => 12,
            UmicpError::NotImplemented { .. } => 13,
        }
    }

    /// Create an invalid-envelope error
    pub fn envelope<S: Into<String>>(message: S) -> Self {
        UmicpError::InvalidEnvelope { message: message.into() }
    }

    /// Create an invalid-frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        UmicpError::InvalidFrame { message: message.into() }
    }

    /// Create an authentication error
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        UmicpError::AuthenticationFailed { message: message.into() }
    }

    /// Create a decryption error
    pub fn decryption<S: Into<String>>(message: S) -> Self {
        UmicpError::DecryptionFailed { message: message.into() }
    }

    /// Create a compression error
    pub fn compression<S: Into<String>>(message: S) -> Self {
        UmicpError::CompressionFailed { message: message.into() }
    }

    /// Create a decompression error
    pub fn decompression<S: Into<String>>(message: S) -> Self {
        UmicpError::DecompressionFailed { message: message.into() }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        UmicpError::SerializationFailed { message: message.into() }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        UmicpError::NetworkError { message: message.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        UmicpError::Timeout { message: message.into() }
    }

    /// Create a buffer-overflow error
    pub fn buffer_overflow<S: Into<String>>(message: S) -> Self {
        UmicpError::BufferOverflow { message: message.into() }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        UmicpError::InvalidArgument { message: message.into() }
    }

    /// Create a not-implemented error
    pub fn not_implemented<S: Into<String>>(message: S) -> Self {
        UmicpError::NotImplemented { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(UmicpError::envelope("x").code(), 1);
        assert_eq!(UmicpError::frame("x").code(), 2);
        assert_eq!(UmicpError::authentication("x").code(), 3);
        assert_eq!(UmicpError::decryption("x").code(), 4);
        assert_eq!(UmicpError::compression("x").code(), 5);
        assert_eq!(UmicpError::decompression("x").code(), 6);
        assert_eq!(UmicpError::serialization("x").code(), 7);
        assert_eq!(UmicpError::network("x").code(), 8);
        assert_eq!(UmicpError::timeout("x").code(), 9);
        assert_eq!(UmicpError::buffer_overflow("x").code(), 10);
        assert_eq!(UmicpError::invalid_argument("x").code(), 12);
        assert_eq!(UmicpError::not_implemented("x").code(), 13);
    }

    #[test]
    fn test_error_display() {
        let err = UmicpError::envelope("missing field 'from'");
        assert_eq!(err.to_string(), "Invalid envelope: missing field 'from'");
    }
}
