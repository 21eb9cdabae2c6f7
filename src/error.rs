//! Error types for the invoice pipeline.

use thiserror::Error;

/// Failure to recover the answers of an encrypted submission.
#[derive(Debug, Error)]
pub enum DecryptError {
    /// Credential is not a 32-byte hex secret key.
    #[error("invalid credential")]
    InvalidCredential,

    /// Peer key is not a 32-byte x-only public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Payload is not a NIP-44 v2 payload.
    #[error("unsupported encryption version")]
    UnsupportedVersion,

    /// Encoded or decoded payload size out of range.
    #[error("invalid payload length: {0}")]
    InvalidPayloadLength(usize),

    /// Payload is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Authentication tag mismatch (wrong key or tampered payload).
    #[error("invalid MAC")]
    InvalidMac,

    /// Padding prefix does not match the ciphertext size.
    #[error("invalid padding")]
    InvalidPadding,

    /// Plaintext must be between 1 and 65535 bytes.
    #[error("plaintext length out of range: {0}")]
    PlaintextLength(usize),

    /// Plaintext is not UTF-8.
    #[error("plaintext is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Plaintext is not a JSON tag list.
    #[error("plaintext is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shareable locator could not be decoded.
#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("invalid locator: bad bech32 ({0})")]
    Bech32(&'static str),

    #[error("invalid locator: expected prefix `{expected}`, got `{actual}`")]
    Prefix { expected: &'static str, actual: String },

    #[error("invalid locator: missing {0}")]
    Missing(&'static str),

    #[error("invalid locator: kind {0} is not a form")]
    Kind(u32),

    #[error("invalid locator: {0}")]
    Malformed(String),
}

/// A single invoice could not be rendered.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pdf encoding failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("pdf write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while fetching form data from relays.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No schema event arrived before the subscription ended.
    #[error("form {owner}:{identifier} not found on any relay")]
    SchemaUnavailable { owner: String, identifier: String },

    #[error("transport error: {0}")]
    Transport(String),
}
