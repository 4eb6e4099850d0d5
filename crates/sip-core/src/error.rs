use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing or building SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The input could not be parsed as a SIP message.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A header required for the requested operation is absent.
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but its value is malformed.
    #[error("Invalid {name} header: {value}")]
    InvalidHeader {
        /// Canonical header name
        name: &'static str,
        /// The offending raw value
        value: String,
    },

    /// Status code outside 100..=699.
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Method token contains characters outside the RFC 3261 token set.
    #[error("Invalid method: {0}")]
    InvalidMethod(String),
}
