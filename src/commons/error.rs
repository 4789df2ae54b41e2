//! The errors this crate can produce.

use std::{fmt, io};

use crate::commons::util::httpclient;

//------------ Error ---------------------------------------------------------

/// The error type for CA client and reconciliation operations.
#[derive(Debug)]
pub enum Error {
    /// An underlying I/O issue, e.g. reading key material from disk.
    IoError(IoError),

    /// The configuration could not be read or is invalid.
    ConfigError(String),

    /// The TLS identity material is malformed or inconsistent.
    ///
    /// This is raised at client construction and is always fatal. It is
    /// never classified through the retry path.
    IdentityMaterial(String),

    /// The CA has no certificate for this node.
    ///
    /// Not a failure but the *absent* domain state. During `ensure` it
    /// marks an attempt as retryable; from a plain `read` it tells the
    /// caller that its record no longer exists.
    CertificateNotFound(String),

    /// A request to the CA failed at the transport or HTTP level.
    HttpClientError(httpclient::Error),

    /// The CA refused or failed to sign the pending request for a node.
    SignFailed(String, httpclient::Error),

    /// The reconciliation deadline expired, wrapping the last cause.
    DeadlineExceeded(Box<Error>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IoError(e) => e.fmt(f),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::IdentityMaterial(msg) => {
                write!(f, "Invalid TLS identity material: {}", msg)
            }
            Error::CertificateNotFound(node) => {
                write!(f, "No certificate found for node '{}'", node)
            }
            Error::HttpClientError(e) => e.fmt(f),
            Error::SignFailed(node, e) => {
                write!(f, "Could not sign certificate request for node '{}': {}", node, e)
            }
            Error::DeadlineExceeded(cause) => {
                write!(f, "Deadline expired waiting for certificate: {}", cause)
            }
        }
    }
}

impl Error {
    /// Whether this error denotes the not-found domain state.
    ///
    /// Resource adapters use this on the `read` path to drop a persisted
    /// record rather than report a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::CertificateNotFound(_))
    }

    pub fn config(msg: impl fmt::Display) -> Self {
        Error::ConfigError(msg.to_string())
    }

    pub fn identity_material(msg: impl fmt::Display) -> Self {
        Error::IdentityMaterial(msg.to_string())
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::IoError(e)
    }
}

impl From<httpclient::Error> for Error {
    fn from(e: httpclient::Error) -> Self {
        Error::HttpClientError(e)
    }
}

impl std::error::Error for Error {}

//------------ IoError -------------------------------------------------------

/// An `io::Error` with context on what was being attempted.
#[derive(Debug)]
pub struct IoError {
    context: String,
    cause: io::Error,
}

impl IoError {
    pub fn new(context: impl fmt::Display, cause: io::Error) -> Self {
        IoError {
            context: context.to_string(),
            cause,
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.cause)
    }
}
