//! Helpers for HTTPS calls to the CA, and the errors they produce.

use std::fmt;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Response, StatusCode};

use crate::constants::{HTTP_CLIENT_TIMEOUT, PUPPETCA_USER_AGENT};

pub const JSON_CONTENT: &str = "application/json";

/// Builds the shared HTTPS client used for all CA requests.
///
/// The client authenticates with the given TLS identity and trusts only
/// the given root certificates. With `insecure` set, server certificate
/// verification is disabled altogether.
pub fn client(
    identity: reqwest::Identity,
    roots: Vec<reqwest::Certificate>,
    insecure: bool,
) -> Result<reqwest::Client, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(PUPPETCA_USER_AGENT));

    let mut builder = reqwest::ClientBuilder::new()
        .timeout(HTTP_CLIENT_TIMEOUT)
        .default_headers(headers)
        .identity(identity);

    for root in roots {
        builder = builder.add_root_certificate(root);
    }

    if insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder.build().map_err(|e| Error::request_build("<client setup>", e))
}

//------------ Error ---------------------------------------------------------

type ErrorUri = String;
type ErrorMessage = String;

/// An error while making a request to the CA.
///
/// All retry policy lives above this layer; an `Error` here describes a
/// single failed round-trip. Note that a 404 response on the certificate
/// endpoints is not an error at all but the *absent* domain state, mapped
/// away by the wire client before errors are ever created.
#[derive(Debug)]
pub enum Error {
    RequestBuild(ErrorUri, ErrorMessage),

    RequestExecute(ErrorUri, ErrorMessage),

    Response(ErrorUri, ErrorMessage),
    ErrorResponseWithBody(ErrorUri, StatusCode, String),
    ErrorResponseWithStatus(ErrorUri, StatusCode),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::RequestBuild(uri, msg) => {
                write!(f, "Issue creating request for URI: {}, error: {}", uri, msg)
            }
            Error::RequestExecute(uri, msg) => {
                write!(f, "Issue accessing URI: {}, error: {}", uri, msg)
            }
            Error::Response(uri, msg) => {
                write!(f, "Issue processing response from URI: {}, error: {}", uri, msg)
            }
            Error::ErrorResponseWithBody(uri, status, body) => {
                write!(f, "Error response from URI: {}, Status: {}, Error: {}", uri, status, body)
            }
            Error::ErrorResponseWithStatus(uri, status) => {
                write!(f, "Error response from URI: {}, Status: {}", uri, status)
            }
        }
    }
}

impl Error {
    pub fn request_build(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestBuild(uri.to_string(), msg.to_string())
    }

    pub fn execute(uri: &str, msg: impl fmt::Display) -> Self {
        Error::RequestExecute(uri.to_string(), msg.to_string())
    }

    pub fn response(uri: &str, msg: impl fmt::Display) -> Self {
        Error::Response(uri.to_string(), msg.to_string())
    }

    /// The HTTP status of an error response, if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::ErrorResponseWithBody(_, status, _) | Error::ErrorResponseWithStatus(_, status) => Some(*status),
            _ => None,
        }
    }

    /// Turns a response with an unexpected status into an error.
    ///
    /// The status text always ends up in the message so that operators
    /// can tell server-side refusals apart from connection trouble.
    pub async fn from_res(uri: &str, res: Response) -> Error {
        let status = res.status();
        match res.text().await {
            Ok(body) if !body.is_empty() => Error::ErrorResponseWithBody(uri.to_string(), status, body),
            _ => Error::ErrorResponseWithStatus(uri.to_string(), status),
        }
    }
}
