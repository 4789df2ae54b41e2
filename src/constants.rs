//! Crate-wide constants.

use std::time::Duration;

//------------ Service Defaults ---------------------------------------------

/// The default base URL of the Puppet CA service.
pub const PUPPETCA_DEFAULT_URL: &str = "https://puppet:8140";

/// The base path of the CA API namespace on the Puppet server.
pub const PUPPETCA_API_BASE: &str = "puppet-ca/v1";

/// Timeout for a single HTTP request to the CA.
pub const HTTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// The user agent sent with every request.
pub const PUPPETCA_USER_AGENT: &str = concat!("puppetca/", env!("CARGO_PKG_VERSION"));

//------------ Environment Variables ----------------------------------------

/// The environment variable overriding the CA base URL.
pub const PUPPETCA_ENV_URL: &str = "PUPPETCA_URL";

/// The environment variable overriding the client certificate material.
pub const PUPPETCA_ENV_CERT: &str = "PUPPETCA_CERT";

/// The environment variable overriding the client key material.
pub const PUPPETCA_ENV_KEY: &str = "PUPPETCA_KEY";

/// The environment variable overriding the CA trust bundle material.
pub const PUPPETCA_ENV_CA: &str = "PUPPETCA_CA";

//------------ Retry Timing -------------------------------------------------

/// The wait between the first and second attempt of a reconciliation.
pub const RETRY_AFTER: Duration = Duration::from_millis(500);

/// How much longer to wait from one attempt to the next.
pub const RETRY_AFTER_MULTIPLIER: f64 = 1.5;

/// The longest wait between two attempts, once backoff has grown to it.
pub const RETRY_AFTER_MAX: Duration = Duration::from_secs(15);

/// The default overall deadline for one `ensure` reconciliation.
pub const RETRY_UNTIL_MAX: Duration = Duration::from_secs(300);
