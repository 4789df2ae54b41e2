//! The wire client for the `/puppet-ca/v1` API.
//!
//! Every operation performs exactly one HTTP round-trip and maps the
//! status code to a typed outcome right here at the boundary: 200 is
//! *found*, 404 is *absent*, anything else is a transport error carrying
//! the status text. Callers above this layer branch on domain state and
//! never look at status codes or error message text. This layer never
//! retries anything.

use log::trace;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use url::Url;

use crate::commons::error::Error;
use crate::commons::util::httpclient;
use crate::config::Config;
use crate::constants::PUPPETCA_API_BASE;

use super::identity::Identity;

//------------ CaApi ---------------------------------------------------------

/// The CA operations the reconciler is built on.
///
/// Implemented by [`Client`] for the real CA and by scripted stubs in
/// tests. An explicit, typed handle; callers pass it where they need it.
#[allow(async_fn_in_trait)]
pub trait CaApi {
    /// Fetches the certificate of a node, `None` if the CA has none.
    async fn certificate(&self, node: &str, env: &str) -> Result<Option<String>, httpclient::Error>;

    /// Fetches the pending signing request of a node, `None` if there is none.
    async fn signing_request(&self, node: &str, env: &str) -> Result<Option<String>, httpclient::Error>;

    /// Asks the CA to sign the pending request of a node.
    async fn sign(&self, node: &str, env: &str) -> Result<(), httpclient::Error>;

    /// Deletes the certificate of a node. Already absent is a no-op.
    async fn delete(&self, node: &str, env: &str) -> Result<(), httpclient::Error>;
}

//------------ Client --------------------------------------------------------

/// A client for one Puppet CA instance.
///
/// Wraps a connection pool bound to one base URL and one TLS identity.
/// Immutable after construction and safe to share between concurrent
/// reconciliations; cloning is cheap and clones share the pool.
#[derive(Clone, Debug)]
pub struct Client {
    base: Url,
    http: reqwest::Client,
}

impl Client {
    /// Creates a client for the CA at `base` using the given identity.
    pub fn new(base: Url, identity: Identity, insecure: bool) -> Result<Self, Error> {
        let (identity, roots) = identity.into_parts();
        let http = httpclient::client(identity, roots, insecure)?;
        Ok(Client { base, http })
    }

    /// Creates a client from a [`Config`].
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let identity = Identity::build(
            &config.key_material()?,
            &config.cert_material()?,
            &config.ca_material()?,
        )?;
        Self::new(config.url.clone(), identity, config.ignore_ssl)
    }

    fn uri(&self, endpoint: &str, node: &str, env: &str) -> Result<Url, httpclient::Error> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| httpclient::Error::request_build(self.base.as_str(), "cannot-be-a-base URL"))?;
            segments.pop_if_empty();
            segments.extend(PUPPETCA_API_BASE.split('/'));
            segments.extend([endpoint, node]);
        }
        if !env.is_empty() {
            url.query_pairs_mut().append_pair("environment", env);
        }
        Ok(url)
    }

    /// Performs a GET and folds 404 into `None`.
    async fn get_opt_text(&self, url: Url) -> Result<Option<String>, httpclient::Error> {
        let res = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| httpclient::Error::execute(url.as_str(), e))?;

        match res.status() {
            StatusCode::OK => {
                let text = res
                    .text()
                    .await
                    .map_err(|e| httpclient::Error::response(url.as_str(), e))?;
                Ok(Some(text))
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(httpclient::Error::from_res(url.as_str(), res).await),
        }
    }
}

/// The body of a signing request, per the Puppet CA state API.
#[derive(Serialize)]
struct DesiredState {
    desired_state: &'static str,
}

impl CaApi for Client {
    async fn certificate(&self, node: &str, env: &str) -> Result<Option<String>, httpclient::Error> {
        let url = self.uri("certificate", node, env)?;
        trace!("GET {}", url);
        self.get_opt_text(url).await
    }

    async fn signing_request(&self, node: &str, env: &str) -> Result<Option<String>, httpclient::Error> {
        let url = self.uri("certificate_request", node, env)?;
        trace!("GET {}", url);
        self.get_opt_text(url).await
    }

    async fn sign(&self, node: &str, env: &str) -> Result<(), httpclient::Error> {
        let url = self.uri("certificate_request", node, env)?;
        trace!("PUT {}", url);

        let body = serde_json::to_string(&DesiredState {
            desired_state: "signed",
        })
        .map_err(|e| httpclient::Error::request_build(url.as_str(), e))?;

        let res = self
            .http
            .put(url.clone())
            .header(CONTENT_TYPE, httpclient::JSON_CONTENT)
            .body(body)
            .send()
            .await
            .map_err(|e| httpclient::Error::execute(url.as_str(), e))?;

        match res.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(httpclient::Error::from_res(url.as_str(), res).await),
        }
    }

    async fn delete(&self, node: &str, env: &str) -> Result<(), httpclient::Error> {
        let url = self.uri("certificate_status", node, env)?;
        trace!("DELETE {}", url);

        let res = self
            .http
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| httpclient::Error::execute(url.as_str(), e))?;

        match res.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => {
                trace!("certificate of '{}' already absent", node);
                Ok(())
            }
            _ => Err(httpclient::Error::from_res(url.as_str(), res).await),
        }
    }
}

//------------ Tests ---------------------------------------------------------
