//! Reconciling declared certificate intent with CA state.
//!
//! [`Reconciler::ensure`] drives a node certificate towards "exists, and
//! is signed if we asked for that". One attempt walks the wire client
//! through: check the certificate; if absent and signing is wanted, check
//! the pending request and ask the CA to sign it, then check again. The
//! CA is eventually consistent, so a certificate can be invisible right
//! after its request was submitted or even right after signing it. Such
//! attempts are classified *transient* and the whole sequence is retried
//! under exponential backoff until a deadline. Everything else, including
//! any transport error, is *permanent* and surfaces immediately.
//!
//! Dropping the returned future cancels reconciliation; no further
//! attempt is started once it is gone.

use std::time::Duration;

use backoff::ExponentialBackoff;
use log::{debug, trace};

use crate::commons::error::Error;
use crate::constants::{RETRY_AFTER, RETRY_AFTER_MAX, RETRY_AFTER_MULTIPLIER, RETRY_UNTIL_MAX};

use super::wire::CaApi;

//------------ RetryPolicy ---------------------------------------------------

/// Timing of the retry loop around one `ensure` call.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// The wait after the first failed attempt.
    pub initial_interval: Duration,

    /// Growth factor from one wait to the next.
    pub multiplier: f64,

    /// The cap on the wait between attempts.
    pub max_interval: Duration,

    /// Random jitter applied to each wait, as a fraction of it.
    pub randomization_factor: f64,

    /// Overall deadline when the caller does not supply one.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_interval: RETRY_AFTER,
            multiplier: RETRY_AFTER_MULTIPLIER,
            max_interval: RETRY_AFTER_MAX,
            randomization_factor: 0.5,
            max_elapsed: RETRY_UNTIL_MAX,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, deadline: Option<Duration>) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: Some(deadline.unwrap_or(self.max_elapsed)),
            ..Default::default()
        }
    }
}

//------------ Reconciler ----------------------------------------------------

/// Drives the CA towards declared certificate intent.
///
/// Holds a CA handle and a retry policy; no per-node state. Calls for
/// different nodes are independent and may run concurrently. The caller
/// is responsible for not reconciling the *same* node concurrently — the
/// CA is the only authority, so a lost race merely costs a retry cycle.
pub struct Reconciler<C> {
    client: C,
    retry: RetryPolicy,
}

impl<C: CaApi> Reconciler<C> {
    pub fn new(client: C) -> Self {
        Self::with_retry(client, RetryPolicy::default())
    }

    pub fn with_retry(client: C, retry: RetryPolicy) -> Self {
        Reconciler { client, retry }
    }

    /// Ensures the certificate of a node exists, returning its PEM.
    ///
    /// With `sign_intent`, a pending signing request found along the way
    /// is signed. A certificate that already exists is returned as is,
    /// regardless of `sign_intent`; re-running `ensure` is always safe.
    ///
    /// Retries while the certificate (or its request) has simply not
    /// appeared yet, waiting up to `deadline` (the policy default when
    /// `None`). On expiry the last not-found cause is returned wrapped in
    /// [`Error::DeadlineExceeded`]. Permanent failures, e.g. the CA
    /// refusing to sign or answering with an unexpected status, abort
    /// without further attempts.
    pub async fn ensure(
        &self,
        node: &str,
        env: &str,
        sign_intent: bool,
        deadline: Option<Duration>,
    ) -> Result<String, Error> {
        let notify = |err: Error, delay: Duration| {
            debug!(
                "certificate '{}' not ready ({}), retrying in {:.1}s",
                node,
                err,
                delay.as_secs_f64()
            );
        };

        let result = backoff::future::retry_notify(
            self.retry.backoff(deadline),
            || self.attempt(node, env, sign_intent),
            notify,
        )
        .await;

        match result {
            Ok(pem) => Ok(pem),
            // The only transient classification is not-found, so a
            // not-found coming back here means the deadline ran out.
            Err(err) if err.is_not_found() => Err(Error::DeadlineExceeded(Box::new(err))),
            Err(err) => Err(err),
        }
    }

    /// One pass of the reconciliation state machine.
    async fn attempt(&self, node: &str, env: &str, sign_intent: bool) -> Result<String, backoff::Error<Error>> {
        match self.client.certificate(node, env).await {
            Ok(Some(pem)) => Ok(pem),
            Ok(None) if !sign_intent => {
                // The request may still be propagating or gets submitted
                // out of band. Wait for it.
                trace!("certificate '{}' absent, waiting for it to appear", node);
                Err(backoff::Error::transient(Error::CertificateNotFound(node.to_string())))
            }
            Ok(None) => self.sign_and_recheck(node, env).await,
            Err(e) => Err(backoff::Error::permanent(Error::HttpClientError(e))),
        }
    }

    /// The `NEED_SIGN` branch: sign the pending request, re-probe.
    async fn sign_and_recheck(&self, node: &str, env: &str) -> Result<String, backoff::Error<Error>> {
        match self.client.signing_request(node, env).await {
            Ok(Some(_csr)) => {
                trace!("signing pending request of '{}'", node);
                self.client
                    .sign(node, env)
                    .await
                    .map_err(|e| backoff::Error::permanent(Error::SignFailed(node.to_string(), e)))?;

                match self.client.certificate(node, env).await {
                    Ok(Some(pem)) => Ok(pem),
                    Ok(None) => {
                        // Signed, but the read lags behind the write.
                        trace!("certificate '{}' signed but not visible yet", node);
                        Err(backoff::Error::transient(Error::CertificateNotFound(node.to_string())))
                    }
                    Err(e) => Err(backoff::Error::permanent(Error::HttpClientError(e))),
                }
            }
            Ok(None) => {
                trace!("no pending request for '{}' yet", node);
                Err(backoff::Error::transient(Error::CertificateNotFound(node.to_string())))
            }
            Err(e) => Err(backoff::Error::permanent(Error::HttpClientError(e))),
        }
    }

    /// Reads the certificate of a node without retrying.
    ///
    /// Absent maps to [`Error::CertificateNotFound`]; callers keeping
    /// their own records use [`Error::is_not_found`] to drop one.
    pub async fn read(&self, node: &str, env: &str) -> Result<String, Error> {
        match self.client.certificate(node, env).await? {
            Some(pem) => Ok(pem),
            None => Err(Error::CertificateNotFound(node.to_string())),
        }
    }

    /// Deletes the certificate of a node.
    ///
    /// Idempotent: a certificate already gone is success, and there is
    /// no retry loop since absence is the desired state.
    pub async fn delete(&self, node: &str, env: &str) -> Result<(), Error> {
        debug!("deleting certificate of '{}'", node);
        self.client.delete(node, env).await?;
        Ok(())
    }
}

//------------ Tests ---------------------------------------------------------
