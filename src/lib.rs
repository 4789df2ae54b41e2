//! A client library for the Puppet CA HTTP API.
//!
//! This crate talks to the certificate authority built into a Puppet
//! server and drives a node certificate towards a declared intent: the
//! certificate should exist, and a pending signing request for it may be
//! auto-signed along the way. The CA is the single source of truth; this
//! crate never caches its state.
//!
//! The pieces, bottom up:
//!
//! * [`ca::identity`] loads the mutual-TLS client identity (key, client
//!   certificate, CA trust bundle), each given inline as PEM or as a path.
//! * [`ca::wire`] is the wire client for the `/puppet-ca/v1` namespace.
//!   It performs exactly one HTTP round-trip per call and maps status
//!   codes to typed outcomes. A 404 is the *absent* state of a node's
//!   certificate, not an error.
//! * [`ca::reconcile`] composes wire calls into `ensure`, `read` and
//!   `delete`, retrying transient conditions under exponential backoff
//!   until a deadline while failing permanent ones immediately.
//!
//! Configuration lives in [`config::Config`], which can be read from a
//! TOML file and overridden through `PUPPETCA_*` environment variables.

pub mod ca;
pub mod commons;
pub mod config;
pub mod constants;
