//! Talking to the Puppet CA: identity, wire client, reconciliation.

pub mod identity;
pub mod reconcile;
pub mod wire;
