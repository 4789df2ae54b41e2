//! Loading the TLS client identity used to authenticate against the CA.
//!
//! The CA API requires mutual TLS: we present a client certificate issued
//! by the CA itself and verify the server against the CA's own root. Key,
//! certificate and trust bundle may each be configured inline as a PEM
//! string or as an absolute path to a PEM file.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use openssl::pkey::PKey;
use openssl::x509::X509;

use crate::commons::error::Error;
use crate::commons::util::file;

//------------ Material ------------------------------------------------------

/// A piece of PEM material, supplied inline or through the file system.
///
/// A configured value starting with a `/` is taken to be a path, anything
/// else is taken to be the PEM content itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Material {
    Inline(String),
    File(PathBuf),
}

impl Material {
    pub fn from_setting(value: &str) -> Self {
        if value.starts_with('/') {
            Material::File(PathBuf::from(value))
        } else {
            Material::Inline(value.to_string())
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Material::File(_))
    }

    fn load(&self) -> Result<Bytes, Error> {
        match self {
            Material::Inline(pem) => Ok(Bytes::from(pem.clone())),
            Material::File(path) => Ok(file::read(path)?),
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Material::Inline(_) => write!(f, "<inline>"),
            Material::File(path) => write!(f, "{}", path.to_string_lossy()),
        }
    }
}

//------------ Identity ------------------------------------------------------

/// A validated mutual-TLS client identity.
///
/// Construction is deterministic and performs no network access. Any
/// failure here is fatal for the client being set up and is never routed
/// through the retry path.
#[derive(Debug)]
pub struct Identity {
    identity: reqwest::Identity,
    roots: Vec<reqwest::Certificate>,
}

impl Identity {
    /// Builds an identity from key, certificate and trust bundle material.
    ///
    /// Key and certificate must be sourced the same way, i.e. both inline
    /// or both from files, matching how deployments normally template
    /// them. Each part must parse as PEM, the key must belong to the
    /// certificate, and the trust bundle must contain at least one CA
    /// certificate.
    pub fn build(key: &Material, cert: &Material, ca: &Material) -> Result<Self, Error> {
        if cert.is_file() && !key.is_file() {
            return Err(Error::identity_material(
                "certificate points to a file but the key is given inline",
            ));
        }
        if key.is_file() && !cert.is_file() {
            return Err(Error::identity_material(
                "key points to a file but the certificate is given inline",
            ));
        }

        let key_pem = key.load()?;
        let cert_pem = cert.load()?;
        let identity = Self::client_identity(&key_pem, &cert_pem, cert)?;

        let ca_pem = ca.load()?;
        let roots = Self::trust_roots(&ca_pem, ca)?;

        Ok(Identity { identity, roots })
    }

    pub fn into_parts(self) -> (reqwest::Identity, Vec<reqwest::Certificate>) {
        (self.identity, self.roots)
    }

    fn client_identity(
        key_pem: &Bytes,
        cert_pem: &Bytes,
        cert_source: &Material,
    ) -> Result<reqwest::Identity, Error> {
        let key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| Error::identity_material(format!("cannot parse private key: {}", e)))?;
        let cert = X509::from_pem(cert_pem).map_err(|e| {
            Error::identity_material(format!("cannot parse client certificate '{}': {}", cert_source, e))
        })?;

        // A mismatched pair would otherwise only fail at the first TLS
        // handshake, looking like a transport problem.
        let cert_key = cert.public_key().map_err(|e| {
            Error::identity_material(format!(
                "cannot read public key of client certificate '{}': {}",
                cert_source, e
            ))
        })?;
        if !cert_key.public_eq(&key) {
            return Err(Error::identity_material(format!(
                "private key does not match client certificate '{}'",
                cert_source
            )));
        }

        let mut bundle = Vec::with_capacity(cert_pem.len() + key_pem.len() + 1);
        bundle.extend_from_slice(cert_pem);
        bundle.push(b'\n');
        bundle.extend_from_slice(key_pem);

        reqwest::Identity::from_pem(&bundle)
            .map_err(|e| Error::identity_material(format!("cannot load client key pair: {}", e)))
    }

    fn trust_roots(ca_pem: &Bytes, ca_source: &Material) -> Result<Vec<reqwest::Certificate>, Error> {
        let mut reader: &[u8] = ca_pem.as_ref();
        let ders: Vec<_> = rustls_pemfile::certs(&mut reader)
            .collect::<Result<_, _>>()
            .map_err(|e| Error::identity_material(format!("cannot parse CA trust bundle '{}': {}", ca_source, e)))?;

        if ders.is_empty() {
            return Err(Error::identity_material(format!(
                "no usable CA certificate in trust bundle '{}'",
                ca_source
            )));
        }

        ders.into_iter()
            .map(|der| {
                reqwest::Certificate::from_der(der.as_ref())
                    .map_err(|e| Error::identity_material(format!("invalid CA certificate in trust bundle: {}", e)))
            })
            .collect()
    }
}

//------------ Tests ---------------------------------------------------------
