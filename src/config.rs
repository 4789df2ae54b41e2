//! Configuration of the CA client.

use std::path::Path;
use std::{env, fs};

use log::trace;
use serde::Deserialize;
use url::Url;

use crate::ca::identity::Material;
use crate::commons::error::{Error, IoError};
use crate::constants::{
    PUPPETCA_DEFAULT_URL, PUPPETCA_ENV_CA, PUPPETCA_ENV_CERT, PUPPETCA_ENV_KEY, PUPPETCA_ENV_URL,
};

//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn url() -> Url {
        // The constant is a valid URL.
        Url::parse(PUPPETCA_DEFAULT_URL).unwrap()
    }
}

//------------ Config --------------------------------------------------------

/// The settings for talking to one Puppet CA.
///
/// Readable from a TOML file through [`Config::from_file`]; any value
/// left out falls back to the matching `PUPPETCA_*` environment variable
/// and then to the default. `cert`, `key` and `ca` each hold either
/// inline PEM or an absolute path to a PEM file.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Base URL of the CA.
    #[serde(default = "ConfigDefaults::url")]
    pub url: Url,

    /// Client certificate used to authenticate against the CA.
    #[serde(default)]
    pub cert: Option<String>,

    /// Private key for the client certificate.
    #[serde(default)]
    pub key: Option<String>,

    /// The CA certificate(s) to trust for the server connection.
    #[serde(default)]
    pub ca: Option<String>,

    /// Skip verification of the server certificate. Insecure; opt-in only.
    #[serde(default)]
    pub ignore_ssl: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url: ConfigDefaults::url(),
            cert: None,
            key: None,
            ca: None,
            ignore_ssl: false,
        }
    }
}

impl Config {
    /// Creates a config from the environment alone.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Config::default();
        config.env_fallbacks(|var| env::var(var).ok())?;
        Ok(config)
    }

    /// Reads a config from a TOML file, with environment fallbacks.
    ///
    /// Values present in the file win over the environment.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| IoError::new(format!("could not read config file: {}", path.to_string_lossy()), e))?;
        let mut config: Config = toml::from_str(&content)
            .map_err(|e| Error::config(format!("invalid config file '{}': {}", path.to_string_lossy(), e)))?;
        config.env_fallbacks(|var| env::var(var).ok())?;
        trace!("read config from '{}', CA at {}", path.to_string_lossy(), config.url);
        Ok(config)
    }

    fn env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), Error> {
        if self.url == ConfigDefaults::url() {
            if let Some(url) = lookup(PUPPETCA_ENV_URL) {
                self.url = Url::parse(&url)
                    .map_err(|e| Error::config(format!("invalid URL in {}: {}", PUPPETCA_ENV_URL, e)))?;
            }
        }
        if self.cert.is_none() {
            self.cert = lookup(PUPPETCA_ENV_CERT);
        }
        if self.key.is_none() {
            self.key = lookup(PUPPETCA_ENV_KEY);
        }
        if self.ca.is_none() {
            self.ca = lookup(PUPPETCA_ENV_CA);
        }
        Ok(())
    }

    pub fn cert_material(&self) -> Result<Material, Error> {
        Self::material(&self.cert, "no client certificate configured (set 'cert' or PUPPETCA_CERT)")
    }

    pub fn key_material(&self) -> Result<Material, Error> {
        Self::material(&self.key, "no private key configured (set 'key' or PUPPETCA_KEY)")
    }

    pub fn ca_material(&self) -> Result<Material, Error> {
        Self::material(&self.ca, "no CA certificate configured (set 'ca' or PUPPETCA_CA)")
    }

    fn material(value: &Option<String>, missing: &str) -> Result<Material, Error> {
        value
            .as_deref()
            .map(Material::from_setting)
            .ok_or_else(|| Error::config(missing))
    }
}

//------------ Tests ---------------------------------------------------------
