//! Transport configuration.
//!
//! A [`Config`] picks one of four ways to serve requests and carries that
//! mode's parameters. It is a plain value: nothing is read from the
//! environment. It can be built in code or deserialised from TOML:
//!
//! ```toml
//! server_type = "tls"
//! server_addr = "0.0.0.0:8443"
//! server_cert_file = "/etc/portico/cert.pem"
//! server_key_file = "/etc/portico/key.pem"
//! ```
//!
//! The embedded-certificate mode is code-only: its PEM buffers are meant to
//! come from `include_bytes!`, so they are never read from a file.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Error;

/// How [`Application::run`](crate::Application::run) serves requests.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Plain HTTP over TCP.
    #[default]
    Plain,
    /// Plain HTTP over a Unix-domain socket at `server_addr`.
    Unix,
    /// HTTPS with the certificate and key read from PEM files.
    Tls,
    /// HTTPS with the certificate and key taken from in-memory PEM buffers.
    TlsEmbed,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_type: ServerType,
    /// `host:port` for TCP modes, a filesystem path for [`ServerType::Unix`].
    pub server_addr: String,
    /// Permission bits applied to the Unix socket file.
    pub server_mode: u32,
    pub server_cert_file: PathBuf,
    pub server_key_file: PathBuf,
    #[serde(skip)]
    pub server_cert_data: Vec<u8>,
    #[serde(skip)]
    pub server_key_data: Vec<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_type: ServerType::Plain,
            server_addr: "0.0.0.0:8080".to_owned(),
            server_mode: 0o666,
            server_cert_file: PathBuf::new(),
            server_key_file: PathBuf::new(),
            server_cert_data: Vec::new(),
            server_key_data: Vec::new(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        toml::from_str(source).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks that the selected server type has what it needs to start.
    pub fn validate(&self) -> Result<(), Error> {
        if self.server_addr.is_empty() {
            return Err(Error::Config("server_addr is empty".into()));
        }
        match self.server_type {
            ServerType::Plain | ServerType::Unix => Ok(()),
            ServerType::Tls => {
                if self.server_cert_file.as_os_str().is_empty() {
                    return Err(Error::Config("server_cert_file is required for tls".into()));
                }
                if self.server_key_file.as_os_str().is_empty() {
                    return Err(Error::Config("server_key_file is required for tls".into()));
                }
                Ok(())
            }
            ServerType::TlsEmbed => {
                if self.server_cert_data.is_empty() || self.server_key_data.is_empty() {
                    return Err(Error::Config(
                        "server_cert_data and server_key_data are required for tls_embed".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}
