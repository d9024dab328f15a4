//! Unified error type.

use std::fmt;

/// The error type returned by portico's fallible operations.
///
/// Application-level failures (404, 401, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// startup failures only. Every variant is fatal to
/// [`Application::run`](crate::Application::run).
#[derive(Debug)]
pub enum Error {
    /// Binding, accepting or configuring a socket failed.
    Io(std::io::Error),
    /// The certificate or private key could not be loaded.
    Tls(String),
    /// The [`Config`](crate::Config) is unusable for the selected server type.
    Config(String),
    /// `run` was called before any router was registered.
    NoRouter,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Tls(msg) => write!(f, "tls: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NoRouter => f.write_str("no router registered"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
