//! Daemon endpoint configuration.
//!
//! The daemon always listens on loopback. Its port comes from, in order:
//! `ADB_SERVER_SOCKET` (`tcp:<host>:<port>`, only the port is used),
//! `ANDROID_ADB_SERVER_PORT`, then [`DEFAULT_ADB_PORT`].

use crate::error::{Error, Result};

pub const ADB_HOST: &str = "127.0.0.1";
pub const DEFAULT_ADB_PORT: u16 = 5037;

pub const ENV_SERVER_SOCKET: &str = "ADB_SERVER_SOCKET";
pub const ENV_SERVER_PORT: &str = "ANDROID_ADB_SERVER_PORT";

/// Where the adb daemon listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdbEndpoint {
    pub host: String,
    pub port: u16,
}

impl AdbEndpoint {
    #[must_use]
    pub fn local(port: u16) -> Self {
        Self {
            host: ADB_HOST.to_string(),
            port,
        }
    }

    /// Endpoint configured by the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the environment holds a malformed value.
    pub fn from_env() -> Result<Self> {
        server_port_from_env(|key| std::env::var(key).ok()).map(Self::local)
    }
}

impl Default for AdbEndpoint {
    fn default() -> Self {
        Self::local(DEFAULT_ADB_PORT)
    }
}

/// Resolve the daemon port using `lookup` for environment access.
///
/// # Errors
///
/// Returns `Error::Config` for a non-`tcp:` socket spec or a port that is
/// not a valid integer.
pub fn server_port_from_env<F>(lookup: F) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    let port = match lookup(ENV_SERVER_SOCKET) {
        Some(spec) => Some(port_from_socket_spec(&spec)?),
        None => lookup(ENV_SERVER_PORT),
    };

    match port {
        None => Ok(DEFAULT_ADB_PORT),
        Some(port) => port.parse().map_err(|_| {
            Error::Config(format!(
                "Invalid integer '{port}' specified in {ENV_SERVER_PORT} or {ENV_SERVER_SOCKET}."
            ))
        }),
    }
}

fn port_from_socket_spec(spec: &str) -> Result<String> {
    if !spec.starts_with("tcp:") {
        return Err(Error::Config(format!(
            "Invalid or unsupported socket spec '{spec}' specified in {ENV_SERVER_SOCKET}."
        )));
    }

    // Split always yields at least one item
    Ok(spec.rsplit(':').next().unwrap_or_default().to_string())
}
