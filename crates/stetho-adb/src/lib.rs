//! Client for stetho's dumpapp protocol, tunnelled through the adb daemon.
//!
//! A dumpapp session rides on two nested protocols over one TCP connection
//! to the local adb daemon: the daemon's smart-socket service selection,
//! then the dumpapp frame protocol spoken by the stetho-enabled app.
//!
//! # Architecture
//!
//! - [`framing`]: fixed-width big-endian integer fields
//! - [`transport`]: [`AdbConnection`], the raw byte stream and its lifecycle
//! - [`smart_socket`]: service selection (`OKAY`/`FAIL` handshake)
//! - [`resolver`]: device binding and stetho socket discovery
//! - [`dumpapp`]: the dumpapp codec and the stdio relay session
//! - [`config`]: daemon endpoint lookup
//! - [`error`]: error type and `Result` alias
//!
//! # Example
//!
//! ```no_run
//! use stetho_adb::{AdbEndpoint, DumpappSession, open_stetho_socket};
//!
//! # async fn example() -> Result<(), stetho_adb::Error> {
//! let endpoint = AdbEndpoint::from_env()?;
//! let conn = open_stetho_socket(None, Some("com.example"), &endpoint).await?;
//!
//! let status = DumpappSession::new(conn)
//!     .run(
//!         &["prefs".to_string()],
//!         &mut tokio::io::stdin(),
//!         &mut tokio::io::stdout(),
//!         &mut tokio::io::stderr(),
//!     )
//!     .await?;
//! println!("exited with {status}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dumpapp;
pub mod error;
pub mod framing;
pub mod resolver;
pub mod smart_socket;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{AdbEndpoint, DEFAULT_ADB_PORT};
pub use dumpapp::{ClientFrame, DumpappCodec, DumpappFrame, DumpappSession};
pub use error::{Error, Result};
pub use resolver::{
    connect_to_device, extract_process, open_stetho_socket, resolve_target_socket_name,
    stetho_socket_name,
};
pub use smart_socket::select_service;
pub use transport::{AdbConnection, ConnectionState};
