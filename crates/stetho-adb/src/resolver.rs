//! Device and process resolution.
//!
//! Stetho-enabled apps listen on an abstract unix socket named
//! `stetho_<process>_devtools_remote`. When no process is named, the device's
//! `/proc/net/unix` table is scanned for listening sockets that follow
//! that convention, and exactly one must be found.

use std::sync::OnceLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::AdbEndpoint;
use crate::error::{Error, Result};
use crate::smart_socket::{
    SERVICE_TRANSPORT_ANY, local_abstract_service, select_service, shell_service,
    transport_service,
};
use crate::transport::AdbConnection;

/// Abstract socket paths are listed with a leading `@`
pub const STETHO_SOCKET_PREFIX: &str = "@stetho_";

const SOCKET_TABLE_COMMAND: &str = "cat /proc/net/unix";

/// Flags value of a listening socket, compared as a decimal number
const LISTENING_FLAGS: u64 = 10000;

/// `St` column (index 5) of a socket that isn't connected (`SS_UNCONNECTED`)
const UNCONNECTED_STATE: u64 = 1;

const MIN_FIELDS: usize = 8;

fn socket_name_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^stetho_(.+)_devtools_remote$").expect("socket name pattern is valid")
    })
}

/// Socket name a stetho-enabled `process` listens on.
#[must_use]
pub fn stetho_socket_name(process: &str) -> String {
    format!("stetho_{process}_devtools_remote")
}

/// Extract the process identifier from a stetho socket name.
///
/// # Errors
///
/// Returns `Error::ProtocolViolation` if `socket_name` doesn't follow the
/// `stetho_<process>_devtools_remote` convention.
pub fn extract_process(socket_name: &str) -> Result<String> {
    socket_name_regex()
        .captures(socket_name)
        .and_then(|caps| caps.get(1))
        .map(|process| process.as_str().to_string())
        .ok_or_else(|| {
            Error::protocol(format!("Unexpected Stetho socket formatting: {socket_name}"))
        })
}

/// One row of `/proc/net/unix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketRow {
    pub flags: u64,
    /// `St` column
    pub state: u64,
    pub path: String,
}

impl SocketRow {
    /// Parse a listening stetho socket row.
    ///
    /// Returns `None` for the header, rows with fewer than eight fields, rows
    /// whose path isn't a stetho abstract socket, and rows that aren't
    /// listening, unconnected sockets.
    #[must_use]
    pub fn parse_listening_stetho(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }

        let path = fields[7];
        if !path.starts_with(STETHO_SOCKET_PREFIX) {
            return None;
        }

        let (Ok(flags), Ok(state)) = (fields[3].parse::<u64>(), fields[5].parse::<u64>())
        else {
            warn!("Skipping malformed socket row: {}", line.trim_end());
            return None;
        };

        if flags != LISTENING_FLAGS || state != UNCONNECTED_STATE {
            return None;
        }

        Some(Self {
            flags,
            state,
            path: path.to_string(),
        })
    }

    /// Bindable socket name, without the abstract `@` marker.
    #[must_use]
    pub fn socket_name(&self) -> &str {
        self.path.strip_prefix('@').unwrap_or(&self.path)
    }
}

/// Read a socket table from `reader` and keep the listening stetho rows.
///
/// # Errors
///
/// Returns `Error::Connection` if reading fails.
pub async fn parse_socket_table<R>(reader: R) -> Result<Vec<SocketRow>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let mut rows = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if let Some(row) = SocketRow::parse_listening_stetho(&String::from_utf8_lossy(&line)) {
            debug!("Found stetho socket {}", row.path);
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Dump the device socket table over `conn` and return the listening
/// stetho sockets. Consumes the connection's stream until the shell exits.
///
/// # Errors
///
/// Returns `Error::ServiceSelection` if the shell service is refused.
pub async fn list_listening_abstract_sockets<S>(
    conn: &mut AdbConnection<S>,
) -> Result<Vec<SocketRow>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    select_service(conn, &shell_service(SOCKET_TABLE_COMMAND)).await?;
    parse_socket_table(conn).await
}

/// Pick the only discovered socket.
///
/// # Errors
///
/// Returns `Error::NoProcesses` for no rows and `Error::AmbiguousProcesses`
/// listing every process for more than one.
pub fn choose_only_socket(rows: &[SocketRow]) -> Result<String> {
    match rows {
        [] => Err(Error::NoProcesses),
        [row] => {
            extract_process(row.socket_name())?;
            Ok(row.socket_name().to_string())
        }
        rows => {
            let processes = rows
                .iter()
                .map(|row| extract_process(row.socket_name()))
                .collect::<Result<Vec<_>>>()?;
            Err(Error::AmbiguousProcesses { processes })
        }
    }
}

/// Open a daemon connection and bind it to `device`, or to any device.
///
/// # Errors
///
/// Returns `Error::Connection` if the daemon is unreachable and
/// `Error::TargetDevice` if the daemon refuses the device.
pub async fn connect_to_device(
    device: Option<&str>,
    endpoint: &AdbEndpoint,
) -> Result<AdbConnection<TcpStream>> {
    let mut conn = AdbConnection::open(endpoint).await?;
    if let Err(e) = bind_device(&mut conn, device).await {
        conn.close().await;
        return Err(e);
    }
    Ok(conn)
}

async fn bind_device<S>(conn: &mut AdbConnection<S>, device: Option<&str>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let service = device.map_or_else(|| SERVICE_TRANSPORT_ANY.to_string(), transport_service);

    match select_service(conn, &service).await {
        Err(Error::ServiceSelection { reason }) => Err(Error::TargetDevice {
            device: device.unwrap_or("any").to_string(),
            reason,
        }),
        other => other,
    }
}

/// Discover the only stetho socket on `device`.
///
/// The discovery connection is closed on every path out of this function.
///
/// # Errors
///
/// Returns `Error::NoProcesses` or `Error::AmbiguousProcesses` when there
/// isn't exactly one candidate, plus any connection or selection error.
pub async fn find_only_stetho_socket(
    device: Option<&str>,
    endpoint: &AdbEndpoint,
) -> Result<String> {
    let mut conn = connect_to_device(device, endpoint).await?;
    let result = discover(&mut conn).await;
    conn.close().await;
    result
}

async fn discover<S>(conn: &mut AdbConnection<S>) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let rows = list_listening_abstract_sockets(conn).await?;
    choose_only_socket(&rows)
}

/// Socket name for `process`, discovering it on `device` when not given.
///
/// # Errors
///
/// See [`find_only_stetho_socket`]. Never fails when `process` is given.
pub async fn resolve_target_socket_name(
    device: Option<&str>,
    process: Option<&str>,
    endpoint: &AdbEndpoint,
) -> Result<String> {
    match process {
        Some(process) => Ok(stetho_socket_name(process)),
        None => find_only_stetho_socket(device, endpoint).await,
    }
}

/// Open a connection forwarded to the stetho socket of the target process.
///
/// # Errors
///
/// Returns `Error::TargetProcess` if the daemon can't reach the socket, plus
/// any resolution error.
pub async fn open_stetho_socket(
    device: Option<&str>,
    process: Option<&str>,
    endpoint: &AdbEndpoint,
) -> Result<AdbConnection<TcpStream>> {
    let socket_name = resolve_target_socket_name(device, process, endpoint).await?;
    let mut conn = connect_to_device(device, endpoint).await?;
    if let Err(e) = bind_process(&mut conn, &socket_name).await {
        conn.close().await;
        return Err(e);
    }
    Ok(conn)
}

async fn bind_process<S>(conn: &mut AdbConnection<S>, socket_name: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match select_service(conn, &local_abstract_service(socket_name)).await {
        Err(Error::ServiceSelection { reason }) => Err(Error::TargetProcess {
            socket: socket_name.to_string(),
            reason,
        }),
        other => other,
    }
}
