//! adb smart-socket service selection.
//!
//! A fresh daemon connection is repurposed by sending a service string
//! prefixed with its length as four lowercase hex digits. The daemon answers
//! with a four byte status:
//!
//! ```text
//! request:  "%04x" length | service bytes
//! response: "OKAY"
//!         | "FAIL" | 4 ASCII digits (length) | reason bytes
//! ```
//!
//! Selection is one-shot. After `OKAY` the connection carries whatever the
//! service produces; after `FAIL` the caller should drop the connection.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::AdbConnection;

const STATUS_OKAY: &[u8] = b"OKAY";
const STATUS_FAIL: &[u8] = b"FAIL";

/// Longest service string a four hex digit prefix can describe
pub const MAX_SERVICE_LEN: usize = 0xffff;

/// Selects any single attached device
pub const SERVICE_TRANSPORT_ANY: &str = "host:transport-any";

/// Service that forwards the connection to the device transport for `serial`.
#[must_use]
pub fn transport_service(serial: &str) -> String {
    format!("host:transport:{serial}")
}

/// Service that runs `command` in a device shell and streams its stdout.
#[must_use]
pub fn shell_service(command: &str) -> String {
    format!("shell:{command}")
}

/// Service that forwards the connection to an abstract unix socket on device.
#[must_use]
pub fn local_abstract_service(socket_name: &str) -> String {
    format!("localabstract:{socket_name}")
}

/// Encode a service selection request.
///
/// # Errors
///
/// Returns `Error::ProtocolViolation` if the service is too long to frame.
pub fn encode_request(service: &str) -> Result<Bytes> {
    let len = service.len();
    if len > MAX_SERVICE_LEN {
        return Err(Error::protocol(format!(
            "service string is {len} bytes, at most {MAX_SERVICE_LEN} can be framed"
        )));
    }

    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_slice(format!("{len:04x}").as_bytes());
    buf.put_slice(service.as_bytes());
    Ok(buf.freeze())
}

/// Select `service` on `conn`.
///
/// # Errors
///
/// Returns `Error::ServiceSelection` if the daemon refuses, and
/// `Error::ProtocolViolation` if it answers with anything but `OKAY`/`FAIL`.
pub async fn select_service<S>(conn: &mut AdbConnection<S>, service: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Selecting service '{}'", service);
    conn.write_all(&encode_request(service)?).await?;

    let status = conn.read_exact(4, "status").await?;
    match status.as_slice() {
        STATUS_OKAY => {
            debug!("Service '{}' selected", service);
            Ok(())
        }
        STATUS_FAIL => {
            let size = conn.read_exact(4, "fail reason length").await?;
            let reason_len = parse_reason_len(&size)?;
            let reason = conn.read_exact(reason_len, "fail reason").await?;
            let reason = String::from_utf8_lossy(&reason).into_owned();

            debug!("Service '{}' refused: {}", service, reason);
            Err(Error::ServiceSelection { reason })
        }
        other => Err(Error::protocol(format!(
            "Unrecognized status={}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// The FAIL length field is read as a decimal number.
fn parse_reason_len(field: &[u8]) -> Result<usize> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| {
            Error::protocol(format!(
                "invalid FAIL reason length {:?}",
                String::from_utf8_lossy(field)
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockStream;

    #[test]
    fn test_encode_request_layout() {
        let service = "host:transport-any";
        let encoded = encode_request(service).unwrap();

        assert_eq!(encoded.len(), 4 + service.len());
        assert_eq!(&encoded[..4], b"0012");
        assert_eq!(&encoded[4..], service.as_bytes());
    }

    #[test]
    fn test_encode_request_uses_lowercase_hex() {
        let service = "localabstract:stetho_com.example_devtools_remote";
        let encoded = encode_request(service).unwrap();

        assert_eq!(service.len(), 0x30);
        assert_eq!(&encoded[..4], b"0030");

        let service = "x".repeat(0xab);
        assert_eq!(&encode_request(&service).unwrap()[..4], b"00ab");
    }

    #[test]
    fn test_encode_request_empty_service() {
        assert_eq!(&encode_request("").unwrap()[..], b"0000");
    }

    #[test]
    fn test_encode_request_too_long() {
        let service = "x".repeat(MAX_SERVICE_LEN + 1);
        assert!(matches!(
            encode_request(&service),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_service_builders() {
        assert_eq!(transport_service("emulator-5554"), "host:transport:emulator-5554");
        assert_eq!(shell_service("cat /proc/net/unix"), "shell:cat /proc/net/unix");
        assert_eq!(local_abstract_service("foo"), "localabstract:foo");
    }

    #[tokio::test]
    async fn test_select_service_okay() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"OKAYpayload"));
        select_service(&mut conn, SERVICE_TRANSPORT_ANY).await.unwrap();

        // The payload after OKAY belongs to the selected service
        assert_eq!(conn.read_exact(7, "payload").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_select_service_writes_request() {
        let mut stream = MockStream::new(b"OKAY");
        {
            let mut conn = AdbConnection::from_stream(&mut stream);
            select_service(&mut conn, "shell:ls").await.unwrap();
        }
        assert_eq!(stream.written(), b"0008shell:ls");
    }

    #[tokio::test]
    async fn test_select_service_fail_reason() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"FAIL0005nope!"));
        let err = select_service(&mut conn, "host:transport:bogus")
            .await
            .unwrap_err();

        match err {
            Error::ServiceSelection { reason } => assert_eq!(reason, "nope!"),
            other => panic!("Expected ServiceSelection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_select_service_fail_empty_reason() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"FAIL0000"));
        let err = select_service(&mut conn, "x").await.unwrap_err();
        assert!(matches!(err, Error::ServiceSelection { reason } if reason.is_empty()));
    }

    #[tokio::test]
    async fn test_select_service_fail_bad_length() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"FAILzzzz"));
        let err = select_service(&mut conn, "x").await.unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_select_service_fail_truncated_reason() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"FAIL0010short"));
        let err = select_service(&mut conn, "x").await.unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 10,
                context: "fail reason"
            }
        ));
    }

    #[tokio::test]
    async fn test_select_service_unknown_status() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"WHAT"));
        let err = select_service(&mut conn, "x").await.unwrap_err();

        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(err.to_string().contains("WHAT"));
    }

    #[tokio::test]
    async fn test_select_service_closed_before_status() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"OK"));
        let err = select_service(&mut conn, "x").await.unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 4,
                context: "status"
            }
        ));
    }
}
