//! Telemetry client for the target's local JSON socket.
//!
//! The target exposes a Unix socket speaking a request/response JSON
//! protocol. On connect the peer sends a banner such as
//! `{"version":"...","pid":1234,"max_output_len":16384}`; the
//! `max_output_len` field bounds every later response. Each read sends
//! `/ethdev/xstats,<port>` and extracts one named statistic from the
//! returned snapshot.
//!
//! The upstream socket speaks SOCK_SEQPACKET. A stream connection carries
//! the same byte protocol here; replies split across stream segments are
//! rejoined up to the advertised `max_output_len` bound.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::{MetricKey, MetricSource, SourceError};

/// Responses never arrive later than this once a request is written.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct Banner {
    max_output_len: usize,
}

/// Read one JSON message, accumulating stream segments until the buffer
/// parses. A message split across segments is rejoined here; a stalled
/// peer trips the socket read timeout.
fn read_json<T: serde::de::DeserializeOwned>(
    stream: &mut UnixStream,
    cap: usize,
    what: &str,
) -> Result<T, SourceError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(SourceError::Protocol(format!(
                "connection closed before a full {} arrived",
                what
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        match serde_json::from_slice(&buf) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_eof() && buf.len() < cap => continue,
            Err(e) => return Err(SourceError::Protocol(format!("bad {}: {}", what, e))),
        }
    }
}

/// One extended statistic sampled from the target's telemetry socket.
pub struct TelemetrySource {
    stream: UnixStream,
    max_output_len: usize,
    port: u16,
    key: MetricKey,
}

impl TelemetrySource {
    /// Connect to the telemetry socket and consume the banner.
    ///
    /// Must be called while the target is running; the socket only exists
    /// after the target has initialized its telemetry thread.
    ///
    /// # Errors
    ///
    /// Connection refusal surfaces as [`SourceError::Io`], a malformed
    /// banner as [`SourceError::Protocol`].
    pub fn connect(
        socket: impl AsRef<Path>,
        port: u16,
        metric: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let mut stream = UnixStream::connect(socket.as_ref())?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let banner: Banner = read_json(&mut stream, 1024, "telemetry banner")?;

        Ok(Self {
            stream,
            max_output_len: banner.max_output_len,
            port,
            key: MetricKey::global(metric),
        })
    }
}

impl MetricSource for TelemetrySource {
    fn key(&self) -> &MetricKey {
        &self.key
    }

    fn read(&mut self) -> Result<f64, SourceError> {
        let request = format!("/ethdev/xstats,{}", self.port);
        self.stream.write_all(request.as_bytes())?;

        let reply: serde_json::Value =
            read_json(&mut self.stream, self.max_output_len, "telemetry reply")?;

        reply
            .get("/ethdev/xstats")
            .and_then(|stats| stats.get(&self.key.metric))
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| {
                SourceError::Parse(format!("metric {} absent from xstats reply", self.key.metric))
            })
    }
}

impl std::fmt::Debug for TelemetrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetrySource")
            .field("key", &self.key)
            .field("port", &self.port)
            .field("max_output_len", &self.max_output_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn fake_target(listener: UnixListener, reply: &'static str) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .write_all(br#"{"version":"v2","pid":42,"max_output_len":16384}"#)
                .unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"/ethdev/xstats,0");
            stream.write_all(reply.as_bytes()).unwrap();
        })
    }

    #[test]
    fn reads_named_metric_from_xstats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = fake_target(
            listener,
            r#"{"/ethdev/xstats":{"tx_good_packets":1234,"rx_errors":0}}"#,
        );

        let mut src = TelemetrySource::connect(&path, 0, "tx_good_packets").unwrap();
        assert_eq!(src.key(), &MetricKey::global("tx_good_packets"));
        assert_eq!(src.read().unwrap(), 1234.0);
        server.join().unwrap();
    }

    #[test]
    fn missing_metric_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = fake_target(listener, r#"{"/ethdev/xstats":{"rx_errors":0}}"#);

        let mut src = TelemetrySource::connect(&path, 0, "tx_good_packets").unwrap();
        assert!(matches!(src.read(), Err(SourceError::Parse(_))));
        server.join().unwrap();
    }

    #[test]
    fn reply_split_across_segments_is_rejoined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .write_all(br#"{"version":"v2","pid":42,"max_output_len":16384}"#)
                .unwrap();
            let mut buf = [0u8; 256];
            stream.read(&mut buf).unwrap();
            stream
                .write_all(br#"{"/ethdev/xstats":{"tx_good_"#)
                .unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(50));
            stream.write_all(br#"packets":1234}}"#).unwrap();
        });

        let mut src = TelemetrySource::connect(&path, 0, "tx_good_packets").unwrap();
        assert_eq!(src.read().unwrap(), 1234.0);
        server.join().unwrap();
    }

    #[test]
    fn connect_to_missing_socket_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sock");
        assert!(matches!(
            TelemetrySource::connect(&path, 0, "tx_good_packets"),
            Err(SourceError::Io(_))
        ));
    }
}
