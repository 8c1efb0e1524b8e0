//! ==============================================================================
//! transport.rs - one request, one tcp connection
//! ==============================================================================
//!
//! purpose:
//!     opens a plain tcp connection to the telemetry endpoint, writes a
//!     prebuilt request and collects whatever the server sends back before it
//!     closes or goes quiet. no tls, no keep-alive, no chunked decoding.
//!
//! timing:
//!     every blocking step is bounded by the same timeout (30s by default):
//!     - resolve + connect
//!     - the wait for the first response bytes
//!     - each read after that
//!
//!     no data at all within the timeout is NOT an error: the exchange
//!     returns an empty response and the caller logs it. a read that times
//!     out after data arrived ends the response.
//!
//! size:
//!     the response is capped at `max_response` bytes. a peer that keeps
//!     trickling data just inside the timeout gets cut off there.
//!
//! ownership:
//!     the stream is moved into `exchange` and dropped when it returns, so
//!     the socket is closed exactly once on every path (ok, timeout, error).
//!
//! relationships:
//!     - used by: uploader.rs (through the Transport trait)
//!     - sends: http.rs (HttpRequest bytes)
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::HttpRequest;

/// Sends one request and returns the raw response text.
pub trait Transport: Send + Sync {
    fn send_request(
        &self,
        host: &str,
        port: u16,
        request: &HttpRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;
}

/// Bounds on one response read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    /// per read, and for the first bytes
    pub timeout: Duration,
    pub buffer_size: usize,
    pub max_response: usize,
}

/// The real transport: a fresh `TcpStream` per request.
#[derive(Debug, Clone)]
pub struct SocketTransport {
    limits: ReadLimits,
}

impl SocketTransport {
    pub fn new(timeout: Duration, buffer_size: usize, max_response: usize) -> Self {
        Self {
            limits: ReadLimits {
                timeout,
                buffer_size: buffer_size.max(1),
                max_response,
            },
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.timeout(), config.buffer_size, config.max_response_bytes)
    }

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let target = format!("{}:{}", host, port);
        let connect_timeout = self.limits.timeout;

        let mut addrs = timeout(connect_timeout, lookup_host((host, port)))
            .await
            .map_err(|_| TransportError::ConnectTimeout { target: target.clone() })?
            .map_err(|source| TransportError::Resolve { host: host.to_string(), source })?;

        let addr = addrs
            .next()
            .ok_or_else(|| TransportError::NoAddress { host: host.to_string() })?;

        debug!(%addr, "connecting");
        timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout { target })?
            .map_err(|source| TransportError::Connect { addr, source })
    }
}

impl Transport for SocketTransport {
    async fn send_request(
        &self,
        host: &str,
        port: u16,
        request: &HttpRequest,
    ) -> Result<String, TransportError> {
        let stream = self.connect(host, port).await?;
        debug!(bytes = request.len(), "connected, sending request");
        exchange(stream, request.as_bytes(), &self.limits).await
    }
}

/// Write `request` to `stream` and read the response.
///
/// Takes the stream by value: it is dropped (closed) when this returns.
pub async fn exchange<S>(
    mut stream: S,
    request: &[u8],
    limits: &ReadLimits,
) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // write_all loops until the socket has taken every byte
    stream.write_all(request).await.map_err(TransportError::Write)?;
    stream.flush().await.map_err(TransportError::Write)?;

    let read_timeout = limits.timeout;
    let mut buffer = vec![0u8; limits.buffer_size.max(1)];
    let mut response = Vec::new();

    // phase 1: wait for the first bytes
    match read_chunk(&mut stream, &mut buffer, read_timeout).await? {
        Some(0) => {
            debug!("peer closed without sending a response");
            return Ok(String::new());
        }
        Some(n) => response.extend_from_slice(&buffer[..n]),
        None => {
            warn!(timeout_s = read_timeout.as_secs(), "no response data within timeout");
            return Ok(String::new());
        }
    }

    // phase 2: keep reading until the peer closes, goes quiet or hits the cap
    loop {
        if response.len() >= limits.max_response {
            warn!(max = limits.max_response, "response too large, truncating");
            response.truncate(limits.max_response);
            break;
        }
        match read_chunk(&mut stream, &mut buffer, read_timeout).await? {
            Some(0) => break,
            // only the bytes this read produced; the tail of the buffer may
            // still hold an earlier, longer chunk
            Some(n) => response.extend_from_slice(&buffer[..n]),
            None => {
                debug!(bytes = response.len(), "read timed out, ending response");
                break;
            }
        }
    }

    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// `Some(n)` bytes read (0 = closed), `None` = timed out
async fn read_chunk<S>(
    stream: &mut S,
    buffer: &mut [u8],
    read_timeout: Duration,
) -> Result<Option<usize>, TransportError>
where
    S: AsyncRead + Unpin,
{
    match timeout(read_timeout, stream.read(buffer)).await {
        Ok(Ok(n)) => Ok(Some(n)),
        Ok(Err(e)) => Err(TransportError::Read(e)),
        Err(_) => Ok(None),
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;
    use tokio::net::TcpListener;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn limits(buffer_size: usize) -> ReadLimits {
        ReadLimits { timeout: TIMEOUT, buffer_size, max_response: 64 * 1024 }
    }

    enum Chunk {
        Data(Vec<u8>),
        Fail(io::ErrorKind),
        /// never becomes readable
        Stall,
    }

    /// scripted stream: reads replay `chunks`, then EOF.
    /// counts how many times it was dropped (closed).
    struct FakeStream {
        chunks: VecDeque<Chunk>,
        written: Arc<Mutex<Vec<u8>>>,
        closes: Arc<AtomicUsize>,
        max_write: usize,
        fail_write: bool,
    }

    impl FakeStream {
        fn new(chunks: Vec<Chunk>) -> Self {
            Self {
                chunks: chunks.into(),
                written: Arc::new(Mutex::new(Vec::new())),
                closes: Arc::new(AtomicUsize::new(0)),
                max_write: usize::MAX,
                fail_write: false,
            }
        }

        fn data(chunks: &[&[u8]]) -> Self {
            Self::new(chunks.iter().map(|c| Chunk::Data(c.to_vec())).collect())
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AsyncRead for FakeStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if matches!(self.chunks.front(), Some(Chunk::Stall)) {
                return Poll::Pending;
            }
            match self.chunks.pop_front() {
                Some(Chunk::Data(data)) => {
                    assert!(data.len() <= buf.remaining(), "chunk larger than read buffer");
                    buf.put_slice(&data);
                    Poll::Ready(Ok(()))
                }
                Some(Chunk::Fail(kind)) => Poll::Ready(Err(io::Error::from(kind))),
                Some(Chunk::Stall) => unreachable!(),
                None => Poll::Ready(Ok(())),
            }
        }
    }

    impl AsyncWrite for FakeStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_write {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            let n = buf.len().min(self.max_write);
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_collects_response_and_closes_once() {
        let stream = FakeStream::data(&[b"HTTP/1.1 200 OK\r\n", b"\r\n", b"42"]);
        let closes = stream.closes.clone();

        let response = exchange(stream, b"req", &limits(1024)).await.unwrap();

        assert_eq!(response, "HTTP/1.1 200 OK\r\n\r\n42");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_partial_writes_send_whole_request() {
        let mut stream = FakeStream::data(&[b"ok"]);
        stream.max_write = 3;
        let written = stream.written.clone();
        let request = b"POST /update HTTP/1.1\r\nContent-Length: 8\r\n\r\nfield1=1";

        exchange(stream, request, &limits(1024)).await.unwrap();

        assert_eq!(written.lock().unwrap().as_slice(), request.as_slice());
    }

    #[tokio::test]
    async fn test_shrinking_reads_do_not_leak_stale_bytes() {
        let stream = FakeStream::data(&[b"0123456789", b"abc", b"Z"]);

        let response = exchange(stream, b"req", &limits(10)).await.unwrap();

        assert_eq!(response, "0123456789abcZ");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_reads() {
        let bytes = "température".as_bytes();
        // split inside the two-byte 'é'
        let stream = FakeStream::data(&[&bytes[..5], &bytes[5..]]);

        let response = exchange(stream, b"req", &limits(64)).await.unwrap();

        assert_eq!(response, "température");
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_within_timeout_is_empty_and_closes_once() {
        let stream = FakeStream::new(vec![Chunk::Stall]);
        let closes = stream.closes.clone();
        let started = tokio::time::Instant::now();

        let response = exchange(stream, b"req", &limits(1024)).await.unwrap();

        assert_eq!(response, "");
        assert!(started.elapsed() >= TIMEOUT);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_peer_after_data_keeps_data() {
        let stream = FakeStream::new(vec![Chunk::Data(b"HTTP/1.1 200 OK".to_vec()), Chunk::Stall]);
        let closes = stream.closes.clone();

        let response = exchange(stream, b"req", &limits(1024)).await.unwrap();

        assert_eq!(response, "HTTP/1.1 200 OK");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_closing_immediately_is_empty() {
        let stream = FakeStream::data(&[]);
        let response = exchange(stream, b"req", &limits(1024)).await.unwrap();
        assert_eq!(response, "");
    }

    #[tokio::test]
    async fn test_receive_error_surfaces_and_closes_once() {
        let stream = FakeStream::new(vec![
            Chunk::Data(b"HTTP/1.1".to_vec()),
            Chunk::Fail(io::ErrorKind::ConnectionReset),
        ]);
        let closes = stream.closes.clone();

        let err = exchange(stream, b"req", &limits(1024)).await.unwrap_err();

        assert!(matches!(err, TransportError::Read(ref e) if e.kind() == io::ErrorKind::ConnectionReset));
        assert!(!err.is_connection());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_error_surfaces_and_closes_once() {
        let mut stream = FakeStream::data(&[b"never read"]);
        stream.fail_write = true;
        let closes = stream.closes.clone();

        let err = exchange(stream, b"req", &limits(1024)).await.unwrap_err();

        assert!(matches!(err, TransportError::Write(_)));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_trickling_peer_is_cut_off_at_cap() {
        let chunks = vec![b"0123456789".as_slice(); 50];
        let stream = FakeStream::data(&chunks);
        let closes = stream.closes.clone();
        let limits = ReadLimits { timeout: TIMEOUT, buffer_size: 10, max_response: 25 };

        let response = exchange(stream, b"req", &limits).await.unwrap();

        assert_eq!(response, "0123456789012345678901234");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_socket_transport_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let request = crate::http::build_request(
            "127.0.0.1",
            "KEY",
            &crate::http::UploadPayload::new().with("field1", "612"),
        );
        let expected = request.as_bytes().to_vec();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = vec![0u8; expected.len()];
            socket.read_exact(&mut received).await.unwrap();
            socket.write_all(b"HTTP/1.1 200 OK\r\n\r\n1").await.unwrap();
            received == expected
        });

        let transport = SocketTransport::new(Duration::from_secs(5), 1024, 64 * 1024);
        let response = transport.send_request("127.0.0.1", port, &request).await.unwrap();

        assert_eq!(response, "HTTP/1.1 200 OK\r\n\r\n1");
        assert!(server.await.unwrap(), "server saw a different request");
    }

    #[tokio::test]
    async fn test_socket_transport_connection_refused() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let request = crate::http::build_request("127.0.0.1", "KEY", &crate::http::UploadPayload::new());

        let transport = SocketTransport::new(Duration::from_secs(5), 1024, 64 * 1024);
        let err = transport.send_request("127.0.0.1", port, &request).await.unwrap_err();

        assert!(err.is_connection(), "unexpected error: {err}");
    }

    #[test]
    fn test_from_config() {
        let transport = SocketTransport::from_config(&TransportConfig::default());
        assert_eq!(transport.limits.timeout, Duration::from_secs(30));
        assert_eq!(transport.limits.buffer_size, 1024);
        assert_eq!(transport.limits.max_response, 64 * 1024);
    }
}
