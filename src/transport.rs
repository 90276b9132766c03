//! Byte-stream transports for command/response devices.
//!
//! Control endpoints are half-duplex: one request goes out, one reply comes
//! back, and nothing else is in flight on the link. [`StreamTransport`] wraps
//! any async byte stream (TCP socket, serial port, in-memory duplex for tests)
//! and enforces that with an internal lock.
//!
//! Framing is deliberately generic: outgoing frames get a terminator appended,
//! replies are read up to a delimiter byte. Checksums and byte packing belong
//! to the codec layer.
//!
//! A request that times out leaves the link *stale*: its reply may still be on
//! the way. Before the next frame goes out the link is drained until it has
//! been quiet for one full timeout, so a late reply is never taken as the
//! answer to a later request.
//!
//! # Example
//! ```no_run
//! # async fn example() -> anyhow::Result<()> {
//! use std::time::Duration;
//! use hwsync::transport::{connect_tcp, Transport};
//!
//! let link = connect_tcp("10.0.0.42:23", Duration::from_secs(1)).await?;
//! let reply = link.request(b"PWR?").await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Trait alias for async byte streams usable as a device link.
pub trait StreamIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIO for T {}

/// Type-erased boxed stream.
pub type DynStream = Box<dyn StreamIO>;

/// Half-duplex request/response link to a device.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a frame without waiting for a reply.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Send a frame and wait for one reply frame.
    ///
    /// Returns `Ok(None)` when no reply arrived within the read timeout.
    async fn request(&self, frame: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Builder for [`StreamTransport`].
///
/// Defaults:
/// * timeout: 1 second
/// * terminator: "\r\n"
/// * delimiter: '\n'
pub struct StreamTransportBuilder {
    timeout: Duration,
    terminator: Vec<u8>,
    delimiter: u8,
}

impl StreamTransportBuilder {
    /// Builder with default framing.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            terminator: b"\r\n".to_vec(),
            delimiter: b'\n',
        }
    }

    /// Set the reply read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the bytes appended to every outgoing frame.
    pub fn with_terminator(mut self, terminator: impl Into<Vec<u8>>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Set the byte that ends a reply frame.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Wrap `stream` with the configured framing.
    pub fn build(self, stream: impl StreamIO + 'static) -> StreamTransport {
        let boxed: DynStream = Box::new(stream);
        StreamTransport {
            io: Mutex::new(Link {
                reader: BufReader::new(boxed),
                stale: false,
            }),
            timeout: self.timeout,
            terminator: self.terminator,
            delimiter: self.delimiter,
        }
    }
}

impl Default for StreamTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Link {
    reader: BufReader<DynStream>,
    /// A reply to an earlier request may still arrive.
    stale: bool,
}

/// Delimiter-framed transport over an async byte stream.
pub struct StreamTransport {
    io: Mutex<Link>,
    timeout: Duration,
    terminator: Vec<u8>,
    delimiter: u8,
}

impl StreamTransport {
    /// Transport with default framing.
    pub fn new(stream: impl StreamIO + 'static) -> Self {
        StreamTransportBuilder::new().build(stream)
    }

    /// Configured reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Discard unsolicited bytes before a new frame goes out.
    ///
    /// Always takes whatever is readable right now. On a stale link, keeps
    /// reading until nothing arrives for one timeout.
    async fn drain(&self, link: &mut Link) -> Result<()> {
        let quiet = if link.stale { self.timeout } else { Duration::ZERO };
        let mut discarded = 0;
        loop {
            let buffered = link.reader.buffer().len();
            link.reader.consume(buffered);
            discarded += buffered;

            let outcome = tokio::time::timeout(quiet, link.reader.fill_buf()).await;
            let read = match outcome {
                Err(_) => break,
                Ok(Ok(bytes)) => bytes.len(),
                Ok(Err(e)) => return Err(e).context("Failed to drain stale reply"),
            };
            if read == 0 {
                return Err(anyhow!("Connection closed by device"));
            }
        }

        if discarded > 0 {
            tracing::debug!(bytes = discarded, "Discarded stale reply bytes");
        }
        link.stale = false;
        Ok(())
    }

    async fn write_frame(&self, link: &mut Link, frame: &[u8]) -> Result<()> {
        self.drain(link).await?;

        let stream = link.reader.get_mut();
        stream.write_all(frame).await.context("Failed to write frame")?;
        stream
            .write_all(&self.terminator)
            .await
            .context("Failed to write frame terminator")?;
        stream.flush().await.context("Failed to flush stream")?;
        Ok(())
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        let mut io = self.io.lock().await;
        self.write_frame(&mut io, frame).await
    }

    async fn request(&self, frame: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut io = self.io.lock().await;
        self.write_frame(&mut io, frame).await?;

        let mut reply = Vec::new();
        let read = io.reader.read_until(self.delimiter, &mut reply);
        let outcome = tokio::time::timeout(self.timeout, read).await;
        match outcome {
            Err(_) => {
                io.stale = true;
                Ok(None)
            }
            Ok(Ok(0)) => Err(anyhow!("Connection closed by device")),
            Ok(Ok(_)) => {
                if reply.last() == Some(&self.delimiter) {
                    reply.pop();
                }
                if reply.last() == Some(&b'\r') {
                    reply.pop();
                }
                Ok(Some(reply))
            }
            Ok(Err(e)) => Err(e).context("Failed to read reply"),
        }
    }
}

/// Open a TCP connection and wrap it with default framing.
pub async fn connect_tcp(addr: &str, timeout: Duration) -> Result<StreamTransport> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("Timed out connecting to {addr}"))?
        .with_context(|| format!("Failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;
    Ok(StreamTransportBuilder::new()
        .with_timeout(timeout)
        .build(stream))
}

/// Open a serial port and wrap it with default framing.
#[cfg(feature = "serial")]
pub fn open_serial(path: &str, baud_rate: u32, timeout: Duration) -> Result<StreamTransport> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(path, baud_rate)
        .open_native_async()
        .with_context(|| format!("Failed to open serial port {path}"))?;
    Ok(StreamTransportBuilder::new()
        .with_timeout(timeout)
        .build(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn request_reads_one_delimited_reply() {
        let (client, server) = tokio::io::duplex(256);
        let link = StreamTransport::new(client);

        let device = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "PWR?\r\n");
            server.get_mut().write_all(b"PWR=ON\r\n").await.unwrap();
        });

        let reply = link.request(b"PWR?").await.unwrap();
        assert_eq!(reply.as_deref(), Some(&b"PWR=ON"[..]));
        device.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_yields_none() {
        let (client, _server) = tokio::io::duplex(256);
        let link = StreamTransportBuilder::new()
            .with_timeout(Duration::from_millis(200))
            .build(client);

        assert_eq!(link.request(b"PWR?").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_is_not_taken_as_next_answer() {
        let (client, server) = tokio::io::duplex(256);
        let link = StreamTransportBuilder::new()
            .with_timeout(Duration::from_millis(100))
            .build(client);

        let device = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            server.get_mut().write_all(b"PWR=ON\r\n").await.unwrap();

            line.clear();
            server.read_line(&mut line).await.unwrap();
            assert_eq!(line, "VOL?\r\n");
            server.get_mut().write_all(b"VOL=30\r\n").await.unwrap();
        });

        assert_eq!(link.request(b"PWR?").await.unwrap(), None);
        let reply = link.request(b"VOL?").await.unwrap();
        assert_eq!(reply.as_deref(), Some(&b"VOL=30"[..]));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn unsolicited_bytes_are_dropped_before_a_request() {
        let (client, server) = tokio::io::duplex(256);
        let link = StreamTransport::new(client);
        let mut server = BufReader::new(server);
        server.get_mut().write_all(b"NOISE\r\n").await.unwrap();

        let device = tokio::spawn(async move {
            let mut line = String::new();
            server.read_line(&mut line).await.unwrap();
            server.get_mut().write_all(b"PWR=OFF\r\n").await.unwrap();
        });

        let reply = link.request(b"PWR?").await.unwrap();
        assert_eq!(reply.as_deref(), Some(&b"PWR=OFF"[..]));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn closed_stream_is_an_error() {
        let (client, server) = tokio::io::duplex(256);
        drop(server);
        let link = StreamTransport::new(client);
        assert!(link.request(b"PWR?").await.is_err());
    }

    #[tokio::test]
    async fn custom_framing_is_applied() {
        let (client, server) = tokio::io::duplex(256);
        let link = StreamTransportBuilder::new()
            .with_terminator(b"\r".to_vec())
            .with_delimiter(b'\r')
            .build(client);

        let device = tokio::spawn(async move {
            let mut server = BufReader::new(server);
            let mut frame = Vec::new();
            server.read_until(b'\r', &mut frame).await.unwrap();
            assert_eq!(frame, b"VOL?\r");
            server.get_mut().write_all(b"VOL 30\r").await.unwrap();
        });

        let reply = link.request(b"VOL?").await.unwrap();
        assert_eq!(reply.as_deref(), Some(&b"VOL 30"[..]));
        device.await.unwrap();
    }
}
